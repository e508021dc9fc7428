//! Seeded multi-session simulation
//!
//! Every round each session draws one action from a seeded RNG. The actions
//! of a round then run concurrently against one shared flaky store, with
//! save announcements travelling over one [`SessionBus`].
//!
//! Invariants checked:
//! - After every round, no session is in `conflict` without a snapshot and
//!   no session holds pending changes outside `local_only`, `error` or
//!   `offline`
//! - The final revision equals `1 + accepted writes`
//! - Every accepted revision was reported to exactly one session

use plansync_core::{
    ConfigError, DocumentSaved, LoadOutcome, ProjectSession, ResolutionOutcome, ResolveStrategy,
    RetryConfig, SaveOutcome, SessionBus, SyncConfig, SyncErrorKind, SyncStatus,
    DEFAULT_BUS_CAPACITY,
};
use plansync_document::{DesignPayload, DocumentError, DocumentId, NewDocument};
use plansync_store::{
    FaultInjectingStore, FaultPlan, MemoryDocumentStore, ProjectDocumentStore, StoreError,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Attempts each session gets to join the shared document
const JOIN_ATTEMPTS: u32 = 10;

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Concurrent sessions sharing one document
    pub sessions: usize,
    /// Rounds to run
    pub rounds: u64,
    /// Seed for action choice and fault injection
    pub seed: u64,
    /// Probability that any store call fails with a transport error
    pub failure_rate: f64,
    /// Configuration handed to every session
    pub sync: SyncConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sessions: 4,
            rounds: 200,
            seed: 42,
            failure_rate: 0.1,
            sync: Self::default_sync(),
        }
    }
}

impl SimulatorConfig {
    /// Session config with millisecond backoff so runs finish quickly
    #[must_use]
    pub fn default_sync() -> SyncConfig {
        SyncConfig::default().with_retry(
            RetryConfig::default().with_delays(Duration::from_millis(2), Duration::from_millis(20)),
        )
    }

    /// Check ranges
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for zero sessions, a failure rate
    /// outside `[0, 1)` or an invalid session config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions == 0 {
            return Err(ConfigError::Invalid("sessions must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.failure_rate) {
            return Err(ConfigError::Invalid(format!(
                "failure_rate must be in [0, 1), got {}",
                self.failure_rate
            )));
        }
        self.sync.validate()
    }
}

/// Simulator setup failures
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid seed document: {0}")]
    Document(#[from] DocumentError),

    #[error("failed to seed the shared document: {0}")]
    Seed(#[from] StoreError),

    #[error("session {session} could not load the shared document: {message}")]
    Join { session: usize, message: String },
}

/// An invariant that did not hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Stored revision does not match the number of accepted writes
    RevisionDrift {
        final_revision: u64,
        accepted_writes: u64,
    },
    /// Two successes reported the same revision
    DuplicateRevision { revision: u64 },
    /// Accepted writes that no session reported, or vice versa
    UnreportedWrites { reported: u64, accepted_writes: u64 },
    /// Session in conflict with nothing to resolve against
    ConflictWithoutSnapshot { round: u64, session: usize },
    /// Pending changes in a status that cannot hold them
    PendingOutsideAllowed {
        round: u64,
        session: usize,
        status: SyncStatus,
    },
    /// Loading flag left raised between rounds
    LoadingFlagStuck { round: u64, session: usize },
}

/// Counters collected during a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    pub edits: u64,
    pub saves_attempted: u64,
    pub saves_succeeded: u64,
    pub save_conflicts: u64,
    /// Failed saves by error kind
    pub save_errors: BTreeMap<String, u64>,
    pub reloads: u64,
    pub reload_failures: u64,
    /// Successful resolutions by strategy
    pub resolutions: BTreeMap<String, u64>,
    pub resolution_conflicts: u64,
    pub resolution_failures: u64,
    pub copies_created: u64,
    pub status_overrides: u64,
    pub injected_faults: u64,
    pub accepted_writes: u64,
    pub final_revision: u64,
}

/// Final report from the simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: SimulatorStats,
    pub violations: Vec<Violation>,
    /// Status of each session after the last round
    pub final_statuses: Vec<SyncStatus>,
}

impl SimulatorReport {
    /// True when no invariant was violated
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let stats = &self.stats;
        let mut report = String::new();

        report.push_str("=== PlanSync Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Sessions: {}\n", self.config.sessions));
        report.push_str(&format!("Rounds: {}\n", self.config.rounds));
        report.push_str(&format!("Failure Rate: {:.2}\n", self.config.failure_rate));
        report.push_str(&format!("Edits: {}\n", stats.edits));
        report.push_str(&format!("Saves Attempted: {}\n", stats.saves_attempted));
        report.push_str(&format!("Saves Succeeded: {}\n", stats.saves_succeeded));
        report.push_str(&format!("Save Conflicts: {}\n", stats.save_conflicts));
        for (kind, count) in &stats.save_errors {
            report.push_str(&format!("Save Errors ({kind}): {count}\n"));
        }
        report.push_str(&format!(
            "Reloads: {} ({} failed)\n",
            stats.reloads, stats.reload_failures
        ));
        for (strategy, count) in &stats.resolutions {
            report.push_str(&format!("Resolutions ({strategy}): {count}\n"));
        }
        report.push_str(&format!(
            "Resolution Conflicts: {}\n",
            stats.resolution_conflicts
        ));
        report.push_str(&format!("Resolution Failures: {}\n", stats.resolution_failures));
        report.push_str(&format!("Copies Created: {}\n", stats.copies_created));
        report.push_str(&format!("Status Overrides: {}\n", stats.status_overrides));
        report.push_str(&format!("Injected Faults: {}\n", stats.injected_faults));
        report.push_str(&format!("Accepted Writes: {}\n", stats.accepted_writes));
        report.push_str(&format!("Final Revision: {}\n", stats.final_revision));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }

    /// Report as pretty JSON
    ///
    /// # Errors
    /// Returns the serializer error, which does not occur for well-formed
    /// reports
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Edit,
    EditAndSave,
    Save,
    Reload,
    Resolve(ResolveStrategy),
    GoOffline,
    GoOnline,
}

#[derive(Debug)]
enum StepKind {
    Edited,
    Saved { edited: bool, outcome: SaveOutcome },
    Reloaded(LoadOutcome),
    Resolved(ResolutionOutcome),
    Override { accepted: bool },
}

struct SimSession {
    index: usize,
    session: ProjectSession,
    inbox: broadcast::Receiver<DocumentSaved>,
    newest_foreign: Option<DocumentSaved>,
}

impl SimSession {
    /// Read every pending announcement, keeping the newest one from a sibling
    fn drain_inbox(&mut self) {
        loop {
            match self.inbox.try_recv() {
                Ok(event) => {
                    if event.origin_id == self.session.id() {
                        continue;
                    }
                    let newer = self
                        .newest_foreign
                        .as_ref()
                        .map_or(true, |seen| event.revision > seen.revision);
                    if newer {
                        self.newest_foreign = Some(event);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!("Session {} skipped {} announcements", self.index, skipped);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn is_stale(&self) -> bool {
        self.newest_foreign
            .as_ref()
            .is_some_and(|event| self.session.is_stale_against(event))
    }

    fn choose(&self, rng: &mut StdRng) -> Action {
        let state = self.session.state();
        match state.status {
            SyncStatus::Conflict => {
                Action::Resolve(ResolveStrategy::ALL[rng.gen_range(0..ResolveStrategy::ALL.len())])
            }
            SyncStatus::Offline => {
                if rng.gen_bool(0.5) {
                    Action::GoOnline
                } else {
                    Action::Edit
                }
            }
            _ if self.is_stale() && !state.pending_changes => Action::Reload,
            _ => match rng.gen_range(0..100) {
                0..=4 => Action::GoOffline,
                5..=49 => Action::EditAndSave,
                50..=74 => Action::Edit,
                _ => Action::Save,
            },
        }
    }

    fn edit(&self, round: u64, value: u32) {
        let key = format!("item-{}", self.index);
        self.session
            .edit(|model| model.set(key, json!({ "round": round, "value": value })));
    }

    async fn perform(&self, document: DocumentId, action: Action, round: u64, value: u32) -> StepKind {
        match action {
            Action::Edit => {
                self.edit(round, value);
                StepKind::Edited
            }
            Action::EditAndSave => {
                self.edit(round, value);
                StepKind::Saved {
                    edited: true,
                    outcome: self.session.save().await,
                }
            }
            Action::Save => StepKind::Saved {
                edited: false,
                outcome: self.session.save().await,
            },
            Action::Reload => StepKind::Reloaded(self.session.load(document).await),
            Action::Resolve(strategy) => {
                StepKind::Resolved(self.session.resolve_conflict(strategy).await)
            }
            Action::GoOffline => StepKind::Override {
                accepted: self.session.set_status(SyncStatus::Offline).is_ok(),
            },
            Action::GoOnline => StepKind::Override {
                accepted: self.session.set_status(SyncStatus::Synced).is_ok(),
            },
        }
    }

    fn check(&self, round: u64, violations: &mut Vec<Violation>) {
        let state = self.session.state();
        let session = self.index;
        if state.status == SyncStatus::Conflict && state.conflict_snapshot.is_none() {
            violations.push(Violation::ConflictWithoutSnapshot { round, session });
        }
        if state.pending_changes && !state.status.may_hold_pending() {
            violations.push(Violation::PendingOutsideAllowed {
                round,
                session,
                status: state.status,
            });
        }
        if self.session.is_loading() {
            violations.push(Violation::LoadingFlagStuck { round, session });
        }
    }
}

fn tally(stats: &mut SimulatorStats, reported: &mut Vec<u64>, kind: StepKind) {
    match kind {
        StepKind::Edited => stats.edits += 1,
        StepKind::Saved { edited, outcome } => {
            if edited {
                stats.edits += 1;
            }
            stats.saves_attempted += 1;
            match outcome {
                SaveOutcome::Success { new_revision } => {
                    stats.saves_succeeded += 1;
                    reported.push(new_revision.get());
                }
                SaveOutcome::Conflict { .. } => stats.save_conflicts += 1,
                SaveOutcome::Error { kind, .. } => {
                    *stats.save_errors.entry(kind_name(kind)).or_default() += 1;
                }
            }
        }
        StepKind::Reloaded(outcome) => {
            stats.reloads += 1;
            if !outcome.is_loaded() {
                stats.reload_failures += 1;
            }
        }
        StepKind::Resolved(outcome) => match outcome {
            ResolutionOutcome::Resolved {
                strategy,
                revision,
                copy,
                ..
            } => {
                *stats
                    .resolutions
                    .entry(strategy.as_str().to_string())
                    .or_default() += 1;
                if strategy == ResolveStrategy::KeepLocal {
                    reported.push(revision.get());
                }
                if copy.is_some() {
                    stats.copies_created += 1;
                }
            }
            ResolutionOutcome::Conflict { .. } => stats.resolution_conflicts += 1,
            ResolutionOutcome::NotInConflict => {}
            ResolutionOutcome::Failed { .. } => stats.resolution_failures += 1,
        },
        StepKind::Override { accepted } => {
            if accepted {
                stats.status_overrides += 1;
            }
        }
    }
}

fn kind_name(kind: SyncErrorKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{kind:?}"))
}

/// Run the simulator
///
/// # Errors
/// Returns [`SimulatorError`] when the run cannot be set up; invariant
/// failures are reported in [`SimulatorReport::violations`] instead
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, SimulatorError> {
    config.validate()?;
    tracing::info!(
        "Simulating {} sessions for {} rounds (seed {}, failure rate {})",
        config.sessions,
        config.rounds,
        config.seed,
        config.failure_rate
    );

    let memory = Arc::new(MemoryDocumentStore::new());
    let document = memory
        .create(NewDocument::new("Simulated kitchen", DesignPayload::empty())?)
        .await?;
    let store = Arc::new(FaultInjectingStore::with_plan(
        memory.clone(),
        FaultPlan::flaky(config.failure_rate, config.seed),
    ));
    let bus = Arc::new(SessionBus::new(
        config.sync.channel_name.clone(),
        (config.sessions * 4).max(DEFAULT_BUS_CAPACITY),
    ));

    let mut sessions = Vec::with_capacity(config.sessions);
    for index in 0..config.sessions {
        let session = ProjectSession::builder(store.clone())
            .notifier(bus.clone())
            .config(config.sync.clone())
            .build();
        let mut joined = session.load(document.id).await;
        for _ in 1..JOIN_ATTEMPTS {
            if joined.is_loaded() {
                break;
            }
            joined = session.load(document.id).await;
        }
        if let LoadOutcome::Failed { message, .. } = joined {
            return Err(SimulatorError::Join {
                session: index,
                message,
            });
        }
        sessions.push(SimSession {
            index,
            session,
            inbox: bus.subscribe(),
            newest_foreign: None,
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();
    let mut reported = Vec::new();

    for round in 0..config.rounds {
        let plan: Vec<(Action, u32)> = sessions
            .iter_mut()
            .map(|sim| {
                sim.drain_inbox();
                (sim.choose(&mut rng), rng.gen())
            })
            .collect();

        let steps = futures::future::join_all(
            sessions
                .iter()
                .zip(&plan)
                .map(|(sim, &(action, value))| sim.perform(document.id, action, round, value)),
        )
        .await;
        for kind in steps {
            tally(&mut stats, &mut reported, kind);
        }

        for sim in &sessions {
            sim.check(round, &mut violations);
        }
        tracing::debug!("Round {} done, {} writes accepted", round, memory.accepted_writes());
    }

    stats.injected_faults = store.injected_faults();
    stats.accepted_writes = memory.accepted_writes();
    stats.final_revision = memory
        .peek(&document.id)
        .map_or(0, |stored| stored.revision.get());
    check_store(&stats, &mut reported, &mut violations);

    let final_statuses = sessions.iter().map(|sim| sim.session.status()).collect();
    for sim in &sessions {
        sim.session.close();
    }

    let report = SimulatorReport {
        config,
        stats,
        violations,
        final_statuses,
    };
    if report.passed() {
        tracing::info!(
            "Simulation passed at revision {}",
            report.stats.final_revision
        );
    } else {
        tracing::error!(
            "Simulation found {} violations",
            report.violations.len()
        );
    }
    Ok(report)
}

fn check_store(stats: &SimulatorStats, reported: &mut [u64], violations: &mut Vec<Violation>) {
    if stats.final_revision != 1 + stats.accepted_writes {
        violations.push(Violation::RevisionDrift {
            final_revision: stats.final_revision,
            accepted_writes: stats.accepted_writes,
        });
    }

    reported.sort_unstable();
    for pair in reported.windows(2) {
        if pair[0] == pair[1] {
            violations.push(Violation::DuplicateRevision { revision: pair[0] });
        }
    }

    let reported_count = reported.len() as u64;
    if reported_count != stats.accepted_writes {
        violations.push(Violation::UnreportedWrites {
            reported: reported_count,
            accepted_writes: stats.accepted_writes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sessions_is_rejected() {
        let config = SimulatorConfig {
            sessions: 0,
            ..SimulatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn certain_failure_is_rejected() {
        let config = SimulatorConfig {
            failure_rate: 1.0,
            ..SimulatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn store_checks_flag_duplicates_and_drift() {
        let stats = SimulatorStats {
            accepted_writes: 3,
            final_revision: 3,
            ..SimulatorStats::default()
        };
        let mut reported = vec![3, 2, 3];
        let mut violations = Vec::new();

        check_store(&stats, &mut reported, &mut violations);

        assert_eq!(
            violations,
            vec![
                Violation::RevisionDrift {
                    final_revision: 3,
                    accepted_writes: 3
                },
                Violation::DuplicateRevision { revision: 3 },
            ]
        );
    }

    #[test]
    fn error_kinds_use_wire_names() {
        assert_eq!(kind_name(SyncErrorKind::NotFound), "NOT_FOUND");
        assert_eq!(kind_name(SyncErrorKind::Busy), "BUSY");
    }

    #[test]
    fn report_text_ends_with_verdict() {
        let report = SimulatorReport {
            config: SimulatorConfig::default(),
            stats: SimulatorStats::default(),
            violations: vec![Violation::DuplicateRevision { revision: 4 }],
            final_statuses: Vec::new(),
        };

        let text = report.generate_text();

        assert!(!report.passed());
        assert!(text.contains("DuplicateRevision"));
        assert!(text.trim_end().ends_with("=== Result: FAIL ==="));
    }
}
