//! Transport fault injection
//!
//! Wraps a real store and answers some calls with
//! [`StoreError::Transport`] before they reach it. Faults are either
//! scripted (`fail_next_writes`) or drawn from a seeded RNG so simulations
//! stay reproducible.

use crate::error::StoreError;
use crate::store::{MetadataPatch, ProjectDocumentStore, WriteOutcome, WriteRequest};
use parking_lot::Mutex;
use plansync_document::{DocumentId, NewDocument, ProjectDocument};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Random fault configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultPlan {
    /// Probability in `[0, 1]` that any call fails with a transport error
    pub transport_failure_rate: f64,
    /// RNG seed
    pub seed: u64,
}

impl FaultPlan {
    /// No random faults
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self {
            transport_failure_rate: 0.0,
            seed: 0,
        }
    }

    /// Seeded failure rate
    #[inline]
    #[must_use]
    pub fn flaky(transport_failure_rate: f64, seed: u64) -> Self {
        Self {
            transport_failure_rate: transport_failure_rate.clamp(0.0, 1.0),
            seed,
        }
    }
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self::none()
    }
}

/// Store wrapper that injects transport failures
#[derive(Debug)]
pub struct FaultInjectingStore<S> {
    inner: Arc<S>,
    plan: FaultPlan,
    rng: Mutex<StdRng>,
    scripted_write_failures: AtomicU32,
    scripted_read_failures: AtomicU32,
    attempted_writes: AtomicU64,
    injected_faults: AtomicU64,
}

impl<S: ProjectDocumentStore> FaultInjectingStore<S> {
    /// Wrap a store with only scripted faults
    #[must_use]
    pub fn new(inner: Arc<S>) -> Self {
        Self::with_plan(inner, FaultPlan::none())
    }

    /// Wrap a store with a random fault plan
    #[must_use]
    pub fn with_plan(inner: Arc<S>, plan: FaultPlan) -> Self {
        Self {
            inner,
            rng: Mutex::new(StdRng::seed_from_u64(plan.seed)),
            plan,
            scripted_write_failures: AtomicU32::new(0),
            scripted_read_failures: AtomicU32::new(0),
            attempted_writes: AtomicU64::new(0),
            injected_faults: AtomicU64::new(0),
        }
    }

    /// Wrapped store
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Fail the next `count` writes with transport errors
    pub fn fail_next_writes(&self, count: u32) {
        self.scripted_write_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` reads with transport errors
    pub fn fail_next_reads(&self, count: u32) {
        self.scripted_read_failures.store(count, Ordering::SeqCst);
    }

    /// Write calls seen, including failed ones
    #[inline]
    #[must_use]
    pub fn attempted_writes(&self) -> u64 {
        self.attempted_writes.load(Ordering::SeqCst)
    }

    /// Faults injected so far
    #[inline]
    #[must_use]
    pub fn injected_faults(&self) -> u64 {
        self.injected_faults.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, scripted: Option<&AtomicU32>, call: &str) -> Result<(), StoreError> {
        let scripted_hit = scripted.is_some_and(|counter| {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        });
        let random_hit = !scripted_hit
            && self.plan.transport_failure_rate > 0.0
            && self.rng.lock().gen_bool(self.plan.transport_failure_rate);

        if scripted_hit || random_hit {
            self.injected_faults.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Injecting transport fault into {}", call);
            return Err(StoreError::transport(format!("injected fault during {call}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: ProjectDocumentStore> ProjectDocumentStore for FaultInjectingStore<S> {
    async fn read(&self, id: &DocumentId) -> Result<ProjectDocument, StoreError> {
        self.maybe_fail(Some(&self.scripted_read_failures), "read")?;
        self.inner.read(id).await
    }

    async fn create(&self, draft: NewDocument) -> Result<ProjectDocument, StoreError> {
        self.maybe_fail(None, "create")?;
        self.inner.create(draft).await
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome, StoreError> {
        self.attempted_writes.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail(Some(&self.scripted_write_failures), "write")?;
        self.inner.write(request).await
    }

    async fn update_metadata(
        &self,
        id: &DocumentId,
        patch: MetadataPatch,
    ) -> Result<(), StoreError> {
        self.maybe_fail(None, "update_metadata")?;
        self.inner.update_metadata(id, patch).await
    }
}
