//! PlanSync simulator
//!
//! Drives many sessions against one shared document over a store that
//! injects transport failures, then checks the engine's invariants.
//!
//! ```ignore
//! use plansync_sim::{run_simulator, SimulatorConfig};
//!
//! let report = run_simulator(SimulatorConfig::default()).await?;
//! assert!(report.passed(), "{}", report.generate_text());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod simulator;

pub use simulator::{
    run_simulator, SimulatorConfig, SimulatorError, SimulatorReport, SimulatorStats, Violation,
};
