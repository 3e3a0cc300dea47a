//! Orchestrator - the day-phase simulation driver
//!
//! See `engine.rs` for the phase cycle and `export.rs` for the end-of-run
//! artifact.

pub mod engine;
pub mod export;

// Re-export main types for convenience
pub use engine::{DayReport, Orchestrator, SimulationError, StopReason};
pub use export::{
    compute_scenario_hash, AgentBalanceSnapshot, InstrumentBalance, RunExport,
};
