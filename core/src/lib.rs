//! Credit-Network Simulator Core
//!
//! Deterministic multi-agent monetary/credit network simulator for research
//! into payment-system liquidity, default cascades, and secondary-market
//! intervention.
//!
//! # Architecture
//!
//! - **models**: Domain types (Agent, Instrument, Event, SimulationState)
//! - **ledger**: Canonical state, double-entry invariant, atomic mutations
//! - **scenario**: Scenario description and pre-run validation
//! - **settlement**: Maturity settlement and interbank netting
//! - **market**: Bucketed dealer market (secondary-market liquidity)
//! - **metrics**: Settlement-quality measures over replayed events
//! - **orchestrator**: Day-phase state machine and run export
//!
//! # Critical Invariants
//!
//! 1. All money values are exact `rust_decimal::Decimal`s, never floats
//! 2. Every instrument (except stock lots) is registered on both the
//!    effective holder's and the issuer's side at all times
//! 3. Processing orders are fixed and deterministic: action list order,
//!    ascending (due day, id) for maturities, ascending serial for tickets

// Module declarations
pub mod ledger;
pub mod market;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod scenario;
pub mod settlement;

// Re-exports for convenience
pub use ledger::{CheckMode, Ledger, LedgerError, LedgerOp, NewInstrument};
pub use market::DealerMarket;
pub use metrics::{compute_day_metrics, DayMetrics};
pub use models::{
    agent::{Agent, AgentKind},
    event::{Event, EventLog, Phase},
    instrument::{Instrument, InstrumentId, InstrumentKind, MaturityBucket, MoneyForm},
    state::SimulationState,
};
pub use orchestrator::{Orchestrator, RunExport, SimulationError, StopReason};
pub use scenario::{
    ActionOp, AgentSpec, ConfigurationError, DefaultHandling, MarketConfig, RunConfig, Scenario,
    ScheduledAction, StopMode,
};
pub use settlement::{SettlementOutcome, WriteOff};
