//! Domain models for the credit-network simulator

pub mod agent;
pub mod capability;
pub mod event;
pub mod instrument;
pub mod state;

// Re-exports
pub use agent::{Agent, AgentKind};
pub use event::{Event, EventLog, Phase};
pub use instrument::{
    Instrument, InstrumentId, InstrumentKind, MaturityBucket, MoneyForm, Payable, Ticket,
};
pub use state::SimulationState;
