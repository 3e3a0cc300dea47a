//! Agent model
//!
//! An agent is an economic actor with asset and liability instrument
//! holdings. The agent itself stores only *references* (instrument ids); the
//! ledger owns the instrument records and keeps both sides in sync.
//!
//! Agents are created at scenario setup and never destroyed. A defaulted
//! agent stays in the ledger but is excluded from future scheduled actions
//! and from dealer-market trading.

use crate::models::instrument::InstrumentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Closed set of agent kinds.
///
/// The kind determines which instrument types the agent may hold as asset or
/// issue as liability; see [`crate::models::capability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    CentralAuthority,
    Bank,
    Firm,
    Household,
    Dealer,
    OutsideProvider,
    Treasury,
}

impl AgentKind {
    /// Market-maker kinds never appear as scenario-driven traders.
    pub fn is_market_maker(&self) -> bool {
        matches!(self, AgentKind::Dealer | AgentKind::OutsideProvider)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentKind::CentralAuthority => "central-authority",
            AgentKind::Bank => "bank",
            AgentKind::Firm => "firm",
            AgentKind::Household => "household",
            AgentKind::Dealer => "dealer",
            AgentKind::OutsideProvider => "outside-liquidity-provider",
            AgentKind::Treasury => "treasury",
        };
        f.write_str(label)
    }
}

/// An economic actor in the credit network.
///
/// # Example
/// ```
/// use creditnet_core::models::agent::{Agent, AgentKind};
///
/// let agent = Agent::new("BANK_A".to_string(), AgentKind::Bank, "Alpha Bank".to_string());
/// assert_eq!(agent.id(), "BANK_A");
/// assert!(!agent.is_defaulted());
/// assert!(agent.assets().is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier (e.g., "BANK_A")
    id: String,

    kind: AgentKind,

    /// Human-readable name used by exporters.
    display_name: String,

    /// Instrument ids held on the asset side.
    ///
    /// Ordered set so every walk over holdings is deterministic.
    assets: BTreeSet<InstrumentId>,

    /// Instrument ids issued on the liability side.
    liabilities: BTreeSet<InstrumentId>,

    /// Set once by default handling; never cleared.
    defaulted: bool,
}

impl Agent {
    pub fn new(id: String, kind: AgentKind, display_name: String) -> Self {
        Self {
            id,
            kind,
            display_name,
            assets: BTreeSet::new(),
            liabilities: BTreeSet::new(),
            defaulted: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn assets(&self) -> &BTreeSet<InstrumentId> {
        &self.assets
    }

    pub fn liabilities(&self) -> &BTreeSet<InstrumentId> {
        &self.liabilities
    }

    pub fn is_defaulted(&self) -> bool {
        self.defaulted
    }

    pub fn holds_asset(&self, id: InstrumentId) -> bool {
        self.assets.contains(&id)
    }

    pub(crate) fn mark_defaulted(&mut self) {
        self.defaulted = true;
    }

    pub(crate) fn clear_defaulted(&mut self) {
        self.defaulted = false;
    }

    pub(crate) fn register_asset(&mut self, id: InstrumentId) {
        self.assets.insert(id);
    }

    pub(crate) fn unregister_asset(&mut self, id: InstrumentId) -> bool {
        self.assets.remove(&id)
    }

    pub(crate) fn register_liability(&mut self, id: InstrumentId) {
        self.liabilities.insert(id);
    }

    pub(crate) fn unregister_liability(&mut self, id: InstrumentId) -> bool {
        self.liabilities.remove(&id)
    }
}
