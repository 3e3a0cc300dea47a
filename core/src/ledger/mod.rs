//! Transactional ledger
//!
//! The ledger owns the canonical state: every agent and every instrument
//! record. All mutation goes through it, so the double-entry invariant is
//! never visible in a broken state outside an atomic step.
//!
//! # Critical Invariants
//!
//! 1. For every instrument except `StockLot`, exactly one agent carries it as
//!    liability and exactly one as asset, and the id appears in both
//!    registries
//! 2. The asset side is resolved through the *effective* holder (a payable's
//!    current holder once transferred), never the original creditor
//! 3. Amounts are non-negative `Decimal`s; equalities hold exactly
//!
//! Composite actions run through [`Ledger::run_atomic`], which undoes all
//! prior mutations of the sequence when a later step fails.

mod atomic;

pub use atomic::{LedgerOp, MoveLeg, NewInstrument, OpReceipt};

use crate::models::agent::{Agent, AgentKind};
use crate::models::capability;
use crate::models::instrument::{
    Instrument, InstrumentId, InstrumentKind, MaturityBucket, MoneyForm, Payable, Ticket,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Invariant-check cadence, declared by the run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckMode {
    /// Check once after scenario setup.
    OnSetup,
    /// Check after setup and at the end of every simulated day.
    EveryDay,
    /// Never check (sweep throughput runs only).
    Disabled,
}

/// Errors raised by ledger operations.
///
/// `InvariantViolation` indicates a programming defect, never a valid
/// simulated outcome; callers abort the run on it.
#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown instrument: {0}")]
    UnknownInstrument(InstrumentId),

    #[error("insufficient {form:?} funds for {agent}: required {required}, available {available}")]
    InsufficientFunds {
        agent: String,
        form: MoneyForm,
        required: Decimal,
        available: Decimal,
    },

    #[error("agent kind {agent_kind} may not {role} {instrument_kind:?}")]
    CapabilityViolation {
        agent_kind: AgentKind,
        instrument_kind: InstrumentKind,
        /// "hold" or "issue"
        role: &'static str,
    },

    #[error("ticket {0} issuer tag is already set")]
    TicketIssuerFixed(InstrumentId),

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
}

/// The canonical state store.
///
/// Uses ordered maps throughout: every iteration over agents or instruments
/// is in ascending key order, which the settlement engine relies on for
/// deterministic processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    agents: BTreeMap<String, Agent>,
    instruments: BTreeMap<InstrumentId, Instrument>,
    next_id: u64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            agents: BTreeMap::new(),
            instruments: BTreeMap::new(),
            next_id: 1,
        }
    }

    // ========================================================================
    // Agents
    // ========================================================================

    /// Register a new agent. Fails if the id is taken.
    pub fn add_agent(&mut self, agent: Agent) -> Result<(), LedgerError> {
        if self.agents.contains_key(agent.id()) {
            return Err(LedgerError::InvariantViolation(format!(
                "duplicate agent id {}",
                agent.id()
            )));
        }
        self.agents.insert(agent.id().to_string(), agent);
        Ok(())
    }

    pub fn agent(&self, id: &str) -> Result<&Agent, LedgerError> {
        self.agents
            .get(id)
            .ok_or_else(|| LedgerError::UnknownAgent(id.to_string()))
    }

    pub fn has_agent(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// All agents in ascending id order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    /// The unique central authority, required as the issuer of cash and
    /// reserves.
    pub fn central_authority(&self) -> Result<&Agent, LedgerError> {
        let mut found = None;
        for agent in self.agents.values() {
            if agent.kind() == AgentKind::CentralAuthority {
                if found.is_some() {
                    return Err(LedgerError::InvariantViolation(
                        "more than one central authority".to_string(),
                    ));
                }
                found = Some(agent);
            }
        }
        found.ok_or_else(|| LedgerError::UnknownAgent("central-authority".to_string()))
    }

    pub(crate) fn agent_mut(&mut self, id: &str) -> Result<&mut Agent, LedgerError> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| LedgerError::UnknownAgent(id.to_string()))
    }

    // ========================================================================
    // Instruments: lookup
    // ========================================================================

    pub fn instrument(&self, id: InstrumentId) -> Result<&Instrument, LedgerError> {
        self.instruments
            .get(&id)
            .ok_or(LedgerError::UnknownInstrument(id))
    }

    /// All instruments in ascending id order.
    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.values()
    }

    pub fn num_instruments(&self) -> usize {
        self.instruments.len()
    }

    pub(crate) fn allocate_id(&mut self) -> InstrumentId {
        let id = InstrumentId(self.next_id);
        self.next_id += 1;
        id
    }

    // ========================================================================
    // Money queries
    // ========================================================================

    /// Total balance an agent holds in one money form.
    pub fn money_balance(&self, agent_id: &str, form: MoneyForm) -> Decimal {
        self.holdings_of(agent_id)
            .filter(|i| i.money_form() == Some(form))
            .map(|i| i.amount())
            .sum()
    }

    /// Total money (all forms) an agent holds.
    pub fn total_money(&self, agent_id: &str) -> Decimal {
        MoneyForm::RANKED
            .iter()
            .map(|form| self.money_balance(agent_id, *form))
            .sum()
    }

    /// System-wide money stock across all agents and forms.
    pub fn money_stock(&self) -> Decimal {
        self.instruments
            .values()
            .filter(|i| i.kind().is_money())
            .map(|i| i.amount())
            .sum()
    }

    /// Total stock units an agent holds across its lots.
    pub fn stock_units(&self, agent_id: &str) -> Decimal {
        self.holdings_of(agent_id)
            .filter_map(|i| match i {
                Instrument::StockLot(s) => Some(s.units),
                _ => None,
            })
            .sum()
    }

    /// An agent's asset-side instruments, ascending id.
    pub fn holdings_of<'a>(&'a self, agent_id: &str) -> impl Iterator<Item = &'a Instrument> {
        let ids: Vec<InstrumentId> = self
            .agents
            .get(agent_id)
            .map(|a| a.assets().iter().copied().collect())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.instruments.get(&id))
    }

    /// An agent's liability-side instruments, ascending id.
    pub fn liabilities_of<'a>(&'a self, agent_id: &str) -> impl Iterator<Item = &'a Instrument> {
        let ids: Vec<InstrumentId> = self
            .agents
            .get(agent_id)
            .map(|a| a.liabilities().iter().copied().collect())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.instruments.get(&id))
    }

    // ========================================================================
    // Obligation queries
    // ========================================================================

    /// Payables due exactly on `day`, ordered by (due day, id).
    pub fn payables_due(&self, day: usize) -> Vec<InstrumentId> {
        self.instruments
            .values()
            .filter_map(Instrument::as_payable)
            .filter(|p| p.due_day == day)
            .map(|p| p.id)
            .collect()
    }

    /// Delivery obligations due exactly on `day`, ascending id.
    pub fn deliveries_due(&self, day: usize) -> Vec<InstrumentId> {
        self.instruments
            .values()
            .filter_map(|i| match i {
                Instrument::DeliveryObligation(d) if d.due_day == day => Some(d.id),
                _ => None,
            })
            .collect()
    }

    /// Not-yet-due payables whose effective creditor is `agent_id`, ordered
    /// soonest-maturing first (then ascending id).
    pub fn receivables_of(&self, agent_id: &str, after_day: usize) -> Vec<&Payable> {
        let mut out: Vec<&Payable> = self
            .instruments
            .values()
            .filter_map(Instrument::as_payable)
            .filter(|p| p.effective_creditor() == agent_id && p.due_day > after_day)
            .collect();
        out.sort_by_key(|p| (p.due_day, p.id));
        out
    }

    /// Sum of payable dues owed *by* an agent up to and including `horizon_day`.
    pub fn dues_owed_by(&self, agent_id: &str, horizon_day: usize) -> Decimal {
        self.instruments
            .values()
            .filter_map(Instrument::as_payable)
            .filter(|p| p.debtor == agent_id && p.due_day <= horizon_day)
            .map(|p| p.amount)
            .sum()
    }

    /// Tickets owned by an agent in a bucket, ordered by serial.
    pub fn tickets_of(&self, owner: &str, bucket: MaturityBucket) -> Vec<&Ticket> {
        let mut out: Vec<&Ticket> = self
            .instruments
            .values()
            .filter_map(Instrument::as_ticket)
            .filter(|t| t.owner == owner && t.bucket == bucket)
            .collect();
        out.sort_by_key(|t| t.serial);
        out
    }

    /// The ticket wrapping a payable, if the claim has been sold into the
    /// secondary market.
    pub fn ticket_for_payable(&self, payable_id: InstrumentId) -> Option<&Ticket> {
        self.instruments
            .values()
            .filter_map(Instrument::as_ticket)
            .find(|t| t.payable_id == payable_id)
    }

    /// All live tickets, ordered by serial.
    pub fn all_tickets(&self) -> Vec<&Ticket> {
        let mut out: Vec<&Ticket> = self
            .instruments
            .values()
            .filter_map(Instrument::as_ticket)
            .collect();
        out.sort_by_key(|t| t.serial);
        out
    }

    // ========================================================================
    // Default bookkeeping
    // ========================================================================

    pub(crate) fn mark_defaulted(&mut self, agent_id: &str) -> Result<(), LedgerError> {
        self.agent_mut(agent_id)?.mark_defaulted();
        Ok(())
    }

    // ========================================================================
    // Invariant checker
    // ========================================================================

    /// Walk every instrument and assert double-entry registration.
    ///
    /// Read-only: running it twice in a row with no mutation in between
    /// yields identical results. A violation is a fatal programming defect,
    /// not a recoverable simulation outcome.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        for (id, instrument) in &self.instruments {
            if instrument.id() != *id {
                return Err(LedgerError::InvariantViolation(format!(
                    "instrument {} registered under key {}",
                    instrument.id(),
                    id
                )));
            }

            if instrument.amount() < Decimal::ZERO {
                return Err(LedgerError::InvariantViolation(format!(
                    "instrument {} has negative amount {}",
                    id,
                    instrument.amount()
                )));
            }

            // Asset side resolves through the effective holder.
            let holder = instrument.holder();
            let holder_agent = self.agents.get(holder).ok_or_else(|| {
                LedgerError::InvariantViolation(format!(
                    "instrument {} held by unknown agent {}",
                    id, holder
                ))
            })?;
            if !holder_agent.holds_asset(*id) {
                return Err(LedgerError::InvariantViolation(format!(
                    "instrument {} missing from asset registry of effective holder {}",
                    id, holder
                )));
            }

            // Liability side (stock lots have none; unsold tickets carry no tag yet).
            if let Some(issuer) = instrument.issuer() {
                let issuer_agent = self.agents.get(issuer).ok_or_else(|| {
                    LedgerError::InvariantViolation(format!(
                        "instrument {} issued by unknown agent {}",
                        id, issuer
                    ))
                })?;
                if !issuer_agent.liabilities().contains(id) {
                    return Err(LedgerError::InvariantViolation(format!(
                        "instrument {} missing from liability registry of issuer {}",
                        id, issuer
                    )));
                }
            }
        }

        // Reverse direction: no dangling references in any registry.
        for agent in self.agents.values() {
            for id in agent.assets() {
                let instrument = self.instruments.get(id).ok_or_else(|| {
                    LedgerError::InvariantViolation(format!(
                        "agent {} asset registry references missing instrument {}",
                        agent.id(),
                        id
                    ))
                })?;
                if instrument.holder() != agent.id() {
                    return Err(LedgerError::InvariantViolation(format!(
                        "agent {} claims asset {} effectively held by {}",
                        agent.id(),
                        id,
                        instrument.holder()
                    )));
                }
            }
            for id in agent.liabilities() {
                let instrument = self.instruments.get(id).ok_or_else(|| {
                    LedgerError::InvariantViolation(format!(
                        "agent {} liability registry references missing instrument {}",
                        agent.id(),
                        id
                    ))
                })?;
                if instrument.issuer() != Some(agent.id()) {
                    return Err(LedgerError::InvariantViolation(format!(
                        "agent {} claims liability {} issued by {:?}",
                        agent.id(),
                        id,
                        instrument.issuer()
                    )));
                }
            }
        }

        Ok(())
    }

    // ========================================================================
    // Capability enforcement helpers
    // ========================================================================

    pub(crate) fn check_may_hold(
        &self,
        agent_id: &str,
        kind: InstrumentKind,
    ) -> Result<(), LedgerError> {
        let agent = self.agent(agent_id)?;
        if !capability::may_hold(agent.kind(), kind) {
            return Err(LedgerError::CapabilityViolation {
                agent_kind: agent.kind(),
                instrument_kind: kind,
                role: "hold",
            });
        }
        Ok(())
    }

    pub(crate) fn check_may_issue(
        &self,
        agent_id: &str,
        kind: InstrumentKind,
    ) -> Result<(), LedgerError> {
        let agent = self.agent(agent_id)?;
        if !capability::may_issue(agent.kind(), kind) {
            return Err(LedgerError::CapabilityViolation {
                agent_kind: agent.kind(),
                instrument_kind: kind,
                role: "issue",
            });
        }
        Ok(())
    }
}
