//! Agent-kind capability table
//!
//! A single policy table answering two questions for every instrument kind:
//! which agent kinds may hold it as an asset, and which may issue it as a
//! liability. Setup validation and ledger creation both consult this table;
//! nothing else hardcodes per-type rules.

use crate::models::agent::AgentKind;
use crate::models::instrument::InstrumentKind;

use AgentKind::*;

/// One row of the capability table.
struct CapabilityRow {
    kind: InstrumentKind,
    holders: &'static [AgentKind],
    issuers: &'static [AgentKind],
}

const EVERYONE: &[AgentKind] = &[
    CentralAuthority,
    Bank,
    Firm,
    Household,
    Dealer,
    OutsideProvider,
    Treasury,
];

const TRADERS: &[AgentKind] = &[Bank, Firm, Household, Treasury];

/// The capability policy table.
///
/// Reserves are bank-only on the asset side; deposits are bank liabilities;
/// cash and reserves are central-authority liabilities. Tickets carry the
/// original debtor as their (tagged) issuer, so the issuer column mirrors the
/// payable column.
const TABLE: &[CapabilityRow] = &[
    CapabilityRow {
        kind: InstrumentKind::Cash,
        holders: EVERYONE,
        issuers: &[CentralAuthority],
    },
    CapabilityRow {
        kind: InstrumentKind::BankDeposit,
        holders: &[Bank, Firm, Household, Dealer, OutsideProvider, Treasury],
        issuers: &[Bank],
    },
    CapabilityRow {
        kind: InstrumentKind::ReserveDeposit,
        holders: &[Bank],
        issuers: &[CentralAuthority],
    },
    CapabilityRow {
        kind: InstrumentKind::Payable,
        holders: &[Bank, Firm, Household, Dealer, OutsideProvider, Treasury],
        issuers: TRADERS,
    },
    CapabilityRow {
        kind: InstrumentKind::DeliveryObligation,
        holders: TRADERS,
        issuers: &[Firm, Treasury],
    },
    CapabilityRow {
        kind: InstrumentKind::StockLot,
        holders: TRADERS,
        issuers: &[],
    },
    CapabilityRow {
        kind: InstrumentKind::Ticket,
        holders: &[Bank, Firm, Household, Dealer, OutsideProvider, Treasury],
        issuers: TRADERS,
    },
];

fn row(kind: InstrumentKind) -> &'static CapabilityRow {
    TABLE
        .iter()
        .find(|r| r.kind == kind)
        .unwrap_or_else(|| unreachable!("capability table covers every instrument kind"))
}

/// May an agent of `agent_kind` hold `instrument_kind` as an asset?
pub fn may_hold(agent_kind: AgentKind, instrument_kind: InstrumentKind) -> bool {
    row(instrument_kind).holders.contains(&agent_kind)
}

/// May an agent of `agent_kind` issue `instrument_kind` as a liability?
///
/// Stock lots have no liability side; this always returns false for them.
pub fn may_issue(agent_kind: AgentKind, instrument_kind: InstrumentKind) -> bool {
    row(instrument_kind).issuers.contains(&agent_kind)
}
