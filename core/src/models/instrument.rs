//! Instrument model
//!
//! A financial instrument is a typed claim between agents. Every instrument
//! except `StockLot` is double-entry: exactly one agent carries it as a
//! liability (the issuer) and exactly one agent carries it as an asset (the
//! holder). The ledger enforces that the instrument id appears in both
//! agents' registries at all times.
//!
//! # Variants
//!
//! - **Cash**: central-authority liability, held by anyone
//! - **BankDeposit**: commercial-bank liability, the default means of payment
//! - **ReserveDeposit**: central-authority liability held by banks only
//! - **Payable**: a dated credit obligation with a mutable current holder
//! - **DeliveryObligation**: a dated obligation to deliver stock units
//! - **StockLot**: a holder-only record of physical stock (no issuer)
//! - **Ticket**: a secondary-market claim unit traded through the dealer market
//!
//! # Critical Invariants
//!
//! 1. All amounts are `rust_decimal::Decimal` - equalities must hold exactly
//! 2. A payable's `original_creditor` never changes; only `current_holder` does
//! 3. A ticket's issuer tag is set at most once (single-issuer constraint)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger-unique instrument identifier.
///
/// Allocated monotonically by the ledger. The numeric ordering is load-bearing:
/// maturity settlement and ticket processing iterate in ascending id order to
/// stay deterministic across runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InstrumentId(pub u64);

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ins_{:06}", self.0)
    }
}

/// Discriminant of the instrument variants.
///
/// Used by the capability table and by per-type conservation sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Cash,
    BankDeposit,
    ReserveDeposit,
    Payable,
    DeliveryObligation,
    StockLot,
    Ticket,
}

impl InstrumentKind {
    /// Instrument kinds that count toward the money stock.
    pub const MONEY_KINDS: [InstrumentKind; 3] = [
        InstrumentKind::BankDeposit,
        InstrumentKind::Cash,
        InstrumentKind::ReserveDeposit,
    ];

    pub fn is_money(&self) -> bool {
        Self::MONEY_KINDS.contains(self)
    }
}

/// The three money forms, in means-of-payment priority order.
///
/// Maturity settlement drains balances in exactly this order: bank deposits
/// first, then cash, then (between banks only) reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoneyForm {
    BankDeposit,
    Cash,
    ReserveDeposit,
}

impl MoneyForm {
    /// Ranked order used by the settlement engine.
    pub const RANKED: [MoneyForm; 3] = [
        MoneyForm::BankDeposit,
        MoneyForm::Cash,
        MoneyForm::ReserveDeposit,
    ];

    pub fn instrument_kind(&self) -> InstrumentKind {
        match self {
            MoneyForm::BankDeposit => InstrumentKind::BankDeposit,
            MoneyForm::Cash => InstrumentKind::Cash,
            MoneyForm::ReserveDeposit => InstrumentKind::ReserveDeposit,
        }
    }
}

/// Maturity-range partition of the secondary market.
///
/// Each bucket has one dealer and one outside liquidity provider. Boundaries
/// (in days to maturity) come from the scenario's market configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MaturityBucket {
    Short,
    Mid,
    Long,
}

impl MaturityBucket {
    /// Buckets in buy-side preference order (Short first).
    pub const ALL: [MaturityBucket; 3] = [
        MaturityBucket::Short,
        MaturityBucket::Mid,
        MaturityBucket::Long,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            MaturityBucket::Short => "short",
            MaturityBucket::Mid => "mid",
            MaturityBucket::Long => "long",
        }
    }
}

impl fmt::Display for MaturityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A divisible money position (Cash, BankDeposit or ReserveDeposit).
///
/// Each agent carries at most one position per (form, issuer) pair; payments
/// adjust amounts rather than moving whole instruments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyPosition {
    pub id: InstrumentId,
    /// Issuing agent: the central authority for cash/reserves, a bank for deposits.
    pub issuer: String,
    pub holder: String,
    pub amount: Decimal,
}

/// A credit obligation: `debtor` owes `amount` to the effective creditor,
/// due at `due_day`.
///
/// The two-field creditor design is deliberate: `original_creditor` is fixed
/// provenance, `current_holder` is mutable ownership that diverges once the
/// claim is sold in the secondary market. Every derived lookup (settlement
/// recipient, invariant check, removal) must go through
/// [`Payable::effective_creditor`], never the original field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payable {
    pub id: InstrumentId,
    /// Debtor (liability side).
    pub debtor: String,
    /// Creditor at creation time. Never mutated.
    pub original_creditor: String,
    /// Current asset-side holder, set once the claim has been transferred.
    pub current_holder: Option<String>,
    pub amount: Decimal,
    /// Day the obligation falls due.
    pub due_day: usize,
    /// Days from issue to due day, preserved for rollover semantics.
    pub original_maturity: usize,
}

impl Payable {
    /// The current rightful recipient of this claim's payment.
    pub fn effective_creditor(&self) -> &str {
        self.current_holder
            .as_deref()
            .unwrap_or(&self.original_creditor)
    }
}

/// A dated obligation to deliver stock units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryObligation {
    pub id: InstrumentId,
    pub debtor: String,
    pub creditor: String,
    pub units: Decimal,
    pub due_day: usize,
}

/// Holder-only record of physical stock. Has no issuer and no liability side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLot {
    pub id: InstrumentId,
    pub holder: String,
    pub units: Decimal,
}

/// A secondary-market claim unit wrapping a sold payable.
///
/// Created on the first purchase of a receivable; subsequent trades transfer
/// ownership but never change the issuer tag (a ticket must never silently
/// aggregate claims on different original debtors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: InstrumentId,
    /// Current owner (trader, dealer or outside provider).
    pub owner: String,
    /// Original debtor of the wrapped claim. Set on first purchase, then fixed.
    pub issuer_tag: Option<String>,
    pub face: Decimal,
    pub due_day: usize,
    pub bucket: MaturityBucket,
    /// Tie-break for deterministic processing order within a bucket.
    pub serial: u64,
    /// The payable this ticket wraps.
    pub payable_id: InstrumentId,
}

/// Tagged-variant instrument type.
///
/// Per-variant behavior (settlement eligibility, holdability) lives in the
/// capability table, not in dispatch on this enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instrument {
    Cash(MoneyPosition),
    BankDeposit(MoneyPosition),
    ReserveDeposit(MoneyPosition),
    Payable(Payable),
    DeliveryObligation(DeliveryObligation),
    StockLot(StockLot),
    Ticket(Ticket),
}

impl Instrument {
    pub fn id(&self) -> InstrumentId {
        match self {
            Instrument::Cash(m) | Instrument::BankDeposit(m) | Instrument::ReserveDeposit(m) => {
                m.id
            }
            Instrument::Payable(p) => p.id,
            Instrument::DeliveryObligation(d) => d.id,
            Instrument::StockLot(s) => s.id,
            Instrument::Ticket(t) => t.id,
        }
    }

    pub fn kind(&self) -> InstrumentKind {
        match self {
            Instrument::Cash(_) => InstrumentKind::Cash,
            Instrument::BankDeposit(_) => InstrumentKind::BankDeposit,
            Instrument::ReserveDeposit(_) => InstrumentKind::ReserveDeposit,
            Instrument::Payable(_) => InstrumentKind::Payable,
            Instrument::DeliveryObligation(_) => InstrumentKind::DeliveryObligation,
            Instrument::StockLot(_) => InstrumentKind::StockLot,
            Instrument::Ticket(_) => InstrumentKind::Ticket,
        }
    }

    /// The *effective* asset-side holder.
    ///
    /// For payables this resolves through the current holder, never the
    /// original creditor. All registry bookkeeping uses this accessor.
    pub fn holder(&self) -> &str {
        match self {
            Instrument::Cash(m) | Instrument::BankDeposit(m) | Instrument::ReserveDeposit(m) => {
                &m.holder
            }
            Instrument::Payable(p) => p.effective_creditor(),
            Instrument::DeliveryObligation(d) => &d.creditor,
            Instrument::StockLot(s) => &s.holder,
            Instrument::Ticket(t) => &t.owner,
        }
    }

    /// Liability-side agent. `None` only for stock lots.
    pub fn issuer(&self) -> Option<&str> {
        match self {
            Instrument::Cash(m) | Instrument::BankDeposit(m) | Instrument::ReserveDeposit(m) => {
                Some(&m.issuer)
            }
            Instrument::Payable(p) => Some(&p.debtor),
            Instrument::DeliveryObligation(d) => Some(&d.debtor),
            Instrument::StockLot(_) => None,
            Instrument::Ticket(t) => t.issuer_tag.as_deref(),
        }
    }

    /// Face value: money amount, obligation amount, units or ticket face.
    pub fn amount(&self) -> Decimal {
        match self {
            Instrument::Cash(m) | Instrument::BankDeposit(m) | Instrument::ReserveDeposit(m) => {
                m.amount
            }
            Instrument::Payable(p) => p.amount,
            Instrument::DeliveryObligation(d) => d.units,
            Instrument::StockLot(s) => s.units,
            Instrument::Ticket(t) => t.face,
        }
    }

    /// Move the asset-side reference to a new holder.
    ///
    /// For payables this records the new holder in `current_holder` and leaves
    /// `original_creditor` untouched. Registry updates are the ledger's job.
    pub(crate) fn set_holder(&mut self, to: &str) {
        match self {
            Instrument::Cash(m) | Instrument::BankDeposit(m) | Instrument::ReserveDeposit(m) => {
                m.holder = to.to_string();
            }
            Instrument::Payable(p) => p.current_holder = Some(to.to_string()),
            Instrument::DeliveryObligation(d) => d.creditor = to.to_string(),
            Instrument::StockLot(s) => s.holder = to.to_string(),
            Instrument::Ticket(t) => t.owner = to.to_string(),
        }
    }

    pub fn as_payable(&self) -> Option<&Payable> {
        match self {
            Instrument::Payable(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_ticket(&self) -> Option<&Ticket> {
        match self {
            Instrument::Ticket(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_money(&self) -> Option<&MoneyPosition> {
        match self {
            Instrument::Cash(m) | Instrument::BankDeposit(m) | Instrument::ReserveDeposit(m) => {
                Some(m)
            }
            _ => None,
        }
    }

    /// The money form of this instrument, if it is money.
    pub fn money_form(&self) -> Option<MoneyForm> {
        match self {
            Instrument::Cash(_) => Some(MoneyForm::Cash),
            Instrument::BankDeposit(_) => Some(MoneyForm::BankDeposit),
            Instrument::ReserveDeposit(_) => Some(MoneyForm::ReserveDeposit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_payable() -> Payable {
        Payable {
            id: InstrumentId(7),
            debtor: "FIRM_A".to_string(),
            original_creditor: "FIRM_B".to_string(),
            current_holder: None,
            amount: dec!(300),
            due_day: 3,
            original_maturity: 3,
        }
    }

    #[test]
    fn effective_creditor_defaults_to_original() {
        let p = sample_payable();
        assert_eq!(p.effective_creditor(), "FIRM_B");
    }

    #[test]
    fn effective_creditor_follows_current_holder() {
        let mut p = sample_payable();
        p.current_holder = Some("DEALER_SHORT".to_string());
        assert_eq!(p.effective_creditor(), "DEALER_SHORT");
        assert_eq!(p.original_creditor, "FIRM_B");
    }

    #[test]
    fn set_holder_on_payable_preserves_original_creditor() {
        let mut ins = Instrument::Payable(sample_payable());
        ins.set_holder("OLP_SHORT");
        assert_eq!(ins.holder(), "OLP_SHORT");
        let p = ins.as_payable().unwrap();
        assert_eq!(p.original_creditor, "FIRM_B");
        assert_eq!(p.current_holder.as_deref(), Some("OLP_SHORT"));
    }

    #[test]
    fn stock_lot_has_no_issuer() {
        let ins = Instrument::StockLot(StockLot {
            id: InstrumentId(1),
            holder: "FIRM_A".to_string(),
            units: dec!(10),
        });
        assert!(ins.issuer().is_none());
    }

    #[test]
    fn ranked_money_forms_order() {
        assert_eq!(
            MoneyForm::RANKED,
            [
                MoneyForm::BankDeposit,
                MoneyForm::Cash,
                MoneyForm::ReserveDeposit
            ]
        );
    }
}
