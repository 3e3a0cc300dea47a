//! Settlement module
//!
//! Maturity settlement with ranked means of payment, cascading-default
//! bookkeeping, and end-of-day interbank netting. The day-phase driver in
//! `orchestrator` sequences these; the functions here only mutate through
//! the ledger's atomic operations.

pub mod maturity;
pub mod netting;

pub use maturity::{
    expel_debtor, pay_in_full, plan_ranked_payment, records_from_receipts, settle_delivery,
    settle_payable, PaymentPlan, PaymentRecord, SettlementOutcome, WriteOff,
};
pub use netting::{net_and_settle, InterbankFlow, NettingOutcome};
