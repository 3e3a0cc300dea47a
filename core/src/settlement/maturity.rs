//! Maturity settlement
//!
//! Settles obligations that have reached their due day, paying with the
//! ranked means of payment: bank deposits first, then cash, then reserves
//! (reserves usable only between banks).
//!
//! Per obligation: attempt to pay the full amount from the first form with
//! sufficient balance on its own; if none suffices, drain available balance
//! across forms in priority order until the amount is covered or funds are
//! exhausted. A shortfall becomes a [`SettlementOutcome`] value - default is
//! a first-class transition, not an exception path.
//!
//! Payment and obligation removal are planned as one op sequence and applied
//! through a single `run_atomic` call, so a failure can never leave a paid
//! but undischarged obligation.

use crate::ledger::{Ledger, LedgerError, LedgerOp, MoveLeg, OpReceipt};
use crate::models::agent::AgentKind;
use crate::models::instrument::{InstrumentId, MoneyForm};
use rust_decimal::Decimal;

/// Result value of one settlement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// Paid in full; the obligation was removed.
    Settled,
    /// Funds ran out after a committed partial payment (expel-agent mode).
    /// The obligation record remains for default write-off.
    PartiallySettled { paid: Decimal, shortfall: Decimal },
    /// Nothing could be paid (or partial commitment was not allowed).
    Defaulted { shortfall: Decimal },
}

impl SettlementOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementOutcome::Settled)
    }

    pub fn shortfall(&self) -> Decimal {
        match self {
            SettlementOutcome::Settled => Decimal::ZERO,
            SettlementOutcome::PartiallySettled { shortfall, .. }
            | SettlementOutcome::Defaulted { shortfall } => *shortfall,
        }
    }
}

/// One executed money movement, per form drained.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub form: MoneyForm,
    pub amount: Decimal,
    /// Issuer-level legs; cross-bank deposit legs feed interbank netting.
    pub legs: Vec<MoveLeg>,
}

/// A planned ranked payment: how much can move, and the ops that move it.
#[derive(Debug, Clone)]
pub struct PaymentPlan {
    pub paid: Decimal,
    pub ops: Vec<LedgerOp>,
}

/// Money forms usable between this debtor/creditor pair, in priority order.
fn usable_forms(ledger: &Ledger, debtor: &str, creditor: &str) -> Vec<MoneyForm> {
    let both_banks = matches!(
        (
            ledger.agent(debtor).map(|a| a.kind()),
            ledger.agent(creditor).map(|a| a.kind()),
        ),
        (Ok(AgentKind::Bank), Ok(AgentKind::Bank))
    );

    MoneyForm::RANKED
        .iter()
        .copied()
        .filter(|form| *form != MoneyForm::ReserveDeposit || both_banks)
        .collect()
}

/// Plan a ranked-means payment of `amount` from `debtor` to `creditor`.
///
/// With `commit_partial` false a shortfall plans nothing (used by fail-fast
/// settlement and scheduled `Pay` actions); with it true the plan drains
/// every available balance (expel-agent partial settlement).
pub fn plan_ranked_payment(
    ledger: &Ledger,
    debtor: &str,
    creditor: &str,
    amount: Decimal,
    commit_partial: bool,
) -> PaymentPlan {
    let forms = usable_forms(ledger, debtor, creditor);
    let balances: Vec<(MoneyForm, Decimal)> = forms
        .iter()
        .map(|form| (*form, ledger.money_balance(debtor, *form)))
        .collect();
    let total: Decimal = balances.iter().map(|(_, balance)| *balance).sum();

    let mut ops = Vec::new();
    let mut paid = Decimal::ZERO;

    // First method with sufficient balance pays the whole amount alone.
    if let Some((form, _)) = balances.iter().find(|(_, balance)| *balance >= amount) {
        ops.push(LedgerOp::MoveValue {
            form: *form,
            from: debtor.to_string(),
            to: creditor.to_string(),
            amount,
        });
        return PaymentPlan { paid: amount, ops };
    }

    if total < amount && !commit_partial {
        return PaymentPlan { paid, ops };
    }

    // Drain across forms in priority order.
    let target = amount.min(total);
    let mut remaining = target;
    for (form, balance) in balances {
        if remaining == Decimal::ZERO {
            break;
        }
        let take = remaining.min(balance);
        if take > Decimal::ZERO {
            ops.push(LedgerOp::MoveValue {
                form,
                from: debtor.to_string(),
                to: creditor.to_string(),
                amount: take,
            });
            paid += take;
            remaining -= take;
        }
    }

    PaymentPlan { paid, ops }
}

/// Convert move receipts back into payment records for event emission.
pub fn records_from_receipts(receipts: &[OpReceipt]) -> Vec<PaymentRecord> {
    receipts
        .iter()
        .filter_map(|receipt| match receipt {
            OpReceipt::Moved { form, legs } => Some(PaymentRecord {
                form: *form,
                amount: legs.iter().map(|leg| leg.amount).sum(),
                legs: legs.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Pay `amount` in full or fail without mutation.
pub fn pay_in_full(
    ledger: &mut Ledger,
    debtor: &str,
    creditor: &str,
    amount: Decimal,
) -> Result<Vec<PaymentRecord>, LedgerError> {
    let plan = plan_ranked_payment(ledger, debtor, creditor, amount, false);
    if plan.paid < amount {
        return Err(LedgerError::InsufficientFunds {
            agent: debtor.to_string(),
            form: MoneyForm::BankDeposit,
            required: amount,
            available: plan.paid,
        });
    }
    let receipts = ledger.run_atomic(plan.ops)?;
    Ok(records_from_receipts(&receipts))
}

/// Settle one matured payable.
///
/// The recipient is the payable's *effective* creditor. On full payment the
/// obligation is removed in the same atomic step. A partial payment (only
/// when `commit_partial`) leaves the obligation in place for the caller's
/// default bookkeeping.
pub fn settle_payable(
    ledger: &mut Ledger,
    id: InstrumentId,
    commit_partial: bool,
) -> Result<(SettlementOutcome, Vec<PaymentRecord>), LedgerError> {
    let payable = ledger
        .instrument(id)?
        .as_payable()
        .ok_or_else(|| LedgerError::InvariantViolation(format!("{} is not a payable", id)))?
        .clone();

    let debtor = payable.debtor.clone();
    let creditor = payable.effective_creditor().to_string();

    let mut plan = plan_ranked_payment(ledger, &debtor, &creditor, payable.amount, commit_partial);
    let paid = plan.paid;

    let outcome = if paid == payable.amount {
        plan.ops.push(LedgerOp::Remove { id });
        SettlementOutcome::Settled
    } else if paid > Decimal::ZERO {
        SettlementOutcome::PartiallySettled {
            paid,
            shortfall: payable.amount - paid,
        }
    } else {
        SettlementOutcome::Defaulted {
            shortfall: payable.amount,
        }
    };

    let receipts = ledger.run_atomic(plan.ops)?;
    Ok((outcome, records_from_receipts(&receipts)))
}

/// Settle one matured delivery obligation by moving stock units.
pub fn settle_delivery(
    ledger: &mut Ledger,
    id: InstrumentId,
    commit_partial: bool,
) -> Result<(SettlementOutcome, Decimal), LedgerError> {
    let delivery = match ledger.instrument(id)? {
        crate::models::instrument::Instrument::DeliveryObligation(d) => d.clone(),
        _ => {
            return Err(LedgerError::InvariantViolation(format!(
                "{} is not a delivery obligation",
                id
            )))
        }
    };

    let available = ledger.stock_units(&delivery.debtor);
    let deliverable = delivery.units.min(available);

    let mut ops = Vec::new();
    if deliverable > Decimal::ZERO && (deliverable == delivery.units || commit_partial) {
        ops.push(LedgerOp::MoveUnits {
            from: delivery.debtor.clone(),
            to: delivery.creditor.clone(),
            units: deliverable,
        });
    }

    let outcome = if deliverable == delivery.units {
        ops.push(LedgerOp::Remove { id });
        SettlementOutcome::Settled
    } else if deliverable > Decimal::ZERO && commit_partial {
        SettlementOutcome::PartiallySettled {
            paid: deliverable,
            shortfall: delivery.units - deliverable,
        }
    } else {
        SettlementOutcome::Defaulted {
            shortfall: delivery.units,
        }
    };

    let delivered = match &outcome {
        SettlementOutcome::Settled => delivery.units,
        SettlementOutcome::PartiallySettled { paid, .. } => *paid,
        SettlementOutcome::Defaulted { .. } => Decimal::ZERO,
    };

    ledger.run_atomic(ops)?;
    Ok((outcome, delivered))
}

/// Write-off entry produced by expelling a defaulted debtor.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOff {
    pub id: InstrumentId,
    pub kind: crate::models::instrument::InstrumentKind,
    pub amount: Decimal,
}

/// Expel a defaulted debtor: flag it and write off *all* of its remaining
/// liabilities (not just the defaulted obligation), without further payment.
///
/// Returns the write-offs in ascending instrument id order for logging.
pub fn expel_debtor(ledger: &mut Ledger, debtor: &str) -> Result<Vec<WriteOff>, LedgerError> {
    let write_offs: Vec<WriteOff> = ledger
        .liabilities_of(debtor)
        .map(|instrument| WriteOff {
            id: instrument.id(),
            kind: instrument.kind(),
            amount: instrument.amount(),
        })
        .collect();

    let mut ops = vec![LedgerOp::MarkDefaulted {
        agent: debtor.to_string(),
    }];
    ops.extend(
        write_offs
            .iter()
            .map(|write_off| LedgerOp::Remove { id: write_off.id }),
    );
    ledger.run_atomic(ops)?;

    Ok(write_offs)
}
