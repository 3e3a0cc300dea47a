//! Interbank netting
//!
//! During a day, bank-deposit payments whose debit and credit legs sit at
//! different banks accumulate as interbank flows. At the end of the day the
//! netting phase computes bilateral *net* positions between bank pairs and
//! settles the net amount (not gross) in reserves, falling back to an
//! overnight payable due the next day when reserves run short.

use crate::ledger::{Ledger, LedgerError, LedgerOp, NewInstrument, OpReceipt};
use crate::models::instrument::{InstrumentId, MoneyForm};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// One cross-bank deposit flow observed during the day.
#[derive(Debug, Clone, PartialEq)]
pub struct InterbankFlow {
    pub from_bank: String,
    pub to_bank: String,
    pub amount: Decimal,
}

/// Outcome of netting one bank pair.
#[derive(Debug, Clone, PartialEq)]
pub struct NettingOutcome {
    pub bank_a: String,
    pub bank_b: String,
    /// Gross flow a -> b.
    pub gross_ab: Decimal,
    /// Gross flow b -> a.
    pub gross_ba: Decimal,
    /// Net amount owed by the net payer (absolute value).
    pub net: Decimal,
    /// Portion of the net settled in reserves.
    pub reserves_paid: Decimal,
    /// Overnight payable created for any uncovered remainder.
    pub overnight_payable: Option<InstrumentId>,
}

/// Net the day's interbank flows bilaterally and settle each pair.
///
/// Pairs are processed in ascending (bank_a, bank_b) order for determinism.
/// Each pair settles through one atomic step: reserve movement plus, when
/// reserves are insufficient, an overnight payable due on `day + 1`.
pub fn net_and_settle(
    ledger: &mut Ledger,
    flows: &[InterbankFlow],
    day: usize,
) -> Result<Vec<NettingOutcome>, LedgerError> {
    // Aggregate gross flows per unordered pair (keyed by sorted ids).
    let mut pairs: BTreeMap<(String, String), (Decimal, Decimal)> = BTreeMap::new();
    for flow in flows {
        if flow.from_bank == flow.to_bank {
            continue;
        }
        let (key, forward) = if flow.from_bank < flow.to_bank {
            ((flow.from_bank.clone(), flow.to_bank.clone()), true)
        } else {
            ((flow.to_bank.clone(), flow.from_bank.clone()), false)
        };
        let entry = pairs.entry(key).or_insert((Decimal::ZERO, Decimal::ZERO));
        if forward {
            entry.0 += flow.amount;
        } else {
            entry.1 += flow.amount;
        }
    }

    let mut outcomes = Vec::new();
    for ((bank_a, bank_b), (gross_ab, gross_ba)) in pairs {
        let net_signed = gross_ab - gross_ba;
        if net_signed == Decimal::ZERO {
            outcomes.push(NettingOutcome {
                bank_a,
                bank_b,
                gross_ab,
                gross_ba,
                net: Decimal::ZERO,
                reserves_paid: Decimal::ZERO,
                overnight_payable: None,
            });
            continue;
        }

        let (payer, payee, net) = if net_signed > Decimal::ZERO {
            (bank_a.clone(), bank_b.clone(), net_signed)
        } else {
            (bank_b.clone(), bank_a.clone(), -net_signed)
        };

        let reserves = ledger.money_balance(&payer, MoneyForm::ReserveDeposit);
        let reserves_paid = net.min(reserves);
        let remainder = net - reserves_paid;

        let mut ops = Vec::new();
        if reserves_paid > Decimal::ZERO {
            ops.push(LedgerOp::MoveValue {
                form: MoneyForm::ReserveDeposit,
                from: payer.clone(),
                to: payee.clone(),
                amount: reserves_paid,
            });
        }
        if remainder > Decimal::ZERO {
            ops.push(LedgerOp::Create(NewInstrument::Payable {
                debtor: payer.clone(),
                creditor: payee.clone(),
                amount: remainder,
                due_day: day + 1,
                original_maturity: 1,
            }));
        }

        let receipts = ledger.run_atomic(ops)?;
        let overnight_payable = receipts.iter().find_map(OpReceipt::created_id);

        outcomes.push(NettingOutcome {
            bank_a,
            bank_b,
            gross_ab,
            gross_ba,
            net,
            reserves_paid,
            overnight_payable,
        });
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::agent::{Agent, AgentKind};
    use rust_decimal_macros::dec;

    fn bank_ledger(reserves_a: Decimal, reserves_b: Decimal) -> Ledger {
        let mut ledger = Ledger::new();
        for (id, kind) in [
            ("CB", AgentKind::CentralAuthority),
            ("BANK_A", AgentKind::Bank),
            ("BANK_B", AgentKind::Bank),
        ] {
            ledger
                .add_agent(Agent::new(id.to_string(), kind, id.to_string()))
                .unwrap();
        }
        for (bank, amount) in [("BANK_A", reserves_a), ("BANK_B", reserves_b)] {
            if amount > Decimal::ZERO {
                ledger
                    .run_atomic(vec![LedgerOp::Mint {
                        form: MoneyForm::ReserveDeposit,
                        bank: None,
                        to: bank.to_string(),
                        amount,
                    }])
                    .unwrap();
            }
        }
        ledger
    }

    fn flow(from: &str, to: &str, amount: Decimal) -> InterbankFlow {
        InterbankFlow {
            from_bank: from.to_string(),
            to_bank: to.to_string(),
            amount,
        }
    }

    #[test]
    fn nets_bilateral_flows_and_settles_in_reserves() {
        let mut ledger = bank_ledger(dec!(1000), dec!(1000));
        let flows = vec![
            flow("BANK_A", "BANK_B", dec!(500)),
            flow("BANK_B", "BANK_A", dec!(300)),
        ];

        let outcomes = net_and_settle(&mut ledger, &flows, 3).unwrap();

        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.gross_ab, dec!(500));
        assert_eq!(outcome.gross_ba, dec!(300));
        assert_eq!(outcome.net, dec!(200));
        assert_eq!(outcome.reserves_paid, dec!(200));
        assert!(outcome.overnight_payable.is_none());

        // Net, not gross: only 200 of reserves moved.
        assert_eq!(
            ledger.money_balance("BANK_A", MoneyForm::ReserveDeposit),
            dec!(800)
        );
        assert_eq!(
            ledger.money_balance("BANK_B", MoneyForm::ReserveDeposit),
            dec!(1200)
        );
    }

    #[test]
    fn reserve_shortfall_creates_overnight_payable() {
        let mut ledger = bank_ledger(dec!(50), dec!(0));
        let flows = vec![flow("BANK_A", "BANK_B", dec!(200))];

        let outcomes = net_and_settle(&mut ledger, &flows, 5).unwrap();
        let outcome = &outcomes[0];
        assert_eq!(outcome.reserves_paid, dec!(50));
        let payable_id = outcome.overnight_payable.expect("overnight payable");

        let record = ledger.instrument(payable_id).unwrap();
        let payable = record.as_payable().unwrap();
        assert_eq!(payable.amount, dec!(150));
        assert_eq!(payable.due_day, 6);
        assert_eq!(payable.original_maturity, 1);
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn exactly_offsetting_flows_need_no_settlement() {
        let mut ledger = bank_ledger(dec!(0), dec!(0));
        let flows = vec![
            flow("BANK_A", "BANK_B", dec!(400)),
            flow("BANK_B", "BANK_A", dec!(400)),
        ];

        let outcomes = net_and_settle(&mut ledger, &flows, 1).unwrap();
        assert_eq!(outcomes[0].net, dec!(0));
        assert!(outcomes[0].overnight_payable.is_none());
    }
}
