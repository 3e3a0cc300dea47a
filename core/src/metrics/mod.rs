//! Settlement-quality metrics
//!
//! A pure function over one day's replayed events. Nothing here mutates
//! state; given the same event log the same numbers come out, which is what
//! makes metric regressions attributable to engine changes alone.
//!
//! Monetary obligations (payables) drive the ratios; delivery obligations
//! appear in the event log but not in the liquidity measures.

use crate::models::event::{Event, Phase};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settlement-quality measures for one simulated day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayMetrics {
    pub day: usize,

    /// Sum of payable amounts falling due today.
    pub total_dues: Decimal,

    /// Sum over debtors of max(0, net outflow of dues).
    pub min_net_liquidity: Decimal,

    /// Money stock at the start of the day.
    pub money_stock_start: Decimal,

    /// Shortfall of the money stock against the minimum net liquidity,
    /// floored at zero.
    pub liquidity_gap: Decimal,

    /// 1 - min_net_liquidity / total_dues; undefined without dues.
    pub netting_potential: Option<Decimal>,

    /// Gross amount settled during the maturity phase.
    pub gross_settled: Decimal,

    /// Peak of summed positive cumulative net outflows during the realized
    /// settlement replay.
    pub peak_liquidity_usage: Decimal,

    /// gross_settled / peak_liquidity_usage; defined only when the peak is
    /// positive.
    pub intraday_velocity: Option<Decimal>,

    pub due_count: usize,
    pub settled_on_time: usize,

    /// Fraction of today's dues settled in full today.
    pub on_time_ratio: Option<Decimal>,

    /// Exactly 1 - on_time_ratio.
    pub default_ratio: Option<Decimal>,

    /// Herfindahl index over positive net creditor balances of today's dues.
    pub creditor_concentration: Option<Decimal>,
}

/// Compute the day's metrics from the full event log.
///
/// Deterministic given the log; events from other days are ignored.
pub fn compute_day_metrics(day: usize, events: &[Event]) -> DayMetrics {
    let today: Vec<&Event> = events.iter().filter(|e| e.day() == day).collect();

    let money_stock_start = today
        .iter()
        .find_map(|e| match e {
            Event::DayStart { money_stock, .. } => Some(*money_stock),
            _ => None,
        })
        .unwrap_or(Decimal::ZERO);

    // Dues and per-agent net positions.
    let mut total_dues = Decimal::ZERO;
    let mut due_count = 0usize;
    let mut outflows: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut inflows: BTreeMap<&str, Decimal> = BTreeMap::new();
    for event in &today {
        if let Event::ObligationDue {
            debtor,
            creditor,
            amount,
            ..
        } = event
        {
            total_dues += *amount;
            due_count += 1;
            *outflows.entry(debtor).or_insert(Decimal::ZERO) += *amount;
            *inflows.entry(creditor).or_insert(Decimal::ZERO) += *amount;
        }
    }

    let mut min_net_liquidity = Decimal::ZERO;
    for (debtor, out) in &outflows {
        let inflow = inflows.get(debtor).copied().unwrap_or(Decimal::ZERO);
        if *out > inflow {
            min_net_liquidity += *out - inflow;
        }
    }

    let liquidity_gap = (min_net_liquidity - money_stock_start).max(Decimal::ZERO);
    let netting_potential = if total_dues > Decimal::ZERO {
        Some(Decimal::ONE - min_net_liquidity / total_dues)
    } else {
        None
    };

    // Replay the realized settlement payments in emission order.
    let mut cumulative: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut gross_settled = Decimal::ZERO;
    let mut peak_liquidity_usage = Decimal::ZERO;
    for event in &today {
        if let Event::PaymentMade {
            phase: Phase::MaturitySettlement,
            from,
            to,
            amount,
            ..
        } = event
        {
            gross_settled += *amount;
            *cumulative.entry(from).or_insert(Decimal::ZERO) += *amount;
            *cumulative.entry(to).or_insert(Decimal::ZERO) -= *amount;

            let usage: Decimal = cumulative
                .values()
                .filter(|net| **net > Decimal::ZERO)
                .copied()
                .sum();
            peak_liquidity_usage = peak_liquidity_usage.max(usage);
        }
    }

    let intraday_velocity = if peak_liquidity_usage > Decimal::ZERO {
        Some(gross_settled / peak_liquidity_usage)
    } else {
        None
    };

    let settled_on_time = today
        .iter()
        .filter(|e| matches!(e, Event::ObligationSettled { .. }))
        .count();

    let (on_time_ratio, default_ratio) = if due_count > 0 {
        let ratio = Decimal::from(settled_on_time as u64) / Decimal::from(due_count as u64);
        (Some(ratio), Some(Decimal::ONE - ratio))
    } else {
        (None, None)
    };

    // Herfindahl over positive net creditor balances.
    let net_credits: Vec<Decimal> = inflows
        .iter()
        .map(|(agent, inflow)| {
            let outflow = outflows.get(agent).copied().unwrap_or(Decimal::ZERO);
            *inflow - outflow
        })
        .filter(|net| *net > Decimal::ZERO)
        .collect();
    let credit_total: Decimal = net_credits.iter().copied().sum();
    let creditor_concentration = if credit_total > Decimal::ZERO {
        Some(
            net_credits
                .iter()
                .map(|net| {
                    let share = *net / credit_total;
                    share * share
                })
                .sum(),
        )
    } else {
        None
    };

    DayMetrics {
        day,
        total_dues,
        min_net_liquidity,
        money_stock_start,
        liquidity_gap,
        netting_potential,
        gross_settled,
        peak_liquidity_usage,
        intraday_velocity,
        due_count,
        settled_on_time,
        on_time_ratio,
        default_ratio,
        creditor_concentration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::instrument::{InstrumentId, MoneyForm};
    use rust_decimal_macros::dec;

    fn due(day: usize, id: u64, debtor: &str, creditor: &str, amount: Decimal) -> Event {
        Event::ObligationDue {
            day,
            id: InstrumentId(id),
            debtor: debtor.to_string(),
            creditor: creditor.to_string(),
            amount,
        }
    }

    fn payment(day: usize, from: &str, to: &str, amount: Decimal) -> Event {
        Event::PaymentMade {
            day,
            phase: Phase::MaturitySettlement,
            from: from.to_string(),
            to: to.to_string(),
            form: MoneyForm::Cash,
            amount,
            obligation: None,
        }
    }

    fn settled(day: usize, id: u64, debtor: &str, creditor: &str, amount: Decimal) -> Event {
        Event::ObligationSettled {
            day,
            id: InstrumentId(id),
            debtor: debtor.to_string(),
            creditor: creditor.to_string(),
            amount,
        }
    }

    /// The three-agent ring: every debtor's dues net to zero.
    fn ring_events() -> Vec<Event> {
        vec![
            Event::DayStart {
                day: 1,
                money_stock: dec!(900),
            },
            due(1, 1, "A", "B", dec!(300)),
            due(1, 2, "B", "C", dec!(300)),
            due(1, 3, "C", "A", dec!(300)),
            payment(1, "A", "B", dec!(300)),
            settled(1, 1, "A", "B", dec!(300)),
            payment(1, "B", "C", dec!(300)),
            settled(1, 2, "B", "C", dec!(300)),
            payment(1, "C", "A", dec!(300)),
            settled(1, 3, "C", "A", dec!(300)),
        ]
    }

    #[test]
    fn ring_day_metrics() {
        let metrics = compute_day_metrics(1, &ring_events());

        assert_eq!(metrics.total_dues, dec!(900));
        // Perfect ring: every agent's in and out dues cancel.
        assert_eq!(metrics.min_net_liquidity, dec!(0));
        assert_eq!(metrics.liquidity_gap, dec!(0));
        assert_eq!(metrics.netting_potential, Some(dec!(1)));
        assert_eq!(metrics.on_time_ratio, Some(dec!(1)));
        assert_eq!(metrics.default_ratio, Some(dec!(0)));
        assert_eq!(metrics.gross_settled, dec!(900));
        // A pays 300 before C's inflow arrives: peak usage is one leg.
        assert_eq!(metrics.peak_liquidity_usage, dec!(300));
        assert_eq!(metrics.intraday_velocity, Some(dec!(3)));
    }

    #[test]
    fn velocity_identity_holds() {
        let metrics = compute_day_metrics(1, &ring_events());
        let velocity = metrics.intraday_velocity.unwrap();
        assert_eq!(velocity * metrics.peak_liquidity_usage, metrics.gross_settled);
    }

    #[test]
    fn ratios_sum_to_one_with_defaults() {
        let events = vec![
            Event::DayStart {
                day: 1,
                money_stock: dec!(600),
            },
            due(1, 1, "A", "B", dec!(300)),
            due(1, 2, "B", "C", dec!(300)),
            due(1, 3, "C", "A", dec!(300)),
            // Only two of three settle.
            payment(1, "B", "C", dec!(300)),
            settled(1, 2, "B", "C", dec!(300)),
            payment(1, "C", "A", dec!(300)),
            settled(1, 3, "C", "A", dec!(300)),
        ];
        let metrics = compute_day_metrics(1, &events);

        let on_time = metrics.on_time_ratio.unwrap();
        let default_ratio = metrics.default_ratio.unwrap();
        assert!(on_time >= Decimal::ZERO && on_time <= Decimal::ONE);
        assert_eq!(on_time + default_ratio, Decimal::ONE);
        assert_eq!(metrics.settled_on_time, 2);
        assert_eq!(metrics.due_count, 3);
    }

    #[test]
    fn quiet_day_has_no_ratios() {
        let events = vec![Event::DayStart {
            day: 4,
            money_stock: dec!(100),
        }];
        let metrics = compute_day_metrics(4, &events);

        assert_eq!(metrics.total_dues, dec!(0));
        assert_eq!(metrics.on_time_ratio, None);
        assert_eq!(metrics.intraday_velocity, None);
        assert_eq!(metrics.netting_potential, None);
        assert_eq!(metrics.creditor_concentration, None);
    }

    #[test]
    fn concentration_is_one_for_single_creditor() {
        let events = vec![
            due(1, 1, "A", "B", dec!(100)),
            due(1, 2, "C", "B", dec!(200)),
        ];
        let metrics = compute_day_metrics(1, &events);
        assert_eq!(metrics.creditor_concentration, Some(dec!(1)));
    }

    #[test]
    fn liquidity_gap_floors_at_zero() {
        let events = vec![
            Event::DayStart {
                day: 1,
                money_stock: dec!(1000),
            },
            due(1, 1, "A", "B", dec!(300)),
        ];
        let metrics = compute_day_metrics(1, &events);
        assert_eq!(metrics.min_net_liquidity, dec!(300));
        assert_eq!(metrics.liquidity_gap, dec!(0));
    }
}
