//! Kappa monotonicity regression
//!
//! Kappa is the ratio of starting money to total day-1 dues. Holding
//! everything else fixed, more starting liquidity must never lower the
//! day-1 on-time settlement ratio. This pins down the historical
//! sign-inversion defect class where extra liquidity appeared to *hurt*
//! settlement.

use creditnet_core::{
    ActionOp, AgentKind, AgentSpec, CheckMode, DefaultHandling, Orchestrator, RunConfig, Scenario,
    ScheduledAction, StopMode,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Three-firm ring, 300 due per leg on day 1, `cash` minted to each firm.
fn ring_with_cash(cash: Decimal) -> Scenario {
    let agent = |id: &str, kind: AgentKind| AgentSpec {
        id: id.to_string(),
        kind,
        display_name: id.to_string(),
    };

    let mut actions = Vec::new();
    for firm in ["FIRM_A", "FIRM_B", "FIRM_C"] {
        if cash > Decimal::ZERO {
            actions.push(ScheduledAction {
                day: 0,
                op: ActionOp::MintCash {
                    to: firm.to_string(),
                    amount: cash,
                },
            });
        }
    }
    for (debtor, creditor) in [
        ("FIRM_A", "FIRM_B"),
        ("FIRM_B", "FIRM_C"),
        ("FIRM_C", "FIRM_A"),
    ] {
        actions.push(ScheduledAction {
            day: 0,
            op: ActionOp::CreatePayable {
                debtor: debtor.to_string(),
                creditor: creditor.to_string(),
                amount: dec!(300),
                due_day: 1,
            },
        });
    }

    Scenario {
        agents: vec![
            agent("CB", AgentKind::CentralAuthority),
            agent("FIRM_A", AgentKind::Firm),
            agent("FIRM_B", AgentKind::Firm),
            agent("FIRM_C", AgentKind::Firm),
        ],
        actions,
        config: RunConfig {
            stop_mode: StopMode::FixedDays,
            max_days: 1,
            default_handling: DefaultHandling::ExpelAgent,
            check_mode: CheckMode::EveryDay,
            market: None,
        },
    }
}

fn day1_on_time_ratio(cash: Decimal) -> Decimal {
    let export = Orchestrator::new(ring_with_cash(cash))
        .unwrap()
        .run_to_completion()
        .unwrap();
    export.metrics[0].on_time_ratio.expect("dues on day 1")
}

#[test]
fn on_time_ratio_is_monotone_in_starting_liquidity() {
    let ladder = [
        dec!(0),
        dec!(50),
        dec!(100),
        dec!(150),
        dec!(200),
        dec!(250),
        dec!(300),
        dec!(400),
    ];

    let mut previous = None;
    for cash in ladder {
        let ratio = day1_on_time_ratio(cash);
        assert!(
            ratio >= Decimal::ZERO && ratio <= Decimal::ONE,
            "ratio out of bounds at cash {}",
            cash
        );
        if let Some(prev) = previous {
            assert!(
                ratio >= prev,
                "raising starting cash to {} lowered the on-time ratio ({} -> {})",
                cash,
                prev,
                ratio
            );
        }
        previous = Some(ratio);
    }
}

#[test]
fn full_funding_reaches_a_perfect_ratio() {
    assert_eq!(day1_on_time_ratio(dec!(300)), dec!(1));
}

#[test]
fn zero_funding_settles_nothing_in_the_ring() {
    // With no cash anywhere, partial inflows cannot rescue later legs.
    assert_eq!(day1_on_time_ratio(dec!(0)), dec!(0));
}
