//! Conservation properties
//!
//! Money-like supply changes only via explicit minting events, settlement
//! only moves value, and the double-entry invariant survives arbitrary
//! scenario shapes. Property-tested over randomized rings of obligations.

use creditnet_core::{
    ActionOp, AgentKind, AgentSpec, CheckMode, DefaultHandling, Event, InstrumentKind,
    Orchestrator, RunConfig, Scenario, ScheduledAction, StopMode,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

const FIRMS: [&str; 4] = ["FIRM_A", "FIRM_B", "FIRM_C", "FIRM_D"];

fn scenario_from(
    cash: Vec<u32>,
    obligations: Vec<(usize, usize, u32, usize)>,
    max_days: usize,
) -> Scenario {
    let mut agents = vec![AgentSpec {
        id: "CB".to_string(),
        kind: AgentKind::CentralAuthority,
        display_name: "CB".to_string(),
    }];
    for firm in FIRMS {
        agents.push(AgentSpec {
            id: firm.to_string(),
            kind: AgentKind::Firm,
            display_name: firm.to_string(),
        });
    }

    let mut actions = Vec::new();
    for (firm, amount) in FIRMS.iter().zip(&cash) {
        if *amount > 0 {
            actions.push(ScheduledAction {
                day: 0,
                op: ActionOp::MintCash {
                    to: firm.to_string(),
                    amount: Decimal::from(*amount),
                },
            });
        }
    }
    for (debtor, creditor, amount, due_day) in obligations {
        if debtor != creditor && amount > 0 {
            actions.push(ScheduledAction {
                day: 0,
                op: ActionOp::CreatePayable {
                    debtor: FIRMS[debtor].to_string(),
                    creditor: FIRMS[creditor].to_string(),
                    amount: Decimal::from(amount),
                    due_day,
                },
            });
        }
    }

    Scenario {
        agents,
        actions,
        config: RunConfig {
            stop_mode: StopMode::FixedDays,
            max_days,
            default_handling: DefaultHandling::ExpelAgent,
            check_mode: CheckMode::EveryDay,
            market: None,
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Total money equals total minted, whatever settles or defaults:
    /// settlement moves value, write-offs remove claims, neither creates
    /// or destroys money.
    #[test]
    fn money_stock_equals_minted_total(
        cash in prop::collection::vec(0u32..1_000, 4),
        obligations in prop::collection::vec(
            (0usize..4, 0usize..4, 1u32..500, 1usize..4),
            0..8,
        ),
    ) {
        let scenario = scenario_from(cash.clone(), obligations, 4);
        let export = Orchestrator::new(scenario).unwrap().run_to_completion().unwrap();

        let minted: Decimal = export
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Minted { amount, .. } => Some(*amount),
                _ => None,
            })
            .sum();
        let final_money: Decimal = export.balances.iter().map(|b| b.money).sum();

        prop_assert_eq!(minted, final_money);
        let expected: u32 = cash.iter().sum();
        prop_assert_eq!(minted, Decimal::from(expected));
    }

    /// Per instrument type, the asset-side sum always equals the
    /// liability-side sum at run end (stock lots have no liability side).
    #[test]
    fn asset_and_liability_sums_match_per_type(
        cash in prop::collection::vec(0u32..1_000, 4),
        obligations in prop::collection::vec(
            (0usize..4, 0usize..4, 1u32..500, 1usize..4),
            0..8,
        ),
    ) {
        let scenario = scenario_from(cash, obligations, 2);
        let export = Orchestrator::new(scenario).unwrap().run_to_completion().unwrap();

        for kind in [
            InstrumentKind::Cash,
            InstrumentKind::BankDeposit,
            InstrumentKind::ReserveDeposit,
            InstrumentKind::Payable,
        ] {
            let assets: Decimal = export
                .balances
                .iter()
                .flat_map(|b| &b.assets)
                .filter(|i| i.kind == kind)
                .map(|i| i.amount)
                .sum();
            let liabilities: Decimal = export
                .balances
                .iter()
                .flat_map(|b| &b.liabilities)
                .filter(|i| i.kind == kind)
                .map(|i| i.amount)
                .sum();
            prop_assert_eq!(assets, liabilities, "imbalance in {:?}", kind);
        }
    }

    /// Ratio bounds hold on every simulated day.
    #[test]
    fn settlement_ratios_stay_in_bounds(
        cash in prop::collection::vec(0u32..600, 4),
        obligations in prop::collection::vec(
            (0usize..4, 0usize..4, 1u32..500, 1usize..3),
            1..8,
        ),
    ) {
        let scenario = scenario_from(cash, obligations, 3);
        let export = Orchestrator::new(scenario).unwrap().run_to_completion().unwrap();

        for metrics in &export.metrics {
            if let (Some(on_time), Some(default_ratio)) =
                (metrics.on_time_ratio, metrics.default_ratio)
            {
                prop_assert!(on_time >= Decimal::ZERO && on_time <= Decimal::ONE);
                prop_assert_eq!(on_time + default_ratio, Decimal::ONE);
            }
            if let Some(velocity) = metrics.intraday_velocity {
                // Velocity identity, within the rounding tolerance of the
                // fixed-precision division.
                let residual =
                    (velocity * metrics.peak_liquidity_usage - metrics.gross_settled).abs();
                prop_assert!(residual <= Decimal::new(1, 15), "residual {}", residual);
            }
        }
    }
}
