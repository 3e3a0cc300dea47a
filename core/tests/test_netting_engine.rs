//! Interbank netting through the day loop
//!
//! Deposit payments between customers of different banks accumulate as
//! interbank flows during the day; the netting phase settles the bilateral
//! net in reserves and falls back to an overnight payable when reserves run
//! short.

use creditnet_core::{
    ActionOp, AgentKind, AgentSpec, CheckMode, DefaultHandling, Event, MoneyForm, Orchestrator,
    RunConfig, Scenario, ScheduledAction, StopMode,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn agent(id: &str, kind: AgentKind) -> AgentSpec {
    AgentSpec {
        id: id.to_string(),
        kind,
        display_name: id.to_string(),
    }
}

/// FIRM_A banks at BANK_1, FIRM_B at BANK_2; A owes B 100 due day 1.
fn two_bank_scenario(reserves: Decimal) -> Scenario {
    let mut actions = vec![
        ScheduledAction {
            day: 0,
            op: ActionOp::OpenDeposit {
                bank: "BANK_1".to_string(),
                owner: "FIRM_A".to_string(),
                amount: dec!(200),
            },
        },
        ScheduledAction {
            day: 0,
            op: ActionOp::OpenDeposit {
                bank: "BANK_2".to_string(),
                owner: "FIRM_B".to_string(),
                amount: dec!(50),
            },
        },
        ScheduledAction {
            day: 0,
            op: ActionOp::CreatePayable {
                debtor: "FIRM_A".to_string(),
                creditor: "FIRM_B".to_string(),
                amount: dec!(100),
                due_day: 1,
            },
        },
    ];
    if reserves > Decimal::ZERO {
        for bank in ["BANK_1", "BANK_2"] {
            actions.insert(
                0,
                ScheduledAction {
                    day: 0,
                    op: ActionOp::MintReserves {
                        to: bank.to_string(),
                        amount: reserves,
                    },
                },
            );
        }
    }

    Scenario {
        agents: vec![
            agent("CB", AgentKind::CentralAuthority),
            agent("BANK_1", AgentKind::Bank),
            agent("BANK_2", AgentKind::Bank),
            agent("FIRM_A", AgentKind::Firm),
            agent("FIRM_B", AgentKind::Firm),
        ],
        actions,
        config: RunConfig {
            stop_mode: StopMode::FixedDays,
            max_days: 1,
            default_handling: DefaultHandling::FailFast,
            check_mode: CheckMode::EveryDay,
            market: None,
        },
    }
}

#[test]
fn cross_bank_deposit_payment_settles_net_in_reserves() {
    let export = Orchestrator::new(two_bank_scenario(dec!(500)))
        .unwrap()
        .run_to_completion()
        .unwrap();

    // The obligation settled in deposits.
    assert!(export.events.iter().any(|e| matches!(
        e,
        Event::PaymentMade {
            form: MoneyForm::BankDeposit,
            amount,
            ..
        } if *amount == dec!(100)
    )));

    // Netting saw a 100 flow BANK_1 -> BANK_2 and settled it in reserves.
    let netting = export
        .events
        .iter()
        .find_map(|e| match e {
            Event::NettingSettled {
                bank_a,
                bank_b,
                net,
                reserves_paid,
                overnight_payable,
                ..
            } => Some((
                bank_a.clone(),
                bank_b.clone(),
                *net,
                *reserves_paid,
                overnight_payable.is_some(),
            )),
            _ => None,
        })
        .expect("a netting event");
    assert_eq!(netting, ("BANK_1".to_string(), "BANK_2".to_string(), dec!(100), dec!(100), false));

    let bank_1 = export
        .balances
        .iter()
        .find(|b| b.agent_id == "BANK_1")
        .unwrap();
    let bank_2 = export
        .balances
        .iter()
        .find(|b| b.agent_id == "BANK_2")
        .unwrap();
    assert_eq!(bank_1.money, dec!(400));
    assert_eq!(bank_2.money, dec!(600));

    // The payee's deposit grew at its own bank.
    let firm_b = export
        .balances
        .iter()
        .find(|b| b.agent_id == "FIRM_B")
        .unwrap();
    assert_eq!(firm_b.money, dec!(150));
}

#[test]
fn reserve_shortfall_rolls_into_an_overnight_payable() {
    let export = Orchestrator::new(two_bank_scenario(dec!(30)))
        .unwrap()
        .run_to_completion()
        .unwrap();

    let netting = export
        .events
        .iter()
        .find_map(|e| match e {
            Event::NettingSettled {
                reserves_paid,
                overnight_payable,
                ..
            } => Some((*reserves_paid, *overnight_payable)),
            _ => None,
        })
        .expect("a netting event");

    assert_eq!(netting.0, dec!(30));
    let payable_id = netting.1.expect("overnight payable");

    // The payable shows up in the bank's end-of-run liabilities, due day 2.
    let bank_1 = export
        .balances
        .iter()
        .find(|b| b.agent_id == "BANK_1")
        .unwrap();
    assert!(bank_1.liabilities.iter().any(|l| l.id == payable_id && l.amount == dec!(70)));
}
