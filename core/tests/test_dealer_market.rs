//! Dealer-market integration
//!
//! Exercises the secondary market end to end through the day loop: a
//! distressed seller converting a receivable at the dealer's bid, ticket
//! bookkeeping (single issuer, effective holder), pro-rata recovery at
//! maturity, and the anchor feedback loop.

use creditnet_core::{
    ActionOp, AgentKind, AgentSpec, CheckMode, DefaultHandling, Event, MarketConfig,
    MaturityBucket, Orchestrator, RunConfig, Scenario, ScheduledAction, StopMode,
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

/// Market tuned so the zero-inventory dealer bid is exactly 0.85:
/// mid 0.90, spread 0.20, share 0.5 -> bid = 0.90 - 0.10 * 0.5 = 0.85.
fn market_config() -> MarketConfig {
    MarketConfig {
        short_max_days: 2,
        mid_max_days: 5,
        dealer_cash: dec!(10000),
        dealer_capacity: dec!(10000),
        provider_cash: dec!(1000000),
        initial_mid: dec!(0.90),
        initial_spread: dec!(0.20),
        spread_share: dec!(0.5),
        skew_gain: dec!(0.5),
        anchor_blend: dec!(0.5),
        lookahead_days: 2,
        buy_side_enabled: false,
        buyer_cash_buffer: Decimal::ZERO,
    }
}

/// FIRM_A holds a 100 receivable on FIRM_B due day 5 but owes FIRM_C 100 on
/// day 2 with only 15 cash: a liquidity-timing squeeze the market resolves.
fn squeeze_scenario(max_days: usize, default_handling: DefaultHandling) -> Scenario {
    Scenario {
        agents: vec![
            agent("CB", AgentKind::CentralAuthority),
            agent("FIRM_A", AgentKind::Firm),
            agent("FIRM_B", AgentKind::Firm),
            agent("FIRM_C", AgentKind::Firm),
        ],
        actions: vec![
            ScheduledAction {
                day: 0,
                op: ActionOp::MintCash {
                    to: "FIRM_A".to_string(),
                    amount: dec!(15),
                },
            },
            ScheduledAction {
                day: 0,
                op: ActionOp::MintCash {
                    to: "FIRM_B".to_string(),
                    amount: dec!(100),
                },
            },
            ScheduledAction {
                day: 0,
                op: ActionOp::CreatePayable {
                    debtor: "FIRM_B".to_string(),
                    creditor: "FIRM_A".to_string(),
                    amount: dec!(100),
                    due_day: 5,
                },
            },
            ScheduledAction {
                day: 0,
                op: ActionOp::CreatePayable {
                    debtor: "FIRM_A".to_string(),
                    creditor: "FIRM_C".to_string(),
                    amount: dec!(100),
                    due_day: 2,
                },
            },
        ],
        config: RunConfig {
            stop_mode: StopMode::FixedDays,
            max_days,
            default_handling,
            check_mode: CheckMode::EveryDay,
            market: Some(market_config()),
        },
    }
}

#[test]
fn distressed_seller_trades_at_the_dealer_bid() {
    let mut orchestrator =
        Orchestrator::new(squeeze_scenario(2, DefaultHandling::FailFast)).unwrap();
    orchestrator.step_day().unwrap();

    // The sale: face 100 at bid 0.85 -> proceeds exactly 85, not the raw bid.
    let sale = orchestrator
        .state()
        .events()
        .events()
        .iter()
        .find_map(|e| match e {
            Event::TicketSold {
                price,
                proceeds,
                face,
                buyer,
                seller,
                passthrough,
                bucket,
                ..
            } => Some((
                *price,
                *proceeds,
                *face,
                buyer.clone(),
                seller.clone(),
                *passthrough,
                *bucket,
            )),
            _ => None,
        })
        .expect("a ticket sale on day 1");

    let (price, proceeds, face, buyer, seller, passthrough, bucket) = sale;
    assert_eq!(price, dec!(0.85));
    assert_eq!(face, dec!(100));
    assert_eq!(proceeds, dec!(85));
    assert_eq!(seller, "FIRM_A");
    assert_eq!(buyer, "DEALER_MID");
    assert!(!passthrough);
    // Due day 5 seen from day 1 is 4 days out: the Mid bucket.
    assert_eq!(bucket, MaturityBucket::Mid);

    let ledger = orchestrator.state().ledger();
    // Seller cash: 15 + 85 = 100.
    assert_eq!(ledger.total_money("FIRM_A"), dec!(100));
    // Dealer cash decreased by exactly the consideration.
    assert_eq!(ledger.total_money("DEALER_MID"), dec!(10000) - dec!(85));
    // Dealer inventory gained one ticket.
    assert_eq!(ledger.tickets_of("DEALER_MID", MaturityBucket::Mid).len(), 1);
}

#[test]
fn sold_claim_tracks_effective_holder_not_original_creditor() {
    let mut orchestrator =
        Orchestrator::new(squeeze_scenario(2, DefaultHandling::FailFast)).unwrap();
    orchestrator.step_day().unwrap();

    let ledger = orchestrator.state().ledger();
    let ticket = ledger.tickets_of("DEALER_MID", MaturityBucket::Mid)[0].clone();
    let payable = ledger
        .instrument(ticket.payable_id)
        .unwrap()
        .as_payable()
        .unwrap()
        .clone();

    // Asset side moved to the dealer; provenance untouched.
    assert_eq!(payable.effective_creditor(), "DEALER_MID");
    assert_eq!(payable.original_creditor, "FIRM_A");
    assert!(ledger.agent("DEALER_MID").unwrap().holds_asset(payable.id));
    assert!(!ledger.agent("FIRM_A").unwrap().holds_asset(payable.id));

    // Single-issuer constraint: tagged with the original debtor at first
    // purchase.
    assert_eq!(ticket.issuer_tag.as_deref(), Some("FIRM_B"));

    ledger.check_invariants().unwrap();
}

#[test]
fn market_sale_averts_the_liquidity_timing_default() {
    // Without the market FIRM_A would default on day 2 holding only 15 cash.
    let export = Orchestrator::new(squeeze_scenario(2, DefaultHandling::FailFast))
        .unwrap()
        .run_to_completion()
        .unwrap();

    assert!(export
        .events
        .iter()
        .any(|e| matches!(e, Event::ObligationSettled { day: 2, .. })));
    let firm_c = export
        .balances
        .iter()
        .find(|b| b.agent_id == "FIRM_C")
        .unwrap();
    assert_eq!(firm_c.money, dec!(100));
}

#[test]
fn ticket_matures_pro_rata_and_feeds_the_anchor() {
    // Run through day 5 so the sold claim matures while dealer-held. The
    // debtor has the full 100, so recovery is complete.
    let export = Orchestrator::new(squeeze_scenario(5, DefaultHandling::ExpelAgent))
        .unwrap()
        .run_to_completion()
        .unwrap();

    let matured = export
        .events
        .iter()
        .find_map(|e| match e {
            Event::TicketMatured {
                day,
                holder,
                face,
                recovered,
                ..
            } => Some((*day, holder.clone(), *face, *recovered)),
            _ => None,
        })
        .expect("ticket maturity");
    let (day, holder, face, recovered) = matured;
    assert_eq!(day, 5);
    // The day-3 rebucketing sold the ticket on to the Short dealer.
    assert_eq!(holder, "DEALER_SHORT");
    assert_eq!(face, dec!(100));
    assert_eq!(recovered, dec!(100));

    // Full recovery: the anchor absorbed a zero loss rate.
    assert!(export.events.iter().any(|e| matches!(
        e,
        Event::AnchorUpdated { day: 5, loss_rate, .. } if *loss_rate == dec!(0)
    )));

    // The Mid dealer bought at 85 and sold on at the 0.90 rebucket mark; the
    // Short dealer paid 90 and recovered the full face.
    let dealer_mid = export
        .balances
        .iter()
        .find(|b| b.agent_id == "DEALER_MID")
        .unwrap();
    assert_eq!(dealer_mid.money, dec!(10000) - dec!(85) + dec!(90));
    let dealer_short = export
        .balances
        .iter()
        .find(|b| b.agent_id == "DEALER_SHORT")
        .unwrap();
    assert_eq!(dealer_short.money, dec!(10000) - dec!(90) + dec!(100));
}

#[test]
fn partial_recovery_is_shared_and_depresses_the_anchor() {
    let mut scenario = squeeze_scenario(5, DefaultHandling::ExpelAgent);
    // The debtor can only cover 40 of 100 at maturity.
    for action in &mut scenario.actions {
        if let ActionOp::MintCash { to, amount } = &mut action.op {
            if to == "FIRM_B" {
                *amount = dec!(40);
            }
        }
    }

    let export = Orchestrator::new(scenario)
        .unwrap()
        .run_to_completion()
        .unwrap();

    let recovered = export
        .events
        .iter()
        .find_map(|e| match e {
            Event::TicketMatured { recovered, .. } => Some(*recovered),
            _ => None,
        })
        .expect("ticket maturity");
    assert_eq!(recovered, dec!(40));

    // 60% realized loss reaches the anchor.
    assert!(export.events.iter().any(|e| matches!(
        e,
        Event::AnchorUpdated { day: 5, loss_rate, .. } if *loss_rate == dec!(0.6)
    )));

    // The debtor defaulted on the shortfall.
    assert!(export
        .events
        .iter()
        .any(|e| matches!(e, Event::AgentDefaulted { agent, .. } if agent == "FIRM_B")));
}

#[test]
fn rebucketing_logs_an_internal_sale_as_time_advances() {
    // Hold the ticket past the Mid->Short boundary: due day 5 crosses into
    // the Short bucket on day 3 (remaining maturity 2).
    let mut scenario = squeeze_scenario(4, DefaultHandling::ExpelAgent);
    scenario.config.max_days = 4;

    let export = Orchestrator::new(scenario)
        .unwrap()
        .run_to_completion()
        .unwrap();

    let rebucketed = export
        .events
        .iter()
        .find_map(|e| match e {
            Event::TicketRebucketed {
                day,
                from_bucket,
                to_bucket,
                ..
            } => Some((*day, *from_bucket, *to_bucket)),
            _ => None,
        })
        .expect("a rebucketing event");
    assert_eq!(rebucketed, (3, MaturityBucket::Mid, MaturityBucket::Short));
}

#[test]
fn capital_is_new_money_not_trader_liquidity() {
    let scenario = squeeze_scenario(2, DefaultHandling::FailFast);
    let orchestrator = Orchestrator::new(scenario).unwrap();
    let ledger = orchestrator.state().ledger();

    // Trader cash after setup is exactly what the scenario minted.
    assert_eq!(ledger.total_money("FIRM_A"), dec!(15));
    assert_eq!(ledger.total_money("FIRM_B"), dec!(100));
    assert_eq!(ledger.total_money("FIRM_C"), dec!(0));

    // Market-maker capital exists on top, as fresh mint events.
    let mint_total: Decimal = orchestrator
        .state()
        .events()
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::Minted { to, amount, .. }
                if to.starts_with("DEALER_") || to.starts_with("OLP_") =>
            {
                Some(*amount)
            }
            _ => None,
        })
        .sum();
    assert_eq!(mint_total, (dec!(10000) + dec!(1000000)) * dec!(3));
    assert_eq!(
        ledger.money_stock(),
        dec!(115) + (dec!(10000) + dec!(1000000)) * dec!(3)
    );
}
