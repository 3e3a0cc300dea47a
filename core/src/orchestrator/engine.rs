//! Day-phase engine
//!
//! The main simulation driver. One call to [`Orchestrator::step_day`] runs
//! the strictly ordered phase cycle for one simulated day:
//!
//! ```text
//! 1. Day-Marker          advance counter, record start-of-day money stock
//! 2. Scheduled-Actions   apply the scenario's actions for this day, in order
//! 3. Dealer-Trading      rebucket tickets, then run the trading round
//! 4. Maturity-Settlement settle due obligations, ranked means of payment
//! 5. Interbank-Netting   net the day's cross-bank deposit flows in reserves
//! 6. Quiet-check         update the quiet counter, compute metrics, verify
//! ```
//!
//! Termination is checked only at day boundaries: max days, the quiet-day
//! threshold, or a fatal invariant violation / fail-fast default.
//!
//! Cascading default is control flow, not exceptions: settlement produces a
//! [`SettlementOutcome`] value and the expel-agent bookkeeping (write-off,
//! future-action skipping) runs as explicit downstream steps.

use crate::ledger::{CheckMode, LedgerError, LedgerOp, NewInstrument};
use crate::market::DealerMarket;
use crate::metrics::{compute_day_metrics, DayMetrics};
use crate::models::event::{Event, Phase};
use crate::models::instrument::{Instrument, InstrumentId, MaturityBucket, MoneyForm};
use crate::models::state::SimulationState;
use crate::scenario::{self, ActionOp, DefaultHandling, Scenario, StopMode};
use crate::settlement::{
    expel_debtor, net_and_settle, pay_in_full, records_from_receipts, settle_delivery,
    settle_payable, InterbankFlow, PaymentRecord, SettlementOutcome,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Fatal simulation errors.
///
/// Invariant and configuration errors always halt the run; a settlement
/// default is fatal only under fail-fast handling.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("configuration error: {0}")]
    Configuration(#[from] crate::scenario::ConfigurationError),

    #[error("settlement default on day {day}: {debtor} short {shortfall} on obligation {obligation}")]
    SettlementDefault {
        day: usize,
        debtor: String,
        obligation: InstrumentId,
        shortfall: Decimal,
    },

    #[error("export serialization failed: {0}")]
    Serialization(String),
}

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A fixed-day-count run completed its scheduled days.
    FixedDaysComplete,
    /// The quiet-day threshold was reached.
    QuietThreshold,
    /// A run-until-quiet run hit the maximum day backstop.
    MaxDaysReached,
}

/// Summary of one executed day.
#[derive(Debug, Clone, PartialEq)]
pub struct DayReport {
    pub day: usize,
    pub dues: usize,
    pub settled: usize,
    pub defaults: usize,
    pub quiet_days: usize,
}

/// The day-phase driver owning all run state.
pub struct Orchestrator {
    state: SimulationState,
    scenario: Scenario,
    market: Option<DealerMarket>,
    metrics: Vec<DayMetrics>,
}

impl Orchestrator {
    /// Validate the scenario, build the ledger, set up the dealer market,
    /// apply the day-0 setup actions and run the setup invariant check.
    pub fn new(scenario: Scenario) -> Result<Self, SimulationError> {
        scenario::validate(&scenario)?;
        let ledger = scenario::build_ledger(&scenario)?;
        let mut state = SimulationState::new(ledger);

        let market = match &scenario.config.market {
            Some(config) => Some(DealerMarket::setup(&mut state, config.clone())?),
            None => None,
        };

        let mut orchestrator = Self {
            state,
            scenario,
            market,
            metrics: Vec::new(),
        };

        // Day 0 is setup: scheduled actions only, no settlement phases (and
        // therefore no netting of setup-day flows).
        let mut setup_flows = Vec::new();
        orchestrator.run_scheduled_actions(0, &mut setup_flows)?;

        if orchestrator.check_mode() != CheckMode::Disabled {
            orchestrator.state.ledger().check_invariants()?;
        }

        Ok(orchestrator)
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn metrics(&self) -> &[DayMetrics] {
        &self.metrics
    }

    pub fn market(&self) -> Option<&DealerMarket> {
        self.market.as_ref()
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Decompose the orchestrator for export at run end.
    pub(crate) fn into_parts(self) -> (SimulationState, Scenario, Vec<DayMetrics>) {
        (self.state, self.scenario, self.metrics)
    }

    fn check_mode(&self) -> CheckMode {
        self.scenario.config.check_mode
    }

    fn default_handling(&self) -> DefaultHandling {
        self.scenario.config.default_handling
    }

    /// Execute the full day loop to termination.
    pub fn run(&mut self) -> Result<StopReason, SimulationError> {
        loop {
            if self.state.day() >= self.scenario.config.max_days {
                return Ok(match self.scenario.config.stop_mode {
                    StopMode::FixedDays => StopReason::FixedDaysComplete,
                    StopMode::RunUntilQuiet { .. } => StopReason::MaxDaysReached,
                });
            }

            let report = self.step_day()?;

            if let StopMode::RunUntilQuiet { quiet_threshold } = self.scenario.config.stop_mode {
                if report.quiet_days >= quiet_threshold {
                    return Ok(StopReason::QuietThreshold);
                }
            }
        }
    }

    /// Run one complete day-phase cycle.
    pub fn step_day(&mut self) -> Result<DayReport, SimulationError> {
        // Phase 1: Day-Marker. No mutation beyond the counter.
        let day = self.state.advance_day();
        let money_stock = self.state.ledger().money_stock();
        self.state.log_event(Event::DayStart { day, money_stock });
        info!(day, %money_stock, "day start");

        let mut flows: Vec<InterbankFlow> = Vec::new();

        // Phase 2: Scheduled-Actions.
        self.run_scheduled_actions(day, &mut flows)?;

        // Phase 3: Dealer-Trading, ahead of the dues deadline so distressed
        // agents can raise cash first.
        if let Some(mut market) = self.market.take() {
            let result = market
                .rebucket(&mut self.state, &mut flows)
                .and_then(|_| market.trading_round(&mut self.state, &mut flows));
            self.market = Some(market);
            result?;
        }

        // Phase 4: Maturity-Settlement.
        let (dues, settled, defaults) = self.maturity_phase(day, &mut flows)?;

        // Phase 5: Interbank-Netting.
        self.netting_phase(day, &flows)?;

        // Phase 6: Quiet-check, metrics, invariant gate.
        self.metrics
            .push(compute_day_metrics(day, self.state.events().events()));
        let quiet_days = self.state.update_quiet_counter();
        if quiet_days > 0 {
            self.state.log_event(Event::QuietDay {
                day,
                consecutive: quiet_days,
            });
        }
        if self.check_mode() == CheckMode::EveryDay {
            self.state.ledger().check_invariants()?;
        }

        Ok(DayReport {
            day,
            dues,
            settled,
            defaults,
            quiet_days,
        })
    }

    // ========================================================================
    // Phase 2: Scheduled actions
    // ========================================================================

    fn run_scheduled_actions(
        &mut self,
        day: usize,
        flows: &mut Vec<InterbankFlow>,
    ) -> Result<(), SimulationError> {
        let actions: Vec<(usize, ActionOp)> = self
            .scenario
            .actions_for_day(day)
            .into_iter()
            .map(|(index, op)| (index, op.clone()))
            .collect();

        for (index, op) in actions {
            // Scheduled actions referencing a defaulted agent are skipped,
            // not retried.
            let defaulted_party = op
                .agents()
                .iter()
                .find(|agent| {
                    self.state
                        .ledger()
                        .agent(agent)
                        .map(|a| a.is_defaulted())
                        .unwrap_or(false)
                })
                .map(|agent| agent.to_string());
            if let Some(agent) = defaulted_party {
                self.state.log_event(Event::ActionSkipped {
                    day,
                    index,
                    reason: format!("agent {} is defaulted", agent),
                });
                continue;
            }

            match self.apply_action(day, &op, flows) {
                Ok(()) => {}
                Err(SimulationError::Ledger(err)) => match self.default_handling() {
                    DefaultHandling::FailFast => return Err(SimulationError::Ledger(err)),
                    DefaultHandling::ExpelAgent => {
                        debug!(index, %err, "scheduled action failed; skipping");
                        self.state.log_event(Event::ActionSkipped {
                            day,
                            index,
                            reason: err.to_string(),
                        });
                    }
                },
                Err(other) => return Err(other),
            }
        }

        Ok(())
    }

    fn apply_action(
        &mut self,
        day: usize,
        op: &ActionOp,
        flows: &mut Vec<InterbankFlow>,
    ) -> Result<(), SimulationError> {
        let phase = Phase::ScheduledActions;
        match op {
            ActionOp::MintCash { to, amount } => {
                self.state.ledger_mut().run_atomic(vec![LedgerOp::Mint {
                    form: MoneyForm::Cash,
                    bank: None,
                    to: to.clone(),
                    amount: *amount,
                }])?;
                self.state.log_event(Event::Minted {
                    day,
                    phase,
                    form: MoneyForm::Cash,
                    to: to.clone(),
                    amount: *amount,
                });
            }
            ActionOp::MintReserves { to, amount } => {
                self.state.ledger_mut().run_atomic(vec![LedgerOp::Mint {
                    form: MoneyForm::ReserveDeposit,
                    bank: None,
                    to: to.clone(),
                    amount: *amount,
                }])?;
                self.state.log_event(Event::Minted {
                    day,
                    phase,
                    form: MoneyForm::ReserveDeposit,
                    to: to.clone(),
                    amount: *amount,
                });
            }
            ActionOp::OpenDeposit {
                bank,
                owner,
                amount,
            } => {
                self.state.ledger_mut().run_atomic(vec![LedgerOp::Mint {
                    form: MoneyForm::BankDeposit,
                    bank: Some(bank.clone()),
                    to: owner.clone(),
                    amount: *amount,
                }])?;
                self.state.log_event(Event::Minted {
                    day,
                    phase,
                    form: MoneyForm::BankDeposit,
                    to: owner.clone(),
                    amount: *amount,
                });
            }
            ActionOp::CreatePayable {
                debtor,
                creditor,
                amount,
                due_day,
            } => {
                let id = self
                    .state
                    .ledger_mut()
                    .create_instrument(NewInstrument::Payable {
                        debtor: debtor.clone(),
                        creditor: creditor.clone(),
                        amount: *amount,
                        due_day: *due_day,
                        original_maturity: *due_day - day,
                    })?;
                self.state.log_event(Event::PayableCreated {
                    day,
                    phase,
                    id,
                    debtor: debtor.clone(),
                    creditor: creditor.clone(),
                    amount: *amount,
                    due_day: *due_day,
                });
            }
            ActionOp::CreateDelivery {
                debtor,
                creditor,
                units,
                due_day,
            } => {
                let id = self
                    .state
                    .ledger_mut()
                    .create_instrument(NewInstrument::Delivery {
                        debtor: debtor.clone(),
                        creditor: creditor.clone(),
                        units: *units,
                        due_day: *due_day,
                    })?;
                self.state.log_event(Event::DeliveryCreated {
                    day,
                    phase,
                    id,
                    debtor: debtor.clone(),
                    creditor: creditor.clone(),
                    units: *units,
                    due_day: *due_day,
                });
            }
            ActionOp::GrantStock { to, units } => {
                let id = self
                    .state
                    .ledger_mut()
                    .create_instrument(NewInstrument::StockLot {
                        holder: to.clone(),
                        units: *units,
                    })?;
                self.state.log_event(Event::StockGranted {
                    day,
                    phase,
                    id,
                    to: to.clone(),
                    units: *units,
                });
            }
            ActionOp::Pay { from, to, amount } => {
                let records = pay_in_full(self.state.ledger_mut(), from, to, *amount)?;
                self.log_payment_records(day, phase, &records, from, to, None);
                collect_flow_records(flows, &records);
            }
            ActionOp::TransferMoney {
                form,
                from,
                to,
                amount,
            } => {
                let receipts = self
                    .state
                    .ledger_mut()
                    .run_atomic(vec![LedgerOp::MoveValue {
                        form: *form,
                        from: from.clone(),
                        to: to.clone(),
                        amount: *amount,
                    }])?;
                collect_flow_records(flows, &records_from_receipts(&receipts));
                self.state.log_event(Event::MoneyTransferred {
                    day,
                    phase,
                    form: *form,
                    from: from.clone(),
                    to: to.clone(),
                    amount: *amount,
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Phase 4: Maturity settlement
    // ========================================================================

    fn maturity_phase(
        &mut self,
        day: usize,
        flows: &mut Vec<InterbankFlow>,
    ) -> Result<(usize, usize, usize), SimulationError> {
        let commit_partial = self.default_handling() == DefaultHandling::ExpelAgent;
        let mut dues = 0usize;
        let mut settled = 0usize;
        let mut defaults = 0usize;

        // Plain payables first, ascending id. Claims wrapped by tickets
        // settle through the market's pro-rata path below.
        for id in self.state.ledger().payables_due(day) {
            if self.state.ledger().ticket_for_payable(id).is_some() {
                continue;
            }
            // A same-day default may have written this obligation off already.
            let payable = match self.state.ledger().instrument(id) {
                Ok(instrument) => match instrument.as_payable() {
                    Some(p) => p.clone(),
                    None => continue,
                },
                Err(_) => continue,
            };
            if self.state.ledger().agent(&payable.debtor)?.is_defaulted() {
                continue;
            }

            dues += 1;
            let creditor = payable.effective_creditor().to_string();
            self.state.log_event(Event::ObligationDue {
                day,
                id,
                debtor: payable.debtor.clone(),
                creditor: creditor.clone(),
                amount: payable.amount,
            });

            let (outcome, records) = settle_payable(self.state.ledger_mut(), id, commit_partial)?;
            self.log_payment_records(
                day,
                Phase::MaturitySettlement,
                &records,
                &payable.debtor,
                &creditor,
                Some(id),
            );
            collect_flow_records(flows, &records);

            match outcome {
                SettlementOutcome::Settled => {
                    settled += 1;
                    self.state.log_event(Event::ObligationSettled {
                        day,
                        id,
                        debtor: payable.debtor.clone(),
                        creditor,
                        amount: payable.amount,
                    });
                }
                SettlementOutcome::PartiallySettled { paid, shortfall } => {
                    defaults += 1;
                    self.state.log_event(Event::ObligationPartiallySettled {
                        day,
                        id,
                        debtor: payable.debtor.clone(),
                        creditor,
                        paid,
                        shortfall,
                    });
                    self.handle_default(day, &payable.debtor, id, shortfall)?;
                }
                SettlementOutcome::Defaulted { shortfall } => {
                    defaults += 1;
                    self.handle_default(day, &payable.debtor, id, shortfall)?;
                }
            }
        }

        // Delivery obligations, ascending id.
        for id in self.state.ledger().deliveries_due(day) {
            let delivery = match self.state.ledger().instrument(id) {
                Ok(Instrument::DeliveryObligation(d)) => d.clone(),
                _ => continue,
            };
            if self.state.ledger().agent(&delivery.debtor)?.is_defaulted() {
                continue;
            }

            let (outcome, delivered) =
                settle_delivery(self.state.ledger_mut(), id, commit_partial)?;
            if delivered > Decimal::ZERO {
                self.state.log_event(Event::DeliverySettled {
                    day,
                    id,
                    debtor: delivery.debtor.clone(),
                    creditor: delivery.creditor.clone(),
                    units: delivered,
                });
            }
            if !outcome.is_settled() {
                self.handle_default(day, &delivery.debtor, id, outcome.shortfall())?;
            }
        }

        // Wrapped claims: pro-rata recovery through the dealer market.
        if let Some(mut market) = self.market.take() {
            let result = market.mature_tickets(&mut self.state, flows, commit_partial);
            self.market = Some(market);
            for ticket_default in result? {
                defaults += 1;
                self.handle_default(
                    day,
                    &ticket_default.debtor,
                    ticket_default.trigger,
                    ticket_default.outcome.shortfall(),
                )?;
            }
        }

        Ok((dues, settled, defaults))
    }

    /// Default handling: fatal under fail-fast; under expel-agent the debtor
    /// is flagged, its remaining liabilities are written off, and its future
    /// scheduled actions will be skipped.
    fn handle_default(
        &mut self,
        day: usize,
        debtor: &str,
        trigger: InstrumentId,
        shortfall: Decimal,
    ) -> Result<(), SimulationError> {
        match self.default_handling() {
            DefaultHandling::FailFast => Err(SimulationError::SettlementDefault {
                day,
                debtor: debtor.to_string(),
                obligation: trigger,
                shortfall,
            }),
            DefaultHandling::ExpelAgent => {
                if self.state.ledger().agent(debtor)?.is_defaulted() {
                    return Ok(());
                }
                info!(debtor, day, %shortfall, "agent defaulted");
                self.state.log_event(Event::AgentDefaulted {
                    day,
                    agent: debtor.to_string(),
                    trigger,
                    shortfall,
                });

                // Buckets of the debtor's outstanding tickets, captured
                // before the write-off removes them.
                let ticket_buckets: Vec<MaturityBucket> = self
                    .state
                    .ledger()
                    .liabilities_of(debtor)
                    .filter_map(Instrument::as_ticket)
                    .map(|t| t.bucket)
                    .collect();

                let write_offs = expel_debtor(self.state.ledger_mut(), debtor)?;
                for write_off in write_offs {
                    self.state.log_event(Event::LiabilityWrittenOff {
                        day,
                        agent: debtor.to_string(),
                        id: write_off.id,
                        kind: write_off.kind,
                        amount: write_off.amount,
                    });
                }

                if let Some(mut market) = self.market.take() {
                    for bucket in ticket_buckets {
                        market.record_write_off(&mut self.state, bucket);
                    }
                    self.market = Some(market);
                }

                Ok(())
            }
        }
    }

    // ========================================================================
    // Phase 5: Interbank netting
    // ========================================================================

    fn netting_phase(&mut self, day: usize, flows: &[InterbankFlow]) -> Result<(), SimulationError> {
        let outcomes = net_and_settle(self.state.ledger_mut(), flows, day)?;
        for outcome in outcomes {
            self.state.log_event(Event::NettingSettled {
                day,
                bank_a: outcome.bank_a,
                bank_b: outcome.bank_b,
                gross_ab: outcome.gross_ab,
                gross_ba: outcome.gross_ba,
                net: outcome.net,
                reserves_paid: outcome.reserves_paid,
                overnight_payable: outcome.overnight_payable,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Event helpers
    // ========================================================================

    fn log_payment_records(
        &mut self,
        day: usize,
        phase: Phase,
        records: &[PaymentRecord],
        from: &str,
        to: &str,
        obligation: Option<InstrumentId>,
    ) {
        for record in records {
            if record.amount > Decimal::ZERO {
                self.state.log_event(Event::PaymentMade {
                    day,
                    phase,
                    from: from.to_string(),
                    to: to.to_string(),
                    form: record.form,
                    amount: record.amount,
                    obligation,
                });
            }
        }
    }
}

/// Collect cross-bank deposit legs from executed payment records.
fn collect_flow_records(flows: &mut Vec<InterbankFlow>, records: &[PaymentRecord]) {
    for record in records {
        if record.form == MoneyForm::BankDeposit {
            for leg in &record.legs {
                if leg.from_issuer != leg.to_issuer {
                    flows.push(InterbankFlow {
                        from_bank: leg.from_issuer.clone(),
                        to_bank: leg.to_issuer.clone(),
                        amount: leg.amount,
                    });
                }
            }
        }
    }
}
