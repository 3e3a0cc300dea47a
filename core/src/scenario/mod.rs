//! Scenario description and validation
//!
//! The structured contract between the scenario loader and the settlement
//! engine: the agent list, the day-keyed ordered list of scheduled actions,
//! and the run configuration. Everything here is plain serde data; loading
//! the file itself is the CLI's job.
//!
//! Validation runs before the simulation starts. A malformed scenario -
//! unknown agent, capability violation, bad amounts or days - surfaces as a
//! fatal [`ConfigurationError`], never as a mid-run failure.

use crate::ledger::{CheckMode, Ledger};
use crate::models::agent::{Agent, AgentKind};
use crate::models::capability;
use crate::models::instrument::{InstrumentKind, MoneyForm};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Fatal pre-run configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("duplicate agent id: {0}")]
    DuplicateAgent(String),

    #[error("scenario declares no central authority")]
    NoCentralAuthority,

    #[error("scenario declares more than one central authority")]
    MultipleCentralAuthorities,

    #[error("agent {agent} has reserved kind {kind}; market makers are created by the dealer market")]
    ReservedKind { agent: String, kind: AgentKind },

    #[error("action {index}: unknown agent {agent}")]
    UnknownAgent { index: usize, agent: String },

    #[error("action {index}: agent kind {agent_kind} may not {role} {instrument_kind:?}")]
    CapabilityViolation {
        index: usize,
        agent_kind: AgentKind,
        instrument_kind: InstrumentKind,
        role: &'static str,
    },

    #[error("action {index}: amount must be positive, got {amount}")]
    NonPositiveAmount { index: usize, amount: Decimal },

    #[error("action {index}: due day {due_day} is before schedule day {day}")]
    DueBeforeSchedule {
        index: usize,
        day: usize,
        due_day: usize,
    },

    #[error("action {index}: reserve transfers are bank-to-bank only")]
    ReserveTransferNotBankToBank { index: usize },

    #[error("invalid run configuration: {0}")]
    InvalidRun(String),

    #[error("invalid dealer-market configuration: {0}")]
    InvalidMarket(String),
}

/// One agent declared by the scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub kind: AgentKind,
    pub display_name: String,
}

/// One scheduled ledger action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionOp {
    /// Mint cash to an agent (new central-authority money).
    MintCash { to: String, amount: Decimal },

    /// Mint reserves to a bank.
    MintReserves { to: String, amount: Decimal },

    /// A bank opens (or tops up) a deposit account for an agent.
    OpenDeposit {
        bank: String,
        owner: String,
        amount: Decimal,
    },

    /// Create a payable: `debtor` owes `creditor` `amount` due on `due_day`.
    CreatePayable {
        debtor: String,
        creditor: String,
        amount: Decimal,
        due_day: usize,
    },

    /// Create a delivery obligation for stock units.
    CreateDelivery {
        debtor: String,
        creditor: String,
        units: Decimal,
        due_day: usize,
    },

    /// Grant a stock lot to an agent.
    GrantStock { to: String, units: Decimal },

    /// Immediate payment using the ranked means of payment.
    Pay {
        from: String,
        to: String,
        amount: Decimal,
    },

    /// Move money value in one specific form.
    TransferMoney {
        form: MoneyForm,
        from: String,
        to: String,
        amount: Decimal,
    },
}

impl ActionOp {
    /// Agents referenced by this action, for existence and default checks.
    pub fn agents(&self) -> Vec<&str> {
        match self {
            ActionOp::MintCash { to, .. }
            | ActionOp::MintReserves { to, .. }
            | ActionOp::GrantStock { to, .. } => vec![to],
            ActionOp::OpenDeposit { bank, owner, .. } => vec![bank, owner],
            ActionOp::CreatePayable {
                debtor, creditor, ..
            }
            | ActionOp::CreateDelivery {
                debtor, creditor, ..
            } => vec![debtor, creditor],
            ActionOp::Pay { from, to, .. } | ActionOp::TransferMoney { from, to, .. } => {
                vec![from, to]
            }
        }
    }
}

/// A scheduled action keyed by the day it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub day: usize,
    pub op: ActionOp,
}

/// Stopping rule for the day loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopMode {
    /// Run exactly `max_days` days.
    FixedDays,
    /// Stop once this many consecutive quiet days accumulate (or `max_days`
    /// is reached, whichever comes first).
    RunUntilQuiet { quiet_threshold: usize },
}

/// Default-handling policy: the one error category that is an experiment
/// parameter rather than fixed behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultHandling {
    /// Any default is a critical failure; the run aborts.
    FailFast,
    /// Mark the debtor defaulted, write off its liabilities, keep simulating.
    ExpelAgent,
}

/// Dealer-market configuration (secondary market disabled when absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Remaining maturity (days) at or below which a claim is Short.
    pub short_max_days: usize,
    /// Remaining maturity at or below which a claim is Mid; beyond is Long.
    pub mid_max_days: usize,

    /// Dealer starting cash per bucket. Minted as new money at market setup,
    /// never taken from the traded population.
    pub dealer_cash: Decimal,
    /// Dealer inventory capacity per bucket, in face value.
    pub dealer_capacity: Decimal,
    /// Outside-provider starting cash per bucket (the unbounded backstop;
    /// sized far above any plausible flow).
    pub provider_cash: Decimal,

    /// Outside anchor starting midpoint (price per unit face).
    pub initial_mid: Decimal,
    /// Outside anchor starting spread.
    pub initial_spread: Decimal,
    /// Fraction of the outside half-spread the dealer quotes inside at zero
    /// inventory.
    pub spread_share: Decimal,
    /// Inventory-utilization skew gain.
    pub skew_gain: Decimal,
    /// Blend weight of realized recovery into the anchor update.
    pub anchor_blend: Decimal,

    /// Projection horizon (days) for seller shortfall / buyer surplus.
    pub lookahead_days: usize,
    /// Buy-side rounds may be globally disabled as a policy.
    pub buy_side_enabled: bool,
    /// Cash cushion a buyer keeps before investing in tickets.
    pub buyer_cash_buffer: Decimal,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            short_max_days: 2,
            mid_max_days: 5,
            dealer_cash: Decimal::from(10_000),
            dealer_capacity: Decimal::from(10_000),
            provider_cash: Decimal::from(1_000_000_000u64),
            initial_mid: Decimal::new(97, 2),      // 0.97
            initial_spread: Decimal::new(6, 2),    // 0.06
            spread_share: Decimal::new(5, 1),      // 0.5
            skew_gain: Decimal::new(5, 1),         // 0.5
            anchor_blend: Decimal::new(5, 1),      // 0.5
            lookahead_days: 2,
            buy_side_enabled: false,
            buyer_cash_buffer: Decimal::ZERO,
        }
    }
}

/// Run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub stop_mode: StopMode,
    pub max_days: usize,
    pub default_handling: DefaultHandling,
    pub check_mode: CheckMode,
    pub market: Option<MarketConfig>,
}

/// Complete scenario description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub agents: Vec<AgentSpec>,
    pub actions: Vec<ScheduledAction>,
    pub config: RunConfig,
}

impl Scenario {
    /// Actions scheduled for one day, in listed order, with their original
    /// indices (used in skip logging).
    pub fn actions_for_day(&self, day: usize) -> Vec<(usize, &ActionOp)> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, action)| action.day == day)
            .map(|(index, action)| (index, &action.op))
            .collect()
    }
}

/// Validate the scenario and surface the first problem found.
pub fn validate(scenario: &Scenario) -> Result<(), ConfigurationError> {
    if scenario.config.max_days == 0 {
        return Err(ConfigurationError::InvalidRun(
            "max_days must be > 0".to_string(),
        ));
    }
    if let StopMode::RunUntilQuiet { quiet_threshold } = scenario.config.stop_mode {
        if quiet_threshold == 0 {
            return Err(ConfigurationError::InvalidRun(
                "quiet_threshold must be > 0".to_string(),
            ));
        }
    }

    // Agents: unique ids, exactly one central authority, no reserved kinds.
    let mut kinds: BTreeMap<&str, AgentKind> = BTreeMap::new();
    let mut central_count = 0usize;
    for spec in &scenario.agents {
        if kinds.insert(&spec.id, spec.kind).is_some() {
            return Err(ConfigurationError::DuplicateAgent(spec.id.clone()));
        }
        if spec.kind.is_market_maker() {
            return Err(ConfigurationError::ReservedKind {
                agent: spec.id.clone(),
                kind: spec.kind,
            });
        }
        if spec.kind == AgentKind::CentralAuthority {
            central_count += 1;
        }
    }
    match central_count {
        0 => return Err(ConfigurationError::NoCentralAuthority),
        1 => {}
        _ => return Err(ConfigurationError::MultipleCentralAuthorities),
    }

    for (index, action) in scenario.actions.iter().enumerate() {
        validate_action(index, action, &kinds)?;
    }

    if let Some(market) = &scenario.config.market {
        validate_market(market)?;
    }

    Ok(())
}

fn validate_action(
    index: usize,
    action: &ScheduledAction,
    kinds: &BTreeMap<&str, AgentKind>,
) -> Result<(), ConfigurationError> {
    let kind_of = |agent: &str| -> Result<AgentKind, ConfigurationError> {
        kinds
            .get(agent)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownAgent {
                index,
                agent: agent.to_string(),
            })
    };
    let positive = |amount: Decimal| -> Result<(), ConfigurationError> {
        if amount <= Decimal::ZERO {
            Err(ConfigurationError::NonPositiveAmount { index, amount })
        } else {
            Ok(())
        }
    };
    let capability = |agent_kind: AgentKind,
                      instrument_kind: InstrumentKind,
                      role: &'static str,
                      ok: bool|
     -> Result<(), ConfigurationError> {
        if ok {
            Ok(())
        } else {
            Err(ConfigurationError::CapabilityViolation {
                index,
                agent_kind,
                instrument_kind,
                role,
            })
        }
    };

    for agent in action.op.agents() {
        kind_of(agent)?;
    }

    match &action.op {
        ActionOp::MintCash { to, amount } => {
            positive(*amount)?;
            let kind = kind_of(to)?;
            capability(
                kind,
                InstrumentKind::Cash,
                "hold",
                capability::may_hold(kind, InstrumentKind::Cash),
            )?;
        }
        ActionOp::MintReserves { to, amount } => {
            positive(*amount)?;
            let kind = kind_of(to)?;
            capability(
                kind,
                InstrumentKind::ReserveDeposit,
                "hold",
                capability::may_hold(kind, InstrumentKind::ReserveDeposit),
            )?;
        }
        ActionOp::OpenDeposit {
            bank,
            owner,
            amount,
        } => {
            positive(*amount)?;
            let bank_kind = kind_of(bank)?;
            let owner_kind = kind_of(owner)?;
            capability(
                bank_kind,
                InstrumentKind::BankDeposit,
                "issue",
                capability::may_issue(bank_kind, InstrumentKind::BankDeposit),
            )?;
            capability(
                owner_kind,
                InstrumentKind::BankDeposit,
                "hold",
                capability::may_hold(owner_kind, InstrumentKind::BankDeposit),
            )?;
        }
        ActionOp::CreatePayable {
            debtor,
            creditor,
            amount,
            due_day,
        } => {
            positive(*amount)?;
            if *due_day < action.day {
                return Err(ConfigurationError::DueBeforeSchedule {
                    index,
                    day: action.day,
                    due_day: *due_day,
                });
            }
            let debtor_kind = kind_of(debtor)?;
            let creditor_kind = kind_of(creditor)?;
            capability(
                debtor_kind,
                InstrumentKind::Payable,
                "issue",
                capability::may_issue(debtor_kind, InstrumentKind::Payable),
            )?;
            capability(
                creditor_kind,
                InstrumentKind::Payable,
                "hold",
                capability::may_hold(creditor_kind, InstrumentKind::Payable),
            )?;
        }
        ActionOp::CreateDelivery {
            debtor,
            creditor,
            units,
            due_day,
        } => {
            positive(*units)?;
            if *due_day < action.day {
                return Err(ConfigurationError::DueBeforeSchedule {
                    index,
                    day: action.day,
                    due_day: *due_day,
                });
            }
            let debtor_kind = kind_of(debtor)?;
            let creditor_kind = kind_of(creditor)?;
            capability(
                debtor_kind,
                InstrumentKind::DeliveryObligation,
                "issue",
                capability::may_issue(debtor_kind, InstrumentKind::DeliveryObligation),
            )?;
            capability(
                creditor_kind,
                InstrumentKind::DeliveryObligation,
                "hold",
                capability::may_hold(creditor_kind, InstrumentKind::DeliveryObligation),
            )?;
        }
        ActionOp::GrantStock { to, units } => {
            positive(*units)?;
            let kind = kind_of(to)?;
            capability(
                kind,
                InstrumentKind::StockLot,
                "hold",
                capability::may_hold(kind, InstrumentKind::StockLot),
            )?;
        }
        ActionOp::Pay { amount, .. } => {
            positive(*amount)?;
        }
        ActionOp::TransferMoney {
            form,
            from,
            to,
            amount,
        } => {
            positive(*amount)?;
            if *form == MoneyForm::ReserveDeposit {
                let from_kind = kind_of(from)?;
                let to_kind = kind_of(to)?;
                if from_kind != AgentKind::Bank || to_kind != AgentKind::Bank {
                    return Err(ConfigurationError::ReserveTransferNotBankToBank { index });
                }
            }
        }
    }

    Ok(())
}

fn validate_market(market: &MarketConfig) -> Result<(), ConfigurationError> {
    if market.short_max_days == 0 || market.mid_max_days <= market.short_max_days {
        return Err(ConfigurationError::InvalidMarket(
            "bucket boundaries must be increasing and positive".to_string(),
        ));
    }
    for (name, value) in [
        ("dealer_cash", market.dealer_cash),
        ("dealer_capacity", market.dealer_capacity),
        ("provider_cash", market.provider_cash),
        ("initial_mid", market.initial_mid),
        ("initial_spread", market.initial_spread),
    ] {
        if value <= Decimal::ZERO {
            return Err(ConfigurationError::InvalidMarket(format!(
                "{} must be positive",
                name
            )));
        }
    }
    for (name, value) in [
        ("spread_share", market.spread_share),
        ("skew_gain", market.skew_gain),
        ("anchor_blend", market.anchor_blend),
    ] {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(ConfigurationError::InvalidMarket(format!(
                "{} must lie in [0, 1]",
                name
            )));
        }
    }
    if market.initial_mid > Decimal::ONE {
        return Err(ConfigurationError::InvalidMarket(
            "initial_mid must not exceed par".to_string(),
        ));
    }
    if market.lookahead_days == 0 {
        return Err(ConfigurationError::InvalidMarket(
            "lookahead_days must be > 0".to_string(),
        ));
    }
    Ok(())
}

/// Build the initial ledger: agents only. Scheduled actions - including the
/// day-0 setup actions - run through the engine's day loop.
pub fn build_ledger(scenario: &Scenario) -> Result<Ledger, ConfigurationError> {
    let mut ledger = Ledger::new();
    for spec in &scenario.agents {
        ledger
            .add_agent(Agent::new(
                spec.id.clone(),
                spec.kind,
                spec.display_name.clone(),
            ))
            .map_err(|_| ConfigurationError::DuplicateAgent(spec.id.clone()))?;
    }
    Ok(ledger)
}
