//! Atomic ledger mutations
//!
//! Every mutation of the ledger is expressed as a [`LedgerOp`] and applied
//! through [`Ledger::run_atomic`], which keeps an explicit journal of inverse
//! operations. If any step of a composite action fails, all prior mutations
//! in the sequence are undone before the failure is surfaced - the unit of
//! consistency for "pay then log" style actions.
//!
//! The journal is an undo list of previous records, not exception unwinding:
//! undoing replays the inverses in reverse order directly against the
//! registries.

use crate::ledger::{Ledger, LedgerError};
use crate::models::instrument::{
    DeliveryObligation, Instrument, InstrumentId, InstrumentKind, MaturityBucket, MoneyForm,
    MoneyPosition, Payable, StockLot, Ticket,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Specification for a new instrument record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NewInstrument {
    Money {
        form: MoneyForm,
        issuer: String,
        holder: String,
        amount: Decimal,
    },
    Payable {
        debtor: String,
        creditor: String,
        amount: Decimal,
        due_day: usize,
        original_maturity: usize,
    },
    Delivery {
        debtor: String,
        creditor: String,
        units: Decimal,
        due_day: usize,
    },
    StockLot {
        holder: String,
        units: Decimal,
    },
    /// Tickets are created untagged; the issuer tag is set by
    /// [`LedgerOp::SetTicketIssuer`] on first purchase.
    Ticket {
        owner: String,
        face: Decimal,
        due_day: usize,
        bucket: MaturityBucket,
        serial: u64,
        payable_id: InstrumentId,
    },
}

/// One ledger mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerOp {
    /// Move an instrument's asset-side reference between agents.
    Transfer {
        id: InstrumentId,
        from: String,
        to: String,
    },

    Create(NewInstrument),

    /// Delete an instrument, removing it from the *effective* holder's asset
    /// set and the issuer's liability set.
    Remove { id: InstrumentId },

    /// Create new money. `bank` names the issuing bank for deposit minting
    /// and must be `None` for cash and reserves (the central authority
    /// issues those).
    Mint {
        form: MoneyForm,
        bank: Option<String>,
        to: String,
        amount: Decimal,
    },

    /// Move divisible money value between two agents within one form.
    MoveValue {
        form: MoneyForm,
        from: String,
        to: String,
        amount: Decimal,
    },

    /// Move stock units between agents' lots.
    MoveUnits {
        from: String,
        to: String,
        units: Decimal,
    },

    /// Tag a ticket with its original debtor. Fails if the tag is already
    /// set: the single-issuer constraint.
    SetTicketIssuer { id: InstrumentId, issuer: String },

    /// Move a ticket to an adjacent maturity bucket.
    SetTicketBucket {
        id: InstrumentId,
        bucket: MaturityBucket,
    },

    /// Flag an agent as defaulted.
    MarkDefaulted { agent: String },
}

/// One money movement leg: which issuer's liability was debited and which
/// was credited. Cross-bank deposit legs feed the interbank netting phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveLeg {
    pub from_issuer: String,
    pub to_issuer: String,
    pub amount: Decimal,
}

/// What an applied operation reported back.
#[derive(Debug, Clone, PartialEq)]
pub enum OpReceipt {
    None,
    Created(InstrumentId),
    Moved { form: MoneyForm, legs: Vec<MoveLeg> },
}

impl OpReceipt {
    pub fn created_id(&self) -> Option<InstrumentId> {
        match self {
            OpReceipt::Created(id) => Some(*id),
            _ => None,
        }
    }
}

/// Inverse-operation journal entry.
#[derive(Debug, Clone)]
enum UndoEntry {
    /// A record was created; undo removes it.
    Created(InstrumentId),
    /// A record was mutated in place; undo restores the previous record and
    /// repairs any holder/issuer registry diff.
    Mutated(Instrument),
    /// A record was removed; undo reinserts and re-registers it.
    Removed(Instrument),
    /// An agent was newly flagged as defaulted; undo clears the flag.
    Defaulted(String),
}

impl Ledger {
    // ========================================================================
    // Public contract
    // ========================================================================

    /// Apply a sequence of mutations as one transaction.
    ///
    /// Either every operation commits, or none: on the first failure all
    /// prior mutations in the sequence are undone and the error is returned.
    ///
    /// # Example
    /// ```
    /// use creditnet_core::ledger::{Ledger, LedgerOp};
    /// use creditnet_core::models::agent::{Agent, AgentKind};
    /// use creditnet_core::models::instrument::MoneyForm;
    /// use rust_decimal::Decimal;
    ///
    /// let mut ledger = Ledger::new();
    /// ledger.add_agent(Agent::new("CB".into(), AgentKind::CentralAuthority, "CB".into())).unwrap();
    /// ledger.add_agent(Agent::new("FIRM_A".into(), AgentKind::Firm, "Firm".into())).unwrap();
    ///
    /// ledger.run_atomic(vec![LedgerOp::Mint {
    ///     form: MoneyForm::Cash,
    ///     bank: None,
    ///     to: "FIRM_A".to_string(),
    ///     amount: Decimal::from(100),
    /// }]).unwrap();
    /// assert_eq!(ledger.total_money("FIRM_A"), Decimal::from(100));
    /// ```
    pub fn run_atomic(&mut self, ops: Vec<LedgerOp>) -> Result<Vec<OpReceipt>, LedgerError> {
        let mut journal: Vec<UndoEntry> = Vec::new();
        let mut receipts = Vec::with_capacity(ops.len());

        for op in ops {
            match self.apply_op(op, &mut journal) {
                Ok(receipt) => receipts.push(receipt),
                Err(err) => {
                    self.unwind(journal);
                    return Err(err);
                }
            }
        }

        Ok(receipts)
    }

    /// Move an instrument's asset-side reference between two agents.
    ///
    /// Fails with `InvariantViolation` if the instrument is not currently
    /// held by `from` (resolved through the effective holder).
    pub fn transfer(
        &mut self,
        id: InstrumentId,
        from: &str,
        to: &str,
    ) -> Result<(), LedgerError> {
        self.run_atomic(vec![LedgerOp::Transfer {
            id,
            from: from.to_string(),
            to: to.to_string(),
        }])
        .map(|_| ())
    }

    /// Allocate a new instrument, updating both agents' registries.
    pub fn create_instrument(&mut self, spec: NewInstrument) -> Result<InstrumentId, LedgerError> {
        let receipts = self.run_atomic(vec![LedgerOp::Create(spec)])?;
        receipts
            .first()
            .and_then(OpReceipt::created_id)
            .ok_or_else(|| {
                LedgerError::InvariantViolation("create returned no instrument id".to_string())
            })
    }

    /// Delete an instrument from the ledger and both registries.
    pub fn remove_instrument(&mut self, id: InstrumentId) -> Result<(), LedgerError> {
        self.run_atomic(vec![LedgerOp::Remove { id }]).map(|_| ())
    }

    // ========================================================================
    // Operation application
    // ========================================================================

    fn apply_op(
        &mut self,
        op: LedgerOp,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        match op {
            LedgerOp::Transfer { id, from, to } => self.apply_transfer(id, &from, &to, journal),
            LedgerOp::Create(spec) => self.apply_create(spec, journal),
            LedgerOp::Remove { id } => self.apply_remove(id, journal),
            LedgerOp::Mint {
                form,
                bank,
                to,
                amount,
            } => self.apply_mint(form, bank.as_deref(), &to, amount, journal),
            LedgerOp::MoveValue {
                form,
                from,
                to,
                amount,
            } => self.apply_move_value(form, &from, &to, amount, journal),
            LedgerOp::MoveUnits { from, to, units } => {
                self.apply_move_units(&from, &to, units, journal)
            }
            LedgerOp::SetTicketIssuer { id, issuer } => {
                self.apply_set_ticket_issuer(id, &issuer, journal)
            }
            LedgerOp::SetTicketBucket { id, bucket } => {
                self.apply_set_ticket_bucket(id, bucket, journal)
            }
            LedgerOp::MarkDefaulted { agent } => self.apply_mark_defaulted(&agent, journal),
        }
    }

    fn apply_transfer(
        &mut self,
        id: InstrumentId,
        from: &str,
        to: &str,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        let instrument = self.instrument(id)?.clone();

        if instrument.holder() != from {
            return Err(LedgerError::InvariantViolation(format!(
                "transfer of {} requested by {} but effective holder is {}",
                id,
                from,
                instrument.holder()
            )));
        }
        self.agent(to)?;
        self.check_may_hold(to, instrument.kind())?;

        journal.push(UndoEntry::Mutated(instrument));

        if let Some(record) = self.instruments.get_mut(&id) {
            record.set_holder(to);
        }
        self.agent_mut(from)?.unregister_asset(id);
        self.agent_mut(to)?.register_asset(id);

        Ok(OpReceipt::None)
    }

    fn apply_create(
        &mut self,
        spec: NewInstrument,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        // Validate before any mutation.
        let (kind, holder, issuer, amount) = match &spec {
            NewInstrument::Money {
                form,
                issuer,
                holder,
                amount,
            } => (
                form.instrument_kind(),
                holder.clone(),
                Some(issuer.clone()),
                *amount,
            ),
            NewInstrument::Payable {
                debtor,
                creditor,
                amount,
                ..
            } => (
                InstrumentKind::Payable,
                creditor.clone(),
                Some(debtor.clone()),
                *amount,
            ),
            NewInstrument::Delivery {
                debtor,
                creditor,
                units,
                ..
            } => (
                InstrumentKind::DeliveryObligation,
                creditor.clone(),
                Some(debtor.clone()),
                *units,
            ),
            NewInstrument::StockLot { holder, units } => {
                (InstrumentKind::StockLot, holder.clone(), None, *units)
            }
            NewInstrument::Ticket { owner, face, .. } => {
                (InstrumentKind::Ticket, owner.clone(), None, *face)
            }
        };

        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        self.check_may_hold(&holder, kind)?;
        if let Some(issuer_id) = &issuer {
            self.check_may_issue(issuer_id, kind)?;
        }

        let id = self.allocate_id();
        let record = match spec {
            NewInstrument::Money {
                form,
                issuer,
                holder,
                amount,
            } => {
                let position = MoneyPosition {
                    id,
                    issuer,
                    holder,
                    amount,
                };
                match form {
                    MoneyForm::Cash => Instrument::Cash(position),
                    MoneyForm::BankDeposit => Instrument::BankDeposit(position),
                    MoneyForm::ReserveDeposit => Instrument::ReserveDeposit(position),
                }
            }
            NewInstrument::Payable {
                debtor,
                creditor,
                amount,
                due_day,
                original_maturity,
            } => Instrument::Payable(Payable {
                id,
                debtor,
                original_creditor: creditor,
                current_holder: None,
                amount,
                due_day,
                original_maturity,
            }),
            NewInstrument::Delivery {
                debtor,
                creditor,
                units,
                due_day,
            } => Instrument::DeliveryObligation(DeliveryObligation {
                id,
                debtor,
                creditor,
                units,
                due_day,
            }),
            NewInstrument::StockLot { holder, units } => {
                Instrument::StockLot(StockLot { id, holder, units })
            }
            NewInstrument::Ticket {
                owner,
                face,
                due_day,
                bucket,
                serial,
                payable_id,
            } => Instrument::Ticket(Ticket {
                id,
                owner,
                issuer_tag: None,
                face,
                due_day,
                bucket,
                serial,
                payable_id,
            }),
        };

        self.agent_mut(&holder)?.register_asset(id);
        if let Some(issuer_id) = &issuer {
            self.agent_mut(issuer_id)?.register_liability(id);
        }
        self.instruments.insert(id, record);
        journal.push(UndoEntry::Created(id));

        Ok(OpReceipt::Created(id))
    }

    fn apply_remove(
        &mut self,
        id: InstrumentId,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        let instrument = self.instrument(id)?.clone();

        // Resolve the *effective* holder, not the original creditor: a claim
        // sold in the secondary market must come out of the buyer's registry.
        let holder = instrument.holder().to_string();
        let issuer = instrument.issuer().map(|s| s.to_string());

        self.agent_mut(&holder)?.unregister_asset(id);
        if let Some(issuer_id) = &issuer {
            self.agent_mut(issuer_id)?.unregister_liability(id);
        }
        self.instruments.remove(&id);
        journal.push(UndoEntry::Removed(instrument));

        Ok(OpReceipt::None)
    }

    fn apply_mint(
        &mut self,
        form: MoneyForm,
        bank: Option<&str>,
        to: &str,
        amount: Decimal,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }

        let issuer = match (form, bank) {
            (MoneyForm::BankDeposit, Some(bank_id)) => bank_id.to_string(),
            (MoneyForm::BankDeposit, None) => {
                return Err(LedgerError::InvariantViolation(
                    "deposit minting requires an issuing bank".to_string(),
                ))
            }
            (_, Some(_)) => {
                return Err(LedgerError::InvariantViolation(
                    "only deposit minting names a bank".to_string(),
                ))
            }
            (_, None) => self.central_authority()?.id().to_string(),
        };

        // Top up an existing position if one exists for this (form, issuer).
        let existing = self
            .holdings_of(to)
            .filter(|i| i.money_form() == Some(form))
            .filter_map(Instrument::as_money)
            .find(|m| m.issuer == issuer)
            .map(|m| m.id);

        match existing {
            Some(id) => {
                let record = self.instrument(id)?.clone();
                journal.push(UndoEntry::Mutated(record));
                if let Some(m) = self.instruments.get_mut(&id).and_then(money_mut) {
                    m.amount += amount;
                }
                Ok(OpReceipt::None)
            }
            None => self.apply_create(
                NewInstrument::Money {
                    form,
                    issuer,
                    holder: to.to_string(),
                    amount,
                },
                journal,
            ),
        }
    }

    fn apply_move_value(
        &mut self,
        form: MoneyForm,
        from: &str,
        to: &str,
        amount: Decimal,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        if from == to {
            return Err(LedgerError::InvariantViolation(format!(
                "money movement from {} to itself",
                from
            )));
        }
        self.agent(from)?;
        self.agent(to)?;
        self.check_may_hold(to, form.instrument_kind())?;

        let available = self.money_balance(from, form);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                agent: from.to_string(),
                form,
                required: amount,
                available,
            });
        }

        // Debit side: drain positions in ascending id order.
        let debit_positions: Vec<(InstrumentId, String, Decimal)> = self
            .holdings_of(from)
            .filter(|i| i.money_form() == Some(form))
            .filter_map(|i| i.as_money().map(|m| (m.id, m.issuer.clone(), m.amount)))
            .filter(|(_, _, balance)| *balance > Decimal::ZERO)
            .collect();

        // Credit side: the receiver's first existing position of this form,
        // else a fresh position issued by the first debited issuer (deposits)
        // or the central authority (cash/reserves).
        let credit_target = self
            .holdings_of(to)
            .filter(|i| i.money_form() == Some(form))
            .filter_map(|i| i.as_money().map(|m| (m.id, m.issuer.clone())))
            .next();

        let (credit_id, credit_issuer, credit_created) = match credit_target {
            Some((id, issuer)) => (id, issuer, false),
            None => {
                let issuer = match form {
                    MoneyForm::BankDeposit => debit_positions
                        .first()
                        .map(|(_, issuer, _)| issuer.clone())
                        .ok_or_else(|| LedgerError::InsufficientFunds {
                            agent: from.to_string(),
                            form,
                            required: amount,
                            available: Decimal::ZERO,
                        })?,
                    _ => self.central_authority()?.id().to_string(),
                };
                let receipt = self.apply_create(
                    NewInstrument::Money {
                        form,
                        issuer: issuer.clone(),
                        holder: to.to_string(),
                        // Placeholder balance; the real amount lands below.
                        amount,
                    },
                    journal,
                )?;
                let id = receipt.created_id().ok_or_else(|| {
                    LedgerError::InvariantViolation("money creation returned no id".to_string())
                })?;
                // Start from zero; credits are applied leg by leg.
                if let Some(record) = self.instruments.get_mut(&id) {
                    if let Some(m) = money_mut(record) {
                        m.amount = Decimal::ZERO;
                    }
                }
                (id, issuer, true)
            }
        };

        if !credit_created {
            let record = self.instrument(credit_id)?.clone();
            journal.push(UndoEntry::Mutated(record));
        }

        let mut remaining = amount;
        let mut legs = Vec::new();
        for (debit_id, debit_issuer, balance) in debit_positions {
            if remaining == Decimal::ZERO {
                break;
            }
            let take = remaining.min(balance);

            let record = self.instrument(debit_id)?.clone();
            journal.push(UndoEntry::Mutated(record));
            if let Some(m) = self.instruments.get_mut(&debit_id).and_then(money_mut) {
                m.amount -= take;
            }
            if let Some(m) = self.instruments.get_mut(&credit_id).and_then(money_mut) {
                m.amount += take;
            }

            legs.push(MoveLeg {
                from_issuer: debit_issuer,
                to_issuer: credit_issuer.clone(),
                amount: take,
            });
            remaining -= take;
        }

        Ok(OpReceipt::Moved { form, legs })
    }

    fn apply_move_units(
        &mut self,
        from: &str,
        to: &str,
        units: Decimal,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        if units <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount(units));
        }
        self.agent(from)?;
        self.agent(to)?;
        self.check_may_hold(to, InstrumentKind::StockLot)?;

        let lots: Vec<(InstrumentId, Decimal)> = self
            .holdings_of(from)
            .filter_map(|i| match i {
                Instrument::StockLot(s) if s.units > Decimal::ZERO => Some((s.id, s.units)),
                _ => None,
            })
            .collect();
        let available: Decimal = lots.iter().map(|(_, units)| *units).sum();
        if available < units {
            return Err(LedgerError::InvariantViolation(format!(
                "stock shortfall for {}: required {}, available {}",
                from, units, available
            )));
        }

        let credit_lot = self
            .holdings_of(to)
            .filter_map(|i| match i {
                Instrument::StockLot(s) => Some(s.id),
                _ => None,
            })
            .next();
        let credit_id = match credit_lot {
            Some(id) => {
                let record = self.instrument(id)?.clone();
                journal.push(UndoEntry::Mutated(record));
                id
            }
            None => {
                let receipt = self.apply_create(
                    NewInstrument::StockLot {
                        holder: to.to_string(),
                        units,
                    },
                    journal,
                )?;
                let id = receipt.created_id().ok_or_else(|| {
                    LedgerError::InvariantViolation("stock creation returned no id".to_string())
                })?;
                if let Some(Instrument::StockLot(s)) = self.instruments.get_mut(&id) {
                    s.units = Decimal::ZERO;
                }
                id
            }
        };

        let mut remaining = units;
        for (lot_id, balance) in lots {
            if remaining == Decimal::ZERO {
                break;
            }
            let take = remaining.min(balance);
            let record = self.instrument(lot_id)?.clone();
            journal.push(UndoEntry::Mutated(record));
            if let Some(Instrument::StockLot(s)) = self.instruments.get_mut(&lot_id) {
                s.units -= take;
            }
            if let Some(Instrument::StockLot(s)) = self.instruments.get_mut(&credit_id) {
                s.units += take;
            }
            remaining -= take;
        }

        Ok(OpReceipt::None)
    }

    fn apply_set_ticket_issuer(
        &mut self,
        id: InstrumentId,
        issuer: &str,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        let instrument = self.instrument(id)?.clone();
        let ticket = match &instrument {
            Instrument::Ticket(t) => t,
            _ => {
                return Err(LedgerError::InvariantViolation(format!(
                    "{} is not a ticket",
                    id
                )))
            }
        };
        if ticket.issuer_tag.is_some() {
            return Err(LedgerError::TicketIssuerFixed(id));
        }
        self.check_may_issue(issuer, InstrumentKind::Ticket)?;

        journal.push(UndoEntry::Mutated(instrument.clone()));
        if let Some(Instrument::Ticket(t)) = self.instruments.get_mut(&id) {
            t.issuer_tag = Some(issuer.to_string());
        }
        self.agent_mut(issuer)?.register_liability(id);

        Ok(OpReceipt::None)
    }

    fn apply_set_ticket_bucket(
        &mut self,
        id: InstrumentId,
        bucket: MaturityBucket,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        let instrument = self.instrument(id)?.clone();
        if !matches!(instrument, Instrument::Ticket(_)) {
            return Err(LedgerError::InvariantViolation(format!(
                "{} is not a ticket",
                id
            )));
        }

        journal.push(UndoEntry::Mutated(instrument));
        if let Some(Instrument::Ticket(t)) = self.instruments.get_mut(&id) {
            t.bucket = bucket;
        }

        Ok(OpReceipt::None)
    }

    fn apply_mark_defaulted(
        &mut self,
        agent_id: &str,
        journal: &mut Vec<UndoEntry>,
    ) -> Result<OpReceipt, LedgerError> {
        let agent = self.agent(agent_id)?;
        if !agent.is_defaulted() {
            journal.push(UndoEntry::Defaulted(agent_id.to_string()));
            self.mark_defaulted(agent_id)?;
        }
        Ok(OpReceipt::None)
    }

    // ========================================================================
    // Unwind
    // ========================================================================

    /// Replay the journal's inverses in reverse order.
    ///
    /// Must not fail: agents are never destroyed, and every entry restores a
    /// record this ledger held moments ago.
    fn unwind(&mut self, journal: Vec<UndoEntry>) {
        for entry in journal.into_iter().rev() {
            match entry {
                UndoEntry::Created(id) => {
                    if let Some(instrument) = self.instruments.remove(&id) {
                        let holder = instrument.holder().to_string();
                        if let Ok(agent) = self.agent_mut(&holder) {
                            agent.unregister_asset(id);
                        }
                        if let Some(issuer) = instrument.issuer().map(|s| s.to_string()) {
                            if let Ok(agent) = self.agent_mut(&issuer) {
                                agent.unregister_liability(id);
                            }
                        }
                    }
                }
                UndoEntry::Mutated(prev) => {
                    let id = prev.id();
                    let current = self.instruments.remove(&id);
                    if let Some(current) = current {
                        if current.holder() != prev.holder() {
                            let current_holder = current.holder().to_string();
                            let prev_holder = prev.holder().to_string();
                            if let Ok(agent) = self.agent_mut(&current_holder) {
                                agent.unregister_asset(id);
                            }
                            if let Ok(agent) = self.agent_mut(&prev_holder) {
                                agent.register_asset(id);
                            }
                        }
                        if current.issuer() != prev.issuer() {
                            if let Some(issuer) = current.issuer().map(|s| s.to_string()) {
                                if let Ok(agent) = self.agent_mut(&issuer) {
                                    agent.unregister_liability(id);
                                }
                            }
                            if let Some(issuer) = prev.issuer().map(|s| s.to_string()) {
                                if let Ok(agent) = self.agent_mut(&issuer) {
                                    agent.register_liability(id);
                                }
                            }
                        }
                    }
                    self.instruments.insert(id, prev);
                }
                UndoEntry::Removed(instrument) => {
                    let id = instrument.id();
                    let holder = instrument.holder().to_string();
                    let issuer = instrument.issuer().map(|s| s.to_string());
                    if let Ok(agent) = self.agent_mut(&holder) {
                        agent.register_asset(id);
                    }
                    if let Some(issuer_id) = issuer {
                        if let Ok(agent) = self.agent_mut(&issuer_id) {
                            agent.register_liability(id);
                        }
                    }
                    self.instruments.insert(id, instrument);
                }
                UndoEntry::Defaulted(agent_id) => {
                    if let Ok(agent) = self.agent_mut(&agent_id) {
                        agent.clear_defaulted();
                    }
                }
            }
        }
    }
}

fn money_mut(instrument: &mut Instrument) -> Option<&mut MoneyPosition> {
    match instrument {
        Instrument::Cash(m) | Instrument::BankDeposit(m) | Instrument::ReserveDeposit(m) => {
            Some(m)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::agent::{Agent, AgentKind};
    use rust_decimal_macros::dec;

    fn base_ledger() -> Ledger {
        let mut ledger = Ledger::new();
        for (id, kind) in [
            ("CB", AgentKind::CentralAuthority),
            ("BANK_A", AgentKind::Bank),
            ("BANK_B", AgentKind::Bank),
            ("FIRM_A", AgentKind::Firm),
            ("FIRM_B", AgentKind::Firm),
        ] {
            ledger
                .add_agent(Agent::new(id.to_string(), kind, id.to_string()))
                .unwrap();
        }
        ledger
    }

    #[test]
    fn mint_then_move_value() {
        let mut ledger = base_ledger();
        ledger
            .run_atomic(vec![LedgerOp::Mint {
                form: MoneyForm::Cash,
                bank: None,
                to: "FIRM_A".to_string(),
                amount: dec!(300),
            }])
            .unwrap();

        let receipts = ledger
            .run_atomic(vec![LedgerOp::MoveValue {
                form: MoneyForm::Cash,
                from: "FIRM_A".to_string(),
                to: "FIRM_B".to_string(),
                amount: dec!(120),
            }])
            .unwrap();

        assert_eq!(ledger.total_money("FIRM_A"), dec!(180));
        assert_eq!(ledger.total_money("FIRM_B"), dec!(120));
        match &receipts[0] {
            OpReceipt::Moved { form, legs } => {
                assert_eq!(*form, MoneyForm::Cash);
                assert_eq!(legs.len(), 1);
                assert_eq!(legs[0].amount, dec!(120));
            }
            other => panic!("unexpected receipt {:?}", other),
        }
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn move_value_insufficient_funds() {
        let mut ledger = base_ledger();
        ledger
            .run_atomic(vec![LedgerOp::Mint {
                form: MoneyForm::Cash,
                bank: None,
                to: "FIRM_A".to_string(),
                amount: dec!(50),
            }])
            .unwrap();

        let err = ledger
            .run_atomic(vec![LedgerOp::MoveValue {
                form: MoneyForm::Cash,
                from: "FIRM_A".to_string(),
                to: "FIRM_B".to_string(),
                amount: dec!(100),
            }])
            .unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(ledger.total_money("FIRM_A"), dec!(50));
        assert_eq!(ledger.total_money("FIRM_B"), dec!(0));
    }

    #[test]
    fn failed_sequence_rolls_back_entirely() {
        let mut ledger = base_ledger();
        ledger
            .run_atomic(vec![LedgerOp::Mint {
                form: MoneyForm::Cash,
                bank: None,
                to: "FIRM_A".to_string(),
                amount: dec!(300),
            }])
            .unwrap();

        // Second op fails (unknown agent); the first must be undone.
        let err = ledger
            .run_atomic(vec![
                LedgerOp::MoveValue {
                    form: MoneyForm::Cash,
                    from: "FIRM_A".to_string(),
                    to: "FIRM_B".to_string(),
                    amount: dec!(200),
                },
                LedgerOp::MarkDefaulted {
                    agent: "NOBODY".to_string(),
                },
            ])
            .unwrap_err();

        assert!(matches!(err, LedgerError::UnknownAgent(_)));
        assert_eq!(ledger.total_money("FIRM_A"), dec!(300));
        assert_eq!(ledger.total_money("FIRM_B"), dec!(0));
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn transfer_requires_effective_holder() {
        let mut ledger = base_ledger();
        let payable = ledger
            .create_instrument(NewInstrument::Payable {
                debtor: "FIRM_A".to_string(),
                creditor: "FIRM_B".to_string(),
                amount: dec!(300),
                due_day: 5,
                original_maturity: 5,
            })
            .unwrap();

        // FIRM_A is the debtor, not the holder.
        let err = ledger.transfer(payable, "FIRM_A", "BANK_A").unwrap_err();
        assert!(matches!(err, LedgerError::InvariantViolation(_)));

        ledger.transfer(payable, "FIRM_B", "BANK_A").unwrap();
        let record = ledger.instrument(payable).unwrap();
        assert_eq!(record.holder(), "BANK_A");
        assert_eq!(
            record.as_payable().unwrap().original_creditor,
            "FIRM_B".to_string()
        );
        assert!(!ledger.agent("FIRM_B").unwrap().holds_asset(payable));
        assert!(ledger.agent("BANK_A").unwrap().holds_asset(payable));
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn remove_resolves_effective_holder() {
        let mut ledger = base_ledger();
        let payable = ledger
            .create_instrument(NewInstrument::Payable {
                debtor: "FIRM_A".to_string(),
                creditor: "FIRM_B".to_string(),
                amount: dec!(100),
                due_day: 2,
                original_maturity: 2,
            })
            .unwrap();
        ledger.transfer(payable, "FIRM_B", "BANK_A").unwrap();

        ledger.remove_instrument(payable).unwrap();

        // Gone from the *current* holder and the debtor; the original
        // creditor's registry was already clean.
        assert!(!ledger.agent("BANK_A").unwrap().holds_asset(payable));
        assert!(!ledger
            .agent("FIRM_A")
            .unwrap()
            .liabilities()
            .contains(&payable));
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn ticket_issuer_set_at_most_once() {
        let mut ledger = base_ledger();
        ledger
            .add_agent(Agent::new(
                "DEALER_SHORT".to_string(),
                AgentKind::Dealer,
                "Dealer".to_string(),
            ))
            .unwrap();

        let payable = ledger
            .create_instrument(NewInstrument::Payable {
                debtor: "FIRM_A".to_string(),
                creditor: "FIRM_B".to_string(),
                amount: dec!(100),
                due_day: 4,
                original_maturity: 4,
            })
            .unwrap();
        let ticket = ledger
            .create_instrument(NewInstrument::Ticket {
                owner: "DEALER_SHORT".to_string(),
                face: dec!(100),
                due_day: 4,
                bucket: MaturityBucket::Short,
                serial: 1,
                payable_id: payable,
            })
            .unwrap();

        ledger
            .run_atomic(vec![LedgerOp::SetTicketIssuer {
                id: ticket,
                issuer: "FIRM_A".to_string(),
            }])
            .unwrap();

        let err = ledger
            .run_atomic(vec![LedgerOp::SetTicketIssuer {
                id: ticket,
                issuer: "FIRM_B".to_string(),
            }])
            .unwrap_err();
        assert_eq!(err, LedgerError::TicketIssuerFixed(ticket));

        let record = ledger.instrument(ticket).unwrap();
        assert_eq!(record.as_ticket().unwrap().issuer_tag.as_deref(), Some("FIRM_A"));
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn mark_defaulted_is_undone_on_failure() {
        let mut ledger = base_ledger();
        let err = ledger
            .run_atomic(vec![
                LedgerOp::MarkDefaulted {
                    agent: "FIRM_A".to_string(),
                },
                LedgerOp::Remove {
                    id: InstrumentId(999),
                },
            ])
            .unwrap_err();

        assert!(matches!(err, LedgerError::UnknownInstrument(_)));
        assert!(!ledger.agent("FIRM_A").unwrap().is_defaulted());
    }
}
