//! Dealer market
//!
//! Bucketed market-maker subsystem providing secondary-market liquidity for
//! maturing claims: a debtor holding a not-yet-due receivable can convert it
//! to cash before its own obligation falls due, reducing liquidity-timing
//! defaults without creating new debt.
//!
//! Each maturity bucket has one dealer (bounded capacity and cash) and one
//! outside liquidity provider (unbounded backstop). All instrument transfers
//! go through the ledger's atomic operations; this module owns only pricing
//! parameters and bucket wiring.
//!
//! # Capital model
//!
//! Dealer and provider starting capital is *new* money minted at market
//! setup, never capital stripped from the traded population - funding the
//! market makers out of traders' own claims would shrink the very liquidity
//! the market is meant to supplement.

pub mod pricing;

pub use pricing::{dealer_quote, OutsideAnchor, Quote};

use crate::ledger::{Ledger, LedgerError, LedgerOp, NewInstrument, OpReceipt};
use crate::models::agent::{Agent, AgentKind};
use crate::models::event::{Event, Phase};
use crate::models::instrument::{InstrumentId, MaturityBucket, MoneyForm, Payable, Ticket};
use crate::models::state::SimulationState;
use crate::scenario::MarketConfig;
use crate::settlement::{plan_ranked_payment, InterbankFlow, SettlementOutcome};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why a trade could not execute inside the dealer. Internal only: the trade
/// automatically passes through to the outside provider and the caller never
/// sees an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TradeInfeasible {
    CapacityExhausted,
    DealerCashShort,
    NoInventory,
    AskPinned,
}

/// One bucket's market-maker wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketBook {
    pub bucket: MaturityBucket,
    pub dealer_id: String,
    pub provider_id: String,
    pub anchor: OutsideAnchor,
    pub quote: Quote,
}

/// A wrapped obligation that did not settle in full at ticket maturity;
/// handed back to the engine for default handling.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketDefault {
    pub debtor: String,
    pub trigger: InstrumentId,
    pub outcome: SettlementOutcome,
}

/// The secondary market: three maturity buckets, each with a dealer and an
/// outside liquidity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealerMarket {
    config: MarketConfig,
    books: Vec<BucketBook>,
    next_serial: u64,
}

impl DealerMarket {
    /// Create the market-maker agents and mint their starting capital.
    ///
    /// Capital is new central-authority cash; the traded population's cash
    /// and claims are untouched.
    pub fn setup(
        state: &mut SimulationState,
        config: MarketConfig,
    ) -> Result<Self, LedgerError> {
        let day = state.day();
        let mut books = Vec::with_capacity(MaturityBucket::ALL.len());

        for bucket in MaturityBucket::ALL {
            let dealer_id = format!("DEALER_{}", bucket.label().to_uppercase());
            let provider_id = format!("OLP_{}", bucket.label().to_uppercase());

            state.ledger_mut().add_agent(Agent::new(
                dealer_id.clone(),
                AgentKind::Dealer,
                format!("Dealer ({})", bucket),
            ))?;
            state.ledger_mut().add_agent(Agent::new(
                provider_id.clone(),
                AgentKind::OutsideProvider,
                format!("Outside provider ({})", bucket),
            ))?;

            for (agent, amount) in [
                (&dealer_id, config.dealer_cash),
                (&provider_id, config.provider_cash),
            ] {
                state.ledger_mut().run_atomic(vec![LedgerOp::Mint {
                    form: MoneyForm::Cash,
                    bank: None,
                    to: agent.clone(),
                    amount,
                }])?;
                state.log_event(Event::Minted {
                    day,
                    phase: Phase::ScheduledActions,
                    form: MoneyForm::Cash,
                    to: agent.clone(),
                    amount,
                });
            }

            let anchor = OutsideAnchor::new(
                config.initial_mid,
                config.initial_spread,
                config.anchor_blend,
            );
            let quote = dealer_quote(&anchor, Decimal::ZERO, config.spread_share, config.skew_gain);
            books.push(BucketBook {
                bucket,
                dealer_id,
                provider_id,
                anchor,
                quote,
            });
        }

        Ok(Self {
            config,
            books,
            next_serial: 1,
        })
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn books(&self) -> &[BucketBook] {
        &self.books
    }

    fn book(&self, bucket: MaturityBucket) -> &BucketBook {
        &self.books[bucket as usize]
    }

    fn book_mut(&mut self, bucket: MaturityBucket) -> &mut BucketBook {
        &mut self.books[bucket as usize]
    }

    /// Bucket governing a claim with this many days to maturity.
    pub fn bucket_for(&self, days_to_maturity: usize) -> MaturityBucket {
        if days_to_maturity <= self.config.short_max_days {
            MaturityBucket::Short
        } else if days_to_maturity <= self.config.mid_max_days {
            MaturityBucket::Mid
        } else {
            MaturityBucket::Long
        }
    }

    fn inventory_face(&self, ledger: &Ledger, bucket: MaturityBucket) -> Decimal {
        let dealer_id = &self.book(bucket).dealer_id;
        ledger
            .tickets_of(dealer_id, bucket)
            .iter()
            .map(|t| t.face)
            .sum()
    }

    /// Recompute one bucket's dealer quote from current inventory. Called
    /// after every trade.
    pub fn refresh_quote(&mut self, ledger: &Ledger, bucket: MaturityBucket) {
        let utilization = if self.config.dealer_capacity > Decimal::ZERO {
            self.inventory_face(ledger, bucket) / self.config.dealer_capacity
        } else {
            Decimal::ONE
        };
        let spread_share = self.config.spread_share;
        let skew_gain = self.config.skew_gain;
        let book = self.book_mut(bucket);
        book.quote = dealer_quote(&book.anchor, utilization, spread_share, skew_gain);
    }

    // ========================================================================
    // Rebucketing
    // ========================================================================

    /// Move tickets whose remaining maturity crossed a bucket boundary into
    /// the adjacent bucket. Market-maker-owned tickets are sold internally
    /// to the counterpart in the new bucket at the new bucket's anchor mid;
    /// trader-owned tickets only change their governing bucket.
    pub fn rebucket(
        &mut self,
        state: &mut SimulationState,
        flows: &mut Vec<InterbankFlow>,
    ) -> Result<(), LedgerError> {
        let day = state.day();
        let tickets: Vec<Ticket> = state
            .ledger()
            .all_tickets()
            .into_iter()
            .filter(|t| t.due_day > day)
            .cloned()
            .collect();

        for ticket in tickets {
            let target = self.bucket_for(ticket.due_day - day);
            if target == ticket.bucket {
                continue;
            }

            let from_bucket = ticket.bucket;
            let old_book = self.book(from_bucket).clone();
            let new_book = self.book(target).clone();

            let mut ops = vec![LedgerOp::SetTicketBucket {
                id: ticket.id,
                bucket: target,
            }];

            // Internal sale between market makers of the old and new bucket.
            let new_owner = if ticket.owner == old_book.dealer_id {
                Some(new_book.dealer_id.clone())
            } else if ticket.owner == old_book.provider_id {
                Some(new_book.provider_id.clone())
            } else {
                None
            };

            let mut sale_buyer: Option<String> = None;
            if let Some(buyer) = new_owner {
                let price = new_book.anchor.mid();
                let consideration = (price * ticket.face).round_dp(2);
                let plan = plan_ranked_payment(
                    state.ledger(),
                    &buyer,
                    &ticket.owner,
                    consideration,
                    false,
                );
                if plan.paid == consideration {
                    ops.extend(plan.ops);
                    ops.push(LedgerOp::Transfer {
                        id: ticket.payable_id,
                        from: ticket.owner.clone(),
                        to: buyer.clone(),
                    });
                    ops.push(LedgerOp::Transfer {
                        id: ticket.id,
                        from: ticket.owner.clone(),
                        to: buyer.clone(),
                    });
                    sale_buyer = Some(buyer);
                } else {
                    debug!(
                        ticket = %ticket.id,
                        buyer = %buyer,
                        "rebucket counterpart cannot fund internal sale; bucket tag moves alone"
                    );
                }
            }

            let receipts = state.ledger_mut().run_atomic(ops)?;
            if let Some(buyer) = &sale_buyer {
                log_payments(
                    state,
                    day,
                    Phase::DealerTrading,
                    &receipts,
                    buyer,
                    &ticket.owner,
                    None,
                );
                collect_flows(flows, &receipts);
            }
            state.log_event(Event::TicketRebucketed {
                day,
                ticket_id: ticket.id,
                from_bucket,
                to_bucket: target,
            });

            self.refresh_quote(state.ledger(), from_bucket);
            self.refresh_quote(state.ledger(), target);
        }

        Ok(())
    }

    // ========================================================================
    // Trading round
    // ========================================================================

    /// One trading round: distressed sellers convert receivables to cash at
    /// the bid; surplus buyers (when enabled) lift asks. Runs before
    /// maturity settlement so sales land ahead of the dues deadline.
    pub fn trading_round(
        &mut self,
        state: &mut SimulationState,
        flows: &mut Vec<InterbankFlow>,
    ) -> Result<(), LedgerError> {
        let day = state.day();
        let traders: Vec<String> = state
            .ledger()
            .agents()
            .filter(|a| {
                !a.kind().is_market_maker()
                    && a.kind() != AgentKind::CentralAuthority
                    && !a.is_defaulted()
            })
            .map(|a| a.id().to_string())
            .collect();

        // Sell side: agents projected short within the lookahead horizon.
        for seller in &traders {
            self.sell_round_for(state, flows, seller)?;
        }

        // Buy side (policy-gated).
        if self.config.buy_side_enabled {
            for buyer in &traders {
                self.buy_round_for(state, flows, buyer)?;
            }
        }

        Ok(())
    }

    fn projected_shortfall(&self, ledger: &Ledger, agent: &str, day: usize) -> Decimal {
        let horizon = day + self.config.lookahead_days;
        ledger.dues_owed_by(agent, horizon) - ledger.total_money(agent)
    }

    fn sell_round_for(
        &mut self,
        state: &mut SimulationState,
        flows: &mut Vec<InterbankFlow>,
        seller: &str,
    ) -> Result<(), LedgerError> {
        let day = state.day();

        loop {
            if self.projected_shortfall(state.ledger(), seller, day) <= Decimal::ZERO {
                return Ok(());
            }

            // Soonest-maturing receivable selects the bucket.
            let receivable: Option<Payable> = state
                .ledger()
                .receivables_of(seller, day)
                .first()
                .map(|p| (*p).clone());
            let payable = match receivable {
                Some(p) => p,
                None => return Ok(()),
            };

            let bucket = self.bucket_for(payable.due_day - day);
            self.refresh_quote(state.ledger(), bucket);
            let book = self.book(bucket).clone();
            let face = payable.amount;

            // Feasibility inside the dealer: capacity headroom and cash.
            let dealer_bid_cost = (book.quote.bid * face).round_dp(2);
            let headroom = self.config.dealer_capacity - self.inventory_face(state.ledger(), bucket);
            let infeasible = if headroom < face {
                Some(TradeInfeasible::CapacityExhausted)
            } else if state.ledger().total_money(&book.dealer_id) < dealer_bid_cost {
                Some(TradeInfeasible::DealerCashShort)
            } else {
                None
            };

            // Pass through to the outside provider when the dealer cannot
            // take the trade; the provider's bid is always available.
            let (buyer, price, passthrough) = match infeasible {
                None => (book.dealer_id.clone(), book.quote.bid, false),
                Some(reason) => {
                    debug!(bucket = %bucket, ?reason, "dealer infeasible, passing through");
                    (book.provider_id.clone(), book.anchor.bid(), true)
                }
            };

            let proceeds = (price * face).round_dp(2);
            if proceeds <= Decimal::ZERO {
                // A zero bid cannot relieve a shortfall; stop selling.
                return Ok(());
            }

            let plan = plan_ranked_payment(state.ledger(), &buyer, seller, proceeds, false);
            if plan.paid < proceeds {
                debug!(buyer = %buyer, "market maker cannot fund purchase");
                return Ok(());
            }

            let mut ops = plan.ops;
            ops.push(LedgerOp::Transfer {
                id: payable.id,
                from: seller.to_string(),
                to: buyer.clone(),
            });

            let existing_ticket = state
                .ledger()
                .ticket_for_payable(payable.id)
                .map(|t| t.id);
            let serial = match existing_ticket {
                Some(ticket_id) => {
                    ops.push(LedgerOp::Transfer {
                        id: ticket_id,
                        from: seller.to_string(),
                        to: buyer.clone(),
                    });
                    None
                }
                None => {
                    let serial = self.next_serial;
                    ops.push(LedgerOp::Create(NewInstrument::Ticket {
                        owner: buyer.clone(),
                        face,
                        due_day: payable.due_day,
                        bucket,
                        serial,
                        payable_id: payable.id,
                    }));
                    // Single-issuer constraint: tagged once, on first purchase.
                    Some(serial)
                }
            };

            let receipts = state.ledger_mut().run_atomic(ops)?;
            let ticket_id = match existing_ticket {
                Some(id) => id,
                None => receipts
                    .iter()
                    .find_map(OpReceipt::created_id)
                    .ok_or_else(|| {
                        LedgerError::InvariantViolation(
                            "ticket creation returned no id".to_string(),
                        )
                    })?,
            };
            if serial.is_some() {
                self.next_serial += 1;
                state.ledger_mut().run_atomic(vec![LedgerOp::SetTicketIssuer {
                    id: ticket_id,
                    issuer: payable.debtor.clone(),
                }])?;
            }

            log_payments(
                state,
                day,
                Phase::DealerTrading,
                &receipts,
                &buyer,
                seller,
                None,
            );
            collect_flows(flows, &receipts);
            state.log_event(Event::TicketSold {
                day,
                bucket,
                ticket_id,
                payable_id: payable.id,
                seller: seller.to_string(),
                buyer,
                face,
                price,
                proceeds,
                passthrough,
            });

            self.refresh_quote(state.ledger(), bucket);
        }
    }

    fn buy_round_for(
        &mut self,
        state: &mut SimulationState,
        flows: &mut Vec<InterbankFlow>,
        buyer: &str,
    ) -> Result<(), LedgerError> {
        let day = state.day();
        let horizon = day + self.config.lookahead_days;
        let surplus = state.ledger().total_money(buyer)
            - state.ledger().dues_owed_by(buyer, horizon)
            - self.config.buyer_cash_buffer;
        if surplus <= Decimal::ZERO {
            return Ok(());
        }

        // Short -> Mid -> Long, skipping buckets whose ask is pinned to the
        // outside price (the dealer has no edge there). The exact skip order
        // is a policy hook, not a law of the market.
        for bucket in MaturityBucket::ALL {
            self.refresh_quote(state.ledger(), bucket);
            let book = self.book(bucket).clone();

            let candidate = if book.quote.ask_pinned {
                debug!(bucket = %bucket, reason = ?TradeInfeasible::AskPinned, "skipping pinned bucket");
                None
            } else {
                state
                    .ledger()
                    .tickets_of(&book.dealer_id, bucket)
                    .first()
                    .map(|t| ((*t).clone(), book.quote.ask, false))
            };

            // Provider passthrough when the dealer side has nothing to offer.
            let candidate = candidate.or_else(|| {
                state
                    .ledger()
                    .tickets_of(&book.provider_id, bucket)
                    .first()
                    .map(|t| {
                        debug!(bucket = %bucket, reason = ?TradeInfeasible::NoInventory, "buy passthrough");
                        ((*t).clone(), book.anchor.ask(), true)
                    })
            });

            let (ticket, price, passthrough) = match candidate {
                Some(c) => c,
                None => continue,
            };

            let cost = (price * ticket.face).round_dp(2);
            if cost > surplus {
                continue;
            }

            let plan = plan_ranked_payment(state.ledger(), buyer, &ticket.owner, cost, false);
            if plan.paid < cost {
                continue;
            }

            let mut ops = plan.ops;
            ops.push(LedgerOp::Transfer {
                id: ticket.payable_id,
                from: ticket.owner.clone(),
                to: buyer.to_string(),
            });
            ops.push(LedgerOp::Transfer {
                id: ticket.id,
                from: ticket.owner.clone(),
                to: buyer.to_string(),
            });

            let receipts = state.ledger_mut().run_atomic(ops)?;
            log_payments(
                state,
                day,
                Phase::DealerTrading,
                &receipts,
                buyer,
                &ticket.owner,
                None,
            );
            collect_flows(flows, &receipts);
            state.log_event(Event::TicketBought {
                day,
                bucket,
                ticket_id: ticket.id,
                seller: ticket.owner.clone(),
                buyer: buyer.to_string(),
                face: ticket.face,
                price,
                cost,
                passthrough,
            });

            self.refresh_quote(state.ledger(), bucket);
            // One purchase per buyer per round.
            return Ok(());
        }

        Ok(())
    }

    // ========================================================================
    // Ticket maturity: pro-rata recovery
    // ========================================================================

    /// Settle all tickets maturing today, bucket by bucket.
    ///
    /// Debtors pay into the bucket's outside provider, which acts as paying
    /// agent; the pooled proceeds are distributed pro-rata so every ticket
    /// holder in the bucket recovers the same fraction of face. The realized
    /// loss rate feeds the bucket's anchor for the next period. Obligations
    /// that fell short are returned for the engine's default handling.
    pub fn mature_tickets(
        &mut self,
        state: &mut SimulationState,
        flows: &mut Vec<InterbankFlow>,
        commit_partial: bool,
    ) -> Result<Vec<TicketDefault>, LedgerError> {
        let day = state.day();
        let mut defaults = Vec::new();

        for bucket in MaturityBucket::ALL {
            let tickets: Vec<Ticket> = state
                .ledger()
                .all_tickets()
                .into_iter()
                .filter(|t| t.bucket == bucket && t.due_day == day)
                .cloned()
                .collect();
            if tickets.is_empty() {
                continue;
            }

            let provider = self.book(bucket).provider_id.clone();
            let mut total_face = Decimal::ZERO;
            let mut pool = Decimal::ZERO;

            // Collection leg: each debtor pays the paying agent.
            for ticket in &tickets {
                let payable = state
                    .ledger()
                    .instrument(ticket.payable_id)?
                    .as_payable()
                    .ok_or_else(|| {
                        LedgerError::InvariantViolation(format!(
                            "ticket {} wraps non-payable {}",
                            ticket.id, ticket.payable_id
                        ))
                    })?
                    .clone();
                total_face += payable.amount;

                state.log_event(Event::ObligationDue {
                    day,
                    id: payable.id,
                    debtor: payable.debtor.clone(),
                    creditor: payable.effective_creditor().to_string(),
                    amount: payable.amount,
                });

                let plan = plan_ranked_payment(
                    state.ledger(),
                    &payable.debtor,
                    &provider,
                    payable.amount,
                    commit_partial,
                );
                let paid = plan.paid;
                let receipts = state.ledger_mut().run_atomic(plan.ops)?;
                log_payments(
                    state,
                    day,
                    Phase::MaturitySettlement,
                    &receipts,
                    &payable.debtor,
                    &provider,
                    Some(payable.id),
                );
                collect_flows(flows, &receipts);
                pool += paid;

                if paid == payable.amount {
                    state.log_event(Event::ObligationSettled {
                        day,
                        id: payable.id,
                        debtor: payable.debtor.clone(),
                        creditor: payable.effective_creditor().to_string(),
                        amount: payable.amount,
                    });
                } else {
                    let outcome = if paid > Decimal::ZERO {
                        state.log_event(Event::ObligationPartiallySettled {
                            day,
                            id: payable.id,
                            debtor: payable.debtor.clone(),
                            creditor: payable.effective_creditor().to_string(),
                            paid,
                            shortfall: payable.amount - paid,
                        });
                        SettlementOutcome::PartiallySettled {
                            paid,
                            shortfall: payable.amount - paid,
                        }
                    } else {
                        SettlementOutcome::Defaulted {
                            shortfall: payable.amount,
                        }
                    };
                    defaults.push(TicketDefault {
                        debtor: payable.debtor.clone(),
                        trigger: payable.id,
                        outcome,
                    });
                }
            }

            // Distribution leg: same recovered fraction for every holder.
            let fraction = if total_face > Decimal::ZERO {
                pool / total_face
            } else {
                Decimal::ZERO
            };
            let mut distributed = Decimal::ZERO;
            let last_index = tickets.len() - 1;

            for (index, ticket) in tickets.iter().enumerate() {
                // Last holder takes the exact remainder so the pool conserves.
                let recovery = if index == last_index {
                    pool - distributed
                } else {
                    (ticket.face * fraction).round_dp(2)
                };

                if ticket.owner != provider && recovery > Decimal::ZERO {
                    let plan = plan_ranked_payment(
                        state.ledger(),
                        &provider,
                        &ticket.owner,
                        recovery,
                        false,
                    );
                    let receipts = state.ledger_mut().run_atomic(plan.ops)?;
                    log_payments(
                        state,
                        day,
                        Phase::MaturitySettlement,
                        &receipts,
                        &provider,
                        &ticket.owner,
                        None,
                    );
                    collect_flows(flows, &receipts);
                }
                distributed += recovery;

                state.log_event(Event::TicketMatured {
                    day,
                    bucket,
                    ticket_id: ticket.id,
                    holder: ticket.owner.clone(),
                    face: ticket.face,
                    recovered: recovery,
                });

                // The wrapped claim is extinguished pro-rata at maturity.
                state.ledger_mut().run_atomic(vec![
                    LedgerOp::Remove { id: ticket.id },
                    LedgerOp::Remove {
                        id: ticket.payable_id,
                    },
                ])?;
            }

            // Realized losses feed back into the outside anchor.
            let loss_rate = Decimal::ONE - fraction;
            let book = self.book_mut(bucket);
            book.anchor.record_recovery(fraction);
            let (mid, spread) = (book.anchor.mid(), book.anchor.spread());
            state.log_event(Event::AnchorUpdated {
                day,
                bucket,
                mid,
                spread,
                loss_rate,
            });
            self.refresh_quote(state.ledger(), bucket);
        }

        Ok(defaults)
    }

    /// Fold a total write-off (expelled debtor's tickets) into a bucket's
    /// anchor as a zero-recovery observation.
    pub fn record_write_off(&mut self, state: &mut SimulationState, bucket: MaturityBucket) {
        let day = state.day();
        let book = self.book_mut(bucket);
        book.anchor.record_recovery(Decimal::ZERO);
        let (mid, spread) = (book.anchor.mid(), book.anchor.spread());
        state.log_event(Event::AnchorUpdated {
            day,
            bucket,
            mid,
            spread,
            loss_rate: Decimal::ONE,
        });
        self.refresh_quote(state.ledger(), bucket);
    }
}

/// Emit a `PaymentMade` event per executed money movement.
fn log_payments(
    state: &mut SimulationState,
    day: usize,
    phase: Phase,
    receipts: &[OpReceipt],
    from: &str,
    to: &str,
    obligation: Option<InstrumentId>,
) {
    for receipt in receipts {
        if let OpReceipt::Moved { form, legs } = receipt {
            let amount: Decimal = legs.iter().map(|leg| leg.amount).sum();
            if amount > Decimal::ZERO {
                state.log_event(Event::PaymentMade {
                    day,
                    phase,
                    from: from.to_string(),
                    to: to.to_string(),
                    form: *form,
                    amount,
                    obligation,
                });
            }
        }
    }
}

/// Collect cross-bank deposit legs for the netting phase.
fn collect_flows(flows: &mut Vec<InterbankFlow>, receipts: &[OpReceipt]) {
    for receipt in receipts {
        if let OpReceipt::Moved {
            form: MoneyForm::BankDeposit,
            legs,
        } = receipt
        {
            for leg in legs {
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
