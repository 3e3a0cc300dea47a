//! Event logging for simulation replay and auditing.
//!
//! The event log is the sole channel through which the core's behavior
//! becomes observable: every ledger mutation and every default appends one
//! tagged record. Events enable:
//! - Deterministic replay (metrics are a pure function of the log)
//! - Auditing (verify conservation and settlement ordering)
//! - Export (serialized as-is by the run exporter)
//!
//! Each event carries the simulated day and the day phase that produced it.

use crate::models::instrument::{InstrumentId, InstrumentKind, MaturityBucket, MoneyForm};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Day phases, in execution order. One cycle per simulated day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    DayMarker,
    ScheduledActions,
    DealerTrading,
    MaturitySettlement,
    InterbankNetting,
    QuietCheck,
}

/// Simulation event capturing one economically meaningful action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Day counter advanced. `money_stock` is the start-of-day money supply,
    /// recorded here so metrics can be replayed from the log alone.
    DayStart { day: usize, money_stock: Decimal },

    /// New money created by a scheduled minting action.
    Minted {
        day: usize,
        phase: Phase,
        form: MoneyForm,
        to: String,
        amount: Decimal,
    },

    /// A payable was created.
    PayableCreated {
        day: usize,
        phase: Phase,
        id: InstrumentId,
        debtor: String,
        creditor: String,
        amount: Decimal,
        due_day: usize,
    },

    /// A delivery obligation was created.
    DeliveryCreated {
        day: usize,
        phase: Phase,
        id: InstrumentId,
        debtor: String,
        creditor: String,
        units: Decimal,
        due_day: usize,
    },

    /// A stock lot was granted to an agent.
    StockGranted {
        day: usize,
        phase: Phase,
        id: InstrumentId,
        to: String,
        units: Decimal,
    },

    /// Money moved by a scheduled transfer action.
    MoneyTransferred {
        day: usize,
        phase: Phase,
        form: MoneyForm,
        from: String,
        to: String,
        amount: Decimal,
    },

    /// A scheduled action was skipped (expel-agent mode only).
    ActionSkipped {
        day: usize,
        index: usize,
        reason: String,
    },

    /// An obligation reached its due day. Emitted before the settlement
    /// attempt so metrics can derive total dues from the log.
    ObligationDue {
        day: usize,
        id: InstrumentId,
        debtor: String,
        creditor: String,
        amount: Decimal,
    },

    /// Money actually moved between two agents during settlement.
    /// One record per money form drained.
    PaymentMade {
        day: usize,
        phase: Phase,
        from: String,
        to: String,
        form: MoneyForm,
        amount: Decimal,
        obligation: Option<InstrumentId>,
    },

    /// An obligation settled in full on its due day.
    ObligationSettled {
        day: usize,
        id: InstrumentId,
        debtor: String,
        creditor: String,
        amount: Decimal,
    },

    /// An obligation settled partially before the debtor's funds ran out.
    /// The partial payment is committed; default handling follows.
    ObligationPartiallySettled {
        day: usize,
        id: InstrumentId,
        debtor: String,
        creditor: String,
        paid: Decimal,
        shortfall: Decimal,
    },

    /// A delivery obligation settled by transferring stock units.
    DeliverySettled {
        day: usize,
        id: InstrumentId,
        debtor: String,
        creditor: String,
        units: Decimal,
    },

    /// A debtor could not cover a matured obligation (expel-agent mode).
    AgentDefaulted {
        day: usize,
        agent: String,
        trigger: InstrumentId,
        shortfall: Decimal,
    },

    /// A defaulted debtor's remaining liability was removed without payment.
    LiabilityWrittenOff {
        day: usize,
        agent: String,
        id: InstrumentId,
        kind: InstrumentKind,
        amount: Decimal,
    },

    /// A receivable was sold into the secondary market.
    TicketSold {
        day: usize,
        bucket: MaturityBucket,
        ticket_id: InstrumentId,
        payable_id: InstrumentId,
        seller: String,
        buyer: String,
        face: Decimal,
        price: Decimal,
        proceeds: Decimal,
        /// True when the trade passed through to the outside provider.
        passthrough: bool,
    },

    /// A ticket was bought out of dealer/provider inventory.
    TicketBought {
        day: usize,
        bucket: MaturityBucket,
        ticket_id: InstrumentId,
        seller: String,
        buyer: String,
        face: Decimal,
        price: Decimal,
        cost: Decimal,
        passthrough: bool,
    },

    /// A ticket crossed a bucket boundary as time advanced. The pricing
    /// governance changes, so this is logged as an internal sale.
    TicketRebucketed {
        day: usize,
        ticket_id: InstrumentId,
        from_bucket: MaturityBucket,
        to_bucket: MaturityBucket,
    },

    /// A ticket matured and its holder received the pro-rata recovery.
    TicketMatured {
        day: usize,
        bucket: MaturityBucket,
        ticket_id: InstrumentId,
        holder: String,
        face: Decimal,
        recovered: Decimal,
    },

    /// The outside provider's value anchor absorbed a realized loss rate.
    AnchorUpdated {
        day: usize,
        bucket: MaturityBucket,
        mid: Decimal,
        spread: Decimal,
        loss_rate: Decimal,
    },

    /// Bilateral interbank positions were netted and settled in reserves.
    NettingSettled {
        day: usize,
        bank_a: String,
        bank_b: String,
        gross_ab: Decimal,
        gross_ba: Decimal,
        net: Decimal,
        reserves_paid: Decimal,
        overnight_payable: Option<InstrumentId>,
    },

    /// No settlement, trade or default happened today.
    QuietDay { day: usize, consecutive: usize },
}

impl Event {
    /// Simulated day when this event occurred.
    pub fn day(&self) -> usize {
        match self {
            Event::DayStart { day, .. }
            | Event::Minted { day, .. }
            | Event::PayableCreated { day, .. }
            | Event::DeliveryCreated { day, .. }
            | Event::StockGranted { day, .. }
            | Event::MoneyTransferred { day, .. }
            | Event::ActionSkipped { day, .. }
            | Event::ObligationDue { day, .. }
            | Event::PaymentMade { day, .. }
            | Event::ObligationSettled { day, .. }
            | Event::ObligationPartiallySettled { day, .. }
            | Event::DeliverySettled { day, .. }
            | Event::AgentDefaulted { day, .. }
            | Event::LiabilityWrittenOff { day, .. }
            | Event::TicketSold { day, .. }
            | Event::TicketBought { day, .. }
            | Event::TicketRebucketed { day, .. }
            | Event::TicketMatured { day, .. }
            | Event::AnchorUpdated { day, .. }
            | Event::NettingSettled { day, .. }
            | Event::QuietDay { day, .. } => *day,
        }
    }

    /// Day phase that produced this event.
    pub fn phase(&self) -> Phase {
        match self {
            Event::DayStart { .. } => Phase::DayMarker,
            Event::Minted { phase, .. }
            | Event::PayableCreated { phase, .. }
            | Event::DeliveryCreated { phase, .. }
            | Event::StockGranted { phase, .. }
            | Event::MoneyTransferred { phase, .. }
            | Event::PaymentMade { phase, .. } => *phase,
            Event::ActionSkipped { .. } => Phase::ScheduledActions,
            Event::TicketSold { .. } | Event::TicketBought { .. } | Event::TicketRebucketed { .. } => {
                Phase::DealerTrading
            }
            Event::ObligationDue { .. }
            | Event::ObligationSettled { .. }
            | Event::ObligationPartiallySettled { .. }
            | Event::DeliverySettled { .. }
            | Event::AgentDefaulted { .. }
            | Event::LiabilityWrittenOff { .. }
            | Event::TicketMatured { .. }
            | Event::AnchorUpdated { .. } => Phase::MaturitySettlement,
            Event::NettingSettled { .. } => Phase::InterbankNetting,
            Event::QuietDay { .. } => Phase::QuietCheck,
        }
    }

    /// Short event-kind tag, matching the serialized variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::DayStart { .. } => "DayStart",
            Event::Minted { .. } => "Minted",
            Event::PayableCreated { .. } => "PayableCreated",
            Event::DeliveryCreated { .. } => "DeliveryCreated",
            Event::StockGranted { .. } => "StockGranted",
            Event::MoneyTransferred { .. } => "MoneyTransferred",
            Event::ActionSkipped { .. } => "ActionSkipped",
            Event::ObligationDue { .. } => "ObligationDue",
            Event::PaymentMade { .. } => "PaymentMade",
            Event::ObligationSettled { .. } => "ObligationSettled",
            Event::ObligationPartiallySettled { .. } => "ObligationPartiallySettled",
            Event::DeliverySettled { .. } => "DeliverySettled",
            Event::AgentDefaulted { .. } => "AgentDefaulted",
            Event::LiabilityWrittenOff { .. } => "LiabilityWrittenOff",
            Event::TicketSold { .. } => "TicketSold",
            Event::TicketBought { .. } => "TicketBought",
            Event::TicketRebucketed { .. } => "TicketRebucketed",
            Event::TicketMatured { .. } => "TicketMatured",
            Event::AnchorUpdated { .. } => "AnchorUpdated",
            Event::NettingSettled { .. } => "NettingSettled",
            Event::QuietDay { .. } => "QuietDay",
        }
    }

    /// Does this event keep the day from being quiet?
    ///
    /// Day markers, quiet markers, dues announcements and anchor maintenance
    /// are bookkeeping; everything else is economic activity.
    pub fn is_activity(&self) -> bool {
        !matches!(
            self,
            Event::DayStart { .. }
                | Event::QuietDay { .. }
                | Event::ObligationDue { .. }
                | Event::AnchorUpdated { .. }
        )
    }
}

/// Append-only event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event. Events are never removed or reordered.
    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// All events emitted on a given day, in emission order.
    pub fn events_for_day(&self, day: usize) -> Vec<&Event> {
        self.events.iter().filter(|e| e.day() == day).collect()
    }

    /// Count of activity events (see [`Event::is_activity`]) on a given day.
    pub fn activity_on_day(&self, day: usize) -> usize {
        self.events
            .iter()
            .filter(|e| e.day() == day && e.is_activity())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn day_and_phase_accessors() {
        let event = Event::PaymentMade {
            day: 4,
            phase: Phase::MaturitySettlement,
            from: "FIRM_A".to_string(),
            to: "FIRM_B".to_string(),
            form: MoneyForm::Cash,
            amount: dec!(300),
            obligation: Some(InstrumentId(9)),
        };
        assert_eq!(event.day(), 4);
        assert_eq!(event.phase(), Phase::MaturitySettlement);
        assert_eq!(event.kind(), "PaymentMade");
        assert!(event.is_activity());
    }

    #[test]
    fn bookkeeping_events_are_not_activity() {
        let start = Event::DayStart {
            day: 1,
            money_stock: dec!(900),
        };
        let quiet = Event::QuietDay {
            day: 1,
            consecutive: 2,
        };
        assert!(!start.is_activity());
        assert!(!quiet.is_activity());
    }

    #[test]
    fn activity_count_filters_by_day() {
        let mut log = EventLog::new();
        log.log(Event::DayStart {
            day: 1,
            money_stock: dec!(0),
        });
        log.log(Event::Minted {
            day: 1,
            phase: Phase::ScheduledActions,
            form: MoneyForm::Cash,
            to: "FIRM_A".to_string(),
            amount: dec!(100),
        });
        log.log(Event::QuietDay {
            day: 2,
            consecutive: 1,
        });

        assert_eq!(log.activity_on_day(1), 1);
        assert_eq!(log.activity_on_day(2), 0);
        assert_eq!(log.events_for_day(1).len(), 2);
    }
}
