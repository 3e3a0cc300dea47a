//! Simulation state
//!
//! The complete mutable state of one run: the ledger plus the day counter,
//! the quiet-day counter used by the stopping rule, and the append-only
//! event log. An explicit state object created at run start, mutated only by
//! the settlement engine, and exported at run end - never a process-wide
//! singleton.

use crate::ledger::Ledger;
use crate::models::event::{Event, EventLog};
use serde::{Deserialize, Serialize};

/// Mutable state threaded through the day-phase driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationState {
    ledger: Ledger,

    /// Current simulated day (0 = setup day).
    day: usize,

    /// Consecutive days with no settlement, trade or default activity.
    quiet_days: usize,

    events: EventLog,
}

impl SimulationState {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            day: 0,
            quiet_days: 0,
            events: EventLog::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn day(&self) -> usize {
        self.day
    }

    pub fn advance_day(&mut self) -> usize {
        self.day += 1;
        self.day
    }

    pub fn quiet_days(&self) -> usize {
        self.quiet_days
    }

    /// Update the quiet counter from today's log tail; returns the new count.
    ///
    /// A day with no activity events increments the counter; any activity
    /// resets it.
    pub fn update_quiet_counter(&mut self) -> usize {
        if self.events.activity_on_day(self.day) == 0 {
            self.quiet_days += 1;
        } else {
            self.quiet_days = 0;
        }
        self.quiet_days
    }

    pub fn log_event(&mut self, event: Event) {
        self.events.log(event);
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Hand the event log to the exporter at run end.
    pub fn into_parts(self) -> (Ledger, EventLog) {
        (self.ledger, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::Event;
    use rust_decimal_macros::dec;

    #[test]
    fn quiet_counter_resets_on_activity() {
        let mut state = SimulationState::new(Ledger::new());

        state.advance_day();
        state.log_event(Event::DayStart {
            day: 1,
            money_stock: dec!(0),
        });
        assert_eq!(state.update_quiet_counter(), 1);

        state.advance_day();
        state.log_event(Event::Minted {
            day: 2,
            phase: crate::models::event::Phase::ScheduledActions,
            form: crate::models::instrument::MoneyForm::Cash,
            to: "FIRM_A".to_string(),
            amount: dec!(10),
        });
        assert_eq!(state.update_quiet_counter(), 0);

        state.advance_day();
        assert_eq!(state.update_quiet_counter(), 1);
        state.advance_day();
        assert_eq!(state.update_quiet_counter(), 2);
    }
}
