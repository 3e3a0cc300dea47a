//! Run export
//!
//! The end-of-run artifact handed to exporters: the append-only event
//! sequence, a balance snapshot per agent, per-day metrics, and provenance
//! (a fresh run id plus a canonical SHA-256 hash of the scenario, so sweep
//! outputs can always be traced back to their exact configuration).
//!
//! The core holds no on-disk state of its own; serializing this structure is
//! the collaborators' job.

use crate::metrics::DayMetrics;
use crate::models::agent::AgentKind;
use crate::models::event::Event;
use crate::models::instrument::{InstrumentId, InstrumentKind};
use crate::orchestrator::engine::{Orchestrator, SimulationError, StopReason};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One instrument position in a balance snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentBalance {
    pub id: InstrumentId,
    pub kind: InstrumentKind,
    pub amount: Decimal,
}

/// End-of-run balance snapshot for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBalanceSnapshot {
    pub agent_id: String,
    pub display_name: String,
    pub kind: AgentKind,
    pub defaulted: bool,
    /// Total money across all forms.
    pub money: Decimal,
    pub assets: Vec<InstrumentBalance>,
    pub liabilities: Vec<InstrumentBalance>,
}

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    pub run_id: String,
    pub scenario_hash: String,
    pub days_run: usize,
    pub stop_reason: StopReason,
    pub events: Vec<Event>,
    pub metrics: Vec<DayMetrics>,
    pub balances: Vec<AgentBalanceSnapshot>,
}

/// Compute a deterministic SHA-256 hash of any serializable value.
///
/// Serializes to canonical JSON with recursively sorted object keys, so the
/// hash is independent of map iteration order.
pub fn compute_scenario_hash<T: Serialize>(value: &T) -> Result<String, SimulationError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(value)
        .map_err(|e| SimulationError::Serialization(format!("scenario hash failed: {}", e)))?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let canonical = canonicalize(value);
    let json = serde_json::to_string(&canonical)
        .map_err(|e| SimulationError::Serialization(format!("scenario hash failed: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

impl Orchestrator {
    /// Consume the finished run and produce the export artifact.
    pub fn into_export(self, stop_reason: StopReason) -> Result<RunExport, SimulationError> {
        let (state, scenario, metrics) = self.into_parts();
        let scenario_hash = compute_scenario_hash(&scenario)?;
        let days_run = state.day();

        let mut balances = Vec::new();
        for agent in state.ledger().agents() {
            let assets: Vec<InstrumentBalance> = state
                .ledger()
                .holdings_of(agent.id())
                .map(|instrument| InstrumentBalance {
                    id: instrument.id(),
                    kind: instrument.kind(),
                    amount: instrument.amount(),
                })
                .collect();
            let liabilities: Vec<InstrumentBalance> = state
                .ledger()
                .liabilities_of(agent.id())
                .map(|instrument| InstrumentBalance {
                    id: instrument.id(),
                    kind: instrument.kind(),
                    amount: instrument.amount(),
                })
                .collect();

            balances.push(AgentBalanceSnapshot {
                agent_id: agent.id().to_string(),
                display_name: agent.display_name().to_string(),
                kind: agent.kind(),
                defaulted: agent.is_defaulted(),
                money: state.ledger().total_money(agent.id()),
                assets,
                liabilities,
            });
        }

        let (_, events) = state.into_parts();

        Ok(RunExport {
            run_id: uuid::Uuid::new_v4().to_string(),
            scenario_hash,
            days_run,
            stop_reason,
            events: events.events().to_vec(),
            metrics,
            balances,
        })
    }

    /// Convenience wrapper: run to termination and export.
    pub fn run_to_completion(mut self) -> Result<RunExport, SimulationError> {
        let stop_reason = self.run()?;
        self.into_export(stop_reason)
    }
}
