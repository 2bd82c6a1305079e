use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Planner-issued work item that the execution tier consumes.
///
/// Immutable once emitted; it lives for the duration of the turn unless the
/// summarizer promotes parts of it to long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskTicket {
    #[serde(rename = "_type", default = "ticket_tag")]
    pub type_tag: String,
    pub ticket_id: String,
    pub user_turn_id: String,
    /// Natural-language goal, verbatim from the strategic plan.
    pub goal: String,
    #[serde(default)]
    pub micro_plan: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub constraints: BTreeMap<String, Value>,
    /// Pass/fail predicates the verifier evaluates against the bundle.
    #[serde(default)]
    pub verification: BTreeMap<String, Value>,
    /// Expected answer form (list, comparison, single fact, …).
    #[serde(default, rename = "return")]
    pub return_shape: BTreeMap<String, Value>,
}

fn ticket_tag() -> String {
    "TICKET".to_owned()
}

/// A structured sub-goal inside a ticket. Multi-goal queries are split into
/// one subtask each before execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subtask {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TaskTicket {
    pub fn new(ticket_id: impl Into<String>, user_turn_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            type_tag: ticket_tag(),
            ticket_id: ticket_id.into(),
            user_turn_id: user_turn_id.into(),
            goal: goal.into(),
            micro_plan: Vec::new(),
            subtasks: Vec::new(),
            constraints: BTreeMap::new(),
            verification: BTreeMap::new(),
            return_shape: BTreeMap::new(),
        }
    }

    /// Structural validation: identifiers and the goal must be non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.ticket_id.trim().is_empty() {
            return Err(Error::ContractViolation {
                component: "planner".into(),
                detail: "ticket_id is required".into(),
            });
        }
        if self.user_turn_id.trim().is_empty() {
            return Err(Error::ContractViolation {
                component: "planner".into(),
                detail: "user_turn_id is required".into(),
            });
        }
        if self.goal.trim().is_empty() {
            return Err(Error::ContractViolation {
                component: "planner".into(),
                detail: "ticket goal cannot be empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip() {
        let mut ticket = TaskTicket::new("t-1", "turn-1", "find hamster breeders");
        ticket.micro_plan.push("search the web".into());
        ticket
            .constraints
            .insert("region".into(), Value::String("EU".into()));

        let json = serde_json::to_string(&ticket).unwrap();
        let back: TaskTicket = serde_json::from_str(&json).unwrap();
        assert_eq!(ticket, back);
        assert!(json.contains("\"_type\":\"TICKET\""));
    }

    #[test]
    fn empty_goal_rejected() {
        let ticket = TaskTicket::new("t-1", "turn-1", "  ");
        assert!(ticket.validate().is_err());
    }
}
