//! Rule type definitions
//!
//! Core types for trigger and reaction definitions:
//! - Trigger: a comparison or boolean combination over operands
//! - Operand: telemetry value, limits state, literal, or another trigger
//! - Reaction: actions run when any bound trigger becomes true

use crate::error::{Result, RuleError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use stellar_bus::TopicKeys;
use stellar_packets::ValueType;

/// Smallest snooze accepted by reaction validation
pub const DEFAULT_MIN_SNOOZE_SECS: u64 = 30;

// ============================================================================
// Operands and operators
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operand {
    /// Current value of a telemetry item
    Item {
        target: String,
        packet: String,
        item: String,
        #[serde(default)]
        value_type: ValueType,
    },
    /// Limits state of a telemetry item, collapsed to `limit` when it matches
    Limit {
        target: String,
        packet: String,
        item: String,
        limit: String,
    },
    Float { float: f64 },
    String { string: String },
    /// Result of another trigger in the same group
    Trigger { trigger: String },
}

impl Operand {
    /// (target, packet) of telemetry operands
    pub fn packet(&self) -> Option<(&str, &str)> {
        match self {
            Operand::Item { target, packet, .. } | Operand::Limit { target, packet, .. } => {
                Some((target.as_str(), packet.as_str()))
            },
            _ => None,
        }
    }

    pub fn trigger_name(&self) -> Option<&str> {
        match self {
            Operand::Trigger { trigger } => Some(trigger),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        let blank = |s: &str| s.trim().is_empty();
        match self {
            Operand::Item {
                target,
                packet,
                item,
                ..
            }
            | Operand::Limit {
                target,
                packet,
                item,
                ..
            } if blank(target) || blank(packet) || blank(item) => Err(RuleError::InvalidTrigger(
                format!("invalid operand must contain target, packet, item, and type: {}", self),
            )),
            Operand::Limit { limit, .. } if blank(limit) => Err(RuleError::InvalidTrigger(
                format!("invalid limit operand: {}", self),
            )),
            Operand::Float { float } if !float.is_finite() => Err(RuleError::InvalidTrigger(
                format!("invalid float operand: {}", float),
            )),
            Operand::Trigger { trigger } if blank(trigger) => Err(RuleError::InvalidTrigger(
                "invalid trigger operand: empty name".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Item {
                target,
                packet,
                item,
                value_type,
            } => write!(f, "{} {} {} ({})", target, packet, item, value_type),
            Operand::Limit {
                target,
                packet,
                item,
                limit,
            } => write!(f, "{} {} {} limit {}", target, packet, item, limit),
            Operand::Float { float } => write!(f, "{}", float),
            Operand::String { string } => write!(f, "'{}'", string),
            Operand::Trigger { trigger } => write!(f, "{}", trigger),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<=")]
    LessEqual,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::GreaterEqual => ">=",
            Operator::LessEqual => "<=",
            Operator::NotEqual => "!=",
            Operator::Equal => "==",
            Operator::And => "AND",
            Operator::Or => "OR",
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one trigger evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerResult {
    Error = -1,
    False = 0,
    True = 1,
}

impl TriggerResult {
    pub fn from_bool(value: bool) -> Self {
        if value {
            TriggerResult::True
        } else {
            TriggerResult::False
        }
    }

    pub fn as_i8(self) -> i8 {
        self as i8
    }
}

// ============================================================================
// Triggers
// ============================================================================

/// Trigger as submitted for creation or update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub name: String,
    pub group: String,
    #[serde(default)]
    pub description: Option<String>,
    pub left: Operand,
    pub operator: Operator,
    pub right: Operand,
}

impl TriggerDefinition {
    /// Check operands and the operator pairing, producing a fresh trigger
    ///
    /// Comparison operators take no trigger operands; AND/OR take exactly two.
    /// References to other triggers are resolved later against the table.
    pub fn validate(&self) -> Result<Trigger> {
        if self.name.trim().is_empty() || self.group.trim().is_empty() {
            return Err(RuleError::InvalidTrigger(
                "name and group must not be empty".to_string(),
            ));
        }
        self.left.validate()?;
        self.right.validate()?;

        let roots: Vec<String> = [&self.left, &self.right]
            .iter()
            .filter_map(|o| o.trigger_name().map(str::to_string))
            .collect();
        let valid = if self.operator.is_boolean() {
            roots.len() == 2
        } else {
            roots.is_empty()
        };
        if !valid {
            return Err(RuleError::InvalidTrigger(if self.operator.is_boolean() {
                format!(
                    "invalid operator pair: '{}' requires two trigger operands",
                    self.operator
                )
            } else {
                format!(
                    "invalid operator pair: '{}' must be of type: [\"AND\", \"OR\"]",
                    self.operator
                )
            }));
        }
        if roots.len() == 2 && roots[0] == roots[1] {
            return Err(RuleError::InvalidTrigger(format!(
                "trigger operands must differ: {}",
                roots[0]
            )));
        }
        if roots.iter().any(|r| *r == self.name) {
            return Err(RuleError::Cycle(format!("{} references itself", self.name)));
        }

        let description = self
            .description
            .clone()
            .unwrap_or_else(|| format!("{} {} {}", self.left, self.operator, self.right));
        Ok(Trigger {
            name: self.name.clone(),
            group: self.group.clone(),
            description,
            left: self.left.clone(),
            operator: self.operator,
            right: self.right.clone(),
            state: false,
            active: true,
            dependents: Vec::new(),
            roots,
            updated_at: 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub group: String,
    pub description: String,
    pub left: Operand,
    pub operator: Operator,
    pub right: Operand,
    /// Last confirmed boolean result
    pub state: bool,
    /// Inactive triggers are skipped until reactivated
    pub active: bool,
    /// Triggers and reactions referencing this trigger
    pub dependents: Vec<String>,
    /// Triggers this one references
    pub roots: Vec<String>,
    /// Nanoseconds since Unix epoch
    pub updated_at: i64,
}

impl Trigger {
    /// Decoded-telemetry topics this trigger reads from
    pub fn generate_topics(&self, keys: &TopicKeys) -> Vec<String> {
        let mut topics: Vec<String> = [&self.left, &self.right]
            .iter()
            .filter_map(|o| o.packet())
            .map(|(target, packet)| keys.telemetry_decoded(target, packet))
            .collect();
        topics.dedup();
        topics
    }

    pub(crate) fn add_dependent(&mut self, dependent: &str) {
        if !self.dependents.iter().any(|d| d == dependent) {
            self.dependents.push(dependent.to_string());
        }
    }

    pub(crate) fn remove_dependent(&mut self, dependent: &str) {
        self.dependents.retain(|d| d != dependent);
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} :: {} :: {})", self.name, self.group, self.description)
    }
}

// ============================================================================
// Reactions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerRef {
    pub name: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Send a command through the interface owning `target`
    Command {
        target: String,
        packet: String,
        #[serde(default)]
        params: BTreeMap<String, serde_json::Value>,
    },
    /// Start a script on the script runner service
    Script {
        value: String,
        #[serde(default)]
        environment: serde_json::Value,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Command { target, packet, .. } => write!(f, "command {} {}", target, packet),
            Action::Script { value, .. } => write!(f, "script {}", value),
        }
    }
}

fn default_review() -> bool {
    true
}

/// Reaction as submitted for creation or update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Seconds to sleep after running
    pub snooze: u64,
    pub triggers: Vec<TriggerRef>,
    pub actions: Vec<Action>,
    /// When false the sweep wakes the reaction without re-running it
    #[serde(default = "default_review")]
    pub review: bool,
}

impl ReactionDefinition {
    pub fn validate(&self, min_snooze: u64) -> Result<Reaction> {
        if self.name.trim().is_empty() {
            return Err(RuleError::InvalidReaction("name must not be empty".to_string()));
        }
        if self.snooze < min_snooze {
            return Err(RuleError::InvalidReaction(format!(
                "invalid snooze: '{}' must be at least {}",
                self.snooze, min_snooze
            )));
        }
        if self.triggers.is_empty() {
            return Err(RuleError::InvalidReaction(format!(
                "reaction must contain at least one trigger: {}",
                self.name
            )));
        }
        for (i, t) in self.triggers.iter().enumerate() {
            if self.triggers[..i].iter().any(|o| o.name == t.name) {
                return Err(RuleError::InvalidReaction(format!(
                    "no duplicate triggers allowed: {}",
                    t.name
                )));
            }
        }
        if self.actions.is_empty() {
            return Err(RuleError::InvalidReaction(format!(
                "reaction must contain at least one action: {}",
                self.name
            )));
        }
        for action in &self.actions {
            let empty = match action {
                Action::Command { target, packet, .. } => {
                    target.trim().is_empty() || packet.trim().is_empty()
                },
                Action::Script { value, .. } => value.trim().is_empty(),
            };
            if empty {
                return Err(RuleError::InvalidReaction(format!(
                    "reaction action is missing its value: {}",
                    action
                )));
            }
        }
        Ok(Reaction {
            name: self.name.clone(),
            description: self.description.clone(),
            snooze: self.snooze,
            triggers: self.triggers.clone(),
            actions: self.actions.clone(),
            active: true,
            review: self.review,
            snoozed_until: None,
            updated_at: 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub name: String,
    pub description: String,
    pub snooze: u64,
    pub triggers: Vec<TriggerRef>,
    pub actions: Vec<Action>,
    pub active: bool,
    pub review: bool,
    /// Seconds since Unix epoch; None while awake
    pub snoozed_until: Option<i64>,
    pub updated_at: i64,
}

impl Reaction {
    /// Start the snooze window at `now`
    pub fn sleep(&mut self, now: i64) {
        self.snoozed_until = Some(now + self.snooze as i64);
    }

    pub fn wake(&mut self) {
        self.snoozed_until = None;
    }
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} :: {} :: {} :: {} :: {:?})",
            self.name, self.active, self.review, self.snooze, self.snoozed_until
        )
    }
}
