//! Trigger and reaction notifications
//!
//! Published as `{"type": ..., "kind": ..., "data": {...}}` on the scope's
//! trigger and reaction event topics.

use crate::types::{Reaction, Trigger};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum TriggerEvent {
    Created(Trigger),
    Updated(Trigger),
    Deleted(Trigger),
    Enabled(Trigger),
    Disabled(Trigger),
    Activated(Trigger),
    Deactivated(Trigger),
}

impl TriggerEvent {
    pub fn trigger(&self) -> &Trigger {
        match self {
            TriggerEvent::Created(t)
            | TriggerEvent::Updated(t)
            | TriggerEvent::Deleted(t)
            | TriggerEvent::Enabled(t)
            | TriggerEvent::Disabled(t)
            | TriggerEvent::Activated(t)
            | TriggerEvent::Deactivated(t) => t,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TriggerEvent::Created(_) => "created",
            TriggerEvent::Updated(_) => "updated",
            TriggerEvent::Deleted(_) => "deleted",
            TriggerEvent::Enabled(_) => "enabled",
            TriggerEvent::Disabled(_) => "disabled",
            TriggerEvent::Activated(_) => "activated",
            TriggerEvent::Deactivated(_) => "deactivated",
        }
    }
}

/// Outcome of one action of a reaction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub success: bool,
    pub message: String,
}

/// One execution of a reaction's actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRun {
    pub reaction: String,
    /// Seconds since Unix epoch
    pub time: i64,
    pub results: Vec<ActionRecord>,
}

impl ReactionRun {
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ReactionEvent {
    Created(Reaction),
    Updated(Reaction),
    Deleted(Reaction),
    Activated(Reaction),
    Deactivated(Reaction),
    Snoozed(Reaction),
    Awakened(Reaction),
    Run(ReactionRun),
}

impl ReactionEvent {
    pub fn name(&self) -> &str {
        match self {
            ReactionEvent::Created(r)
            | ReactionEvent::Updated(r)
            | ReactionEvent::Deleted(r)
            | ReactionEvent::Activated(r)
            | ReactionEvent::Deactivated(r)
            | ReactionEvent::Snoozed(r)
            | ReactionEvent::Awakened(r) => &r.name,
            ReactionEvent::Run(run) => &run.reaction,
        }
    }
}

/// Envelope written to the event topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    Trigger(TriggerEvent),
    Reaction(ReactionEvent),
}
