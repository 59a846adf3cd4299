//! Live reaction table, run history and snooze bookkeeping

use crate::error::{Result, RuleError};
use crate::events::ReactionRun;
use crate::types::Reaction;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

/// Runs kept per reaction
pub const HISTORY_LEN: usize = 100;

/// Sweep queue entries remembered for deduplication
pub const SNOOZE_RING_LEN: usize = 25;

#[derive(Debug, Clone, Default)]
pub struct ReactionSnapshot {
    reactions: BTreeMap<String, Reaction>,
    /// trigger name -> reaction names
    lookup: BTreeMap<String, BTreeSet<String>>,
}

impl ReactionSnapshot {
    fn build(reactions: BTreeMap<String, Reaction>) -> Self {
        let mut lookup: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for reaction in reactions.values() {
            for t in &reaction.triggers {
                lookup
                    .entry(t.name.clone())
                    .or_default()
                    .insert(reaction.name.clone());
            }
        }
        Self { reactions, lookup }
    }

    pub fn get(&self, name: &str) -> Option<&Reaction> {
        self.reactions.get(name)
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reaction> {
        self.reactions.values()
    }

    /// Active, awake reactions bound to `trigger`
    pub fn reactions_for(&self, trigger: &str) -> Vec<&Reaction> {
        self.lookup
            .get(trigger)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| self.reactions.get(n))
                    .filter(|r| r.active && r.snoozed_until.is_none())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reactions whose snooze window has ended by `now`
    pub fn expired(&self, now: i64) -> Vec<&Reaction> {
        self.reactions
            .values()
            .filter(|r| r.snoozed_until.is_some_and(|until| until <= now))
            .collect()
    }
}

pub struct ReactionBase {
    snapshot: RwLock<Arc<ReactionSnapshot>>,
    history: Mutex<BTreeMap<String, VecDeque<ReactionRun>>>,
}

impl Default for ReactionBase {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactionBase {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(ReactionSnapshot::default())),
            history: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<ReactionSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    fn modify<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Reaction>) -> Result<R>) -> Result<R> {
        let mut guard = self.snapshot.write();
        let mut table = guard.reactions.clone();
        let result = f(&mut table)?;
        *guard = Arc::new(ReactionSnapshot::build(table));
        Ok(result)
    }

    fn with_reaction(
        &self,
        name: &str,
        f: impl FnOnce(&mut Reaction),
    ) -> Result<Reaction> {
        self.modify(|table| {
            let r = table
                .get_mut(name)
                .ok_or_else(|| RuleError::NotFound(name.to_string()))?;
            f(r);
            Ok(r.clone())
        })
    }

    pub fn insert(&self, reaction: Reaction) -> Result<Reaction> {
        self.modify(|table| {
            if table.contains_key(&reaction.name) {
                return Err(RuleError::AlreadyExists(reaction.name.clone()));
            }
            table.insert(reaction.name.clone(), reaction.clone());
            Ok(reaction)
        })
    }

    /// Replace a definition; returns (old, new) with state carried over
    pub fn replace(&self, mut reaction: Reaction) -> Result<(Reaction, Reaction)> {
        self.modify(|table| {
            let old = table
                .get(&reaction.name)
                .cloned()
                .ok_or_else(|| RuleError::NotFound(reaction.name.clone()))?;
            reaction.active = old.active;
            reaction.snoozed_until = old.snoozed_until;
            table.insert(reaction.name.clone(), reaction.clone());
            Ok((old, reaction))
        })
    }

    pub fn remove(&self, name: &str) -> Result<Reaction> {
        let removed = self.modify(|table| {
            table
                .remove(name)
                .ok_or_else(|| RuleError::NotFound(name.to_string()))
        })?;
        self.history.lock().remove(name);
        Ok(removed)
    }

    pub fn set_active(&self, name: &str, active: bool, now: i64) -> Result<Reaction> {
        self.with_reaction(name, |r| {
            r.active = active;
            r.updated_at = now;
            if !active {
                r.wake();
            }
        })
    }

    /// Put a reaction to sleep; `awake_only` makes this a claim
    ///
    /// With `awake_only`, returns None when the reaction is already snoozed
    /// or inactive, so only one caller wins a given firing.
    pub fn try_sleep(&self, name: &str, now: i64, awake_only: bool) -> Option<Reaction> {
        self.modify(|table| {
            let Some(r) = table.get_mut(name) else {
                return Ok(None);
            };
            if awake_only && (!r.active || r.snoozed_until.is_some()) {
                return Ok(None);
            }
            r.sleep(now);
            r.updated_at = now;
            Ok(Some(r.clone()))
        })
        .ok()
        .flatten()
    }

    pub fn wake(&self, name: &str, now: i64) -> Result<Reaction> {
        self.with_reaction(name, |r| {
            r.wake();
            r.updated_at = now;
        })
    }

    pub fn record_run(&self, run: ReactionRun) {
        let mut history = self.history.lock();
        let runs = history.entry(run.reaction.clone()).or_default();
        if runs.len() >= HISTORY_LEN {
            runs.pop_front();
        }
        runs.push_back(run);
    }

    /// Newest run first
    pub fn history(&self, name: &str) -> Vec<ReactionRun> {
        self.history
            .lock()
            .get(name)
            .map(|runs| runs.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

/// Recently queued snooze expiries
///
/// The sweep may see the same expired reaction on consecutive ticks before a
/// worker gets to it; the ring keeps it from being queued twice.
#[derive(Debug, Default)]
pub struct SnoozeBase {
    recent: Mutex<VecDeque<String>>,
}

impl SnoozeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time a given `reaction`/`snoozed_until` pair is seen
    pub fn not_queued(&self, reaction: &Reaction) -> bool {
        let key = format!(
            "{}__{}",
            reaction.name,
            reaction.snoozed_until.unwrap_or_default()
        );
        let mut recent = self.recent.lock();
        if recent.contains(&key) {
            return false;
        }
        if recent.len() >= SNOOZE_RING_LEN {
            recent.pop_front();
        }
        recent.push_back(key);
        true
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::events::ActionRecord;
    use crate::types::{Action, ReactionDefinition, TriggerRef};

    fn reaction(name: &str, triggers: &[&str]) -> Reaction {
        ReactionDefinition {
            name: name.to_string(),
            description: String::new(),
            snooze: 30,
            triggers: triggers
                .iter()
                .map(|t| TriggerRef {
                    name: t.to_string(),
                    group: "DEFAULT".to_string(),
                })
                .collect(),
            actions: vec![Action::Script {
                value: "safe.py".to_string(),
                environment: serde_json::Value::Null,
            }],
            review: true,
        }
        .validate(30)
        .unwrap()
    }

    #[test]
    fn test_lookup_and_claim() {
        let base = ReactionBase::new();
        base.insert(reaction("R1", &["T1", "T2"])).unwrap();
        base.insert(reaction("R2", &["T2"])).unwrap();
        assert!(base.insert(reaction("R2", &["T2"])).is_err());

        assert_eq!(base.snapshot().reactions_for("T2").len(), 2);
        assert!(base.try_sleep("R1", 100, true).is_some());
        assert!(base.try_sleep("R1", 101, true).is_none());

        let snap = base.snapshot();
        assert_eq!(snap.reactions_for("T1").len(), 0);
        assert_eq!(snap.get("R1").unwrap().snoozed_until, Some(130));
        assert!(snap.expired(129).is_empty());
        assert_eq!(snap.expired(130).len(), 1);
    }

    #[test]
    fn test_deactivate_wakes() {
        let base = ReactionBase::new();
        base.insert(reaction("R1", &["T1"])).unwrap();
        base.try_sleep("R1", 0, true);
        let r = base.set_active("R1", false, 1).unwrap();
        assert!(!r.active);
        assert!(r.snoozed_until.is_none());
        assert!(base.try_sleep("R1", 2, true).is_none());
    }

    #[test]
    fn test_history_bounded_newest_first() {
        let base = ReactionBase::new();
        for i in 0..(HISTORY_LEN as i64 + 5) {
            base.record_run(ReactionRun {
                reaction: "R1".to_string(),
                time: i,
                results: vec![ActionRecord {
                    action: "script safe.py".to_string(),
                    success: true,
                    message: String::new(),
                }],
            });
        }
        let runs = base.history("R1");
        assert_eq!(runs.len(), HISTORY_LEN);
        assert_eq!(runs[0].time, HISTORY_LEN as i64 + 4);
    }

    #[test]
    fn test_snooze_ring_dedups() {
        let ring = SnoozeBase::new();
        let mut r = reaction("R1", &["T1"]);
        r.sleep(0);
        assert!(ring.not_queued(&r));
        assert!(!ring.not_queued(&r));
        r.sleep(50);
        assert!(ring.not_queued(&r));
    }
}
