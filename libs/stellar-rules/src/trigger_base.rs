//! Live trigger table
//!
//! Writers rebuild a new snapshot (table plus topic lookup) under a short
//! write lock; evaluation works on an `Arc` of the snapshot current at the
//! start of the pass, so a pass never observes a partially applied change.

use crate::error::{Result, RuleError};
use crate::evaluator::TriggerTable;
use crate::events::TriggerEvent;
use crate::types::{Trigger, TriggerDefinition, TriggerResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use stellar_bus::TopicKeys;

/// Immutable view of the trigger table
#[derive(Debug, Clone, Default)]
pub struct TriggerSnapshot {
    triggers: TriggerTable,
    /// decom topic -> trigger names
    lookup: BTreeMap<String, BTreeSet<String>>,
    /// trigger event topic -> group
    event_topics: BTreeMap<String, String>,
    version: u64,
}

impl TriggerSnapshot {
    fn build(triggers: TriggerTable, keys: &TopicKeys, version: u64) -> Self {
        let mut lookup: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut event_topics = BTreeMap::new();
        for trigger in triggers.values() {
            for topic in trigger.generate_topics(keys) {
                lookup.entry(topic).or_default().insert(trigger.name.clone());
            }
            event_topics.insert(keys.trigger_events(&trigger.group), trigger.group.clone());
        }
        Self {
            triggers,
            lookup,
            event_topics,
            version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&Trigger> {
        self.triggers.get(name)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.values()
    }

    /// Active triggers only; inactive ones never take part in a pass
    pub fn active(&self) -> TriggerTable {
        self.triggers
            .iter()
            .filter(|(_, t)| t.active)
            .map(|(k, t)| (k.clone(), t.clone()))
            .collect()
    }

    /// Decoded-telemetry topics referenced by any trigger
    pub fn topics(&self) -> Vec<String> {
        self.lookup.keys().cloned().collect()
    }

    /// Active triggers to evaluate for a message on `topic`
    ///
    /// A trigger event topic selects the group's triggers that reference
    /// other triggers.
    pub fn triggers_for(&self, topic: &str) -> Vec<&Trigger> {
        if let Some(group) = self.event_topics.get(topic) {
            return self
                .triggers
                .values()
                .filter(|t| t.active && t.group == *group && !t.roots.is_empty())
                .collect();
        }
        self.lookup
            .get(topic)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| self.triggers.get(n))
                    .filter(|t| t.active)
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct TriggerBase {
    keys: TopicKeys,
    snapshot: RwLock<Arc<TriggerSnapshot>>,
}

impl TriggerBase {
    pub fn new(keys: TopicKeys) -> Self {
        Self {
            keys,
            snapshot: RwLock::new(Arc::new(TriggerSnapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<TriggerSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Apply `f` to a copy of the table and publish it as the new snapshot
    fn modify<R>(&self, f: impl FnOnce(&mut TriggerTable) -> Result<R>) -> Result<R> {
        let mut guard = self.snapshot.write();
        let mut table = guard.triggers.clone();
        let result = f(&mut table)?;
        *guard = Arc::new(TriggerSnapshot::build(table, &self.keys, guard.version + 1));
        Ok(result)
    }

    pub fn create(&self, definition: &TriggerDefinition, now: i64) -> Result<TriggerEvent> {
        let mut trigger = definition.validate()?;
        trigger.updated_at = now;
        self.modify(|table| {
            if table.contains_key(&trigger.name) {
                return Err(RuleError::AlreadyExists(trigger.name.clone()));
            }
            verify_roots(table, &trigger)?;
            for root in &trigger.roots {
                if let Some(r) = table.get_mut(root) {
                    r.add_dependent(&trigger.name);
                }
            }
            table.insert(trigger.name.clone(), trigger.clone());
            Ok(TriggerEvent::Created(trigger))
        })
    }

    /// Replace the definition, keeping state, activity and dependents
    pub fn update(&self, definition: &TriggerDefinition, now: i64) -> Result<TriggerEvent> {
        let mut trigger = definition.validate()?;
        trigger.updated_at = now;
        self.modify(|table| {
            let old = table
                .get(&trigger.name)
                .cloned()
                .ok_or_else(|| RuleError::NotFound(trigger.name.clone()))?;
            if old.group != trigger.group {
                return Err(RuleError::InvalidTrigger(format!(
                    "cannot move {} from group {} to {}",
                    trigger.name, old.group, trigger.group
                )));
            }
            verify_roots(table, &trigger)?;
            ensure_acyclic(table, &trigger)?;
            trigger.state = old.state;
            trigger.active = old.active;
            trigger.dependents = old.dependents.clone();
            for root in &old.roots {
                if let Some(r) = table.get_mut(root) {
                    r.remove_dependent(&trigger.name);
                }
            }
            for root in &trigger.roots {
                if let Some(r) = table.get_mut(root) {
                    r.add_dependent(&trigger.name);
                }
            }
            table.insert(trigger.name.clone(), trigger.clone());
            Ok(TriggerEvent::Updated(trigger))
        })
    }

    /// Delete a trigger nothing depends on
    pub fn delete(&self, name: &str) -> Result<TriggerEvent> {
        self.modify(|table| {
            let trigger = table
                .get(name)
                .cloned()
                .ok_or_else(|| RuleError::NotFound(name.to_string()))?;
            if !trigger.dependents.is_empty() {
                return Err(RuleError::HasDependents {
                    name: name.to_string(),
                    dependents: trigger.dependents.clone(),
                });
            }
            for root in &trigger.roots {
                if let Some(r) = table.get_mut(root) {
                    r.remove_dependent(name);
                }
            }
            table.remove(name);
            Ok(TriggerEvent::Deleted(trigger))
        })
    }

    pub fn activate(&self, name: &str, now: i64) -> Result<TriggerEvent> {
        self.modify(|table| {
            let t = table
                .get_mut(name)
                .ok_or_else(|| RuleError::NotFound(name.to_string()))?;
            t.active = true;
            t.updated_at = now;
            Ok(TriggerEvent::Activated(t.clone()))
        })
    }

    pub fn deactivate(&self, name: &str, now: i64) -> Result<TriggerEvent> {
        self.modify(|table| {
            let t = table
                .get_mut(name)
                .ok_or_else(|| RuleError::NotFound(name.to_string()))?;
            t.active = false;
            t.state = false;
            t.updated_at = now;
            Ok(TriggerEvent::Deactivated(t.clone()))
        })
    }

    /// Record an evaluation result; returns the transition it caused
    ///
    /// Error while active deactivates; True while false enables; False while
    /// true disables. Anything else leaves the trigger untouched.
    pub fn update_state(&self, name: &str, result: TriggerResult, now: i64) -> Option<TriggerEvent> {
        {
            let snap = self.snapshot.read();
            let t = snap.triggers.get(name)?;
            let changes = match result {
                TriggerResult::Error => t.active,
                TriggerResult::True => !t.state,
                TriggerResult::False => t.state,
            };
            if !changes {
                return None;
            }
        }
        self.modify(|table| {
            let Some(t) = table.get_mut(name) else {
                return Ok(None);
            };
            let event = match result {
                TriggerResult::Error if t.active => {
                    t.active = false;
                    t.state = false;
                    t.updated_at = now;
                    Some(TriggerEvent::Deactivated(t.clone()))
                },
                TriggerResult::True if !t.state => {
                    t.state = true;
                    t.updated_at = now;
                    Some(TriggerEvent::Enabled(t.clone()))
                },
                TriggerResult::False if t.state => {
                    t.state = false;
                    t.updated_at = now;
                    Some(TriggerEvent::Disabled(t.clone()))
                },
                _ => None,
            };
            Ok(event)
        })
        .ok()
        .flatten()
    }

    /// Link or unlink a reaction as a dependent of a trigger
    pub fn set_dependent(&self, trigger: &str, group: &str, dependent: &str, add: bool) -> Result<()> {
        self.modify(|table| {
            let t = table
                .get_mut(trigger)
                .ok_or_else(|| RuleError::NotFound(trigger.to_string()))?;
            if t.group != group {
                return Err(RuleError::InvalidReaction(format!(
                    "trigger {} is not in group {}",
                    trigger, group
                )));
            }
            if add {
                t.add_dependent(dependent);
            } else {
                t.remove_dependent(dependent);
            }
            Ok(())
        })
    }
}

fn verify_roots(table: &TriggerTable, trigger: &Trigger) -> Result<()> {
    for root in &trigger.roots {
        let Some(r) = table.get(root) else {
            return Err(RuleError::InvalidTrigger(format!(
                "failed to find dependent trigger: {}",
                root
            )));
        };
        if r.group != trigger.group {
            return Err(RuleError::InvalidTrigger(format!(
                "failed group dependent trigger: {}",
                root
            )));
        }
    }
    Ok(())
}

/// Reject an update whose new roots lead back to the trigger itself
fn ensure_acyclic(table: &TriggerTable, trigger: &Trigger) -> Result<()> {
    let mut stack: Vec<&str> = trigger.roots.iter().map(String::as_str).collect();
    let mut seen = BTreeSet::new();
    while let Some(name) = stack.pop() {
        if name == trigger.name {
            return Err(RuleError::Cycle(format!(
                "{} would depend on itself",
                trigger.name
            )));
        }
        if !seen.insert(name) {
            continue;
        }
        if let Some(t) = table.get(name) {
            stack.extend(t.roots.iter().map(String::as_str));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::types::{Operand, Operator};
    use stellar_packets::ValueType;

    fn item_def(name: &str) -> TriggerDefinition {
        TriggerDefinition {
            name: name.to_string(),
            group: "DEFAULT".to_string(),
            description: None,
            left: Operand::Item {
                target: "INST".to_string(),
                packet: "HEALTH_STATUS".to_string(),
                item: "TEMP1".to_string(),
                value_type: ValueType::Converted,
            },
            operator: Operator::Greater,
            right: Operand::Float { float: 50.0 },
        }
    }

    fn combo_def(name: &str, a: &str, b: &str) -> TriggerDefinition {
        TriggerDefinition {
            name: name.to_string(),
            group: "DEFAULT".to_string(),
            description: None,
            left: Operand::Trigger {
                trigger: a.to_string(),
            },
            operator: Operator::Or,
            right: Operand::Trigger {
                trigger: b.to_string(),
            },
        }
    }

    #[test]
    fn test_create_links_dependents_and_topics() {
        let base = TriggerBase::new(TopicKeys::default());
        base.create(&item_def("A"), 1).unwrap();
        base.create(&item_def("B"), 1).unwrap();
        base.create(&combo_def("C", "A", "B"), 1).unwrap();

        let snap = base.snapshot();
        assert_eq!(snap.get("A").unwrap().dependents, vec!["C".to_string()]);
        assert_eq!(snap.topics(), vec!["DEFAULT__DECOM__INST__HEALTH_STATUS".to_string()]);
        assert_eq!(snap.triggers_for("DEFAULT__DECOM__INST__HEALTH_STATUS").len(), 2);
        let roots = snap.triggers_for("DEFAULT__stellar_trigger_events__DEFAULT");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "C");
    }

    #[test]
    fn test_unknown_root_and_duplicate_rejected() {
        let base = TriggerBase::new(TopicKeys::default());
        assert!(base.create(&combo_def("C", "A", "B"), 1).is_err());
        base.create(&item_def("A"), 1).unwrap();
        assert!(matches!(
            base.create(&item_def("A"), 1),
            Err(RuleError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_delete_refused_with_dependents() {
        let base = TriggerBase::new(TopicKeys::default());
        base.create(&item_def("A"), 1).unwrap();
        base.create(&item_def("B"), 1).unwrap();
        base.create(&combo_def("C", "A", "B"), 1).unwrap();
        assert!(matches!(base.delete("A"), Err(RuleError::HasDependents { .. })));
        base.delete("C").unwrap();
        assert!(base.snapshot().get("A").unwrap().dependents.is_empty());
        base.delete("A").unwrap();
    }

    #[test]
    fn test_update_rejects_cycle() {
        let base = TriggerBase::new(TopicKeys::default());
        base.create(&item_def("A"), 1).unwrap();
        base.create(&item_def("B"), 1).unwrap();
        base.create(&combo_def("C", "A", "B"), 1).unwrap();
        base.create(&combo_def("D", "C", "B"), 1).unwrap();
        assert!(matches!(
            base.update(&combo_def("C", "D", "A"), 2),
            Err(RuleError::Cycle(_))
        ));
        assert_eq!(base.snapshot().get("C").unwrap().roots, vec!["A", "B"]);
    }

    #[test]
    fn test_update_state_transitions() {
        let base = TriggerBase::new(TopicKeys::default());
        base.create(&item_def("A"), 1).unwrap();
        assert!(base.update_state("A", TriggerResult::False, 2).is_none());
        assert!(matches!(
            base.update_state("A", TriggerResult::True, 3),
            Some(TriggerEvent::Enabled(_))
        ));
        assert!(base.update_state("A", TriggerResult::True, 4).is_none());
        assert!(matches!(
            base.update_state("A", TriggerResult::False, 5),
            Some(TriggerEvent::Disabled(_))
        ));
        assert!(matches!(
            base.update_state("A", TriggerResult::Error, 6),
            Some(TriggerEvent::Deactivated(_))
        ));
        let snap = base.snapshot();
        assert!(!snap.get("A").unwrap().active);
        assert!(snap.triggers_for("DEFAULT__DECOM__INST__HEALTH_STATUS").is_empty());
        assert!(base.update_state("A", TriggerResult::Error, 7).is_none());
    }

    #[test]
    fn test_old_snapshot_unaffected_by_writes() {
        let base = TriggerBase::new(TopicKeys::default());
        base.create(&item_def("A"), 1).unwrap();
        let before = base.snapshot();
        base.update_state("A", TriggerResult::True, 2);
        assert!(!before.get("A").unwrap().state);
        assert!(base.snapshot().get("A").unwrap().state);
        assert!(base.snapshot().version() > before.version());
    }
}
