//! Trigger evaluation
//!
//! Recursive descent over trigger references with a per-pass memo. Every
//! failure (missing trigger, loop, type mismatch) collapses to
//! `TriggerResult::Error` instead of unwinding the worker.

use crate::types::{Operand, Operator, Trigger, TriggerResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use stellar_packets::ValueType;
use tracing::{debug, error};

/// Trigger table as seen by one evaluation pass
pub type TriggerTable = BTreeMap<String, Trigger>;

/// Telemetry lookups needed by item and limit operands
pub trait ValueSource: Send + Sync {
    fn item_value(
        &self,
        target: &str,
        packet: &str,
        item: &str,
        value_type: ValueType,
    ) -> Option<serde_json::Value>;

    fn limits_state(&self, target: &str, packet: &str, item: &str) -> Option<String>;
}

/// Memo of one evaluation pass
///
/// `results` holds resolved triggers; `paths` records, per head trigger, the
/// triggers reached from it during the pass; `stack` holds the triggers
/// currently being evaluated.
#[derive(Debug, Default)]
pub struct Visited {
    results: FxHashMap<String, TriggerResult>,
    paths: FxHashMap<String, FxHashMap<String, TriggerResult>>,
    stack: FxHashSet<String>,
}

impl Visited {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self, name: &str) -> Option<TriggerResult> {
        self.results.get(name).copied()
    }

    fn resolve(&mut self, name: &str, result: TriggerResult) -> TriggerResult {
        self.results.insert(name.to_string(), result);
        result
    }

    fn on_path(&self, head: &str, name: &str) -> bool {
        self.paths
            .get(head)
            .is_some_and(|path| path.contains_key(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OperandValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl OperandValue {
    fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(OperandValue::Number),
            serde_json::Value::String(s) => Some(OperandValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(OperandValue::Bool(*b)),
            _ => None,
        }
    }
}

/// Evaluate `trigger` as part of the pass headed by `head`
pub fn evaluate_trigger(
    head: &Trigger,
    trigger: &Trigger,
    visited: &mut Visited,
    triggers: &TriggerTable,
    source: &dyn ValueSource,
) -> TriggerResult {
    if let Some(result) = visited.result(&trigger.name) {
        return result;
    }
    if !visited.stack.insert(trigger.name.clone()) {
        error!("loop detected from {} -> {}", head.name, trigger.name);
        return visited.resolve(&trigger.name, TriggerResult::Error);
    }
    let result = evaluate_unresolved(head, trigger, visited, triggers, source);
    visited.stack.remove(&trigger.name);
    result
}

fn evaluate_unresolved(
    head: &Trigger,
    trigger: &Trigger,
    visited: &mut Visited,
    triggers: &TriggerTable,
    source: &dyn ValueSource,
) -> TriggerResult {
    visited.paths.entry(trigger.name.clone()).or_default();
    if trigger.name != head.name && visited.on_path(&head.name, &trigger.name) {
        error!("loop detected from {} -> {}", head.name, trigger.name);
        return visited.resolve(&trigger.name, TriggerResult::Error);
    }
    for root_name in &trigger.roots {
        if visited.result(root_name).is_some() {
            continue;
        }
        let Some(root) = triggers.get(root_name) else {
            error!("{} references unknown or inactive trigger {}", trigger.name, root_name);
            return visited.resolve(&trigger.name, TriggerResult::Error);
        };
        if root.name == head.name {
            error!("loop detected from {} -> {}", head.name, root.name);
            return visited.resolve(&trigger.name, TriggerResult::Error);
        }
        let result = evaluate_trigger(head, root, visited, triggers, source);
        debug!("{} root {} result: {:?}", trigger.name, root.name, result);
        visited.results.insert(root.name.clone(), result);
        visited
            .paths
            .entry(head.name.clone())
            .or_default()
            .insert(root.name.clone(), result);
    }
    if trigger
        .roots
        .iter()
        .any(|r| visited.result(r) == Some(TriggerResult::Error))
    {
        return visited.resolve(&trigger.name, TriggerResult::Error);
    }

    let left = operand_value(&trigger.left, visited, source);
    let right = operand_value(&trigger.right, visited, source);
    let (Some(left), Some(right)) = (left, right) else {
        return visited.resolve(&trigger.name, TriggerResult::False);
    };
    let result = evaluate(&left, trigger.operator, &right);
    visited.resolve(&trigger.name, result)
}

fn operand_value(
    operand: &Operand,
    visited: &Visited,
    source: &dyn ValueSource,
) -> Option<OperandValue> {
    match operand {
        Operand::Item {
            target,
            packet,
            item,
            value_type,
        } => source
            .item_value(target, packet, item, *value_type)
            .as_ref()
            .and_then(OperandValue::from_json),
        Operand::Limit {
            target,
            packet,
            item,
            limit,
        } => {
            let state = source.limits_state(target, packet, item)?;
            if state.contains('_') && state.contains(limit.as_str()) {
                Some(OperandValue::Text(limit.clone()))
            } else {
                Some(OperandValue::Text(state))
            }
        },
        Operand::Float { float } => Some(OperandValue::Number(*float)),
        Operand::String { string } => Some(OperandValue::Text(string.clone())),
        Operand::Trigger { trigger } => Some(OperandValue::Bool(
            visited.result(trigger) == Some(TriggerResult::True),
        )),
    }
}

fn evaluate(left: &OperandValue, operator: Operator, right: &OperandValue) -> TriggerResult {
    use OperandValue::*;
    let ordering = match (left, right) {
        (Number(a), Number(b)) => a.partial_cmp(b),
        (Text(a), Text(b)) => Some(a.cmp(b)),
        (Bool(a), Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let invalid = || {
        error!("invalid evaluate: ({:?} {} {:?})", left, operator, right);
        TriggerResult::Error
    };
    match operator {
        Operator::Greater => match (left, right, ordering) {
            (Bool(_), _, _) | (_, Bool(_), _) | (_, _, None) => invalid(),
            (_, _, Some(o)) => TriggerResult::from_bool(o == Ordering::Greater),
        },
        Operator::Less => match (left, right, ordering) {
            (Bool(_), _, _) | (_, Bool(_), _) | (_, _, None) => invalid(),
            (_, _, Some(o)) => TriggerResult::from_bool(o == Ordering::Less),
        },
        Operator::GreaterEqual => match (left, right, ordering) {
            (Bool(_), _, _) | (_, Bool(_), _) | (_, _, None) => invalid(),
            (_, _, Some(o)) => TriggerResult::from_bool(o != Ordering::Less),
        },
        Operator::LessEqual => match (left, right, ordering) {
            (Bool(_), _, _) | (_, Bool(_), _) | (_, _, None) => invalid(),
            (_, _, Some(o)) => TriggerResult::from_bool(o != Ordering::Greater),
        },
        Operator::Equal => TriggerResult::from_bool(ordering == Some(Ordering::Equal)),
        Operator::NotEqual => TriggerResult::from_bool(ordering != Some(Ordering::Equal)),
        Operator::And | Operator::Or => match (left, right) {
            (Bool(a), Bool(b)) => TriggerResult::from_bool(if operator == Operator::And {
                *a && *b
            } else {
                *a || *b
            }),
            _ => invalid(),
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::types::TriggerDefinition;
    use serde_json::json;

    struct Fixed(BTreeMap<String, serde_json::Value>, Option<String>);

    impl ValueSource for Fixed {
        fn item_value(
            &self,
            _target: &str,
            _packet: &str,
            item: &str,
            _value_type: ValueType,
        ) -> Option<serde_json::Value> {
            self.0.get(item).cloned()
        }

        fn limits_state(&self, _target: &str, _packet: &str, _item: &str) -> Option<String> {
            self.1.clone()
        }
    }

    fn source(values: &[(&str, serde_json::Value)]) -> Fixed {
        Fixed(
            values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            None,
        )
    }

    fn compare(name: &str, item: &str, operator: Operator, right: Operand) -> Trigger {
        TriggerDefinition {
            name: name.to_string(),
            group: "DEFAULT".to_string(),
            description: None,
            left: Operand::Item {
                target: "INST".to_string(),
                packet: "HEALTH_STATUS".to_string(),
                item: item.to_string(),
                value_type: ValueType::Converted,
            },
            operator,
            right,
        }
        .validate()
        .unwrap()
    }

    fn eval(trigger: &Trigger, table: &TriggerTable, src: &Fixed) -> TriggerResult {
        evaluate_trigger(trigger, trigger, &mut Visited::new(), table, src)
    }

    #[test]
    fn test_numeric_comparison() {
        let t = compare("T", "TEMP1", Operator::Greater, Operand::Float { float: 50.0 });
        let table = TriggerTable::new();
        assert_eq!(eval(&t, &table, &source(&[("TEMP1", json!(60))])), TriggerResult::True);
        assert_eq!(eval(&t, &table, &source(&[("TEMP1", json!(50))])), TriggerResult::False);
    }

    #[test]
    fn test_missing_value_is_false() {
        let t = compare("T", "TEMP1", Operator::Less, Operand::Float { float: 1.0 });
        assert_eq!(eval(&t, &TriggerTable::new(), &source(&[])), TriggerResult::False);
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let t = compare(
            "T",
            "MODE",
            Operator::Greater,
            Operand::Float { float: 1.0 },
        );
        let src = source(&[("MODE", json!("SAFE"))]);
        assert_eq!(eval(&t, &TriggerTable::new(), &src), TriggerResult::Error);

        let eq = compare(
            "E",
            "MODE",
            Operator::Equal,
            Operand::String {
                string: "SAFE".to_string(),
            },
        );
        assert_eq!(eval(&eq, &TriggerTable::new(), &src), TriggerResult::True);
    }

    #[test]
    fn test_limit_operand_collapses_to_color() {
        let t = TriggerDefinition {
            name: "L".to_string(),
            group: "DEFAULT".to_string(),
            description: None,
            left: Operand::Limit {
                target: "INST".to_string(),
                packet: "HEALTH_STATUS".to_string(),
                item: "TEMP1".to_string(),
                limit: "RED".to_string(),
            },
            operator: Operator::Equal,
            right: Operand::String {
                string: "RED".to_string(),
            },
        }
        .validate()
        .unwrap();
        let src = Fixed(BTreeMap::new(), Some("RED_HIGH".to_string()));
        assert_eq!(eval(&t, &TriggerTable::new(), &src), TriggerResult::True);
        let src = Fixed(BTreeMap::new(), Some("YELLOW_LOW".to_string()));
        assert_eq!(eval(&t, &TriggerTable::new(), &src), TriggerResult::False);
    }

    #[test]
    fn test_boolean_combination_and_memo() {
        let a = compare("A", "TEMP1", Operator::Greater, Operand::Float { float: 50.0 });
        let b = compare("B", "TEMP2", Operator::Less, Operand::Float { float: 10.0 });
        let both = TriggerDefinition {
            name: "BOTH".to_string(),
            group: "DEFAULT".to_string(),
            description: None,
            left: Operand::Trigger {
                trigger: "A".to_string(),
            },
            operator: Operator::And,
            right: Operand::Trigger {
                trigger: "B".to_string(),
            },
        }
        .validate()
        .unwrap();
        let table: TriggerTable = [a, b, both.clone()]
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        let src = source(&[("TEMP1", json!(60)), ("TEMP2", json!(5))]);
        let mut visited = Visited::new();
        assert_eq!(
            evaluate_trigger(&both, &both, &mut visited, &table, &src),
            TriggerResult::True
        );
        assert_eq!(visited.result("A"), Some(TriggerResult::True));
        assert_eq!(visited.result("B"), Some(TriggerResult::True));

        let src = source(&[("TEMP1", json!(60)), ("TEMP2", json!(50))]);
        assert_eq!(eval(&both, &table, &src), TriggerResult::False);
    }

    #[test]
    fn test_unknown_root_is_error() {
        let mut t = compare("T", "TEMP1", Operator::Greater, Operand::Float { float: 0.0 });
        t.operator = Operator::And;
        t.roots = vec!["MISSING".to_string()];
        assert_eq!(eval(&t, &TriggerTable::new(), &source(&[])), TriggerResult::Error);
    }

    fn and(name: &str, left: &str, right: &str) -> Trigger {
        TriggerDefinition {
            name: name.to_string(),
            group: "DEFAULT".to_string(),
            description: None,
            left: Operand::Trigger {
                trigger: left.to_string(),
            },
            operator: Operator::And,
            right: Operand::Trigger {
                trigger: right.to_string(),
            },
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_loop_below_head_is_error() {
        // A -> B -> C -> B never passes back through A
        let x = compare("X", "TEMP1", Operator::Greater, Operand::Float { float: 0.0 });
        let a = and("A", "B", "X");
        let table: TriggerTable = [x, a.clone(), and("B", "C", "X"), and("C", "B", "X")]
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        let src = source(&[("TEMP1", json!(1))]);
        let mut visited = Visited::new();
        assert_eq!(
            evaluate_trigger(&a, &a, &mut visited, &table, &src),
            TriggerResult::Error
        );
        assert_eq!(visited.result("B"), Some(TriggerResult::Error));
        assert!(visited.stack.is_empty());
    }
}
