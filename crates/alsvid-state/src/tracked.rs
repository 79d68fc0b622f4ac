//! State snapshots, temporary overrides and update recording.
//!
//! Nodes override a handful of calibrated fields for the duration of one
//! experiment (readout amplitude, DRAG coefficient) and must put them back
//! before the fit results are applied. [`snapshot`] captures a component,
//! [`Snapshot::revert`] restores it. The permanent updates a node applies are
//! recorded as the JSON diff between two machine snapshots ([`diff_state`]);
//! that diff is what lands in the run record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capture a component for later restoration.
pub fn snapshot<T: Clone>(value: &T) -> Snapshot<T> {
    Snapshot {
        saved: value.clone(),
    }
}

/// A saved copy of a component, restorable with [`Snapshot::revert`].
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    saved: T,
}

impl<T: Clone> Snapshot<T> {
    /// Restore the saved copy into `target`.
    pub fn revert(&self, target: &mut T) {
        *target = self.saved.clone();
    }

    /// Borrow the saved copy.
    pub fn saved(&self) -> &T {
        &self.saved
    }
}

/// One recorded change to the persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Dotted path into the state tree ("qubits.q1.f_01_hz").
    pub path: String,
    pub old: Value,
    pub new: Value,
}

/// Diff two serialized state trees into a flat update list.
///
/// Array changes are reported at the array path as a whole; objects recurse.
pub fn diff_state(before: &Value, after: &Value) -> Vec<StateUpdate> {
    let mut updates = Vec::new();
    diff_into(before, after, String::new(), &mut updates);
    updates
}

fn diff_into(before: &Value, after: &Value, path: String, out: &mut Vec<StateUpdate>) {
    match (before, after) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                match b.get(key) {
                    Some(new) => diff_into(old, new, child, out),
                    None => out.push(StateUpdate {
                        path: child,
                        old: old.clone(),
                        new: Value::Null,
                    }),
                }
            }
            for (key, new) in b {
                if !a.contains_key(key) {
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    out.push(StateUpdate {
                        path: child,
                        old: Value::Null,
                        new: new.clone(),
                    });
                }
            }
        }
        _ if before != after => out.push(StateUpdate {
            path,
            old: before.clone(),
            new: after.clone(),
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_revert() {
        let mut value = vec![1, 2, 3];
        let snap = snapshot(&value);
        value.push(4);
        snap.revert(&mut value);
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[test]
    fn test_diff_nested_change() {
        let before = json!({"qubits": {"q1": {"f_01_hz": 4.8e9, "t1_us": 30.0}}});
        let after = json!({"qubits": {"q1": {"f_01_hz": 4.81e9, "t1_us": 30.0}}});
        let updates = diff_state(&before, &after);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].path, "qubits.q1.f_01_hz");
        assert_eq!(updates[0].new, json!(4.81e9));
    }

    #[test]
    fn test_diff_added_and_removed_keys() {
        let before = json!({"a": 1, "gone": 2});
        let after = json!({"a": 1, "fresh": 3});
        let mut paths: Vec<_> = diff_state(&before, &after)
            .into_iter()
            .map(|u| u.path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["fresh", "gone"]);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let v = json!({"x": [1, 2, 3]});
        assert!(diff_state(&v, &v).is_empty());
    }
}
