//! Layer merging
//!
//! - Tables merge key by key
//! - Arrays are replaced wholesale
//! - Scalars: the overlay wins

use serde_json::Value;

/// Merge `overlay` into `base` and return the result.
pub fn deep_merge(mut base: Value, overlay: Value) -> Value {
    merge_into(&mut base, overlay);
    base
}

fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}

/// Merge layers in precedence order (first is lowest).
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_table_merge_keeps_siblings() {
        let base = json!({"script": {"phase": "2", "tail_lines": 3}});
        let overlay = json!({"script": {"tail_lines": 5}});
        let merged = deep_merge(base, overlay);

        assert_eq!(merged["script"]["phase"], "2");
        assert_eq!(merged["script"]["tail_lines"], 5);
    }

    #[test]
    fn test_array_is_replaced() {
        let base = json!({"devices": ["a", "b", "c"]});
        let overlay = json!({"devices": ["x"]});
        let merged = deep_merge(base, overlay);

        assert_eq!(merged["devices"], json!(["x"]));
    }

    #[test]
    fn test_scalar_replaces_table() {
        let base = json!({"verifier": {"program": "/bin/true"}});
        let overlay = json!({"verifier": null});
        let merged = deep_merge(base, overlay);

        assert!(merged["verifier"].is_null());
    }

    #[test]
    fn test_merge_layers_precedence() {
        let builtin = json!({"rules": {"required_count": 6}, "log": {"level": "info"}});
        let file = json!({"rules": {"required_count": 4}});
        let cli = json!({"log": {"level": "debug"}});

        let merged = merge_layers(vec![builtin, file, cli]);
        assert_eq!(merged["rules"]["required_count"], 4);
        assert_eq!(merged["log"]["level"], "debug");
    }
}
