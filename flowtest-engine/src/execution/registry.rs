// Export Registry
// Run-wide namespaced store of variables suites explicitly expose

use crate::value::VariableMap;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::debug;

/// Metadata recorded for every registered suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
    pub suite_name: String,
    /// Export names declared by the suite
    pub exports: Vec<String>,
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct RegistryState {
    nodes: BTreeMap<String, NodeInfo>,
    /// Keyed by `"<node_id>.<name>"`
    values: HashMap<String, Value>,
}

/// Shared export store for one run
///
/// Entries only accumulate; nothing is removed while a run is in progress.
/// Concurrent suites write disjoint keys, so a single lock around the maps is
/// enough.
#[derive(Debug, Default)]
pub struct ExportRegistry {
    state: RwLock<RegistryState>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave a half-written map entry, so a poisoned
    // lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register node metadata; repeated registration keeps the first entry
    pub fn register_node(
        &self,
        node_id: &str,
        suite_name: &str,
        export_names: &[String],
        source_path: Option<PathBuf>,
    ) {
        let mut state = self.write();
        state
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeInfo {
                node_id: node_id.to_string(),
                suite_name: suite_name.to_string(),
                exports: export_names.to_vec(),
                source_path,
            });
    }

    pub fn set_exported_variable(&self, node_id: &str, name: &str, value: Value) {
        debug!(node_id, name, "exported variable");
        self.write()
            .values
            .insert(format!("{}.{}", node_id, name), value);
    }

    /// Look up `"<node_id>.<name>"`
    pub fn get_exported_variable(&self, key: &str) -> Option<Value> {
        self.read().values.get(key).cloned()
    }

    /// Every exported entry, keyed by its full namespaced name
    pub fn get_all_exported_variables(&self) -> VariableMap {
        let state = self.read();
        let mut keys: Vec<&String> = state.values.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|k| (k.clone(), state.values[k].clone()))
            .collect()
    }

    /// Exports of one node, keyed by bare name
    pub fn exports_for(&self, node_id: &str) -> VariableMap {
        let prefix = format!("{}.", node_id);
        let state = self.read();
        let mut entries: Vec<(String, Value)> = state
            .values
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|name| (name.to_string(), v.clone())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().collect()
    }

    pub fn has_node(&self, node_id: &str) -> bool {
        self.read().nodes.contains_key(node_id)
    }

    pub fn node_info(&self, node_id: &str) -> Option<NodeInfo> {
        self.read().nodes.get(node_id).cloned()
    }

    /// Registered node ids in sorted order
    pub fn registered_nodes(&self) -> Vec<String> {
        self.read().nodes.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_register_is_idempotent() {
        let registry = ExportRegistry::new();
        registry.register_node("auth", "Auth", &["token".to_string()], None);
        registry.register_node("auth", "Other", &[], None);

        let info = registry.node_info("auth").unwrap();
        assert_eq!(info.suite_name, "Auth");
        assert_eq!(info.exports, vec!["token"]);
        assert!(registry.has_node("auth"));
        assert!(!registry.has_node("profile"));
    }

    #[test]
    fn test_namespaced_values() {
        let registry = ExportRegistry::new();
        registry.set_exported_variable("auth", "token", json!("abc123"));
        registry.set_exported_variable("auth", "user", json!({"id": 1}));
        registry.set_exported_variable("authx", "token", json!("other"));

        assert_eq!(registry.get_exported_variable("auth.token"), Some(json!("abc123")));
        assert_eq!(registry.get_exported_variable("auth.missing"), None);

        let exports = registry.exports_for("auth");
        assert_eq!(exports.len(), 2);
        assert_eq!(exports["user"], json!({"id": 1}));

        let all = registry.get_all_exported_variables();
        assert_eq!(all.len(), 3);
        assert_eq!(all["authx.token"], json!("other"));
    }

    #[test]
    fn test_concurrent_writers() {
        let registry = Arc::new(ExportRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.set_exported_variable(&format!("node{}", i), "value", json!(i));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.get_all_exported_variables().len(), 8);
    }
}
