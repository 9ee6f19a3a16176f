use gencore::{GraphError, NodeStrategy, StrategyPorts};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of node-type strategies.
///
/// The coordinator resolves every node type in a graph through this lookup;
/// a missing entry is a configuration error (`UnknownNodeType`) caught at
/// validation time, before any job is allocated.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn NodeStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn register(&mut self, strategy: Arc<dyn NodeStrategy>) {
        let node_type = strategy.node_type().to_string();
        tracing::debug!(node_type = %node_type, "Registering node strategy");
        self.strategies.insert(node_type, strategy);
    }

    pub fn get(&self, node_type: &str) -> Result<Arc<dyn NodeStrategy>, GraphError> {
        self.strategies
            .get(node_type)
            .cloned()
            .ok_or_else(|| GraphError::UnknownNodeType(node_type.to_string()))
    }

    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.strategies.keys().cloned().collect();
        types.sort();
        types
    }

    /// Port declarations for a node type, used by connection validation.
    pub fn ports(&self, node_type: &str) -> Option<StrategyPorts> {
        self.strategies.get(node_type).map(|s| s.ports())
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gencore::{DispatchPlan, WorkflowNode};

    struct Noop;

    impl NodeStrategy for Noop {
        fn node_type(&self) -> &str {
            "noop"
        }

        fn plan(
            &self,
            _node: &WorkflowNode,
            _inputs: &HashMap<String, serde_json::Value>,
        ) -> Result<DispatchPlan, GraphError> {
            Ok(DispatchPlan::Immediate(serde_json::Value::Null))
        }
    }

    #[test]
    fn unknown_node_type_is_an_error() {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(Noop));

        assert!(registry.get("noop").is_ok());
        match registry.get("nope") {
            Err(GraphError::UnknownNodeType(t)) => assert_eq!(t, "nope"),
            other => panic!("expected UnknownNodeType, got {:?}", other.map(|_| ())),
        }
    }
}
