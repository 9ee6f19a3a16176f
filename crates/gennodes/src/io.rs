use gencore::{
    DispatchPlan, GraphError, NodeStrategy, PortDef, PortKind, StrategyPorts, WorkflowNode,
};
use std::collections::HashMap;

/// Entry node: surfaces its configured `value` as output, no provider
/// round-trip.
pub struct InputStrategy;

impl NodeStrategy for InputStrategy {
    fn node_type(&self) -> &str {
        "input"
    }

    fn ports(&self) -> StrategyPorts {
        StrategyPorts {
            inputs: vec![],
            outputs: vec![PortDef::new("value", PortKind::Any, true)],
        }
    }

    fn plan(
        &self,
        node: &WorkflowNode,
        _inputs: &HashMap<String, serde_json::Value>,
    ) -> Result<DispatchPlan, GraphError> {
        let value = node
            .data
            .get("value")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(DispatchPlan::Immediate(value))
    }
}

/// Sink node: gathers the artifacts wired into it.
pub struct OutputStrategy;

impl NodeStrategy for OutputStrategy {
    fn node_type(&self) -> &str {
        "output"
    }

    fn ports(&self) -> StrategyPorts {
        StrategyPorts {
            inputs: vec![PortDef::new("input", PortKind::Any, true)],
            outputs: vec![],
        }
    }

    fn plan(
        &self,
        _node: &WorkflowNode,
        inputs: &HashMap<String, serde_json::Value>,
    ) -> Result<DispatchPlan, GraphError> {
        let collected: serde_json::Map<String, serde_json::Value> = inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(DispatchPlan::Immediate(serde_json::Value::Object(
            collected,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_surfaces_configured_value() {
        let node = WorkflowNode::new("a", "input").with_data(json!({ "value": "a sunset" }));
        let plan = InputStrategy.plan(&node, &HashMap::new()).unwrap();
        match plan {
            DispatchPlan::Immediate(value) => assert_eq!(value, json!("a sunset")),
            other => panic!("expected immediate plan, got {:?}", other),
        }
    }

    #[test]
    fn output_collects_wired_inputs() {
        let node = WorkflowNode::new("c", "output");
        let mut inputs = HashMap::new();
        inputs.insert("input".to_string(), json!("https://files/img.png"));

        let plan = OutputStrategy.plan(&node, &inputs).unwrap();
        match plan {
            DispatchPlan::Immediate(value) => {
                assert_eq!(value, json!({ "input": "https://files/img.png" }))
            }
            other => panic!("expected immediate plan, got {:?}", other),
        }
    }
}
