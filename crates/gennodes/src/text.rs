use gencore::{
    DispatchPlan, GraphError, NodeStrategy, PortDef, PortKind, PredictionRequest, StrategyPorts,
    WorkflowNode,
};
use serde_json::json;
use std::collections::HashMap;

/// Text generation step, typically used to expand or rewrite prompts
/// upstream of an image or video node.
pub struct TextGenStrategy;

impl NodeStrategy for TextGenStrategy {
    fn node_type(&self) -> &str {
        "text.generate"
    }

    fn ports(&self) -> StrategyPorts {
        StrategyPorts {
            inputs: vec![PortDef::new("prompt", PortKind::Text, false)],
            outputs: vec![PortDef::new("text", PortKind::Text, true)],
        }
    }

    fn plan(
        &self,
        node: &WorkflowNode,
        inputs: &HashMap<String, serde_json::Value>,
    ) -> Result<DispatchPlan, GraphError> {
        let model = node.data_str("model").ok_or_else(|| {
            GraphError::Validation(format!("node '{}' has no model configured", node.id))
        })?;
        let prompt = inputs
            .get("prompt")
            .and_then(|v| v.as_str())
            .or_else(|| node.data_str("prompt"))
            .ok_or_else(|| {
                GraphError::Validation(format!("node '{}' has no prompt", node.id))
            })?;

        let mut input = json!({ "prompt": prompt });
        if let Some(system) = node.data_str("system_prompt") {
            input["system_prompt"] = json!(system);
        }
        if let Some(max_tokens) = node.data_f64("max_tokens") {
            input["max_tokens"] = json!(max_tokens as i64);
        }

        Ok(DispatchPlan::Predict(PredictionRequest {
            model: model.to_string(),
            input,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_with_system_prompt() {
        let node = WorkflowNode::new("t", "text.generate").with_data(json!({
            "model": "llama-3-70b",
            "system_prompt": "You write image prompts.",
        }));
        let mut inputs = HashMap::new();
        inputs.insert("prompt".to_string(), json!("describe a storm"));

        match TextGenStrategy.plan(&node, &inputs).unwrap() {
            DispatchPlan::Predict(request) => {
                assert_eq!(request.model, "llama-3-70b");
                assert_eq!(request.input["system_prompt"], "You write image prompts.");
            }
            other => panic!("expected predict plan, got {:?}", other),
        }
    }
}
