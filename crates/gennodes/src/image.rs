use gencore::{
    DispatchPlan, GraphError, NodeStrategy, PortDef, PortKind, PredictionRequest, StrategyPorts,
    WorkflowNode,
};
use serde_json::json;
use std::collections::HashMap;

/// Image generation step. The prompt comes from the wired `prompt` input
/// when present, otherwise from the node's own configuration.
pub struct ImageGenStrategy;

impl NodeStrategy for ImageGenStrategy {
    fn node_type(&self) -> &str {
        "image.generate"
    }

    fn ports(&self) -> StrategyPorts {
        StrategyPorts {
            inputs: vec![
                PortDef::new("prompt", PortKind::Text, false),
                PortDef::new("image", PortKind::Image, false),
            ],
            outputs: vec![PortDef::new("image", PortKind::Image, true)],
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
        if let Some(aspect) = node.data_str("aspect_ratio") {
            input["aspect_ratio"] = json!(aspect);
        }
        if let Some(source) = inputs.get("image").and_then(|v| v.as_str()) {
            input["image"] = json!(source);
        }
        if let Some(seed) = node.data_f64("seed") {
            input["seed"] = json!(seed as i64);
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
    fn builds_request_from_wired_prompt() {
        let node = WorkflowNode::new("b", "image.generate")
            .with_data(json!({ "model": "flux-dev", "aspect_ratio": "16:9" }));
        let mut inputs = HashMap::new();
        inputs.insert("prompt".to_string(), json!("a lighthouse at dusk"));

        match ImageGenStrategy.plan(&node, &inputs).unwrap() {
            DispatchPlan::Predict(request) => {
                assert_eq!(request.model, "flux-dev");
                assert_eq!(request.input["prompt"], "a lighthouse at dusk");
                assert_eq!(request.input["aspect_ratio"], "16:9");
            }
            other => panic!("expected predict plan, got {:?}", other),
        }
    }

    #[test]
    fn missing_model_is_a_validation_error() {
        let node = WorkflowNode::new("b", "image.generate").with_data(json!({ "prompt": "x" }));
        let err = ImageGenStrategy.plan(&node, &HashMap::new()).unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }
}
