use gencore::{
    DispatchPlan, GraphError, NodeStrategy, PortDef, PortKind, PredictionRequest, StrategyPorts,
    WorkflowNode,
};
use serde_json::json;
use std::collections::HashMap;

/// Video generation step: text-to-video, or image-to-video when an image
/// is wired in. Duration, resolution, and audio options live in the node
/// configuration and drive pricing.
pub struct VideoGenStrategy;

impl NodeStrategy for VideoGenStrategy {
    fn node_type(&self) -> &str {
        "video.generate"
    }

    fn ports(&self) -> StrategyPorts {
        StrategyPorts {
            inputs: vec![
                PortDef::new("prompt", PortKind::Text, false),
                PortDef::new("image", PortKind::Image, false),
            ],
            outputs: vec![PortDef::new("video", PortKind::Video, true)],
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
            .or_else(|| node.data_str("prompt"));
        let image = inputs.get("image").and_then(|v| v.as_str());
        if prompt.is_none() && image.is_none() {
            return Err(GraphError::Validation(format!(
                "node '{}' needs a prompt or a source image",
                node.id
            )));
        }

        let mut input = json!({});
        if let Some(prompt) = prompt {
            input["prompt"] = json!(prompt);
        }
        if let Some(image) = image {
            input["image"] = json!(image);
        }
        if let Some(duration) = node.data_f64("duration") {
            input["duration"] = json!(duration);
        }
        if let Some(resolution) = node.data_str("resolution") {
            input["resolution"] = json!(resolution);
        }
        if node.data_bool("with_audio").unwrap_or(false) {
            input["generate_audio"] = json!(true);
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
    fn image_to_video_request_carries_options() {
        let node = WorkflowNode::new("v", "video.generate").with_data(json!({
            "model": "veo-3",
            "duration": 8,
            "resolution": "1080p",
            "with_audio": true,
        }));
        let mut inputs = HashMap::new();
        inputs.insert("image".to_string(), json!("https://files/frame.png"));

        match VideoGenStrategy.plan(&node, &inputs).unwrap() {
            DispatchPlan::Predict(request) => {
                assert_eq!(request.model, "veo-3");
                assert_eq!(request.input["image"], "https://files/frame.png");
                assert_eq!(request.input["duration"], 8.0);
                assert_eq!(request.input["generate_audio"], true);
            }
            other => panic!("expected predict plan, got {:?}", other),
        }
    }

    #[test]
    fn needs_prompt_or_image() {
        let node = WorkflowNode::new("v", "video.generate").with_data(json!({ "model": "veo-3" }));
        let err = VideoGenStrategy.plan(&node, &HashMap::new()).unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }
}
