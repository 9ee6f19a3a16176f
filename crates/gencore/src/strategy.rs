use crate::{GraphError, PredictionRequest, WorkflowNode};
use std::collections::HashMap;

/// Kind of artifact flowing through a port. `Any` matches every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Image,
    Video,
    Text,
    Audio,
    Any,
}

impl PortKind {
    pub fn accepts(self, other: PortKind) -> bool {
        self == PortKind::Any || other == PortKind::Any || self == other
    }
}

/// Declared input or output port of a node type.
#[derive(Debug, Clone)]
pub struct PortDef {
    pub name: String,
    pub kind: PortKind,
    pub required: bool,
}

impl PortDef {
    pub fn new(name: impl Into<String>, kind: PortKind, required: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            required,
        }
    }
}

/// Port declarations for one node type, used by connection validation at
/// graph-authoring time.
#[derive(Debug, Clone, Default)]
pub struct StrategyPorts {
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

/// What dispatching a ready node amounts to.
#[derive(Debug, Clone)]
pub enum DispatchPlan {
    /// Local node: no provider round-trip, the output is known immediately.
    Immediate(serde_json::Value),
    /// Provider-backed node: submit this request and wait for the
    /// prediction to reach a terminal state.
    Predict(PredictionRequest),
}

/// Pluggable logic for one node type: maps the node's configuration payload
/// plus resolved upstream inputs to a dispatch plan.
///
/// Strategies are pure planners. They never talk to the provider
/// themselves; the job queue owns the provider call.
pub trait NodeStrategy: Send + Sync {
    /// Unique type identifier (e.g. "image.generate").
    fn node_type(&self) -> &str;

    fn ports(&self) -> StrategyPorts {
        StrategyPorts::default()
    }

    fn plan(
        &self,
        node: &WorkflowNode,
        inputs: &HashMap<String, serde_json::Value>,
    ) -> Result<DispatchPlan, GraphError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_port_accepts_everything() {
        assert!(PortKind::Any.accepts(PortKind::Image));
        assert!(PortKind::Video.accepts(PortKind::Any));
        assert!(PortKind::Text.accepts(PortKind::Text));
        assert!(!PortKind::Image.accepts(PortKind::Video));
    }
}
