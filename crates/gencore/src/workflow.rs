use crate::GraphError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Node identifier as assigned by the authoring canvas (opaque string).
pub type NodeId = String;

/// Complete workflow definition: a directed graph of generation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: WorkflowNode) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.edges.push(WorkflowEdge {
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        });
    }

    pub fn connect_handles(
        &mut self,
        source: impl Into<NodeId>,
        source_handle: impl Into<String>,
        target: impl Into<NodeId>,
        target_handle: impl Into<String>,
    ) {
        self.edges.push(WorkflowEdge {
            source: source.into(),
            target: target.into(),
            source_handle: Some(source_handle.into()),
            target_handle: Some(target_handle.into()),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Structural validation: every edge endpoint must name an existing node.
    pub fn validate_structure(&self) -> Result<(), GraphError> {
        for edge in &self.edges {
            if self.find_node(&edge.source).is_none() {
                return Err(GraphError::Validation(format!(
                    "edge source references unknown node '{}'",
                    edge.source
                )));
            }
            if self.find_node(&edge.target).is_none() {
                return Err(GraphError::Validation(format!(
                    "edge target references unknown node '{}'",
                    edge.target
                )));
            }
        }
        Ok(())
    }
}

/// One generation step in a workflow.
///
/// `data` is an opaque configuration payload interpreted by the node-type
/// strategy. Immutable once an execution starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WorkflowNode {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Fetch a string field from the node's configuration payload.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(|v| v.as_f64())
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(|v| v.as_bool())
    }
}

/// Directed edge between two nodes.
///
/// Handles disambiguate multi-input/output nodes: `source_handle` selects a
/// field of the upstream output, `target_handle` names the input port it
/// feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_dangling_edge() {
        let mut def = WorkflowDefinition::new("bad");
        def.add_node(WorkflowNode::new("a", "input"));
        def.connect("a", "missing");

        let err = def.validate_structure().unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn validate_accepts_well_formed_graph() {
        let mut def = WorkflowDefinition::new("ok");
        def.add_node(WorkflowNode::new("a", "input"));
        def.add_node(WorkflowNode::new("b", "output"));
        def.connect("a", "b");

        assert!(def.validate_structure().is_ok());
    }
}
