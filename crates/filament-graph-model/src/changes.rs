//! Structural-change events emitted by the authoring tool
//!
//! While a graph is running, edits arrive as a stream of discrete
//! [`GraphChange`] events. Each event is independently
//! idempotent-applicable: applying the same event twice yields the same
//! state as applying it once.

use serde::{Deserialize, Serialize};

use crate::types::{Connection, NodeDescription, NodeId, PortSpec};

/// A single structural edit to a running graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphChange {
    /// A component's boundary port list changed (add/remove/retype)
    #[serde(rename_all = "camelCase")]
    ComponentPortsUpdated {
        component: String,
        ports: Vec<PortSpec>,
    },

    /// A node was added to a component's graph
    #[serde(rename_all = "camelCase")]
    NodeAdded {
        component: String,
        /// Id of the declared parent node, or `None` for a root node
        parent: Option<NodeId>,
        node: NodeDescription,
    },

    /// A node was removed from a component's graph
    #[serde(rename_all = "camelCase")]
    NodeRemoved { component: String, node_id: NodeId },

    /// A connection was added to a component's graph
    #[serde(rename_all = "camelCase")]
    ConnectionAdded {
        component: String,
        connection: Connection,
    },

    /// A connection was removed from a component's graph
    #[serde(rename_all = "camelCase")]
    ConnectionRemoved {
        component: String,
        connection: Connection,
    },
}

impl GraphChange {
    /// Name of the component this change applies to
    pub fn component(&self) -> &str {
        match self {
            Self::ComponentPortsUpdated { component, .. }
            | Self::NodeAdded { component, .. }
            | Self::NodeRemoved { component, .. }
            | Self::ConnectionAdded { component, .. }
            | Self::ConnectionRemoved { component, .. } => component,
        }
    }
}
