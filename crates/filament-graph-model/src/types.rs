//! Core types for graph descriptions
//!
//! These types define the editable structure of a Filament program:
//! components, node descriptions, ports, and connections.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node within its owning component
pub type NodeId = String;

/// Unique identifier for a port
pub type PortId = String;

/// The data type of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDataType {
    /// Accepts any type
    Any,
    /// Text string
    String,
    /// Numeric value
    Number,
    /// Boolean value
    Boolean,
    /// JSON object
    Json,
    /// Valueless pulse used to trigger downstream work
    Trigger,
}

impl PortDataType {
    /// Check if this type can connect to another type
    pub fn is_compatible_with(&self, other: &PortDataType) -> bool {
        // Any type is compatible with everything
        if matches!(self, PortDataType::Any) || matches!(other, PortDataType::Any) {
            return true;
        }
        self == other
    }
}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// Specification of a single port on a node type or component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    /// Port identifier, unique per direction within one node type
    pub id: PortId,
    /// Human-readable label
    pub label: String,
    /// Data type of the port
    pub data_type: PortDataType,
    /// Whether this is an input or an output
    pub direction: PortDirection,
    /// Default value applied when an input is not connected or set
    pub default_value: Option<serde_json::Value>,
}

impl PortSpec {
    /// Create an input port
    pub fn input(id: impl Into<String>, label: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            data_type,
            direction: PortDirection::Input,
            default_value: None,
        }
    }

    /// Create an output port
    pub fn output(
        id: impl Into<String>,
        label: impl Into<String>,
        data_type: PortDataType,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            data_type,
            direction: PortDirection::Output,
            default_value: None,
        }
    }

    /// Set a default value for this port
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Whether this spec describes an input port
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }
}

/// Description of one node in a component's graph
///
/// `children` are nodes declared visually inside this node (they share
/// the parent's id space); `component` is set when `node_type` names a
/// component rather than a primitive node type, in which case the engine
/// expands the node into a nested scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescription {
    /// Unique identifier within the owning component
    pub id: NodeId,
    /// Node type (references a registered type or a component)
    pub node_type: String,
    /// Literal parameter values set by the author
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Nodes declared directly under this one (same id space)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDescription>,
    /// Name of the component this node expands into, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

impl NodeDescription {
    /// Create a primitive node description
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            parameters: HashMap::new(),
            children: Vec::new(),
            component: None,
        }
    }

    /// Create a node that expands into a component
    pub fn component(id: impl Into<String>, component: impl Into<String>) -> Self {
        let component = component.into();
        Self {
            id: id.into(),
            node_type: component.clone(),
            parameters: HashMap::new(),
            children: Vec::new(),
            component: Some(component),
        }
    }

    /// Set a literal parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Add a declared child node
    pub fn with_child(mut self, child: NodeDescription) -> Self {
        self.children.push(child);
        self
    }
}

/// A connection between two ports within one component's graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Source node ID
    pub source: NodeId,
    /// Source port ID
    pub source_port: PortId,
    /// Target node ID
    pub target: NodeId,
    /// Target port ID
    pub target_port: PortId,
}

impl Connection {
    /// Create a connection
    pub fn new(
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_port: source_port.into(),
            target: target.into(),
            target_port: target_port.into(),
        }
    }
}

/// A named, reusable sub-graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescription {
    /// Unique component name
    pub name: String,
    /// Ports exposed on the component's boundary
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSpec>,
    /// Root-level nodes of the component's graph
    pub nodes: Vec<NodeDescription>,
    /// Connections between the component's nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
}

impl ComponentDescription {
    /// Create an empty component
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Add a root-level node
    pub fn with_node(mut self, node: NodeDescription) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add a connection
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Find a root-level node by ID
    pub fn find_node(&self, id: &str) -> Option<&NodeDescription> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Connections coming into a node
    pub fn incoming_connections<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.target == node_id)
    }

    /// Connections going out of a node
    pub fn outgoing_connections<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.source == node_id)
    }
}

/// A named collection of components — the engine's import boundary
///
/// The engine resolves component references through this library both at
/// instantiation time and when a live patch expands a component-typed
/// node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphLibrary {
    components: HashMap<String, ComponentDescription>,
}

impl GraphLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a component, replacing any existing one with the same name
    pub fn insert_component(&mut self, component: ComponentDescription) {
        self.components.insert(component.name.clone(), component);
    }

    /// Look up a component by name
    pub fn component(&self, name: &str) -> Option<&ComponentDescription> {
        self.components.get(name)
    }

    /// Look up a component by name (mutable)
    pub fn component_mut(&mut self, name: &str) -> Option<&mut ComponentDescription> {
        self.components.get_mut(name)
    }

    /// Check whether a component exists
    pub fn has_component(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Names of all components in the library
    pub fn component_names(&self) -> Vec<&str> {
        self.components.keys().map(|s| s.as_str()).collect()
    }
}
