//! Node type descriptors and the type registry
//!
//! The registry is a pure lookup table from type names to immutable
//! [`NodeType`] descriptors. Registration is the only mutation; once an
//! instance has bound to a descriptor the registry is never edited
//! (changing a type's shape requires a fresh registry).

use std::collections::HashMap;
use std::sync::Arc;

use filament_graph_model::{PortDirection, PortSpec};

use crate::behavior::NodeBehavior;
use crate::error::{EngineError, Result};

/// Category of a node type, used for grouping in the authoring UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    /// Input nodes (user input, timers, external values)
    Input,
    /// Output nodes (display, export)
    Output,
    /// Processing nodes
    Processing,
    /// Control flow nodes
    Control,
}

/// Immutable descriptor for one kind of node
///
/// Holds the type's port shape and its runtime behavior. Owned by the
/// [`TypeRegistry`] for the process lifetime and shared with instances
/// via `Arc`.
pub struct NodeType {
    /// Unique type name (e.g. "counter")
    pub name: String,
    /// UI grouping category
    pub category: NodeCategory,
    /// Input port specs
    pub inputs: Vec<PortSpec>,
    /// Output port specs
    pub outputs: Vec<PortSpec>,
    /// Template for numbered dynamic input ports; the spec's id is the
    /// prefix (a template "item" accepts "item0", "item1", ...)
    pub input_template: Option<PortSpec>,
    /// Template for numbered dynamic output ports
    pub output_template: Option<PortSpec>,
    /// Runtime logic shared by all instances of this type
    pub behavior: Arc<dyn NodeBehavior>,
}

impl NodeType {
    /// Create a node type with no ports
    pub fn new(
        name: impl Into<String>,
        category: NodeCategory,
        behavior: Arc<dyn NodeBehavior>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_template: None,
            output_template: None,
            behavior,
        }
    }

    /// Add an input port spec
    pub fn with_input(mut self, spec: PortSpec) -> Self {
        debug_assert_eq!(spec.direction, PortDirection::Input);
        self.inputs.push(spec);
        self
    }

    /// Add an output port spec
    pub fn with_output(mut self, spec: PortSpec) -> Self {
        debug_assert_eq!(spec.direction, PortDirection::Output);
        self.outputs.push(spec);
        self
    }

    /// Accept numbered input ports matching a template
    pub fn with_input_template(mut self, spec: PortSpec) -> Self {
        debug_assert_eq!(spec.direction, PortDirection::Input);
        self.input_template = Some(spec);
        self
    }

    /// Accept numbered output ports matching a template
    pub fn with_output_template(mut self, spec: PortSpec) -> Self {
        debug_assert_eq!(spec.direction, PortDirection::Output);
        self.output_template = Some(spec);
        self
    }

    /// Look up an input spec by port id
    pub fn input(&self, port: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|s| s.id == port)
    }

    /// Look up an output spec by port id
    pub fn output(&self, port: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|s| s.id == port)
    }
}

impl std::fmt::Debug for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeType")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

/// Registry of node types keyed by name
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<NodeType>>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type
    ///
    /// Fails with [`EngineError::DuplicateType`] if the name is taken.
    pub fn register(&mut self, node_type: NodeType) -> Result<()> {
        if self.types.contains_key(&node_type.name) {
            return Err(EngineError::DuplicateType(node_type.name));
        }
        self.types
            .insert(node_type.name.clone(), Arc::new(node_type));
        Ok(())
    }

    /// Resolve a type name to its descriptor
    ///
    /// Fails with [`EngineError::UnknownType`] if never registered.
    pub fn resolve(&self, name: &str) -> Result<Arc<NodeType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownType(name.to_string()))
    }

    /// Check if a type name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// List all registered type names
    pub fn type_names(&self) -> Vec<&str> {
        self.types.keys().map(|s| s.as_str()).collect()
    }
}
