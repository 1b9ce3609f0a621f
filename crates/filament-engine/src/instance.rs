//! Runtime embodiment of one node
//!
//! A [`NodeInstance`] owns its private behavior state, the current and
//! pending values on its ports, per-output dirty flags, and the wiring
//! (input bindings and downstream edges) the scope resolved for it.
//!
//! Behavior hooks are invoked through panic-isolating wrappers: a
//! misbehaving node type is logged and simply produces no output that
//! pass, it never stalls the update loop.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use filament_graph_model::PortSpec;

use crate::behavior::{NodeState, OutputSink};
use crate::registry::NodeType;

/// Opaque arena key for a live instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u64);

/// One source feeding an input port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    /// Instance producing the value
    pub source: InstanceId,
    /// Output port on the source
    pub source_port: String,
}

/// One dependent fed by an output port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    /// Output port on this instance
    pub source_port: String,
    /// Instance consuming the value
    pub target: InstanceId,
    /// Input port on the target
    pub target_port: String,
}

/// Scheduling state of an instance
///
/// `Idle` → `Queued` (a dirty output enqueued it) → `Updating` (the loop
/// is draining it) → back to `Idle`, or `Queued` again if the update
/// produced new dirty outputs. Deletion is always requested, never
/// preempts an in-flight update, so there is no transition out of
/// `Updating` other than these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstancePhase {
    #[default]
    Idle,
    Queued,
    Updating,
}

/// A live, stateful realization of one node within a running graph
pub struct NodeInstance {
    pub(crate) node_id: String,
    /// Bound descriptor; `None` for component containers
    pub(crate) node_type: Option<Arc<NodeType>>,
    /// Component this instance expands into, if it is a container
    pub(crate) component: Option<String>,
    /// Private behavior state, opaque to the engine
    pub(crate) state: Option<NodeState>,
    /// Live input port set (patchable at runtime for containers)
    pub(crate) input_specs: Vec<PortSpec>,
    /// Live output port set
    pub(crate) output_specs: Vec<PortSpec>,
    /// Connected sources per input port; an input may have several
    pub(crate) inputs: HashMap<String, Vec<InputBinding>>,
    /// Resolved dependents of this instance's outputs
    pub(crate) downstream: Vec<OutputBinding>,
    /// Last value seen per input port (literal or propagated)
    pub(crate) input_values: HashMap<String, serde_json::Value>,
    /// Cached output values
    pub(crate) output_values: HashMap<String, serde_json::Value>,
    /// Outputs whose value changed since last drained
    pub(crate) dirty_outputs: HashSet<String>,
    /// Input values waiting to be applied on this instance's next turn
    pub(crate) pending_inputs: Vec<(String, serde_json::Value)>,
    pub(crate) phase: InstancePhase,
    /// Owning parent instance; root nodes have none
    pub(crate) parent: Option<InstanceId>,
    /// Ids (same scope) of nodes declared directly under this one
    pub(crate) declared_children: Vec<String>,
}

impl NodeInstance {
    /// Create an instance of a primitive node type
    ///
    /// Constructs private state via the type's behavior, then applies
    /// port defaults and literal parameters through the input setters.
    pub(crate) fn from_type(
        node_id: impl Into<String>,
        node_type: Arc<NodeType>,
        parameters: &HashMap<String, serde_json::Value>,
        parent: Option<InstanceId>,
    ) -> Self {
        let node_id = node_id.into();
        let behavior = Arc::clone(&node_type.behavior);
        let state = panic::catch_unwind(AssertUnwindSafe(|| behavior.create_state(parameters)))
            .map_err(|_| {
                log::warn!("initialize hook panicked for node '{}'", node_id);
            })
            .ok();

        let mut instance = Self {
            node_id,
            input_specs: node_type.inputs.clone(),
            output_specs: node_type.outputs.clone(),
            node_type: Some(node_type),
            component: None,
            state,
            inputs: HashMap::new(),
            downstream: Vec::new(),
            input_values: HashMap::new(),
            output_values: HashMap::new(),
            dirty_outputs: HashSet::new(),
            pending_inputs: Vec::new(),
            phase: InstancePhase::Idle,
            parent,
            declared_children: Vec::new(),
        };
        instance.apply_initial_values(parameters);
        instance
    }

    /// Create a container instance for a component expansion
    pub(crate) fn container(
        node_id: impl Into<String>,
        component: impl Into<String>,
        ports: &[PortSpec],
        parameters: &HashMap<String, serde_json::Value>,
        parent: Option<InstanceId>,
    ) -> Self {
        let mut instance = Self {
            node_id: node_id.into(),
            node_type: None,
            component: Some(component.into()),
            state: None,
            input_specs: ports.iter().filter(|p| p.is_input()).cloned().collect(),
            output_specs: ports.iter().filter(|p| !p.is_input()).cloned().collect(),
            inputs: HashMap::new(),
            downstream: Vec::new(),
            input_values: HashMap::new(),
            output_values: HashMap::new(),
            dirty_outputs: HashSet::new(),
            pending_inputs: Vec::new(),
            phase: InstancePhase::Idle,
            parent,
            declared_children: Vec::new(),
        };
        instance.apply_initial_values(parameters);
        instance
    }

    fn apply_initial_values(&mut self, parameters: &HashMap<String, serde_json::Value>) {
        let specs = self.input_specs.clone();
        for spec in &specs {
            if let Some(value) = parameters.get(&spec.id) {
                self.apply_input(&spec.id, value.clone());
            } else if let Some(default) = &spec.default_value {
                self.apply_input(&spec.id, default.clone());
            }
        }
    }

    /// Id of this node within its scope
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Name of the bound type, or the component name for containers
    pub fn type_name(&self) -> &str {
        match (&self.node_type, &self.component) {
            (Some(t), _) => &t.name,
            (None, Some(c)) => c,
            (None, None) => "",
        }
    }

    /// Whether this instance is a component container
    pub fn is_container(&self) -> bool {
        self.component.is_some()
    }

    /// Current scheduling phase
    pub fn phase(&self) -> InstancePhase {
        self.phase
    }

    /// Owning parent instance, if any
    pub fn parent(&self) -> Option<InstanceId> {
        self.parent
    }

    /// Whether an input port with this id currently exists
    ///
    /// Numbered ports matching the type's dynamic template also count.
    pub fn has_input_port(&self, port: &str) -> bool {
        self.input_specs.iter().any(|s| s.id == port)
            || self
                .node_type
                .as_ref()
                .is_some_and(|t| matches_numbered(&t.input_template, port))
    }

    /// Whether an output port with this id currently exists
    pub fn has_output_port(&self, port: &str) -> bool {
        self.output_specs.iter().any(|s| s.id == port)
            || self
                .node_type
                .as_ref()
                .is_some_and(|t| matches_numbered(&t.output_template, port))
    }

    /// Last value applied to an input port
    pub fn input_value(&self, port: &str) -> Option<&serde_json::Value> {
        self.input_values.get(port)
    }

    /// Cached value of an output port
    pub fn output_value(&self, port: &str) -> Option<&serde_json::Value> {
        self.output_values.get(port)
    }

    /// Record a value on an input port and run the setter hook
    pub(crate) fn apply_input(&mut self, port: &str, value: serde_json::Value) {
        if let (Some(node_type), Some(state)) = (&self.node_type, self.state.as_mut()) {
            let behavior = &node_type.behavior;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                behavior.set_input(state, port, &value);
            }));
            if outcome.is_err() {
                log::warn!(
                    "set hook panicked for node '{}' input '{}'",
                    self.node_id,
                    port
                );
            }
        }
        self.input_values.insert(port.to_string(), value);
    }

    /// Run the compute hook, returning the outputs it emitted
    ///
    /// A panicking compute contributes no output this pass.
    pub(crate) fn run_compute(&mut self) -> Vec<(String, serde_json::Value)> {
        let (Some(node_type), Some(state)) = (&self.node_type, self.state.as_mut()) else {
            return Vec::new();
        };
        let behavior = &node_type.behavior;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut sink = OutputSink::new();
            behavior.compute(state, &mut sink);
            sink.into_emitted()
        }));
        match outcome {
            Ok(emitted) => emitted,
            Err(_) => {
                log::warn!("compute hook panicked for node '{}'", self.node_id);
                Vec::new()
            }
        }
    }

    /// Current value of an output: the getter hook, then the cache
    ///
    /// The hook sees live state, so a host-flagged dirty output reads
    /// fresh even when the last compute did not re-emit that port.
    pub(crate) fn read_output(&self, port: &str) -> Option<serde_json::Value> {
        if let (Some(node_type), Some(state)) = (self.node_type.as_ref(), self.state.as_ref()) {
            let behavior = &node_type.behavior;
            let fresh = panic::catch_unwind(AssertUnwindSafe(|| behavior.output(state, port)))
                .map_err(|_| {
                    log::warn!(
                        "get hook panicked for node '{}' output '{}'",
                        self.node_id,
                        port
                    );
                })
                .ok()
                .flatten();
            if fresh.is_some() {
                return fresh;
            }
        }
        self.output_values.get(port).cloned()
    }

    /// Run the delete hook and drop private state
    pub(crate) fn destroy(&mut self) {
        if let (Some(node_type), Some(state)) = (&self.node_type, self.state.as_mut()) {
            let behavior = &node_type.behavior;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| behavior.destroy(state)));
            if outcome.is_err() {
                log::warn!("delete hook panicked for node '{}'", self.node_id);
            }
        }
        self.state = None;
    }
}

/// "item3" matches a template whose id is "item"
fn matches_numbered(template: &Option<PortSpec>, port: &str) -> bool {
    template.as_ref().is_some_and(|t| {
        port.strip_prefix(t.id.as_str())
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    })
}

impl std::fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeInstance")
            .field("node_id", &self.node_id)
            .field("type", &self.type_name())
            .field("container", &self.is_container())
            .field("phase", &self.phase)
            .field("dirty_outputs", &self.dirty_outputs)
            .finish()
    }
}
