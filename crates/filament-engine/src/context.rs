//! Runtime context and the global update loop
//!
//! [`RuntimeContext`] owns the type registry, the root instance scope,
//! the instance arena, and the pending-update queue. `update()` drains
//! dirty-propagation work toward a fixed point, bounded by an iteration
//! cap so deliberately cyclic feedback graphs advance a bounded amount
//! of work per call instead of spinning forever.

use std::mem;

use filament_graph_model::{GraphChange, GraphLibrary};

use crate::arena::InstanceArena;
use crate::bus::EventBus;
use crate::error::{EngineError, Result};
use crate::instance::{InstanceId, InstancePhase, NodeInstance};
use crate::patch;
use crate::queue::UpdateQueue;
use crate::registry::TypeRegistry;
use crate::scope::InstanceScope;
use crate::warnings::WarningTracker;

/// Default bound on queue pops per `update()` call
///
/// A fixed constant keeps one call O(cap) regardless of graph size,
/// which suits the once-per-frame calling pattern. Override with
/// [`RuntimeContext::with_iteration_cap`].
pub const DEFAULT_ITERATION_CAP: usize = 1000;

/// Observability snapshot of a running context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Instances currently alive across all scopes
    pub live_instances: usize,
    /// Instances awaiting an update turn
    pub queued_instances: usize,
    /// Number of `update()` calls made so far
    pub updates_run: u64,
    /// Currently-active warnings
    pub active_warnings: usize,
}

/// The orchestrator for one running program
///
/// All mutating calls must be serialized by the host; the context
/// performs no internal locking and never blocks or suspends.
pub struct RuntimeContext {
    pub(crate) registry: TypeRegistry,
    pub(crate) library: GraphLibrary,
    pub(crate) bus: EventBus,
    pub(crate) arena: InstanceArena,
    pub(crate) root: InstanceScope,
    pub(crate) queue: UpdateQueue,
    pub(crate) warnings: WarningTracker,
    iteration_cap: usize,
    update_counter: u64,
    in_update: bool,
    pending_changes: Vec<GraphChange>,
}

impl RuntimeContext {
    /// Create a context over a registry and a graph-library snapshot
    pub fn new(registry: TypeRegistry, library: GraphLibrary) -> Self {
        Self {
            registry,
            library,
            bus: EventBus::new(),
            arena: InstanceArena::new(),
            root: InstanceScope::default(),
            queue: UpdateQueue::new(),
            warnings: WarningTracker::new(),
            iteration_cap: DEFAULT_ITERATION_CAP,
            update_counter: 0,
            in_update: false,
            pending_changes: Vec::new(),
        }
    }

    /// Override the per-call iteration cap
    pub fn with_iteration_cap(mut self, cap: usize) -> Self {
        self.iteration_cap = cap.max(1);
        self
    }

    /// Instantiate a component as the root scope
    ///
    /// Any previously instantiated tree is torn down first.
    pub fn instantiate(&mut self, component: &str) -> Result<()> {
        let description = self
            .library
            .component(component)
            .cloned()
            .ok_or_else(|| EngineError::UnknownComponent(component.to_string()))?;
        self.root.reset(&mut self.arena);
        self.root = InstanceScope::build(
            &description,
            &self.library,
            &self.registry,
            &mut self.arena,
            &mut self.warnings,
            None,
        );
        Ok(())
    }

    /// The root instance scope
    pub fn root_scope(&self) -> &InstanceScope {
        &self.root
    }

    /// Borrow a live instance by id
    pub fn instance(&self, id: InstanceId) -> Option<&NodeInstance> {
        self.arena.get(id)
    }

    /// The instance arena (read-only)
    pub fn arena(&self) -> &InstanceArena {
        &self.arena
    }

    /// The event bus shared with the host
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The warning tracker
    pub fn warnings(&self) -> &WarningTracker {
        &self.warnings
    }

    /// The warning tracker (mutable, for the diagnostics observer)
    pub fn warnings_mut(&mut self) -> &mut WarningTracker {
        &mut self.warnings
    }

    /// The type registry
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The current graph-library snapshot
    pub fn library(&self) -> &GraphLibrary {
        &self.library
    }

    /// Push a value onto an instance's input and schedule it
    ///
    /// The port must currently exist on the instance; values for unknown
    /// ports are dropped with a warning.
    pub fn set_input(&mut self, id: InstanceId, port: &str, value: serde_json::Value) {
        let Some(instance) = self.arena.get_mut(id) else {
            return;
        };
        if !instance.has_input_port(port) {
            log::warn!(
                "no input port '{}' on node '{}', value dropped",
                port,
                instance.node_id()
            );
            return;
        }
        instance.pending_inputs.push((port.to_string(), value));
        self.schedule(id);
    }

    /// Mark an output dirty and enqueue its instance
    ///
    /// This is the entry point for host-driven asynchronous work: a
    /// timer or I/O callback flags an output, then the host's next
    /// `update()` call propagates it.
    pub fn flag_output_dirty(&mut self, id: InstanceId, port: &str) {
        let Some(instance) = self.arena.get_mut(id) else {
            return;
        };
        if !instance.has_output_port(port) {
            log::warn!(
                "no output port '{}' on node '{}', dirty flag dropped",
                port,
                instance.node_id()
            );
            return;
        }
        instance.dirty_outputs.insert(port.to_string());
        self.schedule(id);
    }

    /// Delete a root-scope node and its entire owned subtree
    ///
    /// Nested-scope nodes are deleted through [`GraphChange::NodeRemoved`].
    pub fn delete_node(&mut self, node_id: &str) -> bool {
        self.root.delete_node(node_id, &mut self.arena)
    }

    /// Tear down every instance, leaving an empty root scope
    pub fn reset(&mut self) {
        self.root.reset(&mut self.arena);
    }

    /// Apply a structural change from the authoring tool
    ///
    /// Changes arriving while an update pass is draining are queued and
    /// applied when the pass completes, so patching is race-free with
    /// respect to propagation.
    pub fn apply_change(&mut self, change: GraphChange) {
        if self.in_update {
            self.pending_changes.push(change);
            return;
        }
        self.apply_change_now(&change);
    }

    fn apply_change_now(&mut self, change: &GraphChange) {
        patch::apply(self, change);
        let payload = serde_json::to_value(change).unwrap_or_default();
        self.bus.publish("graph/patched", &payload);
    }

    /// Drain the pending-update queue toward a fixed point
    ///
    /// Stops when the queue is empty or the iteration cap is reached.
    /// Hitting the cap is not an error: cyclic feedback graphs have no
    /// fixed point by design, and each call advances them a bounded
    /// amount of work. Propagation is breadth-first by enqueue order.
    pub fn update(&mut self) {
        if self.in_update {
            log::warn!("re-entrant update() call ignored");
            return;
        }
        self.in_update = true;
        self.update_counter += 1;

        let mut iterations = 0usize;
        while iterations < self.iteration_cap {
            let Some(id) = self.queue.pop() else {
                break;
            };
            iterations += 1;
            self.process_instance(id);
        }
        if !self.queue.is_empty() {
            log::debug!(
                "update() stopped at iteration cap ({}), {} instances still queued",
                self.iteration_cap,
                self.queue.len()
            );
        }

        self.in_update = false;
        let pending = mem::take(&mut self.pending_changes);
        for change in pending {
            self.apply_change_now(&change);
        }
    }

    /// Logical number of `update()` calls so far
    pub fn update_count(&self) -> u64 {
        self.update_counter
    }

    /// Snapshot of runtime counters
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            live_instances: self.arena.live_count(),
            queued_instances: self.queue.len(),
            updates_run: self.update_counter,
            active_warnings: self.warnings.len(),
        }
    }

    /// Enqueue an instance and move it to the `Queued` phase
    pub(crate) fn schedule(&mut self, id: InstanceId) {
        if self.queue.enqueue(id) {
            if let Some(instance) = self.arena.get_mut(id) {
                instance.phase = InstancePhase::Queued;
            }
        }
    }

    /// One turn of the update loop for one instance
    fn process_instance(&mut self, id: InstanceId) {
        let Some(instance) = self.arena.get_mut(id) else {
            // Deleted after it was enqueued; stale queue entry.
            return;
        };
        instance.phase = InstancePhase::Updating;

        // Input setters for values its sources produced
        let pending = mem::take(&mut instance.pending_inputs);
        for (port, value) in pending {
            instance.apply_input(&port, value);
        }

        // Recompute; emitted outputs become dirty
        for (port, value) in instance.run_compute() {
            instance.output_values.insert(port.clone(), value);
            instance.dirty_outputs.insert(port);
        }

        // Reading the dirty outputs makes them clean; every input bound
        // to one goes dirty and its instance gets a turn.
        let dirty: Vec<String> = instance.dirty_outputs.drain().collect();
        let mut propagations: Vec<(InstanceId, String, Option<serde_json::Value>)> = Vec::new();
        for port in &dirty {
            let value = instance.read_output(port);
            for binding in instance.downstream.iter().filter(|b| &b.source_port == port) {
                propagations.push((binding.target, binding.target_port.clone(), value.clone()));
            }
        }
        instance.phase = InstancePhase::Idle;

        for (target, port, value) in propagations {
            if let Some(target_instance) = self.arena.get_mut(target) {
                if let Some(value) = value {
                    target_instance.pending_inputs.push((port, value));
                }
                self.schedule(target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::CallbackBehavior;
    use crate::registry::{NodeCategory, NodeType};
    use filament_graph_model::{
        ComponentDescription, Connection, NodeDescription, PortDataType, PortSpec,
    };
    use serde_json::json;
    use std::sync::Arc;

    /// Stores the last input value; compute re-emits it on `out`.
    fn relay_type() -> NodeType {
        let behavior = CallbackBehavior::new(|_| serde_json::Value::Null)
            .on_set_input(|state: &mut serde_json::Value, _port, value| {
                *state = value.clone();
            })
            .on_compute(|state, outputs| {
                outputs.emit("out", state.clone());
            })
            .on_output(|state, _port| Some(state.clone()));
        NodeType::new("relay", NodeCategory::Processing, Arc::new(behavior))
            .with_input(PortSpec::input("in", "In", PortDataType::Any))
            .with_output(PortSpec::output("out", "Out", PortDataType::Any))
    }

    /// Increments a counter on every input set; compute emits the count.
    fn pulse_type() -> NodeType {
        let behavior = CallbackBehavior::new(|_| 0i64)
            .on_set_input(|state: &mut i64, _port, _value| {
                *state += 1;
            })
            .on_compute(|state, outputs| {
                outputs.emit("out", json!(*state));
            })
            .on_output(|state, _port| Some(json!(*state)));
        NodeType::new("pulse", NodeCategory::Processing, Arc::new(behavior))
            .with_input(PortSpec::input("in", "In", PortDataType::Number))
            .with_output(PortSpec::output("out", "Out", PortDataType::Number))
    }

    fn context_with(types: Vec<NodeType>, component: ComponentDescription) -> RuntimeContext {
        let mut registry = TypeRegistry::new();
        for t in types {
            registry.register(t).unwrap();
        }
        let mut library = GraphLibrary::new();
        let name = component.name.clone();
        library.insert_component(component);
        let mut ctx = RuntimeContext::new(registry, library);
        ctx.instantiate(&name).unwrap();
        ctx
    }

    #[test]
    fn test_acyclic_propagation_reaches_fixed_point() {
        let component = ComponentDescription::new("main")
            .with_node(NodeDescription::new("a", "relay"))
            .with_node(NodeDescription::new("b", "relay"))
            .with_node(NodeDescription::new("c", "relay"))
            .with_connection(Connection::new("a", "out", "b", "in"))
            .with_connection(Connection::new("b", "out", "c", "in"));
        let mut ctx = context_with(vec![relay_type()], component);

        let a = ctx.root_scope().instance_id("a").unwrap();
        let c = ctx.root_scope().instance_id("c").unwrap();

        ctx.set_input(a, "in", json!("hello"));
        ctx.update();

        assert_eq!(ctx.instance(c).unwrap().output_value("out"), Some(&json!("hello")));
        assert_eq!(ctx.stats().queued_instances, 0);

        // Idempotent at the fixed point: nothing left to do
        ctx.update();
        assert_eq!(ctx.stats().queued_instances, 0);
        assert_eq!(ctx.instance(c).unwrap().phase(), InstancePhase::Idle);
    }

    #[test]
    fn test_two_node_cycle_bounded_by_iteration_cap() {
        // Canonical cap regression: each node bumps a counter per input
        // set and immediately redirties its output.
        let component = ComponentDescription::new("main")
            .with_node(NodeDescription::new("a", "pulse"))
            .with_node(NodeDescription::new("b", "pulse"))
            .with_connection(Connection::new("a", "out", "b", "in"))
            .with_connection(Connection::new("b", "out", "a", "in"));
        let mut ctx = context_with(vec![pulse_type()], component);

        let a = ctx.root_scope().instance_id("a").unwrap();
        let b = ctx.root_scope().instance_id("b").unwrap();

        ctx.flag_output_dirty(a, "out");
        ctx.update(); // must terminate

        let count_a = ctx.instance(a).unwrap().output_value("out").unwrap().as_i64().unwrap();
        let count_b = ctx.instance(b).unwrap().output_value("out").unwrap().as_i64().unwrap();
        assert!(count_a > 50, "cycle advanced only {} steps", count_a);
        assert!(count_b > 50, "cycle advanced only {} steps", count_b);

        // The cycle has no fixed point; work remains for the next frame
        assert!(ctx.stats().queued_instances > 0);
    }

    #[test]
    fn test_multiple_sources_into_one_input() {
        let component = ComponentDescription::new("main")
            .with_node(NodeDescription::new("a", "relay"))
            .with_node(NodeDescription::new("b", "relay"))
            .with_node(NodeDescription::new("sink", "pulse"))
            .with_connection(Connection::new("a", "out", "sink", "in"))
            .with_connection(Connection::new("b", "out", "sink", "in"));
        let mut ctx = context_with(vec![relay_type(), pulse_type()], component);

        let a = ctx.root_scope().instance_id("a").unwrap();
        let b = ctx.root_scope().instance_id("b").unwrap();
        let sink = ctx.root_scope().instance_id("sink").unwrap();

        ctx.set_input(a, "in", json!(1));
        ctx.set_input(b, "in", json!(2));
        ctx.update();

        // Both sources fed the same input
        let count = ctx.instance(sink).unwrap().output_value("out").unwrap().as_i64().unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_breadth_first_by_enqueue_order() {
        let component = ComponentDescription::new("main")
            .with_node(NodeDescription::new("first", "relay"))
            .with_node(NodeDescription::new("second", "relay"));
        let mut ctx = context_with(vec![relay_type()], component).with_iteration_cap(1);

        let first = ctx.root_scope().instance_id("first").unwrap();
        let second = ctx.root_scope().instance_id("second").unwrap();

        ctx.set_input(first, "in", json!(1));
        ctx.set_input(second, "in", json!(2));

        // Cap of 1: only the earlier-enqueued instance gets a turn
        ctx.update();
        assert_eq!(ctx.instance(first).unwrap().output_value("out"), Some(&json!(1)));
        assert_eq!(ctx.instance(second).unwrap().output_value("out"), None);
        assert_eq!(ctx.instance(second).unwrap().phase(), InstancePhase::Queued);

        ctx.update();
        assert_eq!(ctx.instance(second).unwrap().output_value("out"), Some(&json!(2)));
    }

    #[test]
    fn test_deleted_instance_leaves_stale_queue_entry_harmless() {
        let component = ComponentDescription::new("main")
            .with_node(NodeDescription::new("a", "relay"))
            .with_node(NodeDescription::new("b", "relay"))
            .with_connection(Connection::new("a", "out", "b", "in"));
        let mut ctx = context_with(vec![relay_type()], component);

        let a = ctx.root_scope().instance_id("a").unwrap();
        ctx.set_input(a, "in", json!(1));
        ctx.delete_node("b");
        ctx.update(); // b's enqueue-by-propagation target is gone

        assert_eq!(ctx.stats().live_instances, 1);
        assert_eq!(ctx.stats().queued_instances, 0);
    }

    #[test]
    fn test_set_input_on_unknown_port_dropped() {
        let component =
            ComponentDescription::new("main").with_node(NodeDescription::new("a", "relay"));
        let mut ctx = context_with(vec![relay_type()], component);

        let a = ctx.root_scope().instance_id("a").unwrap();
        ctx.set_input(a, "no-such-port", json!(1));
        assert_eq!(ctx.stats().queued_instances, 0);
    }

    #[test]
    fn test_instantiate_unknown_component_fails() {
        let registry = TypeRegistry::new();
        let library = GraphLibrary::new();
        let mut ctx = RuntimeContext::new(registry, library);
        let err = ctx.instantiate("missing").unwrap_err();
        assert!(matches!(err, EngineError::UnknownComponent(name) if name == "missing"));
    }

    #[test]
    fn test_reinstantiate_tears_down_previous_tree() {
        let component = ComponentDescription::new("main")
            .with_node(NodeDescription::new("a", "relay"))
            .with_node(NodeDescription::new("b", "relay"));
        let mut ctx = context_with(vec![relay_type()], component);
        assert_eq!(ctx.stats().live_instances, 2);

        ctx.instantiate("main").unwrap();
        assert_eq!(ctx.stats().live_instances, 2);
    }
}
