//! Node behavior contract
//!
//! A node type's runtime logic is a small fixed capability surface:
//! construct state, destroy state, accept an input value, recompute, and
//! read an output back. Node-type-specific state lives behind an opaque
//! `Box<dyn Any>` handle that only the behavior itself downcasts.
//!
//! All hooks are synchronous and must not call back into the engine's
//! update loop; reentrant dirtying happens through the values a compute
//! emits, never through a direct drain.

use std::any::Any;
use std::collections::HashMap;

/// Opaque per-instance state handle
pub type NodeState = Box<dyn Any + Send>;

/// Collects the outputs a compute pass produced
///
/// Every value emitted here becomes a dirty output on the instance and
/// is propagated to its dependents by the update loop.
#[derive(Debug, Default)]
pub struct OutputSink {
    emitted: Vec<(String, serde_json::Value)>,
}

impl OutputSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a changed output value
    pub fn emit(&mut self, port: impl Into<String>, value: serde_json::Value) {
        self.emitted.push((port.into(), value));
    }

    /// Consume the sink, yielding emitted `(port, value)` pairs in order
    pub fn into_emitted(self) -> Vec<(String, serde_json::Value)> {
        self.emitted
    }

    /// Whether nothing was emitted
    pub fn is_empty(&self) -> bool {
        self.emitted.is_empty()
    }
}

/// Runtime logic for one node type
///
/// Implementations are shared across every instance of the type; all
/// per-instance data lives in the [`NodeState`] handle.
pub trait NodeBehavior: Send + Sync {
    /// Construct the private state for a new instance
    ///
    /// `parameters` are the literal values the author set on the node
    /// description.
    fn create_state(&self, parameters: &HashMap<String, serde_json::Value>) -> NodeState;

    /// Tear down private state before the instance is removed
    fn destroy(&self, _state: &mut NodeState) {}

    /// Accept a new value on an input port
    fn set_input(&self, _state: &mut NodeState, _port: &str, _value: &serde_json::Value) {}

    /// Recompute after inputs changed, emitting any outputs that changed
    fn compute(&self, _state: &mut NodeState, _outputs: &mut OutputSink) {}

    /// Read the current value of an output port
    ///
    /// Used when an output is flagged dirty externally (e.g. from a host
    /// timer callback) without a preceding compute having cached it.
    fn output(&self, _state: &NodeState, _port: &str) -> Option<serde_json::Value> {
        None
    }
}

/// A behavior with no state and no outputs
///
/// Used for container nodes (component expansions) and as a placeholder
/// in tests.
pub struct NullBehavior;

impl NodeBehavior for NullBehavior {
    fn create_state(&self, _parameters: &HashMap<String, serde_json::Value>) -> NodeState {
        Box::new(())
    }
}

type InitFn<S> = dyn Fn(&HashMap<String, serde_json::Value>) -> S + Send + Sync;
type SetFn<S> = dyn Fn(&mut S, &str, &serde_json::Value) + Send + Sync;
type ComputeFn<S> = dyn Fn(&mut S, &mut OutputSink) + Send + Sync;
type OutputFn<S> = dyn Fn(&S, &str) -> Option<serde_json::Value> + Send + Sync;

/// Closure-based [`NodeBehavior`] for hosts and tests
///
/// Wraps plain closures over a concrete state type `S`, handling the
/// `dyn Any` downcasts internally.
pub struct CallbackBehavior<S: Send + 'static> {
    init: Box<InitFn<S>>,
    set: Option<Box<SetFn<S>>>,
    compute: Option<Box<ComputeFn<S>>>,
    output: Option<Box<OutputFn<S>>>,
}

impl<S: Send + 'static> CallbackBehavior<S> {
    /// Create a behavior whose state is produced by `init`
    pub fn new(
        init: impl Fn(&HashMap<String, serde_json::Value>) -> S + Send + Sync + 'static,
    ) -> Self {
        Self {
            init: Box::new(init),
            set: None,
            compute: None,
            output: None,
        }
    }

    /// Set the input-setter hook
    pub fn on_set_input(
        mut self,
        set: impl Fn(&mut S, &str, &serde_json::Value) + Send + Sync + 'static,
    ) -> Self {
        self.set = Some(Box::new(set));
        self
    }

    /// Set the recompute hook
    pub fn on_compute(
        mut self,
        compute: impl Fn(&mut S, &mut OutputSink) + Send + Sync + 'static,
    ) -> Self {
        self.compute = Some(Box::new(compute));
        self
    }

    /// Set the output-getter hook
    pub fn on_output(
        mut self,
        output: impl Fn(&S, &str) -> Option<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        self.output = Some(Box::new(output));
        self
    }
}

impl<S: Send + 'static> NodeBehavior for CallbackBehavior<S> {
    fn create_state(&self, parameters: &HashMap<String, serde_json::Value>) -> NodeState {
        Box::new((self.init)(parameters))
    }

    fn set_input(&self, state: &mut NodeState, port: &str, value: &serde_json::Value) {
        if let (Some(set), Some(state)) = (&self.set, state.downcast_mut::<S>()) {
            set(state, port, value);
        }
    }

    fn compute(&self, state: &mut NodeState, outputs: &mut OutputSink) {
        if let (Some(compute), Some(state)) = (&self.compute, state.downcast_mut::<S>()) {
            compute(state, outputs);
        }
    }

    fn output(&self, state: &NodeState, port: &str) -> Option<serde_json::Value> {
        let output = self.output.as_ref()?;
        output(state.downcast_ref::<S>()?, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_callback_behavior_state_roundtrip() {
        let behavior = CallbackBehavior::new(|params| {
            params
                .get("start")
                .and_then(|v| v.as_i64())
                .unwrap_or_default()
        })
        .on_set_input(|state: &mut i64, _port, value| {
            *state += value.as_i64().unwrap_or(0);
        })
        .on_output(|state, _port| Some(json!(*state)));

        let mut params = HashMap::new();
        params.insert("start".to_string(), json!(10));
        let mut state = behavior.create_state(&params);

        behavior.set_input(&mut state, "in", &json!(5));
        assert_eq!(behavior.output(&state, "out"), Some(json!(15)));
    }

    #[test]
    fn test_callback_behavior_compute_emits() {
        let behavior = CallbackBehavior::new(|_| 0u32).on_compute(|state, outputs| {
            *state += 1;
            outputs.emit("count", json!(*state));
        });

        let mut state = behavior.create_state(&HashMap::new());
        let mut sink = OutputSink::new();
        behavior.compute(&mut state, &mut sink);
        behavior.compute(&mut state, &mut sink);

        assert_eq!(
            sink.into_emitted(),
            vec![
                ("count".to_string(), json!(1)),
                ("count".to_string(), json!(2)),
            ]
        );
    }

    #[test]
    fn test_null_behavior_has_no_output() {
        let behavior = NullBehavior;
        let state = behavior.create_state(&HashMap::new());
        assert_eq!(behavior.output(&state, "anything"), None);
    }
}
