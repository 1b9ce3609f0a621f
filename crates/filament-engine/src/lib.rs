//! Filament Engine - Reactive dataflow execution for node graphs
//!
//! This crate runs the graphs authored with the Filament visual editor.
//! Nodes are stateful instances wired by connections; when an input
//! changes, the affected node recomputes and its changed outputs
//! propagate to dependents through a globally ordered update queue. It
//! supports:
//!
//! - Dirty-flag propagation toward a fixed point, bounded per call so
//!   deliberately cyclic feedback graphs stay live
//! - Reusable components expanded into nested instance scopes
//! - Live structural patching of a running graph
//! - Panic-isolated node behaviors (a bad node never stalls the loop)
//!
//! # Architecture
//!
//! - `RuntimeContext`: owns the instance tree and drives `update()`
//! - `TypeRegistry` / `NodeBehavior`: pluggable node-type logic
//! - `InstanceScope`: hierarchical id spaces for component expansions
//! - `EventBus`: synchronous publish/subscribe with the host
//!
//! # Example
//!
//! ```ignore
//! use filament_engine::{NodeCategory, NodeType, RuntimeContext, TypeRegistry};
//!
//! let mut registry = TypeRegistry::new();
//! registry.register(NodeType::new("counter", NodeCategory::Processing, behavior))?;
//!
//! let mut ctx = RuntimeContext::new(registry, library);
//! ctx.instantiate("main")?;
//! ctx.update(); // once per frame
//! ```

pub mod arena;
pub mod behavior;
pub mod bus;
pub mod context;
pub mod error;
pub mod instance;
mod patch;
mod queue;
pub mod registry;
pub mod scope;
pub mod warnings;

// Re-export key types
pub use arena::InstanceArena;
pub use behavior::{CallbackBehavior, NodeBehavior, NodeState, NullBehavior, OutputSink};
pub use bus::{EventBus, OwnerToken};
pub use context::{EngineStats, RuntimeContext, DEFAULT_ITERATION_CAP};
pub use error::{EngineError, Result};
pub use instance::{InstanceId, InstancePhase, NodeInstance};
pub use registry::{NodeCategory, NodeType, TypeRegistry};
pub use scope::InstanceScope;
pub use warnings::WarningTracker;

// Re-export graph-model types that consumers will need
pub use filament_graph_model::{
    ComponentDescription, Connection, GraphChange, GraphLibrary, NodeDescription, PortDataType,
    PortDirection, PortSpec,
};
