//! Graph description model for Filament
//!
//! This crate defines the declarative, editable side of a Filament
//! program: components (named sub-graphs), node descriptions, ports,
//! and connections, plus the discrete structural-change events an
//! authoring tool emits while a graph is running.
//!
//! The execution engine (`filament-engine`) consumes these types as a
//! read-only snapshot at instantiation time and as a stream of
//! [`GraphChange`] events afterward; it never mutates them.

pub mod changes;
pub mod types;

pub use changes::GraphChange;
pub use types::{
    ComponentDescription, Connection, GraphLibrary, NodeDescription, NodeId, PortDataType,
    PortDirection, PortId, PortSpec,
};
