//! Live patch bridge
//!
//! Applies structural-change events from the authoring tool to an
//! already-running instance tree, preserving unaffected state. Every
//! change is idempotent: applying the same event twice yields the same
//! state as applying it once. The [`RuntimeContext`] defers changes that
//! arrive while an update pass is draining, so patching never races with
//! propagation.

use filament_graph_model::{Connection, GraphChange, GraphLibrary, NodeDescription, PortSpec};

use crate::arena::InstanceArena;
use crate::context::RuntimeContext;
use crate::instance::InstanceId;

/// Apply one structural change to the running tree
pub(crate) fn apply(ctx: &mut RuntimeContext, change: &GraphChange) {
    log::debug!("applying graph change: {:?}", change);
    match change {
        GraphChange::ComponentPortsUpdated { component, ports } => {
            ports_updated(ctx, component, ports)
        }
        GraphChange::NodeAdded {
            component,
            parent,
            node,
        } => node_added(ctx, component, parent.as_deref(), node),
        GraphChange::NodeRemoved { component, node_id } => node_removed(ctx, component, node_id),
        GraphChange::ConnectionAdded {
            component,
            connection,
        } => connection_added(ctx, component, connection),
        GraphChange::ConnectionRemoved {
            component,
            connection,
        } => connection_removed(ctx, component, connection),
    }
}

/// Reconcile every live instance of a component with its new port list
///
/// New ports appear with their declared default and become immediately
/// settable; vanished ports are removed along with any binding to them.
/// Private state and still-present ports are untouched.
fn ports_updated(ctx: &mut RuntimeContext, component: &str, ports: &[PortSpec]) {
    // Keep the library snapshot in step so future expansions match
    let mut removed_inputs: Vec<String> = Vec::new();
    let mut removed_outputs: Vec<String> = Vec::new();
    if let Some(description) = ctx.library.component_mut(component) {
        let stale = |old: &&PortSpec| {
            !ports
                .iter()
                .any(|new| new.id == old.id && new.direction == old.direction)
        };
        removed_inputs = description
            .ports
            .iter()
            .filter(|p| p.is_input())
            .filter(stale)
            .map(|p| p.id.clone())
            .collect();
        removed_outputs = description
            .ports
            .iter()
            .filter(|p| !p.is_input())
            .filter(stale)
            .map(|p| p.id.clone())
            .collect();
        description.ports = ports.to_vec();
    }
    prune_stale_connections(&mut ctx.library, component, &removed_inputs, &removed_outputs);

    let containers: Vec<InstanceId> = ctx
        .arena
        .iter()
        .filter(|(_, instance)| instance.component.as_deref() == Some(component))
        .map(|(id, _)| id)
        .collect();
    for id in containers {
        reconcile_instance_ports(&mut ctx.arena, id, ports);
    }
}

fn reconcile_instance_ports(arena: &mut InstanceArena, id: InstanceId, ports: &[PortSpec]) {
    let new_inputs: Vec<PortSpec> = ports.iter().filter(|p| p.is_input()).cloned().collect();
    let new_outputs: Vec<PortSpec> = ports.iter().filter(|p| !p.is_input()).cloned().collect();

    let Some(instance) = arena.get_mut(id) else {
        return;
    };

    let removed_inputs: Vec<String> = instance
        .input_specs
        .iter()
        .filter(|old| !new_inputs.iter().any(|new| new.id == old.id))
        .map(|old| old.id.clone())
        .collect();
    let removed_outputs: Vec<String> = instance
        .output_specs
        .iter()
        .filter(|old| !new_outputs.iter().any(|new| new.id == old.id))
        .map(|old| old.id.clone())
        .collect();

    // Connections bound to a removed port are dropped on both ends
    let mut stale_sources: Vec<(InstanceId, String, String)> = Vec::new();
    for port in &removed_inputs {
        if let Some(bindings) = instance.inputs.remove(port) {
            for binding in bindings {
                stale_sources.push((binding.source, binding.source_port, port.clone()));
            }
        }
        instance.input_values.remove(port);
        instance.pending_inputs.retain(|(p, _)| p != port);
    }
    let mut stale_targets: Vec<(InstanceId, String, String)> = Vec::new();
    for port in &removed_outputs {
        instance.output_values.remove(port);
        instance.dirty_outputs.remove(port);
    }
    instance.downstream.retain(|binding| {
        if removed_outputs.contains(&binding.source_port) {
            stale_targets.push((
                binding.target,
                binding.target_port.clone(),
                binding.source_port.clone(),
            ));
            false
        } else {
            true
        }
    });

    // Added inputs get their declared default; existing values survive
    for spec in &new_inputs {
        if !instance.input_values.contains_key(&spec.id) {
            if let Some(default) = &spec.default_value {
                instance.apply_input(&spec.id, default.clone());
            }
        }
    }
    instance.input_specs = new_inputs;
    instance.output_specs = new_outputs;

    for (source, source_port, target_port) in stale_sources {
        if let Some(source_instance) = arena.get_mut(source) {
            source_instance.downstream.retain(|d| {
                !(d.target == id && d.target_port == target_port && d.source_port == source_port)
            });
        }
    }
    for (target, target_port, source_port) in stale_targets {
        if let Some(target_instance) = arena.get_mut(target) {
            if let Some(list) = target_instance.inputs.get_mut(&target_port) {
                list.retain(|b| !(b.source == id && b.source_port == source_port));
                if list.is_empty() {
                    target_instance.inputs.remove(&target_port);
                }
            }
        }
    }
}

/// Drop snapshot connections wired into a port the component no longer
/// has, in every component whose graph contains an instance of it
///
/// Without this, the next instantiation or expansion of the parent
/// component would re-bind a connection to a vanished port.
fn prune_stale_connections(
    library: &mut GraphLibrary,
    component: &str,
    removed_inputs: &[String],
    removed_outputs: &[String],
) {
    if removed_inputs.is_empty() && removed_outputs.is_empty() {
        return;
    }
    let names: Vec<String> = library
        .component_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    for name in names {
        let Some(description) = library.component_mut(&name) else {
            continue;
        };
        let connections = std::mem::take(&mut description.connections);
        let kept: Vec<Connection> = connections
            .into_iter()
            .filter(|c| {
                let target_stale = removed_inputs.contains(&c.target_port)
                    && references_component(&description.nodes, &c.target, component);
                let source_stale = removed_outputs.contains(&c.source_port)
                    && references_component(&description.nodes, &c.source, component);
                !(target_stale || source_stale)
            })
            .collect();
        description.connections = kept;
    }
}

/// Whether the node with this id (searching declared children too)
/// expands into the given component
fn references_component(nodes: &[NodeDescription], id: &str, component: &str) -> bool {
    nodes.iter().any(|n| {
        if n.id == id {
            n.component.as_deref() == Some(component) || n.node_type == component
        } else {
            references_component(&n.children, id, component)
        }
    })
}

fn node_added(
    ctx: &mut RuntimeContext,
    component: &str,
    parent: Option<&str>,
    node: &NodeDescription,
) {
    // Record in the library snapshot (skip if already present)
    if let Some(description) = ctx.library.component_mut(component) {
        let exists = match parent {
            Some(parent_id) => find_node_mut(&mut description.nodes, parent_id)
                .map(|p| {
                    if !p.children.iter().any(|c| c.id == node.id) {
                        p.children.push(node.clone());
                    }
                    true
                })
                .is_some(),
            None => {
                if description.find_node(&node.id).is_none() {
                    description.nodes.push(node.clone());
                }
                true
            }
        };
        if !exists {
            log::warn!(
                "nodeAdded: parent '{}' not found in component '{}'",
                parent.unwrap_or_default(),
                component
            );
        }
    }

    let library = &ctx.library;
    let registry = &ctx.registry;
    let arena = &mut ctx.arena;
    let warnings = &mut ctx.warnings;
    ctx.root.visit_scopes_mut(&mut |scope| {
        if scope.component_name() != component {
            return;
        }
        let parent_id = parent.and_then(|p| scope.instance_id(p));
        if parent.is_some() && parent_id.is_none() {
            log::warn!(
                "nodeAdded: declared parent '{}' missing in a live scope of '{}'",
                parent.unwrap_or_default(),
                component
            );
            return;
        }
        scope.import_node(node, parent_id, library, registry, arena, warnings);
    });
}

fn node_removed(ctx: &mut RuntimeContext, component: &str, node_id: &str) {
    if let Some(description) = ctx.library.component_mut(component) {
        remove_node_description(&mut description.nodes, node_id);
        description
            .connections
            .retain(|c| c.source != node_id && c.target != node_id);
    }

    let arena = &mut ctx.arena;
    ctx.root.visit_scopes_mut(&mut |scope| {
        if scope.component_name() == component {
            scope.delete_node(node_id, arena);
        }
    });
}

fn connection_added(ctx: &mut RuntimeContext, component: &str, connection: &Connection) {
    if let Some(description) = ctx.library.component_mut(component) {
        if !description.connections.contains(connection) {
            description.connections.push(connection.clone());
        }
    }

    let arena = &mut ctx.arena;
    let warnings = &mut ctx.warnings;
    ctx.root.visit_scopes_mut(&mut |scope| {
        if scope.component_name() == component {
            scope.bind_connection(connection, arena, warnings);
        }
    });
}

fn connection_removed(ctx: &mut RuntimeContext, component: &str, connection: &Connection) {
    if let Some(description) = ctx.library.component_mut(component) {
        description.connections.retain(|c| c != connection);
    }

    let arena = &mut ctx.arena;
    ctx.root.visit_scopes_mut(&mut |scope| {
        if scope.component_name() == component {
            scope.unbind_connection(connection, arena);
        }
    });
}

fn find_node_mut<'a>(
    nodes: &'a mut Vec<NodeDescription>,
    id: &str,
) -> Option<&'a mut NodeDescription> {
    for node in nodes.iter_mut() {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_node_mut(&mut node.children, id) {
            return Some(found);
        }
    }
    None
}

fn remove_node_description(nodes: &mut Vec<NodeDescription>, id: &str) -> bool {
    if let Some(pos) = nodes.iter().position(|n| n.id == id) {
        nodes.remove(pos);
        return true;
    }
    nodes
        .iter_mut()
        .any(|n| remove_node_description(&mut n.children, id))
}
