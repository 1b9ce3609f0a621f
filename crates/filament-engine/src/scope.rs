//! Hierarchical instance scopes
//!
//! A scope owns the instances built from one component instantiation:
//! a flat id→instance map plus one child scope per component-typed node
//! (keyed by the container instance that spawned it). Nodes declared
//! directly under another node share the parent's scope, so sibling
//! lookup is a single hash access with no tree walk; crossing into a
//! component expansion is always explicit via [`InstanceScope::child_scope`].

use std::collections::HashMap;

use filament_graph_model::{
    ComponentDescription, Connection, GraphLibrary, NodeDescription,
};

use crate::arena::InstanceArena;
use crate::instance::{InputBinding, InstanceId, NodeInstance, OutputBinding};
use crate::registry::TypeRegistry;
use crate::warnings::WarningTracker;

/// Warning key recorded when a node references an unregistered type
pub const WARN_UNKNOWN_TYPE: &str = "unknownType";
/// Warning key recorded when a connection endpoint cannot be resolved
pub const WARN_UNRESOLVED_CONNECTION: &str = "unresolvedConnection";

/// Registry of live instances for one component instantiation
#[derive(Debug, Default)]
pub struct InstanceScope {
    component: String,
    nodes: HashMap<String, InstanceId>,
    /// Root-level ids in build order (everything else is a declared child)
    roots: Vec<String>,
    /// Child scopes keyed by the container instance that spawned them
    expansions: Vec<(InstanceId, InstanceScope)>,
}

impl InstanceScope {
    /// Build a scope from a component description
    ///
    /// Structural problems are isolated per node: a bad entry is skipped
    /// with a warning and its siblings still build.
    pub(crate) fn build(
        component: &ComponentDescription,
        library: &GraphLibrary,
        registry: &TypeRegistry,
        arena: &mut InstanceArena,
        warnings: &mut WarningTracker,
        parent: Option<InstanceId>,
    ) -> Self {
        let mut scope = Self {
            component: component.name.clone(),
            nodes: HashMap::new(),
            roots: Vec::new(),
            expansions: Vec::new(),
        };
        for node in &component.nodes {
            scope.import_node(node, parent, library, registry, arena, warnings);
        }
        for connection in &component.connections {
            scope.bind_connection(connection, arena, warnings);
        }
        scope
    }

    /// Import one node description into this scope
    ///
    /// Declared children land in the same scope; a component-typed node
    /// becomes a container owning a recursively built child scope.
    /// Returns `None` when the node could not be built.
    pub(crate) fn import_node(
        &mut self,
        node: &NodeDescription,
        parent: Option<InstanceId>,
        library: &GraphLibrary,
        registry: &TypeRegistry,
        arena: &mut InstanceArena,
        warnings: &mut WarningTracker,
    ) -> Option<InstanceId> {
        if self.nodes.contains_key(&node.id) {
            log::debug!(
                "node '{}' already exists in scope '{}', skipping",
                node.id,
                self.component
            );
            return self.nodes.get(&node.id).copied();
        }

        // An explicit component reference wins; otherwise a registered
        // primitive type, then a component sharing the type name.
        let component_name = node.component.clone().or_else(|| {
            if !registry.contains(&node.node_type) && library.has_component(&node.node_type) {
                Some(node.node_type.clone())
            } else {
                None
            }
        });

        let id = match component_name {
            Some(component_name) => {
                let Some(expansion) = library.component(&component_name) else {
                    log::warn!(
                        "node '{}' references unknown component '{}', skipping",
                        node.id,
                        component_name
                    );
                    warnings.set_warning(
                        node.id.clone(),
                        WARN_UNKNOWN_TYPE,
                        serde_json::json!(component_name),
                    );
                    return None;
                };
                let instance = NodeInstance::container(
                    node.id.clone(),
                    component_name,
                    &expansion.ports,
                    &node.parameters,
                    parent,
                );
                let id = arena.insert(instance);
                let child_scope =
                    Self::build(expansion, library, registry, arena, warnings, Some(id));
                self.expansions.push((id, child_scope));
                id
            }
            None => match registry.resolve(&node.node_type) {
                Ok(node_type) => {
                    let instance =
                        NodeInstance::from_type(node.id.clone(), node_type, &node.parameters, parent);
                    arena.insert(instance)
                }
                Err(err) => {
                    log::warn!("skipping node '{}': {}", node.id, err);
                    warnings.set_warning(
                        node.id.clone(),
                        WARN_UNKNOWN_TYPE,
                        serde_json::json!(node.node_type),
                    );
                    return None;
                }
            },
        };

        self.nodes.insert(node.id.clone(), id);
        match parent {
            Some(parent_id) => {
                if let Some(parent_instance) = arena.get_mut(parent_id) {
                    // Only record as declared child when the parent lives
                    // in this scope (containers parent their expansion's
                    // nodes without declaring them).
                    if self.nodes.values().any(|&existing| existing == parent_id) {
                        parent_instance.declared_children.push(node.id.clone());
                    }
                }
            }
            None => self.roots.push(node.id.clone()),
        }

        // Declared children share this scope's flat id space
        for child in &node.children {
            self.import_node(child, Some(id), library, registry, arena, warnings);
        }

        Some(id)
    }

    /// Resolve a connection into input/output bindings
    ///
    /// Both endpoints must exist in this scope. An unresolved connection
    /// is dropped with a warning, never fatal. Returns whether the
    /// connection is bound after the call (idempotent).
    pub(crate) fn bind_connection(
        &self,
        connection: &Connection,
        arena: &mut InstanceArena,
        warnings: &mut WarningTracker,
    ) -> bool {
        let (Some(&source), Some(&target)) = (
            self.nodes.get(&connection.source),
            self.nodes.get(&connection.target),
        ) else {
            log::warn!(
                "dropping connection {}:{} -> {}:{} in '{}': endpoint not found",
                connection.source,
                connection.source_port,
                connection.target,
                connection.target_port,
                self.component
            );
            warnings.set_warning(
                connection.target.clone(),
                WARN_UNRESOLVED_CONNECTION,
                serde_json::to_value(connection).unwrap_or_default(),
            );
            return false;
        };

        let binding = InputBinding {
            source,
            source_port: connection.source_port.clone(),
        };
        let already_bound = arena
            .get(target)
            .map(|t| {
                t.inputs
                    .get(&connection.target_port)
                    .is_some_and(|list| list.contains(&binding))
            })
            .unwrap_or(false);
        if already_bound {
            return true;
        }

        if let Some(target_instance) = arena.get_mut(target) {
            target_instance
                .inputs
                .entry(connection.target_port.clone())
                .or_default()
                .push(binding);
        }
        if let Some(source_instance) = arena.get_mut(source) {
            source_instance.downstream.push(OutputBinding {
                source_port: connection.source_port.clone(),
                target,
                target_port: connection.target_port.clone(),
            });
        }
        true
    }

    /// Remove a previously bound connection (idempotent)
    pub(crate) fn unbind_connection(&self, connection: &Connection, arena: &mut InstanceArena) {
        let (Some(&source), Some(&target)) = (
            self.nodes.get(&connection.source),
            self.nodes.get(&connection.target),
        ) else {
            return;
        };

        if let Some(target_instance) = arena.get_mut(target) {
            if let Some(list) = target_instance.inputs.get_mut(&connection.target_port) {
                list.retain(|b| !(b.source == source && b.source_port == connection.source_port));
                if list.is_empty() {
                    target_instance.inputs.remove(&connection.target_port);
                }
            }
        }
        if let Some(source_instance) = arena.get_mut(source) {
            source_instance.downstream.retain(|b| {
                !(b.source_port == connection.source_port
                    && b.target == target
                    && b.target_port == connection.target_port)
            });
        }
    }

    /// Delete a node and its entire owned subtree
    ///
    /// Order: declared children, then the spawned child scope (which
    /// cascades into further nested scopes), then the delete hook, then
    /// removal from the scope map. Hooks run bottom-up; every instance
    /// in the subtree leaves the arena exactly once.
    pub(crate) fn delete_node(&mut self, node_id: &str, arena: &mut InstanceArena) -> bool {
        let Some(&id) = self.nodes.get(node_id) else {
            return false;
        };

        let declared = arena
            .get(id)
            .map(|i| i.declared_children.clone())
            .unwrap_or_default();
        for child in declared {
            self.delete_node(&child, arena);
        }

        if let Some(pos) = self.expansions.iter().position(|(owner, _)| *owner == id) {
            let (_, mut child_scope) = self.expansions.remove(pos);
            child_scope.reset(arena);
        }

        detach_instance(arena, id);
        if let Some(instance) = arena.get_mut(id) {
            instance.destroy();
        }
        self.nodes.remove(node_id);
        self.roots.retain(|r| r != node_id);
        arena.remove(id);
        true
    }

    /// Delete every instance this scope owns, leaving it empty
    ///
    /// Safe to call on an already-empty scope.
    pub(crate) fn reset(&mut self, arena: &mut InstanceArena) {
        let roots = std::mem::take(&mut self.roots);
        for node_id in roots {
            self.delete_node(&node_id, arena);
        }
        // Anything left had a dangling parent link; sweep it too.
        for node_id in self.nodes.keys().cloned().collect::<Vec<_>>() {
            self.delete_node(&node_id, arena);
        }
    }

    /// Name of the component this scope was instantiated from
    pub fn component_name(&self) -> &str {
        &self.component
    }

    /// Whether an id exists in this scope (local map only, no tree walk)
    pub fn has_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Resolve an id in this scope (local map only)
    pub fn instance_id(&self, node_id: &str) -> Option<InstanceId> {
        self.nodes.get(node_id).copied()
    }

    /// Child scope spawned by a container instance, if any
    pub fn child_scope(&self, container: InstanceId) -> Option<&InstanceScope> {
        self.expansions
            .iter()
            .find(|(owner, _)| *owner == container)
            .map(|(_, scope)| scope)
    }

    /// Number of nodes in this scope (excluding nested scopes)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether this scope owns no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visit this scope and every nested scope, depth-first
    pub(crate) fn visit_scopes_mut(&mut self, visit: &mut dyn FnMut(&mut InstanceScope)) {
        visit(self);
        for (_, child) in &mut self.expansions {
            child.visit_scopes_mut(visit);
        }
    }
}

/// Drop every binding that references `id` from the instances it is
/// wired to, in both directions.
fn detach_instance(arena: &mut InstanceArena, id: InstanceId) {
    let (in_edges, out_edges) = match arena.get(id) {
        Some(instance) => (instance.inputs.clone(), instance.downstream.clone()),
        None => return,
    };

    for (port, bindings) in in_edges {
        for binding in bindings {
            if let Some(source) = arena.get_mut(binding.source) {
                source.downstream.retain(|d| {
                    !(d.target == id
                        && d.target_port == port
                        && d.source_port == binding.source_port)
                });
            }
        }
    }
    for binding in out_edges {
        if let Some(target) = arena.get_mut(binding.target) {
            if let Some(list) = target.inputs.get_mut(&binding.target_port) {
                list.retain(|b| !(b.source == id && b.source_port == binding.source_port));
                if list.is_empty() {
                    target.inputs.remove(&binding.target_port);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::NullBehavior;
    use crate::registry::{NodeCategory, NodeType};
    use filament_graph_model::{PortDataType, PortSpec};
    use std::sync::Arc;

    fn basic_registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .register(
                NodeType::new("relay", NodeCategory::Processing, Arc::new(NullBehavior))
                    .with_input(PortSpec::input("in", "In", PortDataType::Any))
                    .with_output(PortSpec::output("out", "Out", PortDataType::Any)),
            )
            .unwrap();
        registry
    }

    fn build_scope(
        component: ComponentDescription,
        library: &GraphLibrary,
    ) -> (InstanceScope, InstanceArena, WarningTracker) {
        let registry = basic_registry();
        let mut arena = InstanceArena::new();
        let mut warnings = WarningTracker::new();
        let scope = InstanceScope::build(
            &component,
            library,
            &registry,
            &mut arena,
            &mut warnings,
            None,
        );
        (scope, arena, warnings)
    }

    fn nested_library() -> GraphLibrary {
        // inner: two relays; outer: a relay + two inner expansions
        let mut library = GraphLibrary::new();
        library.insert_component(
            ComponentDescription::new("inner")
                .with_node(NodeDescription::new("x", "relay"))
                .with_node(NodeDescription::new("y", "relay")),
        );
        library.insert_component(
            ComponentDescription::new("outer")
                .with_node(NodeDescription::new("top", "relay"))
                .with_node(NodeDescription::component("first", "inner"))
                .with_node(NodeDescription::component("second", "inner")),
        );
        library
    }

    #[test]
    fn test_component_expansion_builds_nested_scopes() {
        let library = nested_library();
        let outer = library.component("outer").unwrap().clone();
        let (scope, arena, _) = build_scope(outer, &library);

        // 1 relay + 2 containers + 2 * 2 inner relays
        assert_eq!(arena.live_count(), 7);
        assert_eq!(scope.len(), 3);

        // Ids repeat across sibling scopes but not within one
        let first = scope.instance_id("first").unwrap();
        let second = scope.instance_id("second").unwrap();
        assert!(scope.child_scope(first).unwrap().has_node("x"));
        assert!(scope.child_scope(second).unwrap().has_node("x"));

        // Lookup is local: expansion contents are not visible here
        assert!(!scope.has_node("x"));
    }

    #[test]
    fn test_declared_children_share_scope() {
        let library = GraphLibrary::new();
        let component = ComponentDescription::new("main").with_node(
            NodeDescription::new("parent", "relay")
                .with_child(NodeDescription::new("child", "relay")),
        );
        let (scope, arena, _) = build_scope(component, &library);

        assert!(scope.has_node("parent"));
        assert!(scope.has_node("child"));
        let parent_id = scope.instance_id("parent").unwrap();
        let child_id = scope.instance_id("child").unwrap();
        assert_eq!(arena.get(child_id).unwrap().parent(), Some(parent_id));
    }

    #[test]
    fn test_cascading_delete_counts_each_instance_once() {
        let library = nested_library();
        let mut wrapper_lib = library.clone();
        // outer-of-outer: container nesting two levels deep
        wrapper_lib.insert_component(
            ComponentDescription::new("main")
                .with_node(NodeDescription::component("o", "outer"))
                .with_node(NodeDescription::new("lone", "relay")),
        );
        let main = wrapper_lib.component("main").unwrap().clone();
        let (mut scope, mut arena, mut _warnings) = build_scope(main, &wrapper_lib);

        // o expands to 7 (see above) + its own container = 8, plus lone = 9
        assert_eq!(arena.live_count(), 9);

        assert!(scope.delete_node("o", &mut arena));
        assert_eq!(arena.live_count(), 1);
        assert!(!scope.has_node("o"));
        assert!(scope.has_node("lone"));

        // Deleting again is a clean no-op
        assert!(!scope.delete_node("o", &mut arena));
    }

    #[test]
    fn test_delete_parent_removes_declared_children() {
        let library = GraphLibrary::new();
        let component = ComponentDescription::new("main").with_node(
            NodeDescription::new("parent", "relay")
                .with_child(NodeDescription::new("child", "relay")),
        );
        let (mut scope, mut arena, _) = build_scope(component, &library);

        scope.delete_node("parent", &mut arena);
        assert_eq!(arena.live_count(), 0);
        assert!(!scope.has_node("child"));
    }

    #[test]
    fn test_unknown_type_skips_node_but_not_siblings() {
        let library = GraphLibrary::new();
        let component = ComponentDescription::new("main")
            .with_node(NodeDescription::new("bad", "no-such-type"))
            .with_node(NodeDescription::new("good", "relay"));
        let (scope, arena, warnings) = build_scope(component, &library);

        assert!(!scope.has_node("bad"));
        assert!(scope.has_node("good"));
        assert_eq!(arena.live_count(), 1);
        assert!(warnings.active("bad").unwrap().contains_key(WARN_UNKNOWN_TYPE));
    }

    #[test]
    fn test_unresolved_connection_dropped() {
        let library = GraphLibrary::new();
        let component = ComponentDescription::new("main")
            .with_node(NodeDescription::new("a", "relay"))
            .with_connection(Connection::new("a", "out", "ghost", "in"));
        let (scope, arena, warnings) = build_scope(component, &library);

        assert!(scope.has_node("a"));
        let a = scope.instance_id("a").unwrap();
        assert!(arena.get(a).unwrap().downstream.is_empty());
        assert!(warnings
            .active("ghost")
            .unwrap()
            .contains_key(WARN_UNRESOLVED_CONNECTION));
    }

    #[test]
    fn test_reset_empties_scope_and_is_reentrant() {
        let library = nested_library();
        let outer = library.component("outer").unwrap().clone();
        let (mut scope, mut arena, _) = build_scope(outer, &library);

        scope.reset(&mut arena);
        assert!(scope.is_empty());
        assert_eq!(arena.live_count(), 0);

        // No-op on an already-empty scope
        scope.reset(&mut arena);
        assert!(scope.is_empty());
    }

    #[test]
    fn test_bind_connection_is_idempotent() {
        let library = GraphLibrary::new();
        let component = ComponentDescription::new("main")
            .with_node(NodeDescription::new("a", "relay"))
            .with_node(NodeDescription::new("b", "relay"));
        let (scope, mut arena, mut warnings) = build_scope(component, &library);

        let conn = Connection::new("a", "out", "b", "in");
        assert!(scope.bind_connection(&conn, &mut arena, &mut warnings));
        assert!(scope.bind_connection(&conn, &mut arena, &mut warnings));

        let b = scope.instance_id("b").unwrap();
        assert_eq!(arena.get(b).unwrap().inputs.get("in").unwrap().len(), 1);

        scope.unbind_connection(&conn, &mut arena);
        let a = scope.instance_id("a").unwrap();
        assert!(arena.get(a).unwrap().downstream.is_empty());
        assert!(arena.get(b).unwrap().inputs.get("in").is_none());
    }
}
