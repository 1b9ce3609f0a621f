//! Owning arena for node instances
//!
//! Every live [`NodeInstance`] in a runtime is owned by exactly one
//! arena slot, keyed by an [`InstanceId`]. Scopes refer to instances by
//! id only, so a dangling cross-scope reference is impossible and
//! cascading deletion is a post-order walk over ids.

use std::collections::HashMap;

use crate::instance::{InstanceId, NodeInstance};

/// Id-keyed owner of all node instances in one runtime
#[derive(Debug, Default)]
pub struct InstanceArena {
    slots: HashMap<InstanceId, NodeInstance>,
    next_id: u64,
}

impl InstanceArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an instance, returning its id
    pub(crate) fn insert(&mut self, instance: NodeInstance) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        self.slots.insert(id, instance);
        id
    }

    /// Remove an instance from the arena
    ///
    /// The live-instance count drops by exactly one per removal; ids are
    /// never reused, so a cascade cannot double-remove.
    pub(crate) fn remove(&mut self, id: InstanceId) -> Option<NodeInstance> {
        self.slots.remove(&id)
    }

    /// Borrow an instance by id
    pub fn get(&self, id: InstanceId) -> Option<&NodeInstance> {
        self.slots.get(&id)
    }

    /// Mutably borrow an instance by id
    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut NodeInstance> {
        self.slots.get_mut(&id)
    }

    /// Whether an id is still live
    pub fn contains(&self, id: InstanceId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Number of live instances
    pub fn live_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over all live instances
    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, &NodeInstance)> {
        self.slots.iter().map(|(id, inst)| (*id, inst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::NodeInstance;
    use std::collections::HashMap;

    fn dummy(id: &str) -> NodeInstance {
        NodeInstance::container(id, "c", &[], &HashMap::new(), None)
    }

    #[test]
    fn test_insert_remove_live_count() {
        let mut arena = InstanceArena::new();
        let a = arena.insert(dummy("a"));
        let b = arena.insert(dummy("b"));
        assert_eq!(arena.live_count(), 2);

        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none()); // no double-removal
        assert_eq!(arena.live_count(), 1);
        assert!(arena.contains(b));
    }

    #[test]
    fn test_ids_never_reused() {
        let mut arena = InstanceArena::new();
        let a = arena.insert(dummy("a"));
        arena.remove(a);
        let b = arena.insert(dummy("b"));
        assert_ne!(a, b);
    }
}
