//! Entity handles and id allocation.
//!
//! An [`Entity`] is a lightweight `(id, generation)` pair with no data of its
//! own. Ids are recycled through a LIFO free list; every release bumps the
//! generation so that handles to destroyed entities never compare equal to a
//! live one.

use serde::{Deserialize, Serialize};

/// A handle to a row of component data.
///
/// Two handles are equal only if both the id and the generation match. A
/// handle whose id has been recycled therefore stops resolving as soon as the
/// entity it named is erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    id: u64,
    generation: u32,
}

impl Entity {
    /// The null / invalid entity sentinel.
    pub const INVALID: Entity = Entity { id: 0, generation: 0 };

    /// Create a handle from its raw parts.
    #[must_use]
    pub const fn new(id: u64, generation: u32) -> Self {
        Self { id, generation }
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }

    /// Returns the generation the id was handed out under.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Returns `true` unless this is [`Entity::INVALID`]'s id.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.id != 0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}v{})", self.id, self.generation)
    }
}

/// Hands out entity handles, reusing released ids under a new generation.
///
/// Ids start at 1 (0 is reserved for [`Entity::INVALID`]). Released ids are
/// reused most-recent-first.
#[derive(Debug)]
pub struct EntityAllocator {
    next_id: u64,
    free: Vec<Entity>,
}

impl EntityAllocator {
    /// Creates a new allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            free: Vec::new(),
        }
    }

    /// Returns a recycled handle if one is available, otherwise a fresh id at
    /// generation 0.
    pub fn allocate(&mut self) -> Entity {
        if let Some(entity) = self.free.pop() {
            return entity;
        }
        let id = self.next_id;
        self.next_id += 1;
        Entity::new(id, 0)
    }

    /// Return `entity`'s id to the pool. The next handle for this id carries
    /// the following generation.
    pub fn release(&mut self, entity: Entity) {
        debug_assert!(entity.is_valid(), "released the invalid entity");
        self.free
            .push(Entity::new(entity.id, entity.generation.wrapping_add(1)));
    }

    /// Number of ids waiting to be reused.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of distinct ids handed out so far.
    #[must_use]
    pub fn id_count(&self) -> u64 {
        self.next_id - 1
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_creation() {
        let e = Entity::new(42, 3);
        assert_eq!(e.id(), 42);
        assert_eq!(e.generation(), 3);
        assert!(e.is_valid());
    }

    #[test]
    fn test_entity_invalid() {
        assert!(!Entity::INVALID.is_valid());
        assert_eq!(Entity::INVALID.id(), 0);
    }

    #[test]
    fn test_equality_includes_generation() {
        assert_ne!(Entity::new(5, 0), Entity::new(5, 1));
        assert_eq!(Entity::new(5, 1), Entity::new(5, 1));
    }

    #[test]
    fn test_allocator_produces_unique_ids() {
        let mut alloc = EntityAllocator::new();
        let e1 = alloc.allocate();
        let e2 = alloc.allocate();
        let e3 = alloc.allocate();
        assert_eq!(e1, Entity::new(1, 0));
        assert_eq!(e2, Entity::new(2, 0));
        assert_eq!(e3, Entity::new(3, 0));
        assert_eq!(alloc.id_count(), 3);
    }

    #[test]
    fn test_release_bumps_generation_lifo() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        alloc.release(a);
        alloc.release(b);
        assert_eq!(alloc.free_count(), 2);

        assert_eq!(alloc.allocate(), Entity::new(b.id(), 1));
        assert_eq!(alloc.allocate(), Entity::new(a.id(), 1));
        assert_eq!(alloc.allocate(), Entity::new(3, 0));
    }

    #[test]
    fn test_entity_serialization_roundtrip() {
        let entity = Entity::new(999, 4);
        let json = serde_json::to_string(&entity).unwrap();
        let restored: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(entity, restored);
    }
}
