//! Archetype definitions.
//!
//! An archetype is the exact set of component types an entity carries. All
//! entities sharing an archetype live in the same container, so the set is
//! kept in a canonical form: sorted ascending and free of duplicates.

use crate::component::{Component, ComponentTypeId, fnv1a};

/// A canonical, immutable set of component types.
///
/// Equality and hashing only look at the sorted type list, so the order in
/// which an archetype was assembled never matters. Derived archetypes are
/// produced by [`Archetype::with`] and [`Archetype::without`].
#[derive(Debug, Clone)]
pub struct Archetype {
    types: Vec<ComponentTypeId>,
    identifier: String,
    hash: u64,
}

impl Archetype {
    /// Build an archetype from any collection of type ids. Duplicates are
    /// dropped.
    #[must_use]
    pub fn new(types: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        let mut types: Vec<ComponentTypeId> = types.into_iter().collect();
        types.sort_unstable();
        types.dedup();
        Self::from_sorted(types)
    }

    /// The empty archetype.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_sorted(Vec::new())
    }

    /// Archetype holding exactly the component `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self::new([ComponentTypeId::of::<T>()])
    }

    fn from_sorted(types: Vec<ComponentTypeId>) -> Self {
        let mut identifier = String::with_capacity(types.len() * 20);
        for ty in &types {
            identifier.push_str(&ty.0.to_string());
            identifier.push('|');
        }
        let hash = fnv1a(identifier.as_bytes());
        Self {
            types,
            identifier,
            hash,
        }
    }

    /// A new archetype that also contains `ty`.
    #[must_use]
    pub fn with(&self, ty: ComponentTypeId) -> Self {
        self.with_many([ty])
    }

    /// A new archetype that also contains every type in `types`.
    #[must_use]
    pub fn with_many(&self, types: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        let mut merged = self.types.clone();
        for ty in types {
            if let Err(pos) = merged.binary_search(&ty) {
                merged.insert(pos, ty);
            }
        }
        Self::from_sorted(merged)
    }

    /// A new archetype without `ty`. Removing an absent type is a no-op.
    #[must_use]
    pub fn without(&self, ty: ComponentTypeId) -> Self {
        self.without_many([ty])
    }

    /// A new archetype without any type in `types`.
    #[must_use]
    pub fn without_many(&self, types: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        let mut remaining = self.types.clone();
        for ty in types {
            if let Ok(pos) = remaining.binary_search(&ty) {
                remaining.remove(pos);
            }
        }
        Self::from_sorted(remaining)
    }

    /// The component types in column order.
    #[must_use]
    pub fn component_types(&self) -> &[ComponentTypeId] {
        &self.types
    }

    /// Returns `true` if the archetype contains `ty`.
    #[must_use]
    pub fn contains(&self, ty: ComponentTypeId) -> bool {
        self.types.binary_search(&ty).is_ok()
    }

    /// Number of component types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` for the archetype without components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Stable textual form: each type id in decimal followed by `|`.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// FNV-1a hash of [`Archetype::identifier`].
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for Archetype {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.types == other.types
    }
}

impl Eq for Archetype {}

impl std::hash::Hash for Archetype {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl Default for Archetype {
    fn default() -> Self {
        Self::empty()
    }
}

impl FromIterator<ComponentTypeId> for Archetype {
    fn from_iter<I: IntoIterator<Item = ComponentTypeId>>(iter: I) -> Self {
        Self::new(iter)
    }
}
