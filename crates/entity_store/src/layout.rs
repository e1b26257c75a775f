//! Column layout of one archetype.

use crate::archetype::Archetype;
use crate::component::{ComponentDescriptor, ComponentTypeId};

/// Resolved descriptors of an archetype, in the archetype's column order.
///
/// Built once per archetype by the registry and shared by every chunk of the
/// archetype's container.
#[derive(Debug, Clone)]
pub struct ComponentLayout {
    types: Vec<ComponentTypeId>,
    descriptors: Vec<ComponentDescriptor>,
}

impl ComponentLayout {
    /// Pair each type of `archetype` with the descriptor `resolve` returns
    /// for it. Returns the first type `resolve` rejects.
    pub fn new<F>(archetype: &Archetype, mut resolve: F) -> Result<Self, ComponentTypeId>
    where
        F: FnMut(ComponentTypeId) -> Option<ComponentDescriptor>,
    {
        let types = archetype.component_types().to_vec();
        let descriptors = types
            .iter()
            .map(|&ty| resolve(ty).ok_or(ty))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { types, descriptors })
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Column types in order.
    #[must_use]
    pub fn component_types(&self) -> &[ComponentTypeId] {
        &self.types
    }

    #[must_use]
    pub fn has_component(&self, ty: ComponentTypeId) -> bool {
        self.component_idx(ty).is_some()
    }

    /// Column index of `ty`.
    #[must_use]
    pub fn component_idx(&self, ty: ComponentTypeId) -> Option<usize> {
        self.types.binary_search(&ty).ok()
    }

    /// Descriptor of column `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is not a column of this layout.
    #[must_use]
    pub fn component_desc(&self, idx: usize) -> &ComponentDescriptor {
        assert!(
            idx < self.descriptors.len(),
            "column {idx} out of range for layout with {} columns",
            self.descriptors.len()
        );
        &self.descriptors[idx]
    }

    /// Iterator over `(type, descriptor)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentTypeId, &ComponentDescriptor)> {
        self.types.iter().copied().zip(self.descriptors.iter())
    }
}
