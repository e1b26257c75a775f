//! One-shot entity construction from typed values.

use crate::archetype::Archetype;
use crate::component::{Component, ComponentTypeId};
use crate::context::EntityDatabaseContext;
use crate::entity::Entity;
use crate::error::StoreResult;

type Writer = Box<dyn FnOnce(&mut EntityDatabaseContext, Entity) -> StoreResult<()> + Send>;

/// Collects component values for a new entity.
///
/// The entity is created in the archetype of all collected types and each
/// value is moved into place. Adding a type twice keeps the later value.
///
/// ```rust
/// use entity_store::{Component, EntityBuilder, EntityDatabaseContext};
///
/// #[derive(Debug, Clone, Default, PartialEq)]
/// struct Name(String);
///
/// impl Component for Name {
///     fn type_name() -> &'static str { "Name" }
/// }
///
/// let mut ctx = EntityDatabaseContext::default();
/// ctx.register_component::<Name>().unwrap();
/// let entity = ctx
///     .init_entity_with(EntityBuilder::new().with(Name("lamp".into())))
///     .unwrap();
/// assert_eq!(ctx.read_component::<Name>(entity).unwrap(), Name("lamp".into()));
/// ```
#[derive(Default)]
pub struct EntityBuilder {
    writers: Vec<(ComponentTypeId, Writer)>,
}

impl EntityBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value`, replacing an earlier value of the same type.
    #[must_use]
    pub fn with<T: Component>(mut self, value: T) -> Self {
        let ty = T::component_type_id();
        self.writers.retain(|(existing, _)| *existing != ty);
        let writer: Writer = Box::new(move |ctx: &mut EntityDatabaseContext, entity| {
            ctx.write_component_move(entity, value)
        });
        self.writers.push((ty, writer));
        self
    }

    /// The archetype the entity will be created in.
    #[must_use]
    pub fn archetype(&self) -> Archetype {
        self.writers.iter().map(|(ty, _)| *ty).collect()
    }

    /// Number of distinct component types collected.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    pub(crate) fn into_writers(self) -> impl Iterator<Item = Writer> {
        self.writers.into_iter().map(|(_, writer)| writer)
    }
}

impl std::fmt::Debug for EntityBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityBuilder")
            .field("components", &self.writers.iter().map(|(ty, _)| *ty).collect::<Vec<_>>())
            .finish()
    }
}
