//! The entity database state and every operation on it.
//!
//! [`EntityDatabaseContext`] owns the component registry, one
//! [`EntityContainer`] per live archetype and three indexes:
//!
//! - entity → container,
//! - archetype → container,
//! - component type → set of containers holding it (drives queries).
//!
//! Containers live in a slab so that their ids stay stable while others are
//! created and deleted. A container is deleted as soon as its last entity
//! leaves it.
//!
//! Callers normally reach a context through
//! [`EntityDatabase::enter_secure_context`](crate::EntityDatabase::enter_secure_context),
//! but it can also be used directly in single-threaded code.

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::archetype::Archetype;
use crate::builder::EntityBuilder;
use crate::chunk::Transfer;
use crate::component::{Component, ComponentDescriptor, ComponentTypeId};
use crate::config::StoreConfig;
use crate::container::EntityContainer;
use crate::entity::{Entity, EntityAllocator};
use crate::error::{StoreError, StoreResult};
use crate::layout::ComponentLayout;
use crate::query::{EntityQuery, QueryWindow, QueryWindowMut};

/// Slab index of a container.
pub(crate) type ContainerId = usize;

/// Full read/write access to the entity database.
#[derive(Debug)]
pub struct EntityDatabaseContext {
    config: StoreConfig,
    allocator: EntityAllocator,
    descriptors: HashMap<ComponentTypeId, ComponentDescriptor>,
    layouts: HashMap<Archetype, Arc<ComponentLayout>>,
    containers: Vec<Option<EntityContainer>>,
    free_containers: Vec<ContainerId>,
    entity_map: HashMap<Entity, ContainerId>,
    archetype_map: HashMap<Archetype, ContainerId>,
    component_map: HashMap<ComponentTypeId, BTreeSet<ContainerId>>,
}

impl EntityDatabaseContext {
    /// Create an empty database.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: StoreConfig) -> Self {
        Self {
            config,
            allocator: EntityAllocator::new(),
            descriptors: HashMap::new(),
            layouts: HashMap::new(),
            containers: Vec::new(),
            free_containers: Vec::new(),
            entity_map: HashMap::new(),
            archetype_map: HashMap::new(),
            component_map: HashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // -- Component registration --

    /// Register the lifecycle descriptor of `ty`. Each type can be
    /// registered once.
    pub fn register_component_desc(
        &mut self,
        ty: ComponentTypeId,
        desc: ComponentDescriptor,
    ) -> StoreResult<()> {
        if self.descriptors.contains_key(&ty) {
            return Err(StoreError::DuplicateComponent(ty));
        }
        info!(
            component = desc.name(),
            id = %ty,
            size = desc.layout().size(),
            align = desc.layout().align(),
            "registered component"
        );
        self.descriptors.insert(ty, desc);
        Ok(())
    }

    /// Register the Rust component type `T`.
    pub fn register_component<T: Component>(&mut self) -> StoreResult<ComponentTypeId> {
        let ty = T::component_type_id();
        self.register_component_desc(ty, T::descriptor())?;
        Ok(ty)
    }

    #[must_use]
    pub fn is_registered(&self, ty: ComponentTypeId) -> bool {
        self.descriptors.contains_key(&ty)
    }

    #[must_use]
    pub fn component_desc(&self, ty: ComponentTypeId) -> Option<&ComponentDescriptor> {
        self.descriptors.get(&ty)
    }

    // -- Lookups --

    #[must_use]
    pub fn has_entity(&self, entity: Entity) -> bool {
        self.entity_map.contains_key(&entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entity_map.len()
    }

    /// Number of live containers, one per archetype in use.
    #[must_use]
    pub fn container_count(&self) -> usize {
        self.archetype_map.len()
    }

    /// Live containers in slab order.
    pub fn containers(&self) -> impl Iterator<Item = &EntityContainer> {
        self.containers.iter().flatten()
    }

    /// The archetype `entity` currently lives in.
    pub fn entity_archetype(&self, entity: Entity) -> StoreResult<&Archetype> {
        let id = self.locate(entity)?;
        Ok(self.container(id).archetype())
    }

    pub fn entity_has_component(&self, entity: Entity, ty: ComponentTypeId) -> StoreResult<bool> {
        Ok(self.entity_archetype(entity)?.contains(ty))
    }

    fn locate(&self, entity: Entity) -> StoreResult<ContainerId> {
        self.entity_map
            .get(&entity)
            .copied()
            .ok_or(StoreError::UnknownEntity(entity))
    }

    fn container(&self, id: ContainerId) -> &EntityContainer {
        self.containers[id]
            .as_ref()
            .unwrap_or_else(|| panic!("container {id} is not allocated"))
    }

    fn container_mut(&mut self, id: ContainerId) -> &mut EntityContainer {
        self.containers[id]
            .as_mut()
            .unwrap_or_else(|| panic!("container {id} is not allocated"))
    }

    // -- Containers --

    /// Cached layout of `archetype`, built on first use.
    fn layout_for(&mut self, archetype: &Archetype) -> StoreResult<Arc<ComponentLayout>> {
        if let Some(layout) = self.layouts.get(archetype) {
            return Ok(Arc::clone(layout));
        }
        let descriptors = &self.descriptors;
        let layout = ComponentLayout::new(archetype, |ty| descriptors.get(&ty).copied())
            .map_err(StoreError::UnregisteredComponent)?;
        let layout = Arc::new(layout);
        self.layouts.insert(archetype.clone(), Arc::clone(&layout));
        Ok(layout)
    }

    /// The container of `archetype`, created if needed.
    fn container_for(&mut self, archetype: &Archetype) -> StoreResult<ContainerId> {
        if let Some(&id) = self.archetype_map.get(archetype) {
            return Ok(id);
        }
        let layout = self.layout_for(archetype)?;
        let container = EntityContainer::new(archetype.clone(), layout, self.config);
        let id = match self.free_containers.pop() {
            Some(id) => {
                self.containers[id] = Some(container);
                id
            }
            None => {
                self.containers.push(Some(container));
                self.containers.len() - 1
            }
        };
        self.archetype_map.insert(archetype.clone(), id);
        for &ty in archetype.component_types() {
            self.component_map.entry(ty).or_default().insert(id);
        }
        debug!(archetype = archetype.identifier(), container = id, "created entity container");
        Ok(id)
    }

    /// Delete container `id` and drop it from every index if it holds no
    /// entity.
    fn release_if_empty(&mut self, id: ContainerId) {
        if !self.container(id).is_empty() {
            return;
        }
        let Some(container) = self.containers[id].take() else {
            return;
        };
        let archetype = container.archetype();
        self.archetype_map.remove(archetype);
        for ty in archetype.component_types() {
            if let Some(set) = self.component_map.get_mut(ty) {
                set.remove(&id);
                if set.is_empty() {
                    self.component_map.remove(ty);
                }
            }
        }
        self.free_containers.push(id);
        debug!(archetype = archetype.identifier(), container = id, "deleted entity container");
    }

    // -- Entity lifecycle --

    /// Create an entity in `archetype` with default-constructed components.
    pub fn init_entity(&mut self, archetype: &Archetype) -> StoreResult<Entity> {
        let id = self.container_for(archetype)?;
        let entity = self.allocator.allocate();
        let result = self.unwind_guarded(
            |ctx| ctx.container_mut(id).init(entity),
            |ctx| ctx.abandon(entity, id),
        );
        if let Err(err) = result {
            self.abandon(entity, id);
            return Err(err);
        }
        self.entity_map.insert(entity, id);
        Ok(entity)
    }

    /// Create an entity in `archetype`, cloning every component it shares
    /// with `source` and default-constructing the rest.
    pub fn init_entity_copy(&mut self, source: Entity, archetype: &Archetype) -> StoreResult<Entity> {
        let source_id = self.locate(source)?;
        let id = self.container_for(archetype)?;
        let slots = self
            .container(source_id)
            .row_slots(source)
            .ok_or(StoreError::UnknownEntity(source))?;
        let entity = self.allocator.allocate();
        // SAFETY: `slots` addresses the live row of `source`, which stays in
        // place while the new row is appended.
        let result = self.unwind_guarded(
            |ctx| unsafe { ctx.container_mut(id).init_from(entity, &slots, Transfer::Copy) },
            |ctx| ctx.abandon(entity, id),
        );
        if let Err(err) = result {
            self.abandon(entity, id);
            return Err(err);
        }
        self.entity_map.insert(entity, id);
        trace!(%source, %entity, archetype = archetype.identifier(), "copied entity");
        Ok(entity)
    }

    /// Create an entity holding the values collected by `builder`.
    pub fn init_entity_with(&mut self, builder: EntityBuilder) -> StoreResult<Entity> {
        let entity = self.init_entity(&builder.archetype())?;
        for write in builder.into_writers() {
            if let Err(err) = write(self, entity) {
                self.erase_entity(entity)?;
                return Err(err);
            }
        }
        Ok(entity)
    }

    /// Run `insert`; if a component hook panics inside it, run `rollback`
    /// before the panic continues so the indexes stay consistent.
    fn unwind_guarded<R>(
        &mut self,
        insert: impl FnOnce(&mut Self) -> R,
        rollback: impl FnOnce(&mut Self),
    ) -> R {
        match panic::catch_unwind(AssertUnwindSafe(|| insert(&mut *self))) {
            Ok(result) => result,
            Err(payload) => {
                rollback(self);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Undo the allocation of an entity that never made it into a container.
    fn abandon(&mut self, entity: Entity, id: ContainerId) {
        self.allocator.release(entity);
        self.release_if_empty(id);
    }

    /// Destroy `entity` and its components. The handle and every copy of it
    /// stop resolving.
    pub fn erase_entity(&mut self, entity: Entity) -> StoreResult<()> {
        let id = self.locate(entity)?;
        self.container_mut(id).erase(entity);
        self.entity_map.remove(&entity);
        self.allocator.release(entity);
        self.release_if_empty(id);
        trace!(%entity, "erased entity");
        Ok(())
    }

    /// Migrate `entity` to `archetype`. Components present in both
    /// archetypes keep their values, new ones are default-constructed and
    /// the rest are dropped.
    pub fn move_entity(&mut self, entity: Entity, archetype: &Archetype) -> StoreResult<()> {
        let source_id = self.locate(entity)?;
        if self.container(source_id).archetype() == archetype {
            return Ok(());
        }
        let dest_id = self.container_for(archetype)?;
        let slots = self
            .container(source_id)
            .row_slots(entity)
            .ok_or(StoreError::UnknownEntity(entity))?;
        let dest_layout = Arc::clone(self.container(dest_id).layout());

        // SAFETY: `slots` addresses the live source row; it is released with
        // `erase_migrated` against the destination layout right after.
        let result = self.unwind_guarded(
            |ctx| unsafe { ctx.container_mut(dest_id).init_from(entity, &slots, Transfer::Move) },
            |ctx| ctx.release_if_empty(dest_id),
        );
        if let Err(err) = result {
            self.release_if_empty(dest_id);
            return Err(err);
        }
        self.container_mut(source_id).erase_migrated(entity, &dest_layout);
        self.entity_map.insert(entity, dest_id);
        self.release_if_empty(source_id);
        trace!(%entity, archetype = archetype.identifier(), "migrated entity");
        Ok(())
    }

    /// Add a default-constructed `ty` to `entity`. No-op if already present.
    pub fn add_component(&mut self, entity: Entity, ty: ComponentTypeId) -> StoreResult<()> {
        if !self.is_registered(ty) {
            return Err(StoreError::UnregisteredComponent(ty));
        }
        let archetype = self.entity_archetype(entity)?.with(ty);
        self.move_entity(entity, &archetype)
    }

    /// Add `value` to `entity`, replacing the current value if present.
    pub fn add_component_move<T: Component>(&mut self, entity: Entity, value: T) -> StoreResult<()> {
        let ty = T::component_type_id();
        self.check_type::<T>(ty)?;
        self.add_component(entity, ty)?;
        self.write_component_move(entity, value)
    }

    /// Add a clone of `value` to `entity`, replacing the current value if
    /// present.
    pub fn add_component_copy<T: Component>(&mut self, entity: Entity, value: &T) -> StoreResult<()> {
        let ty = T::component_type_id();
        self.check_type::<T>(ty)?;
        self.add_component(entity, ty)?;
        self.write_component_copy(entity, value)
    }

    /// Add the value at `src` as `ty` to `entity`.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value of `ty`'s registered type. On
    /// success it is logically uninitialized afterwards; on error it is left
    /// untouched.
    pub unsafe fn add_component_move_raw(
        &mut self,
        entity: Entity,
        ty: ComponentTypeId,
        src: *mut u8,
    ) -> StoreResult<()> {
        self.add_component(entity, ty)?;
        unsafe { self.write_component_move_raw(entity, ty, src) }
    }

    /// Add a clone of the value at `src` as `ty` to `entity`.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value of `ty`'s registered type.
    pub unsafe fn add_component_copy_raw(
        &mut self,
        entity: Entity,
        ty: ComponentTypeId,
        src: *const u8,
    ) -> StoreResult<()> {
        self.add_component(entity, ty)?;
        unsafe { self.write_component_copy_raw(entity, ty, src) }
    }

    /// Remove `ty` from `entity`, dropping its value. No-op if absent.
    pub fn remove_component(&mut self, entity: Entity, ty: ComponentTypeId) -> StoreResult<()> {
        let archetype = self.entity_archetype(entity)?.without(ty);
        self.move_entity(entity, &archetype)
    }

    // -- Component access --

    fn check_type<T: Component>(&self, ty: ComponentTypeId) -> StoreResult<()> {
        let desc = self
            .descriptors
            .get(&ty)
            .ok_or(StoreError::UnregisteredComponent(ty))?;
        if desc.is::<T>() {
            Ok(())
        } else {
            Err(StoreError::TypeMismatch {
                component: ty,
                expected: std::any::type_name::<T>(),
            })
        }
    }

    fn component_slot(&self, entity: Entity, ty: ComponentTypeId) -> StoreResult<*mut u8> {
        let id = self.locate(entity)?;
        self.container(id)
            .component_ptr(entity, ty)
            .ok_or(StoreError::MissingComponent { entity, component: ty })
    }

    /// Shared reference to `entity`'s `T`.
    pub fn fetch_component<T: Component>(&self, entity: Entity) -> StoreResult<&T> {
        let ty = T::component_type_id();
        self.check_type::<T>(ty)?;
        let slot = self.component_slot(entity, ty)?;
        // SAFETY: the slot holds a live `T`; `&self` keeps it in place.
        Ok(unsafe { &*slot.cast::<T>() })
    }

    /// Mutable reference to `entity`'s `T`.
    pub fn fetch_component_mut<T: Component>(&mut self, entity: Entity) -> StoreResult<&mut T> {
        let ty = T::component_type_id();
        self.check_type::<T>(ty)?;
        let slot = self.component_slot(entity, ty)?;
        // SAFETY: as above, with `&mut self` granting exclusive access.
        Ok(unsafe { &mut *slot.cast::<T>() })
    }

    /// Mutable reference to `entity`'s `T` without checking that `T` is the
    /// registered type (debug builds still check).
    ///
    /// # Safety
    ///
    /// `T` must be the type registered under `T::component_type_id()`.
    ///
    /// # Panics
    ///
    /// Panics if the entity is not live or lacks the component.
    pub unsafe fn fetch_component_unchecked<T: Component>(&mut self, entity: Entity) -> &mut T {
        let ty = T::component_type_id();
        debug_assert!(
            self.check_type::<T>(ty).is_ok(),
            "`{}` is not the registered type of {ty}",
            std::any::type_name::<T>()
        );
        let slot = self.fetch_component_unchecked_raw(entity, ty);
        unsafe { &mut *slot.cast::<T>() }
    }

    /// Raw address of `entity`'s `ty`.
    ///
    /// # Panics
    ///
    /// Panics if the entity is not live or lacks the component.
    #[must_use]
    pub fn fetch_component_unchecked_raw(&self, entity: Entity, ty: ComponentTypeId) -> *mut u8 {
        match self.component_slot(entity, ty) {
            Ok(slot) => slot,
            Err(err) => panic!("{err}"),
        }
    }

    /// Clone `entity`'s `T` out.
    pub fn read_component<T: Component>(&self, entity: Entity) -> StoreResult<T> {
        self.fetch_component::<T>(entity).cloned()
    }

    /// Replace `entity`'s `T` with `value`.
    pub fn write_component_move<T: Component>(&mut self, entity: Entity, value: T) -> StoreResult<()> {
        *self.fetch_component_mut::<T>(entity)? = value;
        Ok(())
    }

    /// Replace `entity`'s `T` with a clone of `value`.
    pub fn write_component_copy<T: Component>(&mut self, entity: Entity, value: &T) -> StoreResult<()> {
        self.fetch_component_mut::<T>(entity)?.clone_from(value);
        Ok(())
    }

    /// Clone `entity`'s `ty` into `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be an aligned, uninitialized slot for `ty`'s registered
    /// type.
    pub unsafe fn read_component_raw(
        &self,
        entity: Entity,
        ty: ComponentTypeId,
        dst: *mut u8,
    ) -> StoreResult<()> {
        let id = self.locate(entity)?;
        let (column, row) = self
            .container(id)
            .column(entity, ty)
            .ok_or(StoreError::MissingComponent { entity, component: ty })?;
        unsafe { column.read(row, dst) };
        Ok(())
    }

    /// Move the value at `src` over `entity`'s `ty`.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value of `ty`'s registered type. On
    /// success it is logically uninitialized afterwards.
    pub unsafe fn write_component_move_raw(
        &mut self,
        entity: Entity,
        ty: ComponentTypeId,
        src: *mut u8,
    ) -> StoreResult<()> {
        let id = self.locate(entity)?;
        let (column, row) = self
            .container_mut(id)
            .column_mut(entity, ty)
            .ok_or(StoreError::MissingComponent { entity, component: ty })?;
        unsafe { column.write_move(row, src) };
        Ok(())
    }

    /// Clone the value at `src` over `entity`'s `ty`.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value of `ty`'s registered type.
    pub unsafe fn write_component_copy_raw(
        &mut self,
        entity: Entity,
        ty: ComponentTypeId,
        src: *const u8,
    ) -> StoreResult<()> {
        let id = self.locate(entity)?;
        let (column, row) = self
            .container_mut(id)
            .column_mut(entity, ty)
            .ok_or(StoreError::MissingComponent { entity, component: ty })?;
        unsafe { column.write_copy(row, src) };
        Ok(())
    }

    // -- Queries --

    /// Containers matching `query`, in ascending id order.
    fn matching_containers(&self, query: &EntityQuery) -> Vec<ContainerId> {
        let mut matching: BTreeSet<ContainerId> = match query.required_types().split_first() {
            None => self.archetype_map.values().copied().collect(),
            Some((first, rest)) => {
                let mut set = self.component_map.get(first).cloned().unwrap_or_default();
                for ty in rest {
                    if set.is_empty() {
                        break;
                    }
                    match self.component_map.get(ty) {
                        Some(holders) => set.retain(|id| holders.contains(id)),
                        None => set.clear(),
                    }
                }
                set
            }
        };
        for ty in query.forbidden_types() {
            if let Some(holders) = self.component_map.get(ty) {
                matching.retain(|id| !holders.contains(id));
            }
        }
        matching.into_iter().collect()
    }

    fn materialize(&self, query: &EntityQuery) -> QueryWindow<'_> {
        let types = query.fetched_types();
        let descriptors = types
            .iter()
            .map(|ty| self.descriptors.get(ty).copied())
            .collect();
        let ids = self.matching_containers(query);
        QueryWindow::materialize(types, descriptors, ids.into_iter().map(|id| self.container(id)))
    }

    /// Run `query` for reading.
    #[must_use]
    pub fn query(&self, query: &EntityQuery) -> QueryWindow<'_> {
        self.materialize(query)
    }

    /// Run `query` for in-place writes.
    #[must_use]
    pub fn query_mut(&mut self, query: &EntityQuery) -> QueryWindowMut<'_> {
        QueryWindowMut::new(self.materialize(query))
    }

    // -- Diagnostics --

    /// Panic if any index disagrees with the stored containers.
    pub fn verify_invariants(&self) {
        let mut live = 0;
        for (id, slot) in self.containers.iter().enumerate() {
            let Some(container) = slot else {
                assert!(self.free_containers.contains(&id), "leaked container slot {id}");
                continue;
            };
            container.verify_invariants();
            assert!(!container.is_empty(), "empty container {id} kept alive");
            assert_eq!(self.archetype_map.get(container.archetype()), Some(&id));
            for ty in container.archetype().component_types() {
                assert!(
                    self.component_map.get(ty).is_some_and(|set| set.contains(&id)),
                    "component index misses container {id}"
                );
            }
            for entity in container.entities() {
                assert_eq!(self.entity_map.get(&entity), Some(&id), "entity index for {entity}");
            }
            live += container.len();
        }
        assert_eq!(live, self.entity_map.len(), "entity index size");
        for (ty, set) in &self.component_map {
            for &id in set {
                let archetype = self.container(id).archetype();
                assert!(archetype.contains(*ty), "component index lists stale container {id}");
            }
        }
    }
}

impl Default for EntityDatabaseContext {
    fn default() -> Self {
        Self::with_valid_config(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::mem::{ManuallyDrop, MaybeUninit};
    use std::sync::Arc;

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl Component for Position {
        fn type_name() -> &'static str {
            "Position"
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    impl Component for Velocity {
        fn type_name() -> &'static str {
            "Velocity"
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Tag;

    impl Component for Tag {
        fn type_name() -> &'static str {
            "Tag"
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Tracked(Option<Arc<()>>);

    impl Component for Tracked {
        fn type_name() -> &'static str {
            "Tracked"
        }
    }

    /// Shares the name of `Position` but not its layout.
    #[derive(Debug, Clone, Default)]
    struct FakePosition(u8);

    impl Component for FakePosition {
        fn type_name() -> &'static str {
            "Position"
        }
    }

    fn context() -> EntityDatabaseContext {
        let mut ctx = EntityDatabaseContext::new(StoreConfig::default().with_chunk_capacity(4)).unwrap();
        ctx.register_component::<Position>().unwrap();
        ctx.register_component::<Velocity>().unwrap();
        ctx.register_component::<Tag>().unwrap();
        ctx.register_component::<Tracked>().unwrap();
        ctx
    }

    fn pos() -> ComponentTypeId {
        Position::component_type_id()
    }

    fn vel() -> ComponentTypeId {
        Velocity::component_type_id()
    }

    fn tag() -> ComponentTypeId {
        Tag::component_type_id()
    }

    #[test]
    fn test_position_tag_scenario() {
        let mut ctx = context();
        let a = ctx.init_entity(&Archetype::new([pos()])).unwrap();
        ctx.write_component_move(a, Position { x: 1.0, y: 2.0 }).unwrap();
        let b = ctx.init_entity(&Archetype::new([pos(), tag()])).unwrap();

        let untagged = EntityQuery::new().with(pos()).without(tag());
        let window = ctx.query(&untagged);
        assert_eq!(window.entities(), &[a]);
        assert_eq!(
            window.row(0).component::<Position>(),
            &Position { x: 1.0, y: 2.0 }
        );

        ctx.add_component(a, tag()).unwrap();
        assert!(ctx.query(&untagged).is_empty());

        let tagged = ctx.query(&EntityQuery::new().with(pos()).with(tag()));
        assert_eq!(tagged.len(), 2);
        assert!(tagged.has_entity(a));
        assert!(tagged.has_entity(b));
        assert_eq!(
            ctx.read_component::<Position>(a).unwrap(),
            Position { x: 1.0, y: 2.0 }
        );
        ctx.verify_invariants();
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut ctx = context();
        let e = ctx.init_entity(&Archetype::new([pos(), vel()])).unwrap();
        assert_eq!(ctx.read_component::<Position>(e).unwrap(), Position::default());

        ctx.write_component_move(e, Position { x: 3.0, y: 4.0 }).unwrap();
        ctx.write_component_copy(e, &Velocity { dx: 1.0, dy: -1.0 }).unwrap();
        assert_eq!(ctx.read_component::<Position>(e).unwrap(), Position { x: 3.0, y: 4.0 });
        assert_eq!(ctx.fetch_component::<Velocity>(e).unwrap().dy, -1.0);

        ctx.fetch_component_mut::<Position>(e).unwrap().x = 9.0;
        assert_eq!(ctx.read_component::<Position>(e).unwrap().x, 9.0);
    }

    #[test]
    fn test_generation_safety() {
        let mut ctx = context();
        let archetype = Archetype::new([pos()]);
        let old = ctx.init_entity(&archetype).unwrap();
        ctx.erase_entity(old).unwrap();
        assert!(!ctx.has_entity(old));

        let reused = ctx.init_entity(&archetype).unwrap();
        assert_eq!(reused.id(), old.id());
        assert_eq!(reused.generation(), old.generation() + 1);
        assert!(!ctx.has_entity(old));
        assert!(ctx.has_entity(reused));

        assert!(matches!(ctx.erase_entity(old), Err(StoreError::UnknownEntity(e)) if e == old));
        assert!(matches!(
            ctx.read_component::<Position>(old),
            Err(StoreError::UnknownEntity(_))
        ));
        assert!(matches!(ctx.add_component(old, tag()), Err(StoreError::UnknownEntity(_))));
    }

    #[test]
    fn test_migration_preserves_shared_components() {
        let mut ctx = context();
        let e = ctx.init_entity(&Archetype::new([pos(), vel()])).unwrap();
        ctx.write_component_move(e, Position { x: 5.0, y: 6.0 }).unwrap();
        ctx.write_component_move(e, Velocity { dx: 7.0, dy: 8.0 }).unwrap();

        ctx.add_component(e, tag()).unwrap();
        assert_eq!(ctx.read_component::<Position>(e).unwrap(), Position { x: 5.0, y: 6.0 });
        assert_eq!(ctx.read_component::<Velocity>(e).unwrap(), Velocity { dx: 7.0, dy: 8.0 });
        assert!(ctx.entity_has_component(e, tag()).unwrap());

        ctx.remove_component(e, vel()).unwrap();
        assert_eq!(ctx.read_component::<Position>(e).unwrap(), Position { x: 5.0, y: 6.0 });
        assert!(!ctx.entity_has_component(e, vel()).unwrap());
        assert!(matches!(
            ctx.read_component::<Velocity>(e),
            Err(StoreError::MissingComponent { .. })
        ));

        ctx.add_component(e, vel()).unwrap();
        assert_eq!(ctx.read_component::<Velocity>(e).unwrap(), Velocity::default());
        ctx.verify_invariants();
    }

    #[test]
    fn test_add_present_and_remove_absent_are_noops() {
        let mut ctx = context();
        let e = ctx.init_entity(&Archetype::new([pos()])).unwrap();
        ctx.write_component_move(e, Position { x: 1.0, y: 1.0 }).unwrap();

        ctx.add_component(e, pos()).unwrap();
        ctx.remove_component(e, tag()).unwrap();
        assert_eq!(ctx.entity_archetype(e).unwrap(), &Archetype::new([pos()]));
        assert_eq!(ctx.read_component::<Position>(e).unwrap(), Position { x: 1.0, y: 1.0 });
        assert_eq!(ctx.container_count(), 1);
    }

    #[test]
    fn test_add_component_move_and_copy() {
        let mut ctx = context();
        let e = ctx.init_entity(&Archetype::empty()).unwrap();
        ctx.add_component_move(e, Position { x: 2.0, y: 3.0 }).unwrap();
        ctx.add_component_copy(e, &Velocity { dx: 1.0, dy: 0.0 }).unwrap();
        assert_eq!(ctx.entity_archetype(e).unwrap(), &Archetype::new([pos(), vel()]));
        assert_eq!(ctx.read_component::<Position>(e).unwrap(), Position { x: 2.0, y: 3.0 });
        assert_eq!(ctx.read_component::<Velocity>(e).unwrap(), Velocity { dx: 1.0, dy: 0.0 });

        // Adding a present type overwrites its value.
        ctx.add_component_move(e, Position { x: 0.0, y: 0.0 }).unwrap();
        assert_eq!(ctx.read_component::<Position>(e).unwrap(), Position::default());
    }

    #[test]
    fn test_raw_component_access() {
        let mut ctx = context();
        let e = ctx.init_entity(&Archetype::empty()).unwrap();

        let mut value = ManuallyDrop::new(Position { x: 4.0, y: 2.0 });
        unsafe {
            ctx.add_component_move_raw(e, pos(), (&mut *value as *mut Position).cast())
                .unwrap();
        }

        let mut out = MaybeUninit::<Position>::uninit();
        unsafe { ctx.read_component_raw(e, pos(), out.as_mut_ptr().cast()).unwrap() };
        assert_eq!(unsafe { out.assume_init() }, Position { x: 4.0, y: 2.0 });

        let copy = Velocity { dx: 1.5, dy: 2.5 };
        unsafe {
            ctx.add_component_copy_raw(e, vel(), (&copy as *const Velocity).cast())
                .unwrap();
        }
        assert_eq!(ctx.read_component::<Velocity>(e).unwrap(), copy);

        let update = Position { x: -1.0, y: -1.0 };
        unsafe {
            ctx.write_component_copy_raw(e, pos(), (&update as *const Position).cast())
                .unwrap();
        }
        let slot = ctx.fetch_component_unchecked_raw(e, pos());
        assert_eq!(unsafe { &*slot.cast::<Position>() }, &update);

        let fetched = unsafe { ctx.fetch_component_unchecked::<Position>(e) };
        fetched.y = 10.0;
        assert_eq!(ctx.read_component::<Position>(e).unwrap().y, 10.0);
    }

    #[test]
    #[should_panic(expected = "not present")]
    fn test_fetch_unchecked_panics_on_missing_component() {
        let mut ctx = context();
        let e = ctx.init_entity(&Archetype::new([pos()])).unwrap();
        let _ = ctx.fetch_component_unchecked_raw(e, vel());
    }

    #[test]
    fn test_unregistered_component_rejected() {
        let mut ctx = EntityDatabaseContext::default();
        let err = ctx.init_entity(&Archetype::new([pos()])).unwrap_err();
        assert!(matches!(err, StoreError::UnregisteredComponent(ty) if ty == pos()));
        assert_eq!(ctx.container_count(), 0);
        assert_eq!(ctx.entity_count(), 0);

        let e = ctx.init_entity(&Archetype::empty()).unwrap();
        assert!(matches!(
            ctx.add_component(e, pos()),
            Err(StoreError::UnregisteredComponent(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut ctx = context();
        assert!(matches!(
            ctx.register_component::<Position>(),
            Err(StoreError::DuplicateComponent(ty)) if ty == pos()
        ));
    }

    #[test]
    fn test_typed_access_rejects_foreign_type() {
        let mut ctx = context();
        let e = ctx.init_entity(&Archetype::new([pos()])).unwrap();
        assert!(matches!(
            ctx.read_component::<FakePosition>(e),
            Err(StoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_init_entity_copy() {
        let mut ctx = context();
        let source = ctx.init_entity(&Archetype::new([pos(), vel()])).unwrap();
        ctx.write_component_move(source, Position { x: 1.0, y: 2.0 }).unwrap();
        ctx.write_component_move(source, Velocity { dx: 3.0, dy: 4.0 }).unwrap();

        let same = ctx
            .init_entity_copy(source, &Archetype::new([pos(), vel()]))
            .unwrap();
        assert_eq!(ctx.read_component::<Velocity>(same).unwrap(), Velocity { dx: 3.0, dy: 4.0 });

        let other = ctx.init_entity_copy(source, &Archetype::new([pos(), tag()])).unwrap();
        assert_eq!(ctx.read_component::<Position>(other).unwrap(), Position { x: 1.0, y: 2.0 });
        assert!(ctx.entity_has_component(other, tag()).unwrap());
        assert!(!ctx.entity_has_component(other, vel()).unwrap());

        // The source is untouched.
        assert_eq!(ctx.read_component::<Position>(source).unwrap(), Position { x: 1.0, y: 2.0 });
        assert_eq!(ctx.entity_count(), 3);
        ctx.verify_invariants();
    }

    #[test]
    fn test_containers_released_when_empty() {
        let mut ctx = context();
        let a = ctx.init_entity(&Archetype::new([pos()])).unwrap();
        let b = ctx.init_entity(&Archetype::new([vel()])).unwrap();
        assert_eq!(ctx.container_count(), 2);

        ctx.add_component(a, vel()).unwrap();
        assert_eq!(ctx.container_count(), 2);
        ctx.erase_entity(b).unwrap();
        assert_eq!(ctx.container_count(), 1);

        // Freed slab slots are reused.
        let c = ctx.init_entity(&Archetype::new([tag()])).unwrap();
        assert_eq!(ctx.container_count(), 2);
        assert_eq!(ctx.containers().count(), 2);
        ctx.erase_entity(a).unwrap();
        ctx.erase_entity(c).unwrap();
        assert_eq!(ctx.container_count(), 0);
        ctx.verify_invariants();
    }

    #[test]
    fn test_query_matches_set_definition() {
        let mut ctx = context();
        let archetypes = [
            Archetype::empty(),
            Archetype::new([pos()]),
            Archetype::new([pos(), vel()]),
            Archetype::new([pos(), tag()]),
            Archetype::new([pos(), vel(), tag()]),
            Archetype::new([vel(), tag()]),
        ];
        let mut entities = Vec::new();
        for (i, archetype) in archetypes.iter().enumerate() {
            for _ in 0..=i {
                entities.push((ctx.init_entity(archetype).unwrap(), archetype.clone()));
            }
        }

        let queries = [
            EntityQuery::new(),
            EntityQuery::new().with(pos()),
            EntityQuery::new().with(pos()).with(vel()),
            EntityQuery::new().with(pos()).without(tag()),
            EntityQuery::new().without(pos()),
            EntityQuery::new().with(vel()).without(pos()).without(tag()),
            EntityQuery::new().with(tag()).without(tag()),
        ];
        for query in &queries {
            let window = ctx.query(query);
            let mut expected: Vec<Entity> = entities
                .iter()
                .filter(|(_, archetype)| query.matches(archetype))
                .map(|(e, _)| *e)
                .collect();
            let mut actual = window.entities().to_vec();
            expected.sort();
            actual.sort();
            assert_eq!(actual, expected, "query {query:?}");
        }
    }

    #[test]
    fn test_optional_slots_follow_archetype() {
        let mut ctx = context();
        let with_vel = ctx.init_entity(&Archetype::new([pos(), vel()])).unwrap();
        let without_vel = ctx.init_entity(&Archetype::new([pos()])).unwrap();
        ctx.write_component_move(with_vel, Velocity { dx: 1.0, dy: 1.0 }).unwrap();

        let window = ctx.query(&EntityQuery::new().with(pos()).optional(vel()));
        assert_eq!(window.len(), 2);
        window.for_each(|row| {
            let has_vel = ctx.entity_has_component(row.entity(), vel()).unwrap();
            assert_eq!(row.get::<Velocity>().is_some(), has_vel);
            assert!(row.get::<Position>().is_some());
            assert!(row.get::<Tag>().is_none());
        });
        let idx = window.entity_idx(without_vel).unwrap();
        assert!(!window.entity_has_component(idx, vel()));
        assert!(window.has_component(vel()));
        assert!(!window.has_component(tag()));
    }

    #[test]
    fn test_query_window_mutation_and_filter() {
        let mut ctx = context();
        let mut entities = Vec::new();
        for i in 0..10 {
            let e = ctx.init_entity(&Archetype::new([pos(), vel()])).unwrap();
            ctx.write_component_move(e, Velocity { dx: i as f32, dy: 0.0 }).unwrap();
            entities.push(e);
        }

        let query = EntityQuery::new().with_component::<Position>().with_component::<Velocity>();
        let mut window = ctx
            .query_mut(&query)
            .filter(|row| row.component::<Velocity>().dx >= 5.0);
        assert_eq!(window.len(), 5);
        window.for_each_mut(|mut row| {
            let dx = row.component::<Velocity>().dx;
            row.component_mut::<Position>().x += dx;
        });

        let mut visited = Vec::new();
        window.iterate_mut(|idx, row| visited.push((idx, row.entity())));
        assert_eq!(visited.len(), 5);
        assert!(visited.iter().enumerate().all(|(i, (idx, _))| i == *idx));

        for (i, e) in entities.iter().enumerate() {
            let x = ctx.read_component::<Position>(*e).unwrap().x;
            let expected = if i >= 5 { i as f32 } else { 0.0 };
            assert_eq!(x, expected);
        }
    }

    #[test]
    fn test_filtered_window_reindexes_entities() {
        let mut ctx = context();
        let entities: Vec<Entity> = (0..12)
            .map(|i| {
                let e = ctx.init_entity(&Archetype::new([pos()])).unwrap();
                ctx.write_component_move(e, Position { x: i as f32, y: 0.0 }).unwrap();
                e
            })
            .collect();

        let window = ctx
            .query(&EntityQuery::new().with(pos()))
            .filter(|row| row.component::<Position>().x as usize % 3 == 0);
        assert_eq!(window.len(), 4);
        for (i, e) in entities.iter().enumerate() {
            if i % 3 == 0 {
                let idx = window.entity_idx(*e).unwrap();
                assert_eq!(window.entities()[idx], *e);
                assert_eq!(window.row(idx).component::<Position>().x, i as f32);
            } else {
                assert!(!window.has_entity(*e));
            }
        }
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_window_component_ptr_checks_row() {
        let mut ctx = context();
        ctx.init_entity(&Archetype::new([pos()])).unwrap();
        let window = ctx.query(&EntityQuery::new().with(pos()));
        let _ = window.component_ptr(window.len(), pos());
    }

    #[test]
    fn test_query_spans_many_chunks() {
        let mut ctx = context();
        for _ in 0..37 {
            ctx.init_entity(&Archetype::new([pos()])).unwrap();
        }
        let window = ctx.query(&EntityQuery::new().with(pos()));
        assert_eq!(window.len(), 37);
        let mut seen = 0;
        window.iterate(|idx, row| {
            assert_eq!(window.entities()[idx], row.entity());
            seen += 1;
        });
        assert_eq!(seen, 37);
    }

    #[test]
    fn test_chunk_sizes_sum_to_entity_count() {
        let mut ctx = context();
        let archetype = Archetype::new([pos(), vel()]);
        let entities: Vec<Entity> = (0..50).map(|_| ctx.init_entity(&archetype).unwrap()).collect();
        for (i, e) in entities.iter().enumerate() {
            if i % 3 != 0 {
                ctx.erase_entity(*e).unwrap();
            }
            if i % 7 == 0 && ctx.has_entity(*e) {
                ctx.add_component(*e, tag()).unwrap();
            }
        }
        for container in ctx.containers() {
            let rows: usize = container.chunks().iter().map(|c| c.len()).sum();
            assert_eq!(rows, container.len());
        }
        ctx.verify_invariants();
    }

    #[test]
    fn test_components_dropped_exactly_once() {
        let token = Arc::new(());
        let mut ctx = context();
        let archetype = Archetype::new([Tracked::component_type_id()]);
        let mut entities = Vec::new();
        for _ in 0..12 {
            let e = ctx.init_entity(&archetype).unwrap();
            ctx.write_component_move(e, Tracked(Some(token.clone()))).unwrap();
            entities.push(e);
        }
        assert_eq!(Arc::strong_count(&token), 13);

        for e in &entities[..4] {
            ctx.add_component(*e, pos()).unwrap();
        }
        assert_eq!(Arc::strong_count(&token), 13);

        ctx.init_entity_copy(entities[0], &archetype).unwrap();
        assert_eq!(Arc::strong_count(&token), 14);

        ctx.remove_component(entities[1], Tracked::component_type_id()).unwrap();
        ctx.erase_entity(entities[5]).unwrap();
        assert_eq!(Arc::strong_count(&token), 12);

        drop(ctx);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_zero_sized_component() {
        let mut ctx = context();
        let entities: Vec<Entity> = (0..6)
            .map(|_| ctx.init_entity(&Archetype::new([tag()])).unwrap())
            .collect();
        ctx.erase_entity(entities[2]).unwrap();
        assert_eq!(ctx.read_component::<Tag>(entities[3]).unwrap(), Tag);
        let window = ctx.query(&EntityQuery::new().with_component::<Tag>());
        assert_eq!(window.len(), 5);
        window.for_each(|row| assert_eq!(row.component::<Tag>(), &Tag));
    }

    #[test]
    fn test_entities_without_components() {
        let mut ctx = context();
        let bare = ctx.init_entity(&Archetype::empty()).unwrap();
        let with_pos = ctx.init_entity(&Archetype::new([pos()])).unwrap();
        let all = ctx.query(&EntityQuery::new());
        assert_eq!(all.len(), 2);
        let none_with_pos = ctx.query(&EntityQuery::new().without(pos()));
        assert_eq!(none_with_pos.entities(), &[bare]);
        assert!(!none_with_pos.has_entity(with_pos));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = EntityDatabaseContext::new(StoreConfig::default().with_chunk_capacity(0)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }
}
