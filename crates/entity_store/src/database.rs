//! Thread-safe entry point: the database behind a reader/writer lock.
//!
//! All access happens inside a *secure context* callback. Exclusive contexts
//! may do anything; shared contexts only read. A *lazy* context is the
//! non-structural subset: it can read and write existing component values and
//! run queries, but never creates, erases or migrates entities.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use crate::archetype::Archetype;
use crate::component::{Component, ComponentTypeId};
use crate::config::StoreConfig;
use crate::context::EntityDatabaseContext;
use crate::entity::Entity;
use crate::error::StoreResult;
use crate::query::{EntityQuery, QueryWindow, QueryWindowMut};

/// The entity database shared between threads.
#[derive(Debug, Default)]
pub struct EntityDatabase {
    inner: RwLock<EntityDatabaseContext>,
}

impl EntityDatabase {
    /// Create an empty database with the default [`StoreConfig`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty database with `config`.
    pub fn with_config(config: StoreConfig) -> StoreResult<Self> {
        Ok(Self {
            inner: RwLock::new(EntityDatabaseContext::new(config)?),
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntityDatabaseContext> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("entity database lock poisoned by a panicking writer, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, EntityDatabaseContext> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("entity database lock poisoned by a panicking writer, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Run `f` with exclusive access.
    pub fn enter_secure_context<R>(&self, f: impl FnOnce(&mut EntityDatabaseContext) -> R) -> R {
        let mut guard = self.write();
        f(&mut *guard)
    }

    /// Run `f` with shared, read-only access.
    pub fn enter_secure_context_const<R>(&self, f: impl FnOnce(&EntityDatabaseContext) -> R) -> R {
        let guard = self.read();
        f(&*guard)
    }

    /// Run `f` with exclusive, non-structural access.
    pub fn enter_secure_lazy_context<R>(
        &self,
        f: impl FnOnce(&mut EntityDatabaseLazyContext<'_>) -> R,
    ) -> R {
        let mut guard = self.write();
        let mut lazy = EntityDatabaseLazyContext {
            access: LazyAccess::Exclusive(&mut *guard),
        };
        f(&mut lazy)
    }

    /// Run `f` with shared, non-structural, read-only access.
    pub fn enter_secure_lazy_context_const<R>(
        &self,
        f: impl FnOnce(&EntityDatabaseLazyContext<'_>) -> R,
    ) -> R {
        let guard = self.read();
        let lazy = EntityDatabaseLazyContext {
            access: LazyAccess::Shared(&*guard),
        };
        f(&lazy)
    }

    /// Consume the database, returning its state.
    pub fn into_inner(self) -> EntityDatabaseContext {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
enum LazyAccess<'a> {
    Shared(&'a EntityDatabaseContext),
    Exclusive(&'a mut EntityDatabaseContext),
}

/// Non-structural view of the database.
///
/// Handed out as `&mut` only from [`EntityDatabase::enter_secure_lazy_context`],
/// so the write methods are unreachable from a shared lazy context.
#[derive(Debug)]
pub struct EntityDatabaseLazyContext<'a> {
    access: LazyAccess<'a>,
}

impl EntityDatabaseLazyContext<'_> {
    fn ctx(&self) -> &EntityDatabaseContext {
        match &self.access {
            LazyAccess::Shared(ctx) => ctx,
            LazyAccess::Exclusive(ctx) => ctx,
        }
    }

    fn ctx_mut(&mut self) -> &mut EntityDatabaseContext {
        match &mut self.access {
            LazyAccess::Exclusive(ctx) => ctx,
            LazyAccess::Shared(_) => unreachable!("shared lazy context borrowed mutably"),
        }
    }

    #[must_use]
    pub fn is_registered(&self, ty: ComponentTypeId) -> bool {
        self.ctx().is_registered(ty)
    }

    #[must_use]
    pub fn has_entity(&self, entity: Entity) -> bool {
        self.ctx().has_entity(entity)
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.ctx().entity_count()
    }

    pub fn entity_archetype(&self, entity: Entity) -> StoreResult<&Archetype> {
        self.ctx().entity_archetype(entity)
    }

    pub fn entity_has_component(&self, entity: Entity, ty: ComponentTypeId) -> StoreResult<bool> {
        self.ctx().entity_has_component(entity, ty)
    }

    pub fn fetch_component<T: Component>(&self, entity: Entity) -> StoreResult<&T> {
        self.ctx().fetch_component(entity)
    }

    pub fn fetch_component_mut<T: Component>(&mut self, entity: Entity) -> StoreResult<&mut T> {
        self.ctx_mut().fetch_component_mut(entity)
    }

    pub fn read_component<T: Component>(&self, entity: Entity) -> StoreResult<T> {
        self.ctx().read_component(entity)
    }

    pub fn write_component_move<T: Component>(&mut self, entity: Entity, value: T) -> StoreResult<()> {
        self.ctx_mut().write_component_move(entity, value)
    }

    pub fn write_component_copy<T: Component>(&mut self, entity: Entity, value: &T) -> StoreResult<()> {
        self.ctx_mut().write_component_copy(entity, value)
    }

    /// # Safety
    ///
    /// See [`EntityDatabaseContext::fetch_component_unchecked`].
    pub unsafe fn fetch_component_unchecked<T: Component>(&mut self, entity: Entity) -> &mut T {
        unsafe { self.ctx_mut().fetch_component_unchecked(entity) }
    }

    /// Raw address of `entity`'s `ty`. Writing through it requires an
    /// exclusive lazy context.
    ///
    /// # Panics
    ///
    /// Panics if the entity is not live or lacks the component.
    #[must_use]
    pub fn fetch_component_unchecked_raw(&self, entity: Entity, ty: ComponentTypeId) -> *mut u8 {
        self.ctx().fetch_component_unchecked_raw(entity, ty)
    }

    /// # Safety
    ///
    /// See [`EntityDatabaseContext::read_component_raw`].
    pub unsafe fn read_component_raw(
        &self,
        entity: Entity,
        ty: ComponentTypeId,
        dst: *mut u8,
    ) -> StoreResult<()> {
        unsafe { self.ctx().read_component_raw(entity, ty, dst) }
    }

    /// # Safety
    ///
    /// See [`EntityDatabaseContext::write_component_move_raw`].
    pub unsafe fn write_component_move_raw(
        &mut self,
        entity: Entity,
        ty: ComponentTypeId,
        src: *mut u8,
    ) -> StoreResult<()> {
        unsafe { self.ctx_mut().write_component_move_raw(entity, ty, src) }
    }

    /// # Safety
    ///
    /// See [`EntityDatabaseContext::write_component_copy_raw`].
    pub unsafe fn write_component_copy_raw(
        &mut self,
        entity: Entity,
        ty: ComponentTypeId,
        src: *const u8,
    ) -> StoreResult<()> {
        unsafe { self.ctx_mut().write_component_copy_raw(entity, ty, src) }
    }

    #[must_use]
    pub fn query(&self, query: &EntityQuery) -> QueryWindow<'_> {
        self.ctx().query(query)
    }

    #[must_use]
    pub fn query_mut(&mut self, query: &EntityQuery) -> QueryWindowMut<'_> {
        self.ctx_mut().query_mut(query)
    }
}
