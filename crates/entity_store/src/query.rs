//! Declarative queries and their materialized result windows.
//!
//! An [`EntityQuery`] names three type sets: components an entity must have,
//! components it must not have, and components to fetch when present. The
//! context resolves the query against its component index and materializes a
//! [`QueryWindow`]: the matching entities plus one slot address per queried
//! type and entity (absent optionals are `None`). `filter`, `for_each` and
//! `iterate` work purely on that snapshot.
//!
//! A window borrows the context for its whole lifetime, so no structural
//! change can happen while it is alive.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::archetype::Archetype;
use crate::component::{Component, ComponentDescriptor, ComponentTypeId};
use crate::container::EntityContainer;
use crate::entity::Entity;

fn insert_sorted(set: &mut Vec<ComponentTypeId>, ty: ComponentTypeId) {
    if let Err(pos) = set.binary_search(&ty) {
        set.insert(pos, ty);
    }
}

fn remove_sorted(set: &mut Vec<ComponentTypeId>, ty: ComponentTypeId) {
    if let Ok(pos) = set.binary_search(&ty) {
        set.remove(pos);
    }
}

/// Required / forbidden / optional component filter.
///
/// ```rust
/// use entity_store::{ComponentTypeId, EntityQuery};
///
/// let query = EntityQuery::new()
///     .with(ComponentTypeId::from_name("Position"))
///     .without(ComponentTypeId::from_name("Hidden"))
///     .optional(ComponentTypeId::from_name("Velocity"));
/// assert_eq!(query.required_types().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityQuery {
    required: Vec<ComponentTypeId>,
    forbidden: Vec<ComponentTypeId>,
    optional: Vec<ComponentTypeId>,
}

impl EntityQuery {
    /// A query matching every entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A query requiring every type of `archetype`.
    #[must_use]
    pub fn from_archetype(archetype: &Archetype) -> Self {
        Self {
            required: archetype.component_types().to_vec(),
            ..Self::default()
        }
    }

    /// Require `ty`.
    #[must_use]
    pub fn with(mut self, ty: ComponentTypeId) -> Self {
        remove_sorted(&mut self.optional, ty);
        insert_sorted(&mut self.required, ty);
        self
    }

    /// Exclude entities that have `ty`.
    #[must_use]
    pub fn without(mut self, ty: ComponentTypeId) -> Self {
        insert_sorted(&mut self.forbidden, ty);
        self
    }

    /// Fetch `ty` when the entity has it. Ignored if `ty` is already
    /// required.
    #[must_use]
    pub fn optional(mut self, ty: ComponentTypeId) -> Self {
        if self.required.binary_search(&ty).is_err() {
            insert_sorted(&mut self.optional, ty);
        }
        self
    }

    #[must_use]
    pub fn with_component<T: Component>(self) -> Self {
        self.with(T::component_type_id())
    }

    #[must_use]
    pub fn without_component<T: Component>(self) -> Self {
        self.without(T::component_type_id())
    }

    #[must_use]
    pub fn optional_component<T: Component>(self) -> Self {
        self.optional(T::component_type_id())
    }

    #[must_use]
    pub fn required_types(&self) -> &[ComponentTypeId] {
        &self.required
    }

    #[must_use]
    pub fn forbidden_types(&self) -> &[ComponentTypeId] {
        &self.forbidden
    }

    #[must_use]
    pub fn optional_types(&self) -> &[ComponentTypeId] {
        &self.optional
    }

    /// Returns `true` if entities of `archetype` satisfy the query.
    #[must_use]
    pub fn matches(&self, archetype: &Archetype) -> bool {
        self.required.iter().all(|&ty| archetype.contains(ty))
            && !self.forbidden.iter().any(|&ty| archetype.contains(ty))
    }

    /// Types whose slots a window carries: required first, then optional.
    pub(crate) fn fetched_types(&self) -> Vec<ComponentTypeId> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .copied()
            .collect()
    }
}

fn index_rows(entities: &[Entity]) -> HashMap<Entity, usize> {
    entities
        .iter()
        .enumerate()
        .map(|(row, &entity)| (entity, row))
        .collect()
}

/// Materialized result of a query.
pub struct QueryWindow<'db> {
    entities: Vec<Entity>,
    /// Row of each entity in `entities`.
    rows: HashMap<Entity, usize>,
    types: Vec<ComponentTypeId>,
    descriptors: Vec<Option<ComponentDescriptor>>,
    /// `columns[k][i]` is the slot of `types[k]` for `entities[i]`.
    columns: Vec<Vec<Option<NonNull<u8>>>>,
    _db: PhantomData<&'db EntityContainer>,
}

impl<'db> QueryWindow<'db> {
    /// Snapshot every row of `containers`.
    pub(crate) fn materialize<'a>(
        types: Vec<ComponentTypeId>,
        descriptors: Vec<Option<ComponentDescriptor>>,
        containers: impl IntoIterator<Item = &'a EntityContainer>,
    ) -> Self
    where
        'a: 'db,
    {
        let mut entities = Vec::new();
        let mut columns: Vec<Vec<Option<NonNull<u8>>>> = vec![Vec::new(); types.len()];

        for container in containers {
            let column_idx: Vec<Option<usize>> = types
                .iter()
                .map(|&ty| container.layout().component_idx(ty))
                .collect();
            for chunk in container.chunks() {
                entities.extend_from_slice(chunk.entities());
                for (slots, column) in columns.iter_mut().zip(&column_idx) {
                    slots.extend((0..chunk.len()).map(|row| {
                        column.and_then(|c| NonNull::new(chunk.fetch_unchecked(c, row)))
                    }));
                }
            }
        }

        Self {
            rows: index_rows(&entities),
            entities,
            types,
            descriptors,
            columns,
            _db: PhantomData,
        }
    }

    /// Number of matched entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Matched entities in container, chunk and row order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn has_entity(&self, entity: Entity) -> bool {
        self.entity_idx(entity).is_some()
    }

    /// Row index of `entity` in this window.
    #[must_use]
    pub fn entity_idx(&self, entity: Entity) -> Option<usize> {
        self.rows.get(&entity).copied()
    }

    /// Returns `true` if the query fetched `ty`.
    #[must_use]
    pub fn has_component(&self, ty: ComponentTypeId) -> bool {
        self.component_idx(ty).is_some()
    }

    /// Position of `ty` among the fetched types.
    #[must_use]
    pub fn component_idx(&self, ty: ComponentTypeId) -> Option<usize> {
        self.types.iter().position(|&t| t == ty)
    }

    /// Returns `true` if row `idx` has a value of `ty`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= self.len()`.
    #[must_use]
    pub fn entity_has_component(&self, idx: usize, ty: ComponentTypeId) -> bool {
        self.component_ptr(idx, ty).is_some()
    }

    /// Raw slot of `ty` in row `idx`, `None` when the type was not fetched
    /// or the entity lacks it.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= self.len()`.
    #[must_use]
    pub fn component_ptr(&self, idx: usize, ty: ComponentTypeId) -> Option<NonNull<u8>> {
        assert!(idx < self.len(), "row {idx} out of range ({} rows)", self.len());
        let k = self.component_idx(ty)?;
        self.columns[k][idx]
    }

    fn typed_slot<T: Component>(&self, idx: usize) -> Option<NonNull<u8>> {
        let ty = T::component_type_id();
        let k = self.component_idx(ty)?;
        if let Some(desc) = &self.descriptors[k] {
            assert!(
                desc.is::<T>(),
                "component `{}` is not stored as `{}`",
                desc.name(),
                std::any::type_name::<T>()
            );
        }
        self.columns[k][idx]
    }

    /// Row `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= self.len()`.
    #[must_use]
    pub fn row(&self, idx: usize) -> WindowRow<'_> {
        assert!(idx < self.len(), "row {idx} out of range ({} rows)", self.len());
        WindowRow { window: self, idx }
    }

    /// Rows in order.
    pub fn iter(&self) -> impl Iterator<Item = WindowRow<'_>> {
        (0..self.len()).map(move |idx| WindowRow { window: self, idx })
    }

    /// Call `f` on every row.
    pub fn for_each(&self, mut f: impl FnMut(WindowRow<'_>)) {
        self.iter().for_each(&mut f);
    }

    /// Call `f` on every row together with its index.
    pub fn iterate(&self, mut f: impl FnMut(usize, WindowRow<'_>)) {
        for (idx, row) in self.iter().enumerate() {
            f(idx, row);
        }
    }

    /// Keep only rows for which `pred` returns `true`.
    #[must_use]
    pub fn filter(mut self, mut pred: impl FnMut(&WindowRow<'_>) -> bool) -> Self {
        let keep: Vec<bool> = self.iter().map(|row| pred(&row)).collect();
        let mut flags = keep.iter();
        self.entities
            .retain(|_| flags.next().copied().unwrap_or(false));
        for column in &mut self.columns {
            let mut flags = keep.iter();
            column.retain(|_| flags.next().copied().unwrap_or(false));
        }
        self.rows = index_rows(&self.entities);
        self
    }
}

impl std::fmt::Debug for QueryWindow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryWindow")
            .field("entities", &self.entities)
            .field("types", &self.types)
            .finish()
    }
}

/// Read access to one row of a [`QueryWindow`].
#[derive(Clone, Copy)]
pub struct WindowRow<'w> {
    window: &'w QueryWindow<'w>,
    idx: usize,
}

impl<'w> WindowRow<'w> {
    /// Row index inside the window.
    #[must_use]
    pub fn idx(&self) -> usize {
        self.idx
    }

    #[must_use]
    pub fn entity(&self) -> Entity {
        self.window.entities[self.idx]
    }

    /// The row's `T`, or `None` if `T` was not fetched or is absent.
    ///
    /// # Panics
    ///
    /// Panics if `T`'s id is registered for a different Rust type.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<&'w T> {
        let slot = self.window.typed_slot::<T>(self.idx)?;
        // SAFETY: the slot holds a live `T` for as long as the window borrows
        // the context.
        Some(unsafe { slot.cast::<T>().as_ref() })
    }

    /// The row's `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` was not fetched or the entity lacks it.
    #[must_use]
    pub fn component<T: Component>(&self) -> &'w T {
        match self.get::<T>() {
            Some(value) => value,
            None => panic!(
                "{} has no `{}` in this window",
                self.entity(),
                T::type_name()
            ),
        }
    }
}

/// A [`QueryWindow`] obtained with exclusive access, allowing in-place
/// writes.
pub struct QueryWindowMut<'db> {
    window: QueryWindow<'db>,
}

impl<'db> QueryWindowMut<'db> {
    pub(crate) fn new(window: QueryWindow<'db>) -> Self {
        Self { window }
    }

    /// Mutable access to row `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= self.len()`.
    #[must_use]
    pub fn row_mut(&mut self, idx: usize) -> WindowRowMut<'_> {
        assert!(idx < self.len(), "row {idx} out of range ({} rows)", self.len());
        WindowRowMut {
            window: &self.window,
            idx,
            _exclusive: PhantomData,
        }
    }

    /// Call `f` on every row.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(WindowRowMut<'_>)) {
        self.iterate_mut(|_, row| f(row));
    }

    /// Call `f` on every row together with its index.
    pub fn iterate_mut(&mut self, mut f: impl FnMut(usize, WindowRowMut<'_>)) {
        for idx in 0..self.window.len() {
            f(
                idx,
                WindowRowMut {
                    window: &self.window,
                    idx,
                    _exclusive: PhantomData,
                },
            );
        }
    }

    /// Keep only rows for which `pred` returns `true`.
    #[must_use]
    pub fn filter(self, pred: impl FnMut(&WindowRow<'_>) -> bool) -> Self {
        Self {
            window: self.window.filter(pred),
        }
    }
}

impl<'db> std::ops::Deref for QueryWindowMut<'db> {
    type Target = QueryWindow<'db>;

    fn deref(&self) -> &Self::Target {
        &self.window
    }
}

impl std::fmt::Debug for QueryWindowMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.window.fmt(f)
    }
}

/// Read/write access to one row of a [`QueryWindowMut`].
pub struct WindowRowMut<'w> {
    window: &'w QueryWindow<'w>,
    idx: usize,
    _exclusive: PhantomData<&'w mut ()>,
}

impl WindowRowMut<'_> {
    #[must_use]
    pub fn idx(&self) -> usize {
        self.idx
    }

    #[must_use]
    pub fn entity(&self) -> Entity {
        self.window.entities[self.idx]
    }

    /// The row's `T`, or `None` if `T` was not fetched or is absent.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<&T> {
        let slot = self.window.typed_slot::<T>(self.idx)?;
        // SAFETY: see `WindowRow::get`.
        Some(unsafe { slot.cast::<T>().as_ref() })
    }

    /// Mutable access to the row's `T`, or `None` if `T` was not fetched or
    /// is absent.
    #[must_use]
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        let mut slot = self.window.typed_slot::<T>(self.idx)?.cast::<T>();
        // SAFETY: the window was built under exclusive access, each row owns
        // distinct slots, and `&mut self` prevents aliasing within the row.
        Some(unsafe { slot.as_mut() })
    }

    /// The row's `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` was not fetched or the entity lacks it.
    #[must_use]
    pub fn component<T: Component>(&self) -> &T {
        let entity = self.entity();
        match self.get::<T>() {
            Some(value) => value,
            None => panic!("{entity} has no `{}` in this window", T::type_name()),
        }
    }

    /// Mutable access to the row's `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` was not fetched or the entity lacks it.
    #[must_use]
    pub fn component_mut<T: Component>(&mut self) -> &mut T {
        let entity = self.entity();
        match self.get_mut::<T>() {
            Some(value) => value,
            None => panic!("{entity} has no `{}` in this window", T::type_name()),
        }
    }
}
