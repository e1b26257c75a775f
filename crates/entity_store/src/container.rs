//! Per-archetype entity containers.
//!
//! A container owns every chunk of one archetype and decides where new rows
//! go. Chunks are ranked in a capacity map ordered by remaining free slots
//! (ties broken by chunk index), so full chunks form a prefix of the map and
//! empty chunks a suffix. New rows always go to the fullest chunk that still
//! has room, which keeps the number of partially-filled chunks low.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::archetype::Archetype;
use crate::chunk::{EntityChunk, RowSlots, Transfer};
use crate::column::ComponentChunk;
use crate::component::ComponentTypeId;
use crate::config::StoreConfig;
use crate::entity::Entity;
use crate::error::StoreResult;
use crate::layout::ComponentLayout;

/// Where an entity's row lives inside its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub chunk: usize,
    pub row: usize,
}

/// All entities of one archetype.
#[derive(Debug)]
pub struct EntityContainer {
    archetype: Archetype,
    layout: Arc<ComponentLayout>,
    config: StoreConfig,
    chunks: Vec<EntityChunk>,
    /// Chunk indices ordered by `(free_slots, chunk index)`.
    capacity_map: Vec<usize>,
    locations: HashMap<Entity, EntityLocation>,
}

impl EntityContainer {
    /// Create an empty container. No chunk is allocated until the first
    /// insertion.
    #[must_use]
    pub fn new(archetype: Archetype, layout: Arc<ComponentLayout>, config: StoreConfig) -> Self {
        Self {
            archetype,
            layout,
            config,
            chunks: Vec::new(),
            capacity_map: Vec::new(),
            locations: HashMap::new(),
        }
    }

    #[must_use]
    pub fn archetype(&self) -> &Archetype {
        &self.archetype
    }

    #[must_use]
    pub fn layout(&self) -> &Arc<ComponentLayout> {
        &self.layout
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Total slots across all chunks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.chunks.len() * self.config.chunk_capacity
    }

    /// Chunks in index order.
    #[must_use]
    pub fn chunks(&self) -> &[EntityChunk] {
        &self.chunks
    }

    /// Chunks without a free slot.
    #[must_use]
    pub fn filled_chunks(&self) -> usize {
        let chunks = &self.chunks;
        self.capacity_map.partition_point(|&c| chunks[c].is_full())
    }

    /// Chunks without a live row.
    #[must_use]
    pub fn empty_chunks(&self) -> usize {
        let chunks = &self.chunks;
        self.capacity_map.len() - self.capacity_map.partition_point(|&c| !chunks[c].is_empty())
    }

    #[must_use]
    pub fn has_entity(&self, entity: Entity) -> bool {
        self.locations.contains_key(&entity)
    }

    #[must_use]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.locations.get(&entity).copied()
    }

    /// Entities in chunk and row order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.entities().iter().copied())
    }

    /// The column holding `entity`'s value of type `ty`, with the entity's
    /// row in it.
    #[must_use]
    pub fn column(&self, entity: Entity, ty: ComponentTypeId) -> Option<(&ComponentChunk, usize)> {
        let column = self.layout.component_idx(ty)?;
        let loc = self.location(entity)?;
        Some((self.chunks[loc.chunk].column(column), loc.row))
    }

    /// Mutable variant of [`EntityContainer::column`].
    pub fn column_mut(
        &mut self,
        entity: Entity,
        ty: ComponentTypeId,
    ) -> Option<(&mut ComponentChunk, usize)> {
        let column = self.layout.component_idx(ty)?;
        let loc = self.location(entity)?;
        Some((self.chunks[loc.chunk].column_mut(column), loc.row))
    }

    /// Address of `entity`'s value of type `ty`, if both exist here.
    #[must_use]
    pub fn component_ptr(&self, entity: Entity, ty: ComponentTypeId) -> Option<*mut u8> {
        self.column(entity, ty)
            .map(|(column, row)| column.fetch_unchecked(row))
    }

    fn rank_key(&self, chunk: usize) -> (usize, usize) {
        (self.chunks[chunk].free_slots(), chunk)
    }

    /// Re-insert `chunk` at its sorted position after its size changed.
    fn rerank(&mut self, chunk: usize) {
        if let Some(pos) = self.capacity_map.iter().position(|&c| c == chunk) {
            self.capacity_map.remove(pos);
        }
        let key = self.rank_key(chunk);
        let pos = self.capacity_map.partition_point(|&c| self.rank_key(c) < key);
        self.capacity_map.insert(pos, chunk);
    }

    /// Pick the chunk the next row goes into, allocating one if every chunk
    /// is full.
    fn reserve_chunk(&mut self) -> StoreResult<usize> {
        if let Some(&chunk) = self.capacity_map.get(self.filled_chunks()) {
            return Ok(chunk);
        }
        let chunk = EntityChunk::new(Arc::clone(&self.layout), self.config.chunk_capacity)?;
        self.chunks.push(chunk);
        let idx = self.chunks.len() - 1;
        self.rerank(idx);
        debug!(
            archetype = self.archetype.identifier(),
            chunk = idx,
            capacity = self.capacity(),
            "allocated entity chunk"
        );
        Ok(idx)
    }

    fn record(&mut self, entity: Entity, chunk: usize, row: usize) -> EntityLocation {
        let loc = EntityLocation { chunk, row };
        self.locations.insert(entity, loc);
        self.rerank(chunk);
        loc
    }

    /// Append a row to `chunk` with `fill`. If a component hook panics, a
    /// chunk reserved for the row is released before the panic continues.
    fn fill_row(&mut self, chunk: usize, fill: impl FnOnce(&mut EntityChunk) -> usize) -> usize {
        let target = &mut self.chunks[chunk];
        match panic::catch_unwind(AssertUnwindSafe(|| fill(target))) {
            Ok(row) => row,
            Err(payload) => {
                self.reclaim_empty_chunks();
                panic::resume_unwind(payload)
            }
        }
    }

    /// Insert `entity` with default-constructed components.
    pub fn init(&mut self, entity: Entity) -> StoreResult<EntityLocation> {
        debug_assert!(!self.has_entity(entity), "{entity} already in container");
        let chunk = self.reserve_chunk()?;
        let row = self.fill_row(chunk, |target| target.init(entity));
        trace!(%entity, archetype = self.archetype.identifier(), "initialized entity");
        Ok(self.record(entity, chunk, row))
    }

    /// Insert `entity` with components taken from `source`.
    ///
    /// # Safety
    ///
    /// See [`EntityChunk::init_from`]. The source row may live in this
    /// container.
    pub(crate) unsafe fn init_from(
        &mut self,
        entity: Entity,
        source: &RowSlots,
        mode: Transfer,
    ) -> StoreResult<EntityLocation> {
        debug_assert!(!self.has_entity(entity), "{entity} already in container");
        let chunk = self.reserve_chunk()?;
        let row = self.fill_row(chunk, |target| unsafe { target.init_from(entity, source, mode) });
        Ok(self.record(entity, chunk, row))
    }

    /// Raw addresses of `entity`'s components.
    pub(crate) fn row_slots(&self, entity: Entity) -> Option<RowSlots> {
        let loc = self.location(entity)?;
        Some(self.chunks[loc.chunk].row_slots(loc.row))
    }

    /// Remove `entity`, dropping its components. Returns `false` if the
    /// entity is not stored here.
    pub fn erase(&mut self, entity: Entity) -> bool {
        self.remove_row(entity, None)
    }

    /// Remove `entity` after its row was moved into a container with layout
    /// `destination`.
    pub fn erase_migrated(&mut self, entity: Entity, destination: &ComponentLayout) -> bool {
        self.remove_row(entity, Some(destination))
    }

    fn remove_row(&mut self, entity: Entity, migrated_to: Option<&ComponentLayout>) -> bool {
        let Some(loc) = self.locations.remove(&entity) else {
            return false;
        };
        let chunk = &mut self.chunks[loc.chunk];
        match migrated_to {
            Some(destination) => chunk.erase_migrated(loc.row, destination),
            None => chunk.erase(loc.row),
        }
        for (row, shifted) in chunk.entities().iter().enumerate().skip(loc.row) {
            if let Some(shifted_loc) = self.locations.get_mut(shifted) {
                shifted_loc.row = row;
            }
        }
        self.rerank(loc.chunk);
        self.reclaim_empty_chunks();
        true
    }

    /// Release empty chunks beyond the configured slack, highest index first.
    fn reclaim_empty_chunks(&mut self) {
        while self.empty_chunks() > self.config.empty_chunk_slack {
            let Some(victim) = self.capacity_map.pop() else {
                break;
            };
            debug_assert!(self.chunks[victim].is_empty());
            self.chunks.remove(victim);
            for idx in &mut self.capacity_map {
                if *idx > victim {
                    *idx -= 1;
                }
            }
            for chunk in &self.chunks[victim..] {
                for entity in chunk.entities() {
                    if let Some(loc) = self.locations.get_mut(entity) {
                        loc.chunk -= 1;
                    }
                }
            }
            debug!(
                archetype = self.archetype.identifier(),
                chunk = victim,
                capacity = self.capacity(),
                "released empty entity chunk"
            );
        }
    }

    /// Panic if any bookkeeping disagrees with the stored rows.
    pub fn verify_invariants(&self) {
        let rows: usize = self.chunks.iter().map(EntityChunk::len).sum();
        assert_eq!(rows, self.len(), "chunk rows disagree with entity count");
        assert!(self.len() <= self.capacity(), "size exceeds capacity");
        assert_eq!(self.capacity_map.len(), self.chunks.len(), "capacity map size");
        assert!(
            self.capacity_map
                .windows(2)
                .all(|w| self.rank_key(w[0]) < self.rank_key(w[1])),
            "capacity map out of order"
        );
        assert!(
            self.empty_chunks() <= self.config.empty_chunk_slack,
            "too many empty chunks retained"
        );
        for (chunk_idx, chunk) in self.chunks.iter().enumerate() {
            for (column, _) in self.layout.iter().enumerate() {
                assert_eq!(chunk.column(column).len(), chunk.len(), "column length");
            }
            for (row, entity) in chunk.entities().iter().enumerate() {
                assert_eq!(
                    self.location(*entity),
                    Some(EntityLocation { chunk: chunk_idx, row }),
                    "stale location for {entity}"
                );
            }
        }
    }
}
