//! Entity chunks: one column per archetype type plus the parallel entity
//! array.
//!
//! Row `i` of every column belongs to `entities[i]`. All rows are added at the
//! end and removed by shifting the tail down, in lock-step across columns.

use std::sync::Arc;

use crate::column::ComponentChunk;
use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::error::StoreResult;
use crate::layout::ComponentLayout;

/// Raw addresses of one entity's component values, in the column order of
/// `layout`.
///
/// The addresses stay valid until the row is erased or its chunk is dropped;
/// adding rows anywhere never relocates existing values.
pub(crate) struct RowSlots {
    pub(crate) layout: Arc<ComponentLayout>,
    pub(crate) slots: Vec<*mut u8>,
}

impl RowSlots {
    /// Address of the value of type `ty`, if the source row has one.
    fn slot_for(&self, ty: ComponentTypeId) -> Option<*mut u8> {
        self.layout.component_idx(ty).map(|idx| self.slots[idx])
    }
}

/// How a row is transferred from a source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transfer {
    Move,
    Copy,
}

/// Columns that already hold a value for a row still being appended.
/// Dropped without [`PendingRow::commit`], it drops those values again.
struct PendingRow<'a> {
    columns: &'a mut [ComponentChunk],
    filled: Vec<usize>,
}

impl<'a> PendingRow<'a> {
    fn new(columns: &'a mut [ComponentChunk]) -> Self {
        let filled = Vec::with_capacity(columns.len());
        Self { columns, filled }
    }

    fn commit(mut self) {
        self.filled.clear();
    }
}

impl Drop for PendingRow<'_> {
    fn drop(&mut self) {
        while let Some(idx) = self.filled.pop() {
            self.columns[idx].undo_init();
        }
    }
}

/// A fixed-capacity block of entities sharing one archetype.
#[derive(Debug)]
pub struct EntityChunk {
    layout: Arc<ComponentLayout>,
    entities: Vec<Entity>,
    columns: Vec<ComponentChunk>,
    capacity: usize,
}

impl EntityChunk {
    /// Allocate every column of `layout` with room for `capacity` rows.
    pub fn new(layout: Arc<ComponentLayout>, capacity: usize) -> StoreResult<Self> {
        let columns = layout
            .iter()
            .map(|(_, desc)| ComponentChunk::new(*desc, capacity))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Self {
            layout,
            entities: Vec::with_capacity(capacity),
            columns,
            capacity,
        })
    }

    #[must_use]
    pub fn layout(&self) -> &Arc<ComponentLayout> {
        &self.layout
    }

    /// Number of live rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Rows still available.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.capacity - self.len()
    }

    /// Entities in row order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Column `idx` in layout order.
    #[must_use]
    pub fn column(&self, idx: usize) -> &ComponentChunk {
        &self.columns[idx]
    }

    #[must_use]
    pub fn column_mut(&mut self, idx: usize) -> &mut ComponentChunk {
        &mut self.columns[idx]
    }

    fn assert_room(&self) {
        assert!(!self.is_full(), "entity chunk is full ({} rows)", self.capacity);
    }

    fn push_entity(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }

    /// Append `entity` with every component default-constructed.
    ///
    /// The entity is only recorded once every column holds its value. If a
    /// `Default` impl panics, the values built so far are dropped and the
    /// chunk is left unchanged.
    pub fn init(&mut self, entity: Entity) -> usize {
        self.assert_room();
        let mut pending = PendingRow::new(&mut self.columns);
        for idx in 0..pending.columns.len() {
            pending.columns[idx].init();
            pending.filled.push(idx);
        }
        pending.commit();
        self.push_entity(entity)
    }

    /// Append `entity`, taking each shared component from `source` and
    /// default-constructing the rest.
    ///
    /// Hooks that may panic (`Default` and `Clone`) run first and are rolled
    /// back on unwind. Moves run last, so a panic never strands a value that
    /// was already taken from `source`.
    ///
    /// # Safety
    ///
    /// Every address in `source` must point to a live value of the matching
    /// type. With [`Transfer::Move`], the source row must afterwards be
    /// released with [`EntityChunk::erase_migrated`] against this chunk's
    /// layout, and not touched before that.
    pub(crate) unsafe fn init_from(&mut self, entity: Entity, source: &RowSlots, mode: Transfer) -> usize {
        self.assert_room();
        let mut pending = PendingRow::new(&mut self.columns);
        let mut moves = Vec::new();
        for (idx, (ty, _)) in self.layout.iter().enumerate() {
            match (source.slot_for(ty), mode) {
                (Some(src), Transfer::Move) => moves.push((idx, src)),
                (Some(src), Transfer::Copy) => {
                    unsafe { pending.columns[idx].init_copy(src) };
                    pending.filled.push(idx);
                }
                (None, _) => {
                    pending.columns[idx].init();
                    pending.filled.push(idx);
                }
            }
        }
        pending.commit();
        for (idx, src) in moves {
            unsafe { self.columns[idx].init_move(src) };
        }
        self.push_entity(entity)
    }

    /// Raw addresses of row `row`.
    pub(crate) fn row_slots(&self, row: usize) -> RowSlots {
        assert!(row < self.len(), "row {row} out of range ({} live)", self.len());
        RowSlots {
            layout: Arc::clone(&self.layout),
            slots: self
                .columns
                .iter()
                .map(|column| column.fetch_unchecked(row))
                .collect(),
        }
    }

    /// Remove row `row`, dropping its components.
    pub fn erase(&mut self, row: usize) {
        assert!(row < self.len(), "row {row} out of range ({} live)", self.len());
        for column in &mut self.columns {
            column.erase(row);
        }
        self.entities.remove(row);
    }

    /// Remove row `row` after its shared components were moved into a chunk
    /// with layout `destination`. Components the destination lacks are
    /// dropped.
    pub fn erase_migrated(&mut self, row: usize, destination: &ComponentLayout) {
        assert!(row < self.len(), "row {row} out of range ({} live)", self.len());
        for (idx, (ty, _)) in self.layout.iter().enumerate() {
            if destination.has_component(ty) {
                self.columns[idx].erase_moved(row);
            } else {
                self.columns[idx].erase(row);
            }
        }
        self.entities.remove(row);
    }

    /// Raw address of component column `column` at `row`. Bounds are only
    /// checked in debug builds.
    #[must_use]
    pub fn fetch_unchecked(&self, column: usize, row: usize) -> *mut u8 {
        self.columns[column].fetch_unchecked(row)
    }
}
