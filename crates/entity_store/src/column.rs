//! Type-erased, fixed-capacity column storage.
//!
//! A [`ComponentChunk`] owns one aligned buffer of `capacity` slots for a
//! single component type. Live values always occupy slots `0..len`: erasing a
//! slot shifts the tail down with the type's move operation, so queries can
//! walk a column as a dense array.

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::component::{Component, ComponentDescriptor};
use crate::error::{StoreError, StoreResult};

/// One column of component values inside an entity chunk.
pub struct ComponentChunk {
    desc: ComponentDescriptor,
    data: NonNull<u8>,
    capacity: usize,
    len: usize,
}

// SAFETY: the column exclusively owns its values, and every descriptor is
// built either from a `Component` (which is `Send + Sync`) or through
// `ComponentDescriptor::from_raw_parts`, whose contract requires the same.
unsafe impl Send for ComponentChunk {}
unsafe impl Sync for ComponentChunk {}

impl ComponentChunk {
    /// Allocate an empty column with room for `capacity` values.
    pub fn new(desc: ComponentDescriptor, capacity: usize) -> StoreResult<Self> {
        let data = match Self::buffer_layout(&desc, capacity)? {
            Some(layout) => {
                // SAFETY: `buffer_layout` only returns layouts of non-zero size.
                let ptr = unsafe { alloc(layout) };
                NonNull::new(ptr).ok_or(StoreError::CapacityExhausted {
                    bytes: layout.size(),
                })?
            }
            None => dangling(desc.layout().align()),
        };
        Ok(Self {
            desc,
            data,
            capacity,
            len: 0,
        })
    }

    /// Layout of the backing buffer, or `None` when no allocation is needed.
    fn buffer_layout(desc: &ComponentDescriptor, capacity: usize) -> StoreResult<Option<Layout>> {
        let bytes = desc
            .stride()
            .checked_mul(capacity)
            .ok_or(StoreError::CapacityExhausted { bytes: usize::MAX })?;
        if bytes == 0 {
            return Ok(None);
        }
        Layout::from_size_align(bytes, desc.layout().align())
            .map(Some)
            .map_err(|_| StoreError::CapacityExhausted { bytes })
    }

    #[must_use]
    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.desc
    }

    /// Number of live values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Address of slot `idx`. Slots of zero-sized types share one address.
    fn slot(&self, idx: usize) -> *mut u8 {
        // SAFETY: callers stay within `0..=capacity`, which lies inside the
        // allocation (or is a zero offset for zero-sized values).
        unsafe { self.data.as_ptr().add(idx * self.desc.stride()) }
    }

    /// Claim the next slot, returning its index. Panics when full.
    fn claim(&mut self) -> (usize, *mut u8) {
        assert!(
            !self.is_full(),
            "column `{}` is full ({} slots)",
            self.desc.name(),
            self.capacity
        );
        let idx = self.len;
        (idx, self.slot(idx))
    }

    /// Default-construct a value in the next slot.
    pub fn init(&mut self) -> usize {
        let (idx, dst) = self.claim();
        // SAFETY: `dst` is an aligned, unoccupied slot.
        unsafe { self.desc.create(dst) };
        self.len += 1;
        idx
    }

    /// Move the value at `src` into the next slot.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value of this column's type. It is
    /// logically uninitialized afterwards and must not be dropped.
    pub unsafe fn init_move(&mut self, src: *mut u8) -> usize {
        let (idx, dst) = self.claim();
        unsafe { self.desc.move_uninitialized(dst, src) };
        self.len += 1;
        idx
    }

    /// Clone the value at `src` into the next slot.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value of this column's type.
    pub unsafe fn init_copy(&mut self, src: *const u8) -> usize {
        let (idx, dst) = self.claim();
        unsafe { self.desc.copy_uninitialized(dst, src) };
        self.len += 1;
        idx
    }

    /// Drop the most recently initialized value, undoing the last `init` or
    /// `init_copy`.
    pub(crate) fn undo_init(&mut self) {
        assert!(self.len > 0, "column `{}` is empty", self.desc.name());
        self.len -= 1;
        // SAFETY: the slot was live until `len` dropped below it.
        unsafe { self.desc.destroy(self.slot(self.len)) };
    }

    /// Drop the value at `idx` and close the gap.
    pub fn erase(&mut self, idx: usize) {
        assert!(idx < self.len, "slot {idx} out of range ({} live)", self.len);
        // SAFETY: `idx` is live.
        unsafe { self.desc.destroy(self.slot(idx)) };
        self.close_gap(idx);
    }

    /// Close the gap at `idx` whose value has already been moved out.
    pub fn erase_moved(&mut self, idx: usize) {
        assert!(idx < self.len, "slot {idx} out of range ({} live)", self.len);
        self.close_gap(idx);
    }

    fn close_gap(&mut self, idx: usize) {
        for next in idx + 1..self.len {
            // SAFETY: `next - 1` was vacated by the previous step, `next` is live.
            unsafe {
                self.desc
                    .move_uninitialized(self.slot(next - 1), self.slot(next))
            };
        }
        self.len -= 1;
    }

    /// Clone the value at `idx` into `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be an aligned, uninitialized slot for this column's type.
    pub unsafe fn read(&self, idx: usize, dst: *mut u8) {
        assert!(idx < self.len, "slot {idx} out of range ({} live)", self.len);
        unsafe { self.desc.copy_uninitialized(dst, self.slot(idx)) }
    }

    /// Move the value at `src` over slot `idx`, dropping the previous value.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value of this column's type. It is
    /// logically uninitialized afterwards.
    pub unsafe fn write_move(&mut self, idx: usize, src: *mut u8) {
        assert!(idx < self.len, "slot {idx} out of range ({} live)", self.len);
        unsafe { self.desc.move_initialized(self.slot(idx), src) }
    }

    /// Clone the value at `src` over slot `idx`.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value of this column's type.
    pub unsafe fn write_copy(&mut self, idx: usize, src: *const u8) {
        assert!(idx < self.len, "slot {idx} out of range ({} live)", self.len);
        unsafe { self.desc.copy_initialized(self.slot(idx), src) }
    }

    /// Raw address of slot `idx`. Bounds are only checked in debug builds.
    #[must_use]
    pub fn fetch_unchecked(&self, idx: usize) -> *mut u8 {
        debug_assert!(idx < self.len, "slot {idx} out of range ({} live)", self.len);
        self.slot(idx)
    }

    /// The live values as a typed slice.
    ///
    /// # Panics
    ///
    /// Panics if the column does not store `T`.
    #[must_use]
    pub fn as_slice<T: Component>(&self) -> &[T] {
        self.assert_type::<T>();
        // SAFETY: slots `0..len` hold live `T`s and `data` is aligned for `T`.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast::<T>(), self.len) }
    }

    /// The live values as a mutable typed slice.
    ///
    /// # Panics
    ///
    /// Panics if the column does not store `T`.
    #[must_use]
    pub fn as_mut_slice<T: Component>(&mut self) -> &mut [T] {
        self.assert_type::<T>();
        // SAFETY: as above, and `&mut self` grants exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr().cast::<T>(), self.len) }
    }

    fn assert_type<T: Component>(&self) {
        assert!(
            self.desc.is::<T>(),
            "column `{}` does not store `{}`",
            self.desc.name(),
            std::any::type_name::<T>()
        );
    }
}

impl Drop for ComponentChunk {
    fn drop(&mut self) {
        for idx in 0..self.len {
            // SAFETY: every slot below `len` is live.
            unsafe { self.desc.destroy(self.slot(idx)) };
        }
        if let Ok(Some(layout)) = Self::buffer_layout(&self.desc, self.capacity) {
            // SAFETY: allocated in `new` with this exact layout.
            unsafe { dealloc(self.data.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for ComponentChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentChunk")
            .field("component", &self.desc.name())
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Non-null, suitably aligned address for buffers that never allocate.
fn dangling(align: usize) -> NonNull<u8> {
    NonNull::new(std::ptr::without_provenance_mut(align)).unwrap_or(NonNull::dangling())
}

#[cfg(test)]
mod tests {
    use std::mem::MaybeUninit;
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

    #[derive(Debug, Clone, Default)]
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

    #[repr(align(64))]
    #[derive(Debug, Clone, Default)]
    struct Wide([u8; 3]);

    impl Component for Wide {
        fn type_name() -> &'static str {
            "Wide"
        }
    }

    fn column<T: Component>(capacity: usize) -> ComponentChunk {
        ComponentChunk::new(T::descriptor(), capacity).unwrap()
    }

    #[test]
    fn test_init_default_constructs() {
        let mut col = column::<Position>(4);
        assert_eq!(col.init(), 0);
        assert_eq!(col.init(), 1);
        assert_eq!(col.len(), 2);
        assert_eq!(col.as_slice::<Position>(), &[Position::default(), Position::default()]);
    }

    #[test]
    fn test_erase_keeps_slots_contiguous() {
        let mut col = column::<Position>(4);
        for i in 0..4 {
            col.init();
            col.as_mut_slice::<Position>()[i] = Position { x: i as f32, y: 0.0 };
        }
        assert!(col.is_full());

        col.erase(1);
        let xs: Vec<f32> = col.as_slice::<Position>().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 2.0, 3.0]);
        assert!(!col.is_full());
    }

    #[test]
    fn test_read_and_write() {
        let mut col = column::<Position>(2);
        col.init();

        let mut value = std::mem::ManuallyDrop::new(Position { x: 1.0, y: 2.0 });
        unsafe { col.write_move(0, (&mut *value as *mut Position).cast()) };

        let mut out = MaybeUninit::<Position>::uninit();
        unsafe { col.read(0, out.as_mut_ptr().cast()) };
        assert_eq!(unsafe { out.assume_init() }, Position { x: 1.0, y: 2.0 });

        let copy = Position { x: 5.0, y: 6.0 };
        unsafe { col.write_copy(0, (&copy as *const Position).cast()) };
        assert_eq!(col.as_slice::<Position>()[0], copy);
    }

    #[test]
    fn test_values_are_dropped_exactly_once() {
        let token = Arc::new(());
        let mut col = column::<Tracked>(8);
        for i in 0..5 {
            col.init();
            col.as_mut_slice::<Tracked>()[i] = Tracked(Some(token.clone()));
        }
        assert_eq!(Arc::strong_count(&token), 6);

        col.erase(0);
        col.erase(2);
        assert_eq!(Arc::strong_count(&token), 4);

        drop(col);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_init_move_and_erase_moved_transfer_ownership() {
        let token = Arc::new(());
        let mut src = column::<Tracked>(2);
        let mut dst = column::<Tracked>(2);
        src.init();
        src.as_mut_slice::<Tracked>()[0] = Tracked(Some(token.clone()));

        unsafe { dst.init_move(src.fetch_unchecked(0)) };
        src.erase_moved(0);
        assert_eq!(src.len(), 0);
        assert_eq!(dst.len(), 1);
        assert_eq!(Arc::strong_count(&token), 2);

        drop(src);
        drop(dst);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_init_copy_clones() {
        let token = Arc::new(());
        let mut col = column::<Tracked>(2);
        col.init();
        col.as_mut_slice::<Tracked>()[0] = Tracked(Some(token.clone()));
        unsafe { col.init_copy(col.fetch_unchecked(0)) };
        assert_eq!(Arc::strong_count(&token), 3);
    }

    #[test]
    fn test_zero_sized_column() {
        let mut col = column::<Tag>(3);
        col.init();
        col.init();
        assert_eq!(col.as_slice::<Tag>().len(), 2);
        col.erase(0);
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn test_over_aligned_column() {
        let mut col = column::<Wide>(3);
        for _ in 0..3 {
            col.init();
        }
        for idx in 0..3 {
            assert_eq!(col.fetch_unchecked(idx) as usize % 64, 0);
        }
    }

    #[test]
    #[should_panic(expected = "is full")]
    fn test_init_past_capacity_panics() {
        let mut col = column::<Position>(1);
        col.init();
        col.init();
    }

    #[test]
    #[should_panic(expected = "does not store")]
    fn test_typed_access_checks_type() {
        let col = column::<Position>(1);
        let _ = col.as_slice::<Tag>();
    }
}
