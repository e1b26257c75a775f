//! Core [`Component`] trait and the type-erased lifecycle descriptor.
//!
//! Every piece of data stored in the store implements [`Component`]. Columns
//! never see the concrete type: they operate on raw, correctly aligned slots
//! through a [`ComponentDescriptor`], a small table of size, alignment and
//! lifecycle functions (create, copy, move, destroy).
//!
//! ## Type identity
//!
//! [`ComponentTypeId`] is derived from the component's **string name** using
//! the FNV-1a 64-bit hash, so ids are stable across runs and builds.

use std::alloc::Layout;
use std::any::TypeId;

use serde::{Deserialize, Serialize};

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// FNV-1a 64-bit over `bytes`.
pub(crate) const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// A unique identifier for a component type, derived from its string name.
///
/// The ordering of ids is the column order inside every archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// Compute the [`ComponentTypeId`] from a component's string name.
    ///
    /// # Algorithm (FNV-1a 64-bit)
    ///
    /// ```text
    /// hash = 0xcbf29ce484222325          (offset basis)
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x00000100000001b3  (prime)
    /// return hash
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a(name.as_bytes()))
    }

    /// Compute the [`ComponentTypeId`] for a Rust component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        T::component_type_id()
    }
}

impl std::fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// The core component trait.
///
/// Components must be default-constructible (new slots are filled with
/// `Default::default()`), clonable (copy operations) and shareable across
/// threads (the database is guarded by a reader/writer lock).
///
/// # Examples
///
/// ```rust
/// use entity_store::Component;
///
/// #[derive(Debug, Clone, Default)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     fn type_name() -> &'static str { "Health" }
/// }
/// ```
pub trait Component: Default + Clone + Send + Sync + 'static {
    /// A human-readable name for this component type.
    fn type_name() -> &'static str;

    /// Returns the [`ComponentTypeId`] for this component.
    fn component_type_id() -> ComponentTypeId {
        ComponentTypeId::from_name(Self::type_name())
    }

    /// Returns the lifecycle descriptor for this component type.
    fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::of::<Self>()
    }
}

/// Raw lifecycle hooks of a component type.
///
/// Every pointer handed to these functions is non-null and aligned to the
/// descriptor's alignment. "Uninitialized" destinations hold no live value;
/// "initialized" destinations hold one that must be replaced. A `move_*`
/// hook leaves its source logically uninitialized: the source must not be
/// destroyed afterwards.
#[derive(Clone, Copy)]
pub struct ComponentFns {
    /// Write a default value into an uninitialized slot.
    pub create: unsafe fn(dst: *mut u8),
    /// Clone `src` into an uninitialized slot.
    pub copy_uninitialized: unsafe fn(dst: *mut u8, src: *const u8),
    /// Clone `src` over a live value.
    pub copy_initialized: unsafe fn(dst: *mut u8, src: *const u8),
    /// Move `src` into an uninitialized slot. Must not unwind.
    pub move_uninitialized: unsafe fn(dst: *mut u8, src: *mut u8),
    /// Move `src` over a live value, dropping the old one.
    pub move_initialized: unsafe fn(dst: *mut u8, src: *mut u8),
    /// Drop a live value in place.
    pub destroy: unsafe fn(dst: *mut u8),
}

/// Size, alignment and lifecycle table for one component type.
#[derive(Clone, Copy)]
pub struct ComponentDescriptor {
    name: &'static str,
    layout: Layout,
    rust_type: Option<TypeId>,
    fns: ComponentFns,
}

impl ComponentDescriptor {
    /// Build the descriptor of a Rust component type.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            name: T::type_name(),
            layout: Layout::new::<T>(),
            rust_type: Some(TypeId::of::<T>()),
            fns: ComponentFns {
                create: create_default::<T>,
                copy_uninitialized: clone_into_uninit::<T>,
                copy_initialized: clone_into_init::<T>,
                move_uninitialized: move_into_uninit::<T>,
                move_initialized: move_into_init::<T>,
                destroy: drop_value::<T>,
            },
        }
    }

    /// Build a descriptor from hand-written hooks.
    ///
    /// Typed accessors refuse descriptors built this way; only the raw
    /// pointer interfaces can read or write their values.
    ///
    /// # Safety
    ///
    /// Every hook in `fns` must behave as documented on [`ComponentFns`] for
    /// values of size and alignment `layout`, and those values must be safe
    /// to send and share between threads.
    #[must_use]
    pub unsafe fn from_raw_parts(name: &'static str, layout: Layout, fns: ComponentFns) -> Self {
        Self {
            name,
            layout,
            rust_type: None,
            fns,
        }
    }

    /// The component's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Size and alignment of one value.
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Distance in bytes between consecutive slots of a column.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.layout.pad_to_align().size()
    }

    /// Returns `true` if the descriptor was built by [`ComponentDescriptor::of::<T>`].
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.rust_type == Some(TypeId::of::<T>())
    }

    /// # Safety
    ///
    /// `dst` must be an aligned, uninitialized slot of this type.
    pub unsafe fn create(&self, dst: *mut u8) {
        unsafe { (self.fns.create)(dst) }
    }

    /// # Safety
    ///
    /// `dst` must be an aligned, uninitialized slot and `src` a live value.
    pub unsafe fn copy_uninitialized(&self, dst: *mut u8, src: *const u8) {
        unsafe { (self.fns.copy_uninitialized)(dst, src) }
    }

    /// # Safety
    ///
    /// `dst` and `src` must both hold live values.
    pub unsafe fn copy_initialized(&self, dst: *mut u8, src: *const u8) {
        unsafe { (self.fns.copy_initialized)(dst, src) }
    }

    /// # Safety
    ///
    /// `dst` must be uninitialized and `src` live; `src` is uninitialized
    /// afterwards.
    pub unsafe fn move_uninitialized(&self, dst: *mut u8, src: *mut u8) {
        unsafe { (self.fns.move_uninitialized)(dst, src) }
    }

    /// # Safety
    ///
    /// `dst` and `src` must both be live; `src` is uninitialized afterwards.
    pub unsafe fn move_initialized(&self, dst: *mut u8, src: *mut u8) {
        unsafe { (self.fns.move_initialized)(dst, src) }
    }

    /// # Safety
    ///
    /// `dst` must hold a live value; it is uninitialized afterwards.
    pub unsafe fn destroy(&self, dst: *mut u8) {
        unsafe { (self.fns.destroy)(dst) }
    }
}

impl std::fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .field("typed", &self.rust_type.is_some())
            .finish()
    }
}

unsafe fn create_default<T: Component>(dst: *mut u8) {
    unsafe { dst.cast::<T>().write(T::default()) }
}

unsafe fn clone_into_uninit<T: Component>(dst: *mut u8, src: *const u8) {
    unsafe { dst.cast::<T>().write((*src.cast::<T>()).clone()) }
}

unsafe fn clone_into_init<T: Component>(dst: *mut u8, src: *const u8) {
    unsafe { (*dst.cast::<T>()).clone_from(&*src.cast::<T>()) }
}

unsafe fn move_into_uninit<T: Component>(dst: *mut u8, src: *mut u8) {
    unsafe { std::ptr::copy_nonoverlapping(src.cast::<T>(), dst.cast::<T>(), 1) }
}

unsafe fn move_into_init<T: Component>(dst: *mut u8, src: *mut u8) {
    unsafe { *dst.cast::<T>() = src.cast::<T>().read() }
}

unsafe fn drop_value<T: Component>(dst: *mut u8) {
    unsafe { std::ptr::drop_in_place(dst.cast::<T>()) }
}
