//! # entity_store
//!
//! An in-memory, archetype-based entity/component store.
//!
//! Entities are `(id, generation)` handles. Their components live in
//! type-erased, chunked column storage grouped by exact component set
//! (archetype), and queries select entities by required, forbidden and
//! optional component types.
//!
//! This crate provides:
//!
//! - [`Component`] trait and [`ComponentDescriptor`], the lifecycle table
//!   columns use to manage values they cannot name.
//! - [`Entity`] handles and the recycling [`EntityAllocator`].
//! - [`Archetype`], the canonical sorted component set.
//! - [`ComponentChunk`], [`EntityChunk`] and [`EntityContainer`], the
//!   storage layers.
//! - [`EntityDatabaseContext`], the database state and all operations.
//! - [`EntityDatabase`], the lock-guarded handle with secure contexts.
//! - [`EntityQuery`] and [`QueryWindow`] for filtered iteration.
//!
//! ```rust
//! use entity_store::{Archetype, Component, EntityDatabase, EntityQuery};
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! impl Component for Position {
//!     fn type_name() -> &'static str { "Position" }
//! }
//!
//! let db = EntityDatabase::new();
//! db.enter_secure_context(|ctx| -> entity_store::StoreResult<()> {
//!     ctx.register_component::<Position>()?;
//!     let e = ctx.init_entity(&Archetype::of::<Position>())?;
//!     ctx.write_component_move(e, Position { x: 1.0, y: 2.0 })?;
//!
//!     let window = ctx.query(&EntityQuery::new().with_component::<Position>());
//!     assert_eq!(window.row(0).component::<Position>().y, 2.0);
//!     Ok(())
//! })
//! .unwrap();
//! ```

pub mod archetype;
pub mod builder;
pub mod chunk;
pub mod column;
pub mod component;
pub mod config;
pub mod container;
pub mod context;
pub mod database;
pub mod entity;
pub mod error;
pub mod layout;
pub mod query;

pub use archetype::Archetype;
pub use builder::EntityBuilder;
pub use chunk::EntityChunk;
pub use column::ComponentChunk;
pub use component::{Component, ComponentDescriptor, ComponentFns, ComponentTypeId};
pub use config::StoreConfig;
pub use container::{EntityContainer, EntityLocation};
pub use context::EntityDatabaseContext;
pub use database::{EntityDatabase, EntityDatabaseLazyContext};
pub use entity::{Entity, EntityAllocator};
pub use error::{StoreError, StoreResult};
pub use layout::ComponentLayout;
pub use query::{EntityQuery, QueryWindow, QueryWindowMut, WindowRow, WindowRowMut};
