//! Error type shared by every fallible store operation.

use thiserror::Error;

use crate::component::ComponentTypeId;
use crate::entity::Entity;

/// Errors reported at the registry boundary.
///
/// Conditions that are ordinary outcomes (a query matching nothing, an
/// optional component being absent) are expressed as empty results or
/// `None`, never as a `StoreError`.
///
/// Unknown entities and missing components are contract violations, but the
/// registry reports them as errors so a stale handle never takes the caller
/// down. Only the `*_unchecked` accessors panic on them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The handle is not live: it was never created or its id has been
    /// recycled under a newer generation.
    #[error("entity {0} not found")]
    UnknownEntity(Entity),
    /// No descriptor has been registered for the component type.
    #[error("component {0} is not registered")]
    UnregisteredComponent(ComponentTypeId),
    /// A descriptor for the component type already exists.
    #[error("component {0} is already registered")]
    DuplicateComponent(ComponentTypeId),
    /// The entity is live but its archetype lacks the component type.
    #[error("component {component} not present on entity {entity}")]
    MissingComponent {
        entity: Entity,
        component: ComponentTypeId,
    },
    /// Typed access requested a Rust type that does not match the
    /// registered descriptor.
    #[error("component {component} is not stored as `{expected}`")]
    TypeMismatch {
        component: ComponentTypeId,
        expected: &'static str,
    },
    /// The allocator refused a chunk allocation.
    #[error("failed to allocate {bytes} bytes of component storage")]
    CapacityExhausted { bytes: usize },
    /// A [`StoreConfig`](crate::StoreConfig) value is out of range.
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
    /// A configuration document could not be parsed.
    #[error("failed to parse store configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type StoreResult<T> = Result<T, StoreError>;
