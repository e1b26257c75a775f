//! Components used by the demo scene.

use entity_store::{Component, Entity};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// World-space position.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
}

impl Component for Transform {
    fn type_name() -> &'static str {
        "Transform"
    }
}

/// Linear velocity in world units per second.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Velocity {
    pub linear: Vec3,
}

impl Velocity {
    #[must_use]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            linear: Vec3::new(x, y, z),
        }
    }
}

impl Component for Velocity {
    fn type_name() -> &'static str {
        "Velocity"
    }
}

/// Display name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Name(pub String);

impl Component for Name {
    fn type_name() -> &'static str {
        "Name"
    }
}

/// Marks an entity as excluded from rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Hidden;

impl Component for Hidden {
    fn type_name() -> &'static str {
        "Hidden"
    }
}

/// Non-owning reference to another entity, resolved through the database
/// when used.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Parent(pub Entity);

impl Default for Parent {
    fn default() -> Self {
        Self(Entity::INVALID)
    }
}

impl Component for Parent {
    fn type_name() -> &'static str {
        "Parent"
    }
}
