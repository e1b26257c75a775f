//! # scene_demo
//!
//! Builds a handful of entities, steps a simple movement system over them,
//! hides and re-parents a few along the way, and prints the visible scene as
//! JSON.
//!
//! Set `ENTITY_STORE_CONFIG` to the path of a JSON [`StoreConfig`] to
//! override chunk tuning.

mod components;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use components::{Hidden, Name, Parent, Transform, Velocity};
use entity_store::{
    Archetype, Component, Entity, EntityBuilder, EntityDatabase, EntityDatabaseContext,
    EntityQuery, StoreConfig, StoreResult,
};

/// Fixed simulation step in seconds.
const STEP: f32 = 1.0 / 60.0;

/// Number of simulation steps to run.
const STEPS: usize = 120;

/// One visible entity in the printed scene.
#[derive(Debug, Serialize)]
struct SceneEntity {
    id: u64,
    generation: u32,
    name: Option<String>,
    transform: Transform,
    velocity: Option<Velocity>,
    parent: Option<u64>,
}

fn load_config() -> Result<StoreConfig> {
    match std::env::var("ENTITY_STORE_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading store config from {path}"))?;
            Ok(StoreConfig::from_json_str(&json)?)
        }
        Err(_) => Ok(StoreConfig::default()),
    }
}

fn register(ctx: &mut EntityDatabaseContext) -> StoreResult<()> {
    ctx.register_component::<Transform>()?;
    ctx.register_component::<Velocity>()?;
    ctx.register_component::<Name>()?;
    ctx.register_component::<Hidden>()?;
    ctx.register_component::<Parent>()?;
    Ok(())
}

fn spawn(ctx: &mut EntityDatabaseContext) -> StoreResult<Vec<Entity>> {
    let root = ctx.init_entity_with(
        EntityBuilder::new()
            .with(Name("root".into()))
            .with(Transform::default()),
    )?;

    let mut movers = Vec::new();
    for i in 0..8 {
        let mover = ctx.init_entity(&Archetype::new([
            Transform::component_type_id(),
            Velocity::component_type_id(),
        ]))?;
        ctx.write_component_move(mover, Velocity::new(i as f32, 1.0, 0.0))?;
        ctx.add_component_move(mover, Parent(root))?;
        movers.push(mover);
    }

    // A clone of the first mover, without its velocity.
    let statue = ctx.init_entity_copy(
        movers[0],
        &Archetype::new([Transform::component_type_id(), Name::component_type_id()]),
    )?;
    ctx.write_component_move(statue, Name("statue".into()))?;

    movers.insert(0, root);
    movers.push(statue);
    Ok(movers)
}

fn integrate(ctx: &mut EntityDatabaseContext, dt: f32) {
    let query = EntityQuery::new()
        .with_component::<Transform>()
        .with_component::<Velocity>();
    ctx.query_mut(&query).for_each_mut(|mut row| {
        let linear = row.component::<Velocity>().linear;
        row.component_mut::<Transform>().translation += linear * dt;
    });
}

/// Visible entities with their components. Parents that no longer exist are
/// reported as absent.
fn snapshot(ctx: &EntityDatabaseContext) -> Vec<SceneEntity> {
    let query = EntityQuery::new()
        .with_component::<Transform>()
        .without_component::<Hidden>()
        .optional_component::<Velocity>()
        .optional_component::<Name>()
        .optional_component::<Parent>();
    ctx.query(&query)
        .iter()
        .map(|row| SceneEntity {
            id: row.entity().id(),
            generation: row.entity().generation(),
            name: row.get::<Name>().map(|name| name.0.clone()),
            transform: *row.component::<Transform>(),
            velocity: row.get::<Velocity>().copied(),
            parent: row
                .get::<Parent>()
                .map(|parent| parent.0)
                .filter(|parent| ctx.has_entity(*parent))
                .map(Entity::id),
        })
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scene_demo=info".parse()?))
        .init();

    let config = load_config()?;
    info!(
        chunk_capacity = config.chunk_capacity,
        empty_chunk_slack = config.empty_chunk_slack,
        "scene demo starting"
    );
    let db = EntityDatabase::with_config(config)?;

    let entities = db.enter_secure_context(|ctx| {
        register(ctx)?;
        spawn(ctx)
    })?;
    info!(entities = entities.len(), "scene spawned");

    for step in 0..STEPS {
        db.enter_secure_context(|ctx| -> StoreResult<()> {
            integrate(ctx, STEP);
            if step == STEPS / 2 {
                ctx.add_component(entities[1], Hidden::component_type_id())?;
                ctx.remove_component(entities[2], Velocity::component_type_id())?;
                ctx.erase_entity(entities[0])?;
            }
            Ok(())
        })?;
    }

    let scene = db.enter_secure_context_const(|ctx| {
        info!(
            entities = ctx.entity_count(),
            archetypes = ctx.container_count(),
            "simulation finished"
        );
        snapshot(ctx)
    });
    println!("{}", serde_json::to_string_pretty(&scene)?);
    Ok(())
}
