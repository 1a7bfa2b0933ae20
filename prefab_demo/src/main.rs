//! Prefab workflow demo
//!
//! Builds a small fleet from a ship prefab, customizes one ship, changes the prefab
//! and shows that every ship picks up the change while the customized one keeps its
//! local edits and every handle keeps pointing at the same objects.

use scene_engine::components::{LightFactory, MovementComponent, RenderableComponent};
use scene_engine::config::{Config, SceneConfig};
use scene_engine::foundation::math::Vec3;
use scene_engine::prefab::{Prefab, PrefabLibrary, PrefabLinkUtility};
use scene_engine::scene::{Handle, Scene, SceneError, SceneNode, SceneNodeFlags};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
enum DemoError {
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("config error: {0}")]
    Config(#[from] scene_engine::config::ConfigError),

    #[error("node '{0}' not found")]
    MissingNode(String),
}

const FLEET_SIZE: usize = 3;
const FRAME_TIME: f32 = 1.0 / 60.0;

fn build_ship(scene: &mut Scene) -> Result<Handle<SceneNode>, DemoError> {
    let ship = scene.create_node("Ship", SceneNodeFlags::empty());
    scene.add_component(&ship, RenderableComponent::new("ship.obj", "hull"))?;
    scene.add_component(&ship, MovementComponent::with_velocity(Vec3::new(0.0, 0.0, 2.0)))?;

    let engine = scene.create_node("Engine", SceneNodeFlags::empty());
    scene.set_parent(&engine, &ship, false)?;
    scene.set_position(&engine, Vec3::new(0.0, 0.0, -1.5))?;
    scene.add_component(
        &engine,
        LightFactory::point(Vec3::new(1.0, 0.5, 0.1), 2.0, 4.0),
    )?;
    Ok(ship)
}

fn find(scene: &Scene, node: &Handle<SceneNode>, path: &str) -> Result<Handle<SceneNode>, DemoError> {
    scene
        .find_path(node, path)?
        .ok_or_else(|| DemoError::MissingNode(path.to_string()))
}

fn run(output_dir: &Path) -> Result<(), DemoError> {
    let config_path = output_dir.join("scene.toml");
    let config = SceneConfig::load_from_file(&config_path.to_string_lossy()).unwrap_or_else(|err| {
        log::info!("Using default scene configuration ({})", err);
        SceneConfig::default()
    });
    let mut scene = Scene::with_config(config);
    let mut library = PrefabLibrary::new();

    let source = build_ship(&mut scene)?;
    let uuid = library.insert(Prefab::create(&mut scene, &source)?);
    log::info!("Ship prefab {} created", uuid);

    let mut fleet = Vec::with_capacity(FLEET_SIZE);
    for index in 0..FLEET_SIZE {
        let ship = library.require(&uuid)?.instantiate(&mut scene)?;
        scene.set_name(&ship, &format!("Ship {}", index))?;
        scene.set_position(&ship, Vec3::new(index as f32 * 4.0, 0.0, 0.0))?;
        fleet.push(ship);
    }

    // Customize the flagship and remember a handle into it
    let flagship = fleet[0].clone();
    let flagship_engine = find(&scene, &flagship, "Engine")?;
    scene.set_position(&flagship_engine, Vec3::new(0.0, 0.5, -2.0))?;
    let escort = scene.create_node("Escort", SceneNodeFlags::empty());
    scene.set_parent(&escort, &flagship, false)?;
    for ship in &fleet {
        PrefabLinkUtility::record_prefab_diff(&mut scene, &library, ship)?;
    }

    // Change the prefab: a faster hull with a second light
    let source_movement = scene
        .get_component::<MovementComponent>(&source)?
        .ok_or_else(|| DemoError::MissingNode("Ship movement".to_string()))?;
    scene.component_mut(&source_movement)?.velocity = Vec3::new(0.0, 0.0, 5.0);
    scene.add_component(&source, LightFactory::directional(Vec3::new(1.0, 1.0, 1.0), 0.3))?;
    if let Some(prefab) = library.get_mut(&uuid) {
        prefab.update(&mut scene, &source)?;
    }

    let mut updated = 0;
    for ship in &fleet {
        updated += PrefabLinkUtility::update_from_prefab(&mut scene, &library, ship)?;
    }
    log::info!(
        "{} ships updated; flagship engine still at {:?}, escort alive: {}",
        updated,
        scene.local_transform(&flagship_engine)?.position,
        !escort.is_destroyed(false)
    );

    for _ in 0..60 {
        for ship in &fleet {
            if let Some(movement) = scene.get_component::<MovementComponent>(ship)? {
                MovementComponent::step(&mut scene, &movement, FRAME_TIME)?;
            }
        }
        scene.process_destroy_queue();
    }
    log::info!("Flagship at {:?} after one second", scene.world_transform(&flagship)?.position);

    PrefabLinkUtility::revert_to_prefab(&mut scene, &library, &fleet[1])?;

    let prefab_path = output_dir.join("ship.prefab.ron");
    library.require(&uuid)?.save_to_file(&prefab_path)?;
    let fleet_path = output_dir.join("flagship.ron");
    scene.save_subtree(&flagship, &fleet_path)?;
    scene.config().save_to_file(&config_path.to_string_lossy())?;

    let copy = scene.load_subtree(&fleet_path)?;
    log::info!(
        "Reloaded flagship as {} with {} children",
        copy.instance_id(),
        scene.child_count(&copy)?
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting prefab demo");
    let output_dir = std::env::temp_dir().join("prefab_demo");
    std::fs::create_dir_all(&output_dir)?;

    run(&output_dir)?;
    log::info!("Demo output written to {}", output_dir.display());
    Ok(())
}
