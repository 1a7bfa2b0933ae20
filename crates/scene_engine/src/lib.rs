//! # Scene Engine
//!
//! Scene graph with stable object identity, prefabs and prefab instance diffs.
//!
//! ## Features
//!
//! - **Stable handles**: every node and component is reached through a [`Handle`] that
//!   observes destruction and survives rebuilds of the object it points at
//! - **Two-phase deserialization**: saved subtrees are decoded inside a registry session
//!   so forward references between decoded objects resolve correctly
//! - **Prefabs**: snapshot a subtree, instantiate it, record per-instance changes as
//!   diffs and replay them when the prefab changes
//! - **Reflection**: components expose named fields used for saving, cloning and diffing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scene_engine::prelude::*;
//!
//! fn main() -> Result<(), SceneError> {
//!     let mut scene = Scene::new();
//!     let ship = scene.create_node("Ship", SceneNodeFlags::empty());
//!     scene.add_component(&ship, MovementComponent::with_velocity(Vec3::new(0.0, 0.0, 1.0)))?;
//!
//!     let mut library = PrefabLibrary::new();
//!     let prefab = Prefab::create(&mut scene, &ship)?;
//!     let copy = prefab.instantiate(&mut scene)?;
//!     library.insert(prefab);
//!
//!     scene.set_position(&copy, Vec3::new(4.0, 0.0, 0.0))?;
//!     PrefabLinkUtility::record_prefab_diff(&mut scene, &library, &copy)?;
//!     PrefabLinkUtility::revert_to_prefab(&mut scene, &library, &copy)?;
//!     Ok(())
//! }
//! ```

pub mod foundation;
pub mod config;
pub mod reflect;
pub mod scene;
pub mod components;
pub mod prefab;

pub use scene::{Handle, InstanceRegistry, Scene, SceneError, SceneNode, SceneResult};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        components::{FollowComponent, LightComponent, MovementComponent, RenderableComponent},
        config::{Config, SceneConfig},
        foundation::math::{Quat, Transform, Vec3},
        prefab::{Prefab, PrefabDiff, PrefabLibrary, PrefabLinkUtility, PrefabObjectDiff},
        reflect::{Reflect, ReflectType, SerializedObject, Value},
        scene::{
            Component, ComponentHandle, DeserializationFlags, Handle, Scene, SceneError, SceneNode,
            SceneNodeFlags, SceneResult,
        },
    };
}

#[cfg(test)]
mod tests;
