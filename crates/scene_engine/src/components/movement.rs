//! Movement component for nodes that move on their own
//!
//! [`MovementComponent::step`] moves the owning node by the component's velocities.
//! Instances of a moving prefab record velocity edits in their diffs like any other
//! reflected field.

use crate::foundation::math::{Quat, Vec3};
use crate::impl_reflect;
use crate::scene::{Component, Handle, Scene, SceneResult};

/// Constant linear and angular velocity
#[derive(Debug, Clone)]
pub struct MovementComponent {
    /// Linear velocity in units per second
    pub velocity: Vec3,

    /// Angular velocity in radians per second, as a scaled axis
    pub angular_velocity: Vec3,

    /// Whether [`MovementComponent::step`] moves the owner
    pub enabled: bool,
}

impl_reflect!(MovementComponent, "Movement" {
    velocity: Vec3,
    angular_velocity: Vec3,
    enabled: bool,
});

impl MovementComponent {
    /// Enabled component at rest
    pub fn new() -> Self {
        Self {
            velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            enabled: true,
        }
    }

    /// Enabled component moving at `velocity` without rotating
    pub fn with_velocity(velocity: Vec3) -> Self {
        Self {
            velocity,
            ..Self::new()
        }
    }

    /// Move the owning node by one frame of `delta_time` seconds
    pub fn step(scene: &mut Scene, handle: &Handle<MovementComponent>, delta_time: f32) -> SceneResult<()> {
        let movement = scene.component(handle)?;
        if !movement.enabled {
            return Ok(());
        }
        let translation = movement.velocity * delta_time;
        let rotation = movement.angular_velocity * delta_time;

        let owner = scene.component_owner(handle)?;
        if translation != Vec3::zeros() {
            scene.translate(&owner, translation)?;
        }
        if rotation != Vec3::zeros() {
            scene.rotate(&owner, Quat::from_scaled_axis(rotation))?;
        }
        Ok(())
    }
}

impl Component for MovementComponent {}

impl Default for MovementComponent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneNodeFlags;
    use approx::assert_relative_eq;

    #[test]
    fn test_step_moves_owner() {
        let mut scene = Scene::new();
        let node = scene.create_node("Asteroid", SceneNodeFlags::empty());
        let movement = scene
            .add_component(&node, MovementComponent::with_velocity(Vec3::new(2.0, 0.0, 0.0)))
            .unwrap();

        MovementComponent::step(&mut scene, &movement, 0.5).unwrap();
        assert_relative_eq!(
            scene.local_transform(&node).unwrap().position,
            Vec3::new(1.0, 0.0, 0.0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_disabled_movement_leaves_owner() {
        let mut scene = Scene::new();
        let node = scene.create_node("Buoy", SceneNodeFlags::empty());
        let movement = scene
            .add_component(&node, MovementComponent::with_velocity(Vec3::new(0.0, 3.0, 0.0)))
            .unwrap();
        scene.component_mut(&movement).unwrap().enabled = false;

        MovementComponent::step(&mut scene, &movement, 1.0).unwrap();
        assert_eq!(scene.local_transform(&node).unwrap().position, Vec3::zeros());
    }

    #[test]
    fn test_velocity_edit_survives_encoding() {
        let mut scene = Scene::new();
        let node = scene.create_node("Drone", SceneNodeFlags::empty());
        let movement = scene.add_component(&node, MovementComponent::new()).unwrap();
        scene.component_mut(&movement).unwrap().angular_velocity = Vec3::new(0.0, 0.5, 0.0);

        let copy = scene.clone_subtree(&node, true).unwrap();
        let copied = scene.get_component::<MovementComponent>(&copy).unwrap().unwrap();
        let copied = scene.component(&copied).unwrap();
        assert_eq!(copied.angular_velocity, Vec3::new(0.0, 0.5, 0.0));
        assert!(copied.enabled);
    }
}
