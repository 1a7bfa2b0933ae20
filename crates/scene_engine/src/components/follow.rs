//! Follow component
//!
//! Keeps its node at an offset from a target node. The target is stored as a handle,
//! so it survives saving, cloning and prefab rebuilds of either node.

use crate::foundation::math::Vec3;
use crate::impl_reflect;
use crate::scene::{Component, Handle, Scene, SceneNode, SceneResult};

/// Moves the owning node towards `target + offset`
#[derive(Debug, Clone, Default)]
pub struct FollowComponent {
    /// Node to follow; null when nothing is followed
    pub target: Handle<SceneNode>,
    /// World-space offset from the target
    pub offset: Vec3,
    /// Fraction of the remaining distance covered per step, 1.0 snaps
    pub smoothing: f32,
}

impl_reflect!(FollowComponent, "Follow" {
    target: Handle<SceneNode>,
    offset: Vec3,
    smoothing: f32,
});

impl Component for FollowComponent {}

impl FollowComponent {
    /// Follow `target` at `offset`
    pub fn new(target: Handle<SceneNode>, offset: Vec3) -> Self {
        Self {
            target,
            offset,
            smoothing: 1.0,
        }
    }

    /// Move the owner towards its target; returns `false` once the target is gone
    pub fn step(scene: &mut Scene, handle: &Handle<FollowComponent>) -> SceneResult<bool> {
        let follow = scene.component(handle)?;
        if follow.target.is_destroyed(false) {
            return Ok(false);
        }
        let target = follow.target.clone();
        let offset = follow.offset;
        let smoothing = follow.smoothing.clamp(0.0, 1.0);

        let owner = scene.component_owner(handle)?;
        let goal = scene.world_transform(&target)?.position + offset;
        let current = scene.world_transform(&owner)?.position;
        scene.set_world_position(&owner, current + (goal - current) * smoothing)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneNodeFlags;
    use approx::assert_relative_eq;

    #[test]
    fn test_follow_snaps_to_target() {
        let mut scene = Scene::new();
        let leader = scene.create_node("Leader", SceneNodeFlags::empty());
        let camera = scene.create_node("Camera", SceneNodeFlags::empty());
        scene.set_position(&leader, Vec3::new(5.0, 0.0, 0.0)).unwrap();

        let follow = scene
            .add_component(&camera, FollowComponent::new(leader.clone(), Vec3::new(0.0, 2.0, -3.0)))
            .unwrap();
        assert!(FollowComponent::step(&mut scene, &follow).unwrap());
        assert_relative_eq!(
            scene.world_transform(&camera).unwrap().position,
            Vec3::new(5.0, 2.0, -3.0),
            epsilon = 1e-5
        );

        scene.destroy(&leader, true).unwrap();
        assert!(!FollowComponent::step(&mut scene, &follow).unwrap());
    }
}
