//! Local and world transforms
//!
//! World transforms are cached per node and recomputed lazily: a change marks the
//! node and its descendants dirty, and the next query walks up to the nearest clean
//! ancestor.

use super::error::SceneResult;
use super::handle::Handle;
use super::instance::NodeKey;
use super::node::{DirtyFlags, SceneNode, TransformChangedFlags};
use super::context::Scene;
use crate::foundation::math::{Mat4, Quat, Transform, Vec3};

impl Scene {
    /// Transform relative to the parent
    pub fn local_transform(&self, node: &Handle<SceneNode>) -> SceneResult<Transform> {
        Ok(self.node(node)?.local)
    }

    /// Replace the local transform and notify the subtree
    pub fn set_local_transform(&mut self, node: &Handle<SceneNode>, transform: Transform) -> SceneResult<()> {
        let key = self.node_key(node)?;
        self.nodes[key].local = transform;
        self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM);
        Ok(())
    }

    /// Move the node relative to its parent
    pub fn set_position(&mut self, node: &Handle<SceneNode>, position: Vec3) -> SceneResult<()> {
        let key = self.node_key(node)?;
        self.nodes[key].local.position = position;
        self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM);
        Ok(())
    }

    /// Rotate the node relative to its parent
    pub fn set_rotation(&mut self, node: &Handle<SceneNode>, rotation: Quat) -> SceneResult<()> {
        let key = self.node_key(node)?;
        self.nodes[key].local.rotation = rotation;
        self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM);
        Ok(())
    }

    /// Scale the node relative to its parent
    pub fn set_scale(&mut self, node: &Handle<SceneNode>, scale: Vec3) -> SceneResult<()> {
        let key = self.node_key(node)?;
        self.nodes[key].local.scale = scale;
        self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM);
        Ok(())
    }

    /// Move by `offset` in parent space
    pub fn translate(&mut self, node: &Handle<SceneNode>, offset: Vec3) -> SceneResult<()> {
        let key = self.node_key(node)?;
        self.nodes[key].local.position += offset;
        self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM);
        Ok(())
    }

    /// Apply an additional local rotation
    pub fn rotate(&mut self, node: &Handle<SceneNode>, rotation: Quat) -> SceneResult<()> {
        let key = self.node_key(node)?;
        let local = &mut self.nodes[key].local;
        local.rotation = rotation * local.rotation;
        self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM);
        Ok(())
    }

    /// Place the node at a world-space position
    pub fn set_world_position(&mut self, node: &Handle<SceneNode>, position: Vec3) -> SceneResult<()> {
        let key = self.node_key(node)?;
        let mut world = self.world_transform_of(key);
        world.position = position;
        let local = match self.parent_key(key) {
            Some(parent) => world.make_local(&self.world_transform_of(parent)),
            None => world,
        };
        self.nodes[key].local.position = local.position;
        self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM);
        Ok(())
    }

    /// Transform composed through every ancestor
    pub fn world_transform(&self, node: &Handle<SceneNode>) -> SceneResult<Transform> {
        let key = self.node_key(node)?;
        Ok(self.world_transform_of(key))
    }

    /// World transform as a matrix
    pub fn world_matrix(&self, node: &Handle<SceneNode>) -> SceneResult<Mat4> {
        let key = self.node_key(node)?;
        self.world_transform_of(key);
        Ok(self.nodes[key].world_matrix.get())
    }

    /// Local transform as a matrix
    pub fn local_matrix(&self, node: &Handle<SceneNode>) -> SceneResult<Mat4> {
        let key = self.node_key(node)?;
        let node = &self.nodes[key];
        let mut dirty = node.dirty.get();
        if dirty.contains(DirtyFlags::LOCAL) {
            node.local_matrix.set(node.local.to_matrix());
            dirty.remove(DirtyFlags::LOCAL);
            node.dirty.set(dirty);
        }
        Ok(node.local_matrix.get())
    }

    pub(crate) fn world_transform_of(&self, key: NodeKey) -> Transform {
        let node = &self.nodes[key];
        let dirty = node.dirty.get();
        if !dirty.contains(DirtyFlags::WORLD) {
            return node.world.get();
        }

        let world = match self.parent_key(key) {
            Some(parent) => self.world_transform_of(parent).combine(&node.local),
            None => node.local,
        };
        node.world.set(world);
        node.world_matrix.set(world.to_matrix());
        node.dirty.set(dirty - DirtyFlags::WORLD);
        world
    }

    /// Mark a subtree's transforms dirty and notify interested components
    pub(crate) fn notify_transform_changed(&mut self, key: NodeKey, flags: TransformChangedFlags) {
        let node = &mut self.nodes[key];
        node.dirty.set(DirtyFlags::all());
        node.transform_hash = node.transform_hash.wrapping_add(1);

        if node.is_instantiated() {
            for component in self.component_keys(key) {
                let slot = &mut self.components[component];
                if slot.state.initialized && slot.notify_mask.intersects(flags) {
                    slot.behavior.on_transform_changed(flags);
                }
            }
        }

        for child in self.child_keys(key) {
            self.notify_transform_changed(child, flags);
        }
    }
}
