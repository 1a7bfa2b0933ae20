//! Scene node data
//!
//! Nodes live in the scene's arena; all structural mutation goes through
//! [`Scene`](super::Scene) so parent and child links stay consistent.

use super::component::ComponentHandle;
use super::handle::Handle;
use crate::foundation::math::{Mat4, Transform};
use crate::prefab::PrefabObjectDiff;
use crate::reflect::{ReflectValue, SerializedObject, Value};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::cell::Cell;

bitflags! {
    /// Per-node behavior flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SceneNodeFlags: u32 {
        /// Not part of the live scene; no lifecycle callbacks
        const SKIP_INSTANTIATE = 1 << 0;
        /// Excluded from encoding
        const SKIP_SAVE = 1 << 1;
        /// Survives [`Scene::clear`](super::Scene::clear)
        const PERSISTENT = 1 << 2;
        /// Engine-internal node
        const INTERNAL = 1 << 3;
    }
}

impl SceneNodeFlags {
    /// Flags a node takes over from a new parent
    pub const INHERITED: Self = Self::SKIP_INSTANTIATE.union(Self::SKIP_SAVE);
}

bitflags! {
    /// What about a node's transform changed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransformChangedFlags: u32 {
        const TRANSFORM = 1 << 0;
        const PARENT = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct DirtyFlags: u8 {
        const LOCAL = 1 << 0;
        const WORLD = 1 << 1;
    }
}

/// A node of the scene forest
pub struct SceneNode {
    pub(crate) name: String,
    pub(crate) handle: Handle<SceneNode>,
    pub(crate) flags: SceneNodeFlags,

    pub(crate) local: Transform,
    pub(crate) world: Cell<Transform>,
    pub(crate) local_matrix: Cell<Mat4>,
    pub(crate) world_matrix: Cell<Mat4>,
    pub(crate) dirty: Cell<DirtyFlags>,
    pub(crate) transform_hash: u32,

    pub(crate) parent: Option<Handle<SceneNode>>,
    pub(crate) children: Vec<Handle<SceneNode>>,
    pub(crate) components: Vec<ComponentHandle>,

    pub(crate) link_id: Option<u32>,
    pub(crate) prefab_link: Option<String>,
    pub(crate) prefab_diff: Option<PrefabObjectDiff>,
    pub(crate) prefab_hash: u32,

    pub(crate) active_self: bool,
    pub(crate) active_hierarchy: bool,
}

impl SceneNode {
    pub(crate) fn new(name: String, handle: Handle<SceneNode>, flags: SceneNodeFlags) -> Self {
        Self {
            name,
            handle,
            flags,
            local: Transform::identity(),
            world: Cell::new(Transform::identity()),
            local_matrix: Cell::new(Mat4::identity()),
            world_matrix: Cell::new(Mat4::identity()),
            dirty: Cell::new(DirtyFlags::all()),
            transform_hash: 0,
            parent: None,
            children: Vec::new(),
            components: Vec::new(),
            link_id: None,
            prefab_link: None,
            prefab_diff: None,
            prefab_hash: 0,
            active_self: true,
            active_hierarchy: true,
        }
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle to this node
    pub fn handle(&self) -> &Handle<SceneNode> {
        &self.handle
    }

    /// Behavior flags
    pub fn flags(&self) -> SceneNodeFlags {
        self.flags
    }

    /// Whether the node takes part in the live scene
    pub fn is_instantiated(&self) -> bool {
        !self.flags.contains(SceneNodeFlags::SKIP_INSTANTIATE)
    }

    /// Transform relative to the parent
    pub fn local_transform(&self) -> &Transform {
        &self.local
    }

    /// Counter bumped on every transform change of this node or an ancestor
    pub fn transform_hash(&self) -> u32 {
        self.transform_hash
    }

    /// Parent node; `None` for roots
    pub fn parent(&self) -> Option<&Handle<SceneNode>> {
        self.parent.as_ref()
    }

    /// Children in sibling order
    pub fn children(&self) -> &[Handle<SceneNode>] {
        &self.children
    }

    /// Attached components in attachment order
    pub fn components(&self) -> &[ComponentHandle] {
        &self.components
    }

    /// Link id within the owning prefab instance
    pub fn link_id(&self) -> Option<u32> {
        self.link_id
    }

    /// UUID of the prefab this node is the root instance of
    pub fn prefab_link(&self) -> Option<&str> {
        self.prefab_link.as_deref()
    }

    /// Recorded local modifications against the linked prefab
    pub fn prefab_diff(&self) -> Option<&PrefabObjectDiff> {
        self.prefab_diff.as_ref()
    }

    /// Hash of the prefab version this instance was built from
    pub fn prefab_hash(&self) -> u32 {
        self.prefab_hash
    }

    /// Own activity flag, ignoring ancestors
    pub fn is_active_self(&self) -> bool {
        self.active_self
    }

    /// Active and every ancestor active
    pub fn is_active_in_hierarchy(&self) -> bool {
        self.active_hierarchy
    }

    /// Node-level reflected fields
    pub(crate) fn encode_fields(&self) -> SerializedObject {
        SerializedObject::new(NODE_TYPE_NAME)
            .with_field(FIELD_POSITION, ReflectValue::to_value(&self.local.position))
            .with_field(FIELD_ROTATION, ReflectValue::to_value(&self.local.rotation))
            .with_field(FIELD_SCALE, ReflectValue::to_value(&self.local.scale))
            .with_field(FIELD_ACTIVE, Value::Bool(self.active_self))
    }
}

pub(crate) const NODE_TYPE_NAME: &str = "SceneNode";
pub(crate) const FIELD_POSITION: &str = "position";
pub(crate) const FIELD_ROTATION: &str = "rotation";
pub(crate) const FIELD_SCALE: &str = "scale";
pub(crate) const FIELD_ACTIVE: &str = "active";
