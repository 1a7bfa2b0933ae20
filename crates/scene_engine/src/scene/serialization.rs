//! Subtree encoding, decoding and cloning
//!
//! Encoded subtrees carry the instance ids objects had when they were saved. Decoding
//! always happens inside a deserialization session so handles between decoded objects
//! can be rebound to the new objects.

use super::component::ComponentHandle;
use super::error::{SceneError, SceneResult};
use super::handle::Handle;
use super::instance::{DeserializationFlags, NodeKey};
use super::node::{
    SceneNode, SceneNodeFlags, TransformChangedFlags, FIELD_ACTIVE, FIELD_POSITION, FIELD_ROTATION,
    FIELD_SCALE,
};
use super::context::Scene;
use crate::foundation::math::{Quat, Vec3};
use crate::prefab::PrefabObjectDiff;
use crate::reflect::{ReflectValue, SerializedObject, Value};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Encoded component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedComponent {
    /// Instance id at save time
    pub instance_id: u64,
    /// Link id inside the owning prefab, if any
    #[serde(default)]
    pub link_id: Option<u32>,
    /// Reflected component fields
    pub data: SerializedObject,
}

/// Encoded node with its components and saved children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    /// Instance id at save time
    pub instance_id: u64,
    /// Display name
    pub name: String,
    /// Behavior flags at save time
    pub flags: SceneNodeFlags,
    /// Link id inside the owning prefab, if any
    #[serde(default)]
    pub link_id: Option<u32>,
    /// Transform and activity, see [`SceneNode`] field names
    pub fields: SerializedObject,
    /// UUID of the prefab this node instantiates
    #[serde(default)]
    pub prefab_link: Option<String>,
    /// Hash of the prefab version the instance was built from
    #[serde(default)]
    pub prefab_hash: u32,
    /// Instance changes applied on top of the prefab when decoded
    #[serde(default)]
    pub prefab_diff: Option<PrefabObjectDiff>,
    /// Attached components in attachment order
    #[serde(default)]
    pub components: Vec<SerializedComponent>,
    /// Saved children; children of prefab instances are rebuilt from the prefab instead
    #[serde(default)]
    pub children: Vec<SerializedNode>,
}

impl SerializedNode {
    /// Find a direct child by link id
    pub fn child_by_link(&self, link_id: u32) -> Option<&SerializedNode> {
        self.children.iter().find(|c| c.link_id == Some(link_id))
    }

    /// Whether this node is the root of a prefab instance
    pub fn is_prefab_instance(&self) -> bool {
        self.prefab_link.is_some()
    }
}

impl Scene {
    /// Encode a node, its components and all descendants not flagged skip-save
    pub fn encode_subtree(&self, node: &Handle<SceneNode>) -> SceneResult<SerializedNode> {
        let key = self.node_key(node)?;
        Ok(self.encode_node(key))
    }

    pub(crate) fn encode_node(&self, key: NodeKey) -> SerializedNode {
        let node = &self.nodes[key];
        let components = self
            .component_keys(key)
            .into_iter()
            .map(|c| self.encode_component(c))
            .collect();
        let children = self
            .child_keys(key)
            .into_iter()
            .filter(|&child| !self.nodes[child].flags.contains(SceneNodeFlags::SKIP_SAVE))
            .map(|child| self.encode_node(child))
            .collect();

        SerializedNode {
            instance_id: node.handle.instance_id(),
            name: node.name.clone(),
            flags: node.flags,
            link_id: node.link_id,
            fields: node.encode_fields(),
            prefab_link: node.prefab_link.clone(),
            prefab_hash: node.prefab_hash,
            prefab_diff: node.prefab_diff.clone(),
            components,
            children,
        }
    }

    pub(crate) fn encode_component(&self, key: super::instance::ComponentKey) -> SerializedComponent {
        let slot = &self.components[key];
        SerializedComponent {
            instance_id: slot.handle.instance_id(),
            link_id: slot.link_id,
            data: slot.behavior.to_serialized(),
        }
    }

    /// Decode a subtree in its own session
    ///
    /// The result is parentless and not instantiated unless `instantiate` is set, in
    /// which case it joins the live scene as a top-level node once all handles are
    /// resolved.
    pub fn decode_subtree(
        &mut self,
        data: &SerializedNode,
        flags: DeserializationFlags,
        instantiate: bool,
    ) -> SceneResult<Handle<SceneNode>> {
        self.registry.begin_deserialization(flags)?;
        let decoded = self.decode_in_session(data);
        let resolved = self.registry.end_deserialization();

        let key = decoded?;
        let stats = resolved?;
        log::debug!("Decoded '{}': {:?}", data.name, stats);

        if instantiate {
            let root = self.root_key();
            self.attach(key, root, None);
            self.instantiate_subtree(key);
        }
        Ok(self.nodes[key].handle.clone())
    }

    /// Decode into the active session
    ///
    /// Nodes are created flagged [`SceneNodeFlags::SKIP_INSTANTIATE`] and no lifecycle
    /// event runs; the caller decides when the subtree goes live.
    pub(crate) fn decode_in_session(&mut self, data: &SerializedNode) -> SceneResult<NodeKey> {
        let key = self.decode_node(data)?;
        self.refresh_active_hierarchy(key, true);
        Ok(key)
    }

    /// Decode one node and its saved descendants
    ///
    /// On failure everything this call inserted is removed again, so the arenas and the
    /// registry hold no half-built subtree.
    fn decode_node(&mut self, data: &SerializedNode) -> SceneResult<NodeKey> {
        let saved_id = data.instance_id;
        let key = self.insert_node_with(
            data.name.clone(),
            data.flags | SceneNodeFlags::SKIP_INSTANTIATE,
            |registry, object| registry.register_deserialized(saved_id, object),
        )?;

        if let Err(err) = self.decode_node_contents(key, data) {
            log::debug!("Discarding partially decoded '{}': {}", data.name, err);
            self.destroy_subtree(key);
            return Err(err);
        }
        Ok(key)
    }

    fn decode_node_contents(&mut self, key: NodeKey, data: &SerializedNode) -> SceneResult<()> {
        {
            let node = &mut self.nodes[key];
            node.link_id = data.link_id;
            node.prefab_link = data.prefab_link.clone();
            node.prefab_hash = data.prefab_hash;
            node.prefab_diff = data.prefab_diff.clone();
        }
        self.apply_node_fields(key, &data.fields)?;

        for component in &data.components {
            self.decode_component(key, component)?;
        }

        for child in &data.children {
            let child_key = self.decode_node(child)?;
            let handle = self.nodes[child_key].handle.clone();
            let parent = self.nodes[key].handle.clone();
            self.nodes[key].children.push(handle);
            self.nodes[child_key].parent = Some(parent);
        }
        Ok(())
    }

    pub(crate) fn decode_component(&mut self, node_key: NodeKey, data: &SerializedComponent) -> SceneResult<ComponentHandle> {
        let type_name = &data.data.type_name;
        let mut behavior = self
            .component_types
            .create(type_name)
            .ok_or_else(|| SceneError::UnknownComponentType(type_name.clone()))?;
        behavior.apply_serialized(&data.data, &mut self.registry)?;

        let saved_id = data.instance_id;
        let key = self.insert_component(node_key, behavior, data.link_id, |registry, object| {
            registry.register_deserialized(saved_id, object)
        })?;
        Ok(self.components[key].handle.clone())
    }

    /// Overwrite node-level fields present in `fields`
    pub(crate) fn apply_node_fields(&mut self, key: NodeKey, fields: &SerializedObject) -> SceneResult<()> {
        let mut transform_changed = false;
        for (name, value) in &fields.fields {
            let node = &mut self.nodes[key];
            match name.as_str() {
                FIELD_POSITION => {
                    node.local.position = <Vec3 as ReflectValue>::from_value(value.clone(), &mut self.registry)?;
                    transform_changed = true;
                }
                FIELD_ROTATION => {
                    node.local.rotation = <Quat as ReflectValue>::from_value(value.clone(), &mut self.registry)?;
                    transform_changed = true;
                }
                FIELD_SCALE => {
                    node.local.scale = <Vec3 as ReflectValue>::from_value(value.clone(), &mut self.registry)?;
                    transform_changed = true;
                }
                FIELD_ACTIVE => {
                    let Value::Bool(active) = value else {
                        return Err(crate::reflect::ReflectError::mismatch("bool", value).in_field(FIELD_ACTIVE).into());
                    };
                    if node.active_self != *active {
                        let handle = node.handle.clone();
                        self.set_active(&handle, *active)?;
                    }
                }
                other => log::debug!("Ignoring unknown node field '{}'", other),
            }
        }
        if transform_changed {
            self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM);
        }
        Ok(())
    }

    /// Deep copy of a subtree with fresh instance ids
    ///
    /// Handles between objects inside the subtree point at the copies; handles to
    /// objects outside keep pointing at the originals.
    pub fn clone_subtree(&mut self, node: &Handle<SceneNode>, instantiate: bool) -> SceneResult<Handle<SceneNode>> {
        let data = self.encode_subtree(node)?;
        self.decode_subtree(&data, DeserializationFlags::USE_NEW_IDS, instantiate)
    }

    /// Write a subtree to a RON file
    pub fn save_subtree(&self, node: &Handle<SceneNode>, path: &Path) -> SceneResult<()> {
        let data = self.encode_subtree(node)?;
        fs::write(path, to_ron_string(&data)?)?;
        log::info!("Saved '{}' to {}", data.name, path.display());
        Ok(())
    }

    /// Read a subtree from a RON file into the live scene using the configured load flags
    pub fn load_subtree(&mut self, path: &Path) -> SceneResult<Handle<SceneNode>> {
        let data = from_ron_str(&fs::read_to_string(path)?)?;
        let flags = self.config().load.flags();
        let node = self.decode_subtree(&data, flags, true)?;
        log::info!("Loaded '{}' from {}", data.name, path.display());
        Ok(node)
    }
}

/// Pretty RON text of an encoded subtree
pub fn to_ron_string(data: &SerializedNode) -> SceneResult<String> {
    Ok(ron::ser::to_string_pretty(data, ron::ser::PrettyConfig::default())?)
}

/// Parse a saved subtree from RON text
pub fn from_ron_str(text: &str) -> SceneResult<SerializedNode> {
    Ok(ron::from_str(text)?)
}
