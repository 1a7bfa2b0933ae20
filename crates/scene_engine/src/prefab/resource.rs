//! Prefab resource
//!
//! A prefab is a frozen, link-relative snapshot of a node subtree plus a content hash.
//! Instances carry the prefab's UUID on their root node and the hash of the version
//! they were built from.

use super::library::PrefabLibrary;
use super::links;
use super::utility::PrefabLinkUtility;
use crate::scene::{DeserializationFlags, Handle, Scene, SceneNode, SceneResult, SerializedNode};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;
use uuid::Uuid;

/// Reusable node template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prefab {
    uuid: String,
    hash: u32,
    root: SerializedNode,
}

impl Prefab {
    /// Snapshot `node` as a new prefab and link `node` to it
    ///
    /// A prefab link `node` already had is broken first. Link ids are generated for
    /// every saved object that lacks one.
    pub fn create(scene: &mut Scene, node: &Handle<SceneNode>) -> SceneResult<Self> {
        if scene.node(node)?.prefab_link().is_some() {
            scene.break_prefab_link(node)?;
        }

        let mut prefab = Self {
            uuid: Uuid::new_v4().to_string(),
            hash: 0,
            root: scene.encode_subtree(node)?,
        };
        prefab.capture(scene, node)?;
        log::info!("Created prefab {} from '{}'", prefab.uuid, prefab.root.name);
        Ok(prefab)
    }

    /// Replace the template with a new snapshot of `node`, keeping the UUID
    pub fn update(&mut self, scene: &mut Scene, node: &Handle<SceneNode>) -> SceneResult<()> {
        let previous = self.hash;
        self.capture(scene, node)?;
        log::debug!("Prefab {} updated (hash {:08x} -> {:08x})", self.uuid, previous, self.hash);
        Ok(())
    }

    fn capture(&mut self, scene: &mut Scene, node: &Handle<SceneNode>) -> SceneResult<()> {
        PrefabLinkUtility::generate_prefab_ids(scene, node)?;

        let mut root = scene.encode_subtree(node)?;
        links::localize(&mut root);
        root.link_id = None;
        root.prefab_link = Some(self.uuid.clone());
        root.prefab_diff = None;
        root.prefab_hash = 0;
        self.hash = content_hash(&root)?;
        root.prefab_hash = self.hash;
        self.root = root;

        let key = scene.node_key(node)?;
        let source = &mut scene.nodes[key];
        source.prefab_link = Some(self.uuid.clone());
        source.prefab_hash = self.hash;
        source.prefab_diff = None;
        Ok(())
    }

    /// Stable identity of this prefab
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Content hash of the current template
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Localized template
    pub fn root(&self) -> &SerializedNode {
        &self.root
    }

    /// Build a live instance as a new top-level node
    pub fn instantiate(&self, scene: &mut Scene) -> SceneResult<Handle<SceneNode>> {
        let data = links::globalized(&self.root);
        let instance = scene.decode_subtree(&data, DeserializationFlags::USE_NEW_IDS, true)?;
        log::debug!("Instantiated prefab {} as {}", self.uuid, instance.instance_id());
        Ok(instance)
    }

    /// Build a parentless instance outside the live scene
    pub fn instantiate_detached(&self, scene: &mut Scene) -> SceneResult<Handle<SceneNode>> {
        let data = links::globalized(&self.root);
        scene.decode_subtree(&data, DeserializationFlags::USE_NEW_IDS, false)
    }

    /// Rebuild nested prefab instances in the template from their current prefabs
    ///
    /// The template is instantiated outside the live scene, outdated nested instances
    /// are updated and the result is captured back. Returns the number of rebuilt
    /// instances.
    pub fn update_child_instances(&mut self, scene: &mut Scene, library: &PrefabLibrary) -> SceneResult<usize> {
        let temp = self.instantiate_detached(scene)?;
        let rebuilt = PrefabLinkUtility::update_from_prefab(scene, library, &temp);

        let result = match rebuilt {
            Ok(0) => Ok(0),
            Ok(count) => self.capture(scene, &temp).map(|()| count),
            Err(err) => Err(err),
        };
        scene.destroy(&temp, true)?;
        result
    }

    /// Write the prefab as RON
    pub fn save_to_file(&self, path: &Path) -> SceneResult<()> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text)?;
        log::info!("Saved prefab {} to {}", self.uuid, path.display());
        Ok(())
    }

    /// Read a prefab written by [`Prefab::save_to_file`]
    pub fn load_from_file(path: &Path) -> SceneResult<Self> {
        let prefab: Self = ron::from_str(&fs::read_to_string(path)?)?;
        log::info!("Loaded prefab {} from {}", prefab.uuid, path.display());
        Ok(prefab)
    }
}

/// Hash of the RON text of a template
fn content_hash(root: &SerializedNode) -> SceneResult<u32> {
    let text = ron::to_string(root)?;
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let full = hasher.finish();
    Ok((full ^ (full >> 32)) as u32)
}
