//! Loaded prefabs keyed by UUID

use super::resource::Prefab;
use crate::scene::{Scene, SceneError, SceneResult};
use std::collections::HashMap;
use std::path::Path;

/// Prefabs available to link utilities
#[derive(Debug, Default)]
pub struct PrefabLibrary {
    prefabs: HashMap<String, Prefab>,
}

impl PrefabLibrary {
    /// Empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a prefab; returns its UUID
    pub fn insert(&mut self, prefab: Prefab) -> String {
        let uuid = prefab.uuid().to_string();
        self.prefabs.insert(uuid.clone(), prefab);
        uuid
    }

    /// Prefab with `uuid`, if loaded
    pub fn get(&self, uuid: &str) -> Option<&Prefab> {
        self.prefabs.get(uuid)
    }

    /// Mutable access to a loaded prefab
    pub fn get_mut(&mut self, uuid: &str) -> Option<&mut Prefab> {
        self.prefabs.get_mut(uuid)
    }

    /// Unload a prefab
    pub fn remove(&mut self, uuid: &str) -> Option<Prefab> {
        self.prefabs.remove(uuid)
    }

    /// Whether a prefab with `uuid` is loaded
    pub fn contains(&self, uuid: &str) -> bool {
        self.prefabs.contains_key(uuid)
    }

    /// Number of loaded prefabs
    pub fn len(&self) -> usize {
        self.prefabs.len()
    }

    /// Whether no prefabs are loaded
    pub fn is_empty(&self) -> bool {
        self.prefabs.is_empty()
    }

    /// Look up a prefab, failing with [`SceneError::PrefabNotFound`]
    pub fn require(&self, uuid: &str) -> SceneResult<&Prefab> {
        self.get(uuid)
            .ok_or_else(|| SceneError::PrefabNotFound(uuid.to_string()))
    }

    /// Refresh nested instances inside the template of `uuid`
    pub fn update_child_instances(&mut self, scene: &mut Scene, uuid: &str) -> SceneResult<usize> {
        let mut prefab = self
            .remove(uuid)
            .ok_or_else(|| SceneError::PrefabNotFound(uuid.to_string()))?;
        let result = prefab.update_child_instances(scene, self);
        self.insert(prefab);
        result
    }

    /// Load a prefab file and add it
    pub fn load_file(&mut self, path: &Path) -> SceneResult<String> {
        Ok(self.insert(Prefab::load_from_file(path)?))
    }
}
