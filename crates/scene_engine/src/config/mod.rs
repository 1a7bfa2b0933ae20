//! Configuration system
//!
//! Scene behavior that callers may want to tune without code changes: the
//! deserialization flags used when loading saved subtrees and how loudly prefab
//! drift is reported.

pub use serde::{Serialize, Deserialize};

use crate::scene::DeserializationFlags;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;
        
        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }
    
    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };
        
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    
    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),
    
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),
    
    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Flags applied when a saved subtree is loaded back into a scene
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadConfig {
    /// Always mint fresh instance ids instead of reusing saved ones
    pub use_new_ids: bool,
    /// Handles pointing outside the loaded data become dead
    pub break_external: bool,
    /// Handles whose target was never seen stay pending instead of dying
    pub keep_missing: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            use_new_ids: true,
            break_external: false,
            keep_missing: false,
        }
    }
}

impl LoadConfig {
    /// Translate into registry session flags
    pub fn flags(&self) -> DeserializationFlags {
        let mut flags = DeserializationFlags::empty();
        flags.set(DeserializationFlags::USE_NEW_IDS, self.use_new_ids);
        flags.set(DeserializationFlags::BREAK_EXTERNAL, self.break_external);
        flags.set(DeserializationFlags::KEEP_MISSING, self.keep_missing);
        flags
    }
}

/// Prefab diff reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiffConfig {
    /// Log skipped diff entries at warn level instead of debug
    pub warn_on_skipped: bool,
}

/// # Scene Configuration
///
/// Top level configuration for a [`Scene`](crate::scene::Scene).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SceneConfig {
    /// Name given to the hidden forest root node
    pub root_name: String,
    /// Flags used by `Scene::load_subtree`
    pub load: LoadConfig,
    /// Prefab diff settings
    pub diff: DiffConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            root_name: "SceneRoot".to_string(),
            load: LoadConfig::default(),
            diff: DiffConfig::default(),
        }
    }
}

impl Config for SceneConfig {}
