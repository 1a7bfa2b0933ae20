//! Scene error types

use crate::reflect::ReflectError;
use thiserror::Error;

/// Misuse of the deserialization session protocol
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStateError {
    /// Session begun while another is open
    #[error("a deserialization session is already active")]
    AlreadyActive,

    /// Session operation without an open session
    #[error("no deserialization session is active")]
    NotActive,
}

/// Scene graph errors
#[derive(Error, Debug)]
pub enum SceneError {
    /// Handle target no longer exists
    #[error("object {id} has been destroyed")]
    DestroyedReference {
        /// Instance id the handle pointed at
        id: u64,
    },

    /// Handle target has a different type
    #[error("object {id} is not a {expected}")]
    WrongObjectType {
        /// Instance id of the object found
        id: u64,
        /// Type the caller asked for
        expected: &'static str,
    },

    /// Session protocol misuse
    #[error("session state error: {0}")]
    SessionState(#[from] SessionStateError),

    /// Reparenting would create a cycle
    #[error("cannot parent node {node} under {parent}: it would create a cycle")]
    InvalidHierarchy {
        /// Node being moved
        node: u64,
        /// Requested parent
        parent: u64,
    },

    /// Operation not allowed on the forest root
    #[error("the forest root cannot be modified this way")]
    ForestRoot,

    /// Saved component type is not registered
    #[error("no component type registered under '{0}'")]
    UnknownComponentType(String),

    /// Field access failed
    #[error("reflection error: {0}")]
    Reflect(#[from] ReflectError),

    /// Prefab missing from the library
    #[error("prefab '{0}' is not loaded")]
    PrefabNotFound(String),

    /// Node has no prefab link
    #[error("node {id} is not linked to a prefab")]
    NotPrefabInstance {
        /// Instance id of the node
        id: u64,
    },

    /// Encoding, decoding or config parsing failed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// File access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ron::Error> for SceneError {
    fn from(err: ron::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<ron::error::SpannedError> for SceneError {
    fn from(err: ron::error::SpannedError) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result type for scene operations
pub type SceneResult<T> = Result<T, SceneError>;
