//! Scene graph with stable object identity
//!
//! Nodes and components are stored in arenas owned by [`Scene`] and referenced
//! through shared [`Handle`]s. Identity lives in the [`InstanceRegistry`], which lets
//! an object be rebuilt (prefab revert/update) without invalidating handles to it.

pub mod component;
pub mod error;
pub mod handle;
pub mod instance;
pub mod node;
pub mod serialization;

mod hierarchy;
mod lifecycle;
mod context;
mod transform;

pub use component::{Component, ComponentHandle, ComponentTypes};
pub use error::{SceneError, SceneResult, SessionStateError};
pub use handle::{AnyHandle, Handle, INVALID_INSTANCE_ID};
pub use instance::{
    ComponentKey, DeserializationFlags, InstanceRecord, InstanceRegistry, NodeKey, ObjectKey, ResolveStats,
    SessionEndCallback,
};
pub use node::{SceneNode, SceneNodeFlags, TransformChangedFlags};
pub use context::Scene;
pub use serialization::{from_ron_str, to_ron_string, SerializedComponent, SerializedNode};
