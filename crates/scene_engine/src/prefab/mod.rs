//! Prefabs, prefab instances and instance diffs
//!
//! - [`Prefab`]: snapshot of a subtree that can be instantiated any number of times
//! - [`PrefabDiff`]: records and replays per-instance modifications
//! - [`PrefabLinkUtility`]: reverts and updates instances without breaking handles

pub mod diff;
pub mod library;
pub mod resource;
pub mod utility;

mod links;

pub use diff::{ApplyReport, PrefabComponentDiff, PrefabDiff, PrefabObjectDiff};
pub use library::PrefabLibrary;
pub use resource::Prefab;
pub use utility::PrefabLinkUtility;
