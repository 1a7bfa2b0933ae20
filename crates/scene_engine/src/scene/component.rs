//! Component behavior contract
//!
//! Components are reflected objects attached to exactly one node. The scene drives
//! their lifecycle: `instantiate` and `on_initialized` when the owning node enters
//! the live scene, `on_enabled`/`on_disabled` as the node's hierarchy activity flips,
//! `on_destroyed` on removal.

use super::handle::Handle;
use super::node::{SceneNode, TransformChangedFlags};
use crate::reflect::{Reflect, ReflectType};
use std::collections::HashMap;

/// Behavior attached to a scene node
pub trait Component: Reflect {
    /// Transform changes this component wants to hear about
    fn notify_flags(&self) -> TransformChangedFlags {
        TransformChangedFlags::empty()
    }

    /// Called once when the owning subtree is instantiated
    fn instantiate(&mut self) {}

    /// Called once after the owning scene finishes setting up the component
    fn on_initialized(&mut self) {}

    /// Called when the component becomes active in the hierarchy
    fn on_enabled(&mut self) {}

    /// Called when the component stops being active in the hierarchy
    fn on_disabled(&mut self) {}

    /// Called before the component is removed from the registry
    fn on_destroyed(&mut self) {}

    /// Called with the changes selected by [`Component::notify_flags`]
    fn on_transform_changed(&mut self, _flags: TransformChangedFlags) {}
}

/// Handle to any component
pub type ComponentHandle = Handle<dyn Component>;

/// Lifecycle progress of one component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ComponentState {
    pub(crate) instantiated: bool,
    pub(crate) initialized: bool,
    pub(crate) enabled: bool,
}

/// Arena entry for a component
pub(crate) struct ComponentSlot {
    pub(crate) handle: ComponentHandle,
    pub(crate) owner: Handle<SceneNode>,
    pub(crate) link_id: Option<u32>,
    pub(crate) notify_mask: TransformChangedFlags,
    pub(crate) state: ComponentState,
    pub(crate) behavior: Box<dyn Component>,
}

type ComponentFactory = fn() -> Box<dyn Component>;

fn construct<T: Component + ReflectType>() -> Box<dyn Component> {
    Box::new(T::default())
}

/// Type name to constructor map used when decoding components
#[derive(Default)]
pub struct ComponentTypes {
    factories: HashMap<&'static str, ComponentFactory>,
}

impl ComponentTypes {
    /// Empty type map; the built-in components are not registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its reflected type name
    pub fn register<T: Component + ReflectType>(&mut self) {
        self.factories.insert(T::TYPE_NAME, construct::<T>);
    }

    /// Whether a type is registered under `type_name`
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Default-constructed component of the named type
    pub fn create(&self, type_name: &str) -> Option<Box<dyn Component>> {
        self.factories.get(type_name).map(|factory| factory())
    }
}
