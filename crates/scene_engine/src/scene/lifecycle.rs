//! Component attachment and lifecycle events

use super::component::{Component, ComponentHandle, ComponentSlot, ComponentState};
use super::error::{SceneError, SceneResult};
use super::handle::Handle;
use super::instance::{ComponentKey, InstanceRegistry, NodeKey, ObjectKey};
use super::node::{SceneNode, SceneNodeFlags};
use super::context::Scene;
use crate::reflect::ReflectType;

impl Scene {
    /// Attach a component to a node
    ///
    /// If the node is part of the live scene the component is instantiated, initialized
    /// and, when the node is active in the hierarchy, enabled before this returns.
    pub fn add_component<T: Component>(&mut self, node: &Handle<SceneNode>, component: T) -> SceneResult<Handle<T>> {
        let node_key = self.node_key(node)?;
        let key = self.insert_component(node_key, Box::new(component), None, |registry, object| {
            Ok(registry.register(object))
        })?;
        self.start_component(key);
        Ok(self.components[key].handle.cast())
    }

    /// Attach a default-constructed component of a registered type
    pub fn add_component_by_name(&mut self, node: &Handle<SceneNode>, type_name: &str) -> SceneResult<ComponentHandle> {
        let node_key = self.node_key(node)?;
        let behavior = self
            .component_types
            .create(type_name)
            .ok_or_else(|| SceneError::UnknownComponentType(type_name.to_string()))?;
        let key = self.insert_component(node_key, behavior, None, |registry, object| {
            Ok(registry.register(object))
        })?;
        self.start_component(key);
        Ok(self.components[key].handle.clone())
    }

    /// Store a component without running lifecycle events
    pub(crate) fn insert_component(
        &mut self,
        node_key: NodeKey,
        behavior: Box<dyn Component>,
        link_id: Option<u32>,
        make_handle: impl FnOnce(&mut InstanceRegistry, ObjectKey) -> SceneResult<ComponentHandle>,
    ) -> SceneResult<ComponentKey> {
        let owner = self.nodes[node_key].handle.clone();
        let registry = &mut self.registry;
        let mut failure = None;
        let notify_mask = behavior.notify_flags();

        let key = self.components.insert_with_key(|key| {
            let handle = match make_handle(registry, ObjectKey::Component(key)) {
                Ok(handle) => handle,
                Err(err) => {
                    failure = Some(err);
                    Handle::null()
                }
            };
            ComponentSlot {
                handle,
                owner,
                link_id,
                notify_mask,
                state: ComponentState::default(),
                behavior,
            }
        });

        if let Some(err) = failure {
            self.components.remove(key);
            return Err(err);
        }
        let handle = self.components[key].handle.clone();
        self.nodes[node_key].components.push(handle);
        Ok(key)
    }

    /// Run instantiate/initialize/enable for a freshly attached component of a live node
    pub(crate) fn start_component(&mut self, key: ComponentKey) {
        let Ok(owner) = self.node_key(&self.components[key].owner) else {
            return;
        };
        let node = &self.nodes[owner];
        if !node.is_instantiated() {
            return;
        }
        let active = node.active_hierarchy;

        self.instantiate_component(key);
        self.initialize_component(key, active);
    }

    fn instantiate_component(&mut self, key: ComponentKey) {
        let slot = &mut self.components[key];
        if !slot.state.instantiated {
            slot.behavior.instantiate();
            slot.state.instantiated = true;
        }
    }

    fn initialize_component(&mut self, key: ComponentKey, active: bool) {
        let slot = &mut self.components[key];
        if !slot.state.initialized {
            slot.behavior.on_initialized();
            slot.state.initialized = true;
        }
        if active && !slot.state.enabled {
            slot.behavior.on_enabled();
            slot.state.enabled = true;
        }
    }

    /// Bring a parentless or detached subtree into the live scene
    ///
    /// Clears [`SceneNodeFlags::SKIP_INSTANTIATE`] on every node, then instantiates all
    /// components before any of them is initialized.
    pub(crate) fn instantiate_subtree(&mut self, key: NodeKey) {
        let keys = self.subtree_keys(key);
        for &k in &keys {
            self.nodes[k].flags.remove(SceneNodeFlags::SKIP_INSTANTIATE);
        }

        let components: Vec<(ComponentKey, bool)> = keys
            .iter()
            .flat_map(|&k| {
                let active = self.nodes[k].active_hierarchy;
                self.component_keys(k).into_iter().map(move |c| (c, active))
            })
            .collect();

        for &(component, _) in &components {
            self.instantiate_component(component);
        }
        for (component, active) in components {
            self.initialize_component(component, active);
        }
        log::trace!("Instantiated subtree of {} nodes", keys.len());
    }

    /// Propagate a change of effective activity and fire enable/disable events
    pub(crate) fn update_active_hierarchy(&mut self, key: NodeKey, parent_active: bool) {
        let node = &mut self.nodes[key];
        let active = parent_active && node.active_self;
        if node.active_hierarchy == active {
            return;
        }
        node.active_hierarchy = active;

        if node.is_instantiated() {
            for component in self.component_keys(key) {
                let slot = &mut self.components[component];
                if !slot.state.initialized {
                    continue;
                }
                if active && !slot.state.enabled {
                    slot.behavior.on_enabled();
                    slot.state.enabled = true;
                } else if !active && slot.state.enabled {
                    slot.behavior.on_disabled();
                    slot.state.enabled = false;
                }
            }
        }

        for child in self.child_keys(key) {
            self.update_active_hierarchy(child, active);
        }
    }

    /// Recompute effective activity of a subtree without firing events
    pub(crate) fn refresh_active_hierarchy(&mut self, key: NodeKey, parent_active: bool) {
        let node = &mut self.nodes[key];
        node.active_hierarchy = parent_active && node.active_self;
        let active = node.active_hierarchy;
        for child in self.child_keys(key) {
            self.refresh_active_hierarchy(child, active);
        }
    }

    // ---- access ----

    /// Typed access to a component
    pub fn component<T: Component>(&self, handle: &Handle<T>) -> SceneResult<&T> {
        let key = self.component_key(handle)?;
        self.components[key]
            .behavior
            .as_any()
            .downcast_ref::<T>()
            .ok_or(SceneError::WrongObjectType {
                id: handle.instance_id(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Mutable access to a live component
    pub fn component_mut<T: Component>(&mut self, handle: &Handle<T>) -> SceneResult<&mut T> {
        let key = self.component_key(handle)?;
        self.components[key]
            .behavior
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(SceneError::WrongObjectType {
                id: handle.instance_id(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Untyped access to a component
    pub fn component_dyn<T: ?Sized>(&self, handle: &Handle<T>) -> SceneResult<&dyn Component> {
        let key = self.component_key(handle)?;
        Ok(self.components[key].behavior.as_ref())
    }

    /// First component of type `T` on a node
    pub fn get_component<T: Component + ReflectType>(&self, node: &Handle<SceneNode>) -> SceneResult<Option<Handle<T>>> {
        Ok(self.get_components::<T>(node)?.into_iter().next())
    }

    /// All components of type `T` on a node
    pub fn get_components<T: Component + ReflectType>(&self, node: &Handle<SceneNode>) -> SceneResult<Vec<Handle<T>>> {
        let key = self.node_key(node)?;
        Ok(self
            .component_keys(key)
            .into_iter()
            .map(|c| &self.components[c])
            .filter(|slot| slot.behavior.as_any().is::<T>())
            .map(|slot| slot.handle.cast())
            .collect())
    }

    /// Every component attached to a node, in attachment order
    pub fn components(&self, node: &Handle<SceneNode>) -> SceneResult<Vec<ComponentHandle>> {
        Ok(self.node(node)?.components.clone())
    }

    /// Node a component is attached to
    pub fn component_owner<T: ?Sized>(&self, handle: &Handle<T>) -> SceneResult<Handle<SceneNode>> {
        let key = self.component_key(handle)?;
        Ok(self.components[key].owner.clone())
    }

    /// Link id of a component within its prefab instance
    pub fn component_link_id<T: ?Sized>(&self, handle: &Handle<T>) -> SceneResult<Option<u32>> {
        let key = self.component_key(handle)?;
        Ok(self.components[key].link_id)
    }

    /// Whether a component currently receives updates
    pub fn is_component_enabled<T: ?Sized>(&self, handle: &Handle<T>) -> SceneResult<bool> {
        let key = self.component_key(handle)?;
        Ok(self.components[key].state.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_reflect;
    use std::cell::RefCell;
    use std::rc::Rc;

    type EventLog = Rc<RefCell<Vec<&'static str>>>;

    #[derive(Default)]
    struct Recorder {
        events: EventLog,
        strength: f32,
    }

    impl_reflect!(Recorder, "Recorder" {
        strength: f32,
    });

    impl Component for Recorder {
        fn instantiate(&mut self) {
            self.events.borrow_mut().push("instantiate");
        }
        fn on_initialized(&mut self) {
            self.events.borrow_mut().push("initialized");
        }
        fn on_enabled(&mut self) {
            self.events.borrow_mut().push("enabled");
        }
        fn on_disabled(&mut self) {
            self.events.borrow_mut().push("disabled");
        }
        fn on_destroyed(&mut self) {
            self.events.borrow_mut().push("destroyed");
        }
    }

    fn recorder(events: &EventLog) -> Recorder {
        Recorder {
            events: events.clone(),
            strength: 1.0,
        }
    }

    #[test]
    fn test_lifecycle_order_on_live_node() {
        let events = EventLog::default();
        let mut scene = Scene::new();
        let node = scene.create_node("Live", SceneNodeFlags::empty());

        let component = scene.add_component(&node, recorder(&events)).unwrap();
        assert_eq!(*events.borrow(), vec!["instantiate", "initialized", "enabled"]);

        scene.set_active(&node, false).unwrap();
        scene.set_active(&node, true).unwrap();
        scene.destroy_component(&component, true).unwrap();
        assert_eq!(
            *events.borrow(),
            vec!["instantiate", "initialized", "enabled", "disabled", "enabled", "disabled", "destroyed"]
        );
        assert!(scene.node(&node).unwrap().components().is_empty());
    }

    #[test]
    fn test_no_events_on_uninstantiated_node() {
        let events = EventLog::default();
        let mut scene = Scene::new();
        let node = scene.create_node("Template", SceneNodeFlags::SKIP_INSTANTIATE);

        let component = scene.add_component(&node, recorder(&events)).unwrap();
        scene.set_active(&node, false).unwrap();
        scene.destroy(&node, true).unwrap();

        assert!(events.borrow().is_empty());
        assert!(component.is_destroyed(false));
    }

    #[test]
    fn test_instantiate_subtree_runs_deferred_lifecycle() {
        let events = EventLog::default();
        let mut scene = Scene::new();
        let node = scene.create_node("Template", SceneNodeFlags::SKIP_INSTANTIATE);
        scene.add_component(&node, recorder(&events)).unwrap();

        let key = scene.node_key(&node).unwrap();
        scene.instantiate_subtree(key);
        assert!(scene.node(&node).unwrap().is_instantiated());
        assert_eq!(*events.borrow(), vec!["instantiate", "initialized", "enabled"]);
    }

    #[test]
    fn test_inactive_node_initializes_without_enabling() {
        let events = EventLog::default();
        let mut scene = Scene::new();
        let node = scene.create_node("Dormant", SceneNodeFlags::empty());
        scene.set_active(&node, false).unwrap();

        let component = scene.add_component(&node, recorder(&events)).unwrap();
        assert_eq!(*events.borrow(), vec!["instantiate", "initialized"]);
        assert!(!scene.is_component_enabled(&component).unwrap());
    }

    #[test]
    fn test_typed_lookup() {
        let events = EventLog::default();
        let mut scene = Scene::new();
        let node = scene.create_node("Holder", SceneNodeFlags::empty());
        let added = scene.add_component(&node, recorder(&events)).unwrap();

        let found = scene.get_component::<Recorder>(&node).unwrap().unwrap();
        assert_eq!(found, added);
        assert_eq!(scene.component_owner(&found).unwrap(), node);

        scene.component_mut(&found).unwrap().strength = 4.0;
        assert_eq!(scene.component(&added).unwrap().strength, 4.0);
        assert!(matches!(
            scene.component(&node.cast::<Recorder>()),
            Err(SceneError::WrongObjectType { .. })
        ));
    }

    #[test]
    fn test_deferred_component_destroy() {
        let events = EventLog::default();
        let mut scene = Scene::new();
        let node = scene.create_node("Holder", SceneNodeFlags::empty());
        let component = scene.add_component(&node, recorder(&events)).unwrap();

        scene.destroy_component(&component, false).unwrap();
        assert!(component.is_destroyed(true));
        assert!(!component.is_destroyed(false));

        scene.process_destroy_queue();
        assert!(component.is_destroyed(false));
        assert!(events.borrow().ends_with(&["disabled", "destroyed"]));
    }
}
