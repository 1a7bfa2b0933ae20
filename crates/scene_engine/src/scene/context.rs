//! Scene context
//!
//! Owns the instance registry, the node and component arenas and the hidden forest
//! root. Top-level scene nodes are the forest root's children; nodes created with
//! [`SceneNodeFlags::SKIP_INSTANTIATE`] stay parentless and outside the live scene.

use super::component::{ComponentHandle, ComponentSlot, ComponentTypes, Component};
use super::error::{SceneError, SceneResult};
use super::handle::{AnyHandle, Handle};
use super::instance::{ComponentKey, InstanceRegistry, NodeKey, ObjectKey};
use super::node::{SceneNode, SceneNodeFlags};
use crate::config::SceneConfig;
use crate::reflect::ReflectType;
use slotmap::SlotMap;

/// Destruction requested for the end of the frame
enum QueuedDestroy {
    Node(Handle<SceneNode>),
    Component(ComponentHandle),
}

/// Scene graph and everything needed to keep object identity stable
pub struct Scene {
    pub(crate) registry: InstanceRegistry,
    pub(crate) nodes: SlotMap<NodeKey, SceneNode>,
    pub(crate) components: SlotMap<ComponentKey, ComponentSlot>,
    pub(crate) component_types: ComponentTypes,
    root: Handle<SceneNode>,
    destroy_queue: Vec<QueuedDestroy>,
    config: SceneConfig,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// Create an empty scene with default configuration
    pub fn new() -> Self {
        Self::with_config(SceneConfig::default())
    }

    /// Empty scene using `config`
    pub fn with_config(config: SceneConfig) -> Self {
        let mut registry = InstanceRegistry::new();
        let mut nodes = SlotMap::with_key();

        let root_name = config.root_name.clone();
        let root = nodes.insert_with_key(|key| {
            let handle = registry.register(ObjectKey::Node(key));
            SceneNode::new(
                root_name,
                handle,
                SceneNodeFlags::PERSISTENT | SceneNodeFlags::INTERNAL,
            )
        });
        let root = nodes[root].handle.clone();

        let mut component_types = ComponentTypes::new();
        crate::components::register_builtin(&mut component_types);

        log::debug!("Scene created with forest root {}", root.instance_id());
        Self {
            registry,
            nodes,
            components: SlotMap::with_key(),
            component_types,
            root,
            destroy_queue: Vec::new(),
            config,
        }
    }

    /// Settings this scene was created with
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Registry holding every live node and component
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Mutable registry access, mainly for deserialization sessions
    pub fn registry_mut(&mut self) -> &mut InstanceRegistry {
        &mut self.registry
    }

    /// Hidden parent of every top-level node
    pub fn forest_root(&self) -> &Handle<SceneNode> {
        &self.root
    }

    /// Top-level nodes of the live scene
    pub fn root_nodes(&self) -> Vec<Handle<SceneNode>> {
        self.nodes
            .get(self.root_key())
            .map(|root| root.children.clone())
            .unwrap_or_default()
    }

    pub(crate) fn root_key(&self) -> NodeKey {
        match self.root.object_key() {
            Ok(ObjectKey::Node(key)) => key,
            _ => NodeKey::default(),
        }
    }

    /// Make a component type decodable
    pub fn register_component_type<T: Component + ReflectType>(&mut self) {
        self.component_types.register::<T>();
    }

    /// Component types this scene can decode
    pub fn component_types(&self) -> &ComponentTypes {
        &self.component_types
    }

    /// Create a node
    ///
    /// Unless `flags` contains [`SceneNodeFlags::SKIP_INSTANTIATE`] the node joins the
    /// live scene as a top-level node.
    pub fn create_node(&mut self, name: &str, flags: SceneNodeFlags) -> Handle<SceneNode> {
        let registry = &mut self.registry;
        let key = self.nodes.insert_with_key(|key| {
            let handle = registry.register(ObjectKey::Node(key));
            SceneNode::new(name.to_string(), handle, flags)
        });
        let handle = self.nodes[key].handle.clone();

        if !flags.contains(SceneNodeFlags::SKIP_INSTANTIATE) {
            let root_key = self.root_key();
            self.attach(key, root_key, None);
        }

        log::trace!("Created node '{}' ({})", name, handle.instance_id());
        handle
    }

    /// Insert a parentless node whose handle is produced by `make_handle`
    pub(crate) fn insert_node_with(
        &mut self,
        name: String,
        flags: SceneNodeFlags,
        make_handle: impl FnOnce(&mut InstanceRegistry, ObjectKey) -> SceneResult<Handle<SceneNode>>,
    ) -> SceneResult<NodeKey> {
        let registry = &mut self.registry;
        let mut failure = None;
        let key = self.nodes.insert_with_key(|key| {
            let handle = match make_handle(registry, ObjectKey::Node(key)) {
                Ok(handle) => handle,
                Err(err) => {
                    failure = Some(err);
                    Handle::null()
                }
            };
            SceneNode::new(name, handle, flags)
        });
        match failure {
            Some(err) => {
                self.nodes.remove(key);
                Err(err)
            }
            None => Ok(key),
        }
    }

    /// Node behind a handle
    pub fn node(&self, handle: &Handle<SceneNode>) -> SceneResult<&SceneNode> {
        let key = self.node_key(handle)?;
        Ok(&self.nodes[key])
    }

    pub(crate) fn node_key<T: ?Sized>(&self, handle: &Handle<T>) -> SceneResult<NodeKey> {
        match handle.object_key()? {
            ObjectKey::Node(key) if self.nodes.contains_key(key) => Ok(key),
            ObjectKey::Node(_) => Err(SceneError::DestroyedReference {
                id: handle.instance_id(),
            }),
            ObjectKey::Component(_) => Err(SceneError::WrongObjectType {
                id: handle.instance_id(),
                expected: "scene node",
            }),
        }
    }

    pub(crate) fn component_key<T: ?Sized>(&self, handle: &Handle<T>) -> SceneResult<ComponentKey> {
        match handle.object_key()? {
            ObjectKey::Component(key) if self.components.contains_key(key) => Ok(key),
            ObjectKey::Component(_) => Err(SceneError::DestroyedReference {
                id: handle.instance_id(),
            }),
            ObjectKey::Node(_) => Err(SceneError::WrongObjectType {
                id: handle.instance_id(),
                expected: "component",
            }),
        }
    }

    /// Key of a node's parent, if it is alive
    pub(crate) fn parent_key(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes[key]
            .parent
            .as_ref()
            .and_then(|parent| self.node_key(parent).ok())
    }

    pub(crate) fn child_keys(&self, key: NodeKey) -> Vec<NodeKey> {
        self.nodes[key]
            .children
            .iter()
            .filter_map(|child| self.node_key(child).ok())
            .collect()
    }

    pub(crate) fn component_keys(&self, key: NodeKey) -> Vec<ComponentKey> {
        self.nodes[key]
            .components
            .iter()
            .filter_map(|component| self.component_key(component).ok())
            .collect()
    }

    /// Node and all descendants, parents before children
    pub(crate) fn subtree_keys(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            out.push(current);
            let mut children = self.child_keys(current);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Handle of any live object, untyped
    pub(crate) fn self_handle(&self, object: ObjectKey) -> Option<AnyHandle> {
        match object {
            ObjectKey::Node(key) => self.nodes.get(key).map(|node| node.handle.erase()),
            ObjectKey::Component(key) => self.components.get(key).map(|slot| slot.handle.erase()),
        }
    }

    // ---- destruction ----

    /// Destroy a node and its subtree
    ///
    /// With `immediate` the objects are removed now. Otherwise they are marked
    /// destroy-queued and removed by [`Scene::process_destroy_queue`].
    pub fn destroy(&mut self, handle: &Handle<SceneNode>, immediate: bool) -> SceneResult<()> {
        let key = self.node_key(handle)?;
        if key == self.root_key() {
            return Err(SceneError::ForestRoot);
        }

        self.mark_destroy_queued(key);
        if immediate {
            self.detach(key);
            self.destroy_subtree(key);
        } else if !self.destroy_queue.iter().any(|q| matches!(q, QueuedDestroy::Node(h) if h == handle)) {
            self.destroy_queue.push(QueuedDestroy::Node(handle.clone()));
        }
        Ok(())
    }

    /// Destroy a single component
    pub fn destroy_component<T: ?Sized>(&mut self, handle: &Handle<T>, immediate: bool) -> SceneResult<()> {
        let key = self.component_key(handle)?;
        if let Some(record) = self.components[key].handle.record() {
            record.borrow_mut().mark_destroy_queued();
        }

        if immediate {
            self.remove_component(key);
        } else {
            self.destroy_queue.push(QueuedDestroy::Component(handle.cast()));
        }
        Ok(())
    }

    /// Remove everything queued by deferred destruction; returns the number of requests handled
    pub fn process_destroy_queue(&mut self) -> usize {
        let queue = std::mem::take(&mut self.destroy_queue);
        let count = queue.len();

        for request in queue {
            match request {
                QueuedDestroy::Node(handle) => {
                    if let Ok(key) = self.node_key(&handle) {
                        self.detach(key);
                        self.destroy_subtree(key);
                    }
                }
                QueuedDestroy::Component(handle) => {
                    if let Ok(key) = self.component_key(&handle) {
                        self.remove_component(key);
                    }
                }
            }
        }

        if count > 0 {
            log::debug!("Processed {} queued destroy requests", count);
        }
        count
    }

    /// Destroy every top-level node not flagged persistent
    pub fn clear(&mut self) {
        let doomed: Vec<_> = self
            .root_nodes()
            .into_iter()
            .filter(|handle| {
                self.node(handle)
                    .map(|node| !node.flags.contains(SceneNodeFlags::PERSISTENT))
                    .unwrap_or(false)
            })
            .collect();

        for handle in &doomed {
            if let Err(err) = self.destroy(handle, true) {
                log::warn!("Failed to destroy node {} during clear: {}", handle.instance_id(), err);
            }
        }
        log::info!("Scene cleared ({} top-level nodes destroyed)", doomed.len());
    }

    fn mark_destroy_queued(&mut self, key: NodeKey) {
        for node_key in self.subtree_keys(key) {
            let node = &self.nodes[node_key];
            if let Some(record) = node.handle.record() {
                record.borrow_mut().mark_destroy_queued();
            }
            for component in &node.components {
                if let Some(record) = component.record() {
                    record.borrow_mut().mark_destroy_queued();
                }
            }
        }
    }

    /// Remove a subtree from the arenas, children first
    pub(crate) fn destroy_subtree(&mut self, key: NodeKey) {
        for child in self.child_keys(key) {
            self.destroy_subtree(child);
        }
        for component in self.component_keys(key) {
            self.remove_component(component);
        }

        if let Some(node) = self.nodes.remove(key) {
            self.registry.unregister(&node.handle);
            log::trace!("Destroyed node '{}' ({})", node.name, node.handle.instance_id());
        }
    }

    fn remove_component(&mut self, key: ComponentKey) {
        let Some(mut slot) = self.components.remove(key) else {
            return;
        };

        if let Ok(owner) = self.node_key(&slot.owner) {
            let handle = &slot.handle;
            self.nodes[owner].components.retain(|c| c != handle);
        }

        if slot.state.enabled {
            slot.behavior.on_disabled();
        }
        if slot.state.initialized {
            slot.behavior.on_destroyed();
        }
        self.registry.unregister(&slot.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_nodes_join_forest_root() {
        let mut scene = Scene::new();
        let a = scene.create_node("A", SceneNodeFlags::empty());
        let template = scene.create_node("Template", SceneNodeFlags::SKIP_INSTANTIATE);

        assert_eq!(scene.root_nodes(), vec![a.clone()]);
        assert_eq!(scene.node(&a).unwrap().parent(), Some(scene.forest_root()));
        assert!(scene.node(&template).unwrap().parent().is_none());
        assert!(!scene.node(&template).unwrap().is_instantiated());
    }

    #[test]
    fn test_immediate_destroy() {
        let mut scene = Scene::new();
        let node = scene.create_node("Doomed", SceneNodeFlags::empty());

        scene.destroy(&node, true).unwrap();
        assert!(node.is_destroyed(false));
        assert!(matches!(scene.node(&node), Err(SceneError::DestroyedReference { .. })));
        assert!(scene.root_nodes().is_empty());
        assert!(matches!(
            scene.destroy(&node, true),
            Err(SceneError::DestroyedReference { .. })
        ));
    }

    #[test]
    fn test_deferred_destroy_waits_for_queue() {
        let mut scene = Scene::new();
        let node = scene.create_node("Later", SceneNodeFlags::empty());

        scene.destroy(&node, false).unwrap();
        assert!(!node.is_destroyed(false));
        assert!(node.is_destroyed(true));
        assert!(scene.node(&node).is_ok());

        assert_eq!(scene.process_destroy_queue(), 1);
        assert!(node.is_destroyed(false));
        assert_eq!(scene.process_destroy_queue(), 0);
    }

    #[test]
    fn test_forest_root_cannot_be_destroyed() {
        let mut scene = Scene::new();
        let root = scene.forest_root().clone();
        assert!(matches!(scene.destroy(&root, true), Err(SceneError::ForestRoot)));
    }

    #[test]
    fn test_clear_keeps_persistent_nodes() {
        let mut scene = Scene::new();
        let level = scene.create_node("Level", SceneNodeFlags::empty());
        let manager = scene.create_node("Manager", SceneNodeFlags::PERSISTENT);

        scene.clear();
        assert!(level.is_destroyed(false));
        assert!(!manager.is_destroyed(false));
        assert_eq!(scene.root_nodes(), vec![manager]);
    }
}
