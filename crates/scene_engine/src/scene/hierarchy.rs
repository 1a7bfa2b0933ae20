//! Parent/child structure, activity and lookup

use super::error::{SceneError, SceneResult};
use super::handle::Handle;
use super::instance::NodeKey;
use super::node::{SceneNode, SceneNodeFlags, TransformChangedFlags};
use super::context::Scene;

impl Scene {
    /// Re-parent `node` under `parent`
    ///
    /// With `keep_world` the local transform is adjusted so the world transform stays
    /// put. If the move changes which prefab instance the node belongs to, its link ids
    /// and those of its descendants are cleared.
    pub fn set_parent(
        &mut self,
        node: &Handle<SceneNode>,
        parent: &Handle<SceneNode>,
        keep_world: bool,
    ) -> SceneResult<()> {
        let key = self.node_key(node)?;
        let parent_key = self.node_key(parent)?;

        if key == self.root_key() {
            return Err(SceneError::ForestRoot);
        }
        if key == parent_key || self.is_ancestor(key, parent_key) {
            return Err(SceneError::InvalidHierarchy {
                node: node.instance_id(),
                parent: parent.instance_id(),
            });
        }
        if self.parent_key(key) == Some(parent_key) {
            return Ok(());
        }

        let original_prefab = self.prefab_link_of(key, false);
        let world = keep_world.then(|| self.world_transform_of(key));

        self.attach(key, parent_key, None);

        if let Some(world) = world {
            let parent_world = self.world_transform_of(parent_key);
            self.nodes[key].local = world.make_local(&parent_world);
            self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM);
        }

        if self.prefab_link_of(key, false) != original_prefab {
            self.clear_link_ids(key, true, true);
        }
        Ok(())
    }

    /// Move a node back to the top level of the live scene
    pub fn unparent(&mut self, node: &Handle<SceneNode>, keep_world: bool) -> SceneResult<()> {
        let root = self.forest_root().clone();
        self.set_parent(node, &root, keep_world)
    }

    /// Link `key` under `parent_key` at `index` (appended when `None`)
    ///
    /// Performs no cycle or prefab checks.
    pub(crate) fn attach(&mut self, key: NodeKey, parent_key: NodeKey, index: Option<usize>) {
        self.detach(key);

        let handle = self.nodes[key].handle.clone();
        let parent = &mut self.nodes[parent_key];
        match index {
            Some(index) if index <= parent.children.len() => parent.children.insert(index, handle),
            _ => parent.children.push(handle),
        }
        let parent_handle = parent.handle.clone();
        let inherited = parent.flags & SceneNodeFlags::INHERITED;
        let parent_active = parent.active_hierarchy;

        self.nodes[key].parent = Some(parent_handle);
        if !inherited.is_empty() {
            self.insert_flags_recursive(key, inherited);
        }

        self.update_active_hierarchy(key, parent_active);
        self.notify_transform_changed(key, TransformChangedFlags::TRANSFORM | TransformChangedFlags::PARENT);
    }

    /// Unlink `key` from its parent, if any
    pub(crate) fn detach(&mut self, key: NodeKey) {
        let Some(parent) = self.nodes[key].parent.take() else {
            return;
        };
        let handle = self.nodes[key].handle.clone();
        if let Ok(parent_key) = self.node_key(&parent) {
            self.nodes[parent_key].children.retain(|child| *child != handle);
        }
    }

    /// Whether `ancestor` is a strict ancestor of `key`
    pub(crate) fn is_ancestor(&self, ancestor: NodeKey, key: NodeKey) -> bool {
        let mut current = self.parent_key(key);
        while let Some(k) = current {
            if k == ancestor {
                return true;
            }
            current = self.parent_key(k);
        }
        false
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    pub fn is_ancestor_or_self(&self, ancestor: &Handle<SceneNode>, node: &Handle<SceneNode>) -> SceneResult<bool> {
        let ancestor = self.node_key(ancestor)?;
        let key = self.node_key(node)?;
        Ok(ancestor == key || self.is_ancestor(ancestor, key))
    }

    // ---- queries ----

    /// Parent node; `None` for root nodes
    pub fn parent(&self, node: &Handle<SceneNode>) -> SceneResult<Option<Handle<SceneNode>>> {
        Ok(self.node(node)?.parent.clone())
    }

    /// Children in sibling order
    pub fn children(&self, node: &Handle<SceneNode>) -> SceneResult<Vec<Handle<SceneNode>>> {
        Ok(self.node(node)?.children.clone())
    }

    /// Child at `index`, if any
    pub fn child(&self, node: &Handle<SceneNode>, index: usize) -> SceneResult<Option<Handle<SceneNode>>> {
        Ok(self.node(node)?.children.get(index).cloned())
    }

    /// Number of direct children
    pub fn child_count(&self, node: &Handle<SceneNode>) -> SceneResult<usize> {
        Ok(self.node(node)?.children.len())
    }

    /// Position of `child` among `node`'s children
    pub fn index_of_child(&self, node: &Handle<SceneNode>, child: &Handle<SceneNode>) -> SceneResult<Option<usize>> {
        Ok(self.node(node)?.children.iter().position(|c| c == child))
    }

    /// First descendant named `name`, breadth first
    ///
    /// Only direct children are searched unless `recursive` is set.
    pub fn find_child(&self, node: &Handle<SceneNode>, name: &str, recursive: bool) -> SceneResult<Option<Handle<SceneNode>>> {
        let key = self.node_key(node)?;
        let mut queue = std::collections::VecDeque::from(self.child_keys(key));
        while let Some(current) = queue.pop_front() {
            let child = &self.nodes[current];
            if child.name == name {
                return Ok(Some(child.handle.clone()));
            }
            if recursive {
                queue.extend(self.child_keys(current));
            }
        }
        Ok(None)
    }

    /// All descendants named `name`, breadth first
    pub fn find_children(&self, node: &Handle<SceneNode>, name: &str, recursive: bool) -> SceneResult<Vec<Handle<SceneNode>>> {
        let key = self.node_key(node)?;
        let mut found = Vec::new();
        let mut queue = std::collections::VecDeque::from(self.child_keys(key));
        while let Some(current) = queue.pop_front() {
            let child = &self.nodes[current];
            if child.name == name {
                found.push(child.handle.clone());
            }
            if recursive {
                queue.extend(self.child_keys(current));
            }
        }
        Ok(found)
    }

    /// Descendant at a `/`-separated path of child names
    pub fn find_path(&self, node: &Handle<SceneNode>, path: &str) -> SceneResult<Option<Handle<SceneNode>>> {
        let mut current = node.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match self.find_child(&current, segment, false)? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Rename the node
    pub fn set_name(&mut self, node: &Handle<SceneNode>, name: &str) -> SceneResult<()> {
        let key = self.node_key(node)?;
        self.nodes[key].name = name.to_string();
        Ok(())
    }

    // ---- activity ----

    /// Set a node's own active state
    ///
    /// Components below it are enabled or disabled as the effective state of their
    /// nodes changes.
    pub fn set_active(&mut self, node: &Handle<SceneNode>, active: bool) -> SceneResult<()> {
        let key = self.node_key(node)?;
        self.nodes[key].active_self = active;

        let parent_active = self
            .parent_key(key)
            .map(|parent| self.nodes[parent].active_hierarchy)
            .unwrap_or(true);
        self.update_active_hierarchy(key, parent_active);
        Ok(())
    }

    /// Own active state, or the effective one with `in_hierarchy`
    pub fn is_active(&self, node: &Handle<SceneNode>, in_hierarchy: bool) -> SceneResult<bool> {
        let node = self.node(node)?;
        Ok(if in_hierarchy { node.active_hierarchy } else { node.active_self })
    }

    // ---- flags ----

    /// Set flags on a node and its descendants
    pub fn set_flags(&mut self, node: &Handle<SceneNode>, flags: SceneNodeFlags) -> SceneResult<()> {
        let key = self.node_key(node)?;
        self.insert_flags_recursive(key, flags);
        Ok(())
    }

    /// Clear flags on a node and its descendants
    pub fn unset_flags(&mut self, node: &Handle<SceneNode>, flags: SceneNodeFlags) -> SceneResult<()> {
        let key = self.node_key(node)?;
        for k in self.subtree_keys(key) {
            self.nodes[k].flags.remove(flags);
        }
        Ok(())
    }

    pub(crate) fn insert_flags_recursive(&mut self, key: NodeKey, flags: SceneNodeFlags) {
        for k in self.subtree_keys(key) {
            self.nodes[k].flags.insert(flags);
        }
    }

    // ---- prefab links ----

    /// UUID of the prefab instance `node` belongs to
    ///
    /// With `only_direct`, nodes added to an instance (no link id) report no link.
    pub fn prefab_link(&self, node: &Handle<SceneNode>, only_direct: bool) -> SceneResult<Option<String>> {
        let key = self.node_key(node)?;
        Ok(self.prefab_link_of(key, only_direct))
    }

    /// Root of the prefab instance `node` belongs to
    pub fn prefab_parent(&self, node: &Handle<SceneNode>, only_direct: bool) -> SceneResult<Option<Handle<SceneNode>>> {
        let key = self.node_key(node)?;
        Ok(self
            .prefab_parent_of(key, only_direct)
            .map(|k| self.nodes[k].handle.clone()))
    }

    pub(crate) fn prefab_link_of(&self, key: NodeKey, only_direct: bool) -> Option<String> {
        self.prefab_parent_of(key, only_direct)
            .and_then(|k| self.nodes[k].prefab_link.clone())
    }

    pub(crate) fn prefab_parent_of(&self, key: NodeKey, only_direct: bool) -> Option<NodeKey> {
        let mut current = Some(key);
        while let Some(k) = current {
            let node = &self.nodes[k];
            if node.prefab_link.is_some() {
                return Some(k);
            }
            if only_direct && node.link_id.is_none() {
                return None;
            }
            current = self.parent_key(k);
        }
        None
    }

    /// Detach the prefab instance `node` belongs to from its prefab
    ///
    /// Clears the instance root's link, its recorded diff and all link ids inside it.
    pub fn break_prefab_link(&mut self, node: &Handle<SceneNode>) -> SceneResult<()> {
        let key = self.node_key(node)?;
        let Some(root) = self.prefab_parent_of(key, false) else {
            return Ok(());
        };

        let instance = &mut self.nodes[root];
        log::debug!(
            "Breaking prefab link {:?} of '{}'",
            instance.prefab_link,
            instance.name
        );
        instance.prefab_link = None;
        instance.prefab_diff = None;
        instance.prefab_hash = 0;
        self.clear_link_ids(root, true, false);
        Ok(())
    }

    /// Clear link ids below `key`, stopping at nested prefab instances
    ///
    /// Components of `key` are always cleared; `key`'s own link id only with `clear_root`.
    pub(crate) fn clear_link_ids(&mut self, key: NodeKey, recursive: bool, clear_root: bool) {
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            for component in self.component_keys(current) {
                self.components[component].link_id = None;
            }
            if recursive {
                for child in self.child_keys(current) {
                    let child_node = &mut self.nodes[child];
                    child_node.link_id = None;
                    if child_node.prefab_link.is_none() {
                        stack.push(child);
                    }
                }
            }
        }
        if clear_root {
            self.nodes[key].link_id = None;
        }
    }
}
