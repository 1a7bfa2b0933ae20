//! Link-relative references
//!
//! Prefab templates and diffs must not depend on the instance ids of any particular
//! instance. Handles that point at objects of the same prefab instance are therefore
//! stored as [`LocalRef`]s (root, link id, or a path of link ids through nested
//! instances) and turned back into instance ids
//! against whichever instance they are applied to.

use crate::reflect::{LocalRef, SerializedObject, Value};
use crate::scene::{NodeKey, Scene, SerializedNode};
use std::collections::HashMap;

/// Two-way map between instance ids and local references of one prefab instance
#[derive(Debug, Default)]
pub(crate) struct LinkMap {
    to_local: HashMap<u64, LocalRef>,
    to_global: HashMap<LocalRef, u64>,
}

impl LinkMap {
    fn insert(&mut self, instance_id: u64, local: LocalRef) {
        self.to_local.insert(instance_id, local.clone());
        self.to_global.insert(local, instance_id);
    }

    /// Map built from an encoded instance
    pub(crate) fn from_serialized(root: &SerializedNode) -> Self {
        let mut map = Self::default();
        map.insert(root.instance_id, LocalRef::Root);
        map.collect_serialized(root, &[]);
        map
    }

    fn collect_serialized(&mut self, node: &SerializedNode, prefix: &[u32]) {
        for component in &node.components {
            if let Some(link_id) = component.link_id {
                self.insert(component.instance_id, local_ref(prefix, link_id));
            }
        }
        for child in &node.children {
            let Some(link_id) = child.link_id else {
                // Unlinked objects are reachable by instance id only, and so is
                // everything below an unlinked nested instance
                if !child.is_prefab_instance() {
                    self.collect_serialized(child, prefix);
                }
                continue;
            };
            self.insert(child.instance_id, local_ref(prefix, link_id));
            if child.is_prefab_instance() {
                self.collect_serialized(child, &nested(prefix, link_id));
            } else {
                self.collect_serialized(child, prefix);
            }
        }
    }

    /// Map built from a live instance
    pub(crate) fn from_scene(scene: &Scene, root: NodeKey) -> Self {
        let mut map = Self::default();
        map.insert(scene.nodes[root].handle.instance_id(), LocalRef::Root);
        map.collect_scene(scene, root, &[]);
        map
    }

    fn collect_scene(&mut self, scene: &Scene, key: NodeKey, prefix: &[u32]) {
        for component in scene.component_keys(key) {
            let slot = &scene.components[component];
            if let Some(link_id) = slot.link_id {
                self.insert(slot.handle.instance_id(), local_ref(prefix, link_id));
            }
        }
        for child in scene.child_keys(key) {
            let node = &scene.nodes[child];
            let is_instance = node.prefab_link.is_some();
            let Some(link_id) = node.link_id else {
                if !is_instance {
                    self.collect_scene(scene, child, prefix);
                }
                continue;
            };
            self.insert(node.handle.instance_id(), local_ref(prefix, link_id));
            if is_instance {
                self.collect_scene(scene, child, &nested(prefix, link_id));
            } else {
                self.collect_scene(scene, child, prefix);
            }
        }
    }

    fn localize_leaf(&self, leaf: &Value) -> Option<Value> {
        match leaf {
            Value::Handle(id) => self.to_local.get(id).map(|local| Value::Local(local.clone())),
            _ => None,
        }
    }

    fn globalize_leaf(&self, leaf: &Value) -> Option<Value> {
        match leaf {
            Value::Local(local) => Some(
                self.to_global
                    .get(local)
                    .map_or(Value::None, |id| Value::Handle(*id)),
            ),
            _ => None,
        }
    }

    pub(crate) fn localize_object(&self, object: &mut SerializedObject) {
        object.map_refs(&mut |leaf| self.localize_leaf(leaf));
    }

    pub(crate) fn globalize_object(&self, object: &mut SerializedObject) {
        object.map_refs(&mut |leaf| self.globalize_leaf(leaf));
    }

    /// Localize every field of a node tree, nested instances included
    pub(crate) fn localize_node(&self, node: &mut SerializedNode) {
        self.localize_object(&mut node.fields);
        for component in &mut node.components {
            self.localize_object(&mut component.data);
        }
        for child in &mut node.children {
            self.localize_node(child);
        }
    }

    pub(crate) fn globalize_node(&self, node: &mut SerializedNode) {
        self.globalize_object(&mut node.fields);
        for component in &mut node.components {
            self.globalize_object(&mut component.data);
        }
        for child in &mut node.children {
            self.globalize_node(child);
        }
    }
}

fn local_ref(prefix: &[u32], link_id: u32) -> LocalRef {
    if prefix.is_empty() {
        LocalRef::Link(link_id)
    } else {
        LocalRef::Path(nested(prefix, link_id))
    }
}

fn nested(prefix: &[u32], link_id: u32) -> Vec<u32> {
    let mut path = prefix.to_vec();
    path.push(link_id);
    path
}

/// Rewrite an encoded instance so references into itself are link-relative
pub(crate) fn localize(root: &mut SerializedNode) {
    let map = LinkMap::from_serialized(root);
    map.localize_node(root);
}

/// Copy of a localized template with references bound to the template's own saved ids
pub(crate) fn globalized(template: &SerializedNode) -> SerializedNode {
    let map = LinkMap::from_serialized(template);
    let mut out = template.clone();
    map.globalize_node(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{SceneNodeFlags, SerializedComponent};

    fn node(id: u64, link_id: Option<u32>) -> SerializedNode {
        SerializedNode {
            instance_id: id,
            name: format!("n{}", id),
            flags: SceneNodeFlags::empty(),
            link_id,
            fields: SerializedObject::new("SceneNode"),
            prefab_link: None,
            prefab_hash: 0,
            prefab_diff: None,
            components: Vec::new(),
            children: Vec::new(),
        }
    }

    #[test]
    fn test_localize_then_globalize_restores_ids() {
        let mut root = node(10, None);
        let mut child = node(11, Some(0));
        child.components.push(SerializedComponent {
            instance_id: 12,
            link_id: Some(1),
            data: SerializedObject::new("Follow")
                .with_field("target", Value::Handle(10))
                .with_field("other", Value::Handle(99)),
        });
        root.children.push(child);

        let mut local = root.clone();
        localize(&mut local);
        let data = &local.children[0].components[0].data;
        assert_eq!(data.get("target"), Some(&Value::Local(LocalRef::Root)));
        assert_eq!(data.get("other"), Some(&Value::Handle(99)));

        assert_eq!(globalized(&local), root);
    }

    #[test]
    fn test_nested_instance_internals_get_paths() {
        let mut root = node(1, None);
        let mut nested = node(2, Some(0));
        nested.prefab_link = Some("inner".into());
        nested.children.push(node(3, Some(0)));
        root.children.push(nested);

        let map = LinkMap::from_serialized(&root);
        assert_eq!(map.to_local.get(&2), Some(&LocalRef::Link(0)));
        assert_eq!(map.to_local.get(&3), Some(&LocalRef::Path(vec![0, 0])));
        assert_eq!(map.to_global.get(&LocalRef::Path(vec![0, 0])), Some(&3));
    }

    #[test]
    fn test_unlinked_nested_instance_is_not_descended() {
        let mut root = node(1, None);
        let mut nested = node(2, None);
        nested.prefab_link = Some("inner".into());
        nested.children.push(node(3, Some(0)));
        root.children.push(nested);

        let map = LinkMap::from_serialized(&root);
        assert!(!map.to_local.contains_key(&2));
        assert!(!map.to_local.contains_key(&3));
    }
}
