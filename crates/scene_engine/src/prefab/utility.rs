//! Prefab link maintenance
//!
//! Rebuilding a prefab instance destroys it and instantiates the prefab again. Before
//! the old objects go away their instance records are captured; afterwards the new
//! objects adopt them, so every handle that pointed into the old instance points at
//! the matching object of the new one. Objects with link ids are matched by link id.
//! Objects added to the instance (no link id) are matched by their order among their
//! unlinked siblings.

use super::diff::PrefabDiff;
use super::library::PrefabLibrary;
use super::resource::Prefab;
use crate::scene::{
    ComponentKey, Handle, NodeKey, ObjectKey, Scene, SceneError, SceneNode, SceneNodeFlags, SceneResult,
};
use crate::scene::handle::RecordPtr;
use std::collections::HashMap;

struct ComponentProxy {
    record: RecordPtr,
    link_id: Option<u32>,
}

/// Identity of one node of an instance about to be rebuilt
struct NodeProxy {
    record: RecordPtr,
    link_id: Option<u32>,
    components: Vec<ComponentProxy>,
    children: Vec<NodeProxy>,
}

struct InstanceSnapshot {
    root: NodeProxy,
    linked: HashMap<u32, RecordPtr>,
}

/// Where an instance root sat before it was rebuilt
struct Placement {
    parent: Option<NodeKey>,
    index: Option<usize>,
    link_id: Option<u32>,
    live: bool,
}

/// Operations keeping prefab instances consistent with their prefabs
pub struct PrefabLinkUtility;

impl PrefabLinkUtility {
    /// Discard all local changes of a prefab instance
    ///
    /// `node` may be any node inside the instance. Handles to objects that exist in the
    /// prefab stay valid; objects added to the instance are destroyed.
    pub fn revert_to_prefab(scene: &mut Scene, library: &PrefabLibrary, node: &Handle<SceneNode>) -> SceneResult<()> {
        let key = scene.node_key(node)?;
        let root = scene
            .prefab_parent_of(key, false)
            .ok_or(SceneError::NotPrefabInstance { id: node.instance_id() })?;
        let uuid = scene.nodes[root].prefab_link.clone().unwrap_or_default();
        let prefab = library.require(&uuid)?;

        let snapshot = record_instance_data(scene, root)?;
        let placement = remove_instance(scene, root);

        let rebuilt = prefab.instantiate_detached(scene)?;
        let new_root = scene.node_key(&rebuilt)?;
        restore_linked_instance_data(scene, new_root, &snapshot);
        place_instance(scene, new_root, &placement, prefab);

        log::info!("Reverted '{}' to prefab {}", scene.nodes[new_root].name, uuid);
        Ok(())
    }

    /// Rebuild outdated prefab instances at and below the instance containing `node`
    ///
    /// Instances are processed bottom-up and only rebuilt when their recorded hash
    /// differs from their prefab's. Recorded diffs are replayed on the rebuilt
    /// instances. Returns the number of rebuilt instances.
    pub fn update_from_prefab(scene: &mut Scene, library: &PrefabLibrary, node: &Handle<SceneNode>) -> SceneResult<usize> {
        let key = scene.node_key(node)?;
        let top = scene.prefab_parent_of(key, false).unwrap_or(key);

        let instance_roots: Vec<Handle<SceneNode>> = scene
            .subtree_keys(top)
            .into_iter()
            .filter(|&k| scene.nodes[k].prefab_link.is_some())
            .map(|k| scene.nodes[k].handle.clone())
            .collect();

        let mut rebuilt = 0;
        for handle in instance_roots.iter().rev() {
            // An outer rebuild may already have replaced this instance
            let Ok(root) = scene.node_key(handle) else {
                continue;
            };
            let instance = &scene.nodes[root];
            let Some(uuid) = instance.prefab_link.clone() else {
                continue;
            };
            let Some(prefab) = library.get(&uuid) else {
                log::debug!("Prefab {} not loaded, '{}' left as is", uuid, instance.name);
                continue;
            };
            if instance.prefab_hash == prefab.hash() {
                continue;
            }

            rebuild_instance(scene, root, prefab)?;
            rebuilt += 1;
        }

        if rebuilt > 0 {
            log::info!("Updated {} prefab instance(s) from their prefabs", rebuilt);
        }
        Ok(rebuilt)
    }

    /// Assign link ids to every saved object below `node` that lacks one
    ///
    /// Existing ids are kept; new ids continue after the largest one in use. Nested
    /// prefab instances get an id for their root but are not descended into. Returns
    /// the next unused id.
    pub fn generate_prefab_ids(scene: &mut Scene, node: &Handle<SceneNode>) -> SceneResult<u32> {
        let root = scene.node_key(node)?;
        let (components, children) = linkable_objects(scene, root);

        let next = components
            .iter()
            .map(|&c| scene.components[c].link_id)
            .chain(children.iter().map(|&n| scene.nodes[n].link_id))
            .flatten()
            .map(|id| id + 1)
            .max()
            .unwrap_or(0);

        let mut current = next;
        for component in components {
            let slot = &mut scene.components[component];
            if slot.link_id.is_none() {
                slot.link_id = Some(current);
                current += 1;
            }
        }
        for child in children {
            let child = &mut scene.nodes[child];
            if child.link_id.is_none() {
                child.link_id = Some(current);
                current += 1;
            }
        }

        log::trace!("Generated {} link ids under {}", current - next, node.instance_id());
        Ok(current)
    }

    /// Remove link ids below `node`
    ///
    /// Components of `node` are always cleared. With `recursive` descendants are
    /// cleared too, stopping at nested prefab instances; `node`'s own id only with
    /// `clear_root`.
    pub fn clear_prefab_ids(scene: &mut Scene, node: &Handle<SceneNode>, recursive: bool, clear_root: bool) -> SceneResult<()> {
        let key = scene.node_key(node)?;
        scene.clear_link_ids(key, recursive, clear_root);
        Ok(())
    }

    /// Store on every prefab instance root at and below the instance containing `node`
    /// the diff between it and its prefab
    ///
    /// Instances without changes store no diff.
    pub fn record_prefab_diff(scene: &mut Scene, library: &PrefabLibrary, node: &Handle<SceneNode>) -> SceneResult<()> {
        let key = scene.node_key(node)?;
        let top = scene.prefab_parent_of(key, false).unwrap_or(key);

        for k in scene.subtree_keys(top) {
            let Some(uuid) = scene.nodes[k].prefab_link.clone() else {
                continue;
            };
            let diff = match library.get(&uuid) {
                Some(prefab) => {
                    let encoded = scene.encode_node(k);
                    Some(PrefabDiff::generate(prefab.root(), &encoded)).filter(|d| !d.is_empty())
                }
                None => {
                    log::warn!("Prefab {} not loaded, diff of '{}' cleared", uuid, scene.nodes[k].name);
                    None
                }
            };
            scene.nodes[k].prefab_diff = diff;
        }
        Ok(())
    }
}

/// Components and children that take link ids, in traversal order
fn linkable_objects(scene: &Scene, root: NodeKey) -> (Vec<ComponentKey>, Vec<NodeKey>) {
    let mut components = Vec::new();
    let mut children = Vec::new();
    let mut stack = vec![root];
    while let Some(key) = stack.pop() {
        components.extend(scene.component_keys(key));
        for child in scene.child_keys(key) {
            let node = &scene.nodes[child];
            if node.flags.contains(SceneNodeFlags::SKIP_SAVE) {
                continue;
            }
            children.push(child);
            if node.prefab_link.is_none() {
                stack.push(child);
            }
        }
    }
    (components, children)
}

fn rebuild_instance(scene: &mut Scene, root: NodeKey, prefab: &Prefab) -> SceneResult<()> {
    let diff = scene.nodes[root].prefab_diff.clone();
    let snapshot = record_instance_data(scene, root)?;
    let placement = remove_instance(scene, root);

    let rebuilt = prefab.instantiate_detached(scene)?;
    let new_root = scene.node_key(&rebuilt)?;
    restore_linked_instance_data(scene, new_root, &snapshot);

    if let Some(diff) = &diff {
        let report = PrefabDiff::apply(scene, diff, &rebuilt)?;
        if report.skipped > 0 {
            log::debug!("{} diff entries no longer match prefab {}", report.skipped, prefab.uuid());
        }
    }
    restore_unlinked_instance_data(scene, new_root, &snapshot.root);

    place_instance(scene, new_root, &placement, prefab);
    scene.nodes[new_root].prefab_diff = diff;
    log::debug!("Rebuilt '{}' from prefab {}", scene.nodes[new_root].name, prefab.uuid());
    Ok(())
}

/// Destroy an instance root, remembering where it was
fn remove_instance(scene: &mut Scene, root: NodeKey) -> Placement {
    let node = &scene.nodes[root];
    let parent = scene.parent_key(root);
    let placement = Placement {
        parent,
        index: parent.and_then(|p| scene.nodes[p].children.iter().position(|c| *c == node.handle)),
        link_id: node.link_id,
        live: node.is_instantiated(),
    };

    scene.detach(root);
    scene.destroy_subtree(root);
    placement
}

/// Put a rebuilt instance where the old one was and bring it to life if it was live
fn place_instance(scene: &mut Scene, root: NodeKey, placement: &Placement, prefab: &Prefab) {
    if let Some(parent) = placement.parent.filter(|&p| scene.nodes.contains_key(p)) {
        scene.attach(root, parent, placement.index);
    }

    let node = &mut scene.nodes[root];
    node.link_id = placement.link_id;
    node.prefab_hash = prefab.hash();
    node.prefab_diff = None;

    if placement.live {
        scene.instantiate_subtree(root);
    }
}

fn record_instance_data(scene: &Scene, root: NodeKey) -> SceneResult<InstanceSnapshot> {
    let mut linked = HashMap::new();
    let root = record_node(scene, root, &mut linked, None).ok_or(SceneError::DestroyedReference {
        id: scene.nodes[root].handle.instance_id(),
    })?;
    Ok(InstanceSnapshot { root, linked })
}

fn record_node(
    scene: &Scene,
    key: NodeKey,
    linked: &mut HashMap<u32, RecordPtr>,
    link_id: Option<u32>,
) -> Option<NodeProxy> {
    let record = scene.nodes[key].handle.record()?;

    let components = scene
        .component_keys(key)
        .into_iter()
        .filter_map(|c| {
            let slot = &scene.components[c];
            let record = slot.handle.record()?;
            if let Some(link_id) = slot.link_id {
                linked.insert(link_id, record.clone());
            }
            Some(ComponentProxy {
                record,
                link_id: slot.link_id,
            })
        })
        .collect();

    let mut children = Vec::new();
    for child in scene.child_keys(key) {
        let child_node = &scene.nodes[child];
        let child_link = child_node.link_id;
        if let (Some(id), Some(child_record)) = (child_link, child_node.handle.record()) {
            linked.insert(id, child_record);
        }

        let proxy = if child_node.prefab_link.is_some() {
            // Nested instance: only the root keeps its identity
            child_node.handle.record().map(|record| NodeProxy {
                record,
                link_id: child_link,
                components: Vec::new(),
                children: Vec::new(),
            })
        } else {
            record_node(scene, child, linked, child_link)
        };
        children.extend(proxy);
    }

    Some(NodeProxy {
        record,
        link_id,
        components,
        children,
    })
}

fn adopt(scene: &mut Scene, object: ObjectKey, record: &RecordPtr) {
    if let Some(handle) = scene.self_handle(object) {
        scene.registry.adopt_record(&handle, record.clone(), object);
    }
}

/// Hand old records to the objects of the rebuilt instance that share their link ids
fn restore_linked_instance_data(scene: &mut Scene, root: NodeKey, snapshot: &InstanceSnapshot) {
    adopt(scene, ObjectKey::Node(root), &snapshot.root.record);

    let mut stack = vec![root];
    while let Some(key) = stack.pop() {
        for component in scene.component_keys(key) {
            if let Some(record) = scene.components[component].link_id.and_then(|id| snapshot.linked.get(&id)) {
                adopt(scene, ObjectKey::Component(component), record);
            }
        }
        for child in scene.child_keys(key) {
            let node = &scene.nodes[child];
            let nested = node.prefab_link.is_some();
            if let Some(record) = node.link_id.and_then(|id| snapshot.linked.get(&id)) {
                adopt(scene, ObjectKey::Node(child), record);
            }
            if !nested {
                stack.push(child);
            }
        }
    }
}

/// Hand old records to unlinked objects, matched by order among unlinked siblings
fn restore_unlinked_instance_data(scene: &mut Scene, root: NodeKey, proxy: &NodeProxy) {
    let mut todo = vec![(root, proxy)];
    while let Some((key, proxy)) = todo.pop() {
        let mut old_components = proxy.components.iter().filter(|c| c.link_id.is_none());
        for component in scene.component_keys(key) {
            if scene.components[component].link_id.is_some() {
                continue;
            }
            match old_components.next() {
                Some(old) => adopt(scene, ObjectKey::Component(component), &old.record),
                None => break,
            }
        }

        let mut old_children = proxy.children.iter().filter(|c| c.link_id.is_none());
        for child in scene.child_keys(key) {
            let node = &scene.nodes[child];
            let nested = node.prefab_link.is_some();
            let old = match node.link_id {
                None => {
                    let old = old_children.next();
                    if let Some(old) = old {
                        adopt(scene, ObjectKey::Node(child), &old.record);
                    }
                    old
                }
                Some(link_id) => proxy.children.iter().find(|c| c.link_id == Some(link_id)),
            };
            if let (Some(old), false) = (old, nested) {
                todo.push((child, old));
            }
        }
    }
}
