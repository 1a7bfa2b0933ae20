//! Prefab instance diffs
//!
//! A [`PrefabObjectDiff`] records how a prefab instance departs from its prefab:
//! renamed nodes, changed fields, removed and added components and children. Objects
//! are matched by link id, never by instance id, so a diff recorded on one instance
//! can be replayed on a freshly built one.
//!
//! Handles inside diff payloads that point into the instance are link-relative
//! (see [`LocalRef`](crate::reflect::LocalRef)); everything else is kept as a plain
//! instance id and resolved against the live registry when the diff is applied.

use super::links::{self, LinkMap};
use crate::reflect::{merge_value, object_delta, SerializedObject};
use crate::scene::{
    ComponentKey, DeserializationFlags, Handle, NodeKey, Scene, SceneNode, SceneResult, SerializedComponent,
    SerializedNode,
};
use serde::{Deserialize, Serialize};

/// Field changes of one linked component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefabComponentDiff {
    /// Link id of the component inside the prefab
    pub link_id: u32,
    /// Reflected type name of the component
    pub type_name: String,
    /// Only the fields that differ from the prefab
    pub delta: SerializedObject,
}

/// Changes of one node relative to its prefab counterpart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrefabObjectDiff {
    /// Link id of the node; `None` for the instance root
    #[serde(default)]
    pub link_id: Option<u32>,
    /// New name, when the instance was renamed
    #[serde(default)]
    pub renamed_to: Option<String>,
    /// Changed transform and activity fields
    #[serde(default)]
    pub node_delta: Option<SerializedObject>,
    /// Diffs of linked components with changed fields
    #[serde(default)]
    pub component_diffs: Vec<PrefabComponentDiff>,
    /// Link ids of prefab components missing from the instance
    #[serde(default)]
    pub removed_components: Vec<u32>,
    /// Components that exist only on the instance
    #[serde(default)]
    pub added_components: Vec<SerializedComponent>,
    /// Diffs of linked children
    #[serde(default)]
    pub child_diffs: Vec<PrefabObjectDiff>,
    /// Link ids of prefab children missing from the instance
    #[serde(default)]
    pub removed_children: Vec<u32>,
    /// Children that exist only on the instance
    #[serde(default)]
    pub added_children: Vec<SerializedNode>,
}

impl PrefabObjectDiff {
    /// Whether applying this diff would change nothing
    pub fn is_empty(&self) -> bool {
        self.renamed_to.is_none()
            && self.node_delta.is_none()
            && self.component_diffs.is_empty()
            && self.removed_components.is_empty()
            && self.added_components.is_empty()
            && self.child_diffs.is_empty()
            && self.removed_children.is_empty()
            && self.added_children.is_empty()
    }

    /// Diff of a direct child by link id
    pub fn child(&self, link_id: u32) -> Option<&PrefabObjectDiff> {
        self.child_diffs.iter().find(|d| d.link_id == Some(link_id))
    }

    /// Diff of a linked component by link id
    pub fn component(&self, link_id: u32) -> Option<&PrefabComponentDiff> {
        self.component_diffs.iter().find(|d| d.link_id == link_id)
    }
}

/// Outcome of applying a diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Entries that changed the target
    pub applied: usize,
    /// Entries whose counterpart no longer exists in the target
    pub skipped: usize,
}

/// Generates and applies prefab diffs
pub struct PrefabDiff;

impl PrefabDiff {
    /// Diff between a localized prefab template and an encoded instance
    ///
    /// The instance is localized in place before comparison.
    pub fn generate(template: &SerializedNode, instance: &SerializedNode) -> PrefabObjectDiff {
        let mut instance = instance.clone();
        links::localize(&mut instance);
        diff_node(template, &instance, true)
    }

    /// Diff between a prefab template and a live instance root
    pub fn generate_for(scene: &Scene, template: &SerializedNode, instance: &Handle<SceneNode>) -> SceneResult<PrefabObjectDiff> {
        let encoded = scene.encode_subtree(instance)?;
        Ok(Self::generate(template, &encoded))
    }

    /// Replay a diff onto a live instance root
    ///
    /// Entries whose target no longer exists are skipped and counted. Payload handle
    /// ids name live objects, or objects the payload itself adds; they are decoded in
    /// a payload scope so they never bind to objects of an enclosing stream. If a
    /// deserialization session is already active the diff joins it and handles to
    /// live objects are bound when that session ends; otherwise a session is opened
    /// and closed here, after which new objects under a live target are instantiated.
    pub fn apply(scene: &mut Scene, diff: &PrefabObjectDiff, target: &Handle<SceneNode>) -> SceneResult<ApplyReport> {
        let root = scene.node_key(target)?;
        let outer = scene.registry.is_session_active();
        if !outer {
            scene.registry.begin_deserialization(DeserializationFlags::USE_NEW_IDS)?;
        }
        if let Err(err) = scene.registry.begin_payload_scope() {
            if !outer {
                scene.registry.end_deserialization()?;
            }
            return Err(err.into());
        }

        let mut ctx = ApplyContext {
            links: LinkMap::from_scene(scene, root),
            report: ApplyReport::default(),
            new_nodes: Vec::new(),
            new_components: Vec::new(),
            warn_on_skipped: scene.config().diff.warn_on_skipped,
        };
        let applied = apply_node(scene, diff, root, &mut ctx);
        let scoped = scene.registry.end_payload_scope();

        if outer {
            applied?;
            let waiting = scoped?;
            log::debug!(
                "Applied prefab diff to {} inside active session ({} handles wait for its end): {:?}",
                target.instance_id(),
                waiting,
                ctx.report
            );
            return Ok(ctx.report);
        }

        let resolved = scene.registry.end_deserialization();
        applied?;
        scoped?;
        resolved?;

        for key in ctx.new_nodes.iter().copied() {
            if !scene.nodes.contains_key(key) {
                continue;
            }
            if scene.parent_key(key).is_some_and(|p| scene.nodes[p].is_instantiated()) {
                scene.instantiate_subtree(key);
            }
        }
        for key in ctx.new_components.iter().copied() {
            if scene.components.contains_key(key) {
                scene.start_component(key);
            }
        }
        log::debug!("Applied prefab diff to {}: {:?}", target.instance_id(), ctx.report);
        Ok(ctx.report)
    }
}

fn diff_node(template: &SerializedNode, instance: &SerializedNode, is_root: bool) -> PrefabObjectDiff {
    let mut diff = PrefabObjectDiff {
        link_id: if is_root { None } else { instance.link_id },
        ..Default::default()
    };

    if template.name != instance.name {
        diff.renamed_to = Some(instance.name.clone());
    }
    diff.node_delta = object_delta(&template.fields, &instance.fields);

    // Nested instances record their own internals
    if !is_root && instance.is_prefab_instance() {
        return diff;
    }

    let mut matched_components = vec![false; instance.components.len()];
    for component in &template.components {
        let Some(link_id) = component.link_id else {
            continue;
        };
        let found = instance.components.iter().position(|c| {
            c.link_id == Some(link_id) && c.data.type_name == component.data.type_name
        });
        match found {
            Some(index) => {
                matched_components[index] = true;
                if let Some(delta) = object_delta(&component.data, &instance.components[index].data) {
                    diff.component_diffs.push(PrefabComponentDiff {
                        link_id,
                        type_name: component.data.type_name.clone(),
                        delta,
                    });
                }
            }
            None => diff.removed_components.push(link_id),
        }
    }
    diff.added_components = instance
        .components
        .iter()
        .zip(&matched_components)
        .filter(|(_, matched)| !**matched)
        .map(|(component, _)| component.clone())
        .collect();

    let mut matched_children = vec![false; instance.children.len()];
    for child in &template.children {
        let Some(link_id) = child.link_id else {
            continue;
        };
        match instance.children.iter().position(|c| c.link_id == Some(link_id)) {
            Some(index) => {
                matched_children[index] = true;
                let child_diff = diff_node(child, &instance.children[index], false);
                if !child_diff.is_empty() {
                    diff.child_diffs.push(child_diff);
                }
            }
            None => diff.removed_children.push(link_id),
        }
    }
    diff.added_children = instance
        .children
        .iter()
        .zip(&matched_children)
        .filter(|(_, matched)| !**matched)
        .map(|(child, _)| child.clone())
        .collect();

    diff
}

struct ApplyContext {
    links: LinkMap,
    report: ApplyReport,
    new_nodes: Vec<NodeKey>,
    new_components: Vec<ComponentKey>,
    warn_on_skipped: bool,
}

impl ApplyContext {
    fn skip(&mut self, what: &str, link_id: Option<u32>) {
        self.report.skipped += 1;
        if self.warn_on_skipped {
            log::warn!("Prefab diff entry skipped: {} with link id {:?} no longer exists", what, link_id);
        } else {
            log::debug!("Prefab diff entry skipped: {} with link id {:?} no longer exists", what, link_id);
        }
    }

    fn globalize_object(&self, object: &SerializedObject) -> SerializedObject {
        let mut object = object.clone();
        self.links.globalize_object(&mut object);
        object
    }

    fn globalize_node(&self, node: &SerializedNode) -> SerializedNode {
        let mut node = node.clone();
        self.links.globalize_node(&mut node);
        node
    }
}

fn find_component(scene: &Scene, node: NodeKey, link_id: u32, type_name: Option<&str>) -> Option<ComponentKey> {
    scene.component_keys(node).into_iter().find(|&key| {
        let slot = &scene.components[key];
        slot.link_id == Some(link_id) && type_name.map_or(true, |t| slot.behavior.type_name() == t)
    })
}

fn find_child(scene: &Scene, node: NodeKey, link_id: u32) -> Option<NodeKey> {
    scene
        .child_keys(node)
        .into_iter()
        .find(|&key| scene.nodes[key].link_id == Some(link_id))
}

fn apply_node(scene: &mut Scene, diff: &PrefabObjectDiff, key: NodeKey, ctx: &mut ApplyContext) -> SceneResult<()> {
    if let Some(name) = &diff.renamed_to {
        scene.nodes[key].name = name.clone();
        ctx.report.applied += 1;
    }
    if let Some(delta) = &diff.node_delta {
        let delta = ctx.globalize_object(delta);
        scene.apply_node_fields(key, &delta)?;
        ctx.report.applied += 1;
    }

    for &link_id in &diff.removed_components {
        match find_component(scene, key, link_id, None) {
            Some(component) => {
                let handle = scene.components[component].handle.clone();
                scene.destroy_component(&handle, true)?;
                ctx.report.applied += 1;
            }
            None => ctx.skip("removed component", Some(link_id)),
        }
    }

    for component_diff in &diff.component_diffs {
        let Some(component) = find_component(scene, key, component_diff.link_id, Some(&component_diff.type_name)) else {
            ctx.skip("component", Some(component_diff.link_id));
            continue;
        };
        let delta = ctx.globalize_object(&component_diff.delta);
        let slot = &mut scene.components[component];
        for (name, value) in &delta.fields {
            let merged = merge_value(slot.behavior.field(name), value);
            if let Err(err) = slot.behavior.set_field(name, merged, &mut scene.registry) {
                log::warn!("Prefab diff field '{}' not applied: {}", name, err);
            }
        }
        ctx.report.applied += 1;
    }

    for added in &diff.added_components {
        let added = SerializedComponent {
            data: ctx.globalize_object(&added.data),
            ..added.clone()
        };
        let handle = scene.decode_component(key, &added)?;
        if let Ok(component) = scene.component_key(&handle) {
            ctx.new_components.push(component);
        }
        ctx.report.applied += 1;
    }

    for &link_id in &diff.removed_children {
        match find_child(scene, key, link_id) {
            Some(child) => {
                let handle = scene.nodes[child].handle.clone();
                scene.destroy(&handle, true)?;
                ctx.report.applied += 1;
            }
            None => ctx.skip("removed child", Some(link_id)),
        }
    }

    for child_diff in &diff.child_diffs {
        let child = child_diff.link_id.and_then(|link_id| find_child(scene, key, link_id));
        match child {
            Some(child) => apply_node(scene, child_diff, child, ctx)?,
            None => ctx.skip("child", child_diff.link_id),
        }
    }

    for added in &diff.added_children {
        let added = ctx.globalize_node(added);
        let child = scene.decode_in_session(&added)?;
        scene.attach(child, key, None);
        ctx.new_nodes.push(child);
        ctx.report.applied += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::Value;
    use crate::scene::SceneNodeFlags;

    fn node(id: u64, name: &str, link_id: Option<u32>) -> SerializedNode {
        SerializedNode {
            instance_id: id,
            name: name.to_string(),
            flags: SceneNodeFlags::empty(),
            link_id,
            fields: SerializedObject::new("SceneNode").with_field("active", Value::Bool(true)),
            prefab_link: None,
            prefab_hash: 0,
            prefab_diff: None,
            components: Vec::new(),
            children: Vec::new(),
        }
    }

    fn counter(id: u64, link_id: Option<u32>, count: i64) -> SerializedComponent {
        SerializedComponent {
            instance_id: id,
            link_id,
            data: SerializedObject::new("Counter").with_field("count", Value::Int(count)),
        }
    }

    #[test]
    fn test_identical_trees_have_empty_diff() {
        let mut template = node(1, "Root", None);
        template.children.push(node(2, "A", Some(0)));
        let mut instance = node(50, "Root", None);
        instance.children.push(node(51, "A", Some(0)));

        assert!(PrefabDiff::generate(&template, &instance).is_empty());
    }

    #[test]
    fn test_changes_are_matched_by_link_id() {
        let mut template = node(1, "Root", None);
        let mut a = node(2, "A", Some(0));
        a.components.push(counter(3, Some(1), 0));
        template.children.push(a);
        template.children.push(node(4, "B", Some(2)));

        let mut instance = node(50, "Root", None);
        let mut a = node(51, "Renamed", Some(0));
        a.components.push(counter(52, Some(1), 5));
        a.components.push(counter(53, None, 9));
        instance.children.push(a);
        instance.children.push(node(54, "Extra", None));

        let diff = PrefabDiff::generate(&template, &instance);
        assert_eq!(diff.removed_children, vec![2]);
        assert_eq!(diff.added_children.len(), 1);
        assert_eq!(diff.added_children[0].name, "Extra");

        let child = diff.child(0).unwrap();
        assert_eq!(child.renamed_to.as_deref(), Some("Renamed"));
        assert_eq!(child.component(1).unwrap().delta.get("count"), Some(&Value::Int(5)));
        assert_eq!(child.added_components.len(), 1);
        assert!(child.removed_components.is_empty());
    }

    #[test]
    fn test_type_change_counts_as_replacement() {
        let mut template = node(1, "Root", None);
        template.components.push(counter(2, Some(0), 1));

        let mut instance = node(50, "Root", None);
        instance.components.push(SerializedComponent {
            instance_id: 51,
            link_id: Some(0),
            data: SerializedObject::new("Other"),
        });

        let diff = PrefabDiff::generate(&template, &instance);
        assert_eq!(diff.removed_components, vec![0]);
        assert_eq!(diff.added_components.len(), 1);
    }

    #[test]
    fn test_nested_instance_only_diffs_root_fields() {
        let mut template = node(1, "Root", None);
        let mut nested = node(2, "Wheel", Some(0));
        nested.prefab_link = Some("wheel".into());
        nested.children.push(node(3, "Hub", Some(0)));
        template.children.push(nested);

        let mut instance = node(50, "Root", None);
        let mut nested = node(51, "Wheel", Some(0));
        nested.prefab_link = Some("wheel".into());
        instance.children.push(nested);

        assert!(PrefabDiff::generate(&template, &instance).is_empty());
    }
}
