//! Cross-module tests
//!
//! Scenes here are built through the public API only and register [`Marker`], a
//! small component with one field of every reflected kind.

mod prefab_workflow;

use crate::foundation::logging;
use crate::scene::{Component, Handle, Scene, SceneNode, SceneNodeFlags, SerializedNode};

/// Test component
#[derive(Debug, Clone, Default)]
pub struct Marker {
    pub x: f32,
    pub label: String,
    pub target: Handle<SceneNode>,
}

crate::impl_reflect!(Marker, "Marker" {
    x: f32,
    label: String,
    target: Handle<SceneNode>,
});

impl Component for Marker {}

impl Marker {
    pub fn new(x: f32, label: &str) -> Self {
        Self {
            x,
            label: label.to_string(),
            target: Handle::null(),
        }
    }
}

pub fn test_scene() -> Scene {
    logging::init_for_tests();
    let mut scene = Scene::new();
    scene.register_component_type::<Marker>();
    scene
}

/// Create a node under `parent`
pub fn child(scene: &mut Scene, parent: &Handle<SceneNode>, name: &str) -> Handle<SceneNode> {
    let node = scene.create_node(name, SceneNodeFlags::empty());
    scene.set_parent(&node, parent, false).unwrap();
    node
}

/// Encoded subtree with every instance id and recorded diff removed
pub fn shape(scene: &Scene, node: &Handle<SceneNode>) -> SerializedNode {
    fn strip(node: &mut SerializedNode) {
        node.instance_id = 0;
        node.prefab_diff = None;
        for component in &mut node.components {
            component.instance_id = 0;
        }
        node.children.iter_mut().for_each(strip);
    }

    let mut encoded = scene.encode_subtree(node).unwrap();
    strip(&mut encoded);
    encoded
}
