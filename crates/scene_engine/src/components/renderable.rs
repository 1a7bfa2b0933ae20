//! Renderable component
//!
//! Marks a node as drawable and tracks whether the renderer's copy of its world
//! transform is stale.

use crate::impl_reflect;
use crate::scene::{Component, TransformChangedFlags};

/// Component for nodes that can be rendered
#[derive(Debug, Clone)]
pub struct RenderableComponent {
    /// Mesh asset path
    pub mesh: String,

    /// Material asset path
    pub material: String,

    /// Whether this object is visible
    pub visible: bool,

    /// Whether this material is transparent (affects render order)
    pub is_transparent: bool,

    /// Rendering layer for sorting (higher values render later)
    pub render_layer: u32,

    registered: bool,
    transform_stale: bool,
}

impl_reflect!(RenderableComponent, "Renderable" {
    mesh: String,
    material: String,
    visible: bool,
    is_transparent: bool,
    render_layer: u32,
});

impl RenderableComponent {
    /// Visible opaque renderable on layer 0
    pub fn new(mesh: &str, material: &str) -> Self {
        Self {
            mesh: mesh.to_string(),
            material: material.to_string(),
            visible: true,
            is_transparent: false,
            render_layer: 0,
            registered: false,
            transform_stale: true,
        }
    }

    /// Visible transparent renderable drawn on `render_layer`
    pub fn new_transparent(mesh: &str, material: &str, render_layer: u32) -> Self {
        Self {
            is_transparent: true,
            render_layer,
            ..Self::new(mesh, material)
        }
    }

    /// Show or hide the renderable
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Check if this component should be rendered
    pub fn should_render(&self) -> bool {
        self.visible && self.registered
    }

    /// Whether the owning node moved since the last [`mark_synced`](Self::mark_synced)
    pub fn needs_transform_sync(&self) -> bool {
        self.transform_stale
    }

    /// Clear the stale transform flag after the renderer has read it
    pub fn mark_synced(&mut self) {
        self.transform_stale = false;
    }
}

impl Default for RenderableComponent {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl Component for RenderableComponent {
    fn notify_flags(&self) -> TransformChangedFlags {
        TransformChangedFlags::TRANSFORM
    }

    fn on_enabled(&mut self) {
        self.registered = true;
        self.transform_stale = true;
    }

    fn on_disabled(&mut self) {
        self.registered = false;
    }

    fn on_transform_changed(&mut self, _flags: TransformChangedFlags) {
        self.transform_stale = true;
    }
}

/// Factory for creating renderable components
pub struct RenderableFactory;

impl RenderableFactory {
    /// Opaque renderable
    pub fn create_opaque(mesh: &str, material: &str) -> RenderableComponent {
        RenderableComponent::new(mesh, material)
    }

    /// Transparent renderable on `render_layer`
    pub fn create_transparent(mesh: &str, material: &str, render_layer: u32) -> RenderableComponent {
        RenderableComponent::new_transparent(mesh, material, render_layer)
    }

    /// Create a hidden renderable (useful for pre-loading)
    pub fn create_hidden(mesh: &str, material: &str) -> RenderableComponent {
        let mut renderable = RenderableComponent::new(mesh, material);
        renderable.set_visible(false);
        renderable
    }
}
