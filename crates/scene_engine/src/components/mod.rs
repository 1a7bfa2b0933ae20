//! Built-in components
//!
//! Every scene registers these types at construction so saved scenes and prefabs
//! containing them decode without extra setup.

pub mod follow;
pub mod lighting;
pub mod movement;
pub mod renderable;

pub use follow::FollowComponent;
pub use lighting::{Attenuation, LightComponent, LightFactory, LightType};
pub use movement::MovementComponent;
pub use renderable::{RenderableComponent, RenderableFactory};

use crate::scene::ComponentTypes;

/// Register all built-in component types
pub fn register_builtin(types: &mut ComponentTypes) {
    types.register::<RenderableComponent>();
    types.register::<MovementComponent>();
    types.register::<LightComponent>();
    types.register::<FollowComponent>();
}
