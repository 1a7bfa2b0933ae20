//! Light component
//!
//! Lights take their position and direction from the owning node's world transform;
//! the component only holds the photometric parameters.

use crate::foundation::math::Vec3;
use crate::impl_reflect;
use crate::reflect::{ReflectError, ReflectValue, Value};
use crate::scene::{Component, InstanceRegistry, TransformChangedFlags};

/// Types of lights supported by the renderer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LightType {
    /// Parallel rays along the node's forward axis
    #[default]
    Directional,
    /// Radiates in all directions from the node position
    Point,
    /// Cone of light along the node's forward axis
    Spot,
}

impl LightType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Directional => "directional",
            Self::Point => "point",
            Self::Spot => "spot",
        }
    }
}

impl ReflectValue for LightType {
    fn to_value(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }

    fn from_value(value: Value, _registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            Value::Text(text) => match text.as_str() {
                "directional" => Ok(Self::Directional),
                "point" => Ok(Self::Point),
                "spot" => Ok(Self::Spot),
                _ => Err(ReflectError::UnknownVariant {
                    type_name: "LightType",
                    variant: text,
                }),
            },
            other => Err(ReflectError::mismatch("text", &other)),
        }
    }
}

/// Distance falloff coefficients
#[derive(Debug, Clone, PartialEq)]
pub struct Attenuation {
    /// Constant term
    pub constant: f32,
    /// Term scaled by distance
    pub linear: f32,
    /// Term scaled by distance squared
    pub quadratic: f32,
}

impl_reflect!(Attenuation, "Attenuation" {
    constant: f32,
    linear: f32,
    quadratic: f32,
});

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            constant: 1.0,
            linear: 0.09,
            quadratic: 0.032,
        }
    }
}

impl Attenuation {
    /// Light intensity factor at `distance`
    pub fn factor(&self, distance: f32) -> f32 {
        1.0 / (self.constant + self.linear * distance + self.quadratic * distance * distance)
    }
}

/// Light source attached to a node
#[derive(Debug, Clone)]
pub struct LightComponent {
    /// Directional, point or spot
    pub light_type: LightType,
    /// RGB color (0.0 to 1.0 range)
    pub color: Vec3,
    /// Brightness multiplier
    pub intensity: f32,
    /// Maximum range for point/spot lights
    pub range: f32,
    /// Inner cone angle for spot lights in radians
    pub inner_cone: f32,
    /// Outer cone angle for spot lights in radians
    pub outer_cone: f32,
    /// Falloff for point and spot lights
    pub attenuation: Attenuation,
    /// Lights that are disabled contribute nothing
    pub enabled: bool,
    /// Whether the light renders shadows
    pub cast_shadows: bool,

    moved: bool,
}

impl_reflect!(LightComponent, "Light" {
    light_type: LightType,
    color: Vec3,
    intensity: f32,
    range: f32,
    inner_cone: f32,
    outer_cone: f32,
    attenuation: Attenuation,
    enabled: bool,
    cast_shadows: bool,
});

impl Default for LightComponent {
    fn default() -> Self {
        LightFactory::point(Vec3::new(1.0, 1.0, 1.0), 1.0, 10.0)
    }
}

impl LightComponent {
    /// Whether the owning node moved since the last call
    pub fn take_moved(&mut self) -> bool {
        std::mem::take(&mut self.moved)
    }
}

impl Component for LightComponent {
    fn notify_flags(&self) -> TransformChangedFlags {
        TransformChangedFlags::TRANSFORM | TransformChangedFlags::PARENT
    }

    fn on_transform_changed(&mut self, _flags: TransformChangedFlags) {
        self.moved = true;
    }
}

/// Factory functions for light components
pub struct LightFactory;

impl LightFactory {
    /// Directional light pointing along the owner's forward axis
    pub fn directional(color: Vec3, intensity: f32) -> LightComponent {
        LightComponent {
            light_type: LightType::Directional,
            color,
            intensity,
            range: 0.0,
            inner_cone: 0.0,
            outer_cone: 0.0,
            attenuation: Attenuation::default(),
            enabled: true,
            cast_shadows: true,
            moved: false,
        }
    }

    /// Point light with default attenuation
    pub fn point(color: Vec3, intensity: f32, range: f32) -> LightComponent {
        LightComponent {
            light_type: LightType::Point,
            range,
            ..Self::directional(color, intensity)
        }
    }

    /// Spot light with cone angles in radians
    pub fn spot(color: Vec3, intensity: f32, range: f32, inner_cone: f32, outer_cone: f32) -> LightComponent {
        LightComponent {
            light_type: LightType::Spot,
            range,
            inner_cone,
            outer_cone,
            ..Self::directional(color, intensity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{object_delta, FieldKind, Reflect};

    #[test]
    fn test_light_type_round_trips_as_text() {
        let mut registry = InstanceRegistry::new();
        let value = LightType::Spot.to_value();
        assert_eq!(value, Value::Text("spot".into()));
        assert_eq!(LightType::from_value(value, &mut registry).unwrap(), LightType::Spot);
        assert!(LightType::from_value(Value::Text("area".into()), &mut registry).is_err());
    }

    #[test]
    fn test_attenuation_is_a_sub_object() {
        let light = LightComponent::default();
        let kind = light
            .fields()
            .iter()
            .find(|f| f.name == "attenuation")
            .map(|f| f.kind);
        assert_eq!(kind, Some(FieldKind::Object));

        let mut edited = light.clone();
        edited.attenuation.quadratic = 0.5;
        let delta = object_delta(&light.to_serialized(), &edited.to_serialized()).unwrap();
        let Some(Value::Object(nested)) = delta.get("attenuation") else {
            panic!("attenuation delta missing");
        };
        assert_eq!(nested.fields.keys().collect::<Vec<_>>(), vec!["quadratic"]);
    }

    #[test]
    fn test_attenuation_falloff() {
        let attenuation = Attenuation::default();
        assert!((attenuation.factor(0.0) - 1.0).abs() < 1e-6);
        assert!(attenuation.factor(10.0) < attenuation.factor(1.0));
    }
}
