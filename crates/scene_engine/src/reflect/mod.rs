//! Field-level reflection
//!
//! Components and owned sub-objects describe their serializable fields through
//! [`Reflect`]. The serializer and the prefab diff engine only ever see objects
//! through this interface, so a type becomes persistable and diffable by invoking
//! [`impl_reflect!`](crate::impl_reflect) with its field list.

pub mod value;

pub use value::{merge_value, object_delta, LocalRef, SerializedObject, Value};

use crate::foundation::math::{Quat, Quaternion, Vec3};
use crate::scene::{Handle, InstanceRegistry};
use std::any::Any;
use thiserror::Error;

/// How a field participates in encoding and diffing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Primitive, string, vector or list value
    Plain,
    /// Owned sub-object, diffed recursively
    Object,
    /// Handle to another scene object
    Handle,
}

/// Static description of one reflected field
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    /// Field name, stable across versions
    pub name: &'static str,
    /// Encoding category
    pub kind: FieldKind,
}

/// Reflection errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReflectError {
    /// Field name not declared by the type
    #[error("type '{type_name}' has no field '{field}'")]
    UnknownField {
        /// Reflected type name
        type_name: String,
        /// Requested field
        field: String,
    },

    /// Value kind does not match the field
    #[error("field '{field}' expected {expected}, found {found}")]
    TypeMismatch {
        /// Field being written
        field: String,
        /// Value kind the field accepts
        expected: &'static str,
        /// Value kind that was supplied
        found: &'static str,
    },

    /// Enum value name not declared by the type
    #[error("unknown variant '{variant}' for {type_name}")]
    UnknownVariant {
        /// Reflected enum name
        type_name: &'static str,
        /// Unrecognized variant name
        variant: String,
    },
}

impl ReflectError {
    /// Create a type mismatch for a value that was not of the expected kind
    pub fn mismatch(expected: &'static str, found: &Value) -> Self {
        Self::TypeMismatch {
            field: String::new(),
            expected,
            found: found.kind_name(),
        }
    }

    /// Attach the field name to a mismatch raised by a value conversion
    pub fn in_field(self, name: &str) -> Self {
        match self {
            Self::TypeMismatch { field, expected, found } if field.is_empty() => Self::TypeMismatch {
                field: name.to_string(),
                expected,
                found,
            },
            other => other,
        }
    }
}

/// Conversion between a field type and [`Value`]
pub trait ReflectValue: Sized {
    /// Encoding category of this type
    const KIND: FieldKind = FieldKind::Plain;

    /// Whole value, used when this type is nested in another
    fn to_value(&self) -> Value;

    /// Decode a value; handle fields resolve their ids through the registry
    fn from_value(value: Value, registry: &mut InstanceRegistry) -> Result<Self, ReflectError>;
}

/// Object with a stable type name and enumerable fields
pub trait Reflect: Any {
    /// Stable type identifier
    fn type_name(&self) -> &'static str;

    /// Field descriptors in declaration order
    fn fields(&self) -> &'static [FieldInfo];

    /// Read a field
    fn field(&self, name: &str) -> Option<Value>;

    /// Write a field
    fn set_field(
        &mut self,
        name: &str,
        value: Value,
        registry: &mut InstanceRegistry,
    ) -> Result<(), ReflectError>;

    /// Concrete type access for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Mutable concrete type access
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Encode all fields
    fn to_serialized(&self) -> SerializedObject {
        let mut object = SerializedObject::new(self.type_name());
        for info in self.fields() {
            if let Some(value) = self.field(info.name) {
                object.fields.insert(info.name.to_string(), value);
            }
        }
        object
    }

    /// Overwrite every field present in `object`
    fn apply_serialized(
        &mut self,
        object: &SerializedObject,
        registry: &mut InstanceRegistry,
    ) -> Result<(), ReflectError> {
        for (name, value) in &object.fields {
            self.set_field(name, value.clone(), registry)?;
        }
        Ok(())
    }
}

/// Statically known reflected type, constructible from defaults
pub trait ReflectType: Reflect + Default {
    /// Name stored in saved data and used for component lookup
    const TYPE_NAME: &'static str;
}

impl ReflectValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value, _registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(ReflectError::mismatch("bool", &other)),
        }
    }
}

macro_rules! reflect_int {
    ($($ty:ty),*) => {
        $(
            impl ReflectValue for $ty {
                fn to_value(&self) -> Value {
                    Value::Int(*self as i64)
                }

                fn from_value(value: Value, _registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
                    match value {
                        Value::Int(i) => Ok(i as $ty),
                        other => Err(ReflectError::mismatch("int", &other)),
                    }
                }
            }
        )*
    };
}

reflect_int!(i32, u32, i64, u64, usize);

impl ReflectValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: Value, _registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            Value::Float(f) => Ok(f as f32),
            Value::Int(i) => Ok(i as f32),
            other => Err(ReflectError::mismatch("float", &other)),
        }
    }
}

impl ReflectValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value, _registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(ReflectError::mismatch("float", &other)),
        }
    }
}

impl ReflectValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value, _registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            Value::Text(text) => Ok(text),
            other => Err(ReflectError::mismatch("text", &other)),
        }
    }
}

impl ReflectValue for Vec3 {
    fn to_value(&self) -> Value {
        Value::Vector([self.x, self.y, self.z])
    }

    fn from_value(value: Value, _registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            Value::Vector([x, y, z]) => Ok(Vec3::new(x, y, z)),
            other => Err(ReflectError::mismatch("vector", &other)),
        }
    }
}

impl ReflectValue for Quat {
    fn to_value(&self) -> Value {
        let q = self.quaternion();
        Value::Rotation([q.i, q.j, q.k, q.w])
    }

    fn from_value(value: Value, _registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            // Stored rotations are already unit length; renormalizing would perturb the bits
            Value::Rotation([i, j, k, w]) => Ok(Quat::new_unchecked(Quaternion::new(w, i, j, k))),
            other => Err(ReflectError::mismatch("rotation", &other)),
        }
    }
}

impl<T: ReflectValue> ReflectValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(ReflectValue::to_value).collect())
    }

    fn from_value(value: Value, registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            Value::List(items) => items
                .into_iter()
                .map(|item| T::from_value(item, registry))
                .collect(),
            other => Err(ReflectError::mismatch("list", &other)),
        }
    }
}

impl<T: ReflectValue> ReflectValue for Option<T> {
    const KIND: FieldKind = T::KIND;

    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::None,
        }
    }

    fn from_value(value: Value, registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            Value::None => Ok(None),
            other => T::from_value(other, registry).map(Some),
        }
    }
}

impl<T: ?Sized + 'static> ReflectValue for Handle<T> {
    const KIND: FieldKind = FieldKind::Handle;

    fn to_value(&self) -> Value {
        if self.is_null() {
            Value::None
        } else {
            Value::Handle(self.instance_id())
        }
    }

    fn from_value(value: Value, registry: &mut InstanceRegistry) -> Result<Self, ReflectError> {
        match value {
            Value::None | Value::Handle(0) => Ok(Handle::null()),
            Value::Handle(id) => Ok(registry.handle_for_saved_id(id)),
            Value::Local(local) => {
                log::debug!("Unresolved local reference {:?} decoded as null handle", local);
                Ok(Handle::null())
            }
            other => Err(ReflectError::mismatch("handle", &other)),
        }
    }
}

/// Implement [`Reflect`], [`ReflectType`] and [`ReflectValue`] for a struct
///
/// The struct must implement `Default`; unlisted fields are runtime-only state and are
/// neither saved nor diffed.
///
/// ```ignore
/// impl_reflect!(LightComponent, "Light" {
///     intensity: f32,
///     color: Vec3,
/// });
/// ```
#[macro_export]
macro_rules! impl_reflect {
    ($ty:ty, $name:literal { $($field:ident : $fty:ty),* $(,)? }) => {
        impl $crate::reflect::Reflect for $ty {
            fn type_name(&self) -> &'static str {
                $name
            }

            fn fields(&self) -> &'static [$crate::reflect::FieldInfo] {
                const FIELDS: &[$crate::reflect::FieldInfo] = &[
                    $(
                        $crate::reflect::FieldInfo {
                            name: stringify!($field),
                            kind: <$fty as $crate::reflect::ReflectValue>::KIND,
                        },
                    )*
                ];
                FIELDS
            }

            fn field(&self, name: &str) -> Option<$crate::reflect::Value> {
                match name {
                    $(stringify!($field) => Some($crate::reflect::ReflectValue::to_value(&self.$field)),)*
                    _ => None,
                }
            }

            #[allow(unused_variables)]
            fn set_field(
                &mut self,
                name: &str,
                value: $crate::reflect::Value,
                registry: &mut $crate::scene::InstanceRegistry,
            ) -> Result<(), $crate::reflect::ReflectError> {
                match name {
                    $(
                        stringify!($field) => {
                            self.$field = <$fty as $crate::reflect::ReflectValue>::from_value(value, registry)
                                .map_err(|e| e.in_field(stringify!($field)))?;
                            Ok(())
                        }
                    )*
                    _ => Err($crate::reflect::ReflectError::UnknownField {
                        type_name: $name.to_string(),
                        field: name.to_string(),
                    }),
                }
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }
        }

        impl $crate::reflect::ReflectType for $ty {
            const TYPE_NAME: &'static str = $name;
        }

        impl $crate::reflect::ReflectValue for $ty {
            const KIND: $crate::reflect::FieldKind = $crate::reflect::FieldKind::Object;

            fn to_value(&self) -> $crate::reflect::Value {
                $crate::reflect::Value::Object($crate::reflect::Reflect::to_serialized(self))
            }

            fn from_value(
                value: $crate::reflect::Value,
                registry: &mut $crate::scene::InstanceRegistry,
            ) -> Result<Self, $crate::reflect::ReflectError> {
                match value {
                    $crate::reflect::Value::Object(object) => {
                        let mut out = <$ty as Default>::default();
                        $crate::reflect::Reflect::apply_serialized(&mut out, &object, registry)?;
                        Ok(out)
                    }
                    other => Err($crate::reflect::ReflectError::mismatch("object", &other)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Sample {
        count: u32,
        scale: f32,
        label: String,
        offsets: Vec<Vec3>,
    }

    crate::impl_reflect!(Sample, "Sample" {
        count: u32,
        scale: f32,
        label: String,
        offsets: Vec<Vec3>,
    });

    #[test]
    fn test_field_descriptors_follow_declaration_order() {
        let sample = Sample::default();
        let names: Vec<_> = sample.fields().iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["count", "scale", "label", "offsets"]);
        assert!(sample.fields().iter().all(|f| f.kind == FieldKind::Plain));
        assert_eq!(<Sample as ReflectType>::TYPE_NAME, "Sample");
    }

    #[test]
    fn test_serialized_object_restores_fields() {
        let mut registry = InstanceRegistry::new();
        let source = Sample {
            count: 4,
            scale: 0.25,
            label: "crate".to_string(),
            offsets: vec![Vec3::new(1.0, 2.0, 3.0)],
        };

        let encoded = source.to_serialized();
        let mut decoded = Sample::default();
        decoded.apply_serialized(&encoded, &mut registry).unwrap();
        assert_eq!(decoded, source);
    }

    #[test]
    fn test_set_field_rejects_wrong_kind() {
        let mut registry = InstanceRegistry::new();
        let mut sample = Sample::default();

        let err = sample
            .set_field("count", Value::Text("four".into()), &mut registry)
            .unwrap_err();
        assert_eq!(
            err,
            ReflectError::TypeMismatch {
                field: "count".into(),
                expected: "int",
                found: "text"
            }
        );

        let err = sample.set_field("missing", Value::Bool(true), &mut registry).unwrap_err();
        assert!(matches!(err, ReflectError::UnknownField { .. }));
    }
}
