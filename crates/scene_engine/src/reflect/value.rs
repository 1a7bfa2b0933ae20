//! Generic field values
//!
//! Every reflected field is converted to a [`Value`] when an object is encoded,
//! compared or patched. Handles are stored by instance id; handles pointing inside
//! a prefab instance are rewritten to link-relative [`LocalRef`]s by the prefab code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to an object inside the same prefab instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalRef {
    /// The prefab instance root node
    Root,
    /// A node or component carrying this link id
    Link(u32),
    /// An object inside a nested prefab instance
    ///
    /// Link ids of the nested instance roots from the outermost inwards, followed by
    /// the link id of the object in the innermost instance.
    Path(Vec<u32>),
}

/// A reflected field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value (null handle, `None` option)
    None,
    /// Boolean
    Bool(bool),
    /// Any integer field
    Int(i64),
    /// Any floating point field
    Float(f64),
    /// String or enum name
    Text(String),
    /// Three component vector
    Vector([f32; 3]),
    /// Rotation quaternion as `[i, j, k, w]`
    Rotation([f32; 4]),
    /// Ordered sequence
    List(Vec<Value>),
    /// Owned sub-object
    Object(SerializedObject),
    /// Handle to another object, by instance id
    Handle(u64),
    /// Handle to another object of the same prefab instance, by link id
    Local(LocalRef),
}

impl Value {
    /// Short name of the variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Vector(_) => "vector",
            Self::Rotation(_) => "rotation",
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Handle(_) => "handle",
            Self::Local(_) => "local",
        }
    }

    /// Rewrite every handle-like leaf for which `f` returns a replacement
    pub fn map_refs(&mut self, f: &mut dyn FnMut(&Value) -> Option<Value>) {
        match self {
            Self::Handle(_) | Self::Local(_) => {
                if let Some(replacement) = f(self) {
                    *self = replacement;
                }
            }
            Self::List(items) => {
                for item in items {
                    item.map_refs(f);
                }
            }
            Self::Object(object) => object.map_refs(f),
            _ => {}
        }
    }
}

/// Type-tagged bag of named field values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedObject {
    /// Stable type identifier of the encoded object
    pub type_name: String,
    /// Field values keyed by field name
    pub fields: BTreeMap<String, Value>,
}

impl SerializedObject {
    /// Create an empty object of the given type
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder pattern: add a field
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a field value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether no fields are present
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// See [`Value::map_refs`]
    pub fn map_refs(&mut self, f: &mut dyn FnMut(&Value) -> Option<Value>) {
        for value in self.fields.values_mut() {
            value.map_refs(f);
        }
    }
}

/// Sparse delta turning `base` into `target`
///
/// Only fields whose values differ appear in the result. Owned sub-objects of the same
/// type are compared field by field so an edit deep inside one only carries that field.
/// Returns `None` when nothing differs.
pub fn object_delta(base: &SerializedObject, target: &SerializedObject) -> Option<SerializedObject> {
    let mut delta = SerializedObject::new(target.type_name.clone());

    for (name, value) in &target.fields {
        match base.fields.get(name) {
            Some(old) if old == value => {}
            Some(Value::Object(old)) => match value {
                Value::Object(new) if old.type_name == new.type_name => {
                    if let Some(nested) = object_delta(old, new) {
                        delta.fields.insert(name.clone(), Value::Object(nested));
                    }
                }
                _ => {
                    delta.fields.insert(name.clone(), value.clone());
                }
            },
            _ => {
                delta.fields.insert(name.clone(), value.clone());
            }
        }
    }

    if delta.is_empty() {
        None
    } else {
        Some(delta)
    }
}

/// Overlay a delta produced by [`object_delta`] onto a current value
pub fn merge_value(current: Option<Value>, delta: &Value) -> Value {
    match (current, delta) {
        (Some(Value::Object(mut base)), Value::Object(patch)) if base.type_name == patch.type_name => {
            for (name, value) in &patch.fields {
                let merged = merge_value(base.fields.remove(name), value);
                base.fields.insert(name.clone(), merged);
            }
            Value::Object(base)
        }
        _ => delta.clone(),
    }
}
