//! Component schemas: the closed set of node kinds describing a value's shape.
//!
//! Schema nodes are immutable and shared as [`SchemaRef`]. The engine compares
//! them by pointer, so swapping a node for a structurally equal copy still
//! counts as a schema change.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::document::Value;
use crate::error::{CollabError, CollabResult};

/// Shared schema node.
pub type SchemaRef = Arc<ComponentSchema>;

/// Discriminant of [`ComponentSchema`], used for stats and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Form,
    Child,
    Object,
    Array,
    Conditional,
}

impl SchemaKind {
    pub const ALL: [SchemaKind; 5] = [
        SchemaKind::Form,
        SchemaKind::Child,
        SchemaKind::Object,
        SchemaKind::Array,
        SchemaKind::Conditional,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaKind::Form => "form",
            SchemaKind::Child => "child",
            SchemaKind::Object => "object",
            SchemaKind::Array => "array",
            SchemaKind::Conditional => "conditional",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// SCHEMA NODES
// =============================================================================

/// A schema node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ComponentSchema {
    Form(FormField),
    Child(ChildField),
    Object(ObjectField),
    Array(ArrayField),
    Conditional(ConditionalField),
}

/// Leaf holding a primitive (or opaque) value edited by a form control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    #[serde(default)]
    pub default_value: Value,
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Leaf whose content is rendered outside the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildField {
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Named fields, kept in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectField {
    #[serde(with = "ordered_fields")]
    pub fields: Vec<(String, SchemaRef)>,
}

/// Growable ordered collection of one element shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayField {
    pub element: SchemaRef,
}

/// One of several branches, selected by a boolean or string discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalField {
    pub discriminant: FormField,
    pub values: BTreeMap<String, SchemaRef>,
}

impl ComponentSchema {
    pub fn form(default_value: impl Into<Value>, options: serde_json::Value) -> SchemaRef {
        Arc::new(ComponentSchema::Form(
            FormField::new(default_value).with_options(options),
        ))
    }

    pub fn child(options: serde_json::Value) -> SchemaRef {
        Arc::new(ComponentSchema::Child(ChildField { options }))
    }

    pub fn object<K, I>(fields: I) -> SchemaRef
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SchemaRef)>,
    {
        Arc::new(ComponentSchema::Object(ObjectField {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }))
    }

    pub fn array(element: SchemaRef) -> SchemaRef {
        Arc::new(ComponentSchema::Array(ArrayField { element }))
    }

    pub fn conditional<K, I>(discriminant: FormField, values: I) -> SchemaRef
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SchemaRef)>,
    {
        Arc::new(ComponentSchema::Conditional(ConditionalField {
            discriminant,
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }))
    }

    /// Parses a schema from its JSON description.
    pub fn from_json(json: &str) -> CollabResult<SchemaRef> {
        Ok(Arc::new(serde_json::from_str(json)?))
    }

    pub fn kind(&self) -> SchemaKind {
        match self {
            ComponentSchema::Form(_) => SchemaKind::Form,
            ComponentSchema::Child(_) => SchemaKind::Child,
            ComponentSchema::Object(_) => SchemaKind::Object,
            ComponentSchema::Array(_) => SchemaKind::Array,
            ComponentSchema::Conditional(_) => SchemaKind::Conditional,
        }
    }

    /// The value a freshly created node of this schema starts with.
    pub fn initial_value(&self) -> Value {
        match self {
            ComponentSchema::Form(form) => form.default_value.clone(),
            ComponentSchema::Child(_) => Value::Null,
            ComponentSchema::Object(object) => Value::map(
                object
                    .fields
                    .iter()
                    .map(|(name, schema)| (name.clone(), schema.initial_value())),
            ),
            ComponentSchema::Array(_) => Value::list(Vec::new()),
            ComponentSchema::Conditional(conditional) => {
                let discriminant = conditional.discriminant.default_value.clone();
                let value = conditional
                    .branch(&discriminant)
                    .map(|schema| schema.initial_value())
                    .unwrap_or_default();
                Value::map([("discriminant", discriminant), ("value", value)])
            }
        }
    }
}

impl FormField {
    pub fn new(default_value: impl Into<Value>) -> Self {
        Self {
            default_value: default_value.into(),
            options: serde_json::Value::Null,
        }
    }

    /// Builder: Set options.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

impl ObjectField {
    pub fn field(&self, name: &str) -> Option<&SchemaRef> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, schema)| schema)
    }
}

impl ConditionalField {
    /// Lookup key of a discriminant value: booleans map to `"true"`/`"false"`.
    pub fn discriminant_key(discriminant: &Value) -> CollabResult<String> {
        match discriminant {
            Value::Bool(b) => Ok(b.to_string()),
            Value::Str(s) => Ok(s.to_string()),
            other => Err(CollabError::schema_violation(format!(
                "conditional discriminant must be a bool or string, got {}",
                other.kind_name()
            ))),
        }
    }

    /// The branch schema selected by `discriminant`.
    pub fn branch(&self, discriminant: &Value) -> CollabResult<&SchemaRef> {
        let key = Self::discriminant_key(discriminant)?;
        self.values.get(&key).ok_or_else(|| {
            CollabError::schema_violation(format!(
                "conditional has no branch for discriminant '{}'",
                key
            ))
        })
    }
}

/// Object fields as a JSON map whose entry order is the field order.
mod ordered_fields {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::SchemaRef;

    pub fn serialize<S: Serializer>(
        fields: &[(String, SchemaRef)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(fields.len()))?;
        for (name, schema) in fields {
            map.serialize_entry(name, schema)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, SchemaRef)>, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = Vec<(String, SchemaRef)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to schemas")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, schema)) = access.next_entry::<String, SchemaRef>()? {
                    fields.push((name, schema));
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

// =============================================================================
// TESTS
// =============================================================================
