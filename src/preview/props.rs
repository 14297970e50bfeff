//! Preview props: the derived view-model for each schema node.
//!
//! One factory per schema kind turns `(schema, value, channel, path)` into a
//! [`PreviewProps`] node. Factories never build child props themselves; they
//! hand each child to the `recurse` callback supplied by the memo cache.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use super::channel::{
    ArrayHandle, Channel, ConditionalHandle, FormChannel, KeyRegistry, ObjectHandle,
};
use super::keys::StableKey;
use super::memo::{CachedElement, MemoKey, NodeChannel};
use super::schema::{
    ArrayField, ComponentSchema, ConditionalField, ObjectField, SchemaKind, SchemaRef,
};
use crate::document::Value;
use crate::error::{CollabError, CollabResult};

/// Shared props node. Unchanged subtrees keep the same `Rc` across updates.
pub type PropsRef<E> = Rc<PreviewProps<E>>;

/// Callback through which a factory obtains a child's props.
pub(crate) type Recurse<'a, E> =
    dyn FnMut(&SchemaRef, &Value, Channel, MemoKey) -> CollabResult<PropsRef<E>> + 'a;

static NULL: Value = Value::Null;
static NO_OPTIONS: serde_json::Value = serde_json::Value::Null;

/// Props of one schema node. `E` is the caller's child element handle.
#[derive(Debug)]
pub enum PreviewProps<E> {
    Form(FormProps),
    Child(ChildProps<E>),
    Object(ObjectProps<E>),
    Array(ArrayProps<E>),
    Conditional(ConditionalProps<E>),
}

#[derive(Debug)]
pub struct FormProps {
    pub schema: SchemaRef,
    pub value: Value,
    pub on_change: FormChannel,
}

#[derive(Debug)]
pub struct ChildProps<E> {
    pub schema: SchemaRef,
    pub element: E,
}

#[derive(Debug)]
pub struct ObjectProps<E> {
    pub schema: SchemaRef,
    pub value: Value,
    /// Field props in schema declaration order.
    pub fields: Vec<(String, PropsRef<E>)>,
    pub on_change: ObjectHandle,
}

#[derive(Debug)]
pub struct ArrayProps<E> {
    pub schema: SchemaRef,
    pub value: Value,
    pub elements: Vec<Rc<KeyedElement<E>>>,
    pub on_change: ArrayHandle,
}

/// Element props tagged with the element's stable key.
#[derive(Debug)]
pub struct KeyedElement<E> {
    pub key: StableKey,
    pub props: PropsRef<E>,
}

#[derive(Debug)]
pub struct ConditionalProps<E> {
    pub schema: SchemaRef,
    pub discriminant: Value,
    /// Props of the active branch.
    pub value: PropsRef<E>,
    pub on_change: ConditionalHandle,
}

impl<E> PreviewProps<E> {
    pub fn kind(&self) -> SchemaKind {
        match self {
            PreviewProps::Form(_) => SchemaKind::Form,
            PreviewProps::Child(_) => SchemaKind::Child,
            PreviewProps::Object(_) => SchemaKind::Object,
            PreviewProps::Array(_) => SchemaKind::Array,
            PreviewProps::Conditional(_) => SchemaKind::Conditional,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        match self {
            PreviewProps::Form(p) => &p.schema,
            PreviewProps::Child(p) => &p.schema,
            PreviewProps::Object(p) => &p.schema,
            PreviewProps::Array(p) => &p.schema,
            PreviewProps::Conditional(p) => &p.schema,
        }
    }

    pub fn as_form(&self) -> Option<&FormProps> {
        match self {
            PreviewProps::Form(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_child(&self) -> Option<&ChildProps<E>> {
        match self {
            PreviewProps::Child(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectProps<E>> {
        match self {
            PreviewProps::Object(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayProps<E>> {
        match self {
            PreviewProps::Array(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_conditional(&self) -> Option<&ConditionalProps<E>> {
        match self {
            PreviewProps::Conditional(p) => Some(p),
            _ => None,
        }
    }

    /// JSON rendering of the props tree, with `element` rendering child handles.
    pub fn to_json_with(&self, element: &dyn Fn(&E) -> serde_json::Value) -> serde_json::Value {
        match self {
            PreviewProps::Form(p) => json!({
                "kind": "form",
                "value": p.value.to_json(),
                "options": p.options(),
            }),
            PreviewProps::Child(p) => json!({
                "kind": "child",
                "element": element(&p.element),
            }),
            PreviewProps::Object(p) => {
                let fields: serde_json::Map<String, serde_json::Value> = p
                    .fields
                    .iter()
                    .map(|(name, props)| (name.clone(), props.to_json_with(element)))
                    .collect();
                json!({"kind": "object", "fields": fields})
            }
            PreviewProps::Array(p) => {
                let elements: Vec<serde_json::Value> = p
                    .elements
                    .iter()
                    .map(|e| json!({"key": e.key, "props": e.props.to_json_with(element)}))
                    .collect();
                json!({"kind": "array", "elements": elements})
            }
            PreviewProps::Conditional(p) => json!({
                "kind": "conditional",
                "discriminant": p.discriminant.to_json(),
                "value": p.value.to_json_with(element),
            }),
        }
    }
}

impl<E: Serialize> PreviewProps<E> {
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_with(&|e| serde_json::to_value(e).unwrap_or(serde_json::Value::Null))
    }
}

impl FormProps {
    /// The form's options blob from its schema.
    pub fn options(&self) -> &serde_json::Value {
        match self.schema.as_ref() {
            ComponentSchema::Form(form) => &form.options,
            _ => &NO_OPTIONS,
        }
    }
}

impl<E> ObjectProps<E> {
    pub fn field(&self, name: &str) -> Option<&PropsRef<E>> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, props)| props)
    }
}

impl<E> ArrayProps<E> {
    pub fn keys(&self) -> Vec<StableKey> {
        self.elements.iter().map(|e| e.key).collect()
    }
}

// =============================================================================
// FACTORIES
// =============================================================================

/// Inputs shared by every factory call of one update pass.
pub(crate) struct FactoryContext<'a, E> {
    pub(crate) resolver: &'a dyn Fn(&[MemoKey]) -> E,
    pub(crate) keys: &'a KeyRegistry,
}

/// Dispatches to the factory of `schema`'s kind.
pub(crate) fn build_props<E>(
    schema: &SchemaRef,
    value: &Value,
    channel: &mut NodeChannel<E>,
    path: &[MemoKey],
    ctx: &FactoryContext<'_, E>,
    recurse: &mut Recurse<'_, E>,
) -> CollabResult<PreviewProps<E>> {
    match (schema.as_ref(), channel) {
        (ComponentSchema::Form(_), NodeChannel::Plain(Channel::Form(on_change))) => {
            Ok(form_props(schema, value, on_change))
        }
        (ComponentSchema::Child(_), NodeChannel::Plain(Channel::Child)) => {
            Ok(child_props(schema, path, ctx))
        }
        (ComponentSchema::Object(object), NodeChannel::Plain(Channel::Object(handle))) => {
            object_props(schema, object, value, handle, recurse)
        }
        (
            ComponentSchema::Array(array),
            NodeChannel::Array {
                handle,
                elements,
                last_keys,
            },
        ) => array_props(schema, array, value, handle, elements, last_keys, ctx.keys, recurse),
        (
            ComponentSchema::Conditional(conditional),
            NodeChannel::Plain(Channel::Conditional(handle)),
        ) => conditional_props(schema, conditional, value, handle, recurse),
        (schema, channel) => Err(CollabError::schema_violation(format!(
            "{} schema paired with a {} channel",
            schema.kind(),
            channel.kind()
        ))),
    }
}

fn form_props<E>(schema: &SchemaRef, value: &Value, on_change: &FormChannel) -> PreviewProps<E> {
    PreviewProps::Form(FormProps {
        schema: schema.clone(),
        value: value.clone(),
        on_change: on_change.clone(),
    })
}

fn child_props<E>(
    schema: &SchemaRef,
    path: &[MemoKey],
    ctx: &FactoryContext<'_, E>,
) -> PreviewProps<E> {
    PreviewProps::Child(ChildProps {
        schema: schema.clone(),
        element: (ctx.resolver)(path),
    })
}

fn object_props<E>(
    schema: &SchemaRef,
    object: &ObjectField,
    value: &Value,
    handle: &ObjectHandle,
    recurse: &mut Recurse<'_, E>,
) -> CollabResult<PreviewProps<E>> {
    let map = value.as_map().ok_or_else(|| mismatch(SchemaKind::Object, value))?;
    let mut fields = Vec::with_capacity(object.fields.len());
    for (name, field_schema) in &object.fields {
        let channel = handle
            .field(name)
            .cloned()
            .ok_or_else(|| CollabError::field_not_found(name.clone()))?;
        let field_value = map.get(name).unwrap_or(&NULL);
        let props = recurse(field_schema, field_value, channel, MemoKey::Field(name.clone()))?;
        fields.push((name.clone(), props));
    }
    Ok(PreviewProps::Object(ObjectProps {
        schema: schema.clone(),
        value: value.clone(),
        fields,
        on_change: handle.clone(),
    }))
}

#[allow(clippy::too_many_arguments)]
fn array_props<E>(
    schema: &SchemaRef,
    array: &ArrayField,
    value: &Value,
    handle: &ArrayHandle,
    cached: &mut HashMap<StableKey, CachedElement<E>>,
    last_keys: &mut Option<Arc<[StableKey]>>,
    keys: &KeyRegistry,
    recurse: &mut Recurse<'_, E>,
) -> CollabResult<PreviewProps<E>> {
    let list = value.as_list().ok_or_else(|| mismatch(SchemaKind::Array, value))?;
    let element_keys = keys.borrow_mut().inherit(list, last_keys.as_ref())?;

    let mut elements = Vec::with_capacity(list.len());
    for (key, item) in element_keys.iter().copied().zip(list.iter()) {
        let slot = cached.entry(key).or_insert_with(|| CachedElement {
            channel: Channel::for_schema(&array.element, handle.element_slot(key)),
            keyed: None,
        });
        let props = recurse(&array.element, item, slot.channel.clone(), MemoKey::Element(key))?;
        let keyed = match &slot.keyed {
            Some(keyed) if Rc::ptr_eq(&keyed.props, &props) => keyed.clone(),
            _ => {
                let keyed = Rc::new(KeyedElement { key, props });
                slot.keyed = Some(keyed.clone());
                keyed
            }
        };
        elements.push(keyed);
    }

    let live: HashSet<StableKey> = element_keys.iter().copied().collect();
    cached.retain(|key, _| live.contains(key));
    *last_keys = Some(element_keys);

    Ok(PreviewProps::Array(ArrayProps {
        schema: schema.clone(),
        value: value.clone(),
        elements,
        on_change: handle.clone(),
    }))
}

fn conditional_props<E>(
    schema: &SchemaRef,
    conditional: &ConditionalField,
    value: &Value,
    handle: &ConditionalHandle,
    recurse: &mut Recurse<'_, E>,
) -> CollabResult<PreviewProps<E>> {
    let map = value.as_map().ok_or_else(|| mismatch(SchemaKind::Conditional, value))?;
    let discriminant = map.get("discriminant").unwrap_or(&NULL);
    let branch = conditional.branch(discriminant)?;
    let inner = map.get("value").unwrap_or(&NULL);
    let props = recurse(
        branch,
        inner,
        Channel::for_schema(branch, handle.value_slot()),
        MemoKey::Value,
    )?;
    Ok(PreviewProps::Conditional(ConditionalProps {
        schema: schema.clone(),
        discriminant: discriminant.clone(),
        value: props,
        on_change: handle.clone(),
    }))
}

fn mismatch(kind: SchemaKind, value: &Value) -> CollabError {
    CollabError::schema_violation(format!(
        "{} schema cannot describe a {} value",
        kind,
        value.kind_name()
    ))
}
