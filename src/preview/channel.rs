//! Update channels: the write handles threaded down the props tree.
//!
//! Every channel writes through a [`Slot`]. A slot addresses either a fixed
//! document path, a named field of another slot, or an array element by its
//! stable key. Element slots resolve their index at write time, so a handle
//! taken before a reorder still writes the element it was created for.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use super::keys::{StableKey, StableKeys};
use super::schema::{
    ArrayField, ComponentSchema, ConditionalField, ObjectField, SchemaKind, SchemaRef,
};
use crate::document::{display_path, DocPath, DocProp, ListValue, MapValue, Value, WeakDocument};
use crate::error::{CollabError, CollabResult};

/// Key registry shared by one engine and the channels it hands out.
pub type KeyRegistry = Rc<RefCell<StableKeys>>;

// =============================================================================
// SLOTS
// =============================================================================

/// A write target inside the shared document.
#[derive(Clone)]
pub struct Slot {
    target: Rc<SlotTarget>,
    doc: WeakDocument,
    keys: KeyRegistry,
}

enum SlotTarget {
    Path(DocPath),
    Field { parent: Slot, name: String },
    Element { array: Slot, key: StableKey },
}

impl Slot {
    pub(crate) fn at_path(doc: WeakDocument, keys: KeyRegistry, path: DocPath) -> Self {
        Self {
            target: Rc::new(SlotTarget::Path(path)),
            doc,
            keys,
        }
    }

    fn with_target(&self, target: SlotTarget) -> Self {
        Self {
            target: Rc::new(target),
            doc: self.doc.clone(),
            keys: self.keys.clone(),
        }
    }

    /// Slot of a named field below this one.
    pub fn field(&self, name: &str) -> Slot {
        match &*self.target {
            SlotTarget::Path(path) => {
                let mut path = path.clone();
                path.push(DocProp::Key(name.to_string()));
                self.with_target(SlotTarget::Path(path))
            }
            _ => self.with_target(SlotTarget::Field {
                parent: self.clone(),
                name: name.to_string(),
            }),
        }
    }

    /// Slot of the array element identified by `key`.
    pub fn element(&self, key: StableKey) -> Slot {
        self.with_target(SlotTarget::Element {
            array: self.clone(),
            key,
        })
    }

    /// Slot of the element currently at `index` of the array at this slot.
    ///
    /// The index is resolved to its stable key now; the returned slot keeps
    /// following that element.
    pub fn index(&self, index: usize) -> CollabResult<Slot> {
        let current = self.read()?;
        let list = expect_list(&current)?;
        let keys = self.keys.borrow_mut().keys_for(list);
        let key = keys
            .get(index)
            .copied()
            .ok_or_else(|| CollabError::index_out_of_bounds(index, keys.len()))?;
        Ok(self.element(key))
    }

    /// Human-readable location, e.g. `/blocks/#3/title`.
    pub fn describe(&self) -> String {
        match &*self.target {
            SlotTarget::Path(path) => display_path(path),
            SlotTarget::Field { parent, name } => format!("{}/{}", parent.describe(), name),
            SlotTarget::Element { array, key } => format!("{}/#{}", array.describe(), key),
        }
    }

    /// Current value at this slot.
    pub fn read(&self) -> CollabResult<Value> {
        match &*self.target {
            SlotTarget::Path(path) => self.doc.upgrade()?.value_at(path),
            SlotTarget::Field { parent, name } => parent
                .read()?
                .get(name)
                .cloned()
                .ok_or_else(|| CollabError::field_not_found(name.clone())),
            SlotTarget::Element { array, key } => {
                let current = array.read()?;
                let list = expect_list(&current)?;
                let keys = self.keys.borrow_mut().keys_for(list);
                Ok(list[position(&keys, *key)?].clone())
            }
        }
    }

    /// Replaces the value at this slot.
    pub fn write(&self, value: Value) -> CollabResult<()> {
        tracing::trace!(slot = %self.describe(), kind = value.kind_name(), "slot write");
        match &*self.target {
            SlotTarget::Path(path) => self.doc.upgrade()?.set(path, value),
            SlotTarget::Field { parent, name } => parent.update(|current| {
                let mut next = (**expect_map(current)?).clone();
                next.insert(name.clone(), value);
                Ok(Value::Map(Arc::new(next)))
            }),
            SlotTarget::Element { array, key } => array.update(|current| {
                let list = expect_list(current)?;
                let keys = self.keys.borrow_mut().keys_for(list);
                let index = position(&keys, *key)?;
                let mut items = (**list).clone();
                items[index] = value;
                let next = Arc::new(items);
                self.keys.borrow_mut().carry_forward(&next, keys.to_vec())?;
                Ok(Value::List(next))
            }),
        }
    }

    /// Reads, transforms and writes back in one step.
    pub fn update<F>(&self, f: F) -> CollabResult<()>
    where
        F: FnOnce(&Value) -> CollabResult<Value>,
    {
        let current = self.read()?;
        let next = f(&current)?;
        self.write(next)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&self.describe()).finish()
    }
}

fn expect_list(value: &Value) -> CollabResult<&ListValue> {
    value.as_list().ok_or_else(|| {
        CollabError::schema_violation(format!("expected a list, got {}", value.kind_name()))
    })
}

fn expect_map(value: &Value) -> CollabResult<&MapValue> {
    value.as_map().ok_or_else(|| {
        CollabError::schema_violation(format!("expected a map, got {}", value.kind_name()))
    })
}

fn position(keys: &[StableKey], key: StableKey) -> CollabResult<usize> {
    keys.iter()
        .position(|k| *k == key)
        .ok_or(CollabError::UnknownElementKey(key))
}

// =============================================================================
// CHANNELS
// =============================================================================

/// The write handle for one schema node.
#[derive(Clone, Debug)]
pub enum Channel {
    Form(FormChannel),
    /// Child content is rendered externally and has no write path.
    Child,
    Object(ObjectHandle),
    Array(ArrayHandle),
    Conditional(ConditionalHandle),
}

impl Channel {
    /// Builds the channel for `schema` writing through `slot`.
    pub fn for_schema(schema: &SchemaRef, slot: Slot) -> Channel {
        match schema.as_ref() {
            ComponentSchema::Form(_) => Channel::Form(FormChannel::from_slot(slot)),
            ComponentSchema::Child(_) => Channel::Child,
            ComponentSchema::Object(object) => Channel::Object(ObjectHandle::new(object, slot)),
            ComponentSchema::Array(array) => Channel::Array(ArrayHandle::new(array, slot)),
            ComponentSchema::Conditional(conditional) => {
                Channel::Conditional(ConditionalHandle::new(conditional, slot))
            }
        }
    }

    pub fn kind(&self) -> SchemaKind {
        match self {
            Channel::Form(_) => SchemaKind::Form,
            Channel::Child => SchemaKind::Child,
            Channel::Object(_) => SchemaKind::Object,
            Channel::Array(_) => SchemaKind::Array,
            Channel::Conditional(_) => SchemaKind::Conditional,
        }
    }

    pub fn as_form(&self) -> Option<&FormChannel> {
        match self {
            Channel::Form(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            Channel::Object(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayHandle> {
        match self {
            Channel::Array(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_conditional(&self) -> Option<&ConditionalHandle> {
        match self {
            Channel::Conditional(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Write callback of a form leaf.
#[derive(Clone)]
pub struct FormChannel {
    write: Rc<dyn Fn(Value) -> CollabResult<()>>,
}

impl FormChannel {
    fn from_slot(slot: Slot) -> Self {
        Self {
            write: Rc::new(move |value| slot.write(value)),
        }
    }

    pub fn set(&self, value: impl Into<Value>) -> CollabResult<()> {
        (self.write)(value.into())
    }
}

impl fmt::Debug for FormChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FormChannel")
    }
}

// =============================================================================
// OBJECT
// =============================================================================

/// Structured handle of an object node with one channel per field.
#[derive(Clone)]
pub struct ObjectHandle {
    inner: Rc<ObjectInner>,
}

struct ObjectInner {
    slot: Slot,
    fields: Vec<(String, Channel)>,
}

impl ObjectHandle {
    fn new(object: &ObjectField, slot: Slot) -> Self {
        let fields = object
            .fields
            .iter()
            .map(|(name, schema)| (name.clone(), Channel::for_schema(schema, slot.field(name))))
            .collect();
        Self {
            inner: Rc::new(ObjectInner { slot, fields }),
        }
    }

    /// Channel of one field.
    pub fn field(&self, name: &str) -> Option<&Channel> {
        self.inner
            .fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, channel)| channel)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Channel)> {
        self.inner.fields.iter().map(|(name, channel)| (name.as_str(), channel))
    }

    /// Writes several fields in one document write.
    ///
    /// Every name must be a declared field; child fields are rejected.
    pub fn on_change<K, I>(&self, updates: I) -> CollabResult<()>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let updates: Vec<(String, Value)> =
            updates.into_iter().map(|(k, v)| (k.into(), v)).collect();
        for (name, _) in &updates {
            match self.field(name) {
                None => return Err(CollabError::field_not_found(name.clone())),
                Some(Channel::Child) => {
                    return Err(CollabError::unimplemented(format!(
                        "write to child field '{}' at {}",
                        name,
                        self.inner.slot.describe()
                    )))
                }
                Some(_) => {}
            }
        }
        if updates.is_empty() {
            return Ok(());
        }
        self.inner.slot.update(|current| {
            let mut next = (**expect_map(current)?).clone();
            next.extend(updates);
            Ok(Value::Map(Arc::new(next)))
        })
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("slot", &self.inner.slot)
            .field("fields", &self.inner.fields.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// ARRAY
// =============================================================================

/// One entry of a structural array edit.
///
/// `key: Some` keeps an existing element (optionally replacing its value);
/// `key: None` inserts a new element, initialised from the element schema
/// when no value is given.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementUpdate {
    pub key: Option<StableKey>,
    pub value: Option<Value>,
}

impl ElementUpdate {
    pub fn keep(key: StableKey) -> Self {
        Self { key: Some(key), value: None }
    }

    pub fn set(key: StableKey, value: Value) -> Self {
        Self { key: Some(key), value: Some(value) }
    }

    pub fn insert(value: Option<Value>) -> Self {
        Self { key: None, value }
    }
}

/// Structured handle of an array node.
#[derive(Clone)]
pub struct ArrayHandle {
    inner: Rc<ArrayInner>,
}

struct ArrayInner {
    slot: Slot,
    element: SchemaRef,
}

impl ArrayHandle {
    fn new(array: &ArrayField, slot: Slot) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                slot,
                element: array.element.clone(),
            }),
        }
    }

    pub(crate) fn element_slot(&self, key: StableKey) -> Slot {
        self.inner.slot.element(key)
    }

    pub fn element_schema(&self) -> &SchemaRef {
        &self.inner.element
    }

    /// Raw whole-array replace. The new list gets fresh keys.
    pub fn replace(&self, value: Value) -> CollabResult<()> {
        let list = expect_list(&value)?;
        self.inner.slot.keys.borrow_mut().keys_for(list);
        self.inner.slot.write(value)
    }

    /// Keys of the current array value, in order.
    pub fn keys(&self) -> CollabResult<Vec<StableKey>> {
        let current = self.inner.slot.read()?;
        let list = expect_list(&current)?;
        let keys = self.inner.slot.keys.borrow_mut().keys_for(list);
        Ok(keys.to_vec())
    }

    /// Rebuilds the array from `elements`, carrying keys of kept elements.
    pub fn update(&self, elements: Vec<ElementUpdate>) -> CollabResult<()> {
        let registry = &self.inner.slot.keys;
        self.inner.slot.update(|current| {
            let list = expect_list(current)?;
            let current_keys = registry.borrow_mut().keys_for(list);
            let mut items = Vec::with_capacity(elements.len());
            let mut next_keys = Vec::with_capacity(elements.len());
            for element in elements {
                match element.key {
                    Some(key) => {
                        let index = position(&current_keys, key)?;
                        items.push(element.value.unwrap_or_else(|| list[index].clone()));
                        next_keys.push(key);
                    }
                    None => {
                        items.push(
                            element
                                .value
                                .unwrap_or_else(|| self.inner.element.initial_value()),
                        );
                        next_keys.push(registry.borrow_mut().fresh_key());
                    }
                }
            }
            let next = Arc::new(items);
            registry.borrow_mut().carry_forward(&next, next_keys)?;
            Ok(Value::List(next))
        })
    }

    /// Inserts a new element at `index`.
    pub fn insert(&self, index: usize, value: Option<Value>) -> CollabResult<()> {
        let mut elements: Vec<ElementUpdate> =
            self.keys()?.into_iter().map(ElementUpdate::keep).collect();
        if index > elements.len() {
            return Err(CollabError::index_out_of_bounds(index, elements.len()));
        }
        elements.insert(index, ElementUpdate::insert(value));
        self.update(elements)
    }

    /// Appends a new element.
    pub fn push(&self, value: Option<Value>) -> CollabResult<()> {
        let mut elements: Vec<ElementUpdate> =
            self.keys()?.into_iter().map(ElementUpdate::keep).collect();
        elements.push(ElementUpdate::insert(value));
        self.update(elements)
    }

    /// Removes the element identified by `key`.
    pub fn remove(&self, key: StableKey) -> CollabResult<()> {
        let keys = self.keys()?;
        position(&keys, key)?;
        self.update(
            keys.into_iter()
                .filter(|k| *k != key)
                .map(ElementUpdate::keep)
                .collect(),
        )
    }

    /// Moves the element identified by `key` to `index` (after removal).
    pub fn move_element(&self, key: StableKey, index: usize) -> CollabResult<()> {
        let mut keys = self.keys()?;
        let from = position(&keys, key)?;
        keys.remove(from);
        if index > keys.len() {
            return Err(CollabError::index_out_of_bounds(index, keys.len()));
        }
        keys.insert(index, key);
        self.update(keys.into_iter().map(ElementUpdate::keep).collect())
    }
}

impl fmt::Debug for ArrayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayHandle")
            .field("slot", &self.inner.slot)
            .field("element", &self.inner.element.kind())
            .finish()
    }
}

// =============================================================================
// CONDITIONAL
// =============================================================================

/// Structured handle of a conditional node.
#[derive(Clone)]
pub struct ConditionalHandle {
    inner: Rc<ConditionalInner>,
}

struct ConditionalInner {
    slot: Slot,
    values: BTreeMap<String, SchemaRef>,
}

impl ConditionalHandle {
    fn new(conditional: &ConditionalField, slot: Slot) -> Self {
        Self {
            inner: Rc::new(ConditionalInner {
                slot,
                values: conditional.values.clone(),
            }),
        }
    }

    /// Slot of the active branch value.
    pub(crate) fn value_slot(&self) -> Slot {
        self.inner.slot.field("value")
    }

    /// Switches the discriminant.
    ///
    /// Without an explicit value, switching to another branch starts from that
    /// branch's initial value; re-selecting the current branch is a no-op.
    pub fn on_change(
        &self,
        discriminant: impl Into<Value>,
        value: Option<Value>,
    ) -> CollabResult<()> {
        let discriminant = discriminant.into();
        let key = ConditionalField::discriminant_key(&discriminant)?;
        let branch = self.inner.values.get(&key).ok_or_else(|| {
            CollabError::schema_violation(format!(
                "conditional has no branch for discriminant '{}'",
                key
            ))
        })?;

        let current = self.inner.slot.read()?;
        let unchanged = current.get("discriminant") == Some(&discriminant);
        let value = match value {
            Some(value) => value,
            None if unchanged => return Ok(()),
            None => branch.initial_value(),
        };
        self.inner
            .slot
            .write(Value::map([("discriminant", discriminant), ("value", value)]))
    }

    /// Writes the active branch value, keeping the discriminant.
    pub fn on_change_value(&self, value: Value) -> CollabResult<()> {
        self.value_slot().write(value)
    }
}

impl fmt::Debug for ConditionalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalHandle")
            .field("slot", &self.inner.slot)
            .field("branches", &self.inner.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
