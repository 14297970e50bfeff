//! The preview engine: one schema, one document, one cache tree.
//!
//! # Example
//!
//! ```rust
//! use collab_preview::{ComponentSchema, PreviewEngine, SharedDocument, Value};
//! use serde_json::json;
//!
//! let schema = ComponentSchema::object([
//!     ("count", ComponentSchema::form(0, json!(null))),
//!     ("tags", ComponentSchema::array(ComponentSchema::form("", json!(null)))),
//! ]);
//! let initial = Value::from(json!({"count": 0, "tags": ["x"]}));
//! let doc = SharedDocument::from_value(&initial).unwrap();
//! let mut engine = PreviewEngine::new(schema, &doc, |_path| ());
//!
//! let props = engine.refresh().unwrap();
//! let count = props.as_object().unwrap().field("count").unwrap();
//! count.as_form().unwrap().on_change.set(1).unwrap();
//!
//! let next = engine.refresh().unwrap();
//! let tags = next.as_object().unwrap().field("tags").unwrap();
//! assert!(std::rc::Rc::ptr_eq(tags, props.as_object().unwrap().field("tags").unwrap()));
//! ```

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use super::channel::{Channel, KeyRegistry, Slot};
use super::keys::StableKeys;
use super::memo::{CacheEntry, MemoKey, PassContext};
use super::props::{FactoryContext, PropsRef};
use super::schema::{SchemaKind, SchemaRef};
use crate::document::{display_path, DocPath, DocProp, SharedDocument, Value, WeakDocument};
use crate::error::CollabResult;

/// Resolves a child node's props path to the caller's element handle.
pub type ChildResolver<E> = Box<dyn Fn(&[MemoKey]) -> E>;

/// Runtime options of a [`PreviewEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Document path the schema root describes.
    pub base_path: DocPath,
    /// Drop registry entries of released arrays after each update.
    pub collect_keys: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            base_path: DocPath::new(),
            collect_keys: true,
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: Set the document path of the schema root.
    pub fn with_base_path(mut self, path: DocPath) -> Self {
        self.base_path = path;
        self
    }

    /// Builder: Enable or disable key collection after updates.
    pub fn with_key_collection(mut self, enabled: bool) -> Self {
        self.collect_keys = enabled;
        self
    }
}

/// Counters of the work done by updates since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecomputeStats {
    pub(crate) factory_calls: [u64; SchemaKind::ALL.len()],
    pub cache_hits: u64,
    pub schema_resets: u64,
    pub released_subtrees: u64,
}

impl RecomputeStats {
    /// Props factory invocations for one schema kind.
    pub fn factory_calls(&self, kind: SchemaKind) -> u64 {
        self.factory_calls[kind.index()]
    }

    pub fn total_factory_calls(&self) -> u64 {
        self.factory_calls.iter().sum()
    }
}

/// Derives a props tree from document snapshots, reusing unchanged subtrees.
pub struct PreviewEngine<E> {
    schema: SchemaRef,
    doc: WeakDocument,
    keys: KeyRegistry,
    resolver: ChildResolver<E>,
    options: EngineOptions,
    channel: Channel,
    root: Option<CacheEntry<E>>,
    stats: Cell<RecomputeStats>,
}

impl<E> PreviewEngine<E> {
    pub fn new<F>(schema: SchemaRef, doc: &SharedDocument, resolver: F) -> Self
    where
        F: Fn(&[MemoKey]) -> E + 'static,
    {
        let doc = doc.downgrade();
        let keys: KeyRegistry = Rc::new(RefCell::new(StableKeys::new()));
        let options = EngineOptions::default();
        let channel = root_channel(&schema, &doc, &keys, &options);
        Self {
            schema,
            doc,
            keys,
            resolver: Box::new(resolver),
            options,
            channel,
            root: None,
            stats: Cell::new(RecomputeStats::default()),
        }
    }

    /// Builder: Replace the options. Clears the cache tree.
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.channel = root_channel(&self.schema, &self.doc, &self.keys, &options);
        self.options = options;
        self.root = None;
        self
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Derives props for `value`, the current snapshot at the base path.
    ///
    /// Calling it again with the same value returns the same `Rc`.
    ///
    /// Key collection only releases lists nothing holds any more. Props
    /// returned by earlier calls keep their arrays (and those keys) alive
    /// until the caller drops them.
    pub fn update(&mut self, value: &Value) -> CollabResult<PropsRef<E>> {
        let Self {
            schema,
            keys,
            resolver,
            options,
            channel,
            root,
            stats,
            ..
        } = self;
        let ctx = PassContext {
            factory: FactoryContext {
                resolver: &**resolver,
                keys: &*keys,
            },
            stats: &*stats,
        };

        let props = match root {
            Some(entry) => entry.refresh(schema, value, channel.clone(), &[], &ctx)?,
            None => {
                let entry = CacheEntry::build(schema, value, channel.clone(), &[], &ctx)?;
                let props = entry.props().clone();
                *root = Some(entry);
                props
            }
        };

        if options.collect_keys {
            keys.borrow_mut().collect_garbage();
        }
        Ok(props)
    }

    /// Reads the current snapshot at the base path and updates from it.
    pub fn refresh(&mut self) -> CollabResult<PropsRef<E>> {
        let value = self.doc.upgrade()?.value_at(&self.options.base_path)?;
        self.update(&value)
    }

    /// Writes `value` at `path`, relative to the base path.
    ///
    /// List indexes are resolved to stable keys against the current
    /// document, so the write keeps the keys of every element it passes
    /// through.
    pub fn write(&self, path: &[DocProp], value: Value) -> CollabResult<()> {
        let mut slot = Slot::at_path(
            self.doc.clone(),
            self.keys.clone(),
            self.options.base_path.clone(),
        );
        for prop in path {
            slot = match prop {
                DocProp::Key(name) => slot.field(name),
                DocProp::Index(index) => slot.index(*index)?,
            };
        }
        slot.write(value)
    }

    /// Props returned by the last successful update.
    pub fn props(&self) -> Option<PropsRef<E>> {
        self.root.as_ref().map(|entry| entry.props().clone())
    }

    pub fn stats(&self) -> RecomputeStats {
        self.stats.get()
    }

    pub fn reset_stats(&self) {
        self.stats.set(RecomputeStats::default());
    }

    /// Read access to the stable-key registry.
    pub fn keys(&self) -> Ref<'_, StableKeys> {
        self.keys.borrow()
    }

    /// Number of live cache entries.
    pub fn cache_len(&self) -> usize {
        self.root.as_ref().map_or(0, CacheEntry::len)
    }

    /// Discards the cache tree; the next update rebuilds every node.
    pub fn reset(&mut self) {
        tracing::debug!(base = %display_path(&self.options.base_path), "resetting preview cache");
        self.root = None;
    }
}

fn root_channel(
    schema: &SchemaRef,
    doc: &WeakDocument,
    keys: &KeyRegistry,
    options: &EngineOptions,
) -> Channel {
    let slot = Slot::at_path(doc.clone(), keys.clone(), options.base_path.clone());
    Channel::for_schema(schema, slot)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollabError;
    use crate::preview::schema::{ComponentSchema, FormField};
    use crate::preview::memo::display_memo_path;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> SharedDocument {
        SharedDocument::from_value(&Value::from(value)).unwrap()
    }

    fn wide_schema(n: usize) -> SchemaRef {
        ComponentSchema::object(
            (0..n).map(|i| (format!("f{}", i), ComponentSchema::form(0, json!(null)))),
        )
    }

    #[test]
    fn test_same_value_same_props() {
        let doc = doc(json!({"f0": 1, "f1": 2}));
        let mut engine = PreviewEngine::new(wide_schema(2), &doc, |_| ());
        let value = doc.snapshot().unwrap();

        let first = engine.update(&value).unwrap();
        engine.reset_stats();
        let second = engine.update(&value).unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(engine.stats().total_factory_calls(), 0);
        assert_eq!(engine.stats().cache_hits, 1);
    }

    #[test]
    fn test_single_field_change_recomputes_one_field() {
        let doc = doc(json!({"f0": 0, "f1": 0, "f2": 0, "f3": 0}));
        let mut engine = PreviewEngine::new(wide_schema(4), &doc, |_| ());
        let before = engine.refresh().unwrap();
        engine.reset_stats();

        let object = before.as_object().unwrap();
        object.field("f2").unwrap().as_form().unwrap().on_change.set(5).unwrap();
        let after = engine.refresh().unwrap();

        let stats = engine.stats();
        assert_eq!(stats.factory_calls(SchemaKind::Object), 1);
        assert_eq!(stats.factory_calls(SchemaKind::Form), 1);
        let after_object = after.as_object().unwrap();
        for name in ["f0", "f1", "f3"] {
            assert!(Rc::ptr_eq(object.field(name).unwrap(), after_object.field(name).unwrap()));
        }
        assert_eq!(
            after_object.field("f2").unwrap().as_form().unwrap().value,
            Value::Int(5)
        );
    }

    #[test]
    fn test_schema_swap_rebuilds() {
        let doc = doc(json!({"f0": 0}));
        let mut engine = PreviewEngine::new(wide_schema(1), &doc, |_| ());
        let value = doc.snapshot().unwrap();
        engine.update(&value).unwrap();

        engine.schema = wide_schema(1);
        engine.channel = root_channel(&engine.schema, &engine.doc, &engine.keys, &engine.options);
        engine.reset_stats();
        engine.update(&value).unwrap();
        assert_eq!(engine.stats().schema_resets, 1);
        assert_eq!(engine.stats().factory_calls(SchemaKind::Form), 1);
    }

    #[test]
    fn test_conditional_only_active_branch() {
        let schema = ComponentSchema::object([(
            "c",
            ComponentSchema::conditional(
                FormField::new("no"),
                [
                    (
                        "yes",
                        ComponentSchema::object([("deep", ComponentSchema::form(0, json!(null)))]),
                    ),
                    ("no", ComponentSchema::form("", json!(null))),
                ],
            ),
        )]);
        let doc = doc(json!({"c": {"discriminant": "no", "value": "b"}}));
        let mut engine = PreviewEngine::new(schema, &doc, |_| ());
        let props = engine.refresh().unwrap();
        assert_eq!(engine.stats().factory_calls(SchemaKind::Object), 1);

        let c = props.as_object().unwrap().field("c").unwrap();
        let handle = c.as_conditional().unwrap().on_change.clone();
        handle.on_change_value(Value::from("c")).unwrap();
        engine.refresh().unwrap();
        assert_eq!(engine.stats().factory_calls(SchemaKind::Object), 2);

        handle.on_change("yes", None).unwrap();
        let props = engine.refresh().unwrap();
        assert_eq!(engine.stats().factory_calls(SchemaKind::Object), 4);
        let c = props.as_object().unwrap().field("c").unwrap();
        let branch = &c.as_conditional().unwrap().value;
        assert_eq!(
            branch.as_object().unwrap().field("deep").unwrap().as_form().unwrap().value,
            Value::Int(0)
        );
        assert_eq!(engine.stats().schema_resets, 1);
    }

    #[test]
    fn test_child_resolver_receives_key_path() {
        let schema = ComponentSchema::object([(
            "items",
            ComponentSchema::array(ComponentSchema::object([(
                "body",
                ComponentSchema::child(json!(null)),
            )])),
        )]);
        let doc = doc(json!({"items": [{"body": null}]}));
        let mut engine =
            PreviewEngine::new(schema, &doc, |path: &[MemoKey]| display_memo_path(path));
        let props = engine.refresh().unwrap();

        let items = props.as_object().unwrap().field("items").unwrap().as_array().unwrap();
        let key = items.elements[0].key;
        let body = items.elements[0].props.as_object().unwrap().field("body").unwrap();
        assert_eq!(body.as_child().unwrap().element, format!("/items/#{}/body", key));
        let element = &props.to_json()["fields"]["items"]["elements"][0]["props"];
        assert_eq!(
            element["fields"]["body"]["element"],
            json!(format!("/items/#{}/body", key))
        );
    }

    #[test]
    fn test_value_mismatch_propagates() {
        let doc = doc(json!({"f0": [1]}));
        let schema = ComponentSchema::object([(
            "f0",
            ComponentSchema::object([("x", ComponentSchema::form(0, json!(null)))]),
        )]);
        let mut engine = PreviewEngine::new(schema, &doc, |_| ());
        assert!(matches!(engine.refresh(), Err(CollabError::SchemaViolation(_))));
        assert!(engine.props().is_none());
    }

    #[test]
    fn test_base_path() {
        let doc = doc(json!({"page": {"f0": 3}}));
        let mut engine = PreviewEngine::new(wide_schema(1), &doc, |_| ())
            .with_options(EngineOptions::new().with_base_path(vec!["page".into()]));
        let props = engine.refresh().unwrap();
        let f0 = props.as_object().unwrap().field("f0").unwrap();
        assert_eq!(f0.as_form().unwrap().value, Value::Int(3));

        f0.as_form().unwrap().on_change.set(4).unwrap();
        assert_eq!(doc.value_at(&["page".into(), "f0".into()]).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_reset_rebuilds_everything() {
        let doc = doc(json!({"f0": 0, "f1": 0}));
        let mut engine = PreviewEngine::new(wide_schema(2), &doc, |_| ());
        let first = engine.refresh().unwrap();
        assert_eq!(engine.cache_len(), 3);

        engine.reset();
        assert_eq!(engine.cache_len(), 0);
        let second = engine.refresh().unwrap();
        assert!(!Rc::ptr_eq(&first, &second));
    }

    fn tags_schema() -> SchemaRef {
        ComponentSchema::object([(
            "tags",
            ComponentSchema::array(ComponentSchema::form("", json!(null))),
        )])
    }

    #[test]
    fn test_index_write_keeps_element_keys() {
        let doc = doc(json!({"tags": ["x", "y"]}));
        let mut engine = PreviewEngine::new(tags_schema(), &doc, |_| ());
        let before = engine.refresh().unwrap();
        let tags = before.as_object().unwrap().field("tags").unwrap().as_array().unwrap();

        engine.write(&["tags".into(), 0.into()], Value::from("z")).unwrap();
        let after = engine.refresh().unwrap();

        let after_tags = after.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
        assert_eq!(after_tags.keys(), tags.keys());
        assert_eq!(after_tags.elements[0].props.as_form().unwrap().value, Value::from("z"));
        assert!(Rc::ptr_eq(&after_tags.elements[1], &tags.elements[1]));
    }

    #[test]
    fn test_write_below_element_and_base_path() {
        let schema = ComponentSchema::object([(
            "items",
            ComponentSchema::array(ComponentSchema::object([(
                "name",
                ComponentSchema::form("", json!(null)),
            )])),
        )]);
        let doc = doc(json!({"page": {"items": [{"name": "a"}, {"name": "b"}]}}));
        let mut engine = PreviewEngine::new(schema, &doc, |_| ())
            .with_options(EngineOptions::new().with_base_path(vec!["page".into()]));
        let before = engine.refresh().unwrap();
        let items = before.as_object().unwrap().field("items").unwrap().as_array().unwrap();

        engine
            .write(&["items".into(), 1.into(), "name".into()], Value::from("B"))
            .unwrap();
        assert_eq!(
            doc.value_at(&["page".into(), "items".into()]).unwrap(),
            Value::from(json!([{"name": "a"}, {"name": "B"}]))
        );
        let after = engine.refresh().unwrap();
        let after_items = after.as_object().unwrap().field("items").unwrap().as_array().unwrap();
        assert_eq!(after_items.keys(), items.keys());

        assert!(matches!(
            engine.write(&["items".into(), 5.into()], Value::Null),
            Err(CollabError::IndexOutOfBounds { index: 5, length: 2 })
        ));
    }

    #[test]
    fn test_remote_list_edit_inherits_keys() {
        let doc = doc(json!({"tags": ["x", "y"]}));
        let peer = SharedDocument::from_bytes(&doc.save()).unwrap();
        let mut engine = PreviewEngine::new(tags_schema(), &doc, |_| ());
        let before = engine.refresh().unwrap();
        let tags = before.as_object().unwrap().field("tags").unwrap().as_array().unwrap();

        peer.set(&["tags".into(), 0.into()], Value::from("z")).unwrap();
        doc.merge(&peer).unwrap();
        let after = engine.refresh().unwrap();

        let after_tags = after.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
        assert_eq!(after_tags.keys(), tags.keys());
        assert!(Rc::ptr_eq(&after_tags.elements[1], &tags.elements[1]));

        // a remote insert changes the length; keys start over
        peer.set(&["tags".into()], Value::from(json!(["w", "z", "y"]))).unwrap();
        doc.merge(&peer).unwrap();
        let grown = engine.refresh().unwrap();
        let grown_tags = grown.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
        assert_eq!(grown_tags.elements.len(), 3);
        assert!(grown_tags.keys().iter().all(|k| !tags.keys().contains(k)));
    }

    #[test]
    fn test_refresh_after_document_dropped() {
        let doc = doc(json!({"f0": 0}));
        let mut engine = PreviewEngine::new(wide_schema(1), &doc, |_| ());
        drop(doc);
        assert!(matches!(engine.refresh(), Err(CollabError::DocumentClosed)));
    }
}
