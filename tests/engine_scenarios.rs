//! End-to-end scenarios: document writes and remote merges driving the
//! preview engine through change notifications.

use std::cell::RefCell;
use std::rc::Rc;

use collab_preview::preview::channel::ElementUpdate;
use collab_preview::preview::schema::{FormField, SchemaKind};
use collab_preview::{ComponentSchema, PreviewEngine, PropsRef, SchemaRef, SharedDocument, Value};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

fn doc(value: serde_json::Value) -> SharedDocument {
    SharedDocument::from_value(&Value::from(value)).unwrap()
}

fn count_and_tags() -> SchemaRef {
    ComponentSchema::object([
        ("count", ComponentSchema::form(0, json!({"label": "Count"}))),
        ("tags", ComponentSchema::array(ComponentSchema::form("", json!(null)))),
    ])
}

/// Wires an engine to the document the way an editor would: every change
/// notification re-renders, and the latest props are kept for inspection.
struct Harness {
    engine: Rc<RefCell<PreviewEngine<()>>>,
    latest: Rc<RefCell<Option<PropsRef<()>>>>,
}

impl Harness {
    fn new(schema: SchemaRef, doc: &SharedDocument) -> Self {
        let engine = Rc::new(RefCell::new(PreviewEngine::new(schema, doc, |_| ())));
        let latest = Rc::new(RefCell::new(Some(engine.borrow_mut().refresh().unwrap())));
        {
            let engine = engine.clone();
            let latest = latest.clone();
            doc.subscribe(vec![], move |_| {
                let props = engine.borrow_mut().refresh().unwrap();
                *latest.borrow_mut() = Some(props);
            });
        }
        Self { engine, latest }
    }

    fn props(&self) -> PropsRef<()> {
        self.latest.borrow().clone().unwrap()
    }
}

#[test]
fn test_end_to_end_element_edit() {
    init_tracing();
    let doc = doc(json!({"count": 0, "tags": ["x", "y"]}));
    let harness = Harness::new(count_and_tags(), &doc);

    let before = harness.props();
    let object = before.as_object().unwrap();
    assert_eq!(object.field("count").unwrap().as_form().unwrap().value, Value::Int(0));
    let tags = object.field("tags").unwrap().as_array().unwrap();
    assert_eq!(tags.elements.len(), 2);
    let (k0, k1) = (tags.elements[0].key, tags.elements[1].key);
    assert_ne!(k0, k1);

    tags.elements[0].props.as_form().unwrap().on_change.set("z").unwrap();

    let after = harness.props();
    assert!(!Rc::ptr_eq(&before, &after));
    assert_eq!(doc.snapshot().unwrap(), Value::from(json!({"count": 0, "tags": ["z", "y"]})));

    let after_object = after.as_object().unwrap();
    assert!(Rc::ptr_eq(object.field("count").unwrap(), after_object.field("count").unwrap()));
    let after_tags = after_object.field("tags").unwrap().as_array().unwrap();
    assert_eq!(after_tags.elements[0].key, k0);
    assert_eq!(
        after_tags.elements[0].props.as_form().unwrap().value,
        Value::from("z")
    );
    assert!(Rc::ptr_eq(&after_tags.elements[1], &tags.elements[1]));
}

#[test]
fn test_unchanged_value_returns_same_tree() {
    let doc = doc(json!({"count": 1, "tags": ["a"]}));
    let mut engine = PreviewEngine::new(count_and_tags(), &doc, |_| ());
    let first = engine.refresh().unwrap();
    let second = engine.refresh().unwrap();
    assert!(Rc::ptr_eq(&first, &second));
}

#[test]
fn test_cost_locality_in_wide_object() {
    let n = 50;
    let schema = ComponentSchema::object(
        (0..n).map(|i| (format!("f{}", i), ComponentSchema::form("", json!(null)))),
    );
    let initial: serde_json::Map<String, serde_json::Value> =
        (0..n).map(|i| (format!("f{}", i), json!(format!("v{}", i)))).collect();
    let doc = doc(serde_json::Value::Object(initial));
    let harness = Harness::new(schema, &doc);

    let before = harness.props();
    harness.engine.borrow().reset_stats();
    doc.set(&["f17".into()], Value::from("changed")).unwrap();
    let after = harness.props();

    let stats = harness.engine.borrow().stats();
    assert_eq!(stats.factory_calls(SchemaKind::Form), 1);
    assert_eq!(stats.factory_calls(SchemaKind::Object), 1);
    assert_eq!(stats.cache_hits, (n - 1) as u64);

    let (old, new) = (before.as_object().unwrap(), after.as_object().unwrap());
    for (i, ((_, a), (_, b))) in old.fields.iter().zip(new.fields.iter()).enumerate() {
        assert_eq!(Rc::ptr_eq(a, b), i != 17, "field f{}", i);
    }
}

#[test]
fn test_keys_follow_elements_across_reorder() {
    let doc = doc(json!({"count": 0, "tags": ["a", "b", "c"]}));
    let harness = Harness::new(count_and_tags(), &doc);

    let before = harness.props();
    let tags = before.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
    let keys = tags.keys();
    let (k1, k2, k3) = (keys[0], keys[1], keys[2]);

    tags.on_change
        .update(vec![
            ElementUpdate::keep(k3),
            ElementUpdate::keep(k1),
            ElementUpdate::keep(k2),
        ])
        .unwrap();

    let after = harness.props();
    let after_tags = after.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
    assert_eq!(after_tags.keys(), vec![k3, k1, k2]);
    let values: Vec<Value> = after_tags
        .elements
        .iter()
        .map(|e| e.props.as_form().unwrap().value.clone())
        .collect();
    assert_eq!(values, vec![Value::from("c"), Value::from("a"), Value::from("b")]);
    assert!(Rc::ptr_eq(&after_tags.elements[0], &tags.elements[2]));
    assert!(Rc::ptr_eq(&after_tags.elements[1], &tags.elements[0]));

    // handles taken before the reorder still address their element
    tags.elements[0].props.as_form().unwrap().on_change.set("A").unwrap();
    assert_eq!(
        doc.value_at(&["tags".into()]).unwrap(),
        Value::from(json!(["c", "A", "b"]))
    );
}

#[test]
fn test_removed_key_is_collected() {
    let doc = doc(json!({"count": 0, "tags": ["a", "b", "c"]}));
    let harness = Harness::new(count_and_tags(), &doc);

    let before = harness.props();
    let tags = before.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
    let handle = tags.on_change.clone();
    let k2 = tags.elements[1].key;
    assert!(harness.engine.borrow().keys().contains_key(k2));
    assert_eq!(harness.engine.borrow().cache_len(), 6);
    // `before` holds the pre-removal list; its keys stay live until it goes
    drop(before);

    handle.remove(k2).unwrap();

    let after = harness.props();
    let after_tags = after.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
    assert!(!after_tags.keys().contains(&k2));

    let engine = harness.engine.borrow();
    assert!(!engine.keys().contains_key(k2));
    assert_eq!(engine.cache_len(), 5);
    assert_eq!(engine.stats().released_subtrees, 1);
}

#[test]
fn test_inactive_branch_is_never_built() {
    let schema = ComponentSchema::object([(
        "media",
        ComponentSchema::conditional(
            FormField::new("no"),
            [
                (
                    "yes",
                    ComponentSchema::object([("url", ComponentSchema::form("", json!(null)))]),
                ),
                ("no", ComponentSchema::form("", json!(null))),
            ],
        ),
    )]);
    let doc = doc(json!({"media": {"discriminant": "no", "value": "caption"}}));
    let harness = Harness::new(schema, &doc);

    for i in 0..3 {
        doc.set(
            &["media".into(), "value".into()],
            Value::from(format!("caption {}", i)),
        )
        .unwrap();
    }

    let stats = harness.engine.borrow().stats();
    // one root object per render; the `yes` branch object was never built
    assert_eq!(stats.factory_calls(SchemaKind::Object), 4);
    assert_eq!(stats.factory_calls(SchemaKind::Conditional), 4);
    let props = harness.props();
    let media = props.as_object().unwrap().field("media").unwrap().as_conditional().unwrap();
    assert_eq!(media.discriminant, Value::from("no"));
    assert_eq!(media.value.as_form().unwrap().value, Value::from("caption 2"));
}

#[test]
fn test_remote_merge_keeps_untouched_subtrees() {
    let doc = doc(json!({"count": 0, "tags": ["x", "y"]}));
    let peer = SharedDocument::from_bytes(&doc.save()).unwrap();
    let harness = Harness::new(count_and_tags(), &doc);
    let before = harness.props();

    peer.set(&["count".into()], Value::from(5)).unwrap();
    doc.merge(&peer).unwrap();

    let after = harness.props();
    let (old, new) = (before.as_object().unwrap(), after.as_object().unwrap());
    assert_eq!(new.field("count").unwrap().as_form().unwrap().value, Value::Int(5));
    assert!(Rc::ptr_eq(old.field("tags").unwrap(), new.field("tags").unwrap()));
}

#[test]
fn test_remote_element_edit_keeps_sibling_identity() {
    let doc = doc(json!({"count": 0, "tags": ["x", "y"]}));
    let peer = SharedDocument::from_bytes(&doc.save()).unwrap();
    let harness = Harness::new(count_and_tags(), &doc);
    let before = harness.props();
    let tags = before.as_object().unwrap().field("tags").unwrap().as_array().unwrap();

    peer.set(&["tags".into(), 0.into()], Value::from("z")).unwrap();
    doc.merge(&peer).unwrap();

    let after = harness.props();
    let after_tags = after.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
    assert_eq!(after_tags.keys(), tags.keys());
    assert_eq!(after_tags.elements[0].props.as_form().unwrap().value, Value::from("z"));
    assert!(Rc::ptr_eq(&after_tags.elements[1], &tags.elements[1]));

    // handles from before the merge still address their element
    tags.elements[1].props.as_form().unwrap().on_change.set("Y").unwrap();
    assert_eq!(
        doc.value_at(&["tags".into()]).unwrap(),
        Value::from(json!(["z", "Y"]))
    );
}

#[test]
fn test_indexed_document_write_keeps_keys() {
    let doc = doc(json!({"count": 0, "tags": ["x", "y"]}));
    let harness = Harness::new(count_and_tags(), &doc);
    let before = harness.props();
    let tags = before.as_object().unwrap().field("tags").unwrap().as_array().unwrap();

    doc.set(&["tags".into(), 0.into()], Value::from("z")).unwrap();
    doc.set(&["tags".into(), 1.into()], Value::from("w")).unwrap();

    let after = harness.props();
    let after_tags = after.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
    assert_eq!(after_tags.keys(), tags.keys());
    let values: Vec<Value> = after_tags
        .elements
        .iter()
        .map(|e| e.props.as_form().unwrap().value.clone())
        .collect();
    assert_eq!(values, vec![Value::from("z"), Value::from("w")]);
}

#[test]
fn test_sync_message_updates_props() {
    let doc = doc(json!({"count": 0, "tags": []}));
    let peer = SharedDocument::from_bytes(&doc.save()).unwrap();
    let harness = Harness::new(count_and_tags(), &doc);
    let heads = doc.get_heads();

    peer.set(&["tags".into()], Value::from(json!(["remote"]))).unwrap();
    let msg = peer.generate_sync_message(&heads).unwrap();
    doc.apply_sync_message(&msg).unwrap();

    let props = harness.props();
    let tags = props.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
    assert_eq!(tags.elements.len(), 1);
    assert_eq!(tags.elements[0].props.as_form().unwrap().value, Value::from("remote"));
}

#[test]
fn test_props_json_rendering() {
    let doc = doc(json!({"count": 3, "tags": ["a"]}));
    let mut engine = PreviewEngine::new(count_and_tags(), &doc, |_| ());
    let props = engine.refresh().unwrap();
    let tags = props.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
    let key = tags.elements[0].key;

    assert_eq!(
        props.to_json(),
        json!({
            "kind": "object",
            "fields": {
                "count": {"kind": "form", "value": 3, "options": {"label": "Count"}},
                "tags": {
                    "kind": "array",
                    "elements": [
                        {
                            "key": key.as_u64(),
                            "props": {"kind": "form", "value": "a", "options": null}
                        }
                    ]
                }
            }
        })
    );
}
