//! collab-preview - Incremental preview props for collaboratively edited values.
//!
//! A schema describes the shape of a value stored in an Automerge document.
//! The preview engine turns document snapshots into a props tree, where every
//! node carries its value and a write channel back into the document:
//!
//! - **Incremental**: only nodes whose value changed are recomputed
//! - **Referentially stable**: unchanged subtrees are the same `Rc` as before
//! - **Stable element keys**: array elements keep their key across reorders
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
//! let initial = Value::from(json!({"count": 0, "tags": ["x", "y"]}));
//! let doc = SharedDocument::from_value(&initial).unwrap();
//! let mut engine = PreviewEngine::new(schema, &doc, |_path| ());
//!
//! let props = engine.refresh().unwrap();
//! let tags = props.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
//! let first = &tags.elements[0];
//! first.props.as_form().unwrap().on_change.set("z").unwrap();
//!
//! let next = engine.refresh().unwrap();
//! let next_tags = next.as_object().unwrap().field("tags").unwrap().as_array().unwrap();
//! assert_eq!(next_tags.elements[0].key, first.key);
//! assert!(std::rc::Rc::ptr_eq(&next_tags.elements[1], &tags.elements[1]));
//! ```

pub mod error;

// Shared document module
pub mod document;

// Preview engine module
pub mod preview;

// Re-exports for convenience
pub use document::{DocPath, DocProp, DocumentStore, SharedDocument, Value};
pub use error::{CollabError, CollabResult};
pub use preview::{
    ComponentSchema, EngineOptions, MemoKey, PreviewEngine, PreviewProps, PropsRef, SchemaRef,
    StableKey,
};

#[cfg(feature = "wasm")]
pub use preview::JsPreviewDocument;
