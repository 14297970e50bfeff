//! WASM bindings for the preview engine.
//!
//! `JsPreviewDocument` pairs a collaborative document with a preview engine so
//! a browser editor can read the props tree as plain JS objects and push
//! edits or sync messages back in.

use automerge::ChangeHash;
use js_sys::{Array, Uint8Array};
use serde::Serialize;
use serde_wasm_bindgen::{from_value, Serializer};
use wasm_bindgen::prelude::*;

use crate::document::{DocPath, DocProp, SharedDocument, Value};
use crate::preview::engine::PreviewEngine;
use crate::preview::memo::MemoKey;
use crate::preview::schema::{ComponentSchema, SchemaRef};
use crate::CollabError;

/// Serialize a value to JsValue with maps as plain JS objects (not Map).
fn to_js_value<T: Serialize>(value: &T) -> Result<JsValue, serde_wasm_bindgen::Error> {
    value.serialize(&Serializer::new().serialize_maps_as_objects(true))
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

/// Helper macro for Result conversion
macro_rules! js_result {
    ($expr:expr) => {
        $expr.map_err(|e: CollabError| JsValue::from_str(&e.to_string()))
    };
}

/// Child elements are identified by their props path, e.g. `items/#3/body`.
fn element_id(path: &[MemoKey]) -> String {
    path.iter()
        .map(|key| key.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_path(path: JsValue) -> Result<DocPath, JsValue> {
    let segments: Vec<serde_json::Value> = from_value(path)?;
    segments
        .into_iter()
        .map(|segment| match segment {
            serde_json::Value::String(key) => Ok(DocProp::Key(key)),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(|i| DocProp::Index(i as usize))
                .ok_or_else(|| JsValue::from_str(&format!("invalid index: {}", n))),
            other => Err(JsValue::from_str(&format!("invalid path segment: {}", other))),
        })
        .collect()
}

// =============================================================================
// MAIN WRAPPER TYPE
// =============================================================================

/// JavaScript-friendly preview document.
#[wasm_bindgen]
pub struct JsPreviewDocument {
    doc: SharedDocument,
    engine: PreviewEngine<String>,
}

impl JsPreviewDocument {
    fn with_doc(schema: SchemaRef, doc: SharedDocument) -> Self {
        let engine = PreviewEngine::new(schema, &doc, element_id);
        Self { doc, engine }
    }
}

#[wasm_bindgen]
impl JsPreviewDocument {
    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Creates a document from a JSON schema and an initial value.
    ///
    /// # Example (JavaScript)
    /// ```js
    /// const doc = new JsPreviewDocument(JSON.stringify(schema), { count: 0, tags: [] });
    /// ```
    #[wasm_bindgen(constructor)]
    pub fn new(schema: &str, initial: JsValue) -> Result<JsPreviewDocument, JsValue> {
        let schema = js_result!(ComponentSchema::from_json(schema))?;
        let initial: serde_json::Value = from_value(initial)?;
        let doc = js_result!(SharedDocument::from_value(&Value::from(initial)))?;
        Ok(Self::with_doc(schema, doc))
    }

    /// Loads from binary bytes (Uint8Array).
    #[wasm_bindgen(js_name = fromBytes)]
    pub fn from_bytes(schema: &str, bytes: &[u8]) -> Result<JsPreviewDocument, JsValue> {
        let schema = js_result!(ComponentSchema::from_json(schema))?;
        let doc = js_result!(SharedDocument::from_bytes(bytes))?;
        Ok(Self::with_doc(schema, doc))
    }

    /// Saves to binary bytes (returns Uint8Array).
    #[wasm_bindgen(js_name = toBytes)]
    pub fn to_bytes(&self) -> Uint8Array {
        let bytes = self.doc.save();
        Uint8Array::from(&bytes[..])
    }

    /// Gets the actor ID for this document instance.
    #[wasm_bindgen(js_name = actorId)]
    pub fn actor_id(&self) -> String {
        self.doc.actor_id()
    }

    /// Gets the current heads (for sync protocol).
    #[wasm_bindgen(js_name = getHeads)]
    pub fn get_heads(&self) -> Array {
        self.doc
            .get_heads()
            .into_iter()
            .map(|h| JsValue::from_str(&h.to_string()))
            .collect()
    }

    // =========================================================================
    // PREVIEW
    // =========================================================================

    /// Returns the props tree for the current document state.
    ///
    /// # Example (JavaScript)
    /// ```js
    /// const props = doc.props();
    /// console.log(props.fields.tags.elements.map(e => e.key));
    /// ```
    pub fn props(&mut self) -> Result<JsValue, JsValue> {
        let props = js_result!(self.engine.refresh())?;
        Ok(to_js_value(&props.to_json())?)
    }

    /// Writes `value` at `path` (an array of field names and indices).
    ///
    /// Indices address the element currently at that position; it keeps its
    /// stable key.
    ///
    /// # Example (JavaScript)
    /// ```js
    /// doc.setValue(['tags', 0], 'z');
    /// ```
    #[wasm_bindgen(js_name = setValue)]
    pub fn set_value(&mut self, path: JsValue, value: JsValue) -> Result<(), JsValue> {
        let path = parse_path(path)?;
        let value: serde_json::Value = from_value(value)?;
        js_result!(self.engine.write(&path, Value::from(value)))
    }

    // =========================================================================
    // SYNC
    // =========================================================================

    /// Returns the changes the peer with `their_heads` is missing, or null.
    #[wasm_bindgen(js_name = generateSyncMessage)]
    pub fn generate_sync_message(&self, their_heads: Array) -> Result<JsValue, JsValue> {
        let heads: Vec<ChangeHash> = their_heads
            .iter()
            .filter_map(|v| {
                v.as_string().and_then(|s| {
                    let bytes = hex::decode(&s).ok()?;
                    let arr: [u8; 32] = bytes.try_into().ok()?;
                    Some(ChangeHash(arr))
                })
            })
            .collect();

        match self.doc.generate_sync_message(&heads) {
            Some(bytes) => Ok(Uint8Array::from(&bytes[..]).into()),
            None => Ok(JsValue::NULL),
        }
    }

    /// Applies changes received from a peer.
    #[wasm_bindgen(js_name = applySyncMessage)]
    pub fn apply_sync_message(&mut self, msg: &[u8]) -> Result<(), JsValue> {
        js_result!(self.doc.apply_sync_message(msg))
    }
}
