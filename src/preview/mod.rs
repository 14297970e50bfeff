//! Preview engine module.
//!
//! Derives a tree of preview props (value, write channel, nested children)
//! from a schema and a document snapshot, recomputing only what changed.

pub mod schema;
pub mod keys;
pub mod channel;
pub mod props;
pub mod memo;
pub mod engine;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-exports for convenience
pub use channel::{
    ArrayHandle, Channel, ConditionalHandle, ElementUpdate, FormChannel, ObjectHandle, Slot,
};
pub use engine::{ChildResolver, EngineOptions, PreviewEngine, RecomputeStats};
pub use keys::{StableKey, StableKeys};
pub use memo::{display_memo_path, MemoKey};
pub use props::{
    ArrayProps, ChildProps, ConditionalProps, FormProps, KeyedElement, ObjectProps, PreviewProps,
    PropsRef,
};
pub use schema::{
    ArrayField, ChildField, ComponentSchema, ConditionalField, FormField, ObjectField, SchemaKind,
    SchemaRef,
};

#[cfg(feature = "wasm")]
pub use wasm::JsPreviewDocument;
