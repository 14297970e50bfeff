//! Shared document module.
//!
//! Provides the Automerge-backed store the preview engine reads snapshots
//! from and writes back into.

pub mod value;
pub mod store;
pub mod shared;

// Re-exports for convenience
pub use value::{display_path, DocPath, DocProp, ListValue, MapValue, Value};
pub use store::DocumentStore;
pub use shared::{SharedDocument, SubscriptionId, WeakDocument};
