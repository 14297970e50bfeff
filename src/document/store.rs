//! Automerge-backed document store with structurally shared snapshots.
//!
//! This module provides the `DocumentStore` struct that wraps an Automerge
//! document and provides:
//! - Snapshot reads as immutable `Value` trees (via autosurgeon hydrate)
//! - Scoped writes at a path (via autosurgeon `reconcile_prop`)
//! - Sync operations (merge, incremental sync messages)

use std::borrow::Cow;

use automerge::{AutoCommit, ChangeHash, ObjId, ReadDoc, Value as AmValue, ROOT};
use autosurgeon::{hydrate, reconcile, reconcile_prop, Prop};

use super::value::{display_path, DocProp, Value};
use crate::error::{CollabError, CollabResult};

/// The shared mutable store the preview engine reads from and writes into.
///
/// # Caching Strategy
///
/// - `cached_state`: the last snapshot handed out. Local writes patch it along
///   the written path, so the exact written value becomes part of the next
///   snapshot. Remote changes mark it stale; the next read re-hydrates and
///   shares every unchanged subtree with the previous snapshot.
pub struct DocumentStore {
    doc: AutoCommit,
    cached_state: Value,
    /// Set after merge/sync; the document may differ from `cached_state`.
    stale: bool,
}

impl DocumentStore {
    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Creates a new document holding `initial`, which must be a map.
    pub fn new(initial: &Value) -> CollabResult<Self> {
        if initial.as_map().is_none() {
            return Err(CollabError::schema_violation(format!(
                "document root must be a map, got {}",
                initial.kind_name()
            )));
        }
        let mut doc = AutoCommit::new();
        reconcile(&mut doc, initial)?;
        Ok(Self {
            doc,
            cached_state: initial.clone(),
            stale: false,
        })
    }

    /// Creates a DocumentStore from saved binary data.
    pub fn from_bytes(bytes: &[u8]) -> CollabResult<Self> {
        let doc = AutoCommit::load(bytes)?;
        let state: Value = hydrate(&doc)?;
        Ok(Self {
            doc,
            cached_state: state,
            stale: false,
        })
    }

    /// Saves the document to binary format.
    pub fn save(&mut self) -> Vec<u8> {
        self.doc.save()
    }

    /// Returns the current heads (for sync protocol).
    pub fn get_heads(&mut self) -> Vec<ChangeHash> {
        self.doc.get_heads()
    }

    /// Gets the actor ID for this document instance.
    pub fn actor_id(&self) -> String {
        self.doc.get_actor().to_hex_string()
    }

    // =========================================================================
    // SNAPSHOT READS
    // =========================================================================

    /// Returns the current snapshot of the whole document.
    pub fn snapshot(&mut self) -> CollabResult<Value> {
        if self.stale {
            let fresh: Value = hydrate(&self.doc)?;
            self.cached_state = Value::share(&self.cached_state, fresh);
            self.stale = false;
        }
        Ok(self.cached_state.clone())
    }

    /// Returns the snapshot of the subtree at `path`.
    pub fn value_at(&mut self, path: &[DocProp]) -> CollabResult<Value> {
        let state = self.snapshot()?;
        state.at_path(path).cloned()
    }

    // =========================================================================
    // SCOPED WRITES
    // =========================================================================

    /// Replaces the value at `path`.
    ///
    /// The parent of `path` must exist. Writing the root requires a map.
    pub fn set(&mut self, path: &[DocProp], value: Value) -> CollabResult<()> {
        let state = self.snapshot()?;
        let next = state.replace_at(path, value.clone())?;
        match path.split_last() {
            None => {
                if value.as_map().is_none() {
                    return Err(CollabError::schema_violation(format!(
                        "document root must be a map, got {}",
                        value.kind_name()
                    )));
                }
                reconcile(&mut self.doc, &value)?;
            }
            Some((last, parent)) => {
                let obj = self.obj_at(parent)?;
                reconcile_prop(&mut self.doc, &obj, to_prop(last), &value)?;
            }
        }
        tracing::debug!(path = %display_path(path), kind = value.kind_name(), "document write");
        self.cached_state = next;
        Ok(())
    }

    // =========================================================================
    // SYNC OPERATIONS
    // =========================================================================

    /// Merges another document into this one.
    pub fn merge(&mut self, other: &mut Self) -> CollabResult<()> {
        self.doc.merge(&mut other.doc)?;
        self.stale = true;
        tracing::debug!(actor = %self.actor_id(), "merged remote document");
        Ok(())
    }

    /// Generates sync message for incremental sync.
    /// Returns None if there are no changes since their_heads.
    pub fn generate_sync_message(&mut self, their_heads: &[ChangeHash]) -> Option<Vec<u8>> {
        let changes = self.doc.get_changes(their_heads);
        if changes.is_empty() {
            return None;
        }
        let mut bytes = Vec::new();
        for change in changes {
            bytes.extend_from_slice(change.raw_bytes());
        }
        Some(bytes)
    }

    /// Applies sync message from peer.
    pub fn apply_sync_message(&mut self, msg: &[u8]) -> CollabResult<()> {
        self.doc.load_incremental(msg)?;
        self.stale = true;
        tracing::debug!(bytes = msg.len(), "applied sync message");
        Ok(())
    }

    // =========================================================================
    // INTERNAL HELPERS
    // =========================================================================

    /// Walks `path` from the root, requiring an object at every step.
    fn obj_at(&self, path: &[DocProp]) -> CollabResult<ObjId> {
        let mut obj = ROOT;
        for (depth, prop) in path.iter().enumerate() {
            let found = match prop {
                DocProp::Key(key) => self.doc.get(&obj, key.as_str()),
                DocProp::Index(index) => self.doc.get(&obj, *index),
            };
            obj = match found {
                Ok(Some((AmValue::Object(_), obj_id))) => obj_id,
                Ok(Some(_)) => {
                    return Err(CollabError::schema_violation(format!(
                        "'{}' is not an object",
                        display_path(&path[..=depth])
                    )))
                }
                Ok(None) => {
                    return Err(CollabError::path_not_found(display_path(&path[..=depth])))
                }
                Err(e) => return Err(CollabError::Automerge(e)),
            };
        }
        Ok(obj)
    }
}

fn to_prop(prop: &DocProp) -> Prop<'_> {
    match prop {
        DocProp::Key(key) => Prop::Key(Cow::Borrowed(key.as_str())),
        DocProp::Index(index) => Prop::Index(*index as u32),
    }
}

// =============================================================================
// TESTS
// =============================================================================
