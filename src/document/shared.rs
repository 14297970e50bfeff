//! Single-threaded shared handle over a [`DocumentStore`] with deep-change
//! subscriptions.
//!
//! Write channels handed out by the preview engine hold a [`WeakDocument`],
//! so a props tree never keeps the document alive and a listener that owns
//! an engine does not form a reference cycle with it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use automerge::ChangeHash;

use super::store::DocumentStore;
use super::value::{DocPath, DocProp, Value};
use crate::error::{CollabError, CollabResult};

/// Identifies one subscription for [`SharedDocument::unsubscribe`].
pub type SubscriptionId = u64;

type Listener = Rc<dyn Fn(&Value)>;

struct Subscription {
    id: SubscriptionId,
    path: DocPath,
    listener: Listener,
}

struct SharedInner {
    store: RefCell<DocumentStore>,
    subscriptions: RefCell<Vec<Subscription>>,
    next_id: Cell<SubscriptionId>,
}

/// Shared, mutable document handle.
#[derive(Clone)]
pub struct SharedDocument {
    inner: Rc<SharedInner>,
}

/// Non-owning handle, upgraded on every write.
#[derive(Clone)]
pub struct WeakDocument {
    inner: Weak<SharedInner>,
}

impl SharedDocument {
    pub fn new(store: DocumentStore) -> Self {
        Self {
            inner: Rc::new(SharedInner {
                store: RefCell::new(store),
                subscriptions: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    /// Creates a store holding `initial` and wraps it.
    pub fn from_value(initial: &Value) -> CollabResult<Self> {
        Ok(Self::new(DocumentStore::new(initial)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> CollabResult<Self> {
        Ok(Self::new(DocumentStore::from_bytes(bytes)?))
    }

    pub fn downgrade(&self) -> WeakDocument {
        WeakDocument {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn snapshot(&self) -> CollabResult<Value> {
        self.inner.store.borrow_mut().snapshot()
    }

    pub fn value_at(&self, path: &[DocProp]) -> CollabResult<Value> {
        self.inner.store.borrow_mut().value_at(path)
    }

    pub fn save(&self) -> Vec<u8> {
        self.inner.store.borrow_mut().save()
    }

    pub fn get_heads(&self) -> Vec<ChangeHash> {
        self.inner.store.borrow_mut().get_heads()
    }

    pub fn actor_id(&self) -> String {
        self.inner.store.borrow().actor_id()
    }

    pub fn generate_sync_message(&self, their_heads: &[ChangeHash]) -> Option<Vec<u8>> {
        self.inner
            .store
            .borrow_mut()
            .generate_sync_message(their_heads)
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Replaces the value at `path` and notifies affected listeners.
    pub fn set(&self, path: &[DocProp], value: Value) -> CollabResult<()> {
        self.mutate(|store| store.set(path, value))
    }

    /// Merges another document into this one.
    pub fn merge(&self, other: &SharedDocument) -> CollabResult<()> {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return Ok(());
        }
        self.mutate(|store| store.merge(&mut other.inner.store.borrow_mut()))
    }

    pub fn apply_sync_message(&self, msg: &[u8]) -> CollabResult<()> {
        self.mutate(|store| store.apply_sync_message(msg))
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Registers `listener` for any change at or below `path`.
    ///
    /// The listener receives the new value at `path` (`Null` if the path no
    /// longer exists). It runs after the store is released, so it may read
    /// the document or write to it.
    pub fn subscribe<F>(&self, path: DocPath, listener: F) -> SubscriptionId
    where
        F: Fn(&Value) + 'static,
    {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.subscriptions.borrow_mut().push(Subscription {
            id,
            path,
            listener: Rc::new(listener),
        });
        id
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.inner.subscriptions.borrow_mut();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    fn mutate<F>(&self, f: F) -> CollabResult<()>
    where
        F: FnOnce(&mut DocumentStore) -> CollabResult<()>,
    {
        let (before, after) = {
            let mut store = self.inner.store.borrow_mut();
            let before = store.snapshot()?;
            f(&mut store)?;
            (before, store.snapshot()?)
        };
        self.notify(&before, &after);
        Ok(())
    }

    fn notify(&self, before: &Value, after: &Value) {
        let due: Vec<(Listener, Value)> = self
            .inner
            .subscriptions
            .borrow()
            .iter()
            .filter_map(|s| {
                let old = before.at_path(&s.path).ok();
                let new = after.at_path(&s.path).ok();
                let changed = match (old, new) {
                    (Some(a), Some(b)) => !a.same(b),
                    (None, None) => false,
                    _ => true,
                };
                changed.then(|| (s.listener.clone(), new.cloned().unwrap_or_default()))
            })
            .collect();
        tracing::trace!(listeners = due.len(), "notifying document listeners");
        for (listener, value) in due {
            listener(&value);
        }
    }
}

impl WeakDocument {
    pub fn upgrade(&self) -> CollabResult<SharedDocument> {
        self.inner
            .upgrade()
            .map(|inner| SharedDocument { inner })
            .ok_or(CollabError::DocumentClosed)
    }
}

// =============================================================================
// TESTS
// =============================================================================
