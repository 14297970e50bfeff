//! Stable keys for array elements.
//!
//! Keys are attached to an array value by identity: the same `Arc` always
//! yields the same key sequence, while a structurally equal but distinct list
//! gets fresh keys. Code that derives a new list from an old one carries the
//! keys over with [`StableKeys::carry_forward`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::document::{ListValue, Value};
use crate::error::{CollabError, CollabResult};

/// Identity of one conceptual array element, independent of its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StableKey(u64);

impl StableKey {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct KeyedList {
    list: Weak<Vec<Value>>,
    keys: Arc<[StableKey]>,
}

/// Side table from array identity to element keys.
///
/// Entries hold only a weak reference to their list, so the registry never
/// keeps a snapshot alive. [`StableKeys::collect_garbage`] drops entries whose
/// list has been released.
#[derive(Default)]
pub struct StableKeys {
    next: u64,
    by_list: HashMap<usize, KeyedList>,
}

impl StableKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a key that has never been handed out by this registry.
    pub fn fresh_key(&mut self) -> StableKey {
        let key = StableKey(self.next);
        self.next += 1;
        key
    }

    /// Returns the keys associated with `list`, assigning fresh ones on first sight.
    pub fn keys_for(&mut self, list: &ListValue) -> Arc<[StableKey]> {
        let id = list_id(list);
        if let Some(entry) = self.by_list.get(&id) {
            if entry.list.strong_count() > 0 {
                return entry.keys.clone();
            }
        }
        let keys: Arc<[StableKey]> = (0..list.len()).map(|_| self.fresh_key()).collect();
        self.by_list.insert(
            id,
            KeyedList {
                list: Arc::downgrade(list),
                keys: keys.clone(),
            },
        );
        keys
    }

    /// Associates `keys` with a list derived from another one.
    ///
    /// The key count must match the list length and keys must be distinct.
    pub fn carry_forward(&mut self, list: &ListValue, keys: Vec<StableKey>) -> CollabResult<()> {
        if keys.len() != list.len() {
            return Err(CollabError::schema_violation(format!(
                "{} keys supplied for a list of {} elements",
                keys.len(),
                list.len()
            )));
        }
        let mut seen = HashSet::with_capacity(keys.len());
        if let Some(dup) = keys.iter().find(|key| !seen.insert(**key)) {
            return Err(CollabError::schema_violation(format!(
                "stable key {} used for two elements",
                dup
            )));
        }
        self.by_list.insert(
            list_id(list),
            KeyedList {
                list: Arc::downgrade(list),
                keys: keys.into(),
            },
        );
        Ok(())
    }

    /// Keys for `list`, inheriting `previous` by position when the list has
    /// no keys yet and the same length.
    ///
    /// Lists rehydrated after a merge or sync are new allocations; this keeps
    /// the keys of elements that a remote edit left in place.
    pub fn inherit(
        &mut self,
        list: &ListValue,
        previous: Option<&Arc<[StableKey]>>,
    ) -> CollabResult<Arc<[StableKey]>> {
        match previous {
            Some(previous) if previous.len() == list.len() && !self.is_keyed(list) => {
                self.carry_forward(list, previous.to_vec())?;
                Ok(previous.clone())
            }
            _ => Ok(self.keys_for(list)),
        }
    }

    /// Drops entries whose list is no longer reachable. Returns how many went.
    pub fn collect_garbage(&mut self) -> usize {
        let before = self.by_list.len();
        self.by_list.retain(|_, entry| entry.list.strong_count() > 0);
        let released = before - self.by_list.len();
        if released > 0 {
            tracing::trace!(released, live = self.by_list.len(), "collected stable keys");
        }
        released
    }

    /// Whether `list` already has keys (assigned or carried forward).
    pub fn is_keyed(&self, list: &ListValue) -> bool {
        self.by_list
            .get(&list_id(list))
            .map_or(false, |entry| entry.list.strong_count() > 0)
    }

    /// Whether any live list still references `key`.
    ///
    /// A list stays live while anything holds it, including props trees
    /// returned by earlier updates (`ArrayProps::value`). Keys of a removed
    /// element remain reported until those are dropped too.
    pub fn contains_key(&self, key: StableKey) -> bool {
        self.by_list
            .values()
            .filter(|entry| entry.list.strong_count() > 0)
            .any(|entry| entry.keys.contains(&key))
    }

    /// Number of lists with an entry (live or not yet collected).
    pub fn len(&self) -> usize {
        self.by_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_list.is_empty()
    }
}

// The weak reference in the entry keeps the allocation (not the value) alive,
// so an address cannot be reused while its entry exists.
fn list_id(list: &ListValue) -> usize {
    Arc::as_ptr(list) as usize
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> ListValue {
        Arc::new(items.iter().map(|s| Value::from(*s)).collect())
    }

    #[test]
    fn test_same_list_same_keys() {
        let mut keys = StableKeys::new();
        let a = list(&["x", "y"]);
        let first = keys.keys_for(&a);
        let second = keys.keys_for(&a.clone());
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_ne!(first[0], first[1]);
    }

    #[test]
    fn test_equal_lists_get_independent_keys() {
        let mut keys = StableKeys::new();
        let a = list(&["x"]);
        let b = list(&["x"]);
        assert_ne!(keys.keys_for(&a)[0], keys.keys_for(&b)[0]);
    }

    #[test]
    fn test_carry_forward_reorder() {
        let mut keys = StableKeys::new();
        let old = list(&["a", "b", "c"]);
        let old_keys = keys.keys_for(&old);

        let new = Arc::new(vec![old[2].clone(), old[0].clone(), old[1].clone()]);
        keys.carry_forward(&new, vec![old_keys[2], old_keys[0], old_keys[1]])
            .unwrap();

        assert_eq!(&*keys.keys_for(&new), &[old_keys[2], old_keys[0], old_keys[1]]);
    }

    #[test]
    fn test_carry_forward_rejects_bad_keys() {
        let mut keys = StableKeys::new();
        let old = list(&["a", "b"]);
        let old_keys = keys.keys_for(&old);
        let new = list(&["a", "b"]);

        assert!(keys.carry_forward(&new, vec![old_keys[0]]).is_err());
        assert!(keys.carry_forward(&new, vec![old_keys[0], old_keys[0]]).is_err());
    }

    #[test]
    fn test_garbage_collection() {
        let mut keys = StableKeys::new();
        let kept = list(&["a"]);
        let dropped = list(&["b"]);
        keys.keys_for(&kept);
        let gone = keys.keys_for(&dropped)[0];

        drop(dropped);
        assert!(!keys.contains_key(gone));
        assert_eq!(keys.collect_garbage(), 1);
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_is_keyed() {
        let mut keys = StableKeys::new();
        let a = list(&["a"]);
        assert!(!keys.is_keyed(&a));
        keys.keys_for(&a);
        assert!(keys.is_keyed(&a));
    }

    #[test]
    fn test_inherit_by_position() {
        let mut keys = StableKeys::new();
        let old = list(&["x", "y"]);
        let old_keys = keys.keys_for(&old);

        let same_len = list(&["z", "y"]);
        assert_eq!(keys.inherit(&same_len, Some(&old_keys)).unwrap(), old_keys);
        assert_eq!(keys.keys_for(&same_len), old_keys);

        // already keyed lists keep their own keys
        let keyed = list(&["a", "b"]);
        let own = keys.keys_for(&keyed);
        assert_eq!(keys.inherit(&keyed, Some(&old_keys)).unwrap(), own);

        let longer = list(&["w", "x", "y"]);
        let fresh = keys.inherit(&longer, Some(&old_keys)).unwrap();
        assert!(fresh.iter().all(|k| !old_keys.contains(k)));
    }

    #[test]
    fn test_retained_list_keeps_keys_live() {
        let mut keys = StableKeys::new();
        let old = list(&["a", "b"]);
        let k = keys.keys_for(&old)[1];
        keys.collect_garbage();
        assert!(keys.contains_key(k));
        drop(old);
        assert!(!keys.contains_key(k));
    }

    #[test]
    fn test_keys_are_monotonic() {
        let mut keys = StableKeys::new();
        let a = keys.fresh_key();
        let b = keys.fresh_key();
        assert!(b > a);
        assert_eq!(a.to_string(), "0");
    }
}
