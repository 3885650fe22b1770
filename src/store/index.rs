// ABOUTME: Keyed index trait and the O(1) counting decorator (fast count)
// ABOUTME: Keeps a live-key counter in lockstep with set/set_default/remove/clear

use std::collections::btree_map;
use std::collections::hash_map;
use std::collections::{BTreeMap, HashMap};

/// A string-keyed index that a document store keeps its documents in.
pub trait KeyIndex {
    type Value;

    fn get(&self, key: &str) -> Option<&Self::Value>;

    fn get_mut(&mut self, key: &str) -> Option<&mut Self::Value>;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert `value`, returning the previous value under `key`.
    fn insert(&mut self, key: String, value: Self::Value) -> Option<Self::Value>;

    /// Return the value under `key`, inserting `default` first when absent.
    /// The flag is true when an insert happened.
    fn get_or_insert(&mut self, key: String, default: Self::Value) -> (&mut Self::Value, bool);

    fn remove(&mut self, key: &str) -> Option<Self::Value>;

    fn clear(&mut self);

    fn keys(&self) -> Vec<String>;

    /// Live key count without scanning, if this index tracks one.
    fn live_count(&self) -> Option<usize> {
        None
    }
}

impl<V> KeyIndex for HashMap<String, V> {
    type Value = V;

    fn get(&self, key: &str) -> Option<&V> {
        HashMap::get(self, key)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        HashMap::get_mut(self, key)
    }

    fn insert(&mut self, key: String, value: V) -> Option<V> {
        HashMap::insert(self, key, value)
    }

    fn get_or_insert(&mut self, key: String, default: V) -> (&mut V, bool) {
        match self.entry(key) {
            hash_map::Entry::Occupied(e) => (e.into_mut(), false),
            hash_map::Entry::Vacant(e) => (e.insert(default), true),
        }
    }

    fn remove(&mut self, key: &str) -> Option<V> {
        HashMap::remove(self, key)
    }

    fn clear(&mut self) {
        HashMap::clear(self)
    }

    fn keys(&self) -> Vec<String> {
        HashMap::keys(self).cloned().collect()
    }
}

impl<V> KeyIndex for BTreeMap<String, V> {
    type Value = V;

    fn get(&self, key: &str) -> Option<&V> {
        BTreeMap::get(self, key)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        BTreeMap::get_mut(self, key)
    }

    fn insert(&mut self, key: String, value: V) -> Option<V> {
        BTreeMap::insert(self, key, value)
    }

    fn get_or_insert(&mut self, key: String, default: V) -> (&mut V, bool) {
        match self.entry(key) {
            btree_map::Entry::Occupied(e) => (e.into_mut(), false),
            btree_map::Entry::Vacant(e) => (e.insert(default), true),
        }
    }

    fn remove(&mut self, key: &str) -> Option<V> {
        BTreeMap::remove(self, key)
    }

    fn clear(&mut self) {
        BTreeMap::clear(self)
    }

    fn keys(&self) -> Vec<String> {
        BTreeMap::keys(self).cloned().collect()
    }
}

/// Counting decorator around a [`KeyIndex`].
///
/// Every mutation goes through the wrapper, so `size()` always equals the
/// number of live keys in the wrapped index without scanning it. Used only to
/// make the delete-detection gate cheap; nothing depends on it for
/// correctness.
#[derive(Debug, Clone, Default)]
pub struct CountingIndex<I> {
    inner: I,
    count: usize,
}

impl<I: KeyIndex> CountingIndex<I> {
    /// Wrap an index. Keys already present are counted once here.
    pub fn new(inner: I) -> Self {
        let count = inner.keys().len();
        Self { inner, count }
    }

    /// Store `value` under `key`; counts the key only if it was new.
    pub fn set(&mut self, key: String, value: I::Value) -> Option<I::Value> {
        let previous = self.inner.insert(key, value);
        if previous.is_none() {
            self.count += 1;
        }
        previous
    }

    /// Insert `default` when `key` is absent (counting it), otherwise return
    /// the existing value unchanged.
    pub fn set_default(&mut self, key: String, default: I::Value) -> &mut I::Value {
        let (value, inserted) = self.inner.get_or_insert(key, default);
        if inserted {
            self.count += 1;
        }
        value
    }

    /// Remove `key`; uncounts it only if it was present.
    pub fn remove(&mut self, key: &str) -> Option<I::Value> {
        let removed = self.inner.remove(key);
        if removed.is_some() {
            self.count -= 1;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.count = 0;
    }

    pub fn size(&self) -> usize {
        self.count
    }
}

impl<I: KeyIndex> KeyIndex for CountingIndex<I> {
    type Value = I::Value;

    fn get(&self, key: &str) -> Option<&I::Value> {
        self.inner.get(key)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut I::Value> {
        self.inner.get_mut(key)
    }

    fn insert(&mut self, key: String, value: I::Value) -> Option<I::Value> {
        self.set(key, value)
    }

    fn get_or_insert(&mut self, key: String, default: I::Value) -> (&mut I::Value, bool) {
        let (value, inserted) = self.inner.get_or_insert(key, default);
        if inserted {
            self.count += 1;
        }
        (value, inserted)
    }

    fn remove(&mut self, key: &str) -> Option<I::Value> {
        CountingIndex::remove(self, key)
    }

    fn clear(&mut self) {
        CountingIndex::clear(self)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn live_count(&self) -> Option<usize> {
        Some(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counted() -> CountingIndex<HashMap<String, u32>> {
        CountingIndex::default()
    }

    #[test]
    fn test_size_defaults_to_zero() {
        assert_eq!(counted().size(), 0);
    }

    #[test]
    fn test_set_counts_new_keys_only() {
        let mut index = counted();
        index.set("a".to_string(), 1);
        index.set("b".to_string(), 2);
        index.set("a".to_string(), 3);
        assert_eq!(index.size(), 2);
        assert_eq!(index.get("a"), Some(&3));
    }

    #[test]
    fn test_set_default_keeps_existing_value() {
        let mut index = counted();
        assert_eq!(*index.set_default("a".to_string(), 1), 1);
        assert_eq!(*index.set_default("a".to_string(), 9), 1);
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn test_remove_uncounts_present_keys_only() {
        let mut index = counted();
        index.set("a".to_string(), 1);
        assert!(index.remove("missing").is_none());
        assert_eq!(index.size(), 1);
        assert_eq!(index.remove("a"), Some(1));
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn test_clear_resets_counter() {
        let mut index = counted();
        index.set("a".to_string(), 1);
        index.set("b".to_string(), 2);
        index.clear();
        assert_eq!(index.size(), 0);
        assert!(index.keys().is_empty());
    }

    #[test]
    fn test_wrapping_existing_index_counts_keys() {
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), 1);
        map.insert("y".to_string(), 2);
        let index = CountingIndex::new(map);
        assert_eq!(index.size(), 2);
        assert_eq!(index.live_count(), Some(2));
    }

    #[test]
    fn test_clone_keeps_counter() {
        let mut index = counted();
        index.set("a".to_string(), 1);
        let copy = index.clone();
        assert_eq!(copy.size(), 1);
    }

    #[test]
    fn test_plain_index_has_no_live_count() {
        let map: HashMap<String, u32> = HashMap::new();
        assert!(map.live_count().is_none());
    }

    #[test]
    fn test_counter_matches_keys_after_mixed_ops() {
        let mut index = counted();
        for i in 0..50u32 {
            index.set(format!("k{}", i % 20), i);
            if i % 3 == 0 {
                index.remove(&format!("k{}", i % 7));
            }
            index.set_default(format!("d{}", i % 5), i);
            assert_eq!(index.size(), index.keys().len());
        }
    }
}
