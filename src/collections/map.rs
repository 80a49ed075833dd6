//! An insertion-ordered map shared between tasks.

use super::Guarded;
use crate::sync::AcquireError;
use core::hash::Hash;
use core::sync::atomic::{AtomicUsize, Ordering};
use indexmap::IndexMap;

/// A map whose mutations never interleave.
///
/// Iteration follows insertion order. Replacing the value of an existing key
/// keeps its position, and removing a key keeps the order of the rest.
///
/// Lookups return copies of the stored values, so no reference into the map
/// outlives the critical section.
#[derive(Debug)]
pub struct AsyncMap<K, V> {
    entries: Guarded<IndexMap<K, V>>,
    len: AtomicUsize,
}

impl<K, V> AsyncMap<K, V>
where
    K: Eq + Hash,
{
    /// Creates an empty map.
    pub fn new() -> Self {
        AsyncMap {
            entries: Guarded::new(IndexMap::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Inserts `value` under `key`, returning the value it replaced.
    pub async fn insert(&self, key: K, value: V) -> Result<Option<V>, AcquireError> {
        self.mutate(|map| map.insert(key, value)).await
    }

    /// Returns a copy of the value stored under `key`.
    pub async fn get(&self, key: &K) -> Result<Option<V>, AcquireError>
    where
        V: Clone,
    {
        self.entries.with(|map| map.get(key).cloned()).await
    }

    /// Returns true if a value is stored under `key`.
    pub async fn contains_key(&self, key: &K) -> Result<bool, AcquireError> {
        self.entries.with(|map| map.contains_key(key)).await
    }

    /// Removes the value stored under `key` and returns it.
    pub async fn remove(&self, key: &K) -> Result<Option<V>, AcquireError> {
        self.mutate(|map| map.shift_remove(key)).await
    }

    /// Removes all entries.
    pub async fn clear(&self) -> Result<(), AcquireError> {
        self.mutate(|map| map.clear()).await
    }

    /// Calls `f` on every entry in insertion order while holding the lock.
    pub async fn for_each<F>(&self, mut f: F) -> Result<(), AcquireError>
    where
        F: FnMut(&K, &V),
    {
        self.entries
            .with(|map| map.iter().for_each(|(k, v)| f(k, v)))
            .await
    }

    /// Returns copies of all entries, in insertion order.
    pub async fn entries(&self) -> Result<Vec<(K, V)>, AcquireError>
    where
        K: Clone,
        V: Clone,
    {
        self.entries
            .with(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .await
    }

    /// Returns copies of all keys, in insertion order.
    pub async fn keys(&self) -> Result<Vec<K>, AcquireError>
    where
        K: Clone,
    {
        self.entries.with(|map| map.keys().cloned().collect()).await
    }

    /// Returns copies of all values, in insertion order.
    pub async fn values(&self) -> Result<Vec<V>, AcquireError>
    where
        V: Clone,
    {
        self.entries.with(|map| map.values().cloned().collect()).await
    }

    /// Returns the number of entries as of the last completed mutation.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns true if the map was empty after the last completed mutation.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the map, returning its entries.
    pub fn into_inner(self) -> IndexMap<K, V> {
        self.entries.into_inner()
    }

    async fn mutate<F, R>(&self, f: F) -> Result<R, AcquireError>
    where
        F: FnOnce(&mut IndexMap<K, V>) -> R,
    {
        self.entries
            .with(|map| {
                let res = f(map);
                self.len.store(map.len(), Ordering::Release);
                res
            })
            .await
    }
}

impl<K, V> Default for AsyncMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for AsyncMap<K, V>
where
    K: Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries: IndexMap<K, V> = iter.into_iter().collect();
        AsyncMap {
            len: AtomicUsize::new(entries.len()),
            entries: Guarded::new(entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AsyncMap;
    use futures::executor::block_on;

    #[test]
    fn insert_get_remove() {
        block_on(async {
            let map = AsyncMap::new();
            assert_eq!(Ok(None), map.insert("a", 1).await);
            assert_eq!(Ok(Some(1)), map.insert("a", 2).await);
            assert_eq!(Ok(None), map.insert("b", 3).await);
            assert_eq!(2, map.len());

            assert_eq!(Ok(Some(2)), map.get(&"a").await);
            assert_eq!(Ok(true), map.contains_key(&"b").await);
            assert_eq!(Ok(Some(3)), map.remove(&"b").await);
            assert_eq!(Ok(false), map.contains_key(&"b").await);
            assert_eq!(Ok(None), map.remove(&"b").await);
            assert_eq!(1, map.len());

            map.clear().await.unwrap();
            assert!(map.is_empty());
        });
    }

    #[test]
    fn snapshots_and_for_each() {
        block_on(async {
            let map: AsyncMap<u32, &str> = vec![(1, "one"), (2, "two")].into_iter().collect();
            assert_eq!(2, map.len());

            assert_eq!(Ok(vec![1, 2]), map.keys().await);
            assert_eq!(Ok(vec!["one", "two"]), map.values().await);
            assert_eq!(Ok(vec![(1, "one"), (2, "two")]), map.entries().await);

            let mut sum = 0;
            map.for_each(|k, _| sum += k).await.unwrap();
            assert_eq!(3, sum);
            assert_eq!(2, map.into_inner().len());
        });
    }

    #[test]
    fn iteration_follows_insertion_order() {
        block_on(async {
            let map = AsyncMap::new();
            for key in [5, 1, 9, 3, 7, 2, 8] {
                map.insert(key, key * 10).await.unwrap();
            }
            assert_eq!(Ok(vec![5, 1, 9, 3, 7, 2, 8]), map.keys().await);

            assert_eq!(Ok(Some(30)), map.remove(&3).await);
            assert_eq!(Ok(Some(90)), map.insert(9, 91).await);
            assert_eq!(Ok(None), map.insert(4, 40).await);
            assert_eq!(Ok(vec![5, 1, 9, 7, 2, 8, 4]), map.keys().await);
            assert_eq!(Ok(vec![50, 10, 91, 70, 20, 80, 40]), map.values().await);

            let mut seen = Vec::new();
            map.for_each(|k, _| seen.push(*k)).await.unwrap();
            assert_eq!(vec![5, 1, 9, 7, 2, 8, 4], seen);
        });
    }
}
