use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::Result;

/// A built value together with the configuration it was built from
#[derive(Debug)]
pub struct CacheEntry<C, V> {
    config: C,
    value: Arc<V>,
}

impl<C, V> CacheEntry<C, V> {
    /// The configuration the value was built from
    pub const fn config(&self) -> &C {
        &self.config
    }

    /// The built value
    pub const fn value(&self) -> &Arc<V> {
        &self.value
    }
}

/// Reuses built values for as long as their configuration stays equal.
///
/// Each key holds at most one entry. Asking for a key with a different
/// configuration builds a new value and drops the superseded entry; callers
/// still holding the old value keep it alive until they are done.
pub struct ChannelCache<K, C, V> {
    entries: DashMap<K, CacheEntry<C, V>>,
}

impl<K, C, V> Default for ChannelCache<K, C, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, C, V> ChannelCache<K, C, V>
where
    K: Eq + Hash + Clone + fmt::Display,
    C: PartialEq + Clone,
{
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value for `key`, building it with `build` unless the cached
    /// entry was built from an equal `config`.
    ///
    /// `build` runs while the key is locked and must not access this cache.
    ///
    /// # Errors
    ///
    /// Returns the error of `build`. The previous entry stays in place.
    pub fn get_or_build<F>(&self, key: &K, config: &C, build: F) -> Result<Arc<V>>
    where
        F: FnOnce(&C) -> Result<V>,
    {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().config == *config => {
                Ok(Arc::clone(&entry.get().value))
            }
            Entry::Occupied(mut entry) => {
                let value = Arc::new(build(config)?);
                log::debug!("[{key}] Configuration changed, replacing cached channel");
                entry.insert(CacheEntry {
                    config: config.clone(),
                    value: Arc::clone(&value),
                });
                Ok(value)
            }
            Entry::Vacant(entry) => {
                let value = Arc::new(build(config)?);
                entry.insert(CacheEntry {
                    config: config.clone(),
                    value: Arc::clone(&value),
                });
                Ok(value)
            }
        }
    }

    /// Drop the entry for `key`
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, C, V> fmt::Debug for ChannelCache<K, C, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
