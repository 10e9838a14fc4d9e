//! Named resource cache: one live object per key, held weakly.

use crate::error::Result;
use crate::resource::{Shared, WeakShared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

/// Maps string keys to weakly held [`Shared`] objects.
///
/// The cache never keeps anything alive: an entry disappears (logically) the
/// moment its last external strong reference is released, and the stale slot
/// is replaced on the next lookup for that key.
pub struct ResourceCache<T> {
    name: &'static str,
    entries: Mutex<HashMap<String, WeakShared<T>>>,
}

impl<T> ResourceCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live object for `key`, if any
    pub fn get(&self, key: &str) -> Option<Shared<T>> {
        self.entries.lock().get(key).and_then(WeakShared::upgrade)
    }

    /// Returns the cached object for `key`, creating it with `factory` when
    /// there is none or the cached one is mid-teardown.
    ///
    /// `factory` runs outside the cache lock. When two callers race, the
    /// first insert wins; the loser's object is dropped and the winner's
    /// returned, so all callers end up sharing one object.
    pub fn get_or_create<F>(&self, key: &str, mut factory: F) -> Result<Shared<T>>
    where
        F: FnMut() -> Result<Shared<T>>,
    {
        loop {
            if let Some(existing) = self.get(key) {
                tracing::trace!(cache = self.name, key, "cache hit");
                return Ok(existing);
            }

            let created = factory()?;

            let mut entries = self.entries.lock();
            match entries.get(key).and_then(WeakShared::upgrade) {
                Some(winner) => {
                    tracing::debug!(cache = self.name, key, "lost creation race, discarding duplicate");
                    drop(entries);
                    drop(created);
                    // Re-run the lookup: the winner may itself be dying by now.
                    drop(winner);
                    continue;
                }
                None => {
                    entries.retain(|_, weak| weak.is_live());
                    entries.insert(key.to_string(), created.downgrade());
                    tracing::debug!(cache = self.name, key, "cached new object");
                    return Ok(created);
                }
            }
        }
    }

    /// Removes `key` only if it still refers to `object`
    pub fn evict(&self, key: &str, object: &Shared<T>) -> bool {
        let mut entries = self.entries.lock();
        let matches = entries
            .get(key)
            .map(|weak| weak.points_to(object))
            .unwrap_or(false);
        if matches {
            entries.remove(key);
            tracing::debug!(cache = self.name, key, "evicted cached object");
        }
        matches
    }

    /// Number of entries whose object is still alive
    pub fn live_len(&self) -> usize {
        self.entries.lock().values().filter(|w| w.is_live()).count()
    }
}

impl<T> fmt::Debug for ResourceCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("name", &self.name)
            .field("live", &self.live_len())
            .finish()
    }
}
