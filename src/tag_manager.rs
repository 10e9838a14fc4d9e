// tag_manager.rs - Integer handle table for tags
// =========================================================================
//
// The facade hands out positive i32 handles. Each handle maps to a tag, the
// job that drives it, and a lock that serializes API calls on that tag.
// =========================================================================

use crate::error::{EipError, Result};
use crate::job::JobHandle;
use crate::resource::Shared;
use crate::tag::Tag;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// A tag registered with the client under an integer handle
pub struct TagEntry {
    /// Serializes facade calls on this tag. Distinct from the tag's own
    /// state lock, which the worker takes on every tick.
    api_lock: Mutex<()>,
    pub tag: Shared<Tag>,
    pub job: JobHandle,
}

impl TagEntry {
    pub fn new(tag: Shared<Tag>, job: JobHandle) -> Self {
        Self {
            api_lock: Mutex::new(()),
            tag,
            job,
        }
    }

    /// Runs `f` while holding the tag's API lock
    pub fn locked<R>(&self, f: impl FnOnce(&Tag) -> R) -> R {
        let _guard = self.api_lock.lock();
        f(&self.tag)
    }
}

/// Maps positive integer handles to tags
pub struct TagManager {
    tags: RwLock<HashMap<i32, Arc<TagEntry>>>,
    next_id: AtomicI32,
}

impl TagManager {
    pub fn new() -> Self {
        Self {
            tags: RwLock::new(HashMap::new()),
            next_id: AtomicI32::new(1),
        }
    }

    /// Registers an entry and returns its handle
    pub fn insert(&self, entry: TagEntry) -> i32 {
        let mut tags = self.tags.write();
        let id = loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
            if candidate <= 0 {
                // wrapped; start over from 1
                self.next_id.store(1, Ordering::Relaxed);
                continue;
            }
            if !tags.contains_key(&candidate) {
                break candidate;
            }
        };
        tags.insert(id, Arc::new(entry));
        id
    }

    pub fn get(&self, id: i32) -> Result<Arc<TagEntry>> {
        self.tags
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EipError::NotFound(format!("no tag with handle {}", id)))
    }

    pub fn remove(&self, id: i32) -> Result<Arc<TagEntry>> {
        self.tags
            .write()
            .remove(&id)
            .ok_or_else(|| EipError::NotFound(format!("no tag with handle {}", id)))
    }

    pub fn ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.tags.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.tags.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.read().is_empty()
    }

    /// Removes every entry and hands them back
    pub fn clear(&self) -> Vec<Arc<TagEntry>> {
        self.tags.write().drain().map(|(_, entry)| entry).collect()
    }
}

impl Default for TagManager {
    fn default() -> Self {
        Self::new()
    }
}
