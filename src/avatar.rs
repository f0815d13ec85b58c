//! Avatar cache keyed by stable entity id (bare JID, room address)

use crate::config::Config;
use crate::error::Result;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(n) => n,
    None => unreachable!(),
};

/// Encoded image bytes, shared between every view showing the same entity
pub type Avatar = Arc<Vec<u8>>;

pub struct AvatarCache {
    entries: Mutex<LruCache<String, Avatar>>,
}

impl AvatarCache {
    /// A zero capacity falls back to the default
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.avatar_cache_size)
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn get(&self, id: &str) -> Option<Avatar> {
        self.entries.lock().get(id).cloned()
    }

    pub fn insert(&self, id: &str, bytes: Vec<u8>) -> Avatar {
        let avatar = Arc::new(bytes);
        self.entries.lock().put(id.to_string(), Arc::clone(&avatar));
        avatar
    }

    /// Return the cached avatar or ask `loader` for it.
    ///
    /// The lock is not held while the loader runs. A loader returning
    /// `Ok(None)` (entity has no avatar) caches nothing.
    pub fn get_or_load<F>(&self, id: &str, loader: F) -> Result<Option<Avatar>>
    where
        F: FnOnce(&str) -> Result<Option<Vec<u8>>>,
    {
        if let Some(hit) = self.get(id) {
            return Ok(Some(hit));
        }
        debug!(id, "avatar cache miss");
        Ok(loader(id)?.map(|bytes| self.insert(id, bytes)))
    }

    /// Drop a stale avatar, e.g. after the contact published a new one
    pub fn invalidate(&self, id: &str) -> Option<Avatar> {
        self.entries.lock().pop(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
