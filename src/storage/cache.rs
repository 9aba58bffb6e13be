//! Concurrent in-memory cache of file versions
//!
//! One slot per file identity. Readers clone the current snapshot out of
//! a slot; writers serialize on the slot's mutex and publish by swapping
//! the whole snapshot, so a reader never sees a half-updated version.

use crate::incremental::FileVersion;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A cached version together with the text it was parsed from
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: Arc<FileVersion>,
    pub text: Arc<str>,
}

impl Snapshot {
    pub fn new(version: FileVersion, text: &str) -> Self {
        Self {
            version: Arc::new(version),
            text: Arc::from(text),
        }
    }
}

#[derive(Default)]
struct Slot {
    writer: Mutex<()>,
    current: RwLock<Option<Snapshot>>,
    last_used: AtomicU64,
}

/// Exclusive write access to one file's slot
pub struct WriteGuard<'a> {
    slot: &'a Slot,
    published: bool,
}

impl WriteGuard<'_> {
    /// The snapshot currently visible to readers
    pub fn current(&self) -> Option<Snapshot> {
        self.slot.current.read().clone()
    }

    /// Atomically replace the visible snapshot
    pub fn publish(&mut self, snapshot: Snapshot) {
        *self.slot.current.write() = Some(snapshot);
        self.published = true;
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub files: usize,
    pub chunks: usize,
    pub capacity: Option<usize>,
    pub evictions: u64,
}

/// Authoritative table of file versions, keyed by file identity
#[derive(Default)]
pub struct ChunkStore {
    slots: DashMap<String, Arc<Slot>>,
    capacity: Option<usize>,
    clock: AtomicU64,
    evictions: AtomicU64,
}

impl ChunkStore {
    /// Create an unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding at most `capacity` files
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current version of a file
    pub fn get(&self, key: &str) -> Option<Arc<FileVersion>> {
        self.snapshot(key).map(|s| s.version)
    }

    /// Current version of a file and the text it came from
    pub fn snapshot(&self, key: &str) -> Option<Snapshot> {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        let snapshot = slot.current.read().clone()?;
        slot.last_used.store(self.tick(), Ordering::Relaxed);
        Some(snapshot)
    }

    /// Run `f` with exclusive write access to `key`
    ///
    /// Writers to other keys are not blocked.
    pub fn write<R>(&self, key: &str, f: impl FnOnce(&mut WriteGuard<'_>) -> R) -> R {
        loop {
            let slot = Arc::clone(self.slots.entry(key.to_string()).or_default().value());
            let lock = slot.writer.lock();

            // The slot may have been evicted while we waited
            let still_mapped = self
                .slots
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &slot));
            if !still_mapped {
                continue;
            }

            let mut guard = WriteGuard {
                slot: &slot,
                published: false,
            };
            let result = f(&mut guard);
            let published = guard.published;

            if !published && slot.current.read().is_none() {
                self.slots.remove_if(key, |_, s| Arc::ptr_eq(s, &slot));
            }
            drop(lock);

            if published {
                slot.last_used.store(self.tick(), Ordering::Relaxed);
                self.evict_over_capacity(key);
            }
            return result;
        }
    }

    /// Publish a snapshot, replacing whatever was cached
    pub fn insert(&self, key: &str, snapshot: Snapshot) {
        self.write(key, |guard| guard.publish(snapshot));
    }

    /// Drop a file's entry; returns whether a version was cached
    pub fn invalidate(&self, key: &str) -> bool {
        let Some(slot) = self.slots.get(key).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let _lock = slot.writer.lock();
        let existed = slot.current.write().take().is_some();
        self.slots.remove_if(key, |_, s| Arc::ptr_eq(s, &slot));
        existed
    }

    /// Drop every entry
    pub fn clear(&self) {
        for key in self.keys() {
            self.invalidate(&key);
        }
    }

    /// Number of cached files
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cached file identities, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let chunks = self
            .slots
            .iter()
            .filter_map(|e| e.value().current.read().as_ref().map(|s| s.version.chunks.len()))
            .sum();
        CacheStats {
            files: self.len(),
            chunks,
            capacity: self.capacity,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evict least recently used idle entries until within capacity
    fn evict_over_capacity(&self, keep: &str) {
        let Some(capacity) = self.capacity else {
            return;
        };
        if self.slots.len() <= capacity {
            return;
        }

        let mut entries: Vec<(u64, String, Arc<Slot>)> = self
            .slots
            .iter()
            .filter(|e| e.key() != keep)
            .map(|e| {
                let slot = Arc::clone(e.value());
                (slot.last_used.load(Ordering::Relaxed), e.key().clone(), slot)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        for (_, key, slot) in entries {
            if self.slots.len() <= capacity {
                break;
            }
            // Entries with a writer in flight are skipped
            let Some(_lock) = slot.writer.try_lock() else {
                continue;
            };
            if self.slots.remove_if(&key, |_, s| Arc::ptr_eq(s, &slot)).is_some() {
                *slot.current.write() = None;
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Evicted {} from chunk cache", key);
            }
        }
    }
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("files", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{content_hash, Language};
    use crate::incremental::IdLineage;
    use std::thread;

    fn version(file: &str, text: &str) -> FileVersion {
        FileVersion {
            file_identity: file.to_string(),
            language: Language::Python,
            text_hash: content_hash(text),
            line_count: text.lines().count(),
            chunks: Vec::new(),
            recovered: false,
            lineage: IdLineage::default(),
            outline: Vec::new(),
        }
    }

    #[test]
    fn test_publish_and_get() {
        let store = ChunkStore::new();
        assert!(store.get("a.py").is_none());

        store.insert("a.py", Snapshot::new(version("a.py", "x = 1\n"), "x = 1\n"));
        let cached = store.snapshot("a.py").unwrap();
        assert_eq!(&*cached.text, "x = 1\n");
        assert_eq!(cached.version.line_count, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_write_without_publish_leaves_no_entry() {
        let store = ChunkStore::new();
        let seen = store.write("a.py", |guard| guard.current().is_some());
        assert!(!seen);
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let store = ChunkStore::new();
        store.insert("a.py", Snapshot::new(version("a.py", ""), ""));
        assert!(store.invalidate("a.py"));
        assert!(!store.invalidate("a.py"));
        assert!(store.get("a.py").is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let store = ChunkStore::with_capacity(Some(2));
        store.insert("a.py", Snapshot::new(version("a.py", ""), ""));
        store.insert("b.py", Snapshot::new(version("b.py", ""), ""));
        // Touch a so b is the least recently used
        assert!(store.get("a.py").is_some());
        store.insert("c.py", Snapshot::new(version("c.py", ""), ""));

        assert_eq!(store.keys(), vec!["a.py".to_string(), "c.py".to_string()]);
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = Arc::new(ChunkStore::new());
        thread::scope(|scope| {
            for t in 0..4 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..50 {
                        let key = format!("file{}.py", i % 5);
                        let text = format!("x = {}\n", t * 100 + i);
                        store.write(&key, |guard| {
                            guard.publish(Snapshot::new(version(&key, &text), &text));
                        });
                        let snapshot = store.snapshot(&key).unwrap();
                        // Readers always see a matching version and text
                        assert_eq!(snapshot.version.text_hash, content_hash(&snapshot.text));
                    }
                });
            }
        });
        assert_eq!(store.len(), 5);
    }
}
