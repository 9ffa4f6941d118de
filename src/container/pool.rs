//! Warm container pool bookkeeping
//!
//! The pool is pure bookkeeping: entries are claimed and released under one
//! mutex, and all container I/O happens in the manager after an entry has
//! been claimed. That ordering is what prevents two callers from borrowing
//! the same freed container.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{images_match, ContainerHandle};

/// Pool bounds and eviction policy
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on pool entries
    pub max_size: usize,
    /// Target size maintained by release-time top-up
    pub min_size: usize,
    /// Idle entries older than this are evicted
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_size: 5,
            min_size: 2,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct PoolEntry {
    handle: ContainerHandle,
    in_use: bool,
    last_used: Instant,
}

/// Bounded list of warm containers keyed by image
#[derive(Debug)]
pub struct Pool {
    entries: Mutex<Vec<PoolEntry>>,
    config: PoolConfig,
}

impl Pool {
    /// Create an empty pool
    pub fn new(config: PoolConfig) -> Self {
        Pool {
            entries: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Claim a free entry whose image matches, marking it in use
    pub fn claim_matching(&self, image: &str) -> Option<ContainerHandle> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for entry in entries.iter_mut() {
            if !entry.in_use && images_match(&entry.handle.image, image) {
                entry.in_use = true;
                entry.last_used = Instant::now();
                return Some(entry.handle.clone());
            }
        }
        None
    }

    /// Whether a new entry still fits under `max_size`
    pub fn has_room(&self) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len() < self.config.max_size
    }

    /// Add a freshly created container as a claimed entry
    pub fn insert_in_use(&self, handle: ContainerHandle) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(PoolEntry {
            handle,
            in_use: true,
            last_used: Instant::now(),
        });
    }

    /// Add a freshly created container as an idle entry (min-size top-up)
    pub fn insert_idle(&self, handle: ContainerHandle) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(PoolEntry {
            handle,
            in_use: false,
            last_used: Instant::now(),
        });
    }

    /// Mark an entry free again and stamp its last-used time
    pub fn release(&self, container_name: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.handle.name == container_name)
        {
            entry.in_use = false;
            entry.last_used = Instant::now();
        }
    }

    /// Drop an entry from the pool (cleanup failure, eviction)
    pub fn remove(&self, container_name: &str) -> Option<ContainerHandle> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let idx = entries.iter().position(|e| e.handle.name == container_name)?;
        Some(entries.remove(idx).handle)
    }

    /// Remove and return every idle entry past the idle timeout
    pub fn take_idle_expired(&self) -> Vec<ContainerHandle> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let timeout = self.config.idle_timeout;
        let mut expired = Vec::new();
        entries.retain(|entry| {
            if !entry.in_use && entry.last_used.elapsed() > timeout {
                expired.push(entry.handle.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// How many entries are missing to reach `min_size`
    pub fn deficit(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.config.min_size.saturating_sub(entries.len())
    }

    /// Remove and return every entry
    pub fn drain(&self) -> Vec<ContainerHandle> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.drain(..).map(|e| e.handle).collect()
    }

    /// Whether an entry exists and is currently free
    pub fn is_idle(&self, container_name: &str) -> Option<bool> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|e| e.handle.name == container_name)
            .map(|e| !e.in_use)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn handle(name: &str, image: &str) -> ContainerHandle {
        ContainerHandle {
            id: format!("id-{}", name),
            name: name.to_string(),
            image: image.to_string(),
            workspace_dir: PathBuf::from("/tmp/runbox").join(name),
        }
    }

    #[test]
    fn test_claim_marks_in_use() {
        let pool = Pool::new(PoolConfig::default());
        pool.insert_idle(handle("rb_a", "alpine:latest"));

        let claimed = pool.claim_matching("alpine:latest").unwrap();
        assert_eq!(claimed.name, "rb_a");
        // A second claim on the same entry must fail until release
        assert!(pool.claim_matching("alpine:latest").is_none());

        pool.release("rb_a");
        assert!(pool.claim_matching("alpine:latest").is_some());
    }

    #[test]
    fn test_claim_respects_image() {
        let pool = Pool::new(PoolConfig::default());
        pool.insert_idle(handle("rb_a", "python:3.9-slim"));
        assert!(pool.claim_matching("node:18-alpine").is_none());
        assert!(pool
            .claim_matching("docker.io/python:3.9-slim")
            .is_some());
    }

    #[test]
    fn test_room_and_deficit() {
        let pool = Pool::new(PoolConfig {
            max_size: 2,
            min_size: 2,
            idle_timeout: Duration::from_secs(300),
        });
        assert!(pool.has_room());
        assert_eq!(pool.deficit(), 2);

        pool.insert_in_use(handle("rb_a", "alpine:latest"));
        pool.insert_idle(handle("rb_b", "alpine:latest"));
        assert!(!pool.has_room());
        assert_eq!(pool.deficit(), 0);
    }

    #[test]
    fn test_idle_eviction() {
        let pool = Pool::new(PoolConfig {
            max_size: 5,
            min_size: 0,
            idle_timeout: Duration::from_millis(0),
        });
        pool.insert_idle(handle("rb_idle", "alpine:latest"));
        pool.insert_in_use(handle("rb_busy", "alpine:latest"));

        std::thread::sleep(Duration::from_millis(5));
        let expired = pool.take_idle_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].name, "rb_idle");
        // Busy entries are never evicted
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_and_drain() {
        let pool = Pool::new(PoolConfig::default());
        pool.insert_idle(handle("rb_a", "alpine:latest"));
        pool.insert_idle(handle("rb_b", "alpine:latest"));

        assert!(pool.remove("rb_a").is_some());
        assert!(pool.remove("rb_a").is_none());
        assert_eq!(pool.drain().len(), 1);
        assert!(pool.is_empty());
    }
}
