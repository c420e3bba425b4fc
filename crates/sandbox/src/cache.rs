//! Image readiness cache.
//!
//! Each image name owns its own async mutex. Work on one image (a lookup or
//! a build) holds only that image's lock, so a slow build of `a` never blocks
//! `ensure_image("b")`, and a second caller for `a` waits for the first
//! build instead of starting another one. The map shard lock is only held
//! long enough to clone the slot out, never across an `.await`.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot = Arc<Mutex<bool>>;

/// Map of image name to "built and ready".
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: DashMap<String, Slot>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &str) -> Slot {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(false)))
            .clone()
    }

    /// Non-blocking readiness check. An image whose lock is currently held
    /// (lookup or build in progress) reports `false`.
    pub fn is_ready(&self, name: &str) -> bool {
        let slot = match self.entries.get(name) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        let ready = slot.try_lock().map(|ready| *ready).unwrap_or(false);
        ready
    }

    /// Take the per-image lock. The guard derefs to the readiness flag.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<bool> {
        self.slot(name).lock_owned().await
    }

    /// Mark an image as not ready, e.g. after it was deleted from the daemon.
    /// Waits for any lookup or build holding the image's lock, so the slot
    /// is never replaced underneath it.
    pub async fn invalidate(&self, name: &str) {
        let slot = match self.entries.get(name) {
            Some(entry) => entry.value().clone(),
            None => return,
        };
        *slot.lock().await = false;
    }

    /// Names of images currently marked ready.
    pub fn ready_images(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.value().try_lock().map(|r| *r).unwrap_or(false))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_mark_and_invalidate() {
        let cache = ImageCache::new();
        assert!(!cache.is_ready("python:3.12"));

        *cache.lock("python:3.12").await = true;
        assert!(cache.is_ready("python:3.12"));
        assert_eq!(cache.ready_images(), vec!["python:3.12".to_string()]);

        cache.invalidate("python:3.12").await;
        assert!(!cache.is_ready("python:3.12"));
        assert!(cache.ready_images().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_waits_for_build_in_progress() {
        let cache = Arc::new(ImageCache::new());
        let mut building = cache.lock("img").await;

        let invalidation = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.invalidate("img").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!invalidation.is_finished());

        // a caller arriving now queues on the same slot instead of a fresh one
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { *cache.lock("img").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        *building = true;
        drop(building);
        invalidation.await.unwrap();
        assert!(!cache.is_ready("img"));
        let _ = waiter.await.unwrap();
        assert_eq!(cache.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_held_lock_reports_not_ready() {
        let cache = ImageCache::new();
        let mut guard = cache.lock("img").await;
        *guard = true;
        assert!(!cache.is_ready("img"));
        drop(guard);
        assert!(cache.is_ready("img"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_images_do_not_block_each_other() {
        let cache = Arc::new(ImageCache::new());
        let _held = cache.lock("slow-image").await;

        let other = cache.clone();
        let acquired = tokio::time::timeout(Duration::from_secs(1), async move {
            *other.lock("fast-image").await = true;
        })
        .await;
        assert!(acquired.is_ok());
        assert!(cache.is_ready("fast-image"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_image_waits_for_holder() {
        let cache = Arc::new(ImageCache::new());
        let mut held = cache.lock("img").await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { *cache.lock("img").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        *held = true;
        drop(held);
        assert!(waiter.await.unwrap());
    }
}
