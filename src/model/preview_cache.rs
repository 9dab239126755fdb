//! LRU store for captured window previews.
//!
//! Previews live independently of the window records that motivated them: a
//! record may outlive its preview (expiry, eviction) and a preview survives
//! record churn for the same id. Callers that need determinism pass an
//! explicit `now`; the public wrappers use the wall clock.

use std::time::{Duration, Instant};

use crate::common::collections::HashMap;
use crate::sys::window_server::{PreviewImage, WindowId};

pub struct PreviewCache {
    entries: HashMap<WindowId, PreviewEntry>,
    /// Access order, least recently used first.
    order: Vec<WindowId>,
    capacity: usize,
    max_age: Duration,
}

struct PreviewEntry {
    image: PreviewImage,
    captured_at: Instant,
}

impl PreviewCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        PreviewCache {
            entries: HashMap::new(),
            order: Vec::new(),
            capacity: capacity.max(1),
            max_age,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, id: WindowId, image: PreviewImage) {
        self.insert_at(id, image, Instant::now())
    }

    pub fn insert_at(&mut self, id: WindowId, image: PreviewImage, now: Instant) {
        self.entries.insert(id, PreviewEntry { image, captured_at: now });
        self.touch(id);
        while self.entries.len() > self.capacity {
            let evicted = self.order.remove(0);
            self.entries.remove(&evicted);
        }
    }

    /// Returns the preview regardless of age and marks it recently used.
    pub fn get(&mut self, id: WindowId) -> Option<(PreviewImage, Instant)> {
        let entry = self.entries.get(&id)?;
        let out = (entry.image.clone(), entry.captured_at);
        self.touch(id);
        Some(out)
    }

    pub fn is_fresh(&self, id: WindowId, now: Instant) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| now.duration_since(entry.captured_at) <= self.max_age)
    }

    pub fn fresh_ids(&self, now: Instant) -> Vec<WindowId> {
        self.entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.captured_at) <= self.max_age)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn remove(&mut self, id: WindowId) {
        if self.entries.remove(&id).is_some() {
            self.order.retain(|&other| other != id);
        }
    }

    /// Drops every entry older than the freshness window.
    pub fn purge_expired(&mut self, now: Instant) {
        let max_age = self.max_age;
        self.entries.retain(|_, entry| now.duration_since(entry.captured_at) <= max_age);
        let entries = &self.entries;
        self.order.retain(|id| entries.contains_key(id));
    }

    fn touch(&mut self, id: WindowId) {
        self.order.retain(|&other| other != id);
        self.order.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> PreviewImage {
        PreviewImage::blank(2, 2).expect("bitmap image")
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut cache = PreviewCache::new(3, Duration::from_secs(30));
        let t0 = Instant::now();
        for id in 1..=3 {
            cache.insert_at(WindowId::new(id), image(), t0);
        }

        // Touch 1 so 2 becomes the eviction candidate.
        assert!(cache.get(WindowId::new(1)).is_some());
        cache.insert_at(WindowId::new(4), image(), t0);

        assert_eq!(cache.len(), 3);
        assert!(cache.get(WindowId::new(2)).is_none());
        assert!(cache.get(WindowId::new(1)).is_some());
        assert!(cache.get(WindowId::new(4)).is_some());
    }

    #[test]
    fn freshness_window_is_inclusive() {
        let mut cache = PreviewCache::new(10, Duration::from_secs(30));
        let t0 = Instant::now();
        cache.insert_at(WindowId::new(7), image(), t0);

        assert!(cache.is_fresh(WindowId::new(7), t0 + Duration::from_secs(29)));
        assert!(cache.is_fresh(WindowId::new(7), t0 + Duration::from_secs(30)));
        assert!(!cache.is_fresh(WindowId::new(7), t0 + Duration::from_secs(31)));
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let mut cache = PreviewCache::new(10, Duration::from_secs(30));
        let t0 = Instant::now();
        cache.insert_at(WindowId::new(1), image(), t0);
        cache.insert_at(WindowId::new(2), image(), t0 + Duration::from_secs(10));

        cache.purge_expired(t0 + Duration::from_secs(31));
        assert!(cache.get(WindowId::new(1)).is_none());
        assert!(cache.get(WindowId::new(2)).is_some());
        assert_eq!(cache.fresh_ids(t0 + Duration::from_secs(31)), vec![WindowId::new(2)]);
    }
}
