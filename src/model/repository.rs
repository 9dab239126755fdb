//! The authoritative window cache.
//!
//! One lock guards the whole state; every operation holds it only for map
//! manipulation and never performs I/O or OS calls while holding it.
//!
//! The merge-on-write semantics of [`WindowRepository::store`] are the load
//! bearing decision here. The compositor sometimes reports an empty space
//! list for windows on other virtual desktops mid-switch, which makes a
//! discovery scan omit them. Replacing the set on every write would evict
//! those windows and re-admit them moments later, flooding subscribers with
//! disappeared/appeared pairs. A record therefore stays cached until
//! validation proves its handle dead or its process exits.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::common::collections::{HashMap, HashSet};
use crate::model::preview_cache::PreviewCache;
use crate::model::record::{ChangeReport, WindowRecord};
use crate::sys::app::pid_t;
use crate::sys::axuielement::AXUIElement;
use crate::sys::window_server::{PreviewImage, WindowId};

pub struct WindowRepository {
    state: Mutex<State>,
}

static_assertions::assert_impl_all!(WindowRepository: Send, Sync);

struct State {
    entries: HashMap<pid_t, HashMap<WindowId, WindowRecord>>,
    previews: PreviewCache,
    ignored_pids: HashSet<pid_t>,
}

impl WindowRepository {
    pub fn new(
        preview_capacity: usize,
        preview_max_age: Duration,
        ignored_pids: HashSet<pid_t>,
    ) -> Self {
        WindowRepository {
            state: Mutex::new(State {
                entries: HashMap::new(),
                previews: PreviewCache::new(preview_capacity, preview_max_age),
                ignored_pids,
            }),
        }
    }

    pub fn is_ignored(&self, pid: pid_t) -> bool {
        self.state.lock().ignored_pids.contains(&pid)
    }

    /// The merge primitive. Every record of `new_windows` ends up in the
    /// cache; records previously cached for `pid` but absent from
    /// `new_windows` stay cached.
    pub fn store(&self, pid: pid_t, new_windows: Vec<WindowRecord>) -> ChangeReport {
        let mut state = self.state.lock();
        if state.ignored_pids.contains(&pid) {
            trace!(pid, "Ignoring store for excluded pid");
            return ChangeReport::default();
        }

        let old = state.entries.get(&pid).cloned().unwrap_or_default();
        let mut merged = old.clone();
        for window in new_windows {
            debug_assert_eq!(window.owner_pid, pid, "record stored under foreign pid");
            merged.insert(window.id, window);
        }

        let report = ChangeReport::between(&old, &merged);
        if merged.is_empty() {
            state.entries.remove(&pid);
        } else {
            state.entries.insert(pid, merged);
        }
        report
    }

    /// Snapshots the pid's set, lets the caller mutate it, writes it back
    /// (dropping the pid key when it ends up empty) and reports the diff.
    pub fn modify(
        &self,
        pid: pid_t,
        mutator: impl FnOnce(&mut HashMap<WindowId, WindowRecord>),
    ) -> ChangeReport {
        let mut state = self.state.lock();
        let old = state.entries.get(&pid).cloned().unwrap_or_default();
        let mut new = old.clone();
        mutator(&mut new);

        let report = ChangeReport::between(&old, &new);
        for removed in &report.removed {
            state.previews.remove(*removed);
        }
        if new.is_empty() {
            state.entries.remove(&pid);
        } else {
            state.entries.insert(pid, new);
        }
        report
    }

    /// Drops every record for `pid` whose handle fails `validator` and
    /// returns the retained set.
    pub fn purify(
        &self,
        pid: pid_t,
        mut validator: impl FnMut(&AXUIElement) -> bool,
    ) -> Vec<WindowRecord> {
        let mut state = self.state.lock();
        let Some(mut set) = state.entries.remove(&pid) else {
            return Vec::new();
        };

        let mut dead = Vec::new();
        set.retain(|&id, record| {
            if validator(&record.ax_handle) {
                true
            } else {
                dead.push(id);
                false
            }
        });

        for id in &dead {
            state.previews.remove(*id);
        }
        if !dead.is_empty() {
            trace!(pid, ?dead, "Purified stale window records");
        }

        let retained: Vec<WindowRecord> = set.values().cloned().collect();
        if !set.is_empty() {
            state.entries.insert(pid, set);
        }
        retained
    }

    /// Atomically reads and clears everything cached for `pid`. Used when
    /// the owning process terminates.
    pub fn remove_all(&self, pid: pid_t) -> Vec<WindowRecord> {
        let mut state = self.state.lock();
        let removed: Vec<WindowRecord> = state
            .entries
            .remove(&pid)
            .map(|set| set.into_values().collect())
            .unwrap_or_default();
        for record in &removed {
            state.previews.remove(record.id);
        }
        removed
    }

    pub fn windows_for_pid(&self, pid: pid_t) -> Vec<WindowRecord> {
        self.state
            .lock()
            .entries
            .get(&pid)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn window_ids_for_pid(&self, pid: pid_t) -> HashSet<WindowId> {
        self.state
            .lock()
            .entries
            .get(&pid)
            .map(|set| set.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn windows_for_bundle(&self, bundle_id: &str) -> Vec<WindowRecord> {
        self.state
            .lock()
            .entries
            .values()
            .flat_map(|set| set.values())
            .filter(|record| record.owner_bundle_id.as_deref() == Some(bundle_id))
            .cloned()
            .collect()
    }

    pub fn window_by_id(&self, id: WindowId) -> Option<WindowRecord> {
        self.state
            .lock()
            .entries
            .values()
            .find_map(|set| set.get(&id))
            .cloned()
    }

    pub fn all_windows(&self) -> Vec<WindowRecord> {
        self.state
            .lock()
            .entries
            .values()
            .flat_map(|set| set.values().cloned())
            .collect()
    }

    pub fn tracked_pids(&self) -> Vec<pid_t> {
        self.state.lock().entries.keys().copied().collect()
    }

    pub fn store_preview(&self, id: WindowId, image: PreviewImage) {
        self.store_preview_at(id, image, Instant::now())
    }

    pub fn store_preview_at(&self, id: WindowId, image: PreviewImage, now: Instant) {
        self.state.lock().previews.insert_at(id, image, now);
    }

    pub fn preview(&self, id: WindowId) -> Option<(PreviewImage, Instant)> {
        self.state.lock().previews.get(id)
    }

    /// Ids cached for `pid` whose preview is within the freshness window.
    /// Always a subset of the pid's cached window ids.
    pub fn fresh_preview_ids(&self, pid: pid_t) -> HashSet<WindowId> {
        self.fresh_preview_ids_at(pid, Instant::now())
    }

    pub fn fresh_preview_ids_at(&self, pid: pid_t, now: Instant) -> HashSet<WindowId> {
        let state = self.state.lock();
        let Some(set) = state.entries.get(&pid) else {
            return HashSet::new();
        };
        set.keys().copied().filter(|&id| state.previews.is_fresh(id, now)).collect()
    }

    pub fn purge_expired_previews(&self) {
        self.purge_expired_previews_at(Instant::now())
    }

    pub fn purge_expired_previews_at(&self, now: Instant) {
        self.state.lock().previews.purge_expired(now);
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        let state = self.state.lock();
        for (&pid, set) in &state.entries {
            assert!(!set.is_empty(), "pid {pid} has an empty entry set");
            for (&id, record) in set {
                assert_eq!(record.owner_pid, pid);
                assert_eq!(record.id, id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::testing::record;

    fn repo() -> WindowRepository {
        WindowRepository::new(100, Duration::from_secs(30), HashSet::new())
    }

    #[test]
    fn store_merges_instead_of_replacing() {
        let repo = repo();
        let a = record(1, 42, 1);
        let b = record(2, 42, 2);

        let first = repo.store(42, vec![a.clone(), b.clone()]);
        let mut added: Vec<u32> = first.added.iter().map(|r| r.id.as_u32()).collect();
        added.sort_unstable();
        assert_eq!(added, vec![1, 2]);
        assert!(first.removed.is_empty());
        assert!(first.modified.is_empty());

        // A scan that only saw A must not evict B.
        let second = repo.store(42, vec![a]);
        assert!(second.is_empty());
        assert_eq!(repo.window_ids_for_pid(42).len(), 2);
        repo.assert_invariants();
    }

    #[test]
    fn store_reports_modifications() {
        let repo = repo();
        repo.store(42, vec![record(1, 42, 1)]);

        let mut renamed = record(1, 42, 1);
        renamed.title = Some("renamed".into());
        let report = repo.store(42, vec![renamed]);
        assert!(report.added.is_empty());
        assert_eq!(report.modified.len(), 1);
        assert_eq!(report.modified[0].title.as_deref(), Some("renamed"));
    }

    #[test]
    fn storing_identical_snapshots_is_idempotent() {
        let repo = repo();
        let windows = vec![record(1, 42, 1), record(2, 42, 2)];
        repo.store(42, windows.clone());
        let second = repo.store(42, windows);
        assert!(second.modified.is_empty());
        assert!(second.is_empty());

        // And the degenerate case: storing nothing twice.
        assert!(repo.store(42, Vec::new()).is_empty());
        assert!(repo.store(42, Vec::new()).is_empty());
    }

    #[test]
    fn empty_store_never_creates_a_pid_key() {
        let repo = repo();
        repo.store(42, Vec::new());
        assert!(repo.tracked_pids().is_empty());
        repo.assert_invariants();
    }

    #[test]
    fn purify_prunes_dead_handles() {
        let repo = repo();
        let a = record(1, 42, 1);
        let b = record(2, 42, 2);
        repo.store(42, vec![a.clone(), b.clone()]);

        let dead = b.ax_handle.clone();
        let retained = repo.purify(42, |handle| *handle != dead);
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].id, a.id);
        assert_eq!(
            repo.windows_for_pid(42).iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![a.id]
        );
        repo.assert_invariants();
    }

    #[test]
    fn purify_with_permissive_validator_changes_nothing() {
        let repo = repo();
        repo.store(42, vec![record(1, 42, 1), record(2, 42, 2)]);
        let retained = repo.purify(42, |_| true);
        assert_eq!(retained.len(), 2);
        assert_eq!(repo.window_ids_for_pid(42).len(), 2);
    }

    #[test]
    fn purify_that_removes_everything_drops_the_pid_key() {
        let repo = repo();
        repo.store(42, vec![record(1, 42, 1)]);
        let retained = repo.purify(42, |_| false);
        assert!(retained.is_empty());
        assert!(repo.tracked_pids().is_empty());
        repo.assert_invariants();
    }

    #[test]
    fn modify_reports_diff_and_drops_empty_sets() {
        let repo = repo();
        repo.store(42, vec![record(1, 42, 1), record(2, 42, 2)]);

        let report = repo.modify(42, |set| {
            set.remove(&WindowId::new(2));
            if let Some(record) = set.get_mut(&WindowId::new(1)) {
                record.is_minimized = true;
            }
        });
        assert_eq!(report.removed, vec![WindowId::new(2)]);
        assert_eq!(report.modified.len(), 1);
        assert!(report.modified[0].is_minimized);

        repo.modify(42, |set| set.clear());
        assert!(repo.tracked_pids().is_empty());
        repo.assert_invariants();
    }

    #[test]
    fn remove_all_returns_every_record() {
        let repo = repo();
        repo.store(42, vec![record(1, 42, 1), record(2, 42, 2), record(3, 42, 3)]);
        repo.store(43, vec![record(9, 43, 9)]);

        let removed = repo.remove_all(42);
        assert_eq!(removed.len(), 3);
        assert!(repo.windows_for_pid(42).is_empty());
        assert_eq!(repo.windows_for_pid(43).len(), 1);
    }

    #[test]
    fn ignored_pids_are_rejected_by_store() {
        let repo = WindowRepository::new(
            100,
            Duration::from_secs(30),
            [42].into_iter().collect(),
        );
        let report = repo.store(42, vec![record(1, 42, 1)]);
        assert!(report.is_empty());
        assert!(repo.windows_for_pid(42).is_empty());
        assert!(repo.is_ignored(42));
    }

    #[test]
    fn lookups_by_bundle_and_id() {
        let repo = repo();
        repo.store(42, vec![record(1, 42, 1)]);
        repo.store(50, vec![record(7, 50, 7)]);

        assert_eq!(repo.windows_for_bundle("com.example.app").len(), 2);
        assert_eq!(repo.window_by_id(WindowId::new(7)).unwrap().owner_pid, 50);
        assert!(repo.window_by_id(WindowId::new(99)).is_none());
        assert_eq!(repo.all_windows().len(), 2);
    }

    #[test]
    fn fresh_preview_ids_are_a_subset_of_cached_windows() {
        let repo = repo();
        let t0 = Instant::now();
        repo.store(42, vec![record(7, 42, 7)]);

        // A preview for a window of another process must not leak into
        // pid 42's freshness set.
        repo.store_preview_at(WindowId::new(7), PreviewImage::blank(2, 2).unwrap(), t0);
        repo.store_preview_at(WindowId::new(9), PreviewImage::blank(2, 2).unwrap(), t0);

        let fresh = repo.fresh_preview_ids_at(42, t0 + Duration::from_secs(1));
        assert_eq!(fresh, [WindowId::new(7)].into_iter().collect());
    }

    #[test]
    fn preview_expiry_follows_the_freshness_window() {
        let repo = repo();
        let t0 = Instant::now();
        repo.store(42, vec![record(7, 42, 7)]);
        repo.store_preview_at(WindowId::new(7), PreviewImage::blank(2, 2).unwrap(), t0);

        let at_29 = repo.fresh_preview_ids_at(42, t0 + Duration::from_secs(29));
        assert!(at_29.contains(&WindowId::new(7)));

        repo.purge_expired_previews_at(t0 + Duration::from_secs(31));
        let at_31 = repo.fresh_preview_ids_at(42, t0 + Duration::from_secs(31));
        assert!(at_31.is_empty());
        assert!(repo.preview(WindowId::new(7)).is_none());
    }

    #[test]
    fn removing_records_drops_their_previews() {
        let repo = repo();
        repo.store(42, vec![record(1, 42, 1)]);
        repo.store_preview(WindowId::new(1), PreviewImage::blank(2, 2).unwrap());

        repo.remove_all(42);
        assert!(repo.preview(WindowId::new(1)).is_none());
    }
}
