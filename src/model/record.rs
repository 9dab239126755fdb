//! The unit of cache: one top-level window as the engine understands it,
//! and the differential report produced by every repository write.

use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use objc2_core_foundation::CGRect;

use crate::common::collections::HashMap;
use crate::sys::app::pid_t;
use crate::sys::axuielement::AXUIElement;
use crate::sys::window_server::{SpaceId, WindowId};

#[derive(Debug, Clone)]
pub struct WindowRecord {
    /// Compositor window identifier.
    pub id: WindowId,
    pub title: Option<String>,
    pub owner_bundle_id: Option<String>,
    pub owner_pid: pid_t,
    /// Global screen coordinates.
    pub bounds: CGRect,
    pub is_minimized: bool,
    pub is_owner_hidden: bool,
    pub is_visible: bool,
    /// Absent when CGS returned no spaces for the window.
    pub desktop_space: Option<SpaceId>,
    pub last_interaction_time: SystemTime,
    pub creation_time: SystemTime,
    pub ax_handle: AXUIElement,
    pub app_ax_handle: AXUIElement,
    pub close_button_handle: Option<AXUIElement>,
}

// Record identity is (id, owner_pid, ax_handle): the same compositor id can
// reappear with a different handle after the OS destroys and replaces the
// underlying element, and those must not compare equal.
impl PartialEq for WindowRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.owner_pid == other.owner_pid
            && self.ax_handle == other.ax_handle
    }
}

impl Eq for WindowRecord {}

impl Hash for WindowRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.owner_pid.hash(state);
        self.ax_handle.hash(state);
    }
}

impl WindowRecord {
    /// Whether a repository write from `self` to `new` counts as a
    /// modification. Only user-observable fields participate.
    pub fn differs_from(&self, new: &WindowRecord) -> bool {
        self.title != new.title
            || self.is_minimized != new.is_minimized
            || self.is_owner_hidden != new.is_owner_hidden
            || self.bounds != new.bounds
    }
}

/// The diff produced by a repository mutation.
#[derive(Debug, Clone, Default)]
pub struct ChangeReport {
    /// Records whose id was absent from the old snapshot.
    pub added: Vec<WindowRecord>,
    /// Ids present before and absent now.
    pub removed: Vec<WindowId>,
    /// Records whose id persisted but whose observable fields changed.
    pub modified: Vec<WindowRecord>,
}

impl ChangeReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Diff between two snapshots of one pid's window set, keyed by id.
    pub fn between(
        old: &HashMap<WindowId, WindowRecord>,
        new: &HashMap<WindowId, WindowRecord>,
    ) -> ChangeReport {
        let mut report = ChangeReport::default();
        for (id, record) in new {
            match old.get(id) {
                None => report.added.push(record.clone()),
                Some(previous) if previous.differs_from(record) => {
                    report.modified.push(record.clone())
                }
                Some(_) => {}
            }
        }
        for id in old.keys() {
            if !new.contains_key(id) {
                report.removed.push(*id);
            }
        }
        report
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use objc2_core_foundation::{CGPoint, CGSize};

    use super::*;

    /// A record for tests. The handle is a real CF token (application
    /// elements can be created without any permission), distinct per
    /// `handle_seed`.
    pub fn record(id: u32, pid: pid_t, handle_seed: pid_t) -> WindowRecord {
        let now = SystemTime::now();
        WindowRecord {
            id: WindowId::new(id),
            title: Some(format!("window {id}")),
            owner_bundle_id: Some("com.example.app".into()),
            owner_pid: pid,
            bounds: CGRect::new(CGPoint::new(0.0, 0.0), CGSize::new(800.0, 600.0)),
            is_minimized: false,
            is_owner_hidden: false,
            is_visible: true,
            desktop_space: None,
            last_interaction_time: now,
            creation_time: now,
            ax_handle: AXUIElement::application(handle_seed),
            app_ax_handle: AXUIElement::application(pid),
            close_button_handle: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::record;
    use super::*;

    fn snapshot(records: impl IntoIterator<Item = WindowRecord>) -> HashMap<WindowId, WindowRecord> {
        records.into_iter().map(|r| (r.id, r)).collect()
    }

    #[test]
    fn identity_distinguishes_replaced_handles() {
        let a = record(10, 42, 1);
        let mut b = record(10, 42, 1);
        assert_eq!(a, b);

        // Same id and pid, different underlying element: a replaced window.
        b.ax_handle = AXUIElement::application(2);
        assert_ne!(a, b);
    }

    #[test]
    fn diff_classifies_added_removed_modified() {
        let old = snapshot([record(1, 42, 1), record(2, 42, 2)]);
        let mut changed = record(1, 42, 1);
        changed.title = Some("renamed".into());
        let new = snapshot([changed, record(3, 42, 3)]);

        let report = ChangeReport::between(&old, &new);
        assert_eq!(report.added.iter().map(|r| r.id).collect::<Vec<_>>(), vec![WindowId::new(3)]);
        assert_eq!(report.removed, vec![WindowId::new(2)]);
        assert_eq!(report.modified.len(), 1);
        assert_eq!(report.modified[0].id, WindowId::new(1));
    }

    #[test]
    fn diff_sets_are_disjoint() {
        let old = snapshot([record(1, 42, 1), record(2, 42, 2)]);
        let mut changed = record(2, 42, 2);
        changed.is_minimized = true;
        let new = snapshot([changed, record(4, 42, 4)]);

        let report = ChangeReport::between(&old, &new);
        for added in &report.added {
            assert!(!report.removed.contains(&added.id));
            assert!(report.modified.iter().all(|m| m.id != added.id));
        }
        for modified in &report.modified {
            assert!(!report.removed.contains(&modified.id));
        }
    }

    #[test]
    fn identical_snapshots_produce_empty_report() {
        let old = snapshot([record(1, 42, 1), record(2, 42, 2)]);
        let report = ChangeReport::between(&old, &old.clone());
        assert!(report.is_empty());
    }

    #[test]
    fn unobserved_fields_do_not_count_as_modification() {
        let old = snapshot([record(1, 42, 1)]);
        let mut touched = record(1, 42, 1);
        touched.last_interaction_time = SystemTime::now();
        touched.desktop_space = Some(SpaceId::new(5));
        let new = snapshot([touched]);

        assert!(ChangeReport::between(&old, &new).is_empty());
    }
}
