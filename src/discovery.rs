//! Per-application window discovery.
//!
//! One scan reconciles what the capture surface list, the compositor and
//! the accessibility tree each claim about a single application, and
//! produces the fresh set of records the repository merges in. Runs off the
//! main scheduling context; individual OS calls may block briefly.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use objc2_core_foundation::CGRect;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::common::collections::{HashMap, HashSet};
use crate::common::config::TrackerConfig;
use crate::identity::{self, CAPTURE_GEOMETRY_TOLERANCE, MIN_WINDOW_DIMENSION, NORMAL_WINDOW_LEVEL, WindowDisposition};
use crate::model::record::WindowRecord;
use crate::sys::app::{AppInfo, pid_t};
use crate::sys::axuielement::{AX_DIALOG_SUBROLE, AX_STANDARD_WINDOW_SUBROLE, AXUIElement};
use crate::sys::window_server::{
    self, PreviewImage, SpaceId, WindowDescriptor, WindowId,
};
use crate::sys::permissions;

/// How long the shareable-surface enumeration may take before the scan
/// falls back to the accessibility pass alone.
pub const SURFACE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Concurrent record-construction tasks per scan.
pub const SCAN_FAN_OUT: usize = 4;
/// Upper bound on one record construction, preview capture included.
pub const RECORD_TASK_TIMEOUT: Duration = Duration::from_secs(5);
/// How many synthetic remote-token element ids the brute-force fallback
/// probes. The id space is undocumented; window elements cluster near zero.
pub const BRUTE_FORCE_ELEMENT_IDS: u64 = 1000;

/// Where a candidate window was first observed. The two sources expose the
/// same compositor-level facts through one accessor set.
#[derive(Debug, Clone)]
pub enum WindowSource {
    /// A shareable on-screen surface from the capture enumeration.
    Surface(WindowDescriptor),
    /// An accessibility window resolved against its compositor descriptor.
    Accessibility(WindowDescriptor),
}

impl WindowSource {
    pub fn descriptor(&self) -> &WindowDescriptor {
        match self {
            WindowSource::Surface(d) | WindowSource::Accessibility(d) => d,
        }
    }

    pub fn id(&self) -> WindowId {
        self.descriptor().id
    }

    pub fn bounds(&self) -> CGRect {
        self.descriptor().bounds
    }

    pub fn title(&self) -> Option<&str> {
        self.descriptor().title.as_deref()
    }

    pub fn pid(&self) -> pid_t {
        self.descriptor().owner_pid
    }

    pub fn on_screen(&self) -> bool {
        self.descriptor().on_screen
    }

    pub fn layer(&self) -> i32 {
        self.descriptor().layer
    }
}

struct Candidate {
    id: WindowId,
    elem: AXUIElement,
    source: WindowSource,
    spaces: Vec<SpaceId>,
}

pub struct ScanOutcome {
    pub records: Vec<WindowRecord>,
    pub previews: Vec<(WindowId, PreviewImage)>,
}

/// Discovers the current set of windows for one application.
///
/// `existing` is the repository's current view for the pid (used to carry
/// timestamps forward) and `fresh_previews` the ids whose preview does not
/// need recapturing.
pub async fn scan_application(
    pid: pid_t,
    info: &AppInfo,
    existing: &[WindowRecord],
    fresh_previews: &HashSet<WindowId>,
    config: &TrackerConfig,
) -> ScanOutcome {
    let started = Instant::now();
    let app_elem = AXUIElement::application(pid);
    let descriptors = window_server::descriptors_for_pid(pid);
    let active_spaces = window_server::active_space_ids();
    let owner_hidden = crate::sys::app::is_app_hidden(pid);

    let capture_allowed = !config.headless && permissions::current().screen_capture;

    let mut used_ids: HashSet<WindowId> = HashSet::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    let ax_windows = app_elem.windows().unwrap_or_default();

    if capture_allowed {
        for surface in shareable_surfaces(pid).await {
            if used_ids.contains(&surface.id) {
                continue;
            }
            let Some(elem) = locate_element_for_surface(&surface, &ax_windows) else {
                trace!(id = surface.id.as_u32(), "No AX element found for surface");
                continue;
            };
            let has_controls = matches!(elem.close_button(), Ok(Some(_)))
                || matches!(elem.minimize_button(), Ok(Some(_)));
            if !has_controls {
                continue;
            }
            used_ids.insert(surface.id);
            candidates.push(Candidate {
                id: surface.id,
                elem,
                spaces: window_server::window_spaces(surface.id),
                source: WindowSource::Surface(surface),
            });
        }
    }

    // Accessibility pass. The surface pass already claimed its ids, so each
    // window appears at most once.
    for elem in accessibility_windows(pid, ax_windows) {
        let Ok(role) = elem.role() else { continue };
        let subrole = elem.subrole().ok().flatten();
        let (Ok(size), Ok(position)) = (elem.size(), elem.position()) else {
            continue;
        };
        if !identity::element_discoverable(&role, subrole.as_deref(), size, position) {
            continue;
        }

        let Some(id) = identity::resolve_window_id(&elem, &descriptors, &used_ids) else {
            continue;
        };
        if used_ids.contains(&id) {
            continue;
        }
        let Some(descriptor) = descriptors.iter().find(|d| d.id == id).cloned() else {
            trace!(id = id.as_u32(), "Resolved id has no compositor descriptor");
            continue;
        };
        if !identity::descriptor_qualifies(&descriptor) {
            continue;
        }

        let spaces = window_server::window_spaces(id);
        let disposition = WindowDisposition {
            on_screen: descriptor.on_screen,
            fullscreen: elem.fullscreen().unwrap_or(false),
            minimized: elem.minimized().unwrap_or(false),
            owner_hidden,
            on_active_space: spaces.iter().any(|s| active_spaces.contains(s)),
            is_main: app_elem.main_window().ok().as_ref() == Some(&elem),
        };
        if !identity::should_accept_window(disposition) {
            trace!(id = id.as_u32(), "Rejecting ghost window");
            continue;
        }

        used_ids.insert(id);
        candidates.push(Candidate {
            id,
            elem,
            spaces,
            source: WindowSource::Accessibility(descriptor),
        });
    }

    let outcome = construct_records(
        pid,
        info,
        &app_elem,
        owner_hidden,
        candidates,
        existing,
        fresh_previews,
        capture_allowed,
    )
    .await;

    debug!(
        pid,
        windows = outcome.records.len(),
        previews = outcome.previews.len(),
        elapsed = ?started.elapsed(),
        "Discovery scan finished"
    );
    outcome
}

/// The shareable on-screen surfaces owned by `pid` that are worth tracking.
async fn shareable_surfaces(pid: pid_t) -> Vec<WindowDescriptor> {
    let enumeration =
        tokio::task::spawn_blocking(window_server::on_screen_descriptors);
    let surfaces = match tokio::time::timeout(SURFACE_QUERY_TIMEOUT, enumeration).await {
        Ok(Ok(surfaces)) => surfaces,
        Ok(Err(err)) => {
            warn!(pid, "Surface enumeration task failed: {err}");
            Vec::new()
        }
        Err(_) => {
            warn!(pid, "Surface enumeration timed out");
            Vec::new()
        }
    };
    surfaces
        .into_iter()
        .filter(|s| s.owner_pid == pid)
        .filter(|s| s.layer == NORMAL_WINDOW_LEVEL)
        .filter(|s| {
            s.bounds.size.width >= MIN_WINDOW_DIMENSION
                && s.bounds.size.height >= MIN_WINDOW_DIMENSION
        })
        .collect()
}

/// Pairs a capture surface with the AX window it depicts: window-id
/// equality first, then fuzzy title, then geometry with the loose
/// tolerance.
fn locate_element_for_surface(
    surface: &WindowDescriptor,
    ax_windows: &[AXUIElement],
) -> Option<AXUIElement> {
    if let Some(elem) = ax_windows
        .iter()
        .find(|e| window_server::window_id_for_element(e) == Some(surface.id))
    {
        return Some(elem.clone());
    }

    if let Some(surface_title) = surface.title.as_deref() {
        let by_title = ax_windows.iter().find(|e| {
            e.title().is_ok_and(|t| identity::fuzzy_title_match(&t, surface_title))
        });
        if let Some(elem) = by_title {
            return Some(elem.clone());
        }
    }

    ax_windows
        .iter()
        .find(|e| {
            e.frame().is_ok_and(|f| {
                identity::geometry_matches(f, surface.bounds, CAPTURE_GEOMETRY_TOLERANCE)
            })
        })
        .cloned()
}

/// The app's window elements: the standard accessibility query plus the
/// brute-force remote-token fallback, deduplicated by OS equality.
fn accessibility_windows(pid: pid_t, mut elems: Vec<AXUIElement>) -> Vec<AXUIElement> {
    for element_id in 0..BRUTE_FORCE_ELEMENT_IDS {
        let Some(elem) = AXUIElement::from_remote_token(pid, element_id) else {
            continue;
        };
        let Ok(Some(subrole)) = elem.subrole() else {
            continue;
        };
        if subrole != AX_STANDARD_WINDOW_SUBROLE && subrole != AX_DIALOG_SUBROLE {
            continue;
        }
        if !elems.contains(&elem) {
            elems.push(elem);
        }
    }
    elems
}

#[allow(clippy::too_many_arguments)]
async fn construct_records(
    pid: pid_t,
    info: &AppInfo,
    app_elem: &AXUIElement,
    owner_hidden: bool,
    candidates: Vec<Candidate>,
    existing: &[WindowRecord],
    fresh_previews: &HashSet<WindowId>,
    capture_allowed: bool,
) -> ScanOutcome {
    let timestamps: HashMap<WindowId, (SystemTime, SystemTime)> = existing
        .iter()
        .map(|r| (r.id, (r.creation_time, r.last_interaction_time)))
        .collect();

    let semaphore = Arc::new(Semaphore::new(SCAN_FAN_OUT));
    let mut tasks = JoinSet::new();
    for candidate in candidates {
        let semaphore = semaphore.clone();
        let app_elem = app_elem.clone();
        let bundle_id = info.bundle_id.clone();
        let carried = timestamps.get(&candidate.id).copied();
        let want_preview = capture_allowed && !fresh_previews.contains(&candidate.id);
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return None;
            };
            tokio::time::timeout(
                RECORD_TASK_TIMEOUT,
                build_record(candidate, app_elem, bundle_id, owner_hidden, carried, want_preview),
            )
            .await
            .ok()
            .flatten()
        });
    }

    let mut outcome = ScanOutcome { records: Vec::new(), previews: Vec::new() };
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some((record, preview))) => {
                if let Some(image) = preview {
                    outcome.previews.push((record.id, image));
                }
                outcome.records.push(record);
            }
            Ok(None) => {}
            Err(err) => debug!(pid, "Record construction task failed: {err}"),
        }
    }
    outcome
}

async fn build_record(
    candidate: Candidate,
    app_elem: AXUIElement,
    bundle_id: Option<String>,
    owner_hidden: bool,
    carried: Option<(SystemTime, SystemTime)>,
    want_preview: bool,
) -> Option<(WindowRecord, Option<PreviewImage>)> {
    let Candidate { id, elem, source, spaces } = candidate;

    let title = elem
        .title()
        .ok()
        .filter(|t| !t.is_empty())
        .or_else(|| source.title().map(str::to_string));
    let is_minimized = elem.minimized().unwrap_or(false);
    let now = SystemTime::now();
    let (creation_time, last_interaction_time) = carried.unwrap_or((now, now));

    let record = WindowRecord {
        id,
        title,
        owner_bundle_id: bundle_id,
        owner_pid: source.pid(),
        bounds: source.bounds(),
        is_minimized,
        is_owner_hidden: owner_hidden,
        is_visible: source.on_screen() && !is_minimized && !owner_hidden,
        desktop_space: spaces.first().copied(),
        last_interaction_time,
        creation_time,
        ax_handle: elem.clone(),
        app_ax_handle: app_elem,
        close_button_handle: elem.close_button().ok().flatten(),
    };

    let preview = if want_preview {
        window_server::capture_window_image(id)
            .map_err(|err| trace!(id = id.as_u32(), "Preview capture failed: {err}"))
            .ok()
    } else {
        None
    };

    Some((record, preview))
}

#[cfg(test)]
mod tests {
    use objc2_core_foundation::{CGPoint, CGSize};

    use super::*;

    fn surface(id: u32, title: Option<&str>) -> WindowDescriptor {
        WindowDescriptor {
            id: WindowId::new(id),
            title: title.map(str::to_string),
            bounds: CGRect::new(CGPoint::new(10.0, 10.0), CGSize::new(640.0, 480.0)),
            owner_pid: 42,
            layer: 0,
            alpha: 1.0,
            on_screen: true,
        }
    }

    #[test]
    fn window_source_exposes_descriptor_facts() {
        let d = surface(9, Some("Mail"));
        let from_surface = WindowSource::Surface(d.clone());
        let from_ax = WindowSource::Accessibility(d);

        assert_eq!(from_surface.id(), from_ax.id());
        assert_eq!(from_surface.title(), Some("Mail"));
        assert_eq!(from_ax.pid(), 42);
        assert!(from_surface.on_screen());
        assert_eq!(from_ax.layer(), 0);
    }

    #[tokio::test]
    async fn scan_of_a_dead_pid_yields_nothing() {
        // No process, no AX tree, stubbed window-server queries: the scan
        // must come back empty rather than erroring.
        let config = TrackerConfig { headless: true, ..Default::default() };
        let info = AppInfo { bundle_id: None, localized_name: None };
        let outcome = scan_application(-1, &info, &[], &HashSet::new(), &config).await;
        assert!(outcome.records.is_empty());
        assert!(outcome.previews.is_empty());
    }
}
