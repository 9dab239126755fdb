//! Window identity resolution and admission rules.
//!
//! The accessibility tree and the compositor disagree about what exists.
//! This module holds the pure logic that decides which compositor id an
//! accessibility element refers to, which candidates are worth tracking at
//! all, and whether a previously cached handle still points at a live
//! window.

use objc2_core_foundation::{CGPoint, CGRect, CGSize};

use crate::common::collections::HashSet;
use crate::sys::app::pid_t;
use crate::sys::axuielement::{
    AX_DIALOG_SUBROLE, AX_STANDARD_WINDOW_SUBROLE, AX_WINDOW_ROLE, AXUIElement,
};
use crate::sys::window_server::{self, WindowDescriptor, WindowId};

/// Windows smaller than this in either dimension are tooltips, popovers and
/// other chrome, never documents.
pub const MIN_WINDOW_DIMENSION: f64 = 100.0;
/// Fully transparent surfaces are bookkeeping artifacts.
pub const MIN_WINDOW_ALPHA: f64 = 0.01;
/// The compositor level of ordinary document windows.
pub const NORMAL_WINDOW_LEVEL: i32 = 0;
/// Position/size slack when matching AX geometry against the compositor.
pub const AX_GEOMETRY_TOLERANCE: f64 = 2.0;
/// Looser slack used when pairing capture surfaces with AX handles.
pub const CAPTURE_GEOMETRY_TOLERANCE: f64 = 10.0;
/// Minimum word-set overlap for a fuzzy title match.
pub const FUZZY_WORD_OVERLAP: f64 = 0.9;

/// Resolves the compositor id for an accessibility element.
///
/// The private get-window-id call wins when it answers; otherwise the
/// candidates outside `excluded` are consulted in three tiers: exact
/// (trimmed) title, geometry within [`AX_GEOMETRY_TOLERANCE`], then fuzzy
/// title. A lower tier is only consulted when every higher tier produced no
/// match.
pub fn resolve_window_id(
    elem: &AXUIElement,
    candidates: &[WindowDescriptor],
    excluded: &HashSet<WindowId>,
) -> Option<WindowId> {
    if let Some(id) = window_server::window_id_for_element(elem) {
        return Some(id);
    }
    let title = elem.title().ok();
    let frame = elem.frame().ok();
    resolve_from_candidates(title.as_deref(), frame, candidates, excluded)
}

pub fn resolve_from_candidates(
    title: Option<&str>,
    frame: Option<CGRect>,
    candidates: &[WindowDescriptor],
    excluded: &HashSet<WindowId>,
) -> Option<WindowId> {
    let pool: Vec<&WindowDescriptor> =
        candidates.iter().filter(|c| !excluded.contains(&c.id)).collect();

    let trimmed = title.map(str::trim).filter(|t| !t.is_empty());
    if let Some(wanted) = trimmed {
        let exact = pool
            .iter()
            .find(|c| c.title.as_deref().map(str::trim) == Some(wanted));
        if let Some(c) = exact {
            return Some(c.id);
        }
    }

    if let Some(frame) = frame {
        let geometric = pool
            .iter()
            .find(|c| geometry_matches(c.bounds, frame, AX_GEOMETRY_TOLERANCE));
        if let Some(c) = geometric {
            return Some(c.id);
        }
    }

    if let Some(wanted) = trimmed {
        let fuzzy = pool
            .iter()
            .find(|c| c.title.as_deref().is_some_and(|t| fuzzy_title_match(wanted, t)));
        if let Some(c) = fuzzy {
            return Some(c.id);
        }
    }

    None
}

/// Both position components and both size components within `tolerance`.
pub fn geometry_matches(a: CGRect, b: CGRect, tolerance: f64) -> bool {
    (a.origin.x - b.origin.x).abs() <= tolerance
        && (a.origin.y - b.origin.y).abs() <= tolerance
        && (a.size.width - b.size.width).abs() <= tolerance
        && (a.size.height - b.size.height).abs() <= tolerance
}

/// Case-insensitive substring containment in either direction, or at least
/// [`FUZZY_WORD_OVERLAP`] word-set overlap. Symmetric by construction.
pub fn fuzzy_title_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(&b) || b.contains(&a) {
        return true;
    }

    let words_a: HashSet<&str> = a.split(' ').filter(|w| !w.is_empty()).collect();
    let words_b: HashSet<&str> = b.split(' ').filter(|w| !w.is_empty()).collect();
    let larger = words_a.len().max(words_b.len());
    if larger == 0 {
        return false;
    }
    let shared = words_a.intersection(&words_b).count();
    shared as f64 / larger as f64 >= FUZZY_WORD_OVERLAP
}

/// Whether an accessibility element meets the discovery criteria: role
/// window, standard-window or dialog subrole if a subrole exists at all,
/// plausible size, finite position.
pub fn element_discoverable(
    role: &str,
    subrole: Option<&str>,
    size: CGSize,
    position: CGPoint,
) -> bool {
    if role != AX_WINDOW_ROLE {
        return false;
    }
    if let Some(subrole) = subrole {
        if subrole != AX_STANDARD_WINDOW_SUBROLE && subrole != AX_DIALOG_SUBROLE {
            return false;
        }
    }
    size.width >= MIN_WINDOW_DIMENSION
        && size.height >= MIN_WINDOW_DIMENSION
        && position.x.is_finite()
        && position.y.is_finite()
}

/// Whether a compositor descriptor meets the discovery criteria.
pub fn descriptor_qualifies(descriptor: &WindowDescriptor) -> bool {
    descriptor.bounds.size.width >= MIN_WINDOW_DIMENSION
        && descriptor.bounds.size.height >= MIN_WINDOW_DIMENSION
        && descriptor.alpha > MIN_WINDOW_ALPHA
        && descriptor.layer >= NORMAL_WINDOW_LEVEL
}

/// Everything the acceptance policy needs to know about one candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowDisposition {
    pub on_screen: bool,
    pub fullscreen: bool,
    pub minimized: bool,
    pub owner_hidden: bool,
    pub on_active_space: bool,
    pub is_main: bool,
}

/// The ghost filter. A window that is off screen while on an active space,
/// with no state that would plausibly hide it, is a compositor artifact and
/// is rejected. Everything with at least one plausible reason to exist is
/// accepted.
pub fn should_accept_window(d: WindowDisposition) -> bool {
    if !d.on_screen && d.on_active_space && !d.minimized && !d.fullscreen && !d.owner_hidden {
        return false;
    }
    d.on_screen
        || d.fullscreen
        || d.minimized
        || d.owner_hidden
        || !d.on_active_space
        || d.is_main
}

/// Whether a cached handle still refers to a live window.
///
/// Fast path: a cannot-complete status on a geometry read means the remote
/// element is gone. Slow path: the handle must correspond to one of the
/// app's current windows, by window id or by OS equality. Every other error
/// is treated as still valid so a transiently unresponsive app does not get
/// its cache purged.
pub fn is_valid_element(elem: &AXUIElement, pid: pid_t) -> bool {
    match elem.position() {
        Err(err) if err.is_cannot_complete() => return false,
        _ => {}
    }
    match elem.size() {
        Err(err) if err.is_cannot_complete() => return false,
        _ => {}
    }

    let app = AXUIElement::application(pid);
    let Ok(windows) = app.windows() else {
        return true;
    };
    if windows.is_empty() {
        // An empty list here is indistinguishable from a transient failure.
        return true;
    }

    let id = window_server::window_id_for_element(elem);
    windows.iter().any(|candidate| {
        candidate == elem
            || (id.is_some() && window_server::window_id_for_element(candidate) == id)
    })
}
