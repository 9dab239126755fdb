//! Per-application accessibility watchers.
//!
//! One observer per tracked pid, registered for the window-level
//! notifications the tracker reacts to. Everything the downstream handler
//! needs is extracted at notification time (on the main run loop, where the
//! element is guaranteed live), so handling does not require further AX
//! round-trips.

#![allow(non_upper_case_globals)]

use std::sync::Arc;

use objc2_application_services::AXError;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::actor;
use crate::common::collections::HashMap;
use crate::sys::app::pid_t;
use crate::sys::axuielement::{AX_WINDOW_ROLE, AXUIElement, Error as AxError};
use crate::sys::observer::Observer;
use crate::sys::window_server::{self, WindowId};

const kAXWindowCreatedNotification: &str = "AXWindowCreated";
const kAXUIElementDestroyedNotification: &str = "AXUIElementDestroyed";
const kAXWindowMiniaturizedNotification: &str = "AXWindowMiniaturized";
const kAXWindowDeminiaturizedNotification: &str = "AXWindowDeminiaturized";
const kAXApplicationHiddenNotification: &str = "AXApplicationHidden";
const kAXApplicationShownNotification: &str = "AXApplicationShown";
const kAXFocusedWindowChangedNotification: &str = "AXFocusedWindowChanged";
const kAXWindowResizedNotification: &str = "AXWindowResized";
const kAXWindowMovedNotification: &str = "AXWindowMoved";
const kAXTitleChangedNotification: &str = "AXTitleChanged";
const kAXMainWindowChangedNotification: &str = "AXMainWindowChanged";

const WATCHED_NOTIFICATIONS: &[&str] = &[
    kAXWindowCreatedNotification,
    kAXUIElementDestroyedNotification,
    kAXWindowMiniaturizedNotification,
    kAXWindowDeminiaturizedNotification,
    kAXApplicationHiddenNotification,
    kAXApplicationShownNotification,
    kAXFocusedWindowChangedNotification,
    kAXWindowResizedNotification,
    kAXWindowMovedNotification,
    kAXTitleChangedNotification,
    kAXMainWindowChangedNotification,
];

/// A notification's subject element, with its window id resolved eagerly.
#[derive(Debug, Clone)]
pub struct ElementRef {
    pub handle: AXUIElement,
    pub window_id: Option<WindowId>,
}

impl ElementRef {
    fn resolve(handle: AXUIElement) -> Self {
        let window_id = window_server::window_id_for_element(&handle);
        ElementRef { handle, window_id }
    }

    #[cfg(test)]
    pub fn for_test(handle: AXUIElement, window_id: Option<WindowId>) -> Self {
        ElementRef { handle, window_id }
    }
}

#[derive(Debug, Clone)]
pub enum AxEvent {
    WindowCreated(ElementRef),
    ElementDestroyed(ElementRef),
    WindowMinimized(ElementRef),
    WindowRestored(ElementRef),
    ApplicationHidden,
    ApplicationRevealed,
    WindowFocused(ElementRef),
    MainWindowChanged(ElementRef),
    WindowResized(ElementRef),
    WindowMoved(ElementRef),
    /// `title` is present only when the element's role is window and a
    /// fresh title could be read.
    TitleChanged { elem: ElementRef, title: Option<String> },
}

pub type Sender = actor::Sender<(pid_t, AxEvent)>;

fn translate(elem: AXUIElement, notif: &str) -> Option<AxEvent> {
    Some(match notif {
        kAXWindowCreatedNotification => AxEvent::WindowCreated(ElementRef::resolve(elem)),
        kAXUIElementDestroyedNotification => AxEvent::ElementDestroyed(ElementRef::resolve(elem)),
        kAXWindowMiniaturizedNotification => AxEvent::WindowMinimized(ElementRef::resolve(elem)),
        kAXWindowDeminiaturizedNotification => AxEvent::WindowRestored(ElementRef::resolve(elem)),
        kAXApplicationHiddenNotification => AxEvent::ApplicationHidden,
        kAXApplicationShownNotification => AxEvent::ApplicationRevealed,
        kAXFocusedWindowChangedNotification => AxEvent::WindowFocused(ElementRef::resolve(elem)),
        kAXMainWindowChangedNotification => AxEvent::MainWindowChanged(ElementRef::resolve(elem)),
        kAXWindowResizedNotification => AxEvent::WindowResized(ElementRef::resolve(elem)),
        kAXWindowMovedNotification => AxEvent::WindowMoved(ElementRef::resolve(elem)),
        kAXTitleChangedNotification => {
            let title = match elem.role() {
                Ok(role) if role == AX_WINDOW_ROLE => elem.title().ok(),
                _ => None,
            };
            AxEvent::TitleChanged { elem: ElementRef::resolve(elem), title }
        }
        _ => {
            trace!(?notif, "Unhandled AX notification");
            return None;
        }
    })
}

/// The observer for one pid.
struct AxWatcher {
    // Dropping the observer invalidates the registration.
    _observer: Observer,
}

impl AxWatcher {
    fn subscribe(pid: pid_t, events_tx: Sender) -> Result<AxWatcher, AxError> {
        let observer = Observer::new(pid)?;
        let observer = observer.install(move |elem, notif| {
            if let Some(event) = translate(elem, notif) {
                events_tx.send((pid, event));
            }
        });

        let app = AXUIElement::application(pid);
        for notif in WATCHED_NOTIFICATIONS {
            if let Err(err) = observer.add_notification(&app, notif) {
                if subscription_error_is_fatal(&err) {
                    debug!(pid, ?notif, ?err, "Watching app failed");
                    return Err(err);
                }
                trace!(pid, ?notif, ?err, "Skipping unsupported notification");
            }
        }

        Ok(AxWatcher { _observer: observer })
    }
}

fn subscription_error_is_fatal(err: &AxError) -> bool {
    match err {
        AxError::Ax(code) => !matches!(
            *code,
            AXError::NotificationAlreadyRegistered
                | AXError::NotificationUnsupported
                | AXError::NotImplemented
        ),
        AxError::NotFound => true,
    }
}

/// Multiplexes one accessibility watcher per tracked pid into a single
/// `(pid, event)` stream.
pub struct WatcherManager {
    watchers: Mutex<HashMap<pid_t, AxWatcher>>,
    events_tx: Sender,
}

impl WatcherManager {
    pub fn new(events_tx: Sender) -> Arc<Self> {
        Arc::new(WatcherManager {
            watchers: Mutex::new(HashMap::new()),
            events_tx,
        })
    }

    /// Starts watching `pid`. Idempotent; returns false when the observer
    /// cannot be constructed (e.g. a hardened process), in which case the
    /// pid is simply not watched and refreshes stay purely reactive.
    pub fn watch(&self, pid: pid_t) -> bool {
        let mut watchers = self.watchers.lock();
        if watchers.contains_key(&pid) {
            return true;
        }
        match AxWatcher::subscribe(pid, self.events_tx.clone()) {
            Ok(watcher) => {
                trace!(pid, "Watching application");
                watchers.insert(pid, watcher);
                true
            }
            Err(err) => {
                debug!(pid, ?err, "Could not construct accessibility watcher");
                false
            }
        }
    }

    pub fn unwatch(&self, pid: pid_t) {
        if self.watchers.lock().remove(&pid).is_some() {
            trace!(pid, "Stopped watching application");
        }
    }

    pub fn unwatch_all(&self) {
        self.watchers.lock().clear();
    }

    pub fn is_watched(&self, pid: pid_t) -> bool {
        self.watchers.lock().contains_key(&pid)
    }

    pub fn watched_pids(&self) -> Vec<pid_t> {
        self.watchers.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_error_classification() {
        assert!(!subscription_error_is_fatal(&AxError::Ax(
            AXError::NotificationAlreadyRegistered
        )));
        assert!(!subscription_error_is_fatal(&AxError::Ax(AXError::NotificationUnsupported)));
        assert!(!subscription_error_is_fatal(&AxError::Ax(AXError::NotImplemented)));
        assert!(subscription_error_is_fatal(&AxError::Ax(AXError::CannotComplete)));
        assert!(subscription_error_is_fatal(&AxError::Ax(AXError::APIDisabled)));
    }

    #[test]
    fn title_change_translation_requires_window_role() {
        // An application element has no AXWindow role, so no title payload
        // may be attached even though the element itself has a title.
        let elem = AXUIElement::application(std::process::id() as pid_t);
        match translate(elem, kAXTitleChangedNotification) {
            Some(AxEvent::TitleChanged { title, .. }) => assert!(title.is_none()),
            other => panic!("unexpected translation: {other:?}"),
        }
    }

    #[test]
    fn unknown_notifications_are_dropped() {
        let elem = AXUIElement::application(1);
        assert!(translate(elem, "AXSomethingNovel").is_none());
    }
}
