//! Watches the workspace notification queue for application lifecycle and
//! space changes.

use std::mem;

use objc2::rc::{Allocated, Retained};
use objc2::{AnyThread, ClassType, DeclaredClass, Encode, Encoding, define_class, msg_send, sel};
use objc2_app_kit::{NSRunningApplication, NSWorkspace, NSWorkspaceApplicationKey};
use objc2_foundation::{NSNotification, NSNotificationCenter, NSObject};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info_span, trace, warn};

use crate::actor;
use crate::sys::app::{AppHandle, NSRunningApplicationExt, pid_t};

pub type Sender = actor::Sender<ProcessEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessEvent {
    /// A regular application is about to launch. Carries no cache change.
    WillLaunch(ProcessEventApp),
    Launched(ProcessEventApp),
    Terminated(pid_t),
    Activated(ProcessEventApp),
    /// The user switched virtual desktops.
    SpaceChanged,
}

/// The application payload carried by process events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEventApp {
    pub pid: pid_t,
    pub bundle_id: Option<String>,
    pub localized_name: Option<String>,
}

impl From<&ProcessEventApp> for AppHandle {
    fn from(app: &ProcessEventApp) -> Self {
        AppHandle {
            pid: app.pid,
            info: crate::sys::app::AppInfo {
                bundle_id: app.bundle_id.clone(),
                localized_name: app.localized_name.clone(),
            },
        }
    }
}

impl ProcessEventApp {
    fn from_running(app: &NSRunningApplication) -> Self {
        ProcessEventApp {
            pid: app.pid(),
            bundle_id: app.bundle_id().as_deref().map(ToString::to_string),
            localized_name: app.localized_name().as_deref().map(ToString::to_string),
        }
    }
}

#[repr(C)]
struct Instance {
    events_tx: Sender,
    frontmost: Mutex<Option<ProcessEventApp>>,
}

unsafe impl Encode for Instance {
    const ENCODING: Encoding = Encoding::Object;
}

define_class! {
    // SAFETY:
    // - The superclass NSObject does not have any subclassing requirements.
    // - `WorkspaceObserverInner` does not implement `Drop`.
    #[unsafe(super(NSObject))]
    #[ivars = Box<Instance>]
    struct WorkspaceObserverInner;

    // SAFETY: Each of these method signatures must match their invocations.
    impl WorkspaceObserverInner {
        #[unsafe(method_id(initWith:))]
        fn init(this: Allocated<Self>, instance: Instance) -> Option<Retained<Self>> {
            let this = this.set_ivars(Box::new(instance));
            unsafe { msg_send![super(this), init] }
        }

        #[unsafe(method(recvAppEvent:))]
        fn recv_app_event(&self, notif: &NSNotification) {
            trace!("{notif:#?}");
            self.handle_app_event(notif);
        }

        #[unsafe(method(recvSpaceChangedEvent:))]
        fn recv_space_changed_event(&self, notif: &NSNotification) {
            trace!("{notif:#?}");
            self.send_event(ProcessEvent::SpaceChanged);
        }
    }
}

impl WorkspaceObserverInner {
    fn new(events_tx: Sender) -> Retained<Self> {
        let instance = Instance {
            events_tx,
            frontmost: Mutex::new(None),
        };
        unsafe { msg_send![Self::alloc(), initWith: instance] }
    }

    fn handle_app_event(&self, notif: &NSNotification) {
        use objc2_app_kit::*;
        let Some(app) = self.running_application(notif) else {
            return;
        };
        let name = &*notif.name();
        let span = info_span!("process_watcher::handle_app_event", ?name);
        let _guard = span.enter();

        if unsafe { NSWorkspaceDidTerminateApplicationNotification } == name {
            self.send_event(ProcessEvent::Terminated(app.pid()));
            return;
        }

        // Launch and activation events are only interesting for regular
        // applications; agents and daemons have no windows to track.
        if !app.is_regular() {
            trace!(pid = app.pid(), "Ignoring non-regular application event");
            return;
        }
        let payload = ProcessEventApp::from_running(&app);

        if unsafe { NSWorkspaceWillLaunchApplicationNotification } == name {
            self.send_event(ProcessEvent::WillLaunch(payload));
        } else if unsafe { NSWorkspaceDidLaunchApplicationNotification } == name {
            self.send_event(ProcessEvent::Launched(payload));
        } else if unsafe { NSWorkspaceDidActivateApplicationNotification } == name {
            *self.ivars().frontmost.lock() = Some(payload.clone());
            self.send_event(ProcessEvent::Activated(payload));
        } else {
            warn!("Unexpected app event: {notif:?}");
        }
    }

    fn send_event(&self, event: ProcessEvent) {
        self.ivars().events_tx.send(event);
    }

    fn running_application(
        &self,
        notif: &NSNotification,
    ) -> Option<Retained<NSRunningApplication>> {
        let info = notif.userInfo();
        let Some(info) = info else {
            warn!("Got app notification without user info: {notif:?}");
            return None;
        };
        let app = unsafe { info.valueForKey(NSWorkspaceApplicationKey) };
        let Some(app) = app else {
            warn!("Got app notification without app object: {notif:?}");
            return None;
        };
        assert!(app.class() == NSRunningApplication::class());
        let app: Retained<NSRunningApplication> = unsafe { mem::transmute(app) };
        Some(app)
    }
}

pub struct ProcessWatcher {
    inner: Retained<WorkspaceObserverInner>,
}

// SAFETY: notification delivery happens on the main thread; the handle only
// reads the lock-guarded frontmost slot and releases ObjC references, both
// of which are thread-safe.
unsafe impl Send for ProcessWatcher {}
unsafe impl Sync for ProcessWatcher {}

impl ProcessWatcher {
    /// Registers for the workspace notifications. Must be called on the
    /// main thread, where the workspace notification center delivers.
    pub fn new(events_tx: Sender) -> Self {
        let handler = WorkspaceObserverInner::new(events_tx);

        // SAFETY: Selector must have signature fn(&self, &NSNotification)
        let register_unsafe =
            |selector, notif_name, center: &Retained<NSNotificationCenter>, object| unsafe {
                center.addObserver_selector_name_object(
                    &handler,
                    selector,
                    Some(notif_name),
                    Some(object),
                );
            };

        let workspace = &NSWorkspace::sharedWorkspace();
        let workspace_center = &workspace.notificationCenter();
        unsafe {
            use objc2_app_kit::*;
            register_unsafe(
                sel!(recvAppEvent:),
                NSWorkspaceWillLaunchApplicationNotification,
                workspace_center,
                workspace,
            );
            register_unsafe(
                sel!(recvAppEvent:),
                NSWorkspaceDidLaunchApplicationNotification,
                workspace_center,
                workspace,
            );
            register_unsafe(
                sel!(recvAppEvent:),
                NSWorkspaceDidTerminateApplicationNotification,
                workspace_center,
                workspace,
            );
            register_unsafe(
                sel!(recvAppEvent:),
                NSWorkspaceDidActivateApplicationNotification,
                workspace_center,
                workspace,
            );
            register_unsafe(
                sel!(recvSpaceChangedEvent:),
                NSWorkspaceActiveSpaceDidChangeNotification,
                workspace_center,
                workspace,
            );
        };

        // Seed the frontmost slot so the property answers before the first
        // activation notification arrives.
        if let Some(app) = workspace.frontmostApplication() {
            *handler.ivars().frontmost.lock() = Some(ProcessEventApp::from_running(&app));
        }

        ProcessWatcher { inner: handler }
    }

    /// The application most recently reported as active.
    pub fn frontmost_application(&self) -> Option<ProcessEventApp> {
        self.inner.ivars().frontmost.lock().clone()
    }
}

impl Drop for ProcessWatcher {
    fn drop(&mut self) {
        let workspace = NSWorkspace::sharedWorkspace();
        unsafe {
            workspace.notificationCenter().removeObserver(&self.inner);
        }
    }
}
