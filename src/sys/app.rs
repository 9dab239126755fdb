//! Helpers for reasoning about running applications.

use objc2::rc::Retained;
use objc2_app_kit::{NSApplicationActivationPolicy, NSRunningApplication, NSWorkspace};
use objc2_foundation::NSString;
use serde::{Deserialize, Serialize};

pub use nix::libc::pid_t;

pub trait NSRunningApplicationExt {
    fn with_process_id(pid: pid_t) -> Option<Retained<Self>>;
    fn pid(&self) -> pid_t;
    fn bundle_id(&self) -> Option<Retained<NSString>>;
    fn localized_name(&self) -> Option<Retained<NSString>>;
    fn is_regular(&self) -> bool;
}

impl NSRunningApplicationExt for NSRunningApplication {
    fn with_process_id(pid: pid_t) -> Option<Retained<Self>> {
        NSRunningApplication::runningApplicationWithProcessIdentifier(pid)
    }

    fn pid(&self) -> pid_t {
        self.processIdentifier()
    }

    fn bundle_id(&self) -> Option<Retained<NSString>> {
        self.bundleIdentifier()
    }

    fn localized_name(&self) -> Option<Retained<NSString>> {
        self.localizedName()
    }

    fn is_regular(&self) -> bool {
        self.activationPolicy() == NSApplicationActivationPolicy::Regular
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub bundle_id: Option<String>,
    pub localized_name: Option<String>,
}

impl From<&NSRunningApplication> for AppInfo {
    fn from(app: &NSRunningApplication) -> Self {
        AppInfo {
            bundle_id: app.bundle_id().as_deref().map(ToString::to_string),
            localized_name: app.localized_name().as_deref().map(ToString::to_string),
        }
    }
}

/// A pid paired with what we know about the application that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppHandle {
    pub pid: pid_t,
    pub info: AppInfo,
}

impl AppHandle {
    pub fn from_running(app: &NSRunningApplication) -> Self {
        AppHandle {
            pid: app.pid(),
            info: AppInfo::from(app),
        }
    }
}

/// Enumerates the currently running regular-activation-policy applications.
/// Menu-bar agents and background daemons are excluded; so are XPC services,
/// which report phantom standard windows.
pub fn running_regular_apps() -> Vec<AppHandle> {
    NSWorkspace::sharedWorkspace()
        .runningApplications()
        .into_iter()
        .filter(|app| app.is_regular())
        .filter(|app| !is_xpc_process(app.pid()))
        .map(|app| AppHandle::from_running(&app))
        .collect()
}

pub fn is_app_hidden(pid: pid_t) -> bool {
    NSRunningApplication::with_process_id(pid).map_or(false, |app| app.isHidden())
}

pub fn is_app_terminated(pid: pid_t) -> bool {
    // SAFETY: NSRunningApplication is thread-safe.
    NSRunningApplication::with_process_id(pid).map_or(true, |app| app.isTerminated())
}

fn is_xpc_process(pid: pid_t) -> bool {
    process_type_code(pid) == Some(*b"XPC!")
}

/// Reads the four-char process type code from the legacy process manager,
/// the only piece of it this crate needs. There is no modern replacement
/// for distinguishing XPC services short of sysctl string matching.
fn process_type_code(pid: pid_t) -> Option<[u8; 4]> {
    #[repr(C)]
    #[derive(Default, Clone, Copy)]
    struct Psn {
        high: u32,
        low: u32,
    }

    // The legacy record is 72 bytes with two-byte packing. Only the type
    // code is read; the rest exists so the call writes within bounds.
    #[allow(dead_code)]
    #[repr(C, packed(2))]
    struct LegacyProcessInfo {
        length: u32,
        name: *const u8,
        serial: Psn,
        type_code: u32,
        tail: [u8; 48],
    }
    const _: () = assert!(size_of::<LegacyProcessInfo>() == 72);

    #[link(name = "ApplicationServices", kind = "framework")]
    unsafe extern "C" {
        // Both deprecated since macOS 10.9, both still functional.
        fn GetProcessForPID(pid: pid_t, psn: *mut Psn) -> i32;
        fn GetProcessInformation(psn: *const Psn, info: *mut LegacyProcessInfo) -> i32;
    }

    let mut psn = Psn::default();
    if unsafe { GetProcessForPID(pid, &mut psn) } != 0 {
        return None;
    }

    let mut info = LegacyProcessInfo {
        length: size_of::<LegacyProcessInfo>() as u32,
        name: std::ptr::null(),
        serial: Psn::default(),
        type_code: 0,
        tail: [0; 48],
    };
    if unsafe { GetProcessInformation(&psn, &mut info) } != 0 {
        return None;
    }
    let type_code = info.type_code;
    Some(type_code.to_be_bytes())
}
