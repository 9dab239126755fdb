//! Process-wide permission state.
//!
//! Accessibility and screen-capture grants can change while the engine is
//! running (the user can toggle them in System Settings), so the state is
//! re-read on a background poll and published through a watch channel.
//! Init-on-first-use, no teardown.

use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::watch;
use tracing::{error, info};

use crate::sys::skylight::{AXIsProcessTrusted, CGPreflightScreenCaptureAccess};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionState {
    pub accessibility: bool,
    pub screen_capture: bool,
}

fn read_permissions() -> PermissionState {
    PermissionState {
        accessibility: unsafe { AXIsProcessTrusted() },
        screen_capture: unsafe { CGPreflightScreenCaptureAccess() },
    }
}

static CHANNEL: Lazy<watch::Sender<PermissionState>> = Lazy::new(|| {
    let initial = read_permissions();
    let (tx, _) = watch::channel(initial);
    let poll_tx = tx.clone();
    let spawned = thread::Builder::new().name("panoptes-permissions".into()).spawn(move || {
        loop {
            thread::sleep(POLL_INTERVAL);
            let state = read_permissions();
            poll_tx.send_if_modified(|current| {
                if *current != state {
                    info!(?state, "Permission state changed");
                    *current = state;
                    true
                } else {
                    false
                }
            });
        }
    });
    if let Err(e) = spawned {
        error!("Failed to spawn permission poll thread: {e}");
    }
    tx
});

/// The most recently observed permission state.
pub fn current() -> PermissionState {
    *CHANNEL.subscribe().borrow()
}

/// A receiver that yields whenever the permission state changes.
pub fn subscribe() -> watch::Receiver<PermissionState> {
    CHANNEL.subscribe()
}
