//! The tracker fuses process-lifecycle signals, per-application
//! accessibility notifications and space changes into debounced refresh
//! operations against the repository, and publishes the resulting diffs.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use objc2::MainThreadMarker;
use parking_lot::Mutex;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, trace, warn};

use crate::actor::ax_watcher::{AxEvent, ElementRef, WatcherManager};
use crate::actor::broadcast::Bus;
use crate::actor::debounce::Debouncer;
use crate::actor::process_watcher::{ProcessEvent, ProcessEventApp, ProcessWatcher};
use crate::actor::{self, Receiver};
use crate::common::collections::{HashMap, HashSet};
use crate::common::config::TrackerConfig;
use crate::common::log;
use crate::discovery;
use crate::identity;
use crate::model::record::{ChangeReport, WindowRecord};
use crate::model::repository::WindowRepository;
use crate::sys::app::{self, AppHandle, AppInfo, NSRunningApplicationExt, pid_t};
use crate::sys::axuielement::AXUIElement;
use crate::sys::window_server::{self, PreviewImage, WindowId};
use crate::sys::permissions;

/// Downstream change notifications, one per repository transition.
#[derive(Debug, Clone)]
pub enum WindowEvent {
    Appeared(WindowRecord),
    Disappeared(WindowId),
    Changed(WindowRecord),
    PreviewCaptured(WindowId, PreviewImage),
}

type Validator = Arc<dyn Fn(&AXUIElement, pid_t) -> bool + Send + Sync>;

pub struct Tracker {
    pub(crate) repo: Arc<WindowRepository>,
    config: TrackerConfig,
    debouncer: Debouncer,
    watchers: Arc<WatcherManager>,
    events: Bus<WindowEvent>,
    process_events: Bus<ProcessEvent>,
    validator: Validator,
    shutdown: CancellationToken,
    process_watcher: Mutex<Option<ProcessWatcher>>,
    ax_events_rx: Mutex<Option<Receiver<(pid_t, AxEvent)>>>,
}

static_assertions::assert_impl_all!(Tracker: Send, Sync);

impl Tracker {
    pub fn new(config: TrackerConfig) -> Arc<Tracker> {
        if config.debug_logging {
            log::init_logging(true);
        }
        log::set_log_handler(config.log_handler.clone());

        let (ax_tx, ax_rx) = actor::channel();
        Arc::new(Tracker {
            repo: Arc::new(WindowRepository::new(
                config.preview_cache_capacity,
                config.preview_cache_duration,
                config.ignored_pids.clone(),
            )),
            debouncer: Debouncer::new(),
            watchers: WatcherManager::new(ax_tx),
            events: Bus::new(),
            process_events: Bus::new(),
            validator: Arc::new(identity::is_valid_element),
            shutdown: CancellationToken::new(),
            process_watcher: Mutex::new(None),
            ax_events_rx: Mutex::new(Some(ax_rx)),
            config,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(config: TrackerConfig, validator: Validator) -> Arc<Tracker> {
        let (ax_tx, ax_rx) = actor::channel();
        Arc::new(Tracker {
            repo: Arc::new(WindowRepository::new(
                config.preview_cache_capacity,
                config.preview_cache_duration,
                config.ignored_pids.clone(),
            )),
            debouncer: Debouncer::new(),
            watchers: WatcherManager::new(ax_tx),
            events: Bus::new(),
            process_events: Bus::new(),
            validator,
            shutdown: CancellationToken::new(),
            process_watcher: Mutex::new(None),
            ax_events_rx: Mutex::new(Some(ax_rx)),
            config,
        })
    }

    /// Subscribes to the workspace and accessibility streams, begins
    /// watching every running regular application, and schedules the
    /// initial full scan. Must be called on the main thread so the
    /// workspace observers register against the main notification center.
    pub fn start_tracking(self: &Arc<Self>, _mtm: MainThreadMarker) {
        let (process_tx, process_rx) = actor::channel();
        *self.process_watcher.lock() = Some(ProcessWatcher::new(process_tx));

        let ax_rx = self
            .ax_events_rx
            .lock()
            .take()
            .expect("start_tracking may only be called once per tracker");
        self.spawn_event_loop(process_rx, ax_rx);

        for app in app::running_regular_apps() {
            self.watchers.watch(app.pid);
        }
        self.schedule_full_scan();
        info!("Window tracking started");
    }

    /// Drops subscriptions, unwatches every pid and cancels all pending
    /// debounced operations. In-flight scans are allowed to finish.
    pub fn stop_tracking(&self) {
        self.shutdown.cancel();
        *self.process_watcher.lock() = None;
        self.watchers.unwatch_all();
        self.debouncer.cancel_all();
        info!("Window tracking stopped");
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WindowEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_process_events(&self) -> tokio::sync::broadcast::Receiver<ProcessEvent> {
        self.process_events.subscribe()
    }

    pub fn frontmost_application(&self) -> Option<ProcessEventApp> {
        self.process_watcher.lock().as_ref().and_then(|w| w.frontmost_application())
    }

    // Read-only cache accessors.

    pub fn read_cache(&self, pid: pid_t) -> Vec<WindowRecord> {
        self.repo.windows_for_pid(pid)
    }

    pub fn read_cache_by_bundle(&self, bundle_id: &str) -> Vec<WindowRecord> {
        self.repo.windows_for_bundle(bundle_id)
    }

    pub fn read_cache_window(&self, id: WindowId) -> Option<WindowRecord> {
        self.repo.window_by_id(id)
    }

    pub fn read_all(&self) -> Vec<WindowRecord> {
        self.repo.all_windows()
    }

    pub fn window_ids_with_fresh_previews(&self, pid: pid_t) -> HashSet<WindowId> {
        self.repo.fresh_preview_ids(pid)
    }

    pub fn tracked_applications(&self) -> Vec<AppHandle> {
        self.repo
            .tracked_pids()
            .into_iter()
            .map(|pid| {
                let info = objc2_app_kit::NSRunningApplication::with_process_id(pid)
                    .map(|app| AppInfo::from(&*app))
                    .unwrap_or_else(|| {
                        let bundle_id = self
                            .repo
                            .windows_for_pid(pid)
                            .first()
                            .and_then(|r| r.owner_bundle_id.clone());
                        AppInfo { bundle_id, localized_name: None }
                    });
                AppHandle { pid, info }
            })
            .collect()
    }

    // Operations.

    /// Discovers and stores one application's windows, emitting the diff.
    pub async fn refresh_application(&self, pid: pid_t, info: &AppInfo) {
        if self.repo.is_ignored(pid) {
            trace!(pid, "Not refreshing ignored pid");
            return;
        }
        let existing = self.repo.windows_for_pid(pid);
        let fresh = self.repo.fresh_preview_ids(pid);
        let outcome =
            discovery::scan_application(pid, info, &existing, &fresh, &self.config).await;

        let report = self.repo.store(pid, outcome.records);
        self.emit_report(report);
        for (id, image) in outcome.previews {
            self.repo.store_preview(id, image.clone());
            self.events.publish(WindowEvent::PreviewCaptured(id, image));
        }
    }

    /// Rebuilds the cache for every running regular application, then
    /// validates each touched pid.
    pub async fn full_scan(&self) {
        let started = Instant::now();
        let apps = app::running_regular_apps();
        for app in &apps {
            self.refresh_application(app.pid, &app.info).await;
        }
        for app in &apps {
            self.purify_and_emit(app.pid);
        }
        self.repo.purge_expired_previews();
        info!(apps = apps.len(), elapsed = ?started.elapsed(), "Full scan finished");
    }

    /// Begins tracking one application on demand and returns its windows.
    pub async fn track_application(&self, app: &AppHandle) -> Vec<WindowRecord> {
        self.watchers.watch(app.pid);
        self.refresh_application(app.pid, &app.info).await;
        self.repo.windows_for_pid(app.pid)
    }

    /// Captures a preview for one window right now, stores it and notifies
    /// subscribers.
    pub fn capture_preview(&self, id: WindowId) -> Option<PreviewImage> {
        if self.config.headless || !permissions::current().screen_capture {
            return None;
        }
        match window_server::capture_window_image(id) {
            Ok(image) => {
                self.repo.store_preview(id, image.clone());
                self.events.publish(WindowEvent::PreviewCaptured(id, image.clone()));
                Some(image)
            }
            Err(err) => {
                debug!(id = id.as_u32(), "Preview capture failed: {err}");
                None
            }
        }
    }

    /// Recaptures every cached window of `pid` whose preview went stale.
    pub async fn refresh_previews(&self, pid: pid_t) {
        if self.config.headless || !permissions::current().screen_capture {
            return;
        }
        let cached = self.repo.window_ids_for_pid(pid);
        let fresh = self.repo.fresh_preview_ids(pid);
        for id in cached.difference(&fresh) {
            match window_server::capture_window_image(*id) {
                Ok(image) => {
                    self.repo.store_preview(*id, image.clone());
                    self.events.publish(WindowEvent::PreviewCaptured(*id, image));
                }
                Err(err) => trace!(id = id.as_u32(), "Preview refresh failed: {err}"),
            }
        }
    }

    // Event plumbing.

    fn spawn_event_loop(
        self: &Arc<Self>,
        process_rx: Receiver<ProcessEvent>,
        ax_rx: Receiver<(pid_t, AxEvent)>,
    ) {
        enum Incoming {
            Process((Span, ProcessEvent)),
            Ax((Span, (pid_t, AxEvent))),
        }

        let this = self.clone();
        tokio::spawn(async move {
            let mut merged = StreamExt::merge(
                UnboundedReceiverStream::new(process_rx).map(Incoming::Process),
                UnboundedReceiverStream::new(ax_rx).map(Incoming::Ax),
            );
            loop {
                let incoming = tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    incoming = merged.next() => incoming,
                };
                match incoming {
                    Some(Incoming::Process((span, event))) => {
                        let _guard = span.enter();
                        this.handle_process_event(event);
                    }
                    Some(Incoming::Ax((span, (pid, event)))) => {
                        let _guard = span.enter();
                        this.handle_ax_event(pid, event);
                    }
                    None => break,
                }
            }
            debug!("Tracker event loop exited");
        });
    }

    pub(crate) fn handle_process_event(self: &Arc<Self>, event: ProcessEvent) {
        trace!(?event, "Process event");
        self.process_events.publish(event.clone());
        match event {
            ProcessEvent::WillLaunch(_) => {}
            ProcessEvent::Launched(app) => {
                self.watchers.watch(app.pid);
                self.schedule_refresh(app.pid, (&app).into());
            }
            ProcessEvent::Terminated(pid) => {
                self.watchers.unwatch(pid);
                for record in self.repo.remove_all(pid) {
                    self.events.publish(WindowEvent::Disappeared(record.id));
                }
            }
            ProcessEvent::Activated(app) => {
                self.schedule_refresh(app.pid, (&app).into());
            }
            ProcessEvent::SpaceChanged => self.schedule_full_scan(),
        }
    }

    pub(crate) fn handle_ax_event(self: &Arc<Self>, pid: pid_t, event: AxEvent) {
        trace!(pid, ?event, "Accessibility event");
        match event {
            AxEvent::WindowCreated(_) => self.schedule_refresh(pid, AppHandle {
                pid,
                info: app_info_for(pid),
            }),
            AxEvent::ElementDestroyed(_) => {
                let this = self.clone();
                self.debouncer.debounce(format!("destroyed-{pid}"), move || async move {
                    this.handle_window_destroyed(pid);
                });
            }
            AxEvent::WindowMinimized(elem) => self.schedule_flag_flip(pid, elem, true),
            AxEvent::WindowRestored(elem) => self.schedule_flag_flip(pid, elem, false),
            AxEvent::ApplicationHidden => self.schedule_hidden_flip(pid, true),
            AxEvent::ApplicationRevealed => self.schedule_hidden_flip(pid, false),
            AxEvent::WindowFocused(elem) | AxEvent::MainWindowChanged(elem) => {
                let this = self.clone();
                self.debouncer.debounce(format!("interaction-{pid}"), move || async move {
                    let report = this.repo.modify(pid, |set| {
                        if let Some(record) = locate_record(set, &elem) {
                            record.last_interaction_time = SystemTime::now();
                        }
                    });
                    this.emit_report(report);
                });
            }
            AxEvent::WindowResized(_) | AxEvent::WindowMoved(_) => {
                // The compositor descriptor is the source of truth for
                // bounds, so geometry changes refresh the whole app.
                self.schedule_refresh(pid, AppHandle { pid, info: app_info_for(pid) });
            }
            AxEvent::TitleChanged { elem, title } => {
                let Some(title) = title else { return };
                let key = match elem.window_id {
                    Some(id) => format!("title-{pid}-{}", id.as_u32()),
                    None => format!("title-{pid}"),
                };
                let this = self.clone();
                self.debouncer.debounce(key, move || async move {
                    let report = this.repo.modify(pid, |set| {
                        if let Some(record) = locate_record(set, &elem) {
                            record.title = Some(title);
                        }
                    });
                    this.emit_report(report);
                });
            }
        }
    }

    fn schedule_refresh(self: &Arc<Self>, pid: pid_t, app: AppHandle) {
        let this = self.clone();
        self.debouncer.debounce(format!("refresh-{pid}"), move || async move {
            this.refresh_application(pid, &app.info).await;
        });
    }

    fn schedule_full_scan(self: &Arc<Self>) {
        let this = self.clone();
        self.debouncer.debounce("space-change", move || async move {
            this.full_scan().await;
        });
    }

    fn schedule_flag_flip(self: &Arc<Self>, pid: pid_t, elem: ElementRef, minimized: bool) {
        let key = match elem.window_id {
            Some(id) => format!("minimize-{pid}-{}", id.as_u32()),
            None => format!("minimize-{pid}"),
        };
        let this = self.clone();
        self.debouncer.debounce(key, move || async move {
            this.purify_and_emit(pid);
            let report = this.repo.modify(pid, |set| {
                if let Some(record) = locate_record(set, &elem) {
                    record.is_minimized = minimized;
                }
            });
            this.emit_report(report);
        });
    }

    fn schedule_hidden_flip(self: &Arc<Self>, pid: pid_t, hidden: bool) {
        let this = self.clone();
        self.debouncer.debounce(format!("hidden-{pid}"), move || async move {
            this.purify_and_emit(pid);
            let report = this.repo.modify(pid, |set| {
                for record in set.values_mut() {
                    record.is_owner_hidden = hidden;
                }
            });
            this.emit_report(report);
        });
    }

    fn handle_window_destroyed(self: &Arc<Self>, pid: pid_t) {
        if app::is_app_terminated(pid) {
            // The destroy notification can outlive its process; in that
            // case everything the pid owned is gone.
            warn!(pid, "Window destroyed for terminated process; purging");
            self.watchers.unwatch(pid);
            for record in self.repo.remove_all(pid) {
                self.events.publish(WindowEvent::Disappeared(record.id));
            }
        } else {
            self.purify_and_emit(pid);
        }
    }

    fn purify_and_emit(&self, pid: pid_t) {
        let before = self.repo.window_ids_for_pid(pid);
        if before.is_empty() {
            return;
        }
        let validator = self.validator.clone();
        let retained = self.repo.purify(pid, |handle| validator(handle, pid));
        let after: HashSet<WindowId> = retained.iter().map(|r| r.id).collect();
        for id in before.difference(&after) {
            self.events.publish(WindowEvent::Disappeared(*id));
        }
    }

    fn emit_report(&self, report: ChangeReport) {
        if report.is_empty() {
            return;
        }
        for record in report.added {
            self.events.publish(WindowEvent::Appeared(record));
        }
        for id in report.removed {
            self.events.publish(WindowEvent::Disappeared(id));
        }
        for record in report.modified {
            self.events.publish(WindowEvent::Changed(record));
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.debouncer.cancel_all();
    }
}

fn locate_record<'a>(
    set: &'a mut HashMap<WindowId, WindowRecord>,
    elem: &ElementRef,
) -> Option<&'a mut WindowRecord> {
    // Prefer the id the element reported; fall back to OS equality of the
    // handle for windows whose id never resolved.
    if let Some(id) = elem.window_id {
        if set.contains_key(&id) {
            return set.get_mut(&id);
        }
    }
    set.values_mut().find(|record| record.ax_handle == elem.handle)
}

fn app_info_for(pid: pid_t) -> AppInfo {
    objc2_app_kit::NSRunningApplication::with_process_id(pid)
        .map(|app| AppInfo::from(&*app))
        .unwrap_or(AppInfo { bundle_id: None, localized_name: None })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::model::record::testing::record;

    fn test_tracker() -> Arc<Tracker> {
        Tracker::new_for_test(
            TrackerConfig { headless: true, ..Default::default() },
            Arc::new(|_, _| true),
        )
    }

    fn drain(
        rx: &mut tokio::sync::broadcast::Receiver<WindowEvent>,
    ) -> Vec<WindowEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        events
    }

    async fn settle() {
        tokio::time::advance(Duration::from_millis(400)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn termination_emits_one_disappearance_per_window() {
        let tracker = test_tracker();
        tracker.repo.store(42, vec![record(1, 42, 1), record(2, 42, 2), record(3, 42, 3)]);
        let mut rx = tracker.subscribe();

        tracker.handle_process_event(ProcessEvent::Terminated(42));

        let events = drain(&mut rx);
        let mut gone: Vec<u32> = events
            .iter()
            .map(|e| match e {
                WindowEvent::Disappeared(id) => id.as_u32(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        gone.sort_unstable();
        assert_eq!(gone, vec![1, 2, 3]);
        assert!(tracker.read_cache(42).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn title_changes_coalesce_into_one_event() {
        let tracker = test_tracker();
        let seeded = record(7, 42, 7);
        let handle = seeded.ax_handle.clone();
        tracker.repo.store(42, vec![seeded]);
        let mut rx = tracker.subscribe();

        for n in 1..=5 {
            tracker.handle_ax_event(42, AxEvent::TitleChanged {
                elem: ElementRef::for_test(handle.clone(), Some(WindowId::new(7))),
                title: Some(format!("title {n}")),
            });
            tokio::time::advance(Duration::from_millis(20)).await;
        }
        settle().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1, "expected one coalesced event, got {events:?}");
        match &events[0] {
            WindowEvent::Changed(record) => {
                assert_eq!(record.title.as_deref(), Some("title 5"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn minimize_flips_the_matching_record() {
        let tracker = test_tracker();
        let seeded = record(7, 42, 7);
        let handle = seeded.ax_handle.clone();
        tracker.repo.store(42, vec![seeded, record(8, 42, 8)]);
        let mut rx = tracker.subscribe();

        tracker.handle_ax_event(
            42,
            AxEvent::WindowMinimized(ElementRef::for_test(handle.clone(), Some(WindowId::new(7)))),
        );
        settle().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            WindowEvent::Changed(record) => {
                assert_eq!(record.id, WindowId::new(7));
                assert!(record.is_minimized);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Restore flips it back.
        tracker.handle_ax_event(
            42,
            AxEvent::WindowRestored(ElementRef::for_test(handle, Some(WindowId::new(7)))),
        );
        settle().await;
        assert!(!tracker.read_cache_window(WindowId::new(7)).unwrap().is_minimized);
    }

    #[tokio::test(start_paused = true)]
    async fn record_location_falls_back_to_handle_equality() {
        let tracker = test_tracker();
        let seeded = record(7, 42, 7);
        let handle = seeded.ax_handle.clone();
        tracker.repo.store(42, vec![seeded]);

        // The notification element resolved no window id.
        tracker.handle_ax_event(
            42,
            AxEvent::WindowMinimized(ElementRef::for_test(handle, None)),
        );
        settle().await;

        assert!(tracker.read_cache_window(WindowId::new(7)).unwrap().is_minimized);
    }

    #[tokio::test(start_paused = true)]
    async fn app_hidden_flips_every_record_of_the_pid() {
        let tracker = test_tracker();
        tracker.repo.store(42, vec![record(1, 42, 1), record(2, 42, 2)]);
        tracker.repo.store(50, vec![record(9, 50, 9)]);

        tracker.handle_ax_event(42, AxEvent::ApplicationHidden);
        settle().await;

        assert!(tracker.read_cache(42).iter().all(|r| r.is_owner_hidden));
        assert!(!tracker.read_cache(50)[0].is_owner_hidden);

        tracker.handle_ax_event(42, AxEvent::ApplicationRevealed);
        settle().await;
        assert!(tracker.read_cache(42).iter().all(|r| !r.is_owner_hidden));
    }

    #[tokio::test(start_paused = true)]
    async fn focus_touches_interaction_time_without_change_events() {
        let tracker = test_tracker();
        let seeded = record(7, 42, 7);
        let handle = seeded.ax_handle.clone();
        let before = seeded.last_interaction_time;
        tracker.repo.store(42, vec![seeded]);
        let mut rx = tracker.subscribe();

        tracker.handle_ax_event(
            42,
            AxEvent::WindowFocused(ElementRef::for_test(handle, Some(WindowId::new(7)))),
        );
        settle().await;

        assert!(drain(&mut rx).is_empty());
        let after = tracker.read_cache_window(WindowId::new(7)).unwrap().last_interaction_time;
        assert!(after >= before);
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_window_is_purged_via_validation() {
        // Use our own pid so the terminated-process shortcut does not kick
        // in and the purify path is exercised.
        let pid = std::process::id() as pid_t;
        let dead = AXUIElement::application(999_999);
        let dead_for_validator = dead.clone();
        let tracker = Tracker::new_for_test(
            TrackerConfig { headless: true, ..Default::default() },
            Arc::new(move |handle, _| *handle != dead_for_validator),
        );

        let live = record(1, pid, 1);
        let mut doomed = record(2, pid, 2);
        doomed.ax_handle = dead;
        tracker.repo.store(pid, vec![live, doomed]);
        let mut rx = tracker.subscribe();

        tracker.handle_ax_event(
            pid,
            AxEvent::ElementDestroyed(ElementRef::for_test(
                AXUIElement::application(999_999),
                Some(WindowId::new(2)),
            )),
        );
        settle().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], WindowEvent::Disappeared(id) if id == WindowId::new(2)));
        let remaining = tracker.read_cache(pid);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, WindowId::new(1));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_refresh_requests_coalesce() {
        let tracker = test_tracker();
        for _ in 0..10 {
            tracker.handle_process_event(ProcessEvent::Activated(ProcessEventApp {
                pid: -1,
                bundle_id: None,
                localized_name: None,
            }));
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(tracker.debouncer.pending_count(), 1);
        settle().await;
        assert_eq!(tracker.debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tracking_cancels_pending_work() {
        let tracker = test_tracker();
        tracker.repo.store(42, vec![record(7, 42, 7)]);
        let mut rx = tracker.subscribe();

        tracker.handle_ax_event(42, AxEvent::ApplicationHidden);
        tracker.stop_tracking();
        settle().await;

        assert!(drain(&mut rx).is_empty());
        assert!(!tracker.read_cache(42)[0].is_owner_hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_pids_never_enter_the_cache() {
        let tracker = Tracker::new_for_test(
            TrackerConfig {
                headless: true,
                ignored_pids: [42].into_iter().collect(),
                ..Default::default()
            },
            Arc::new(|_, _| true),
        );
        tracker.repo.store(42, vec![record(1, 42, 1)]);
        assert!(tracker.read_cache(42).is_empty());
    }
}
