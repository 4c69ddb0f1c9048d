// SPDX-License-Identifier: GPL-3.0-only

//! Plugin lifecycle coordination
//!
//! Plugins are independent consumers of the live session: capture results,
//! preview frames, or both. The [`PluginCoordinator`] attaches them once the
//! session is ready, fans events out to every attached plugin, and detaches
//! them on rebind, stop or request.
//!
//! Each delivery runs on its own blocking task. A slow plugin delays only
//! itself; an error or panic is logged here and goes no further.
//!
//! Detaching closes the plugin's gate: the call waits for callbacks already
//! running and no callback starts afterwards.
//!
//! Plugin code never runs under the registry lock. An attaching plugin is
//! parked in a `starting` list while `initialize` and `on_attach` run, and
//! is committed only if the session it was given is still the live one.

pub mod capture_log;
pub mod qr_scanner;

pub use capture_log::CaptureLogPlugin;
pub use qr_scanner::QrScannerPlugin;

use crate::backends::camera::{CameraFrame, SessionHandle, SessionState, SessionStateMachine};
use crate::config::CaptureConfiguration;
use crate::controller::CameraController;
use crate::errors::PluginError;
use crate::pipelines::photo::CaptureResult;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What an attached plugin can see of the session
#[derive(Debug, Clone)]
pub struct SessionHolder {
    pub session: SessionHandle,
    pub configuration: Arc<CaptureConfiguration>,
}

/// An independent consumer of the capture session
///
/// Callbacks are synchronous and run on blocking worker threads.
pub trait CameraPlugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Called once, before the first attach
    ///
    /// Keep a [`WeakCameraController`](crate::controller::WeakCameraController)
    /// rather than a clone of `controller` to avoid a reference cycle. Must
    /// not attach or detach plugins.
    fn initialize(&self, _controller: &CameraController) {}

    /// The session became ready; returning an error leaves the plugin detached
    fn on_attach(&self, holder: &SessionHolder) -> Result<(), PluginError>;

    /// The session went away or the plugin was detached
    fn on_detach(&self);

    /// Whether [`on_frame`](Self::on_frame) should be called
    fn wants_frames(&self) -> bool {
        false
    }

    fn on_frame(&self, _frame: &CameraFrame) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_capture_result(&self, _result: &CaptureResult) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Plugin identity: same allocation
fn same_plugin(a: &Arc<dyn CameraPlugin>, b: &Arc<dyn CameraPlugin>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// An attached plugin and its delivery gate
#[derive(Clone)]
struct AttachedPlugin {
    plugin: Arc<dyn CameraPlugin>,
    /// `true` while deliveries are allowed; detach takes the write side
    gate: Arc<RwLock<bool>>,
    /// A frame callback is running; later frames are dropped for this plugin
    frame_busy: Arc<AtomicBool>,
}

impl AttachedPlugin {
    fn new(plugin: Arc<dyn CameraPlugin>) -> Self {
        Self {
            plugin,
            gate: Arc::new(RwLock::new(true)),
            frame_busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Close the gate, waiting for running callbacks, then notify the plugin
    async fn close(self) {
        *self.gate.write().await = false;
        notify_detach(&self.plugin);
    }
}

fn notify_detach(plugin: &Arc<dyn CameraPlugin>) {
    if catch_unwind(AssertUnwindSafe(|| plugin.on_detach())).is_err() {
        error!(plugin = plugin.name(), "Plugin panicked in on_detach");
    }
    info!(plugin = plugin.name(), "Plugin detached");
}

#[derive(Default)]
struct Registry {
    /// Waiting for the next ready session
    pending: Vec<Arc<dyn CameraPlugin>>,
    /// Running `initialize` or `on_attach` outside the lock
    starting: Vec<Arc<dyn CameraPlugin>>,
    attached: Vec<AttachedPlugin>,
    /// Session the attached plugins were given
    holder: Option<SessionHolder>,
    stopped: bool,
}

impl Registry {
    fn contains(&self, plugin: &Arc<dyn CameraPlugin>) -> bool {
        self.pending.iter().any(|p| same_plugin(p, plugin))
            || self.starting.iter().any(|p| same_plugin(p, plugin))
            || self.attached.iter().any(|a| same_plugin(&a.plugin, plugin))
    }

    /// Remove a starting plugin; `false` if it was detached meanwhile
    fn take_starting(&mut self, plugin: &Arc<dyn CameraPlugin>) -> bool {
        let before = self.starting.len();
        self.starting.retain(|p| !same_plugin(p, plugin));
        self.starting.len() != before
    }
}

/// Result of an attach call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// `on_attach` ran and the plugin receives events
    Attached,
    /// Session not ready yet; attaches on the next ready transition
    Queued,
    /// Plugin was already attached or queued
    AlreadyAttached,
    /// `on_attach` failed; the plugin is not attached
    Failed,
    /// The session stopped, or the plugin was detached while attaching
    Rejected,
}

/// Handle to a fan-out delivery
///
/// Dropping it does not cancel anything; [`finished`](Self::finished)
/// waits for every plugin callback of this delivery.
#[must_use = "deliveries run in the background; await `finished` to wait for them"]
pub struct Delivery {
    tasks: Vec<JoinHandle<()>>,
}

impl Delivery {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn finished(self) {
        futures::future::join_all(self.tasks).await;
    }
}

struct CoordinatorInner {
    session: Arc<SessionStateMachine>,
    registry: Mutex<Registry>,
}

/// Attaches plugins to the live session and fans events out to them
#[derive(Clone)]
pub struct PluginCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl PluginCoordinator {
    pub fn new(session: Arc<SessionStateMachine>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                session,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Attach a plugin, or queue it until the session is ready
    ///
    /// `initialize` runs once for a plugin that was neither attached nor
    /// queued. Attaching an attached plugin again is a no-op. Both
    /// `initialize` and `on_attach` run on the calling thread.
    pub fn attach(
        &self,
        plugin: Arc<dyn CameraPlugin>,
        initialize: impl FnOnce(&dyn CameraPlugin),
    ) -> AttachOutcome {
        {
            let mut registry = self.registry();
            if registry.stopped {
                warn!(plugin = plugin.name(), "Attach after session stop ignored");
                return AttachOutcome::Rejected;
            }
            if registry.contains(&plugin) {
                debug!(plugin = plugin.name(), "Plugin already attached");
                return AttachOutcome::AlreadyAttached;
            }
            registry.starting.push(Arc::clone(&plugin));
        }

        if catch_unwind(AssertUnwindSafe(|| initialize(plugin.as_ref()))).is_err() {
            error!(plugin = plugin.name(), "Plugin panicked in initialize");
            self.registry().take_starting(&plugin);
            return AttachOutcome::Failed;
        }

        let holder = {
            let mut registry = self.registry();
            let current = registry.holder.clone();
            match current {
                Some(holder) => holder,
                None => {
                    if !registry.take_starting(&plugin) || registry.stopped {
                        return AttachOutcome::Rejected;
                    }
                    info!(plugin = plugin.name(), "Session not ready, plugin attach queued");
                    registry.pending.push(plugin);
                    return AttachOutcome::Queued;
                }
            }
        };
        self.attach_started(plugin, holder)
    }

    /// Run `on_attach` for a plugin in the `starting` list and commit it
    ///
    /// The commit only happens if the plugin was not detached meanwhile and
    /// `holder` still describes the live session. A plugin that attached to
    /// a session which went away gets `on_detach` and is retried against the
    /// new session, or queued if there is none.
    fn attach_started(&self, plugin: Arc<dyn CameraPlugin>, mut holder: SessionHolder) -> AttachOutcome {
        loop {
            let attached = Self::start(Arc::clone(&plugin), &holder);

            let mut registry = self.registry();
            if !registry.take_starting(&plugin) || registry.stopped {
                drop(registry);
                if attached.is_some() {
                    notify_detach(&plugin);
                }
                debug!(plugin = plugin.name(), "Plugin detached while attaching");
                return AttachOutcome::Rejected;
            }
            let Some(attached) = attached else {
                return AttachOutcome::Failed;
            };

            let live = registry.holder.clone();
            match live {
                Some(current) if current.session.id == holder.session.id => {
                    registry.attached.push(attached);
                    return AttachOutcome::Attached;
                }
                Some(current) => {
                    registry.starting.push(Arc::clone(&plugin));
                    drop(registry);
                    debug!(plugin = plugin.name(), "Session changed during attach, retrying");
                    notify_detach(&plugin);
                    holder = current;
                }
                None => {
                    registry.pending.push(Arc::clone(&plugin));
                    drop(registry);
                    notify_detach(&plugin);
                    info!(plugin = plugin.name(), "Session went away during attach, plugin queued");
                    return AttachOutcome::Queued;
                }
            }
        }
    }

    /// Detach a plugin
    ///
    /// Idempotent. When this returns the plugin receives no further
    /// deliveries. A plugin still inside `on_attach` is not committed and
    /// gets `on_detach` once `on_attach` returns.
    pub async fn detach(&self, plugin: &Arc<dyn CameraPlugin>) {
        let attached = {
            let mut registry = self.registry();
            registry.pending.retain(|p| !same_plugin(p, plugin));
            registry.starting.retain(|p| !same_plugin(p, plugin));
            let position = registry
                .attached
                .iter()
                .position(|a| same_plugin(&a.plugin, plugin));
            position.map(|index| registry.attached.remove(index))
        };

        match attached {
            Some(attached) => attached.close().await,
            None => debug!(plugin = plugin.name(), "Detach of unattached plugin ignored"),
        }
    }

    /// Number of plugins currently receiving events
    pub fn attached_count(&self) -> usize {
        self.registry().attached.len()
    }

    pub fn pending_count(&self) -> usize {
        self.registry().pending.len()
    }

    /// Deliver a capture result to every attached plugin
    pub fn broadcast_result(&self, result: &CaptureResult) -> Delivery {
        let snapshot = self.registry().attached.clone();
        let tasks = snapshot
            .into_iter()
            .map(|attached| {
                let result = result.clone();
                tokio::task::spawn_blocking(move || {
                    let open = attached.gate.blocking_read();
                    if !*open {
                        return;
                    }
                    let plugin = &attached.plugin;
                    report(plugin.name(), "on_capture_result", || plugin.on_capture_result(&result));
                })
            })
            .collect();
        Delivery { tasks }
    }

    /// Deliver a preview frame to attached plugins that want frames
    ///
    /// A plugin still busy with an earlier frame skips this one.
    pub fn broadcast_frame(&self, frame: &CameraFrame) -> Delivery {
        let snapshot: Vec<_> = self
            .registry()
            .attached
            .iter()
            .filter(|a| a.plugin.wants_frames())
            .cloned()
            .collect();

        let tasks = snapshot
            .into_iter()
            .filter(|attached| !attached.frame_busy.swap(true, Ordering::AcqRel))
            .map(|attached| {
                let frame = frame.clone();
                tokio::task::spawn_blocking(move || {
                    {
                        let open = attached.gate.blocking_read();
                        if *open {
                            let plugin = &attached.plugin;
                            report(plugin.name(), "on_frame", || plugin.on_frame(&frame));
                        }
                    }
                    attached.frame_busy.store(false, Ordering::Release);
                })
            })
            .collect();
        Delivery { tasks }
    }

    /// Follow session state changes until the session stops
    pub fn spawn_state_watcher(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let mut rx = self.inner.session.subscribe();

        tokio::spawn(async move {
            loop {
                let state = rx.borrow_and_update().clone();
                let stopped = matches!(state, SessionState::Stopped);
                coordinator.apply_state(state).await;
                if stopped || rx.changed().await.is_err() {
                    break;
                }
            }
            debug!("Plugin state watcher exiting");
        })
    }

    /// React to one session state
    ///
    /// Ready attaches queued plugins (and re-attaches everything when the
    /// session changed underneath). Any other state detaches attached
    /// plugins; they are queued again unless the session stopped.
    pub async fn apply_state(&self, state: SessionState) {
        match state {
            SessionState::Ready { session } => {
                let current = self.registry().holder.as_ref().map(|h| h.session.id);
                if current != Some(session.id) {
                    self.suspend_attached(false).await;
                }

                let configuration = self
                    .inner
                    .session
                    .configuration()
                    .unwrap_or_else(|| Arc::new(CaptureConfiguration::default()));
                let holder = SessionHolder {
                    session,
                    configuration,
                };

                let pending = {
                    let mut registry = self.registry();
                    registry.holder = Some(holder.clone());
                    let pending = std::mem::take(&mut registry.pending);
                    registry.starting.extend(pending.iter().cloned());
                    pending
                };
                if pending.is_empty() {
                    return;
                }

                info!(count = pending.len(), "Attaching queued plugins");
                let attaches = pending.into_iter().map(|plugin| {
                    let coordinator = self.clone();
                    let holder = holder.clone();
                    tokio::task::spawn_blocking(move || coordinator.attach_started(plugin, holder))
                });
                for joined in futures::future::join_all(attaches).await {
                    if let Err(e) = joined {
                        error!(error = %e, "Queued plugin attach task failed");
                    }
                }
            }
            SessionState::Stopped => {
                self.suspend_attached(true).await;
            }
            SessionState::Initializing | SessionState::Error { .. } => {
                self.suspend_attached(false).await;
            }
        }
    }

    /// Detach all attached plugins; requeue them unless `stop`
    async fn suspend_attached(&self, stop: bool) {
        let detached = {
            let mut registry = self.registry();
            registry.holder = None;
            let detached = std::mem::take(&mut registry.attached);
            if stop {
                registry.stopped = true;
                registry.pending.clear();
            } else {
                registry
                    .pending
                    .extend(detached.iter().map(|a| Arc::clone(&a.plugin)));
            }
            detached
        };

        if !detached.is_empty() {
            info!(count = detached.len(), stop, "Detaching plugins from session");
        }
        for attached in detached {
            attached.close().await;
        }
    }

    /// Run `on_attach`; `None` if it failed
    fn start(plugin: Arc<dyn CameraPlugin>, holder: &SessionHolder) -> Option<AttachedPlugin> {
        let name = plugin.name().to_string();
        match catch_unwind(AssertUnwindSafe(|| plugin.on_attach(holder))) {
            Ok(Ok(())) => {
                info!(plugin = %name, session = %holder.session.id, "Plugin attached");
                Some(AttachedPlugin::new(plugin))
            }
            Ok(Err(e)) => {
                warn!(plugin = %name, error = %e, "Plugin attach failed");
                None
            }
            Err(_) => {
                error!(plugin = %name, "Plugin panicked in on_attach");
                None
            }
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PluginCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("PluginCoordinator")
            .field("attached", &registry.attached.len())
            .field("pending", &registry.pending.len())
            .field("starting", &registry.starting.len())
            .finish()
    }
}

/// Run a plugin callback, logging errors and panics
fn report(plugin: &str, callback: &str, f: impl FnOnce() -> Result<(), PluginError>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(plugin, callback, error = %e, "Plugin callback failed"),
        Err(_) => error!(plugin, callback, "Plugin callback panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::StillImageBackend;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Counting {
        attached: AtomicUsize,
        detached: AtomicUsize,
        results: AtomicUsize,
    }

    impl CameraPlugin for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_attach(&self, _holder: &SessionHolder) -> Result<(), PluginError> {
            self.attached.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_detach(&self) {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }

        fn on_capture_result(&self, _result: &CaptureResult) -> Result<(), PluginError> {
            self.results.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl CameraPlugin for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_attach(&self, _holder: &SessionHolder) -> Result<(), PluginError> {
            Ok(())
        }

        fn on_detach(&self) {}

        fn on_capture_result(&self, _result: &CaptureResult) -> Result<(), PluginError> {
            panic!("plugin bug");
        }
    }

    /// Slow callbacks that count any call made after `on_detach`
    #[derive(Default)]
    struct Slow {
        live: AtomicBool,
        results: AtomicUsize,
        frames: AtomicUsize,
        late: AtomicUsize,
        detached: AtomicUsize,
    }

    impl Slow {
        fn check_live(&self) {
            if !self.live.load(Ordering::SeqCst) {
                self.late.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl CameraPlugin for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn on_attach(&self, _holder: &SessionHolder) -> Result<(), PluginError> {
            self.live.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn on_detach(&self) {
            self.live.store(false, Ordering::SeqCst);
            self.detached.fetch_add(1, Ordering::SeqCst);
        }

        fn wants_frames(&self) -> bool {
            true
        }

        fn on_frame(&self, _frame: &CameraFrame) -> Result<(), PluginError> {
            self.check_live();
            std::thread::sleep(Duration::from_millis(200));
            self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_capture_result(&self, _result: &CaptureResult) -> Result<(), PluginError> {
            self.check_live();
            std::thread::sleep(Duration::from_millis(20));
            self.results.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn frame() -> CameraFrame {
        CameraFrame {
            width: 1,
            height: 1,
            data: Arc::from(vec![0u8; 4]),
            stride: 4,
            captured_at: Instant::now(),
        }
    }

    fn coordinator() -> PluginCoordinator {
        let backend = StillImageBackend::new(vec![0u8; 4], None);
        PluginCoordinator::new(Arc::new(SessionStateMachine::new(Box::new(backend))))
    }

    fn ready() -> SessionState {
        SessionState::Ready {
            session: SessionHandle::new(
                "test",
                crate::config::LensFacing::Back,
                crate::config::Resolution::new(4, 4),
            ),
        }
    }

    #[tokio::test]
    async fn test_queued_attach_fires_once_on_ready() {
        let coordinator = coordinator();
        let counting = Arc::new(Counting::default());
        let plugin: Arc<dyn CameraPlugin> = counting.clone();

        assert_eq!(coordinator.attach(Arc::clone(&plugin), |_| {}), AttachOutcome::Queued);
        assert_eq!(
            coordinator.attach(Arc::clone(&plugin), |_| {}),
            AttachOutcome::AlreadyAttached
        );
        assert_eq!(counting.attached.load(Ordering::SeqCst), 0);

        let state = ready();
        coordinator.apply_state(state.clone()).await;
        coordinator.apply_state(state).await;
        assert_eq!(counting.attached.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.attached_count(), 1);
    }

    #[tokio::test]
    async fn test_rebind_reattaches() {
        let coordinator = coordinator();
        let counting = Arc::new(Counting::default());
        coordinator.apply_state(ready()).await;
        assert_eq!(coordinator.attach(counting.clone(), |_| {}), AttachOutcome::Attached);

        coordinator.apply_state(SessionState::Initializing).await;
        assert_eq!(counting.detached.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.pending_count(), 1);

        coordinator.apply_state(ready()).await;
        assert_eq!(counting.attached.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_delivery_after_detach() {
        let coordinator = coordinator();
        let counting = Arc::new(Counting::default());
        let plugin: Arc<dyn CameraPlugin> = counting.clone();
        coordinator.apply_state(ready()).await;
        coordinator.attach(Arc::clone(&plugin), |_| {});

        let result = CaptureResult::Success(Arc::from(vec![1u8]));
        coordinator.broadcast_result(&result).finished().await;
        assert_eq!(counting.results.load(Ordering::SeqCst), 1);

        coordinator.detach(&plugin).await;
        coordinator.detach(&plugin).await;
        let delivery = coordinator.broadcast_result(&result);
        assert!(delivery.is_empty());
        delivery.finished().await;
        assert_eq!(counting.results.load(Ordering::SeqCst), 1);
        assert_eq!(counting.detached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_plugin_is_isolated() {
        let coordinator = coordinator();
        let counting = Arc::new(Counting::default());
        coordinator.apply_state(ready()).await;
        coordinator.attach(Arc::new(Failing), |_| {});
        coordinator.attach(counting.clone(), |_| {});

        let result = CaptureResult::Success(Arc::from(vec![1u8]));
        coordinator.broadcast_result(&result).finished().await;
        assert_eq!(counting.results.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.attached_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_rejects_later_attach() {
        let coordinator = coordinator();
        let counting = Arc::new(Counting::default());
        coordinator.attach(counting.clone(), |_| {});
        coordinator.apply_state(SessionState::Stopped).await;

        assert_eq!(coordinator.pending_count(), 0);
        assert_eq!(coordinator.attach(counting, |_| {}), AttachOutcome::Rejected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_detach_during_concurrent_broadcasts() {
        let coordinator = coordinator();
        let slow = Arc::new(Slow::default());
        let plugin: Arc<dyn CameraPlugin> = slow.clone();
        coordinator.apply_state(ready()).await;
        assert_eq!(coordinator.attach(Arc::clone(&plugin), |_| {}), AttachOutcome::Attached);

        let running = Arc::new(AtomicBool::new(true));
        let broadcaster = {
            let coordinator = coordinator.clone();
            let running = Arc::clone(&running);
            tokio::spawn(async move {
                let result = CaptureResult::Success(Arc::from(vec![1u8]));
                let mut deliveries = Vec::new();
                while running.load(Ordering::SeqCst) {
                    deliveries.push(coordinator.broadcast_result(&result));
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                futures::future::join_all(deliveries.into_iter().map(Delivery::finished)).await;
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while slow.results.load(Ordering::SeqCst) < 3 {
            assert!(Instant::now() < deadline, "no results delivered");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        coordinator.detach(&plugin).await;
        let at_detach = slow.results.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(100)).await;
        running.store(false, Ordering::SeqCst);
        broadcaster.await.unwrap();

        assert_eq!(slow.results.load(Ordering::SeqCst), at_detach);
        assert_eq!(slow.late.load(Ordering::SeqCst), 0);
        assert_eq!(slow.detached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_plugin_drops_frames() {
        let coordinator = coordinator();
        let slow = Arc::new(Slow::default());
        coordinator.apply_state(ready()).await;
        coordinator.attach(slow.clone(), |_| {});

        let first = coordinator.broadcast_frame(&frame());
        assert_eq!(first.len(), 1);
        let dropped = coordinator.broadcast_frame(&frame());
        assert!(dropped.is_empty());

        first.finished().await;
        dropped.finished().await;
        assert_eq!(slow.frames.load(Ordering::SeqCst), 1);

        let next = coordinator.broadcast_frame(&frame());
        assert_eq!(next.len(), 1);
        next.finished().await;
        assert_eq!(slow.frames.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_initialize_runs_without_registry_lock() {
        let coordinator = coordinator();
        coordinator.apply_state(ready()).await;
        let counting = Arc::new(Counting::default());

        let attach = {
            let coordinator = coordinator.clone();
            tokio::task::spawn_blocking(move || {
                let inner = coordinator.clone();
                coordinator.attach(counting, |_| {
                    assert_eq!(inner.attached_count(), 0);
                    assert!(format!("{:?}", inner).contains("starting: 1"));
                })
            })
        };
        let outcome = tokio::time::timeout(Duration::from_secs(5), attach)
            .await
            .expect("attach returned")
            .unwrap();
        assert_eq!(outcome, AttachOutcome::Attached);
    }

    #[tokio::test]
    async fn test_detach_while_queued_attach_starts() {
        let coordinator = coordinator();
        let counting = Arc::new(Counting::default());
        let plugin: Arc<dyn CameraPlugin> = counting.clone();
        coordinator.attach(Arc::clone(&plugin), |_| {});

        let holder = SessionHolder {
            session: match ready() {
                SessionState::Ready { session } => session,
                _ => unreachable!(),
            },
            configuration: Arc::new(CaptureConfiguration::default()),
        };
        {
            let mut registry = coordinator.registry();
            registry.holder = Some(holder.clone());
            registry.pending.clear();
            registry.starting.push(Arc::clone(&plugin));
        }
        coordinator.detach(&plugin).await;

        assert_eq!(coordinator.attach_started(Arc::clone(&plugin), holder), AttachOutcome::Rejected);
        assert_eq!(counting.attached.load(Ordering::SeqCst), 1);
        assert_eq!(counting.detached.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.attached_count(), 0);
    }

    #[tokio::test]
    async fn test_session_change_during_attach_retries() {
        let coordinator = coordinator();
        let counting = Arc::new(Counting::default());
        let plugin: Arc<dyn CameraPlugin> = counting.clone();
        coordinator.apply_state(ready()).await;
        let stale = coordinator.registry().holder.clone().unwrap();
        coordinator.apply_state(ready()).await;

        coordinator.registry().starting.push(Arc::clone(&plugin));
        assert_eq!(coordinator.attach_started(plugin, stale), AttachOutcome::Attached);
        assert_eq!(counting.attached.load(Ordering::SeqCst), 2);
        assert_eq!(counting.detached.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.attached_count(), 1);
    }
}
