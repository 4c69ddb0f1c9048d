// SPDX-License-Identifier: GPL-3.0-only

//! Camera controller handle
//!
//! [`CameraController`] is the one object callers hold. It is cheap to
//! clone and owns the whole pipeline:
//!
//! ```text
//! request_capture
//!   │
//!   ├─▶ SessionStateMachine::capture_gate   (Ready, no rebind pending)
//!   ├─▶ CaptureAdmissionController          (slot + strategy)
//!   ├─▶ CaptureBackend::capture_photo       (async completion)
//!   ├─▶ EncodingPipeline                    (fast / slow path, workers)
//!   └─▶ PluginCoordinator::broadcast_result
//! ```

pub mod legacy;

pub use legacy::LegacyCameraController;

use crate::backends::camera::{
    BackendResult, CaptureBackend, CaptureSettings, SessionHandle, SessionState, SessionStateMachine,
};
use crate::backends::memory::{MemoryStatus, ResourcePressureMonitor};
use crate::config::{
    CaptureConfiguration, CaptureConfigurationBuilder, DeviceType, FlashMode, PipelineSettings,
    Resolution, TorchMode,
};
use crate::errors::{AdmissionError, CaptureError, SessionError};
use crate::pipelines::photo::{
    AdmissionPermit, AdmissionStats, CaptureAdmissionController, CaptureResult, EncodeRequest,
    EncodingPipeline, EncodingWorkers,
};
use crate::plugins::{AttachOutcome, CameraPlugin, PluginCoordinator};
use crate::storage::MediaIndex;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capture-time controls that change without a rebind
#[derive(Debug, Clone, Copy, Default)]
struct Controls {
    flash: FlashMode,
    torch: TorchMode,
    zoom: Option<f32>,
}

#[derive(Default)]
struct Tasks {
    state_watcher: Option<JoinHandle<()>>,
    frame_pump: Option<JoinHandle<()>>,
}

struct ControllerInner {
    session: Arc<SessionStateMachine>,
    admission: CaptureAdmissionController,
    encoder: EncodingPipeline,
    plugins: PluginCoordinator,
    settings: Arc<PipelineSettings>,
    controls: Mutex<Controls>,
    tasks: Mutex<Tasks>,
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pump) = tasks.frame_pump.take() {
            pump.abort();
        }
        if let Some(watcher) = tasks.state_watcher.take() {
            watcher.abort();
        }
    }
}

/// Handle to a camera session and its capture pipeline
#[derive(Clone)]
pub struct CameraController {
    inner: Arc<ControllerInner>,
}

/// Non-owning controller handle, for plugins
#[derive(Clone)]
pub struct WeakCameraController {
    inner: Weak<ControllerInner>,
}

impl WeakCameraController {
    pub fn upgrade(&self) -> Option<CameraController> {
        self.inner.upgrade().map(|inner| CameraController { inner })
    }
}

impl CameraController {
    /// Create a controller reading the shared process memory monitor
    ///
    /// The first controller's threshold and budget configure the monitor.
    /// Pass a dedicated monitor to [`Self::with_parts`] to override them.
    pub fn new(backend: Box<dyn CaptureBackend>, settings: PipelineSettings) -> Self {
        let settings = settings.validated();
        let monitor = ResourcePressureMonitor::process(
            settings.pressure_threshold_percent,
            settings.memory_budget_bytes,
        );
        Self::with_parts(backend, settings, monitor, None)
    }

    /// Create a controller from explicit collaborators
    ///
    /// # Arguments
    /// * `backend` - Native capture collaborator
    /// * `settings` - Pipeline tuning
    /// * `monitor` - Memory pressure source shared with the admission gate
    /// * `media_index` - Notified of every file written
    pub fn with_parts(
        backend: Box<dyn CaptureBackend>,
        settings: PipelineSettings,
        monitor: ResourcePressureMonitor,
        media_index: Option<Arc<dyn MediaIndex>>,
    ) -> Self {
        let settings = Arc::new(settings.validated());
        let session = Arc::new(SessionStateMachine::new(backend));
        let admission = CaptureAdmissionController::new(monitor, Arc::clone(&settings));
        let encoder = EncodingPipeline::new(EncodingWorkers::new(settings.encoding_workers), media_index);
        let plugins = PluginCoordinator::new(Arc::clone(&session));

        Self {
            inner: Arc::new(ControllerInner {
                session,
                admission,
                encoder,
                plugins,
                settings,
                controls: Mutex::new(Controls::default()),
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakCameraController {
        WeakCameraController {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Bind the session and start delivering to plugins
    ///
    /// Also the retry entry point after a bind error.
    pub async fn start_session(&self, config: CaptureConfiguration) -> Result<SessionHandle, SessionError> {
        self.ensure_state_watcher();
        {
            let mut controls = self.controls();
            controls.flash = config.flash;
            controls.torch = config.torch;
        }

        info!(lens = ?config.lens, format = ?config.format, "Starting camera session");
        let session = self.inner.session.bind(config).await?;
        self.restart_frame_pump();
        Ok(session)
    }

    /// Stop the session for good
    ///
    /// Captures in flight resolve as cancelled and plugins are detached
    /// before this returns.
    pub async fn stop_session(&self) {
        self.inner.session.unbind().await;

        let (pump, watcher) = {
            let mut tasks = self.tasks();
            (tasks.frame_pump.take(), tasks.state_watcher.take())
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        match watcher {
            Some(watcher) => {
                let _ = watcher.await;
            }
            None => self.inner.plugins.apply_state(SessionState::Stopped).await,
        }
        info!("Camera session stopped");
    }

    pub fn current_state(&self) -> SessionState {
        self.inner.session.current_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    pub async fn wait_ready(&self) -> Result<SessionHandle, SessionError> {
        self.inner.session.wait_ready().await
    }

    /// Take one photo
    ///
    /// Rejections ("session not ready", "burst queue full") come back at
    /// once and are not broadcast. Every admitted request resolves exactly
    /// once and is echoed to attached plugins.
    pub async fn request_capture(&self) -> CaptureResult {
        let gate = match self.inner.session.capture_gate() {
            Ok(gate) => gate,
            Err(e) => {
                debug!(error = %e, "Capture refused");
                return CaptureResult::Error(e.into());
            }
        };
        let Some(config) = self.inner.session.configuration() else {
            return CaptureResult::Error(AdmissionError::SessionNotReady.into());
        };

        let permit = match self.inner.admission.request_capture(config.quality) {
            Ok(permit) => permit,
            Err(e) => return CaptureResult::Error(e.into()),
        };
        let strategy = *permit.strategy();

        let settings = CaptureSettings {
            mode: strategy.mode,
            flash: self.controls().flash,
            jpeg_quality: strategy.jpeg_quality,
        };
        let (completion, completed) = oneshot::channel();
        debug!(session = %gate.session().id, ?settings, "Issuing native capture");
        gate.issue(settings, completion);

        let raw = match completed.await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return self.finish(CaptureResult::Error(e), permit),
            Err(_) => return self.finish(CaptureResult::Error(CaptureError::Cancelled), permit),
        };

        let memory = self.inner.admission.monitor().refresh();
        let request = EncodeRequest {
            raw,
            target_format: config.format,
            strategy,
            under_pressure: memory.under_pressure,
            mirror: config.mirrors_output(),
            output_dir: config.output_dir.clone(),
            pressure_target_pixels: self.inner.settings.downsample_target_pixels,
        };
        let result = self.inner.encoder.encode(request).await;
        self.finish(result, permit)
    }

    /// Release the slot, then echo the result to plugins
    fn finish(&self, result: CaptureResult, permit: AdmissionPermit) -> CaptureResult {
        permit.release();
        match &result {
            CaptureResult::Error(e) => warn!(error = %e, "Capture failed"),
            other => info!(result = %other, "Capture complete"),
        }
        let _delivery = self.inner.plugins.broadcast_result(&result);
        result
    }

    /// Cycle the flash mode for later captures
    pub fn toggle_flash(&self) -> FlashMode {
        let mut controls = self.controls();
        controls.flash = controls.flash.next();
        debug!(flash = ?controls.flash, "Flash mode changed");
        controls.flash
    }

    /// Switch the torch on or off on the live session
    pub fn toggle_torch(&self) -> BackendResult<TorchMode> {
        let next = self.controls().torch.toggled();
        self.inner.session.set_torch(next.is_lit())?;
        self.controls().torch = next;
        Ok(next)
    }

    /// Switch between back and front lens (rebinds the session)
    pub async fn toggle_lens(&self) -> Result<SessionHandle, SessionError> {
        let memory = self.inner.admission.monitor().refresh();
        if memory.under_pressure {
            warn!(used_percent = memory.used_percent, "Switching lens under memory pressure");
        }

        let lens = self.current_configuration().lens.flipped();
        self.rebind_with(|builder| builder.lens(lens)).await
    }

    /// Change the capture resolution (rebinds the session)
    pub async fn set_resolution(&self, resolution: Option<Resolution>) -> Result<SessionHandle, SessionError> {
        self.rebind_with(|builder| builder.target_resolution(resolution)).await
    }

    /// Change the physical sensor (rebinds the session)
    pub async fn set_device_type(&self, device_type: DeviceType) -> Result<SessionHandle, SessionError> {
        self.rebind_with(|builder| builder.device_type(device_type)).await
    }

    /// Apply a zoom ratio, clamped to the device range
    pub fn set_zoom(&self, ratio: f32) -> BackendResult<f32> {
        let applied = self.inner.session.set_zoom(ratio)?;
        self.controls().zoom = Some(applied);
        Ok(applied)
    }

    pub fn flash_mode(&self) -> FlashMode {
        self.controls().flash
    }

    pub fn torch_mode(&self) -> TorchMode {
        self.controls().torch
    }

    pub fn zoom(&self) -> Option<f32> {
        self.controls().zoom
    }

    /// Attach a plugin; queued until the session is ready
    pub fn attach_plugin(&self, plugin: Arc<dyn CameraPlugin>) -> AttachOutcome {
        self.ensure_state_watcher();
        self.inner
            .plugins
            .attach(plugin, |plugin| plugin.initialize(self))
    }

    /// Detach a plugin; no callbacks reach it after this returns
    pub async fn detach_plugin(&self, plugin: &Arc<dyn CameraPlugin>) {
        self.inner.plugins.detach(plugin).await;
    }

    pub fn plugins(&self) -> &PluginCoordinator {
        &self.inner.plugins
    }

    pub fn admission_stats(&self) -> AdmissionStats {
        self.inner.admission.stats()
    }

    pub fn memory_status(&self) -> MemoryStatus {
        self.inner.admission.monitor().refresh()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    /// Configuration of the bound (or last attempted) session
    pub fn configuration(&self) -> Option<Arc<CaptureConfiguration>> {
        self.inner.session.configuration()
    }

    fn current_configuration(&self) -> CaptureConfiguration {
        self.inner
            .session
            .configuration()
            .map(|config| (*config).clone())
            .unwrap_or_default()
    }

    async fn rebind_with(
        &self,
        edit: impl FnOnce(CaptureConfigurationBuilder) -> CaptureConfigurationBuilder,
    ) -> Result<SessionHandle, SessionError> {
        let controls = *self.controls();
        let builder = self
            .current_configuration()
            .to_builder()
            .flash(controls.flash)
            .torch(controls.torch);
        let config = edit(builder).build()?;

        let session = self.inner.session.rebind(config).await?;
        self.restart_frame_pump();
        Ok(session)
    }

    fn ensure_state_watcher(&self) {
        let mut tasks = self.tasks();
        let running = tasks
            .state_watcher
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if !running && !matches!(self.current_state(), SessionState::Stopped) {
            tasks.state_watcher = Some(self.inner.plugins.spawn_state_watcher());
        }
    }

    /// Forward preview frames of the bound session to plugins
    fn restart_frame_pump(&self) {
        let mut tasks = self.tasks();
        if let Some(old) = tasks.frame_pump.take() {
            old.abort();
        }

        let Some(mut frames) = self.inner.session.take_preview_frames() else {
            debug!("Backend offers no preview frames");
            return;
        };
        let plugins = self.inner.plugins.clone();
        tasks.frame_pump = Some(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let _delivery = plugins.broadcast_frame(&frame);
            }
            debug!("Preview stream ended");
        }));
    }

    fn controls(&self) -> MutexGuard<'_, Controls> {
        self.inner.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CameraController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraController")
            .field("session", &self.inner.session)
            .field("admission", &self.inner.admission)
            .field("plugins", &self.inner.plugins)
            .finish()
    }
}
