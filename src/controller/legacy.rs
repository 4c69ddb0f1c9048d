// SPDX-License-Identifier: GPL-3.0-only

//! Callback-style adapter
//!
//! For hosts that cannot await futures: every operation returns at once and
//! reports through a callback invoked on the runtime.

use super::CameraController;
use crate::backends::camera::SessionState;
use crate::config::CaptureConfiguration;
use crate::pipelines::photo::CaptureResult;
use std::sync::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

/// Callback wrapper around [`CameraController`]
pub struct LegacyCameraController {
    controller: CameraController,
    runtime: Handle,
    state_forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl LegacyCameraController {
    pub fn new(controller: CameraController, runtime: Handle) -> Self {
        Self {
            controller,
            runtime,
            state_forwarder: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &CameraController {
        &self.controller
    }

    /// Start the session; `on_state` sees every state change, starting with
    /// the current one
    pub fn start<F>(&self, config: CaptureConfiguration, on_state: F)
    where
        F: Fn(SessionState) + Send + 'static,
    {
        let mut rx = self.controller.subscribe_state();
        let forwarder = self.runtime.spawn(async move {
            loop {
                let state = rx.borrow_and_update().clone();
                let stopped = matches!(state, SessionState::Stopped);
                on_state(state);
                if stopped || rx.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self
            .state_forwarder
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(forwarder)
        {
            previous.abort();
        }

        let controller = self.controller.clone();
        self.runtime.spawn(async move {
            if let Err(e) = controller.start_session(config).await {
                warn!(error = %e, "Session start failed");
            }
        });
    }

    /// Take a photo and hand the result to `on_result`
    pub fn take_picture<F>(&self, on_result: F)
    where
        F: FnOnce(CaptureResult) + Send + 'static,
    {
        let controller = self.controller.clone();
        self.runtime.spawn(async move {
            on_result(controller.request_capture().await);
        });
    }

    /// Stop the session; `on_stopped` runs once plugins are detached
    pub fn stop<F>(&self, on_stopped: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let controller = self.controller.clone();
        self.runtime.spawn(async move {
            controller.stop_session().await;
            on_stopped();
        });
    }
}

impl Drop for LegacyCameraController {
    fn drop(&mut self) {
        if let Some(forwarder) = self
            .state_forwarder
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            forwarder.abort();
        }
    }
}
