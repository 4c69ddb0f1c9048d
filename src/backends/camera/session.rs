// SPDX-License-Identifier: GPL-3.0-only

//! Session readiness state machine
//!
//! Owns the native backend and the single [`SessionState`] value that every
//! other component consults. State changes are published through a
//! `watch` channel: one writer (this module), any number of readers.
//!
//! ```text
//!              bind ok
//! Initializing ───────▶ Ready ──rebind──▶ Initializing
//!      │    ▲
//!      │    │ bind (retry)
//!      ▼    │
//!     Error ┘          unbind from anywhere ──▶ Stopped (terminal)
//! ```
//!
//! Bind, rebind and unbind run inside an exclusive lifecycle section.
//! Captures take a shared [`CaptureGate`] on that section, so no capture is
//! issued while a rebind is half done.

use super::CaptureBackend;
use super::types::{BackendError, BackendResult, CaptureCompletion, CaptureSettings, FrameReceiver, SessionHandle};
use crate::config::CaptureConfiguration;
use crate::errors::{AdmissionError, BindError, SessionError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{RwLock, RwLockReadGuard, watch};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a capture session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Binding in progress (initial state, and the transient pulse of a rebind)
    Initializing,
    /// Bound and accepting captures
    Ready { session: SessionHandle },
    /// Last bind failed
    Error { cause: BindError, retryable: bool },
    /// `unbind` was called; terminal
    Stopped,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready { .. })
    }

    /// The bound session, if ready
    pub fn session(&self) -> Option<&SessionHandle> {
        match self {
            SessionState::Ready { session } => Some(session),
            _ => None,
        }
    }

    /// Whether the state will not change without a new bind call
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionState::Initializing)
    }

    fn label(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Ready { .. } => "ready",
            SessionState::Error { .. } => "error",
            SessionState::Stopped => "stopped",
        }
    }
}

type SharedBackend = Arc<Mutex<Box<dyn CaptureBackend>>>;

/// Owner of the native session and its readiness state
pub struct SessionStateMachine {
    backend: SharedBackend,
    state_tx: watch::Sender<SessionState>,
    /// Exclusive for bind/rebind/unbind, shared for issuing captures
    lifecycle: RwLock<()>,
    configuration: Mutex<Option<Arc<CaptureConfiguration>>>,
}

impl SessionStateMachine {
    /// Wrap a backend; the machine starts in `Initializing`
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        info!(backend = backend.name(), "Creating session state machine");
        let (state_tx, _) = watch::channel(SessionState::Initializing);

        Self {
            backend: Arc::new(Mutex::new(backend)),
            state_tx,
            lifecycle: RwLock::new(()),
            configuration: Mutex::new(None),
        }
    }

    /// Current state snapshot
    pub fn current_state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Observe every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Configuration of the current (or last attempted) bind
    pub fn configuration(&self) -> Option<Arc<CaptureConfiguration>> {
        lock(&self.configuration).clone()
    }

    /// Bind the native session
    ///
    /// Valid from `Initializing` (first start) and `Error` (caller-driven
    /// retry). From `Ready` it behaves like [`rebind`](Self::rebind). Bind
    /// failures are reported, never retried here.
    pub async fn bind(&self, config: CaptureConfiguration) -> Result<SessionHandle, SessionError> {
        let _section = self.lifecycle.write().await;

        match &*self.state_tx.borrow() {
            SessionState::Stopped => return Err(SessionError::Stopped),
            SessionState::Ready { .. } => {
                info!("Bind requested on a ready session, rebinding");
            }
            _ => {}
        }

        self.publish(SessionState::Initializing);
        self.release_native();
        self.bind_locked(config).await
    }

    /// Destroy and recreate the native session with a new configuration
    ///
    /// Observable as a transient `Initializing` state. Captures are not
    /// admitted until the new session is fully attached.
    pub async fn rebind(&self, config: CaptureConfiguration) -> Result<SessionHandle, SessionError> {
        let _section = self.lifecycle.write().await;

        if matches!(*self.state_tx.borrow(), SessionState::Stopped) {
            return Err(SessionError::Stopped);
        }

        info!(lens = ?config.lens, device_type = ?config.device_type, "Rebinding session");
        self.publish(SessionState::Initializing);
        self.release_native();
        self.bind_locked(config).await
    }

    /// Stop the session for good and release native resources
    ///
    /// Idempotent; the machine cannot be bound again afterwards.
    pub async fn unbind(&self) {
        let _section = self.lifecycle.write().await;

        if matches!(*self.state_tx.borrow(), SessionState::Stopped) {
            debug!("Unbind on stopped session ignored");
            return;
        }

        self.release_native();
        self.publish(SessionState::Stopped);
        info!("Session stopped");
    }

    /// Wait until the state settles (ready, error or stopped)
    pub async fn wait_ready(&self) -> Result<SessionHandle, SessionError> {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(SessionState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => return Err(SessionError::Stopped),
        };

        match state {
            SessionState::Ready { session } => Ok(session),
            SessionState::Error { cause, .. } => Err(SessionError::Bind(cause)),
            _ => Err(SessionError::Stopped),
        }
    }

    /// Enter the shared section for issuing a capture
    ///
    /// Fails immediately, without waiting, when a bind or rebind is in
    /// progress or the session is not ready.
    pub fn capture_gate(&self) -> Result<CaptureGate<'_>, AdmissionError> {
        let guard = self
            .lifecycle
            .try_read()
            .map_err(|_| AdmissionError::SessionNotReady)?;

        let session = match &*self.state_tx.borrow() {
            SessionState::Ready { session } => session.clone(),
            _ => return Err(AdmissionError::SessionNotReady),
        };

        Ok(CaptureGate {
            _guard: guard,
            session,
            backend: &self.backend,
        })
    }

    /// Take the preview frame stream of the bound session
    pub fn take_preview_frames(&self) -> Option<FrameReceiver> {
        if !self.current_state().is_ready() {
            return None;
        }
        lock(&self.backend).preview_frames()
    }

    /// Apply a zoom ratio clamped to the bound device's range
    ///
    /// Returns the ratio actually applied.
    pub fn set_zoom(&self, ratio: f32) -> BackendResult<f32> {
        let Some(session) = self.current_state().session().cloned() else {
            return Err(BackendError::NotBound);
        };
        let (min, max) = session.zoom_range;
        let clamped = if ratio.is_finite() { ratio.clamp(min, max) } else { min };
        lock(&self.backend).set_zoom(clamped)?;
        debug!(requested = ratio, applied = clamped, "Zoom applied");
        Ok(clamped)
    }

    pub fn set_torch(&self, on: bool) -> BackendResult<()> {
        if !self.current_state().is_ready() {
            return Err(BackendError::NotBound);
        }
        lock(&self.backend).set_torch(on)
    }

    /// Run the native bind with the lifecycle section held
    async fn bind_locked(&self, config: CaptureConfiguration) -> Result<SessionHandle, SessionError> {
        let config = Arc::new(config);
        *lock(&self.configuration) = Some(Arc::clone(&config));

        let backend = Arc::clone(&self.backend);
        let bind_config = Arc::clone(&config);
        let outcome = tokio::task::spawn_blocking(move || lock(&backend).bind_session(&bind_config))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Bind task failed");
                Err(BindError::DeviceUnavailable(format!("bind task failed: {}", e)))
            });

        match outcome {
            Ok(session) => {
                info!(
                    device = %session.device_name,
                    resolution = %session.resolution,
                    lens = ?session.lens,
                    "Session ready"
                );
                if config.torch.is_lit()
                    && let Err(e) = lock(&self.backend).set_torch(true)
                {
                    warn!(error = %e, "Failed to light torch after bind");
                }
                self.publish(SessionState::Ready {
                    session: session.clone(),
                });
                Ok(session)
            }
            Err(cause) => {
                let retryable = cause.is_retryable();
                warn!(error = %cause, retryable, "Session bind failed");
                self.publish(SessionState::Error {
                    cause: cause.clone(),
                    retryable,
                });
                Err(SessionError::Bind(cause))
            }
        }
    }

    fn release_native(&self) {
        lock(&self.backend).unbind_session();
    }

    fn publish(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        debug!(
            from = previous.label(),
            to = self.state_tx.borrow().label(),
            "Session state changed"
        );
    }
}

impl std::fmt::Debug for SessionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateMachine")
            .field("state", &self.state_tx.borrow().label())
            .finish()
    }
}

/// Shared hold on the session lifecycle while a capture is issued
///
/// While any gate is alive a rebind or unbind waits, so the session seen
/// here is the one the capture is sent to.
pub struct CaptureGate<'a> {
    _guard: RwLockReadGuard<'a, ()>,
    session: SessionHandle,
    backend: &'a SharedBackend,
}

impl CaptureGate<'_> {
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Hand the capture to the native primitive
    pub fn issue(self, settings: CaptureSettings, completion: CaptureCompletion) {
        lock(self.backend).capture_photo(settings, completion);
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
