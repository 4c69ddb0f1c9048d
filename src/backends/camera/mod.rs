// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! The pipeline never talks to hardware directly. Each platform provides a
//! [`CaptureBackend`] that knows how to bind a session, take a photo and
//! stream preview frames; everything above it is platform independent.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  CameraController   │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ SessionStateMachine │  ← Lifecycle, readiness gate
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureBackend Trait│  ← Native collaborator contract
//! └──────────┬──────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐
//!   │ platform / still │
//!   └──────────────────┘
//! ```

pub mod frame_loop;
pub mod session;
pub mod still;
pub mod types;

pub use session::{CaptureGate, SessionState, SessionStateMachine};
pub use still::StillImageBackend;
pub use types::*;

use crate::config::CaptureConfiguration;
use crate::errors::BindError;

/// Native capture collaborator
///
/// Implementations wrap whatever the platform offers as "preview surface +
/// photo-output callback". Calls are serialized by the session state
/// machine, so `&mut self` is never contended.
pub trait CaptureBackend: Send {
    // ===== Lifecycle =====

    /// Open the device described by `config` and start its preview
    ///
    /// May block while the device powers up; callers run it off the async
    /// runtime.
    fn bind_session(&mut self, config: &CaptureConfiguration) -> Result<SessionHandle, BindError>;

    /// Release the device and every resource tied to the current session
    ///
    /// Pending capture completions must be dropped (or failed) so their
    /// waiters resolve. Must be a no-op when nothing is bound.
    fn unbind_session(&mut self);

    // ===== Capture =====

    /// Start a still capture
    ///
    /// Must return quickly; the result is delivered later through
    /// `completion`, exactly once.
    fn capture_photo(&mut self, settings: CaptureSettings, completion: CaptureCompletion);

    // ===== Preview =====

    /// Take the preview frame stream of the current session
    ///
    /// Returns `None` when no session is bound or the stream was already taken.
    fn preview_frames(&mut self) -> Option<FrameReceiver>;

    // ===== Controls =====

    /// Apply a zoom ratio already clamped to the session's zoom range
    fn set_zoom(&mut self, ratio: f32) -> BackendResult<()>;

    /// Switch the continuous torch on or off
    fn set_torch(&mut self, on: bool) -> BackendResult<()>;

    // ===== Metadata =====

    /// Backend identifier used in logs
    fn name(&self) -> &'static str;
}
