// SPDX-License-Identifier: GPL-3.0-only

//! Adaptive camera capture and session pipeline
//!
//! One logical capture API over a native camera session whose readiness is
//! asynchronous and whose memory budget, formats and orientation metadata
//! vary per device.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Native capture contract, session state machine, memory monitor
//! - [`pipelines`]: Capture admission and the fast / slow encoding paths
//! - [`plugins`]: Plugin trait and lifecycle coordinator, bundled plugins
//! - [`controller`]: The [`CameraController`] handle tying it all together
//! - [`config`]: Capture configuration and persisted pipeline settings
//! - [`storage`]: Output naming, atomic writes, media index
//!
//! # Example
//!
//! ```no_run
//! use camera_pipeline::backends::camera::StillImageBackend;
//! use camera_pipeline::{CameraController, CaptureConfiguration, PipelineSettings};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = StillImageBackend::from_file("photo.jpg".as_ref(), None)?;
//! let controller = CameraController::new(Box::new(backend), PipelineSettings::default());
//! controller.start_session(CaptureConfiguration::default()).await?;
//! let result = controller.request_capture().await;
//! println!("{}", result);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod controller;
pub mod errors;
pub mod pipelines;
pub mod plugins;
pub mod storage;

// Re-export commonly used types
pub use backends::camera::{SessionHandle, SessionState};
pub use config::{CaptureConfiguration, PipelineSettings};
pub use controller::{CameraController, LegacyCameraController, WeakCameraController};
pub use errors::{
    AdmissionError, BindError, CaptureError, EncodingError, SessionError, SettingsError,
};
pub use pipelines::photo::CaptureResult;
pub use plugins::{CameraPlugin, PluginCoordinator, SessionHolder};
