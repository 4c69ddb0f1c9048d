// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture pipeline
//!
//! Errors are grouped by the stage that produces them. All of them are
//! `Clone` so a failed [`CaptureResult`](crate::CaptureResult) can be handed
//! to the caller and echoed to every attached plugin.

use thiserror::Error;

/// Failure to bind the native session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    /// No device matched the requested lens / device type
    #[error("Camera device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Device exists but another client holds it
    #[error("Camera device busy: {0}")]
    DeviceBusy(String),
    /// The host refused camera access
    #[error("Camera permission denied")]
    PermissionDenied,
    /// The configuration cannot be honoured by any device
    #[error("Invalid capture configuration: {0}")]
    InvalidConfiguration(String),
}

impl BindError {
    /// Whether calling `bind` again may succeed without changing anything
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BindError::DeviceUnavailable(_) | BindError::DeviceBusy(_)
        )
    }
}

/// Rejection at the admission gate
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("session not ready")]
    SessionNotReady,
    #[error("burst queue full")]
    BurstQueueFull,
}

impl AdmissionError {
    /// Admission rejections are always worth retrying after a short delay
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Failure while turning a raw capture into the requested output
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Failed to decode capture: {0}")]
    Decode(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Out of memory while re-encoding: {0}")]
    OutOfMemory(String),
    #[error("Failed to encode capture: {0}")]
    Encode(String),
    #[error("Failed to write capture: {0}")]
    Io(String),
    #[error("Encoding worker failed: {0}")]
    WorkerFailed(String),
}

impl From<std::io::Error> for EncodingError {
    fn from(err: std::io::Error) -> Self {
        EncodingError::Io(err.to_string())
    }
}

impl From<image::ImageError> for EncodingError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Decoding(e) => EncodingError::Decode(e.to_string()),
            image::ImageError::Encoding(e) => EncodingError::Encode(e.to_string()),
            image::ImageError::Unsupported(e) => EncodingError::UnsupportedFormat(e.to_string()),
            image::ImageError::Limits(e) => EncodingError::OutOfMemory(e.to_string()),
            image::ImageError::IoError(e) => EncodingError::Io(e.to_string()),
            other => EncodingError::Decode(other.to_string()),
        }
    }
}

/// Best-effort gallery registration failure (never fails a capture)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Media index update failed for {path}: {reason}")]
pub struct MediaIndexError {
    pub path: String,
    pub reason: String,
}

/// Any reason a single capture request did not produce an image
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// The native capture primitive reported a failure
    #[error("Native capture failed: {0}")]
    Native(String),
    /// The session was torn down before the capture completed
    #[error("Capture cancelled: session closed")]
    Cancelled,
}

/// Lifecycle errors returned by the session state machine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// `unbind` was called; a new controller is required
    #[error("Session stopped")]
    Stopped,
    #[error(transparent)]
    Bind(#[from] BindError),
}

/// Failure to read or write the pipeline settings file
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Failed to access {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("Failed to serialize settings: {0}")]
    Serialize(String),
}

impl SettingsError {
    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        SettingsError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Failure reported by a plugin callback
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Plugin {plugin} failed: {reason}")]
pub struct PluginError {
    pub plugin: String,
    pub reason: String,
}

impl PluginError {
    pub fn new(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }
}
