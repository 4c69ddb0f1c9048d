// SPDX-License-Identifier: GPL-3.0-only

//! Still photo capture pipeline
//!
//! ```text
//! request ─▶ Admission ─▶ native capture ─▶ Encoding ─▶ bytes / file
//!              │ (slot)                       │ (workers)
//!              └──── released on every path ──┘
//! ```
//!
//! # Pipeline Stages
//!
//! 1. **Admission**: bound the captures in flight and pick capture parameters
//! 2. **Capture**: the native primitive produces encoded bytes
//! 3. **Encoding**: fast-path copy or slow-path decode/reshape/re-encode
//! 4. **Disk I/O**: optional timestamped write and media index update

pub mod admission;
pub mod encoding;
pub mod processing;
pub mod workers;

pub use admission::{
    AdmissionPermit, AdmissionStats, CaptureAdmissionController, CaptureStrategy, Downsample,
    select_strategy,
};
pub use encoding::{EncodePath, EncodeRequest, EncodingPipeline};
pub use workers::EncodingWorkers;

use crate::errors::CaptureError;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of a single capture request
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureResult {
    /// Encoded image kept in memory
    Success(Arc<[u8]>),
    /// Encoded image written to disk
    SuccessWithFile(PathBuf),
    Error(CaptureError),
}

impl CaptureResult {
    pub fn is_success(&self) -> bool {
        !matches!(self, CaptureResult::Error(_))
    }

    pub fn error(&self) -> Option<&CaptureError> {
        match self {
            CaptureResult::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Saved file, if the capture was written to disk
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            CaptureResult::SuccessWithFile(path) => Some(path),
            _ => None,
        }
    }
}

impl From<CaptureError> for CaptureResult {
    fn from(err: CaptureError) -> Self {
        CaptureResult::Error(err)
    }
}

impl std::fmt::Display for CaptureResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureResult::Success(bytes) => write!(f, "captured {} bytes", bytes.len()),
            CaptureResult::SuccessWithFile(path) => write!(f, "saved {}", path.display()),
            CaptureResult::Error(e) => write!(f, "capture failed: {}", e),
        }
    }
}
