// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use crate::config::{DeviceType, FlashMode, LensFacing, PhotoOutputFormat, Resolution};
use crate::errors::CaptureError;
use std::sync::Arc;
use std::time::Instant;

/// Rotation needed to display captured pixels upright (clockwise)
///
/// Sensors are often mounted at 90° or 270° relative to the display. The
/// native layer either bakes that into the pixels or records it as
/// metadata; only in the latter case does the encoding pipeline have to
/// rotate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Orientation {
    /// Pixels are already upright
    #[default]
    Normal,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl Orientation {
    /// Create orientation from an integer degree value (normalised to 0-360)
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => Orientation::Rotate90,
            180 => Orientation::Rotate180,
            270 => Orientation::Rotate270,
            _ => Orientation::Normal,
        }
    }

    /// Map an EXIF orientation tag value
    ///
    /// Mirrored variants (2, 4, 5, 7) map to the rotation they share with
    /// their unmirrored counterpart.
    pub fn from_exif(value: u16) -> Self {
        match value {
            3 | 4 => Orientation::Rotate180,
            6 | 5 => Orientation::Rotate90,
            8 | 7 => Orientation::Rotate270,
            _ => Orientation::Normal,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            Orientation::Normal => 0,
            Orientation::Rotate90 => 90,
            Orientation::Rotate180 => 180,
            Orientation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Orientation::Rotate90 | Orientation::Rotate270)
    }

    pub fn is_normal(&self) -> bool {
        *self == Orientation::Normal
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Opaque handle to a bound native session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionHandle {
    /// Unique per bind, so a rebind is distinguishable from the old session
    pub id: uuid::Uuid,
    /// Human readable device name
    pub device_name: String,
    pub lens: LensFacing,
    pub device_type: DeviceType,
    /// Resolution the native layer actually selected
    pub resolution: Resolution,
    /// Zoom range supported by the bound device
    pub zoom_range: (f32, f32),
}

impl SessionHandle {
    pub fn new(device_name: impl Into<String>, lens: LensFacing, resolution: Resolution) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            device_name: device_name.into(),
            lens,
            device_type: DeviceType::Default,
            resolution,
            zoom_range: crate::constants::DEFAULT_ZOOM_RANGE,
        }
    }
}

/// Whether the native layer should favour shutter latency or image quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    MinimizeLatency,
    MaximizeQuality,
}

/// Per-shot settings passed to the native capture primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub mode: CaptureMode,
    pub flash: FlashMode,
    /// Quality the native encoder should use when it writes JPEG itself
    pub jpeg_quality: u8,
}

/// Encoded bytes straight from the native capture primitive
#[derive(Debug, Clone)]
pub struct RawCapture {
    /// Encoded image as produced by the device
    pub data: Arc<[u8]>,
    /// Format the native layer produced
    pub format: PhotoOutputFormat,
    /// Orientation metadata, `None` when the native layer did not report it
    pub orientation: Option<Orientation>,
    pub captured_at: Instant,
}

impl RawCapture {
    /// JPEG capture with known orientation
    pub fn jpeg(data: impl Into<Arc<[u8]>>, orientation: Orientation) -> Self {
        Self {
            data: data.into(),
            format: PhotoOutputFormat::Jpeg,
            orientation: Some(orientation),
            captured_at: Instant::now(),
        }
    }
}

/// A decoded preview frame (tightly packed or strided RGBA)
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA pixels
    pub data: Arc<[u8]>,
    /// Row stride in bytes (may include padding)
    pub stride: u32,
    /// Timestamp when frame was captured (for latency diagnostics)
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Luma of the pixel at (x, y), zero when out of bounds
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        let offset = y as usize * self.stride as usize + x as usize * 4;
        match self.data.get(offset..offset + 3) {
            Some(px) => {
                ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8
            }
            None => 0,
        }
    }
}

/// Frame receiver type for preview streams
pub type FrameReceiver = tokio::sync::mpsc::Receiver<CameraFrame>;

/// Frame sender type for preview streams
pub type FrameSender = tokio::sync::mpsc::Sender<CameraFrame>;

/// Completion channel for one native capture
///
/// The native layer sends exactly once. Dropping the sender without
/// sending (e.g. on session teardown) resolves the capture as cancelled.
pub type CaptureCompletion = tokio::sync::oneshot::Sender<Result<RawCapture, CaptureError>>;

/// Result type for backend operations other than bind
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations other than bind
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BackendError {
    /// No session is bound
    #[error("No session bound")]
    NotBound,
    /// Device does not support the requested control
    #[error("Control not supported: {0}")]
    Unsupported(String),
    #[error("Backend error: {0}")]
    Other(String),
}
