// SPDX-License-Identifier: GPL-3.0-only

//! QR code scanning plugin
//!
//! Converts preview frames to grayscale and searches them with `rqrr`. After
//! a successful scan the plugin pauses itself so the same code is not
//! reported over and over; [`QrScannerPlugin::resume`] starts scanning again.

use super::{CameraPlugin, SessionHolder};
use crate::backends::camera::CameraFrame;
use crate::errors::PluginError;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// A decoded QR code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrDetection {
    pub content: String,
    /// Corner points in frame pixel coordinates
    pub corners: [(i32, i32); 4],
}

/// Frame-consuming plugin that decodes QR codes
pub struct QrScannerPlugin {
    /// Maximum dimension for processing (frames are downscaled to this)
    max_dimension: u32,
    paused: AtomicBool,
    active: AtomicBool,
    last: Mutex<Option<QrDetection>>,
    detections: watch::Sender<Option<QrDetection>>,
}

impl Default for QrScannerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl QrScannerPlugin {
    pub fn new() -> Self {
        Self::with_max_dimension(640)
    }

    /// Create a scanner that downscales frames to at most `max_dimension`
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        let (detections, _) = watch::channel(None);
        Self {
            max_dimension: max_dimension.max(1),
            paused: AtomicBool::new(false),
            active: AtomicBool::new(false),
            last: Mutex::new(None),
            detections,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Scan again after a successful detection
    pub fn resume(&self) {
        debug!("QR scanner resumed");
        self.paused.store(false, Ordering::Release);
    }

    /// Most recent detection
    pub fn last_detection(&self) -> Option<QrDetection> {
        self.last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Observe detections as they happen
    pub fn subscribe(&self) -> watch::Receiver<Option<QrDetection>> {
        self.detections.subscribe()
    }

    /// Search one frame, returning the first decodable code
    pub fn scan(&self, frame: &CameraFrame) -> Option<QrDetection> {
        let start = std::time::Instant::now();
        let scale = (frame.width.max(frame.height) as f32 / self.max_dimension as f32).max(1.0);
        let width = ((frame.width as f32 / scale) as usize).max(1);
        let height = ((frame.height as f32 / scale) as usize).max(1);

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| {
            frame.luma_at((x as f32 * scale) as u32, (y as f32 * scale) as u32)
        });
        let grids = prepared.detect_grids();
        trace!(
            grids = grids.len(),
            width,
            height,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "QR grid search complete"
        );

        grids.into_iter().find_map(|grid| {
            let corners = grid.bounds.map(|p| {
                ((p.x as f32 * scale) as i32, (p.y as f32 * scale) as i32)
            });
            match grid.decode() {
                Ok((_meta, content)) => Some(QrDetection { content, corners }),
                Err(e) => {
                    debug!(error = ?e, "Failed to decode QR grid");
                    None
                }
            }
        })
    }
}

impl CameraPlugin for QrScannerPlugin {
    fn name(&self) -> &str {
        "qr-scanner"
    }

    fn on_attach(&self, holder: &SessionHolder) -> Result<(), PluginError> {
        debug!(session = %holder.session.id, "QR scanner attached");
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn on_detach(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn wants_frames(&self) -> bool {
        true
    }

    fn on_frame(&self, frame: &CameraFrame) -> Result<(), PluginError> {
        if self.is_paused() || !self.active.load(Ordering::Acquire) {
            return Ok(());
        }

        if let Some(detection) = self.scan(frame) {
            info!(content = %detection.content, "QR code detected");
            self.pause();
            *self
                .last
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(detection.clone());
            self.detections.send_replace(Some(detection));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn blank_frame(width: u32, height: u32) -> CameraFrame {
        CameraFrame {
            width,
            height,
            stride: width * 4,
            data: Arc::from(vec![255u8; (width * height * 4) as usize]),
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn test_blank_frame_has_no_code() {
        let scanner = QrScannerPlugin::with_max_dimension(64);
        assert_eq!(scanner.scan(&blank_frame(128, 96)), None);
    }

    #[test]
    fn test_paused_scanner_ignores_frames() {
        let scanner = QrScannerPlugin::new();
        scanner.pause();
        scanner.on_frame(&blank_frame(8, 8)).unwrap();
        assert!(scanner.is_paused());
        scanner.resume();
        assert!(!scanner.is_paused());
        assert_eq!(scanner.last_detection(), None);
    }
}
