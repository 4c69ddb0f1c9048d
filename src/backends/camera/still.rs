// SPDX-License-Identifier: GPL-3.0-only

//! Still-image capture backend
//!
//! Serves a fixed encoded image as if a camera had captured it. The image
//! is decoded once per session and streamed as preview frames, while
//! captures hand out the original encoded bytes, optionally after a delay
//! that stands in for sensor readout.
//!
//! Used by the command line tool and handy for exercising plugins without
//! hardware.

use super::CaptureBackend;
use super::frame_loop::{LoopAction, PreviewLoop};
use super::types::*;
use crate::config::{CaptureConfiguration, PhotoOutputFormat, Resolution};
use crate::constants::timing::STILL_PREVIEW_INTERVAL;
use crate::errors::{BindError, CaptureError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-session state, dropped on unbind
struct StillSession {
    handle: SessionHandle,
    preview_rx: Option<FrameReceiver>,
    _preview_loop: PreviewLoop,
    /// Set on unbind so delayed captures resolve as cancelled
    cancelled: Arc<AtomicBool>,
}

/// Backend that "captures" a fixed encoded image
pub struct StillImageBackend {
    source: Arc<[u8]>,
    source_format: PhotoOutputFormat,
    orientation: Option<Orientation>,
    capture_delay: Duration,
    session: Option<StillSession>,
    zoom: f32,
    torch: bool,
}

impl StillImageBackend {
    /// Create a backend serving `source` (JPEG or PNG bytes)
    ///
    /// # Arguments
    /// * `source` - Encoded image returned by every capture
    /// * `orientation` - Orientation metadata to report; `None` leaves it to
    ///   the encoding pipeline to read EXIF
    pub fn new(source: impl Into<Arc<[u8]>>, orientation: Option<Orientation>) -> Self {
        let source: Arc<[u8]> = source.into();
        let source_format = match image::guess_format(&source) {
            Ok(image::ImageFormat::Png) => PhotoOutputFormat::Png,
            _ => PhotoOutputFormat::Jpeg,
        };

        Self {
            source,
            source_format,
            orientation,
            capture_delay: Duration::ZERO,
            session: None,
            zoom: 1.0,
            torch: false,
        }
    }

    /// Load the source image from a file
    pub fn from_file(path: &std::path::Path, orientation: Option<Orientation>) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::new(bytes, orientation))
    }

    /// Delay every capture completion, simulating sensor readout
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn torch(&self) -> bool {
        self.torch
    }
}

impl CaptureBackend for StillImageBackend {
    fn bind_session(&mut self, config: &CaptureConfiguration) -> Result<SessionHandle, BindError> {
        let decoded = image::load_from_memory(&self.source)
            .map_err(|e| BindError::InvalidConfiguration(format!("still image not decodable: {}", e)))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();

        let frame = CameraFrame {
            width,
            height,
            stride: width * 4,
            data: Arc::from(decoded.into_raw()),
            captured_at: Instant::now(),
        };

        let (tx, rx) = mpsc::channel(2);
        let preview_loop = PreviewLoop::start("still-preview", STILL_PREVIEW_INTERVAL, move || {
            let mut next = frame.clone();
            next.captured_at = Instant::now();
            match tx.try_send(next) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => LoopAction::Continue,
                Err(mpsc::error::TrySendError::Closed(_)) => LoopAction::Stop,
            }
        });

        let mut handle = SessionHandle::new(
            format!("still:{:?}", config.lens).to_lowercase(),
            config.lens,
            Resolution::new(width, height),
        );
        handle.device_type = config.device_type;

        info!(width, height, lens = ?config.lens, "Still-image session bound");

        self.session = Some(StillSession {
            handle: handle.clone(),
            preview_rx: Some(rx),
            _preview_loop: preview_loop,
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        Ok(handle)
    }

    fn unbind_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancelled.store(true, Ordering::Release);
            debug!(session = %session.handle.id, "Still-image session unbound");
        }
        self.torch = false;
    }

    fn capture_photo(&mut self, settings: CaptureSettings, completion: CaptureCompletion) {
        let Some(session) = &self.session else {
            let _ = completion.send(Err(CaptureError::Native("no session bound".into())));
            return;
        };

        debug!(mode = ?settings.mode, flash = ?settings.flash, "Still-image capture");

        let raw = RawCapture {
            data: Arc::clone(&self.source),
            format: self.source_format,
            orientation: self.orientation,
            captured_at: Instant::now(),
        };

        if self.capture_delay.is_zero() {
            let _ = completion.send(Ok(raw));
            return;
        }

        let delay = self.capture_delay;
        let cancelled = Arc::clone(&session.cancelled);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if cancelled.load(Ordering::Acquire) {
                // Dropping the completion resolves the waiter as cancelled
                warn!("Session closed before delayed capture completed");
                return;
            }
            let _ = completion.send(Ok(raw));
        });
    }

    fn preview_frames(&mut self) -> Option<FrameReceiver> {
        self.session.as_mut()?.preview_rx.take()
    }

    fn set_zoom(&mut self, ratio: f32) -> BackendResult<()> {
        if self.session.is_none() {
            return Err(BackendError::NotBound);
        }
        self.zoom = ratio;
        Ok(())
    }

    fn set_torch(&mut self, on: bool) -> BackendResult<()> {
        if self.session.is_none() {
            return Err(BackendError::NotBound);
        }
        self.torch = on;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "still-image"
    }
}
