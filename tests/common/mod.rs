// SPDX-License-Identifier: GPL-3.0-only

//! Shared test doubles

#![allow(dead_code)]

use camera_pipeline::backends::camera::{
    BackendError, BackendResult, CaptureBackend, CaptureCompletion, CaptureSettings,
    FrameReceiver, Orientation, RawCapture, SessionHandle,
};
use camera_pipeline::config::{CaptureConfiguration, PhotoOutputFormat, Resolution};
use camera_pipeline::errors::BindError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Test-side controls of a [`ScriptedBackend`]
pub struct Script {
    bind_outcomes: Mutex<VecDeque<BindError>>,
    bind_delay: Mutex<Duration>,
    pending: Mutex<Vec<CaptureCompletion>>,
    capture: Mutex<(Arc<[u8]>, PhotoOutputFormat, Option<Orientation>)>,
    auto_complete: AtomicBool,
    pub binds: AtomicUsize,
    pub captures: AtomicUsize,
    pub settings: Mutex<Vec<CaptureSettings>>,
    pub last_config: Mutex<Option<CaptureConfiguration>>,
}

impl Script {
    /// Make the next bind fail with `error`
    pub fn fail_next_bind(&self, error: BindError) {
        self.bind_outcomes.lock().unwrap().push_back(error);
    }

    pub fn set_bind_delay(&self, delay: Duration) {
        *self.bind_delay.lock().unwrap() = delay;
    }

    /// Captures complete as soon as they are issued
    pub fn set_auto_complete(&self, auto: bool) {
        self.auto_complete.store(auto, Ordering::SeqCst);
    }

    pub fn set_capture(&self, data: Vec<u8>, format: PhotoOutputFormat, orientation: Option<Orientation>) {
        *self.capture.lock().unwrap() = (Arc::from(data), format, orientation);
    }

    /// Captures waiting for the test to complete them
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Complete every waiting capture successfully
    pub fn complete_all(&self) -> usize {
        let pending: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        let count = pending.len();
        for completion in pending {
            let _ = completion.send(Ok(self.raw()));
        }
        count
    }

    fn raw(&self) -> RawCapture {
        let (data, format, orientation) = self.capture.lock().unwrap().clone();
        RawCapture {
            data,
            format,
            orientation,
            captured_at: Instant::now(),
        }
    }
}

/// Native collaborator driven by the test
pub struct ScriptedBackend {
    script: Arc<Script>,
    bound: Option<SessionHandle>,
}

impl ScriptedBackend {
    pub fn new() -> (Self, Arc<Script>) {
        let script = Arc::new(Script {
            bind_outcomes: Mutex::new(VecDeque::new()),
            bind_delay: Mutex::new(Duration::ZERO),
            pending: Mutex::new(Vec::new()),
            capture: Mutex::new((Arc::from(jpeg_bytes(64, 48)), PhotoOutputFormat::Jpeg, Some(Orientation::Normal))),
            auto_complete: AtomicBool::new(false),
            binds: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
            settings: Mutex::new(Vec::new()),
            last_config: Mutex::new(None),
        });
        (
            Self {
                script: Arc::clone(&script),
                bound: None,
            },
            script,
        )
    }
}

impl CaptureBackend for ScriptedBackend {
    fn bind_session(&mut self, config: &CaptureConfiguration) -> Result<SessionHandle, BindError> {
        let delay = *self.script.bind_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.script.binds.fetch_add(1, Ordering::SeqCst);
        *self.script.last_config.lock().unwrap() = Some(config.clone());

        if let Some(error) = self.script.bind_outcomes.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut handle = SessionHandle::new("scripted", config.lens, Resolution::new(64, 48));
        handle.device_type = config.device_type;
        handle.zoom_range = (1.0, 4.0);
        self.bound = Some(handle.clone());
        Ok(handle)
    }

    fn unbind_session(&mut self) {
        self.bound = None;
        // Dropped completions resolve as cancelled
        self.script.pending.lock().unwrap().clear();
    }

    fn capture_photo(&mut self, settings: CaptureSettings, completion: CaptureCompletion) {
        self.script.captures.fetch_add(1, Ordering::SeqCst);
        self.script.settings.lock().unwrap().push(settings);
        if self.script.auto_complete.load(Ordering::SeqCst) {
            let _ = completion.send(Ok(self.script.raw()));
        } else {
            self.script.pending.lock().unwrap().push(completion);
        }
    }

    fn preview_frames(&mut self) -> Option<FrameReceiver> {
        None
    }

    fn set_zoom(&mut self, _ratio: f32) -> BackendResult<()> {
        self.bound.as_ref().map(|_| ()).ok_or(BackendError::NotBound)
    }

    fn set_torch(&mut self, _on: bool) -> BackendResult<()> {
        self.bound.as_ref().map(|_| ()).ok_or(BackendError::NotBound)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Solid-colour JPEG
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 140, 90]));
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Jpeg)
        .unwrap();
    buffer
}

/// Poll `condition` until it holds, failing after five seconds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
