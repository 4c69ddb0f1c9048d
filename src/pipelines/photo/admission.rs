// SPDX-License-Identifier: GPL-3.0-only

//! Capture admission control
//!
//! Bounds the number of captures in flight with a lock-free counter. Excess
//! requests are rejected at once instead of queued: on a live camera a
//! stale queued shot is worse than a refused one.
//!
//! Each admitted capture holds an [`AdmissionPermit`]. The slot is released
//! when the permit is dropped, so success, failure, cancellation and
//! teardown all give the slot back exactly once.

use crate::backends::camera::CaptureMode;
use crate::backends::memory::{MemoryStatus, ResourcePressureMonitor};
use crate::config::{PipelineSettings, QualityPrioritization};
use crate::constants::jpeg;
use crate::errors::AdmissionError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

/// How the encoding pipeline should reduce resolution on the slow path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Downsample {
    /// Keep full resolution
    None,
    /// Divide both dimensions by a fixed power-of-two factor
    Factor(u32),
    /// Smallest power-of-two factor that fits the pixel budget
    FitPixels(u64),
}

impl Downsample {
    /// Sample factor for an image with `pixel_count` pixels
    pub fn factor_for(&self, pixel_count: u64) -> u32 {
        match *self {
            Downsample::None => 1,
            Downsample::Factor(factor) => factor.max(1),
            Downsample::FitPixels(target) => fit_sample_factor(pixel_count, target),
        }
    }
}

/// Smallest power-of-two `f` with `pixel_count / f² <= target`
pub fn fit_sample_factor(pixel_count: u64, target: u64) -> u32 {
    let target = target.max(1);
    let mut factor: u32 = 1;
    while pixel_count / (factor as u64 * factor as u64) > target && factor < (1 << 15) {
        factor *= 2;
    }
    factor
}

/// Parameters chosen for one admitted capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStrategy {
    pub mode: CaptureMode,
    pub jpeg_quality: u8,
    pub downsample: Downsample,
    /// Pressure reading the strategy was chosen under
    pub under_pressure: bool,
}

/// Pick capture parameters
///
/// Pressure always wins and asks for the latency mode plus a pixel budget.
/// With more than one capture in flight the slow path halves the
/// resolution. Otherwise the configured prioritization decides.
pub fn select_strategy(
    prioritization: QualityPrioritization,
    under_pressure: bool,
    in_flight: usize,
    settings: &PipelineSettings,
) -> CaptureStrategy {
    if under_pressure {
        return CaptureStrategy {
            mode: CaptureMode::MinimizeLatency,
            jpeg_quality: jpeg::LOW,
            downsample: Downsample::FitPixels(settings.downsample_target_pixels),
            under_pressure: true,
        };
    }

    let (mode, jpeg_quality) = match prioritization {
        QualityPrioritization::Quality => (CaptureMode::MaximizeQuality, jpeg::MAXIMUM),
        QualityPrioritization::Balanced => (CaptureMode::MaximizeQuality, jpeg::HIGH),
        QualityPrioritization::Speed => (CaptureMode::MinimizeLatency, jpeg::MEDIUM),
        QualityPrioritization::None => (CaptureMode::MinimizeLatency, jpeg::HIGH),
    };

    let downsample = if in_flight > 1 {
        Downsample::Factor(settings.concurrent_sample_factor)
    } else {
        Downsample::None
    };

    CaptureStrategy {
        mode,
        jpeg_quality,
        downsample,
        under_pressure: false,
    }
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    pub admitted: u64,
    pub rejected: u64,
    pub in_flight: usize,
}

struct AdmissionInner {
    in_flight: AtomicUsize,
    max_concurrent: usize,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl AdmissionInner {
    fn release(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "admission slot released twice");
        debug!(in_flight = previous.saturating_sub(1), "Capture slot released");
    }
}

/// Bounds concurrent captures and chooses their parameters
#[derive(Clone)]
pub struct CaptureAdmissionController {
    inner: Arc<AdmissionInner>,
    monitor: ResourcePressureMonitor,
    settings: Arc<PipelineSettings>,
}

impl CaptureAdmissionController {
    /// Create a controller
    ///
    /// # Arguments
    /// * `monitor` - Shared process memory monitor
    /// * `settings` - Ceiling and downsample parameters
    pub fn new(monitor: ResourcePressureMonitor, settings: Arc<PipelineSettings>) -> Self {
        let max_concurrent = settings.max_concurrent_captures.max(1);
        info!(max_concurrent, "Creating capture admission controller");

        Self {
            inner: Arc::new(AdmissionInner {
                in_flight: AtomicUsize::new(0),
                max_concurrent,
                admitted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
            monitor,
            settings,
        }
    }

    /// Try to take a capture slot
    ///
    /// Refreshes the memory reading, then compare-and-increments the
    /// in-flight counter. Never waits.
    pub fn request_capture(
        &self,
        prioritization: QualityPrioritization,
    ) -> Result<AdmissionPermit, AdmissionError> {
        let memory = self.monitor.refresh();
        let max = self.inner.max_concurrent;

        let claimed = self
            .inner
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            });

        let in_flight = match claimed {
            Ok(previous) => previous + 1,
            Err(current) => {
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                info!(in_flight = current, max, "Capture rejected: burst queue full");
                return Err(AdmissionError::BurstQueueFull);
            }
        };
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);

        let strategy = select_strategy(prioritization, memory.under_pressure, in_flight, &self.settings);
        debug!(
            in_flight,
            max,
            mode = ?strategy.mode,
            quality = strategy.jpeg_quality,
            downsample = ?strategy.downsample,
            "Capture admitted"
        );

        Ok(AdmissionPermit {
            inner: Some(Arc::clone(&self.inner)),
            strategy,
            memory,
            in_flight,
        })
    }

    /// Captures currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            admitted: self.inner.admitted.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }

    pub fn monitor(&self) -> &ResourcePressureMonitor {
        &self.monitor
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }
}

impl std::fmt::Debug for CaptureAdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureAdmissionController")
            .field("in_flight", &self.in_flight())
            .field("max_concurrent", &self.inner.max_concurrent)
            .finish()
    }
}

/// One admitted capture slot
///
/// Dropping the permit releases the slot.
#[must_use = "dropping the permit releases the capture slot immediately"]
pub struct AdmissionPermit {
    inner: Option<Arc<AdmissionInner>>,
    strategy: CaptureStrategy,
    memory: MemoryStatus,
    in_flight: usize,
}

impl AdmissionPermit {
    pub fn strategy(&self) -> &CaptureStrategy {
        &self.strategy
    }

    /// Memory reading taken at admission
    pub fn memory(&self) -> MemoryStatus {
        self.memory
    }

    /// In-flight count including this capture, at admission time
    pub fn in_flight_at_admission(&self) -> usize {
        self.in_flight
    }

    /// Release the slot now
    pub fn release(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("strategy", &self.strategy)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
