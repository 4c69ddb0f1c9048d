// SPDX-License-Identifier: GPL-3.0-only

//! Process memory pressure monitor
//!
//! Memory pressure is a fact about the host, not about any one controller,
//! so a single [`ResourcePressureMonitor`] is created per process and its
//! handle is cloned into every component that needs a reading. The last
//! reading is kept in atomics: readers never block and only `refresh`
//! writes.
//!
//! When the platform gives no usable counter the monitor reports
//! "not under pressure" so that hosts without the signal are never
//! throttled.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

static PROCESS_MONITOR: OnceLock<ResourcePressureMonitor> = OnceLock::new();

/// A single memory reading from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    /// Bytes currently resident for this process
    pub used_bytes: u64,
    /// Bytes the process may use before it counts as constrained
    pub budget_bytes: u64,
}

impl MemoryReading {
    /// Usage as a percentage of the budget, clamped to 0..=100
    pub fn used_percent(&self) -> u8 {
        if self.budget_bytes == 0 {
            return 0;
        }
        let percent = self.used_bytes.saturating_mul(100) / self.budget_bytes;
        percent.min(100) as u8
    }
}

/// Snapshot handed to admission and encoding decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStatus {
    pub used_percent: u8,
    pub under_pressure: bool,
}

/// Source of memory readings
///
/// Implementations must be cheap and must not allocate noticeably, since
/// they are called right before memory-hungry operations.
pub trait MemorySampler: Send + Sync {
    /// Take a reading, or `None` when the platform counter is unavailable
    fn sample(&self) -> Option<MemoryReading>;
}

/// Samples the resident set size of the current process
///
/// On Linux the RSS comes from `/proc/self/statm` and the budget defaults to
/// physical memory as reported by `sysconf`. Other platforms report nothing.
#[derive(Debug, Clone, Default)]
pub struct ProcessMemorySampler {
    budget_override: Option<u64>,
}

impl ProcessMemorySampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure usage against a fixed budget instead of physical memory
    pub fn with_budget(budget_bytes: u64) -> Self {
        Self {
            budget_override: Some(budget_bytes),
        }
    }
}

impl MemorySampler for ProcessMemorySampler {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> Option<MemoryReading> {
        use std::io::Read;

        let page_size = page_size()?;

        // statm is a single short line; a stack buffer avoids heap churn
        let mut buf = [0u8; 128];
        let mut file = std::fs::File::open("/proc/self/statm").ok()?;
        let len = file.read(&mut buf).ok()?;
        let resident_pages = parse_statm_resident(&buf[..len])?;

        let budget_bytes = match self.budget_override {
            Some(budget) => budget,
            None => physical_memory_bytes(page_size)?,
        };

        Some(MemoryReading {
            used_bytes: resident_pages.saturating_mul(page_size),
            budget_bytes,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> Option<MemoryReading> {
        None
    }
}

#[cfg(target_os = "linux")]
fn page_size() -> Option<u64> {
    // SAFETY: sysconf has no preconditions and only reads system configuration
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    (size > 0).then_some(size as u64)
}

#[cfg(target_os = "linux")]
fn physical_memory_bytes(page_size: u64) -> Option<u64> {
    // SAFETY: sysconf has no preconditions and only reads system configuration
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    (pages > 0).then(|| pages as u64 * page_size)
}

/// Second field of `/proc/self/statm` is the resident page count
fn parse_statm_resident(contents: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(contents).ok()?;
    text.split_ascii_whitespace().nth(1)?.parse().ok()
}

/// Sampler whose reading is set by hand
///
/// Useful for hosts that learn about pressure from an outside signal
/// (e.g. a low-memory notification) and for tests.
#[derive(Debug)]
pub struct ManualMemorySampler {
    used_percent: AtomicU8,
    available: AtomicBool,
}

impl ManualMemorySampler {
    pub fn new(used_percent: u8) -> Self {
        Self {
            used_percent: AtomicU8::new(used_percent.min(100)),
            available: AtomicBool::new(true),
        }
    }

    /// Sampler that behaves like a platform with no counter
    pub fn unavailable() -> Self {
        let sampler = Self::new(0);
        sampler.available.store(false, Ordering::Release);
        sampler
    }

    pub fn set_used_percent(&self, percent: u8) {
        self.used_percent.store(percent.min(100), Ordering::Release);
    }
}

impl MemorySampler for ManualMemorySampler {
    fn sample(&self) -> Option<MemoryReading> {
        if !self.available.load(Ordering::Acquire) {
            return None;
        }
        Some(MemoryReading {
            used_bytes: self.used_percent.load(Ordering::Acquire) as u64,
            budget_bytes: 100,
        })
    }
}

impl<S: MemorySampler + ?Sized> MemorySampler for Arc<S> {
    fn sample(&self) -> Option<MemoryReading> {
        (**self).sample()
    }
}

struct MonitorInner {
    sampler: Box<dyn MemorySampler>,
    threshold_percent: u8,
    used_percent: AtomicU8,
    under_pressure: AtomicBool,
}

/// Shared handle to the process-wide memory pressure reading
#[derive(Clone)]
pub struct ResourcePressureMonitor {
    inner: Arc<MonitorInner>,
}

impl ResourcePressureMonitor {
    /// Create a monitor around a sampler
    ///
    /// # Arguments
    /// * `sampler` - Where readings come from
    /// * `threshold_percent` - Usage at or above this counts as pressure
    pub fn new(sampler: impl MemorySampler + 'static, threshold_percent: u8) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                sampler: Box::new(sampler),
                threshold_percent: threshold_percent.clamp(1, 100),
                used_percent: AtomicU8::new(0),
                under_pressure: AtomicBool::new(false),
            }),
        }
    }

    /// Monitor for the current process with an optional fixed budget
    pub fn for_process(threshold_percent: u8, budget_bytes: Option<u64>) -> Self {
        let sampler = match budget_bytes {
            Some(budget) => ProcessMemorySampler::with_budget(budget),
            None => ProcessMemorySampler::new(),
        };
        Self::new(sampler, threshold_percent)
    }

    /// The monitor shared by everything in this process
    ///
    /// Created on first use with the given settings; later callers get the
    /// same handle and their arguments are ignored. Use [`Self::for_process`]
    /// or [`Self::new`] for a private monitor.
    pub fn process(threshold_percent: u8, budget_bytes: Option<u64>) -> Self {
        let monitor = PROCESS_MONITOR.get_or_init(|| {
            debug!(threshold_percent, ?budget_bytes, "Creating process memory monitor");
            Self::for_process(threshold_percent, budget_bytes)
        });
        if monitor.threshold_percent() != threshold_percent.clamp(1, 100) {
            debug!(
                requested = threshold_percent,
                active = monitor.threshold_percent(),
                "Process memory monitor already created with another threshold"
            );
        }
        monitor.clone()
    }

    /// Whether both handles read the same monitor
    pub fn same_monitor(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Re-sample the platform counter and publish the new reading
    ///
    /// A missing reading keeps the previous usage figure but clears the
    /// pressure flag.
    pub fn refresh(&self) -> MemoryStatus {
        let inner = &self.inner;
        match inner.sampler.sample() {
            Some(reading) => {
                let used_percent = reading.used_percent();
                let under_pressure = used_percent >= inner.threshold_percent;
                inner.used_percent.store(used_percent, Ordering::Release);
                let was_under = inner.under_pressure.swap(under_pressure, Ordering::AcqRel);

                if under_pressure && !was_under {
                    warn!(
                        used_percent,
                        threshold = inner.threshold_percent,
                        "Memory pressure detected"
                    );
                } else if !under_pressure && was_under {
                    debug!(used_percent, "Memory pressure cleared");
                }
                trace!(used_percent, under_pressure, "Memory sampled");
            }
            None => {
                inner.under_pressure.store(false, Ordering::Release);
                trace!("Memory counter unavailable, assuming no pressure");
            }
        }
        self.status()
    }

    /// Last published reading without re-sampling
    pub fn status(&self) -> MemoryStatus {
        MemoryStatus {
            used_percent: self.usage_percent(),
            under_pressure: self.is_under_pressure(),
        }
    }

    pub fn is_under_pressure(&self) -> bool {
        self.inner.under_pressure.load(Ordering::Acquire)
    }

    pub fn usage_percent(&self) -> u8 {
        self.inner.used_percent.load(Ordering::Acquire)
    }

    pub fn threshold_percent(&self) -> u8 {
        self.inner.threshold_percent
    }
}

impl std::fmt::Debug for ResourcePressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePressureMonitor")
            .field("used_percent", &self.usage_percent())
            .field("under_pressure", &self.is_under_pressure())
            .field("threshold_percent", &self.inner.threshold_percent)
            .finish()
    }
}
