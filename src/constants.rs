// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants
//!
//! These are tuning defaults rather than contracts; every one of them can be
//! overridden through [`PipelineSettings`](crate::config::PipelineSettings).

/// Maximum number of captures allowed in flight at once
pub const DEFAULT_MAX_CONCURRENT_CAPTURES: usize = 3;

/// Pixel budget for slow-path output while the host is under memory pressure
pub const DEFAULT_DOWNSAMPLE_TARGET_PIXELS: u64 = 2_000_000;

/// Sample factor applied when more than one capture is in flight
pub const DEFAULT_CONCURRENT_SAMPLE_FACTOR: u32 = 2;

/// Memory usage (percent of budget) above which the host counts as under pressure
pub const DEFAULT_PRESSURE_THRESHOLD_PERCENT: u8 = 80;

/// Number of encoding workers
pub const DEFAULT_ENCODING_WORKERS: usize = 2;

/// Number of recent captures remembered by the media index
pub const RECENT_MEDIA_CAPACITY: usize = 32;

/// Zoom range reported by backends that have no optical zoom
pub const DEFAULT_ZOOM_RANGE: (f32, f32) = (1.0, 8.0);

/// JPEG quality constants
pub mod jpeg {
    /// Low quality (high compression), used under memory pressure
    pub const LOW: u8 = 70;
    /// Medium quality, used for latency-oriented captures
    pub const MEDIUM: u8 = 85;
    /// High quality, balanced default
    pub const HIGH: u8 = 92;
    /// Maximum quality for quality-prioritized captures
    pub const MAXIMUM: u8 = 98;
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Interval between preview frames produced by the still-image backend
    pub const STILL_PREVIEW_INTERVAL: Duration = Duration::from_millis(100);

    /// Suggested back-off before retrying a rejected capture
    pub const ADMISSION_RETRY_DELAY: Duration = Duration::from_millis(150);
}
