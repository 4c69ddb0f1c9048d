// SPDX-License-Identifier: GPL-3.0-only

//! Capture configuration and pipeline settings
//!
//! [`CaptureConfiguration`] is the immutable snapshot handed to the native
//! backend when a session is bound. Changing the lens, resolution or device
//! type means building a new snapshot and rebinding the session.
//!
//! [`PipelineSettings`] holds the tuning knobs of the pipeline itself and is
//! persisted as JSON in the user's config directory.

use crate::constants;
use crate::errors::{BindError, SettingsError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which side of the device the lens faces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LensFacing {
    #[default]
    Back,
    Front,
}

impl LensFacing {
    /// The opposite lens
    pub fn flipped(self) -> Self {
        match self {
            LensFacing::Back => LensFacing::Front,
            LensFacing::Front => LensFacing::Back,
        }
    }
}

/// Flash behaviour during a still capture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashMode {
    #[default]
    Off,
    On,
    Auto,
}

impl FlashMode {
    /// Cycle to the next mode: Off -> On -> Auto -> Off
    pub fn next(self) -> Self {
        match self {
            FlashMode::Off => FlashMode::On,
            FlashMode::On => FlashMode::Auto,
            FlashMode::Auto => FlashMode::Off,
        }
    }
}

/// Continuous torch (flashlight) behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorchMode {
    #[default]
    Off,
    On,
    Auto,
}

impl TorchMode {
    /// Toggle between on and off; `Auto` counts as off
    pub fn toggled(self) -> Self {
        match self {
            TorchMode::On => TorchMode::Off,
            TorchMode::Off | TorchMode::Auto => TorchMode::On,
        }
    }

    pub fn is_lit(self) -> bool {
        self == TorchMode::On
    }
}

/// Output image format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhotoOutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl PhotoOutputFormat {
    /// File extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            PhotoOutputFormat::Jpeg => "jpg",
            PhotoOutputFormat::Png => "png",
        }
    }
}

impl std::str::FromStr for PhotoOutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(PhotoOutputFormat::Jpeg),
            "png" => Ok(PhotoOutputFormat::Png),
            other => Err(format!("unknown image format '{}'", other)),
        }
    }
}

/// What the capture should optimise for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityPrioritization {
    Quality,
    Speed,
    #[default]
    Balanced,
    None,
}

/// Explicit capture resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Aspect ratio hint used when no explicit resolution is given
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    Ratio4x3,
    Ratio16x9,
    Ratio1x1,
}

impl AspectRatio {
    /// Width over height
    pub fn as_f32(&self) -> f32 {
        match self {
            AspectRatio::Ratio4x3 => 4.0 / 3.0,
            AspectRatio::Ratio16x9 => 16.0 / 9.0,
            AspectRatio::Ratio1x1 => 1.0,
        }
    }
}

/// Preferred physical sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    #[default]
    Default,
    Wide,
    Telephoto,
    UltraWide,
    Macro,
}

/// Immutable snapshot consumed by the native backend at bind time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfiguration {
    pub lens: LensFacing,
    pub flash: FlashMode,
    pub torch: TorchMode,
    pub format: PhotoOutputFormat,
    pub quality: QualityPrioritization,
    pub target_resolution: Option<Resolution>,
    pub aspect_ratio: AspectRatio,
    pub device_type: DeviceType,
    /// Where encoded captures are written; `None` keeps results in memory
    pub output_dir: Option<PathBuf>,
    /// Mirror front-lens captures horizontally
    pub mirror_front: bool,
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            lens: LensFacing::default(),
            flash: FlashMode::default(),
            torch: TorchMode::default(),
            format: PhotoOutputFormat::default(),
            quality: QualityPrioritization::default(),
            target_resolution: None,
            aspect_ratio: AspectRatio::default(),
            device_type: DeviceType::default(),
            output_dir: None,
            mirror_front: false,
        }
    }
}

impl CaptureConfiguration {
    pub fn builder() -> CaptureConfigurationBuilder {
        CaptureConfigurationBuilder::default()
    }

    /// Start a builder from this snapshot, used to derive a rebind configuration
    pub fn to_builder(&self) -> CaptureConfigurationBuilder {
        CaptureConfigurationBuilder {
            config: self.clone(),
        }
    }

    /// Whether captures from this configuration must be mirrored
    pub fn mirrors_output(&self) -> bool {
        self.mirror_front && self.lens == LensFacing::Front
    }
}

/// Builder for [`CaptureConfiguration`]
#[derive(Debug, Clone, Default)]
pub struct CaptureConfigurationBuilder {
    config: CaptureConfiguration,
}

impl CaptureConfigurationBuilder {
    pub fn lens(mut self, lens: LensFacing) -> Self {
        self.config.lens = lens;
        self
    }

    pub fn flash(mut self, flash: FlashMode) -> Self {
        self.config.flash = flash;
        self
    }

    pub fn torch(mut self, torch: TorchMode) -> Self {
        self.config.torch = torch;
        self
    }

    pub fn format(mut self, format: PhotoOutputFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn quality(mut self, quality: QualityPrioritization) -> Self {
        self.config.quality = quality;
        self
    }

    pub fn target_resolution(mut self, resolution: Option<Resolution>) -> Self {
        self.config.target_resolution = resolution;
        self
    }

    pub fn aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.config.aspect_ratio = aspect_ratio;
        self
    }

    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.config.device_type = device_type;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.config.output_dir = None;
        self
    }

    pub fn mirror_front(mut self, mirror: bool) -> Self {
        self.config.mirror_front = mirror;
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<CaptureConfiguration, BindError> {
        if let Some(res) = self.config.target_resolution
            && (res.width == 0 || res.height == 0)
        {
            return Err(BindError::InvalidConfiguration(format!(
                "target resolution {} has a zero dimension",
                res
            )));
        }

        if let Some(dir) = &self.config.output_dir
            && dir.is_file()
        {
            return Err(BindError::InvalidConfiguration(format!(
                "output directory {} is a file",
                dir.display()
            )));
        }

        Ok(self.config)
    }
}

/// Tuning knobs of the pipeline itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Admission ceiling for concurrent captures
    pub max_concurrent_captures: usize,
    /// Pixel budget for downsampled captures under memory pressure
    pub downsample_target_pixels: u64,
    /// Sample factor used when several captures are in flight
    pub concurrent_sample_factor: u32,
    /// Memory usage percent that counts as pressure
    pub pressure_threshold_percent: u8,
    /// Memory budget in bytes; `None` uses physical memory
    pub memory_budget_bytes: Option<u64>,
    /// Number of encoding workers
    pub encoding_workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_captures: constants::DEFAULT_MAX_CONCURRENT_CAPTURES,
            downsample_target_pixels: constants::DEFAULT_DOWNSAMPLE_TARGET_PIXELS,
            concurrent_sample_factor: constants::DEFAULT_CONCURRENT_SAMPLE_FACTOR,
            pressure_threshold_percent: constants::DEFAULT_PRESSURE_THRESHOLD_PERCENT,
            memory_budget_bytes: None,
            encoding_workers: constants::DEFAULT_ENCODING_WORKERS,
        }
    }
}

impl PipelineSettings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("camera-pipeline").join("settings.json"))
    }

    /// Load settings from a JSON file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| SettingsError::io(path, &e))?;
        let settings: Self = serde_json::from_str(&contents).map_err(|e| SettingsError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        info!(path = %path.display(), "Loaded pipeline settings");
        Ok(settings.validated())
    }

    /// Write settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::io(parent, &e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SettingsError::Serialize(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| SettingsError::io(path, &e))
    }

    /// Replace zero or out-of-range values with defaults
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.max_concurrent_captures == 0 {
            warn!("max_concurrent_captures of 0 would reject every capture, using default");
            self.max_concurrent_captures = defaults.max_concurrent_captures;
        }
        if self.downsample_target_pixels == 0 {
            self.downsample_target_pixels = defaults.downsample_target_pixels;
        }
        if self.concurrent_sample_factor == 0 || !self.concurrent_sample_factor.is_power_of_two() {
            self.concurrent_sample_factor = defaults.concurrent_sample_factor;
        }
        if self.pressure_threshold_percent == 0 || self.pressure_threshold_percent > 100 {
            self.pressure_threshold_percent = defaults.pressure_threshold_percent;
        }
        if self.encoding_workers == 0 {
            self.encoding_workers = defaults.encoding_workers;
        }
        self
    }
}

/// Default directory for captured photos (`~/Pictures/camera`)
pub fn default_photo_directory() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("camera")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_rejects_zero_resolution() {
        let result = CaptureConfiguration::builder()
            .target_resolution(Some(Resolution::new(0, 1080)))
            .build();
        assert!(matches!(result, Err(BindError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_to_builder_keeps_fields() {
        let config = CaptureConfiguration::builder()
            .format(PhotoOutputFormat::Png)
            .quality(QualityPrioritization::Speed)
            .build()
            .unwrap();
        let flipped = config.to_builder().lens(config.lens.flipped()).build().unwrap();

        assert_eq!(flipped.lens, LensFacing::Front);
        assert_eq!(flipped.format, PhotoOutputFormat::Png);
        assert_eq!(flipped.quality, QualityPrioritization::Speed);
    }

    #[test]
    fn test_flash_cycle() {
        assert_eq!(FlashMode::Off.next(), FlashMode::On);
        assert_eq!(FlashMode::On.next(), FlashMode::Auto);
        assert_eq!(FlashMode::Auto.next(), FlashMode::Off);
    }

    #[test]
    fn test_mirrors_only_front() {
        let config = CaptureConfiguration::builder().mirror_front(true).build().unwrap();
        assert!(!config.mirrors_output());
        let front = config.to_builder().lens(LensFacing::Front).build().unwrap();
        assert!(front.mirrors_output());
    }

    #[test]
    fn test_settings_validated() {
        let settings = PipelineSettings {
            max_concurrent_captures: 0,
            concurrent_sample_factor: 3,
            pressure_threshold_percent: 150,
            encoding_workers: 0,
            ..Default::default()
        }
        .validated();

        assert_eq!(settings, PipelineSettings::default());
    }

    #[test]
    fn test_load_reports_typed_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineSettings::load(&path),
            Err(SettingsError::Parse { .. })
        ));

        // A directory where the file should be
        let err = PipelineSettings::load(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }), "got {err}");
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JPG".parse::<PhotoOutputFormat>(), Ok(PhotoOutputFormat::Jpeg));
        assert_eq!("png".parse::<PhotoOutputFormat>(), Ok(PhotoOutputFormat::Png));
        assert!("gif".parse::<PhotoOutputFormat>().is_err());
    }
}
