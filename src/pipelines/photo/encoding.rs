// SPDX-License-Identifier: GPL-3.0-only

//! Capture encoding pipeline
//!
//! Turns a raw native capture into the requested output. Two paths:
//!
//! - **Fast path**: the native bytes already match what was asked for and
//!   are handed on unchanged, without decoding.
//! - **Slow path**: decode, downsample, rotate upright, mirror if needed,
//!   then re-encode as JPEG (with quality) or PNG.
//!
//! The result is either kept in memory or written to the output directory
//! under a timestamped name. Writes go through a `.part` file so a failed
//! capture never leaves a truncated image behind.

use super::CaptureResult;
use super::admission::{CaptureStrategy, Downsample};
use super::processing;
use super::workers::EncodingWorkers;
use crate::backends::camera::types::{Orientation, RawCapture};
use crate::config::PhotoOutputFormat;
use crate::errors::EncodingError;
use crate::storage::{self, MediaIndex};
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which encoding path a capture takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePath {
    Fast,
    Slow,
}

/// Everything the pipeline needs to finish one capture
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub raw: RawCapture,
    pub target_format: PhotoOutputFormat,
    pub strategy: CaptureStrategy,
    /// Pressure reading taken just before encoding
    pub under_pressure: bool,
    /// Mirror horizontally (front lens)
    pub mirror: bool,
    /// `None` keeps the encoded bytes in memory
    pub output_dir: Option<PathBuf>,
    /// Pixel budget used if pressure appeared after admission
    pub pressure_target_pixels: u64,
}

impl EncodeRequest {
    /// Orientation of the raw capture: native metadata first, then EXIF
    pub fn source_orientation(&self) -> Orientation {
        self.raw
            .orientation
            .or_else(|| processing::exif_orientation(&self.raw.data))
            .unwrap_or_default()
    }

    /// Pick the encoding path
    ///
    /// The fast path needs all of: matching format, upright source, no
    /// memory pressure, no mirroring.
    pub fn path(&self) -> EncodePath {
        let pressure = self.under_pressure || self.strategy.under_pressure;
        if self.raw.format == self.target_format
            && self.source_orientation().is_normal()
            && !pressure
            && !self.mirror
        {
            EncodePath::Fast
        } else {
            EncodePath::Slow
        }
    }

    fn downsample(&self) -> Downsample {
        match self.strategy.downsample {
            Downsample::FitPixels(_) => self.strategy.downsample,
            _ if self.under_pressure => Downsample::FitPixels(self.pressure_target_pixels),
            other => other,
        }
    }
}

enum Encoded {
    InMemory(Arc<[u8]>),
    File(PathBuf),
}

/// Encodes captures on a bounded worker pool
#[derive(Clone)]
pub struct EncodingPipeline {
    workers: EncodingWorkers,
    media_index: Option<Arc<dyn MediaIndex>>,
}

impl EncodingPipeline {
    /// Create a pipeline
    ///
    /// # Arguments
    /// * `workers` - Pool that runs decode, encode and disk writes
    /// * `media_index` - Notified of every file written, best effort
    pub fn new(workers: EncodingWorkers, media_index: Option<Arc<dyn MediaIndex>>) -> Self {
        Self { workers, media_index }
    }

    pub fn workers(&self) -> &EncodingWorkers {
        &self.workers
    }

    /// Encode one capture
    ///
    /// Never panics the caller: worker failures come back as
    /// [`CaptureResult::Error`].
    pub async fn encode(&self, request: EncodeRequest) -> CaptureResult {
        let path = request.path();
        info!(
            path = ?path,
            source = ?request.raw.format,
            target = ?request.target_format,
            under_pressure = request.under_pressure,
            "Encoding capture"
        );

        let media_index = self.media_index.clone();
        let outcome = self
            .workers
            .run(move || {
                let encoded = match path {
                    EncodePath::Fast => Arc::clone(&request.raw.data),
                    EncodePath::Slow => Arc::from(Self::reencode(&request)?),
                };
                match &request.output_dir {
                    None => Ok(Encoded::InMemory(encoded)),
                    Some(dir) => {
                        let file = Self::save(&encoded, dir, request.target_format)?;
                        if let Some(index) = media_index
                            && let Err(e) = index.register(&file)
                        {
                            warn!(error = %e, "Media index update failed");
                        }
                        Ok(Encoded::File(file))
                    }
                }
            })
            .await;

        match outcome {
            Ok(Encoded::InMemory(bytes)) => {
                debug!(size = bytes.len(), "Capture encoded in memory");
                CaptureResult::Success(bytes)
            }
            Ok(Encoded::File(file)) => CaptureResult::SuccessWithFile(file),
            Err(e) => {
                warn!(error = %e, "Capture encoding failed");
                CaptureResult::Error(e.into())
            }
        }
    }

    /// Slow path: decode, reshape and encode again
    fn reencode(request: &EncodeRequest) -> Result<Vec<u8>, EncodingError> {
        let decoded = image::load_from_memory(&request.raw.data)?;
        let pixels = decoded.width() as u64 * decoded.height() as u64;
        let factor = request.downsample().factor_for(pixels);

        let mut image = processing::downsample(decoded, factor);
        image = processing::apply_orientation(image, request.source_orientation());
        if request.mirror {
            image = processing::mirror(image);
        }

        let data = match request.target_format {
            PhotoOutputFormat::Jpeg => Self::encode_jpeg(image, request.strategy.jpeg_quality)?,
            PhotoOutputFormat::Png => Self::encode_png(image)?,
        };
        debug!(size = data.len(), factor, "Slow-path encoding complete");
        Ok(data)
    }

    /// Encode image as JPEG
    fn encode_jpeg(image: DynamicImage, quality: u8) -> Result<Vec<u8>, EncodingError> {
        let rgb = image.to_rgb8();
        let mut buffer = Vec::new();
        {
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
            encoder.encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )?;
        }
        Ok(buffer)
    }

    /// Encode image as PNG
    fn encode_png(image: DynamicImage) -> Result<Vec<u8>, EncodingError> {
        let mut buffer = Vec::new();
        image.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Write under a fresh timestamped name in `dir`
    fn save(data: &[u8], dir: &std::path::Path, format: PhotoOutputFormat) -> Result<PathBuf, EncodingError> {
        std::fs::create_dir_all(dir)?;
        let filename = storage::capture_filename(chrono::Local::now(), format.extension());
        let path = storage::unique_capture_path(dir, &filename);

        info!(path = %path.display(), "Saving photo");
        storage::write_atomically(&path, data)?;
        Ok(path)
    }
}

impl std::fmt::Debug for EncodingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingPipeline")
            .field("workers", &self.workers)
            .field("media_index", &self.media_index.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::CaptureMode;
    use crate::constants::jpeg;
    use std::time::Instant;

    fn strategy(downsample: Downsample) -> CaptureStrategy {
        CaptureStrategy {
            mode: CaptureMode::MaximizeQuality,
            jpeg_quality: jpeg::HIGH,
            downsample,
            under_pressure: false,
        }
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Jpeg)
            .unwrap();
        buffer
    }

    fn request(data: Vec<u8>, orientation: Option<Orientation>, target: PhotoOutputFormat) -> EncodeRequest {
        EncodeRequest {
            raw: RawCapture {
                data: Arc::from(data),
                format: PhotoOutputFormat::Jpeg,
                orientation,
                captured_at: Instant::now(),
            },
            target_format: target,
            strategy: strategy(Downsample::None),
            under_pressure: false,
            mirror: false,
            output_dir: None,
            pressure_target_pixels: 2_000_000,
        }
    }

    fn pipeline() -> EncodingPipeline {
        EncodingPipeline::new(EncodingWorkers::new(2), None)
    }

    #[test]
    fn test_path_selection() {
        let base = request(jpeg_bytes(4, 4), Some(Orientation::Normal), PhotoOutputFormat::Jpeg);
        assert_eq!(base.path(), EncodePath::Fast);

        let mut other_format = base.clone();
        other_format.target_format = PhotoOutputFormat::Png;
        assert_eq!(other_format.path(), EncodePath::Slow);

        let mut rotated = base.clone();
        rotated.raw.orientation = Some(Orientation::Rotate90);
        assert_eq!(rotated.path(), EncodePath::Slow);

        let mut pressure = base.clone();
        pressure.under_pressure = true;
        assert_eq!(pressure.path(), EncodePath::Slow);

        let mut mirrored = base;
        mirrored.mirror = true;
        assert_eq!(mirrored.path(), EncodePath::Slow);
    }

    #[tokio::test]
    async fn test_fast_path_is_byte_identical() {
        let source = jpeg_bytes(16, 8);
        let result = pipeline()
            .encode(request(source.clone(), Some(Orientation::Normal), PhotoOutputFormat::Jpeg))
            .await;

        match result {
            CaptureResult::Success(bytes) => assert_eq!(&*bytes, source.as_slice()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_path_rotates_and_converts() {
        let result = pipeline()
            .encode(request(jpeg_bytes(32, 16), Some(Orientation::Rotate90), PhotoOutputFormat::Png))
            .await;

        let CaptureResult::Success(bytes) = result else {
            panic!("expected in-memory success");
        };
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Png);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 32));
    }

    #[tokio::test]
    async fn test_slow_path_fits_pixel_budget() {
        let mut req = request(jpeg_bytes(400, 300), Some(Orientation::Normal), PhotoOutputFormat::Png);
        req.under_pressure = true;
        req.pressure_target_pixels = 10_000;

        let CaptureResult::Success(bytes) = pipeline().encode(req).await else {
            panic!("expected in-memory success");
        };
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.width() as u64 * decoded.height() as u64 <= 10_000);
        // 120000 / 16 = 7500
        assert_eq!((decoded.width(), decoded.height()), (100, 75));
    }

    #[tokio::test]
    async fn test_concurrent_factor_halves() {
        let mut req = request(jpeg_bytes(64, 32), Some(Orientation::Normal), PhotoOutputFormat::Png);
        req.strategy = strategy(Downsample::Factor(2));

        let CaptureResult::Success(bytes) = pipeline().encode(req).await else {
            panic!("expected in-memory success");
        };
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[tokio::test]
    async fn test_corrupt_input_is_decode_error() {
        let mut req = request(vec![0xFF, 0xD8, 0x00, 0x01], Some(Orientation::Normal), PhotoOutputFormat::Png);
        req.raw.format = PhotoOutputFormat::Jpeg;

        match pipeline().encode(req).await {
            CaptureResult::Error(crate::errors::CaptureError::Encoding(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writes_file_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(storage::RecentMediaIndex::new(4));
        let pipeline = EncodingPipeline::new(
            EncodingWorkers::new(1),
            Some(Arc::clone(&index) as Arc<dyn MediaIndex>),
        );

        let mut req = request(jpeg_bytes(8, 8), Some(Orientation::Normal), PhotoOutputFormat::Jpeg);
        req.output_dir = Some(dir.path().join("photos"));

        let CaptureResult::SuccessWithFile(path) = pipeline.encode(req).await else {
            panic!("expected file result");
        };
        assert!(path.starts_with(dir.path().join("photos")));
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(index.latest(), Some(path));
    }
}
