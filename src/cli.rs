// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Taking photos through the full pipeline with a still-image backend
//! - Inspecting memory pressure
//! - Showing and writing pipeline settings

use camera_pipeline::backends::camera::{Orientation, StillImageBackend};
use camera_pipeline::backends::memory::ResourcePressureMonitor;
use camera_pipeline::config::{LensFacing, PhotoOutputFormat, default_photo_directory};
use camera_pipeline::constants::timing::ADMISSION_RETRY_DELAY;
use camera_pipeline::errors::CaptureError;
use camera_pipeline::plugins::CaptureLogPlugin;
use camera_pipeline::storage::{MediaIndex, RecentMediaIndex, latest_capture};
use camera_pipeline::{CameraController, CaptureConfiguration, CaptureResult, PipelineSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const ADMISSION_RETRIES: usize = 3;

pub struct PhotoArgs {
    pub input: PathBuf,
    pub count: usize,
    pub format: String,
    pub output: Option<PathBuf>,
    pub orientation: Option<i32>,
    pub front: bool,
}

/// Request `count` captures at once and report each result
pub fn take_photos(args: PhotoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let format: PhotoOutputFormat = args.format.parse()?;
    let output_dir = args.output.unwrap_or_else(default_photo_directory);
    let settings = load_settings(None)?;

    let backend = StillImageBackend::from_file(&args.input, args.orientation.map(Orientation::from_degrees))?;
    let monitor = ResourcePressureMonitor::process(
        settings.pressure_threshold_percent,
        settings.memory_budget_bytes,
    );
    let index = Arc::new(RecentMediaIndex::default());
    let controller = CameraController::with_parts(
        Box::new(backend),
        settings,
        monitor,
        Some(Arc::clone(&index) as Arc<dyn MediaIndex>),
    );

    let config = CaptureConfiguration::builder()
        .format(format)
        .lens(if args.front { LensFacing::Front } else { LensFacing::Back })
        .mirror_front(args.front)
        .output_dir(output_dir.clone())
        .build()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let session = controller.start_session(config).await?;
        println!("Session ready: {} ({})", session.device_name, session.resolution);

        let log = Arc::new(CaptureLogPlugin::default());
        controller.attach_plugin(log.clone());

        let start = Instant::now();
        let captures = (0..args.count.max(1)).map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { capture_with_retry(&controller).await })
        });
        let results = futures::future::join_all(captures).await;

        for (n, result) in results.into_iter().enumerate() {
            match result? {
                CaptureResult::SuccessWithFile(path) => println!("[{}] Photo saved: {}", n, path.display()),
                CaptureResult::Success(bytes) => println!("[{}] Captured {} bytes", n, bytes.len()),
                CaptureResult::Error(e) => println!("[{}] Capture failed: {}", n, e),
            }
        }

        let stats = controller.admission_stats();
        println!(
            "Done in {:.2}s: {} admitted, {} rejected",
            start.elapsed().as_secs_f64(),
            stats.admitted,
            stats.rejected
        );
        let latest = match index.latest() {
            Some(path) => Some(path),
            None => latest_capture(output_dir).await,
        };
        if let Some(latest) = latest {
            println!("Latest capture: {}", latest.display());
        }

        controller.stop_session().await;
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}

/// Retry rejected captures a few times after the suggested back-off
async fn capture_with_retry(controller: &CameraController) -> CaptureResult {
    let mut result = controller.request_capture().await;
    for _ in 0..ADMISSION_RETRIES {
        let retryable = matches!(
            result.error(),
            Some(CaptureError::Admission(e)) if e.is_retryable()
        );
        if !retryable {
            break;
        }
        tokio::time::sleep(ADMISSION_RETRY_DELAY).await;
        result = controller.request_capture().await;
    }
    result
}

/// Print the memory pressure reading
pub fn show_memory() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings(None)?;
    let monitor = ResourcePressureMonitor::process(
        settings.pressure_threshold_percent,
        settings.memory_budget_bytes,
    );
    let status = monitor.refresh();

    println!("Memory used:  {}%", status.used_percent);
    println!("Threshold:    {}%", monitor.threshold_percent());
    println!(
        "Pressure:     {}",
        if status.under_pressure { "yes" } else { "no" }
    );
    Ok(())
}

/// Print the effective settings, optionally writing them back
pub fn show_settings(path: Option<PathBuf>, write: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = path
        .or_else(PipelineSettings::default_path)
        .ok_or("No config directory available")?;
    let settings = load_settings(Some(path.clone()))?;

    println!("Settings file: {}", path.display());
    println!("{}", serde_json::to_string_pretty(&settings)?);

    if write {
        settings.save(&path)?;
        println!("Settings written");
    }
    Ok(())
}

fn load_settings(path: Option<PathBuf>) -> Result<PipelineSettings, Box<dyn std::error::Error>> {
    match path.or_else(PipelineSettings::default_path) {
        Some(path) => Ok(PipelineSettings::load(&path)?),
        None => Ok(PipelineSettings::default()),
    }
}
