// SPDX-License-Identifier: GPL-3.0-only

//! Callback adapter over the controller

mod common;

use camera_pipeline::backends::memory::{ManualMemorySampler, ResourcePressureMonitor};
use camera_pipeline::{
    CameraController, CaptureConfiguration, CaptureResult, LegacyCameraController,
    PipelineSettings, SessionState,
};
use common::ScriptedBackend;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callbacks_follow_session_and_captures() {
    let (backend, script) = ScriptedBackend::new();
    script.set_auto_complete(true);
    let controller = CameraController::with_parts(
        Box::new(backend),
        PipelineSettings::default(),
        ResourcePressureMonitor::new(ManualMemorySampler::new(10), 80),
        None,
    );
    let legacy = LegacyCameraController::new(controller, tokio::runtime::Handle::current());

    let (state_tx, mut states) = mpsc::unbounded_channel();
    legacy.start(CaptureConfiguration::default(), move |state| {
        let _ = state_tx.send(state);
    });

    let ready = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(state) = states.recv().await {
            if state.is_ready() {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(ready);

    let (result_tx, mut results) = mpsc::unbounded_channel();
    legacy.take_picture(move |result| {
        let _ = result_tx.send(result);
    });
    let result = results.recv().await.unwrap();
    assert!(matches!(result, CaptureResult::Success(_)), "got {}", result);

    let (stopped_tx, stopped) = tokio::sync::oneshot::channel();
    legacy.stop(move || {
        let _ = stopped_tx.send(());
    });
    stopped.await.unwrap();
    assert_eq!(legacy.controller().current_state(), SessionState::Stopped);

    // The forwarder reports the terminal state, then ends
    let mut last = None;
    while let Ok(Some(state)) = tokio::time::timeout(Duration::from_secs(1), states.recv()).await {
        last = Some(state);
    }
    assert_eq!(last, Some(SessionState::Stopped));
}
