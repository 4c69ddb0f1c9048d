// SPDX-License-Identifier: GPL-3.0-only

//! Session state machine transitions

mod common;

use camera_pipeline::backends::camera::{SessionState, SessionStateMachine};
use camera_pipeline::config::{DeviceType, LensFacing};
use camera_pipeline::errors::{AdmissionError, BindError, SessionError};
use camera_pipeline::CaptureConfiguration;
use common::ScriptedBackend;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn machine() -> (Arc<SessionStateMachine>, Arc<common::Script>) {
    let (backend, script) = ScriptedBackend::new();
    (Arc::new(SessionStateMachine::new(Box::new(backend))), script)
}

#[tokio::test]
async fn test_starts_initializing_and_binds() {
    let (session, _) = machine();
    assert_eq!(session.current_state(), SessionState::Initializing);
    assert!(matches!(session.capture_gate(), Err(AdmissionError::SessionNotReady)));

    let handle = session.bind(CaptureConfiguration::default()).await.unwrap();
    assert_eq!(session.current_state(), SessionState::Ready { session: handle });
    assert!(session.capture_gate().is_ok());
}

#[tokio::test]
async fn test_bind_errors_carry_retryable_flag() {
    let (session, script) = machine();
    script.fail_next_bind(BindError::PermissionDenied);

    let err = session.bind(CaptureConfiguration::default()).await.unwrap_err();
    assert_eq!(err, SessionError::Bind(BindError::PermissionDenied));
    assert_eq!(
        session.current_state(),
        SessionState::Error {
            cause: BindError::PermissionDenied,
            retryable: false
        }
    );

    script.fail_next_bind(BindError::DeviceUnavailable("unplugged".into()));
    session.bind(CaptureConfiguration::default()).await.unwrap_err();
    assert!(matches!(
        session.current_state(),
        SessionState::Error { retryable: true, .. }
    ));

    // Caller-driven retry; nothing retried on its own
    assert_eq!(script.binds.load(Ordering::SeqCst), 2);
    session.bind(CaptureConfiguration::default()).await.unwrap();
    assert!(session.current_state().is_ready());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rebind_pulses_initializing() {
    let (session, script) = machine();
    let first = session.bind(CaptureConfiguration::default()).await.unwrap();

    let mut rx = session.subscribe();
    rx.borrow_and_update();
    script.set_bind_delay(Duration::from_millis(50));

    let config = CaptureConfiguration::builder()
        .lens(LensFacing::Front)
        .device_type(DeviceType::UltraWide)
        .build()
        .unwrap();
    let rebinding = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.rebind(config).await })
    };

    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), SessionState::Initializing);
    assert!(session.capture_gate().is_err());

    let second = rebinding.await.unwrap().unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.lens, LensFacing::Front);
    assert_eq!(second.device_type, DeviceType::UltraWide);
    assert_eq!(
        script.last_config.lock().unwrap().as_ref().unwrap().device_type,
        DeviceType::UltraWide
    );
}

#[tokio::test]
async fn test_unbind_is_terminal_and_idempotent() {
    let (session, _) = machine();
    session.bind(CaptureConfiguration::default()).await.unwrap();

    session.unbind().await;
    session.unbind().await;
    assert_eq!(session.current_state(), SessionState::Stopped);

    assert_eq!(
        session.bind(CaptureConfiguration::default()).await.unwrap_err(),
        SessionError::Stopped
    );
    assert_eq!(
        session.rebind(CaptureConfiguration::default()).await.unwrap_err(),
        SessionError::Stopped
    );
    assert_eq!(session.wait_ready().await.unwrap_err(), SessionError::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_ready_resolves_after_bind() {
    let (session, script) = machine();
    script.set_bind_delay(Duration::from_millis(30));

    let waiter = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.wait_ready().await })
    };
    let bound = session.bind(CaptureConfiguration::default()).await.unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), bound);
}

#[tokio::test]
async fn test_zoom_is_clamped_to_device_range() {
    let (session, _) = machine();
    assert!(session.set_zoom(2.0).is_err());

    session.bind(CaptureConfiguration::default()).await.unwrap();
    assert_eq!(session.set_zoom(0.2).unwrap(), 1.0);
    assert_eq!(session.set_zoom(2.5).unwrap(), 2.5);
    assert_eq!(session.set_zoom(f32::NAN).unwrap(), 1.0);
}
