// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for preview loops
//!
//! Backends that produce preview frames on their own thread use
//! [`PreviewLoop`] so start, stop and join behave the same everywhere.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// A named thread calling a tick function at a fixed interval
///
/// Dropping the loop stops it and waits for the thread.
pub struct PreviewLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl PreviewLoop {
    /// Start calling `tick` every `interval` until it returns
    /// [`LoopAction::Stop`] or the loop is stopped
    pub fn start<F>(name: &str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, interval_ms = interval.as_millis() as u64, "Starting preview loop");

        let thread_handle = thread::spawn(move || {
            while !thread_stop.load(Ordering::Acquire) {
                if tick() == LoopAction::Stop {
                    debug!(name = %thread_name, "Loop requested stop");
                    break;
                }
                thread::sleep(interval);
            }
            debug!(name = %thread_name, "Preview loop thread exiting");
        });

        Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::Release);
        if let Some(handle) = self.thread_handle.take()
            && handle.join().is_err()
        {
            warn!(name = %self.name, "Preview loop thread panicked");
        }
    }
}

impl Drop for PreviewLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}
