// SPDX-License-Identifier: GPL-3.0-only

//! Plugin that keeps a history of capture results

use super::{CameraPlugin, SessionHolder};
use crate::errors::PluginError;
use crate::pipelines::photo::CaptureResult;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Default)]
struct LogState {
    entries: VecDeque<CaptureResult>,
    attaches: usize,
    detaches: usize,
}

/// Records the most recent capture results it receives
pub struct CaptureLogPlugin {
    capacity: usize,
    state: Mutex<LogState>,
}

impl CaptureLogPlugin {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LogState::default()),
        }
    }

    /// Recorded results, oldest first
    pub fn entries(&self) -> Vec<CaptureResult> {
        self.state().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How often the plugin was attached and detached
    pub fn lifecycle_counts(&self) -> (usize, usize) {
        let state = self.state();
        (state.attaches, state.detaches)
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CaptureLogPlugin {
    fn default() -> Self {
        Self::new(crate::constants::RECENT_MEDIA_CAPACITY)
    }
}

impl CameraPlugin for CaptureLogPlugin {
    fn name(&self) -> &str {
        "capture-log"
    }

    fn on_attach(&self, _holder: &SessionHolder) -> Result<(), PluginError> {
        self.state().attaches += 1;
        Ok(())
    }

    fn on_detach(&self) {
        self.state().detaches += 1;
    }

    fn on_capture_result(&self, result: &CaptureResult) -> Result<(), PluginError> {
        debug!(%result, "Capture logged");
        let mut state = self.state();
        if state.entries.len() == self.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AdmissionError, CaptureError};
    use std::sync::Arc;

    #[test]
    fn test_log_is_bounded() {
        let log = CaptureLogPlugin::new(2);
        log.on_capture_result(&CaptureResult::Success(Arc::from(vec![1u8])))
            .unwrap();
        log.on_capture_result(&CaptureResult::Error(CaptureError::Cancelled))
            .unwrap();
        log.on_capture_result(&CaptureResult::Error(AdmissionError::BurstQueueFull.into()))
            .unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0], CaptureResult::Error(CaptureError::Cancelled));
    }
}
