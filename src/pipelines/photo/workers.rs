// SPDX-License-Identifier: GPL-3.0-only

//! Bounded pool for CPU-bound encoding jobs
//!
//! Jobs run on tokio's blocking threads, but at most `workers` of them at a
//! time, so a burst of slow-path captures cannot starve the rest of the
//! process of CPU or memory.

use crate::errors::EncodingError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

#[derive(Clone)]
pub struct EncodingWorkers {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl EncodingWorkers {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs that could start right now without waiting
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` once a worker is free
    pub async fn run<F, T>(&self, job: F) -> Result<T, EncodingError>
    where
        F: FnOnce() -> Result<T, EncodingError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| EncodingError::WorkerFailed(e.to_string()))?;
        debug!(idle = self.idle(), "Encoding job started");

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Encoding job panicked");
            EncodingError::WorkerFailed(format!("Encoding task error: {}", e))
        })?
    }
}

impl std::fmt::Debug for EncodingWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingWorkers")
            .field("workers", &self.workers)
            .field("idle", &self.idle())
            .finish()
    }
}
