//! Bounded pool for blocking container engine calls.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::engine::EngineError;

/// Runs blocking work on tokio's blocking threads, at most `size` at a time.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl BlockingPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of calls that could start right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` off the async threads once a slot is free.
    ///
    /// The slot stays taken until `f` returns, even if the caller stops
    /// waiting for it.
    pub async fn run<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Worker("worker pool closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))?
    }
}
