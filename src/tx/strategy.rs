//! Execution strategies
//!
//! A strategy decides how a gathered batch is run: serial threads finish
//! each transaction before gathering the next, parallel threads hand the
//! batch to its own task, bounded by a semaphore.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;

use super::atomic::Batch;
use super::thread::{execute, ThreadShared};

pub(crate) trait ExecutionStrategy: Send + Sync {
    fn is_serial(&self) -> bool;

    /// Runs (serial) or launches (parallel) one batch.
    fn dispatch(
        &self,
        batch: Batch,
        shared: Arc<ThreadShared>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// One transaction at a time, in submission order
pub(crate) struct SerialQueue;

impl ExecutionStrategy for SerialQueue {
    fn is_serial(&self) -> bool {
        true
    }

    fn dispatch(
        &self,
        batch: Batch,
        shared: Arc<ThreadShared>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(execute(shared, batch))
    }
}

/// Up to `permits` transactions outstanding at once
pub(crate) struct ParallelPool {
    permits: Arc<Semaphore>,
}

impl ParallelPool {
    pub(crate) fn new(permits: Arc<Semaphore>) -> Self {
        Self { permits }
    }
}

impl ExecutionStrategy for ParallelPool {
    fn is_serial(&self) -> bool {
        false
    }

    fn dispatch(
        &self,
        batch: Batch,
        shared: Arc<ThreadShared>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let permits = Arc::clone(&self.permits);
        Box::pin(async move {
            match permits.acquire_owned().await {
                Ok(permit) => {
                    tokio::spawn(async move {
                        execute(shared, batch).await;
                        drop(permit);
                    });
                }
                // Closed semaphore: run inline rather than drop the batch
                Err(_) => execute(shared, batch).await,
            }
        })
    }
}
