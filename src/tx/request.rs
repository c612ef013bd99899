//! Deferred results and the type-erased jobs behind them

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::context::TxContext;
use super::errors::{TxError, TxResult};
use super::policy::TxScope;

/// Deferred result of a scheduled request.
///
/// Resolves once the owning transaction has committed or aborted. A
/// failed request never carries a partial value.
#[must_use = "a request does nothing observable unless awaited"]
#[derive(Debug)]
pub struct Request<T> {
    receiver: oneshot::Receiver<TxResult<T>>,
}

impl<T> Request<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<TxResult<T>>) -> Self {
        Self { receiver }
    }
}

impl<T> Future for Request<T> {
    type Output = TxResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TxError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Result of running one job inside a transaction. Settled once the
/// transaction outcome is known.
pub(crate) struct Outcome {
    pub(crate) error: Option<TxError>,
    settle: Box<dyn FnOnce(TxResult<()>) + Send>,
}

impl Outcome {
    /// Delivers the final result. A failed job always reports its own
    /// error; a successful one reports the transaction outcome.
    pub(crate) fn settle(self, tx_result: TxResult<()>) {
        (self.settle)(tx_result)
    }
}

pub(crate) trait Unit: Send {
    fn run(self: Box<Self>, ctx: &mut TxContext) -> Outcome;

    /// Fails the request without running it
    fn reject(self: Box<Self>, err: TxError);
}

struct Task<F, T> {
    work: F,
    sender: oneshot::Sender<TxResult<T>>,
}

impl<F, T> Unit for Task<F, T>
where
    F: FnOnce(&mut TxContext) -> TxResult<T> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>, ctx: &mut TxContext) -> Outcome {
        let Task { work, sender } = *self;
        match work(ctx) {
            Ok(value) => Outcome {
                error: None,
                settle: Box::new(move |tx_result: TxResult<()>| {
                    let _ = sender.send(tx_result.map(|_| value));
                }),
            },
            Err(err) => Outcome {
                error: Some(err.clone()),
                settle: Box::new(move |_| {
                    let _ = sender.send(Err(err));
                }),
            },
        }
    }

    fn reject(self: Box<Self>, err: TxError) {
        let _ = self.sender.send(Err(err));
    }
}

/// A scoped unit of work waiting for a transaction.
pub(crate) struct Job {
    pub(crate) scope: TxScope,
    pub(crate) unit: Box<dyn Unit>,
}

impl Job {
    pub(crate) fn new<F, T>(scope: TxScope, work: F) -> (Job, Request<T>)
    where
        F: FnOnce(&mut TxContext) -> TxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let job = Job {
            scope,
            unit: Box::new(Task { work, sender }),
        };
        (job, Request::new(receiver))
    }

    pub(crate) fn reject(self, err: TxError) {
        self.unit.reject(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejected_job_fails_request() {
        let (job, request) = Job::new(TxScope::read("t1"), |_ctx| Ok(1u32));
        job.reject(TxError::invalid_operation("closed"));
        assert_eq!(request.await, Err(TxError::invalid_operation("closed")));
    }

    #[tokio::test]
    async fn test_dropped_job_reports_dropped() {
        let (job, request) = Job::new(TxScope::read("t1"), |_ctx| Ok(()));
        drop(job);
        assert_eq!(request.await, Err(TxError::Dropped));
    }
}
