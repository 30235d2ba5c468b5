//! Designated mutation context
//!
//! Every store mutation (upsert, delete, wipe) of every local store runs
//! on a single background task, one job at a time, in FIFO order.
//! Callers park on a oneshot until their job has finished.
//!
//! Jobs must only touch store state. Remote calls and session checks
//! happen before hopping onto the context.

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::error::AppError;

type Job = BoxFuture<'static, ()>;

/// Handle to the shared mutation context
///
/// Cloning yields another handle to the same executor task.
#[derive(Clone)]
pub struct MutationContext {
    jobs: mpsc::UnboundedSender<Job>,
}

impl MutationContext {
    /// Start the executor task
    ///
    /// Must be called from within a Tokio runtime. The task ends once
    /// every handle has been dropped.
    pub fn spawn() -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                job.await;
            }
            tracing::debug!("Mutation context stopped");
        });

        Self { jobs }
    }

    /// Run `work` on the mutation context and wait for its result
    pub async fn run<F, T>(&self, work: F) -> Result<T, AppError>
    where
        F: std::future::Future<Output = Result<T, AppError>> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = reply.send(work.await);
        });

        self.jobs
            .send(job)
            .map_err(|_| AppError::Store("mutation context is closed".to_string()))?;

        result
            .await
            .map_err(|_| AppError::Store("mutation context dropped the job".to_string()))?
    }
}
