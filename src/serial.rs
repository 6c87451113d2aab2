//! Serial job executor: runs async jobs one at a time, in call order.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Job = BoxFuture<'static, ()>;

/// Why a serial job did not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerialJobError<E> {
    /// The job itself returned an error.
    #[error("{0}")]
    Job(E),

    #[error("Serial job panicked")]
    Panicked,

    /// The runtime shut down before the job ran.
    #[error("Serial executor stopped before the job completed")]
    Stopped,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    running: bool,
}

/// Executes jobs strictly one after another.
///
/// Jobs start in the order [`run`](Self::run) was called, and a job starts
/// only after the previous one has completed. A failing or panicking job
/// affects only its own caller. Cloning yields a handle to the same queue.
#[derive(Clone, Default)]
pub struct SerialJobExecutor {
    queue: Arc<Mutex<Queue>>,
}

impl std::fmt::Debug for SerialJobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = lock(&self.queue);
        f.debug_struct("SerialJobExecutor")
            .field("pending", &queue.jobs.len())
            .field("running", &queue.running)
            .finish()
    }
}

fn lock(queue: &Mutex<Queue>) -> MutexGuard<'_, Queue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SerialJobExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` and return a future for its result.
    ///
    /// The job is enqueued before this returns, so the order of `run` calls
    /// is the execution order even if the returned futures are awaited in a
    /// different order or not at all. Must be called within a tokio runtime.
    ///
    /// # Example
    /// ```rust
    /// use unai::serial::SerialJobExecutor;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let executor = SerialJobExecutor::new();
    /// let first = executor.run(|| async { Ok::<_, String>("saved draft") });
    /// let second = executor.run(|| async { Ok::<_, String>("saved final") });
    ///
    /// assert_eq!(first.await, Ok("saved draft"));
    /// assert_eq!(second.await, Ok("saved final"));
    /// # }
    /// ```
    pub fn run<F, Fut, T, E>(
        &self,
        job: F,
    ) -> impl Future<Output = Result<T, SerialJobError<E>>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let job = async move {
            let result = match AssertUnwindSafe(async move { job().await }).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(SerialJobError::Job(error)),
                Err(_) => {
                    warn!("Serial job panicked");
                    Err(SerialJobError::Panicked)
                }
            };
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        };
        self.enqueue(job.boxed());

        async move { rx.await.unwrap_or(Err(SerialJobError::Stopped)) }
    }

    /// Number of jobs waiting to start.
    pub fn pending(&self) -> usize {
        lock(&self.queue).jobs.len()
    }

    fn enqueue(&self, job: Job) {
        let start_worker = {
            let mut queue = lock(&self.queue);
            queue.jobs.push_back(job);
            !std::mem::replace(&mut queue.running, true)
        };

        if start_worker {
            debug!("Starting serial job worker");
            tokio::spawn(drain(self.queue.clone()));
        }
    }
}

async fn drain(queue: Arc<Mutex<Queue>>) {
    loop {
        let job = {
            let mut queue = lock(&queue);
            match queue.jobs.pop_front() {
                Some(job) => job,
                None => {
                    queue.running = false;
                    return;
                }
            }
        };
        job.await;
    }
}
