//! Bounded-concurrency task runner with cancel-on-first-error.
//!
//! ```text
//!   producer ──► queue (cap = width) ──► worker 1 ─┐
//!                                    ├─► worker 2 ─┼─► results
//!                                    └─► worker N ─┘
//!   first error ──► cancel token ──► producer stops feeding,
//!                                    idle workers exit,
//!                                    running tasks finish
//! ```

use std::time::Duration;

use futures::future::{join, join_all};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;
use crate::executor::CommandExecutor;
use crate::task::Task;

/// Result of a run: which tasks completed and the first error, if any.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Queue indices of tasks that finished successfully, in completion order
    pub completed: Vec<usize>,
    pub error: Option<ExecError>,
}

impl RunOutcome {
    pub fn into_result(self) -> Result<(), ExecError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRunner {
    tasks: Vec<Task>,
    threads: usize,
    dry_run: bool,
    timeout: Option<Duration>,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            threads: 1,
            dry_run: false,
            timeout: None,
        }
    }

    /// Maximum number of tasks running at once. Zero is treated as one.
    pub fn set_threads(&mut self, threads: usize) {
        self.threads = threads.max(1);
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Deadline applied to every task; an elapsed deadline counts as a failure.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn add(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Add `task` unless one with the same command line is already queued.
    pub fn add_unique(&mut self, task: Task) -> bool {
        if self.contains(&task) {
            tracing::trace!(cmd = %task, "skipping duplicate task");
            return false;
        }
        self.tasks.push(task);
        true
    }

    pub fn contains(&self, task: &Task) -> bool {
        self.tasks.iter().any(|t| t == task)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task and return the first error.
    pub async fn run<E: CommandExecutor>(&self, executor: &E) -> Result<(), ExecError> {
        self.run_tracked(executor).await.into_result()
    }

    /// Run every task, reporting which ones completed.
    ///
    /// Once a task fails no further task is started. Tasks already running
    /// are allowed to finish.
    pub async fn run_tracked<E: CommandExecutor>(&self, executor: &E) -> RunOutcome {
        if self.tasks.is_empty() {
            return RunOutcome::default();
        }

        let width = self.threads.min(self.tasks.len());
        tracing::debug!(threads = width, tasks = self.tasks.len(), "acquired parallelism");

        let token = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::channel::<usize>(width);
        let queue_rx = Mutex::new(queue_rx);
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        let producer = {
            let token = &token;
            async move {
                for index in 0..self.tasks.len() {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        sent = queue_tx.send(index) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                // queue_tx dropped here; idle workers see the queue close
            }
        };

        let workers = (0..width).map(|worker| {
            let token = &token;
            let queue_rx = &queue_rx;
            let result_tx = result_tx.clone();
            async move {
                loop {
                    if token.is_cancelled() {
                        break;
                    }
                    let next = queue_rx.lock().await.recv().await;
                    let Some(index) = next else { break };
                    if token.is_cancelled() {
                        break;
                    }

                    let result = self.execute(&self.tasks[index], executor).await;
                    if let Err(e) = &result {
                        tracing::debug!(worker, error = %e, "task failed; cancelling runner");
                        token.cancel();
                    }
                    // The receiver outlives every worker
                    let _ = result_tx.send((index, result));
                }
            }
        }).collect::<Vec<_>>();
        drop(result_tx);

        join(producer, join_all(workers)).await;

        let mut outcome = RunOutcome::default();
        while let Ok((index, result)) = result_rx.try_recv() {
            match result {
                Ok(()) => outcome.completed.push(index),
                Err(e) => {
                    if outcome.error.is_none() {
                        outcome.error = Some(e);
                    } else {
                        tracing::debug!(error = %e, "additional task failure");
                    }
                }
            }
        }
        outcome
    }

    async fn execute<E: CommandExecutor>(&self, task: &Task, executor: &E) -> Result<(), ExecError> {
        if self.dry_run {
            tracing::info!(cmd = %task, "DRY-RUN");
            return Ok(());
        }

        match self.timeout {
            Some(after) => tokio::time::timeout(after, task.execute(executor))
                .await
                .map_err(|_| ExecError::TimedOut {
                    command: task.to_string(),
                    after,
                })?,
            None => task.execute(executor).await,
        }
    }
}
