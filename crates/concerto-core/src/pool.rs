//! Bounded worker pool with typed, timeout-aware join handles.
//!
//! A fixed number of threads pull boxed jobs off a shared channel. Each
//! `submit` returns a `TaskHandle<T>` that yields the job's value, or a
//! `JoinError` if the job panicked, was dropped by a shut-down pool, or did
//! not finish within the caller's timeout.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why a submitted job produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("task did not finish within {0:?}")]
    Timeout(Duration),

    #[error("task panicked: {0}")]
    Panicked(String),

    /// The pool shut down before the job ran.
    #[error("worker pool is shut down")]
    Closed,
}

/// Receives the result of one submitted job.
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, String>>,
}

impl<T> TaskHandle<T> {
    /// Block until the job finishes or `timeout` elapses.
    ///
    /// On timeout the job keeps running; its result is discarded.
    pub fn join_timeout(self, timeout: Duration) -> Result<T, JoinError> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(JoinError::Panicked(message)),
            Err(RecvTimeoutError::Timeout) => Err(JoinError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(JoinError::Closed),
        }
    }

    /// Block until the job finishes.
    pub fn join(self) -> Result<T, JoinError> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(JoinError::Panicked(message)),
            Err(_) => Err(JoinError::Closed),
        }
    }
}

/// A fixed-size pool of named worker threads.
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) named `<name>-<n>`.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size.max(1));
        for n in 0..size.max(1) {
            let rx = Arc::clone(&rx);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, n))
                .spawn(move || worker_loop(rx));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(pool = %name, worker = n, error = %e, "failed to spawn worker thread"),
            }
        }
        debug!(pool = %name, workers = workers.len(), "worker pool started");

        Self {
            name,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue `f` and return a handle to its result.
    ///
    /// Panics inside `f` are caught and reported as `JoinError::Panicked`.
    /// Submitting to a shut-down pool yields a handle that reports `Closed`.
    pub fn submit<T, F>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
            // The caller may have stopped waiting; that is fine.
            let _ = tx.send(outcome);
        });

        let sender = self.sender.lock().expect("worker pool sender lock poisoned");
        if let Some(sender) = sender.as_ref() {
            if sender.send(job).is_err() {
                debug!(pool = %self.name, "job dropped: all workers have exited");
            }
        }
        TaskHandle { rx }
    }

    /// Stop accepting jobs, let queued jobs drain, and join the workers.
    ///
    /// Idempotent. Safe to call from one of the pool's own workers, which is
    /// simply not joined.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .expect("worker pool sender lock poisoned")
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .expect("worker pool handle lock poisoned")
            .drain(..)
            .collect();
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!(pool = %self.name, "worker thread panicked outside a job");
            }
        }
        debug!(pool = %self.name, "worker pool stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .expect("worker pool sender lock poisoned")
            .is_none()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `f` on a dedicated thread named `name`, outside any pool.
///
/// Same handle semantics as [`WorkerPool::submit`]. A thread that cannot be
/// spawned yields a handle that reports `Closed`.
pub fn spawn_task<T, F>(name: impl Into<String>, f: F) -> TaskHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let name = name.into();
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
        let _ = tx.send(outcome);
    });
    if let Err(e) = spawned {
        error!(thread = %name, error = %e, "failed to spawn task thread");
    }
    TaskHandle { rx }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let guard = match rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

/// Render a caught panic payload as text.
pub fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
