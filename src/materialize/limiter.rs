//! Bounded fan-out for materialization work.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of named worker threads draining a job queue.
///
/// Submitted jobs run on the first free worker; [`WorkerPool::finish`] closes
/// the queue and waits for every outstanding job. Jobs report failures
/// through an [`ErrorSlot`] rather than panicking.
pub(crate) struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` threads named `{name}-{i}`.
    pub(crate) fn new(name: &str, workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..workers.max(1))
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || worker_loop(receiver))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queues a job. Jobs run in submission order but complete in any order.
    pub(crate) fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            // Workers only exit once the queue closes, so this cannot fail.
            let _ = sender.send(Box::new(job));
        }
    }

    /// Closes the queue and waits for all workers to drain it.
    pub(crate) fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        // Hold the lock only for the pickup; execution runs unlocked.
        let job = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

/// Capacity-one error store: the first recorded error wins.
///
/// Later errors are dropped, matching the materialization contract that only
/// the earliest background failure is surfaced.
pub(crate) struct ErrorSlot<E> {
    slot: Mutex<Option<E>>,
}

impl<E> ErrorSlot<E> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Records `err` unless an earlier error is already held.
    pub(crate) fn record(&self, err: E) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Removes and returns the held error, if any.
    pub(crate) fn take(&self) -> Option<E> {
        self.slot.lock().unwrap().take()
    }
}
