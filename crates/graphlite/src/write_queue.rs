//! Caller-side `WriteQueue` utility (spec §5), a pessimistic alternative
//! to [`crate::retry::with_retry`]'s optimistic backoff. Serializes
//! submitted operations through a single FIFO worker thread so callers who
//! would rather wait in line than race and retry can do that instead.
//!
//! Not part of the core: the core itself never spawns threads or blocks
//! internally (spec §5). This lives alongside it as ordinary ambient
//! tooling, ancillary to the core graph engine rather than part of its
//! write path.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::error::{GraphError, GraphResult};

type Job = Box<dyn FnOnce() + Send>;

/// Serializes write operations through a FIFO queue, executed by one
/// background worker thread: enqueued operations run in submission order,
/// each exactly once.
pub struct WriteQueue {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl WriteQueue {
    /// Start the background worker. The queue is unbounded; callers that
    /// need backpressure should rate-limit submission themselves.
    pub fn new() -> Self {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = mpsc::channel();
        let worker = thread::spawn(move || {
            for job in receiver {
                job();
            }
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Submit `op` and block until it has run, returning its result.
    /// Operations submitted by other threads before this call are
    /// guaranteed to run first; operations submitted after, run after.
    pub fn submit<T, F>(&self, op: F) -> GraphResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> GraphResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel::<GraphResult<T>>();
        let sender = self
            .sender
            .as_ref()
            .expect("WriteQueue worker is still running");

        sender
            .send(Box::new(move || {
                let _ = reply_tx.send(op());
            }))
            .map_err(|_| queue_shutdown_error())?;

        reply_rx.recv().map_err(|_| queue_shutdown_error())?
    }
}

fn queue_shutdown_error() -> GraphError {
    GraphError::Storage {
        operation: "write_queue: worker unavailable",
        source: rusqlite::Error::ExecuteReturnedResults,
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        // Dropping the sender closes the channel, which ends the worker's
        // `for job in receiver` loop; then join it so in-flight jobs
        // finish before the queue itself is gone.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn concurrent_submitters_each_get_their_own_result_exactly_once() {
        let queue = Arc::new(WriteQueue::new());
        let total = Arc::new(Mutex::new(0u64));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let queue = Arc::clone(&queue);
                let total = Arc::clone(&total);
                std::thread::spawn(move || {
                    let value = queue
                        .submit(move || Ok::<_, GraphError>(i))
                        .unwrap();
                    *total.lock().unwrap() += value;
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*total.lock().unwrap(), (0..20u64).sum::<u64>());
    }

    #[test]
    fn returns_the_operations_result() {
        let queue = WriteQueue::new();
        let value = queue.submit(|| Ok::<_, GraphError>(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn propagates_operation_errors() {
        let queue = WriteQueue::new();
        let err = queue
            .submit(|| Err::<(), _>(GraphError::EmptyMatch))
            .unwrap_err();
        assert!(matches!(err, GraphError::EmptyMatch));
    }

    #[test]
    fn serial_submissions_preserve_submission_order() {
        let queue = WriteQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let order = Arc::clone(&order);
            queue
                .submit(move || {
                    order.lock().unwrap().push(i);
                    Ok::<_, GraphError>(())
                })
                .unwrap();
        }
        assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }
}
