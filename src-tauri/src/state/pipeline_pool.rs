//! Bounded worker pool for the closed-chunk pipeline (spec.md §4.9, §5).
//!
//! The chunker hands off one job per closed chunk. A fixed pool of
//! `max(2, cpus-1)` OS threads (cheap `cpal`/native-ML calls are not
//! `Send`-friendly across an async runtime, matching `recording.rs`'s use
//! of plain threads) drains a bounded queue of capacity 4. When the queue
//! is full the submission is refused immediately rather than blocking the
//! chunker thread — the caller demotes that chunk to `status=error,
//! error="backpressure"` and recording continues (spec.md §4.9 step 1,
//! §7: no single chunk failure kills the session).

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;

const QUEUE_CAPACITY: usize = 4;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool feeding the closed-chunk pipeline.
///
/// One `PipelinePool` is shared across all recording sessions in the
/// process; each chunk is processed by exactly one worker from the point
/// it is submitted (spec.md §5).
pub struct PipelinePool {
    sender: SyncSender<Job>,
}

impl PipelinePool {
    pub fn new() -> Self {
        Self::with_workers(worker_count())
    }

    fn with_workers(workers: usize) -> Self {
        let (sender, receiver) = sync_channel::<Job>(QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));

        for idx in 0..workers {
            let receiver: Arc<Mutex<Receiver<Job>>> = Arc::clone(&receiver);
            let name = format!("chunk-worker-{idx}");
            let spawned = thread::Builder::new().name(name.clone()).spawn(move || loop {
                let job = {
                    let rx = receiver.lock().unwrap_or_else(|e| e.into_inner());
                    rx.recv()
                };
                match job {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            });
            if let Err(e) = spawned {
                tracing::error!("Failed to spawn {}: {}", name, e);
            }
        }

        tracing::info!(
            "PipelinePool started: {} workers, queue capacity {}",
            workers,
            QUEUE_CAPACITY
        );

        Self { sender }
    }

    /// Submit a chunk-pipeline job. Returns the job back to the caller if
    /// the bounded queue is already full (backpressure) so the caller can
    /// mark that chunk as `error="backpressure"` instead of blocking.
    pub fn try_submit<F>(&self, job: F) -> Result<(), ()>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.sender.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("PipelinePool queue full, refusing chunk job (backpressure)");
                Err(())
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::error!("PipelinePool workers gone, refusing chunk job");
                Err(())
            }
        }
    }
}

impl Default for PipelinePool {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_count() -> usize {
    std::cmp::max(2, num_cpus::get().saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let pool = PipelinePool::with_workers(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.try_submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit within capacity");
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < 8 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn refuses_when_queue_is_full() {
        // One worker, blocked on a long job, so the queue (capacity 4)
        // fills up and the 5th try_submit is refused.
        let pool = PipelinePool::with_workers(1);
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        pool.try_submit(move || {
            let _ = release_rx.lock().unwrap().recv();
        })
        .expect("first job accepted");

        // Give the worker time to pick up the blocking job so subsequent
        // submissions queue up rather than being picked up immediately.
        std::thread::sleep(Duration::from_millis(50));

        let mut refused = false;
        for _ in 0..QUEUE_CAPACITY + 4 {
            if pool.try_submit(|| {}).is_err() {
                refused = true;
                break;
            }
        }

        let _ = release_tx.send(());
        assert!(refused, "expected queue to saturate and refuse a submission");
    }
}
