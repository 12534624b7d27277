//! Worker pool that runs pipeline events off the watch thread.
//!
//! Each worker owns one queue and events are routed by a hash of their path,
//! so every event for a given path lands on the same worker and runs in
//! arrival order. Runs for different paths may proceed in parallel.

use crate::error::{DocketError, Result};
use crate::pipeline::Pipeline;
use crate::watcher::WatchEvent;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

const QUEUE_DEPTH: usize = 256;

pub struct WorkerPool {
    queues: Vec<SyncSender<WatchEvent>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(workers: usize, pipeline: Arc<Pipeline>) -> Result<Self> {
        let workers = workers.max(1);
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
            let pipeline = Arc::clone(&pipeline);
            let handle = thread::Builder::new()
                .name(format!("docket-worker-{id}"))
                .spawn(move || run_worker(id, pipeline, rx))?;
            queues.push(tx);
            handles.push(handle);
        }
        debug!(workers, "Started worker pool");

        Ok(Self { queues, handles })
    }

    /// Queue `event` on the worker that owns its path. Blocks while that
    /// worker's queue is full.
    pub fn submit(&self, event: WatchEvent) -> Result<()> {
        let idx = route(&event.path, self.queues.len());
        self.queues[idx]
            .send(event)
            .map_err(|_| DocketError::InvalidState(format!("worker {idx} has exited")))
    }

    /// Close every queue and wait for the workers to drain what was already
    /// queued.
    pub fn shutdown(self) {
        let WorkerPool { queues, handles } = self;
        drop(queues);
        for handle in handles {
            if handle.join().is_err() {
                error!("Worker thread panicked during shutdown");
            }
        }
        debug!("Worker pool stopped");
    }
}

fn route(path: &Path, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

fn run_worker(id: usize, pipeline: Arc<Pipeline>, rx: Receiver<WatchEvent>) {
    while let Ok(event) = rx.recv() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.handle(&event)));
        if outcome.is_err() {
            error!(worker = id, path = %event.path.display(), "Pipeline run panicked");
            pipeline.events().record(format!(
                "Error processing {}: pipeline run aborted",
                event.path.display()
            ));
        }
    }
    debug!(worker = id, "Worker queue closed");
}
