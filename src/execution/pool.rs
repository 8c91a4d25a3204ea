//! Bounded pool of worker contexts.
//!
//! Each context is one OS thread fed by its own channel. Jobs are handed out
//! round-robin, and every ask gets a private reply channel, so a reply can
//! only ever reach the caller that asked for it.

use crate::core::error::{ProcessingError, ProcessingResult};
use crate::core::types::{ProcessingOptions, SourceItem};
use crate::execution::worker::{self, Envelope, WorkerJob, WorkerReply};
use crate::resources::{CleanupId, ResourceMonitor};
use crate::transform;
use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Hard upper bound on worker contexts.
pub const MAX_POOL_SIZE: usize = 4;

/// Somewhere single-image jobs can be sent.
pub trait ExecutionPool: Send + Sync {
    /// Run one job and wait for its reply.
    fn dispatch(&self, job: WorkerJob) -> ProcessingResult<WorkerReply>;

    /// Number of execution contexts.
    fn size(&self) -> usize;

    /// Tear down every context. Outstanding asks fail with a dispatch error.
    fn terminate(&self);

    /// Whether [`terminate`](ExecutionPool::terminate) has been called.
    fn is_terminated(&self) -> bool;
}

/// Number of contexts for a pool capped at `cap`.
pub fn pool_size(cap: usize) -> usize {
    let available = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    available.min(cap.clamp(1, MAX_POOL_SIZE))
}

/// Thread-backed pool.
pub struct WorkerPool {
    senders: RwLock<Vec<Sender<Envelope>>>,
    size: usize,
    cursor: AtomicUsize,
    terminated: AtomicBool,
    cleanup: Mutex<Option<CleanupId>>,
}

impl WorkerPool {
    /// Spawn a pool of [`pool_size`]`(cap)` contexts.
    ///
    /// The pool registers a cleanup callback with `monitor` that terminates it.
    pub fn new(cap: usize, monitor: &ResourceMonitor) -> std::io::Result<Arc<Self>> {
        let size = pool_size(cap);
        let mut senders = Vec::with_capacity(size);

        for index in 0..size {
            let (tx, rx) = channel::unbounded::<Envelope>();
            thread::Builder::new()
                .name(format!("pixelsmith-worker-{}", index))
                .spawn(move || worker::worker_loop(index, rx))?;
            senders.push(tx);
        }

        let pool = Arc::new(Self {
            senders: RwLock::new(senders),
            size,
            cursor: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
            cleanup: Mutex::new(None),
        });

        let weak = Arc::downgrade(&pool);
        let id = monitor.register_cleanup(move || {
            if let Some(pool) = weak.upgrade() {
                pool.terminate();
            }
            Ok(())
        });
        *pool.cleanup.lock() = Some(id);

        log::info!("Worker pool started with {} context(s)", size);
        Ok(pool)
    }

    /// The monitor callback that terminates this pool.
    pub fn cleanup_id(&self) -> Option<CleanupId> {
        *self.cleanup.lock()
    }

    fn dispatch_error(worker: usize, reason: &str) -> ProcessingError {
        ProcessingError::PoolDispatch {
            worker,
            reason: reason.to_string(),
        }
    }
}

impl ExecutionPool for WorkerPool {
    fn dispatch(&self, job: WorkerJob) -> ProcessingResult<WorkerReply> {
        let (index, sender) = {
            let senders = self.senders.read();
            if senders.is_empty() {
                return Err(Self::dispatch_error(0, "pool has been terminated"));
            }
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % senders.len();
            (index, senders[index].clone())
        };

        let (reply_tx, reply_rx) = channel::bounded(1);
        sender
            .send((job, reply_tx))
            .map_err(|_| Self::dispatch_error(index, "context is gone"))?;
        drop(sender);

        reply_rx
            .recv()
            .map_err(|_| Self::dispatch_error(index, "context terminated before replying"))?
    }

    fn size(&self) -> usize {
        self.size
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the senders ends each worker loop after its current job.
        self.senders.write().clear();
        log::info!("Worker pool terminated");
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Runs every job on the calling thread.
#[derive(Debug, Default)]
pub struct InlinePool {
    terminated: AtomicBool,
}

impl InlinePool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionPool for InlinePool {
    fn dispatch(&self, job: WorkerJob) -> ProcessingResult<WorkerReply> {
        if self.is_terminated() {
            return Err(ProcessingError::PoolDispatch {
                worker: 0,
                reason: "pool has been terminated".to_string(),
            });
        }
        worker::run_guarded(0, &job)
    }

    fn size(&self) -> usize {
        1
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Result of running one item end to end.
#[derive(Debug, Clone)]
pub struct ItemOutput {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub duration: Duration,
}

/// Decode `item` and run it through the transforms `options` ask for.
///
/// Upscale, watermark and compression run on the calling thread; anything
/// else is resized and encoded by a pool context.
pub fn process_item(
    pool: &dyn ExecutionPool,
    item: &SourceItem,
    options: &ProcessingOptions,
) -> ProcessingResult<ItemOutput> {
    let start = Instant::now();
    let surface = on_caller(item, || transform::decode(item))?;

    let (bytes, width, height) = if options.requires_caller_context() {
        let encoded = on_caller(item, || transform::apply_pipeline(&surface, options))?;
        (encoded.bytes, encoded.width, encoded.height)
    } else {
        let reply = pool.dispatch(WorkerJob::new(surface, options))?;
        (reply.bytes, reply.width, reply.height)
    };

    Ok(ItemOutput {
        bytes,
        width,
        height,
        duration: start.elapsed(),
    })
}

/// Run caller-side work for `item`; a panic fails only that item.
fn on_caller<T>(item: &SourceItem, work: impl FnOnce() -> ProcessingResult<T>) -> ProcessingResult<T> {
    worker::catch_panic(work, |message| {
        ProcessingError::Context(format!("transform panicked on '{}': {}", item.name(), message))
    })
}
