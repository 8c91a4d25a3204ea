//! Jobs that run inside an isolated worker context.
//!
//! A worker only resizes and encodes. Everything it needs travels inside the
//! job by value, and everything it produces comes back the same way.

use crate::core::error::{ProcessingError, ProcessingResult};
use crate::core::types::{ProcessingOptions, Surface, TargetFormat};
use crate::transform;
use crossbeam::channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};

/// Owned input for one worker job.
#[derive(Debug, Clone)]
pub struct WorkerJob {
    pub pixels: Surface,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub maintain_aspect_ratio: bool,
    pub target_format: TargetFormat,
    pub quality: f32,
}

/// Owned output of one worker job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReply {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A job plus the one-shot channel its reply goes to.
pub(crate) type Envelope = (WorkerJob, Sender<ProcessingResult<WorkerReply>>);

impl WorkerJob {
    /// Build a job from decoded pixels and the run's options.
    pub fn new(pixels: Surface, options: &ProcessingOptions) -> Self {
        Self {
            pixels,
            width: options.width,
            height: options.height,
            maintain_aspect_ratio: options.maintain_aspect_ratio,
            target_format: options.target_format,
            quality: options.quality,
        }
    }

    /// Resize and encode.
    pub fn run(&self) -> ProcessingResult<WorkerReply> {
        let encoded = transform::resize_and_encode(
            &self.pixels,
            self.width,
            self.height,
            self.maintain_aspect_ratio,
            self.target_format,
            self.quality,
        )?;

        Ok(WorkerReply {
            bytes: encoded.bytes,
            width: encoded.width,
            height: encoded.height,
        })
    }
}

/// Run `work`, mapping a panic message to an error with `on_panic`.
pub(crate) fn catch_panic<T>(
    work: impl FnOnce() -> ProcessingResult<T>,
    on_panic: impl FnOnce(String) -> ProcessingError,
) -> ProcessingResult<T> {
    panic::catch_unwind(AssertUnwindSafe(work))
        .unwrap_or_else(|payload| Err(on_panic(panic_message(payload.as_ref()))))
}

/// Run `job`, turning a panic into an error reply.
pub(crate) fn run_guarded(worker: usize, job: &WorkerJob) -> ProcessingResult<WorkerReply> {
    catch_panic(
        || job.run(),
        |message| ProcessingError::PoolDispatch {
            worker,
            reason: format!("worker panicked: {}", message),
        },
    )
}

/// Body of a worker thread: answer jobs until the sending side goes away.
pub(crate) fn worker_loop(index: usize, jobs: Receiver<Envelope>) {
    log::debug!("Worker {} started", index);

    for (job, reply) in jobs.iter() {
        let result = run_guarded(index, &job);
        if let Err(ref e) = result {
            log::debug!("Worker {} job failed: {}", index, e);
        }
        // The asker may have given up; nothing to do then.
        let _ = reply.send(result);
    }

    log::debug!("Worker {} exiting", index);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
