//! Queue-draining processors.
//!
//! Both built-ins share one contract; they differ in where `drain` runs and
//! what bounds it: the decode processor drains on its own thread with no
//! bound, the materialize processor drains on the frame loop for a slice of
//! wall-clock time.

mod decode;
mod materialize;

pub use decode::DecodeProcessor;
pub use materialize::MaterializeProcessor;

use std::any::Any;

use corelib::{GpuContext, PhaseKind, PipelineResult};

use crate::phase::Phase;

pub trait Processor: Send + Sync {
    /// Unique name within a dispatcher.
    fn name(&self) -> &str;

    /// Which phases this processor takes.
    fn accepts(&self, kind: PhaseKind) -> bool;

    /// Start any threads or state. Called once by the dispatcher on
    /// registration.
    fn init(&self) -> PipelineResult<()>;

    fn is_initialized(&self) -> bool;

    fn enqueue(&self, phase: Phase);

    /// Per-frame hook, called from the rendering thread.
    fn update(&self, gpu: &mut dyn GpuContext);

    /// Run everything still queued, ignoring any budget, then stop.
    fn dispose(&self, gpu: &mut dyn GpuContext);

    /// Items waiting in the queue.
    fn pending(&self) -> usize;
}

/// Best-effort text from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
