//! Units of work the dispatcher routes to processors.

use corelib::{GpuContext, PhaseKind};

/// Outcome of one materialize attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Done,
    /// Not ready yet; re-queue for a later drain.
    Pending,
}

/// CPU-side work run on the decode worker.
pub trait DecodeStep: Send {
    fn label(&self) -> &str;
    fn run_decode(self: Box<Self>);
}

/// GPU-side work run by the frame loop.
pub trait MaterializeStep: Send {
    fn label(&self) -> &str;
    fn run_materialize(&mut self, gpu: &mut dyn GpuContext) -> Progress;
}

pub enum Phase {
    Decode(Box<dyn DecodeStep>),
    Materialize(Box<dyn MaterializeStep>),
}

impl Phase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Decode(_) => PhaseKind::Decode,
            Phase::Materialize(_) => PhaseKind::Materialize,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Phase::Decode(step) => step.label(),
            Phase::Materialize(step) => step.label(),
        }
    }

    /// Wrap a closure as a decode step.
    pub fn decode_fn<F>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Phase::Decode(Box::new(FnDecode {
            label: label.into(),
            f,
        }))
    }

    /// Wrap a closure as a one-shot materialize step.
    pub fn materialize_fn<F>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(&mut dyn GpuContext) + Send + 'static,
    {
        Phase::Materialize(Box::new(FnMaterialize {
            label: label.into(),
            f: Some(f),
        }))
    }
}

struct FnDecode<F> {
    label: String,
    f: F,
}

impl<F: FnOnce() + Send> DecodeStep for FnDecode<F> {
    fn label(&self) -> &str {
        &self.label
    }

    fn run_decode(self: Box<Self>) {
        let this = *self;
        (this.f)()
    }
}

struct FnMaterialize<F> {
    label: String,
    f: Option<F>,
}

impl<F: FnOnce(&mut dyn GpuContext) + Send> MaterializeStep for FnMaterialize<F> {
    fn label(&self) -> &str {
        &self.label
    }

    fn run_materialize(&mut self, gpu: &mut dyn GpuContext) -> Progress {
        if let Some(f) = self.f.take() {
            f(gpu);
        }
        Progress::Done
    }
}
