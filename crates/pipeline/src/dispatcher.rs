//! Routes phases to processors.
//!
//! The dispatcher is an explicitly constructed object, shared by cloning.
//! Factories and in-flight tasks only keep a [`DispatchLink`], a weak
//! reference, so dropping the last `Dispatcher` tears the processors down
//! even while work is outstanding.
//!
//! Shutdown happens in two steps. Closing refuses new work from outside,
//! while phases forwarded by in-flight tasks are still routed so the drain
//! can finish them. Disposed refuses everything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use corelib::{GpuContext, PhaseKind, PipelineError, PipelineResult};
use parking_lot::{Mutex, RwLock};

use crate::config::PipelineConfig;
use crate::phase::Phase;
use crate::processor::{DecodeProcessor, MaterializeProcessor, Processor};

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    processors: RwLock<Vec<Arc<dyn Processor>>>,
    fatal: Mutex<Option<PipelineError>>,
    closing: AtomicBool,
    disposed: AtomicBool,
}

impl Dispatcher {
    /// Dispatcher with the two built-in processors, started.
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        Self::with_processors(vec![
            Arc::new(DecodeProcessor::new(config.worker_name.clone())) as Arc<dyn Processor>,
            Arc::new(MaterializeProcessor::new(
                config.frame_budget,
                config.stall_poll_interval,
            )),
        ])
    }

    /// Dispatcher over a custom processor list. Earlier entries win when
    /// several accept the same phase. Fails unless both phase kinds have a
    /// taker.
    pub fn with_processors(processors: Vec<Arc<dyn Processor>>) -> PipelineResult<Self> {
        for kind in [PhaseKind::Decode, PhaseKind::Materialize] {
            if !processors.iter().any(|p| p.accepts(kind)) {
                log::error!("No {} processor supplied", kind);
                return Err(PipelineError::MissingBuiltin(kind));
            }
        }

        let dispatcher = Self {
            inner: Arc::new(DispatcherInner {
                processors: RwLock::new(Vec::with_capacity(processors.len())),
                fatal: Mutex::new(None),
                closing: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        };
        for processor in processors {
            dispatcher.register(processor)?;
        }
        Ok(dispatcher)
    }

    /// Add a processor after the existing ones, initializing it if needed.
    pub fn register(&self, processor: Arc<dyn Processor>) -> PipelineResult<()> {
        let mut processors = self.inner.processors.write();
        if self.inner.closing.load(Ordering::Acquire) {
            return Err(PipelineError::Disposed);
        }
        if processors.iter().any(|p| p.name() == processor.name()) {
            return Err(PipelineError::DuplicateProcessor(processor.name().to_owned()));
        }
        if !processor.is_initialized() {
            processor.init()?;
        }
        log::debug!("Registered processor '{}'", processor.name());
        processors.push(processor);
        Ok(())
    }

    /// Remove a processor by name and dispose it. Refused when it is the
    /// last taker of a phase kind.
    pub fn deregister(
        &self,
        name: &str,
        gpu: &mut dyn GpuContext,
    ) -> PipelineResult<Option<Arc<dyn Processor>>> {
        let removed = {
            let mut processors = self.inner.processors.write();
            let Some(index) = processors.iter().position(|p| p.name() == name) else {
                return Ok(None);
            };
            for kind in [PhaseKind::Decode, PhaseKind::Materialize] {
                let takers = processors.iter().filter(|p| p.accepts(kind)).count();
                if takers == 1 && processors[index].accepts(kind) {
                    return Err(PipelineError::MissingBuiltin(kind));
                }
            }
            processors.remove(index)
        };

        removed.dispose(gpu);
        log::debug!("Deregistered processor '{}'", name);
        Ok(Some(removed))
    }

    pub fn submit(&self, phase: Phase) -> PipelineResult<()> {
        self.inner.submit(phase)
    }

    /// Per-frame pump. Runs the materialize drain on the calling thread.
    pub fn update(&self, gpu: &mut dyn GpuContext) {
        for processor in self.inner.snapshot() {
            processor.update(gpu);
        }
    }

    /// Drain every processor in registration order and stop the worker.
    /// Decode work finishing during the drain still reaches the
    /// materialize queue, which is drained after it.
    pub fn dispose(&self, gpu: &mut dyn GpuContext) {
        {
            // The write lock waits out submits that already passed the check.
            let _processors = self.inner.processors.write();
            if self.inner.closing.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        log::info!("Disposing resource pipeline ({} pending)", self.pending());
        for processor in self.inner.snapshot() {
            processor.dispose(gpu);
        }
        self.inner.disposed.store(true, Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// First fatal error recorded from a background context, if any.
    pub fn take_fatal(&self) -> Option<PipelineError> {
        self.inner.fatal.lock().take()
    }

    /// Items queued across all processors.
    pub fn pending(&self) -> usize {
        self.inner.snapshot().iter().map(|p| p.pending()).sum()
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.inner
            .processors
            .read()
            .iter()
            .map(|p| p.name().to_owned())
            .collect()
    }

    pub(crate) fn link(&self) -> DispatchLink {
        DispatchLink {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl DispatcherInner {
    /// Processors are cloned out so no lock is held while they run.
    fn snapshot(&self) -> Vec<Arc<dyn Processor>> {
        self.processors.read().clone()
    }

    /// New work. Refused once closing; the read lock is held through the
    /// enqueue so `dispose` cannot start draining in between.
    fn submit(&self, phase: Phase) -> PipelineResult<()> {
        let processors = self.processors.read_recursive();
        if self.closing.load(Ordering::Acquire) {
            return Err(PipelineError::Disposed);
        }
        Self::route(&processors, phase)
    }

    /// A later phase of work already accepted. Still routed while closing.
    fn forward(&self, phase: Phase) -> PipelineResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PipelineError::Disposed);
        }
        Self::route(&self.processors.read_recursive(), phase)
    }

    fn route(processors: &[Arc<dyn Processor>], phase: Phase) -> PipelineResult<()> {
        let kind = phase.kind();
        match processors.iter().find(|p| p.accepts(kind)) {
            Some(processor) => {
                processor.enqueue(phase);
                Ok(())
            }
            None => Err(PipelineError::NoProcessor(kind)),
        }
    }

    fn record_fatal(&self, err: PipelineError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        }
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        if !*self.disposed.get_mut() {
            let pending: usize = self.processors.get_mut().iter().map(|p| p.pending()).sum();
            if pending > 0 {
                log::warn!("Resource pipeline dropped without dispose; {} phase(s) abandoned", pending);
            }
        }
    }
}

/// Weak submit handle held by factories and load tasks.
#[derive(Clone)]
pub(crate) struct DispatchLink {
    inner: Weak<DispatcherInner>,
}

impl DispatchLink {
    pub(crate) fn submit(&self, phase: Phase) -> PipelineResult<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.submit(phase),
            None => Err(PipelineError::Disposed),
        }
    }

    /// Hand on the next phase of a task the dispatcher already accepted.
    pub(crate) fn forward(&self, phase: Phase) -> PipelineResult<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.forward(phase),
            None => Err(PipelineError::Disposed),
        }
    }

    /// Keep an error raised off the frame loop for `take_fatal`.
    pub(crate) fn report_fatal(&self, err: PipelineError) {
        log::error!("Resource pipeline fatal error: {}", err);
        if let Some(inner) = self.inner.upgrade() {
            inner.record_fatal(err);
        }
    }
}
