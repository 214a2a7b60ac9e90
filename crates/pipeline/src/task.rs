//! The two-phase load task and the release step used by explicit deletes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use corelib::GpuContext;

use crate::factory::{Counters, Factory, FactoryShared};
use crate::kind::ResourceKind;
use crate::object::Handle;
use crate::phase::{DecodeStep, MaterializeStep, Phase, Progress};
use crate::processor::panic_message;

/// Loads one resource: decode on the worker, then materialize on the
/// rendering thread. The same task object carries both phases, so its
/// materialize phase is only ever submitted after its decode finished.
///
/// A materialize phase that runs before the data exists reports itself
/// pending and is retried on later frames until a deadline, counted from
/// its first attempt. Past the deadline the resource is marked failed.
pub struct LoadTask<K: ResourceKind> {
    factory: Arc<FactoryShared<K>>,
    resource: Handle<K>,
    label: String,
    deadline: Option<Instant>,
}

impl<K: ResourceKind> LoadTask<K> {
    /// Task for an existing resource of `factory`. Normally built by
    /// [`Factory::request`].
    pub fn new(factory: &Factory<K>, resource: Handle<K>) -> Self {
        Self::from_shared(Arc::clone(factory.shared()), resource)
    }

    pub(crate) fn from_shared(factory: Arc<FactoryShared<K>>, resource: Handle<K>) -> Self {
        let label = format!("{} '{}'", K::FACTORY, resource.name());
        Self {
            factory,
            resource,
            label,
            deadline: None,
        }
    }

    pub fn resource(&self) -> &Handle<K> {
        &self.resource
    }

    pub fn into_decode_phase(self) -> Phase {
        Phase::Decode(Box::new(self))
    }

    pub fn into_materialize_phase(self) -> Phase {
        Phase::Materialize(Box::new(self))
    }

    fn fail(&self) {
        self.resource.fail();
        Counters::bump(&self.factory.counters.failed);
    }

    /// Waiting on data: pending until the deadline, then give up.
    fn wait_for_data(&mut self) -> Progress {
        let now = Instant::now();
        let deadline = *self.deadline.get_or_insert(now + self.factory.timeout);
        if now < deadline {
            return Progress::Pending;
        }
        log::error!(
            "{} never finished decoding within {:?}; giving up",
            self.label,
            self.factory.timeout
        );
        self.fail();
        Progress::Done
    }
}

impl<K: ResourceKind> DecodeStep for LoadTask<K> {
    fn label(&self) -> &str {
        &self.label
    }

    fn run_decode(self: Box<Self>) {
        if self.resource.has_failed() {
            log::debug!("{} was abandoned before decoding", self.label);
            return;
        }

        let kind = &self.factory.kind;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            kind.decode(self.resource.name(), self.resource.builder())
        }));
        let data = match outcome {
            Ok(Ok(data)) => data,
            Ok(Err(err)) => {
                log::error!("Failed to decode {}: {:#}", self.label, err);
                self.fail();
                return;
            }
            Err(payload) => {
                log::error!("Decoder for {} panicked: {}", self.label, panic_message(&*payload));
                self.fail();
                return;
            }
        };

        if !self.resource.finish_decode(data) {
            log::warn!("{} finished decoding after it was abandoned", self.label);
            return;
        }
        Counters::bump(&self.factory.counters.decoded);
        log::trace!("{} decoded", self.label);

        // Only a weak reference stays on this thread once the phase is handed off.
        let factory = Arc::clone(&self.factory);
        let resource = Arc::downgrade(&self.resource);
        if let Err(err) = factory.dispatcher.forward(Phase::Materialize(self)) {
            log::error!("{} could not be queued for upload: {}", K::FACTORY, err);
            if let Some(resource) = resource.upgrade() {
                resource.fail();
            }
            Counters::bump(&factory.counters.failed);
            factory.dispatcher.report_fatal(err);
        }
    }
}

impl<K: ResourceKind> MaterializeStep for LoadTask<K> {
    fn label(&self) -> &str {
        &self.label
    }

    fn run_materialize(&mut self, gpu: &mut dyn GpuContext) -> Progress {
        if self.resource.has_failed() {
            return Progress::Done;
        }
        if self.resource.is_loaded() {
            log::debug!("{} already materialized", self.label);
            return Progress::Done;
        }
        if !self.resource.is_data_loaded() {
            return self.wait_for_data();
        }
        let Some(data) = self.resource.data() else {
            log::error!("{} lost its decoded data before upload", self.label);
            self.fail();
            return Progress::Done;
        };

        let kind = &self.factory.kind;
        let resource = &self.resource;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            kind.materialize(resource.name(), &data, resource.builder(), gpu)
        }));
        match outcome {
            Ok(Ok(payload)) => {
                resource.finish_materialize(payload);
                Counters::bump(&self.factory.counters.materialized);
                log::debug!("{} ready", self.label);
            }
            Ok(Err(err)) => {
                log::error!("Failed to materialize {}: {:#}", self.label, err);
                self.fail();
            }
            Err(payload) => {
                log::error!("Materializing {} panicked: {}", self.label, panic_message(&*payload));
                self.fail();
            }
        }
        Progress::Done
    }
}

/// Hands a detached payload back to the GPU context.
pub(crate) struct ReleaseTask<K: ResourceKind> {
    factory: Arc<FactoryShared<K>>,
    label: String,
    payload: Option<K::Payload>,
}

impl<K: ResourceKind> ReleaseTask<K> {
    pub(crate) fn new(factory: Arc<FactoryShared<K>>, name: String, payload: K::Payload) -> Self {
        Self {
            factory,
            label: format!("release {} '{}'", K::FACTORY, name),
            payload: Some(payload),
        }
    }
}

impl<K: ResourceKind> MaterializeStep for ReleaseTask<K> {
    fn label(&self) -> &str {
        &self.label
    }

    fn run_materialize(&mut self, gpu: &mut dyn GpuContext) -> Progress {
        if let Some(payload) = self.payload.take() {
            log::debug!("{}: {:?}", self.label, payload);
            self.factory.kind.release(payload, gpu);
            Counters::bump(&self.factory.counters.released);
        }
        Progress::Done
    }
}
