//! The resource object an asset is loaded into.
//!
//! Flags only move forward (`Loading -> DataLoaded -> Ready`) except on the
//! failure paths, which force both flags back to false. Only the owning
//! load task touches them, hence the crate-private setters.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::kind::ResourceKind;

/// Shared handle to a resource. The factory cache only holds a weak
/// reference, so dropping every handle lets the entry be reclaimed.
pub type Handle<K> = Arc<Resource<K>>;

/// Load state machine.
///
/// `Loading -> DataLoaded -> Ready -> Released`, with `Failed` reachable
/// from the first two.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    /// Waiting for, or running, the decode phase.
    Loading,
    /// Decoded on the CPU, waiting for the materialize phase.
    DataLoaded,
    /// Materialized and usable by render code.
    Ready,
    /// Decode or materialize failed, or the data never arrived.
    Failed,
    /// GPU payload handed back through an explicit delete.
    Released,
}

pub struct Resource<K: ResourceKind> {
    name: String,
    builder: Arc<K::Builder>,
    data_loaded: AtomicBool,
    fully_loaded: AtomicBool,
    failed: AtomicBool,
    released: AtomicBool,
    data: RwLock<Option<Arc<K::Data>>>,
    payload: RwLock<Option<K::Payload>>,
}

impl<K: ResourceKind> Resource<K> {
    pub(crate) fn new(name: String, builder: K::Builder) -> Self {
        Self {
            name,
            builder: Arc::new(builder),
            data_loaded: AtomicBool::new(false),
            fully_loaded: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            data: RwLock::new(None),
            payload: RwLock::new(None),
        }
    }

    /// Cache key this resource was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters of the request that created this object.
    pub fn builder(&self) -> &K::Builder {
        &self.builder
    }

    /// `true` once the GPU payload exists. Render code polls this each frame.
    pub fn is_loaded(&self) -> bool {
        self.fully_loaded.load(Ordering::Acquire)
    }

    pub fn is_data_loaded(&self) -> bool {
        self.data_loaded.load(Ordering::Acquire)
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn status(&self) -> LoadStatus {
        if self.has_failed() {
            LoadStatus::Failed
        } else if self.released.load(Ordering::Acquire) {
            LoadStatus::Released
        } else if self.is_loaded() {
            LoadStatus::Ready
        } else if self.is_data_loaded() {
            LoadStatus::DataLoaded
        } else {
            LoadStatus::Loading
        }
    }

    /// GPU payload, once loaded.
    pub fn payload(&self) -> Option<K::Payload> {
        if !self.is_loaded() {
            return None;
        }
        self.payload.read().clone()
    }

    /// Decoded CPU data, while it is retained.
    pub fn data(&self) -> Option<Arc<K::Data>> {
        self.data.read().clone()
    }

    /// Store decoded data. Refused once the resource has been given up on.
    pub(crate) fn finish_decode(&self, data: K::Data) -> bool {
        // The data lock serializes this against `fail`.
        let mut slot = self.data.write();
        if self.has_failed() {
            return false;
        }
        *slot = Some(Arc::new(data));
        self.data_loaded.store(true, Ordering::Release);
        true
    }

    pub(crate) fn finish_materialize(&self, payload: K::Payload) {
        debug_assert!(self.is_data_loaded(), "materialized before decode finished");
        *self.payload.write() = Some(payload);
        if !K::RETAIN_DATA {
            *self.data.write() = None;
        }
        self.fully_loaded.store(true, Ordering::Release);
    }

    /// Force both flags false. `fully_loaded` drops first so no reader can
    /// see it set without `data_loaded`.
    pub(crate) fn fail(&self) {
        let mut slot = self.data.write();
        self.failed.store(true, Ordering::Release);
        self.fully_loaded.store(false, Ordering::Release);
        self.data_loaded.store(false, Ordering::Release);
        *slot = None;
    }

    /// Detach the payload for release on the GPU thread.
    pub(crate) fn take_payload(&self) -> Option<K::Payload> {
        if !self.is_loaded() {
            return None;
        }
        self.fully_loaded.store(false, Ordering::Release);
        self.released.store(true, Ordering::Release);
        *self.data.write() = None;
        self.payload.write().take()
    }
}

impl<K: ResourceKind> fmt::Debug for Resource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("factory", &K::FACTORY)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::GpuContext;

    struct Dummy;

    impl ResourceKind for Dummy {
        const FACTORY: &'static str = "dummy";
        const RETAIN_DATA: bool = false;
        type Builder = ();
        type Data = u32;
        type Payload = u64;

        fn cache_key(&self, _: &()) -> Option<String> {
            Some("dummy".into())
        }
        fn decode(&self, _: &str, _: &()) -> anyhow::Result<u32> {
            Ok(1)
        }
        fn materialize(&self, _: &str, d: &u32, _: &(), _: &mut dyn GpuContext) -> anyhow::Result<u64> {
            Ok(*d as u64)
        }
        fn release(&self, _: u64, _: &mut dyn GpuContext) {}
    }

    #[test]
    fn status_follows_flags() {
        let res = Resource::<Dummy>::new("a".into(), ());
        assert_eq!(res.status(), LoadStatus::Loading);
        assert!(res.payload().is_none());

        assert!(res.finish_decode(7));
        assert_eq!(res.status(), LoadStatus::DataLoaded);
        assert_eq!(res.data().as_deref(), Some(&7));

        res.finish_materialize(70);
        assert_eq!(res.status(), LoadStatus::Ready);
        assert_eq!(res.payload(), Some(70));
        // RETAIN_DATA = false drops the CPU copy.
        assert!(res.data().is_none());

        assert_eq!(res.take_payload(), Some(70));
        assert_eq!(res.status(), LoadStatus::Released);
        assert!(!res.is_loaded());
        assert_eq!(res.take_payload(), None);
    }

    #[test]
    fn failure_clears_both_flags_and_refuses_late_data() {
        let res = Resource::<Dummy>::new("b".into(), ());
        assert!(res.finish_decode(1));
        res.fail();
        assert!(!res.is_loaded());
        assert!(!res.is_data_loaded());
        assert_eq!(res.status(), LoadStatus::Failed);

        assert!(!res.finish_decode(2));
        assert!(!res.is_data_loaded());
    }
}
