//! Per-kind resource factory with a weak, deduplicating cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use corelib::{PipelineError, PipelineResult};
use parking_lot::Mutex;

use crate::config::PipelineConfig;
use crate::dispatcher::{DispatchLink, Dispatcher};
use crate::kind::ResourceKind;
use crate::object::{Handle, Resource};
use crate::phase::Phase;
use crate::task::{LoadTask, ReleaseTask};

/// Counters since the factory was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FactoryStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub decoded: u64,
    pub materialized: u64,
    pub failed: u64,
    pub released: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    pub(crate) decoded: AtomicU64,
    pub(crate) materialized: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) released: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FactoryStats {
        FactoryStats {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            materialized: self.materialized.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

/// Smallest map size that triggers a sweep of dead entries.
const SWEEP_FLOOR: usize = 64;

/// Key to weak resource map. Dead entries are swept on insert once the map
/// has doubled since the last sweep, so its size tracks the live set.
struct Cache<K: ResourceKind> {
    entries: HashMap<String, Weak<Resource<K>>>,
    sweep_at: usize,
}

impl<K: ResourceKind> Cache<K> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            sweep_at: SWEEP_FLOOR,
        }
    }

    fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.sweep_at = (self.entries.len() * 2).max(SWEEP_FLOOR);
        before - self.entries.len()
    }

    fn insert(&mut self, key: String, resource: &Handle<K>) {
        if self.entries.len() >= self.sweep_at && !self.entries.contains_key(&key) {
            let swept = self.sweep();
            log::trace!("{} cache swept {} dead entries", K::FACTORY, swept);
        }
        self.entries.insert(key, Arc::downgrade(resource));
    }
}

/// State shared between a factory and its in-flight tasks.
pub(crate) struct FactoryShared<K: ResourceKind> {
    pub(crate) kind: K,
    cache: Mutex<Cache<K>>,
    pub(crate) counters: Counters,
    pub(crate) dispatcher: DispatchLink,
    pub(crate) timeout: Duration,
}

pub struct Factory<K: ResourceKind> {
    shared: Arc<FactoryShared<K>>,
}

impl<K: ResourceKind> Factory<K> {
    pub fn new(kind: K, dispatcher: &Dispatcher, config: &PipelineConfig) -> Self {
        Self {
            shared: Arc::new(FactoryShared {
                kind,
                cache: Mutex::new(Cache::new()),
                counters: Counters::default(),
                dispatcher: dispatcher.link(),
                timeout: config.materialize_timeout,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        K::FACTORY
    }

    pub fn kind(&self) -> &K {
        &self.shared.kind
    }

    pub(crate) fn shared(&self) -> &Arc<FactoryShared<K>> {
        &self.shared
    }

    /// Get the resource for `builder`, starting a load on a cache miss.
    ///
    /// Never blocks on loading: the handle comes back at once and render
    /// code polls [`Resource::is_loaded`]. A key already live in the cache
    /// returns the existing object, even when it is still loading and even
    /// when `builder` asks for different parameters (the first request's
    /// parameters stand). A failed entry counts as a miss.
    pub fn request(&self, builder: K::Builder) -> PipelineResult<Handle<K>> {
        let Some(key) = self.shared.kind.cache_key(&builder) else {
            log::warn!("{} request without a source: {:?}", K::FACTORY, builder);
            return Err(PipelineError::MissingLocator { factory: K::FACTORY });
        };
        Counters::bump(&self.shared.counters.requests);

        let resource = {
            let mut cache = self.shared.cache.lock();
            if let Some(existing) = cache.entries.get(&key).and_then(Weak::upgrade) {
                if !existing.has_failed() {
                    drop(cache);
                    Counters::bump(&self.shared.counters.cache_hits);
                    if *existing.builder() != builder {
                        log::warn!(
                            "{} '{}' already requested as {:?}; ignoring {:?}",
                            K::FACTORY,
                            key,
                            existing.builder(),
                            builder
                        );
                    }
                    return Ok(existing);
                }
                log::debug!("{} '{}' failed earlier, reloading", K::FACTORY, key);
            }

            let resource = Arc::new(Resource::new(key.clone(), builder));
            cache.insert(key, &resource);
            resource
        };

        let task = LoadTask::from_shared(Arc::clone(&self.shared), Arc::clone(&resource));
        if let Err(err) = self.shared.dispatcher.submit(task.into_decode_phase()) {
            log::error!("{} '{}' could not be queued: {}", K::FACTORY, resource.name(), err);
            resource.fail();
            Counters::bump(&self.shared.counters.failed);
            return Err(err);
        }
        log::debug!("{} '{}' queued for decode", K::FACTORY, resource.name());
        Ok(resource)
    }

    /// Live cached resource by key, without starting a load.
    pub fn get(&self, name: &str) -> Option<Handle<K>> {
        self.shared.cache.lock().entries.get(name).and_then(Weak::upgrade)
    }

    /// Release a loaded resource's GPU payload on the rendering thread and
    /// drop it from the cache. Other holders keep a handle that reports
    /// [`LoadStatus::Released`](crate::LoadStatus::Released).
    ///
    /// Returns `Ok(false)` when there was nothing loaded to release.
    pub fn delete(&self, handle: &Handle<K>) -> PipelineResult<bool> {
        let Some(payload) = handle.take_payload() else {
            log::debug!("{} '{}' not loaded; nothing to delete", K::FACTORY, handle.name());
            return Ok(false);
        };

        {
            let mut cache = self.shared.cache.lock();
            let same = cache
                .entries
                .get(handle.name())
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(handle)));
            if same {
                cache.entries.remove(handle.name());
            }
        }

        let release = ReleaseTask::new(Arc::clone(&self.shared), handle.name().to_owned(), payload);
        if let Err(err) = self.shared.dispatcher.submit(Phase::Materialize(Box::new(release))) {
            log::error!("{} '{}' release could not be queued: {}", K::FACTORY, handle.name(), err);
            return Err(err);
        }
        Ok(true)
    }

    /// Drop cache entries whose resources were reclaimed. Returns how many.
    /// [`request`](Self::request) also does this as the map grows.
    pub fn purge(&self) -> usize {
        self.shared.cache.lock().sweep()
    }

    /// Number of cache entries still alive.
    pub fn cached(&self) -> usize {
        self.shared
            .cache
            .lock()
            .entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Size of the cache map, counting entries not yet swept.
    pub fn entries(&self) -> usize {
        self.shared.cache.lock().entries.len()
    }

    pub fn stats(&self) -> FactoryStats {
        self.shared.counters.snapshot()
    }
}
