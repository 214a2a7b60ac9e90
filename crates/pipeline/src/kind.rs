use std::fmt;

use corelib::GpuContext;

/// Type-specific half of a factory: how a builder maps to a cache key, how
/// its source is decoded on the worker thread and how the decoded data
/// becomes GPU state on the rendering thread.
pub trait ResourceKind: Send + Sync + 'static {
    /// Factory name used in logs.
    const FACTORY: &'static str;

    /// Keep decoded CPU data after materialization (e.g. meshes for
    /// collision). Pixel data is usually not worth keeping.
    const RETAIN_DATA: bool = true;

    type Builder: fmt::Debug + PartialEq + Send + Sync + 'static;
    type Data: Send + Sync + 'static;
    type Payload: Clone + fmt::Debug + Send + Sync + 'static;

    /// `None` when the builder names no usable source.
    fn cache_key(&self, builder: &Self::Builder) -> Option<String>;

    /// CPU-only work: file I/O and format decoding.
    fn decode(&self, name: &str, builder: &Self::Builder) -> anyhow::Result<Self::Data>;

    /// GPU work on the rendering thread.
    fn materialize(
        &self,
        name: &str,
        data: &Self::Data,
        builder: &Self::Builder,
        gpu: &mut dyn GpuContext,
    ) -> anyhow::Result<Self::Payload>;

    /// Tear down a payload produced by [`ResourceKind::materialize`].
    fn release(&self, payload: Self::Payload, gpu: &mut dyn GpuContext);
}
