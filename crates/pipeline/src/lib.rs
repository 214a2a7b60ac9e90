//! Asynchronous two-phase resource loading.
//!
//! A [`Factory`] hands out a [`Handle`] immediately and queues a decode
//! phase. The decode worker does file I/O and parsing off the frame loop,
//! then queues a materialize phase, which the frame loop runs against the
//! [`GpuContext`](corelib::GpuContext) inside a per-frame time budget.
//! Render code polls [`Resource::is_loaded`].

pub mod config;
pub mod dispatcher;
pub mod factory;
pub mod kind;
pub mod kinds;
pub mod object;
pub mod phase;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod task;

pub use config::PipelineConfig;
pub use corelib::{PhaseKind, PipelineError, PipelineResult};
pub use dispatcher::Dispatcher;
pub use factory::{Factory, FactoryStats};
pub use kind::ResourceKind;
pub use kinds::model::{ModelBuilder, ModelData, Models};
pub use kinds::shader::{ShaderBuilder, Shaders};
pub use kinds::texture::{TextureBuilder, Textures};
pub use object::{Handle, LoadStatus, Resource};
pub use phase::{DecodeStep, MaterializeStep, Phase, Progress};
pub use pipeline::AssetPipeline;
pub use processor::{DecodeProcessor, MaterializeProcessor, Processor};
pub use queue::Queue;
pub use task::LoadTask;
