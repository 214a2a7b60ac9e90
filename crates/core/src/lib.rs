//! Core shared types and errors (renderer-agnostic).

pub mod error;
pub mod gpu;

pub use error::{PhaseKind, PipelineError, PipelineResult};
pub use gpu::{
    GpuContext, GpuMesh, GpuShader, GpuTexture, SamplerDesc, TextureFilter, TextureUpload, WrapMode,
};
