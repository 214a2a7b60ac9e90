//! The boundary between the loading pipeline and whatever owns the GPU.
//!
//! Materialize phases only ever see `&mut dyn GpuContext`, handed to them by
//! the frame loop on the rendering thread. Handles are plain ids so resource
//! objects can be shared across threads without dragging device types along.

use asset::{mesh::MeshData, shader::ShaderSource, texture::TextureData};

/// Uploaded texture. `layers` is 6 for cubemaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuTexture {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub layers: u32,
}

/// Uploaded vertex/index buffers and how many elements a draw covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuMesh {
    pub id: u64,
    pub element_count: u32,
    pub indexed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuShader {
    pub id: u64,
    pub stages: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
    /// Clamp to a border colour (RGBA, 0..1).
    ClampToBorder([f32; 4]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFilter {
    Linear,
    Nearest,
}

/// Sampling state requested by a texture builder.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub wrap: WrapMode,
    pub filter: TextureFilter,
    pub mipmap: bool,
    pub anisotropic: bool,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            wrap: WrapMode::Repeat,
            filter: TextureFilter::Linear,
            mipmap: true,
            anisotropic: true,
        }
    }
}

/// Everything needed to create one texture. One face for 2D textures,
/// six for cubemaps; every face carries the same mip chain.
pub struct TextureUpload<'a> {
    pub label: &'a str,
    pub faces: &'a [TextureData],
    pub sampler: SamplerDesc,
    pub cubemap: bool,
}

pub trait GpuContext {
    /// Short backend name for logs.
    fn backend(&self) -> &str;

    fn create_texture(&mut self, upload: &TextureUpload<'_>) -> anyhow::Result<GpuTexture>;
    fn create_mesh(&mut self, label: &str, mesh: &MeshData) -> anyhow::Result<GpuMesh>;
    fn create_shader(&mut self, shader: &ShaderSource) -> anyhow::Result<GpuShader>;

    fn destroy_texture(&mut self, texture: GpuTexture);
    fn destroy_mesh(&mut self, mesh: GpuMesh);
    fn destroy_shader(&mut self, shader: GpuShader);
}
