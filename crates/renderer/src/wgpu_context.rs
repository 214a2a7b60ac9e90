//! `GpuContext` over a wgpu device/queue pair.
//! wgpu = 26.x

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use asset::{mesh::MeshData, shader::ShaderSource};
use bytemuck::{Pod, Zeroable};
use corelib::{
    GpuContext, GpuMesh, GpuShader, GpuTexture, SamplerDesc, TextureFilter, TextureUpload, WrapMode,
};
use wgpu::{
    AddressMode, Backends, Buffer, BufferUsages, Device, DeviceDescriptor, ErrorFilter, Extent3d,
    Features, FilterMode, Instance, InstanceDescriptor, Limits, PowerPreference, Queue,
    RequestAdapterOptions, Sampler, SamplerBorderColor, SamplerDescriptor, ShaderModule,
    ShaderModuleDescriptor, ShaderSource as WgslSource, Texture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsages, TextureView, TextureViewDescriptor,
    TextureViewDimension,
    util::{BufferInitDescriptor, DeviceExt, TextureDataOrder},
};

/// Interleaved vertex as laid out in GPU memory.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 3],
}

impl GpuVertex {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<GpuVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![
            0 => Float32x3, 1 => Float32x3, 2 => Float32x2, 3 => Float32x3
        ],
    };
}

pub struct TextureEntry {
    pub texture: Texture,
    pub view: TextureView,
    pub sampler: Sampler,
}

pub struct MeshEntry {
    pub vertex_buf: Buffer,
    pub index_buf: Option<Buffer>,
    pub element_count: u32,
}

pub struct WgpuContext {
    device: Device,
    queue: Queue,
    next_id: u64,
    textures: HashMap<u64, TextureEntry>,
    meshes: HashMap<u64, MeshEntry>,
    shaders: HashMap<u64, Vec<ShaderModule>>,
}

impl WgpuContext {
    pub fn new(device: Device, queue: Queue) -> Self {
        Self {
            device,
            queue,
            next_id: 0,
            textures: HashMap::new(),
            meshes: HashMap::new(),
            shaders: HashMap::new(),
        }
    }

    /// Create a device with no surface, for tools and streaming tests.
    pub async fn new_offscreen(backends: Backends) -> Result<Self> {
        let instance = Instance::new(&InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("No suitable GPU adapter")?;

        let info = adapter.get_info();
        log::info!("Using adapter '{}' ({:?})", info.name, info.backend);

        // Border clamping is optional; fall back to edge clamping without it.
        let required_features = adapter.features() & Features::ADDRESS_MODE_CLAMP_TO_BORDER;
        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("Svarog3D Streaming Device"),
                required_features,
                required_limits: Limits::downlevel_defaults().using_resolution(adapter.limits()),
                ..Default::default()
            })
            .await
            .context("request_device failed")?;

        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn texture(&self, handle: GpuTexture) -> Option<&TextureEntry> {
        self.textures.get(&handle.id)
    }

    pub fn mesh(&self, handle: GpuMesh) -> Option<&MeshEntry> {
        self.meshes.get(&handle.id)
    }

    pub fn shader_modules(&self, handle: GpuShader) -> Option<&[ShaderModule]> {
        self.shaders.get(&handle.id).map(Vec::as_slice)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn create_sampler(&self, label: &str, desc: &SamplerDesc) -> Sampler {
        let border_supported = self
            .device
            .features()
            .contains(Features::ADDRESS_MODE_CLAMP_TO_BORDER);

        let (address, border_color) = match desc.wrap {
            WrapMode::Repeat => (AddressMode::Repeat, None),
            WrapMode::ClampToEdge => (AddressMode::ClampToEdge, None),
            WrapMode::ClampToBorder(colour) if border_supported => {
                (AddressMode::ClampToBorder, Some(nearest_border_color(colour)))
            }
            WrapMode::ClampToBorder(_) => {
                log::warn!("{label}: border clamping unsupported, clamping to edge");
                (AddressMode::ClampToEdge, None)
            }
        };

        let filter = match desc.filter {
            TextureFilter::Linear => FilterMode::Linear,
            TextureFilter::Nearest => FilterMode::Nearest,
        };
        let mipmap_filter = if desc.mipmap { filter } else { FilterMode::Nearest };
        // Anisotropy requires linear filtering on every axis.
        let anisotropy_clamp = if desc.anisotropic && desc.mipmap && filter == FilterMode::Linear {
            16
        } else {
            1
        };

        self.device.create_sampler(&SamplerDescriptor {
            label: Some(label),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter,
            anisotropy_clamp,
            border_color,
            ..Default::default()
        })
    }

    /// Runs `create` inside validation and out-of-memory error scopes so a
    /// rejected allocation comes back as an error instead of reaching the
    /// uncaptured-error handler.
    fn scoped<T>(&self, what: &str, create: impl FnOnce(&Device, &Queue) -> T) -> Result<T> {
        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        self.device.push_error_scope(ErrorFilter::Validation);
        let value = create(&self.device, &self.queue);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            bail!("{} was rejected by the device: {}", what, err);
        }
        Ok(value)
    }
}

/// Checks a texture against the device limits before wgpu sees it.
fn check_texture_limits(label: &str, width: u32, height: u32, layers: u32, limits: &Limits) -> Result<()> {
    if width == 0 || height == 0 {
        bail!("texture '{}' has a zero-sized base level", label);
    }
    let max = limits.max_texture_dimension_2d;
    if width > max || height > max {
        bail!("texture '{}' is {}x{}, device allows {}", label, width, height, max);
    }
    if layers > limits.max_texture_array_layers {
        bail!(
            "texture '{}' has {} layers, device allows {}",
            label,
            layers,
            limits.max_texture_array_layers
        );
    }
    Ok(())
}

/// wgpu only exposes three fixed border colours.
fn nearest_border_color(rgba: [f32; 4]) -> SamplerBorderColor {
    if rgba[3] < 0.5 {
        SamplerBorderColor::TransparentBlack
    } else if rgba[..3].iter().sum::<f32>() / 3.0 >= 0.5 {
        SamplerBorderColor::OpaqueWhite
    } else {
        SamplerBorderColor::OpaqueBlack
    }
}

impl GpuContext for WgpuContext {
    fn backend(&self) -> &str {
        "wgpu"
    }

    fn create_texture(&mut self, upload: &TextureUpload<'_>) -> Result<GpuTexture> {
        let Some(base) = upload.faces.first() else {
            bail!("texture '{}' has no faces", upload.label);
        };
        let mip_level_count = base.mip_levels();
        if upload
            .faces
            .iter()
            .any(|f| f.width != base.width || f.height != base.height || f.mip_levels() != mip_level_count)
        {
            bail!("texture '{}' faces disagree on size or mip count", upload.label);
        }

        // LayerMajor: every mip of face 0, then every mip of face 1, ...
        let data: Vec<u8> = upload
            .faces
            .iter()
            .flat_map(|face| face.levels.iter().flatten().copied())
            .collect();

        let layers = upload.faces.len() as u32;
        check_texture_limits(upload.label, base.width, base.height, layers, &self.device.limits())?;
        let what = format!("texture '{}'", upload.label);
        let texture = self.scoped(&what, |device, queue| {
            device.create_texture_with_data(
                queue,
                &TextureDescriptor {
                    label: Some(upload.label),
                    size: Extent3d {
                        width: base.width,
                        height: base.height,
                        depth_or_array_layers: layers,
                    },
                    mip_level_count,
                    sample_count: 1,
                    dimension: TextureDimension::D2,
                    format: TextureFormat::Rgba8UnormSrgb,
                    usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                TextureDataOrder::LayerMajor,
                &data,
            )
        })?;

        let view = texture.create_view(&TextureViewDescriptor {
            label: Some(upload.label),
            dimension: Some(if upload.cubemap {
                TextureViewDimension::Cube
            } else {
                TextureViewDimension::D2
            }),
            ..Default::default()
        });
        let sampler = self.create_sampler(upload.label, &upload.sampler);

        let id = self.next_id();
        self.textures.insert(id, TextureEntry { texture, view, sampler });
        Ok(GpuTexture {
            id,
            width: base.width,
            height: base.height,
            mip_levels: mip_level_count,
            layers,
        })
    }

    fn create_mesh(&mut self, label: &str, mesh: &MeshData) -> Result<GpuMesh> {
        if !mesh.is_valid() {
            bail!("mesh '{}' has no vertices", label);
        }

        let vertices: Vec<GpuVertex> = mesh
            .vertices
            .iter()
            .map(|v| GpuVertex {
                position: v.position,
                normal: v.normal,
                uv: v.uv,
                tangent: v.tangent,
            })
            .collect();

        let what = format!("mesh '{}'", label);
        let (vertex_buf, index_buf) = self.scoped(&what, |device, _| {
            let vertex_buf = device.create_buffer_init(&BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&vertices),
                usage: BufferUsages::VERTEX,
            });
            let index_buf = (!mesh.indices.is_empty()).then(|| {
                device.create_buffer_init(&BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(&mesh.indices),
                    usage: BufferUsages::INDEX,
                })
            });
            (vertex_buf, index_buf)
        })?;

        let id = self.next_id();
        let element_count = mesh.element_count();
        let indexed = index_buf.is_some();
        self.meshes.insert(
            id,
            MeshEntry {
                vertex_buf,
                index_buf,
                element_count,
            },
        );
        Ok(GpuMesh {
            id,
            element_count,
            indexed,
        })
    }

    fn create_shader(&mut self, shader: &ShaderSource) -> Result<GpuShader> {
        let mut modules = Vec::with_capacity(shader.stages.len());
        for stage in &shader.stages {
            self.device.push_error_scope(ErrorFilter::Validation);
            let module = self.device.create_shader_module(ShaderModuleDescriptor {
                label: Some(&shader.name),
                source: WgslSource::Wgsl(stage.code.as_str().into()),
            });
            if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
                bail!(
                    "shader '{}' stage {:?} ({}) failed validation: {}",
                    shader.name,
                    stage.stage,
                    stage.path.display(),
                    err
                );
            }
            modules.push(module);
        }

        let id = self.next_id();
        let stages = modules.len() as u32;
        self.shaders.insert(id, modules);
        Ok(GpuShader { id, stages })
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        match self.textures.remove(&texture.id) {
            Some(entry) => entry.texture.destroy(),
            None => log::warn!("Destroying unknown texture {}", texture.id),
        }
    }

    fn destroy_mesh(&mut self, mesh: GpuMesh) {
        match self.meshes.remove(&mesh.id) {
            Some(entry) => {
                entry.vertex_buf.destroy();
                if let Some(index_buf) = entry.index_buf {
                    index_buf.destroy();
                }
            }
            None => log::warn!("Destroying unknown mesh {}", mesh.id),
        }
    }

    fn destroy_shader(&mut self, shader: GpuShader) {
        if self.shaders.remove(&shader.id).is_none() {
            log::warn!("Destroying unknown shader {}", shader.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_colour_snaps_to_supported_value() {
        assert_eq!(nearest_border_color([1.0, 1.0, 1.0, 0.0]), SamplerBorderColor::TransparentBlack);
        assert_eq!(nearest_border_color([0.9, 0.8, 1.0, 1.0]), SamplerBorderColor::OpaqueWhite);
        assert_eq!(nearest_border_color([0.1, 0.0, 0.2, 1.0]), SamplerBorderColor::OpaqueBlack);
    }

    #[test]
    fn oversized_texture_is_refused_before_upload() {
        let limits = Limits::downlevel_defaults();
        let max = limits.max_texture_dimension_2d;
        assert!(check_texture_limits("ok", max, max, 6, &limits).is_ok());

        let err = check_texture_limits("huge", max + 1, 4, 1, &limits).unwrap_err();
        assert!(err.to_string().contains("huge"), "{err}");
        assert!(check_texture_limits("flat", 4, 0, 1, &limits).is_err());
        assert!(check_texture_limits("deep", 4, 4, limits.max_texture_array_layers + 1, &limits).is_err());
    }

    #[test]
    fn rejected_allocations_come_back_as_errors() {
        // Only meaningful where an adapter exists.
        let Ok(gpu) = pollster::block_on(WgpuContext::new_offscreen(Backends::all())) else {
            return;
        };

        let max = gpu.device.limits().max_buffer_size;
        let err = gpu.scoped("oversized buffer", |device, _| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("oversized buffer"),
                size: max.saturating_add(4),
                usage: BufferUsages::VERTEX,
                mapped_at_creation: false,
            })
        });
        assert!(err.is_err());

        // The device is still usable afterwards.
        let ok = gpu.scoped("small buffer", |device, _| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("small buffer"),
                size: 16,
                usage: BufferUsages::VERTEX,
                mapped_at_creation: false,
            })
        });
        assert!(ok.is_ok());
        assert!(gpu.textures.is_empty());
    }

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<GpuVertex>(), 11 * 4);
        assert_eq!(GpuVertex::LAYOUT.array_stride, 44);
    }
}
