//! GPU context without a device: validates uploads and hands out ids.
//! Used by servers, tools and tests that need the pipeline to reach `Ready`.

use std::collections::HashMap;

use anyhow::{Result, bail};
use asset::{mesh::MeshData, shader::ShaderSource};
use corelib::{GpuContext, GpuMesh, GpuShader, GpuTexture, TextureUpload};

#[derive(Default)]
pub struct HeadlessGpu {
    next_id: u64,
    textures: HashMap<u64, GpuTexture>,
    meshes: HashMap<u64, GpuMesh>,
    shaders: HashMap<u64, GpuShader>,
    uploads: usize,
    fail_uploads: bool,
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent create call fail, as a lost device would.
    pub fn set_fail_uploads(&mut self, fail: bool) {
        self.fail_uploads = fail;
    }

    /// Successful create calls so far.
    pub fn uploads(&self) -> usize {
        self.uploads
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    fn allocate(&mut self) -> Result<u64> {
        if self.fail_uploads {
            bail!("headless device rejected upload");
        }
        self.next_id += 1;
        self.uploads += 1;
        Ok(self.next_id)
    }
}

impl GpuContext for HeadlessGpu {
    fn backend(&self) -> &str {
        "headless"
    }

    fn create_texture(&mut self, upload: &TextureUpload<'_>) -> Result<GpuTexture> {
        let Some(base) = upload.faces.first() else {
            bail!("texture '{}' has no faces", upload.label);
        };
        if upload.cubemap && upload.faces.len() != 6 {
            bail!("cubemap '{}' has {} faces", upload.label, upload.faces.len());
        }
        if let Some(bad) = upload.faces.iter().find(|f| !f.is_valid()) {
            bail!(
                "texture '{}' has a malformed face ({}x{}, {} levels)",
                upload.label,
                bad.width,
                bad.height,
                bad.levels.len()
            );
        }

        let texture = GpuTexture {
            id: self.allocate()?,
            width: base.width,
            height: base.height,
            mip_levels: base.mip_levels(),
            layers: upload.faces.len() as u32,
        };
        self.textures.insert(texture.id, texture);
        Ok(texture)
    }

    fn create_mesh(&mut self, label: &str, mesh: &MeshData) -> Result<GpuMesh> {
        if !mesh.is_valid() {
            bail!("mesh '{}' has no vertices", label);
        }
        let gpu = GpuMesh {
            id: self.allocate()?,
            element_count: mesh.element_count(),
            indexed: !mesh.indices.is_empty(),
        };
        self.meshes.insert(gpu.id, gpu);
        Ok(gpu)
    }

    fn create_shader(&mut self, shader: &ShaderSource) -> Result<GpuShader> {
        if shader.stages.is_empty() {
            bail!("shader '{}' has no stages", shader.name);
        }
        let gpu = GpuShader {
            id: self.allocate()?,
            stages: shader.stages.len() as u32,
        };
        self.shaders.insert(gpu.id, gpu);
        Ok(gpu)
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        if self.textures.remove(&texture.id).is_none() {
            log::warn!("Destroying unknown texture {}", texture.id);
        }
    }

    fn destroy_mesh(&mut self, mesh: GpuMesh) {
        if self.meshes.remove(&mesh.id).is_none() {
            log::warn!("Destroying unknown mesh {}", mesh.id);
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
    use asset::mesh::MeshVertex;
    use asset::texture::{TextureData, TextureFormat};
    use corelib::SamplerDesc;

    fn opaque(size: u32) -> TextureData {
        TextureData {
            width: size,
            height: size,
            format: TextureFormat::Rgba8,
            has_alpha: false,
            levels: vec![vec![255; (size * size * 4) as usize]],
        }
    }

    #[test]
    fn texture_roundtrip_tracks_live_set() {
        let mut gpu = HeadlessGpu::new();
        let faces = [opaque(8)];
        let tex = gpu
            .create_texture(&TextureUpload {
                label: "checker",
                faces: &faces,
                sampler: SamplerDesc::default(),
                cubemap: false,
            })
            .unwrap();
        assert_eq!((tex.width, tex.layers, tex.mip_levels), (8, 1, 1));
        assert_eq!(gpu.live_textures(), 1);

        gpu.destroy_texture(tex);
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn cubemap_needs_six_faces() {
        let mut gpu = HeadlessGpu::new();
        let faces = vec![opaque(4); 5];
        let upload = TextureUpload {
            label: "sky",
            faces: &faces,
            sampler: SamplerDesc::default(),
            cubemap: true,
        };
        assert!(gpu.create_texture(&upload).is_err());
    }

    #[test]
    fn mesh_element_count_and_failure_injection() {
        let mut gpu = HeadlessGpu::new();
        let mesh = MeshData::new(vec![MeshVertex::default(); 3], vec![0, 1, 2]);
        let handle = gpu.create_mesh("tri", &mesh).unwrap();
        assert_eq!(handle.element_count, 3);
        assert!(handle.indexed);

        gpu.set_fail_uploads(true);
        assert!(gpu.create_mesh("tri", &mesh).is_err());
        assert_eq!(gpu.uploads(), 1);
    }
}
