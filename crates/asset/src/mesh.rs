//! CPU-side mesh representation produced by the model decoders.

use glam::Vec3;

/// Vertex with position/normal/uv/tangent. Values are in object space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 3],
}

impl MeshVertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
            tangent: [0.0, 0.0, 0.0],
        }
    }
}

/// Axis-aligned bounds of a mesh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Bounds enclosing every vertex position, or `None` for an empty slice.
    pub fn from_vertices(vertices: &[MeshVertex]) -> Option<Self> {
        let first = Vec3::from(vertices.first()?.position);
        let (min, max) = vertices.iter().fold((first, first), |(min, max), v| {
            let p = Vec3::from(v.position);
            (min.min(p), max.max(p))
        });
        Some(Self { min, max })
    }

    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Indexed triangle mesh with tightly-packed vertices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub smooth_shading: bool,
}

impl MeshData {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            smooth_shading: true,
        }
    }

    /// Returns `true` if there is geometry to upload.
    pub fn is_valid(&self) -> bool {
        !self.vertices.is_empty()
    }

    /// Number of elements a draw call over this mesh covers.
    pub fn element_count(&self) -> u32 {
        if self.indices.is_empty() {
            self.vertices.len() as u32
        } else {
            self.indices.len() as u32
        }
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_vertices(&self.vertices)
    }
}
