use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use asset::mesh::{Aabb, MeshData};
use asset::obj;
use corelib::{GpuContext, GpuMesh};

use super::path_key;
use crate::kind::ResourceKind;

#[derive(Clone, Debug, PartialEq)]
pub enum ModelSource {
    /// Wavefront OBJ file.
    File(PathBuf),
    /// Geometry built in code, keyed by name.
    Manual { name: String, mesh: Arc<MeshData> },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelBuilder {
    source: Option<ModelSource>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(ModelSource::File(path.into())),
        }
    }

    pub fn manual(name: impl Into<String>, mesh: MeshData) -> Self {
        Self {
            source: Some(ModelSource::Manual {
                name: name.into(),
                mesh: Arc::new(mesh),
            }),
        }
    }

    pub fn source(&self) -> Option<&ModelSource> {
        self.source.as_ref()
    }
}

/// CPU copy of a model, kept after upload for picking and collision.
#[derive(Clone, Debug)]
pub struct ModelData {
    pub mesh: MeshData,
    pub bounds: Aabb,
}

#[derive(Debug, Default)]
pub struct Models;

impl ResourceKind for Models {
    const FACTORY: &'static str = "model";

    type Builder = ModelBuilder;
    type Data = ModelData;
    type Payload = GpuMesh;

    fn cache_key(&self, builder: &ModelBuilder) -> Option<String> {
        match builder.source.as_ref()? {
            ModelSource::File(path) => path_key(path),
            ModelSource::Manual { name, .. } if !name.is_empty() => Some(name.clone()),
            ModelSource::Manual { .. } => None,
        }
    }

    fn decode(&self, name: &str, builder: &ModelBuilder) -> anyhow::Result<ModelData> {
        let mesh = match builder.source.as_ref() {
            Some(ModelSource::File(path)) => obj::load_obj_from_path(path)?,
            Some(ModelSource::Manual { mesh, .. }) => MeshData::clone(mesh),
            None => bail!("model '{}' has no source", name),
        };

        let Some(bounds) = mesh.bounds() else {
            bail!("model '{}' has no vertices", name);
        };
        log::debug!(
            "Model '{}': {} vertices, {} indices, extents {:?}",
            name,
            mesh.vertices.len(),
            mesh.indices.len(),
            bounds.extents()
        );
        Ok(ModelData { mesh, bounds })
    }

    fn materialize(
        &self,
        name: &str,
        data: &ModelData,
        _builder: &ModelBuilder,
        gpu: &mut dyn GpuContext,
    ) -> anyhow::Result<GpuMesh> {
        gpu.create_mesh(name, &data.mesh)
    }

    fn release(&self, mesh: GpuMesh, gpu: &mut dyn GpuContext) {
        gpu.destroy_mesh(mesh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asset::mesh::MeshVertex;

    fn triangle() -> MeshData {
        MeshData::new(
            vec![
                MeshVertex::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0]),
                MeshVertex::new([1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0]),
                MeshVertex::new([0.0, 2.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn manual_models_are_keyed_by_name() {
        assert_eq!(
            Models.cache_key(&ModelBuilder::manual("tri", triangle())).as_deref(),
            Some("tri")
        );
        assert_eq!(Models.cache_key(&ModelBuilder::manual("", triangle())), None);
        assert_eq!(Models.cache_key(&ModelBuilder::new()), None);
    }

    #[test]
    fn decode_computes_bounds() {
        let data = Models.decode("tri", &ModelBuilder::manual("tri", triangle())).unwrap();
        assert_eq!(data.bounds.max.y, 2.0);
        assert_eq!(data.mesh.element_count(), 3);
    }

    #[test]
    fn empty_geometry_fails_decode() {
        assert!(Models.decode("empty", &ModelBuilder::manual("empty", MeshData::default())).is_err());
    }

    #[test]
    fn decode_reads_obj_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        std::fs::write(
            &path,
            "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\nf 1/1 2/2 3/3 4/4\n",
        )
        .unwrap();

        let data = Models.decode("quad", &ModelBuilder::file(&path)).unwrap();
        assert_eq!(data.mesh.element_count(), 6);
        assert_eq!(data.bounds.min.x, 0.0);
        assert_eq!(data.bounds.max.x, 1.0);
    }
}
