use std::path::PathBuf;

use anyhow::{Context, bail};
use asset::texture::{self as decoder, TextureData};
use corelib::{GpuContext, GpuTexture, SamplerDesc, TextureFilter, TextureUpload, WrapMode};

use super::path_key;
use crate::kind::ResourceKind;

#[derive(Clone, Debug, PartialEq)]
pub enum TextureSource {
    File(PathBuf),
    /// Faces in +X, -X, +Y, -Y, +Z, -Z order.
    Cubemap(Vec<PathBuf>),
}

/// What texture to load and how it will be sampled.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureBuilder {
    source: Option<TextureSource>,
    sampler: SamplerDesc,
    rows: u32,
}

impl Default for TextureBuilder {
    fn default() -> Self {
        Self {
            source: None,
            sampler: SamplerDesc::default(),
            rows: 1,
        }
    }
}

impl TextureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(TextureSource::File(path.into())),
            ..Self::default()
        }
    }

    /// Cubemap keyed on its first face.
    pub fn cubemap<P: Into<PathBuf>>(faces: impl IntoIterator<Item = P>) -> Self {
        Self {
            source: Some(TextureSource::Cubemap(faces.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    pub fn clamp_to_border(mut self, colour: [f32; 4]) -> Self {
        self.sampler.wrap = WrapMode::ClampToBorder(colour);
        self
    }

    pub fn clamp_edges(mut self) -> Self {
        self.sampler.wrap = WrapMode::ClampToEdge;
        self
    }

    /// Point sampling. Mipmaps make no sense with it and are switched off.
    pub fn nearest_filtering(mut self) -> Self {
        self.sampler.filter = TextureFilter::Nearest;
        self.sampler.mipmap = false;
        self
    }

    pub fn no_mipmap(mut self) -> Self {
        self.sampler.mipmap = false;
        self
    }

    /// Disable anisotropic filtering.
    pub fn no_filtering(mut self) -> Self {
        self.sampler.anisotropic = false;
        self
    }

    /// Rows in a texture atlas; 1 for a plain texture.
    pub fn number_of_rows(mut self, rows: u32) -> Self {
        self.rows = rows.max(1);
        self
    }

    pub fn source(&self) -> Option<&TextureSource> {
        self.source.as_ref()
    }

    pub fn sampler(&self) -> SamplerDesc {
        self.sampler
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn is_cubemap(&self) -> bool {
        matches!(self.source, Some(TextureSource::Cubemap(_)))
    }
}

/// 2D textures and cubemaps. Pixel data is dropped once uploaded.
#[derive(Debug, Default)]
pub struct Textures;

impl ResourceKind for Textures {
    const FACTORY: &'static str = "texture";
    const RETAIN_DATA: bool = false;

    type Builder = TextureBuilder;
    /// One entry per face.
    type Data = Vec<TextureData>;
    type Payload = GpuTexture;

    fn cache_key(&self, builder: &TextureBuilder) -> Option<String> {
        match builder.source.as_ref()? {
            TextureSource::File(path) => path_key(path),
            TextureSource::Cubemap(faces) => path_key(faces.first()?),
        }
    }

    fn decode(&self, name: &str, builder: &TextureBuilder) -> anyhow::Result<Vec<TextureData>> {
        let mut faces = match builder.source.as_ref() {
            Some(TextureSource::File(path)) => vec![TextureData::load(path)?],
            Some(TextureSource::Cubemap(paths)) => decoder::load_cubemap(paths)?,
            None => bail!("texture '{}' has no source", name),
        };

        if builder.sampler.mipmap {
            for face in &mut faces {
                face.generate_mips()
                    .with_context(|| format!("Failed to build mips for '{}'", name))?;
            }
        }
        Ok(faces)
    }

    fn materialize(
        &self,
        name: &str,
        faces: &Vec<TextureData>,
        builder: &TextureBuilder,
        gpu: &mut dyn GpuContext,
    ) -> anyhow::Result<GpuTexture> {
        gpu.create_texture(&TextureUpload {
            label: name,
            faces,
            sampler: builder.sampler,
            cubemap: builder.is_cubemap(),
        })
    }

    fn release(&self, texture: GpuTexture, gpu: &mut dyn GpuContext) {
        gpu.destroy_texture(texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_filtering_drops_mipmaps() {
        let b = TextureBuilder::file("a.png").nearest_filtering();
        assert_eq!(b.sampler().filter, TextureFilter::Nearest);
        assert!(!b.sampler().mipmap);
        assert!(b.sampler().anisotropic);
    }

    #[test]
    fn wrap_modes_replace_each_other() {
        let b = TextureBuilder::file("a.png").clamp_edges().clamp_to_border([1.0, 0.0, 0.0, 1.0]);
        assert_eq!(b.sampler().wrap, WrapMode::ClampToBorder([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(TextureBuilder::file("a.png").number_of_rows(0).rows(), 1);
    }

    #[test]
    fn keys_come_from_the_file_or_first_face() {
        let kind = Textures;
        assert_eq!(
            kind.cache_key(&TextureBuilder::file("res/./grass.png")).as_deref(),
            Some("res/grass.png")
        );

        let faces = ["sky/px.png", "sky/nx.png", "sky/py.png", "sky/ny.png", "sky/pz.png", "sky/nz.png"];
        let cube = TextureBuilder::cubemap(faces);
        assert!(cube.is_cubemap());
        assert_eq!(kind.cache_key(&cube).as_deref(), Some("sky/px.png"));

        assert_eq!(kind.cache_key(&TextureBuilder::new()), None);
        assert_eq!(kind.cache_key(&TextureBuilder::cubemap(Vec::<PathBuf>::new())), None);
    }

    #[test]
    fn decode_builds_mips_unless_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checker.png");
        image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let faces = Textures.decode("checker", &TextureBuilder::file(&path)).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].mip_levels(), 4);

        let flat = Textures.decode("checker", &TextureBuilder::file(&path).no_mipmap()).unwrap();
        assert_eq!(flat[0].mip_levels(), 1);
    }

    #[test]
    fn decode_reports_missing_files() {
        let err = Textures
            .decode("gone", &TextureBuilder::file("definitely/not/here.png"))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("here.png"));
    }
}
