//! Texture decoding and CPU-side pixel storage.
//! Everything is expanded to RGBA8; mip chains are built on the CPU so the
//! GPU side only has to copy bytes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use image::{RgbaImage, imageops::FilterType};

/// Supported texture formats.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TextureFormat {
    Rgba8,
}

/// Texture data in CPU-friendly format before GPU upload.
/// `levels[0]` is the full-size image, followed by any generated mips.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub has_alpha: bool,
    pub levels: Vec<Vec<u8>>,
}

impl TextureData {
    /// Decode an encoded image (PNG/JPEG) held in memory.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).context("Failed to decode image")?;
        let has_alpha = img.color().has_alpha();
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            format: TextureFormat::Rgba8,
            has_alpha,
            levels: vec![rgba.into_raw()],
        })
    }

    /// Load and decode a texture file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading texture from {:?}", path);

        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read image {:?}", path))?;
        let tex = Self::decode(&bytes).with_context(|| format!("Failed to open image {:?}", path))?;

        log::debug!(
            "Decoded texture {:?}: {}x{}, alpha={}",
            path,
            tex.width,
            tex.height,
            tex.has_alpha
        );
        Ok(tex)
    }

    /// Number of levels in a full chain down to 1x1.
    pub fn full_mip_count(width: u32, height: u32) -> u32 {
        32 - width.max(height).max(1).leading_zeros()
    }

    /// Size of a mip level, clamped to 1 texel.
    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    pub fn mip_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Replace any existing mips with a full chain downsampled from level 0.
    pub fn generate_mips(&mut self) -> Result<()> {
        let base = RgbaImage::from_raw(self.width, self.height, self.levels[0].clone())
            .ok_or_else(|| anyhow!("Base level does not match {}x{}", self.width, self.height))?;

        self.levels.truncate(1);
        for level in 1..Self::full_mip_count(self.width, self.height) {
            let (w, h) = self.level_size(level);
            let scaled = image::imageops::resize(&base, w, h, FilterType::Triangle);
            self.levels.push(scaled.into_raw());
        }
        Ok(())
    }

    /// Get the number of bytes per pixel for the format.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self.format {
            TextureFormat::Rgba8 => 4,
        }
    }

    /// Check that every level holds exactly the bytes its size implies.
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && !self.levels.is_empty()
            && self.levels.iter().enumerate().all(|(i, level)| {
                let (w, h) = self.level_size(i as u32);
                level.len() == (w * h * self.bytes_per_pixel()) as usize
            })
    }
}

/// Load the six faces of a cubemap (+X, -X, +Y, -Y, +Z, -Z).
/// Faces must be square and share one size.
pub fn load_cubemap(faces: &[PathBuf]) -> Result<Vec<TextureData>> {
    if faces.len() != 6 {
        bail!("Cubemap needs 6 faces, got {}", faces.len());
    }

    let decoded = faces
        .iter()
        .map(TextureData::load)
        .collect::<Result<Vec<_>>>()?;

    let (w, h) = (decoded[0].width, decoded[0].height);
    if w != h {
        bail!("Cubemap face {:?} is not square ({}x{})", faces[0], w, h);
    }
    if let Some((path, face)) = faces
        .iter()
        .zip(&decoded)
        .find(|(_, f)| f.width != w || f.height != h)
    {
        bail!(
            "Cubemap face {:?} is {}x{}, expected {}x{}",
            path,
            face.width,
            face.height,
            w,
            h
        );
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32, alpha: u8) -> PathBuf {
        let path = dir.join(name);
        let img = RgbaImage::from_pixel(w, h, image::Rgba([10, 20, 30, alpha]));
        img.save(&path).expect("write png");
        path
    }

    /// Opaque square with 8x8 grey checks.
    fn checkerboard(size: u32) -> TextureData {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let v = if ((x / 8) + (y / 8)) % 2 == 0 { 255 } else { 128 };
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        TextureData {
            width: size,
            height: size,
            format: TextureFormat::Rgba8,
            has_alpha: false,
            levels: vec![data],
        }
    }

    #[test]
    fn short_level_is_invalid() {
        let mut tex = checkerboard(16);
        assert!(tex.is_valid());
        assert_eq!(tex.mip_levels(), 1);

        tex.levels[0].truncate(16 * 16 * 4 - 1);
        assert!(!tex.is_valid());
    }

    #[test]
    fn full_mip_count_matches_largest_side() {
        assert_eq!(TextureData::full_mip_count(1, 1), 1);
        assert_eq!(TextureData::full_mip_count(256, 256), 9);
        assert_eq!(TextureData::full_mip_count(300, 20), 9);
    }

    #[test]
    fn generated_mips_shrink_to_one_texel() {
        let mut tex = checkerboard(16);
        tex.generate_mips().unwrap();
        assert_eq!(tex.mip_levels(), 5);
        assert_eq!(tex.level_size(4), (1, 1));
        assert!(tex.is_valid());
    }

    #[test]
    fn load_detects_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let opaque = write_png(dir.path(), "opaque.png", 4, 2, 255);
        let clear = write_png(dir.path(), "clear.png", 4, 2, 0);

        let tex = TextureData::load(&opaque).unwrap();
        assert_eq!((tex.width, tex.height), (4, 2));
        assert!(tex.is_valid());

        // PNGs saved from RGBA keep an alpha channel even when opaque.
        assert!(TextureData::load(&clear).unwrap().has_alpha);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(TextureData::decode(b"not an image").is_err());
    }

    #[test]
    fn cubemap_requires_six_matching_faces() {
        let dir = tempfile::tempdir().unwrap();
        let faces: Vec<_> = (0..6)
            .map(|i| write_png(dir.path(), &format!("f{i}.png"), 8, 8, 255))
            .collect();
        assert_eq!(load_cubemap(&faces).unwrap().len(), 6);
        assert!(load_cubemap(&faces[..5]).is_err());

        let mut mixed = faces.clone();
        mixed[3] = write_png(dir.path(), "odd.png", 4, 4, 255);
        assert!(load_cubemap(&mixed).is_err());
    }
}
