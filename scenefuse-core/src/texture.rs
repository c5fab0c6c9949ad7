/// Texture resolution and encoding
///
/// References are resolved against the directory of the material library
/// that declares them. Each distinct file is read and encoded once, however
/// many materials use it.
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder, ImageFormat, RgbImage};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::{debug, warn};

use crate::config::{IngestConfig, TextureEncoding};
use crate::error::Warning;
use crate::mtl::{Material, MaterialTable, TextureSlot};
use crate::source::{normalize_path, path_key, reference_path, ModelSource};

/// An encoded image ready for the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct TextureBlob {
    pub key: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
    pub data: Vec<u8>,
}

impl TextureBlob {
    pub fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }
}

impl Serialize for TextureBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TextureBlob", 6)?;
        state.serialize_field("mime_type", self.mime_type)?;
        state.serialize_field("width", &self.width)?;
        state.serialize_field("height", &self.height)?;
        state.serialize_field("source_width", &self.source_width)?;
        state.serialize_field("source_height", &self.source_height)?;
        state.serialize_field("uri", &self.data_uri())?;
        state.end()
    }
}

/// A material's texture statement after resolution. `key` is `None` when
/// the file could not be found or decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureBinding {
    pub slot: TextureSlot,
    pub reference: String,
    pub key: Option<String>,
    pub clamp: bool,
    pub bump_multiplier: Option<f32>,
}

/// Result of resolving every texture reference in a material table
#[derive(Debug, Clone, Default)]
pub struct TexturePlan {
    /// Distinct files to load, by key
    pub requests: BTreeMap<String, PathBuf>,
    /// Parallel to the material table
    pub bindings: Vec<Vec<TextureBinding>>,
    pub warnings: Vec<Warning>,
}

impl TexturePlan {
    /// Mark every binding of `key` absent after its file failed to load.
    pub fn drop_texture(&mut self, key: &str) {
        self.requests.remove(key);
        for binding in self.bindings.iter_mut().flatten() {
            if binding.key.as_deref() == Some(key) {
                binding.key = None;
            }
        }
    }
}

/// Locate a texture file: the reference joined to the library directory,
/// then the bare file name in that directory.
pub fn resolve_texture(
    source: &dyn ModelSource,
    material: &Material,
    reference: &str,
) -> Result<PathBuf, PathBuf> {
    let relative = reference_path(reference);
    let primary = normalize_path(&material.library_dir.join(&relative));
    if source.exists(&primary) {
        return Ok(primary);
    }
    if let Some(name) = relative.file_name() {
        let fallback = normalize_path(&material.library_dir.join(name));
        if fallback != primary && source.exists(&fallback) {
            debug!("Texture '{}' found by file name at {:?}", reference, fallback);
            return Ok(fallback);
        }
    }
    Err(primary)
}

/// Resolve all texture references of `table`. A missing file yields one
/// warning however many materials point at it.
pub fn plan_textures(source: &dyn ModelSource, table: &MaterialTable) -> TexturePlan {
    let mut plan = TexturePlan::default();
    let mut reported: HashSet<PathBuf> = HashSet::new();

    for material in table.iter() {
        let mut bindings = Vec::with_capacity(material.textures.len());
        for texture in &material.textures {
            let key = match resolve_texture(source, material, &texture.reference) {
                Ok(path) => {
                    let key = path_key(&path);
                    plan.requests.entry(key.clone()).or_insert(path);
                    Some(key)
                }
                Err(path) => {
                    if reported.insert(path.clone()) {
                        warn!(
                            "Texture '{}' of material '{}' not found at {:?}",
                            texture.reference, material.name, path
                        );
                        plan.warnings.push(Warning::TextureMissing {
                            material: material.name.clone(),
                            reference: texture.reference.clone(),
                            path,
                        });
                    }
                    None
                }
            };
            bindings.push(TextureBinding {
                slot: texture.slot,
                reference: texture.reference.clone(),
                key,
                clamp: texture.clamp,
                bump_multiplier: texture.bump_multiplier,
            });
        }
        plan.bindings.push(bindings);
    }
    plan
}

fn web_mime(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

/// Decode `bytes`, downscale to the configured cap and encode for the scene.
pub fn encode_texture(key: &str, bytes: &[u8], config: &IngestConfig) -> Result<TextureBlob, String> {
    let format = image::guess_format(bytes).map_err(|e| e.to_string())?;
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| e.to_string())?;
    let (source_width, source_height) = img.dimensions();

    let (img, resized) = match config.max_texture_size {
        Some(cap) if source_width.max(source_height) > cap => {
            debug!(
                "Resizing texture {} from {}x{} to fit {}",
                key, source_width, source_height, cap
            );
            (img.resize(cap, cap, FilterType::Lanczos3), true)
        }
        _ => (img, false),
    };
    let (width, height) = img.dimensions();

    let (mime_type, data) = match config.texture_encoding {
        TextureEncoding::Preserve => match web_mime(format) {
            Some(mime) if !resized => (mime, bytes.to_vec()),
            _ if img.color().has_alpha() => ("image/png", encode_png(&img)?),
            _ => ("image/jpeg", encode_jpeg(&img, config.jpeg_quality)?),
        },
        TextureEncoding::Png => ("image/png", encode_png(&img)?),
        TextureEncoding::Jpeg => ("image/jpeg", encode_jpeg(&img, config.jpeg_quality)?),
        TextureEncoding::Webp => ("image/webp", encode_webp(&img)?),
    };

    Ok(TextureBlob {
        key: key.to_string(),
        mime_type,
        width,
        height,
        source_width,
        source_height,
        data,
    })
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, String> {
    let mut data = Vec::new();
    let (width, height) = img.dimensions();
    let encoder = PngEncoder::new(&mut data);
    let written = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        encoder.write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
    } else {
        let rgb = img.to_rgb8();
        encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
    };
    written.map_err(|e| e.to_string())?;
    Ok(data)
}

fn encode_webp(img: &DynamicImage) -> Result<Vec<u8>, String> {
    let mut data = Vec::new();
    let (width, height) = img.dimensions();
    let encoder = WebPEncoder::new_lossless(&mut data);
    let written = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        encoder.write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
    } else {
        let rgb = img.to_rgb8();
        encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
    };
    written.map_err(|e| e.to_string())?;
    Ok(data)
}

/// JPEG has no alpha channel; transparent pixels are composited onto white.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, String> {
    let rgba = img.to_rgba8();
    let flat = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as f32 / 255.0;
        let blend = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    });

    let mut cursor = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut cursor, quality)
        .encode_image(&flat)
        .map_err(|e| e.to_string())?;
    Ok(cursor.into_inner())
}

/// Read a texture file and encode it. `Err` carries the reason for a
/// `TextureDecodeFailed` warning.
pub fn load_texture(
    source: &dyn ModelSource,
    key: &str,
    path: &Path,
    config: &IngestConfig,
) -> Result<TextureBlob, String> {
    let bytes = source.read(path).map_err(|e| e.to_string())?;
    encode_texture(key, &bytes, config)
}
