/// Ingestion configuration
///
/// Every field has a default; a TOML document only needs to name the values
/// it changes.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// How texture bytes are written into the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureEncoding {
    /// Keep the source bytes when they are web-displayable and were not
    /// resized; otherwise PNG for images with alpha, JPEG without.
    Preserve,
    Png,
    Jpeg,
    /// Lossless WebP, alpha kept
    Webp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Edge length of the normalized bounding box's largest dimension
    pub target_size: f32,
    /// Vertical field of view of the renderer, in degrees
    pub fov_degrees: f32,
    pub margin_factor: f32,
    pub aspect: f32,
    /// Bytes inspected by the format detector before giving up
    pub detect_lookahead: usize,
    /// Longest-edge cap for textures, in pixels
    pub max_texture_size: Option<u32>,
    pub texture_encoding: TextureEncoding,
    pub jpeg_quality: u8,
    /// Worker threads for parsing and decoding (0 = available parallelism)
    pub max_workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            target_size: 5.0,
            fov_degrees: 45.0,
            margin_factor: 1.5,
            aspect: 4.0 / 3.0,
            detect_lookahead: 4096,
            max_texture_size: None,
            texture_encoding: TextureEncoding::Preserve,
            jpeg_quality: 85,
            max_workers: 0,
        }
    }
}

impl IngestConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded ingest config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_size.is_finite() && self.target_size > 0.0) {
            return Err(IngestError::Config(format!(
                "target_size must be positive, got {}",
                self.target_size
            )));
        }
        if !(self.fov_degrees > 0.0 && self.fov_degrees < 180.0) {
            return Err(IngestError::Config(format!(
                "fov_degrees must lie in (0, 180), got {}",
                self.fov_degrees
            )));
        }
        if !(self.margin_factor.is_finite() && self.margin_factor > 0.0) {
            return Err(IngestError::Config(format!(
                "margin_factor must be positive, got {}",
                self.margin_factor
            )));
        }
        if !(self.aspect.is_finite() && self.aspect > 0.0) {
            return Err(IngestError::Config(format!(
                "aspect must be positive, got {}",
                self.aspect
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(IngestError::Config(format!(
                "jpeg_quality must lie in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.max_texture_size == Some(0) {
            return Err(IngestError::Config(
                "max_texture_size must be at least 1".to_string(),
            ));
        }
        if self.detect_lookahead == 0 {
            return Err(IngestError::Config(
                "detect_lookahead must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Field of view in radians
    pub fn fov(&self) -> f32 {
        self.fov_degrees.to_radians()
    }

    pub(crate) fn worker_count(&self) -> usize {
        if self.max_workers > 0 {
            self.max_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}
