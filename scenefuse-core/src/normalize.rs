/// Scene normalization: recenter, rescale and frame the camera
use nalgebra::{Matrix4, Point3, Vector3};
use serde::Serialize;

use crate::config::IngestConfig;
use crate::geometry::BoundingBox;

/// Parameters of the transform applied to every position, plus the
/// suggested camera framing in normalized space
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Normalization {
    /// Midpoint of the source bounding box
    pub center: [f32; 3],
    pub scale: f32,
    pub source_min: [f32; 3],
    pub source_max: [f32; 3],
    /// Largest extent of the normalized box
    pub extent: f32,
    pub camera_distance: f32,
    pub camera_target: [f32; 3],
}

impl Normalization {
    /// Derive the transform and the framing from source bounds.
    pub fn from_bounds(bounds: &BoundingBox, config: &IngestConfig) -> Self {
        let center = bounds.center();
        let max_dim = bounds.max_dimension();
        let scale = if max_dim > 0.0 && max_dim.is_finite() {
            config.target_size / max_dim
        } else {
            1.0
        };
        let extent = max_dim * scale;

        // A zero-extent model is framed as if it filled the target size.
        let framing = if extent > 0.0 { extent } else { config.target_size };
        let camera_distance = framing / (config.fov() / 2.0).sin() * config.margin_factor;

        Self {
            center: center.coords.into(),
            scale,
            source_min: bounds.min.coords.into(),
            source_max: bounds.max.coords.into(),
            extent,
            camera_distance,
            camera_target: [0.0; 3],
        }
    }

    /// Recenter then scale, as one matrix
    pub fn model_matrix(&self) -> Matrix4<f32> {
        let center = Vector3::from(self.center);
        Matrix4::new_scaling(self.scale) * Matrix4::new_translation(&-center)
    }

    pub fn apply(&self, p: &Point3<f32>) -> Point3<f32> {
        (p - Vector3::from(self.center)) * self.scale
    }

    /// Transform all positions in place. Normals keep their direction
    /// under a uniform scale and are left alone.
    pub fn apply_all(&self, positions: &mut [Point3<f32>]) {
        for p in positions.iter_mut() {
            *p = self.apply(p);
        }
    }
}
