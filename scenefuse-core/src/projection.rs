/// Camera derived from the scene normalization
use nalgebra::{Matrix4, Point3, Vector3};
use serde::Serialize;

use crate::config::IngestConfig;
use crate::normalize::Normalization;

/// Perspective camera looking at the normalized model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Point3<f32>,
    pub target: Point3<f32>,
    pub up: Vector3<f32>,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Place the camera on +Z at the suggested distance from the target.
    pub fn framing(normalization: &Normalization, config: &IngestConfig) -> Self {
        let target = Point3::from(normalization.camera_target);
        let distance = normalization.camera_distance;
        let radius = (normalization.extent * 0.5 * 3f32.sqrt()).max(config.target_size * 0.5);
        Self {
            position: target + Vector3::new(0.0, 0.0, distance),
            target,
            up: Vector3::new(0.0, 1.0, 0.0),
            fov: config.fov(),
            aspect: config.aspect,
            near: (distance * 0.01).max(0.01),
            far: distance + radius * 4.0,
        }
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(&self.position, &self.target, &self.up)
    }

    pub fn projection_matrix(&self) -> Matrix4<f32> {
        Matrix4::new_perspective(self.aspect, self.fov, self.near, self.far)
    }

    /// Normalized device coordinates of a normalized-space point, or
    /// `None` when it falls outside the view volume.
    pub fn project(&self, point: &Point3<f32>) -> Option<Point3<f32>> {
        let ndc = (self.projection_matrix() * self.view_matrix()).transform_point(point);
        let inside = |c: f32| (-1.0..=1.0).contains(&c);
        (inside(ndc.x) && inside(ndc.y) && inside(ndc.z)).then_some(ndc)
    }

    pub fn parameters(&self) -> CameraParameters {
        CameraParameters {
            position: self.position.coords.into(),
            target: self.target.coords.into(),
            up: self.up.into(),
            fov_degrees: self.fov.to_degrees(),
            aspect: self.aspect,
            near: self.near,
            far: self.far,
        }
    }
}

/// Serialized form of [`Camera`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraParameters {
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub up: [f32; 3],
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    fn camera_for(min: [f32; 3], max: [f32; 3]) -> Camera {
        let config = IngestConfig::default();
        let bounds = BoundingBox::new(Point3::from(min), Point3::from(max));
        Camera::framing(&Normalization::from_bounds(&bounds, &config), &config)
    }

    #[test]
    fn test_camera_framing() {
        let camera = camera_for([0.0; 3], [1.0; 3]);
        assert!((camera.aspect - 4.0 / 3.0).abs() < 1e-6);
        assert_eq!(camera.target, Point3::origin());
        assert!(camera.position.z > 0.0);
        assert!(camera.near < camera.far);
    }

    #[test]
    fn test_view_matrix() {
        let camera = camera_for([0.0; 3], [1.0; 3]);
        let view = camera.view_matrix();
        assert!(view.norm() > 0.0);
        let target = view.transform_point(&camera.target);
        assert!(target.x.abs() < 1e-5 && target.y.abs() < 1e-5 && target.z < 0.0);
    }

    #[test]
    fn test_normalized_corners_are_in_view() {
        let camera = camera_for([-3.0, 0.0, 10.0], [5.0, 2.0, 12.0]);
        for corner in [[-2.5, -0.625, -0.625], [2.5, 0.625, 0.625]] {
            assert!(camera.project(&Point3::from(corner)).is_some());
        }
    }
}
