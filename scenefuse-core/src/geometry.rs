/// Geometry data model shared by the parsers, the merger and the assembler
use std::path::PathBuf;

use nalgebra::{Point3, Vector3};
use serde::Serialize;

use crate::error::Warning;

/// Per-vertex RGBA, components in 0..=1
pub type Color = [f32; 4];

pub const WHITE: Color = [1.0, 1.0, 1.0, 1.0];

/// One face corner: 0-based indices into the owning attribute arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceCorner {
    pub position: u32,
    pub uv: Option<u32>,
    pub normal: Option<u32>,
}

impl FaceCorner {
    pub fn new(position: u32, uv: Option<u32>, normal: Option<u32>) -> Self {
        Self {
            position,
            uv,
            normal,
        }
    }

    fn shifted(self, offset: &IndexOffset) -> Self {
        Self {
            position: self.position + offset.position,
            uv: self.uv.map(|i| i + offset.uv),
            normal: self.normal.map(|i| i + offset.normal),
        }
    }
}

/// An ordered polygon. Inside a [`Fragment`] `material` indexes the
/// fragment's material slots; inside a [`MergedMesh`] it indexes the
/// material table.
#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub corners: Vec<FaceCorner>,
    pub material: usize,
    /// Source line (OBJ) or element instance (PLY), for diagnostics
    pub line: usize,
}

/// One parsed geometry file, owning its own index space
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    pub source: PathBuf,
    pub positions: Vec<Point3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uvs: Vec<[f32; 2]>,
    /// Parallel to `positions` when the file carries vertex colors
    pub colors: Option<Vec<Color>>,
    pub faces: Vec<Face>,
    /// Material names referenced by `usemtl`, slot 0 being "no material"
    pub material_slots: Vec<String>,
    /// `mtllib` references in declaration order
    pub material_libraries: Vec<String>,
    pub groups: usize,
    pub objects: usize,
    pub warnings: Vec<Warning>,
}

impl Fragment {
    pub const DEFAULT_SLOT: usize = 0;

    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            material_slots: vec![String::new()],
            ..Default::default()
        }
    }

    /// Slot for a `usemtl` name, allocated on first use.
    pub fn material_slot(&mut self, name: &str) -> usize {
        if let Some(slot) = self.material_slots.iter().position(|s| s == name) {
            return slot;
        }
        self.material_slots.push(name.to_string());
        self.material_slots.len() - 1
    }

    /// Drop every face with a corner outside this fragment's arrays,
    /// recording one warning per dropped face.
    pub fn retain_valid_faces(&mut self) {
        let positions = self.positions.len();
        let uvs = self.uvs.len();
        let normals = self.normals.len();
        let source = &self.source;
        let warnings = &mut self.warnings;

        self.faces.retain(|face| {
            for corner in &face.corners {
                let checks = [
                    ("position", Some(corner.position), positions),
                    ("uv", corner.uv, uvs),
                    ("normal", corner.normal, normals),
                ];
                for (attribute, index, len) in checks {
                    if let Some(index) = index {
                        if index as usize >= len {
                            warnings.push(Warning::FaceIndexOutOfRange {
                                file: source.clone(),
                                line: face.line,
                                attribute,
                                index: index as i64,
                                len,
                            });
                            return false;
                        }
                    }
                }
            }
            true
        });
    }
}

/// Running attribute counts applied to one fragment's face indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexOffset {
    pub position: u32,
    pub uv: u32,
    pub normal: u32,
}

/// All fragments concatenated in merge order
#[derive(Debug, Clone, Default)]
pub struct MergedMesh {
    pub positions: Vec<Point3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uvs: Vec<[f32; 2]>,
    pub colors: Option<Vec<Color>>,
    pub faces: Vec<Face>,
    /// Offset applied to each fragment, in merge order
    pub offsets: Vec<IndexOffset>,
}

impl MergedMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current running offsets, i.e. what the next fragment will be shifted by.
    pub fn next_offset(&self) -> IndexOffset {
        IndexOffset {
            position: self.positions.len() as u32,
            uv: self.uvs.len() as u32,
            normal: self.normals.len() as u32,
        }
    }

    /// Append a fragment's attributes and its faces shifted by the running
    /// offsets. `material_of` maps a fragment slot to a material table index.
    pub fn append(
        &mut self,
        fragment: Fragment,
        material_of: impl Fn(usize) -> usize,
    ) -> IndexOffset {
        let offset = self.next_offset();

        let incoming = fragment.positions.len();
        if let Some(colors) = self.colors.as_mut() {
            match fragment.colors {
                Some(theirs) => colors.extend(theirs),
                None => colors.resize(colors.len() + incoming, WHITE),
            }
        } else if let Some(theirs) = fragment.colors {
            let mut colors = vec![WHITE; self.positions.len()];
            colors.extend(theirs);
            self.colors = Some(colors);
        }

        self.positions.extend(fragment.positions);
        self.normals.extend(fragment.normals);
        self.uvs.extend(fragment.uvs);

        self.faces.extend(fragment.faces.into_iter().map(|face| Face {
            corners: face.corners.into_iter().map(|c| c.shifted(&offset)).collect(),
            material: material_of(face.material),
            line: face.line,
        }));

        self.offsets.push(offset);
        offset
    }

    pub fn is_point_cloud(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.positions)
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl BoundingBox {
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self { min, max }
    }

    /// `None` for an empty point set
    pub fn from_points(points: &[Point3<f32>]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self::new(*first, *first);
        for p in &points[1..] {
            bounds.expand(p);
        }
        Some(bounds)
    }

    pub fn expand(&mut self, p: &Point3<f32>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn extents(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn max_dimension(&self) -> f32 {
        self.extents().max()
    }
}
