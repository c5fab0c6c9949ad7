/// Scene assembly and the output contract
///
/// A [`Scene`] is the only artifact handed to the renderer and to the
/// packaging stage. It owns every byte it refers to and is never mutated
/// after assembly.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Warning;
use crate::geometry::{FaceCorner, MergedMesh};
use crate::mtl::{MaterialTable, TextureSlot};
use crate::normalize::Normalization;
use crate::projection::CameraParameters;
use crate::texture::{TextureBinding, TextureBlob};

/// A run of triangles sharing one material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrawGroup {
    pub material: usize,
    /// First entry in the index array
    pub start: u32,
    /// Number of index entries
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneTexture {
    pub slot: TextureSlot,
    /// Key into [`Scene::textures`]
    pub key: String,
    pub clamp: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bump_multiplier: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingTexture {
    pub slot: TextureSlot,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneMaterial {
    pub name: String,
    pub ambient: Option<[f32; 3]>,
    pub diffuse: Option<[f32; 3]>,
    pub specular: Option<[f32; 3]>,
    pub emissive: Option<[f32; 3]>,
    pub shininess: Option<f32>,
    pub optical_density: Option<f32>,
    pub illumination: Option<u32>,
    pub opacity: f32,
    pub textures: Vec<SceneTexture>,
    /// References that did not resolve; the material renders without them
    pub missing_textures: Vec<MissingTexture>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SceneStats {
    pub fragments: usize,
    pub source_positions: usize,
    pub source_normals: usize,
    pub source_uvs: usize,
    pub vertices: usize,
    pub faces: usize,
    pub triangles: usize,
    pub groups: usize,
    pub objects: usize,
    pub materials: usize,
    pub textures: usize,
}

/// Renderer-ready scene. Attribute arrays are flat and parallel: vertex `i`
/// is `positions[3i..3i+3]`, `normals[3i..3i+3]`, `uvs[2i..2i+2]`,
/// `colors[4i..4i+4]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    pub positions: Vec<f32>,
    /// Empty unless every vertex carries a normal
    pub normals: Vec<f32>,
    /// Empty unless some vertex carries a UV; the rest get (0, 0)
    pub uvs: Vec<f32>,
    pub colors: Option<Vec<f32>>,
    /// Triangle list; `None` for point clouds
    pub indices: Option<Vec<u32>>,
    pub groups: Vec<DrawGroup>,
    pub materials: Vec<SceneMaterial>,
    pub textures: BTreeMap<String, TextureBlob>,
    pub normalization: Normalization,
    pub camera: CameraParameters,
    pub stats: SceneStats,
}

impl Scene {
    pub fn is_point_cloud(&self) -> bool {
        self.indices.is_none()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// JSON safe to place verbatim inside an HTML `<script>` element.
    pub fn to_embedded_json(&self) -> serde_json::Result<String> {
        Ok(escape_for_embedding(&self.to_json()?))
    }
}

/// `<`, `>` and `&` only occur inside JSON strings, where `\u` escapes are
/// equivalent. U+2028/U+2029 are line terminators in script contexts.
fn escape_for_embedding(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// Everything the assembler combines. `mesh` positions are already
/// normalized.
pub struct SceneParts<'a> {
    pub mesh: MergedMesh,
    pub materials: &'a MaterialTable,
    /// Parallel to `materials`
    pub bindings: Vec<Vec<TextureBinding>>,
    pub textures: BTreeMap<String, TextureBlob>,
    pub normalization: Normalization,
    pub camera: CameraParameters,
    pub fragments: usize,
    pub groups: usize,
    pub objects: usize,
}

/// Flatten the mesh into one vertex stream, bind materials and textures,
/// and record any dangling reference as a warning.
pub fn assemble(parts: SceneParts<'_>) -> (Scene, Vec<Warning>) {
    let SceneParts {
        mesh,
        materials: table,
        mut bindings,
        textures,
        normalization,
        camera,
        fragments,
        groups,
        objects,
    } = parts;
    let mut warnings = Vec::new();

    bindings.resize_with(table.len(), Vec::new);
    let materials: Vec<SceneMaterial> = table
        .iter()
        .zip(bindings)
        .map(|(material, bindings)| {
            let mut resolved = Vec::new();
            let mut missing = Vec::new();
            for binding in bindings {
                match binding.key {
                    Some(key) if textures.contains_key(&key) => resolved.push(SceneTexture {
                        slot: binding.slot,
                        key,
                        clamp: binding.clamp,
                        bump_multiplier: binding.bump_multiplier,
                    }),
                    _ => missing.push(MissingTexture {
                        slot: binding.slot,
                        reference: binding.reference,
                    }),
                }
            }
            SceneMaterial {
                name: material.name.clone(),
                ambient: material.ambient,
                diffuse: material.diffuse,
                specular: material.specular,
                emissive: material.emissive,
                shininess: material.shininess,
                optical_density: material.optical_density,
                illumination: material.illumination,
                opacity: material.opacity,
                textures: resolved,
                missing_textures: missing,
            }
        })
        .collect();

    let mut stream = VertexStream::new(&mesh);
    let (indices, draw_groups) = if mesh.is_point_cloud() {
        // Per-point attributes only carry over when every point has one.
        let has_uv = mesh.uvs.len() == mesh.positions.len();
        let has_normal = mesh.normals.len() == mesh.positions.len();
        for i in 0..mesh.positions.len() as u32 {
            stream.vertex(FaceCorner::new(
                i,
                has_uv.then_some(i),
                has_normal.then_some(i),
            ));
        }
        (None, Vec::new())
    } else {
        let mut unresolved = BTreeSet::new();
        let mut by_material: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
        for face in &mesh.faces {
            let material = if face.material < materials.len() {
                face.material
            } else {
                if unresolved.insert(face.material) {
                    warn!("Material index {} unresolved, using default", face.material);
                    warnings.push(Warning::MaterialIndexUnresolved {
                        index: face.material,
                    });
                }
                MaterialTable::DEFAULT_INDEX
            };
            let run = by_material.entry(material).or_default();
            let first = stream.vertex(face.corners[0]);
            for pair in face.corners[1..].windows(2) {
                let b = stream.vertex(pair[0]);
                let c = stream.vertex(pair[1]);
                run.extend_from_slice(&[first, b, c]);
            }
        }

        let mut indices = Vec::new();
        let mut draw_groups = Vec::with_capacity(by_material.len());
        for (material, run) in by_material {
            draw_groups.push(DrawGroup {
                material,
                start: indices.len() as u32,
                count: run.len() as u32,
            });
            indices.extend(run);
        }
        (Some(indices), draw_groups)
    };

    let triangles = indices.as_ref().map_or(0, |i| i.len() / 3);
    let stats = SceneStats {
        fragments,
        source_positions: mesh.positions.len(),
        source_normals: mesh.normals.len(),
        source_uvs: mesh.uvs.len(),
        vertices: stream.len(),
        faces: mesh.faces.len(),
        triangles,
        groups,
        objects,
        materials: materials.len(),
        textures: textures.len(),
    };
    let attributes = stream.finish();

    info!(
        "Assembled scene: {} vertices, {} triangles, {} materials, {} textures",
        stats.vertices, stats.triangles, stats.materials, stats.textures
    );

    let scene = Scene {
        positions: attributes.positions,
        normals: attributes.normals,
        uvs: attributes.uvs,
        colors: attributes.colors,
        indices,
        groups: draw_groups,
        materials,
        textures,
        normalization,
        camera,
        stats,
    };
    (scene, warnings)
}

struct Attributes {
    positions: Vec<f32>,
    normals: Vec<f32>,
    uvs: Vec<f32>,
    colors: Option<Vec<f32>>,
}

/// One output vertex per distinct corner triple. Corners come from the
/// merged index space, so vertices of different fragments never coincide.
struct VertexStream<'m> {
    mesh: &'m MergedMesh,
    lookup: HashMap<FaceCorner, u32>,
    corners: Vec<FaceCorner>,
}

impl<'m> VertexStream<'m> {
    fn new(mesh: &'m MergedMesh) -> Self {
        Self {
            mesh,
            lookup: HashMap::new(),
            corners: Vec::new(),
        }
    }

    fn vertex(&mut self, corner: FaceCorner) -> u32 {
        let next = self.corners.len() as u32;
        let index = *self.lookup.entry(corner).or_insert(next);
        if index == next {
            self.corners.push(corner);
        }
        index
    }

    fn len(&self) -> usize {
        self.corners.len()
    }

    fn finish(self) -> Attributes {
        let mesh = self.mesh;
        let n = self.corners.len();
        let mut positions = Vec::with_capacity(n * 3);
        for c in &self.corners {
            positions.extend_from_slice(mesh.positions[c.position as usize].coords.as_slice());
        }

        let all_normals = n > 0 && self.corners.iter().all(|c| c.normal.is_some());
        let mut normals = Vec::new();
        if all_normals {
            normals.reserve(n * 3);
            for c in &self.corners {
                let normal = c.normal.map(|i| mesh.normals[i as usize]).unwrap_or_default();
                normals.extend_from_slice(normal.as_slice());
            }
        }

        let any_uv = self.corners.iter().any(|c| c.uv.is_some());
        let mut uvs = Vec::new();
        if any_uv {
            uvs.reserve(n * 2);
            for c in &self.corners {
                uvs.extend_from_slice(&c.uv.map(|i| mesh.uvs[i as usize]).unwrap_or([0.0, 0.0]));
            }
        }

        let colors = mesh.colors.as_ref().map(|colors| {
            let mut out = Vec::with_capacity(n * 4);
            for c in &self.corners {
                out.extend_from_slice(&colors[c.position as usize]);
            }
            out
        });

        Attributes {
            positions,
            normals,
            uvs,
            colors,
        }
    }
}
