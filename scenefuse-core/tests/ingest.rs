use std::io::Cursor;
use std::path::{Path, PathBuf};

use scenefuse_core::merge::merge_fragments;
use scenefuse_core::mtl::MaterialTable;
use scenefuse_core::obj::parse_obj;
use scenefuse_core::{
    BodyPosition, IngestConfig, IngestError, Ingestor, MemorySource, ModelInput, NoProgress, Scene,
    Warning,
};

const FRAGMENT_A: &str = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3\nf 1 3 4\n";
const FRAGMENT_B: &str = "v 0 0 1\nv 1 0 1\nv 1 1 1\nf 1 2 3\n";

fn ingest(source: MemorySource, input: ModelInput) -> scenefuse_core::Result<scenefuse_core::IngestReport> {
    Ingestor::new(IngestConfig::default(), source)?.ingest(&input, &NoProgress)
}

fn ingest_path(source: MemorySource, path: &str) -> scenefuse_core::Result<scenefuse_core::IngestReport> {
    Ingestor::new(IngestConfig::default(), source)?.ingest_path(Path::new(path), &NoProgress)
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([120, 80, 40]));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .unwrap();
    cursor.into_inner()
}

fn position(scene: &Scene, vertex: u32) -> [f32; 3] {
    let i = vertex as usize * 3;
    [scene.positions[i], scene.positions[i + 1], scene.positions[i + 2]]
}

#[test]
fn test_single_fragment_has_zero_offset() {
    let fragment = parse_obj(Path::new("a.obj"), FRAGMENT_A.as_bytes()).unwrap();
    let merged = merge_fragments(vec![fragment], &MaterialTable::new());
    assert_eq!(merged.mesh.offsets[0].position, 0);
    let first: Vec<u32> = merged.mesh.faces[0].corners.iter().map(|c| c.position).collect();
    assert_eq!(first, vec![0, 1, 2]);
}

#[test]
fn test_second_fragment_indices_are_shifted_by_first_vertex_count() {
    let a = parse_obj(Path::new("a.obj"), FRAGMENT_A.as_bytes()).unwrap();
    let b = parse_obj(Path::new("b.obj"), FRAGMENT_B.as_bytes()).unwrap();
    let merged = merge_fragments(vec![a, b], &MaterialTable::new());
    // 1-based "1 2 3" in B becomes 0-based 4 5 6 globally (1-based 5 6 7).
    let from_b: Vec<u32> = merged.mesh.faces[2].corners.iter().map(|c| c.position).collect();
    assert_eq!(from_b, vec![4, 5, 6]);
}

#[test]
fn test_directory_fragments_merge_in_name_order() {
    let source = MemorySource::new()
        .with_file("model/b.obj", FRAGMENT_B)
        .with_file("model/a.obj", FRAGMENT_A);
    let report = ingest_path(source, "model").unwrap();
    let scene = &report.scene;

    assert_eq!(scene.stats.fragments, 2);
    assert_eq!(scene.stats.source_positions, 7);
    assert_eq!(scene.vertex_count(), 7);
    let indices = scene.indices.as_ref().unwrap();
    assert_eq!(indices.len(), 9);

    // The last triangle comes from b.obj and lies on the z = max plane.
    let last = &indices[6..9];
    let z_max = position(scene, indices[6])[2];
    for &v in last {
        assert!((position(scene, v)[2] - z_max).abs() < 1e-6);
    }
    assert!(z_max > 0.0);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_unit_cube_normalizes_to_target_size() {
    let mut obj = String::new();
    for x in [-0.5, 0.5] {
        for y in [-0.5, 0.5] {
            for z in [-0.5, 0.5] {
                obj.push_str(&format!("v {} {} {}\n", x, y, z));
            }
        }
    }
    obj.push_str("f 1 2 4 3\nf 5 6 8 7\n");
    let source = MemorySource::new().with_file("cube.obj", obj);
    let report = ingest(source, ModelInput::new(vec![PathBuf::from("cube.obj")])).unwrap();

    let n = report.scene.normalization;
    assert!((n.scale - 5.0).abs() < 1e-6);
    assert_eq!(n.center, [0.0, 0.0, 0.0]);
    for p in report.scene.positions.iter() {
        assert!((p.abs() - 2.5).abs() < 1e-6);
    }
}

#[test]
fn test_single_point_cloud_scale_is_one() {
    let ply = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\n\
               property float z\nend_header\n4 5 6\n";
    let source = MemorySource::new().with_file("point.ply", ply);
    let report = ingest(source, ModelInput::new(vec![PathBuf::from("point.ply")])).unwrap();
    let scene = &report.scene;
    assert_eq!(scene.normalization.scale, 1.0);
    assert!(scene.normalization.camera_distance.is_finite());
    assert!(scene.is_point_cloud());
    assert_eq!(scene.positions, vec![0.0, 0.0, 0.0]);
}

fn cloud_points() -> Vec<([f32; 3], [u8; 3])> {
    vec![
        ([0.25, -1.5, 3.0], [255, 0, 0]),
        ([1.75, 0.3, -2.0], [0, 128, 0]),
        ([-0.6, 2.2, 0.1], [10, 20, 255]),
        ([0.0, 0.0, 0.0], [255, 255, 255]),
    ]
}

fn ascii_cloud() -> String {
    let mut ply = String::from(
        "ply\nformat ascii 1.0\nelement vertex 4\nproperty float x\nproperty float y\n\
         property float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n",
    );
    for (p, c) in cloud_points() {
        ply.push_str(&format!("{} {} {} {} {} {}\n", p[0], p[1], p[2], c[0], c[1], c[2]));
    }
    ply
}

fn binary_cloud() -> Vec<u8> {
    let mut ply = b"ply\nformat binary_little_endian 1.0\nelement vertex 4\nproperty float x\n\
property float y\nproperty float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\n\
end_header\n"
        .to_vec();
    for (p, c) in cloud_points() {
        for v in p {
            ply.extend_from_slice(&v.to_le_bytes());
        }
        ply.extend_from_slice(&c);
    }
    ply
}

#[test]
fn test_ascii_and_binary_ply_produce_equal_scenes() {
    let source = MemorySource::new()
        .with_file("ascii.ply", ascii_cloud())
        .with_file("binary.ply", binary_cloud());
    let ascii = ingest(source.clone(), ModelInput::new(vec![PathBuf::from("ascii.ply")])).unwrap();
    let binary = ingest(source, ModelInput::new(vec![PathBuf::from("binary.ply")])).unwrap();

    let (a, b) = (&ascii.scene, &binary.scene);
    assert_eq!(a.positions.len(), b.positions.len());
    for (x, y) in a.positions.iter().zip(&b.positions) {
        assert!((x - y).abs() < 1e-5);
    }
    let (ac, bc) = (a.colors.as_ref().unwrap(), b.colors.as_ref().unwrap());
    assert_eq!(ac.len(), 16);
    for (x, y) in ac.iter().zip(bc) {
        assert!((x - y).abs() < 1e-5);
    }
    assert!((a.normalization.scale - b.normalization.scale).abs() < 1e-5);
}

#[test]
fn test_point_cloud_keeps_normals_and_uvs() {
    let ply = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\n\
               property float z\nproperty float nx\nproperty float ny\nproperty float nz\n\
               property float u\nproperty float v\nend_header\n\
               0 0 0 0 0 1 0.25 0.5\n2 0 0 1 0 0 0.75 1\n";
    let source = MemorySource::new().with_file("oriented.ply", ply);
    let report = ingest(source, ModelInput::new(vec![PathBuf::from("oriented.ply")])).unwrap();
    let scene = &report.scene;
    assert!(scene.is_point_cloud());
    assert_eq!(scene.vertex_count(), 2);
    assert_eq!(scene.normals, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
    assert_eq!(scene.uvs, vec![0.25, 0.5, 0.75, 1.0]);
    assert_eq!(scene.stats.source_normals, 2);
}

#[test]
fn test_non_finite_binary_position_is_fatal() {
    let mut ply = binary_cloud();
    let start = ply.len() - 4 * 15;
    ply[start..start + 4].copy_from_slice(&f32::NAN.to_le_bytes());
    let source = MemorySource::new()
        .with_file("ok.ply", ascii_cloud())
        .with_file("nan.ply", ply);
    let input = ModelInput::new(vec![PathBuf::from("ok.ply"), PathBuf::from("nan.ply")]);
    match ingest(source, input) {
        Err(IngestError::PlyParse { file, at, .. }) => {
            assert_eq!(file, PathBuf::from("nan.ply"));
            assert_eq!(at, BodyPosition::Offset(start));
        }
        other => panic!("expected PlyParse, got: {:?}", other.map(|r| r.warnings)),
    }
}

#[test]
fn test_missing_texture_yields_one_warning_and_a_scene() {
    let source = MemorySource::new()
        .with_file(
            "model/model.obj",
            "mtllib model.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\n\
             usemtl wood\nf 1/1 2/2 3/3\nusemtl oak\nf 1/1 2/2 3/3\n",
        )
        .with_file(
            "model/model.mtl",
            "newmtl wood\nKd 0.6 0.4 0.2\nmap_Kd textures/missing.png\n\
             newmtl oak\nKd 0.5 0.3 0.1\nmap_Kd textures/missing.png\n",
        );
    let report = ingest_path(source, "model/model.obj").unwrap();

    let missing: Vec<&Warning> = report
        .warnings
        .iter()
        .filter(|w| matches!(w, Warning::TextureMissing { .. }))
        .collect();
    assert_eq!(missing.len(), 1);
    match missing[0] {
        Warning::TextureMissing { path, .. } => {
            assert_eq!(path, &PathBuf::from("model/textures/missing.png"))
        }
        _ => unreachable!(),
    }

    let scene = &report.scene;
    assert!(scene.textures.is_empty());
    let wood = scene.materials.iter().find(|m| m.name == "wood").unwrap();
    assert_eq!(wood.missing_textures.len(), 1);
    assert_eq!(wood.diffuse, Some([0.6, 0.4, 0.2]));
    assert_eq!(scene.groups.len(), 2);
}

#[test]
fn test_shared_texture_is_embedded_once() {
    let source = MemorySource::new()
        .with_file(
            "model/model.obj",
            "mtllib model.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\n\
             usemtl a\nf 1/1 2/2 3/3\nusemtl b\nf 3/3 2/2 1/1\n",
        )
        .with_file(
            "model/model.mtl",
            "newmtl a\nmap_Kd maps\\bark.png\nnewmtl b\nmap_Kd -clamp on maps/bark.png\n",
        )
        .with_file("model/maps/bark.png", png_bytes());
    let report = ingest_path(source, "model").unwrap();
    let scene = &report.scene;

    assert!(report.warnings.is_empty());
    assert_eq!(scene.textures.len(), 1);
    let key = "model/maps/bark.png";
    let blob = &scene.textures[key];
    assert_eq!((blob.width, blob.height), (4, 4));
    for name in ["a", "b"] {
        let material = scene.materials.iter().find(|m| m.name == name).unwrap();
        assert_eq!(material.textures[0].key, key);
    }
    let b = scene.materials.iter().find(|m| m.name == "b").unwrap();
    assert!(b.textures[0].clamp);

    let json = scene.to_embedded_json().unwrap();
    assert!(json.contains("data:image/png;base64,"));
    assert!(!json.contains('<'));
}

#[test]
fn test_missing_end_header_is_fatal() {
    let ply = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\n\
               property float z\n1 2 3\n";
    let source = MemorySource::new().with_file("broken.ply", ply);
    let result = ingest(source, ModelInput::new(vec![PathBuf::from("broken.ply")]));
    assert!(matches!(result, Err(IngestError::PlyHeader { .. })));
}

#[test]
fn test_corrupt_fragment_fails_whole_ingestion() {
    let source = MemorySource::new()
        .with_file("m/a.obj", FRAGMENT_A)
        .with_file("m/b.obj", "v 0 0 0\nv 1 0 0\nv 1 1x 0\nf 1 2 3\n");
    match ingest_path(source, "m") {
        Err(IngestError::ObjParse { file, line, found, .. }) => {
            assert_eq!(file, PathBuf::from("m/b.obj"));
            assert_eq!(line, 3);
            assert_eq!(found, "1x");
        }
        other => panic!("expected ObjParse, got: {:?}", other.map(|r| r.warnings)),
    }
}

#[test]
fn test_unrecognized_input() {
    let source = MemorySource::new().with_file("model.stl", "solid cube\nendsolid cube\n");
    let result = ingest(source, ModelInput::new(vec![PathBuf::from("model.stl")]));
    assert!(matches!(result, Err(IngestError::UnrecognizedFormat { .. })));
}

#[test]
fn test_no_vertices_is_fatal() {
    let source = MemorySource::new().with_file("empty.obj", "o nothing\nf 1 2 3\n");
    let result = ingest(source, ModelInput::new(vec![PathBuf::from("empty.obj")]));
    assert!(matches!(result, Err(IngestError::EmptyGeometry { .. })));
}
