/// Input contract: where geometry, material and texture bytes come from
///
/// Files are addressed by path. [`FsSource`] reads the local filesystem,
/// [`MemorySource`] serves byte buffers registered under paths, which is how
/// callers that already hold the data (and the tests) feed the pipeline.
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{IngestError, Result};

/// Read access to model files.
pub trait ModelSource: Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Entries directly inside `dir`, in no particular order.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSource;

impl ModelSource for FsSource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            entries.push(entry?.path());
        }
        Ok(entries)
    }
}

/// In-memory byte buffers keyed by normalized path
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) {
        self.files.insert(normalize_path(path.as_ref()), data.into());
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(path, data);
        self
    }
}

impl ModelSource for MemorySource {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let dir = normalize_path(path);
        self.files.keys().any(|p| p.starts_with(&dir) && *p != dir)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let dir = normalize_path(dir);
        Ok(self
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir.as_path()))
            .cloned()
            .collect())
    }
}

/// Lexically resolve `.` and `..` components without touching the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Turn a reference written inside a model file into a relative path,
/// accepting either separator.
pub fn reference_path(raw: &str) -> PathBuf {
    let unified = raw.trim().replace('\\', "/");
    let mut out = PathBuf::new();
    for part in unified.split('/').filter(|p| !p.is_empty()) {
        out.push(part);
    }
    if unified.starts_with('/') {
        return Path::new("/").join(out);
    }
    out
}

/// Stable string key for a resolved path, always with `/` separators.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// The files making up one model
#[derive(Debug, Clone, Default)]
pub struct ModelInput {
    /// Geometry files in merge order. For OBJ input every entry is a fragment.
    pub geometry: Vec<PathBuf>,
    /// Material library supplied by the caller in addition to `mtllib` references
    pub mtl: Option<PathBuf>,
}

impl ModelInput {
    /// Caller-specified fragment order
    pub fn new(geometry: Vec<PathBuf>) -> Self {
        Self {
            geometry,
            mtl: None,
        }
    }

    pub fn with_mtl(mut self, mtl: impl Into<PathBuf>) -> Self {
        self.mtl = Some(mtl.into());
        self
    }

    /// Find the model files for a path: a single `.obj`/`.ply` file, or a
    /// directory whose `.obj` files (sorted by name) are the fragments.
    pub fn discover(source: &dyn ModelSource, path: &Path) -> Result<Self> {
        if source.is_dir(path) {
            let mut entries = source
                .list_dir(path)
                .map_err(|e| IngestError::io(path, e))?;
            entries.sort();

            let objs: Vec<PathBuf> = entries
                .iter()
                .filter(|p| has_extension(p, "obj"))
                .cloned()
                .collect();
            if !objs.is_empty() {
                let mtl = find_mtl(&entries, &objs[0]);
                debug!("Discovered {} OBJ fragment(s) in {:?}", objs.len(), path);
                return Ok(Self { geometry: objs, mtl });
            }

            if let Some(ply) = entries.iter().find(|p| has_extension(p, "ply")) {
                return Ok(Self::new(vec![ply.clone()]));
            }

            return Err(IngestError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "no .obj or .ply files"),
            ));
        }

        if !source.exists(path) {
            return Err(IngestError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "input not found"),
            ));
        }

        let mut input = Self::new(vec![path.to_path_buf()]);
        if has_extension(path, "obj") {
            let mut siblings = source.list_dir(&parent_dir(path)).unwrap_or_default();
            siblings.sort();
            input.mtl = find_mtl(&siblings, path);
        }
        Ok(input)
    }
}

/// Same-named `.mtl` first, then any `.mtl` next to it.
fn find_mtl(entries: &[PathBuf], obj: &Path) -> Option<PathBuf> {
    let same_name = obj.with_extension("mtl");
    if entries.iter().any(|p| normalize_path(p) == normalize_path(&same_name)) {
        return Some(same_name);
    }
    entries.iter().find(|p| has_extension(p, "mtl")).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("models/./tex/../a.png")),
            PathBuf::from("models/a.png")
        );
        assert_eq!(normalize_path(Path::new("../a.png")), PathBuf::from("../a.png"));
    }

    #[test]
    fn test_reference_path_accepts_backslashes() {
        assert_eq!(
            reference_path("textures\\wall.jpg"),
            PathBuf::from("textures").join("wall.jpg")
        );
        assert_eq!(reference_path("  a//b.png "), PathBuf::from("a").join("b.png"));
    }

    #[test]
    fn test_memory_source_lookup_is_normalized() {
        let source = MemorySource::new().with_file("m/./a.obj", b"v 0 0 0".to_vec());
        assert!(source.exists(Path::new("m/a.obj")));
        assert!(source.is_dir(Path::new("m")));
        assert_eq!(source.read(Path::new("m/x/../a.obj")).unwrap(), b"v 0 0 0");
    }

    #[test]
    fn test_discover_directory_sorts_fragments() {
        let source = MemorySource::new()
            .with_file("model/part_b.obj", Vec::new())
            .with_file("model/part_a.obj", Vec::new())
            .with_file("model/other.mtl", Vec::new())
            .with_file("model/part_a.mtl", Vec::new())
            .with_file("model/tex.png", Vec::new());
        let input = ModelInput::discover(&source, Path::new("model")).unwrap();
        assert_eq!(
            input.geometry,
            vec![PathBuf::from("model/part_a.obj"), PathBuf::from("model/part_b.obj")]
        );
        assert_eq!(input.mtl, Some(PathBuf::from("model/part_a.mtl")));
    }

    #[test]
    fn test_discover_single_file_falls_back_to_any_mtl() {
        let source = MemorySource::new()
            .with_file("scan/mesh.obj", Vec::new())
            .with_file("scan/materials.mtl", Vec::new());
        let input = ModelInput::discover(&source, Path::new("scan/mesh.obj")).unwrap();
        assert_eq!(input.mtl, Some(PathBuf::from("scan/materials.mtl")));
    }

    #[test]
    fn test_discover_missing_input() {
        let source = MemorySource::new();
        let result = ModelInput::discover(&source, Path::new("nothing.obj"));
        assert!(matches!(result, Err(IngestError::Io { .. })));
    }
}
