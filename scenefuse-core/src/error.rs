/// Fatal ingestion errors and recoverable warnings
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Where in a PLY body a value was read: a line for ASCII bodies, an
/// absolute byte offset for binary ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPosition {
    Line(usize),
    Offset(usize),
}

impl fmt::Display for BodyPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyPosition::Line(line) => write!(f, "line {}", line),
            BodyPosition::Offset(offset) => write!(f, "byte {}", offset),
        }
    }
}

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Conditions that abort the whole ingestion. A fatal error never comes
/// with a Scene.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{file}: unrecognized format within the first {lookahead} bytes")]
    UnrecognizedFormat { file: PathBuf, lookahead: usize },

    #[error("{file}:{line}: OBJ parse error: expected {expected}, found '{found}'")]
    ObjParse {
        file: PathBuf,
        line: usize,
        expected: String,
        found: String,
    },

    #[error("{file}:{line}: PLY header error: {message}")]
    PlyHeader {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{file}: PLY body error at {at}: expected {expected}, found '{found}'")]
    PlyParse {
        file: PathBuf,
        at: BodyPosition,
        expected: String,
        found: String,
    },

    #[error(
        "{file}: PLY body truncated at byte {offset} while reading element '{element}' \
         ({read} of {declared} instances)"
    )]
    PlyTruncated {
        file: PathBuf,
        offset: usize,
        element: String,
        read: usize,
        declared: usize,
    },

    #[error("{file}: input contains no vertices")]
    EmptyGeometry { file: PathBuf },

    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{file}: skipped after a sibling job failed")]
    Cancelled { file: PathBuf },
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    /// File the error was raised for, when it concerns a single input.
    pub fn file(&self) -> Option<&std::path::Path> {
        match self {
            IngestError::UnrecognizedFormat { file, .. }
            | IngestError::ObjParse { file, .. }
            | IngestError::PlyHeader { file, .. }
            | IngestError::PlyParse { file, .. }
            | IngestError::PlyTruncated { file, .. }
            | IngestError::EmptyGeometry { file }
            | IngestError::Cancelled { file } => Some(file),
            IngestError::Io { path, .. } => Some(path),
            IngestError::Config(_) => None,
        }
    }
}

/// Recoverable conditions. Each one has already been replaced by a safe
/// default when it is reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A texture reference did not resolve to a readable file.
    TextureMissing {
        material: String,
        reference: String,
        path: PathBuf,
    },
    /// The texture file exists but could not be decoded or re-encoded.
    TextureDecodeFailed { path: PathBuf, reason: String },
    /// `usemtl` named a material no library declares; the default material is used.
    MaterialNotFound { name: String, file: PathBuf },
    /// A draw group pointed outside the material table at assembly time.
    MaterialIndexUnresolved { index: usize },
    /// A face referenced an attribute outside its fragment; the face was dropped.
    FaceIndexOutOfRange {
        file: PathBuf,
        line: usize,
        attribute: &'static str,
        index: i64,
        len: usize,
    },
    /// A face with fewer than three corners; dropped.
    DegenerateFace { file: PathBuf, line: usize },
    /// A malformed MTL statement; the line was ignored.
    MtlLineSkipped {
        file: PathBuf,
        line: usize,
        reason: String,
    },
    /// An `mtllib` reference that could not be read.
    MaterialLibraryMissing { reference: String, path: PathBuf },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::TextureMissing {
                material,
                reference,
                path,
            } => write!(
                f,
                "texture '{}' of material '{}' not found at {}",
                reference,
                material,
                path.display()
            ),
            Warning::TextureDecodeFailed { path, reason } => {
                write!(f, "texture {} could not be decoded: {}", path.display(), reason)
            }
            Warning::MaterialNotFound { name, file } => write!(
                f,
                "{}: material '{}' is not declared, using default",
                file.display(),
                name
            ),
            Warning::MaterialIndexUnresolved { index } => {
                write!(f, "material index {} unresolved, using default", index)
            }
            Warning::FaceIndexOutOfRange {
                file,
                line,
                attribute,
                index,
                len,
            } => write!(
                f,
                "{}:{}: {} index {} out of range (fragment has {}), face dropped",
                file.display(),
                line,
                attribute,
                index,
                len
            ),
            Warning::DegenerateFace { file, line } => write!(
                f,
                "{}:{}: face has fewer than 3 corners, dropped",
                file.display(),
                line
            ),
            Warning::MtlLineSkipped { file, line, reason } => {
                write!(f, "{}:{}: {}, line skipped", file.display(), line, reason)
            }
            Warning::MaterialLibraryMissing { reference, path } => write!(
                f,
                "material library '{}' not found at {}",
                reference,
                path.display()
            ),
        }
    }
}
