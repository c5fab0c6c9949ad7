/// Scenefuse Core - 3D model ingestion
///
/// Turns OBJ/MTL/texture and ASCII/binary PLY exports into one normalized,
/// self-contained [`Scene`]: merged geometry, resolved materials, embedded
/// textures and a camera framing, ready for a renderer.
pub mod config;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod merge;
pub mod mtl;
pub mod normalize;
pub mod obj;
pub mod pipeline;
pub mod ply;
pub mod projection;
pub mod scene;
pub mod source;
pub mod texture;

// Re-export commonly used types
pub use config::{IngestConfig, TextureEncoding};
pub use detect::{detect_format, ModelFormat, PlyEncoding};
pub use error::{BodyPosition, IngestError, Result, Warning};
pub use geometry::{BoundingBox, Fragment, MergedMesh};
pub use normalize::Normalization;
pub use pipeline::{IngestEvent, IngestReport, Ingestor, NoProgress, ProgressSink};
pub use projection::Camera;
pub use scene::Scene;
pub use source::{FsSource, MemorySource, ModelInput, ModelSource};
