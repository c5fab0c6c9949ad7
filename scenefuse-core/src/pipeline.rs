/// Ingestion orchestration
///
/// Geometry files, material libraries and textures are each processed on a
/// small pool of scoped worker threads. Workers may finish in any order;
/// results are put back in input order before anything depends on it, so
/// merge offsets follow the caller's fragment order.
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::detect::{detect_format, ModelFormat};
use crate::error::{IngestError, Result, Warning};
use crate::geometry::Fragment;
use crate::merge::merge_fragments;
use crate::mtl::{parse_mtl, MaterialLibrary, MaterialTable};
use crate::normalize::Normalization;
use crate::obj::parse_obj;
use crate::ply::parse_ply;
use crate::projection::Camera;
use crate::scene::{assemble, Scene, SceneParts};
use crate::source::{normalize_path, parent_dir, reference_path, FsSource, ModelInput, ModelSource};
use crate::texture::{load_texture, plan_textures};

/// Stage completion events, in the order a consumer sees them
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    FormatDetected {
        file: PathBuf,
        format: ModelFormat,
    },
    FragmentParsed {
        file: PathBuf,
        index: usize,
        vertices: usize,
        faces: usize,
    },
    MaterialsParsed {
        file: PathBuf,
        materials: usize,
    },
    TextureResolved {
        key: String,
        width: u32,
        height: u32,
    },
    TextureMissing {
        reference: String,
        path: PathBuf,
    },
    MeshMerged {
        fragments: usize,
        vertices: usize,
        faces: usize,
    },
    Normalized {
        scale: f32,
        camera_distance: f32,
    },
    SceneAssembled {
        vertices: usize,
        triangles: usize,
        warnings: usize,
    },
}

/// Receiver of progress events. Called from the ingesting thread only.
pub trait ProgressSink {
    fn emit(&self, event: IngestEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: IngestEvent) {}
}

impl ProgressSink for mpsc::Sender<IngestEvent> {
    fn emit(&self, event: IngestEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.send(event);
    }
}

impl<F: Fn(IngestEvent)> ProgressSink for F {
    fn emit(&self, event: IngestEvent) {
        self(event)
    }
}

/// A successful ingestion: the scene plus every recoverable condition met
/// on the way, in stage order.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub scene: Scene,
    pub warnings: Vec<Warning>,
}

/// Runs `job` over `items` on up to `workers` threads. After the first
/// failure, jobs that have not started yet fail with `skipped` instead of
/// running. `on_done` sees results in completion order; the returned vector
/// is in input order.
fn run_jobs<T, R>(
    items: &[T],
    workers: usize,
    job: impl Fn(&T) -> Result<R> + Sync,
    skipped: impl Fn(&T) -> IngestError + Sync,
    mut on_done: impl FnMut(usize, &Result<R>),
) -> Vec<Result<R>>
where
    T: Sync,
    R: Send,
{
    let next = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let workers = workers.clamp(1, items.len().max(1));
    let mut slots: Vec<Option<Result<R>>> = items.iter().map(|_| None).collect();

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        for _ in 0..workers {
            let tx = tx.clone();
            let (next, failed, job, skipped) = (&next, &failed, &job, &skipped);
            scope.spawn(move || loop {
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(item) = items.get(i) else {
                    break;
                };
                let result = if failed.load(Ordering::SeqCst) {
                    Err(skipped(item))
                } else {
                    job(item)
                };
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                if tx.send((i, result)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        for (i, result) in rx {
            on_done(i, &result);
            slots[i] = Some(result);
        }
    });

    slots.into_iter().flatten().collect()
}

/// Unwrap job results, returning the first fatal error in input order.
/// Errors caused by cancellation only surface when nothing else failed.
fn collect_results<R>(results: Vec<Result<R>>) -> Result<Vec<R>> {
    let mut ok = Vec::with_capacity(results.len());
    let mut cancelled = None;
    let mut first = None;
    for result in results {
        match result {
            Ok(value) => ok.push(value),
            Err(e @ IngestError::Cancelled { .. }) => {
                cancelled.get_or_insert(e);
            }
            Err(e) => {
                first.get_or_insert(e);
            }
        }
    }
    match first.or(cancelled) {
        Some(e) => Err(e),
        None => Ok(ok),
    }
}

/// Turns model files into a [`Scene`]
pub struct Ingestor<S: ModelSource = FsSource> {
    config: IngestConfig,
    source: S,
}

impl Ingestor<FsSource> {
    /// Ingestor reading from the local filesystem
    pub fn from_fs(config: IngestConfig) -> Result<Self> {
        Self::new(config, FsSource)
    }
}

impl<S: ModelSource> Ingestor<S> {
    pub fn new(config: IngestConfig, source: S) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, source })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Discover the model files under `path` and ingest them.
    pub fn ingest_path(&self, path: &Path, progress: &dyn ProgressSink) -> Result<IngestReport> {
        let input = ModelInput::discover(&self.source, path)?;
        self.ingest(&input, progress)
    }

    /// Run every stage. Either the whole scene is produced or the first
    /// fatal error is returned; there is no partial result.
    pub fn ingest(&self, input: &ModelInput, progress: &dyn ProgressSink) -> Result<IngestReport> {
        let Some(first_file) = input.geometry.first() else {
            return Err(IngestError::EmptyGeometry {
                file: PathBuf::new(),
            });
        };
        let workers = self.config.worker_count();
        info!(
            "Ingesting {} geometry file(s) with {} worker(s)",
            input.geometry.len(),
            workers
        );
        let mut warnings = Vec::new();

        // Geometry
        let parsed = run_jobs(
            &input.geometry,
            workers,
            |path| self.parse_geometry(path),
            |path| IngestError::Cancelled { file: path.clone() },
            |index, result| {
                if let Ok((format, fragment)) = result {
                    progress.emit(IngestEvent::FormatDetected {
                        file: fragment.source.clone(),
                        format: *format,
                    });
                    progress.emit(IngestEvent::FragmentParsed {
                        file: fragment.source.clone(),
                        index,
                        vertices: fragment.positions.len(),
                        faces: fragment.faces.len(),
                    });
                }
            },
        );
        let fragments: Vec<Fragment> = collect_results(parsed)?
            .into_iter()
            .map(|(_, fragment)| fragment)
            .collect();

        // Materials
        let library_paths = self.library_paths(input, &fragments);
        let loaded = run_jobs(
            &library_paths,
            workers,
            |(reference, path)| self.load_library(reference, path),
            |(_, path)| IngestError::Cancelled { file: path.clone() },
            |_, result| {
                if let Ok(Ok(library)) = result {
                    progress.emit(IngestEvent::MaterialsParsed {
                        file: library.source.clone(),
                        materials: library.materials.len(),
                    });
                }
            },
        );
        let mut table = MaterialTable::new();
        for library in collect_results(loaded)? {
            match library {
                Ok(mut library) => {
                    table.extend_library(&library);
                    warnings.append(&mut library.warnings);
                }
                Err(missing) => warnings.push(missing),
            }
        }

        // Textures
        let mut plan = plan_textures(&self.source, &table);
        for warning in &plan.warnings {
            if let Warning::TextureMissing {
                reference, path, ..
            } = warning
            {
                progress.emit(IngestEvent::TextureMissing {
                    reference: reference.clone(),
                    path: path.clone(),
                });
            }
        }
        warnings.append(&mut plan.warnings);

        let requests: Vec<(String, PathBuf)> = plan
            .requests
            .iter()
            .map(|(key, path)| (key.clone(), path.clone()))
            .collect();
        let decoded = run_jobs(
            &requests,
            workers,
            |(key, path)| Ok(load_texture(&self.source, key, path, &self.config)),
            |(_, path)| IngestError::Cancelled { file: path.clone() },
            |_, result| {
                if let Ok(Ok(blob)) = result {
                    progress.emit(IngestEvent::TextureResolved {
                        key: blob.key.clone(),
                        width: blob.width,
                        height: blob.height,
                    });
                }
            },
        );
        let mut textures = BTreeMap::new();
        for ((key, path), result) in requests.into_iter().zip(collect_results(decoded)?) {
            match result {
                Ok(blob) => {
                    debug!("Encoded texture {} as {}", key, blob.mime_type);
                    textures.insert(key, blob);
                }
                Err(reason) => {
                    warn!("Texture {:?} could not be decoded: {}", path, reason);
                    plan.drop_texture(&key);
                    warnings.push(Warning::TextureDecodeFailed { path, reason });
                }
            }
        }

        // Merge, normalize, assemble
        let merged = merge_fragments(fragments, &table);
        let mut mesh = merged.mesh;
        warnings.extend(merged.warnings);
        progress.emit(IngestEvent::MeshMerged {
            fragments: merged.fragments,
            vertices: mesh.positions.len(),
            faces: mesh.faces.len(),
        });

        let Some(bounds) = mesh.bounds() else {
            return Err(IngestError::EmptyGeometry {
                file: first_file.clone(),
            });
        };
        let normalization = Normalization::from_bounds(&bounds, &self.config);
        normalization.apply_all(&mut mesh.positions);
        let camera = Camera::framing(&normalization, &self.config);
        info!(
            "Normalized: center {:?}, scale {}, camera distance {}",
            normalization.center, normalization.scale, normalization.camera_distance
        );
        progress.emit(IngestEvent::Normalized {
            scale: normalization.scale,
            camera_distance: normalization.camera_distance,
        });

        let (scene, mut assembly_warnings) = assemble(SceneParts {
            mesh,
            materials: &table,
            bindings: plan.bindings,
            textures,
            normalization,
            camera: camera.parameters(),
            fragments: merged.fragments,
            groups: merged.groups,
            objects: merged.objects,
        });
        warnings.append(&mut assembly_warnings);

        progress.emit(IngestEvent::SceneAssembled {
            vertices: scene.stats.vertices,
            triangles: scene.stats.triangles,
            warnings: warnings.len(),
        });
        info!(
            "Ingestion complete: {} vertices, {} warning(s)",
            scene.stats.vertices,
            warnings.len()
        );
        Ok(IngestReport { scene, warnings })
    }

    fn parse_geometry(&self, path: &Path) -> Result<(ModelFormat, Fragment)> {
        let data = self.source.read(path).map_err(|e| IngestError::io(path, e))?;
        let format = detect_format(path, &data, self.config.detect_lookahead)?;
        debug!("{:?} detected as {:?}", path, format);
        let fragment = match format {
            ModelFormat::Obj => parse_obj(path, &data)?,
            ModelFormat::Ply(_) => parse_ply(path, &data)?,
        };
        Ok((format, fragment))
    }

    /// Explicit library first, then every distinct `mtllib` in fragment order,
    /// each resolved against its declaring fragment's directory.
    fn library_paths(&self, input: &ModelInput, fragments: &[Fragment]) -> Vec<(String, PathBuf)> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        if let Some(mtl) = &input.mtl {
            let path = normalize_path(mtl);
            seen.insert(path.clone());
            paths.push((mtl.to_string_lossy().into_owned(), path));
        }
        for fragment in fragments {
            let dir = parent_dir(&fragment.source);
            for reference in &fragment.material_libraries {
                let path = normalize_path(&dir.join(reference_path(reference)));
                if seen.insert(path.clone()) {
                    paths.push((reference.clone(), path));
                }
            }
        }
        paths
    }

    /// `Ok(Err(_))` when the library does not exist.
    fn load_library(
        &self,
        reference: &str,
        path: &Path,
    ) -> Result<std::result::Result<MaterialLibrary, Warning>> {
        if !self.source.exists(path) {
            warn!("Material library '{}' not found at {:?}", reference, path);
            return Ok(Err(Warning::MaterialLibraryMissing {
                reference: reference.to_string(),
                path: path.to_path_buf(),
            }));
        }
        let data = self.source.read(path).map_err(|e| IngestError::io(path, e))?;
        Ok(Ok(parse_mtl(path, &data)))
    }
}
