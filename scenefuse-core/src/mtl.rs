/// Wavefront MTL material libraries
///
/// MTL parsing never fails the ingestion: a malformed statement is skipped
/// with a warning and the rest of the library is kept.
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Warning;
use crate::source::parent_dir;

/// Texture map slot of a material
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureSlot {
    Diffuse,
    Ambient,
    Specular,
    Shininess,
    Bump,
    Displacement,
    Alpha,
    Normal,
}

impl TextureSlot {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "map_kd" => Some(Self::Diffuse),
            "map_ka" => Some(Self::Ambient),
            "map_ks" => Some(Self::Specular),
            "map_ns" => Some(Self::Shininess),
            "map_bump" | "bump" => Some(Self::Bump),
            "disp" => Some(Self::Displacement),
            "map_d" => Some(Self::Alpha),
            "norm" => Some(Self::Normal),
            _ => None,
        }
    }
}

/// A texture statement: the path as written plus the sampling options kept
/// for the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRef {
    pub slot: TextureSlot,
    /// Relative to the owning library's directory, `/`-separated
    pub reference: String,
    pub clamp: bool,
    pub bump_multiplier: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub ambient: Option<[f32; 3]>,
    pub diffuse: Option<[f32; 3]>,
    pub specular: Option<[f32; 3]>,
    pub emissive: Option<[f32; 3]>,
    pub shininess: Option<f32>,
    pub optical_density: Option<f32>,
    pub illumination: Option<u32>,
    pub opacity: f32,
    pub textures: Vec<TextureRef>,
    /// Directory texture references resolve against
    pub library_dir: PathBuf,
}

impl Material {
    pub fn new(name: impl Into<String>, library_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            ambient: None,
            diffuse: None,
            specular: None,
            emissive: None,
            shininess: None,
            optical_density: None,
            illumination: None,
            opacity: 1.0,
            textures: Vec::new(),
            library_dir: library_dir.into(),
        }
    }

    /// Neutral grey used for faces without a resolvable material
    pub fn fallback() -> Self {
        Self {
            diffuse: Some([0.8, 0.8, 0.8]),
            ..Self::new(MaterialTable::DEFAULT_NAME, PathBuf::new())
        }
    }
}

/// One parsed `.mtl` file
#[derive(Debug, Clone, Default)]
pub struct MaterialLibrary {
    pub source: PathBuf,
    pub materials: Vec<Material>,
    pub warnings: Vec<Warning>,
}

pub fn parse_mtl(file: &Path, data: &[u8]) -> MaterialLibrary {
    let text = String::from_utf8_lossy(data);
    let dir = parent_dir(file);
    let mut library = MaterialLibrary {
        source: file.to_path_buf(),
        ..Default::default()
    };
    let mut current: Option<MaterialBuilder> = None;

    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim().trim_start_matches('\u{feff}');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (keyword, args) = line
            .split_once(char::is_whitespace)
            .map(|(k, a)| (k, a.trim()))
            .unwrap_or((line, ""));

        if keyword == "newmtl" {
            if let Some(done) = current.take() {
                library.materials.push(done.finish());
            }
            let name = if args.is_empty() { "unnamed" } else { args };
            current = Some(MaterialBuilder::new(Material::new(name, dir.clone())));
            continue;
        }

        let Some(builder) = current.as_mut() else {
            // Statements before the first newmtl have no owner.
            continue;
        };
        if let Err(reason) = builder.statement(keyword, args) {
            warn!("{:?}:{}: {}", file, i + 1, reason);
            library.warnings.push(Warning::MtlLineSkipped {
                file: file.to_path_buf(),
                line: i + 1,
                reason,
            });
        }
    }
    if let Some(done) = current.take() {
        library.materials.push(done.finish());
    }

    debug!("Parsed MTL {:?}: {} materials", file, library.materials.len());
    library
}

struct MaterialBuilder {
    material: Material,
    transparency: Option<f32>,
    dissolve_set: bool,
}

impl MaterialBuilder {
    fn new(material: Material) -> Self {
        Self {
            material,
            transparency: None,
            dissolve_set: false,
        }
    }

    fn finish(mut self) -> Material {
        if let (false, Some(tr)) = (self.dissolve_set, self.transparency) {
            self.material.opacity = (1.0 - tr).clamp(0.0, 1.0);
        }
        self.material
    }

    fn statement(&mut self, keyword: &str, args: &str) -> Result<(), String> {
        if let Some(slot) = TextureSlot::from_keyword(keyword) {
            let texture = parse_texture_statement(slot, args)?;
            self.material.textures.push(texture);
            return Ok(());
        }

        let m = &mut self.material;
        match keyword.to_ascii_lowercase().as_str() {
            "ka" => m.ambient = Some(parse_color(args)?),
            "kd" => m.diffuse = Some(parse_color(args)?),
            "ks" => m.specular = Some(parse_color(args)?),
            "ke" => m.emissive = Some(parse_color(args)?),
            "ns" => m.shininess = Some(parse_scalar(args)?),
            "ni" => m.optical_density = Some(parse_scalar(args)?),
            "d" => {
                // `d -halo 0.5` is legal; the factor is the last token.
                let value = args.split_whitespace().last().unwrap_or("");
                m.opacity = parse_scalar(value)?.clamp(0.0, 1.0);
                self.dissolve_set = true;
            }
            "tr" => self.transparency = Some(parse_scalar(args)?),
            "illum" => {
                m.illumination = Some(
                    args.parse::<u32>()
                        .map_err(|_| format!("expected illumination model, found '{}'", args))?,
                )
            }
            _ => debug!("ignoring MTL statement '{}'", keyword),
        }
        Ok(())
    }
}

fn parse_scalar(token: &str) -> Result<f32, String> {
    match token.trim().parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(format!("expected a number, found '{}'", token.trim())),
    }
}

fn parse_color(args: &str) -> Result<[f32; 3], String> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    match tokens.as_slice() {
        // `Ka spectral file.rfl` and `Ka xyz ...` are not supported.
        [first, ..] if first.starts_with(|c: char| c.is_ascii_alphabetic()) => {
            Err(format!("unsupported color form '{}'", first))
        }
        [r] => {
            let r = parse_scalar(r)?;
            Ok([r, r, r])
        }
        [r, g, b, ..] => Ok([parse_scalar(r)?, parse_scalar(g)?, parse_scalar(b)?]),
        _ => Err(format!("expected an RGB color, found '{}'", args)),
    }
}

/// Number of arguments taken by each texture option; `-o`, `-s` and `-t`
/// take one to three numbers.
fn option_arity(flag: &str) -> Option<(usize, usize)> {
    match flag {
        "-blendu" | "-blendv" | "-bm" | "-boost" | "-cc" | "-clamp" | "-imfchan" | "-texres"
        | "-type" => Some((1, 1)),
        "-mm" => Some((2, 2)),
        "-o" | "-s" | "-t" => Some((1, 3)),
        _ => None,
    }
}

fn parse_texture_statement(slot: TextureSlot, args: &str) -> Result<TextureRef, String> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let mut texture = TextureRef {
        slot,
        reference: String::new(),
        clamp: false,
        bump_multiplier: None,
    };

    let mut i = 0;
    while i < tokens.len() && tokens[i].starts_with('-') && tokens[i].len() > 1 {
        let flag = tokens[i];
        i += 1;
        let Some((min, max)) = option_arity(flag) else {
            continue;
        };
        let mut taken = Vec::new();
        while taken.len() < max && i < tokens.len() {
            let is_number = tokens[i].parse::<f32>().is_ok();
            if taken.len() >= min && !is_number {
                break;
            }
            taken.push(tokens[i]);
            i += 1;
        }
        if taken.len() < min {
            return Err(format!("option '{}' is missing its value", flag));
        }
        match flag {
            "-clamp" => texture.clamp = taken[0].eq_ignore_ascii_case("on"),
            "-bm" => texture.bump_multiplier = Some(parse_scalar(taken[0])?),
            _ => {}
        }
    }

    let path = tokens[i..].join(" ");
    if path.is_empty() {
        return Err("texture statement without a path".to_string());
    }
    texture.reference = path.replace('\\', "/");
    Ok(texture)
}

/// Materials available to faces. Index 0 is always the fallback material.
#[derive(Debug, Clone)]
pub struct MaterialTable {
    materials: Vec<Material>,
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialTable {
    pub const DEFAULT_INDEX: usize = 0;
    pub const DEFAULT_NAME: &'static str = "default";

    pub fn new() -> Self {
        Self {
            materials: vec![Material::fallback()],
        }
    }

    /// Add a library's materials; a name already in the table keeps its
    /// first definition.
    pub fn extend_library(&mut self, library: &MaterialLibrary) {
        for material in &library.materials {
            if self.index_of(&material.name).is_some() {
                debug!(
                    "Material '{}' in {:?} already defined, keeping first",
                    material.name, library.source
                );
                continue;
            }
            self.materials.push(material.clone());
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.materials.iter().skip(1).position(|m| m.name == name).map(|i| i + 1)
    }

    pub fn get(&self, index: usize) -> Option<&Material> {
        self.materials.get(index)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Material> {
        self.materials.iter()
    }
}
