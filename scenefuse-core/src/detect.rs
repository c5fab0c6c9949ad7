/// Format detection for geometry inputs
use std::path::Path;

use serde::Serialize;

use crate::error::{IngestError, Result};

/// Byte layout of a PLY body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlyEncoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl PlyEncoding {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ascii" => Some(Self::Ascii),
            "binary_little_endian" => Some(Self::BinaryLittleEndian),
            "binary_big_endian" => Some(Self::BinaryBigEndian),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::BinaryLittleEndian => "binary_little_endian",
            Self::BinaryBigEndian => "binary_big_endian",
        }
    }
}

/// Decoder selected for one input, resolved once before parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "format", content = "encoding", rename_all = "snake_case")]
pub enum ModelFormat {
    Obj,
    Ply(PlyEncoding),
}

/// Classify `data` by its leading tokens, inspecting at most `lookahead` bytes.
pub fn detect_format(file: &Path, data: &[u8], lookahead: usize) -> Result<ModelFormat> {
    let window = &data[..data.len().min(lookahead)];
    let unrecognized = || IngestError::UnrecognizedFormat {
        file: file.to_path_buf(),
        lookahead,
    };

    let start = window
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .ok_or_else(unrecognized)?;
    let window = &window[start..];

    if is_ply_magic(window) {
        return detect_ply_encoding(window)
            .map(ModelFormat::Ply)
            .ok_or_else(unrecognized);
    }

    // Only complete lines count; the window may end mid-line.
    let text = String::from_utf8_lossy(window);
    let complete = match text.rfind('\n') {
        Some(end) if window.len() < data.len() - start => &text[..end],
        _ => &text[..],
    };
    for line in complete.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let keyword = line.split_whitespace().next().unwrap_or("");
        match keyword {
            "v" | "vn" | "vt" | "f" => return Ok(ModelFormat::Obj),
            "mtllib" | "usemtl" | "o" | "g" | "s" => continue,
            _ => return Err(unrecognized()),
        }
    }
    Err(unrecognized())
}

fn is_ply_magic(window: &[u8]) -> bool {
    window.starts_with(b"ply")
        && matches!(window.get(3), Some(b'\n') | Some(b'\r'))
}

/// The `format` line must follow the magic before any element declaration.
fn detect_ply_encoding(window: &[u8]) -> Option<PlyEncoding> {
    let text = String::from_utf8_lossy(window);
    for line in text.lines().skip(1) {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("comment") | Some("obj_info") | None => continue,
            Some("format") => return tokens.next().and_then(PlyEncoding::from_token),
            _ => return None,
        }
    }
    None
}
