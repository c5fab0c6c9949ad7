/// Wavefront OBJ fragment parser
use std::path::Path;

use nalgebra::{Point3, Vector3};
use nom::{
    character::complete::{char, i64 as index},
    combinator::{all_consuming, opt},
    sequence::{pair, preceded},
    IResult,
};
use tracing::debug;

use crate::error::{IngestError, Result, Warning};
use crate::geometry::{Face, FaceCorner, Fragment, WHITE};

/// Raw corner as written: `v`, `v/vt`, `v//vn` or `v/vt/vn`
type RawCorner = (i64, Option<i64>, Option<i64>);

fn parse_corner(input: &str) -> IResult<&str, RawCorner> {
    let (input, v) = index(input)?;
    let (input, rest) = opt(preceded(
        char('/'),
        pair(opt(index), opt(preceded(char('/'), opt(index)))),
    ))(input)?;
    let (vt, vn) = match rest {
        Some((vt, vn)) => (vt, vn.flatten()),
        None => (None, None),
    };
    Ok((input, (v, vt, vn)))
}

/// Parse one `.obj` file into a fragment with 0-based, fragment-local indices.
///
/// Malformed numbers fail the whole fragment; faces pointing outside the
/// fragment are dropped with a warning.
pub fn parse_obj(file: &Path, data: &[u8]) -> Result<Fragment> {
    let decoded = String::from_utf8_lossy(data);
    let text = decoded
        .strip_prefix('\u{feff}')
        .unwrap_or(decoded.as_ref());
    let mut parser = ObjParser::new(file);

    let mut pending = String::new();
    let mut pending_line = 0;
    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        if pending.is_empty() {
            pending_line = line_no;
        }
        if let Some(stripped) = raw.strip_suffix('\\') {
            pending.push_str(stripped);
            pending.push(' ');
            continue;
        }
        pending.push_str(raw);
        parser.statement(pending_line, pending.trim())?;
        pending.clear();
    }
    if !pending.is_empty() {
        parser.statement(pending_line, pending.trim())?;
    }

    let mut fragment = parser.fragment;
    fragment.retain_valid_faces();
    debug!(
        "Parsed OBJ {:?}: {} vertices, {} normals, {} uvs, {} faces",
        file,
        fragment.positions.len(),
        fragment.normals.len(),
        fragment.uvs.len(),
        fragment.faces.len()
    );
    Ok(fragment)
}

struct ObjParser<'a> {
    file: &'a Path,
    fragment: Fragment,
    current_material: usize,
}

impl<'a> ObjParser<'a> {
    fn new(file: &'a Path) -> Self {
        Self {
            file,
            fragment: Fragment::new(file),
            current_material: Fragment::DEFAULT_SLOT,
        }
    }

    fn error(&self, line: usize, expected: &str, found: &str) -> IngestError {
        IngestError::ObjParse {
            file: self.file.to_path_buf(),
            line,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    fn float(&self, line: usize, token: Option<&str>, statement: &str) -> Result<f32> {
        let token = token.ok_or_else(|| self.error(line, "a number", statement))?;
        match token.parse::<f32>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(self.error(line, "a finite number", token)),
        }
    }

    fn statement(&mut self, line: usize, statement: &str) -> Result<()> {
        if statement.is_empty() || statement.starts_with('#') {
            return Ok(());
        }
        let (keyword, args) = statement
            .split_once(char::is_whitespace)
            .map(|(k, a)| (k, a.trim()))
            .unwrap_or((statement, ""));

        match keyword {
            "v" => self.vertex(line, args),
            "vt" => {
                let mut it = args.split_whitespace();
                let u = self.float(line, it.next(), statement)?;
                let v = match it.next() {
                    Some(token) => self.float(line, Some(token), statement)?,
                    None => 0.0,
                };
                self.fragment.uvs.push([u, v]);
                Ok(())
            }
            "vn" => {
                let mut it = args.split_whitespace();
                let x = self.float(line, it.next(), statement)?;
                let y = self.float(line, it.next(), statement)?;
                let z = self.float(line, it.next(), statement)?;
                self.fragment.normals.push(Vector3::new(x, y, z));
                Ok(())
            }
            "f" => self.face(line, args),
            "usemtl" => {
                let name = if args.is_empty() { "default" } else { args };
                self.current_material = self.fragment.material_slot(name);
                Ok(())
            }
            "mtllib" => {
                self.library(args);
                Ok(())
            }
            "o" => {
                self.fragment.objects += 1;
                Ok(())
            }
            "g" => {
                self.fragment.groups += 1;
                Ok(())
            }
            _ => {
                debug!("{:?}:{}: ignoring '{}' statement", self.file, line, keyword);
                Ok(())
            }
        }
    }

    fn vertex(&mut self, line: usize, args: &str) -> Result<()> {
        let tokens: Vec<&str> = args.split_whitespace().collect();
        let statement = format!("v {}", args);
        if tokens.len() < 3 {
            return Err(self.error(line, "3 coordinates", &statement));
        }
        let x = self.float(line, Some(tokens[0]), &statement)?;
        let y = self.float(line, Some(tokens[1]), &statement)?;
        let z = self.float(line, Some(tokens[2]), &statement)?;
        self.fragment.positions.push(Point3::new(x, y, z));

        // `v x y z r g b` carries a vertex color; `v x y z w` does not.
        let color = if tokens.len() >= 6 {
            let r = self.float(line, Some(tokens[3]), &statement)?;
            let g = self.float(line, Some(tokens[4]), &statement)?;
            let b = self.float(line, Some(tokens[5]), &statement)?;
            Some([r, g, b, 1.0])
        } else {
            None
        };

        let count = self.fragment.positions.len();
        if let Some(colors) = self.fragment.colors.as_mut() {
            colors.push(color.unwrap_or(WHITE));
        } else if let Some(color) = color {
            let mut colors = vec![WHITE; count - 1];
            colors.push(color);
            self.fragment.colors = Some(colors);
        }
        Ok(())
    }

    fn face(&mut self, line: usize, args: &str) -> Result<()> {
        let mut raw = Vec::new();
        for token in args.split_whitespace() {
            let (_, corner) = all_consuming(parse_corner)(token)
                .map_err(|_| self.error(line, "face corner v[/vt][/vn]", token))?;
            raw.push(corner);
        }

        if raw.len() < 3 {
            self.fragment.warnings.push(Warning::DegenerateFace {
                file: self.file.to_path_buf(),
                line,
            });
            return Ok(());
        }

        let mut corners = Vec::with_capacity(raw.len());
        for (v, vt, vn) in raw {
            let len = self.fragment.positions.len();
            let Some(position) = self.resolve(line, "position", v, len)? else {
                return Ok(());
            };
            let uv = match vt {
                Some(i) => {
                    let len = self.fragment.uvs.len();
                    match self.resolve(line, "uv", i, len)? {
                        Some(uv) => Some(uv),
                        None => return Ok(()),
                    }
                }
                None => None,
            };
            let normal = match vn {
                Some(i) => {
                    let len = self.fragment.normals.len();
                    match self.resolve(line, "normal", i, len)? {
                        Some(normal) => Some(normal),
                        None => return Ok(()),
                    }
                }
                None => None,
            };
            corners.push(FaceCorner::new(position, uv, normal));
        }

        self.fragment.faces.push(Face {
            corners,
            material: self.current_material,
            line,
        });
        Ok(())
    }

    /// 1-based or negative (relative) OBJ index to a 0-based one. `Ok(None)`
    /// means a relative index reached before the start of the array; the
    /// face is dropped and a warning recorded.
    fn resolve(
        &mut self,
        line: usize,
        attribute: &'static str,
        raw: i64,
        len: usize,
    ) -> Result<Option<u32>> {
        if raw == 0 {
            return Err(self.error(line, "a non-zero index", "0"));
        }
        let absolute = if raw > 0 { raw - 1 } else { len as i64 + raw };
        if absolute < 0 || absolute > u32::MAX as i64 {
            self.fragment.warnings.push(Warning::FaceIndexOutOfRange {
                file: self.file.to_path_buf(),
                line,
                attribute,
                index: raw,
                len,
            });
            return Ok(None);
        }
        Ok(Some(absolute as u32))
    }

    fn library(&mut self, args: &str) {
        let tokens: Vec<&str> = args.split_whitespace().collect();
        let names: Vec<String> = if tokens.len() > 1
            && tokens.iter().all(|t| t.to_ascii_lowercase().ends_with(".mtl"))
        {
            tokens.iter().map(|t| t.to_string()).collect()
        } else if args.is_empty() {
            Vec::new()
        } else {
            vec![args.to_string()]
        };
        for name in names {
            if !self.fragment.material_libraries.contains(&name) {
                self.fragment.material_libraries.push(name);
            }
        }
    }
}
