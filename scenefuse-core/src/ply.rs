/// PLY (Stanford polygon format) decoder: header grammar, ASCII and binary bodies
use std::path::{Path, PathBuf};

use nalgebra::{Point3, Vector3};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1},
    character::complete::space1,
    combinator::{all_consuming, map},
    sequence::{pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use tracing::debug;

use crate::detect::PlyEncoding;
use crate::error::{BodyPosition, IngestError, Result, Warning};
use crate::geometry::{Color, Face, FaceCorner, Fragment};

/// Scalar types allowed in property declarations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Double,
}

impl ScalarType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "char" | "int8" => Some(Self::Char),
            "uchar" | "uint8" => Some(Self::UChar),
            "short" | "int16" => Some(Self::Short),
            "ushort" | "uint16" => Some(Self::UShort),
            "int" | "int32" => Some(Self::Int),
            "uint" | "uint32" => Some(Self::UInt),
            "float" | "float32" => Some(Self::Float),
            "double" | "float64" => Some(Self::Double),
            _ => None,
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt | Self::Float => 4,
            Self::Double => 8,
        }
    }

    fn is_float(&self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Full-scale value when the type stores a color channel
    fn color_scale(&self) -> f64 {
        match self {
            Self::Float | Self::Double => 1.0,
            Self::Short | Self::UShort => 65535.0,
            _ => 255.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlyProperty {
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlyElement {
    pub name: String,
    pub count: usize,
    pub properties: Vec<PlyProperty>,
}

impl PlyElement {
    fn property_index(&self, names: &[&str]) -> Option<usize> {
        names
            .iter()
            .find_map(|n| self.properties.iter().position(|p| p.name == *n))
    }
}

/// Parsed header: the schema that drives body reading
#[derive(Clone, Debug, PartialEq)]
pub struct PlyHeader {
    pub encoding: PlyEncoding,
    pub elements: Vec<PlyElement>,
    pub comments: Vec<String>,
    /// Byte offset of the first body byte
    pub body_offset: usize,
    /// Number of header lines, for ASCII body line numbers
    pub line_count: usize,
}

enum Directive<'a> {
    Format(&'a str, &'a str),
    Element(&'a str, &'a str),
    Scalar(&'a str, &'a str),
    List(&'a str, &'a str, &'a str),
}

fn word(input: &str) -> IResult<&str, &str> {
    take_till1(|c: char| c.is_whitespace())(input)
}

fn format_decl(input: &str) -> IResult<&str, Directive<'_>> {
    map(
        preceded(pair(tag("format"), space1), separated_pair(word, space1, word)),
        |(encoding, version)| Directive::Format(encoding, version),
    )(input)
}

fn element_decl(input: &str) -> IResult<&str, Directive<'_>> {
    map(
        preceded(pair(tag("element"), space1), separated_pair(word, space1, word)),
        |(name, count)| Directive::Element(name, count),
    )(input)
}

fn property_decl(input: &str) -> IResult<&str, Directive<'_>> {
    preceded(
        pair(tag("property"), space1),
        alt((
            map(
                preceded(
                    pair(tag("list"), space1),
                    tuple((terminated(word, space1), terminated(word, space1), word)),
                ),
                |(count, item, name)| Directive::List(count, item, name),
            ),
            map(separated_pair(word, space1, word), |(ty, name)| {
                Directive::Scalar(ty, name)
            }),
        )),
    )(input)
}

fn header_error(file: &Path, line: usize, message: impl Into<String>) -> IngestError {
    IngestError::PlyHeader {
        file: file.to_path_buf(),
        line,
        message: message.into(),
    }
}

/// Locate `end_header`; returns the header lines and the body offset.
fn split_header<'a>(file: &Path, data: &'a [u8]) -> Result<(Vec<&'a [u8]>, usize)> {
    let mut lines = Vec::new();
    let mut start = 0;
    while start < data.len() {
        let end = data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| start + p);
        let (line, next) = match end {
            Some(end) => (&data[start..end], end + 1),
            None => (&data[start..], data.len()),
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.trim_ascii() == b"end_header" {
            return Ok((lines, next));
        }
        lines.push(line);
        start = next;
    }
    Err(header_error(file, lines.len(), "missing end_header sentinel"))
}

pub fn parse_header(file: &Path, data: &[u8]) -> Result<PlyHeader> {
    let (lines, body_offset) = split_header(file, data)?;

    let magic = lines.first().map(|l| l.trim_ascii());
    if magic != Some(b"ply".as_slice()) {
        return Err(header_error(file, 1, "first line must be 'ply'"));
    }

    let mut encoding = None;
    let mut elements: Vec<PlyElement> = Vec::new();
    let mut comments = Vec::new();

    for (i, raw) in lines.iter().enumerate().skip(1) {
        let line_no = i + 1;
        let line = std::str::from_utf8(raw)
            .map_err(|_| header_error(file, line_no, "header is not valid UTF-8"))?
            .trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix("comment").or_else(|| line.strip_prefix("obj_info")) {
            comments.push(comment.trim().to_string());
            continue;
        }

        let (_, directive) = all_consuming(alt((format_decl, element_decl, property_decl)))(line)
            .map_err(|_| header_error(file, line_no, format!("malformed header line '{}'", line)))?;

        match directive {
            Directive::Format(token, version) => {
                let parsed = PlyEncoding::from_token(token).ok_or_else(|| {
                    header_error(file, line_no, format!("unknown format '{}'", token))
                })?;
                if version != "1.0" {
                    debug!("{:?}: PLY version {} treated as 1.0", file, version);
                }
                encoding = Some(parsed);
            }
            Directive::Element(name, count) => {
                let count = count.parse::<usize>().map_err(|_| {
                    header_error(file, line_no, format!("bad element count '{}'", count))
                })?;
                elements.push(PlyElement {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            Directive::Scalar(ty, name) => {
                let ty = scalar_type(file, line_no, ty)?;
                push_property(file, line_no, &mut elements, name, PropertyKind::Scalar(ty))?;
            }
            Directive::List(count, item, name) => {
                let kind = PropertyKind::List {
                    count: scalar_type(file, line_no, count)?,
                    item: scalar_type(file, line_no, item)?,
                };
                push_property(file, line_no, &mut elements, name, kind)?;
            }
        }
    }

    let encoding = encoding.ok_or_else(|| header_error(file, 2, "missing format line"))?;
    Ok(PlyHeader {
        encoding,
        elements,
        comments,
        body_offset,
        line_count: lines.len() + 1,
    })
}

fn scalar_type(file: &Path, line: usize, token: &str) -> Result<ScalarType> {
    ScalarType::from_token(token)
        .ok_or_else(|| header_error(file, line, format!("unknown type token '{}'", token)))
}

fn push_property(
    file: &Path,
    line: usize,
    elements: &mut [PlyElement],
    name: &str,
    kind: PropertyKind,
) -> Result<()> {
    let element = elements
        .last_mut()
        .ok_or_else(|| header_error(file, line, "property declared before any element"))?;
    element.properties.push(PlyProperty {
        name: name.to_string(),
        kind,
    });
    Ok(())
}

/// Source of property values for successive element instances
trait BodyReader {
    fn start_instance(&mut self, element: &PlyElement, instance: usize) -> Result<()>;

    fn scalar(&mut self, ty: ScalarType, element: &PlyElement, instance: usize, property: &str)
        -> Result<f64>;

    /// Position of the next value
    fn position(&self) -> BodyPosition;
}

struct AsciiBody<'a> {
    file: PathBuf,
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    first_line: usize,
    tokens: Vec<&'a str>,
    cursor: usize,
    line: usize,
    len: usize,
}

impl<'a> AsciiBody<'a> {
    fn new(file: &Path, text: &'a str, first_line: usize) -> Self {
        Self {
            file: file.to_path_buf(),
            lines: text.lines().enumerate(),
            first_line,
            tokens: Vec::new(),
            cursor: 0,
            line: first_line,
            len: text.len(),
        }
    }
}

impl<'a> BodyReader for AsciiBody<'a> {
    fn start_instance(&mut self, element: &PlyElement, instance: usize) -> Result<()> {
        for (i, line) in self.lines.by_ref() {
            let tokens: Vec<&'a str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            self.tokens = tokens;
            self.cursor = 0;
            self.line = self.first_line + i;
            return Ok(());
        }
        Err(IngestError::PlyTruncated {
            file: self.file.clone(),
            offset: self.len,
            element: element.name.clone(),
            read: instance,
            declared: element.count,
        })
    }

    fn scalar(
        &mut self,
        ty: ScalarType,
        _element: &PlyElement,
        _instance: usize,
        property: &str,
    ) -> Result<f64> {
        let Some(token) = self.tokens.get(self.cursor).copied() else {
            return Err(self.parse_error(
                format!("a value for property '{}'", property),
                "end of line",
            ));
        };
        self.cursor += 1;

        let value = if ty.is_float() {
            token.parse::<f64>().ok().filter(|v| v.is_finite())
        } else {
            token.parse::<i64>().ok().map(|v| v as f64)
        };
        value.ok_or_else(|| self.parse_error(format!("{:?} for property '{}'", ty, property), token))
    }

    fn position(&self) -> BodyPosition {
        BodyPosition::Line(self.line)
    }
}

impl AsciiBody<'_> {
    fn parse_error(&self, expected: String, found: &str) -> IngestError {
        IngestError::PlyParse {
            file: self.file.clone(),
            at: BodyPosition::Line(self.line),
            expected,
            found: found.to_string(),
        }
    }
}

struct BinaryBody<'a> {
    file: PathBuf,
    bytes: &'a [u8],
    pos: usize,
    base_offset: usize,
    big_endian: bool,
}

impl<'a> BodyReader for BinaryBody<'a> {
    fn start_instance(&mut self, _element: &PlyElement, _instance: usize) -> Result<()> {
        Ok(())
    }

    fn scalar(
        &mut self,
        ty: ScalarType,
        element: &PlyElement,
        instance: usize,
        property: &str,
    ) -> Result<f64> {
        let at = self.position();
        let need = ty.size_bytes();
        let Some(b) = self.bytes.get(self.pos..self.pos + need) else {
            return Err(IngestError::PlyTruncated {
                file: self.file.clone(),
                offset: self.base_offset + self.pos,
                element: element.name.clone(),
                read: instance,
                declared: element.count,
            });
        };
        self.pos += need;

        macro_rules! read {
            ($t:ty, $n:literal) => {{
                let mut arr = [0u8; $n];
                arr.copy_from_slice(b);
                if self.big_endian {
                    <$t>::from_be_bytes(arr) as f64
                } else {
                    <$t>::from_le_bytes(arr) as f64
                }
            }};
        }

        let value = match ty {
            ScalarType::Char => b[0] as i8 as f64,
            ScalarType::UChar => b[0] as f64,
            ScalarType::Short => read!(i16, 2),
            ScalarType::UShort => read!(u16, 2),
            ScalarType::Int => read!(i32, 4),
            ScalarType::UInt => read!(u32, 4),
            ScalarType::Float => read!(f32, 4),
            ScalarType::Double => read!(f64, 8),
        };
        if !value.is_finite() {
            return Err(IngestError::PlyParse {
                file: self.file.clone(),
                at,
                expected: format!("finite {:?} for property '{}'", ty, property),
                found: value.to_string(),
            });
        }
        Ok(value)
    }

    fn position(&self) -> BodyPosition {
        BodyPosition::Offset(self.base_offset + self.pos)
    }
}

/// Where the vertex element's recognised properties live
struct VertexLayout {
    position: [usize; 3],
    normal: Option<[usize; 3]>,
    uv: Option<[usize; 2]>,
    color: Option<([usize; 3], Option<usize>)>,
}

impl VertexLayout {
    fn from_element(file: &Path, element: &PlyElement) -> Result<Self> {
        let find = |names: &[&str]| element.property_index(names);
        let position = match (find(&["x"]), find(&["y"]), find(&["z"])) {
            (Some(x), Some(y), Some(z)) => [x, y, z],
            _ => {
                return Err(header_error(
                    file,
                    0,
                    "vertex element lacks x/y/z properties",
                ))
            }
        };
        let normal = match (find(&["nx"]), find(&["ny"]), find(&["nz"])) {
            (Some(x), Some(y), Some(z)) => Some([x, y, z]),
            _ => None,
        };
        let uv = match (
            find(&["u", "s", "texture_u", "texture_s"]),
            find(&["v", "t", "texture_v", "texture_t"]),
        ) {
            (Some(u), Some(v)) => Some([u, v]),
            _ => None,
        };
        let color = match (
            find(&["red", "diffuse_red", "r"]),
            find(&["green", "diffuse_green", "g"]),
            find(&["blue", "diffuse_blue", "b"]),
        ) {
            (Some(r), Some(g), Some(b)) => Some(([r, g, b], find(&["alpha", "diffuse_alpha", "a"]))),
            _ => None,
        };
        Ok(Self {
            position,
            normal,
            uv,
            color,
        })
    }
}

/// Decode a PLY file into a fragment. Without a face element the fragment
/// is a point cloud.
pub fn parse_ply(file: &Path, data: &[u8]) -> Result<Fragment> {
    let header = parse_header(file, data)?;
    let body = &data[header.body_offset..];

    let vertex_element = header
        .elements
        .iter()
        .find(|e| e.name == "vertex")
        .ok_or_else(|| header_error(file, 0, "no vertex element declared"))?;
    let layout = VertexLayout::from_element(file, vertex_element)?;

    let mut reader: Box<dyn BodyReader + '_> = match header.encoding {
        PlyEncoding::Ascii => {
            let text = std::str::from_utf8(body).map_err(|e| IngestError::PlyParse {
                file: file.to_path_buf(),
                at: BodyPosition::Offset(header.body_offset + e.valid_up_to()),
                expected: "ASCII body".to_string(),
                found: format!("invalid UTF-8 at body byte {}", e.valid_up_to()),
            })?;
            Box::new(AsciiBody::new(file, text, header.line_count + 1))
        }
        PlyEncoding::BinaryLittleEndian | PlyEncoding::BinaryBigEndian => Box::new(BinaryBody {
            file: file.to_path_buf(),
            bytes: body,
            pos: 0,
            base_offset: header.body_offset,
            big_endian: header.encoding == PlyEncoding::BinaryBigEndian,
        }),
    };

    let mut fragment = Fragment::new(file);
    let mut colors: Vec<Color> = Vec::new();
    let mut values: Vec<f64> = Vec::new();
    let mut list: Vec<f64> = Vec::new();

    for element in &header.elements {
        let is_vertex = element.name == "vertex";
        let face_list = if element.name == "face" {
            element.property_index(&["vertex_indices", "vertex_index"])
        } else {
            None
        };

        for instance in 0..element.count {
            reader.start_instance(element, instance)?;
            values.clear();
            for (p, property) in element.properties.iter().enumerate() {
                match property.kind {
                    PropertyKind::Scalar(ty) => {
                        values.push(reader.scalar(ty, element, instance, &property.name)?);
                    }
                    PropertyKind::List { count, item } => {
                        let at = reader.position();
                        let n = reader.scalar(count, element, instance, &property.name)?;
                        if n < 0.0 {
                            return Err(IngestError::PlyParse {
                                file: file.to_path_buf(),
                                at,
                                expected: "non-negative list length".to_string(),
                                found: n.to_string(),
                            });
                        }
                        let keep = face_list == Some(p);
                        if keep {
                            list.clear();
                        }
                        for _ in 0..n as usize {
                            let v = reader.scalar(item, element, instance, &property.name)?;
                            if keep {
                                list.push(v);
                            }
                        }
                        values.push(f64::NAN);
                    }
                }
            }

            if is_vertex {
                push_vertex(&mut fragment, &mut colors, &layout, element, &values);
            } else if face_list.is_some() {
                push_face(&mut fragment, file, instance, &list);
            }
        }
        debug!("{:?}: read {} '{}' instances", file, element.count, element.name);
    }

    if layout.color.is_some() {
        fragment.colors = Some(colors);
    }
    fragment.retain_valid_faces();
    debug!(
        "Parsed PLY {:?} ({}): {} vertices, {} faces",
        file,
        header.encoding.as_str(),
        fragment.positions.len(),
        fragment.faces.len()
    );
    Ok(fragment)
}

fn push_vertex(
    fragment: &mut Fragment,
    colors: &mut Vec<Color>,
    layout: &VertexLayout,
    element: &PlyElement,
    values: &[f64],
) {
    let [x, y, z] = layout.position;
    fragment
        .positions
        .push(Point3::new(values[x] as f32, values[y] as f32, values[z] as f32));
    if let Some([x, y, z]) = layout.normal {
        fragment
            .normals
            .push(Vector3::new(values[x] as f32, values[y] as f32, values[z] as f32));
    }
    if let Some([u, v]) = layout.uv {
        fragment.uvs.push([values[u] as f32, values[v] as f32]);
    }
    if let Some(([r, g, b], a)) = layout.color {
        let channel = |i: usize| {
            let scale = match element.properties[i].kind {
                PropertyKind::Scalar(ty) => ty.color_scale(),
                PropertyKind::List { .. } => 1.0,
            };
            (values[i] / scale).clamp(0.0, 1.0) as f32
        };
        colors.push([channel(r), channel(g), channel(b), a.map(channel).unwrap_or(1.0)]);
    }
}

fn push_face(fragment: &mut Fragment, file: &Path, instance: usize, list: &[f64]) {
    if list.len() < 3 {
        fragment.warnings.push(Warning::DegenerateFace {
            file: file.to_path_buf(),
            line: instance,
        });
        return;
    }
    let has_uv = !fragment.uvs.is_empty();
    let has_normal = !fragment.normals.is_empty();
    let mut corners = Vec::with_capacity(list.len());
    for &raw in list {
        if raw < 0.0 || raw > u32::MAX as f64 {
            fragment.warnings.push(Warning::FaceIndexOutOfRange {
                file: file.to_path_buf(),
                line: instance,
                attribute: "position",
                index: raw as i64,
                len: fragment.positions.len(),
            });
            return;
        }
        let index = raw as u32;
        corners.push(FaceCorner::new(
            index,
            has_uv.then_some(index),
            has_normal.then_some(index),
        ));
    }
    fragment.faces.push(Face {
        corners,
        material: Fragment::DEFAULT_SLOT,
        line: instance,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII_CLOUD: &str = "ply\n\
        format ascii 1.0\n\
        comment scanned\n\
        element vertex 3\n\
        property float x\n\
        property float y\n\
        property float z\n\
        property uchar red\n\
        property uchar green\n\
        property uchar blue\n\
        end_header\n\
        0.5 -1.25 2 255 0 0\n\
        1.5 0.1 -3 0 255 0\n\
        -0.75 2.5 0.3 0 0 255\n";

    fn binary_cloud(big_endian: bool) -> Vec<u8> {
        let format = if big_endian {
            "binary_big_endian"
        } else {
            "binary_little_endian"
        };
        let mut data = format!(
            "ply\nformat {} 1.0\nelement vertex 3\nproperty float x\nproperty float y\n\
             property float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\n\
             end_header\n",
            format
        )
        .into_bytes();
        let points: [([f32; 3], [u8; 3]); 3] = [
            ([0.5, -1.25, 2.0], [255, 0, 0]),
            ([1.5, 0.1, -3.0], [0, 255, 0]),
            ([-0.75, 2.5, 0.3], [0, 0, 255]),
        ];
        for (p, c) in points {
            for v in p {
                if big_endian {
                    data.extend_from_slice(&v.to_be_bytes());
                } else {
                    data.extend_from_slice(&v.to_le_bytes());
                }
            }
            data.extend_from_slice(&c);
        }
        data
    }

    #[test]
    fn test_parse_header_schema() {
        let header = parse_header(Path::new("a.ply"), ASCII_CLOUD.as_bytes()).unwrap();
        assert_eq!(header.encoding, PlyEncoding::Ascii);
        assert_eq!(header.elements.len(), 1);
        assert_eq!(header.elements[0].count, 3);
        assert_eq!(header.elements[0].properties.len(), 6);
        assert_eq!(header.comments, vec!["scanned".to_string()]);
        assert_eq!(header.line_count, 11);
    }

    #[test]
    fn test_list_property_declaration() {
        let data = b"ply\nformat ascii 1.0\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n";
        let header = parse_header(Path::new("a.ply"), data).unwrap();
        assert_eq!(
            header.elements[0].properties[0].kind,
            PropertyKind::List {
                count: ScalarType::UChar,
                item: ScalarType::Int
            }
        );
    }

    #[test]
    fn test_missing_end_header() {
        let data = b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\n0 0 0\n";
        let err = parse_ply(Path::new("a.ply"), data).unwrap_err();
        match err {
            IngestError::PlyHeader { message, .. } => assert!(message.contains("end_header")),
            other => panic!("expected PlyHeader, got: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_token() {
        let data = b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float128 x\nend_header\n";
        assert!(matches!(
            parse_header(Path::new("a.ply"), data),
            Err(IngestError::PlyHeader { line: 4, .. })
        ));
    }

    #[test]
    fn test_property_before_element() {
        let data = b"ply\nformat ascii 1.0\nproperty float x\nend_header\n";
        assert!(matches!(
            parse_header(Path::new("a.ply"), data),
            Err(IngestError::PlyHeader { .. })
        ));
    }

    #[test]
    fn test_ascii_and_binary_decode_equal() {
        let ascii = parse_ply(Path::new("a.ply"), ASCII_CLOUD.as_bytes()).unwrap();
        for big_endian in [false, true] {
            let binary = parse_ply(Path::new("b.ply"), &binary_cloud(big_endian)).unwrap();
            assert_eq!(ascii.positions.len(), binary.positions.len());
            for (a, b) in ascii.positions.iter().zip(&binary.positions) {
                assert!((a - b).norm() < 1e-5);
            }
            let (ac, bc) = (ascii.colors.as_ref().unwrap(), binary.colors.as_ref().unwrap());
            for (a, b) in ac.iter().zip(bc) {
                for k in 0..4 {
                    assert!((a[k] - b[k]).abs() < 1e-5);
                }
            }
            assert!(binary.faces.is_empty());
        }
        assert_eq!(ascii.colors.unwrap()[0], [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_binary_truncated() {
        let mut data = binary_cloud(false);
        data.truncate(data.len() - 4);
        match parse_ply(Path::new("b.ply"), &data).unwrap_err() {
            IngestError::PlyTruncated { element, read, declared, .. } => {
                assert_eq!(element, "vertex");
                assert_eq!(read, 2);
                assert_eq!(declared, 3);
            }
            other => panic!("expected PlyTruncated, got: {:?}", other),
        }
    }

    #[test]
    fn test_ascii_missing_rows_is_truncated() {
        let data = ASCII_CLOUD.replace("-0.75 2.5 0.3 0 0 255\n", "");
        assert!(matches!(
            parse_ply(Path::new("a.ply"), data.as_bytes()),
            Err(IngestError::PlyTruncated { read: 2, .. })
        ));
    }

    #[test]
    fn test_ascii_bad_token() {
        let data = ASCII_CLOUD.replace("1.5 0.1 -3", "1.5 zero -3");
        match parse_ply(Path::new("a.ply"), data.as_bytes()).unwrap_err() {
            IngestError::PlyParse { at, found, .. } => {
                assert_eq!(at, BodyPosition::Line(13));
                assert_eq!(found, "zero");
            }
            other => panic!("expected PlyParse, got: {:?}", other),
        }
    }

    fn body_start(data: &[u8]) -> usize {
        let end = b"end_header\n";
        data.windows(end.len()).position(|w| w == end).unwrap() + end.len()
    }

    #[test]
    fn test_ascii_non_finite_rejected() {
        for bad in ["nan", "inf", "-inf"] {
            let data = ASCII_CLOUD.replace("1.5 0.1 -3", &format!("{} 0.1 -3", bad));
            assert!(matches!(
                parse_ply(Path::new("a.ply"), data.as_bytes()),
                Err(IngestError::PlyParse { at: BodyPosition::Line(13), .. })
            ));
        }
    }

    #[test]
    fn test_binary_non_finite_rejected() {
        for big_endian in [false, true] {
            let mut data = binary_cloud(big_endian);
            let start = body_start(&data);
            // y of the second vertex; rows are 15 bytes
            let at = start + 15 + 4;
            let nan = if big_endian {
                f32::NAN.to_be_bytes()
            } else {
                f32::NAN.to_le_bytes()
            };
            data[at..at + 4].copy_from_slice(&nan);
            match parse_ply(Path::new("b.ply"), &data).unwrap_err() {
                IngestError::PlyParse { at: position, found, .. } => {
                    assert_eq!(position, BodyPosition::Offset(at));
                    assert_eq!(found, "NaN");
                }
                other => panic!("expected PlyParse, got: {:?}", other),
            }
        }
    }

    #[test]
    fn test_binary_infinite_double_rejected() {
        let mut data = b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty double x\n\
property double y\nproperty double z\nend_header\n"
            .to_vec();
        for v in [0.0f64, f64::INFINITY, 0.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let start = body_start(&data);
        assert!(matches!(
            parse_ply(Path::new("d.ply"), &data),
            Err(IngestError::PlyParse { at, .. }) if at == BodyPosition::Offset(start + 8)
        ));
    }

    #[test]
    fn test_negative_list_length_position() {
        let ascii = b"ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\nproperty float y\n\
property float z\nelement face 1\nproperty list char int vertex_indices\nend_header\n\
0 0 0\n1 0 0\n0 1 0\n-1 0 1 2\n";
        assert!(matches!(
            parse_ply(Path::new("a.ply"), ascii),
            Err(IngestError::PlyParse { at: BodyPosition::Line(13), .. })
        ));

        let mut binary = b"ply\nformat binary_little_endian 1.0\nelement vertex 3\nproperty float x\n\
property float y\nproperty float z\nelement face 1\nproperty list char int vertex_indices\n\
end_header\n"
            .to_vec();
        let start = body_start(&binary);
        for v in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            binary.extend_from_slice(&v.to_le_bytes());
        }
        binary.push(0xff);
        assert!(matches!(
            parse_ply(Path::new("b.ply"), &binary),
            Err(IngestError::PlyParse { at, .. }) if at == BodyPosition::Offset(start + 36)
        ));
    }

    #[test]
    fn test_mesh_with_faces_and_no_colors() {
        let data = b"ply\nformat ascii 1.0\nelement vertex 4\nproperty float x\nproperty float y\n\
property float z\nelement face 2\nproperty list uchar int vertex_indices\nend_header\n\
0 0 0\n1 0 0\n1 1 0\n0 1 0\n3 0 1 2\n4 0 1 2 7\n";
        let fragment = parse_ply(Path::new("m.ply"), data).unwrap();
        assert!(fragment.colors.is_none());
        assert_eq!(fragment.faces.len(), 1);
        assert_eq!(fragment.warnings.len(), 1);
        assert_eq!(fragment.faces[0].corners[2].position, 2);
    }

    #[test]
    fn test_big_endian_face_list() {
        let mut data = b"ply\nformat binary_big_endian 1.0\nelement vertex 3\nproperty double x\n\
property double y\nproperty double z\nelement face 1\nproperty list uchar uint vertex_indices\n\
end_header\n"
            .to_vec();
        for v in [0.0f64, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        data.push(3);
        for i in [0u32, 1, 2] {
            data.extend_from_slice(&i.to_be_bytes());
        }
        let fragment = parse_ply(Path::new("m.ply"), &data).unwrap();
        assert_eq!(fragment.positions[1], Point3::new(1.0, 0.0, 0.0));
        let indices: Vec<u32> = fragment.faces[0].corners.iter().map(|c| c.position).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
