//! Triangle decoding for both mesh encodings.
//!
//! The validator uses these readers to check structure; the metrics pass
//! reuses them to integrate the enclosed volume.

/// Bytes of free-form header at the start of a binary mesh.
pub const BINARY_HEADER_SIZE: usize = 80;
/// Little-endian `u32` triangle count following the header.
pub const BINARY_COUNT_SIZE: usize = 4;
/// Normal (12) + three vertices (36) + attribute byte count (2).
pub const BINARY_RECORD_SIZE: usize = 50;
/// Header plus count field; the smallest prefix a binary mesh can have.
pub const BINARY_PREAMBLE_SIZE: usize = BINARY_HEADER_SIZE + BINARY_COUNT_SIZE;

pub type Point = [f32; 3];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub normal: Point,
    pub vertices: [Point; 3],
}

impl Triangle {
    /// Every float in the record, normal first.
    pub fn coordinates(&self) -> impl Iterator<Item = f32> + '_ {
        self.normal
            .iter()
            .chain(self.vertices.iter().flatten())
            .copied()
    }
}

/// Triangle count declared in a binary header, if the preamble is present.
pub fn binary_triangle_count(bytes: &[u8]) -> Option<u32> {
    let field = bytes.get(BINARY_HEADER_SIZE..BINARY_PREAMBLE_SIZE)?;
    Some(u32::from_le_bytes(field.try_into().ok()?))
}

/// Exact byte length a binary mesh with `count` triangles must have.
pub fn expected_binary_size(count: u32) -> u64 {
    BINARY_PREAMBLE_SIZE as u64 + u64::from(count) * BINARY_RECORD_SIZE as u64
}

fn read_point(buf: &[u8]) -> Option<Point> {
    let mut point = [0.0_f32; 3];
    for (axis, chunk) in point.iter_mut().zip(buf.chunks_exact(4)) {
        *axis = f32::from_le_bytes(chunk.try_into().ok()?);
    }
    Some(point)
}

/// Decode one 50-byte binary record. The attribute field is ignored.
pub fn decode_binary_record(record: &[u8]) -> Option<Triangle> {
    if record.len() < BINARY_RECORD_SIZE {
        return None;
    }
    Some(Triangle {
        normal: read_point(record.get(0..12)?)?,
        vertices: [
            read_point(record.get(12..24)?)?,
            read_point(record.get(24..36)?)?,
            read_point(record.get(36..48)?)?,
        ],
    })
}

/// Iterate the triangle records of a binary mesh, stopping at the first
/// incomplete record.
pub fn binary_triangles(bytes: &[u8]) -> impl Iterator<Item = Triangle> + '_ {
    bytes
        .get(BINARY_PREAMBLE_SIZE..)
        .unwrap_or_default()
        .chunks_exact(BINARY_RECORD_SIZE)
        .filter_map(decode_binary_record)
}

/// Structural fault in a text mesh, with the 1-based line it was found on.
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiFault {
    pub line: usize,
    pub reason: String,
}

impl AsciiFault {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Outcome of walking a text mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsciiWalk {
    Complete(u32),
    /// The ceiling was crossed; walking stopped early.
    ExceededCeiling(u32),
}

fn parse_floats<const N: usize>(tokens: &[&str]) -> Option<[f32; N]> {
    if tokens.len() != N {
        return None;
    }
    let mut out = [0.0_f32; N];
    for (slot, token) in out.iter_mut().zip(tokens) {
        let value: f32 = token.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        *slot = value;
    }
    Some(out)
}

fn keyword_is(tokens: &[&str], expected: &[&str]) -> bool {
    tokens.len() >= expected.len()
        && tokens
            .iter()
            .zip(expected)
            .all(|(token, want)| token.eq_ignore_ascii_case(want))
}

/// Walk a text mesh, calling `on_triangle` for each well-formed face.
///
/// Layout is strict: `solid` first, `endsolid` last, and every face is
/// `facet normal`, `outer loop`, three `vertex` lines, `endloop`,
/// `endfacet` in that order. Blank lines are skipped.
pub fn walk_ascii(
    text: &str,
    max_triangles: u32,
    mut on_triangle: impl FnMut(&Triangle),
) -> Result<AsciiWalk, AsciiFault> {
    let lines: Vec<(usize, Vec<&str>)> = text
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.split_whitespace().collect::<Vec<_>>()))
        .filter(|(_, tokens)| !tokens.is_empty())
        .collect();

    let Some(((first_no, first), rest)) = lines.split_first() else {
        return Err(AsciiFault::new(1, "file is empty"));
    };
    if !keyword_is(first, &["solid"]) {
        return Err(AsciiFault::new(*first_no, "expected 'solid' on the first line"));
    }
    let Some(((last_no, last), body)) = rest.split_last() else {
        return Err(AsciiFault::new(*first_no, "missing 'endsolid'"));
    };
    if !keyword_is(last, &["endsolid"]) {
        return Err(AsciiFault::new(*last_no, "expected 'endsolid' on the last line"));
    }

    let mut count: u32 = 0;
    let mut cursor = body.iter();
    while let Some((line_no, tokens)) = cursor.next() {
        if !keyword_is(tokens, &["facet", "normal"]) {
            return Err(AsciiFault::new(*line_no, "expected 'facet normal'"));
        }
        let normal = tokens
            .get(2..)
            .and_then(parse_floats::<3>)
            .ok_or_else(|| AsciiFault::new(*line_no, "facet normal needs three numbers"))?;

        let mut next = |expect: &str| {
            cursor
                .next()
                .ok_or_else(|| AsciiFault::new(*last_no, format!("facet truncated, expected '{expect}'")))
        };

        let (no, tokens) = next("outer loop")?;
        if !keyword_is(tokens, &["outer", "loop"]) || tokens.len() != 2 {
            return Err(AsciiFault::new(*no, "expected 'outer loop'"));
        }

        let mut vertices = [[0.0_f32; 3]; 3];
        for vertex in &mut vertices {
            let (no, tokens) = next("vertex")?;
            if !keyword_is(tokens, &["vertex"]) {
                return Err(AsciiFault::new(*no, "expected 'vertex'"));
            }
            *vertex = tokens
                .get(1..)
                .and_then(parse_floats::<3>)
                .ok_or_else(|| AsciiFault::new(*no, "vertex needs three numbers"))?;
        }

        let (no, tokens) = next("endloop")?;
        if !keyword_is(tokens, &["endloop"]) || tokens.len() != 1 {
            return Err(AsciiFault::new(*no, "expected 'endloop'"));
        }
        let (no, tokens) = next("endfacet")?;
        if !keyword_is(tokens, &["endfacet"]) || tokens.len() != 1 {
            return Err(AsciiFault::new(*no, "expected 'endfacet'"));
        }

        count = count.saturating_add(1);
        if count > max_triangles {
            return Ok(AsciiWalk::ExceededCeiling(count));
        }
        on_triangle(&Triangle { normal, vertices });
    }

    Ok(AsciiWalk::Complete(count))
}

/// Signed volume enclosed by a closed mesh (sum of origin tetrahedra).
/// Negative for inside-out winding; meaningless for open meshes.
pub fn signed_volume<'a>(triangles: impl IntoIterator<Item = &'a Triangle>) -> f64 {
    let mut volume = 0.0_f64;
    for triangle in triangles {
        let [v0, v1, v2] = triangle.vertices.map(|p| p.map(f64::from));
        let cross = [
            v1[1].mul_add(v2[2], -(v1[2] * v2[1])),
            v1[2].mul_add(v2[0], -(v1[0] * v2[2])),
            v1[0].mul_add(v2[1], -(v1[1] * v2[0])),
        ];
        volume += v0[2].mul_add(cross[2], v0[0].mul_add(cross[0], v0[1] * cross[1]));
    }
    volume / 6.0
}
