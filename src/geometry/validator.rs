use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use super::mesh::{
    binary_triangle_count, binary_triangles, expected_binary_size, walk_ascii, AsciiWalk,
    BINARY_PREAMBLE_SIZE,
};

/// Encoding of a triangulated mesh file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryEncoding {
    Binary,
    Ascii,
}

impl fmt::Display for GeometryEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryEncoding::Binary => write!(f, "binary"),
            GeometryEncoding::Ascii => write!(f, "ascii"),
        }
    }
}

impl FromStr for GeometryEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(GeometryEncoding::Binary),
            "ascii" | "text" => Ok(GeometryEncoding::Ascii),
            other => Err(format!("unknown mesh encoding '{other}' (expected binary or ascii)")),
        }
    }
}

/// Why an uploaded mesh was refused. Never retriable without a new upload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryRejection {
    #[error("file does not exist")]
    NotFound,
    #[error("file is not readable: {0}")]
    Unreadable(String),
    #[error("file too small: {size} bytes (min {min})")]
    TooSmall { size: u64, min: u64 },
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("file must have .stl extension")]
    BadExtension,
    #[error("declared {declared} encoding does not match file content")]
    EncodingMismatch { declared: GeometryEncoding },
    #[error("mesh contains no triangles")]
    NoTriangles,
    #[error("mesh too complex: {count} triangles (max {max})")]
    TooManyTriangles { count: u32, max: u32 },
    #[error("invalid binary mesh: size mismatch (expected {expected}, got {actual})")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("invalid coordinate value {value} in triangle {triangle}")]
    CoordinateOutOfRange { triangle: u32, value: f32 },
    #[error("invalid text mesh at line {line}: {reason}")]
    MalformedAscii { line: usize, reason: String },
}

/// Bounds applied by [`GeometryValidator`].
#[derive(Debug, Clone)]
pub struct ValidatorLimits {
    pub min_file_size: u64,
    pub max_file_size: u64,
    pub max_triangles: u32,
    /// Largest accepted absolute coordinate in sampled binary records.
    pub coordinate_limit: f32,
    /// Number of leading binary records decoded and range-checked.
    pub sample_triangles: u32,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self {
            min_file_size: BINARY_PREAMBLE_SIZE as u64,
            max_file_size: 50 * 1024 * 1024,
            max_triangles: 1_000_000,
            coordinate_limit: 10_000.0,
            sample_triangles: 10,
        }
    }
}

/// Facts established about a mesh that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GeometryReport {
    pub encoding: GeometryEncoding,
    pub triangle_count: u32,
    pub file_size: u64,
}

/// Structural validation of untrusted mesh uploads.
///
/// Pure and synchronous: no subprocesses, no network. Checks run in order
/// and stop at the first failure.
#[derive(Debug, Clone, Default)]
pub struct GeometryValidator {
    limits: ValidatorLimits,
}

impl GeometryValidator {
    pub fn new(limits: ValidatorLimits) -> Self {
        Self { limits }
    }

    /// Validate the file at `path`.
    ///
    /// `declared` is the encoding the uploader claimed; when absent the
    /// encoding is sniffed from the content.
    pub fn validate(
        &self,
        path: &Path,
        declared: Option<GeometryEncoding>,
    ) -> Result<GeometryReport, GeometryRejection> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(GeometryRejection::NotFound),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GeometryRejection::NotFound)
            }
            Err(e) => return Err(GeometryRejection::Unreadable(e.to_string())),
        };

        self.check_size(metadata.len())?;

        let has_stl_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("stl"));
        if !has_stl_extension {
            return Err(GeometryRejection::BadExtension);
        }

        let bytes =
            std::fs::read(path).map_err(|e| GeometryRejection::Unreadable(e.to_string()))?;
        let report = self.validate_bytes(&bytes, declared)?;
        debug!(
            path = %path.display(),
            encoding = %report.encoding,
            triangles = report.triangle_count,
            "mesh validated"
        );
        Ok(report)
    }

    /// Validate an in-memory mesh. Extension checks are the caller's job.
    pub fn validate_bytes(
        &self,
        bytes: &[u8],
        declared: Option<GeometryEncoding>,
    ) -> Result<GeometryReport, GeometryRejection> {
        let file_size = bytes.len() as u64;
        self.check_size(file_size)?;

        let encoding = match declared {
            Some(GeometryEncoding::Ascii) if !bytes.starts_with(b"solid") => {
                return Err(GeometryRejection::EncodingMismatch {
                    declared: GeometryEncoding::Ascii,
                })
            }
            Some(GeometryEncoding::Binary) if looks_like_text(bytes) => {
                return Err(GeometryRejection::EncodingMismatch {
                    declared: GeometryEncoding::Binary,
                })
            }
            Some(encoding) => encoding,
            None => sniff_encoding(bytes),
        };

        let triangle_count = match encoding {
            GeometryEncoding::Binary => self.validate_binary(bytes)?,
            GeometryEncoding::Ascii => self.validate_ascii(bytes)?,
        };

        Ok(GeometryReport {
            encoding,
            triangle_count,
            file_size,
        })
    }

    fn check_size(&self, size: u64) -> Result<(), GeometryRejection> {
        if size > self.limits.max_file_size {
            return Err(GeometryRejection::TooLarge {
                size,
                max: self.limits.max_file_size,
            });
        }
        if size < self.limits.min_file_size {
            return Err(GeometryRejection::TooSmall {
                size,
                min: self.limits.min_file_size,
            });
        }
        Ok(())
    }

    fn validate_binary(&self, bytes: &[u8]) -> Result<u32, GeometryRejection> {
        let actual = bytes.len() as u64;
        let count = binary_triangle_count(bytes).ok_or(GeometryRejection::TooSmall {
            size: actual,
            min: BINARY_PREAMBLE_SIZE as u64,
        })?;

        if count == 0 {
            return Err(GeometryRejection::NoTriangles);
        }
        if count > self.limits.max_triangles {
            return Err(GeometryRejection::TooManyTriangles {
                count,
                max: self.limits.max_triangles,
            });
        }

        let expected = expected_binary_size(count);
        if actual != expected {
            return Err(GeometryRejection::SizeMismatch { expected, actual });
        }

        let limit = self.limits.coordinate_limit;
        for (index, triangle) in (0..).zip(binary_triangles(bytes).take(self.limits.sample_triangles as usize)) {
            if let Some(value) = triangle
                .coordinates()
                .find(|c| !c.is_finite() || c.abs() > limit)
            {
                return Err(GeometryRejection::CoordinateOutOfRange {
                    triangle: index,
                    value,
                });
            }
        }

        Ok(count)
    }

    fn validate_ascii(&self, bytes: &[u8]) -> Result<u32, GeometryRejection> {
        let text = String::from_utf8_lossy(bytes);
        let max = self.limits.max_triangles;
        match walk_ascii(&text, max, |_| {}) {
            Ok(AsciiWalk::Complete(0)) => Err(GeometryRejection::NoTriangles),
            Ok(AsciiWalk::Complete(count)) => Ok(count),
            Ok(AsciiWalk::ExceededCeiling(count)) => {
                Err(GeometryRejection::TooManyTriangles { count, max })
            }
            Err(fault) => Err(GeometryRejection::MalformedAscii {
                line: fault.line,
                reason: fault.reason,
            }),
        }
    }
}

/// Bytes inspected when deciding whether content is text. Longer than the
/// binary preamble, so a binary triangle count is always included.
const TEXT_SNIFF_LEN: usize = 512;

/// A `solid` prefix followed only by printable ASCII and whitespace.
fn looks_like_text(bytes: &[u8]) -> bool {
    bytes.starts_with(b"solid")
        && bytes
            .iter()
            .take(TEXT_SNIFF_LEN)
            .all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace())
}

/// Binary headers are free-form and may themselves begin with `solid`, so a
/// `solid` prefix only means text when the binary size check would fail.
fn sniff_encoding(bytes: &[u8]) -> GeometryEncoding {
    if !bytes.starts_with(b"solid") {
        return GeometryEncoding::Binary;
    }
    let binary_consistent = binary_triangle_count(bytes)
        .is_some_and(|count| count > 0 && expected_binary_size(count) == bytes.len() as u64);
    if binary_consistent {
        GeometryEncoding::Binary
    } else {
        GeometryEncoding::Ascii
    }
}
