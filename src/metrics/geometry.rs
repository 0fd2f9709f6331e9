//! Geometry pass: metrics derived from the mesh itself, independent of the
//! slicing engine.

use std::path::Path;
use tracing::warn;

use crate::geometry::mesh::{binary_triangles, signed_volume, walk_ascii, Triangle};
use crate::geometry::{GeometryEncoding, GeometryReport};

/// Upper bound of the complexity score.
pub const MAX_COMPLEXITY: f64 = 5.0;
const TRIANGLES_PER_COMPLEXITY_POINT: f64 = 10_000.0;
/// Volume attributed to each triangle when the mesh cannot be integrated.
const COARSE_VOLUME_PER_TRIANGLE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryMetrics {
    pub volume_mm3: f64,
    pub complexity_score: f64,
    /// True when `volume_mm3` is the coarse per-triangle estimate.
    pub volume_estimated: bool,
}

/// Monotonic in `triangle_count`, saturating at [`MAX_COMPLEXITY`].
pub fn complexity_score(triangle_count: u32) -> f64 {
    (f64::from(triangle_count) / TRIANGLES_PER_COMPLEXITY_POINT).min(MAX_COMPLEXITY)
}

pub fn coarse_volume(triangle_count: u32) -> f64 {
    f64::from(triangle_count) * COARSE_VOLUME_PER_TRIANGLE
}

fn integrate_volume(bytes: &[u8], report: &GeometryReport) -> Option<f64> {
    let volume = match report.encoding {
        GeometryEncoding::Binary => {
            let triangles: Vec<Triangle> = binary_triangles(bytes).collect();
            signed_volume(&triangles)
        }
        GeometryEncoding::Ascii => {
            let text = String::from_utf8_lossy(bytes);
            let mut triangles = Vec::with_capacity(report.triangle_count as usize);
            walk_ascii(&text, report.triangle_count, |t| triangles.push(*t)).ok()?;
            signed_volume(&triangles)
        }
    }
    .abs();

    (volume.is_finite() && volume > f64::EPSILON).then_some(volume)
}

/// Compute volume and complexity for a validated mesh.
///
/// Always returns something: when the mesh cannot be read or encloses no
/// volume, the coarse triangle-count estimate is used instead.
pub fn geometry_metrics(mesh: &Path, report: &GeometryReport) -> GeometryMetrics {
    let complexity_score = complexity_score(report.triangle_count);
    let integrated = match std::fs::read(mesh) {
        Ok(bytes) => integrate_volume(&bytes, report),
        Err(e) => {
            warn!(path = %mesh.display(), error = %e, "could not reread mesh for volume");
            None
        }
    };

    match integrated {
        Some(volume_mm3) => GeometryMetrics {
            volume_mm3,
            complexity_score,
            volume_estimated: false,
        },
        None => GeometryMetrics {
            volume_mm3: coarse_volume(report.triangle_count),
            complexity_score,
            volume_estimated: true,
        },
    }
}
