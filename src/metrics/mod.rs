pub mod engine_output;
pub mod geometry;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, warn};

use crate::geometry::GeometryReport;
use crate::slicer::MaterialType;

pub use engine_output::{parse_duration_hours, parse_engine_output, EngineMetrics};
pub use geometry::{complexity_score, geometry_metrics, GeometryMetrics, MAX_COMPLEXITY};

/// A metric that could not be read and was substituted with its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Filament,
    PrintTime,
    Geometry,
}

/// Print metrics for one successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub filament_grams: f64,
    pub print_time_hours: f64,
    pub volume_mm3: f64,
    pub complexity_score: f64,
    pub supports_required: bool,
    pub triangle_count: u32,
    /// Metrics that fell back to defaults. Empty when everything parsed.
    #[serde(default)]
    pub defaulted: Vec<MetricField>,
}

impl AnalysisResult {
    pub fn print_time_minutes(&self) -> u64 {
        (self.print_time_hours * 60.0).max(0.0) as u64
    }

    pub fn volume_cm3(&self) -> f64 {
        (self.volume_mm3 / 1000.0 * 100.0).round() / 100.0
    }
}

/// Run both passes and combine them. Parser problems never fail the job.
pub fn collect_metrics(
    artifact: &Path,
    mesh: &Path,
    report: &GeometryReport,
    material: MaterialType,
) -> AnalysisResult {
    let engine = match File::open(artifact) {
        Ok(file) => parse_engine_output(BufReader::new(file), material),
        Err(e) => {
            warn!(path = %artifact.display(), error = %e, "engine artifact unreadable; using defaults");
            EngineMetrics::defaults()
        }
    };
    let shape = geometry_metrics(mesh, report);

    let mut defaulted = engine.defaulted;
    if shape.volume_estimated {
        defaulted.push(MetricField::Geometry);
    }
    if !defaulted.is_empty() {
        warn!(?defaulted, "some metrics fell back to defaults");
    }

    let result = AnalysisResult {
        filament_grams: engine.filament_grams,
        print_time_hours: engine.print_time_hours,
        volume_mm3: shape.volume_mm3,
        complexity_score: shape.complexity_score,
        supports_required: engine.supports_required,
        triangle_count: report.triangle_count,
        defaulted,
    };
    debug!(?result, "metrics collected");
    result
}
