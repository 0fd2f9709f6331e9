use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::geometry::GeometryEncoding;
use crate::job::{AnalysisJob, JobError, StoredResult};
use crate::metrics::AnalysisResult;
use crate::slicer::PrintSettings;

/// Database representation of an analysis job
#[derive(Debug, FromRow)]
pub struct AnalysisJobRow {
    pub id: String,
    pub file_ref: String,
    pub encoding: Option<String>,
    pub settings: Json<PrintSettings>,
    pub status: String,
    pub progress: i16,
    pub message: String,
    pub result_ref: Option<String>,
    pub error: Option<Json<JobError>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AnalysisJobRow> for AnalysisJob {
    type Error = String;

    fn try_from(row: AnalysisJobRow) -> Result<Self, Self::Error> {
        let encoding = row.encoding.as_deref().map(str::parse::<GeometryEncoding>).transpose()?;
        let progress = u8::try_from(row.progress)
            .map_err(|_| format!("job {} has out-of-range progress {}", row.id, row.progress))?;
        Ok(AnalysisJob {
            status: row.status.parse()?,
            id: row.id,
            file_ref: row.file_ref,
            encoding,
            settings: row.settings.0,
            progress,
            message: row.message,
            result_ref: row.result_ref,
            error: row.error.map(|e| e.0),
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database representation of a stored analysis result
#[derive(Debug, FromRow)]
pub struct AnalysisResultRow {
    pub id: String,
    pub job_id: String,
    pub file_ref: String,
    pub settings: Json<PrintSettings>,
    pub metrics: Json<AnalysisResult>,
    pub analyzed_at: DateTime<Utc>,
}

impl From<AnalysisResultRow> for StoredResult {
    fn from(row: AnalysisResultRow) -> Self {
        StoredResult {
            id: row.id,
            job_id: row.job_id,
            file_ref: row.file_ref,
            settings: row.settings.0,
            metrics: row.metrics.0,
            analyzed_at: row.analyzed_at,
        }
    }
}
