use serde::Serialize;

use crate::job::StoredResult;

/// Response for an accepted submission
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub message: String,
}

/// Stored result plus the display units clients usually want
#[derive(Debug, Serialize)]
pub struct ResultResponse {
    #[serde(flatten)]
    pub result: StoredResult,
    pub print_time_minutes: u64,
    pub volume_cm3: f64,
}

impl From<StoredResult> for ResultResponse {
    fn from(result: StoredResult) -> Self {
        Self {
            print_time_minutes: result.metrics.print_time_minutes(),
            volume_cm3: result.metrics.volume_cm3(),
            result,
        }
    }
}
