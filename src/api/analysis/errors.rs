use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use tracing::{error, warn};

use crate::api::validation::{field_errors, ErrorResponse};
use crate::files::FileSourceError;
use crate::pipeline::ServiceError;

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Invalid(_)
            | ServiceError::InvalidJobId(_)
            | ServiceError::Rejected(_)
            | ServiceError::File(FileSourceError::InvalidReference(_)) => StatusCode::BAD_REQUEST,
            ServiceError::File(FileSourceError::NotFound(_))
            | ServiceError::JobNotFound(_)
            | ServiceError::ResultNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Duplicate(_) | ServiceError::StillRunning(_) => StatusCode::CONFLICT,
            ServiceError::File(FileSourceError::Io { .. }) | ServiceError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error, fields) = match self {
            ServiceError::Invalid(errors) => ("Validation failed", field_errors(errors)),
            ServiceError::Rejected(rejection) => (
                "Geometry rejected",
                serde_json::json!({ "message": rejection.to_string() }),
            ),
            ServiceError::Duplicate(_) => (
                "Conflict",
                serde_json::json!({ "message": self.to_string() }),
            ),
            ServiceError::File(FileSourceError::NotFound(_))
            | ServiceError::JobNotFound(_)
            | ServiceError::ResultNotFound(_) => (
                "Not found",
                serde_json::json!({ "message": self.to_string() }),
            ),
            ServiceError::File(FileSourceError::Io { .. }) | ServiceError::Unavailable(_) => {
                error!("Service unavailable: {}", self);
                (
                    "Service unavailable",
                    serde_json::json!({ "message": "Temporarily unable to process request" }),
                )
            }
            _ => (
                "Request rejected",
                serde_json::json!({ "message": self.to_string() }),
            ),
        };
        if self.status_code().is_client_error() {
            warn!("Request rejected: {}", self);
        }

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: error.to_string(),
            fields,
        })
    }
}
