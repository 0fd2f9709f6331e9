use actix_web::HttpResponse;
use serde::Serialize;
use validator::ValidationErrors;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub fields: serde_json::Value,
}

/// Per-field messages, e.g. `{"layer_height": {"errors": ["..."]}}`.
/// Nested structs (such as `settings`) are reported under their own key.
pub fn field_errors(errors: &ValidationErrors) -> serde_json::Value {
    let mut fields = serde_json::Map::new();
    for (field, kind) in errors.errors() {
        let value = match kind {
            validator::ValidationErrorsKind::Field(errors) => {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("Validation error in field: {}", field))
                    })
                    .collect();
                serde_json::json!({ "errors": messages })
            }
            validator::ValidationErrorsKind::Struct(nested) => field_errors(nested),
            validator::ValidationErrorsKind::List(items) => {
                let mut list = serde_json::Map::new();
                for (index, nested) in items {
                    list.insert(index.to_string(), field_errors(nested));
                }
                serde_json::Value::Object(list)
            }
        };
        fields.insert(field.to_string(), value);
    }
    serde_json::Value::Object(fields)
}

fn bad_request(error: &str, fields: serde_json::Value) -> actix_web::Error {
    let error_response = ErrorResponse {
        error: error.to_string(),
        fields,
    };
    actix_web::error::InternalError::from_response("", HttpResponse::BadRequest().json(error_response))
        .into()
}

/// Creates a configured JsonConfig with standardized error handling for the entire project
pub fn json_config(limit: usize) -> actix_web_validator::JsonConfig {
    actix_web_validator::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| match err {
            actix_web_validator::Error::Validate(validation_errors) => {
                bad_request("Validation failed", field_errors(&validation_errors))
            }
            actix_web_validator::Error::Deserialize(de_err) => {
                let err_string = de_err.to_string();
                let message = if err_string.contains("EOF while parsing") {
                    "Request body is empty. Expected JSON payload"
                } else if err_string.contains("unknown variant") {
                    "Invalid enum value. Check allowed values for this field"
                } else {
                    "Invalid JSON format"
                };
                bad_request(
                    "Request validation failed",
                    serde_json::json!({ "message": message }),
                )
            }
            _ => bad_request(
                "Validation failed",
                serde_json::json!({ "message": "Validation error" }),
            ),
        })
}
