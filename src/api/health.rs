use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use sqlx::{Pool, Postgres};
use tracing::{debug, error};

/// Dependencies the health checks inspect.
#[derive(Clone, Default)]
pub struct HealthState {
    pub pool: Option<Pool<Postgres>>,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

enum DatabaseStatus {
    Connected,
    NotConfigured,
    Down(sqlx::Error),
}

async fn check_database(state: &HealthState) -> DatabaseStatus {
    let Some(pool) = &state.pool else {
        return DatabaseStatus::NotConfigured;
    };
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => DatabaseStatus::Connected,
        Err(e) => DatabaseStatus::Down(e),
    }
}

/// Health check endpoint
///
/// General health check including database connectivity when a database
/// is configured. Use for load balancers and uptime monitors.
#[get("/health")]
async fn health_check(state: web::Data<HealthState>) -> impl Responder {
    match check_database(&state).await {
        DatabaseStatus::Connected => HttpResponse::Ok().json(HealthResponse {
            status: "healthy".to_string(),
            database: "connected".to_string(),
            error: None,
        }),
        DatabaseStatus::NotConfigured => HttpResponse::Ok().json(HealthResponse {
            status: "healthy".to_string(),
            database: "not_configured".to_string(),
            error: None,
        }),
        DatabaseStatus::Down(e) => {
            error!("Health check failed: {:?}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "unhealthy".to_string(),
                database: "disconnected".to_string(),
                error: Some(format!("Database error: {}", e)),
            })
        }
    }
}

/// Readiness check endpoint
///
/// Checks if service is ready to accept submissions.
/// Use for Kubernetes readiness probes - removes from load balancer if this fails.
///
/// Returns 503 if dependencies unavailable, but process will recover when they return.
#[get("/ready")]
async fn readiness_check(state: web::Data<HealthState>) -> impl Responder {
    match check_database(&state).await {
        DatabaseStatus::Connected | DatabaseStatus::NotConfigured => {
            debug!("Readiness check passed");
            HttpResponse::Ok().json(HealthResponse {
                status: "ready".to_string(),
                database: if state.pool.is_some() { "connected" } else { "not_configured" }
                    .to_string(),
                error: None,
            })
        }
        DatabaseStatus::Down(e) => {
            error!("Readiness check failed: database unavailable: {:?}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "not_ready".to_string(),
                database: "disconnected".to_string(),
                error: Some(format!("Database unavailable: {}", e)),
            })
        }
    }
}

/// Liveness check endpoint
///
/// Simple check that the process is alive. Does not check dependencies.
/// Use for Kubernetes liveness probes - restarts pod if this fails.
#[get("/live")]
async fn liveness_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "alive".to_string(),
        database: "not_checked".to_string(),
        error: None,
    })
}

pub fn health_config(config: &mut web::ServiceConfig) {
    config
        .service(health_check)
        .service(readiness_check)
        .service(liveness_check);
}
