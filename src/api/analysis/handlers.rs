use actix_web::{
    HttpResponse, get, post,
    web::{Data, Path, ServiceConfig, scope},
};
use actix_web_validator::Json;

use super::dto::{ResultResponse, SubmitResponse};
use crate::pipeline::{AnalysisRequest, AnalysisService, ServiceError};

/// Queue a mesh for analysis. Returns as soon as the job is recorded.
#[post("")]
async fn submit_analysis(
    service: Data<AnalysisService>,
    request: Json<AnalysisRequest>,
) -> Result<HttpResponse, ServiceError> {
    let job_id = service.submit(request.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(SubmitResponse {
        job_id,
        message: "Analysis job queued".to_string(),
    }))
}

#[get("/jobs/{job_id}")]
async fn job_status(
    service: Data<AnalysisService>,
    job_id: Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let view = service.status(&job_id).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[get("/results/{result_id}")]
async fn analysis_result(
    service: Data<AnalysisService>,
    result_id: Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let result = service.result(&result_id).await?;
    Ok(HttpResponse::Ok().json(ResultResponse::from(result)))
}

pub fn analysis_config(config: &mut ServiceConfig) {
    config.service(
        scope("analysis")
            .service(submit_analysis)
            .service(job_status)
            .service(analysis_result),
    );
}
