use super::protocol::*;
use super::service::JobService;
use super::types::JobError;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

pub async fn handle_new_job(
    Extension(service): Extension<Arc<JobService>>,
    Json(request): Json<NewJobRequest>,
) -> (StatusCode, Json<NewJobResponse>) {
    match service.submit(request.job).await {
        Ok(()) => (
            StatusCode::OK,
            Json(NewJobResponse {
                accepted: true,
                reason: None,
            }),
        ),
        Err(e @ JobError::Busy) => (
            StatusCode::CONFLICT,
            Json(NewJobResponse {
                accepted: false,
                reason: Some(e.to_string()),
            }),
        ),
        Err(e @ JobError::Malformed(_)) => (
            StatusCode::BAD_REQUEST,
            Json(NewJobResponse {
                accepted: false,
                reason: Some(e.to_string()),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(NewJobResponse {
                accepted: false,
                reason: Some(e.to_string()),
            }),
        ),
    }
}

pub async fn handle_recruit(
    Extension(service): Extension<Arc<JobService>>,
    Json(request): Json<RecruitRequest>,
) -> (StatusCode, Json<RecruitResponse>) {
    let accepted = service.handle_recruit(&request).await;
    (StatusCode::OK, Json(RecruitResponse { accepted }))
}

pub async fn handle_job_task(
    Extension(service): Extension<Arc<JobService>>,
    Json(request): Json<TaskRequest>,
) -> StatusCode {
    match service.on_task(request).await {
        Ok(()) => StatusCode::OK,
        Err(JobError::UnknownJob(job_id)) => {
            tracing::warn!("Task for unknown job {}", job_id);
            StatusCode::NOT_FOUND
        }
        Err(e) => {
            tracing::warn!("Task routing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_job_result(
    Extension(service): Extension<Arc<JobService>>,
    Json(request): Json<ResultRequest>,
) -> StatusCode {
    match service.on_result(&request).await {
        Ok(()) => StatusCode::OK,
        Err(JobError::UnknownJob(job_id)) => {
            tracing::warn!("Result for job {} this node does not lead", job_id);
            StatusCode::NOT_FOUND
        }
        Err(e) => {
            tracing::warn!("Result routing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_job_done(
    Extension(service): Extension<Arc<JobService>>,
    Json(request): Json<DoneRequest>,
) -> StatusCode {
    service.on_done(&request);
    StatusCode::OK
}
