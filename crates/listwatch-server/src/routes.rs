use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use listwatch_core::error::AppError;
use listwatch_core::job::{Action, CrawlParams, JobRequest, JobStatus};

use crate::auth::require_api_key;
use crate::dto::{
    ActionsResponse, CreateJobRequest, CreateJobResponse, ErrorResponse, HealthResponse,
    JobListResponse, JobResponse, ListJobsQuery,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/jobs", post(create_job).get(list_jobs))
        .route("/v1/jobs/{id}", get(get_job))
        .route("/v1/actions", get(list_actions))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

/// Turn the wire form of a submission into a job request.
fn parse_request(body: CreateJobRequest) -> Result<JobRequest, AppError> {
    let action: Action = body.action.parse().map_err(AppError::InvalidRequest)?;
    let params: CrawlParams = match body.params {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| AppError::InvalidRequest(format!("invalid params: {e}")))?,
        None => CrawlParams::default(),
    };
    Ok(JobRequest::new(action, params))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job queued", body = CreateJobResponse),
        (status = 400, description = "Unknown action or invalid parameters", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "API disabled"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = parse_request(body)?;
    let action = request.action;
    let job_id = state.registry.submit(request).await?;
    tracing::info!(%job_id, %action, "Job accepted");

    let response = CreateJobResponse {
        job_id,
        status: "init".to_string(),
    };

    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Status of every job", body = JobListResponse),
        (status = 400, description = "Unknown status", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status_filter = query
        .status
        .map(|s| s.parse::<JobStatus>().map_err(AppError::InvalidRequest))
        .transpose()?;

    let jobs: BTreeMap<Uuid, String> = state
        .registry
        .list(status_filter)
        .await
        .into_iter()
        .map(|(id, status)| (id, status.to_string()))
        .collect();
    let total = jobs.len();

    Ok(axum::Json(JobListResponse { jobs, total }))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Unknown job", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Ok(job_id) = Uuid::parse_str(&id) else {
        let body = ErrorResponse::new("invalid_id", format!("invalid job id '{id}'"));
        return Ok((StatusCode::NOT_FOUND, axum::Json(body)).into_response());
    };

    let record = state.registry.status(job_id).await?;
    Ok(axum::Json(JobResponse::from(record)).into_response())
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/actions",
    responses(
        (status = 200, description = "Available actions and their parameters", body = ActionsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn list_actions() -> impl IntoResponse {
    axum::Json(ActionsResponse::table())
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = match state.store.health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Store health check failed");
            "error"
        }
    };

    let browser = match &state.browser {
        Some(browser) if browser.is_running().await => "ok",
        Some(_) => "error",
        None => "disabled",
    };

    let jobs = state
        .registry
        .counts()
        .await
        .into_iter()
        .map(|(status, count)| (status.to_string(), count))
        .collect();

    let healthy = store == "ok" && browser != "error";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        store,
        browser,
        jobs,
    };

    (status, axum::Json(response))
}
