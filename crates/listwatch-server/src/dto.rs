use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use listwatch_core::job::{Action, JobRecord, PARAMS, ParamSpec};

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateJobRequest {
    /// One of `update`, `update_all`, `update_p`, `update_all_p`.
    pub action: String,
    /// Action parameters; omitted fields take their defaults.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub action: String,
    pub status: String,
    /// Output lines, each prefixed with its timestamp.
    pub output: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            action: record.action.to_string(),
            status: record.status.to_string(),
            output: record.rendered_output(),
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    /// Only jobs with this status.
    pub status: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    /// Job id → status.
    pub jobs: BTreeMap<Uuid, String>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ActionInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub persistent: bool,
    pub requires_category: bool,
}

impl From<Action> for ActionInfo {
    fn from(action: Action) -> Self {
        Self {
            name: action.as_str(),
            description: action.description(),
            persistent: action.is_persistent(),
            requires_category: action.requires_category(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ParamInfo {
    pub field: &'static str,
    pub flag: &'static str,
    pub short: Option<String>,
    pub required: bool,
    pub default: Option<&'static str>,
    pub help: &'static str,
}

impl From<&ParamSpec> for ParamInfo {
    fn from(spec: &ParamSpec) -> Self {
        Self {
            field: spec.field,
            flag: spec.flag,
            short: spec.short.map(String::from),
            required: spec.required,
            default: spec.default,
            help: spec.help,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ActionsResponse {
    pub actions: Vec<ActionInfo>,
    pub params: Vec<ParamInfo>,
}

impl ActionsResponse {
    pub fn table() -> Self {
        Self {
            actions: Action::ALL.into_iter().map(ActionInfo::from).collect(),
            params: PARAMS.iter().map(ParamInfo::from).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub browser: &'static str,
    /// Number of jobs per status.
    pub jobs: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Common
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
