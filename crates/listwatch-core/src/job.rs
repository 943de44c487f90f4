use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::schedule::ScheduleWindow;

/// Status of a job in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending | JobStatus::Running, s) => s.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// The fixed table of operations a job can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Crawl one category.
    #[serde(rename = "update")]
    Update,
    /// Crawl every category of the manifest (or of one city).
    #[serde(rename = "update_all")]
    UpdateAll,
    /// [`Action::Update`] re-run on a jittered interval.
    #[serde(rename = "update_p")]
    UpdatePersistent,
    /// [`Action::UpdateAll`] re-run on a jittered interval.
    #[serde(rename = "update_all_p")]
    UpdateAllPersistent,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Update,
        Action::UpdateAll,
        Action::UpdatePersistent,
        Action::UpdateAllPersistent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Update => "update",
            Action::UpdateAll => "update_all",
            Action::UpdatePersistent => "update_p",
            Action::UpdateAllPersistent => "update_all_p",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Action::Update => "update listings of one category",
            Action::UpdateAll => "update listings of every category in the manifest",
            Action::UpdatePersistent => "update one category on a recurring interval",
            Action::UpdateAllPersistent => "update every category on a recurring interval",
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Action::UpdatePersistent | Action::UpdateAllPersistent)
    }

    pub fn requires_category(&self) -> bool {
        matches!(self, Action::Update | Action::UpdatePersistent)
    }

    /// The persistent counterpart of a one-shot action.
    pub fn persistent(self) -> Self {
        match self {
            Action::Update | Action::UpdatePersistent => Action::UpdatePersistent,
            Action::UpdateAll | Action::UpdateAllPersistent => Action::UpdateAllPersistent,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("no action called '{s}' exists"))
    }
}

pub const DEFAULT_CITY: &str = "portland";
pub const DEFAULT_CATEGORIES_FILE: &str = "data/cl/categories.json";

fn default_categories_file() -> PathBuf {
    PathBuf::from(DEFAULT_CATEGORIES_FILE)
}

fn default_city() -> Option<String> {
    Some(DEFAULT_CITY.to_string())
}

fn default_interval() -> f64 {
    ScheduleWindow::DEFAULT_MINUTES
}

/// Parameter bundle shared by every action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlParams {
    /// Manifest mapping city → category → URL.
    #[serde(default = "default_categories_file")]
    pub categories_file: PathBuf,

    /// Category to crawl; required by the single-category actions.
    #[serde(default)]
    pub category: Option<String>,

    /// City to crawl; `None` means every city.
    #[serde(default = "default_city")]
    pub city: Option<String>,

    /// Ignore `city` and crawl every city of the manifest.
    #[serde(default)]
    pub all_cities: bool,

    /// Lower bound of the persistent interval, in minutes.
    #[serde(default = "default_interval")]
    pub tmin: f64,

    /// Upper bound of the persistent interval, in minutes.
    #[serde(default = "default_interval")]
    pub tmax: f64,
}

impl Default for CrawlParams {
    fn default() -> Self {
        Self {
            categories_file: default_categories_file(),
            category: None,
            city: default_city(),
            all_cities: false,
            tmin: default_interval(),
            tmax: default_interval(),
        }
    }
}

impl CrawlParams {
    /// The city filter after applying `all_cities`.
    pub fn target_city(&self) -> Option<&str> {
        if self.all_cities {
            None
        } else {
            self.city.as_deref()
        }
    }

    pub fn window(&self) -> Result<ScheduleWindow, AppError> {
        ScheduleWindow::new(self.tmin, self.tmax)
    }
}

/// Static description of one request parameter, for help output and API
/// discovery.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParamSpec {
    pub field: &'static str,
    pub flag: &'static str,
    pub short: Option<char>,
    pub required: bool,
    pub default: Option<&'static str>,
    pub help: &'static str,
}

/// Every field of [`CrawlParams`] with its CLI flag.
pub const PARAMS: &[ParamSpec] = &[
    ParamSpec {
        field: "categories_file",
        flag: "categories-file",
        short: Some('C'),
        required: false,
        default: Some(DEFAULT_CATEGORIES_FILE),
        help: "manifest mapping city -> category -> url",
    },
    ParamSpec {
        field: "category",
        flag: "category",
        short: None,
        required: false,
        default: None,
        help: "category to update (required by update and update_p)",
    },
    ParamSpec {
        field: "city",
        flag: "city",
        short: Some('c'),
        required: false,
        default: Some(DEFAULT_CITY),
        help: "city to update for",
    },
    ParamSpec {
        field: "all_cities",
        flag: "all-cities",
        short: None,
        required: false,
        default: Some("false"),
        help: "update every city of the manifest",
    },
    ParamSpec {
        field: "tmin",
        flag: "persistent",
        short: Some('p'),
        required: false,
        default: Some("600"),
        help: "minimum minutes between persistent runs",
    },
    ParamSpec {
        field: "tmax",
        flag: "persistent",
        short: Some('p'),
        required: false,
        default: Some("600"),
        help: "maximum minutes between persistent runs",
    },
];

/// Request to run an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub action: Action,
    #[serde(default)]
    pub params: CrawlParams,
}

impl JobRequest {
    pub fn new(action: Action, params: CrawlParams) -> Self {
        Self { action, params }
    }

    /// Single-category update.
    pub fn update(category: impl Into<String>, city: impl Into<String>) -> Self {
        Self::new(
            Action::Update,
            CrawlParams {
                category: Some(category.into()),
                city: Some(city.into()),
                ..CrawlParams::default()
            },
        )
    }

    pub fn with_categories_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.params.categories_file = path.into();
        self
    }

    /// Reject requests that can never run.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.action.requires_category()
            && self.params.category.as_deref().is_none_or(str::is_empty)
        {
            return Err(AppError::InvalidRequest(format!(
                "action '{}' requires a category",
                self.action
            )));
        }
        if self.action.is_persistent() {
            self.params.window()?;
        }
        Ok(())
    }
}

/// A timestamped line of job output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl OutputEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for OutputEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.at.format("%Y-%m-%dT%H:%M:%S"), self.message)
    }
}

/// A job as tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub action: Action,
    pub status: JobStatus,
    pub output: Vec<OutputEntry>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(id: Uuid, action: Action) -> Self {
        Self {
            id,
            action,
            status: JobStatus::Pending,
            output: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Output lines as `"<timestamp> <message>"`.
    pub fn rendered_output(&self) -> Vec<String> {
        self.output.iter().map(ToString::to_string).collect()
    }
}

/// Configuration for the worker dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on jobs executing at once (one browser session each).
    pub max_concurrent_jobs: usize,
    /// How long shutdown waits for running jobs before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
