pub mod actions;
pub mod crawl;
pub mod error;
pub mod job;
pub mod job_queue;
pub mod manifest;
pub mod models;
pub mod parser;
pub mod schedule;
pub mod throttle;
pub mod traits;
pub mod worker;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use actions::CrawlActions;
pub use crawl::{CrawlConfig, CrawlEngine, CrawlSummary};
pub use error::AppError;
pub use job::{Action, CrawlParams, DispatcherConfig, JobRecord, JobRequest, JobStatus};
pub use job_queue::{JobReceiver, JobRegistry, RetentionPolicy};
pub use manifest::Manifest;
pub use models::{CategoryKey, CategoryState, Listing};
pub use schedule::ScheduleWindow;
pub use throttle::{RateConfig, RateController};
pub use traits::{BrowserSession, ListingStore, SessionProvider};
pub use worker::{Dispatcher, JobAction, JobContext, TracingWorkerReporter, WorkerReporter};
