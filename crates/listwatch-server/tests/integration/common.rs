use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use listwatch_core::testutil::{MockSessionProvider, MockSite};
use listwatch_core::{
    AppError, CrawlActions, CrawlConfig, CrawlEngine, Dispatcher, DispatcherConfig, JobRegistry,
    JobStatus, RateConfig, RateController, RetentionPolicy, TracingWorkerReporter,
};
use listwatch_server::routes;
use listwatch_server::state::AppState;
use listwatch_store::JsonListingStore;

pub const TEST_API_KEY: &str = "test-secret-key";

pub const PDX_BIKES: &str = "https://portland.example.org/search/bia";
pub const PDX_BOATS: &str = "https://portland.example.org/search/boo";

/// A router wired to a running dispatcher that browses a [`MockSite`] and
/// persists into a temporary data directory.
pub struct TestApp {
    pub router: Router,
    pub registry: JobRegistry,
    pub store: JsonListingStore,
    pub site: MockSite,
    pub manifest: PathBuf,
    cancel: CancellationToken,
    dispatcher: Option<JoinHandle<Result<(), AppError>>>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.dispatcher.take() {
            handle.await.unwrap().unwrap();
        }
    }

    /// Poll until the job reaches a terminal status.
    pub async fn wait_terminal(&self, id: Uuid) -> JobStatus {
        for _ in 0..500 {
            let record = self.registry.status(id).await.unwrap();
            if record.status.is_terminal() {
                return record.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never finished");
    }
}

pub fn site() -> MockSite {
    MockSite::new()
        .with_category(
            PDX_BIKES,
            &[
                "https://portland.example.org/bik/d/101.html",
                "https://portland.example.org/bik/d/102.html",
            ],
        )
        .with_category(PDX_BOATS, &["https://portland.example.org/boa/d/201.html"])
}

pub async fn setup_test_app() -> TestApp {
    build(Some(TEST_API_KEY)).await
}

pub async fn setup_test_app_no_auth() -> TestApp {
    build(None).await
}

async fn build(api_key: Option<&str>) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");

    let manifest = dir.path().join("categories.json");
    let mut file = std::fs::File::create(&manifest).unwrap();
    write!(
        file,
        r#"{{"portland": {{"bikes": "{PDX_BIKES}", "boats": "{PDX_BOATS}"}}}}"#
    )
    .unwrap();

    let store = JsonListingStore::new(dir.path().join("cl"));
    let site = site();
    let (registry, receiver) = JobRegistry::new(RetentionPolicy::KeepAll);

    let rate = RateController::new(RateConfig::new(Duration::ZERO, Duration::ZERO));
    let crawl = CrawlConfig {
        initial_settle: Duration::ZERO,
        ..CrawlConfig::default()
    };
    let engine = CrawlEngine::new(store.clone(), Arc::new(rate), crawl);
    let dispatcher = Dispatcher::new(
        registry.clone(),
        MockSessionProvider::new(site.clone()),
        CrawlActions::new(engine),
        DispatcherConfig::default().with_shutdown_grace(Duration::from_millis(200)),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(dispatcher.run(receiver, cancel.clone(), TracingWorkerReporter));

    let state = Arc::new(AppState {
        registry: registry.clone(),
        store: store.clone(),
        browser: None,
        api_key: api_key.map(str::to_string),
    });

    TestApp {
        router: routes::router(state),
        registry,
        store,
        site,
        manifest,
        cancel,
        dispatcher: Some(handle),
        _dir: dir,
    }
}

/// Send a request carrying the test API key.
pub async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"));
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
