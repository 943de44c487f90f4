//! Test utilities: in-memory fakes for the browser, the listing store and
//! the job registry.
//!
//! All fakes share their state through `Arc<Mutex<_>>` so a test can keep a
//! handle and assert on recorded calls after the code under test ran.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::JobRequest;
use crate::job_queue::{JobRegistry, RetentionPolicy};
use crate::models::{CategoryKey, CategoryState, Listing};
use crate::parser::LIST_VIEW_FRAGMENT;
use crate::traits::{BrowserSession, ListingStore, SessionProvider};
use crate::worker::{JobContext, WorkerEvent, WorkerReporter};

/// Pixels the mock treats as one scroll step when revealing results.
pub const MOCK_SCROLL_STEP: u32 = 3000;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A minimal active listing.
pub fn make_listing(id: &str, url: &str) -> Listing {
    Listing {
        id: id.to_string(),
        url: url.to_string(),
        title: format!("listing {id}"),
        price: Some(100.0),
        title_location: None,
        description: String::new(),
        location: Default::default(),
        posted: None,
        attributes: Default::default(),
        last_seen: Utc::now(),
        sold: false,
    }
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Category results page reporting `total` results.
pub fn category_page_html(total: usize) -> String {
    format!(
        r#"<html><head><title>bicycles - by owner</title></head><body>
        <div class="cl-results-page">
          <div class="visible-counts"><span>1 - {shown}</span><span>of {total}</span></div>
        </div>
        </body></html>"#,
        shown = total.min(120),
        total = group_thousands(total),
    )
}

/// Posting detail page with the required fields and an optional price.
pub fn detail_page_html(id: &str, title: &str, price: Option<&str>) -> String {
    let price = price
        .map(|p| format!(r#"<span class="price">{p}</span>"#))
        .unwrap_or_default();
    format!(
        r#"<html><head><title>{title}</title></head><body>
        <h1 class="postingtitle"><span class="postingtitletext">
          <span id="titletextonly">{title}</span>
          {price}
        </span></h1>
        <section id="postingbody">posting {id}</section>
        <div class="postinginfos">
          <p class="postinginfo">post id: {id}</p>
        </div>
        </body></html>"#
    )
}

// ---------------------------------------------------------------------------
// MockSite / MockSession
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SiteState {
    /// Category page url (without fragment) → result urls in page order.
    categories: HashMap<String, Vec<String>>,
    /// Overrides the total a category page reports.
    reported_totals: HashMap<String, usize>,
    /// Page url → title served instead of the default.
    titles: HashMap<String, String>,
    /// Detail page url → html.
    pages: HashMap<String, String>,
    /// Detail page url → number of upcoming visits answered with the block page.
    blocked: HashMap<String, usize>,
    /// Urls whose navigation fails.
    unreachable: HashSet<String>,
    /// Results revealed per scroll step; `None` shows everything at once.
    batch: Option<usize>,
    visits: Vec<String>,
}

/// Fake classifieds site shared by every [`MockSession`].
#[derive(Debug, Clone, Default)]
pub struct MockSite {
    state: Arc<Mutex<SiteState>>,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a category page with the given result urls, and a detail
    /// page for each of them whose post id is the url's file stem.
    pub fn with_category(self, url: &str, results: &[&str]) -> Self {
        self.set_results(url, results);
        self
    }

    /// Replace the result list of a category page.
    pub fn set_results(&self, url: &str, results: &[&str]) {
        let mut state = self.state.lock().unwrap();
        for result in results {
            state
                .pages
                .entry(result.to_string())
                .or_insert_with(|| detail_page_html(&post_id(result), "posting", Some("$100")));
        }
        state.categories.insert(
            url.to_string(),
            results.iter().map(|r| r.to_string()).collect(),
        );
    }

    pub fn with_page(self, url: &str, html: impl Into<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(url.to_string(), html.into());
        self
    }

    pub fn with_title(self, url: &str, title: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .titles
            .insert(url.to_string(), title.to_string());
        self
    }

    pub fn with_reported_total(self, url: &str, total: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .reported_totals
            .insert(url.to_string(), total);
        self
    }

    /// Answer the next `times` visits of `url` with the block page.
    pub fn with_blocked(self, url: &str, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .blocked
            .insert(url.to_string(), times);
        self
    }

    pub fn with_unreachable(self, url: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .unreachable
            .insert(url.to_string());
        self
    }

    pub fn with_batch(self, batch: usize) -> Self {
        self.state.lock().unwrap().batch = Some(batch);
        self
    }

    /// Every navigation so far, in order.
    pub fn visits(&self) -> Vec<String> {
        self.state.lock().unwrap().visits.clone()
    }

    pub fn visit_count(&self, url: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .visits
            .iter()
            .filter(|v| v.as_str() == url)
            .count()
    }
}

/// Post id derived from a result url: the file stem, e.g. `.../77.html` → `77`.
pub fn post_id(url: &str) -> String {
    let file = url.rsplit('/').next().unwrap_or(url);
    file.split('.').next().unwrap_or(file).to_string()
}

#[derive(Debug, Default)]
struct Cursor {
    url: Option<String>,
    blocked: bool,
    offset: u32,
}

/// One fake browsing session on a [`MockSite`].
#[derive(Debug, Clone)]
pub struct MockSession {
    site: MockSite,
    cursor: Arc<Mutex<Cursor>>,
}

impl MockSession {
    pub fn new(site: MockSite) -> Self {
        Self {
            site,
            cursor: Arc::new(Mutex::new(Cursor::default())),
        }
    }

    fn current(&self) -> Result<String, AppError> {
        self.cursor
            .lock()
            .unwrap()
            .url
            .clone()
            .ok_or_else(|| AppError::NavigationError("no page loaded".into()))
    }
}

impl BrowserSession for MockSession {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        let page = url.strip_suffix(LIST_VIEW_FRAGMENT).unwrap_or(url);
        let blocked = {
            let mut state = self.site.state.lock().unwrap();
            state.visits.push(page.to_string());
            if state.unreachable.contains(page) {
                return Err(AppError::NavigationError(format!(
                    "net::ERR_CONNECTION_RESET at {page}"
                )));
            }
            match state.blocked.get_mut(page) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        let mut cursor = self.cursor.lock().unwrap();
        *cursor = Cursor {
            url: Some(page.to_string()),
            blocked,
            offset: 0,
        };
        Ok(())
    }

    async fn title(&self) -> Result<String, AppError> {
        if self.cursor.lock().unwrap().blocked {
            return Ok("blocked".to_string());
        }
        let url = self.current()?;
        let state = self.site.state.lock().unwrap();
        if let Some(title) = state.titles.get(&url) {
            Ok(title.clone())
        } else if state.categories.contains_key(&url) {
            Ok("bicycles - by owner".to_string())
        } else if state.pages.contains_key(&url) {
            Ok("posting".to_string())
        } else {
            Ok("Page Not Found".to_string())
        }
    }

    async fn content(&self) -> Result<String, AppError> {
        let url = self.current()?;
        let state = self.site.state.lock().unwrap();
        if let Some(results) = state.categories.get(&url) {
            let total = state
                .reported_totals
                .get(&url)
                .copied()
                .unwrap_or(results.len());
            return Ok(category_page_html(total));
        }
        Ok(state
            .pages
            .get(&url)
            .cloned()
            .unwrap_or_else(|| "<html><body>404</body></html>".to_string()))
    }

    async fn visible_links(&self, _selector: &str) -> Result<Vec<String>, AppError> {
        let url = self.current()?;
        let offset = self.cursor.lock().unwrap().offset;
        let state = self.site.state.lock().unwrap();
        let results = state.categories.get(&url).cloned().unwrap_or_default();
        let visible = match state.batch {
            Some(batch) => batch * (offset / MOCK_SCROLL_STEP + 1) as usize,
            None => results.len(),
        };
        Ok(results.into_iter().take(visible).collect())
    }

    async fn scroll_to(&self, offset: u32) -> Result<(), AppError> {
        self.cursor.lock().unwrap().offset = offset;
        Ok(())
    }

    async fn settle(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Provider handing out [`MockSession`]s and counting open/close calls.
#[derive(Debug, Clone)]
pub struct MockSessionProvider {
    site: MockSite,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    open_error: Arc<Mutex<Option<AppError>>>,
}

impl MockSessionProvider {
    pub fn new(site: MockSite) -> Self {
        Self {
            site,
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            open_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn site(&self) -> &MockSite {
        &self.site
    }

    pub fn fail_next_open(&self, error: AppError) {
        *self.open_error.lock().unwrap() = Some(error);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SessionProvider for MockSessionProvider {
    type Session = MockSession;

    async fn open_session(&self) -> Result<MockSession, AppError> {
        if let Some(e) = self.open_error.lock().unwrap().take() {
            return Err(e);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession::new(self.site.clone()))
    }

    async fn close_session(&self, _session: MockSession) -> Result<(), AppError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryListingStore
// ---------------------------------------------------------------------------

/// Listing store keeping documents in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryListingStore {
    documents: Arc<Mutex<HashMap<CategoryKey, CategoryState>>>,
    saves: Arc<AtomicUsize>,
    save_error: Arc<Mutex<Option<AppError>>>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: CategoryKey, state: CategoryState) {
        self.documents.lock().unwrap().insert(key, state);
    }

    pub fn get(&self, key: &CategoryKey) -> Option<CategoryState> {
        self.documents.lock().unwrap().get(key).cloned()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_next_save(&self, error: AppError) {
        *self.save_error.lock().unwrap() = Some(error);
    }
}

impl ListingStore for MemoryListingStore {
    async fn load(&self, key: &CategoryKey) -> Result<CategoryState, AppError> {
        Ok(self.get(key).unwrap_or_default())
    }

    async fn save(&self, key: &CategoryKey, state: &CategoryState) -> Result<(), AppError> {
        if let Some(e) = self.save_error.lock().unwrap().take() {
            return Err(e);
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.insert(key.clone(), state.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A registered job and its context, for driving actions directly.
///
/// The queue's receiver is dropped, so nothing else runs the job.
pub async fn test_context() -> (JobContext, JobRegistry) {
    let (registry, receiver) = JobRegistry::new(RetentionPolicy::KeepAll);
    let id = registry
        .submit(JobRequest::update("bikes", "portland"))
        .await
        .unwrap();
    drop(receiver);
    registry.mark_running(id).await;
    let ctx = JobContext::new(id, registry.clone(), CancellationToken::new());
    (ctx, registry)
}

/// Messages of a job's output, without timestamps.
pub async fn output_messages(registry: &JobRegistry, ctx: &JobContext) -> Vec<String> {
    registry
        .status(ctx.id())
        .await
        .map(|r| r.output.into_iter().map(|e| e.message).collect())
        .unwrap_or_default()
}

/// Reporter recording the kind of every event it sees.
#[derive(Debug, Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let kind = match event {
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::JobReceived { .. } => "received",
            WorkerEvent::JobStarted { .. } => "job_started",
            WorkerEvent::JobCompleted { .. } => "completed",
            WorkerEvent::JobFailed { .. } => "failed",
            WorkerEvent::SessionCloseFailed { .. } => "session_close_failed",
            WorkerEvent::ShuttingDown { .. } => "shutting_down",
            WorkerEvent::Stopped { .. } => "stopped",
        };
        self.events.lock().unwrap().push(kind.to_string());
    }
}
