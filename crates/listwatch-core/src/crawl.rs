//! Per-category crawl: enumerate the live result list, diff it against the
//! stored state, fetch the new postings and persist the result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::AppError;
use crate::models::{CategoryKey, Listing};
use crate::parser::{self, LIST_VIEW_FRAGMENT, RESULT_LINK_SELECTOR};
use crate::throttle::RateController;
use crate::traits::{BrowserSession, ListingStore};
use crate::worker::JobContext;

/// Tuning knobs of a crawl run.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Wait after opening a category page before reading it.
    pub initial_settle: Duration,
    /// Pixels scrolled between two result-collection passes.
    pub scroll_step: u32,
    /// Consecutive passes without a new result before the scan gives up.
    pub max_stalled_passes: usize,
    /// Block-page retries allowed per posting.
    pub max_block_retries: u32,
    /// Page title the site serves when it refuses a request.
    pub blocked_title: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            initial_settle: Duration::from_secs(5),
            scroll_step: 3000,
            max_stalled_passes: 25,
            max_block_retries: 8,
            blocked_title: "blocked".to_string(),
        }
    }
}

/// Counters of one category run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub scanned: usize,
    pub added: usize,
    pub sold: usize,
    pub failed: usize,
}

/// Runs category crawls against a listing store, sharing one rate
/// controller across every job.
#[derive(Debug, Clone)]
pub struct CrawlEngine<St: ListingStore> {
    store: St,
    rate: Arc<RateController>,
    config: CrawlConfig,
}

impl<St: ListingStore> CrawlEngine<St> {
    pub fn new(store: St, rate: Arc<RateController>, config: CrawlConfig) -> Self {
        Self {
            store,
            rate,
            config,
        }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    pub fn rate(&self) -> &RateController {
        &self.rate
    }

    /// Collect the distinct result urls of a category page, in page order.
    ///
    /// The page lazily renders results as it is scrolled, so links are
    /// gathered pass by pass until as many distinct urls as the page
    /// reports have been seen.
    pub async fn enumerate<S: BrowserSession>(
        &self,
        session: &S,
        url: &str,
    ) -> Result<Vec<String>, AppError> {
        session.goto(&format!("{url}{LIST_VIEW_FRAGMENT}")).await?;
        tokio::time::sleep(self.config.initial_settle).await;

        let total = parser::parse_total_count(&session.content().await?)?;

        let mut found: Vec<String> = Vec::with_capacity(total);
        let mut seen: HashSet<String> = HashSet::with_capacity(total);
        let mut offset = 0u32;
        let mut stalled = 0usize;

        while found.len() < total {
            session.settle().await?;
            let before = found.len();
            for href in session.visible_links(RESULT_LINK_SELECTOR).await? {
                if let Some(link) = parser::absolutize(&href, url)
                    && seen.insert(link.clone())
                {
                    found.push(link);
                }
            }

            if found.len() == before {
                stalled += 1;
                if stalled >= self.config.max_stalled_passes {
                    tracing::warn!(
                        %url,
                        found = found.len(),
                        total,
                        "Result list stopped growing, ending scan early"
                    );
                    break;
                }
            } else {
                stalled = 0;
            }

            offset = offset.saturating_add(self.config.scroll_step);
            session.scroll_to(offset).await?;
        }

        tracing::debug!(%url, found = found.len(), total, "Category enumerated");
        Ok(found)
    }

    /// Fetch and parse one posting, backing off while the site serves its
    /// block page.
    pub async fn fetch_listing<S: BrowserSession>(
        &self,
        session: &S,
        url: &str,
    ) -> Result<Listing, AppError> {
        let mut retries = 0u32;
        loop {
            self.rate.throttle().await;
            session.goto(url).await?;
            let title = session.title().await?;

            if title == self.config.blocked_title {
                if retries >= self.config.max_block_retries {
                    return Err(AppError::Blocked {
                        url: url.to_string(),
                        attempts: retries + 1,
                    });
                }
                retries += 1;
                tracing::warn!(
                    %url,
                    attempt = retries,
                    backoff_secs = self.rate.block_backoff().as_secs(),
                    "Blocked, backing off"
                );
                tokio::time::sleep(self.rate.block_backoff()).await;
                self.rate.escalate();
                continue;
            }

            self.rate.relax();
            let html = session.content().await?;
            return parser::parse_listing(&html, url, Utc::now());
        }
    }

    /// Crawl one category and persist its new state.
    ///
    /// Failures to fetch a single posting are recorded in the job output
    /// and skipped; failures to enumerate or to load/save the state abort
    /// the run.
    pub async fn update_category<S: BrowserSession>(
        &self,
        ctx: &JobContext,
        session: &S,
        key: &CategoryKey,
        url: &str,
    ) -> Result<CrawlSummary, AppError> {
        ctx.log(format!("{key}: started")).await;
        tracing::info!(job_id = %ctx.id(), category = %key, "Category crawl started");

        let mut state = self.store.load(key).await?;
        let scanned = self.enumerate(session, url).await?;

        let sold_before = state.sold.len();
        let fresh = state.reconcile(&scanned, Utc::now());
        let mut summary = CrawlSummary {
            scanned: scanned.len(),
            sold: state.sold.len() - sold_before,
            ..CrawlSummary::default()
        };

        ctx.log(format!("{key}: retrieving {} new posts", fresh.len()))
            .await;

        for link in &fresh {
            if ctx.is_cancelled() {
                tracing::info!(category = %key, "Crawl interrupted by shutdown");
                break;
            }
            match self.fetch_listing(session, link).await {
                Ok(listing) => {
                    state.activate(listing);
                    summary.added += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(category = %key, url = %link, error = %e, "Posting fetch failed");
                    ctx.log(format!("{key}: error at {link}: {e}")).await;
                }
            }
        }

        self.store.save(key, &state).await?;
        ctx.log(format!("{key}: ended")).await;
        tracing::info!(
            job_id = %ctx.id(),
            category = %key,
            scanned = summary.scanned,
            added = summary.added,
            sold = summary.sold,
            failed = summary.failed,
            "Category crawl ended"
        );
        Ok(summary)
    }
}
