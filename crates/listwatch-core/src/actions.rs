//! The crawl actions a job can run.

use crate::crawl::CrawlEngine;
use crate::error::AppError;
use crate::job::{Action, CrawlParams, JobRequest, JobStatus};
use crate::manifest::Manifest;
use crate::models::CategoryKey;
use crate::schedule::run_persistent;
use crate::traits::{BrowserSession, ListingStore};
use crate::worker::{JobAction, JobContext};

/// Dispatches each [`Action`] onto the crawl engine.
#[derive(Debug, Clone)]
pub struct CrawlActions<St: ListingStore> {
    engine: CrawlEngine<St>,
}

impl<St: ListingStore> CrawlActions<St> {
    pub fn new(engine: CrawlEngine<St>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &CrawlEngine<St> {
        &self.engine
    }

    /// Crawl one category in the requested city, or in every city listing
    /// it when no city is targeted.
    pub async fn update<S: BrowserSession>(
        &self,
        ctx: &JobContext,
        session: &S,
        params: &CrawlParams,
    ) -> Result<JobStatus, AppError> {
        let category = params
            .category
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::InvalidRequest("a category is required".into()))?;
        let manifest = Manifest::load(&params.categories_file).await?;

        let targets = match params.target_city() {
            Some(city) => manifest
                .resolve(city, category)
                .map(|url| vec![(CategoryKey::new(city, category), url.to_string())]),
            None => {
                let targets = manifest.cities_with(category);
                if targets.is_empty() {
                    ctx.log(format!("the category '{category}' does not exist for any city"))
                        .await;
                }
                Ok(targets)
            }
        };
        self.crawl_targets(ctx, session, targets).await
    }

    /// Crawl every category of the requested city, or of the whole
    /// manifest when no city is targeted.
    pub async fn update_all<S: BrowserSession>(
        &self,
        ctx: &JobContext,
        session: &S,
        params: &CrawlParams,
    ) -> Result<JobStatus, AppError> {
        let manifest = Manifest::load(&params.categories_file).await?;
        let targets = manifest.categories(params.target_city());
        self.crawl_targets(ctx, session, targets).await
    }

    async fn crawl_targets<S: BrowserSession>(
        &self,
        ctx: &JobContext,
        session: &S,
        targets: Result<Vec<(CategoryKey, String)>, AppError>,
    ) -> Result<JobStatus, AppError> {
        let targets = match targets {
            Ok(targets) => targets,
            Err(e) if e.ends_job_cleanly() => {
                ctx.log(e.to_string()).await;
                return Ok(JobStatus::Done);
            }
            Err(e) => return Err(e),
        };

        for (key, url) in targets {
            if ctx.is_cancelled() {
                break;
            }
            self.engine.update_category(ctx, session, &key, &url).await?;
        }
        Ok(JobStatus::Done)
    }
}

/// Label persistent runs print before `sleeping till`.
fn persistent_label(request: &JobRequest) -> String {
    let params = &request.params;
    let city = params.target_city().unwrap_or("all");
    match (request.action, params.category.as_deref()) {
        (Action::UpdatePersistent, Some(category)) => format!("{city}-{category}"),
        _ => city.to_string(),
    }
}

impl<S, St> JobAction<S> for CrawlActions<St>
where
    S: BrowserSession,
    St: ListingStore,
{
    async fn run(
        &self,
        ctx: &JobContext,
        session: &S,
        request: &JobRequest,
    ) -> Result<JobStatus, AppError> {
        let params = &request.params;
        match request.action {
            Action::Update => self.update(ctx, session, params).await,
            Action::UpdateAll => self.update_all(ctx, session, params).await,
            Action::UpdatePersistent => {
                let window = params.window()?;
                let label = persistent_label(request);
                run_persistent(ctx, &label, window, || self.update(ctx, session, params)).await
            }
            Action::UpdateAllPersistent => {
                let window = params.window()?;
                let label = persistent_label(request);
                run_persistent(ctx, &label, window, || self.update_all(ctx, session, params))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::crawl::CrawlConfig;
    use crate::job::DispatcherConfig;
    use crate::job_queue::{JobRegistry, RetentionPolicy};
    use crate::testutil::{
        MemoryListingStore, MockSession, MockSessionProvider, MockSite, output_messages,
        test_context,
    };
    use crate::throttle::{RateConfig, RateController};
    use crate::worker::{Dispatcher, TracingWorkerReporter};

    const PDX_BIKES: &str = "https://portland.example.org/search/bia";
    const PDX_BOATS: &str = "https://portland.example.org/search/boo";
    const SEA_BIKES: &str = "https://seattle.example.org/search/bia";

    fn manifest_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "portland": {{"bikes": "{PDX_BIKES}", "boats": "{PDX_BOATS}"}},
                "seattle": {{"bikes": "{SEA_BIKES}"}}
            }}"#
        )
        .unwrap();
        file
    }

    fn site() -> MockSite {
        MockSite::new()
            .with_category(PDX_BIKES, &["https://portland.example.org/bik/1.html"])
            .with_category(PDX_BOATS, &["https://portland.example.org/boa/2.html"])
            .with_category(SEA_BIKES, &["https://seattle.example.org/bik/3.html"])
    }

    fn actions(store: MemoryListingStore) -> CrawlActions<MemoryListingStore> {
        let rate = RateController::new(RateConfig::new(Duration::ZERO, Duration::ZERO));
        let config = CrawlConfig {
            initial_settle: Duration::ZERO,
            ..CrawlConfig::default()
        };
        CrawlActions::new(CrawlEngine::new(store, Arc::new(rate), config))
    }

    fn params(file: &tempfile::NamedTempFile) -> CrawlParams {
        CrawlParams {
            categories_file: file.path().to_path_buf(),
            ..CrawlParams::default()
        }
    }

    #[tokio::test]
    async fn update_defaults_to_portland() {
        let file = manifest_file();
        let (ctx, _registry) = test_context().await;
        let store = MemoryListingStore::new();
        let request = JobRequest::new(
            Action::Update,
            CrawlParams {
                category: Some("bikes".into()),
                ..params(&file)
            },
        );

        let status = actions(store.clone())
            .run(&ctx, &MockSession::new(site()), &request)
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Done);
        assert!(store.get(&CategoryKey::new("portland", "bikes")).is_some());
        assert!(store.get(&CategoryKey::new("seattle", "bikes")).is_none());
    }

    #[tokio::test]
    async fn update_all_cities_visits_every_city_with_the_category() {
        let file = manifest_file();
        let (ctx, _registry) = test_context().await;
        let store = MemoryListingStore::new();
        let request = JobRequest::new(
            Action::Update,
            CrawlParams {
                category: Some("bikes".into()),
                all_cities: true,
                ..params(&file)
            },
        );

        actions(store.clone())
            .run(&ctx, &MockSession::new(site()), &request)
            .await
            .unwrap();

        assert!(store.get(&CategoryKey::new("portland", "bikes")).is_some());
        assert!(store.get(&CategoryKey::new("seattle", "bikes")).is_some());
        assert!(store.get(&CategoryKey::new("portland", "boats")).is_none());
    }

    #[tokio::test]
    async fn update_all_iterates_the_manifest_in_order() {
        let file = manifest_file();
        let (ctx, registry) = test_context().await;
        let store = MemoryListingStore::new();
        let request = JobRequest::new(
            Action::UpdateAll,
            CrawlParams {
                city: None,
                ..params(&file)
            },
        );

        actions(store.clone())
            .run(&ctx, &MockSession::new(site()), &request)
            .await
            .unwrap();

        assert_eq!(store.saves(), 3);
        let started: Vec<_> = output_messages(&registry, &ctx)
            .await
            .into_iter()
            .filter(|m| m.ends_with(": started"))
            .collect();
        assert_eq!(
            started,
            [
                "portland-bikes: started",
                "portland-boats: started",
                "seattle-bikes: started",
            ]
        );
    }

    #[tokio::test]
    async fn update_all_restricted_to_one_city() {
        let file = manifest_file();
        let (ctx, _registry) = test_context().await;
        let store = MemoryListingStore::new();
        let request = JobRequest::new(
            Action::UpdateAll,
            CrawlParams {
                city: Some("seattle".into()),
                ..params(&file)
            },
        );

        actions(store.clone())
            .run(&ctx, &MockSession::new(site()), &request)
            .await
            .unwrap();
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn unknown_city_is_reported_and_done() {
        let file = manifest_file();
        let (ctx, registry) = test_context().await;
        let request = JobRequest::new(
            Action::Update,
            CrawlParams {
                category: Some("bikes".into()),
                city: Some("bend".into()),
                ..params(&file)
            },
        );

        let status = actions(MemoryListingStore::new())
            .run(&ctx, &MockSession::new(site()), &request)
            .await
            .unwrap();

        assert_eq!(status, JobStatus::Done);
        assert_eq!(
            output_messages(&registry, &ctx).await,
            ["the city url data for 'bend' does not exist"]
        );
    }

    #[tokio::test]
    async fn unknown_category_is_reported_and_done() {
        let file = manifest_file();
        let (ctx, registry) = test_context().await;
        let request = JobRequest::new(
            Action::Update,
            CrawlParams {
                category: Some("boats".into()),
                city: Some("seattle".into()),
                ..params(&file)
            },
        );

        let status = actions(MemoryListingStore::new())
            .run(&ctx, &MockSession::new(site()), &request)
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Done);
        assert_eq!(
            output_messages(&registry, &ctx).await,
            ["the category 'boats' does not exist for city 'seattle'"]
        );
    }

    #[tokio::test]
    async fn missing_manifest_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, receiver) = JobRegistry::new(RetentionPolicy::KeepAll);
        let provider = MockSessionProvider::new(site());
        let dispatcher = Dispatcher::new(
            registry.clone(),
            provider.clone(),
            actions(MemoryListingStore::new()),
            DispatcherConfig::default(),
        );
        let cancel = tokio_util::sync::CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run(receiver, cancel.clone(), TracingWorkerReporter));

        let id = registry
            .submit(
                JobRequest::update("bikes", "portland")
                    .with_categories_file(dir.path().join("categories.json")),
            )
            .await
            .unwrap();

        let record = loop {
            let record = registry.status(id).await.unwrap();
            if record.status.is_terminal() {
                break record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        assert_eq!(record.status, JobStatus::Failed);
        let last = record.rendered_output().pop().unwrap();
        assert!(last.contains(" error: the categories file '"), "{last}");
        assert!(last.ends_with("' does not exist"));
        assert_eq!(provider.closed(), 1);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_update_sleeps_between_runs() {
        let file = manifest_file();
        let (ctx, registry) = test_context().await;
        let store = MemoryListingStore::new();
        let request = JobRequest::new(
            Action::UpdatePersistent,
            CrawlParams {
                category: Some("bikes".into()),
                tmin: 1.0,
                tmax: 1.0,
                ..params(&file)
            },
        );

        let handle = {
            let ctx = ctx.clone();
            let store = store.clone();
            tokio::spawn(async move {
                actions(store)
                    .run(&ctx, &MockSession::new(site()), &request)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(90)).await;
        ctx.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), JobStatus::Done);

        assert_eq!(store.saves(), 2);
        let sleeping: Vec<_> = output_messages(&registry, &ctx)
            .await
            .into_iter()
            .filter(|m| m.starts_with("portland-bikes: sleeping till "))
            .collect();
        assert_eq!(sleeping.len(), 2);
    }

    #[test]
    fn labels_for_persistent_runs() {
        let mut request = JobRequest::update("bikes", "portland");
        request.action = Action::UpdatePersistent;
        assert_eq!(persistent_label(&request), "portland-bikes");

        request.action = Action::UpdateAllPersistent;
        request.params.all_cities = true;
        assert_eq!(persistent_label(&request), "all");
    }
}
