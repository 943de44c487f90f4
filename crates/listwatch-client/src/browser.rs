use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use listwatch_core::error::AppError;
use listwatch_core::traits::{BrowserSession, SessionProvider};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Launch and navigation settings for the shared browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Explicit Chrome/Chromium binary; discovered when `None`.
    pub chrome_bin: Option<PathBuf>,
    /// Upper bound on a single navigation.
    pub nav_timeout: Duration,
    /// Quiet period a page must show before it counts as settled.
    pub settle_delay: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_bin: None,
            nav_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(1),
        }
    }
}

struct Inner {
    browser: RwLock<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    options: BrowserOptions,
}

/// Owns the single Chromium process and hands out isolated sessions.
///
/// Each session is a fresh browser context (own cookies and storage) with
/// one page in it. Clones share the same process.
///
/// # Example
///
/// ```rust,no_run
/// use listwatch_client::{BrowserOptions, BrowserSessionManager};
/// use listwatch_core::traits::{BrowserSession, SessionProvider};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let browser = BrowserSessionManager::launch(BrowserOptions::default()).await?;
/// let session = browser.open_session().await?;
/// session.goto("https://example.com").await?;
/// println!("{}", session.title().await?);
/// browser.close_session(session).await?;
/// browser.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserSessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BrowserSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSessionManager")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl BrowserSessionManager {
    /// Launch the browser process. Fails if no usable Chromium is found.
    pub async fn launch(options: BrowserOptions) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        let binary = options.chrome_bin.clone().or_else(find_chrome_binary);
        if let Some(bin) = binary {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        if options.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("Browser CDP handler error: {e}");
                    break;
                }
            }
        });

        tracing::info!(headless = options.headless, "Browser launched");
        Ok(Self {
            inner: Arc::new(Inner {
                browser: RwLock::new(Some(browser)),
                handler: Mutex::new(Some(handle)),
                options,
            }),
        })
    }

    pub fn options(&self) -> &BrowserOptions {
        &self.inner.options
    }

    /// Whether the browser process is up and answering.
    pub async fn is_running(&self) -> bool {
        let guard = self.inner.browser.read().await;
        match guard.as_ref() {
            Some(browser) => browser.version().await.is_ok(),
            None => false,
        }
    }

    /// Close the browser process. Sessions still open become unusable.
    pub async fn shutdown(&self) {
        let browser = self.inner.browser.write().await.take();
        if let Some(mut browser) = browser {
            if let Err(e) = browser.close().await {
                tracing::warn!("Failed to close browser: {e}");
            }
            let _ = browser.wait().await;
        }
        if let Some(handle) = self.inner.handler.lock().await.take() {
            handle.abort();
        }
        tracing::info!("Browser closed");
    }

    async fn dispose_context(&self, browser: &Browser, context_id: BrowserContextId) {
        if let Err(e) = browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
        {
            tracing::warn!("Failed to dispose browser context: {e}");
        }
    }
}

impl SessionProvider for BrowserSessionManager {
    type Session = ChromiumSession;

    async fn open_session(&self) -> Result<ChromiumSession, AppError> {
        let guard = self.inner.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| AppError::BrowserError("browser is shut down".into()))?;

        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to create context: {e}")))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(AppError::BrowserError)?;

        match browser.new_page(target).await {
            Ok(page) => Ok(ChromiumSession {
                page,
                context_id,
                nav_timeout: self.inner.options.nav_timeout,
                settle_delay: self.inner.options.settle_delay,
            }),
            Err(e) => {
                self.dispose_context(browser, context_id).await;
                Err(AppError::BrowserError(format!("Failed to open page: {e}")))
            }
        }
    }

    async fn close_session(&self, session: ChromiumSession) -> Result<(), AppError> {
        let ChromiumSession {
            page, context_id, ..
        } = session;
        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close page: {e}");
        }
        let guard = self.inner.browser.read().await;
        if let Some(browser) = guard.as_ref() {
            self.dispose_context(browser, context_id).await;
        }
        Ok(())
    }
}

/// One page inside its own browser context.
#[derive(Debug)]
pub struct ChromiumSession {
    page: Page,
    context_id: BrowserContextId,
    nav_timeout: Duration,
    settle_delay: Duration,
}

impl ChromiumSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, AppError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| AppError::BrowserError(format!("Script failed: {e}")))?
            .into_value()
            .map_err(|e| AppError::BrowserError(format!("Unexpected script result: {e}")))
    }
}

/// Collects hrefs of matching elements until the first one that has no
/// layout box yet.
fn visible_links_script(selector: &str) -> Result<String, AppError> {
    let selector = serde_json::to_string(selector)?;
    Ok(format!(
        r#"(() => {{
            const out = [];
            for (const el of document.querySelectorAll({selector})) {{
                const r = el.getBoundingClientRect();
                if (r.width === 0 && r.height === 0) break;
                out.push(el.getAttribute("href") || "");
            }}
            return out;
        }})()"#
    ))
}

impl BrowserSession for ChromiumSession {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        match tokio::time::timeout(self.nav_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::NavigationError(format!(
                "Failed to navigate to {url}: {e}"
            ))),
            Err(_) => Err(AppError::Timeout(self.nav_timeout.as_secs())),
        }
    }

    async fn title(&self) -> Result<String, AppError> {
        self.page
            .get_title()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| AppError::BrowserError(format!("Failed to read title: {e}")))
    }

    async fn content(&self) -> Result<String, AppError> {
        self.page
            .content()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to read page content: {e}")))
    }

    async fn visible_links(&self, selector: &str) -> Result<Vec<String>, AppError> {
        self.eval(visible_links_script(selector)?).await
    }

    async fn scroll_to(&self, offset: u32) -> Result<(), AppError> {
        self.eval::<serde_json::Value>(format!("window.scrollTo(0, {offset}); true"))
            .await
            .map(|_| ())
    }

    async fn settle(&self) -> Result<(), AppError> {
        let deadline = tokio::time::Instant::now() + self.nav_timeout;
        loop {
            let state: String = self.eval("document.readyState".to_string()).await?;
            if state == "complete" {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Timeout(self.nav_timeout.as_secs()));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(self.settle_delay).await;
        Ok(())
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// On systems where Chromium is installed via **snap**, the wrapper at
/// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
/// We look for the real binary inside the snap first, then fall back to
/// well-known system paths.  If nothing is found we return `None` and let
/// `chromiumoxide` do its own lookup.
pub fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_quotes_selector() {
        let script = visible_links_script(r#".result-data > a[data-x="1"]"#).unwrap();
        assert!(script.contains(r#"querySelectorAll(".result-data > a[data-x=\"1\"]")"#));
    }

    #[test]
    fn default_options() {
        let options = BrowserOptions::default();
        assert!(options.headless);
        assert_eq!(options.nav_timeout, Duration::from_secs(30));
    }
}
