use listwatch_client::BrowserSessionManager;
use listwatch_core::JobRegistry;
use listwatch_store::JsonListingStore;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub registry: JobRegistry,
    pub store: JsonListingStore,
    /// Shared browser, for health reporting. `None` when jobs run without one.
    pub browser: Option<BrowserSessionManager>,
    /// API key protecting `/v1` (None = API disabled).
    pub api_key: Option<String>,
}
