use std::future::Future;

use crate::error::AppError;
use crate::models::{CategoryKey, CategoryState};

/// One isolated browsing session (own cookies and storage), driven
/// sequentially by a single job.
pub trait BrowserSession: Send + Sync {
    /// Navigate to `url` and wait for the load to finish.
    fn goto(&self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Title of the current page.
    fn title(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Rendered HTML of the current page.
    fn content(&self) -> impl Future<Output = Result<String, AppError>> + Send;

    /// `href`s of elements matching `selector`, in document order, up to the
    /// first match that is not rendered yet.
    fn visible_links(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;

    /// Scroll the current page to a vertical offset in pixels.
    fn scroll_to(&self, offset: u32) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Wait until the page has stopped loading new content.
    fn settle(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Hands out isolated browser sessions, one per job.
pub trait SessionProvider: Send + Sync + Clone + 'static {
    type Session: BrowserSession + 'static;

    fn open_session(&self) -> impl Future<Output = Result<Self::Session, AppError>> + Send;

    fn close_session(
        &self,
        session: Self::Session,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Persists the active/sold partition of each (city, category).
pub trait ListingStore: Send + Sync + Clone + 'static {
    /// Load the stored state, or an empty one if nothing was saved yet.
    fn load(
        &self,
        key: &CategoryKey,
    ) -> impl Future<Output = Result<CategoryState, AppError>> + Send;

    /// Replace the stored state with `state`.
    fn save(
        &self,
        key: &CategoryKey,
        state: &CategoryState,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
