pub mod browser;

pub use browser::{BrowserOptions, BrowserSessionManager, ChromiumSession, find_chrome_binary};
