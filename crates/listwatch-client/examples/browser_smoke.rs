/// Smoke-test for `BrowserSessionManager`.
///
/// Launches a headless Chromium, opens two isolated sessions, loads
/// <https://example.com> in one of them and checks title, content and
/// scrolling, then tears everything down.
///
/// Run with:
///   cargo run -p listwatch-client --example browser_smoke
use listwatch_client::{BrowserOptions, BrowserSessionManager};
use listwatch_core::traits::{BrowserSession, SessionProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Launching headless browser…");
    let browser = BrowserSessionManager::launch(BrowserOptions::default()).await?;
    anyhow::ensure!(browser.is_running().await, "browser not answering");

    let session = browser.open_session().await?;
    let other = browser.open_session().await?;

    let url = "https://example.com";
    println!("Loading {url} …");
    session.goto(url).await?;
    session.settle().await?;

    let title = session.title().await?;
    anyhow::ensure!(title == "Example Domain", "unexpected title '{title}'");

    let html = session.content().await?;
    anyhow::ensure!(
        html.contains("<h1>Example Domain</h1>"),
        "Expected <h1> not found in rendered HTML"
    );

    let links = session.visible_links("a").await?;
    println!("visible links: {links:?}");
    session.scroll_to(3000).await?;

    browser.close_session(other).await?;
    browser.close_session(session).await?;
    browser.shutdown().await;

    println!("OK: got {} bytes of rendered HTML", html.len());
    Ok(())
}
