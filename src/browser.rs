//! Rendered-page sessions for JS-gated listings
//!
//! Some sources only show their chapter list after client-side rendering.
//! Adapters that need this declare `uses_browser` and receive a
//! [`BrowserSession`] for the whole batch. [`with_session`] owns the session
//! lifetime: it launches once, hands out a shared handle and closes it on every
//! return path.
//!
//! The default [`StaticLauncher`] "renders" with a plain HTTP GET, which is
//! enough for mirrors and mock servers. With the `browser` feature,
//! [`chromium::ChromiumLauncher`] drives headless Chromium instead.

use crate::error::{Error, Result};
use crate::http::HttpClient;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "browser")]
pub mod chromium;

/// A page after rendering
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Final URL of the page
    pub url: String,
    /// Document title
    pub title: String,
    /// Serialized DOM
    pub html: String,
}

impl RenderedPage {
    /// Build a rendered page from raw HTML, reading the title from the document
    pub fn from_html(url: &str, html: String) -> Self {
        let title = page_title(&html);
        Self {
            url: url.to_string(),
            title,
            html,
        }
    }
}

/// Text of the `<title>` element, empty when absent
pub fn page_title(html: &str) -> String {
    let document = Html::parse_document(html);
    Selector::parse("title")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default()
}

/// One open browser, used strictly one operation at a time
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` and return the rendered DOM
    ///
    /// `wait_for` names a CSS selector the page must contain before it is
    /// considered rendered; sessions that cannot wait ignore it.
    async fn render(&self, url: &str, wait_for: Option<&str>) -> Result<RenderedPage>;

    /// Release the browser
    async fn close(&self) -> Result<()>;
}

/// Factory for browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a new session
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// Run `f` with a freshly launched session and close it afterwards
///
/// The session is closed whether `f` succeeds or fails; a close failure is
/// logged and does not mask the result of `f`.
pub async fn with_session<T, F, Fut>(launcher: &dyn BrowserLauncher, f: F) -> Result<T>
where
    F: FnOnce(Arc<dyn BrowserSession>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session: Arc<dyn BrowserSession> = Arc::from(launcher.launch().await?);
    tracing::debug!("Browser session started");

    let result = f(session.clone()).await;

    match session.close().await {
        Ok(()) => tracing::debug!("Browser session closed"),
        Err(e) => tracing::warn!(error = %e, "Failed to close browser session"),
    }

    result
}

/// Poll `check` every `interval` until it passes or `timeout` elapses
///
/// The check always runs at least once. Returns whether it passed.
pub async fn wait_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Launcher whose sessions fetch pages over plain HTTP
#[derive(Clone, Debug)]
pub struct StaticLauncher {
    http: HttpClient,
}

impl StaticLauncher {
    /// Create a launcher sharing the given client
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl BrowserLauncher for StaticLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(StaticSession {
            http: self.http.clone(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }))
    }
}

struct StaticSession {
    http: HttpClient,
    closed: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl BrowserSession for StaticSession {
    async fn render(&self, url: &str, _wait_for: Option<&str>) -> Result<RenderedPage> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Browser("session already closed".to_string()));
        }
        let html = self.http.get_text(url).await?;
        Ok(RenderedPage::from_html(url, html))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
