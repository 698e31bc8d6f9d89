//! Headless Chromium sessions
//!
//! Each [`BrowserSession::render`] opens a fresh tab, waits for the requested
//! selector and closes the tab again. The browser process lives until
//! [`BrowserSession::close`].

use super::{BrowserLauncher, BrowserSession, RenderedPage, wait_until};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How often a pending `wait_for` selector is looked up
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn browser_error(e: impl std::fmt::Display) -> Error {
    Error::Browser(e.to_string())
}

/// Launcher for headless Chromium sessions
#[derive(Clone, Debug)]
pub struct ChromiumLauncher {
    wait_timeout: Duration,
    headless: bool,
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ChromiumLauncher {
    /// Sessions give up on a `wait_for` selector after `wait_timeout`
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            wait_timeout,
            headless: true,
        }
    }

    /// Show the browser window
    pub fn headed(mut self) -> Self {
        self.headless = false;
        self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let mut builder = BrowserConfig::builder();
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(Error::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_error)?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "Browser event loop stopped");
                    break;
                }
            }
        });
        tracing::info!(headless = self.headless, "Chromium launched");

        Ok(Box::new(ChromiumSession {
            browser: Mutex::new(Some(browser)),
            events: Mutex::new(Some(events)),
            wait_timeout: self.wait_timeout,
        }))
    }
}

struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    events: Mutex<Option<JoinHandle<()>>>,
    wait_timeout: Duration,
}

impl ChromiumSession {
    async fn read_page(
        &self,
        page: &Page,
        url: &str,
        wait_for: Option<&str>,
    ) -> Result<RenderedPage> {
        if let Some(selector) = wait_for {
            let found = wait_until(self.wait_timeout, SELECTOR_POLL_INTERVAL, || async {
                page.find_element(selector).await.is_ok()
            })
            .await;
            if !found {
                return Err(Error::Browser(format!(
                    "'{selector}' did not appear on {url} within {:?}",
                    self.wait_timeout
                )));
            }
        }

        let html = page.content().await.map_err(browser_error)?;
        let final_url = page
            .url()
            .await
            .map_err(browser_error)?
            .unwrap_or_else(|| url.to_string());
        Ok(RenderedPage::from_html(&final_url, html))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn render(&self, url: &str, wait_for: Option<&str>) -> Result<RenderedPage> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| Error::Browser("session already closed".to_string()))?;

        let page = browser.new_page(url).await.map_err(browser_error)?;
        let result = self.read_page(&page, url, wait_for).await;

        if let Err(e) = page.close().await {
            tracing::warn!(url, error = %e, "Failed to close browser tab");
        }
        result
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };

        let closed = browser.close().await.map(|_| ()).map_err(browser_error);
        if let Err(e) = browser.wait().await {
            tracing::warn!(error = %e, "Chromium did not exit cleanly");
        }
        if let Some(events) = self.events.lock().await.take() {
            events.abort();
        }
        closed
    }
}
