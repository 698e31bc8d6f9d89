//! Source adapters
//!
//! One [`SourceAdapter`] per site. An adapter knows how to reach a series'
//! chapter listing and how to turn a chapter page into image URLs; everything
//! else (which chapters are new, ordering, watermark bookkeeping) is shared
//! and lives in [`crate::reconcile`].
//!
//! Adapters are selected statically with [`adapter_for`].

use crate::browser::BrowserSession;
use crate::config::SitesConfig;
use crate::db::{Database, Series};
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::logging::RunLogger;
use crate::reconcile;
use crate::types::{ChapterCheckResult, ChapterContent, ChapterRef, Listing, SiteKind};
use async_trait::async_trait;
use scraper::{ElementRef, Selector};
use std::time::Duration;

pub mod animeallstar;
pub mod m440;
pub mod olympus_com;
pub mod olympus_net;
pub mod tmo;

pub use animeallstar::AnimeAllStarAdapter;
pub use m440::M440Adapter;
pub use olympus_com::OlympusComAdapter;
pub use olympus_net::OlympusNetAdapter;
pub use tmo::TmoAdapter;

/// How downloaded page images are validated
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageIntegrity {
    /// Any non-empty body is accepted; an image that keeps failing is dropped
    Lenient,
    /// Images must decode and be large enough; any failure fails the whole chapter
    Strict {
        /// An image fails when both sides are below this many pixels
        min_dimension: u32,
        /// URL fragments identifying placeholder images
        reject_patterns: Vec<String>,
    },
}

/// What an adapter needs from the pipeline and the batch loop
#[derive(Clone, Debug)]
pub struct AdapterCapabilities {
    /// Image validation policy
    pub integrity: ImageIntegrity,
    /// Listing requires a rendered page
    pub uses_browser: bool,
    /// Pause between series in a batch check
    pub series_delay: Duration,
    /// Failed chapters are retried whole under `chapter_retry`; otherwise
    /// a chapter gets a single attempt on top of its per-image retries
    pub retries_chapters: bool,
}

/// Shared resources handed to adapter calls
#[derive(Clone, Copy)]
pub struct AdapterContext<'a> {
    /// HTTP client
    pub http: &'a HttpClient,
    /// Series store (site caches)
    pub db: &'a Database,
    /// Rendered-page session, present when the batch needed one
    pub browser: Option<&'a dyn BrowserSession>,
    /// Run log
    pub logger: &'a RunLogger,
}

impl<'a> AdapterContext<'a> {
    /// The browser session, or an error when the batch did not start one
    pub fn require_browser(&self) -> Result<&'a dyn BrowserSession> {
        self.browser
            .ok_or_else(|| Error::Browser("no browser session available".to_string()))
    }
}

/// A source site
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Site this adapter serves
    fn site(&self) -> SiteKind;

    /// Validation and pacing requirements
    fn capabilities(&self) -> AdapterCapabilities;

    /// Fetch the series' chapter listing in source order
    ///
    /// `until` is the download watermark; paginated sources may stop once
    /// they reach it. Pass `None` to get the complete listing.
    async fn fetch_listing(
        &self,
        series: &Series,
        ctx: &AdapterContext<'_>,
        until: Option<&str>,
    ) -> Result<Listing>;

    /// Resolve a chapter to its page image URLs (or a notice)
    async fn resolve_pages(
        &self,
        chapter: &ChapterRef,
        ctx: &AdapterContext<'_>,
    ) -> Result<ChapterContent>;

    /// Check one series for chapters newer than its download watermark
    ///
    /// Source failures become an empty result; only fatal errors (missing
    /// locator, unknown site) are returned.
    async fn check_single(
        &self,
        series: &Series,
        ctx: &AdapterContext<'_>,
    ) -> Result<ChapterCheckResult> {
        series.require_locator()?;
        let watermark = series.last_downloaded_chapter.as_deref();

        match self.fetch_listing(series, ctx, watermark).await {
            Ok(listing) => {
                let result = reconcile::check_result(series.id, &listing.chapters, watermark);
                tracing::info!(
                    series_id = %series.id,
                    site = %self.site(),
                    newest = result.newest.as_deref().unwrap_or("-"),
                    new = result.new_count,
                    "Checked series"
                );
                ctx.logger.info(format!(
                    "[{}] newest: {}, downloaded: {}, new: {}",
                    series.title,
                    result.newest.as_deref().unwrap_or("-"),
                    watermark.unwrap_or("-"),
                    result.new_count
                ));
                Ok(result)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(
                    series_id = %series.id,
                    site = %self.site(),
                    error = %e,
                    code = e.error_code(),
                    "Check failed"
                );
                ctx.logger
                    .warn(format!("[{}] check failed: {}", series.title, e));
                Ok(ChapterCheckResult::empty(series.id))
            }
        }
    }

    /// Check many series, pausing between them
    async fn check_batch(
        &self,
        series_list: &[Series],
        ctx: &AdapterContext<'_>,
    ) -> Result<Vec<ChapterCheckResult>> {
        let delay = self.capabilities().series_delay;
        let mut results = Vec::with_capacity(series_list.len());

        for (i, series) in series_list.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            results.push(self.check_single(series, ctx).await?);
        }

        Ok(results)
    }
}

/// Adapter for a site
pub fn adapter_for(site: SiteKind, sites: &SitesConfig) -> Box<dyn SourceAdapter> {
    match site {
        SiteKind::Tmo => Box::new(TmoAdapter::new(sites.tmo.clone())),
        SiteKind::OlympusNet => Box::new(OlympusNetAdapter::new(sites.olympus_net.clone())),
        SiteKind::OlympusCom => Box::new(OlympusComAdapter::new(sites.olympus_com.clone())),
        SiteKind::M440 => Box::new(M440Adapter::new(sites.m440.clone())),
        SiteKind::AnimeAllStar => Box::new(AnimeAllStarAdapter::new(sites.animeallstar.clone())),
    }
}

/// Parse a CSS selector, reporting a bad pattern as a parse error
pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Parse(format!("bad selector {}: {:?}", css, e)))
}

/// Image URL of an `<img>`, preferring lazy-load attributes over `src`
pub(crate) fn image_source(img: &ElementRef<'_>) -> Option<String> {
    ["data-src", "data-lazy-src", "src"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty() && !v.starts_with("data:"))
        .map(str::to_string)
}

/// Keep the first occurrence of each URL
pub(crate) fn dedup_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}
