//! Olympus .net adapter
//!
//! Chapters come from the WordPress `load_chapters` AJAX action keyed by the
//! series' numeric post id (stored as the locator). The action is paginated;
//! an empty page ends the listing.

use super::{
    AdapterCapabilities, AdapterContext, ImageIntegrity, SourceAdapter, dedup_urls, image_source,
    selector,
};
use crate::chapter::extract_label;
use crate::config::SiteConfig;
use crate::db::Series;
use crate::error::{Error, Result};
use crate::http::resolve_url;
use crate::types::{ChapterContent, ChapterRef, Listing, SiteKind};
use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;

const PER_PAGE: usize = 100;

/// Upper bound on listing pages, guards against a server that never returns an empty page
const MAX_PAGES: usize = 200;

/// Image URLs containing these fragments are site chrome, not pages
const CHROME_FRAGMENTS: [&str; 4] = ["logo", "icon", "avatar", "placeholder"];

#[derive(Debug, Deserialize)]
struct AjaxChapter {
    #[serde(default)]
    chapter_name: String,
    #[serde(default)]
    url: Option<String>,
}

/// Adapter for Olympus .net
pub struct OlympusNetAdapter {
    site: SiteConfig,
}

impl OlympusNetAdapter {
    /// Create the adapter
    pub fn new(site: SiteConfig) -> Self {
        Self { site }
    }

    fn ajax_url(&self) -> String {
        format!(
            "{}/wp-admin/admin-ajax.php",
            self.site.api_root().trim_end_matches('/')
        )
    }
}

#[async_trait]
impl SourceAdapter for OlympusNetAdapter {
    fn site(&self) -> SiteKind {
        SiteKind::OlympusNet
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            integrity: ImageIntegrity::Lenient,
            uses_browser: false,
            series_delay: self.site.series_delay,
            retries_chapters: true,
        }
    }

    async fn fetch_listing(
        &self,
        series: &Series,
        ctx: &AdapterContext<'_>,
        _until: Option<&str>,
    ) -> Result<Listing> {
        let post_id = series.require_locator()?;
        if !post_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Parse(format!(
                "olympus_net locator must be a numeric post id, got {}",
                post_id
            )));
        }

        let url = self.ajax_url();
        let mut chapters = Vec::new();

        for page in 1..=MAX_PAGES {
            let batch: Vec<AjaxChapter> = ctx
                .http
                .get_json(
                    &url,
                    &[
                        ("action", "load_chapters".to_string()),
                        ("page", page.to_string()),
                        ("per_page", PER_PAGE.to_string()),
                        ("post_id", post_id.to_string()),
                        ("reverse", "0".to_string()),
                    ],
                )
                .await?;

            let received = batch.len();
            chapters.extend(batch.into_iter().filter_map(|c| {
                let label = extract_label(&c.chapter_name)?;
                let url = c.url.filter(|u| !u.trim().is_empty())?;
                Some(ChapterRef::new(label, url))
            }));

            if received < PER_PAGE {
                break;
            }
        }

        tracing::debug!(
            series_id = %series.id,
            chapters = chapters.len(),
            "Fetched Olympus .net listing"
        );
        Ok(Listing::new(chapters))
    }

    async fn resolve_pages(
        &self,
        chapter: &ChapterRef,
        ctx: &AdapterContext<'_>,
    ) -> Result<ChapterContent> {
        let html = ctx.http.get_text(&chapter.url).await?;
        let document = Html::parse_document(&html);
        let content = selector("div.reading-content")?;
        let img = selector("img")?;

        let container = document
            .select(&content)
            .next()
            .ok_or_else(|| Error::Parse(format!("no reading content at {}", chapter.url)))?;

        let urls = container
            .select(&img)
            .filter_map(|i| image_source(&i))
            .filter(|src| !CHROME_FRAGMENTS.iter().any(|f| src.contains(f)))
            .map(|src| resolve_url(&chapter.url, &src))
            .collect::<Result<Vec<_>>>()?;

        if urls.is_empty() {
            return Err(Error::Parse(format!(
                "no images in chapter {}",
                chapter.label
            )));
        }

        Ok(ChapterContent::Pages(dedup_urls(urls)))
    }
}
