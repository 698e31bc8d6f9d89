//! TMO adapter
//!
//! The listing is a server-rendered page with one collapsible `<li>` per
//! chapter. Each chapter links to a `view_uploads/<id>` URL that redirects to
//! the real viewer; the paginated viewer is swapped for the cascade layout so
//! every page image is present in one document.

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
use scraper::{ElementRef, Html};

const MIN_DIMENSION: u32 = 400;

/// Adapter for TMO
pub struct TmoAdapter {
    site: SiteConfig,
}

impl TmoAdapter {
    /// Create the adapter
    pub fn new(site: SiteConfig) -> Self {
        Self { site }
    }

    fn referer(&self) -> String {
        format!("{}/", self.site.base_url.trim_end_matches('/'))
    }

    /// Parse the chapter list and cover out of a series page
    fn parse_listing(&self, page_url: &str, html: &str) -> Result<Listing> {
        let document = Html::parse_document(html);
        let chevron = selector("i.fa-chevron-down")?;
        let upload_link = selector("div.col-2.col-sm-1.text-right a[href]")?;
        let cover = selector("img.book-thumbnail")?;

        let mut chapters = Vec::new();
        for icon in document.select(&chevron) {
            let Some(heading) = icon.parent().and_then(ElementRef::wrap) else {
                continue;
            };
            let Some(label) = extract_label(&heading.text().collect::<String>()) else {
                continue;
            };
            let Some(item) = icon
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|e| {
                    e.value().name() == "li"
                        && e.value().classes().any(|c| c == "list-group-item")
                })
            else {
                continue;
            };
            let Some(href) = item
                .select(&upload_link)
                .next()
                .and_then(|a| a.value().attr("href"))
            else {
                continue;
            };

            chapters.push(ChapterRef::new(label, resolve_url(page_url, href)?));
        }

        if chapters.is_empty() && document.select(&selector("#chapters")?).next().is_none() {
            return Err(Error::Parse(format!("no chapter list at {}", page_url)));
        }

        let cover_url = document
            .select(&cover)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(|src| resolve_url(page_url, src))
            .transpose()?;

        Ok(Listing {
            chapters,
            cover_url,
        })
    }

    fn parse_viewer(viewer_url: &str, html: &str) -> Result<Vec<String>> {
        let document = Html::parse_document(html);
        let images = selector("#main-container div.img-container img.viewer-img")?;

        let urls = document
            .select(&images)
            .filter_map(|img| image_source(&img))
            .map(|src| resolve_url(viewer_url, &src))
            .collect::<Result<Vec<_>>>()?;

        Ok(dedup_urls(urls))
    }
}

#[async_trait]
impl SourceAdapter for TmoAdapter {
    fn site(&self) -> SiteKind {
        SiteKind::Tmo
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            integrity: ImageIntegrity::Strict {
                min_dimension: MIN_DIMENSION,
                reject_patterns: vec!["loading.gif".to_string()],
            },
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
        let url = series.require_locator()?;
        let html = ctx.http.get_text(url).await?;
        let listing = self.parse_listing(url, &html)?;

        tracing::debug!(
            series_id = %series.id,
            chapters = listing.chapters.len(),
            "Parsed TMO listing"
        );
        Ok(listing)
    }

    async fn resolve_pages(
        &self,
        chapter: &ChapterRef,
        ctx: &AdapterContext<'_>,
    ) -> Result<ChapterContent> {
        let upload_id = chapter
            .url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Parse(format!("no upload id in {}", chapter.url)))?;

        let redirect = format!(
            "{}/view_uploads/{}",
            self.site.base_url.trim_end_matches('/'),
            upload_id
        );
        let viewer = ctx
            .http
            .redirect_location(&redirect, Some(&self.referer()))
            .await?
            .replace("/paginated", "/cascade");

        tracing::debug!(chapter = %chapter.label, viewer = %viewer, "Resolved TMO viewer");

        let html = ctx.http.get_text(&viewer).await?;
        let pages = Self::parse_viewer(&viewer, &html)?;
        if pages.is_empty() {
            return Err(Error::Parse(format!(
                "no images in viewer for chapter {}",
                chapter.label
            )));
        }

        Ok(ChapterContent::Pages(pages))
    }
}
