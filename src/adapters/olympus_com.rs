//! Olympus .com adapter
//!
//! Chapters and pages come from a JSON API on a separate host, keyed by the
//! series slug stored as the locator. The site renames slugs from time to
//! time, so the adapter can also rediscover a slug by title from the public
//! series catalog.
//!
//! ## Slug discovery
//!
//! The catalog is paginated and can be sorted either way. Scanning it is slow,
//! so the page a series was found on (in both sort directions) and the
//! direction whose slug last validated are kept in the site cache:
//!
//! 1. With a cache entry, only the cached page for the valid direction is
//!    fetched. If its slug no longer validates the opposite direction's page
//!    is tried and the cached direction is flipped on success.
//! 2. If the title is missing from the cached page (or the page cannot be
//!    fetched) the entry is deleted and rebuilt by a full scan.
//! 3. A full scan walks both directions, validates both slugs and prefers the
//!    descending one.

use super::{AdapterCapabilities, AdapterContext, ImageIntegrity, SourceAdapter};
use crate::chapter::{extract_label, same_label};
use crate::config::SiteConfig;
use crate::db::{CatalogDirection, Series, SiteCache};
use crate::error::{Error, Result};
use crate::types::{ChapterContent, ChapterRef, Listing, SiteKind};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\w]").unwrap_or_else(|e| panic!("invalid title pattern: {}", e))
});

/// Title normalized for catalog matching: lowercase, letters and digits only
pub fn normalize_title(title: &str) -> String {
    NON_WORD.replace_all(&title.to_lowercase(), "").into_owned()
}

#[derive(Debug, Deserialize)]
struct ChapterPage {
    #[serde(default)]
    data: Vec<ApiChapter>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    last_page: u32,
}

#[derive(Debug, Deserialize)]
struct ApiChapter {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChapterDetail {
    chapter: DetailBody,
}

#[derive(Debug, Deserialize)]
struct DetailBody {
    #[serde(default)]
    pages: Vec<String>,
}

/// Catalog response; the series block is either top level or under `data`
#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    data: Option<CatalogData>,
    #[serde(default)]
    series: Option<CatalogBlock>,
}

#[derive(Debug, Deserialize)]
struct CatalogData {
    series: CatalogBlock,
}

#[derive(Debug, Deserialize)]
struct CatalogBlock {
    #[serde(default)]
    data: Vec<CatalogEntry>,
    #[serde(default = "first_page")]
    last_page: u32,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    name: String,
    slug: String,
}

fn first_page() -> u32 {
    1
}

impl CatalogResponse {
    fn into_block(self) -> Result<CatalogBlock> {
        self.data
            .map(|d| d.series)
            .or(self.series)
            .ok_or_else(|| Error::Parse("catalog response without series block".to_string()))
    }
}

/// Where a title was found in one catalog direction
#[derive(Debug, Clone)]
struct CatalogHit {
    page: i64,
    slug: String,
}

/// Adapter for Olympus .com
pub struct OlympusComAdapter {
    site: SiteConfig,
}

impl OlympusComAdapter {
    /// Create the adapter
    pub fn new(site: SiteConfig) -> Self {
        Self { site }
    }

    fn site_root(&self) -> &str {
        self.site.base_url.trim_end_matches('/')
    }

    fn api_root(&self) -> &str {
        self.site.api_root().trim_end_matches('/')
    }

    /// Public reader URL of a chapter
    pub fn chapter_url(&self, chapter_id: u64, slug: &str) -> String {
        format!("{}/capitulo/{}/comic-{}", self.site_root(), chapter_id, slug)
    }

    async fn pause(&self) {
        if !self.site.page_delay.is_zero() {
            tokio::time::sleep(self.site.page_delay).await;
        }
    }

    async fn catalog_page(
        &self,
        ctx: &AdapterContext<'_>,
        direction: CatalogDirection,
        page: i64,
    ) -> Result<CatalogBlock> {
        let response: CatalogResponse = ctx
            .http
            .get_json(
                &format!("{}/api/series", self.site_root()),
                &[
                    ("type", "comic".to_string()),
                    ("direction", direction.as_str().to_string()),
                    ("page", page.to_string()),
                ],
            )
            .await?;
        response.into_block()
    }

    fn find_in(block: &CatalogBlock, wanted: &str) -> Option<String> {
        block
            .data
            .iter()
            .find(|entry| normalize_title(&entry.name) == wanted)
            .map(|entry| entry.slug.clone())
    }

    /// Whether the public series page for `slug` exists
    async fn slug_is_valid(&self, ctx: &AdapterContext<'_>, slug: &str) -> bool {
        let url = format!("{}/series/comic-{}", self.site_root(), slug);
        match ctx.http.final_url(&url).await {
            Ok((status, final_url)) => {
                let valid = status == 200
                    && final_url.contains("series")
                    && !final_url.to_lowercase().contains("error");
                if !valid {
                    tracing::debug!(slug, status, final_url = %final_url, "Slug did not validate");
                }
                valid
            }
            Err(e) => {
                tracing::debug!(slug, error = %e, "Slug validation request failed");
                false
            }
        }
    }

    /// Look for the title on the cached page of one direction
    async fn slug_on_cached_page(
        &self,
        ctx: &AdapterContext<'_>,
        direction: CatalogDirection,
        page: i64,
        wanted: &str,
    ) -> Result<Option<String>> {
        let block = self.catalog_page(ctx, direction, page).await?;
        Ok(Self::find_in(&block, wanted))
    }

    /// Scan every catalog page in one direction for the title
    async fn scan(
        &self,
        ctx: &AdapterContext<'_>,
        direction: CatalogDirection,
        wanted: &str,
    ) -> Result<Option<CatalogHit>> {
        let first = self.catalog_page(ctx, direction, 1).await?;
        if let Some(slug) = Self::find_in(&first, wanted) {
            return Ok(Some(CatalogHit { page: 1, slug }));
        }

        for page in 2..=i64::from(first.last_page) {
            self.pause().await;
            let block = match self.catalog_page(ctx, direction, page).await {
                Ok(block) => block,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(page, direction = direction.as_str(), error = %e, "Catalog page failed");
                    continue;
                }
            };
            if let Some(slug) = Self::find_in(&block, wanted) {
                return Ok(Some(CatalogHit { page, slug }));
            }
        }

        Ok(None)
    }

    /// Rebuild the site cache entry from a full catalog scan
    async fn rebuild_cache(
        &self,
        series: &Series,
        ctx: &AdapterContext<'_>,
        wanted: &str,
    ) -> Result<Option<String>> {
        ctx.db.delete_site_cache(series.id).await?;

        let asc = self.scan(ctx, CatalogDirection::Asc, wanted).await?;
        let desc = self.scan(ctx, CatalogDirection::Desc, wanted).await?;
        let (Some(asc), Some(desc)) = (asc, desc) else {
            ctx.logger.error(format!(
                "[{}] not found in the catalog; the stored title must match the site",
                series.title
            ));
            return Ok(None);
        };

        let direction = if self.slug_is_valid(ctx, &desc.slug).await {
            CatalogDirection::Desc
        } else if self.slug_is_valid(ctx, &asc.slug).await {
            CatalogDirection::Asc
        } else {
            ctx.logger.error(format!(
                "[{}] both catalog slugs are invalid: asc {}, desc {}",
                series.title, asc.slug, desc.slug
            ));
            return Ok(None);
        };

        ctx.db
            .insert_site_cache(series.id, asc.page, desc.page, direction)
            .await?;

        let slug = match direction {
            CatalogDirection::Asc => asc.slug,
            CatalogDirection::Desc => desc.slug,
        };
        tracing::info!(
            series_id = %series.id,
            slug = %slug,
            asc_page = asc.page,
            desc_page = desc.page,
            "Site cache rebuilt"
        );
        Ok(Some(slug))
    }

    /// The cached slug failed validation; look on the other direction's cached page
    async fn try_opposite(
        &self,
        series: &Series,
        ctx: &AdapterContext<'_>,
        cache: &SiteCache,
        wanted: &str,
    ) -> Result<Option<String>> {
        let opposite = cache.valid_direction().opposite();
        let found = match self
            .slug_on_cached_page(ctx, opposite, cache.page_for(opposite), wanted)
            .await
        {
            Ok(found) => found,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(series_id = %series.id, error = %e, "Opposite catalog page failed");
                None
            }
        };

        if let Some(slug) = found
            && self.slug_is_valid(ctx, &slug).await
        {
            ctx.db.update_site_cache_direction(series.id, opposite).await?;
            return Ok(Some(slug));
        }

        ctx.logger
            .error(format!("[{}] both cached slugs are invalid", series.title));
        Ok(None)
    }

    /// Find the current slug for a series by title, using and maintaining the site cache
    ///
    /// Returns `None` when the title cannot be matched to a valid slug. The
    /// stored locator is updated when the slug changed.
    pub async fn refresh_slug(
        &self,
        series: &Series,
        ctx: &AdapterContext<'_>,
    ) -> Result<Option<String>> {
        let wanted = normalize_title(&series.title);

        let slug = match ctx.db.get_site_cache(series.id).await? {
            Some(cache) => {
                let direction = cache.valid_direction();
                let cached = self
                    .slug_on_cached_page(ctx, direction, cache.page_for(direction), &wanted)
                    .await;
                match cached {
                    Ok(Some(slug)) => {
                        if self.slug_is_valid(ctx, &slug).await {
                            Some(slug)
                        } else {
                            self.try_opposite(series, ctx, &cache, &wanted).await?
                        }
                    }
                    Ok(None) => self.rebuild_cache(series, ctx, &wanted).await?,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!(series_id = %series.id, error = %e, "Cached catalog page failed");
                        self.rebuild_cache(series, ctx, &wanted).await?
                    }
                }
            }
            None => self.rebuild_cache(series, ctx, &wanted).await?,
        };

        if let Some(slug) = &slug
            && series.locator.as_deref() != Some(slug.as_str())
        {
            ctx.db.update_locator(series.id, slug).await?;
            ctx.logger
                .info(format!("[{}] slug updated to {}", series.title, slug));
        }

        Ok(slug)
    }
}

/// Series slug and chapter id encoded in a chapter URL
fn parse_chapter_url(url: &str) -> Option<(u64, String)> {
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let slug = segments.next()?.strip_prefix("comic-")?.to_string();
    let id = segments.next()?.parse().ok()?;
    Some((id, slug))
}

#[async_trait]
impl SourceAdapter for OlympusComAdapter {
    fn site(&self) -> SiteKind {
        SiteKind::OlympusCom
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            integrity: ImageIntegrity::Lenient,
            uses_browser: false,
            series_delay: self.site.series_delay,
            retries_chapters: false,
        }
    }

    /// Pages newest first and stops at the watermark chapter when one is given
    async fn fetch_listing(
        &self,
        series: &Series,
        ctx: &AdapterContext<'_>,
        until: Option<&str>,
    ) -> Result<Listing> {
        let slug = series.require_locator()?;
        let url = format!("{}/api/series/{}/chapters", self.api_root(), slug);

        let mut chapters = Vec::new();
        let mut page = 1u32;
        loop {
            let response: ChapterPage = ctx
                .http
                .get_json(
                    &url,
                    &[
                        ("page", page.to_string()),
                        ("direction", "desc".to_string()),
                        ("type", "comic".to_string()),
                    ],
                )
                .await?;

            for chapter in response.data {
                let Some(label) = extract_label(&chapter.name) else {
                    continue;
                };
                let reached = until.is_some_and(|w| same_label(&label, w));
                chapters.push(
                    ChapterRef::new(label, self.chapter_url(chapter.id, slug))
                        .with_slug(chapter.id.to_string()),
                );
                // listed too, reconciliation drops it
                if reached {
                    return Ok(Listing::new(chapters));
                }
            }

            let last_page = response.meta.map_or(1, |m| m.last_page);
            if page >= last_page {
                break;
            }
            page += 1;
            self.pause().await;
        }

        Ok(Listing::new(chapters))
    }

    async fn resolve_pages(
        &self,
        chapter: &ChapterRef,
        ctx: &AdapterContext<'_>,
    ) -> Result<ChapterContent> {
        let (id, slug) = parse_chapter_url(&chapter.url)
            .ok_or_else(|| Error::Parse(format!("unrecognized chapter url {}", chapter.url)))?;

        let detail: ChapterDetail = ctx
            .http
            .get_json(
                &format!("{}/api/series/{}/chapters/{}", self.api_root(), slug, id),
                &[("type", "comic".to_string())],
            )
            .await?;

        if detail.chapter.pages.is_empty() {
            return Err(Error::Parse(format!(
                "no pages for chapter {}",
                chapter.label
            )));
        }
        Ok(ChapterContent::Pages(detail.chapter.pages))
    }
}
