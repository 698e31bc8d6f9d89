//! AnimeAllStar adapter
//!
//! A WordPress blog: every chapter is a post in the series' category page, and
//! page images are embedded in the post body. The blog also publishes
//! announcements in the chapter stream; those are returned as
//! [`ChapterContent::Notice`].

use super::{
    AdapterCapabilities, AdapterContext, ImageIntegrity, SourceAdapter, dedup_urls, selector,
};
use crate::chapter::extract_label;
use crate::config::SiteConfig;
use crate::db::Series;
use crate::error::{Error, Result};
use crate::http::resolve_url;
use crate::types::{ChapterContent, ChapterRef, Listing, SiteKind};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;

static BLOGGER_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/s\d+(-rw)?/").unwrap_or_else(|e| panic!("invalid blogger size pattern: {}", e))
});

/// Image URLs containing these fragments are sharing widgets or site chrome
const CHROME_FRAGMENTS: [&str; 8] = [
    "gravatar", "logo", "icon", "button", "share", "facebook", "twitter", "whatsapp",
];

/// Header words that mark an announcement post
const NOTICE_WORDS: [&str; 3] = ["aviso", "información", "importante"];

/// Posts with fewer hosted images than this are announcements
const MIN_CHAPTER_IMAGES: usize = 9;

const BLOGGER_HOST: &str = "blogger.googleusercontent";
const UPLOADS_PATH: &str = "wp-content/uploads";

/// Adapter for AnimeAllStar
pub struct AnimeAllStarAdapter {
    site: SiteConfig,
}

impl AnimeAllStarAdapter {
    /// Create the adapter
    pub fn new(site: SiteConfig) -> Self {
        Self { site }
    }
}

/// The post body inside `#main`
fn post_body<'a>(document: &'a Html) -> Result<Option<ElementRef<'a>>> {
    let Some(main) = document.select(&selector("#main")?).next() else {
        return Ok(None);
    };
    if let Some(body) = main.select(&selector("div.entry-content")?).next() {
        return Ok(Some(body));
    }
    Ok(main
        .select(&selector(r#"div[class*="ast-post-format-"]"#)?)
        .next())
}

/// Page image URLs of a post, upscaled and without chrome
fn post_images(body: &ElementRef<'_>, page_url: &str) -> Result<Vec<String>> {
    let img = selector("img")?;
    let mut urls = Vec::new();

    for image in body.select(&img) {
        let Some(src) = ["src", "data-src"]
            .iter()
            .filter_map(|attr| image.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
        else {
            continue;
        };

        let lower = src.to_lowercase();
        if CHROME_FRAGMENTS.iter().any(|f| lower.contains(f)) {
            continue;
        }

        if src.contains(BLOGGER_HOST) {
            urls.push(BLOGGER_SIZE.replace_all(src, "/s1600/").into_owned());
        } else if src.contains(UPLOADS_PATH) || src.len() > 50 {
            urls.push(resolve_url(page_url, src)?);
        }
    }

    Ok(dedup_urls(urls))
}

/// Announcement text when the post is a notice rather than a chapter
fn detect_notice(body: &ElementRef<'_>, images: &[String]) -> Result<Option<String>> {
    let headers = selector("h1, h2, h3, h4, strong, b")?;

    for header in body.select(&headers) {
        let text = header.text().collect::<String>().trim().to_string();
        let lower = text.to_lowercase();
        if !NOTICE_WORDS.iter().any(|w| lower.contains(w)) {
            continue;
        }

        let detail = header
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|e| matches!(e.value().name(), "p" | "div"))
            .map(|e| e.text().collect::<String>().trim().chars().take(100).collect::<String>());

        return Ok(Some(match detail {
            Some(detail) if !detail.is_empty() => format!("{} - {}", text, detail),
            _ => text,
        }));
    }

    let hosted = images
        .iter()
        .filter(|u| u.contains(BLOGGER_HOST) || u.contains(UPLOADS_PATH))
        .count();
    if hosted < MIN_CHAPTER_IMAGES {
        return Ok(Some(format!("post has only {} page images", hosted)));
    }

    Ok(None)
}

#[async_trait]
impl SourceAdapter for AnimeAllStarAdapter {
    fn site(&self) -> SiteKind {
        SiteKind::AnimeAllStar
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            integrity: ImageIntegrity::Lenient,
            uses_browser: false,
            series_delay: self.site.series_delay,
            retries_chapters: false,
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
        let document = Html::parse_document(&html);

        let main = document
            .select(&selector("#main")?)
            .next()
            .ok_or_else(|| Error::Parse(format!("no #main at {}", url)))?;

        let article = selector("article")?;
        let articles: Vec<ElementRef<'_>> = match main.select(&selector("div.ast-row")?).next() {
            Some(row) => row.select(&article).collect(),
            None => main.select(&article).collect(),
        };
        if articles.is_empty() {
            return Err(Error::Parse(format!("no posts at {}", url)));
        }

        let title_link = selector("h2.entry-title a[href]")?;
        let mut chapters = Vec::new();
        for post in articles {
            let Some(link) = post.select(&title_link).next() else {
                continue;
            };
            let Some(label) = extract_label(&link.text().collect::<String>()) else {
                continue;
            };
            if let Some(href) = link.value().attr("href") {
                chapters.push(ChapterRef::new(label, resolve_url(url, href)?));
            }
        }

        Ok(Listing::new(chapters))
    }

    async fn resolve_pages(
        &self,
        chapter: &ChapterRef,
        ctx: &AdapterContext<'_>,
    ) -> Result<ChapterContent> {
        let html = ctx.http.get_text(&chapter.url).await?;
        let document = Html::parse_document(&html);
        let body = post_body(&document)?
            .ok_or_else(|| Error::Parse(format!("no post body at {}", chapter.url)))?;

        let images = post_images(&body, &chapter.url)?;
        if let Some(notice) = detect_notice(&body, &images)? {
            tracing::info!(chapter = %chapter.label, notice = %notice, "Post is an announcement");
            return Ok(ChapterContent::Notice(notice));
        }

        Ok(ChapterContent::Pages(images))
    }
}
