//! M440 adapter
//!
//! The chapter list is only present after client-side rendering. The rendered
//! page embeds the chapter array as JSON in a script; when that is missing the
//! adapter falls back to the anchors the script paints into the DOM.

use super::{
    AdapterCapabilities, AdapterContext, ImageIntegrity, SourceAdapter, dedup_urls, image_source,
    selector,
};
use crate::chapter::extract_label;
use crate::config::SiteConfig;
use crate::db::Series;
use crate::error::{Error, Result};
use crate::http::{is_challenge_title, resolve_url};
use crate::types::{ChapterContent, ChapterRef, Listing, SiteKind};
use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use serde_json::Value;
use std::sync::LazyLock;

/// A JSON array of objects carrying both `number` and `slug`
static CHAPTER_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)(\[\s*\{.*?"number"\s*:.*?"slug"\s*:.*?\}\s*\])"#)
        .unwrap_or_else(|e| panic!("invalid chapter array pattern: {}", e))
});

const LISTING_READY: &str = "div.footer, ul#AAIcIabCiEbCBNuZ";

/// Adapter for M440
pub struct M440Adapter {
    site: SiteConfig,
}

impl M440Adapter {
    /// Create the adapter
    pub fn new(site: SiteConfig) -> Self {
        Self { site }
    }
}

/// Chapter label from a JSON `number` (`54.5`, `"54"`, `"Cap. 54"`)
fn chapter_number(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => extract_label(&n.to_string()),
        Value::String(s) => extract_label(s),
        _ => None,
    }
}

/// Chapters from the first script-embedded JSON array that parses
fn chapters_from_scripts(document: &Html, base: &str) -> Result<Vec<ChapterRef>> {
    let script = selector("script")?;

    for content in document.select(&script).map(|s| s.text().collect::<String>()) {
        if !content.contains("slug") {
            continue;
        }
        for found in CHAPTER_ARRAY.captures_iter(&content) {
            let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&found[1]) else {
                continue;
            };
            let chapters: Vec<ChapterRef> = items
                .iter()
                .filter_map(|item| {
                    let number = chapter_number(item.get("number")?)?;
                    let slug = item.get("slug")?.as_str()?.trim();
                    (!slug.is_empty())
                        .then(|| ChapterRef::new(number, format!("{}/{}", base, slug)).with_slug(slug))
                })
                .collect();
            if !chapters.is_empty() {
                return Ok(chapters);
            }
        }
    }

    Ok(Vec::new())
}

/// Chapters from rendered `a[data-number][data-whatever]` anchors
fn chapters_from_anchors(document: &Html, base: &str) -> Result<Vec<ChapterRef>> {
    let anchor = selector("a[data-number][data-whatever]")?;

    Ok(document
        .select(&anchor)
        .filter_map(|a| {
            let number = extract_label(a.value().attr("data-number")?)?;
            let slug = a.value().attr("data-whatever")?.trim().trim_start_matches('/');
            (!slug.is_empty())
                .then(|| ChapterRef::new(number, format!("{}/{}", base, slug)).with_slug(slug))
        })
        .collect())
}

#[async_trait]
impl SourceAdapter for M440Adapter {
    fn site(&self) -> SiteKind {
        SiteKind::M440
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            integrity: ImageIntegrity::Lenient,
            uses_browser: true,
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
        let page = ctx
            .require_browser()?
            .render(url, Some(LISTING_READY))
            .await?;

        if is_challenge_title(&page.title) {
            return Err(Error::AntiBot {
                url: url.to_string(),
            });
        }

        let base = url.trim_end_matches('/');
        let document = Html::parse_document(&page.html);
        let mut chapters = chapters_from_scripts(&document, base)?;
        if chapters.is_empty() {
            tracing::debug!(series_id = %series.id, "No embedded chapter JSON, reading anchors");
            chapters = chapters_from_anchors(&document, base)?;
        }

        if chapters.is_empty() {
            return Err(Error::Parse(format!(
                "no chapters in script data or anchors at {}",
                url
            )));
        }

        Ok(Listing::new(chapters))
    }

    async fn resolve_pages(
        &self,
        chapter: &ChapterRef,
        ctx: &AdapterContext<'_>,
    ) -> Result<ChapterContent> {
        let html = match ctx.browser {
            Some(browser) => browser.render(&chapter.url, Some("#all img")).await?.html,
            None => ctx.http.get_text(&chapter.url).await?,
        };

        let document = Html::parse_document(&html);
        let images = selector("#all img")?;
        let urls = document
            .select(&images)
            .filter_map(|img| image_source(&img))
            .filter(|src| !src.contains("loading.gif"))
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

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::Fixture;
    use crate::browser::{BrowserLauncher, StaticLauncher};
    use crate::config::SitesConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> M440Adapter {
        M440Adapter::new(SitesConfig::all_at(&server.uri()).m440)
    }

    async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn listing_prefers_embedded_json() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/manga/omniscient/",
            r#"<html><head><title>Omniscient Reader</title></head><body>
                <script>var other = [{"id": 1}];</script>
                <script>window.chapters = [{"number": 54.5, "slug": "cap-54-5"}, {"number": "54", "slug": "cap-54"}];</script>
                <a data-number="1" data-whatever="cap-1">1</a>
            </body></html>"#,
        )
        .await;

        let fx = Fixture::new().await;
        let series = fx
            .series(
                "Omniscient Reader",
                SiteKind::M440,
                Some(format!("{}/manga/omniscient/", server.uri())),
                Some("54"),
            )
            .await;

        let launcher = StaticLauncher::new(fx.http.clone());
        let session = launcher.launch().await.unwrap();
        let ctx = AdapterContext {
            browser: Some(session.as_ref()),
            ..fx.ctx()
        };

        let check = adapter(&server).check_single(&series, &ctx).await.unwrap();
        assert_eq!(check.new_count, 1);
        assert_eq!(check.new_chapters[0].label, "54.5");
        assert_eq!(
            check.new_chapters[0].url,
            format!("{}/manga/omniscient/cap-54-5", server.uri())
        );
    }

    #[tokio::test]
    async fn listing_falls_back_to_anchors() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/manga/omniscient",
            r#"<html><body>
                <a data-number="3" data-whatever="cap-3">3</a>
                <a data-number="2" data-whatever="/cap-2">2</a>
            </body></html>"#,
        )
        .await;

        let fx = Fixture::new().await;
        let series = fx
            .series(
                "Omniscient Reader",
                SiteKind::M440,
                Some(format!("{}/manga/omniscient", server.uri())),
                None,
            )
            .await;

        let launcher = StaticLauncher::new(fx.http.clone());
        let session = launcher.launch().await.unwrap();
        let ctx = AdapterContext {
            browser: Some(session.as_ref()),
            ..fx.ctx()
        };

        let listing = adapter(&server)
            .fetch_listing(&series, &ctx, None)
            .await
            .unwrap();
        let urls: Vec<&str> = listing.chapters.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                format!("{}/manga/omniscient/cap-3", server.uri()),
                format!("{}/manga/omniscient/cap-2", server.uri()),
            ]
        );
    }

    #[test]
    fn labels_are_numeric_or_dropped() {
        let document = Html::parse_document(
            r#"<script>var c = [{"number": "Cap. 12", "slug": "cap-12"}, {"number": "extra", "slug": "extra"}, {"number": 11, "slug": "cap-11"}];</script>"#,
        );
        let chapters = chapters_from_scripts(&document, "https://m440.in/manga/x").unwrap();
        let labels: Vec<&str> = chapters.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["12", "11"]);

        let document = Html::parse_document(
            r#"<a data-number="Especial" data-whatever="especial">x</a><a data-number=" 7 " data-whatever="cap-7">7</a>"#,
        );
        let chapters = chapters_from_anchors(&document, "https://m440.in/manga/x").unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].label, "7");
    }

    #[tokio::test]
    async fn listing_without_browser_is_an_error() {
        let server = MockServer::start().await;
        let fx = Fixture::new().await;
        let series = fx
            .series("Omniscient Reader", SiteKind::M440, Some(server.uri()), None)
            .await;

        let err = adapter(&server)
            .fetch_listing(&series, &fx.ctx(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Browser(_)));
    }

    #[tokio::test]
    async fn pages_skip_loading_placeholders() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/manga/omniscient/cap-54",
            r#"<div id="all">
                <img src="/img/loading.gif" data-src="https://cdn.example/54/1.jpg">
                <img src="/img/loading.gif">
                <img data-src="https://cdn.example/54/2.jpg">
                <img data-src="https://cdn.example/54/2.jpg">
            </div>"#,
        )
        .await;

        let fx = Fixture::new().await;
        let chapter = ChapterRef::new("54", format!("{}/manga/omniscient/cap-54", server.uri()));

        let content = adapter(&server)
            .resolve_pages(&chapter, &fx.ctx())
            .await
            .unwrap();
        assert_eq!(
            content,
            ChapterContent::Pages(vec![
                "https://cdn.example/54/1.jpg".to_string(),
                "https://cdn.example/54/2.jpg".to_string(),
            ])
        );
    }
}
