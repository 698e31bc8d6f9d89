//! Common test utilities for manga-tracker end-to-end tests
//!
//! [`MockTmo`] serves a TMO-shaped site from a wiremock server: a series page,
//! the `view_uploads` redirects and the cascade viewers with their images.

#![allow(dead_code)]

use manga_tracker::config::{PacingConfig, RetryConfig, SitesConfig};
use manga_tracker::{Config, MangaTracker, NewSeries, SeriesId, SiteKind};
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// PNG of the given size
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// One chapter published on the mock site
pub struct MockChapter {
    pub label: &'static str,
    pub upload_id: u32,
    /// Pixel size of every page image
    pub page_size: u32,
    pub pages: usize,
}

impl MockChapter {
    pub fn new(label: &'static str, upload_id: u32) -> Self {
        Self {
            label,
            upload_id,
            page_size: 800,
            pages: 2,
        }
    }

    /// Serve placeholder-sized images for this chapter
    pub fn undersized(mut self) -> Self {
        self.page_size = 64;
        self
    }
}

/// A TMO-shaped site plus a tracker pointed at it
pub struct MockTmo {
    pub server: MockServer,
    pub tracker: MangaTracker,
    pub dir: TempDir,
}

pub const SERIES_PATH: &str = "/library/manga/77/berserk";

impl MockTmo {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        let config = Config {
            database_path: dir.path().join("tracker.db"),
            library_dir: dir.path().join("library"),
            image_retry: RetryConfig::fixed(2, Duration::ZERO),
            chapter_retry: RetryConfig::fixed(2, Duration::ZERO),
            pacing: PacingConfig::none(),
            sites: SitesConfig::all_at(&server.uri()),
            ..Config::default()
        };
        let tracker = MangaTracker::new(config).await.unwrap();

        Self {
            server,
            tracker,
            dir,
        }
    }

    /// Publish a series page listing `chapters` newest first
    pub async fn publish(&self, chapters: &[MockChapter]) {
        let items: String = chapters
            .iter()
            .map(|c| {
                format!(
                    r#"<li class="list-group-item upload-link">
                        <h4><a><i class="fa fa-chevron-down"></i> Capítulo {label}</a></h4>
                        <ul><li class="list-group-item">
                          <div class="col-2 col-sm-1 text-right"><a href="/view_uploads/{id}">play</a></div>
                        </li></ul>
                    </li>"#,
                    label = c.label,
                    id = c.upload_id
                )
            })
            .collect();

        Mock::given(method("GET"))
            .and(path(SERIES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<html><body><img class="book-thumbnail" src="/covers/berserk.png">
                   <div id="chapters"><ul>{}</ul></div></body></html>"#,
                items
            )))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path("/covers/berserk.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png(300, 450)))
            .mount(&self.server)
            .await;

        for chapter in chapters {
            self.publish_chapter(chapter).await;
        }
    }

    async fn publish_chapter(&self, chapter: &MockChapter) {
        let id = chapter.upload_id;

        Mock::given(method("GET"))
            .and(path(format!("/view_uploads/{}", id)))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("/viewer/{}/paginated", id).as_str()),
            )
            .mount(&self.server)
            .await;

        let images: String = (1..=chapter.pages)
            .map(|n| {
                format!(
                    r#"<div class="img-container"><img class="viewer-img" data-src="/img/{}/{}.png"></div>"#,
                    id, n
                )
            })
            .collect();
        Mock::given(method("GET"))
            .and(path(format!("/viewer/{}/cascade", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<div id="main-container">{}</div>"#,
                images
            )))
            .mount(&self.server)
            .await;

        for n in 1..=chapter.pages {
            Mock::given(method("GET"))
                .and(path(format!("/img/{}/{}.png", id, n)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-type", "image/png")
                        .set_body_bytes(png(chapter.page_size, chapter.page_size)),
                )
                .mount(&self.server)
                .await;
        }
    }

    /// Track the mock series with the given download watermark
    pub async fn track(&self, downloaded: Option<&str>) -> SeriesId {
        self.tracker
            .add_series(&NewSeries {
                title: "Berserk".to_string(),
                site: SiteKind::Tmo,
                locator: Some(format!("{}{}", self.server.uri(), SERIES_PATH)),
                storage_path: "berserk".to_string(),
                tracking: true,
                last_downloaded_chapter: downloaded.map(str::to_string),
            })
            .await
            .unwrap()
    }

    /// Storage directory of the mock series
    pub fn series_root(&self) -> PathBuf {
        self.dir.path().join("library").join("berserk")
    }
}
