//! Chapter and series documents
//!
//! The pipeline only supplies the fields a reader page needs; the markup is
//! produced by a [`ChapterRenderer`]. [`HtmlRenderer`] is the built-in static
//! HTML renderer, built on `maud` so every interpolated value is escaped.

use crate::error::Result;
use crate::pipeline::storage;
use crate::types::SeriesId;
use maud::{DOCTYPE, Markup, html};

/// Everything a chapter document shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDocument {
    /// Series the chapter belongs to
    pub series_id: SeriesId,
    /// Series display title
    pub series_title: String,
    /// Chapter label
    pub label: String,
    /// Page image paths relative to the document, in reading order
    pub pages: Vec<String>,
    /// Announcement text for chapters published as a notice
    pub notice: Option<String>,
    /// Previous chapter label, `None` at the start of the sequence
    pub prev: Option<String>,
    /// Next chapter label, `None` at the end of the sequence
    pub next: Option<String>,
}

/// One row of the series index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Chapter label
    pub label: String,
    /// The chapter is an announcement without pages
    pub notice: bool,
}

/// Everything the series index shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesIndex {
    /// Series ID
    pub series_id: SeriesId,
    /// Series display title
    pub title: String,
    /// Cover image path relative to the index
    pub cover: Option<String>,
    /// Chapters in ascending order
    pub chapters: Vec<IndexEntry>,
}

/// Produces browsable documents from chapter and series data
pub trait ChapterRenderer: Send + Sync {
    /// Render one chapter document
    fn render_chapter(&self, chapter: &ChapterDocument) -> Result<String>;

    /// Render the series index
    fn render_index(&self, index: &SeriesIndex) -> Result<String>;
}

/// Minimal static HTML renderer
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

/// A navigation link, or a disabled placeholder at a sequence boundary
fn nav_link(target: Option<&str>, text: &str) -> Markup {
    html! {
        @match target {
            Some(label) => a class="nav" href=(storage::chapter_document_name(label)) { (text) },
            None => a class="nav disabled" href="#" { (text) },
        }
    }
}

fn navigation(chapter: &ChapterDocument) -> Markup {
    html! {
        nav {
            (nav_link(chapter.prev.as_deref(), "« Previous"))
            " "
            a class="nav" href=(storage::INDEX_FILE) { "Index" }
            " "
            (nav_link(chapter.next.as_deref(), "Next »"))
        }
    }
}

fn page(title: &str, series_id: SeriesId, body: Markup) -> String {
    html! {
        (DOCTYPE)
        html lang="es" {
            head {
                meta charset="utf-8";
                title { (title) }
            }
            body data-series=(series_id) { (body) }
        }
    }
    .into_string()
}

impl ChapterRenderer for HtmlRenderer {
    fn render_chapter(&self, chapter: &ChapterDocument) -> Result<String> {
        let body = html! {
            h1 { (chapter.series_title) }
            h2 { "Chapter " (chapter.label) }
            (navigation(chapter))
            main {
                @if let Some(notice) = &chapter.notice {
                    p class="notice" { (notice) }
                } @else {
                    @for (i, src) in chapter.pages.iter().enumerate() {
                        img src=(src) alt={ "Page " (i + 1) } loading="lazy";
                    }
                }
            }
            (navigation(chapter))
        };

        let title = format!("{} - {}", chapter.series_title, chapter.label);
        Ok(page(&title, chapter.series_id, body))
    }

    fn render_index(&self, index: &SeriesIndex) -> Result<String> {
        let body = html! {
            h1 { (index.title) }
            @if let Some(cover) = &index.cover {
                img class="cover" src=(cover) alt=(index.title);
            }
            ul class="chapters" {
                // newest first
                @for entry in index.chapters.iter().rev() {
                    li {
                        a href=(storage::chapter_document_name(&entry.label)) {
                            "Chapter " (entry.label)
                        }
                        @if entry.notice { " (notice)" }
                    }
                }
            }
        };

        Ok(page(&index.title, index.series_id, body))
    }
}
