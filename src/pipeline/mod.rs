//! Fetch-and-persist pipeline
//!
//! Downloads pending chapters of one series, oldest first:
//! 1. Resolve - ask the adapter for page image URLs (or a notice)
//! 2. Download - fetch and validate every page into the chapter directory
//! 3. Document - render the chapter document with prev/next links
//! 4. Commit - advance the download watermark to this chapter
//!
//! Steps 1-3 are retried together as one chapter attempt when the adapter
//! retries whole chapters; other adapters get one attempt. Step 4 only runs
//! once they succeed, and never after an earlier chapter in the same run
//! failed, so committed chapters always form a gap-free prefix.

use crate::adapters::{AdapterContext, SourceAdapter};
use crate::config::{ChapterFailurePolicy, Config, RetryConfig};
use crate::db::Series;
use crate::error::Result;
use crate::chapter::parse_label;
use crate::reconcile::neighbours;
use crate::render::{ChapterDocument, ChapterRenderer, IndexEntry, SeriesIndex};
use crate::retry::{RetryOutcome, run_with_retry};
use crate::types::{ChapterContent, ChapterRef, Listing, SeriesId};
use crate::watermark;
use images::{ImageJob, download_images};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod images;
pub mod storage;

/// A chapter that could not be downloaded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedChapter {
    /// Chapter label
    pub label: String,
    /// Machine-readable code of the last error
    pub code: &'static str,
    /// Last error message
    pub message: String,
    /// Chapter attempts made
    pub attempts: u32,
}

/// Outcome of one pipeline run for one series
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadReport {
    /// Series that was processed
    pub series_id: SeriesId,
    /// Chapters written to disk and committed, in order
    pub committed: Vec<String>,
    /// Chapters at or below the watermark that were downloaded again
    pub refreshed: Vec<String>,
    /// Unnumbered chapters stored without moving a numbered watermark
    pub unnumbered: Vec<String>,
    /// Chapters written to disk after a failure, left uncommitted
    pub uncommitted: Vec<String>,
    /// Chapters that failed after exhausting their retries
    pub failed: Vec<FailedChapter>,
    /// Pending chapters never attempted because the run halted
    pub skipped: Vec<String>,
    /// Download watermark after the run
    pub watermark: Option<String>,
}

impl DownloadReport {
    fn new(series: &Series) -> Self {
        Self {
            series_id: series.id,
            committed: Vec::new(),
            refreshed: Vec::new(),
            unnumbered: Vec::new(),
            uncommitted: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            watermark: series.last_downloaded_chapter.clone(),
        }
    }

    /// Every pending chapter was downloaded and committed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.uncommitted.is_empty()
    }

    /// Whether the run halted on a failed chapter
    pub fn halted(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// Chapters stored by this run
    pub fn stored(&self) -> usize {
        self.committed.len() + self.refreshed.len() + self.unnumbered.len() + self.uncommitted.len()
    }
}

/// What one successful chapter attempt left on disk
struct ChapterArtifact {
    pages: usize,
    notice: bool,
}

/// Pipeline executor
pub struct Pipeline {
    config: Arc<Config>,
    renderer: Arc<dyn ChapterRenderer>,
}

impl Pipeline {
    /// Create a pipeline
    pub fn new(config: Arc<Config>, renderer: Arc<dyn ChapterRenderer>) -> Self {
        Self { config, renderer }
    }

    /// Download `pending` for `series` and commit each chapter as it lands
    ///
    /// `pending` is sorted into ascending order first. Errors returned here
    /// are store or filesystem failures outside any chapter attempt; chapter
    /// failures are reported in the [`DownloadReport`].
    pub async fn run(
        &self,
        series: &Series,
        adapter: &dyn SourceAdapter,
        ctx: &AdapterContext<'_>,
        listing: &Listing,
        pending: &[ChapterRef],
    ) -> Result<DownloadReport> {
        let root = self.config.storage_dir(&series.storage_path);
        let pending = crate::reconcile::ascending(pending);
        let mut report = DownloadReport::new(series);

        if pending.is_empty() {
            debug!(series_id = %series.id, "Nothing to download");
            return Ok(report);
        }

        tokio::fs::create_dir_all(&root).await?;
        if let Some(cover_url) = listing.cover_url.as_deref() {
            self.save_cover(&root, cover_url, ctx).await;
        }

        info!(
            series_id = %series.id,
            chapters = pending.len(),
            first = %pending[0].label,
            "Downloading chapters"
        );
        ctx.logger.info(format!(
            "[{}] downloading {} chapters",
            series.title,
            pending.len()
        ));

        // the watermark chapter, when already on disk, precedes the first pending one
        let before_first = match series.last_downloaded_chapter.as_deref() {
            Some(label) if storage::chapter_document(&root, label).is_file() => {
                Some(label.to_string())
            }
            _ => None,
        };

        let single_attempt = RetryConfig::fixed(1, Duration::ZERO);
        let chapter_retry = if adapter.capabilities().retries_chapters {
            &self.config.chapter_retry
        } else {
            &single_attempt
        };

        for (index, chapter) in pending.iter().enumerate() {
            if index > 0 && !self.config.pacing.chapter_delay.is_zero() {
                tokio::time::sleep(self.config.pacing.chapter_delay).await;
            }

            let (prev, next) = neighbours(&pending, &chapter.label);
            let prev = prev.map(|c| c.label.clone()).or_else(|| before_first.clone());
            let next = next.map(|c| c.label.clone());

            let outcome = run_with_retry(chapter_retry, || {
                self.fetch_chapter(series, adapter, ctx, &root, chapter, prev.clone(), next.clone())
            })
            .await;

            match outcome {
                RetryOutcome::Succeeded { value, attempts } => {
                    debug!(
                        series_id = %series.id,
                        chapter = %chapter.label,
                        pages = value.pages,
                        notice = value.notice,
                        attempts,
                        "Chapter stored"
                    );
                    let covered = report
                        .watermark
                        .as_deref()
                        .is_some_and(|current| watermark::covers(current, &chapter.label));
                    if covered {
                        report.refreshed.push(chapter.label.clone());
                    } else if report.failed.is_empty() {
                        let moved = watermark::commit_downloaded(
                            ctx.db,
                            series.id,
                            report.watermark.as_deref(),
                            &chapter.label,
                            &chapter.url,
                        )
                        .await?;
                        if moved {
                            report.watermark = Some(chapter.label.clone());
                            report.committed.push(chapter.label.clone());
                        } else {
                            report.unnumbered.push(chapter.label.clone());
                        }
                        ctx.logger.info(format!(
                            "[{}] chapter {} downloaded ({} pages)",
                            series.title, chapter.label, value.pages
                        ));
                    } else {
                        report.uncommitted.push(chapter.label.clone());
                        ctx.logger.warn(format!(
                            "[{}] chapter {} stored but not committed after an earlier failure",
                            series.title, chapter.label
                        ));
                    }
                }
                RetryOutcome::Exhausted { error, attempts } | RetryOutcome::Fatal { error, attempts } => {
                    warn!(
                        series_id = %series.id,
                        chapter = %chapter.label,
                        attempts,
                        error = %error,
                        code = error.error_code(),
                        "Chapter failed"
                    );
                    ctx.logger.error(format!(
                        "[{}] chapter {} failed after {} attempts: {}",
                        series.title, chapter.label, attempts, error
                    ));
                    storage::remove_chapter(&root, &chapter.label).await?;
                    report.failed.push(FailedChapter {
                        label: chapter.label.clone(),
                        code: error.error_code(),
                        message: error.to_string(),
                        attempts,
                    });

                    if error.is_fatal()
                        || self.config.failure_policy == ChapterFailurePolicy::HaltSeries
                    {
                        report.skipped = pending[index + 1..]
                            .iter()
                            .map(|c| c.label.clone())
                            .collect();
                        break;
                    }
                }
            }
        }

        if !report.skipped.is_empty() {
            ctx.logger.warn(format!(
                "[{}] halted, {} chapters left for the next run",
                series.title,
                report.skipped.len()
            ));
        }

        if report.stored() > 0 {
            regenerate_navigation(&root, series, self.renderer.as_ref()).await?;
        }

        Ok(report)
    }

    /// One attempt at a chapter: resolve, download, write the document
    #[allow(clippy::too_many_arguments)]
    async fn fetch_chapter(
        &self,
        series: &Series,
        adapter: &dyn SourceAdapter,
        ctx: &AdapterContext<'_>,
        root: &Path,
        chapter: &ChapterRef,
        prev: Option<String>,
        next: Option<String>,
    ) -> Result<ChapterArtifact> {
        let content = adapter.resolve_pages(chapter, ctx).await?;
        let dir = storage::chapter_dir(root, &chapter.label);
        storage::reset_chapter_dir(&dir).await?;

        let (pages, notice) = match content {
            ChapterContent::Pages(urls) => {
                let integrity = adapter.capabilities().integrity;
                let job = ImageJob {
                    http: ctx.http,
                    referer: &chapter.url,
                    integrity: &integrity,
                    retry: &self.config.image_retry,
                    delay: self.config.pacing.image_delay,
                    logger: ctx.logger,
                };
                (download_images(&job, &urls, &dir).await?, None)
            }
            ChapterContent::Notice(text) => {
                storage::write_atomic(&dir.join(storage::NOTICE_FILE), text.as_bytes()).await?;
                (Vec::new(), Some(text))
            }
        };

        let artifact = ChapterArtifact {
            pages: pages.len(),
            notice: notice.is_some(),
        };
        let document = ChapterDocument {
            series_id: series.id,
            series_title: series.title.clone(),
            label: chapter.label.clone(),
            pages: relative_pages(&chapter.label, &pages),
            notice,
            prev,
            next,
        };
        let html = self.renderer.render_chapter(&document)?;
        storage::write_atomic(&storage::chapter_document(root, &chapter.label), html.as_bytes())
            .await?;

        Ok(artifact)
    }

    /// Save the series cover unless one is already stored
    async fn save_cover(&self, root: &Path, url: &str, ctx: &AdapterContext<'_>) {
        if storage::find_cover(root).await.is_some() {
            return;
        }

        let saved = async {
            let fetched = ctx.http.get_bytes(url, None).await?;
            let ext = storage::image_extension(url, fetched.content_type.as_deref(), &fetched.bytes);
            let name = format!("cover.{}", ext);
            storage::write_atomic(&root.join(&name), &fetched.bytes).await?;
            Ok::<_, crate::error::Error>(name)
        }
        .await;

        match saved {
            Ok(name) => debug!(cover = %name, "Cover saved"),
            Err(e) => warn!(url = %url, error = %e, "Failed to save cover"),
        }
    }
}

/// Drop unnumbered chapters that are already stored
///
/// An unnumbered chapter listed right above a numbered watermark stays new
/// after it is downloaded, since it does not move the watermark.
pub fn without_stored_unnumbered(root: &Path, pending: Vec<ChapterRef>) -> Vec<ChapterRef> {
    pending
        .into_iter()
        .filter(|c| {
            parse_label(&c.label).is_some() || !storage::chapter_document(root, &c.label).is_file()
        })
        .collect()
}

fn relative_pages(label: &str, pages: &[String]) -> Vec<String> {
    let dir = storage::chapter_dir_name(label);
    pages.iter().map(|p| format!("{}/{}", dir, p)).collect()
}

/// Rebuild every chapter document and the series index from what is on disk
///
/// Returns the number of chapter documents written.
pub async fn regenerate_navigation(
    root: &Path,
    series: &Series,
    renderer: &dyn ChapterRenderer,
) -> Result<usize> {
    let labels = storage::stored_labels(root).await?;
    let mut entries = Vec::with_capacity(labels.len());

    for (i, label) in labels.iter().enumerate() {
        let dir = storage::chapter_dir(root, label);
        let pages = storage::list_pages(&dir).await?;
        let notice = storage::read_notice(&dir).await?;

        let document = ChapterDocument {
            series_id: series.id,
            series_title: series.title.clone(),
            label: label.clone(),
            pages: relative_pages(label, &pages),
            notice: notice.clone(),
            prev: i.checked_sub(1).and_then(|p| labels.get(p)).cloned(),
            next: labels.get(i + 1).cloned(),
        };
        let html = renderer.render_chapter(&document)?;
        storage::write_atomic(&storage::chapter_document(root, label), html.as_bytes()).await?;

        entries.push(IndexEntry {
            label: label.clone(),
            notice: notice.is_some(),
        });
    }

    let index = SeriesIndex {
        series_id: series.id,
        title: series.title.clone(),
        cover: storage::find_cover(root).await,
        chapters: entries,
    };
    let html = renderer.render_index(&index)?;
    storage::write_atomic(&root.join(storage::INDEX_FILE), html.as_bytes()).await?;

    debug!(series_id = %series.id, chapters = labels.len(), "Navigation regenerated");
    Ok(labels.len())
}
