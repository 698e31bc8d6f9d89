//! Watermark commit protocol
//!
//! Two independent pointers per series:
//! - `last_checked_chapter` moves only when a check observes a strictly newer chapter
//! - `last_downloaded_chapter` moves one chapter at a time, after that chapter's
//!   artifacts are on disk, and never backwards
//!
//! Once the download watermark is numbered it stays numbered: an unnumbered
//! chapter (an extra) is stored but does not move it, otherwise every numbered
//! chapter would compare as new again on the next run.
//!
//! Both are single-row updates, so an interrupted run leaves the store stale
//! but never ahead of what is actually stored.

use crate::chapter::{is_new, parse_label};
use crate::db::{Database, Series};
use crate::error::{Result, WatermarkError};
use crate::types::{ChapterCheckResult, SeriesId};

/// Record the newest chapter a check observed
///
/// Returns true when the stored check watermark moved.
pub async fn advance_checked(db: &Database, series: &Series, check: &ChapterCheckResult) -> Result<bool> {
    let Some(newest) = check.newest.as_deref() else {
        return Ok(false);
    };
    if !is_new(newest, series.last_checked_chapter.as_deref()) {
        return Ok(false);
    }

    db.update_checked_chapter(series.id, newest).await?;
    tracing::debug!(series_id = %series.id, chapter = newest, "Check watermark advanced");
    Ok(true)
}

/// Whether the download watermark `current` already covers `label`
///
/// Numbered labels compare by value. An unnumbered watermark covers only
/// itself, and never covers a numbered chapter. A numbered watermark never
/// covers an unnumbered chapter either; see [`commit_downloaded`].
pub fn covers(current: &str, label: &str) -> bool {
    match (parse_label(current), parse_label(label)) {
        (Some(current), Some(label)) => label <= current,
        (None, None) => current.trim() == label.trim(),
        _ => false,
    }
}

/// Commit one downloaded chapter
///
/// `current` is the download watermark the caller last committed. A label it
/// already [`covers`] is refused with [`WatermarkError::Regression`]. An
/// unnumbered label over a numbered watermark leaves the watermark where it
/// is and returns `false`; otherwise the watermark moves and `true` is returned.
pub async fn commit_downloaded(
    db: &Database,
    series_id: SeriesId,
    current: Option<&str>,
    label: &str,
    source_url: &str,
) -> Result<bool> {
    if let Some(current) = current {
        if covers(current, label) {
            return Err(WatermarkError::Regression {
                current: current.to_string(),
                attempted: label.to_string(),
            }
            .into());
        }
        if parse_label(current).is_some() && parse_label(label).is_none() {
            tracing::debug!(
                series_id = %series_id,
                chapter = label,
                watermark = current,
                "Unnumbered chapter stored, watermark held"
            );
            return Ok(false);
        }
    }

    db.update_downloaded_chapter(series_id, label, source_url).await?;
    tracing::info!(series_id = %series_id, chapter = label, "Download watermark committed");
    Ok(true)
}
