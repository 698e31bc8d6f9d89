//! Chapter reconciliation
//!
//! Turns a freshly fetched listing plus a stored watermark into the ascending
//! list of chapters to download. Adapters, the tracker and the pipeline all
//! call into these functions; none of them repeat the arithmetic.

use crate::chapter::{self, dedup_by_label, is_new, parse_label, same_label, sort_ascending};
use crate::error::{Result, WatermarkError};
use crate::types::{ChapterCheckResult, ChapterRef, SeriesId};

/// Normalize a listing: first occurrence of each label wins, oldest first
pub fn ascending(listing: &[ChapterRef]) -> Vec<ChapterRef> {
    let mut chapters = dedup_by_label(listing.to_vec());
    sort_ascending(&mut chapters);
    chapters
}

/// Chapters strictly newer than `watermark`, oldest first
///
/// Numbered chapters are compared with [`is_new`]. An unnumbered chapter
/// (an extra or special) has no value to compare against a numbered
/// watermark, so it is placed by the closest numbered chapter published
/// before it: it is new when that chapter is not below the watermark.
pub fn filter_new(listing: &[ChapterRef], watermark: Option<&str>) -> Vec<ChapterRef> {
    let chapters = dedup_by_label(listing.to_vec());
    let numbered_watermark = watermark.and_then(parse_label);
    let newest_first = lists_newest_first(&chapters);

    let mut pending: Vec<ChapterRef> = chapters
        .iter()
        .enumerate()
        .filter(|(i, c)| match (numbered_watermark, parse_label(&c.label)) {
            (Some(w), None) => published_before(&chapters, *i, newest_first).is_some_and(|v| v >= w),
            _ => is_new(&c.label, watermark),
        })
        .map(|(_, c)| c.clone())
        .collect();
    sort_ascending(&mut pending);
    pending
}

fn lists_newest_first(chapters: &[ChapterRef]) -> bool {
    let mut values = chapters.iter().filter_map(|c| parse_label(&c.label));
    match (values.next(), values.next_back()) {
        (Some(first), Some(last)) => first >= last,
        _ => true,
    }
}

/// Value of the closest numbered chapter published before `chapters[index]`
fn published_before(chapters: &[ChapterRef], index: usize, newest_first: bool) -> Option<f64> {
    let value = |c: &ChapterRef| parse_label(&c.label);
    if newest_first {
        chapters[index + 1..].iter().find_map(value)
    } else {
        chapters[..index].iter().rev().find_map(value)
    }
}

/// Build the check result for a listing against the download watermark
pub fn check_result(
    series_id: SeriesId,
    listing: &[ChapterRef],
    last_downloaded: Option<&str>,
) -> ChapterCheckResult {
    let new_chapters = filter_new(listing, last_downloaded);
    ChapterCheckResult {
        series_id,
        has_new: !new_chapters.is_empty(),
        newest: chapter::newest_label(listing).map(str::to_string),
        new_count: new_chapters.len(),
        new_chapters,
    }
}

/// Decide what to download after a check
///
/// An explicit list of new chapters in the check result is authoritative.
/// Otherwise the pending set is derived from `discovered` and the watermark.
pub fn plan_downloads(
    check: &ChapterCheckResult,
    discovered: &[ChapterRef],
    last_downloaded: Option<&str>,
) -> Vec<ChapterRef> {
    if !check.new_chapters.is_empty() {
        return ascending(&check.new_chapters);
    }
    filter_new(discovered, last_downloaded)
}

/// Chapters after the one downloaded from `last_download_url`
///
/// Fails with [`WatermarkError::ResumeUrlNotFound`] when the URL no longer
/// appears in the listing; the caller must not guess a recovery point.
pub fn plan_resume(listing: &[ChapterRef], last_download_url: &str) -> Result<Vec<ChapterRef>> {
    let chapters = ascending(listing);
    let wanted = normalize_url(last_download_url);

    let position = chapters
        .iter()
        .position(|c| normalize_url(&c.url) == wanted)
        .ok_or_else(|| WatermarkError::ResumeUrlNotFound {
            url: last_download_url.to_string(),
        })?;

    Ok(chapters.into_iter().skip(position + 1).collect())
}

/// The chapter labelled `start_label` and every later one
pub fn plan_from_chapter(listing: &[ChapterRef], start_label: &str) -> Result<Vec<ChapterRef>> {
    let chapters = ascending(listing);

    let position = chapters
        .iter()
        .position(|c| same_label(&c.label, start_label))
        .ok_or_else(|| WatermarkError::StartChapterNotFound {
            label: start_label.to_string(),
        })?;

    Ok(chapters.into_iter().skip(position).collect())
}

/// Previous and next chapter around `label` in an ascending sequence
pub fn neighbours<'a>(
    ascending: &'a [ChapterRef],
    label: &str,
) -> (Option<&'a ChapterRef>, Option<&'a ChapterRef>) {
    match ascending.iter().position(|c| same_label(&c.label, label)) {
        Some(i) => (
            i.checked_sub(1).and_then(|p| ascending.get(p)),
            ascending.get(i + 1),
        ),
        None => (None, None),
    }
}

fn normalize_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}
