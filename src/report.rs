//! End-of-run batch summary

use crate::logging::RunLogger;
use crate::pipeline::DownloadReport;
use crate::types::ChapterCheckResult;
use serde::Serialize;
use std::time::Duration;

/// Counts for one batch run over many series
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Series whose check completed (including negative results)
    pub series_checked: usize,
    /// Series with at least one chapter past the download watermark
    pub series_with_new: usize,
    /// Series whose pending chapters were all downloaded
    pub series_downloaded: usize,
    /// Series whose download failed or stopped short
    ///
    /// A failed check is not counted here: it yields an empty result and
    /// only shows up in `series_checked`.
    pub series_failed: usize,
    /// Chapters committed across all series, unnumbered extras included
    pub chapters_downloaded: usize,
    /// Wall-clock time spent checking
    #[serde(with = "secs")]
    pub check_time: Duration,
}

impl BatchSummary {
    /// Count a completed check
    pub fn record_check(&mut self, check: &ChapterCheckResult) {
        self.series_checked += 1;
        if check.has_new {
            self.series_with_new += 1;
        }
    }

    /// Count a pipeline run
    pub fn record_download(&mut self, report: &DownloadReport) {
        self.chapters_downloaded += report.committed.len() + report.unnumbered.len();
        if report.is_complete() {
            self.series_downloaded += 1;
        } else {
            self.series_failed += 1;
        }
    }

    /// Count a series whose download raised an error
    pub fn record_failure(&mut self) {
        self.series_failed += 1;
    }

    /// Write the summary to the run log
    pub fn log(&self, logger: &RunLogger) {
        tracing::info!(
            series_checked = self.series_checked,
            series_with_new = self.series_with_new,
            series_downloaded = self.series_downloaded,
            series_failed = self.series_failed,
            chapters_downloaded = self.chapters_downloaded,
            check_secs = self.check_time.as_secs(),
            "Batch finished"
        );
        logger.info(format!(
            "Summary: {} series checked in {}s, {} with new chapters, {} downloaded, {} failed, {} chapters",
            self.series_checked,
            self.check_time.as_secs(),
            self.series_with_new,
            self.series_downloaded,
            self.series_failed,
            self.chapters_downloaded
        ));
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FailedChapter;
    use crate::types::SeriesId;

    fn report(committed: &[&str], failed: bool) -> DownloadReport {
        DownloadReport {
            series_id: SeriesId(1),
            committed: committed.iter().map(|s| s.to_string()).collect(),
            refreshed: Vec::new(),
            unnumbered: Vec::new(),
            uncommitted: Vec::new(),
            failed: if failed {
                vec![FailedChapter {
                    label: "9".to_string(),
                    code: "parse_error",
                    message: "missing".to_string(),
                    attempts: 5,
                }]
            } else {
                Vec::new()
            },
            skipped: Vec::new(),
            watermark: committed.last().map(|s| s.to_string()),
        }
    }

    #[test]
    fn counts_checks_and_downloads() {
        let mut summary = BatchSummary::default();
        let mut positive = ChapterCheckResult::empty(SeriesId(1));
        positive.has_new = true;

        summary.record_check(&positive);
        summary.record_check(&ChapterCheckResult::empty(SeriesId(2)));
        summary.record_download(&report(&["7", "8"], false));
        summary.record_download(&report(&["7", "8"], true));
        summary.record_failure();

        assert_eq!(summary.series_checked, 2);
        assert_eq!(summary.series_with_new, 1);
        assert_eq!(summary.series_downloaded, 1);
        assert_eq!(summary.series_failed, 2);
        assert_eq!(summary.chapters_downloaded, 4);
    }

    #[test]
    fn serializes_check_time_in_seconds() {
        let summary = BatchSummary {
            check_time: Duration::from_millis(61_500),
            ..BatchSummary::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["check_time"], 61);
    }
}
