//! Per-run log handle
//!
//! Diagnostics always go through `tracing`. A [`RunLogger`] additionally
//! mirrors operator-facing lines into a per-run text file when one is
//! configured. The disabled logger writes nothing, so callers never check
//! whether a file sink exists.

use crate::error::Result;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SEPARATOR: &str =
    "================================================================================";

/// Destination for run log lines
pub trait RunLogSink: Send + Sync {
    /// Append one line
    fn write_line(&self, line: &str);

    /// Finish the run; further lines are discarded
    fn close(&self);
}

/// Sink that discards everything
struct NoopSink;

impl RunLogSink for NoopSink {
    fn write_line(&self, _line: &str) {}

    fn close(&self) {}
}

/// Sink appending timestamped lines to a text file
struct FileSink {
    run_name: String,
    file: Mutex<Option<File>>,
}

impl FileSink {
    fn open(path: &Path, run_name: &str) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        write_frame(&mut file, "RUN START", run_name)?;
        Ok(Self {
            run_name: run_name.to_string(),
            file: Mutex::new(Some(file)),
        })
    }
}

impl RunLogSink for FileSink {
    fn write_line(&self, line: &str) {
        if let Ok(mut guard) = self.file.lock()
            && let Some(file) = guard.as_mut()
        {
            let stamp = Local::now().format("%H:%M:%S");
            if let Err(e) = writeln!(file, "[{}] {}", stamp, line).and_then(|_| file.flush()) {
                tracing::warn!(error = %e, "Failed to write run log line");
            }
        }
    }

    fn close(&self) {
        if let Ok(mut guard) = self.file.lock()
            && let Some(mut file) = guard.take()
            && let Err(e) = write_frame(&mut file, "RUN END", &self.run_name)
        {
            tracing::warn!(error = %e, "Failed to write run log footer");
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_frame(file: &mut File, title: &str, run_name: &str) -> std::io::Result<()> {
    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    write!(
        file,
        "\n{SEPARATOR}\n{title}: {run_name}\nDATE: {stamp}\n{SEPARATOR}\n\n"
    )?;
    file.flush()
}

/// Scoped logging handle passed to every run
///
/// Cloning is cheap; all clones share one sink.
#[derive(Clone)]
pub struct RunLogger {
    sink: Arc<dyn RunLogSink>,
}

impl std::fmt::Debug for RunLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLogger").finish_non_exhaustive()
    }
}

impl Default for RunLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RunLogger {
    /// Logger that only emits tracing events
    pub fn disabled() -> Self {
        Self {
            sink: Arc::new(NoopSink),
        }
    }

    /// Logger that also appends to `path`, framed by start and end markers
    pub fn to_file(path: &Path, run_name: &str) -> Result<Self> {
        Ok(Self {
            sink: Arc::new(FileSink::open(path, run_name)?),
        })
    }

    /// Logger backed by a custom sink
    pub fn with_sink(sink: Arc<dyn RunLogSink>) -> Self {
        Self { sink }
    }

    /// Informational line
    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!("{}", message);
        self.sink.write_line(message);
    }

    /// Warning line
    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!("{}", message);
        self.sink.write_line(&format!("[WARN] {}", message));
    }

    /// Error line
    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!("{}", message);
        self.sink.write_line(&format!("[ERROR] {}", message));
    }

    /// Write the end-of-run footer
    pub fn close(&self) {
        self.sink.close();
    }
}

/// Per-run log file path: `<dir>/log_<prefix>_<ddmmYYYY_HHMM>.txt`
pub fn create_log_path(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = Local::now().format("%d%m%Y_%H%M");
    dir.join(format!("log_{}_{}.txt", prefix, stamp))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemorySink {
        lines: Mutex<Vec<String>>,
    }

    impl RunLogSink for MemorySink {
        fn write_line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }

        fn close(&self) {}
    }

    #[test]
    fn disabled_logger_accepts_everything() {
        let logger = RunLogger::disabled();
        logger.info("checking");
        logger.warn("slow");
        logger.error("failed");
        logger.close();
    }

    #[test]
    fn custom_sink_receives_prefixed_lines() {
        let sink = Arc::new(MemorySink::default());
        let logger = RunLogger::with_sink(sink.clone());
        let clone = logger.clone();

        logger.info("one");
        clone.warn("two");
        clone.error("three");

        let lines = sink.lines.lock().unwrap();
        assert_eq!(*lines, vec!["one", "[WARN] two", "[ERROR] three"]);
    }

    #[test]
    fn file_logger_frames_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.txt");

        let logger = RunLogger::to_file(&path, "check_all").unwrap();
        logger.info("series 1: 2 new chapters");
        logger.close();
        logger.info("after close");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("RUN START: check_all"));
        assert!(contents.contains("series 1: 2 new chapters"));
        assert!(contents.contains("RUN END: check_all"));
        assert!(!contents.contains("after close"));
    }

    #[test]
    fn log_path_has_prefix_and_timestamp() {
        let path = create_log_path(Path::new("/var/log/manga"), "download");
        let name = path.file_name().unwrap().to_str().unwrap();

        assert!(path.starts_with("/var/log/manga"));
        assert!(name.starts_with("log_download_"));
        assert!(name.ends_with(".txt"));
        // ddmmYYYY_HHMM
        assert_eq!(name.len(), "log_download_".len() + 13 + ".txt".len());
    }
}
