//! # manga-tracker
//!
//! Incremental manga chapter checker and downloader.
//!
//! ## Design Philosophy
//!
//! manga-tracker is designed to be:
//! - **Incremental** - Only chapters past a per-series watermark are fetched
//! - **Resumable** - The watermark moves one durable chapter at a time, so an
//!   interrupted run picks up exactly where it stopped
//! - **Polite** - Strictly sequential, with configurable pauses between images,
//!   chapters and series
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use manga_tracker::{Config, MangaTracker, NewSeries, SiteKind, StartPoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = MangaTracker::new(Config::default()).await?;
//!
//!     let id = tracker
//!         .add_series(&NewSeries {
//!             title: "Solo Leveling".to_string(),
//!             site: SiteKind::Tmo,
//!             locator: Some("https://zonatmo.com/library/manhwa/1/solo-leveling".to_string()),
//!             storage_path: "solo-leveling".to_string(),
//!             tracking: true,
//!             last_downloaded_chapter: Some("150".to_string()),
//!         })
//!         .await?;
//!
//!     let check = tracker.check_series(id).await?;
//!     println!("{} new chapters", check.new_count);
//!
//!     let report = tracker.download_series(id, StartPoint::Pending).await?;
//!     println!("watermark now {:?}", report.watermark);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Site-specific source adapters
pub mod adapters;
/// Browser sessions for script-rendered listings
pub mod browser;
/// Chapter label parsing and ordering
pub mod chapter;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Shared HTTP client
pub mod http;
/// Run logging
pub mod logging;
/// Fetch-and-persist pipeline
pub mod pipeline;
/// Pending chapter computation
pub mod reconcile;
/// Chapter and index documents
pub mod render;
/// Batch summaries
pub mod report;
/// Retry logic with bounded attempts
pub mod retry;
/// Top-level tracker
pub mod tracker;
/// Core types
pub mod types;
/// Watermark commit protocol
pub mod watermark;

// Re-export commonly used types
pub use adapters::{AdapterCapabilities, ImageIntegrity, SourceAdapter, adapter_for};
pub use browser::{BrowserLauncher, BrowserSession, StaticLauncher};
#[cfg(feature = "browser")]
pub use browser::chromium::ChromiumLauncher;
pub use config::{ChapterFailurePolicy, Config};
pub use db::{Database, NewSeries, Series};
pub use error::{DatabaseError, Error, Result, WatermarkError};
pub use logging::RunLogger;
pub use pipeline::{DownloadReport, Pipeline};
pub use render::{ChapterRenderer, HtmlRenderer};
pub use report::BatchSummary;
pub use tracker::MangaTracker;
pub use types::{ChapterCheckResult, ChapterContent, ChapterRef, SeriesId, SiteKind, StartPoint};

/// Run one check-and-download batch, stopping early on a termination signal
///
/// Returns `None` when a signal arrived first. Stopping mid-batch is safe:
/// every chapter committed so far is fully on disk and nothing later is.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use manga_tracker::{Config, MangaTracker, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let tracker = MangaTracker::new(Config::default()).await?;
///
///     if let Some(summary) = run_with_shutdown(&tracker).await? {
///         println!("{} chapters downloaded", summary.chapters_downloaded);
///     }
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(tracker: &MangaTracker) -> Result<Option<BatchSummary>> {
    tokio::select! {
        summary = tracker.check_and_download_all() => summary.map(Some),
        _ = wait_for_signal() => {
            tracing::warn!("Batch interrupted, committed chapters are kept");
            Ok(None)
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
