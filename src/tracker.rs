//! Top-level tracker
//!
//! [`MangaTracker`] ties the store, the adapters and the pipeline together.
//! Everything runs sequentially: one series is fully checked (and downloaded)
//! before the next one starts. A browser session is launched only when a
//! series in the batch needs one, and it is shared by the whole batch.

use crate::adapters::{AdapterContext, OlympusComAdapter, SourceAdapter, adapter_for};
use crate::browser::{BrowserLauncher, BrowserSession, StaticLauncher, with_session};
use crate::config::Config;
use crate::db::{Database, NewSeries, Series, SeriesFilter};
use crate::error::{Error, Result, WatermarkError};
use crate::http::HttpClient;
use crate::logging::{RunLogger, create_log_path};
use crate::pipeline::{self, DownloadReport, Pipeline};
use crate::reconcile;
use crate::render::{ChapterRenderer, HtmlRenderer};
use crate::report::BatchSummary;
use crate::types::{ChapterCheckResult, Listing, SeriesId, SiteKind, StartPoint};
use crate::watermark;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Manga series tracker
#[derive(Clone)]
pub struct MangaTracker {
    /// Series store
    pub db: Arc<Database>,
    http: HttpClient,
    config: Arc<Config>,
    launcher: Arc<dyn BrowserLauncher>,
    renderer: Arc<dyn ChapterRenderer>,
    logger: RunLogger,
}

impl MangaTracker {
    /// Open the store and build the HTTP client
    ///
    /// Uses [`StaticLauncher`] for browser-rendered sites, [`HtmlRenderer`]
    /// for documents and no run log file; see the `with_*` builders.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let db = Database::new(&config.database_path).await?;
        let http = HttpClient::new(&config.http)?;

        Ok(Self {
            db: Arc::new(db),
            launcher: Arc::new(StaticLauncher::new(http.clone())),
            http,
            config: Arc::new(config),
            renderer: Arc::new(HtmlRenderer),
            logger: RunLogger::disabled(),
        })
    }

    /// Use a different browser launcher
    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Use a different document renderer
    pub fn with_renderer(mut self, renderer: Arc<dyn ChapterRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Send run output to `logger`
    ///
    /// Batch and download runs write to their own file instead when
    /// `log_dir` is configured.
    pub fn with_logger(mut self, logger: RunLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start tracking a series
    pub async fn add_series(&self, series: &NewSeries) -> Result<SeriesId> {
        if series.title.trim().is_empty() {
            return Err(Error::Config {
                message: "series title must not be empty".to_string(),
                key: Some("title".to_string()),
            });
        }

        let id = self.db.insert_series(series).await?;
        tracing::info!(series_id = %id, site = %series.site, title = %series.title, "Series added");
        Ok(id)
    }

    /// Check one series and record the newest chapter it lists
    pub async fn check_series(&self, id: SeriesId) -> Result<ChapterCheckResult> {
        let series = self.load(id).await?;
        let adapter = self.adapter(&series)?;

        self.with_browser(adapter.capabilities().uses_browser, |session| async move {
            let ctx = self.ctx(session.as_deref());
            let check = adapter.check_single(&series, &ctx).await?;
            self.record_check(&series, &check).await?;
            Ok::<_, Error>(check)
        })
        .await
    }

    /// Check every tracked series, optionally only those of one site
    ///
    /// Series are grouped by site and each group goes through its adapter's
    /// batch check, so per-site pacing applies between series.
    pub async fn check_all(&self, site: Option<SiteKind>) -> Result<Vec<ChapterCheckResult>> {
        let series = self.db.list_series(&SeriesFilter::tracked(site)).await?;
        let groups = self.group_by_site(series)?;
        let needs_browser = groups
            .iter()
            .any(|(adapter, _)| adapter.capabilities().uses_browser);

        self.with_browser(needs_browser, |session| async move {
            let ctx = self.ctx(session.as_deref());
            let mut results = Vec::new();

            for (adapter, group) in &groups {
                tracing::info!(site = %adapter.site(), series = group.len(), "Checking site");
                let checks = adapter.check_batch(group, &ctx).await?;
                for (series, check) in group.iter().zip(&checks) {
                    self.record_check(series, check).await?;
                }
                results.extend(checks);
            }

            Ok::<_, Error>(results)
        })
        .await
    }

    /// Download chapters of one series
    ///
    /// Errors abort the series: a failed listing fetch, a resume URL that is
    /// no longer listed, or a start chapter the source does not have.
    /// With `log_dir` configured the run gets its own `log_download_*` file.
    pub async fn download_series(&self, id: SeriesId, start: StartPoint) -> Result<DownloadReport> {
        match self.with_run_log("download")? {
            Some(run) => {
                let result = run.download_one(id, start).await;
                run.logger.close();
                result
            }
            None => self.download_one(id, start).await,
        }
    }

    async fn download_one(&self, id: SeriesId, start: StartPoint) -> Result<DownloadReport> {
        let series = self.load(id).await?;
        let adapter = self.adapter(&series)?;

        self.with_browser(adapter.capabilities().uses_browser, |session| async move {
            let ctx = self.ctx(session.as_deref());
            let report = self
                .download_with(&series, adapter.as_ref(), &ctx, &start)
                .await?;
            self.log_report(&series, &report);
            Ok::<_, Error>(report)
        })
        .await
    }

    /// Check every tracked series and download what is new
    ///
    /// A series whose download fails is counted and skipped; only fatal
    /// errors end the batch. The summary is written to the run log, which is
    /// a fresh `log_check_and_download_*` file when `log_dir` is configured.
    pub async fn check_and_download_all(&self) -> Result<BatchSummary> {
        match self.with_run_log("check_and_download")? {
            Some(run) => {
                let result = run.run_batch().await;
                run.logger.close();
                result
            }
            None => self.run_batch().await,
        }
    }

    async fn run_batch(&self) -> Result<BatchSummary> {
        let series = self.db.list_series(&SeriesFilter::tracked(None)).await?;
        let groups = self.group_by_site(series)?;
        let needs_browser = groups
            .iter()
            .any(|(adapter, _)| adapter.capabilities().uses_browser);

        let summary = self
            .with_browser(needs_browser, |session| async move {
                let ctx = self.ctx(session.as_deref());
                let pipeline = self.pipeline();
                let mut summary = BatchSummary::default();

                let started = Instant::now();
                let mut checked = Vec::new();
                for (adapter, group) in &groups {
                    let checks = adapter.check_batch(group, &ctx).await?;
                    for (series, check) in group.iter().zip(checks) {
                        self.record_check(series, &check).await?;
                        summary.record_check(&check);
                        checked.push((adapter.as_ref(), series, check));
                    }
                }
                summary.check_time = started.elapsed();

                for (adapter, series, check) in checked {
                    if !check.has_new {
                        continue;
                    }
                    let pending = pipeline::without_stored_unnumbered(
                        &self.config.storage_dir(&series.storage_path),
                        reconcile::plan_downloads(
                            &check,
                            &[],
                            series.last_downloaded_chapter.as_deref(),
                        ),
                    );
                    // the check consumed the listing; covers are fetched by download_series
                    let listing = Listing::default();
                    match pipeline.run(series, adapter, &ctx, &listing, &pending).await {
                        Ok(report) => {
                            self.log_report(series, &report);
                            summary.record_download(&report);
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            tracing::error!(series_id = %series.id, error = %e, "Download failed");
                            self.logger
                                .error(format!("[{}] download failed: {}", series.title, e));
                            summary.record_failure();
                        }
                    }
                }

                Ok::<_, Error>(summary)
            })
            .await?;

        summary.log(&self.logger);
        Ok(summary)
    }

    /// Re-discover olympus_com slugs from the site catalog
    ///
    /// Returns the number of series whose slug was found. Series that
    /// cannot be matched keep their current slug.
    pub async fn refresh_slugs(&self) -> Result<usize> {
        let series = self
            .db
            .list_series(&SeriesFilter::tracked(Some(SiteKind::OlympusCom)))
            .await?;
        let adapter = OlympusComAdapter::new(self.config.sites.olympus_com.clone());
        let ctx = self.ctx(None);
        let mut found = 0;

        for series in &series {
            match adapter.refresh_slug(series, &ctx).await {
                Ok(Some(slug)) => {
                    found += 1;
                    tracing::info!(series_id = %series.id, slug = %slug, "Slug refreshed");
                }
                Ok(None) => {
                    self.logger
                        .warn(format!("[{}] not found in the catalog", series.title));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(series_id = %series.id, error = %e, "Slug refresh failed");
                    self.logger
                        .warn(format!("[{}] slug refresh failed: {}", series.title, e));
                }
            }
        }

        Ok(found)
    }

    /// Rebuild all chapter documents and the index of one series from disk
    pub async fn regenerate_navigation(&self, id: SeriesId) -> Result<usize> {
        let series = self.load(id).await?;
        let root = self.config.storage_dir(&series.storage_path);
        pipeline::regenerate_navigation(&root, &series, self.renderer.as_ref()).await
    }

    async fn download_with(
        &self,
        series: &Series,
        adapter: &dyn SourceAdapter,
        ctx: &AdapterContext<'_>,
        start: &StartPoint,
    ) -> Result<DownloadReport> {
        let watermark = series.last_downloaded_chapter.as_deref();

        let (listing, pending) = match start {
            StartPoint::Pending => {
                let listing = adapter.fetch_listing(series, ctx, watermark).await?;
                let check = reconcile::check_result(series.id, &listing.chapters, watermark);
                self.record_check(series, &check).await?;
                let pending = pipeline::without_stored_unnumbered(
                    &self.config.storage_dir(&series.storage_path),
                    reconcile::plan_downloads(&check, &listing.chapters, watermark),
                );
                (listing, pending)
            }
            StartPoint::Resume => {
                let url = series.last_download_url.as_deref().ok_or(
                    WatermarkError::NothingToResume {
                        series_id: series.id.get(),
                    },
                )?;
                let listing = adapter.fetch_listing(series, ctx, None).await?;
                let pending = reconcile::plan_resume(&listing.chapters, url)?;
                (listing, pending)
            }
            StartPoint::FromChapter(label) => {
                let listing = adapter.fetch_listing(series, ctx, None).await?;
                let pending = reconcile::plan_from_chapter(&listing.chapters, label)?;
                (listing, pending)
            }
        };

        self.pipeline()
            .run(series, adapter, ctx, &listing, &pending)
            .await
    }

    /// A copy of the tracker logging to a new per-run file, if `log_dir` is set
    fn with_run_log(&self, prefix: &str) -> Result<Option<Self>> {
        let Some(dir) = self.config.log_dir.as_deref() else {
            return Ok(None);
        };
        let logger = RunLogger::to_file(&create_log_path(dir, prefix), prefix)?;
        Ok(Some(self.clone().with_logger(logger)))
    }

    async fn record_check(&self, series: &Series, check: &ChapterCheckResult) -> Result<()> {
        watermark::advance_checked(&self.db, series, check).await?;
        self.db.touch_last_check(series.id).await
    }

    async fn load(&self, id: SeriesId) -> Result<Series> {
        self.db
            .get_series(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("series {}", id)))
    }

    fn adapter(&self, series: &Series) -> Result<Box<dyn SourceAdapter>> {
        Ok(adapter_for(series.site_kind()?, &self.config.sites))
    }

    /// Consecutive series of the same site with their adapter
    fn group_by_site(&self, series: Vec<Series>) -> Result<Vec<(Box<dyn SourceAdapter>, Vec<Series>)>> {
        let mut groups: Vec<(Box<dyn SourceAdapter>, Vec<Series>)> = Vec::new();
        for series in series {
            let site = series.site_kind()?;
            match groups.last_mut() {
                Some((adapter, group)) if adapter.site() == site => group.push(series),
                _ => groups.push((adapter_for(site, &self.config.sites), vec![series])),
            }
        }
        Ok(groups)
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.config.clone(), self.renderer.clone())
    }

    fn ctx<'a>(&'a self, browser: Option<&'a dyn BrowserSession>) -> AdapterContext<'a> {
        AdapterContext {
            http: &self.http,
            db: &self.db,
            browser,
            logger: &self.logger,
        }
    }

    async fn with_browser<T, F, Fut>(&self, needed: bool, f: F) -> Result<T>
    where
        F: FnOnce(Option<Arc<dyn BrowserSession>>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if needed {
            with_session(self.launcher.as_ref(), |session| f(Some(session))).await
        } else {
            f(None).await
        }
    }

    fn log_report(&self, series: &Series, report: &DownloadReport) {
        if report.is_complete() {
            self.logger.info(format!(
                "[{}] {} chapters downloaded, watermark {}",
                series.title,
                report.committed.len() + report.unnumbered.len(),
                report.watermark.as_deref().unwrap_or("-")
            ));
        } else {
            self.logger.warn(format!(
                "[{}] {} chapters downloaded, {} failed, {} left, watermark {}",
                series.title,
                report.committed.len(),
                report.failed.len(),
                report.skipped.len() + report.uncommitted.len(),
                report.watermark.as_deref().unwrap_or("-")
            ));
        }
    }
}
