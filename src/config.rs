//! Configuration types for manga-tracker

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Top-level configuration
///
/// Every field has a default, so an empty JSON object is a valid configuration.
/// Sub-configs group the HTTP client, retry bounds, pacing delays and per-site
/// endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database path (default: "./manga_tracker.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Root directory for series storage; relative series paths are joined to it (default: "./library")
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,

    /// Directory for per-run log files; no files are written when unset (default)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry bounds for a single page image (default: 5 attempts, fixed 5 s)
    #[serde(default = "default_image_retry")]
    pub image_retry: RetryConfig,

    /// Retry bounds for a whole chapter (default: 5 attempts, fixed 60 s)
    #[serde(default = "default_chapter_retry")]
    pub chapter_retry: RetryConfig,

    /// Politeness delays between requests
    #[serde(default)]
    pub pacing: PacingConfig,

    /// What to do with later chapters once one chapter fails for good
    #[serde(default)]
    pub failure_policy: ChapterFailurePolicy,

    /// Per-site endpoints and pacing
    #[serde(default)]
    pub sites: SitesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            library_dir: default_library_dir(),
            log_dir: None,
            http: HttpConfig::default(),
            image_retry: default_image_retry(),
            chapter_retry: default_chapter_retry(),
            pacing: PacingConfig::default(),
            failure_policy: ChapterFailurePolicy::default(),
            sites: SitesConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file and validate it
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        for (key, retry) in [
            ("image_retry.max_attempts", &self.image_retry),
            ("chapter_retry.max_attempts", &self.chapter_retry),
        ] {
            if retry.max_attempts == 0 {
                return Err(Error::Config {
                    message: "at least one attempt is required".to_string(),
                    key: Some(key.to_string()),
                });
            }
        }

        if self.http.user_agent.trim().is_empty() {
            return Err(Error::Config {
                message: "user agent must not be empty".to_string(),
                key: Some("http.user_agent".to_string()),
            });
        }

        for (key, site) in self.sites.iter() {
            if url::Url::parse(&site.base_url).is_err() {
                return Err(Error::Config {
                    message: format!("invalid base url '{}'", site.base_url),
                    key: Some(format!("sites.{}.base_url", key)),
                });
            }
        }

        Ok(())
    }

    /// Resolve a series storage path against the library directory
    pub fn storage_dir(&self, storage_path: &str) -> PathBuf {
        let path = Path::new(storage_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.library_dir.join(path)
        }
    }
}

/// HTTP client configuration shared by all adapters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept-Language header sent with every request
    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            timeout: default_http_timeout(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts including the first one (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 5 seconds)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each failure (default: 1.0, fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// A fixed-delay policy with `max_attempts` total attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Sleep intervals used as the only politeness mechanism
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Pause after each downloaded image (default: 500 ms)
    #[serde(default = "default_image_delay", with = "millis_serde")]
    pub image_delay: Duration,

    /// Pause between chapters of the same series (default: 30 s)
    #[serde(default = "default_chapter_delay", with = "millis_serde")]
    pub chapter_delay: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            image_delay: default_image_delay(),
            chapter_delay: default_chapter_delay(),
        }
    }
}

impl PacingConfig {
    /// No delays at all (useful for tests and local mirrors)
    pub fn none() -> Self {
        Self {
            image_delay: Duration::ZERO,
            chapter_delay: Duration::ZERO,
        }
    }
}

/// Behaviour after a chapter exhausts its chapter-level retries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterFailurePolicy {
    /// Stop the series for this run; downloaded chapters stay a gap-free prefix (default)
    #[default]
    HaltSeries,
    /// Keep fetching later chapters to disk, but never commit the watermark past the failure
    ContinueUncommitted,
}

/// Endpoints and pacing for one source site
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Public site root, used for relative links and referers
    pub base_url: String,

    /// API root when the site serves JSON from a separate host
    #[serde(default)]
    pub api_url: Option<String>,

    /// Pause between series during batch checks
    #[serde(with = "millis_serde")]
    pub series_delay: Duration,

    /// Pause between pages of a paginated API
    #[serde(default, with = "millis_serde")]
    pub page_delay: Duration,
}

impl SiteConfig {
    fn new(base_url: &str, api_url: Option<&str>, series_delay: Duration) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_url: api_url.map(str::to_string),
            series_delay,
            page_delay: Duration::ZERO,
        }
    }

    /// API root, falling back to the site root
    pub fn api_root(&self) -> &str {
        self.api_url.as_deref().unwrap_or(&self.base_url)
    }
}

/// Per-site configuration for every registered adapter
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SitesConfig {
    /// TMO (HTML listing, redirecting viewer)
    #[serde(default = "default_tmo")]
    pub tmo: SiteConfig,

    /// Olympus .net (WordPress AJAX listing)
    #[serde(default = "default_olympus_net")]
    pub olympus_net: SiteConfig,

    /// Olympus .com (JSON chapter API, catalog slug lookup)
    #[serde(default = "default_olympus_com")]
    pub olympus_com: SiteConfig,

    /// M440 (script-embedded JSON listing)
    #[serde(default = "default_m440")]
    pub m440: SiteConfig,

    /// AnimeAllStar (blog post listing)
    #[serde(default = "default_animeallstar")]
    pub animeallstar: SiteConfig,
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            tmo: default_tmo(),
            olympus_net: default_olympus_net(),
            olympus_com: default_olympus_com(),
            m440: default_m440(),
            animeallstar: default_animeallstar(),
        }
    }
}

impl SitesConfig {
    /// Iterate over `(key, config)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SiteConfig)> {
        [
            ("tmo", &self.tmo),
            ("olympus_net", &self.olympus_net),
            ("olympus_com", &self.olympus_com),
            ("m440", &self.m440),
            ("animeallstar", &self.animeallstar),
        ]
        .into_iter()
    }

    /// Point every site at one root URL with no pacing (mock servers, mirrors)
    pub fn all_at(root: &str) -> Self {
        let site = SiteConfig::new(root, None, Duration::ZERO);
        Self {
            tmo: site.clone(),
            olympus_net: site.clone(),
            olympus_com: site.clone(),
            m440: site.clone(),
            animeallstar: site,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./manga_tracker.db")
}

fn default_library_dir() -> PathBuf {
    PathBuf::from("./library")
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

fn default_accept_language() -> String {
    "es-ES,es;q=0.9".to_string()
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_image_retry() -> RetryConfig {
    RetryConfig::fixed(5, Duration::from_secs(5))
}

fn default_chapter_retry() -> RetryConfig {
    RetryConfig::fixed(5, Duration::from_secs(60))
}

fn default_image_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_chapter_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_tmo() -> SiteConfig {
    SiteConfig::new("https://zonatmo.com", None, Duration::from_secs(30))
}

fn default_olympus_net() -> SiteConfig {
    SiteConfig::new("https://olympusbiblioteca.net", None, Duration::from_secs(5))
}

fn default_olympus_com() -> SiteConfig {
    SiteConfig {
        page_delay: Duration::from_secs(2),
        ..SiteConfig::new(
            "https://olympusbiblioteca.com",
            Some("https://dashboard.olympusbiblioteca.com"),
            Duration::from_secs(60),
        )
    }
}

fn default_m440() -> SiteConfig {
    SiteConfig::new("https://m440.in", None, Duration::from_secs(10))
}

fn default_animeallstar() -> SiteConfig {
    SiteConfig::new("https://animeallstar30.com", None, Duration::from_secs(2))
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond precision for short politeness delays
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
