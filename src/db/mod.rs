//! Database layer for manga-tracker
//!
//! Handles SQLite persistence for tracked series and site-specific caches.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: database lifecycle, schema migrations
//! - [`series`]: tracked series CRUD and the two chapter watermarks
//! - [`site_cache`]: catalog page positions used by slug discovery

use crate::error::{Error, Result};
use crate::types::{SeriesId, SiteKind};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod series;
mod site_cache;

/// New series to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewSeries {
    /// Display title; also used to find the series in a site catalog
    pub title: String,
    /// Source site
    pub site: SiteKind,
    /// Site-specific locator: listing URL, slug or numeric post id
    pub locator: Option<String>,
    /// Storage directory, absolute or relative to the library root
    pub storage_path: String,
    /// Whether batch checks include this series
    pub tracking: bool,
    /// Chapter already available locally; downloads start after it
    pub last_downloaded_chapter: Option<String>,
}

/// Series record from database
#[derive(Debug, Clone, FromRow)]
pub struct Series {
    /// Unique database ID
    pub id: SeriesId,
    /// Display title
    pub title: String,
    /// Source site identifier (see [`SiteKind::as_str`])
    pub site: String,
    /// Site-specific locator: listing URL, slug or numeric post id
    pub locator: Option<String>,
    /// Storage directory, absolute or relative to the library root
    pub storage_path: String,
    /// Highest chapter known to exist at the source
    pub last_checked_chapter: Option<String>,
    /// Highest chapter whose artifacts are on disk
    pub last_downloaded_chapter: Option<String>,
    /// Source URL of the chapter recorded in `last_downloaded_chapter`
    pub last_download_url: Option<String>,
    /// Whether batch checks include this series
    pub tracking: bool,
    /// Unix timestamp of the last completed check
    pub last_check_at: Option<i64>,
    /// Unix timestamp when the series was added
    pub created_at: i64,
}

impl Series {
    /// Parsed source site
    pub fn site_kind(&self) -> Result<SiteKind> {
        self.site.parse()
    }

    /// The locator, or a fatal error when the series has none
    pub fn require_locator(&self) -> Result<&str> {
        self.locator
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(Error::MissingField {
                series_id: self.id.get(),
                field: "locator",
            })
    }
}

/// Filter for [`Database::list_series`]
#[derive(Debug, Clone, Default)]
pub struct SeriesFilter {
    /// Only series with tracking enabled
    pub tracking_only: bool,
    /// Only series on this site
    pub site: Option<SiteKind>,
}

impl SeriesFilter {
    /// Tracked series, optionally restricted to one site
    pub fn tracked(site: Option<SiteKind>) -> Self {
        Self {
            tracking_only: true,
            site,
        }
    }
}

/// Catalog sort direction remembered by the site cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogDirection {
    /// Oldest series first
    Asc,
    /// Newest series first
    Desc,
}

impl CatalogDirection {
    /// Value stored in the database and sent as the `direction` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogDirection::Asc => "asc",
            CatalogDirection::Desc => "desc",
        }
    }

    /// The other direction
    pub fn opposite(&self) -> Self {
        match self {
            CatalogDirection::Asc => CatalogDirection::Desc,
            CatalogDirection::Desc => CatalogDirection::Asc,
        }
    }

    /// Parse a stored value; anything other than "asc" reads as descending
    pub fn from_db(value: &str) -> Self {
        if value == "asc" {
            CatalogDirection::Asc
        } else {
            CatalogDirection::Desc
        }
    }
}

/// Site cache record: where a series was last found in a paginated catalog
#[derive(Debug, Clone, FromRow)]
pub struct SiteCache {
    /// Series this entry belongs to
    pub series_id: SeriesId,
    /// Catalog page holding the series when sorted ascending
    pub asc_page: i64,
    /// Catalog page holding the series when sorted descending
    pub desc_page: i64,
    /// Direction whose slug last validated ("asc" or "desc")
    pub direction: String,
}

impl SiteCache {
    /// Direction whose slug last validated
    pub fn valid_direction(&self) -> CatalogDirection {
        CatalogDirection::from_db(&self.direction)
    }

    /// Cached catalog page for `direction`
    pub fn page_for(&self, direction: CatalogDirection) -> i64 {
        match direction {
            CatalogDirection::Asc => self.asc_page,
            CatalogDirection::Desc => self.desc_page,
        }
    }
}

/// Database handle for manga-tracker
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
