//! Core types for manga-tracker

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Unique identifier for a tracked series
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(pub i64);

impl SeriesId {
    /// Create a new SeriesId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for SeriesId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<SeriesId> for i64 {
    fn from(id: SeriesId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for SeriesId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for SeriesId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SeriesId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for SeriesId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for SeriesId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for SeriesId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Source site a series is published on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    /// TMO: HTML listing, viewer reached through a redirect
    Tmo,
    /// Olympus .net: WordPress AJAX listing keyed by post id
    OlympusNet,
    /// Olympus .com: JSON chapter API keyed by slug
    OlympusCom,
    /// M440: browser-rendered listing
    M440,
    /// AnimeAllStar: blog post listing
    AnimeAllStar,
}

impl SiteKind {
    /// Every supported site, in batch iteration order
    pub const ALL: [SiteKind; 5] = [
        SiteKind::Tmo,
        SiteKind::OlympusNet,
        SiteKind::OlympusCom,
        SiteKind::M440,
        SiteKind::AnimeAllStar,
    ];

    /// Identifier stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteKind::Tmo => "tmo",
            SiteKind::OlympusNet => "olympus_net",
            SiteKind::OlympusCom => "olympus_com",
            SiteKind::M440 => "m440",
            SiteKind::AnimeAllStar => "animeallstar",
        }
    }
}

impl std::fmt::Display for SiteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SiteKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SiteKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownSite(s.to_string()))
    }
}

/// One chapter as listed by a source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    /// Published chapter number, e.g. "102" or "102.5"
    pub label: String,
    /// URL of the chapter reader page
    pub url: String,
    /// Site-specific chapter slug or id, when the source exposes one
    pub slug: Option<String>,
}

impl ChapterRef {
    /// Create a chapter reference without a slug
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            slug: None,
        }
    }

    /// Attach a site-specific slug
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }
}

/// A series' chapter listing as fetched from its source
#[derive(Clone, Debug, Default)]
pub struct Listing {
    /// Chapters in the order the source returned them (usually newest first)
    pub chapters: Vec<ChapterRef>,
    /// Cover image URL, if the listing page shows one
    pub cover_url: Option<String>,
}

impl Listing {
    /// Listing without a cover
    pub fn new(chapters: Vec<ChapterRef>) -> Self {
        Self {
            chapters,
            cover_url: None,
        }
    }
}

/// Result of checking one series for new chapters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChapterCheckResult {
    /// Series that was checked
    pub series_id: SeriesId,
    /// True when at least one chapter is newer than the download watermark
    pub has_new: bool,
    /// Newest chapter label observed at the source
    pub newest: Option<String>,
    /// Number of new chapters
    pub new_count: usize,
    /// New chapters in ascending order
    pub new_chapters: Vec<ChapterRef>,
}

impl ChapterCheckResult {
    /// A negative result: nothing new, nothing observed
    pub fn empty(series_id: SeriesId) -> Self {
        Self {
            series_id,
            has_new: false,
            newest: None,
            new_count: 0,
            new_chapters: Vec::new(),
        }
    }
}

/// What a chapter reader page contains
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChapterContent {
    /// Page image URLs in reading order
    Pages(Vec<String>),
    /// An announcement published in place of a chapter
    Notice(String),
}

/// Where a download run starts
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartPoint {
    /// Everything newer than the download watermark
    Pending,
    /// Everything after the last recorded download URL
    Resume,
    /// The given chapter and everything after it
    FromChapter(String),
}
