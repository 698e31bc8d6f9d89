//! Tracked series CRUD and watermark updates.
//!
//! Every update touches one row with one statement.

use crate::chapter;
use crate::error::DatabaseError;
use crate::types::SeriesId;
use crate::{Error, Result};

use super::{Database, NewSeries, Series, SeriesFilter};

const SERIES_COLUMNS: &str = r#"
    id, title, site, locator, storage_path,
    last_checked_chapter, last_downloaded_chapter, last_download_url,
    tracking, last_check_at, created_at
"#;

impl Database {
    /// Insert a new series
    ///
    /// An initial download watermark also seeds the check watermark.
    pub async fn insert_series(&self, series: &NewSeries) -> Result<SeriesId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO series (
                title, site, locator, storage_path,
                last_checked_chapter, last_downloaded_chapter,
                tracking, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&series.title)
        .bind(series.site.as_str())
        .bind(&series.locator)
        .bind(&series.storage_path)
        .bind(&series.last_downloaded_chapter)
        .bind(&series.last_downloaded_chapter)
        .bind(series.tracking)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert series: {}",
                e
            )))
        })?;

        Ok(SeriesId(result.last_insert_rowid()))
    }

    /// Get a series by ID
    pub async fn get_series(&self, id: SeriesId) -> Result<Option<Series>> {
        let row = sqlx::query_as::<_, Series>(&format!(
            "SELECT {} FROM series WHERE id = ?",
            SERIES_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get series: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List series grouped by site, then by title
    pub async fn list_series(&self, filter: &SeriesFilter) -> Result<Vec<Series>> {
        let rows = sqlx::query_as::<_, Series>(&format!(
            r#"
            SELECT {}
            FROM series
            WHERE (? = 0 OR tracking = 1)
              AND (? IS NULL OR site = ?)
            ORDER BY site ASC, title COLLATE NOCASE ASC, id ASC
            "#,
            SERIES_COLUMNS
        ))
        .bind(filter.tracking_only)
        .bind(filter.site.map(|s| s.as_str()))
        .bind(filter.site.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list series: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete a series (its site cache entry goes with it)
    ///
    /// Returns true if a row was deleted.
    pub async fn delete_series(&self, id: SeriesId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM series WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete series: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Enable or disable tracking
    pub async fn set_tracking(&self, id: SeriesId, tracking: bool) -> Result<()> {
        let result = sqlx::query("UPDATE series SET tracking = ? WHERE id = ?")
            .bind(tracking)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update tracking: {}",
                    e
                )))
            })?;

        ensure_found(result.rows_affected(), id)
    }

    /// Replace the site-specific locator (slug discovery, moved listings)
    pub async fn update_locator(&self, id: SeriesId, locator: &str) -> Result<()> {
        let result = sqlx::query("UPDATE series SET locator = ? WHERE id = ?")
            .bind(locator)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update locator: {}",
                    e
                )))
            })?;

        ensure_found(result.rows_affected(), id)
    }

    /// Record the newest chapter observed at the source
    pub async fn update_checked_chapter(&self, id: SeriesId, label: &str) -> Result<()> {
        let result = sqlx::query("UPDATE series SET last_checked_chapter = ? WHERE id = ?")
            .bind(label)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update checked chapter: {}",
                    e
                )))
            })?;

        ensure_found(result.rows_affected(), id)
    }

    /// Record a durably downloaded chapter and the URL it came from
    ///
    /// When the check watermark is behind (or unset) it is lifted to the same
    /// label. The read and the update run in one transaction, so the
    /// downloaded watermark never exceeds the checked one.
    pub async fn update_downloaded_chapter(
        &self,
        id: SeriesId,
        label: &str,
        source_url: &str,
    ) -> Result<()> {
        let query_failed = |what: &str, e: sqlx::Error| {
            Error::Database(DatabaseError::QueryFailed(format!("Failed to {}: {}", what, e)))
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("start transaction", e))?;

        let current: Option<Option<String>> =
            sqlx::query_scalar("SELECT last_checked_chapter FROM series WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| query_failed("read checked chapter", e))?;

        let Some(checked) = current else {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "series {}",
                id
            ))));
        };

        let checked = match checked {
            Some(checked) if !chapter::compare_labels(&checked, label).is_lt() => checked,
            _ => label.to_string(),
        };

        let result = sqlx::query(
            r#"
            UPDATE series
            SET last_downloaded_chapter = ?, last_download_url = ?, last_checked_chapter = ?
            WHERE id = ?
            "#,
        )
        .bind(label)
        .bind(source_url)
        .bind(&checked)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("update downloaded chapter", e))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit downloaded chapter", e))?;

        ensure_found(result.rows_affected(), id)
    }

    /// Stamp the time of the last completed check
    pub async fn touch_last_check(&self, id: SeriesId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query("UPDATE series SET last_check_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update last check time: {}",
                    e
                )))
            })?;

        ensure_found(result.rows_affected(), id)
    }
}

fn ensure_found(rows_affected: u64, id: SeriesId) -> Result<()> {
    if rows_affected == 0 {
        return Err(Error::Database(DatabaseError::NotFound(format!(
            "series {}",
            id
        ))));
    }
    Ok(())
}
