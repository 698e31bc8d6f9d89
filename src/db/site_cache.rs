//! Catalog position cache for slug discovery.

use crate::error::DatabaseError;
use crate::types::SeriesId;
use crate::{Error, Result};

use super::{CatalogDirection, Database, SiteCache};

impl Database {
    /// Get the cache entry for a series
    pub async fn get_site_cache(&self, series_id: SeriesId) -> Result<Option<SiteCache>> {
        let row = sqlx::query_as::<_, SiteCache>(
            r#"
            SELECT series_id, asc_page, desc_page, direction
            FROM site_cache
            WHERE series_id = ?
            "#,
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get site cache: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Insert a cache entry
    pub async fn insert_site_cache(
        &self,
        series_id: SeriesId,
        asc_page: i64,
        desc_page: i64,
        direction: CatalogDirection,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO site_cache (series_id, asc_page, desc_page, direction)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(series_id)
        .bind(asc_page)
        .bind(desc_page)
        .bind(direction.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let message = e.to_string();
            if message.contains("UNIQUE") || message.contains("FOREIGN KEY") {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "Failed to insert site cache: {}",
                    message
                )))
            } else {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert site cache: {}",
                    message
                )))
            }
        })?;

        Ok(())
    }

    /// Update the cached pages; `None` leaves a page unchanged
    pub async fn update_site_cache_pages(
        &self,
        series_id: SeriesId,
        asc_page: Option<i64>,
        desc_page: Option<i64>,
    ) -> Result<()> {
        if asc_page.is_none() && desc_page.is_none() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE site_cache
            SET asc_page = COALESCE(?, asc_page), desc_page = COALESCE(?, desc_page)
            WHERE series_id = ?
            "#,
        )
        .bind(asc_page)
        .bind(desc_page)
        .bind(series_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update site cache pages: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Record which catalog direction produced a valid slug
    pub async fn update_site_cache_direction(
        &self,
        series_id: SeriesId,
        direction: CatalogDirection,
    ) -> Result<()> {
        sqlx::query("UPDATE site_cache SET direction = ? WHERE series_id = ?")
            .bind(direction.as_str())
            .bind(series_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update site cache direction: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete the cache entry, forcing a full catalog scan next time
    pub async fn delete_site_cache(&self, series_id: SeriesId) -> Result<()> {
        sqlx::query("DELETE FROM site_cache WHERE series_id = ?")
            .bind(series_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete site cache: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
