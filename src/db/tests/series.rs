use crate::chapter::compare_labels;
use crate::db::*;
use crate::error::{DatabaseError, Error};
use crate::types::{SeriesId, SiteKind};
use tempfile::NamedTempFile;

use super::{insert, new_series};

#[tokio::test]
async fn test_insert_and_get_series() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = insert(&db, "Solo Leveling", SiteKind::Tmo).await;
    let series = db.get_series(id).await.unwrap().unwrap();

    assert_eq!(series.id, id);
    assert_eq!(series.title, "Solo Leveling");
    assert_eq!(series.site_kind().unwrap(), SiteKind::Tmo);
    assert_eq!(series.storage_path, "solo-leveling");
    assert!(series.tracking);
    assert!(series.last_checked_chapter.is_none());
    assert!(series.last_downloaded_chapter.is_none());
    assert!(series.last_download_url.is_none());
    assert!(series.last_check_at.is_none());
    assert!(series.created_at > 0);
}

#[tokio::test]
async fn test_initial_watermark_seeds_both_fields() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let mut new = new_series("Berserk", SiteKind::M440);
    new.last_downloaded_chapter = Some("370".to_string());
    let id = db.insert_series(&new).await.unwrap();

    let series = db.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.last_downloaded_chapter.as_deref(), Some("370"));
    assert_eq!(series.last_checked_chapter.as_deref(), Some("370"));
}

#[tokio::test]
async fn test_get_missing_series_is_none() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(db.get_series(SeriesId(99)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_series_filters_and_groups_by_site() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let b = insert(&db, "Berserk", SiteKind::Tmo).await;
    let a = insert(&db, "akira", SiteKind::Tmo).await;
    let m = insert(&db, "Monster", SiteKind::M440).await;
    let paused = insert(&db, "Paused", SiteKind::Tmo).await;
    db.set_tracking(paused, false).await.unwrap();

    let all = db.list_series(&SeriesFilter::default()).await.unwrap();
    assert_eq!(all.len(), 4);
    // "m440" sorts before "tmo"; titles sort case-insensitively within a site
    let ids: Vec<SeriesId> = all.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![m, a, b, paused]);

    let tracked = db.list_series(&SeriesFilter::tracked(None)).await.unwrap();
    assert_eq!(tracked.len(), 3);
    assert!(tracked.iter().all(|s| s.tracking));

    let tmo = db
        .list_series(&SeriesFilter::tracked(Some(SiteKind::Tmo)))
        .await
        .unwrap();
    let ids: Vec<SeriesId> = tmo.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![a, b]);
}

#[tokio::test]
async fn test_update_checked_chapter() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = insert(&db, "Solo Leveling", SiteKind::Tmo).await;

    db.update_checked_chapter(id, "42").await.unwrap();

    let series = db.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.last_checked_chapter.as_deref(), Some("42"));
    assert!(series.last_downloaded_chapter.is_none());
}

#[tokio::test]
async fn test_update_downloaded_chapter_keeps_checked_ahead() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = insert(&db, "Solo Leveling", SiteKind::Tmo).await;

    db.update_checked_chapter(id, "12").await.unwrap();
    db.update_downloaded_chapter(id, "11", "https://example.com/c/11")
        .await
        .unwrap();

    let series = db.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.last_downloaded_chapter.as_deref(), Some("11"));
    assert_eq!(
        series.last_download_url.as_deref(),
        Some("https://example.com/c/11")
    );
    assert_eq!(series.last_checked_chapter.as_deref(), Some("12"));
}

#[tokio::test]
async fn test_update_downloaded_chapter_lifts_checked_when_behind() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = insert(&db, "Solo Leveling", SiteKind::Tmo).await;

    // never checked
    db.update_downloaded_chapter(id, "3", "https://example.com/c/3")
        .await
        .unwrap();
    let series = db.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.last_checked_chapter.as_deref(), Some("3"));

    // checked is numerically behind even though "10" < "9" as strings
    db.update_checked_chapter(id, "9").await.unwrap();
    db.update_downloaded_chapter(id, "10", "https://example.com/c/10")
        .await
        .unwrap();
    let series = db.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.last_checked_chapter.as_deref(), Some("10"));
}

#[tokio::test]
async fn test_update_downloaded_chapter_is_atomic_with_checked() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = insert(&db, "Solo Leveling", SiteKind::Tmo).await;

    db.update_checked_chapter(id, "12.5").await.unwrap();
    for label in ["11", "12", "12.5", "13"] {
        db.update_downloaded_chapter(id, label, &format!("https://example.com/c/{label}"))
            .await
            .unwrap();
        let series = db.get_series(id).await.unwrap().unwrap();
        let downloaded = series.last_downloaded_chapter.unwrap();
        let checked = series.last_checked_chapter.unwrap();
        assert!(
            !compare_labels(&checked, &downloaded).is_lt(),
            "checked {checked} fell behind downloaded {downloaded}"
        );
    }

    let series = db.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.last_checked_chapter.as_deref(), Some("13"));
}

#[tokio::test]
async fn test_updates_on_missing_series_fail() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let result = db.update_checked_chapter(SeriesId(5), "1").await;
    assert!(matches!(
        result,
        Err(Error::Database(DatabaseError::NotFound(_)))
    ));

    let result = db
        .update_downloaded_chapter(SeriesId(5), "1", "https://example.com/c/1")
        .await;
    assert!(matches!(
        result,
        Err(Error::Database(DatabaseError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_update_locator_and_touch_last_check() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = insert(&db, "Nano Machine", SiteKind::OlympusCom).await;

    db.update_locator(id, "nano-machine-20230101").await.unwrap();
    db.touch_last_check(id).await.unwrap();

    let series = db.get_series(id).await.unwrap().unwrap();
    assert_eq!(series.require_locator().unwrap(), "nano-machine-20230101");
    assert!(series.last_check_at.is_some());
}

#[tokio::test]
async fn test_require_locator_is_fatal_when_missing() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let mut new = new_series("Nano Machine", SiteKind::OlympusCom);
    new.locator = None;
    let id = db.insert_series(&new).await.unwrap();

    let series = db.get_series(id).await.unwrap().unwrap();
    let err = series.require_locator().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, Error::MissingField { field: "locator", .. }));
}

#[tokio::test]
async fn test_unknown_site_in_row_is_fatal() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = insert(&db, "Solo Leveling", SiteKind::Tmo).await;

    sqlx::query("UPDATE series SET site = 'gone' WHERE id = ?")
        .bind(id)
        .execute(db.pool())
        .await
        .unwrap();

    let series = db.get_series(id).await.unwrap().unwrap();
    assert!(matches!(series.site_kind(), Err(Error::UnknownSite(_))));
}

#[tokio::test]
async fn test_delete_series() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = insert(&db, "Solo Leveling", SiteKind::Tmo).await;

    assert!(db.delete_series(id).await.unwrap());
    assert!(!db.delete_series(id).await.unwrap());
    assert!(db.get_series(id).await.unwrap().is_none());
}
