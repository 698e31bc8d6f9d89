mod migrations;
mod series;

use crate::db::{Database, NewSeries};
use crate::types::{SeriesId, SiteKind};

pub(super) fn new_series(title: &str, site: SiteKind) -> NewSeries {
    NewSeries {
        title: title.to_string(),
        site,
        locator: Some(format!("https://example.com/{}", title.to_lowercase())),
        storage_path: title.to_lowercase().replace(' ', "-"),
        tracking: true,
        last_downloaded_chapter: None,
    }
}

pub(super) async fn insert(db: &Database, title: &str, site: SiteKind) -> SeriesId {
    db.insert_series(&new_series(title, site)).await.unwrap()
}
