//! On-disk layout of a series
//!
//! ```text
//! <series root>/
//!   index.html
//!   cover.<ext>
//!   chapter_<label>.html
//!   chapter_<label>/page_001.<ext>
//!   chapter_<label>/notice.txt        (announcement posts only)
//! ```
//!
//! Files are written to a `.part` sibling and renamed into place, so a crash
//! never leaves a truncated page or document under its final name.

use crate::chapter::compare_labels;
use crate::error::Result;
use std::path::{Path, PathBuf};

const CHAPTER_PREFIX: &str = "chapter_";
const DOCUMENT_EXT: &str = ".html";

/// Name of the series index document
pub const INDEX_FILE: &str = "index.html";

/// Name of the announcement text stored in place of pages
pub const NOTICE_FILE: &str = "notice.txt";

const KNOWN_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

/// Label made safe for use in a file name
pub fn sanitize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Name of the directory holding a chapter's pages
pub fn chapter_dir_name(label: &str) -> String {
    format!("{}{}", CHAPTER_PREFIX, sanitize_label(label))
}

/// Directory holding a chapter's pages
pub fn chapter_dir(root: &Path, label: &str) -> PathBuf {
    root.join(chapter_dir_name(label))
}

/// File name of a chapter's navigation document
pub fn chapter_document_name(label: &str) -> String {
    format!("{}{}{}", CHAPTER_PREFIX, sanitize_label(label), DOCUMENT_EXT)
}

/// Path of a chapter's navigation document
pub fn chapter_document(root: &Path, label: &str) -> PathBuf {
    root.join(chapter_document_name(label))
}

/// Zero-padded page file name, numbered from 1 in source order
pub fn page_file_name(position: usize, ext: &str) -> String {
    format!("page_{:03}.{}", position, ext)
}

/// File extension for a downloaded image
///
/// The URL path wins, then the declared content type, then the sniffed
/// format; anything unrecognized is stored as `jpg`.
pub fn image_extension(url: &str, content_type: Option<&str>, bytes: &[u8]) -> String {
    let from_url = url::Url::parse(url).ok().and_then(|u| {
        u.path()
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
    });
    if let Some(ext) = from_url.filter(|e| KNOWN_EXTENSIONS.contains(&e.as_str())) {
        return ext;
    }

    let from_type = content_type
        .and_then(|t| t.split(';').next())
        .map(str::trim)
        .and_then(|t| match t {
            "image/jpeg" | "image/jpg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/webp" => Some("webp"),
            "image/gif" => Some("gif"),
            _ => None,
        });
    if let Some(ext) = from_type {
        return ext.to_string();
    }

    image::guess_format(bytes)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("jpg")
        .to_string()
}

/// Write `bytes` to `path` through a temporary sibling
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    tokio::fs::write(&part, bytes).await?;
    tokio::fs::rename(&part, path).await?;
    Ok(())
}

/// Remove whatever a failed attempt left in a chapter directory
pub async fn reset_chapter_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Remove a chapter's pages and document
pub async fn remove_chapter(root: &Path, label: &str) -> Result<()> {
    match tokio::fs::remove_dir_all(chapter_dir(root, label)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    match tokio::fs::remove_file(chapter_document(root, label)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Page files of a chapter directory, in page order
pub async fn list_pages(dir: &Path) -> Result<Vec<String>> {
    let mut pages = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(pages),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("page_") && !name.ends_with(".part") {
            pages.push(name);
        }
    }
    pages.sort_by_key(|name| (page_number(name), name.clone()));
    Ok(pages)
}

/// Position encoded in a page file name (`page_012.jpg` -> 12)
fn page_number(name: &str) -> Option<u32> {
    name.strip_prefix("page_")?
        .split('.')
        .next()?
        .parse()
        .ok()
}

/// Announcement text stored for a chapter, if any
pub async fn read_notice(dir: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(dir.join(NOTICE_FILE)).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Labels of every chapter with a navigation document, ascending
pub async fn stored_labels(root: &Path) -> Result<Vec<String>> {
    let mut labels = Vec::new();
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(labels),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(label) = name
            .strip_prefix(CHAPTER_PREFIX)
            .and_then(|rest| rest.strip_suffix(DOCUMENT_EXT))
        {
            labels.push(label.to_string());
        }
    }

    labels.sort_by(|a, b| compare_labels(a, b));
    Ok(labels)
}

/// Existing cover image file name, if one was saved
pub async fn find_cover(root: &Path) -> Option<String> {
    for ext in KNOWN_EXTENSIONS {
        let name = format!("cover.{}", ext);
        if tokio::fs::try_exists(root.join(&name)).await.unwrap_or(false) {
            return Some(name);
        }
    }
    None
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn page_names_are_zero_padded() {
        assert_eq!(page_file_name(1, "jpg"), "page_001.jpg");
        assert_eq!(page_file_name(42, "webp"), "page_042.webp");
        assert_eq!(page_file_name(1000, "png"), "page_1000.png");
    }

    #[test]
    fn labels_are_sanitized_for_paths() {
        assert_eq!(chapter_document_name("102.5"), "chapter_102.5.html");
        assert_eq!(sanitize_label("Extra 1/2"), "Extra_1_2");
    }

    #[test]
    fn extension_prefers_url_then_content_type() {
        assert_eq!(image_extension("https://cdn/a/01.WEBP?x=1", None, b""), "webp");
        assert_eq!(
            image_extension("https://cdn/a/01", Some("image/png; charset=binary"), b""),
            "png"
        );
        let png_magic = b"\x89PNG\r\n\x1a\n\0\0\0\0";
        assert_eq!(image_extension("https://cdn/a/01", None, png_magic), "png");
        assert_eq!(image_extension("https://cdn/a/01.php", None, b"??"), "jpg");
    }

    #[tokio::test]
    async fn stored_labels_are_ascending() {
        let dir = TempDir::new().unwrap();
        for label in ["10", "9.5", "100", "9"] {
            write_atomic(&chapter_document(dir.path(), label), b"<html></html>")
                .await
                .unwrap();
        }
        write_atomic(&dir.path().join(INDEX_FILE), b"").await.unwrap();

        let labels = stored_labels(dir.path()).await.unwrap();
        assert_eq!(labels, vec!["9", "9.5", "10", "100"]);
    }

    #[tokio::test]
    async fn reset_clears_partial_pages() {
        let dir = TempDir::new().unwrap();
        let chapter = chapter_dir(dir.path(), "3");
        write_atomic(&chapter.join("page_001.jpg"), b"x").await.unwrap();
        write_atomic(&chapter.join("page_002.jpg"), b"y").await.unwrap();
        assert_eq!(list_pages(&chapter).await.unwrap().len(), 2);

        reset_chapter_dir(&chapter).await.unwrap();
        assert!(list_pages(&chapter).await.unwrap().is_empty());
        assert!(chapter.is_dir());
    }

    #[tokio::test]
    async fn pages_sort_by_number_past_three_digits() {
        let dir = TempDir::new().unwrap();
        for position in [1000, 2, 101, 999] {
            write_atomic(&dir.path().join(page_file_name(position, "jpg")), b"x")
                .await
                .unwrap();
        }

        let pages = list_pages(dir.path()).await.unwrap();
        assert_eq!(
            pages,
            vec!["page_002.jpg", "page_101.jpg", "page_999.jpg", "page_1000.jpg"]
        );
    }

    #[tokio::test]
    async fn missing_directories_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_pages(&missing).await.unwrap().is_empty());
        assert!(stored_labels(&missing).await.unwrap().is_empty());
        assert!(read_notice(&missing).await.unwrap().is_none());
        assert!(find_cover(&missing).await.is_none());
    }
}
