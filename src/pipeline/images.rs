//! Page image download and validation

use super::storage;
use crate::adapters::ImageIntegrity;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::logging::RunLogger;
use crate::retry::{RetryOutcome, run_with_retry};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

/// Check a downloaded image against an integrity policy
pub fn validate_image(integrity: &ImageIntegrity, url: &str, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(Error::Integrity(format!("empty image body from {}", url)));
    }

    let ImageIntegrity::Strict {
        min_dimension,
        reject_patterns,
    } = integrity
    else {
        return Ok(());
    };

    if let Some(pattern) = reject_patterns.iter().find(|p| url.contains(p.as_str())) {
        return Err(Error::Integrity(format!(
            "placeholder image {} (matches {})",
            url, pattern
        )));
    }

    let (width, height) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| Error::Integrity(format!("unreadable image {}: {}", url, e)))?
        .into_dimensions()
        .map_err(|e| Error::Integrity(format!("undecodable image {}: {}", url, e)))?;

    if width < *min_dimension && height < *min_dimension {
        return Err(Error::Integrity(format!(
            "image {} is {}x{}, below {}px",
            url, width, height, min_dimension
        )));
    }

    Ok(())
}

/// Everything [`download_images`] needs besides the URLs
pub struct ImageJob<'a> {
    /// HTTP client
    pub http: &'a HttpClient,
    /// Sent as `Referer` with every image request
    pub referer: &'a str,
    /// Validation policy of the adapter
    pub integrity: &'a ImageIntegrity,
    /// Per-image retry bounds
    pub retry: &'a RetryConfig,
    /// Pause between images
    pub delay: Duration,
    /// Run log
    pub logger: &'a RunLogger,
}

async fn fetch_page(job: &ImageJob<'_>, url: &str) -> Result<(Vec<u8>, String)> {
    let fetched = job.http.get_bytes(url, Some(job.referer)).await?;
    validate_image(job.integrity, url, &fetched.bytes)?;
    let ext = storage::image_extension(url, fetched.content_type.as_deref(), &fetched.bytes);
    Ok((fetched.bytes, ext))
}

/// Download page images into `dest`, returning the saved file names in page order
///
/// Each image gets its own bounded retry. Under a lenient policy an image that
/// exhausts its attempts is dropped and the chapter carries on; under a strict
/// policy the first such image fails the whole chapter. A chapter that ends up
/// with no pages at all is an integrity failure either way.
pub async fn download_images(job: &ImageJob<'_>, urls: &[String], dest: &Path) -> Result<Vec<String>> {
    let strict = matches!(job.integrity, ImageIntegrity::Strict { .. });
    let mut saved = Vec::with_capacity(urls.len());

    for (index, url) in urls.iter().enumerate() {
        if index > 0 && !job.delay.is_zero() {
            tokio::time::sleep(job.delay).await;
        }

        let outcome = run_with_retry(job.retry, || fetch_page(job, url)).await;
        match outcome {
            RetryOutcome::Succeeded {
                value: (bytes, ext),
                ..
            } => {
                let name = storage::page_file_name(index + 1, &ext);
                storage::write_atomic(&dest.join(&name), &bytes).await?;
                saved.push(name);
            }
            RetryOutcome::Exhausted { error, attempts } | RetryOutcome::Fatal { error, attempts } => {
                if strict {
                    job.logger.error(format!(
                        "page {} failed after {} attempts: {}",
                        index + 1,
                        attempts,
                        error
                    ));
                    return Err(error);
                }
                tracing::warn!(url = %url, attempts, error = %error, "Dropping page image");
                job.logger.warn(format!(
                    "page {} dropped after {} attempts: {}",
                    index + 1,
                    attempts,
                    error
                ));
            }
        }
    }

    if saved.is_empty() {
        return Err(Error::Integrity(format!(
            "none of {} page images could be saved",
            urls.len()
        )));
    }

    Ok(saved)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// PNG of the given size
    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::RgbImage::new(width, height)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn strict() -> ImageIntegrity {
        ImageIntegrity::Strict {
            min_dimension: 400,
            reject_patterns: vec!["loading.gif".to_string()],
        }
    }

    fn job<'a>(
        http: &'a HttpClient,
        integrity: &'a ImageIntegrity,
        retry: &'a RetryConfig,
        logger: &'a RunLogger,
    ) -> ImageJob<'a> {
        ImageJob {
            http,
            referer: "https://reader.example/chapter/1",
            integrity,
            retry,
            delay: Duration::ZERO,
            logger,
        }
    }

    #[test]
    fn strict_rejects_small_and_placeholder_images() {
        let policy = strict();
        assert!(validate_image(&policy, "https://cdn/1.png", &png(800, 1200)).is_ok());
        // one side large enough is fine
        assert!(validate_image(&policy, "https://cdn/1.png", &png(900, 300)).is_ok());
        assert!(matches!(
            validate_image(&policy, "https://cdn/1.png", &png(100, 100)),
            Err(Error::Integrity(_))
        ));
        assert!(matches!(
            validate_image(&policy, "https://cdn/loading.gif", &png(800, 800)),
            Err(Error::Integrity(_))
        ));
        assert!(matches!(
            validate_image(&policy, "https://cdn/1.png", b"<html>not an image</html>"),
            Err(Error::Integrity(_))
        ));
    }

    #[test]
    fn lenient_accepts_any_body() {
        assert!(validate_image(&ImageIntegrity::Lenient, "u", b"abc").is_ok());
        assert!(validate_image(&ImageIntegrity::Lenient, "u", b"").is_err());
    }

    #[tokio::test]
    async fn pages_are_saved_in_source_order_with_referer() {
        let server = MockServer::start().await;
        for (route, size) in [("/p/1.png", 500u32), ("/p/2", 600)] {
            Mock::given(method("GET"))
                .and(path(route))
                .and(header("referer", "https://reader.example/chapter/1"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-type", "image/png")
                        .set_body_bytes(png(size, size)),
                )
                .mount(&server)
                .await;
        }

        let dir = TempDir::new().unwrap();
        let http = HttpClient::new(&HttpConfig::default()).unwrap();
        let policy = strict();
        let retry = RetryConfig::fixed(2, Duration::ZERO);
        let logger = RunLogger::disabled();

        let urls = vec![format!("{}/p/1.png", server.uri()), format!("{}/p/2", server.uri())];
        let saved = download_images(&job(&http, &policy, &retry, &logger), &urls, dir.path())
            .await
            .unwrap();

        assert_eq!(saved, vec!["page_001.png", "page_002.png"]);
        assert!(dir.path().join("page_002.png").is_file());
    }

    #[tokio::test]
    async fn lenient_drops_failing_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/2.jpg"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/3.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = HttpClient::new(&HttpConfig::default()).unwrap();
        let retry = RetryConfig::fixed(3, Duration::ZERO);
        let logger = RunLogger::disabled();
        let urls: Vec<String> = (1..=3).map(|i| format!("{}/p/{}.jpg", server.uri(), i)).collect();

        let saved = download_images(
            &job(&http, &ImageIntegrity::Lenient, &retry, &logger),
            &urls,
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(saved, vec!["page_001.jpg", "page_003.jpg"]);
    }

    #[tokio::test]
    async fn strict_fails_chapter_on_bad_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png(50, 50)))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = HttpClient::new(&HttpConfig::default()).unwrap();
        let policy = strict();
        let retry = RetryConfig::fixed(2, Duration::ZERO);
        let logger = RunLogger::disabled();
        let urls = vec![format!("{}/p/1.png", server.uri())];

        let err = download_images(&job(&http, &policy, &retry, &logger), &urls, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[tokio::test]
    async fn chapter_without_any_saved_page_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = HttpClient::new(&HttpConfig::default()).unwrap();
        let retry = RetryConfig::fixed(1, Duration::ZERO);
        let logger = RunLogger::disabled();
        let urls = vec![format!("{}/p/1.jpg", server.uri())];

        let err = download_images(
            &job(&http, &ImageIntegrity::Lenient, &retry, &logger),
            &urls,
            dir.path(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }
}
