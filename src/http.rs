//! HTTP access to source sites
//!
//! One [`HttpClient`] is shared by every adapter and the image pipeline. It
//! sends the configured browser-like headers, turns non-success statuses into
//! [`Error::HttpStatus`] and recognizes challenge pages so their markup is
//! never parsed as chapter data.

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;

/// Markers of interstitial challenge pages
const CHALLENGE_MARKERS: [&str; 4] = [
    "<title>just a moment",
    "cf-browser-verification",
    "attention required! | cloudflare",
    "<title>cloudflare",
];

/// Whether an HTML document is an anti-bot interstitial
pub fn is_challenge_page(html: &str) -> bool {
    let lower = html.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether a page title is an anti-bot interstitial title
pub fn is_challenge_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    lower.contains("just a moment") || lower.contains("cloudflare")
}

/// Response body with its declared content type
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    /// Raw body
    pub bytes: Vec<u8>,
    /// Content-Type header value, if any
    pub content_type: Option<String>,
}

/// Shared HTTP client
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    no_redirect: reqwest::Client,
}

impl HttpClient {
    /// Build clients from configuration
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).map_err(|e| Error::Config {
                message: format!("invalid accept language: {}", e),
                key: Some("http.accept_language".to_string()),
            })?,
        );

        let build = |redirect: reqwest::redirect::Policy| {
            reqwest::Client::builder()
                .user_agent(config.user_agent.clone())
                .default_headers(headers.clone())
                .timeout(config.timeout)
                .redirect(redirect)
                .build()
                .map_err(|e| Error::Config {
                    message: format!("Failed to create HTTP client: {}", e),
                    key: Some("http".to_string()),
                })
        };

        Ok(Self {
            client: build(reqwest::redirect::Policy::limited(10))?,
            no_redirect: build(reqwest::redirect::Policy::none())?,
        })
    }

    /// GET a page as text
    ///
    /// Challenge pages fail with [`Error::AntiBot`] regardless of status.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if is_challenge_page(&body) {
            return Err(Error::AntiBot {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(body)
    }

    /// GET a JSON document with query parameters
    ///
    /// An HTML response where JSON was expected is treated as a challenge page.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        let is_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/html"));
        if is_html {
            return Err(Error::AntiBot {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| Error::Parse(format!("{}: {}", url, e)))
    }

    /// GET raw bytes, optionally sending a referer
    pub async fn get_bytes(&self, url: &str, referer: Option<&str>) -> Result<FetchedBytes> {
        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        Ok(FetchedBytes {
            bytes,
            content_type,
        })
    }

    /// GET without following redirects and return the `Location` target
    ///
    /// Relative locations are resolved against `url`.
    pub async fn redirect_location(&self, url: &str, referer: Option<&str>) -> Result<String> {
        let mut request = self.no_redirect.get(url);
        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_redirection() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Parse(format!("redirect without location from {}", url)))?;

        resolve_url(url, location)
    }

    /// GET following redirects; returns the status and the final URL
    pub async fn final_url(&self, url: &str) -> Result<(u16, String)> {
        let response = self.client.get(url).send().await?;
        Ok((response.status().as_u16(), response.url().to_string()))
    }
}

/// Resolve `href` against `base`, accepting protocol-relative and rooted links
pub fn resolve_url(base: &str, href: &str) -> Result<String> {
    let base = url::Url::parse(base).map_err(|e| Error::Parse(format!("bad url {}: {}", base, e)))?;
    base.join(href.trim())
        .map(|u| u.to_string())
        .map_err(|e| Error::Parse(format!("bad link {}: {}", href, e)))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(&HttpConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn get_text_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manga"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let body = client()
            .get_text(&format!("{}/manga", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn challenge_page_is_anti_bot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_string("<html><title>Just a moment...</title></html>"),
            )
            .mount(&server)
            .await;

        let err = client().get_text(&server.uri()).await.unwrap_err();
        assert!(matches!(err, Error::AntiBot { .. }));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client().get_text(&server.uri()).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn json_with_html_content_type_is_anti_bot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html></html>", "text/html; charset=UTF-8"),
            )
            .mount(&server)
            .await;

        let err = client()
            .get_json::<serde_json::Value>(
                &format!("{}/api", server.uri()),
                &[("page", "2".to_string())],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AntiBot { .. }));
    }

    #[tokio::test]
    async fn redirect_location_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/view_uploads/77"))
            .and(header("referer", "https://site.example/"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/viewer/abc/paginated"),
            )
            .mount(&server)
            .await;

        let location = client()
            .redirect_location(
                &format!("{}/view_uploads/77", server.uri()),
                Some("https://site.example/"),
            )
            .await
            .unwrap();
        assert_eq!(location, format!("{}/viewer/abc/paginated", server.uri()));
    }

    #[tokio::test]
    async fn missing_redirect_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = client()
            .redirect_location(&server.uri(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 200, .. }));
    }

    #[test]
    fn resolve_url_handles_relative_forms() {
        let base = "https://site.example/library/manga/1";
        assert_eq!(
            resolve_url(base, "//cdn.example/a.jpg").unwrap(),
            "https://cdn.example/a.jpg"
        );
        assert_eq!(
            resolve_url(base, "/uploads/b.png").unwrap(),
            "https://site.example/uploads/b.png"
        );
        assert_eq!(
            resolve_url(base, "https://other.example/c.webp").unwrap(),
            "https://other.example/c.webp"
        );
    }

    #[test]
    fn challenge_detection() {
        assert!(is_challenge_page("<TITLE>Just a moment...</TITLE>"));
        assert!(!is_challenge_page("<title>Capítulo 12</title>"));
        assert!(is_challenge_title("Attention Required! | Cloudflare"));
        assert!(!is_challenge_title("Solo Leveling"));
    }
}
