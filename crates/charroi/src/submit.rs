//! Submission of validation payloads to the charroi server.
//!
//! The sync runner only needs "send this payload, tell me if it worked";
//! [`ValidationSubmitter`] is that seam, and [`HttpSubmitter`] is the real
//! REST implementation.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{Error, Result};

/// Longest response body kept in a rejection error.
const MAX_ERROR_BODY: usize = 512;

/// Something that can deliver one validation payload to the server.
#[async_trait::async_trait]
pub trait ValidationSubmitter: Send + Sync {
    /// Submit one payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload was not accepted, for whatever reason.
    async fn submit(&self, payload: &Value) -> Result<()>;
}

/// Posts validation payloads as JSON to the validation endpoint.
#[derive(Debug, Clone)]
pub struct HttpSubmitter {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    headers: HeaderMap,
}

impl HttpSubmitter {
    /// Create a submitter for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an http(s) URL, the token is
    /// not a valid header value, or the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration, auth_token: Option<&str>) -> Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| Error::invalid_url(endpoint, e.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::invalid_url(
                endpoint.as_str(),
                "scheme must be http or https",
            ));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::internal(format!("invalid auth token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            headers,
        })
    }

    /// Create a submitter from the application configuration.
    ///
    /// # Errors
    ///
    /// See [`HttpSubmitter::new`].
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.validation_url(),
            config.request_timeout(),
            config.server.auth_token.as_deref(),
        )
    }

    /// The endpoint payloads are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[async_trait::async_trait]
impl ValidationSubmitter for HttpSubmitter {
    #[instrument(name = "submit_validation", skip_all, fields(endpoint = %self.endpoint))]
    async fn submit(&self, payload: &Value) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Validation accepted");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(Error::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_accepts_http_endpoint() {
        let submitter = HttpSubmitter::new(
            "http://localhost:8070/api/charroi/validation_demande",
            Duration::from_secs(5),
            None,
        )
        .unwrap();
        assert_eq!(
            submitter.endpoint(),
            "http://localhost:8070/api/charroi/validation_demande"
        );
        assert!(submitter.headers.is_empty());
    }

    #[test]
    fn test_new_rejects_bad_urls() {
        let err = HttpSubmitter::new("not a url", Duration::from_secs(5), None).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));

        let err =
            HttpSubmitter::new("ftp://host/validation", Duration::from_secs(5), None).unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_auth_header() {
        let submitter = HttpSubmitter::new(
            "https://fleet.example.com/api/charroi/validation_demande",
            Duration::from_secs(5),
            Some("secret"),
        )
        .unwrap();
        assert_eq!(
            submitter.headers.get(AUTHORIZATION).unwrap(),
            "Bearer secret"
        );
    }

    #[test]
    fn test_invalid_auth_token() {
        let err = HttpSubmitter::new(
            "https://fleet.example.com/x",
            Duration::from_secs(5),
            Some("bad\ntoken"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid auth token"));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.server.url = "https://fleet.example.com".to_string();
        let submitter = HttpSubmitter::from_config(&config).unwrap();
        assert_eq!(
            submitter.endpoint(),
            "https://fleet.example.com/api/charroi/validation_demande"
        );
    }

    /// Accept one connection, answer with `status` and `body`, and return
    /// the raw request that was received.
    async fn serve_once(
        status: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!(
            "http://{}/api/charroi/validation_demande",
            listener.local_addr().unwrap()
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0_u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8(request).unwrap()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_submit_posts_json_with_bearer_token() {
        let (url, server) = serve_once("200 OK", String::new()).await;
        let submitter = HttpSubmitter::new(&url, Duration::from_secs(5), Some("secret")).unwrap();
        let payload = json!({"id_bande_sortie": 12, "statut": "valide"});

        submitter.submit(&payload).await.unwrap();

        let request = server.await.unwrap();
        let (head, body) = request.split_once("\r\n\r\n").unwrap();
        let head = head.to_lowercase();
        assert!(head.starts_with("post /api/charroi/validation_demande http/1.1"));
        assert!(head.contains("authorization: bearer secret"));
        assert!(head.contains("content-type: application/json"));
        assert_eq!(serde_json::from_str::<Value>(body).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_submit_non_success_is_rejected_with_truncated_body() {
        // The odd prefix puts byte 512 inside a two-byte character.
        let long_body = format!("x{}", "é".repeat(600));
        let (url, server) = serve_once("503 Service Unavailable", long_body).await;
        let submitter = HttpSubmitter::new(&url, Duration::from_secs(5), None).unwrap();

        let err = submitter.submit(&json!({"id_bon": 3})).await.unwrap_err();
        server.await.unwrap();

        match err {
            Error::Rejected { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body.len(), MAX_ERROR_BODY - 1);
                assert!(body.starts_with('x'));
                assert!(body[1..].chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_submit_client_error_is_rejected() {
        let (url, server) = serve_once("404 Not Found", "no such route".to_string()).await;
        let submitter = HttpSubmitter::new(&url, Duration::from_secs(5), None).unwrap();

        let err = submitter.submit(&json!({})).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(
            &err,
            Error::Rejected { status: 404, body } if body == "no such route"
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_submit_unreachable_server_is_http_error() {
        // Port 9 (discard) is almost never listening on loopback.
        let submitter = HttpSubmitter::new(
            "http://127.0.0.1:9/api/charroi/validation_demande",
            Duration::from_secs(2),
            None,
        )
        .unwrap();

        let err = submitter
            .submit(&json!({"id_bande_sortie": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert!(err.is_retryable());
    }
}
