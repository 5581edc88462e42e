//! Signaling transport: POST the local offer, get back status and body.
//!
//! [`HttpSignaling`] is the production client (reqwest).  The handshake only
//! depends on the [`SignalingClient`] trait, so tests script responses with
//! [`MockSignaling`] instead of running a server.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::config::SignalingConfig;

use super::handshake::NegotiationError;

/// MIME type of a session-description body.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// Where the offer goes and which headers accompany it.  Authorization is
/// the caller's business; headers are sent verbatim, except `Content-Type`,
/// which is always `application/sdp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl SignalingRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// `<base_url>?model=<model>`, plus a bearer header when an API key is
    /// configured and non-empty.
    pub fn from_config(config: &SignalingConfig) -> Self {
        let separator = if config.base_url.contains('?') { '&' } else { '?' };
        let request = Self::new(format!(
            "{}{separator}model={}",
            config.base_url, config.model
        ));

        match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => request.with_header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }
}

/// Raw HTTP outcome; classification happens in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingResponse {
    pub status: u16,
    pub body: String,
}

// ---------------------------------------------------------------------------
// SignalingClient trait
// ---------------------------------------------------------------------------

/// Sends one SDP offer and returns the server's response, whatever its
/// status.  Only transport-level failures are errors here.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn post_offer(
        &self,
        request: &SignalingRequest,
        sdp: &str,
    ) -> Result<SignalingResponse, NegotiationError>;
}

// ---------------------------------------------------------------------------
// HttpSignaling
// ---------------------------------------------------------------------------

pub struct HttpSignaling {
    client: reqwest::Client,
}

impl HttpSignaling {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client with the per-request timeout from `config.timeout_secs`.
    pub fn from_config(config: &SignalingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self::new(client)
    }
}

impl From<reqwest::Error> for NegotiationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NegotiationError::Request("signaling request timed out".into())
        } else {
            NegotiationError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl SignalingClient for HttpSignaling {
    async fn post_offer(
        &self,
        request: &SignalingRequest,
        sdp: &str,
    ) -> Result<SignalingResponse, NegotiationError> {
        let mut req = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(sdp.to_owned());

        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                log::debug!("signaling: ignoring caller Content-Type {value:?}");
                continue;
            }
            req = req.header(name.as_str(), value.as_str());
        }

        let response = req.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        let body = String::from_utf8(bytes.to_vec()).map_err(|_| {
            NegotiationError::BadServerResponse {
                status,
                body: "<non UTF-8 body>".into(),
            }
        })?;

        log::debug!("signaling: POST {} → {status} ({} bytes)", request.url, body.len());
        Ok(SignalingResponse { status, body })
    }
}

// ---------------------------------------------------------------------------
// MockSignaling (test double)
// ---------------------------------------------------------------------------

/// Replies with a fixed response (or error) and records every offer.
#[cfg(test)]
pub struct MockSignaling {
    reply: Result<SignalingResponse, NegotiationError>,
    posted: std::sync::Mutex<Vec<(SignalingRequest, String)>>,
}

#[cfg(test)]
impl MockSignaling {
    pub const ANSWER_SDP: &'static str = "v=0\r\no=- 2 2 IN IP4 10.0.0.1\r\ns=-\r\n";

    pub fn responding(status: u16, body: &str) -> Self {
        Self {
            reply: Ok(SignalingResponse {
                status,
                body: body.to_owned(),
            }),
            posted: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// `201 Created` with [`ANSWER_SDP`](Self::ANSWER_SDP).
    pub fn created() -> Self {
        Self::responding(201, Self::ANSWER_SDP)
    }

    pub fn failing(error: NegotiationError) -> Self {
        Self {
            reply: Err(error),
            posted: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn posted(&self) -> Vec<(SignalingRequest, String)> {
        self.posted.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl SignalingClient for MockSignaling {
    async fn post_offer(
        &self,
        request: &SignalingRequest,
        sdp: &str,
    ) -> Result<SignalingResponse, NegotiationError> {
        self.posted
            .lock()
            .unwrap()
            .push((request.clone(), sdp.to_owned()));
        self.reply.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accept one connection, answer with `response` and hand back the raw
    /// request (head and body).
    async fn serve_once(response: Vec<u8>) -> (String, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];

            let head_end = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before end of headers");
                request.extend_from_slice(&chunk[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&request[..head_end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            while request.len() < head_end + length {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before end of body");
                request.extend_from_slice(&chunk[..n]);
            }

            stream.write_all(&response).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });

        (format!("http://{addr}/realtime?model=m"), handle)
    }

    fn http_response(status: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/sdp\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn client() -> HttpSignaling {
        HttpSignaling::new(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    fn split_request(raw: &[u8]) -> (String, String) {
        let text = String::from_utf8(raw.to_vec()).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        (head.to_ascii_lowercase(), body.to_string())
    }

    #[tokio::test]
    async fn http_posts_sdp_with_caller_headers() {
        let answer = "v=0\r\no=- 2 2 IN IP4 10.0.0.1\r\n";
        let (url, server) = serve_once(http_response("201 Created", answer.as_bytes())).await;
        let request = SignalingRequest::new(url).with_header("Authorization", "Bearer ek_42");

        let response = client().post_offer(&request, "v=0\r\noffer\r\n").await.unwrap();
        assert_eq!(
            response,
            SignalingResponse {
                status: 201,
                body: answer.to_string()
            }
        );

        let (head, body) = split_request(&server.await.unwrap());
        assert!(head.starts_with("post /realtime?model=m http/1.1\r\n"), "{head}");
        assert!(head.lines().any(|l| l == "content-type: application/sdp"), "{head}");
        assert!(head.contains("\r\nauthorization: bearer ek_42"), "{head}");
        assert_eq!(body, "v=0\r\noffer\r\n");
    }

    #[tokio::test]
    async fn http_returns_rejections_unmodified() {
        let (url, server) = serve_once(http_response("401 Unauthorized", b"bad key")).await;

        let response = client()
            .post_offer(&SignalingRequest::new(url), "offer")
            .await
            .unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(response.body, "bad key");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn http_non_utf8_body_is_bad_response() {
        let (url, server) = serve_once(http_response("201 Created", &[0xff, 0xfe, 0x00, 0x80])).await;

        let err = client()
            .post_offer(&SignalingRequest::new(url), "offer")
            .await
            .unwrap_err();
        assert!(
            matches!(err, NegotiationError::BadServerResponse { status: 201, .. }),
            "{err:?}"
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn http_caller_content_type_is_not_duplicated() {
        let (url, server) = serve_once(http_response("201 Created", b"v=0")).await;
        let request = SignalingRequest::new(url)
            .with_header("content-type", "text/plain")
            .with_header("X-Trace", "t1");

        client().post_offer(&request, "offer").await.unwrap();

        let (head, _) = split_request(&server.await.unwrap());
        let content_types: Vec<&str> = head
            .lines()
            .filter(|l| l.starts_with("content-type:"))
            .collect();
        assert_eq!(content_types, vec!["content-type: application/sdp"]);
        assert!(head.contains("\r\nx-trace: t1"), "{head}");
    }

    #[tokio::test]
    async fn http_unreachable_endpoint_is_request_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client()
            .post_offer(&SignalingRequest::new(format!("http://{addr}/realtime")), "offer")
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Request(_)), "{err:?}");
    }

    #[test]
    fn from_config_appends_model_and_bearer() {
        let config = SignalingConfig {
            api_key: Some("ek_123".into()),
            ..SignalingConfig::default()
        };
        let req = SignalingRequest::from_config(&config);

        assert_eq!(
            req.url,
            "https://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(
            req.headers,
            vec![("Authorization".to_string(), "Bearer ek_123".to_string())]
        );
    }

    #[test]
    fn from_config_without_key_has_no_headers() {
        let config = SignalingConfig {
            api_key: Some(String::new()),
            ..SignalingConfig::default()
        };
        assert!(SignalingRequest::from_config(&config).headers.is_empty());
    }

    #[test]
    fn from_config_respects_existing_query() {
        let config = SignalingConfig {
            base_url: "http://localhost:8080/rt?debug=1".into(),
            model: "m".into(),
            ..SignalingConfig::default()
        };
        assert_eq!(
            SignalingRequest::from_config(&config).url,
            "http://localhost:8080/rt?debug=1&model=m"
        );
    }

    #[tokio::test]
    async fn mock_records_offers() {
        let mock = MockSignaling::created();
        let req = SignalingRequest::new("http://x").with_header("X-Test", "1");
        let resp = mock.post_offer(&req, "offer").await.unwrap();

        assert_eq!(resp.status, 201);
        assert_eq!(mock.posted(), vec![(req, "offer".to_string())]);
    }
}
