//! Client for Anthropic's hosted Messages endpoint, authenticated with a
//! borrowed OAuth token rather than an API key.
//!
//! The header set (fixed API version, capability-opt-in beta flags, and a
//! fingerprint mimicking a first-party CLI) is what lets a consumer OAuth
//! grant authorize programmatic Messages calls at all.

use crate::auth::OAuthManager;
use crate::upstream::{synthetic_error_event, DispatchError, UnaryOutcome};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = "claude-cli/1.0.56 (external, cli)";
const APP_FINGERPRINT: &str = "cli";

pub struct AnthropicClient {
    http: reqwest::Client,
    oauth: Arc<OAuthManager>,
    messages_url: String,
    idle_timeout: Duration,
    unary_timeout: Duration,
    streaming_timeout: Duration,
}

impl AnthropicClient {
    pub fn new(oauth: Arc<OAuthManager>) -> Self {
        let timeouts = &crate::config::config().timeouts;
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect())
            .build()
            .expect("reqwest client with connect timeout always builds");
        Self {
            http,
            oauth,
            messages_url: DEFAULT_MESSAGES_URL.to_string(),
            idle_timeout: timeouts.idle(),
            unary_timeout: timeouts.total_non_streaming(),
            streaming_timeout: timeouts.total_streaming(),
        }
    }

    #[cfg(test)]
    fn with_url(oauth: Arc<OAuthManager>, messages_url: String, idle_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            oauth,
            messages_url,
            idle_timeout,
            unary_timeout: Duration::from_secs(300),
            streaming_timeout: Duration::from_secs(3600),
        }
    }

    async fn headers(
        &self,
        beta_flags: &[String],
    ) -> Result<reqwest::header::HeaderMap, DispatchError> {
        let token = self
            .oauth
            .obtain_valid_token()
            .await
            .map_err(DispatchError::Auth)?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", token)
                .parse()
                .map_err(|_| DispatchError::Transport("invalid bearer token".into()))?,
        );
        headers.insert("anthropic-version", ANTHROPIC_VERSION.parse().unwrap());
        headers.insert("anthropic-beta", beta_flags.join(",").parse().unwrap());
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(reqwest::header::USER_AGENT, USER_AGENT.parse().unwrap());
        headers.insert("x-app", APP_FINGERPRINT.parse().unwrap());
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "en-US,en;q=0.9".parse().unwrap(),
        );
        Ok(headers)
    }

    pub async fn send_unary(
        &self,
        body: serde_json::Value,
        beta_flags: &[String],
    ) -> Result<UnaryOutcome, DispatchError> {
        let headers = self.headers(beta_flags).await?;
        let response = self
            .http
            .post(&self.messages_url)
            .headers(headers)
            .timeout(self.unary_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let value = response
                .json()
                .await
                .map_err(|e| DispatchError::Transport(e.to_string()))?;
            Ok(UnaryOutcome::Success(value))
        } else {
            let body = response.text().await.unwrap_or_default();
            Ok(UnaryOutcome::UpstreamError {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Returns a stream of raw SSE text chunks, ready to feed an
    /// [`crate::sse::SseDecoder`]. Non-2xx and stream-time failures are both
    /// folded into a single synthetic `event: error` chunk rather than
    /// surfaced as an `Err`, since by the time a caller wants to stream
    /// downstream the HTTP response has usually already committed to
    /// `text/event-stream`.
    pub async fn send_streaming(
        &self,
        mut body: serde_json::Value,
        beta_flags: &[String],
    ) -> Result<Pin<Box<dyn Stream<Item = String> + Send>>, DispatchError> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".into(), serde_json::json!(true));
        }
        let headers = self.headers(beta_flags).await?;
        let response = self
            .http
            .post(&self.messages_url)
            .headers(headers)
            .timeout(self.streaming_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let synthetic = format!("event: error\ndata: {}\n\n", text);
            return Ok(Box::pin(futures::stream::once(async move { synthetic })));
        }

        let idle_timeout = self.idle_timeout;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            loop {
                match tokio::time::timeout(idle_timeout, bytes.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        yield String::from_utf8_lossy(&chunk).into_owned();
                    }
                    Ok(Some(Err(e))) => {
                        yield synthetic_error_event("protocol_error", &e.to_string());
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield synthetic_error_event(
                            "timeout",
                            "no data received from upstream within the idle window",
                        );
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TokenStore;

    async fn authorized_client(messages_url: String, idle: Duration) -> AnthropicClient {
        let store = TokenStore::load();
        store
            .replace(crate::storage::TokenRecord {
                access_token: "test-token".into(),
                refresh_token: None,
                expires_at_ms: chrono::Utc::now().timestamp_millis() + 60_000,
                token_type: crate::storage::TokenType::Ephemeral,
            })
            .await
            .unwrap();
        let oauth = Arc::new(OAuthManager::new(store));
        AnthropicClient::with_url(oauth, messages_url, idle)
    }

    async fn mock_http_server(status: u16, content_type: &str, body: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let content_type = content_type.to_string();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt, AsyncBufReadExt, BufReader};
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).await.unwrap();
                if header.trim().is_empty() {
                    break;
                }
                if let Some((k, v)) = header.split_once(':') {
                    if k.trim().eq_ignore_ascii_case("content-length") {
                        content_length = v.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut discard = vec![0u8; content_length];
            if content_length > 0 {
                reader.read_exact(&mut discard).await.unwrap();
            }
            let response = format!(
                "HTTP/1.1 {} status\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
                status,
                content_type,
                body.len(),
                body
            );
            writer.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}/v1/messages", addr)
    }

    #[tokio::test]
    async fn successful_unary_response_is_parsed() {
        let body = serde_json::json!({"id": "msg_1", "type": "message"}).to_string();
        let url = mock_http_server(200, "application/json", body).await;
        let client = authorized_client(url, Duration::from_secs(5)).await;

        let outcome = client
            .send_unary(serde_json::json!({"model": "x"}), &["oauth-2025-04-20".to_string()])
            .await
            .unwrap();
        match outcome {
            UnaryOutcome::Success(v) => assert_eq!(v["id"], "msg_1"),
            UnaryOutcome::UpstreamError { .. } => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn non_2xx_unary_response_is_returned_verbatim() {
        let url = mock_http_server(429, "application/json", "{\"error\":\"rate limited\"}".into()).await;
        let client = authorized_client(url, Duration::from_secs(5)).await;

        let outcome = client
            .send_unary(serde_json::json!({"model": "x"}), &[])
            .await
            .unwrap();
        match outcome {
            UnaryOutcome::UpstreamError { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("rate limited"));
            }
            UnaryOutcome::Success(_) => panic!("expected upstream error"),
        }
    }

    #[tokio::test]
    async fn non_2xx_streaming_response_yields_single_synthetic_error_chunk() {
        let url = mock_http_server(500, "application/json", "boom".into()).await;
        let client = authorized_client(url, Duration::from_secs(5)).await;

        let mut stream = client
            .send_streaming(serde_json::json!({"model": "x"}), &[])
            .await
            .unwrap();
        let chunk = stream.next().await.unwrap();
        assert!(chunk.starts_with("event: error"));
        assert!(chunk.contains("boom"));
        assert!(stream.next().await.is_none());
    }
}
