//! Client for user-declared OpenAI-compatible custom providers. Requests
//! and responses are OpenAI-shaped on both sides of this client, so unlike
//! [`crate::upstream::anthropic_client`] no protocol translation happens
//! here — only dispatch.

use crate::models::ProviderRouting;
use crate::upstream::{synthetic_error_event, DispatchError, UnaryOutcome};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

pub struct CustomClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    idle_timeout: Duration,
    unary_timeout: Duration,
    streaming_timeout: Duration,
}

impl CustomClient {
    pub fn new(provider: &ProviderRouting) -> Self {
        let timeouts = &crate::config::config().timeouts;
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect())
            .build()
            .expect("reqwest client with connect timeout always builds");
        Self {
            http,
            endpoint: chat_completions_endpoint(&provider.base_url),
            api_key: provider.api_key.clone(),
            idle_timeout: timeouts.idle(),
            unary_timeout: timeouts.total_non_streaming(),
            streaming_timeout: timeouts.total_streaming(),
        }
    }

    #[cfg(test)]
    fn with_endpoint(endpoint: String, api_key: String, idle_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
            idle_timeout,
            unary_timeout: Duration::from_secs(300),
            streaming_timeout: Duration::from_secs(3600),
        }
    }

    fn headers(&self, accept: &str) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", self.api_key).parse().unwrap(),
        );
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(reqwest::header::ACCEPT, accept.parse().unwrap());
        headers
    }

    pub async fn send_unary(&self, body: serde_json::Value) -> Result<UnaryOutcome, DispatchError> {
        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers("application/json"))
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

    pub async fn send_streaming(
        &self,
        mut body: serde_json::Value,
    ) -> Result<Pin<Box<dyn Stream<Item = String> + Send>>, DispatchError> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".into(), serde_json::json!(true));
        }
        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers("text/event-stream"))
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
                    Ok(Some(Ok(chunk))) => yield String::from_utf8_lossy(&chunk).into_owned(),
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

fn chat_completions_endpoint(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{}/chat/completions", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_auto_appends_chat_completions_path() {
        assert_eq!(
            chat_completions_endpoint("https://api.example.com/v1"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn endpoint_left_unchanged_when_already_present() {
        assert_eq!(
            chat_completions_endpoint("https://api.example.com/v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn endpoint_trims_trailing_slash_before_appending() {
        assert_eq!(
            chat_completions_endpoint("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    async fn mock_http_server(status: u16, body: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
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
                "HTTP/1.1 {} status\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            writer.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn successful_unary_response_passes_through() {
        let body = serde_json::json!({"id": "chatcmpl-x"}).to_string();
        let base = mock_http_server(200, body).await;
        let client = CustomClient::with_endpoint(format!("{}/chat/completions", base), "key".into(), Duration::from_secs(5));
        let outcome = client.send_unary(serde_json::json!({"model": "x"})).await.unwrap();
        match outcome {
            UnaryOutcome::Success(v) => assert_eq!(v["id"], "chatcmpl-x"),
            UnaryOutcome::UpstreamError { .. } => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn non_2xx_unary_response_is_returned_verbatim() {
        let base = mock_http_server(401, "{\"error\":\"bad key\"}".into()).await;
        let client = CustomClient::with_endpoint(format!("{}/chat/completions", base), "key".into(), Duration::from_secs(5));
        let outcome = client.send_unary(serde_json::json!({"model": "x"})).await.unwrap();
        match outcome {
            UnaryOutcome::UpstreamError { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            UnaryOutcome::Success(_) => panic!("expected upstream error"),
        }
    }
}
