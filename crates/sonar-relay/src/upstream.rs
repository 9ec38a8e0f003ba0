//! Upstream Perplexity API client.
//!
//! One POST to `/chat/completions` per tool call. Responses are handled as
//! untyped JSON so new upstream fields never break the relay.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::Instrument;

const CORRELATION_HEADER: &str = "x-relay-request-id";

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream response missing message content")]
    MalformedResponse,
}

/// Parsed completion: the answer text plus any cited source URLs.
#[derive(Debug, Clone)]
pub struct CompletionReply {
    pub content: String,
    pub citations: Vec<String>,
}

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl UpstreamClient {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    /// Send one completion request and reshape the response.
    pub async fn complete(
        &self,
        model: &str,
        messages: Value,
        correlation_id: &str,
    ) -> Result<CompletionReply, UpstreamError> {
        let span = tracing::info_span!(
            "upstream_complete",
            correlation_id = %correlation_id,
            model = %model,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        );

        async {
            let url = format!("{}/chat/completions", self.base_url);
            let body = json!({ "model": model, "messages": messages });
            let start = Instant::now();

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .header("content-type", "application/json")
                .header(CORRELATION_HEADER, correlation_id)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let latency = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("latency_ms", latency);
            tracing::Span::current().record("status", status.as_u16());

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = status.as_u16(), latency_ms = latency, "Upstream error response");
                return Err(UpstreamError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let payload: Value = response.json().await?;
            tracing::info!(status = status.as_u16(), latency_ms = latency, "Upstream complete");
            parse_reply(&payload)
        }
        .instrument(span)
        .await
    }
}

fn parse_reply(payload: &Value) -> Result<CompletionReply, UpstreamError> {
    let content = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or(UpstreamError::MalformedResponse)?
        .to_string();

    let citations = payload
        .get("citations")
        .and_then(|c| c.as_array())
        .map(|urls| {
            urls.iter()
                .filter_map(|u| u.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(CompletionReply { content, citations })
}

/// Render the reply as tool-result text: the answer, then a numbered list of
/// citations when the upstream supplied any.
pub fn format_reply(reply: &CompletionReply) -> String {
    if reply.citations.is_empty() {
        return reply.content.clone();
    }
    let mut out = reply.content.clone();
    out.push_str("\n\nCitations:\n");
    for (i, url) in reply.citations.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n", i + 1, url));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_parsed_from_chat_completion_payload() {
        let payload = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Rust is a language." } }],
            "citations": ["https://rust-lang.org", "https://example.com"]
        });
        let reply = parse_reply(&payload).unwrap();
        assert_eq!(reply.content, "Rust is a language.");
        assert_eq!(reply.citations.len(), 2);
    }

    #[test]
    fn missing_content_is_malformed() {
        let payload = serde_json::json!({ "choices": [] });
        assert!(matches!(
            parse_reply(&payload),
            Err(UpstreamError::MalformedResponse)
        ));
    }

    #[test]
    fn formatted_reply_appends_numbered_citations() {
        let reply = CompletionReply {
            content: "Answer.".to_string(),
            citations: vec!["https://a.example".to_string(), "https://b.example".to_string()],
        };
        let text = format_reply(&reply);
        assert!(text.starts_with("Answer."));
        assert!(text.contains("[1] https://a.example"));
        assert!(text.contains("[2] https://b.example"));

        let bare = CompletionReply {
            content: "Answer.".to_string(),
            citations: vec![],
        };
        assert_eq!(format_reply(&bare), "Answer.");
    }
}
