use async_trait::async_trait;
use futures_util::StreamExt;
use memchr::memchr;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{ChatRequest, StreamResponse, UnaryResponse};
use crate::core::error::ChatError;
use crate::core::message::ConversationTurn;
use crate::utils::url::construct_api_url;

/// Growing partial text for the in-flight reply, tagged with the model that
/// produced it. The accumulated string is re-sent after every delta, not
/// only at well-formed boundaries.
#[derive(Clone, Debug)]
pub struct PartialUpdate {
    pub model: String,
    pub text: String,
}

pub type PartialSender = mpsc::UnboundedSender<PartialUpdate>;

/// Completed output of one model call.
#[derive(Clone, Debug)]
pub struct Completion {
    pub text: String,
    pub raw: serde_json::Value,
}

/// One chat-completion call against a remote provider. Streaming mode is
/// used whenever a partial-update channel is supplied. Implementations
/// never touch transcript state; that is strictly the caller's job.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    async fn invoke(
        &self,
        model: &str,
        new_user_text: &str,
        history: &[ConversationTurn],
        partials: Option<PartialSender>,
        cancel: CancellationToken,
    ) -> Result<Completion, ChatError>;
}

/// What one `data:` frame contributed to the stream.
#[derive(Debug, PartialEq, Eq)]
enum FrameEvent {
    Delta(String),
    Done,
    Skip,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn parse_frame(payload: &str) -> FrameEvent {
    if payload == "[DONE]" {
        return FrameEvent::Done;
    }
    match serde_json::from_str::<StreamResponse>(payload) {
        Ok(response) => match response.choices.first().and_then(|c| c.delta.content.clone()) {
            Some(content) => FrameEvent::Delta(content),
            None => FrameEvent::Skip,
        },
        // Malformed frames are dropped without surfacing an error.
        Err(_) => FrameEvent::Skip,
    }
}

/// Pulls a human-readable summary out of a provider error body, falling
/// back to the raw text.
fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<no body>".to_string();
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let summary = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("error").and_then(|v| v.as_str()))
            .or_else(|| value.get("message").and_then(|v| v.as_str()));
        if let Some(summary) = summary {
            let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
            if !collapsed.is_empty() {
                return collapsed;
            }
        }
    }
    trimmed.to_string()
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    referer: String,
    title: String,
}

impl ChatClient {
    pub fn new(base_url: String, api_key: String, referer: String, title: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            referer,
            title,
        }
    }

    async fn read_stream(
        &self,
        model: &str,
        response: reqwest::Response,
        partials: PartialSender,
        cancel: CancellationToken,
    ) -> Result<Completion, ChatError> {
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut running = String::new();
        let mut done = false;

        'read: loop {
            let chunk = tokio::select! {
                chunk = stream.next() => match chunk {
                    Some(chunk) => chunk,
                    None => break 'read,
                },
                _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            };
            let bytes = chunk.map_err(|e| ChatError::transport(e.to_string()))?;
            buffer.extend_from_slice(&bytes);

            // Frames split across network reads are reassembled at newline
            // boundaries before parsing.
            while let Some(newline_pos) = memchr(b'\n', &buffer) {
                let event = match std::str::from_utf8(&buffer[..newline_pos]) {
                    Ok(line) => extract_data_payload(line.trim())
                        .map(parse_frame)
                        .unwrap_or(FrameEvent::Skip),
                    Err(e) => {
                        tracing::debug!(model, "invalid UTF-8 in stream: {e}");
                        FrameEvent::Skip
                    }
                };
                buffer.drain(..=newline_pos);

                match event {
                    FrameEvent::Delta(content) => {
                        running.push_str(&content);
                        let _ = partials.send(PartialUpdate {
                            model: model.to_string(),
                            text: running.clone(),
                        });
                    }
                    FrameEvent::Done => {
                        done = true;
                        break 'read;
                    }
                    FrameEvent::Skip => {}
                }
            }
        }

        if !done {
            tracing::debug!(model, "stream ended without [DONE] sentinel");
        }

        // Mirror the unary envelope so callers see one response shape.
        let raw = json!({ "choices": [{ "message": { "content": running } }] });
        Ok(Completion { text: running, raw })
    }
}

#[async_trait]
impl ModelEndpoint for ChatClient {
    async fn invoke(
        &self,
        model: &str,
        new_user_text: &str,
        history: &[ConversationTurn],
        partials: Option<PartialSender>,
        cancel: CancellationToken,
    ) -> Result<Completion, ChatError> {
        let mut messages: Vec<_> = history.iter().map(ConversationTurn::to_chat_message).collect();
        messages.push(ConversationTurn::user(new_user_text).to_chat_message());

        let request = ChatRequest {
            model: model.to_string(),
            messages,
            stream: partials.is_some(),
        };

        let url = construct_api_url(&self.base_url, "chat/completions");
        let send = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", self.referer.as_str())
            .header("X-Title", self.title.as_str())
            .header("Content-Type", "application/json")
            .json(&request)
            .send();

        let response = tokio::select! {
            response = send => response.map_err(|e| ChatError::transport(e.to_string()))?,
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::transport(format!(
                "{status}: {}",
                summarize_error_body(&body)
            )));
        }

        match partials {
            Some(partials) => self.read_stream(model, response, partials, cancel).await,
            None => {
                let raw = tokio::select! {
                    raw = response.json::<serde_json::Value>() => {
                        raw.map_err(|e| ChatError::transport(e.to_string()))?
                    }
                    _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                };
                let parsed: UnaryResponse = serde_json::from_value(raw.clone())
                    .map_err(|e| ChatError::transport(format!("malformed response: {e}")))?;
                let text = parsed
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .unwrap_or_default();
                Ok(Completion { text, raw })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_payload_handles_spacing_variants() {
        assert_eq!(extract_data_payload("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(extract_data_payload("data:{\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(extract_data_payload(": keepalive"), None);
        assert_eq!(extract_data_payload(""), None);
    }

    #[test]
    fn frames_accumulate_deltas_until_done() {
        assert_eq!(
            parse_frame(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#),
            FrameEvent::Delta("Hel".to_string())
        );
        assert_eq!(
            parse_frame(r#"{"choices":[{"delta":{"content":"lo"}}]}"#),
            FrameEvent::Delta("lo".to_string())
        );
        assert_eq!(parse_frame("[DONE]"), FrameEvent::Done);
    }

    #[test]
    fn malformed_frames_are_skipped_silently() {
        assert_eq!(parse_frame(r#"{"choices":[{"delta":{"#), FrameEvent::Skip);
        assert_eq!(parse_frame("not json at all"), FrameEvent::Skip);
        assert_eq!(
            parse_frame(r#"{"choices":[{"delta":{"content":null}}]}"#),
            FrameEvent::Skip
        );
        assert_eq!(parse_frame(r#"{"choices":[]}"#), FrameEvent::Skip);
    }

    #[test]
    fn error_bodies_collapse_to_a_summary() {
        assert_eq!(
            summarize_error_body(r#"{"error":{"message":"model  overloaded"}}"#),
            "model overloaded"
        );
        assert_eq!(summarize_error_body(r#"{"error":"quota"}"#), "quota");
        assert_eq!(summarize_error_body("plain failure"), "plain failure");
        assert_eq!(summarize_error_body("  "), "<no body>");
    }
}
