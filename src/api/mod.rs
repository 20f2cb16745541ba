use serde::{Deserialize, Serialize};

/// One entry in the `messages` array sent to the chat-completions endpoint.
#[derive(Serialize, Clone, Debug)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// Incremental frame payload in a streamed response.
#[derive(Deserialize)]
pub struct StreamDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct StreamChoice {
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct StreamResponse {
    pub choices: Vec<StreamChoice>,
}

/// Unary (non-streamed) response envelope.
#[derive(Deserialize)]
pub struct UnaryMessage {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct UnaryChoice {
    pub message: UnaryMessage,
}

#[derive(Deserialize)]
pub struct UnaryResponse {
    pub choices: Vec<UnaryChoice>,
}
