//! Conversational backend client: access-token acquisition and the streamed
//! conversation request.
//!
//! The session endpoint yields a short-lived bearer token which is cached for
//! ten minutes; the conversation endpoint answers with a server-sent-event
//! stream of answer deltas closed by a `[DONE]` sentinel.

use crate::cache::{Cache, KEY_ACCESS_TOKEN, KEY_CONVERSATION_ID};
use crate::sse::SseParser;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Terminal sentinel closing an answer stream.
const DONE_SENTINEL: &str = "[DONE]";

/// Answer events buffered between the drive task and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No usable credential: the session probe yielded no token, or the
    /// backend rejected the bearer token.
    #[error("unauthorized")]
    Unauthorized,
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend api error: {0}")]
    Api(String),
}

/// One decoded fragment of a streamed answer.
#[derive(Debug, Clone)]
pub enum AnswerEvent {
    /// Parsed backend payload describing an answer delta.
    Delta(serde_json::Value),
    /// The stream finished normally.
    Done,
    /// A payload failed to decode, or the byte source broke mid-stream.
    /// Delivered in-band; the request as a whole is not failed.
    Error(String),
}

/// Client for the conversational backend.
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    cache: Arc<Cache<String>>,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, cache: Arc<Cache<String>>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            model: model.into(),
            client: reqwest::Client::new(),
            cache,
        }
    }

    /// Login page for the backend (an opaque navigation target).
    pub fn login_url(&self) -> String {
        format!("{}/auth/login", self.base_url)
    }

    /// Resolve the access token: cached value, or a fresh fetch from the
    /// session endpoint. Any failure to obtain a token is `Unauthorized`.
    pub async fn access_token(&self) -> Result<String, BackendError> {
        if let Some(token) = self.cache.get(KEY_ACCESS_TOKEN).await {
            return Ok(token);
        }
        let url = format!("{}/api/auth/session", self.base_url);
        let info: Option<SessionInfo> = match self.client.get(&url).send().await {
            Ok(res) => res.json().await.ok(),
            Err(e) => {
                log::debug!("session probe failed: {}", e);
                None
            }
        };
        let token = info
            .and_then(|i| i.access_token)
            .filter(|t| !t.is_empty())
            .ok_or(BackendError::Unauthorized)?;
        self.cache
            .set(KEY_ACCESS_TOKEN, token.clone(), None)
            .await;
        Ok(token)
    }

    /// Ask one question. Resolves the token, issues the streamed conversation
    /// request, and returns the sequence of answer events.
    ///
    /// Only failures before the stream starts (no token, request not
    /// accepted) are returned as errors; everything after travels in-band as
    /// [`AnswerEvent`]s.
    pub async fn stream_answer(
        &self,
        message_id: &str,
        question: &str,
    ) -> Result<mpsc::Receiver<AnswerEvent>, BackendError> {
        let access_token = self.access_token().await?;
        // conversation continuity rides the cache: absent means a new thread
        let parent_message_id = match self.cache.get(KEY_CONVERSATION_ID).await {
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        let body = ConversationRequest {
            action: "next",
            messages: vec![ConversationMessage {
                id: message_id.to_string(),
                role: "user",
                content: ConversationContent {
                    content_type: "text",
                    parts: vec![question.to_string()],
                },
            }],
            model: self.model.clone(),
            parent_message_id,
        };
        let url = format!("{}/backend-api/conversation", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&access_token)
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(drive_stream(res, tx));
        Ok(rx)
    }
}

/// Read the response body, decode SSE frames, and forward answer events until
/// the `[DONE]` sentinel, source exhaustion, or a read failure.
async fn drive_stream(res: reqwest::Response, tx: mpsc::Sender<AnswerEvent>) {
    let mut stream = res.bytes_stream();
    let mut parser = SseParser::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                log::warn!("answer stream read failed: {}", e);
                let _ = tx.send(AnswerEvent::Error(e.to_string())).await;
                return;
            }
        };
        for event in parser.feed(&chunk) {
            if event.data == DONE_SENTINEL {
                let _ = tx.send(AnswerEvent::Done).await;
                return;
            }
            let answer = match serde_json::from_str(&event.data) {
                Ok(value) => AnswerEvent::Delta(value),
                Err(e) => {
                    log::error!("undecodable answer payload: {} ({})", e, event.data);
                    AnswerEvent::Error(e.to_string())
                }
            };
            if tx.send(answer).await.is_err() {
                // receiver gone, stop reading
                return;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConversationRequest {
    action: &'static str,
    messages: Vec<ConversationMessage>,
    model: String,
    parent_message_id: String,
}

#[derive(Debug, Serialize)]
struct ConversationMessage {
    id: String,
    role: &'static str,
    content: ConversationContent,
}

#[derive(Debug, Serialize)]
struct ConversationContent {
    content_type: &'static str,
    parts: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_request_wire_shape() {
        let body = ConversationRequest {
            action: "next",
            messages: vec![ConversationMessage {
                id: "msg-1".to_string(),
                role: "user",
                content: ConversationContent {
                    content_type: "text",
                    parts: vec!["hello".to_string()],
                },
            }],
            model: "text-davinci-002-render".to_string(),
            parent_message_id: "parent-1".to_string(),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["action"], "next");
        assert_eq!(value["messages"][0]["id"], "msg-1");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"]["content_type"], "text");
        assert_eq!(value["messages"][0]["content"]["parts"][0], "hello");
        assert_eq!(value["parent_message_id"], "parent-1");
    }

    #[test]
    fn session_info_tolerates_missing_token() {
        let info: SessionInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(info.access_token, None);
        let info: SessionInfo =
            serde_json::from_str(r#"{"accessToken":"tok","user":{"id":"u"}}"#).unwrap();
        assert_eq!(info.access_token.as_deref(), Some("tok"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let cache = Arc::new(Cache::default());
        let client = ChatClient::new("https://host.example/", "m", cache);
        assert_eq!(client.login_url(), "https://host.example/auth/login");
    }
}
