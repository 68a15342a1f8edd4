//! Tab-feed wire types: JSON frames exchanged with a tab's on-page UI.
//!
//! Shapes are a closed set of tagged variants; only the backend answer delta
//! is carried as opaque JSON, passed through unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound frame from a tab UI: a meta command or a question.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    /// `{ "type": "meta", "action": "login" | "set-active", "active"? }`
    Meta(MetaCommand),
    /// `{ "question": "..." }`
    Question(Question),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaCommand {
    pub action: MetaAction,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Question {
    pub question: String,
}

/// Outbound frame to a tab UI. Also the element type of a tab's retained
/// history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Feed(FeedMessage),
    /// In-band failure, shown inline in the feed: `{ "error": "..." }`.
    Error(ErrorMessage),
    /// Backend answer delta passed through unchanged. Carries `message.id`
    /// and `message.content.parts`.
    Answer(Value),
}

/// Feed message with a `type` discriminant on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedMessage {
    Meta(MetaEvent),
    User {
        message: MessageBody,
    },
    Status {
        status: AnswerStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<MessageBody>,
    },
}

/// Meta frame payload: a UI action or an authentication status signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaEvent {
    Action {
        action: MetaAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active: Option<bool>,
    },
    Auth {
        status: AuthStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetaAction {
    Login,
    SetActive,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Authorized,
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerStatus {
    Thinking,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub id: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
}

impl Outbound {
    pub fn set_active(active: bool) -> Self {
        Outbound::Feed(FeedMessage::Meta(MetaEvent::Action {
            action: MetaAction::SetActive,
            active: Some(active),
        }))
    }

    pub fn toggle() -> Self {
        Outbound::Feed(FeedMessage::Meta(MetaEvent::Action {
            action: MetaAction::Toggle,
            active: None,
        }))
    }

    pub fn auth(status: AuthStatus) -> Self {
        Outbound::Feed(FeedMessage::Meta(MetaEvent::Auth { status }))
    }

    /// Echo of the user's question back into the feed.
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Outbound::Feed(FeedMessage::User {
            message: MessageBody {
                id: id.into(),
                content: MessageContent {
                    parts: vec![text.into()],
                },
            },
        })
    }

    /// Provisional placeholder shown while the answer streams in.
    pub fn thinking(id: impl Into<String>) -> Self {
        Outbound::Feed(FeedMessage::Status {
            status: AnswerStatus::Thinking,
            message: Some(MessageBody {
                id: id.into(),
                content: MessageContent {
                    parts: vec!["...".to_string()],
                },
            }),
        })
    }

    pub fn done() -> Self {
        Outbound::Feed(FeedMessage::Status {
            status: AnswerStatus::Done,
            message: None,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Error(ErrorMessage {
            error: message.into(),
        })
    }

    pub fn answer(value: Value) -> Self {
        Outbound::Answer(value)
    }

    /// Stable identity used by the history merge rule, when the frame has one.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Outbound::Feed(FeedMessage::User { message }) => Some(&message.id),
            Outbound::Feed(FeedMessage::Status { message, .. }) => {
                message.as_ref().map(|m| m.id.as_str())
            }
            Outbound::Answer(value) => value
                .get("message")
                .and_then(|m| m.get("id"))
                .and_then(Value::as_str),
            _ => None,
        }
    }

    /// True for the provisional placeholder entry.
    pub fn is_thinking(&self) -> bool {
        matches!(
            self,
            Outbound::Feed(FeedMessage::Status {
                status: AnswerStatus::Thinking,
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_question() {
        let inbound: Inbound = serde_json::from_str(r#"{"question":"hi"}"#).unwrap();
        match inbound {
            Inbound::Question(q) => assert_eq!(q.question, "hi"),
            _ => panic!("expected question"),
        }
    }

    #[test]
    fn inbound_meta_login() {
        let inbound: Inbound =
            serde_json::from_str(r#"{"type":"meta","action":"login"}"#).unwrap();
        match inbound {
            Inbound::Meta(cmd) => {
                assert_eq!(cmd.action, MetaAction::Login);
                assert_eq!(cmd.active, None);
            }
            _ => panic!("expected meta"),
        }
    }

    #[test]
    fn inbound_meta_set_active() {
        let inbound: Inbound =
            serde_json::from_str(r#"{"type":"meta","action":"set-active","active":true}"#).unwrap();
        match inbound {
            Inbound::Meta(cmd) => {
                assert_eq!(cmd.action, MetaAction::SetActive);
                assert_eq!(cmd.active, Some(true));
            }
            _ => panic!("expected meta"),
        }
    }

    #[test]
    fn set_active_wire_shape() {
        let value = serde_json::to_value(Outbound::set_active(false)).unwrap();
        assert_eq!(
            value,
            json!({"type":"meta","action":"set-active","active":false})
        );
    }

    #[test]
    fn auth_status_wire_shape() {
        let value = serde_json::to_value(Outbound::auth(AuthStatus::Unauthorized)).unwrap();
        assert_eq!(value, json!({"type":"meta","status":"unauthorized"}));
    }

    #[test]
    fn user_echo_wire_shape() {
        let value = serde_json::to_value(Outbound::user("id-1", "hello")).unwrap();
        assert_eq!(
            value,
            json!({"type":"user","message":{"id":"id-1","content":{"parts":["hello"]}}})
        );
    }

    #[test]
    fn thinking_and_done_wire_shapes() {
        let thinking = serde_json::to_value(Outbound::thinking("id-2")).unwrap();
        assert_eq!(thinking["type"], "status");
        assert_eq!(thinking["status"], "thinking");
        assert_eq!(thinking["message"]["id"], "id-2");

        let done = serde_json::to_value(Outbound::done()).unwrap();
        assert_eq!(done, json!({"type":"status","status":"done"}));
    }

    #[test]
    fn outbound_roundtrip_through_wire() {
        for out in [
            Outbound::set_active(true),
            Outbound::toggle(),
            Outbound::auth(AuthStatus::Authorized),
            Outbound::user("a", "b"),
            Outbound::thinking("c"),
            Outbound::done(),
            Outbound::error("boom"),
        ] {
            let text = serde_json::to_string(&out).unwrap();
            let back: Outbound = serde_json::from_str(&text).unwrap();
            assert_eq!(back, out);
        }
    }

    #[test]
    fn message_id_from_answer_passthrough() {
        let out = Outbound::answer(json!({
            "message": {"id": "m-9", "content": {"parts": ["partial"]}},
            "conversation_id": "c-1"
        }));
        assert_eq!(out.message_id(), Some("m-9"));
        assert!(!out.is_thinking());
    }

    #[test]
    fn thinking_has_identity_and_flag() {
        let out = Outbound::thinking("m-1");
        assert_eq!(out.message_id(), Some("m-1"));
        assert!(out.is_thinking());
        assert!(!Outbound::done().is_thinking());
        assert_eq!(Outbound::error("x").message_id(), None);
    }
}
