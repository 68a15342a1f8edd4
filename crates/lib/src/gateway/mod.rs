//! Gateway: HTTP + WebSocket control plane for tab UIs.
//!
//! Single port serves HTTP and WebSocket. Each tab's on-page UI holds one
//! socket; the host's action trigger and health probe use plain HTTP.

mod protocol;
mod server;

pub use protocol::{
    AnswerStatus, AuthStatus, ErrorMessage, FeedMessage, Inbound, MessageBody, MessageContent,
    MetaAction, MetaCommand, MetaEvent, Outbound, Question,
};
pub use server::{run_gateway, RouterState};
