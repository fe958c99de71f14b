#![deny(unsafe_code)]

//! Chat sessions, reply streaming state and the signed-in user.

pub mod auth;
mod error;
pub mod manager;
pub mod message;
pub mod store;
pub mod stream_state;
mod title;

pub use auth::{
    AuthBackend, AuthFuture, AuthGrant, AuthSession, CURRENT_USER_KEY, Credentials,
    HttpAuthBackend, User,
};
pub use error::{AuthError, AuthResult, ChatError, ChatResult};
pub use manager::{PendingReply, REPLY_FAILED_TEXT, SessionManager};
pub use message::{Message, MessageId, Role, Session, SessionId};
pub use store::{ChatHistory, ChatStore, HISTORY_KEY_PREFIX, history_key};
pub use stream_state::{
    StreamOutcome, StreamState, StreamTarget, StreamTransition, StreamTransitionRejection,
    StreamTransitionResult,
};
pub use title::{FALLBACK_TITLE, derive_title};
