use std::fmt;

use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const RANDOM_SUFFIX_LEN: usize = 9;

/// Stable identifier for one chat session, rendered as `chat-<millis>-<random>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(format!("chat-{}-{}", unix_millis(), random_suffix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role-prefixed message identifier, e.g. `user-<millis>-<random>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate(role: Role) -> Self {
        Self(format!(
            "{}-{}-{}",
            role.as_str(),
            unix_millis(),
            random_suffix()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(role),
            role,
            text: text.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Empty assistant reply that is overwritten in place while streaming.
    pub fn assistant_placeholder() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Local wall-clock `HH:MM`, or `None` when the stored timestamp does not parse.
    pub fn local_time_label(&self) -> Option<String> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|timestamp| timestamp.with_timezone(&Local).format("%H:%M").to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            title: String::new(),
            messages: Vec::new(),
        }
    }

    /// Sidebar visibility: titled and holding at least one message.
    pub fn is_visible(&self) -> bool {
        !self.title.is_empty() && !self.messages.is_empty()
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| &message.id == id)
    }
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn random_suffix() -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(RANDOM_SUFFIX_LEN);
    suffix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_follow_the_stored_shape() {
        let session_id = SessionId::generate();
        let parts = session_id.as_str().splitn(3, '-').collect::<Vec<_>>();
        assert_eq!(parts[0], "chat");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), RANDOM_SUFFIX_LEN);

        assert!(MessageId::generate(Role::User).as_str().starts_with("user-"));
        assert!(
            MessageId::generate(Role::Assistant)
                .as_str()
                .starts_with("assistant-")
        );
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn role_is_stored_under_type() {
        let message = Message {
            id: MessageId::new("user-1"),
            role: Role::User,
            text: "hello".to_string(),
            timestamp: "2024-05-01T10:00:00.000Z".to_string(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "user-1",
                "type": "user",
                "text": "hello",
                "timestamp": "2024-05-01T10:00:00.000Z",
            })
        );
    }

    #[test]
    fn visibility_needs_title_and_messages() {
        let mut session = Session::new(SessionId::new("chat-1"));
        assert!(!session.is_visible());

        session.messages.push(Message::user("hi"));
        assert!(!session.is_visible());

        session.title = "hi".to_string();
        assert!(session.is_visible());
    }

    #[test]
    fn time_label_requires_parseable_timestamp() {
        let mut message = Message::user("hi");
        assert!(message.local_time_label().is_some());

        message.timestamp = "yesterday".to_string();
        assert_eq!(message.local_time_label(), None);
    }
}
