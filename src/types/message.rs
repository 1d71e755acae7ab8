//! Message types
//!
//! Defines chat message structures and roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a message sender
///
/// Roles outside the common four are passed to the chat template unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// System prompt
    System,
    /// Message from the user
    User,
    /// Message from the AI assistant
    Assistant,
    /// Output of a tool call fed back to the model
    Tool,
    /// Template-specific role, e.g. "ipython" or "developer"
    Other(String),
}

impl Role {
    /// Role name as chat templates expect it
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Other(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        match name.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::Other(name),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat turn
///
/// Extra keys such as `name` are accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender
    pub role: Role,
    /// The content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = ChatMessage::user("Hello, world!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, world!");
    }

    #[test]
    fn test_role_wire_names() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"ok"}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(
            serde_json::to_string(&ChatMessage::system("be brief")).unwrap(),
            r#"{"role":"system","content":"be brief"}"#
        );
    }

    #[test]
    fn test_template_specific_role_passes_through() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"ipython","content":"42"}"#).unwrap();
        assert_eq!(msg.role, Role::Other("ipython".to_string()));
        assert_eq!(msg.role.as_str(), "ipython");
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"role":"ipython","content":"42"}"#
        );
    }

    #[test]
    fn test_extra_message_keys_ignored() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"user","content":"Hi","name":"alice"}"#).unwrap();
        assert_eq!(msg, ChatMessage::user("Hi"));
    }

    #[test]
    fn test_missing_content_rejected() {
        let parsed: Result<ChatMessage, _> = serde_json::from_str(r#"{"role":"user"}"#);
        assert!(parsed.is_err());
    }
}
