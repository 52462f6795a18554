use serde::{Deserialize, Serialize};

/// A message in a model conversation, containing a role and text content.
///
/// Messages are the payload of every model invocation made by workflow
/// nodes: system instructions, assembled context, and the node's request
/// all travel as messages.
///
/// # Examples
///
/// ```
/// use taskloom::message::Message;
///
/// let user_msg = Message::user("Summarize the open tasks.");
/// let system_msg = Message::system("You are a project analyst.");
/// assert!(user_msg.has_role(Message::USER));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    ///
    /// Use the constants on [`Message`] for standardized values.
    pub role: String,
    /// The text content of the message.
    pub content: String,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    /// Creates a user message with the specified content.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message with the specified content.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message with the specified content.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::user("a").role, Message::USER);
        assert_eq!(Message::assistant("b").role, Message::ASSISTANT);
        assert_eq!(Message::system("c").role, Message::SYSTEM);
    }

    #[test]
    fn serde_round_trip() {
        let msg = Message::user("round trip");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, parsed);
    }
}
