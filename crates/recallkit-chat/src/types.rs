//! Conversation types.

use serde::{Deserialize, Serialize};

use recallkit_core::Result;
use recallkit_infer::TokenCounter;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One conversation message with its precomputed token count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tokens in `content` under the conversation's model. Not serialized
    /// to providers.
    #[serde(default, skip_serializing)]
    pub token_count: usize,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, token_count: usize) -> Self {
        Self {
            role,
            content: content.into(),
            token_count,
        }
    }

    /// Build a message whose token count comes from `counter` under `model`.
    pub fn counted(
        role: Role,
        content: impl Into<String>,
        counter: &dyn TokenCounter,
        model: &str,
    ) -> Result<Self> {
        let content = content.into();
        let token_count = counter.count_tokens(&content, model)?;
        Ok(Self {
            role,
            content,
            token_count,
        })
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recallkit_core::Error;

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count_tokens(&self, text: &str, model: &str) -> Result<usize> {
            if model != "words" {
                return Err(Error::UnsupportedModel(model.to_string()));
            }
            Ok(text.split_whitespace().count())
        }
    }

    #[test]
    fn test_counted() {
        let msg = Message::counted(Role::User, "three little words", &WordCounter, "words").unwrap();
        assert_eq!(msg.token_count, 3);
        assert_eq!(msg.role, Role::User);

        let err = Message::counted(Role::User, "hi", &WordCounter, "gpt-9").unwrap_err();
        assert!(matches!(err, Error::UnsupportedModel(_)));
    }

    #[test]
    fn test_serialized_shape() {
        let msg = Message::new(Role::Assistant, "hello", 1);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hello"}));

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.token_count, 0);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::System.to_string(), "system");
        assert!(Message::new(Role::System, "rules", 1).is_system());
    }
}
