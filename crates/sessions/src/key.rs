use std::fmt;

use {
    courier_common::Update,
    serde::{Deserialize, Serialize},
};

/// Stable identifier of a logical conversation.
///
/// Derived only from chat and user ids, never from message content, so it
/// stays the same for the lifetime of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `chat:<chat_id>`, shared by everyone in the chat.
    pub fn by_chat(update: &Update) -> Option<Self> {
        update.chat().map(|c| Self(format!("chat:{}", c.id)))
    }

    /// `user:<user_id>`, following the user across chats.
    pub fn by_sender(update: &Update) -> Option<Self> {
        update.sender().map(|u| Self(format!("user:{}", u.id)))
    }

    /// `chat:<chat_id>:user:<user_id>`, one session per user per chat.
    pub fn by_chat_and_sender(update: &Update) -> Option<Self> {
        let chat = update.chat()?;
        let user = update.sender()?;
        Some(Self(format!("chat:{}:user:{}", chat.id, user.id)))
    }

    /// Namespace the key, e.g. to keep two state types apart in one store.
    #[must_use]
    pub fn prefixed(self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self;
        }
        Self(format!("{prefix}:{}", self.0))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which identity a session is keyed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    #[default]
    Chat,
    Sender,
    ChatAndSender,
}

impl KeyScope {
    pub fn derive(self, update: &Update) -> Option<SessionKey> {
        match self {
            Self::Chat => SessionKey::by_chat(update),
            Self::Sender => SessionKey::by_sender(update),
            Self::ChatAndSender => SessionKey::by_chat_and_sender(update),
        }
    }
}
