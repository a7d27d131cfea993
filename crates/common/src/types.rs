//! Inbound update model.
//!
//! An [`Update`] is the immutable envelope the remote server assigns an
//! `update_id` to. Exactly one payload is populated; it is decoded into the
//! closed [`UpdateKind`] sum type so routing over variants is exhaustive.
//! Payloads this crate does not model are kept verbatim in
//! [`UpdateKind::Unknown`] instead of failing the decode.

use std::fmt;

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

// ── Update ──────────────────────────────────────────────────────────────────

/// One inbound event from the messaging server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUpdate", into = "RawUpdate")]
pub struct Update {
    pub update_id: i64,
    pub kind: UpdateKind,
}

/// The populated payload of an [`Update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Message(Message),
    EditedMessage(Message),
    ChannelPost(Message),
    EditedChannelPost(Message),
    CallbackQuery(CallbackQuery),
    InlineQuery(InlineQuery),
    ChosenInlineResult(ChosenInlineResult),
    MyChatMember(ChatMemberUpdated),
    ChatMember(ChatMemberUpdated),
    /// Any payload without a typed model (polls, reactions, payments, ...).
    Unknown(Value),
}

/// Field-less discriminant of [`UpdateKind`], used by variant filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKindTag {
    Message,
    EditedMessage,
    ChannelPost,
    EditedChannelPost,
    CallbackQuery,
    InlineQuery,
    ChosenInlineResult,
    MyChatMember,
    ChatMember,
    Unknown,
}

impl UpdateKindTag {
    /// Wire field name carrying this payload, `None` for [`UpdateKindTag::Unknown`].
    pub fn field(self) -> Option<&'static str> {
        match self {
            Self::Message => Some("message"),
            Self::EditedMessage => Some("edited_message"),
            Self::ChannelPost => Some("channel_post"),
            Self::EditedChannelPost => Some("edited_channel_post"),
            Self::CallbackQuery => Some("callback_query"),
            Self::InlineQuery => Some("inline_query"),
            Self::ChosenInlineResult => Some("chosen_inline_result"),
            Self::MyChatMember => Some("my_chat_member"),
            Self::ChatMember => Some("chat_member"),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for UpdateKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field().unwrap_or("unknown"))
    }
}

impl UpdateKind {
    pub fn tag(&self) -> UpdateKindTag {
        match self {
            Self::Message(_) => UpdateKindTag::Message,
            Self::EditedMessage(_) => UpdateKindTag::EditedMessage,
            Self::ChannelPost(_) => UpdateKindTag::ChannelPost,
            Self::EditedChannelPost(_) => UpdateKindTag::EditedChannelPost,
            Self::CallbackQuery(_) => UpdateKindTag::CallbackQuery,
            Self::InlineQuery(_) => UpdateKindTag::InlineQuery,
            Self::ChosenInlineResult(_) => UpdateKindTag::ChosenInlineResult,
            Self::MyChatMember(_) => UpdateKindTag::MyChatMember,
            Self::ChatMember(_) => UpdateKindTag::ChatMember,
            Self::Unknown(_) => UpdateKindTag::Unknown,
        }
    }
}

impl Update {
    pub fn new(update_id: i64, kind: UpdateKind) -> Self {
        Self { update_id, kind }
    }

    pub fn tag(&self) -> UpdateKindTag {
        self.kind.tag()
    }

    /// The message of any message-like variant (new or edited, chat or channel).
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => Some(m),
            _ => None,
        }
    }

    /// Free text carried by the update: message text, or the query string of
    /// inline queries and chosen inline results.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::InlineQuery(q) => Some(q.query.as_str()),
            UpdateKind::ChosenInlineResult(r) => Some(r.query.as_str()),
            _ => self.message().and_then(|m| m.text.as_deref()),
        }
    }

    pub fn caption(&self) -> Option<&str> {
        self.message().and_then(|m| m.caption.as_deref())
    }

    pub fn callback_query(&self) -> Option<&CallbackQuery> {
        match &self.kind {
            UpdateKind::CallbackQuery(q) => Some(q),
            _ => None,
        }
    }

    pub fn callback_data(&self) -> Option<&str> {
        self.callback_query().and_then(|q| q.data.as_deref())
    }

    /// The conversation this update belongs to, when it has one.
    pub fn chat(&self) -> Option<&Chat> {
        match &self.kind {
            UpdateKind::CallbackQuery(q) => q.message.as_ref().map(|m| &m.chat),
            UpdateKind::MyChatMember(m) | UpdateKind::ChatMember(m) => Some(&m.chat),
            _ => self.message().map(|m| &m.chat),
        }
    }

    /// The user who caused the update, when known.
    pub fn sender(&self) -> Option<&User> {
        match &self.kind {
            UpdateKind::CallbackQuery(q) => Some(&q.from),
            UpdateKind::InlineQuery(q) => Some(&q.from),
            UpdateKind::ChosenInlineResult(r) => Some(&r.from),
            UpdateKind::MyChatMember(m) | UpdateKind::ChatMember(m) => Some(&m.from),
            _ => self.message().and_then(|m| m.from.as_ref()),
        }
    }
}

// ── Wire form ───────────────────────────────────────────────────────────────

/// Wire shape: `update_id` plus one payload field.
#[derive(Serialize, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl TryFrom<RawUpdate> for Update {
    type Error = serde_json::Error;

    fn try_from(raw: RawUpdate) -> Result<Self, Self::Error> {
        let RawUpdate { update_id, mut rest } = raw;

        macro_rules! take {
            ($field:literal, $variant:ident) => {
                if let Some(v) = rest.remove($field) {
                    let payload = serde_json::from_value(v)?;
                    return Ok(Update::new(update_id, UpdateKind::$variant(payload)));
                }
            };
        }

        take!("message", Message);
        take!("edited_message", EditedMessage);
        take!("channel_post", ChannelPost);
        take!("edited_channel_post", EditedChannelPost);
        take!("callback_query", CallbackQuery);
        take!("inline_query", InlineQuery);
        take!("chosen_inline_result", ChosenInlineResult);
        take!("my_chat_member", MyChatMember);
        take!("chat_member", ChatMember);

        Ok(Update::new(update_id, UpdateKind::Unknown(Value::Object(rest))))
    }
}

impl From<Update> for RawUpdate {
    fn from(update: Update) -> Self {
        let tag = update.tag();
        let payload = match update.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => serde_json::to_value(m),
            UpdateKind::CallbackQuery(q) => serde_json::to_value(q),
            UpdateKind::InlineQuery(q) => serde_json::to_value(q),
            UpdateKind::ChosenInlineResult(r) => serde_json::to_value(r),
            UpdateKind::MyChatMember(m) | UpdateKind::ChatMember(m) => serde_json::to_value(m),
            UpdateKind::Unknown(v) => Ok(v),
        };

        let mut rest = Map::new();
        match (tag.field(), payload) {
            (Some(field), Ok(value)) => {
                rest.insert(field.to_string(), value);
            },
            (None, Ok(Value::Object(fields))) => rest = fields,
            // Typed payloads always serialize; an unknown non-object payload
            // has no field name to live under.
            _ => {},
        }
        Self {
            update_id: update.update_id,
            rest,
        }
    }
}

// ── Payload types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Chat {
    pub fn is_private(&self) -> bool {
        self.kind == ChatKind::Private
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub date: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_chat: Option<Chat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<MessageEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Box<Message>>,
    /// Media and service fields this model does not type (photo, sticker, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_message_id: Option<String>,
    #[serde(default)]
    pub chat_instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_short_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub offset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenInlineResult {
    pub result_id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub old_chat_member: Value,
    #[serde(default)]
    pub new_chat_member: Value,
}
