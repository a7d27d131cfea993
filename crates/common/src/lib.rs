//! Shared update model, outbound client contract, and error definitions used
//! across all courier crates.

pub mod client;
pub mod error;
pub mod types;

pub use {
    client::{ApiClient, NoopClient},
    error::{Error, Result},
    types::{
        CallbackQuery, Chat, ChatKind, ChatMemberUpdated, ChosenInlineResult, InlineQuery,
        Message, MessageEntity, Update, UpdateKind, UpdateKindTag, User,
    },
};
