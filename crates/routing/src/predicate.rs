//! Route guards.
//!
//! A [`Predicate`] is a pure classifier over a [`Context`]. Every predicate
//! is absence-safe: when the field it inspects does not exist for the
//! update's variant it evaluates to `false`, never to an error.

use std::{fmt, sync::Arc};

use {
    courier_common::{ChatKind, UpdateKindTag},
    regex::Regex,
    serde::de::DeserializeOwned,
};

use crate::context::Context;

type ContextCheck = dyn Fn(&Context) -> bool + Send + Sync;
type PayloadCheck = dyn Fn(&str) -> bool + Send + Sync;

#[derive(Clone)]
pub enum Predicate {
    /// Matches everything.
    Always,
    /// Update payload is of the given variant.
    Kind(UpdateKindTag),
    /// Whole text equals the value after trimming surrounding whitespace on
    /// both sides.
    TextEquals(String),
    /// Like [`Predicate::TextEquals`], ignoring case.
    TextEqualsIgnoreCase(String),
    /// Raw text starts with the value.
    TextPrefix(String),
    /// Raw text ends with the value.
    TextSuffix(String),
    /// Raw text contains the value.
    TextContains(String),
    TextMatches(Regex),
    /// Text is the bot command `/name`, optionally addressed as
    /// `/name@bot_username`, optionally followed by arguments.
    Command {
        name: String,
        bot_username: Option<String>,
    },
    CaptionContains(String),
    CallbackDataEquals(String),
    CallbackDataPrefix(String),
    /// Callback data decodes into an expected shape and passes a check.
    /// Decode failure is a non-match.
    CallbackPayload(Arc<PayloadCheck>),
    ChatKind(ChatKind),
    ChatId(i64),
    SenderId(i64),
    /// Sender is a bot account.
    FromBot,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Custom(Arc<ContextCheck>),
}

impl Predicate {
    pub fn evaluate(&self, cx: &Context) -> bool {
        match self {
            Self::Always => true,
            Self::Kind(tag) => cx.tag() == *tag,
            Self::TextEquals(expected) => cx
                .text()
                .is_some_and(|t| t.trim() == expected.trim()),
            Self::TextEqualsIgnoreCase(expected) => cx
                .text()
                .is_some_and(|t| t.trim().to_lowercase() == expected.trim().to_lowercase()),
            Self::TextPrefix(prefix) => cx.text().is_some_and(|t| t.starts_with(prefix.as_str())),
            Self::TextSuffix(suffix) => cx.text().is_some_and(|t| t.ends_with(suffix.as_str())),
            Self::TextContains(needle) => cx.text().is_some_and(|t| t.contains(needle.as_str())),
            Self::TextMatches(re) => cx.text().is_some_and(|t| re.is_match(t)),
            Self::Command { name, bot_username } => cx
                .text()
                .and_then(parse_command)
                .is_some_and(|cmd| cmd.matches(name, bot_username.as_deref())),
            Self::CaptionContains(needle) => cx
                .update()
                .caption()
                .is_some_and(|c| c.contains(needle.as_str())),
            Self::CallbackDataEquals(expected) => cx
                .update()
                .callback_data()
                .is_some_and(|d| d == expected),
            Self::CallbackDataPrefix(prefix) => cx
                .update()
                .callback_data()
                .is_some_and(|d| d.starts_with(prefix.as_str())),
            Self::CallbackPayload(check) => cx.update().callback_data().is_some_and(|d| check(d)),
            Self::ChatKind(kind) => cx.chat().is_some_and(|c| c.kind == *kind),
            Self::ChatId(id) => cx.chat().is_some_and(|c| c.id == *id),
            Self::SenderId(id) => cx.sender().is_some_and(|u| u.id == *id),
            Self::FromBot => cx.sender().is_some_and(|u| u.is_bot),
            Self::And(all) => all.iter().all(|p| p.evaluate(cx)),
            Self::Or(any) => any.iter().any(|p| p.evaluate(cx)),
            Self::Not(inner) => !inner.evaluate(cx),
            Self::Custom(f) => f(cx),
        }
    }

    // ── Constructors ────────────────────────────────────────────────────────

    pub fn kind(tag: UpdateKindTag) -> Self {
        Self::Kind(tag)
    }

    pub fn text_equals(text: impl Into<String>) -> Self {
        Self::TextEquals(text.into())
    }

    pub fn text_equals_ignore_case(text: impl Into<String>) -> Self {
        Self::TextEqualsIgnoreCase(text.into())
    }

    pub fn text_prefix(prefix: impl Into<String>) -> Self {
        Self::TextPrefix(prefix.into())
    }

    pub fn text_suffix(suffix: impl Into<String>) -> Self {
        Self::TextSuffix(suffix.into())
    }

    pub fn text_contains(needle: impl Into<String>) -> Self {
        Self::TextContains(needle.into())
    }

    /// Compile `pattern` into a [`Predicate::TextMatches`].
    pub fn text_matches(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::TextMatches(Regex::new(pattern)?))
    }

    /// `/name` addressed to any bot. The leading slash is optional.
    pub fn command(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Command {
            name: name.trim_start_matches('/').to_string(),
            bot_username: None,
        }
    }

    /// `/name` or `/name@bot_username`, rejecting commands addressed to
    /// other bots.
    pub fn command_for(name: impl Into<String>, bot_username: impl Into<String>) -> Self {
        let name = name.into();
        Self::Command {
            name: name.trim_start_matches('/').to_string(),
            bot_username: Some(bot_username.into().trim_start_matches('@').to_string()),
        }
    }

    pub fn caption_contains(needle: impl Into<String>) -> Self {
        Self::CaptionContains(needle.into())
    }

    pub fn callback_data(data: impl Into<String>) -> Self {
        Self::CallbackDataEquals(data.into())
    }

    pub fn callback_prefix(prefix: impl Into<String>) -> Self {
        Self::CallbackDataPrefix(prefix.into())
    }

    /// Callback data that decodes as JSON into `T` and satisfies `check`.
    pub fn callback_payload<T, F>(check: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::CallbackPayload(Arc::new(move |raw: &str| {
            serde_json::from_str::<T>(raw).is_ok_and(|payload| check(&payload))
        }))
    }

    pub fn chat_kind(kind: ChatKind) -> Self {
        Self::ChatKind(kind)
    }

    pub fn private_chat() -> Self {
        Self::ChatKind(ChatKind::Private)
    }

    pub fn chat_id(id: i64) -> Self {
        Self::ChatId(id)
    }

    pub fn sender_id(id: i64) -> Self {
        Self::SenderId(id)
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    // ── Combinators ─────────────────────────────────────────────────────────

    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::And(predicates.into_iter().collect())
    }

    pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Or(predicates.into_iter().collect())
    }

    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut all) => {
                all.push(other);
                Self::And(all)
            },
            first => Self::And(vec![first, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut any) => {
                any.push(other);
                Self::Or(any)
            },
            first => Self::Or(vec![first, other]),
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::Kind(tag) => f.debug_tuple("Kind").field(tag).finish(),
            Self::TextEquals(s) => f.debug_tuple("TextEquals").field(s).finish(),
            Self::TextEqualsIgnoreCase(s) => {
                f.debug_tuple("TextEqualsIgnoreCase").field(s).finish()
            },
            Self::TextPrefix(s) => f.debug_tuple("TextPrefix").field(s).finish(),
            Self::TextSuffix(s) => f.debug_tuple("TextSuffix").field(s).finish(),
            Self::TextContains(s) => f.debug_tuple("TextContains").field(s).finish(),
            Self::TextMatches(re) => f.debug_tuple("TextMatches").field(&re.as_str()).finish(),
            Self::Command { name, bot_username } => f
                .debug_struct("Command")
                .field("name", name)
                .field("bot_username", bot_username)
                .finish(),
            Self::CaptionContains(s) => f.debug_tuple("CaptionContains").field(s).finish(),
            Self::CallbackDataEquals(s) => f.debug_tuple("CallbackDataEquals").field(s).finish(),
            Self::CallbackDataPrefix(s) => f.debug_tuple("CallbackDataPrefix").field(s).finish(),
            Self::CallbackPayload(_) => f.write_str("CallbackPayload(..)"),
            Self::ChatKind(k) => f.debug_tuple("ChatKind").field(k).finish(),
            Self::ChatId(id) => f.debug_tuple("ChatId").field(id).finish(),
            Self::SenderId(id) => f.debug_tuple("SenderId").field(id).finish(),
            Self::FromBot => f.write_str("FromBot"),
            Self::And(all) => f.debug_tuple("And").field(all).finish(),
            Self::Or(any) => f.debug_tuple("Or").field(any).finish(),
            Self::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ── Command parsing ─────────────────────────────────────────────────────────

/// A bot command split out of message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    /// Command name without the leading slash.
    pub name: &'a str,
    /// Bot username after `@`, when addressed.
    pub bot_username: Option<&'a str>,
    /// Everything after the command token, trimmed.
    pub args: &'a str,
}

impl ParsedCommand<'_> {
    fn matches(&self, name: &str, bot_username: Option<&str>) -> bool {
        if self.name != name {
            return false;
        }
        match (self.bot_username, bot_username) {
            (Some(addressed), Some(ours)) => addressed.eq_ignore_ascii_case(ours),
            _ => true,
        }
    }
}

/// Split `/name@bot args` into its parts. `None` unless the text starts with
/// a slash followed by a non-empty name.
pub fn parse_command(text: &str) -> Option<ParsedCommand<'_>> {
    let rest = text.strip_prefix('/')?;
    let (token, args) = match rest.find(char::is_whitespace) {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    };
    let (name, bot_username) = match token.split_once('@') {
        Some((name, bot)) => (name, Some(bot)),
        None => (token, None),
    };
    if name.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        name,
        bot_username,
        args,
    })
}
