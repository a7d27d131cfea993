//! Update classification and first-match dispatch.
//!
//! A [`Router`] holds an ordered list of predicate-guarded routes. Each
//! inbound [`Update`](courier_common::Update) is wrapped in a [`Context`] and
//! handed to the first route whose predicates all pass. Routes can point at
//! nested routers, and middleware registered on a router wraps every handler
//! reachable through it.

pub mod context;
pub mod error;
pub mod handler;
pub mod predicate;
pub mod router;
pub mod sink;

pub use {
    context::Context,
    error::{Error, Result},
    handler::{Around, FnHandler, Handler, Middleware, around, handler_fn},
    predicate::{ParsedCommand, Predicate, parse_command},
    router::{Dispatch, Router, RouterBuilder},
    sink::{ErrorReport, ErrorSink, Origin, Stage, TracingErrorSink, sink_fn},
};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use {
        courier_common::{
            CallbackQuery, Chat, ChatKind, InlineQuery, Message, NoopClient, Update, UpdateKind,
            User,
        },
        serde_json::Map,
    };

    use crate::context::Context;

    pub fn user() -> User {
        User {
            id: 7,
            is_bot: false,
            first_name: "Ada".into(),
            last_name: None,
            username: Some("ada".into()),
            language_code: None,
        }
    }

    pub fn private_chat() -> Chat {
        Chat {
            id: 42,
            kind: ChatKind::Private,
            title: None,
            username: Some("ada".into()),
        }
    }

    fn message(text: &str) -> Message {
        Message {
            message_id: 100,
            date: 0,
            chat: private_chat(),
            message_thread_id: None,
            from: Some(user()),
            sender_chat: None,
            text: Some(text.into()),
            caption: None,
            entities: Vec::new(),
            reply_to_message: None,
            extra: Map::new(),
        }
    }

    /// Private-chat text message from user 7 in chat 42.
    pub fn text_update(id: i64, text: &str) -> Update {
        Update::new(id, UpdateKind::Message(message(text)))
    }

    pub fn callback_update(id: i64, data: &str) -> Update {
        Update::new(
            id,
            UpdateKind::CallbackQuery(CallbackQuery {
                id: format!("cb-{id}"),
                from: user(),
                message: Some(message("menu")),
                inline_message_id: None,
                chat_instance: "ci".into(),
                data: Some(data.into()),
                game_short_name: None,
            }),
        )
    }

    pub fn inline_update(id: i64, query: &str) -> Update {
        Update::new(
            id,
            UpdateKind::InlineQuery(InlineQuery {
                id: format!("iq-{id}"),
                from: user(),
                query: query.into(),
                offset: String::new(),
                chat_type: None,
            }),
        )
    }

    pub fn context_for(update: Update) -> Context {
        Context::new(update, Arc::new(NoopClient))
    }
}
