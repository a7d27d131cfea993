//! Conversation-scoped state for update handlers.
//!
//! The core only needs the byte-oriented [`SessionStore`] contract. Two
//! backends ship with the crate ([`MemoryStore`] and [`SqliteStore`]), and
//! [`SessionMiddleware`] plugs typed state into a router as ordinary
//! middleware.

pub mod error;
pub mod key;
pub mod middleware;
pub mod sqlite;
pub mod store;

pub use {
    error::{Error, Result},
    key::{KeyScope, SessionKey},
    middleware::{JsonCodec, Session, SessionCodec, SessionMiddleware, session, session_mut},
    sqlite::SqliteStore,
    store::{MemoryStore, SessionStore},
};
