//! Handler-facing view of one update.

use std::{future::Future, sync::Arc, time::Duration};

use {
    courier_common::{
        ApiClient, CallbackQuery, Chat, Message, Update, UpdateKind, UpdateKindTag, User,
    },
    http::Extensions,
    serde_json::Value,
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
};

use crate::{
    error::{Error, Result},
    sink::Origin,
};

/// The typed update handed to predicates and handlers.
///
/// Carries the immutable [`Update`], the outbound client, a cancellable and
/// optionally deadline-bound execution context, and a typed extension map
/// that middleware use to attach values (session state, for instance).
pub struct Context {
    update: Arc<Update>,
    client: Arc<dyn ApiClient>,
    origin: Origin,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    extensions: Extensions,
}

impl Context {
    pub fn new(update: impl Into<Arc<Update>>, client: Arc<dyn ApiClient>) -> Self {
        Self {
            update: update.into(),
            client,
            origin: Origin::Direct,
            cancel: CancellationToken::new(),
            deadline: None,
            extensions: Extensions::new(),
        }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now; `None` leaves the context unbounded.
    #[must_use]
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(t) => self.with_deadline(Instant::now() + t),
            None => self,
        }
    }

    pub fn update(&self) -> &Update {
        &self.update
    }

    pub fn shared_update(&self) -> Arc<Update> {
        Arc::clone(&self.update)
    }

    pub fn update_id(&self) -> i64 {
        self.update.update_id
    }

    pub fn kind(&self) -> &UpdateKind {
        &self.update.kind
    }

    pub fn tag(&self) -> UpdateKindTag {
        self.update.tag()
    }

    pub fn text(&self) -> Option<&str> {
        self.update.text()
    }

    pub fn message(&self) -> Option<&Message> {
        self.update.message()
    }

    pub fn callback_query(&self) -> Option<&CallbackQuery> {
        self.update.callback_query()
    }

    pub fn chat(&self) -> Option<&Chat> {
        self.update.chat()
    }

    pub fn sender(&self) -> Option<&User> {
        self.update.sender()
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn client(&self) -> &Arc<dyn ApiClient> {
        &self.client
    }

    /// Issue an outbound call, abandoning it if the context is cancelled or
    /// its deadline passes first.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let out = self.run(self.client.call(method, params)).await?;
        Ok(out?)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast with the matching error when the context is already done.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or the
    /// deadline passes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(Error::Cancelled),
                () = tokio::time::sleep_until(deadline) => Err(Error::DeadlineExceeded),
                out = fut => Ok(out),
            },
            None => tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(Error::Cancelled),
                out = fut => Ok(out),
            },
        }
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("update_id", &self.update.update_id)
            .field("kind", &self.update.tag())
            .field("origin", &self.origin)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
