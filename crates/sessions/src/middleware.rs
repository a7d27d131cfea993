//! Session injection as router middleware.
//!
//! For every matched update the wrapped handler gets a [`Session<S>`] in the
//! context's extensions:
//!
//! 1. A [`SessionKey`] is derived from the update. When none can be derived
//!    the handler runs without a session. When an enclosing layer of the same
//!    state type already holds a session for that key, it is reused as is.
//! 2. Stored bytes are loaded and decoded, or the initial value is used. A
//!    load or decode failure stops here and the handler never runs.
//! 3. The handler runs.
//! 4. The state is saved, even when the handler failed, unless the handler
//!    called [`Session::discard`] or [`Session::reset`]. A save failure is
//!    reported to the error sink and never replaces the handler's result.

use std::{marker::PhantomData, sync::Arc};

use {
    async_trait::async_trait,
    courier_routing::{
        Context, ErrorReport, ErrorSink, Handler, Middleware, Stage, TracingErrorSink,
    },
    serde::{Serialize, de::DeserializeOwned},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{
    error::Result,
    key::{KeyScope, SessionKey},
    store::SessionStore,
};

// ── Session handle ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Save,
    Discard,
    Reset,
}

/// Typed session state attached to a [`Context`].
#[derive(Debug, Clone)]
pub struct Session<S> {
    key: SessionKey,
    state: S,
    disposition: Disposition,
}

impl<S> Session<S> {
    fn new(key: SessionKey, state: S) -> Self {
        Self {
            key,
            state,
            disposition: Disposition::Save,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Replace the whole state.
    pub fn set(&mut self, state: S) {
        self.state = state;
    }

    /// Leave the stored value untouched; changes made in this run are dropped.
    pub fn discard(&mut self) {
        self.disposition = Disposition::Discard;
    }

    /// Delete the stored entry; the next load starts from the initial value.
    pub fn reset(&mut self) {
        self.disposition = Disposition::Reset;
    }
}

/// Session attached by a [`SessionMiddleware<S>`] further out, if any.
pub fn session<S: Send + Sync + 'static>(cx: &Context) -> Option<&Session<S>> {
    cx.extensions().get::<Session<S>>()
}

pub fn session_mut<S: Send + Sync + 'static>(cx: &mut Context) -> Option<&mut Session<S>> {
    cx.extensions_mut().get_mut::<Session<S>>()
}

// ── Codec ───────────────────────────────────────────────────────────────────

/// Turns application state into the bytes a [`SessionStore`] holds.
pub trait SessionCodec<S>: Send + Sync {
    fn encode(&self, state: &S) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<S>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl<S: Serialize + DeserializeOwned> SessionCodec<S> for JsonCodec {
    fn encode(&self, state: &S) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(state)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<S> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── Middleware ──────────────────────────────────────────────────────────────

type KeyFn = dyn Fn(&Context) -> Option<SessionKey> + Send + Sync;
type InitFn<S> = dyn Fn() -> S + Send + Sync;

struct Shared<S> {
    store: Arc<dyn SessionStore>,
    codec: Arc<dyn SessionCodec<S>>,
    key: Arc<KeyFn>,
    init: Arc<InitFn<S>>,
    sink: Arc<dyn ErrorSink>,
}

/// Middleware that loads, injects, and persists `Session<S>`.
pub struct SessionMiddleware<S> {
    shared: Arc<Shared<S>>,
}

impl<S> SessionMiddleware<S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Sessions keyed by chat, JSON-encoded, starting from `S::default()`.
    pub fn new(store: Arc<dyn SessionStore>) -> Self
    where
        S: Default,
    {
        Self::with_init(store, S::default)
    }

    /// Like [`new`](Self::new) with an explicit initial value.
    pub fn with_init(
        store: Arc<dyn SessionStore>,
        init: impl Fn() -> S + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                codec: Arc::new(JsonCodec),
                key: Arc::new(|cx: &Context| KeyScope::Chat.derive(cx.update())),
                init: Arc::new(init),
                sink: Arc::new(TracingErrorSink),
            }),
        }
    }
}

impl<S: Send + Sync + 'static> SessionMiddleware<S> {
    fn update(self, f: impl FnOnce(&mut Shared<S>)) -> Self {
        let mut shared = match Arc::try_unwrap(self.shared) {
            Ok(shared) => shared,
            Err(shared) => Shared {
                store: Arc::clone(&shared.store),
                codec: Arc::clone(&shared.codec),
                key: Arc::clone(&shared.key),
                init: Arc::clone(&shared.init),
                sink: Arc::clone(&shared.sink),
            },
        };
        f(&mut shared);
        Self {
            shared: Arc::new(shared),
        }
    }

    #[must_use]
    pub fn scope(self, scope: KeyScope) -> Self {
        self.update(|s| s.key = Arc::new(move |cx: &Context| scope.derive(cx.update())))
    }

    /// Scope keys with a namespace so several state types can share a store.
    #[must_use]
    pub fn scope_with_prefix(self, scope: KeyScope, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.update(|s| {
            s.key = Arc::new(move |cx: &Context| {
                scope.derive(cx.update()).map(|k| k.prefixed(&prefix))
            })
        })
    }

    /// Custom key derivation.
    #[must_use]
    pub fn key_fn(
        self,
        f: impl Fn(&Context) -> Option<SessionKey> + Send + Sync + 'static,
    ) -> Self {
        self.update(|s| s.key = Arc::new(f))
    }

    #[must_use]
    pub fn codec(self, codec: impl SessionCodec<S> + 'static) -> Self {
        self.update(|s| s.codec = Arc::new(codec))
    }

    #[must_use]
    pub fn error_sink(self, sink: Arc<dyn ErrorSink>) -> Self {
        self.update(|s| s.sink = sink)
    }
}

impl<S> Clone for SessionMiddleware<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> Middleware for SessionMiddleware<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(SessionHandler {
            shared: Arc::clone(&self.shared),
            next,
            _state: PhantomData,
        })
    }
}

struct SessionHandler<S> {
    shared: Arc<Shared<S>>,
    next: Arc<dyn Handler>,
    _state: PhantomData<fn() -> S>,
}

impl<S> SessionHandler<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn load(&self, cx: &Context, key: &SessionKey) -> Result<S> {
        let bytes = self.shared.store.get(cx.cancellation(), key.as_str()).await?;
        match bytes {
            Some(bytes) => self.shared.codec.decode(&bytes),
            None => Ok((self.shared.init)()),
        }
    }

    async fn persist(&self, session: Session<S>) -> Result<()> {
        // Saving is not tied to the dispatch token: a handler interrupted by
        // shutdown still gets its state written.
        let cancel = CancellationToken::new();
        let key = session.key.as_str();
        match session.disposition {
            Disposition::Save => {
                let bytes = self.shared.codec.encode(&session.state)?;
                self.shared.store.set(&cancel, key, &bytes).await
            },
            Disposition::Reset => self.shared.store.delete(&cancel, key).await,
            Disposition::Discard => Ok(()),
        }
    }
}

#[async_trait]
impl<S> Handler for SessionHandler<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn handle(&self, cx: &mut Context) -> courier_routing::Result<()> {
        let Some(key) = (self.shared.key)(&*cx) else {
            debug!(update_id = cx.update_id(), "no session key, running without session");
            return self.next.handle(cx).await;
        };

        if session::<S>(cx).is_some_and(|s| s.key == key) {
            debug!(update_id = cx.update_id(), key = %key, "session held by an enclosing layer");
            return self.next.handle(cx).await;
        }

        let state = self
            .load(cx, &key)
            .await
            .map_err(|e| courier_routing::Error::session(format!("load {key}"), e))?;
        let enclosing = cx.extensions_mut().insert(Session::new(key.clone(), state));

        let result = self.next.handle(cx).await;

        let session = cx.extensions_mut().remove::<Session<S>>();
        if let Some(enclosing) = enclosing {
            cx.extensions_mut().insert(enclosing);
        }
        let Some(session) = session else {
            return result;
        };
        if let Err(e) = self.persist(session).await {
            warn!(update_id = cx.update_id(), key = %key, error = %e, "session save failed");
            let err = courier_routing::Error::session(format!("save {key}"), e);
            self.shared.sink.report(&ErrorReport {
                origin: cx.origin(),
                stage: Stage::SessionSave,
                update_id: cx.update_id(),
                error: &err,
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        super::*,
        crate::{error::Error, store::MemoryStore},
        courier_common::{NoopClient, Update},
        courier_routing::{Dispatch, Origin, Predicate, Router, handler_fn, sink_fn},
        serde::Deserialize,
        serde_json::json,
    };

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u32,
    }

    fn text(id: i64, chat: i64, text: &str) -> Update {
        serde_json::from_value(json!({
            "update_id": id,
            "message": {
                "message_id": id,
                "chat": {"id": chat, "type": "private"},
                "from": {"id": chat, "is_bot": false, "first_name": "Ada"},
                "text": text
            }
        }))
        .unwrap()
    }

    fn no_chat(id: i64) -> Update {
        serde_json::from_value(json!({"update_id": id, "poll": {"id": "p"}})).unwrap()
    }

    fn context(update: Update) -> Context {
        Context::new(update, Arc::new(NoopClient)).with_origin(Origin::Webhook)
    }

    /// `/inc` adds one, `/fail` adds one then errors, `/drop` adds one and
    /// discards, `/reset` deletes.
    fn counter_router(store: Arc<dyn SessionStore>, sink: Arc<dyn ErrorSink>) -> Router {
        let step = handler_fn(|cx| {
            Box::pin(async move {
                let text = cx.text().unwrap_or_default().to_string();
                let Some(s) = session_mut::<Counter>(cx) else {
                    return Ok(());
                };
                s.state_mut().n += 1;
                match text.as_str() {
                    "/fail" => Err(courier_routing::Error::message("handler broke")),
                    "/drop" => {
                        s.discard();
                        Ok(())
                    },
                    "/reset" => {
                        s.reset();
                        Ok(())
                    },
                    _ => Ok(()),
                }
            })
        });
        Router::builder()
            .layer(SessionMiddleware::<Counter>::new(store).error_sink(sink))
            .any(step)
            .build()
    }

    async fn stored(store: &MemoryStore, key: &str) -> Option<Counter> {
        store
            .get(&CancellationToken::new(), key)
            .await
            .unwrap()
            .map(|b| serde_json::from_slice(&b).unwrap())
    }

    #[tokio::test]
    async fn state_round_trips_across_dispatches() {
        let store = Arc::new(MemoryStore::new());
        let router = counter_router(store.clone(), Arc::new(TracingErrorSink));

        for id in 1..=3 {
            router.dispatch(&mut context(text(id, 10, "/inc"))).await.unwrap();
        }
        router.dispatch(&mut context(text(4, 11, "/inc"))).await.unwrap();

        assert_eq!(stored(&store, "chat:10").await, Some(Counter { n: 3 }));
        assert_eq!(stored(&store, "chat:11").await, Some(Counter { n: 1 }));
    }

    #[tokio::test]
    async fn handler_error_still_saves_and_is_returned() {
        let store = Arc::new(MemoryStore::new());
        let router = counter_router(store.clone(), Arc::new(TracingErrorSink));

        let err = router
            .dispatch(&mut context(text(1, 10, "/fail")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "handler broke");
        assert_eq!(stored(&store, "chat:10").await, Some(Counter { n: 1 }));
    }

    #[tokio::test]
    async fn discard_keeps_previous_value() {
        let store = Arc::new(MemoryStore::new());
        let router = counter_router(store.clone(), Arc::new(TracingErrorSink));

        router.dispatch(&mut context(text(1, 10, "/inc"))).await.unwrap();
        router.dispatch(&mut context(text(2, 10, "/drop"))).await.unwrap();
        assert_eq!(stored(&store, "chat:10").await, Some(Counter { n: 1 }));
    }

    #[tokio::test]
    async fn reset_deletes_and_next_load_is_initial() {
        let store = Arc::new(MemoryStore::new());
        let router = counter_router(store.clone(), Arc::new(TracingErrorSink));

        router.dispatch(&mut context(text(1, 10, "/inc"))).await.unwrap();
        router.dispatch(&mut context(text(2, 10, "/reset"))).await.unwrap();
        assert_eq!(stored(&store, "chat:10").await, None);

        router.dispatch(&mut context(text(3, 10, "/inc"))).await.unwrap();
        assert_eq!(stored(&store, "chat:10").await, Some(Counter { n: 1 }));
    }

    fn increment() -> impl Handler {
        handler_fn(|cx| {
            Box::pin(async move {
                if let Some(s) = session_mut::<Counter>(cx) {
                    s.state_mut().n += 1;
                }
                Ok(())
            })
        })
    }

    /// Outer middleware that bumps the counter again after the inner chain.
    fn increment_after() -> courier_routing::Around {
        courier_routing::around(|cx, next| {
            Box::pin(async move {
                let out = next.handle(cx).await;
                if let Some(s) = session_mut::<Counter>(cx) {
                    s.state_mut().n += 10;
                }
                out
            })
        })
    }

    #[tokio::test]
    async fn nested_layers_with_the_same_key_share_one_session() {
        let store = Arc::new(MemoryStore::new());
        let layer = SessionMiddleware::<Counter>::new(store.clone());
        let inner = Router::builder().layer(layer.clone()).any(increment()).build();
        let router = Router::builder()
            .layer(layer)
            .layer(increment_after())
            .nest([], inner)
            .build();

        for id in 1..=2 {
            router.dispatch(&mut context(text(id, 10, "/inc"))).await.unwrap();
        }

        assert_eq!(stored(&store, "chat:10").await, Some(Counter { n: 22 }));
    }

    #[tokio::test]
    async fn nested_layers_with_different_keys_both_persist() {
        let store = Arc::new(MemoryStore::new());
        let inner = Router::builder()
            .layer(
                SessionMiddleware::<Counter>::new(store.clone())
                    .scope_with_prefix(KeyScope::Chat, "inner"),
            )
            .any(increment())
            .build();
        let outer_seen = Arc::new(Mutex::new(None));
        let observe = {
            let outer_seen = Arc::clone(&outer_seen);
            courier_routing::around(move |cx, next| {
                let outer_seen = Arc::clone(&outer_seen);
                Box::pin(async move {
                    let out = next.handle(cx).await;
                    *outer_seen.lock().unwrap() =
                        session::<Counter>(cx).map(|s| s.key().to_string());
                    out
                })
            })
        };
        let router = Router::builder()
            .layer(
                SessionMiddleware::<Counter>::new(store.clone())
                    .scope_with_prefix(KeyScope::Chat, "outer"),
            )
            .layer(observe)
            .nest([], inner)
            .build();

        router.dispatch(&mut context(text(1, 10, "/inc"))).await.unwrap();

        assert_eq!(outer_seen.lock().unwrap().as_deref(), Some("outer:chat:10"));
        assert_eq!(stored(&store, "inner:chat:10").await, Some(Counter { n: 1 }));
        assert_eq!(stored(&store, "outer:chat:10").await, Some(Counter { n: 0 }));
    }

    #[tokio::test]
    async fn no_key_runs_without_session() {
        let store = Arc::new(MemoryStore::new());
        let router = counter_router(store.clone(), Arc::new(TracingErrorSink));

        let out = router.dispatch(&mut context(no_chat(1))).await.unwrap();
        assert_eq!(out, Dispatch::Handled);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn undecodable_state_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(&CancellationToken::new(), "chat:10", b"not json")
            .await
            .unwrap();
        let router = counter_router(store.clone(), Arc::new(TracingErrorSink));

        let err = router
            .dispatch(&mut context(text(1, 10, "/inc")))
            .await
            .unwrap_err();
        assert!(matches!(err, courier_routing::Error::Session { .. }));
    }

    struct FlakyStore {
        fail_get: bool,
        sets: Mutex<u32>,
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn get(&self, _: &CancellationToken, _: &str) -> Result<Option<Vec<u8>>> {
            if self.fail_get {
                return Err(Error::message("store down"));
            }
            Ok(None)
        }

        async fn set(&self, _: &CancellationToken, _: &str, _: &[u8]) -> Result<()> {
            *self.sets.lock().unwrap() += 1;
            Err(Error::message("disk full"))
        }

        async fn delete(&self, _: &CancellationToken, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn load_failure_blocks_handler() {
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let router = Router::builder()
            .layer(SessionMiddleware::<Counter>::new(Arc::new(FlakyStore {
                fail_get: true,
                sets: Mutex::new(0),
            })))
            .on([Predicate::Always], handler_fn(move |_cx| {
                let flag = Arc::clone(&flag);
                Box::pin(async move {
                    *flag.lock().unwrap() = true;
                    Ok(())
                })
            }))
            .build();

        let err = router
            .dispatch(&mut context(text(1, 10, "/inc")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("store down"), "{err}");
        assert!(!*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn save_failure_is_reported_not_returned() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&reports);
        let sink: Arc<dyn ErrorSink> = Arc::new(sink_fn(move |r: &ErrorReport<'_>| {
            seen.lock()
                .unwrap()
                .push((r.origin, r.stage, r.update_id, r.error.to_string()));
        }));
        let store = Arc::new(FlakyStore {
            fail_get: false,
            sets: Mutex::new(0),
        });
        let router = counter_router(store.clone(), sink);

        let out = router.dispatch(&mut context(text(9, 10, "/inc"))).await.unwrap();
        assert_eq!(out, Dispatch::Handled);
        assert_eq!(*store.sets.lock().unwrap(), 1);

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        let (origin, stage, update_id, message) = &reports[0];
        assert_eq!(*origin, Origin::Webhook);
        assert_eq!(*stage, Stage::SessionSave);
        assert_eq!(*update_id, 9);
        assert!(message.contains("disk full"), "{message}");
    }

    #[tokio::test]
    async fn prefixed_scope_namespaces_keys() {
        let store = Arc::new(MemoryStore::new());
        let router = Router::builder()
            .layer(
                SessionMiddleware::<Counter>::new(store.clone())
                    .scope_with_prefix(KeyScope::Sender, "counter"),
            )
            .any(handler_fn(|cx| {
                Box::pin(async move {
                    if let Some(s) = session_mut::<Counter>(cx) {
                        s.state_mut().n = 5;
                    }
                    Ok(())
                })
            }))
            .build();

        router.dispatch(&mut context(text(1, 10, "x"))).await.unwrap();
        assert_eq!(stored(&store, "counter:user:10").await, Some(Counter { n: 5 }));
    }

    #[tokio::test]
    async fn custom_initial_value() {
        let store = Arc::new(MemoryStore::new());
        let router = Router::builder()
            .layer(SessionMiddleware::with_init(store.clone(), || Counter { n: 100 }))
            .any(handler_fn(|cx| {
                Box::pin(async move {
                    let n = session::<Counter>(cx).map(|s| s.state().n);
                    assert_eq!(n, Some(100));
                    Ok(())
                })
            }))
            .build();

        router.dispatch(&mut context(text(1, 10, "x"))).await.unwrap();
        assert_eq!(stored(&store, "chat:10").await, Some(Counter { n: 100 }));
    }
}
