//! Handler and middleware contracts.

use std::sync::Arc;

use {async_trait::async_trait, futures::future::BoxFuture};

use crate::{context::Context, error::Result};

/// Application logic invoked for a matched update.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, cx: &mut Context) -> Result<()>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, cx: &mut Context) -> Result<()> {
        (**self).handle(cx).await
    }
}

/// Handler backed by a closure returning a boxed future.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn handle(&self, cx: &mut Context) -> Result<()> {
        (self.0)(cx).await
    }
}

/// Wrap a closure as a [`Handler`].
///
/// ```ignore
/// handler_fn(|cx| Box::pin(async move {
///     cx.call("sendMessage", json!({"chat_id": 1, "text": "hi"})).await?;
///     Ok(())
/// }))
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    FnHandler(f)
}

/// Transform applied to a handler at router-build time.
///
/// `wrap` receives the next handler in the chain and returns its
/// replacement. Any `Fn(Arc<dyn Handler>) -> Arc<dyn Handler>` is a
/// middleware.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

impl<F> Middleware for F
where
    F: Fn(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + Sync,
{
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self(next)
    }
}

type AroundFn =
    dyn for<'a> Fn(&'a mut Context, Arc<dyn Handler>) -> BoxFuture<'a, Result<()>> + Send + Sync;

/// Middleware from a closure that gets the context and the next handler and
/// decides if, when, and how to call it.
pub fn around<F>(f: F) -> Around
where
    F: for<'a> Fn(&'a mut Context, Arc<dyn Handler>) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    Around(Arc::new(f))
}

#[derive(Clone)]
pub struct Around(Arc<AroundFn>);

impl Middleware for Around {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(AroundHandler {
            f: Arc::clone(&self.0),
            next,
        })
    }
}

struct AroundHandler {
    f: Arc<AroundFn>,
    next: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for AroundHandler {
    async fn handle(&self, cx: &mut Context) -> Result<()> {
        (self.f)(cx, Arc::clone(&self.next)).await
    }
}
