//! First-match router.
//!
//! Routes are evaluated in registration order. A route matches when every
//! one of its predicates passes; the first match wins and no later route is
//! looked at, even if the matched handler fails. Middleware is composed once
//! in [`RouterBuilder::build`], so dispatch never re-wraps anything.

use std::sync::Arc;

use {async_trait::async_trait, courier_common::UpdateKindTag, tracing::debug};

use crate::{
    context::Context,
    error::Result,
    handler::{Handler, Middleware},
    predicate::Predicate,
};

/// Outcome of a dispatch that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A route matched and its handler returned `Ok`.
    Handled,
    /// No route matched; nothing ran.
    Unmatched,
}

impl Dispatch {
    pub fn is_handled(self) -> bool {
        self == Self::Handled
    }
}

#[derive(Clone)]
enum Target {
    Handler(Arc<dyn Handler>),
    Router(Router),
}

#[derive(Clone)]
struct Route {
    predicates: Vec<Predicate>,
    target: Target,
}

impl Route {
    fn guard_passes(&self, cx: &Context) -> bool {
        self.predicates.iter().all(|p| p.evaluate(cx))
    }

    fn find(&self, cx: &Context) -> Option<Arc<dyn Handler>> {
        if !self.guard_passes(cx) {
            return None;
        }
        match &self.target {
            Target::Handler(h) => Some(Arc::clone(h)),
            Target::Router(inner) => inner.find(cx),
        }
    }

    fn wrapped(self, layer: &dyn Middleware) -> Self {
        let target = match self.target {
            Target::Handler(h) => Target::Handler(layer.wrap(h)),
            Target::Router(inner) => Target::Router(inner.wrap_all(layer)),
        };
        Self {
            predicates: self.predicates,
            target,
        }
    }
}

/// An immutable, cheaply clonable route table.
#[derive(Clone, Default)]
pub struct Router {
    routes: Arc<[Route]>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The composed handler of the first matching route, if any.
    pub fn find(&self, cx: &Context) -> Option<Arc<dyn Handler>> {
        self.routes.iter().find_map(|route| route.find(cx))
    }

    /// Run the first matching handler. Unmatched updates are not an error.
    pub async fn dispatch(&self, cx: &mut Context) -> Result<Dispatch> {
        let Some(handler) = self.find(cx) else {
            debug!(
                update_id = cx.update_id(),
                kind = %cx.tag(),
                "no route matched"
            );
            return Ok(Dispatch::Unmatched);
        };
        debug!(update_id = cx.update_id(), kind = %cx.tag(), "dispatching update");
        handler.handle(cx).await?;
        Ok(Dispatch::Handled)
    }

    fn wrap_all(&self, layer: &dyn Middleware) -> Self {
        Self {
            routes: self
                .routes
                .iter()
                .cloned()
                .map(|route| route.wrapped(layer))
                .collect(),
        }
    }
}

/// A router used as a handler swallows the unmatched outcome.
#[async_trait]
impl Handler for Router {
    async fn handle(&self, cx: &mut Context) -> Result<()> {
        self.dispatch(cx).await.map(|_| ())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .finish()
    }
}

/// Collects routes and middleware, then composes them in [`build`](Self::build).
#[derive(Default)]
pub struct RouterBuilder {
    routes: Vec<Route>,
    layers: Vec<Arc<dyn Middleware>>,
}

impl RouterBuilder {
    /// Append a route guarded by all of `predicates`.
    #[must_use]
    pub fn on<H>(mut self, predicates: impl IntoIterator<Item = Predicate>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.routes.push(Route {
            predicates: predicates.into_iter().collect(),
            target: Target::Handler(Arc::new(handler)),
        });
        self
    }

    fn on_kind<H>(
        self,
        tag: UpdateKindTag,
        predicates: impl IntoIterator<Item = Predicate>,
        handler: H,
    ) -> Self
    where
        H: Handler + 'static,
    {
        let guard = std::iter::once(Predicate::Kind(tag)).chain(predicates);
        self.on(guard, handler)
    }

    #[must_use]
    pub fn message<H: Handler + 'static>(
        self,
        predicates: impl IntoIterator<Item = Predicate>,
        handler: H,
    ) -> Self {
        self.on_kind(UpdateKindTag::Message, predicates, handler)
    }

    #[must_use]
    pub fn edited_message<H: Handler + 'static>(
        self,
        predicates: impl IntoIterator<Item = Predicate>,
        handler: H,
    ) -> Self {
        self.on_kind(UpdateKindTag::EditedMessage, predicates, handler)
    }

    #[must_use]
    pub fn channel_post<H: Handler + 'static>(
        self,
        predicates: impl IntoIterator<Item = Predicate>,
        handler: H,
    ) -> Self {
        self.on_kind(UpdateKindTag::ChannelPost, predicates, handler)
    }

    #[must_use]
    pub fn callback_query<H: Handler + 'static>(
        self,
        predicates: impl IntoIterator<Item = Predicate>,
        handler: H,
    ) -> Self {
        self.on_kind(UpdateKindTag::CallbackQuery, predicates, handler)
    }

    #[must_use]
    pub fn inline_query<H: Handler + 'static>(
        self,
        predicates: impl IntoIterator<Item = Predicate>,
        handler: H,
    ) -> Self {
        self.on_kind(UpdateKindTag::InlineQuery, predicates, handler)
    }

    #[must_use]
    pub fn chosen_inline_result<H: Handler + 'static>(
        self,
        predicates: impl IntoIterator<Item = Predicate>,
        handler: H,
    ) -> Self {
        self.on_kind(UpdateKindTag::ChosenInlineResult, predicates, handler)
    }

    /// A message carrying the bot command `/name`.
    #[must_use]
    pub fn command<H: Handler + 'static>(self, name: &str, handler: H) -> Self {
        self.message([Predicate::command(name)], handler)
    }

    /// Catch-all route. Register it last.
    #[must_use]
    pub fn any<H: Handler + 'static>(self, handler: H) -> Self {
        self.on([], handler)
    }

    /// Route to a sub-router. The route only matches if `predicates` pass and
    /// some route of `router` matches; otherwise evaluation moves on.
    #[must_use]
    pub fn nest(
        mut self,
        predicates: impl IntoIterator<Item = Predicate>,
        router: impl Into<Router>,
    ) -> Self {
        self.routes.push(Route {
            predicates: predicates.into_iter().collect(),
            target: Target::Router(router.into()),
        });
        self
    }

    /// Register middleware for every route reachable through this router.
    /// The first layer registered is the outermost.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Router {
        let mut routes = self.routes;
        for layer in self.layers.iter().rev() {
            routes = routes
                .into_iter()
                .map(|route| route.wrapped(layer.as_ref()))
                .collect();
        }
        Router {
            routes: routes.into(),
        }
    }
}

impl From<RouterBuilder> for Router {
    fn from(builder: RouterBuilder) -> Self {
        builder.build()
    }
}
