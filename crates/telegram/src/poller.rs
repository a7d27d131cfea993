//! Long-polling update acquisition.
//!
//! The loop is `Idle → Fetching → Dispatching → Idle`, with `Error` entered
//! on fetch failure (left after a backoff delay) and `Stopped` as the
//! terminal state. Updates of one batch are dispatched one after another in
//! server order, and the offset moves to `max(update_id) + 1` only once the
//! whole batch has been handed to the router.

use std::{sync::Arc, time::Duration};

use {
    courier_common::ApiClient,
    courier_routing::{Context, ErrorReport, ErrorSink, Origin, Router, Stage, TracingErrorSink},
    serde::{Deserialize, Serialize},
    tokio::{sync::watch, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    api::{GetUpdates, UpdateBatch, UpdateSource},
    backoff::{Backoff, BackoffConfig},
    error::{Error, Result},
};

/// Poller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Maximum updates per batch (1..=100).
    pub limit: u32,
    /// Long-poll timeout in seconds.
    pub timeout_secs: u64,
    /// Update kinds to receive; empty means the server default.
    pub allowed_updates: Vec<String>,
    /// Passed to the startup `deleteWebhook` call.
    pub drop_pending_updates: bool,
    pub backoff: BackoffConfig,
    /// Per-update handler deadline.
    pub handler_timeout_secs: Option<u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            timeout_secs: 30,
            allowed_updates: Vec::new(),
            drop_pending_updates: false,
            backoff: BackoffConfig::default(),
            handler_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Fetching,
    Dispatching,
    /// Waiting out a backoff delay after a failure.
    Error,
    Stopped,
}

pub struct Poller {
    source: Arc<dyn UpdateSource>,
    client: Arc<dyn ApiClient>,
    router: Router,
    sink: Arc<dyn ErrorSink>,
    config: PollerConfig,
    handler_cancel: CancellationToken,
    offset: i64,
    backoff: Backoff,
    state: watch::Sender<PollerState>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        client: Arc<dyn ApiClient>,
        router: Router,
        config: PollerConfig,
    ) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            source,
            client,
            router,
            sink: Arc::new(TracingErrorSink),
            backoff: Backoff::new(config.backoff),
            config,
            handler_cancel: CancellationToken::new(),
            offset: 0,
            state,
        }
    }

    #[must_use]
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Parent of every per-update cancellation token. Cancelling it interrupts
    /// running handlers; the stop token passed to [`run`](Self::run) only ends
    /// the fetch loop and lets the in-flight batch finish.
    #[must_use]
    pub fn with_handler_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.handler_cancel = cancel;
        self
    }

    /// Start from a known offset instead of 0.
    #[must_use]
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Next update id that will be requested.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PollerState) {
        self.state.send_replace(state);
    }

    /// Run the loop on a background task.
    pub fn spawn(mut self, stop: CancellationToken) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(stop).await })
    }

    /// Run until `stop` fires (`Ok`) or a terminal error occurs (`Err`).
    pub async fn run(&mut self, stop: CancellationToken) -> Result<()> {
        let out = self.run_inner(&stop).await;
        self.set_state(PollerState::Stopped);
        match &out {
            Ok(()) => info!(offset = self.offset, "poller stopped"),
            Err(e) => error!(offset = self.offset, error = %e, "poller stopped on fatal error"),
        }
        out
    }

    async fn run_inner(&mut self, stop: &CancellationToken) -> Result<()> {
        if !self.clear_webhook(stop).await? {
            return Ok(());
        }
        info!(offset = self.offset, limit = self.config.limit, "poller started");

        loop {
            if stop.is_cancelled() {
                return Ok(());
            }

            self.set_state(PollerState::Fetching);
            let request = GetUpdates {
                offset: self.offset,
                limit: self.config.limit,
                timeout: self.config.timeout_secs,
                allowed_updates: self.config.allowed_updates.clone(),
            };
            let fetched = tokio::select! {
                biased;
                () = stop.cancelled() => return Ok(()),
                fetched = self.source.get_updates(&request) => fetched,
            };

            match fetched {
                Ok(batch) => {
                    self.backoff.reset();
                    if !batch.updates.is_empty() {
                        self.set_state(PollerState::Dispatching);
                        debug!(offset = self.offset, count = batch.updates.len(), "got updates");
                    }
                    self.dispatch_batch(batch).await;
                    self.set_state(PollerState::Idle);
                },
                Err(e) => {
                    if !self.recover(e, stop).await? {
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Remove any registered webhook so `getUpdates` is allowed. Retries
    /// transient failures; returns `false` when stopped first.
    async fn clear_webhook(&mut self, stop: &CancellationToken) -> Result<bool> {
        loop {
            let cleared = tokio::select! {
                biased;
                () = stop.cancelled() => return Ok(false),
                cleared = self.source.delete_webhook(self.config.drop_pending_updates) => cleared,
            };
            match cleared {
                Ok(()) => {
                    info!(
                        drop_pending_updates = self.config.drop_pending_updates,
                        "webhook cleared for long polling"
                    );
                    self.backoff.reset();
                    return Ok(true);
                },
                Err(e) => {
                    if !self.recover(e, stop).await? {
                        return Ok(false);
                    }
                },
            }
        }
    }

    /// Handle a failed call: terminal errors end the loop, anything else
    /// waits before the next attempt. Returns `false` when stopped while
    /// waiting.
    async fn recover(&mut self, err: Error, stop: &CancellationToken) -> Result<bool> {
        if err.is_terminal() {
            return Err(err);
        }
        self.set_state(PollerState::Error);
        let delay = match &err {
            Error::RetryAfter { after } => *after,
            _ => self.backoff.next_delay(),
        };
        warn!(
            error = %err,
            attempt = self.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "bot api call failed, backing off"
        );
        tokio::select! {
            biased;
            () = stop.cancelled() => Ok(false),
            () = tokio::time::sleep(delay) => {
                self.set_state(PollerState::Idle);
                Ok(true)
            },
        }
    }

    async fn dispatch_batch(&mut self, batch: UpdateBatch) {
        let handler_timeout = self.config.handler_timeout_secs.map(Duration::from_secs);
        for update in batch.updates {
            let update_id = update.update_id;
            if update_id < self.offset {
                warn!(update_id, offset = self.offset, "skipping already processed update");
                continue;
            }

            let mut cx = Context::new(update, Arc::clone(&self.client))
                .with_origin(Origin::Polling)
                .with_cancellation(self.handler_cancel.child_token())
                .with_timeout(handler_timeout);
            match self.router.dispatch(&mut cx).await {
                Ok(outcome) => debug!(update_id, ?outcome, "update dispatched"),
                Err(e) => self.sink.report(&ErrorReport {
                    origin: Origin::Polling,
                    stage: Stage::Handler,
                    update_id,
                    error: &e,
                }),
            }
        }

        if let Some(last) = batch.last_update_id {
            self.offset = self.offset.max(last + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use {
        super::*,
        crate::api::WebhookRegistration,
        async_trait::async_trait,
        courier_common::{NoopClient, Update},
        courier_routing::{handler_fn, sink_fn},
        serde_json::json,
    };

    /// Replays scripted `getUpdates` results and cancels `stop` once the
    /// script runs out.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<UpdateBatch>>>,
        requests: Mutex<Vec<GetUpdates>>,
        deletes: Mutex<Vec<bool>>,
        stop: CancellationToken,
    }

    impl ScriptedSource {
        fn new(stop: &CancellationToken, script: Vec<Result<UpdateBatch>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::default(),
                deletes: Mutex::default(),
                stop: stop.clone(),
            })
        }

        fn offsets(&self) -> Vec<i64> {
            self.requests.lock().unwrap().iter().map(|r| r.offset).collect()
        }
    }

    #[async_trait]
    impl UpdateSource for ScriptedSource {
        async fn get_updates(&self, request: &GetUpdates) -> Result<UpdateBatch> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => {
                    self.stop.cancel();
                    Ok(UpdateBatch::default())
                },
            }
        }

        async fn set_webhook(&self, _: &WebhookRegistration) -> Result<()> {
            Ok(())
        }

        async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<()> {
            self.deletes.lock().unwrap().push(drop_pending_updates);
            Ok(())
        }
    }

    fn update(id: i64, text: &str) -> Update {
        serde_json::from_value(json!({
            "update_id": id,
            "message": {
                "message_id": id,
                "chat": {"id": 1, "type": "private"},
                "text": text
            }
        }))
        .unwrap()
    }

    fn batch(ids: &[i64]) -> Result<UpdateBatch> {
        Ok(ids.iter().map(|&id| update(id, "hi")).collect::<Vec<_>>().into())
    }

    fn recording_router(seen: &Arc<Mutex<Vec<i64>>>) -> Router {
        let seen = Arc::clone(seen);
        Router::builder()
            .any(handler_fn(move |cx| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().unwrap().push(cx.update_id());
                    if cx.text() == Some("fail") {
                        return Err(courier_routing::Error::message("handler failed"));
                    }
                    Ok(())
                })
            }))
            .build()
    }

    fn poller(source: Arc<ScriptedSource>, router: Router) -> Poller {
        let config = PollerConfig {
            timeout_secs: 0,
            backoff: BackoffConfig {
                initial_ms: 100,
                max_ms: 1_000,
                jitter: 0.0,
            },
            ..PollerConfig::default()
        };
        Poller::new(source, Arc::new(NoopClient), router, config)
    }

    #[tokio::test]
    async fn offset_advances_past_each_batch() {
        let stop = CancellationToken::new();
        let source = ScriptedSource::new(&stop, vec![batch(&[5, 6, 7]), batch(&[8])]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut poller = poller(source.clone(), recording_router(&seen));

        poller.run(stop).await.unwrap();

        assert_eq!(source.offsets(), vec![0, 8, 9]);
        assert_eq!(*seen.lock().unwrap(), vec![5, 6, 7, 8]);
        assert_eq!(poller.offset(), 9);
        assert_eq!(*poller.subscribe().borrow(), PollerState::Stopped);
        assert_eq!(*source.deletes.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn handler_error_is_reported_and_batch_continues() {
        let stop = CancellationToken::new();
        let script = vec![Ok(vec![update(5, "ok"), update(6, "fail"), update(7, "ok")].into())];
        let source = ScriptedSource::new(&stop, script);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reports = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&reports);
        let sink = sink_fn(move |r: &ErrorReport<'_>| {
            captured.lock().unwrap().push((r.origin, r.stage, r.update_id));
        });
        let mut poller =
            poller(source.clone(), recording_router(&seen)).with_error_sink(Arc::new(sink));

        poller.run(stop).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![5, 6, 7]);
        assert_eq!(*reports.lock().unwrap(), vec![(Origin::Polling, Stage::Handler, 6)]);
        assert_eq!(source.offsets(), vec![0, 8]);
    }

    #[tokio::test]
    async fn restart_redelivers_at_most_the_last_batch() {
        // A second run that starts from a stale offset gets 7 again but never
        // skips 8.
        let stop = CancellationToken::new();
        let source = ScriptedSource::new(&stop, vec![batch(&[7, 8])]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut poller = poller(source.clone(), recording_router(&seen)).with_offset(7);

        poller.run(stop).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
        assert_eq!(source.offsets(), vec![7, 9]);
    }

    #[tokio::test]
    async fn ids_below_offset_are_skipped() {
        let stop = CancellationToken::new();
        let source = ScriptedSource::new(&stop, vec![batch(&[9, 10, 11])]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut poller = poller(source.clone(), recording_router(&seen)).with_offset(10);

        poller.run(stop).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![10, 11]);
        assert_eq!(poller.offset(), 12);
    }

    #[tokio::test]
    async fn malformed_entries_still_move_the_offset() {
        let stop = CancellationToken::new();
        let script = vec![Ok(UpdateBatch {
            updates: vec![update(3, "hi")],
            last_update_id: Some(4),
        })];
        let source = ScriptedSource::new(&stop, script);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut poller = poller(source.clone(), recording_router(&seen));

        poller.run(stop).await.unwrap();

        assert_eq!(source.offsets(), vec![0, 5]);
    }

    #[tokio::test]
    async fn stop_mid_batch_finishes_the_batch_and_commits_the_offset() {
        let stop = CancellationToken::new();
        let source = ScriptedSource::new(&stop, vec![batch(&[5, 6, 7]), batch(&[8])]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let router = {
            let seen = Arc::clone(&seen);
            let stop = stop.clone();
            Router::builder()
                .any(handler_fn(move |cx| {
                    let seen = Arc::clone(&seen);
                    let stop = stop.clone();
                    Box::pin(async move {
                        if cx.update_id() == 6 {
                            stop.cancel();
                        }
                        seen.lock().unwrap().push(cx.update_id());
                        Ok(())
                    })
                }))
                .build()
        };
        let mut poller = poller(source.clone(), router);

        poller.run(stop).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![5, 6, 7]);
        assert_eq!(poller.offset(), 8);
        assert_eq!(source.offsets(), vec![0]);
        assert_eq!(*poller.subscribe().borrow(), PollerState::Stopped);
    }

    /// Long poll that never answers.
    #[derive(Default)]
    struct HangingSource {
        requests: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl UpdateSource for HangingSource {
        async fn get_updates(&self, request: &GetUpdates) -> Result<UpdateBatch> {
            self.requests.lock().unwrap().push(request.offset);
            std::future::pending().await
        }

        async fn set_webhook(&self, _: &WebhookRegistration) -> Result<()> {
            Ok(())
        }

        async fn delete_webhook(&self, _: bool) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_during_long_poll_keeps_the_offset() {
        let source = Arc::new(HangingSource::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut poller = Poller::new(
            source.clone(),
            Arc::new(NoopClient),
            recording_router(&seen),
            PollerConfig::default(),
        )
        .with_offset(4);

        let stop = CancellationToken::new();
        let canceller = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                stop.cancel();
            })
        };
        tokio::time::timeout(Duration::from_secs(5), poller.run(stop))
            .await
            .unwrap()
            .unwrap();
        canceller.await.unwrap();

        assert_eq!(*source.requests.lock().unwrap(), vec![4]);
        assert_eq!(poller.offset(), 4);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_is_terminal() {
        let stop = CancellationToken::new();
        let script = vec![
            batch(&[1]),
            Err(Error::Unauthorized {
                description: "Unauthorized".into(),
            }),
        ];
        let source = ScriptedSource::new(&stop, script);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut poller = poller(source.clone(), recording_router(&seen));
        let state = poller.subscribe();

        let err = poller.run(stop.clone()).await.unwrap_err();

        assert!(matches!(err, Error::Unauthorized { .. }));
        assert!(!stop.is_cancelled());
        assert_eq!(*state.borrow(), PollerState::Stopped);
        assert_eq!(source.offsets(), vec![0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_and_retry() {
        let stop = CancellationToken::new();
        let script = vec![
            Err(Error::Api {
                code: 502,
                description: "Bad Gateway".into(),
            }),
            Err(Error::message("connection reset")),
            Err(Error::RetryAfter {
                after: Duration::from_secs(3),
            }),
            batch(&[1]),
        ];
        let source = ScriptedSource::new(&stop, script);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut poller = poller(source.clone(), recording_router(&seen));

        let started = tokio::time::Instant::now();
        poller.run(stop).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(source.offsets(), vec![0, 0, 0, 0, 2]);
        // 100ms + 200ms backoff, then the server-requested 3s.
        assert_eq!(started.elapsed(), Duration::from_millis(3_300));
    }

    #[tokio::test]
    async fn stop_before_start_issues_no_fetch() {
        let stop = CancellationToken::new();
        stop.cancel();
        let source = ScriptedSource::new(&stop, vec![batch(&[1])]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut poller = poller(source.clone(), recording_router(&seen));

        poller.run(stop).await.unwrap();

        assert!(source.offsets().is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn spawn_returns_join_handle() {
        let stop = CancellationToken::new();
        let source = ScriptedSource::new(&stop, vec![batch(&[1, 2])]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut config = PollerConfig {
            timeout_secs: 0,
            drop_pending_updates: true,
            ..PollerConfig::default()
        };
        config.backoff.jitter = 0.0;
        let poller = Poller::new(
            source.clone(),
            Arc::new(NoopClient),
            recording_router(&seen),
            config,
        );

        poller.spawn(stop).await.unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(*source.deletes.lock().unwrap(), vec![true]);
    }
}
