//! Single observation path for handler-side failures.
//!
//! Both acquisition paths (polling and webhook) and the session middleware
//! report through an [`ErrorSink`], so application code watches one place.

use std::fmt;

use tracing::error;

use crate::error::Error;

/// Which acquisition path produced the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Polling,
    Webhook,
    /// Dispatched by hand (tests, replays).
    Direct,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Polling => "polling",
            Self::Webhook => "webhook",
            Self::Direct => "direct",
        })
    }
}

/// Where in the handling scope the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The matched handler (or a middleware before it) returned an error.
    Handler,
    /// Persisting session state after the handler returned failed.
    SessionSave,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handler => "handler",
            Self::SessionSave => "session_save",
        })
    }
}

#[derive(Debug)]
pub struct ErrorReport<'a> {
    pub origin: Origin,
    pub stage: Stage,
    pub update_id: i64,
    pub error: &'a Error,
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, report: &ErrorReport<'_>);
}

/// Default sink: one structured `error!` event per report.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, report: &ErrorReport<'_>) {
        error!(
            origin = %report.origin,
            stage = %report.stage,
            update_id = report.update_id,
            error = %report.error,
            "update handling failed"
        );
    }
}

struct FnSink<F>(F);

impl<F> ErrorSink for FnSink<F>
where
    F: Fn(&ErrorReport<'_>) + Send + Sync,
{
    fn report(&self, report: &ErrorReport<'_>) {
        (self.0)(report)
    }
}

/// Build a sink from a closure.
pub fn sink_fn<F>(f: F) -> impl ErrorSink
where
    F: Fn(&ErrorReport<'_>) + Send + Sync,
{
    FnSink(f)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::{Arc, Mutex},
    };

    #[test]
    fn closure_sink_receives_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink = sink_fn(move |r: &ErrorReport<'_>| {
            captured
                .lock()
                .unwrap()
                .push((r.origin, r.stage, r.update_id, r.error.to_string()));
        });

        let err = Error::message("boom");
        sink.report(&ErrorReport {
            origin: Origin::Webhook,
            stage: Stage::Handler,
            update_id: 9,
            error: &err,
        });

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[(Origin::Webhook, Stage::Handler, 9, "boom".to_string())]
        );
    }

    #[test]
    fn display_names() {
        assert_eq!(Origin::Polling.to_string(), "polling");
        assert_eq!(Stage::SessionSave.to_string(), "session_save");
    }
}
