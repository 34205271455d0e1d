//! The contract between the scheduler and the work it runs.
//!
//! A handler receives a [`RunContext`] and a [`Reporter`]. It may report any
//! number of progress notes and errors, and finishes by calling
//! [`Reporter::done`]. `done` consumes the reporter, so a dispatch can signal
//! completion at most once; if the reporter is dropped instead (early return,
//! panic, forgotten call) the scheduler treats the closed stream as Done.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Per-dispatch context handed to [`Handler::exec`].
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Name the job was registered under.
    pub job: String,
    /// Fresh identifier for this dispatch; also recorded on `span`.
    pub trace_id: String,
    /// The dispatch span. Enter it (or `.instrument` with it) so handler log
    /// lines carry the job name and trace id.
    pub span: tracing::Span,
}

/// One item of a handler's event stream.
#[derive(Debug)]
pub enum HandlerEvent {
    Progress(String),
    Error(anyhow::Error),
    Done,
}

/// Sending half of a handler's event stream.
#[derive(Debug)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<HandlerEvent>,
}

impl Reporter {
    /// Create a reporter and the receiver the completion supervisor reads.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HandlerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn progress(&self, msg: impl Into<String>) {
        let _ = self.tx.send(HandlerEvent::Progress(msg.into()));
    }

    /// Report a non-fatal error. The dispatch keeps running.
    pub fn error(&self, err: impl Into<anyhow::Error>) {
        let _ = self.tx.send(HandlerEvent::Error(err.into()));
    }

    /// Signal completion. Errors must be reported before this call.
    pub fn done(self) {
        let _ = self.tx.send(HandlerEvent::Done);
    }
}

/// Work run by a scheduled job.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn exec(&self, ctx: RunContext, reporter: Reporter);
}

/// Adapter turning an async closure into a [`Handler`].
///
/// An `Err` is reported on the error stream, then Done is signalled.
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn exec(&self, ctx: RunContext, reporter: Reporter) {
        if let Err(e) = (self.f)(ctx).await {
            reporter.error(e);
        }
        reporter.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RunContext {
        RunContext {
            job: "test".into(),
            trace_id: "h-1-5yc1s".into(),
            span: tracing::Span::none(),
        }
    }

    #[tokio::test]
    async fn fn_handler_reports_error_then_done() {
        let h = handler_fn(|_ctx| async { Err::<(), _>(anyhow::anyhow!("boom")) });
        let (reporter, mut rx) = Reporter::channel();
        h.exec(ctx(), reporter).await;

        assert!(matches!(rx.recv().await, Some(HandlerEvent::Error(e)) if e.to_string() == "boom"));
        assert!(matches!(rx.recv().await, Some(HandlerEvent::Done)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_reporter_closes_stream() {
        let (reporter, mut rx) = Reporter::channel();
        reporter.progress("half way");
        drop(reporter);
        assert!(matches!(rx.recv().await, Some(HandlerEvent::Progress(m)) if m == "half way"));
        assert!(rx.recv().await.is_none());
    }
}
