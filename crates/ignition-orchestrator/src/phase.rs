//! Phases and their entry actions.
//!
//! A phase's entry action runs on its own task. It reports back through the
//! [`PhaseContext`] it is handed: finishing successfully sets the phase's
//! completion flag, returning an error reports a failure to the orchestrator.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

/// How a front end presents a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Collects input from the operator.
    Form,
    /// Runs background work and shows progress.
    Background,
    /// Shows instructions.
    Informational,
}

/// A flag that only ever goes from false to true.
#[derive(Debug, Clone, Default)]
pub struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns `true` if this call set it.
    pub fn set(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Messages from phase tasks and front ends to the orchestrator loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    /// A phase's completion flag was set.
    Completed(usize),
    /// The operator confirmed the current phase.
    Confirm,
    /// A phase's entry action failed.
    Failed { phase: usize, cause: String },
}

/// The handle an entry action uses to report on its phase.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    index: usize,
    name: &'static str,
    flag: CompletionFlag,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
}

impl PhaseContext {
    pub(crate) fn new(
        index: usize,
        name: &'static str,
        flag: CompletionFlag,
        events: mpsc::UnboundedSender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self { index, name, flag, events, cancel }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancelled when the run ends, for whatever reason.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Marks the phase completed and wakes the orchestrator.
    pub fn complete(&self) {
        if self.flag.set() {
            debug!(phase = self.name, "Phase flagged complete");
            // The loop is gone once the run has ended; nothing to wake.
            let _ = self.events.send(Event::Completed(self.index));
        }
    }

    /// Reports a fatal failure of the phase.
    pub fn fail(&self, cause: impl fmt::Display) {
        let _ = self.events.send(Event::Failed { phase: self.index, cause: cause.to_string() });
    }
}

/// Work started when a phase is entered.
#[async_trait]
pub trait EntryAction: Send + Sync {
    /// Runs the phase's work. `Ok` completes the phase, `Err` fails the run.
    async fn enter(&self, phase: &PhaseContext) -> Result<()>;
}

/// An [`EntryAction`] built from an async closure.
pub struct FnAction<F>(F);

impl<F> fmt::Debug for FnAction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnAction")
    }
}

#[async_trait]
impl<F, Fut> EntryAction for FnAction<F>
where
    F: Fn(PhaseContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn enter(&self, phase: &PhaseContext) -> Result<()> {
        (self.0)(phase.clone()).await
    }
}

/// Wraps `f` as an entry action.
pub fn action<F, Fut>(f: F) -> Arc<dyn EntryAction>
where
    F: Fn(PhaseContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

/// One step of the run.
#[derive(Clone)]
pub struct Phase {
    pub name: &'static str,
    pub kind: PhaseKind,
    /// Whether the run moves on as soon as the phase completes. When false
    /// the operator must also confirm.
    pub auto_advance: bool,
    pub(crate) action: Arc<dyn EntryAction>,
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("auto_advance", &self.auto_advance)
            .finish_non_exhaustive()
    }
}

impl Phase {
    pub fn new(name: &'static str, kind: PhaseKind, action: Arc<dyn EntryAction>) -> Self {
        Self { name, kind, auto_advance: true, action }
    }

    #[must_use]
    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }

    /// Requires operator confirmation after the phase completes.
    #[must_use]
    pub fn requires_confirmation(self) -> Self {
        self.with_auto_advance(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_flag_sets_once() {
        let flag = CompletionFlag::new();
        let shared = flag.clone();
        assert!(!flag.is_set());
        assert!(shared.set());
        assert!(!flag.set());
        assert!(flag.is_set());
    }

    #[tokio::test]
    async fn test_complete_wakes_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = PhaseContext::new(2, "boot", CompletionFlag::new(), tx, CancellationToken::new());
        ctx.complete();
        ctx.complete();
        ctx.fail("late failure");

        assert_eq!(rx.recv().await, Some(Event::Completed(2)));
        assert_eq!(rx.recv().await, Some(Event::Failed { phase: 2, cause: "late failure".to_string() }));
    }

    #[tokio::test]
    async fn test_fn_action_runs_closure() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = PhaseContext::new(0, "form", CompletionFlag::new(), tx, CancellationToken::new());
        let entry = action(|phase: PhaseContext| async move {
            assert_eq!(phase.name(), "form");
            Ok(())
        });
        assert!(entry.enter(&ctx).await.is_ok());
    }

    #[test]
    fn test_phase_builder() {
        let phase = Phase::new("wait-workers", PhaseKind::Background, action(|_| async { Ok(()) }))
            .requires_confirmation();
        assert!(!phase.auto_advance);
        assert_eq!(phase.kind, PhaseKind::Background);
    }
}
