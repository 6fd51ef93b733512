//! The phase state machine.
//!
//! Transition decisions are made on a single task that consumes an event
//! channel. Phase work never runs on that task: entering a phase spawns its
//! entry action, which later reports completion or failure as an event.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::phase::{CompletionFlag, Event, Phase, PhaseContext, PhaseKind};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every phase completed.
    Completed,
    /// A phase's entry action failed.
    Failed { phase: String, cause: String },
    /// The run was cancelled through its handle.
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Overall state of a run, as published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// What a front end needs to render the current phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSnapshot {
    pub index: usize,
    pub name: &'static str,
    pub kind: PhaseKind,
    pub total: usize,
    pub completed: bool,
    /// The phase completed and waits for the operator to confirm.
    pub awaiting_confirmation: bool,
    pub status: RunStatus,
}

/// Lets other tasks confirm phases, cancel the run and watch progress.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
    snapshot: watch::Receiver<PhaseSnapshot>,
}

impl OrchestratorHandle {
    /// Confirms the current phase. Ignored unless the phase is awaiting
    /// confirmation.
    pub fn confirm(&self) {
        let _ = self.events.send(Event::Confirm);
    }

    /// Ends the run with [`RunOutcome::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn subscribe(&self) -> watch::Receiver<PhaseSnapshot> {
        self.snapshot.clone()
    }

    pub fn current(&self) -> PhaseSnapshot {
        self.snapshot.borrow().clone()
    }
}

/// Drives a fixed list of phases.
pub struct Orchestrator {
    phases: Vec<Phase>,
    start: usize,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    snapshot_tx: watch::Sender<PhaseSnapshot>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("phases", &self.phases.iter().map(|p| p.name).collect::<Vec<_>>())
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(phases: Vec<Phase>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let initial = Self::snapshot_of(&phases, 0, false, false, RunStatus::Pending);
        let (snapshot_tx, _) = watch::channel(initial);
        Self { phases, start: 0, events_tx, events_rx, snapshot_tx, cancel: CancellationToken::new() }
    }

    /// Starts the run at `index` instead of the first phase.
    #[must_use]
    pub fn starting_at(mut self, index: usize) -> Self {
        self.start = index;
        let status = self.snapshot_tx.borrow().status;
        self.publish(index, false, false, status);
        self
    }

    pub fn start_index(&self) -> usize {
        self.start
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            events: self.events_tx.clone(),
            cancel: self.cancel.clone(),
            snapshot: self.snapshot_tx.subscribe(),
        }
    }

    fn snapshot_of(
        phases: &[Phase],
        index: usize,
        completed: bool,
        awaiting_confirmation: bool,
        status: RunStatus,
    ) -> PhaseSnapshot {
        let (name, kind) = phases.get(index).map_or(("done", PhaseKind::Informational), |p| (p.name, p.kind));
        PhaseSnapshot { index, name, kind, total: phases.len(), completed, awaiting_confirmation, status }
    }

    fn publish(&self, index: usize, completed: bool, awaiting_confirmation: bool, status: RunStatus) {
        let snapshot = Self::snapshot_of(&self.phases, index, completed, awaiting_confirmation, status);
        self.snapshot_tx.send_replace(snapshot);
    }

    /// Runs phases until the last one completes, one fails, or the run is
    /// cancelled. Background phase work is cancelled when this returns.
    pub async fn run(mut self) -> RunOutcome {
        let outcome = self.drive().await;
        self.cancel.cancel();
        outcome
    }

    async fn drive(&mut self) -> RunOutcome {
        let total = self.phases.len();
        let flags: Vec<CompletionFlag> = (0..total).map(|_| CompletionFlag::new()).collect();
        let mut entered = vec![false; total];
        let mut index = self.start;
        let mut confirmed = false;
        let mut announced_wait = false;

        if index > 0 && index < total {
            info!(phase = self.phases[index].name, index, "Resuming run");
        }

        loop {
            if index >= total {
                info!(outcome = "success", phases = total, "All phases completed");
                self.publish(total, true, false, RunStatus::Completed);
                return RunOutcome::Completed;
            }

            if !entered[index] {
                entered[index] = true;
                self.enter(index, &flags[index]);
            }

            let phase = &self.phases[index];
            let completed = flags[index].is_set();
            if completed && (phase.auto_advance || confirmed) {
                info!(phase = phase.name, index, outcome = "success", "Phase completed");
                index += 1;
                confirmed = false;
                announced_wait = false;
                continue;
            }

            let awaiting = completed && !phase.auto_advance;
            if awaiting && !announced_wait {
                info!(phase = phase.name, index, "Phase completed, waiting for operator confirmation");
                announced_wait = true;
            }
            self.publish(index, completed, awaiting, RunStatus::Running);

            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                event = self.events_rx.recv() => event,
            };
            match event {
                Some(Event::Completed(phase)) => debug!(phase, "Completion event"),
                Some(Event::Confirm) if awaiting => {
                    info!(phase = self.phases[index].name, "Operator confirmed phase");
                    confirmed = true;
                }
                Some(Event::Confirm) => {
                    debug!(phase = self.phases[index].name, "Ignoring confirmation, phase is not waiting for one");
                }
                Some(Event::Failed { phase, cause }) => {
                    let name = self.phases.get(phase).map_or("unknown", |p| p.name);
                    error!(phase = name, index = phase, %cause, "Phase failed");
                    self.publish(index, completed, false, RunStatus::Failed);
                    return RunOutcome::Failed { phase: name.to_string(), cause };
                }
                None => {
                    warn!(phase = self.phases[index].name, "Run cancelled");
                    self.publish(index, completed, false, RunStatus::Cancelled);
                    return RunOutcome::Cancelled;
                }
            }
        }
    }

    /// Spawns the entry action of phase `index`.
    fn enter(&self, index: usize, flag: &CompletionFlag) {
        let phase = &self.phases[index];
        info!(phase = phase.name, index, kind = ?phase.kind, "Entering phase");
        let context = PhaseContext::new(
            index,
            phase.name,
            flag.clone(),
            self.events_tx.clone(),
            self.cancel.child_token(),
        );
        let action = Arc::clone(&phase.action);
        tokio::spawn(async move {
            match action.enter(&context).await {
                Ok(()) => context.complete(),
                Err(e) => context.fail(e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::action;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn instant(name: &'static str) -> Phase {
        Phase::new(name, PhaseKind::Background, action(|_| async { Ok(()) }))
    }

    #[tokio::test]
    async fn test_empty_plan_completes() {
        assert_eq!(Orchestrator::new(Vec::new()).run().await, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_entry_action_runs_once_per_phase() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            action(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        let phases = vec![instant("a"), Phase::new("b", PhaseKind::Background, counted), instant("c")];
        assert_eq!(Orchestrator::new(phases).run().await, RunOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_index_skips_earlier_phases() {
        let failing = Phase::new(
            "never",
            PhaseKind::Form,
            action(|_| async { Err(crate::error::OrchestratorError::MissingParams) }),
        );
        let orchestrator = Orchestrator::new(vec![failing, instant("resume-here")]).starting_at(1);
        assert_eq!(orchestrator.handle().current().name, "resume-here");
        assert_eq!(orchestrator.run().await, RunOutcome::Completed);
    }
}
