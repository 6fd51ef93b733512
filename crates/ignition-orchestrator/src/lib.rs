//! Phase orchestrator for Ignition.
//!
//! An [`Orchestrator`] walks a fixed list of [`Phase`]s. Entering a phase
//! spawns its entry action; the run advances when the phase's completion
//! flag is set and, for phases that ask for it, the operator has confirmed.
//! [`plan`] holds the eight phases of a cluster bootstrap.

pub mod context;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod plan;

pub use context::{AcceptDefaults, BootstrapContext, Collaborators, FormInput};
pub use error::{OrchestratorError, Result};
pub use orchestrator::{Orchestrator, OrchestratorHandle, PhaseSnapshot, RunOutcome, RunStatus};
pub use phase::{CompletionFlag, EntryAction, Phase, PhaseContext, PhaseKind, action};
pub use plan::{WAIT_WORKERS_INDEX, bootstrap_plan, orchestrator_for, resume_index};
