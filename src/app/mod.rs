mod commands;
mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod tracker;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::{Collaborators, GaitOrchestrator, OrchestratorHandle};
pub use tracker::GaitTracker;
pub use types::{CommandOutcome, OrchestratorCommand, OrchestratorSnapshot, ShutdownReason};
