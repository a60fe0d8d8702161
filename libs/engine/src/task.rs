//! Per-node recycle state machine.

use serde::Serialize;
use tracing::{debug, warn};

use crate::model::{Metadata, Node};

/// Where a node stands in its recycle.
///
/// ```text
/// Pending -> DestCreated -> SourceDeregistered -> Migrated -> [Destroyed] -> Done
///               |                 |
///               +-----------------+--> Restored   (source re-registered)
/// any non-terminal state --> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    DestCreated,
    SourceDeregistered,
    Migrated,
    Destroyed,
    Done,
    Restored,
    Failed,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Restored | Self::Failed)
    }

    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;

        match (self, next) {
            (state, Failed) => !state.is_terminal(),
            (Pending, DestCreated) => true,
            (DestCreated, SourceDeregistered) => true,
            (DestCreated | SourceDeregistered, Restored) => true,
            (SourceDeregistered, Migrated) => true,
            (Migrated, Destroyed) => true,
            (Migrated | Destroyed, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::DestCreated => "dest_created",
            Self::SourceDeregistered => "source_deregistered",
            Self::Migrated => "migrated",
            Self::Destroyed => "destroyed",
            Self::Done => "done",
            Self::Restored => "restored",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Final classification of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Compensated,
    Failed,
    /// The task has not reached a terminal state.
    Unfinished,
}

/// Attempts spent per sub-operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Attempts {
    pub creation: u32,
    pub removal: u32,
    pub migration: u32,
}

/// Recycle of a single source node.
#[derive(Debug, Clone)]
pub struct RecycleTask {
    /// Position of the source node in the work-list.
    pub position: usize,
    pub source: Node,
    pub template: String,
    pub destination: Option<Node>,
    /// The destination is a member of the pool.
    pub destination_registered: bool,
    /// Source metadata captured before deregistration.
    pub captured: Option<Metadata>,
    pub attempts: Attempts,
    state: NodeState,
    machine_destroyed: bool,
}

impl RecycleTask {
    pub fn new(position: usize, source: Node, template: impl Into<String>) -> Self {
        Self {
            position,
            source,
            template: template.into(),
            destination: None,
            destination_registered: false,
            captured: None,
            attempts: Attempts::default(),
            state: NodeState::Pending,
            machine_destroyed: false,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn advance(&mut self, next: NodeState) {
        if !self.state.can_transition_to(next) {
            warn!(
                node = %self.source.host(),
                from = %self.state,
                to = %next,
                "Unexpected recycle state transition"
            );
        }
        debug!(node = %self.source.host(), from = %self.state, to = %next, "Recycle state");
        if next == NodeState::Destroyed {
            self.machine_destroyed = true;
        }
        self.state = next;
    }

    /// Record the replacement. Pre-provisioned spares arrive out of the pool.
    pub fn destination_created(&mut self, destination: Node, registered: bool) {
        self.destination = Some(destination);
        self.destination_registered = registered;
        self.advance(NodeState::DestCreated);
    }

    pub fn outcome(&self) -> TaskOutcome {
        match self.state {
            NodeState::Done => TaskOutcome::Succeeded,
            NodeState::Restored => TaskOutcome::Compensated,
            NodeState::Failed => TaskOutcome::Failed,
            _ => TaskOutcome::Unfinished,
        }
    }

    pub fn report(&self) -> TaskReport {
        TaskReport {
            source: self.source.address.clone(),
            destination: self.destination.as_ref().map(|node| node.address.clone()),
            template: self.template.clone(),
            machine_destroyed: self.machine_destroyed,
            state: self.state,
            outcome: self.outcome(),
            attempts: self.attempts,
        }
    }
}

/// Serializable summary of a finished task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub source: String,
    pub destination: Option<String>,
    pub template: String,
    pub machine_destroyed: bool,
    pub state: NodeState,
    pub outcome: TaskOutcome,
    pub attempts: Attempts,
}
