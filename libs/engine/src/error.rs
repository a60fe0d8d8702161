//! Error taxonomy for recycle runs.

use thiserror::Error;

/// Failure of a single remote call against the orchestration API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The API answered with a non-success status.
    #[error("API returned {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// An asynchronous operation finished with an error on the remote side.
    #[error("remote operation {kind} failed: {message}")]
    Remote { kind: String, message: String },

    /// The node is not known to the API.
    #[error("node {0} not found")]
    NodeNotFound(String),

    /// No infrastructure machine backs the given address.
    #[error("no machine found with address {0}")]
    MachineNotFound(String),
}

impl ClientError {
    /// Wrap a transport-level failure from any HTTP stack.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Coarse classification used to decide between compensation and propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Directory,
    Creation,
    Removal,
    Registration,
    Migration,
    Destroy,
    HealthGate,
    Cancelled,
}

/// Why a workload migration gave up.
#[derive(Debug, Error)]
pub enum MigrationFailure {
    /// The progress stream ended without a single message.
    #[error("migration stream returned no messages")]
    EmptyStream,

    /// Error messages kept coming after every retry.
    #[error("errors persisted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// The progress stream was not valid JSON past its preamble.
    #[error("malformed progress stream: {0}")]
    Malformed(String),

    /// The last attempt could not reach the API.
    #[error("last attempt failed: {0}")]
    Client(#[source] ClientError),
}

/// Errors surfaced by a recycle run.
#[derive(Debug, Error)]
pub enum RecycleError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("pool {pool} has no machine templates")]
    NoTemplates { pool: String },

    #[error("failed to read pool state: {0}")]
    Directory(#[source] ClientError),

    #[error("failed to create node from template {template} after {attempts} attempts: {reason}")]
    Creation {
        template: String,
        attempts: u32,
        reason: String,
    },

    #[error("failed to remove node {node} from pool: {source}")]
    Removal {
        node: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to register node {node}: {source}")]
    Registration {
        node: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to move workloads from {source_node} to {destination}: {reason}")]
    Migration {
        source_node: String,
        destination: String,
        #[source]
        reason: MigrationFailure,
    },

    #[error("failed to destroy machine of node {node}: {source}")]
    Destroy {
        node: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to toggle node healing for pool {pool}: {source}")]
    HealthGate {
        pool: String,
        #[source]
        source: ClientError,
    },

    #[error("recycle of node {node} cancelled")]
    Cancelled { node: String },

    /// A failure after the source left its pool, and the attempt to put it back.
    #[error("{error}; node {node} {}", restoration(.restored))]
    Compensated {
        node: String,
        restored: bool,
        #[source]
        error: Box<RecycleError>,
    },
}

fn restoration(restored: &bool) -> &'static str {
    if *restored {
        "was restored to its pool"
    } else {
        "could not be restored to its pool"
    }
}

impl RecycleError {
    /// Kind of the underlying failure; compensation does not change it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compensated { error, .. } => error.kind(),
            Self::Configuration(_) | Self::NoTemplates { .. } => ErrorKind::Configuration,
            Self::Directory(_) => ErrorKind::Directory,
            Self::Creation { .. } => ErrorKind::Creation,
            Self::Removal { .. } => ErrorKind::Removal,
            Self::Registration { .. } => ErrorKind::Registration,
            Self::Migration { .. } => ErrorKind::Migration,
            Self::Destroy { .. } => ErrorKind::Destroy,
            Self::HealthGate { .. } => ErrorKind::HealthGate,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// The failure itself, looking through compensation.
    pub fn root(&self) -> &RecycleError {
        match self {
            Self::Compensated { error, .. } => error.root(),
            other => other,
        }
    }

    /// Whether compensation put the source node back: `None` if none was attempted.
    pub fn source_restored(&self) -> Option<bool> {
        match self {
            Self::Compensated { restored, .. } => Some(*restored),
            _ => None,
        }
    }

    /// Whether the source node must be re-registered before this error propagates.
    pub fn needs_compensation(&self) -> bool {
        if matches!(self, Self::Compensated { .. }) {
            return false;
        }
        matches!(
            self.kind(),
            ErrorKind::Removal
                | ErrorKind::Registration
                | ErrorKind::Migration
                | ErrorKind::Cancelled
        )
    }
}
