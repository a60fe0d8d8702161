//! Rolling node replacement for orchestrated container pools.
//!
//! A recycle run replaces every node of a pool with a freshly provisioned one
//! while workloads keep running:
//!
//! - **Orchestrator** ([`Recycler`]): sequences create, deregister, migrate and
//!   destroy per node, with bounded retries and best-effort compensation.
//! - **Migrator** ([`migrate`]): consumes the live progress stream of a
//!   workload move and retries it while it reports errors.
//! - **Health gate** ([`HealthGate`]): keeps automated node healing out of the
//!   way for the duration of the run.
//!
//! The orchestration API itself is abstracted behind the traits in
//! [`client`]; the engine performs no I/O of its own besides sleeping.
//!
//! # Invariants
//!
//! - A node is never removed from its pool before its replacement exists.
//! - Workloads only move to a destination that exists and is addressable.
//! - The Nth node recycled uses template `N mod len(templates)`.
//! - Nodes are processed one at a time, in the order the API lists them.

pub mod client;
pub mod error;
pub mod health_gate;
pub mod migrate;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod stream;
pub mod task;

pub use client::{
    ClusterApi, HealingControl, MoveStream, NodeLifecycle, PoolDirectory, WorkloadMigrator,
};
pub use error::{ClientError, ErrorKind, MigrationFailure, RecycleError};
pub use health_gate::HealthGate;
pub use model::{normalize_host, Machine, Metadata, Node, Template};
pub use orchestrator::{RecycleOptions, RecycleReport, Recycler};
pub use progress::{ProgressSink, Sleeper, TokioSleeper};
pub use retry::RetryPolicy;
pub use task::{NodeState, TaskOutcome, TaskReport};
