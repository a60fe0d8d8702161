//! Capabilities the engine needs from the orchestration API.
//!
//! The engine never talks HTTP itself. Any binding that implements these
//! traits can drive a recycle run; the CLI ships a REST one and the tests use
//! an in-memory cluster.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

use crate::error::ClientError;
use crate::model::{Machine, Metadata, Node, Template};

/// Raw chunks of a workload migration progress stream.
pub type MoveStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Read-only view of pool membership.
#[async_trait]
pub trait PoolDirectory: Send + Sync {
    /// Nodes whose metadata binds them to `pool`, in API order.
    async fn list_nodes(&self, pool: &str) -> Result<Vec<Node>, ClientError>;

    /// Templates bound to `pool`, in API order.
    async fn list_templates(&self, pool: &str) -> Result<Vec<Template>, ClientError>;

    /// Current metadata of a pool member.
    async fn node_metadata(&self, pool: &str, node: &Node) -> Result<Metadata, ClientError> {
        let host = node.host();
        self.list_nodes(pool)
            .await?
            .into_iter()
            .find(|candidate| candidate.host() == host)
            .map(|found| found.metadata)
            .ok_or_else(|| ClientError::NodeNotFound(node.address.clone()))
    }
}

/// Node creation, registration and infrastructure teardown.
///
/// Implementations wait for asynchronous remote completion before returning.
#[async_trait]
pub trait NodeLifecycle: Send + Sync {
    /// Provision a machine from `template` and register it as a node.
    async fn create_node(&self, template: &str) -> Result<(), ClientError>;

    /// Register an existing node at `endpoint` with the given metadata.
    async fn register_node(&self, endpoint: &str, metadata: &Metadata) -> Result<(), ClientError>;

    /// Deregister a node; with `destroy_machine` the backing machine goes too.
    async fn remove_node(&self, address: &str, destroy_machine: bool) -> Result<(), ClientError>;

    async fn list_machines(&self) -> Result<Vec<Machine>, ClientError>;

    async fn delete_machine(&self, machine_id: &str) -> Result<(), ClientError>;
}

/// Moves running workloads between nodes.
#[async_trait]
pub trait WorkloadMigrator: Send + Sync {
    /// Start moving everything on `source` to `destination`.
    ///
    /// Each call opens a fresh stream; streams are consumed once.
    async fn move_workloads(&self, source: &str, destination: &str)
        -> Result<MoveStream, ClientError>;
}

/// Per-pool switch of the automated node-healing subsystem.
#[async_trait]
pub trait HealingControl: Send + Sync {
    /// Pool-specific override: `None` when the pool inherits the default.
    async fn healing_override(&self, pool: &str) -> Result<Option<bool>, ClientError>;

    async fn set_healing(&self, pool: &str, enabled: bool) -> Result<(), ClientError>;

    /// Drop the pool-specific override.
    async fn clear_healing(&self, pool: &str) -> Result<(), ClientError>;
}

/// Everything a recycle run needs.
pub trait ClusterApi: PoolDirectory + NodeLifecycle + WorkloadMigrator + HealingControl {}

impl<T> ClusterApi for T where T: PoolDirectory + NodeLifecycle + WorkloadMigrator + HealingControl {}
