//! Rolling replacement of every node in a pool.
//!
//! For each node of the pool, in the order the API lists them:
//!
//! 1. obtain a destination node (created now, or popped from the
//!    pre-provisioned queue),
//! 2. capture the source node's metadata,
//! 3. deregister the source node from the pool,
//! 4. register the destination into the pool (pre-provision only),
//! 5. move the source node's workloads to the destination,
//! 6. optionally destroy the source node's machine.
//!
//! A failure in steps 3-5, or a cancellation while they run, re-registers the
//! source node with its captured metadata before the error propagates and
//! aborts the rest of the run.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::client::ClusterApi;
use crate::error::{ClientError, RecycleError};
use crate::health_gate::HealthGate;
use crate::migrate::move_workloads;
use crate::model::{created_node, CreatedNode, Node, Template, TemplateCursor};
use crate::progress::{ProgressSink, Sleeper, TokioSleeper};
use crate::retry::{retry, RetryPolicy};
use crate::task::{NodeState, RecycleTask, TaskReport};

/// Default retry bound for every operation.
pub const DEFAULT_MAX_RETRY: u32 = 10;

/// Default wait between node removal and migration retries.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Default wait between node creation retries.
pub const DEFAULT_CREATION_RETRY_INTERVAL: Duration = Duration::from_secs(180);

/// Default port of a node's container runtime endpoint.
pub const DEFAULT_REGISTRATION_PORT: u16 = 4243;

/// Default scheme of a node's container runtime endpoint.
pub const DEFAULT_REGISTRATION_SCHEME: &str = "http";

/// Options of a single recycle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecycleOptions {
    /// Destroy the machine backing each old node once its workloads moved.
    pub destroy_old_nodes: bool,

    /// Print the plan without mutating anything.
    pub dry_run: bool,

    pub max_retry: u32,

    /// Wait between node removal and workload migration retries.
    pub retry_interval: Duration,

    /// Wait between node creation retries.
    pub creation_retry_interval: Duration,

    /// Create every replacement before touching any source node.
    pub pre_provision: bool,

    pub registration_port: u16,

    pub registration_scheme: String,

    /// Disable node healing for the pool while the run mutates it.
    pub suspend_healing: bool,
}

impl Default for RecycleOptions {
    fn default() -> Self {
        Self {
            destroy_old_nodes: false,
            dry_run: false,
            max_retry: DEFAULT_MAX_RETRY,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            creation_retry_interval: DEFAULT_CREATION_RETRY_INTERVAL,
            pre_provision: false,
            registration_port: DEFAULT_REGISTRATION_PORT,
            registration_scheme: DEFAULT_REGISTRATION_SCHEME.to_string(),
            suspend_healing: true,
        }
    }
}

impl RecycleOptions {
    fn creation_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry, self.creation_retry_interval)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry, self.retry_interval)
    }
}

/// What a run did, node by node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecycleReport {
    pub pool: String,
    pub dry_run: bool,
    pub tasks: Vec<TaskReport>,
}

/// A creation attempt that did not yield exactly one new node.
#[derive(Debug, Error)]
enum CreateAttemptError {
    #[error("expected exactly one new node, found {0}")]
    Indeterminate(usize),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Replacement created ahead of time.
struct Spare {
    node: Node,
    /// Still a pool member, i.e. deregistration has not happened yet.
    registered: bool,
}

/// Drives recycle runs against a cluster.
pub struct Recycler {
    api: Arc<dyn ClusterApi>,
    sink: Arc<dyn ProgressSink>,
    sleeper: Arc<dyn Sleeper>,
    cancel: watch::Receiver<bool>,
}

impl Recycler {
    pub fn new(api: Arc<dyn ClusterApi>, sink: Arc<dyn ProgressSink>) -> Self {
        let (_, cancel) = watch::channel(false);
        Self {
            api,
            sink,
            sleeper: Arc::new(TokioSleeper),
            cancel,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Abort the run once `cancel` turns true.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace every node currently in `pool`.
    pub async fn recycle(
        &self,
        pool: &str,
        opts: &RecycleOptions,
    ) -> Result<RecycleReport, RecycleError> {
        let templates = self
            .api
            .list_templates(pool)
            .await
            .map_err(RecycleError::Directory)?;
        let mut cursor = TemplateCursor::new(templates).ok_or_else(|| RecycleError::NoTemplates {
            pool: pool.to_string(),
        })?;

        let nodes = self
            .api
            .list_nodes(pool)
            .await
            .map_err(RecycleError::Directory)?;
        info!(
            pool,
            recycle_len = nodes.len(),
            template_count = cursor.len(),
            dry_run = opts.dry_run,
            pre_provision = opts.pre_provision,
            "Starting pool recycle"
        );

        if opts.dry_run {
            return Ok(self.plan(pool, &nodes, &mut cursor, opts));
        }

        let gate = if opts.suspend_healing {
            Some(HealthGate::engage(&*self.api, pool).await?)
        } else {
            None
        };

        let result = self.run(pool, nodes, cursor, opts).await;

        let released = match gate {
            Some(gate) => gate.release(&*self.api).await,
            None => Ok(()),
        };

        match (result, released) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                error!(pool, error = %release_err, "Failed to restore node healing");
                self.sink
                    .error(&format!("Failed to restore node healing: {release_err}"));
                Err(err)
            }
        }
    }

    /// Print what a run would do, touching nothing.
    fn plan(
        &self,
        pool: &str,
        nodes: &[Node],
        cursor: &mut TemplateCursor,
        opts: &RecycleOptions,
    ) -> RecycleReport {
        let mut tasks = Vec::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            let template = cursor.current().name.clone();
            let host = node.host();
            self.sink.info(&format!(
                "(dry-run) Creating new node on pool \"{pool}\" using template \"{template}\""
            ));
            self.sink.info(&format!(
                "(dry-run) Destination: new node from template \"{template}\" replacing \"{host}\""
            ));
            self.sink
                .info(&format!("(dry-run) Removing node \"{host}\" from pool \"{pool}\""));
            self.sink.info(&format!(
                "(dry-run) Moving all containers from old node \"{host}\" to new node"
            ));
            if opts.destroy_old_nodes {
                self.sink
                    .info(&format!("(dry-run) Destroying machine of node \"{host}\""));
            }
            tasks.push(RecycleTask::new(position, node.clone(), template).report());
            cursor.advance();
        }

        RecycleReport {
            pool: pool.to_string(),
            dry_run: true,
            tasks,
        }
    }

    async fn run(
        &self,
        pool: &str,
        nodes: Vec<Node>,
        mut cursor: TemplateCursor,
        opts: &RecycleOptions,
    ) -> Result<RecycleReport, RecycleError> {
        let mut spares = if opts.pre_provision {
            self.pre_provision(pool, &nodes, cursor.clone(), opts).await?
        } else {
            VecDeque::new()
        };

        let total = nodes.len();
        let mut tasks = Vec::with_capacity(total);
        for (position, source) in nodes.into_iter().enumerate() {
            let mut task = RecycleTask::new(position, source, cursor.current().name.clone());
            self.sink.info(&format!(
                "Recycling node \"{}\" ({}/{})",
                task.source.host(),
                position + 1,
                total
            ));

            let recycled = self
                .recycle_node(pool, &mut task, cursor.current(), &mut spares, opts)
                .await;
            if let Err(err) = recycled {
                error!(
                    pool,
                    node = %task.source.host(),
                    state = %task.state(),
                    error = %err,
                    "Recycle aborted"
                );
                if !spares.is_empty() {
                    let left: Vec<String> = spares.iter().map(Node::host).collect();
                    warn!(pool, spares = ?left, "Pre-provisioned nodes left unused");
                    self.sink.error(&format!(
                        "Pre-provisioned nodes left out of the pool: {}",
                        left.join(", ")
                    ));
                }
                return Err(err);
            }

            tasks.push(task.report());
            cursor.advance();
        }

        info!(pool, recycled = tasks.len(), "Pool recycle finished");
        Ok(RecycleReport {
            pool: pool.to_string(),
            dry_run: false,
            tasks,
        })
    }

    async fn recycle_node(
        &self,
        pool: &str,
        task: &mut RecycleTask,
        template: &Template,
        spares: &mut VecDeque<Node>,
        opts: &RecycleOptions,
    ) -> Result<(), RecycleError> {
        let host = task.source.host();

        let (destination, registered) = match spares.pop_front() {
            Some(spare) => (spare, false),
            None => {
                let created = self
                    .until_cancelled(&host, self.create_node(pool, template, opts))
                    .await;
                match created {
                    Ok((node, attempts)) => {
                        task.attempts.creation = attempts;
                        (node, true)
                    }
                    Err(err) => {
                        task.advance(NodeState::Failed);
                        return Err(err);
                    }
                }
            }
        };
        self.sink.info(&format!(
            "New node \"{}\" ready to replace \"{host}\"",
            destination.host()
        ));
        task.destination_created(destination, registered);

        let metadata = match self.api.node_metadata(pool, &task.source).await {
            Ok(metadata) => metadata,
            Err(err) => {
                reclaim_spare(task, spares);
                task.advance(NodeState::Failed);
                return Err(RecycleError::Directory(err));
            }
        };
        task.captured = Some(metadata);

        let drained = self
            .until_cancelled(&host, self.drain_source(pool, task, opts))
            .await;
        if let Err(err) = drained {
            reclaim_spare(task, spares);
            if !err.needs_compensation() {
                task.advance(NodeState::Failed);
                return Err(err);
            }
            let restored = self.compensate(pool, task, opts).await;
            return Err(RecycleError::Compensated {
                node: host,
                restored,
                error: Box::new(err),
            });
        }

        if opts.destroy_old_nodes {
            self.sink
                .info(&format!("Destroying machine of node \"{host}\""));
            if let Err(source) = self.destroy_machine(&task.source).await {
                task.advance(NodeState::Failed);
                return Err(RecycleError::Destroy { node: host, source });
            }
            task.advance(NodeState::Destroyed);
        }

        task.advance(NodeState::Done);
        info!(
            pool,
            node = %host,
            destination = ?task.destination.as_ref().map(Node::host),
            template = %task.template,
            "Node recycled"
        );
        Ok(())
    }

    /// Deregister the source, admit the destination and move the workloads.
    async fn drain_source(
        &self,
        pool: &str,
        task: &mut RecycleTask,
        opts: &RecycleOptions,
    ) -> Result<(), RecycleError> {
        let source = task.source.clone();
        let destination = task
            .destination
            .clone()
            .ok_or_else(|| RecycleError::Configuration("destination node missing".to_string()))?;

        task.attempts.removal = self.remove_from_pool(pool, &source, opts).await?;
        task.advance(NodeState::SourceDeregistered);

        if opts.pre_provision {
            let endpoint = destination.endpoint(&opts.registration_scheme, opts.registration_port);
            let metadata = task.captured.clone().unwrap_or_default();
            self.sink.info(&format!(
                "Adding node \"{}\" to pool \"{pool}\"",
                destination.host()
            ));
            self.api
                .register_node(&endpoint, &metadata)
                .await
                .map_err(|source| RecycleError::Registration {
                    node: destination.host(),
                    source,
                })?;
            task.destination_registered = true;
        }

        self.sink.info(&format!(
            "Moving all containers from old node \"{}\" to new node \"{}\"",
            source.host(),
            destination.host()
        ));
        let summary = move_workloads(
            &*self.api,
            &*self.sink,
            &*self.sleeper,
            opts.retry_policy(),
            &source.host(),
            &destination.host(),
        )
        .await?;
        task.attempts.migration = summary.attempts;
        task.advance(NodeState::Migrated);
        Ok(())
    }

    /// Put the source node back into its pool. Returns whether it is back;
    /// failures are reported, not raised.
    async fn compensate(&self, pool: &str, task: &mut RecycleTask, opts: &RecycleOptions) -> bool {
        let host = task.source.host();
        let endpoint = task
            .source
            .endpoint(&opts.registration_scheme, opts.registration_port);
        let metadata = task
            .captured
            .clone()
            .unwrap_or_else(|| task.source.metadata.clone());

        self.sink
            .error(&format!("Restoring node \"{host}\" to pool \"{pool}\""));
        match self.api.register_node(&endpoint, &metadata).await {
            Ok(()) => {
                warn!(pool, node = %host, "Source node restored after failure");
                task.advance(NodeState::Restored);
                true
            }
            Err(err) => {
                error!(pool, node = %host, error = %err, "Failed to restore source node");
                self.sink
                    .error(&format!("Failed to restore node \"{host}\": {err}"));
                task.advance(NodeState::Failed);
                false
            }
        }
    }

    /// Create one replacement per source node, each kept out of the pool.
    async fn pre_provision(
        &self,
        pool: &str,
        nodes: &[Node],
        mut cursor: TemplateCursor,
        opts: &RecycleOptions,
    ) -> Result<VecDeque<Node>, RecycleError> {
        let mut created: Vec<Spare> = Vec::with_capacity(nodes.len());
        for source in nodes {
            let step = self
                .until_cancelled(
                    &source.host(),
                    self.provision_spare(pool, cursor.current(), &mut created, opts),
                )
                .await;
            if let Err(err) = step {
                error!(pool, error = %err, created = created.len(), "Pre-provisioning failed");
                self.teardown(&created).await;
                return Err(err);
            }
            cursor.advance();
        }
        info!(pool, count = created.len(), "Replacement nodes pre-provisioned");
        Ok(created.into_iter().map(|spare| spare.node).collect())
    }

    async fn provision_spare(
        &self,
        pool: &str,
        template: &Template,
        created: &mut Vec<Spare>,
        opts: &RecycleOptions,
    ) -> Result<(), RecycleError> {
        let (node, _) = self.create_node(pool, template, opts).await?;
        created.push(Spare {
            node: node.clone(),
            registered: true,
        });
        self.remove_from_pool(pool, &node, opts).await?;
        if let Some(spare) = created.last_mut() {
            spare.registered = false;
        }
        Ok(())
    }

    /// Best-effort destruction of pre-provisioned replacements.
    async fn teardown(&self, created: &[Spare]) {
        for spare in created {
            let host = spare.node.host();
            self.sink
                .error(&format!("Destroying pre-provisioned node \"{host}\""));
            let result = if spare.registered {
                self.api.remove_node(&spare.node.address, true).await
            } else {
                self.destroy_machine(&spare.node).await
            };
            if let Err(err) = result {
                warn!(node = %host, error = %err, "Failed to destroy pre-provisioned node");
            }
        }
    }

    /// Create a node from `template` and identify it by set difference.
    async fn create_node(
        &self,
        pool: &str,
        template: &Template,
        opts: &RecycleOptions,
    ) -> Result<(Node, u32), RecycleError> {
        self.sink.info(&format!(
            "Creating new node on pool \"{pool}\" using template \"{}\"",
            template.name
        ));
        info!(pool, template = %template.name, iaas = ?template.iaas, "Creating node");
        let name = template.name.as_str();

        retry(
            opts.creation_policy(),
            &*self.sleeper,
            "node.create",
            |attempt| async move {
                self.create_attempt(pool, name)
                    .await
                    .map(|node| (node, attempt + 1))
            },
        )
        .await
        .map_err(|exhausted| RecycleError::Creation {
            template: name.to_string(),
            attempts: exhausted.attempts,
            reason: exhausted.last.to_string(),
        })
    }

    async fn create_attempt(&self, pool: &str, template: &str) -> Result<Node, CreateAttemptError> {
        let before = self.api.list_nodes(pool).await?;
        self.api.create_node(template).await?;
        let after = self.api.list_nodes(pool).await?;
        match created_node(&before, &after) {
            CreatedNode::Found(node) => Ok(node),
            CreatedNode::Indeterminate(count) => {
                warn!(pool, template, new_nodes = count, "Cannot identify created node");
                Err(CreateAttemptError::Indeterminate(count))
            }
        }
    }

    /// Deregister `node` from the pool without touching its machine.
    async fn remove_from_pool(
        &self,
        pool: &str,
        node: &Node,
        opts: &RecycleOptions,
    ) -> Result<u32, RecycleError> {
        self.sink.info(&format!(
            "Removing node \"{}\" from pool \"{pool}\"",
            node.host()
        ));
        let address = node.address.as_str();

        retry(
            opts.retry_policy(),
            &*self.sleeper,
            "node.remove",
            |attempt| async move {
                self.api
                    .remove_node(address, false)
                    .await
                    .map(|()| attempt + 1)
            },
        )
        .await
        .map_err(|exhausted| RecycleError::Removal {
            node: node.host(),
            source: exhausted.last,
        })
    }

    /// Delete the machine whose address matches the node's host.
    async fn destroy_machine(&self, node: &Node) -> Result<(), ClientError> {
        let host = node.host();
        let machine = self
            .api
            .list_machines()
            .await?
            .into_iter()
            .find(|machine| machine.host() == host)
            .ok_or_else(|| ClientError::MachineNotFound(host.clone()))?;

        self.api.delete_machine(&machine.id).await?;
        info!(node = %host, machine_id = %machine.id, iaas = ?machine.iaas, "Machine destroyed");
        Ok(())
    }

    /// Run `fut` unless the run is cancelled first.
    async fn until_cancelled<T, F>(&self, node: &str, fut: F) -> Result<T, RecycleError>
    where
        F: Future<Output = Result<T, RecycleError>>,
    {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                warn!(node, "Cancellation requested");
                Err(RecycleError::Cancelled { node: node.to_string() })
            }
            result = fut => result,
        }
    }
}

/// Hand an unregistered spare back to the queue so the abort report lists it.
fn reclaim_spare(task: &RecycleTask, spares: &mut VecDeque<Node>) {
    if task.destination_registered {
        return;
    }
    if let Some(destination) = &task.destination {
        spares.push_front(destination.clone());
    }
}

/// Resolves once the flag is true; never if the sender goes away first.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
