//! In-memory cluster for driving the engine in tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use pool_recycle_engine::{
    normalize_host, ClientError, HealingControl, Machine, Metadata, MoveStream, Node,
    NodeLifecycle, PoolDirectory, ProgressSink, Sleeper, Template, WorkloadMigrator,
};

/// A call the engine made against the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListNodes,
    ListTemplates,
    CreateNode(String),
    RegisterNode { endpoint: String, metadata: Metadata },
    RemoveNode { address: String, destroy: bool },
    ListMachines,
    DeleteMachine(String),
    MoveWorkloads { source: String, destination: String },
    HealingOverride,
    SetHealing(bool),
    ClearHealing,
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::ListNodes | Call::ListTemplates | Call::ListMachines | Call::HealingOverride
        )
    }
}

/// Scripted behavior of one `create_node` call.
#[derive(Debug, Clone)]
pub enum CreateScript {
    Succeed,
    /// The call succeeds but no node shows up.
    Vanish,
    Fail,
}

/// Scripted behavior of one `move_workloads` call.
#[derive(Debug, Clone)]
pub enum MoveScript {
    /// Stream these chunks, then end.
    Chunks(Vec<String>),
    /// The call itself fails.
    Fail,
    /// Trigger cancellation and never finish.
    CancelAndHang,
}

impl MoveScript {
    /// Stream one JSON message per entry.
    pub fn messages(messages: &[&str]) -> Self {
        Self::Chunks(
            messages
                .iter()
                .map(|message| serde_json::json!({ "Message": message }).to_string())
                .collect(),
        )
    }
}

struct State {
    nodes: Vec<Node>,
    templates: Vec<Template>,
    machines: Vec<Machine>,
    healing: Option<bool>,
    calls: Vec<Call>,
    created: u32,
    create_scripts: VecDeque<CreateScript>,
    move_scripts: HashMap<String, VecDeque<MoveScript>>,
    remove_failures: HashMap<String, u32>,
    register_failures: u32,
    delete_failures: u32,
    /// Healing writes allowed before every further one fails.
    healing_write_budget: Option<u32>,
}

pub struct FakeCluster {
    pool: String,
    state: Mutex<State>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
}

impl FakeCluster {
    /// Pool with the given member hosts, each backed by a machine.
    pub fn new(pool: &str, hosts: &[&str], templates: &[&str]) -> Self {
        let metadata = pool_metadata(pool);
        Self {
            pool: pool.to_string(),
            state: Mutex::new(State {
                nodes: hosts
                    .iter()
                    .map(|host| Node::new(*host, metadata.clone()))
                    .collect(),
                templates: templates
                    .iter()
                    .map(|name| Template::new(*name).with_data("pool", pool))
                    .collect(),
                machines: hosts.iter().map(|host| machine_for(host)).collect(),
                healing: Some(true),
                calls: Vec::new(),
                created: 0,
                create_scripts: VecDeque::new(),
                move_scripts: HashMap::new(),
                remove_failures: HashMap::new(),
                register_failures: 0,
                delete_failures: 0,
                healing_write_budget: None,
            }),
            cancel: Mutex::new(None),
        }
    }

    pub fn with_healing(self, healing: Option<bool>) -> Self {
        self.state.lock().unwrap().healing = healing;
        self
    }

    pub fn with_node_metadata(self, host: &str, key: &str, value: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(node) = state.nodes.iter_mut().find(|node| node.host() == host) {
                node.metadata.insert(key.to_string(), value.to_string());
            }
        }
        self
    }

    pub fn script_create(&self, script: CreateScript) {
        self.state.lock().unwrap().create_scripts.push_back(script);
    }

    pub fn script_move(&self, source: &str, script: MoveScript) {
        self.state
            .lock()
            .unwrap()
            .move_scripts
            .entry(source.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn fail_removal(&self, host: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .remove_failures
            .insert(host.to_string(), times);
    }

    pub fn fail_registrations(&self, times: u32) {
        self.state.lock().unwrap().register_failures = times;
    }

    pub fn fail_machine_deletes(&self, times: u32) {
        self.state.lock().unwrap().delete_failures = times;
    }

    /// Let `allowed` healing writes through, then fail the rest.
    pub fn fail_healing_writes_after(&self, allowed: u32) {
        self.state.lock().unwrap().healing_write_budget = Some(allowed);
    }

    pub fn remove_machine(&self, host: &str) {
        self.state
            .lock()
            .unwrap()
            .machines
            .retain(|machine| machine.host() != host);
    }

    pub fn cancel_with(&self, sender: watch::Sender<bool>) {
        *self.cancel.lock().unwrap() = Some(sender);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn pool_hosts(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .iter()
            .map(Node::host)
            .collect()
    }

    pub fn machine_hosts(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .machines
            .iter()
            .map(Machine::host)
            .collect()
    }

    pub fn healing(&self) -> Option<bool> {
        self.state.lock().unwrap().healing
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

pub fn pool_metadata(pool: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("pool".to_string(), pool.to_string());
    metadata
}

fn machine_for(host: &str) -> Machine {
    Machine {
        id: format!("machine-{host}"),
        address: host.to_string(),
        iaas: Some("fake".to_string()),
    }
}

/// Host of the Nth node the fake creates, counting from one.
pub fn created_host(n: u32) -> String {
    format!("10.9.0.{n}")
}

#[async_trait]
impl PoolDirectory for FakeCluster {
    async fn list_nodes(&self, pool: &str) -> Result<Vec<Node>, ClientError> {
        self.record(Call::ListNodes);
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .iter()
            .filter(|node| node.pool() == Some(pool))
            .cloned()
            .collect())
    }

    async fn list_templates(&self, pool: &str) -> Result<Vec<Template>, ClientError> {
        self.record(Call::ListTemplates);
        let state = self.state.lock().unwrap();
        Ok(state
            .templates
            .iter()
            .filter(|template| template.binds_pool(pool))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NodeLifecycle for FakeCluster {
    async fn create_node(&self, template: &str) -> Result<(), ClientError> {
        self.record(Call::CreateNode(template.to_string()));
        let mut state = self.state.lock().unwrap();
        match state.create_scripts.pop_front() {
            Some(CreateScript::Fail) => Err(ClientError::Http {
                status: 500,
                message: "iaas quota exceeded".to_string(),
            }),
            Some(CreateScript::Vanish) => Ok(()),
            Some(CreateScript::Succeed) | None => {
                state.created += 1;
                let host = created_host(state.created);
                state.machines.push(machine_for(&host));
                let mut metadata = pool_metadata(&self.pool);
                metadata.insert("template".to_string(), template.to_string());
                state
                    .nodes
                    .push(Node::new(format!("http://{host}:4243"), metadata));
                Ok(())
            }
        }
    }

    async fn register_node(&self, endpoint: &str, metadata: &Metadata) -> Result<(), ClientError> {
        self.record(Call::RegisterNode {
            endpoint: endpoint.to_string(),
            metadata: metadata.clone(),
        });
        let mut state = self.state.lock().unwrap();
        if state.register_failures > 0 {
            state.register_failures -= 1;
            return Err(ClientError::Http {
                status: 500,
                message: "registration refused".to_string(),
            });
        }
        state.nodes.push(Node::new(endpoint, metadata.clone()));
        Ok(())
    }

    async fn remove_node(&self, address: &str, destroy_machine: bool) -> Result<(), ClientError> {
        self.record(Call::RemoveNode {
            address: address.to_string(),
            destroy: destroy_machine,
        });
        let host = normalize_host(address);
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.remove_failures.get_mut(&host) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::Remote {
                    kind: "node.delete".to_string(),
                    message: "node is busy".to_string(),
                });
            }
        }
        let before = state.nodes.len();
        state.nodes.retain(|node| node.host() != host);
        if state.nodes.len() == before {
            return Err(ClientError::NodeNotFound(address.to_string()));
        }
        if destroy_machine {
            state.machines.retain(|machine| machine.host() != host);
        }
        Ok(())
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, ClientError> {
        self.record(Call::ListMachines);
        Ok(self.state.lock().unwrap().machines.clone())
    }

    async fn delete_machine(&self, machine_id: &str) -> Result<(), ClientError> {
        self.record(Call::DeleteMachine(machine_id.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.delete_failures > 0 {
            state.delete_failures -= 1;
            return Err(ClientError::Http {
                status: 500,
                message: "iaas unavailable".to_string(),
            });
        }
        state.machines.retain(|machine| machine.id != machine_id);
        Ok(())
    }
}

#[async_trait]
impl WorkloadMigrator for FakeCluster {
    async fn move_workloads(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<MoveStream, ClientError> {
        self.record(Call::MoveWorkloads {
            source: source.to_string(),
            destination: destination.to_string(),
        });
        let script = self
            .state
            .lock()
            .unwrap()
            .move_scripts
            .get_mut(source)
            .and_then(VecDeque::pop_front);

        match script {
            None => {
                let message =
                    format!("Moving all units from {source} to {destination}\n");
                Ok(chunk_stream(vec![
                    serde_json::json!({ "Message": message }).to_string()
                ]))
            }
            Some(MoveScript::Chunks(chunks)) => Ok(chunk_stream(chunks)),
            Some(MoveScript::Fail) => Err(ClientError::Http {
                status: 502,
                message: "bad gateway".to_string(),
            }),
            Some(MoveScript::CancelAndHang) => {
                if let Some(sender) = self.cancel.lock().unwrap().as_ref() {
                    let _ = sender.send(true);
                }
                Ok(Box::pin(futures_util::stream::pending::<
                    Result<Bytes, ClientError>,
                >()))
            }
        }
    }
}

fn chunk_stream(chunks: Vec<String>) -> MoveStream {
    Box::pin(futures_util::stream::iter(
        chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))),
    ))
}

#[async_trait]
impl HealingControl for FakeCluster {
    async fn healing_override(&self, _pool: &str) -> Result<Option<bool>, ClientError> {
        self.record(Call::HealingOverride);
        Ok(self.state.lock().unwrap().healing)
    }

    async fn set_healing(&self, _pool: &str, enabled: bool) -> Result<(), ClientError> {
        self.record(Call::SetHealing(enabled));
        let mut state = self.state.lock().unwrap();
        spend_healing_write(&mut state)?;
        state.healing = Some(enabled);
        Ok(())
    }

    async fn clear_healing(&self, _pool: &str) -> Result<(), ClientError> {
        self.record(Call::ClearHealing);
        let mut state = self.state.lock().unwrap();
        spend_healing_write(&mut state)?;
        state.healing = None;
        Ok(())
    }
}

fn spend_healing_write(state: &mut State) -> Result<(), ClientError> {
    match state.healing_write_budget.as_mut() {
        Some(0) => Err(ClientError::Http {
            status: 503,
            message: "healing config unavailable".to_string(),
        }),
        Some(budget) => {
            *budget -= 1;
            Ok(())
        }
        None => Ok(()),
    }
}

/// A progress line and the stream it went to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Out(String),
    Err(String),
}

#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<Line>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<Line> {
        self.lines.lock().unwrap().clone()
    }

    pub fn stdout(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                Line::Out(text) => Some(text),
                Line::Err(_) => None,
            })
            .collect()
    }

    pub fn stderr(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                Line::Err(text) => Some(text),
                Line::Out(_) => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn info(&self, line: &str) {
        self.lines.lock().unwrap().push(Line::Out(line.to_string()));
    }

    fn error(&self, line: &str) {
        self.lines.lock().unwrap().push(Line::Err(line.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

/// Everything a test needs to drive and inspect a run.
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub sink: Arc<RecordingSink>,
    pub sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    pub fn new(cluster: FakeCluster) -> Self {
        Self {
            cluster: Arc::new(cluster),
            sink: Arc::new(RecordingSink::default()),
            sleeper: Arc::new(RecordingSleeper::default()),
        }
    }

    pub fn recycler(&self) -> pool_recycle_engine::Recycler {
        pool_recycle_engine::Recycler::new(self.cluster.clone(), self.sink.clone())
            .with_sleeper(self.sleeper.clone())
    }
}
