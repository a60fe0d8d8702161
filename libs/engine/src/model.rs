//! Pool, node, template and machine types.
//!
//! Nodes are identified by their normalized host: the API may report the same
//! node as `http://10.0.0.1:4243`, `10.0.0.1:4243` or `10.0.0.1` depending on
//! which subsystem produced the record.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::Url;

/// Metadata key binding nodes and templates to a pool.
pub const POOL_KEY: &str = "pool";

/// Ordered key/value metadata attached to a node.
pub type Metadata = BTreeMap<String, String>;

/// Reduce a hostname, `host:port` pair, IP literal or URL to its bare host.
pub fn normalize_host(address: &str) -> String {
    let trimmed = address.trim();
    let parsed = if trimmed.contains("://") {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("http://{trimmed}"))
    };

    match parsed.ok().and_then(|url| url.host_str().map(str::to_string)) {
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string(),
        None => trimmed.to_string(),
    }
}

/// A node registered in the orchestration API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Address as recorded by the API.
    pub address: String,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Node {
    pub fn new(address: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            address: address.into(),
            metadata,
        }
    }

    /// Bare host used for every node comparison.
    pub fn host(&self) -> String {
        normalize_host(&self.address)
    }

    /// Pool this node belongs to, if any.
    pub fn pool(&self) -> Option<&str> {
        self.metadata.get(POOL_KEY).map(String::as_str)
    }

    /// Address the node must be registered at.
    ///
    /// Recorded URLs are kept as-is; bare hosts get the given scheme and port.
    pub fn endpoint(&self, scheme: &str, port: u16) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("{}://{}:{}", scheme, format_host(&self.host()), port)
        }
    }
}

fn format_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// A provisioning profile bound to a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,

    /// Name of the infrastructure provider the template provisions on.
    #[serde(default)]
    pub iaas: Option<String>,

    #[serde(default)]
    pub data: Vec<(String, String)>,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iaas: None,
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.push((key.into(), value.into()));
        self
    }

    /// Whether the template provisions nodes for `pool`.
    pub fn binds_pool(&self, pool: &str) -> bool {
        self.data
            .iter()
            .any(|(key, value)| key == POOL_KEY && value == pool)
    }
}

/// A virtual machine provisioned by the infrastructure layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub address: String,

    #[serde(default)]
    pub iaas: Option<String>,
}

impl Machine {
    pub fn host(&self) -> String {
        normalize_host(&self.address)
    }
}

/// Deterministic template assignment over the pool's template list.
///
/// The Nth node processed uses `templates[N mod len]`.
#[derive(Debug, Clone)]
pub struct TemplateCursor {
    templates: Vec<Template>,
    index: usize,
}

impl TemplateCursor {
    /// Returns `None` for an empty list: there is nothing to provision from.
    pub fn new(templates: Vec<Template>) -> Option<Self> {
        if templates.is_empty() {
            return None;
        }
        Some(Self {
            templates,
            index: 0,
        })
    }

    pub fn current(&self) -> &Template {
        &self.templates[self.index]
    }

    pub(crate) fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.templates.len();
    }
}

/// Nodes present in `after` but not in `before`, compared by host.
pub fn new_nodes(before: &[Node], after: &[Node]) -> Vec<Node> {
    let known: BTreeSet<String> = before.iter().map(Node::host).collect();
    let mut seen = BTreeSet::new();
    after
        .iter()
        .filter(|node| {
            let host = node.host();
            !known.contains(&host) && seen.insert(host)
        })
        .cloned()
        .collect()
}

/// Outcome of looking for the node a creation call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatedNode {
    Found(Node),
    /// Zero or several new nodes appeared; the creation cannot be attributed.
    Indeterminate(usize),
}

/// Identify the single node a creation call added.
pub fn created_node(before: &[Node], after: &[Node]) -> CreatedNode {
    let mut added = new_nodes(before, after);
    if added.len() == 1 {
        CreatedNode::Found(added.remove(0))
    } else {
        CreatedNode::Indeterminate(added.len())
    }
}
