//! REST binding of the engine's cluster capabilities.
//!
//! Node creation and removal are asynchronous on the API side: the request
//! returns once the work is queued, and completion shows up on the event feed.
//! Those calls poll the newest event of their kind until it stops running.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use pool_recycle_engine::{
    ClientError, HealingControl, Machine, Metadata, MoveStream, Node, NodeLifecycle,
    PoolDirectory, Template, WorkloadMigrator,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::Config;

const NODE_CREATE_EVENT: &str = "node.create";
const NODE_DELETE_EVENT: &str = "node.delete";

/// API client for the tsuru orchestration API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    event_poll_interval: Duration,
}

impl ApiClient {
    /// Create a new API client from config.
    pub fn new(config: &Config, event_poll_interval: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("bearer {}", config.token))
                .context("Invalid token format")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.target.as_str().trim_end_matches('/').to_string(),
            timeout: config.http_timeout,
            event_poll_interval,
        })
    }

    /// Build a URL for an endpoint.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a bounded request and turn non-success statuses into errors.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(ClientError::transport)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(handle_error(response).await)
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.send(self.client.get(self.url(path))).await?;
        decode(response).await
    }

    /// Block until the newest event of `kind` has finished.
    async fn wait_event(&self, kind: &str, target: Option<&str>) -> Result<(), ClientError> {
        let mut query = vec![("kindname", kind), ("limit", "1")];
        if let Some(target) = target {
            query.push(("target.value", target));
        }

        loop {
            let response = self
                .send(self.client.get(self.url("/events")).query(&query))
                .await?;
            if response.status() == StatusCode::NO_CONTENT {
                return Ok(());
            }

            let body = response.bytes().await.map_err(ClientError::transport)?;
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(());
            }
            let events: Option<Vec<ApiEvent>> =
                serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))?;

            match events.and_then(|events| events.into_iter().next()) {
                None => return Ok(()),
                Some(event) if event.running => {
                    debug!(kind, event_target = ?target, "Waiting for event to finish");
                    tokio::time::sleep(self.event_poll_interval).await;
                }
                Some(event) if !event.error.is_empty() => {
                    return Err(ClientError::Remote {
                        kind: kind.to_string(),
                        message: event.error,
                    });
                }
                Some(_) => return Ok(()),
            }
        }
    }
}

/// Turn an error response into a client error carrying the body text.
async fn handle_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();

    ClientError::Http {
        status,
        message: message.trim().to_string(),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    response
        .json()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))
}

#[async_trait]
impl PoolDirectory for ApiClient {
    async fn list_nodes(&self, pool: &str) -> Result<Vec<Node>, ClientError> {
        let listing: ApiNodeList = self.get("/docker/node").await?;

        Ok(listing
            .nodes
            .unwrap_or_default()
            .into_iter()
            .map(|node| Node::new(node.address, node.metadata.unwrap_or_default()))
            .filter(|node| node.pool() == Some(pool))
            .collect())
    }

    async fn list_templates(&self, pool: &str) -> Result<Vec<Template>, ClientError> {
        let templates: Option<Vec<ApiTemplate>> = self.get("/iaas/templates").await?;

        Ok(templates
            .unwrap_or_default()
            .into_iter()
            .map(ApiTemplate::into_template)
            .filter(|template| template.binds_pool(pool))
            .collect())
    }
}

#[async_trait]
impl NodeLifecycle for ApiClient {
    async fn create_node(&self, template: &str) -> Result<(), ClientError> {
        self.send(
            self.client
                .post(self.url("/docker/node"))
                .query(&[("register", "false")])
                .json(&json!({ "template": template })),
        )
        .await?;

        self.wait_event(NODE_CREATE_EVENT, None).await
    }

    async fn register_node(&self, endpoint: &str, metadata: &Metadata) -> Result<(), ClientError> {
        let mut body: serde_json::Map<String, serde_json::Value> = metadata
            .iter()
            .map(|(key, value)| (key.clone(), json!(value)))
            .collect();
        body.insert("address".to_string(), json!(endpoint));

        self.send(
            self.client
                .post(self.url("/docker/node"))
                .query(&[("register", "true")])
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn remove_node(&self, address: &str, destroy_machine: bool) -> Result<(), ClientError> {
        let remove_iaas = if destroy_machine { "true" } else { "false" };
        self.send(self.client.delete(self.url("/docker/node")).query(&[
            ("address", address),
            ("remove-iaas", remove_iaas),
            ("no-rebalance", "true"),
        ]))
        .await?;

        self.wait_event(NODE_DELETE_EVENT, Some(address)).await
    }

    async fn list_machines(&self) -> Result<Vec<Machine>, ClientError> {
        let machines: Option<Vec<ApiMachine>> = self.get("/iaas/machines").await?;

        Ok(machines
            .unwrap_or_default()
            .into_iter()
            .map(|machine| Machine {
                id: machine.id,
                address: machine.address,
                iaas: machine.iaas,
            })
            .collect())
    }

    async fn delete_machine(&self, machine_id: &str) -> Result<(), ClientError> {
        self.send(
            self.client
                .delete(self.url(&format!("/iaas/machines/{machine_id}"))),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkloadMigrator for ApiClient {
    async fn move_workloads(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<MoveStream, ClientError> {
        // No timeout: the progress stream lives as long as the move does.
        let response = self
            .client
            .post(self.url("/docker/containers/move"))
            .json(&json!({ "from": source, "to": destination }))
            .send()
            .await
            .map_err(ClientError::transport)?;

        if !response.status().is_success() {
            return Err(handle_error(response).await);
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ClientError::transport)),
        ))
    }
}

#[async_trait]
impl HealingControl for ApiClient {
    async fn healing_override(&self, pool: &str) -> Result<Option<bool>, ClientError> {
        let configs: Option<HashMap<String, ApiHealing>> = self.get("/docker/healing/node").await?;

        Ok(configs
            .and_then(|mut configs| configs.remove(pool))
            .filter(|config| !config.enabled_inherited)
            .and_then(|config| config.enabled))
    }

    async fn set_healing(&self, pool: &str, enabled: bool) -> Result<(), ClientError> {
        self.send(
            self.client
                .post(self.url("/docker/healing/node"))
                .json(&json!({ "pool": pool, "Enabled": enabled })),
        )
        .await?;
        Ok(())
    }

    async fn clear_healing(&self, pool: &str) -> Result<(), ClientError> {
        self.send(
            self.client
                .delete(self.url("/docker/healing/node"))
                .query(&[("pool", pool), ("name", "Enabled")]),
        )
        .await?;
        Ok(())
    }
}

/// `GET /docker/node` response. The `machines` section is not used.
#[derive(Debug, Deserialize)]
struct ApiNodeList {
    #[serde(default)]
    nodes: Option<Vec<ApiNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiNode {
    address: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiTemplate {
    name: String,
    #[serde(rename = "IaaSName", default)]
    iaas_name: Option<String>,
    #[serde(default)]
    data: Option<Vec<ApiTemplateItem>>,
}

impl ApiTemplate {
    fn into_template(self) -> Template {
        let mut template = Template::new(self.name);
        template.iaas = self.iaas_name.filter(|name| !name.is_empty());
        for item in self.data.unwrap_or_default() {
            template = template.with_data(item.name, item.value);
        }
        template
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiTemplateItem {
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiMachine {
    id: String,
    #[serde(default)]
    iaas: Option<String>,
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiEvent {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct ApiHealing {
    #[serde(rename = "Enabled", default, deserialize_with = "loose_bool")]
    enabled: Option<bool>,
    #[serde(rename = "EnabledInherited", default)]
    enabled_inherited: bool,
}

/// Accept `true`, `"true"`, `false`, `"false"` and `null`.
fn loose_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Bool(value) => Ok(Some(value)),
        serde_json::Value::String(value) => match value.trim() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(de::Error::custom(format!("invalid boolean {other:?}"))),
        },
        other => Err(de::Error::custom(format!("invalid boolean {other}"))),
    }
}
