//! Ticket system client (§6): a GraphQL-shaped API, consumed only at the
//! logical fields the core needs — item id, name, description, column
//! values, creator identity, updates. Wire shapes stay in this module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInfo {
    pub item_id: String,
    pub name: String,
    pub description: String,
    pub repository_url: Option<String>,
    pub base_branch: Option<String>,
    pub status_label: Option<String>,
    pub creator_id: Option<String>,
    pub creator_name: Option<String>,
    pub creator_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub update_id: String,
    pub body: String,
    pub creator_id: Option<String>,
    pub creator_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TicketSystemError {
    #[error("ticket system request failed: {0}")]
    Request(String),
    #[error("item not found: {0}")]
    NotFound(String),
}

pub type TicketResult<T> = Result<T, TicketSystemError>;

/// Operations used per §6: `get_item_info`, `get_item_updates`,
/// `update_item_status`, `add_comment`, `change_column_value`.
#[async_trait]
pub trait TicketSystemClient: Send + Sync {
    async fn get_item_info(&self, item_id: &str) -> TicketResult<ItemInfo>;
    async fn get_item_updates(&self, item_id: &str) -> TicketResult<Vec<ItemUpdate>>;
    async fn update_item_status(&self, item_id: &str, status_label: &str) -> TicketResult<()>;
    async fn add_comment(&self, item_id: &str, body: &str) -> TicketResult<()>;
    async fn change_column_value(&self, item_id: &str, column_id: &str, value: &Value) -> TicketResult<()>;
}

pub struct GraphQlTicketClient {
    http: reqwest::Client,
    endpoint: String,
    api_token: String,
}

impl GraphQlTicketClient {
    pub fn new(endpoint: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_token: api_token.into(),
        }
    }

    async fn execute(&self, query: &str, variables: Value) -> TicketResult<Value> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", &self.api_token)
            .json(&json!({"query": query, "variables": variables}))
            .send()
            .await
            .map_err(|e| TicketSystemError::Request(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| TicketSystemError::Request(e.to_string()))
    }
}

#[async_trait]
impl TicketSystemClient for GraphQlTicketClient {
    async fn get_item_info(&self, item_id: &str) -> TicketResult<ItemInfo> {
        let query = "query($id: [ID!]) { items(ids: $id) { id name column_values { id text } } }";
        let response = self.execute(query, json!({"id": [item_id]})).await?;
        let item = response["data"]["items"]
            .get(0)
            .ok_or_else(|| TicketSystemError::NotFound(item_id.to_string()))?;
        Ok(ItemInfo {
            item_id: item_id.to_string(),
            name: item["name"].as_str().unwrap_or_default().to_string(),
            description: item["description"].as_str().unwrap_or_default().to_string(),
            repository_url: item["repository_url"].as_str().map(str::to_string),
            base_branch: item["base_branch"].as_str().map(str::to_string),
            status_label: item["status"].as_str().map(str::to_string),
            creator_id: item["creator_id"].as_str().map(str::to_string),
            creator_name: item["creator_name"].as_str().map(str::to_string),
            creator_email: item["creator_email"].as_str().map(str::to_string),
        })
    }

    async fn get_item_updates(&self, item_id: &str) -> TicketResult<Vec<ItemUpdate>> {
        let query = "query($id: [ID!]) { items(ids: $id) { updates { id body creator { id name } } } }";
        let response = self.execute(query, json!({"id": [item_id]})).await?;
        let updates = response["data"]["items"][0]["updates"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(updates
            .into_iter()
            .map(|u| ItemUpdate {
                update_id: u["id"].as_str().unwrap_or_default().to_string(),
                body: u["body"].as_str().unwrap_or_default().to_string(),
                creator_id: u["creator"]["id"].as_str().map(str::to_string),
                creator_name: u["creator"]["name"].as_str().map(str::to_string),
            })
            .collect())
    }

    async fn update_item_status(&self, item_id: &str, status_label: &str) -> TicketResult<()> {
        let mutation = "mutation($id: ID!, $label: String!) { change_simple_column_value(item_id: $id, column_id: \"status\", value: $label) { id } }";
        self.execute(mutation, json!({"id": item_id, "label": status_label})).await?;
        Ok(())
    }

    async fn add_comment(&self, item_id: &str, body: &str) -> TicketResult<()> {
        let mutation = "mutation($id: ID!, $body: String!) { create_update(item_id: $id, body: $body) { id } }";
        self.execute(mutation, json!({"id": item_id, "body": body})).await?;
        Ok(())
    }

    async fn change_column_value(&self, item_id: &str, column_id: &str, value: &Value) -> TicketResult<()> {
        let mutation = "mutation($id: ID!, $column: String!, $value: JSON!) { change_column_value(item_id: $id, column_id: $column, value: $value) { id } }";
        self.execute(mutation, json!({"id": item_id, "column": column_id, "value": value}))
            .await?;
        Ok(())
    }
}
