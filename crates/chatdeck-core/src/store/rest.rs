use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use tracing::{debug, info, warn};

use super::RecordStore;
use crate::error::{PersistenceError, StoreResult};
use crate::state::{Message, Role};

pub const DEFAULT_TABLE: &str = "messages";

/// Rows asked for per id-listing request
const ID_PAGE_SIZE: usize = 1000;

#[derive(Serialize)]
struct NewRow<'a> {
    conv_id: &'a str,
    role: &'a str,
    content: &'a str,
    timestamp: i64,
    incomplete: bool,
}

#[derive(Deserialize)]
struct MessageRow {
    role: String,
    content: String,
    timestamp: i64,
    #[serde(default)]
    incomplete: bool,
}

#[derive(Deserialize)]
struct IdRow {
    conv_id: String,
}

/// Record store backed by a PostgREST-style HTTP table (e.g. Supabase).
///
/// Expects a `messages` table with columns
/// `conv_id, role, content, timestamp, incomplete` plus a serial `id`.
#[derive(Clone)]
pub struct RestRecordStore {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl RestRecordStore {
    pub fn new(base_url: &str, api_key: &str, table: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
            api_key: api_key.to_string(),
        }
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Record store rejected request");
        Err(PersistenceError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn insert_message(&self, conv_id: &str, message: &Message) -> StoreResult<()> {
        let row = NewRow {
            conv_id,
            role: message.role.as_str(),
            content: &message.content,
            timestamp: message.timestamp,
            incomplete: message.incomplete,
        };

        let response = self
            .authed(self.client.post(&self.endpoint))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_messages(&self, conv_id: &str) -> StoreResult<Vec<Message>> {
        let response = self
            .authed(self.client.get(&self.endpoint))
            .query(&[
                ("select", "role,content,timestamp,incomplete".to_string()),
                ("conv_id", format!("eq.{}", conv_id)),
                ("order", "timestamp.asc,id.asc".to_string()),
            ])
            .send()
            .await?;

        let rows: Vec<MessageRow> = Self::check(response).await?.json().await?;
        debug!(conv_id, rows = rows.len(), "Fetched conversation rows");

        Ok(rows
            .into_iter()
            .filter_map(|row| match row.role.parse::<Role>() {
                Ok(role) => Some(Message {
                    role,
                    content: row.content,
                    timestamp: row.timestamp,
                    incomplete: row.incomplete,
                }),
                Err(e) => {
                    warn!(conv_id, error = %e, "Skipping row");
                    None
                }
            })
            .collect())
    }

    /// One `conv_id` per row comes back, so the table is read page by page
    async fn conversation_ids(&self) -> StoreResult<BTreeSet<String>> {
        collect_pages(|offset| async move {
            let response = self
                .authed(self.client.get(&self.endpoint))
                .query(&id_page_query(offset, ID_PAGE_SIZE))
                .send()
                .await?;
            let rows: Vec<IdRow> = Self::check(response).await?.json().await?;
            Ok::<Vec<String>, PersistenceError>(rows.into_iter().map(|r| r.conv_id).collect())
        })
        .await
    }

    async fn delete_conversation(&self, conv_id: &str) -> StoreResult<()> {
        let response = self
            .authed(self.client.delete(&self.endpoint))
            .query(&[("conv_id", format!("eq.{}", conv_id))])
            .send()
            .await?;
        Self::check(response).await?;
        info!(conv_id, "Deleted conversation rows");
        Ok(())
    }

    /// A single filtered PATCH, which PostgREST applies in one statement
    async fn rename_conversation(&self, old_id: &str, new_id: &str) -> StoreResult<()> {
        let response = self
            .authed(self.client.patch(&self.endpoint))
            .query(&[("conv_id", format!("eq.{}", old_id))])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "conv_id": new_id }))
            .send()
            .await?;
        Self::check(response).await?;
        info!(old_id, new_id, "Renamed conversation");
        Ok(())
    }
}

fn id_page_query(offset: usize, limit: usize) -> [(&'static str, String); 4] {
    [
        ("select", "conv_id".to_string()),
        ("order", "id.asc".to_string()),
        ("limit", limit.to_string()),
        ("offset", offset.to_string()),
    ]
}

/// Fetch pages until an empty one. Offsets advance by what actually came
/// back, so a server-side row cap below the requested limit loses nothing.
async fn collect_pages<F, Fut>(mut fetch: F) -> StoreResult<BTreeSet<String>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = StoreResult<Vec<String>>>,
{
    let mut ids = BTreeSet::new();
    let mut offset = 0;
    loop {
        let page = fetch(offset).await?;
        if page.is_empty() {
            break;
        }
        offset += page.len();
        ids.extend(page);
    }
    debug!(rows = offset, conversations = ids.len(), "Listed conversation ids");
    Ok(ids)
}
