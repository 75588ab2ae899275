//! Thin typed client for the subset of the Elasticsearch-compatible cluster HTTP
//! API this tool needs. No ES SDK exists anywhere in the crates this port
//! draws from, so this speaks plain HTTP/JSON via `reqwest`, the way
//! `ccheney-reflex` talks to its own backend.

use serde_json::Value;
use tracing::debug;

use crate::error::{DeepfreezeError, Result};

#[derive(Clone)]
pub struct ClusterClient {
    http: reqwest::Client,
    base_url: String,
}

impl ClusterClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(key) = api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            let mut value = reqwest::header::HeaderValue::from_str(&format!("ApiKey {key}"))
                .map_err(|e| DeepfreezeError::InvalidConfig(format!("invalid API key: {e}")))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        let http = builder
            .build()
            .map_err(|e| DeepfreezeError::ClusterError(e.to_string()))?;
        Ok(ClusterClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get(&self, path: &str) -> Result<Option<Value>> {
        debug!(path, "cluster GET");
        let resp = self.http.get(self.url(path)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.json().await?))
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        debug!(path, "cluster PUT");
        let resp = self
            .http
            .put(self.url(path))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        debug!(path, "cluster POST");
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        debug!(path, "cluster DELETE");
        let resp = self.http.delete(self.url(path)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }

    pub async fn head_exists(&self, path: &str) -> Result<bool> {
        let resp = self.http.head(self.url(path)).send().await?;
        Ok(resp.status().is_success())
    }

    // --- snapshot repositories ---

    pub async fn get_repository(&self, name: &str) -> Result<Option<Value>> {
        self.get(&format!("_snapshot/{name}")).await
    }

    pub async fn get_all_repositories(&self) -> Result<Value> {
        Ok(self.get("_snapshot").await?.unwrap_or_else(|| Value::Object(Default::default())))
    }

    pub async fn create_repository(&self, name: &str, body: &Value) -> Result<()> {
        self.put(&format!("_snapshot/{name}"), body).await?;
        Ok(())
    }

    pub async fn delete_repository(&self, name: &str) -> Result<()> {
        self.delete(&format!("_snapshot/{name}")).await
    }

    pub async fn get_snapshots(&self, repo: &str) -> Result<Value> {
        self.get(&format!("_snapshot/{repo}/_all"))
            .await
            .map(|v| v.unwrap_or_else(|| Value::Object(Default::default())))
    }

    // --- indices ---

    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        self.head_exists(index).await
    }

    pub async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        self.put(index, body).await?;
        Ok(())
    }

    pub async fn delete_index(&self, index: &str) -> Result<()> {
        self.delete(index).await
    }

    pub async fn index_settings(&self, index: &str) -> Result<Option<Value>> {
        self.get(&format!("{index}/_settings")).await
    }

    pub async fn cluster_health(&self, index: Option<&str>) -> Result<Value> {
        let path = match index {
            Some(idx) => format!("_cluster/health/{idx}?level=indices"),
            None => "_cluster/health".to_string(),
        };
        Ok(self.get(&path).await?.unwrap_or_default())
    }

    pub async fn cluster_info(&self) -> Result<Value> {
        Ok(self.get("").await?.unwrap_or_default())
    }

    pub async fn nodes_plugins(&self) -> Result<Value> {
        Ok(self
            .get("_nodes/_all/plugins")
            .await?
            .unwrap_or_default())
    }

    // --- lifecycle ---

    pub async fn get_lifecycle(&self) -> Result<Value> {
        Ok(self
            .get("_ilm/policy")
            .await?
            .unwrap_or_else(|| Value::Object(Default::default())))
    }

    pub async fn put_lifecycle(&self, name: &str, body: &Value) -> Result<()> {
        self.put(&format!("_ilm/policy/{name}"), body).await?;
        Ok(())
    }

    pub async fn delete_lifecycle(&self, name: &str) -> Result<()> {
        self.delete(&format!("_ilm/policy/{name}")).await
    }

    // --- templates ---

    pub async fn get_index_templates(&self) -> Result<Value> {
        Ok(self
            .get("_index_template")
            .await?
            .unwrap_or_else(|| Value::Object(Default::default())))
    }

    pub async fn put_index_template(&self, name: &str, body: &Value) -> Result<()> {
        self.put(&format!("_index_template/{name}"), body).await?;
        Ok(())
    }

    pub async fn get_legacy_templates(&self) -> Result<Value> {
        Ok(self
            .get("_template")
            .await?
            .unwrap_or_else(|| Value::Object(Default::default())))
    }

    pub async fn put_legacy_template(&self, name: &str, body: &Value) -> Result<()> {
        self.put(&format!("_template/{name}"), body).await?;
        Ok(())
    }

    // --- data streams ---

    pub async fn get_data_stream(&self, name: &str) -> Result<Option<Value>> {
        self.get(&format!("_data_stream/{name}")).await
    }

    pub async fn modify_data_stream(&self, body: &Value) -> Result<()> {
        self.post("_data_stream/_modify", body).await?;
        Ok(())
    }

    // --- searchable snapshots ---

    pub async fn mount_snapshot(&self, repo: &str, snapshot: &str, body: &Value) -> Result<()> {
        self.post(&format!("_snapshot/{repo}/{snapshot}/_mount"), body)
            .await?;
        Ok(())
    }

    // --- search ---

    pub async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        self.post(&format!("{index}/_search"), body).await
    }

    pub async fn doc_index(&self, index: &str, id: &str, body: &Value) -> Result<()> {
        self.put(&format!("{index}/_doc/{id}"), body).await?;
        Ok(())
    }

    pub async fn doc_get(&self, index: &str, id: &str) -> Result<Option<Value>> {
        self.get(&format!("{index}/_doc/{id}")).await
    }
}
