//! State store (C2): the `deepfreeze-status` index. Three document shapes
//! (`settings`, `repository`, `thaw_request`) discriminated by `doctype`, grounded
//! in `utilities.py`'s `ensure_settings_index`/`get_settings`/`save_settings`/
//! `get_repository`/`get_all_repos`/`get_matching_repos`/`find_repos_by_date_range`/
//! `save_thaw_request`/`get_thaw_request`/`list_thaw_requests`/`update_thaw_request`.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{DeepfreezeError, Result};
use crate::es::ClusterClient;
use crate::models::{Repository, SETTINGS_ID, Settings, STATUS_INDEX, ThawRequest, ThawRequestStatus};

pub struct StateStore {
    es: ClusterClient,
}

impl StateStore {
    pub fn new(es: ClusterClient) -> Self {
        StateStore { es }
    }

    pub async fn status_index_exists(&self) -> Result<bool> {
        self.es.index_exists(STATUS_INDEX).await
    }

    pub async fn ensure_status_index(&self, create_if_missing: bool) -> Result<()> {
        if self.status_index_exists().await? {
            return Ok(());
        }
        if !create_if_missing {
            return Err(DeepfreezeError::MissingIndex);
        }
        self.es
            .create_index(
                STATUS_INDEX,
                &json!({
                    "mappings": {
                        "properties": {
                            "doctype": { "type": "keyword" },
                            "name": { "type": "keyword" },
                        }
                    }
                }),
            )
            .await
    }

    pub async fn get_settings(&self) -> Result<Settings> {
        match self.es.doc_get(STATUS_INDEX, SETTINGS_ID).await? {
            Some(doc) => {
                let source = doc.get("_source").cloned().unwrap_or(doc);
                Settings::from_map(source)
            }
            None => Err(DeepfreezeError::MissingSettings),
        }
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.es
            .doc_index(STATUS_INDEX, SETTINGS_ID, &settings.to_document())
            .await
    }

    /// Pure lookup; if no document exists yet, returns a bare in-memory record
    /// (no write), matching `get_repository`'s "default construct if absent".
    pub async fn get_repository(&self, name: &str) -> Result<Repository> {
        let hit = self.find_repository_doc(name).await?;
        match hit {
            Some((docid, source)) => Repository::from_document(docid, source),
            None => Ok(Repository::new(name, "", "")),
        }
    }

    async fn find_repository_doc(&self, name: &str) -> Result<Option<(String, Value)>> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "doctype": "repository" } },
                        { "term": { "name.keyword": name } },
                    ]
                }
            },
            "size": 1,
        });
        let resp = self.es.search(STATUS_INDEX, &body).await?;
        Ok(first_hit(&resp))
    }

    pub async fn persist_repository(&self, repo: &mut Repository) -> Result<()> {
        let docid = repo
            .docid
            .clone()
            .unwrap_or_else(|| format!("repo-{}", Uuid::new_v4()));
        self.es.doc_index(STATUS_INDEX, &docid, &repo.to_document()).await?;
        repo.docid = Some(docid);
        Ok(())
    }

    pub async fn all_repositories(&self, prefix: Option<&str>, mounted: Option<bool>) -> Result<Vec<Repository>> {
        let mut must = vec![json!({ "term": { "doctype": "repository" } })];
        if let Some(p) = prefix {
            must.push(json!({ "prefix": { "name": p } }));
        }
        if let Some(m) = mounted {
            must.push(json!({ "term": { "is_mounted": m } }));
        }
        let body = json!({ "query": { "bool": { "must": must } }, "size": 10000 });
        let resp = self.es.search(STATUS_INDEX, &body).await?;
        hits_to_repositories(&resp)
    }

    pub async fn find_repositories_overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Repository>> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "doctype": "repository" } },
                        { "range": { "start": { "lte": end.to_rfc3339() } } },
                        { "range": { "end": { "gte": start.to_rfc3339() } } },
                    ]
                }
            },
            "size": 10000,
        });
        let resp = self.es.search(STATUS_INDEX, &body).await?;
        hits_to_repositories(&resp)
    }

    pub async fn get_repositories_by_names(&self, names: &[String]) -> Result<Vec<Repository>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "term": { "doctype": "repository" } },
                        { "terms": { "name.keyword": names } },
                    ]
                }
            },
            "size": 10000,
        });
        let resp = self.es.search(STATUS_INDEX, &body).await?;
        hits_to_repositories(&resp)
    }

    pub async fn save_thaw_request(&self, request: &ThawRequest) -> Result<()> {
        self.es
            .doc_index(
                STATUS_INDEX,
                &request.request_id.to_string(),
                &request.to_document(),
            )
            .await
    }

    pub async fn get_thaw_request(&self, id: Uuid) -> Result<Option<ThawRequest>> {
        match self.es.doc_get(STATUS_INDEX, &id.to_string()).await? {
            Some(doc) => {
                let source = doc.get("_source").cloned().unwrap_or(doc);
                Ok(Some(ThawRequest::from_document(source)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_thaw_requests(&self) -> Result<Vec<ThawRequest>> {
        let body = json!({
            "query": { "term": { "doctype": "thaw_request" } },
            "size": 10000,
        });
        let resp = self.es.search(STATUS_INDEX, &body).await?;
        let mut out = Vec::new();
        if let Some(hits) = resp.get("hits").and_then(|h| h.get("hits")).and_then(Value::as_array) {
            for hit in hits {
                if let Some(source) = hit.get("_source").cloned() {
                    out.push(ThawRequest::from_document(source)?);
                }
            }
        }
        Ok(out)
    }

    pub async fn update_thaw_request_status(&self, id: Uuid, status: ThawRequestStatus) -> Result<()> {
        if let Some(mut request) = self.get_thaw_request(id).await? {
            request.status = status;
            self.save_thaw_request(&request).await?;
        }
        Ok(())
    }

    pub async fn delete_thaw_request(&self, id: Uuid) -> Result<()> {
        self.es.delete(&format!("{STATUS_INDEX}/_doc/{id}")).await
    }
}

fn first_hit(resp: &Value) -> Option<(String, Value)> {
    resp.get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .and_then(|hits| hits.first())
        .and_then(|hit| {
            let id = hit.get("_id").and_then(Value::as_str)?.to_string();
            let source = hit.get("_source").cloned()?;
            Some((id, source))
        })
}

fn hits_to_repositories(resp: &Value) -> Result<Vec<Repository>> {
    let mut out = Vec::new();
    if let Some(hits) = resp.get("hits").and_then(|h| h.get("hits")).and_then(Value::as_array) {
        for hit in hits {
            let id = hit
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(source) = hit.get("_source").cloned() {
                out.push(Repository::from_document(id, source)?);
            }
        }
    }
    out.sort();
    Ok(out)
}
