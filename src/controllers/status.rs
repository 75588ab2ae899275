//! Status reporter (C10). Grounded in
//! `examples/original_source/curator/actions/deepfreeze/status.py`.

use serde_json::Value;

use crate::error::Result;
use crate::es::ClusterClient;
use crate::models::{Repository, Settings, ThawState};
use crate::store::StateStore;

#[derive(Default, Clone, Copy)]
pub struct StatusSections {
    pub repos: bool,
    pub thawed: bool,
    pub buckets: bool,
    pub ilm: bool,
    pub config: bool,
}

impl StatusSections {
    pub fn all() -> Self {
        StatusSections { repos: true, thawed: true, buckets: true, ilm: true, config: true }
    }
    pub fn any_selected(&self) -> bool {
        self.repos || self.thawed || self.buckets || self.ilm || self.config
    }
}

pub struct IlmPolicySummary {
    pub name: String,
    pub repo_name: String,
    pub indices_in_use: usize,
    pub data_streams_in_use: usize,
    pub is_current: bool,
}

pub struct BucketSummary {
    pub bucket: String,
    pub base_path: String,
    pub is_current: bool,
}

pub struct StatusReport {
    pub settings: Option<Settings>,
    pub cluster_name: Option<String>,
    pub repos: Vec<Repository>,
    pub thawed: Vec<Repository>,
    pub buckets: Vec<BucketSummary>,
    pub ilm: Vec<IlmPolicySummary>,
}

pub struct StatusController<'a> {
    es: &'a ClusterClient,
    store: &'a StateStore,
}

impl<'a> StatusController<'a> {
    pub fn new(es: &'a ClusterClient, store: &'a StateStore) -> Self {
        StatusController { es, store }
    }

    pub async fn do_action(&self, sections: StatusSections, limit: Option<usize>) -> Result<StatusReport> {
        let sections = if sections.any_selected() { sections } else { StatusSections::all() };
        let settings = self.store.get_settings().await.ok();

        let all_repos = self.store.all_repositories(None, None).await?;
        let current_repo_name = current_repo_name(&settings, &all_repos);

        let repos = if sections.repos {
            let mut sorted = all_repos.clone();
            sorted.sort_by(|a, b| b.name.cmp(&a.name));
            if let Some(limit) = limit {
                sorted.truncate(limit);
            }
            sorted
        } else {
            Vec::new()
        };

        let thawed = if sections.thawed {
            all_repos
                .iter()
                .filter(|r| matches!(r.thaw_state, ThawState::Thawing | ThawState::Thawed))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let buckets = if sections.buckets {
            bucket_summaries(&all_repos, current_repo_name.as_deref())
        } else {
            Vec::new()
        };

        let ilm = if sections.ilm {
            self.ilm_summaries(&settings, current_repo_name.as_deref()).await?
        } else {
            Vec::new()
        };

        let cluster_name = if sections.config {
            self.es
                .cluster_health(None)
                .await
                .ok()
                .and_then(|v| v.get("cluster_name").and_then(Value::as_str).map(str::to_string))
        } else {
            None
        };

        Ok(StatusReport {
            settings: if sections.config { settings } else { None },
            cluster_name,
            repos,
            thawed,
            buckets,
            ilm,
        })
    }

    async fn ilm_summaries(&self, settings: &Option<Settings>, current: Option<&str>) -> Result<Vec<IlmPolicySummary>> {
        let Some(settings) = settings else {
            return Ok(Vec::new());
        };
        let policies = self.es.get_lifecycle().await?;
        let Some(map) = policies.as_object() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for (name, entry) in map {
            let Some(phases) = entry.get("policy").and_then(|p| p.get("phases")).and_then(Value::as_object) else {
                continue;
            };
            let repo_name = phases.values().find_map(|phase| {
                phase
                    .get("actions")
                    .and_then(|a| a.get("searchable_snapshot"))
                    .and_then(|s| s.get("snapshot_repository"))
                    .and_then(Value::as_str)
            });
            let Some(repo_name) = repo_name else { continue };
            if !repo_name.starts_with(&settings.repo_name_prefix) {
                continue;
            }

            let indices_in_use = entry
                .get("in_use_by")
                .and_then(|u| u.get("indices"))
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(0);
            let data_streams_in_use = entry
                .get("in_use_by")
                .and_then(|u| u.get("data_streams"))
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(0);

            out.push(IlmPolicySummary {
                name: name.clone(),
                repo_name: repo_name.to_string(),
                indices_in_use,
                data_streams_in_use,
                is_current: current == Some(repo_name),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

fn current_repo_name(settings: &Option<Settings>, repos: &[Repository]) -> Option<String> {
    let settings = settings.as_ref()?;
    repos
        .iter()
        .filter(|r| r.name.starts_with(&settings.repo_name_prefix))
        .max_by(|a, b| a.name.cmp(&b.name))
        .map(|r| r.name.clone())
}

fn bucket_summaries(repos: &[Repository], current: Option<&str>) -> Vec<BucketSummary> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for repo in repos {
        let key = (repo.bucket.clone(), repo.base_path.clone());
        if !seen.insert(key) {
            continue;
        }
        out.push(BucketSummary {
            bucket: repo.bucket.clone(),
            base_path: repo.base_path.clone(),
            is_current: current == Some(repo.name.as_str()),
        });
    }
    out
}
