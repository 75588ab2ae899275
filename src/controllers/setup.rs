//! Setup controller (C5). Grounded in
//! `examples/original_source/curator/actions/deepfreeze/setup.py`.

use serde_json::json;
use tracing::{info, warn};

use crate::controllers::{bucket_and_base_path, repo_name, repository_body};
use crate::error::{DeepfreezeError, PreconditionIssue, Result};
use crate::es::ClusterClient;
use crate::models::{Repository, Settings};
use crate::registry::Registry;
use crate::s3::S3Adapter;
use crate::store::StateStore;

pub struct SetupController<'a> {
    es: &'a ClusterClient,
    s3: &'a S3Adapter,
    store: &'a StateStore,
    settings: Settings,
    year: Option<i32>,
    month: Option<u32>,
    create_sample_ilm_policy: bool,
}

pub struct SetupOutcome {
    pub repo_name: String,
    pub bucket_name: String,
    pub base_path: String,
    pub ilm_policy_created: Option<String>,
}

impl<'a> SetupController<'a> {
    pub fn new(
        es: &'a ClusterClient,
        s3: &'a S3Adapter,
        store: &'a StateStore,
        settings: Settings,
        year: Option<i32>,
        month: Option<u32>,
        create_sample_ilm_policy: bool,
    ) -> Self {
        SetupController {
            es,
            s3,
            store,
            settings,
            year,
            month,
            create_sample_ilm_policy,
        }
    }

    fn suffix(&self) -> String {
        match self.settings.style {
            crate::models::SuffixStyle::Oneup => "000001".to_string(),
            crate::models::SuffixStyle::Date => {
                Registry::next_suffix(self.settings.style, None, self.year, self.month)
                    .unwrap_or_else(|_| "000001".to_string())
            }
        }
    }

    fn names(&self) -> (String, String, String) {
        let suffix = self.suffix();
        let repo = repo_name(&self.settings.repo_name_prefix, &suffix);
        let (bucket, base_path) = bucket_and_base_path(
            self.settings.rotate_by,
            &self.settings.bucket_name_prefix,
            &self.settings.base_path_prefix,
            &suffix,
        );
        (repo, bucket, base_path)
    }

    async fn check_preconditions(&self) -> Result<()> {
        let mut issues = Vec::new();

        if self.store.status_index_exists().await.unwrap_or(false) {
            issues.push(PreconditionIssue {
                issue: "the deepfreeze status index already exists".to_string(),
                solution: "setup is one-time initialization; if you need to start over, delete the deepfreeze-status index first".to_string(),
            });
        }

        let existing = Registry::new(self.es, self.store)
            .matching_repo_names(&self.settings.repo_name_prefix)
            .await
            .unwrap_or_default();
        if !existing.is_empty() {
            issues.push(PreconditionIssue {
                issue: format!(
                    "registered repositories already start with prefix '{}': {}",
                    self.settings.repo_name_prefix,
                    existing.join(", ")
                ),
                solution: "choose a different --repo-name-prefix or remove the conflicting repositories".to_string(),
            });
        }

        let (_, bucket_name, _) = self.names();
        if self.settings.rotate_by == crate::models::RotateBy::Bucket
            && self.s3.bucket_exists(&bucket_name).await.unwrap_or(false)
        {
            issues.push(PreconditionIssue {
                issue: format!("target bucket '{bucket_name}' already exists"),
                solution: "choose a different --bucket-name-prefix or reuse the existing bucket via a manual repository registration".to_string(),
            });
        }

        match self.es.cluster_info().await {
            Ok(info) => {
                let version = info
                    .get("version")
                    .and_then(|v| v.get("number"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let major: u32 = version.split('.').next().and_then(|v| v.parse().ok()).unwrap_or(8);
                if major < 8 {
                    match self.es.nodes_plugins().await {
                        Ok(nodes) => {
                            let has_plugin = nodes
                                .get("nodes")
                                .and_then(|n| n.as_object())
                                .map(|nodes| {
                                    nodes.values().all(|node| {
                                        node.get("plugins")
                                            .and_then(|p| p.as_array())
                                            .map(|plugins| {
                                                plugins.iter().any(|p| {
                                                    p.get("name").and_then(|n| n.as_str())
                                                        == Some("repository-s3")
                                                })
                                            })
                                            .unwrap_or(false)
                                    })
                                })
                                .unwrap_or(true);
                            if !has_plugin {
                                issues.push(PreconditionIssue {
                                    issue: "the S3 repository plugin is not installed on every node".to_string(),
                                    solution: "install the repository-s3 plugin on every Elasticsearch node and restart the cluster".to_string(),
                                });
                            }
                        }
                        Err(e) => warn!(error = %e, "could not verify S3 repository plugin, skipping soft check"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not query cluster info, skipping S3 plugin check"),
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(DeepfreezeError::PreconditionError { issues })
        }
    }

    pub async fn do_dry_run(&self) -> Result<()> {
        self.check_preconditions().await?;
        let (repo, bucket, base_path) = self.names();
        info!(repo, bucket, base_path, "DRY-RUN: would create bucket, repository, and settings");
        Ok(())
    }

    pub async fn do_action(&self) -> Result<SetupOutcome> {
        self.check_preconditions().await?;

        self.store.ensure_status_index(true).await?;
        let mut settings = self.settings.clone();
        settings.last_suffix = Some(self.suffix());
        self.store.save_settings(&settings).await?;

        let (new_repo_name, new_bucket_name, base_path) = self.names();

        info!(bucket = %new_bucket_name, "creating S3 bucket");
        self.s3.create_bucket(&new_bucket_name).await?;

        info!(repo = %new_repo_name, "creating repository");
        self.es
            .create_repository(
                &new_repo_name,
                &repository_body(
                    &new_bucket_name,
                    &base_path,
                    &settings.canned_acl,
                    &settings.storage_class,
                ),
            )
            .await
            .map_err(|e| DeepfreezeError::RepositoryError(e.to_string()))?;

        let mut repo = Repository::new(&new_repo_name, &new_bucket_name, &base_path);
        self.store.persist_repository(&mut repo).await?;

        let mut ilm_policy_created = None;
        if self.create_sample_ilm_policy {
            let policy_name = format!("{}-sample", settings.repo_name_prefix);
            let body = sample_ilm_policy(&new_repo_name);
            match self.es.put_lifecycle(&policy_name, &body).await {
                Ok(()) => ilm_policy_created = Some(policy_name),
                Err(e) => warn!(error = %e, "failed to create sample ILM policy, continuing (non-critical)"),
            }
        }

        info!(repo = %new_repo_name, bucket = %new_bucket_name, "setup complete");
        Ok(SetupOutcome {
            repo_name: new_repo_name,
            bucket_name: new_bucket_name,
            base_path,
            ilm_policy_created,
        })
    }
}

fn sample_ilm_policy(repo_name: &str) -> serde_json::Value {
    json!({
        "policy": {
            "phases": {
                "hot": {
                    "min_age": "0ms",
                    "actions": { "rollover": { "max_size": "45gb", "max_age": "7d" } }
                },
                "frozen": {
                    "min_age": "14d",
                    "actions": { "searchable_snapshot": { "snapshot_repository": repo_name } }
                },
                "delete": {
                    "min_age": "365d",
                    "actions": { "delete": { "delete_searchable_snapshot": false } }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RotateBy;

    #[test]
    fn bucket_rotation_names_suffix_both_bucket_and_path_prefix() {
        let (bucket, base_path) = bucket_and_base_path(RotateBy::Bucket, "df", "snapshots", "000001");
        assert_eq!(bucket, "df-000001");
        assert_eq!(base_path, "snapshots");
    }

    #[test]
    fn path_rotation_suffixes_base_path_only() {
        let (bucket, base_path) = bucket_and_base_path(RotateBy::Path, "df", "snapshots", "000001");
        assert_eq!(bucket, "df");
        assert_eq!(base_path, "snapshots-000001");
    }
}
