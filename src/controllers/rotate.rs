//! Rotate controller (C6). Grounded in
//! `examples/original_source/curator/actions/deepfreeze/rotate.py`.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::controllers::{bucket_and_base_path, repo_name, repository_body};
use crate::error::{DeepfreezeError, PreconditionIssue, Result};
use crate::es::ClusterClient;
use crate::models::{Repository, RunReport, Settings};
use crate::policy::PolicyMutator;
use crate::registry::Registry;
use crate::s3::S3Adapter;
use crate::store::StateStore;

use super::cleanup::CleanupController;

const DEFAULT_KEEP: usize = 6;

pub struct RotateController<'a> {
    es: &'a ClusterClient,
    s3: &'a S3Adapter,
    store: &'a StateStore,
    keep: usize,
    year: Option<i32>,
    month: Option<u32>,
}

pub struct RotateOutcome {
    pub new_repo_name: String,
    pub versioned_policies: BTreeMap<String, String>,
    pub templates_retargeted: usize,
    pub demoted: RunReport,
    pub cleanup: RunReport,
}

impl<'a> RotateController<'a> {
    pub fn new(
        es: &'a ClusterClient,
        s3: &'a S3Adapter,
        store: &'a StateStore,
        keep: Option<usize>,
        year: Option<i32>,
        month: Option<u32>,
    ) -> Self {
        RotateController {
            es,
            s3,
            store,
            keep: keep.unwrap_or(DEFAULT_KEEP),
            year,
            month,
        }
    }

    async fn latest_repo_name(&self, settings: &Settings) -> Result<String> {
        let registry = Registry::new(self.es, self.store);
        let names = registry.matching_repo_names(&settings.repo_name_prefix).await?;
        names.into_iter().next().ok_or_else(|| {
            DeepfreezeError::RepositoryError(format!(
                "no repository matching prefix '{}' is registered",
                settings.repo_name_prefix
            ))
        })
    }

    async fn check_preconditions(&self, settings: &Settings, latest_repo: &str, new_repo: &str) -> Result<()> {
        let mut issues = Vec::new();

        if !self.store.status_index_exists().await.unwrap_or(false) {
            issues.push(PreconditionIssue {
                issue: "the deepfreeze status index does not exist".to_string(),
                solution: "run setup before rotate".to_string(),
            });
        }

        if self
            .es
            .get_repository(new_repo)
            .await
            .unwrap_or(None)
            .is_some()
        {
            issues.push(PreconditionIssue {
                issue: format!("repository '{new_repo}' already exists"),
                solution: "rotate was likely already run for this suffix; re-run with a different --year/--month or resolve the conflict manually".to_string(),
            });
        }

        let policy_mutator = PolicyMutator::new(self.es);
        let referencing = policy_mutator.policies_referencing(latest_repo).await.unwrap_or_default();
        if referencing.is_empty() {
            issues.push(PreconditionIssue {
                issue: format!("no lifecycle policy references the latest repository '{latest_repo}'"),
                solution: "attach an ILM policy with a searchable_snapshot action targeting the latest repository before rotating".to_string(),
            });
        }

        let _ = settings;
        if issues.is_empty() {
            Ok(())
        } else {
            Err(DeepfreezeError::PreconditionError { issues })
        }
    }

    pub async fn do_action(&self, dry_run: bool) -> Result<RotateOutcome> {
        let settings = self.store.get_settings().await?;
        let latest_repo = self.latest_repo_name(&settings).await?;

        let suffix = Registry::next_suffix(settings.style, settings.last_suffix.as_deref(), self.year, self.month)?;
        let new_repo_name = repo_name(&settings.repo_name_prefix, &suffix);
        let (new_bucket_name, base_path) = bucket_and_base_path(
            settings.rotate_by,
            &settings.bucket_name_prefix,
            &settings.base_path_prefix,
            &suffix,
        );

        self.check_preconditions(&settings, &latest_repo, &new_repo_name).await?;

        if dry_run {
            info!(new_repo_name, latest_repo, "DRY-RUN: would rotate to new repository");
            return Ok(RotateOutcome {
                new_repo_name,
                versioned_policies: BTreeMap::new(),
                templates_retargeted: 0,
                demoted: RunReport::default(),
                cleanup: RunReport::default(),
            });
        }

        self.store.ensure_status_index(true).await?;
        let mut settings = settings;
        settings.last_suffix = Some(suffix.clone());
        self.store.save_settings(&settings).await?;

        if settings.rotate_by == crate::models::RotateBy::Bucket {
            self.s3.create_bucket(&new_bucket_name).await.or_else(|e| {
                warn!(error = %e, "create_bucket failed, assuming it already exists");
                Ok::<(), DeepfreezeError>(())
            })?;
        }

        info!(repo = %new_repo_name, "registering new repository");
        self.es
            .create_repository(
                &new_repo_name,
                &repository_body(&new_bucket_name, &base_path, &settings.canned_acl, &settings.storage_class),
            )
            .await
            .map_err(|e| DeepfreezeError::RepositoryError(e.to_string()))?;
        let mut new_repo = Repository::new(&new_repo_name, &new_bucket_name, &base_path);
        self.store.persist_repository(&mut new_repo).await?;

        let registry = Registry::new(self.es, self.store);
        let mut all_repos = self
            .store
            .all_repositories(Some(&settings.repo_name_prefix), None)
            .await?;
        for repo in all_repos.iter_mut() {
            if let Err(e) = registry.update_repository_date_range(repo).await {
                warn!(repo = %repo.name, error = %e, "failed to refresh repository date range, continuing");
            }
        }

        let mut versioned_policies = BTreeMap::new();
        let mut templates_retargeted = 0usize;

        if new_repo_name != latest_repo {
            let policy_mutator = PolicyMutator::new(self.es);
            let referencing = policy_mutator.policies_referencing(&latest_repo).await?;
            for (name, body) in &referencing {
                let base_name = PolicyMutator::base_policy_name(name);
                let new_name = policy_mutator
                    .create_versioned_policy(&base_name, body, &new_repo_name, &suffix)
                    .await?;
                versioned_policies.insert(name.clone(), new_name);
            }

            if !versioned_policies.is_empty() {
                templates_retargeted = policy_mutator.retarget_templates(&versioned_policies).await?;
            }
        } else {
            info!("new repository name matches latest repository, skipping policy versioning");
        }

        let mut names_desc: Vec<String> = all_repos
            .iter()
            .map(|r| r.name.clone())
            .filter(|name| name != &new_repo_name)
            .collect();
        names_desc.sort_by(|a, b| b.cmp(a));

        let mut demoted = RunReport::default();
        let policy_mutator = PolicyMutator::new(self.es);
        for name in names_desc.into_iter().skip(self.keep) {
            let mut repo = self.store.get_repository(&name).await?;
            if matches!(repo.thaw_state, crate::models::ThawState::Thawing | crate::models::ThawState::Thawed) {
                demoted.push_skipped(&name, "currently thawing or thawed");
                continue;
            }

            if let Err(e) = self.es.delete_repository(&name).await {
                demoted.push_failed(&name, DeepfreezeError::RepositoryError(e.to_string()));
                continue;
            }
            repo.unmount();
            repo.reset_to_frozen();
            if let Err(e) = self.store.persist_repository(&mut repo).await {
                demoted.push_failed(&name, e);
                continue;
            }

            match self.s3.push_to_glacier(&repo.bucket, &repo.base_path).await {
                Ok(0) => demoted.push_ok(&name),
                Ok(failures) => demoted.push_skipped(&name, format!("{failures} objects failed to demote")),
                Err(e) => {
                    demoted.push_failed(&name, e);
                    continue;
                }
            }

            let repo_suffix = name.strip_prefix(&format!("{}-", settings.repo_name_prefix)).unwrap_or(&name);
            match policy_mutator.policies_with_suffix(repo_suffix).await {
                Ok(policies) => {
                    for (policy_name, entry) in policies {
                        if PolicyMutator::policy_safe_to_delete(&entry) {
                            if let Err(e) = self.es.delete_lifecycle(&policy_name).await {
                                warn!(policy = %policy_name, error = %e, "failed to delete orphaned policy");
                            }
                        }
                    }
                }
                Err(e) => warn!(repo = %name, error = %e, "failed to enumerate policies by suffix"),
            }
        }

        let cleanup = CleanupController::new(self.es, self.s3, self.store)
            .reap(dry_run)
            .await?;

        Ok(RotateOutcome {
            new_repo_name,
            versioned_policies,
            templates_retargeted,
            demoted,
            cleanup,
        })
    }
}
