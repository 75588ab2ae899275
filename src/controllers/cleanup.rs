//! Cleanup / refreeze reaper (C8). Grounded in
//! `examples/original_source/curator/actions/deepfreeze/cleanup.py` and
//! `refreeze.py`, which share one reconciliation core in this port.

use chrono::Utc;
use tracing::{info, warn};

use crate::error::Result;
use crate::es::ClusterClient;
use crate::models::{Repository, RunReport, ThawRequestStatus, ThawState};
use crate::policy::PolicyMutator;
use crate::s3::S3Adapter;
use crate::store::StateStore;

pub struct CleanupController<'a> {
    es: &'a ClusterClient,
    s3: &'a S3Adapter,
    store: &'a StateStore,
}

impl<'a> CleanupController<'a> {
    pub fn new(es: &'a ClusterClient, s3: &'a S3Adapter, store: &'a StateStore) -> Self {
        CleanupController { es, s3, store }
    }

    /// Auto-triggered cleanup: detect expiry, process, retire stale requests, drop
    /// orphan thawed-policies. Used by `rotate` at the end of its run and by the
    /// standalone `cleanup` subcommand.
    pub async fn reap(&self, dry_run: bool) -> Result<RunReport> {
        let mut report = RunReport::default();

        let mounted = self.store.all_repositories(None, Some(true)).await?;
        let mut to_expire = Vec::new();
        for mut repo in mounted {
            if repo.thaw_state == ThawState::Thawed {
                match repo.expires_at {
                    Some(expires_at) if Utc::now() >= expires_at => to_expire.push(repo),
                    Some(_) => {}
                    None => {
                        warn!(repo = %repo.name, "thawed repository has no expires_at, leaving thawed");
                    }
                }
                continue;
            }
            if let Ok(status) = self.s3.check_restore_status(&repo.bucket, &repo.base_path).await {
                if status.not_restored == status.total && status.restored == 0 && status.in_progress == 0 {
                    repo.mark_expired();
                    to_expire.push(repo);
                }
            }
        }

        self.process_expired(to_expire, dry_run, &mut report).await?;

        if !dry_run {
            self.retire_stale_thaw_requests().await?;
            self.delete_orphan_thawed_policies().await?;
        }

        Ok(report)
    }

    /// Explicit refreeze of a caller-supplied subset (single repo, a thaw-request's
    /// repos, or every currently thawed+mounted repository).
    pub async fn refreeze(&self, repos: Vec<Repository>, dry_run: bool) -> Result<RunReport> {
        let mut report = RunReport::default();
        self.process_expired(repos, dry_run, &mut report).await?;
        if !dry_run {
            self.delete_orphan_thawed_policies().await?;
        }
        Ok(report)
    }

    async fn process_expired(&self, repos: Vec<Repository>, dry_run: bool, report: &mut RunReport) -> Result<()> {
        if repos.is_empty() {
            return Ok(());
        }

        let refrozen_names: Vec<String> = repos.iter().map(|r| r.name.clone()).collect();
        let all_repos = self.store.all_repositories(None, None).await?;

        for mut repo in repos {
            if dry_run {
                info!(repo = %repo.name, "DRY-RUN: would refreeze repository");
                report.push_skipped(&repo.name, "dry-run");
                continue;
            }

            // The `expired` transition must persist before the delete-repository
            // call so a crash here resumes from `expired`, not `thawed`.
            if repo.thaw_state != ThawState::Expired {
                repo.mark_expired();
            }
            if let Err(e) = self.store.persist_repository(&mut repo).await {
                report.push_failed(&repo.name, e);
                continue;
            }

            match self.es.get_repository(&repo.name).await {
                Ok(Some(_)) => {
                    if let Err(e) = self.es.delete_repository(&repo.name).await {
                        report.push_failed(&repo.name, crate::error::DeepfreezeError::RepositoryError(e.to_string()));
                        continue;
                    }
                }
                Ok(None) => {
                    if repo.is_mounted {
                        warn!(repo = %repo.name, "record says mounted but cluster has no such repository");
                    }
                }
                Err(e) => warn!(repo = %repo.name, error = %e, "failed to query repository before cleanup"),
            }

            repo.reset_to_frozen();

            let mut other_indices = std::collections::BTreeSet::new();
            for other in &all_repos {
                if other.name == repo.name {
                    continue;
                }
                if let Ok(snapshots) = self.es.get_snapshots(&other.name).await {
                    if let Some(list) = snapshots.get("snapshots").and_then(|v| v.as_array()) {
                        for snap in list {
                            if let Some(indices) = snap.get("indices").and_then(|v| v.as_array()) {
                                for idx in indices {
                                    if let Some(name) = idx.as_str() {
                                        other_indices.insert(name.to_string());
                                    }
                                }
                            }
                        }
                    }
                }
            }

            if let Ok(snapshots) = self.es.get_snapshots(&repo.name).await {
                if let Some(list) = snapshots.get("snapshots").and_then(|v| v.as_array()) {
                    let mut seen = std::collections::BTreeSet::new();
                    for snap in list {
                        if let Some(indices) = snap.get("indices").and_then(|v| v.as_array()) {
                            for idx in indices {
                                if let Some(name) = idx.as_str() {
                                    seen.insert(name.to_string());
                                }
                            }
                        }
                    }
                    for index_name in seen {
                        if other_indices.contains(&index_name) {
                            continue;
                        }
                        let health_before = self.es.cluster_health(Some(&index_name)).await.ok();
                        match self.es.delete_index(&index_name).await {
                            Ok(()) => {
                                info!(index = %index_name, health = ?health_before, "deleted index uniquely owned by refrozen repository");
                            }
                            Err(e) => warn!(index = %index_name, error = %e, "failed to delete orphaned index"),
                        }
                    }
                }
            }

            if let Err(e) = self.store.persist_repository(&mut repo).await {
                report.push_failed(&repo.name, e);
                continue;
            }

            report.push_ok(&repo.name);
        }

        self.mark_requests_refrozen(&refrozen_names).await?;

        Ok(())
    }

    /// Any thaw-request whose every referenced repository has just been returned
    /// to `frozen` transitions to `status=refrozen` (so it ages out on the
    /// `thaw_request_retention_days_refrozen` clock instead of lingering).
    async fn mark_requests_refrozen(&self, just_frozen: &[String]) -> Result<()> {
        if just_frozen.is_empty() {
            return Ok(());
        }
        let requests = self.store.list_thaw_requests().await?;
        for request in requests {
            if matches!(request.status, ThawRequestStatus::Refrozen | ThawRequestStatus::Failed) {
                continue;
            }
            if request.repos.is_empty() || !request.repos.iter().any(|r| just_frozen.contains(r)) {
                continue;
            }
            let mut all_frozen = true;
            for name in &request.repos {
                let repo = self.store.get_repository(name).await?;
                if matches!(repo.thaw_state, ThawState::Thawing | ThawState::Thawed) {
                    all_frozen = false;
                    break;
                }
            }
            if all_frozen {
                self.store
                    .update_thaw_request_status(request.request_id, ThawRequestStatus::Refrozen)
                    .await?;
            }
        }
        Ok(())
    }

    async fn retire_stale_thaw_requests(&self) -> Result<()> {
        let settings = self.store.get_settings().await?;
        let requests = self.store.list_thaw_requests().await?;
        let now = Utc::now();

        for request in requests {
            let retention_days = match request.status {
                ThawRequestStatus::Completed => settings.thaw_request_retention_days_completed,
                ThawRequestStatus::Failed => settings.thaw_request_retention_days_failed,
                ThawRequestStatus::Refrozen => settings.thaw_request_retention_days_refrozen,
                ThawRequestStatus::InProgress => {
                    let mut still_pending = false;
                    for name in &request.repos {
                        let repo = self.store.get_repository(name).await?;
                        if matches!(repo.thaw_state, ThawState::Thawing | ThawState::Thawed) {
                            still_pending = true;
                            break;
                        }
                    }
                    if !still_pending {
                        self.store.delete_thaw_request(request.request_id).await?;
                    }
                    continue;
                }
            };

            let age_days = (now - request.created_at).num_days();
            if age_days >= retention_days {
                self.store.delete_thaw_request(request.request_id).await?;
            }
        }

        Ok(())
    }

    async fn delete_orphan_thawed_policies(&self) -> Result<()> {
        let settings = self.store.get_settings().await?;
        let policy_mutator = PolicyMutator::new(self.es);
        let candidates = policy_mutator.policies_with_suffix("thawed").await?;
        for (name, entry) in candidates {
            if !name.starts_with(&settings.repo_name_prefix) {
                continue;
            }
            if PolicyMutator::policy_safe_to_delete(&entry) {
                self.es.delete_lifecycle(&name).await?;
            }
        }
        Ok(())
    }
}
