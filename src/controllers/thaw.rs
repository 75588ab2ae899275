//! Thaw controller (C7). Grounded in
//! `examples/original_source/curator/actions/deepfreeze/thaw.py`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DeepfreezeError, Result};
use crate::es::ClusterClient;
use crate::models::{ThawRequest, ThawRequestStatus, ThawState};
use crate::s3::{RestoreTier, S3Adapter};
use crate::store::StateStore;

const DEFAULT_DURATION_DAYS: i32 = 7;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_MAX_WAIT_ATTEMPTS: u32 = 1200;

pub struct ThawController<'a> {
    es: &'a ClusterClient,
    s3: &'a S3Adapter,
    store: &'a StateStore,
}

pub struct ThawCreateOptions {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub duration_days: Option<i32>,
    pub retrieval_tier: RestoreTier,
    pub sync: bool,
    pub poll_interval_secs: Option<u64>,
    pub max_wait_attempts: Option<u32>,
}

impl<'a> ThawController<'a> {
    pub fn new(es: &'a ClusterClient, s3: &'a S3Adapter, store: &'a StateStore) -> Self {
        ThawController { es, s3, store }
    }

    pub async fn create(&self, opts: ThawCreateOptions) -> Result<Uuid> {
        if opts.start_date > opts.end_date {
            return Err(DeepfreezeError::InvalidConfig(
                "start_date must not be after end_date".to_string(),
            ));
        }

        let repos = self
            .store
            .find_repositories_overlapping(opts.start_date, opts.end_date)
            .await?;
        if repos.is_empty() {
            warn!("no repositories overlap the requested date range, thaw request is a no-op");
        }

        let duration = opts.duration_days.unwrap_or(DEFAULT_DURATION_DAYS);
        let mut initiated = Vec::new();

        for repo in &repos {
            if repo.thaw_state == ThawState::Thawed && repo.is_mounted {
                continue;
            }
            match self.initiate_restore(&repo.bucket, &repo.base_path, duration, opts.retrieval_tier).await {
                Ok(()) => initiated.push(repo.name.clone()),
                Err(e) => warn!(repo = %repo.name, error = %e, "failed to initiate restore, skipping this repository"),
            }
        }

        let request_id = Uuid::new_v4();
        let expires_at = Utc::now() + chrono::Duration::days(duration as i64);
        for name in &initiated {
            let mut repo = self.store.get_repository(name).await?;
            repo.start_thawing(expires_at);
            self.store.persist_repository(&mut repo).await?;
        }

        let request = ThawRequest {
            request_id,
            status: ThawRequestStatus::InProgress,
            created_at: Utc::now(),
            start_date: Some(opts.start_date),
            end_date: Some(opts.end_date),
            repos: initiated,
        };
        self.store.save_thaw_request(&request).await?;

        if opts.sync {
            let interval = Duration::from_secs(opts.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS));
            let max_attempts = opts.max_wait_attempts.unwrap_or(DEFAULT_MAX_WAIT_ATTEMPTS);
            self.poll_to_completion(request_id, interval, max_attempts).await?;
        }

        Ok(request_id)
    }

    async fn initiate_restore(&self, bucket: &str, base_path: &str, duration: i32, tier: RestoreTier) -> Result<()> {
        let objects = self.s3.list_objects(bucket, base_path).await?;
        for obj in objects {
            self.s3.restore_object(bucket, &obj.key, duration, tier).await?;
        }
        Ok(())
    }

    async fn poll_to_completion(&self, request_id: Uuid, interval: Duration, max_attempts: u32) -> Result<()> {
        for attempt in 0..max_attempts {
            let outcome = tokio::select! {
                result = self.check_status(request_id) => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!(attempt, "sync thaw interrupted by ctrl-c, leaving request in progress");
                    return Ok(());
                }
            };
            if outcome {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        warn!(request_id = %request_id, "sync thaw timed out waiting for restore completion, request left in progress");
        Ok(())
    }

    /// Returns `true` once every repository in the request is mounted.
    pub async fn check_status(&self, request_id: Uuid) -> Result<bool> {
        let Some(mut request) = self.store.get_thaw_request(request_id).await? else {
            return Err(DeepfreezeError::RepositoryError(format!(
                "no thaw request found with id {request_id}"
            )));
        };

        let mut all_mounted = true;
        for name in request.repos.clone() {
            let mut repo = self.store.get_repository(&name).await?;
            if repo.is_mounted && repo.thaw_state == ThawState::Thawed {
                continue;
            }

            let status = self.s3.check_restore_status(&repo.bucket, &repo.base_path).await?;
            if !status.complete() {
                all_mounted = false;
                continue;
            }

            if let Err(e) = self
                .mount_repository(&mut repo, request.start_date, request.end_date)
                .await
            {
                warn!(repo = %repo.name, error = %e, "failed to mount restored repository");
                all_mounted = false;
                continue;
            }
            self.store.persist_repository(&mut repo).await?;
        }

        if all_mounted {
            request.status = ThawRequestStatus::Completed;
            self.store.save_thaw_request(&request).await?;
        }

        Ok(all_mounted)
    }

    async fn mount_repository(
        &self,
        repo: &mut crate::models::Repository,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.es
            .create_repository(
                &repo.name,
                &super::repository_body(&repo.bucket, &repo.base_path, "private", "standard"),
            )
            .await
            .map_err(|e| DeepfreezeError::RepositoryError(e.to_string()))?;
        repo.mark_thawed(Utc::now());

        let snapshots = self.es.get_snapshots(&repo.name).await?;
        if let Some(list) = snapshots.get("snapshots").and_then(|v| v.as_array()) {
            // Map each backing index to the real snapshot that contains it; first
            // snapshot found for an index wins, matching a deterministic single
            // source of truth rather than picking an arbitrary literal name.
            let mut index_snapshot = std::collections::BTreeMap::new();
            for snap in list {
                let Some(snapshot_name) = snap.get("snapshot").and_then(|v| v.as_str()) else {
                    continue;
                };
                if let Some(idx_list) = snap.get("indices").and_then(|v| v.as_array()) {
                    for idx in idx_list {
                        if let Some(name) = idx.as_str() {
                            index_snapshot
                                .entry(name.to_string())
                                .or_insert_with(|| snapshot_name.to_string());
                        }
                    }
                }
            }
            for (index_name, snapshot_name) in index_snapshot {
                self.remount_one_index(repo, &snapshot_name, &index_name, start_date, end_date)
                    .await?;
            }
        }

        Ok(())
    }

    /// Mounts one backing index from its real snapshot; if it was part of a data
    /// stream, reattaches it. If its `@timestamp` range doesn't overlap the
    /// requested window, drops the mount (deletes rather than attaches).
    async fn remount_one_index(
        &self,
        repo: &crate::models::Repository,
        snapshot_name: &str,
        index_name: &str,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if self.es.index_exists(index_name).await.unwrap_or(false) {
            return Ok(());
        }

        if let Err(e) = self
            .es
            .mount_snapshot(
                &repo.name,
                snapshot_name,
                &serde_json::json!({ "index": index_name, "rename_pattern": "(.+)", "rename_replacement": "$1" }),
            )
            .await
        {
            warn!(index = index_name, snapshot = snapshot_name, error = %e, "failed to mount index as searchable snapshot");
            return Ok(());
        }

        if let (Some(start), Some(end)) = (start_date, end_date) {
            if let Ok(range) = self.index_timestamp_range(index_name).await {
                if let Some((min, max)) = range {
                    if max < start || min > end {
                        info!(index = index_name, "mounted index falls outside thaw window, dropping mount");
                        let _ = self.es.delete_index(index_name).await;
                        return Ok(());
                    }
                }
            }
        }

        if let Some((stream, _date, _seq)) = parse_backing_index_name(index_name) {
            if let Ok(Some(_)) = self.es.get_data_stream(&stream).await {
                if let Err(e) = self
                    .es
                    .modify_data_stream(&serde_json::json!({
                        "actions": [ { "add_backing_index": { "data_stream": stream, "index": index_name } } ]
                    }))
                    .await
                {
                    warn!(index = index_name, stream, error = %e, "failed to reattach backing index to data stream");
                }
            }
        }

        Ok(())
    }

    async fn index_timestamp_range(&self, index: &str) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let body = serde_json::json!({
            "size": 0,
            "allow_partial_search_results": true,
            "aggs": {
                "earliest": { "min": { "field": "@timestamp" } },
                "latest": { "max": { "field": "@timestamp" } },
            }
        });
        let resp = self.es.search(index, &body).await?;
        let earliest = resp
            .get("aggregations")
            .and_then(|a| a.get("earliest"))
            .and_then(|a| a.get("value_as_string"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));
        let latest = resp
            .get("aggregations")
            .and_then(|a| a.get("latest"))
            .and_then(|a| a.get("value_as_string"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));
        match (earliest, latest) {
            (Some(e), Some(l)) => Ok(Some((e, l))),
            _ => Ok(None),
        }
    }

    pub async fn list(&self) -> Result<Vec<ThawRequest>> {
        self.store.list_thaw_requests().await
    }
}

/// Parses `.ds-<stream>-<date>-<seq>` into `(stream, date, seq)`.
fn parse_backing_index_name(index_name: &str) -> Option<(String, String, String)> {
    let rest = index_name.strip_prefix(".ds-")?;
    let mut parts: Vec<&str> = rest.rsplitn(3, '-').collect();
    if parts.len() != 3 {
        return None;
    }
    let seq = parts.remove(0);
    let date = parts.remove(0);
    let stream = parts.remove(0);
    Some((stream.to_string(), date.to_string(), seq.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backing_index_name() {
        let (stream, date, seq) = parse_backing_index_name(".ds-logs-app-2024.03.01-000003").unwrap();
        assert_eq!(stream, "logs-app");
        assert_eq!(date, "2024.03.01");
        assert_eq!(seq, "000003");
    }

    #[test]
    fn rejects_non_backing_index_name() {
        assert!(parse_backing_index_name("logs-app-2024.03.01").is_none());
    }
}
