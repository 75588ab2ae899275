//! Remount controller (C11). Grounded in
//! `examples/original_source/curator/actions/deepfreeze/remount.py`.

use tracing::info;
use uuid::Uuid;

use crate::controllers::repository_body;
use crate::error::{DeepfreezeError, Result};
use crate::es::ClusterClient;
use crate::models::RunReport;
use crate::s3::S3Adapter;
use crate::store::StateStore;

pub struct RemountController<'a> {
    es: &'a ClusterClient,
    s3: &'a S3Adapter,
    store: &'a StateStore,
}

impl<'a> RemountController<'a> {
    pub fn new(es: &'a ClusterClient, s3: &'a S3Adapter, store: &'a StateStore) -> Self {
        RemountController { es, s3, store }
    }

    pub async fn do_action(&self, thaw_request_id: Uuid, dry_run: bool) -> Result<RunReport> {
        let Some(request) = self.store.get_thaw_request(thaw_request_id).await? else {
            return Err(DeepfreezeError::RepositoryError(format!(
                "no thaw request found with id {thaw_request_id}"
            )));
        };

        let mut report = RunReport::default();
        let settings = self.store.get_settings().await?;

        for name in &request.repos {
            let repo = self.store.get_repository(name).await?;
            if repo.bucket.is_empty() || repo.base_path.is_empty() {
                report.push_skipped(name, "no bucket/base_path recorded for this repository");
                continue;
            }

            let status = match self.s3.check_restore_status(&repo.bucket, &repo.base_path).await {
                Ok(status) => status,
                Err(e) => {
                    report.push_failed(name, e);
                    continue;
                }
            };
            if !status.complete() {
                report.push_skipped(name, "objects are not fully restored yet");
                continue;
            }

            let alias = format!("thawed-{name}");
            if dry_run {
                info!(alias, "DRY-RUN: would register remount repository");
                report.push_ok(&alias);
                continue;
            }

            match self
                .es
                .create_repository(
                    &alias,
                    &repository_body(&repo.bucket, &repo.base_path, &settings.canned_acl, &settings.storage_class),
                )
                .await
            {
                Ok(()) => report.push_ok(&alias),
                Err(e) => report.push_failed(&alias, DeepfreezeError::RepositoryError(e.to_string())),
            }
        }

        Ok(report)
    }
}
