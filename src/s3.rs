//! Object-store adapter (C1). Generalizes an interactive single-bucket `S3Service`
//! (list/head/copy/restore) into the provider-keyed adapter the controllers call:
//! list objects under a prefix, demote in place to Glacier, initiate a restore, and
//! inspect restore status via HeadObject.

use aws_sdk_s3::Client;
use aws_sdk_s3::types::{MetadataDirective, RestoreRequest, Tier};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::{DeepfreezeError, Result};
use crate::models::{ObjectRestoreState, Provider, StorageClassTier, parse_restore_header};

/// Maximum number of in-flight HeadObject/CopyObject/RestoreObject calls during a
/// bulk operation, bounded so a large restore batch doesn't open unlimited sockets.
const CONCURRENCY: usize = 32;

#[derive(Clone, Copy, Debug)]
pub enum RestoreTier {
    Standard,
    Expedited,
    Bulk,
}

impl RestoreTier {
    fn to_sdk(self) -> Tier {
        match self {
            RestoreTier::Standard => Tier::Standard,
            RestoreTier::Expedited => Tier::Expedited,
            RestoreTier::Bulk => Tier::Bulk,
        }
    }
}

pub struct ObjectInfo {
    pub key: String,
    pub storage_class: StorageClassTier,
}

pub struct RestoreStatus {
    pub total: usize,
    pub restored: usize,
    pub in_progress: usize,
    pub not_restored: usize,
}

impl RestoreStatus {
    pub fn complete(&self) -> bool {
        self.total > 0 && self.restored == self.total
    }
}

pub struct S3Adapter {
    client: Client,
}

impl S3Adapter {
    pub async fn for_provider(provider: Provider) -> Result<Self> {
        match provider {
            Provider::Aws => {
                let config = aws_config::from_env().load().await;
                Ok(S3Adapter {
                    client: Client::new(&config),
                })
            }
            Provider::Gcp => Err(DeepfreezeError::NotImplemented(
                "GCP object-store adapter is not implemented".to_string(),
            )),
            Provider::Azure => Err(DeepfreezeError::NotImplemented(
                "Azure object-store adapter is not implemented".to_string(),
            )),
        }
    }

    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(DeepfreezeError::ObjectStoreError(e.to_string()))
                }
            }
        }
    }

    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| DeepfreezeError::ObjectStoreError(e.to_string()))?;
        Ok(())
    }

    /// Normalizes `prefix`: trims leading slashes, appends a trailing `/` when
    /// non-empty.
    pub fn normalize_prefix(prefix: &str) -> String {
        let trimmed = prefix.trim_start_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        }
    }

    /// Lists every object under `bucket`/`prefix`, paginating internally.
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let prefix = Self::normalize_prefix(prefix);
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(&prefix);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| DeepfreezeError::ObjectStoreError(e.to_string()))?;
            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    out.push(ObjectInfo {
                        key: key.to_string(),
                        storage_class: StorageClassTier::from(obj.storage_class().cloned()),
                    });
                }
            }
            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(|t| t.to_string());
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(out)
    }

    pub async fn copy_object_in_place(
        &self,
        bucket: &str,
        key: &str,
        storage_class: StorageClassTier,
    ) -> Result<()> {
        let target = storage_class
            .to_sdk()
            .ok_or_else(|| DeepfreezeError::InvalidConfig(format!(
                "storage class {} is not a valid CopyObject target",
                storage_class.label()
            )))?;
        let source = format!("{bucket}/{key}");
        let encoded_source = urlencoding::encode(&source).into_owned();
        self.client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .storage_class(target)
            .copy_source(encoded_source)
            .metadata_directive(MetadataDirective::Copy)
            .send()
            .await
            .map_err(|e| DeepfreezeError::ObjectStoreError(e.to_string()))?;
        Ok(())
    }

    /// Demotes every object under `bucket`/`base_path` to Glacier, bounded
    /// concurrency. Logs and continues on a per-object failure, returning the
    /// count of failures rather than aborting.
    pub async fn push_to_glacier(&self, bucket: &str, base_path: &str) -> Result<usize> {
        let objects = self.list_objects(bucket, base_path).await?;
        let failures = stream::iter(objects)
            .map(|obj| async move {
                match self
                    .copy_object_in_place(bucket, &obj.key, StorageClassTier::GlacierFlexibleRetrieval)
                    .await
                {
                    Ok(()) => 0usize,
                    Err(e) => {
                        warn!(key = %obj.key, error = %e, "failed to demote object to Glacier");
                        1usize
                    }
                }
            })
            .buffer_unordered(CONCURRENCY)
            .fold(0usize, |acc, n| async move { acc + n })
            .await;
        Ok(failures)
    }

    pub async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        days: i32,
        tier: RestoreTier,
    ) -> Result<()> {
        let restore_request = RestoreRequest::builder()
            .days(days)
            .glacier_job_parameters(
                aws_sdk_s3::types::GlacierJobParameters::builder()
                    .tier(tier.to_sdk())
                    .build()
                    .map_err(|e| DeepfreezeError::ObjectStoreError(e.to_string()))?,
            )
            .build();
        self.client
            .restore_object()
            .bucket(bucket)
            .key(key)
            .restore_request(restore_request)
            .send()
            .await
            .map_err(|e| DeepfreezeError::ObjectStoreError(e.to_string()))?;
        Ok(())
    }

    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<(StorageClassTier, ObjectRestoreState)> {
        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DeepfreezeError::ObjectStoreError(e.to_string()))?;
        let storage_class = StorageClassTier::from(head.storage_class().cloned());
        let restore_state = parse_restore_header(head.restore());
        Ok((storage_class, restore_state))
    }

    /// `check_restore_status`: instant-access classes count as
    /// restored without a HeadObject; Glacier-family objects are individually
    /// HeadObject'd, bounded concurrency.
    pub async fn check_restore_status(&self, bucket: &str, base_path: &str) -> Result<RestoreStatus> {
        let objects = self.list_objects(bucket, base_path).await?;
        let total = objects.len();
        let mut restored = 0usize;
        let mut in_progress = 0usize;
        let mut not_restored = 0usize;

        let glacier_keys: Vec<String> = objects
            .iter()
            .filter(|o| !o.storage_class.is_instant_access())
            .map(|o| o.key.clone())
            .collect();
        restored += objects
            .iter()
            .filter(|o| o.storage_class.is_instant_access())
            .count();

        let results = stream::iter(glacier_keys)
            .map(|key| async move {
                match self.head_object(bucket, &key).await {
                    Ok((_, ObjectRestoreState::Available { .. })) => ObjectRestoreState::Available { expiry: None },
                    Ok((_, ObjectRestoreState::InProgress)) => ObjectRestoreState::InProgress,
                    Ok((_, ObjectRestoreState::NotRestored)) => ObjectRestoreState::NotRestored,
                    Err(e) => {
                        debug!(key, error = %e, "head_object failed, counting as not restored");
                        ObjectRestoreState::NotRestored
                    }
                }
            })
            .buffer_unordered(CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        for r in results {
            match r {
                ObjectRestoreState::Available { .. } => restored += 1,
                ObjectRestoreState::InProgress => in_progress += 1,
                ObjectRestoreState::NotRestored => not_restored += 1,
            }
        }

        Ok(RestoreStatus {
            total,
            restored,
            in_progress,
            not_restored,
        })
    }
}
