use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use aws_sdk_s3::types::{ObjectStorageClass, StorageClass};

use crate::error::{DeepfreezeError, Result};

pub const STATUS_INDEX: &str = "deepfreeze-status";
pub const SETTINGS_ID: &str = "1";

/// Object storage tiers we reason about. Mirrors the S3 `StorageClass` enum but
/// stays independent of the SDK type so the state store and registry never need
/// to depend on `aws-sdk-s3` directly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageClassTier {
    Standard,
    IntelligentTiering,
    StandardIa,
    OneZoneIa,
    GlacierInstantRetrieval,
    GlacierFlexibleRetrieval,
    GlacierDeepArchive,
    ReducedRedundancy,
    Unknown(String),
}

impl StorageClassTier {
    pub fn label(&self) -> &str {
        match self {
            StorageClassTier::Standard => "STANDARD",
            StorageClassTier::IntelligentTiering => "INTELLIGENT_TIERING",
            StorageClassTier::StandardIa => "STANDARD_IA",
            StorageClassTier::OneZoneIa => "ONEZONE_IA",
            StorageClassTier::GlacierInstantRetrieval => "GLACIER_IR",
            StorageClassTier::GlacierFlexibleRetrieval => "GLACIER",
            StorageClassTier::GlacierDeepArchive => "DEEP_ARCHIVE",
            StorageClassTier::ReducedRedundancy => "REDUCED_REDUNDANCY",
            StorageClassTier::Unknown(label) => label.as_str(),
        }
    }

    /// Instant-access classes count as "restored" without a HeadObject round trip.
    pub fn is_instant_access(&self) -> bool {
        matches!(
            self,
            StorageClassTier::Standard
                | StorageClassTier::StandardIa
                | StorageClassTier::OneZoneIa
                | StorageClassTier::IntelligentTiering
        )
    }

    pub fn is_glacier_family(&self) -> bool {
        matches!(
            self,
            StorageClassTier::GlacierFlexibleRetrieval
                | StorageClassTier::GlacierDeepArchive
                | StorageClassTier::GlacierInstantRetrieval
        )
    }

    pub fn to_sdk(&self) -> Option<StorageClass> {
        match self {
            StorageClassTier::Standard => Some(StorageClass::Standard),
            StorageClassTier::IntelligentTiering => Some(StorageClass::IntelligentTiering),
            StorageClassTier::StandardIa => Some(StorageClass::StandardIa),
            StorageClassTier::OneZoneIa => Some(StorageClass::OnezoneIa),
            StorageClassTier::GlacierInstantRetrieval => Some(StorageClass::GlacierIr),
            StorageClassTier::GlacierFlexibleRetrieval => Some(StorageClass::Glacier),
            StorageClassTier::GlacierDeepArchive => Some(StorageClass::DeepArchive),
            StorageClassTier::ReducedRedundancy => Some(StorageClass::ReducedRedundancy),
            StorageClassTier::Unknown(_) => None,
        }
    }
}

impl From<Option<ObjectStorageClass>> for StorageClassTier {
    fn from(value: Option<ObjectStorageClass>) -> Self {
        match value {
            Some(ObjectStorageClass::Standard) | None => StorageClassTier::Standard,
            Some(ObjectStorageClass::IntelligentTiering) => StorageClassTier::IntelligentTiering,
            Some(ObjectStorageClass::StandardIa) => StorageClassTier::StandardIa,
            Some(ObjectStorageClass::OnezoneIa) => StorageClassTier::OneZoneIa,
            Some(ObjectStorageClass::GlacierIr) => StorageClassTier::GlacierInstantRetrieval,
            Some(ObjectStorageClass::Glacier) => StorageClassTier::GlacierFlexibleRetrieval,
            Some(ObjectStorageClass::DeepArchive) => StorageClassTier::GlacierDeepArchive,
            Some(ObjectStorageClass::ReducedRedundancy) => StorageClassTier::ReducedRedundancy,
            Some(other) => StorageClassTier::Unknown(other.as_str().to_string()),
        }
    }
}

impl From<Option<StorageClass>> for StorageClassTier {
    fn from(value: Option<StorageClass>) -> Self {
        match value {
            Some(StorageClass::Standard) | None => StorageClassTier::Standard,
            Some(StorageClass::IntelligentTiering) => StorageClassTier::IntelligentTiering,
            Some(StorageClass::StandardIa) => StorageClassTier::StandardIa,
            Some(StorageClass::OnezoneIa) => StorageClassTier::OneZoneIa,
            Some(StorageClass::GlacierIr) => StorageClassTier::GlacierInstantRetrieval,
            Some(StorageClass::Glacier) => StorageClassTier::GlacierFlexibleRetrieval,
            Some(StorageClass::DeepArchive) => StorageClassTier::GlacierDeepArchive,
            Some(StorageClass::ReducedRedundancy) => StorageClassTier::ReducedRedundancy,
            Some(other) => StorageClassTier::Unknown(other.as_str().to_string()),
        }
    }
}

/// Decoded `x-amz-restore` header for a single object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ObjectRestoreState {
    /// Restored to instant access; `expiry` is the RFC3339 expiry-date, if present.
    Available { expiry: Option<String> },
    InProgress,
    NotRestored,
}

pub fn parse_restore_header(raw: Option<&str>) -> ObjectRestoreState {
    let Some(value) = raw else {
        return ObjectRestoreState::NotRestored;
    };
    let lower = value.to_ascii_lowercase();
    if lower.contains("ongoing-request=\"true\"") {
        return ObjectRestoreState::InProgress;
    }
    if lower.contains("ongoing-request=\"false\"") {
        let expiry = lower
            .split("expiry-date=\"")
            .nth(1)
            .and_then(|part| part.split('"').next())
            .and_then(|raw_date| DateTime::parse_from_rfc2822(raw_date).ok())
            .map(|dt| dt.with_timezone(&Utc).to_rfc3339());
        return ObjectRestoreState::Available { expiry };
    }
    ObjectRestoreState::NotRestored
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotateBy {
    Path,
    Bucket,
}

impl std::fmt::Display for RotateBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotateBy::Path => write!(f, "path"),
            RotateBy::Bucket => write!(f, "bucket"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SuffixStyle {
    Oneup,
    Date,
}

impl std::fmt::Display for SuffixStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuffixStyle::Oneup => write!(f, "oneup"),
            SuffixStyle::Date => write!(f, "date"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
    Azure,
}

impl std::str::FromStr for Provider {
    type Err = DeepfreezeError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "aws" => Ok(Provider::Aws),
            "gcp" => Ok(Provider::Gcp),
            "azure" => Ok(Provider::Azure),
            other => Err(DeepfreezeError::InvalidConfig(format!(
                "unsupported provider: {other}"
            ))),
        }
    }
}

/// The singleton settings document, id `"1"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub repo_name_prefix: String,
    pub bucket_name_prefix: String,
    pub base_path_prefix: String,
    pub canned_acl: String,
    pub storage_class: String,
    pub provider: Provider,
    pub rotate_by: RotateBy,
    pub style: SuffixStyle,
    pub last_suffix: Option<String>,
    pub thaw_request_retention_days_completed: i64,
    pub thaw_request_retention_days_failed: i64,
    pub thaw_request_retention_days_refrozen: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            repo_name_prefix: "deepfreeze".to_string(),
            bucket_name_prefix: "deepfreeze".to_string(),
            base_path_prefix: "snapshots".to_string(),
            canned_acl: "private".to_string(),
            storage_class: "intelligent_tiering".to_string(),
            provider: Provider::Aws,
            rotate_by: RotateBy::Path,
            style: SuffixStyle::Oneup,
            last_suffix: None,
            thaw_request_retention_days_completed: 7,
            thaw_request_retention_days_failed: 30,
            thaw_request_retention_days_refrozen: 30,
        }
    }
}

impl Settings {
    /// `FromMap` constructor: deserialize a persisted document, explicit kwargs
    /// never implicitly override it the way the source's dual constructor did.
    pub fn from_map(value: Value) -> Result<Settings> {
        serde_json::from_value(value)
            .map_err(|e| DeepfreezeError::InvalidConfig(format!("malformed settings document: {e}")))
    }

    pub fn to_document(&self) -> Value {
        let mut doc = serde_json::to_value(self).expect("Settings always serializes");
        doc["doctype"] = json!("settings");
        doc
    }
}

/// `thaw_state` transitions: `active -> frozen -> thawing -> thawed -> expired -> frozen`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThawState {
    Active,
    Frozen,
    Thawing,
    Thawed,
    Expired,
}

impl std::fmt::Display for ThawState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThawState::Active => "active",
            ThawState::Frozen => "frozen",
            ThawState::Thawing => "thawing",
            ThawState::Thawed => "thawed",
            ThawState::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// One document per repository ever created. `thaw_state` is the single source of
/// truth; the legacy `is_thawed` boolean is computed only when serializing for
/// backward-compatible readers (older records in the status index).
#[derive(Clone, Debug)]
pub struct Repository {
    pub docid: Option<String>,
    pub name: String,
    pub bucket: String,
    pub base_path: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub thaw_state: ThawState,
    pub is_mounted: bool,
    pub thawed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Repository {
    pub fn new(name: impl Into<String>, bucket: impl Into<String>, base_path: impl Into<String>) -> Self {
        Repository {
            docid: None,
            name: name.into(),
            bucket: bucket.into(),
            base_path: base_path.into(),
            start: None,
            end: None,
            thaw_state: ThawState::Active,
            is_mounted: true,
            thawed_at: None,
            expires_at: None,
        }
    }

    /// Centralizes the source's `__post_init__` string -> datetime coercion and the
    /// `is_thawed`/`thaw_state` backward-compat promotion, in one factory.
    pub fn from_document(docid: impl Into<String>, raw: Value) -> Result<Repository> {
        let parse_dt = |key: &str| -> Option<DateTime<Utc>> {
            raw.get(key)
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        let thaw_state_raw = raw
            .get("thaw_state")
            .and_then(Value::as_str)
            .unwrap_or("active");
        let mut thaw_state = match thaw_state_raw {
            "active" => ThawState::Active,
            "frozen" => ThawState::Frozen,
            "thawing" => ThawState::Thawing,
            "thawed" => ThawState::Thawed,
            "expired" => ThawState::Expired,
            other => {
                return Err(DeepfreezeError::InvalidConfig(format!(
                    "unknown thaw_state in repository document: {other}"
                )));
            }
        };
        let is_mounted = raw
            .get("is_mounted")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let is_thawed_legacy = raw.get("is_thawed").and_then(Value::as_bool).unwrap_or(false);
        if is_thawed_legacy && thaw_state == ThawState::Frozen {
            thaw_state = if is_mounted {
                ThawState::Thawed
            } else {
                ThawState::Thawing
            };
        }

        Ok(Repository {
            docid: Some(docid.into()),
            name: raw
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            bucket: raw
                .get("bucket")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            base_path: raw
                .get("base_path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            start: parse_dt("start"),
            end: parse_dt("end"),
            thaw_state,
            is_mounted,
            thawed_at: parse_dt("thawed_at"),
            expires_at: parse_dt("expires_at"),
        })
    }

    pub fn to_document(&self) -> Value {
        json!({
            "doctype": "repository",
            "name": self.name,
            "bucket": self.bucket,
            "base_path": self.base_path,
            "start": self.start.map(|d| d.to_rfc3339()),
            "end": self.end.map(|d| d.to_rfc3339()),
            "thaw_state": self.thaw_state.to_string(),
            "is_mounted": self.is_mounted,
            "thawed_at": self.thawed_at.map(|d| d.to_rfc3339()),
            "expires_at": self.expires_at.map(|d| d.to_rfc3339()),
            // backward-compat only, computed, never read back into thaw_state directly
            "is_thawed": matches!(self.thaw_state, ThawState::Thawing | ThawState::Thawed),
        })
    }

    pub fn unmount(&mut self) {
        self.is_mounted = false;
    }

    pub fn start_thawing(&mut self, expires_at: DateTime<Utc>) {
        self.thaw_state = ThawState::Thawing;
        self.expires_at = Some(expires_at);
    }

    pub fn mark_thawed(&mut self, now: DateTime<Utc>) {
        self.thaw_state = ThawState::Thawed;
        self.thawed_at = Some(now);
        self.is_mounted = true;
    }

    pub fn mark_expired(&mut self) {
        self.thaw_state = ThawState::Expired;
    }

    /// `expired -> frozen` (also used, per DESIGN.md, to normalize refreeze's
    /// transition so it matches cleanup's).
    pub fn reset_to_frozen(&mut self) {
        self.thaw_state = ThawState::Frozen;
        self.is_mounted = false;
        self.thawed_at = None;
        self.expires_at = None;
    }

    pub fn is_thawed(&self) -> bool {
        matches!(self.thaw_state, ThawState::Thawing | ThawState::Thawed)
    }
}

impl PartialEq for Repository {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Repository {}
impl PartialOrd for Repository {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Repository {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThawRequestStatus {
    InProgress,
    Completed,
    Failed,
    Refrozen,
}

impl std::fmt::Display for ThawRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThawRequestStatus::InProgress => "in_progress",
            ThawRequestStatus::Completed => "completed",
            ThawRequestStatus::Failed => "failed",
            ThawRequestStatus::Refrozen => "refrozen",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThawRequest {
    pub request_id: Uuid,
    pub status: ThawRequestStatus,
    pub created_at: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub repos: Vec<String>,
}

impl ThawRequest {
    pub fn to_document(&self) -> Value {
        let mut doc = serde_json::to_value(self).expect("ThawRequest always serializes");
        doc["doctype"] = json!("thaw_request");
        doc
    }

    pub fn from_document(raw: Value) -> Result<ThawRequest> {
        serde_json::from_value(raw)
            .map_err(|e| DeepfreezeError::InvalidConfig(format!("malformed thaw_request document: {e}")))
    }
}

/// Outcome of one item inside a multi-item controller loop, replacing the
/// source's broad "catch Exception; log; continue" with an explicit result
/// aggregated into a `RunReport`.
#[derive(Debug)]
pub enum ItemOutcome {
    Ok(String),
    Skipped(String, String),
    Failed(String, DeepfreezeError),
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub items: Vec<ItemOutcome>,
}

impl RunReport {
    pub fn push_ok(&mut self, item: impl Into<String>) {
        self.items.push(ItemOutcome::Ok(item.into()));
    }
    pub fn push_skipped(&mut self, item: impl Into<String>, reason: impl Into<String>) {
        self.items.push(ItemOutcome::Skipped(item.into(), reason.into()));
    }
    pub fn push_failed(&mut self, item: impl Into<String>, err: DeepfreezeError) {
        self.items.push(ItemOutcome::Failed(item.into(), err));
    }
    pub fn failures(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i, ItemOutcome::Failed(..)))
            .count()
    }
}
