//! Command-line surface: a `clap` derive one-shot subcommand group covering
//! setup, rotate, thaw, refreeze, cleanup, status, repair-metadata, and remount.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::models::{RotateBy, SuffixStyle};
use crate::s3::RestoreTier;

#[derive(Parser, Debug)]
#[command(name = "deepfreeze", about = "Cold-tier archival lifecycle controller")]
pub struct Cli {
    /// Elasticsearch-compatible cluster base URL, e.g. https://localhost:9200
    #[arg(long, env = "ES_URL")]
    pub es_url: String,

    /// API key sent as `Authorization: ApiKey <key>`
    #[arg(long, env = "ES_API_KEY")]
    pub es_api_key: Option<String>,

    /// Report what would happen without mutating the cluster or object store
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Emit tab-separated machine-parseable output instead of rich panels/tables
    #[arg(long, global = true)]
    pub porcelain: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RotateByArg {
    Path,
    Bucket,
}

impl From<RotateByArg> for RotateBy {
    fn from(value: RotateByArg) -> Self {
        match value {
            RotateByArg::Path => RotateBy::Path,
            RotateByArg::Bucket => RotateBy::Bucket,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SuffixStyleArg {
    Oneup,
    Date,
}

impl From<SuffixStyleArg> for SuffixStyle {
    fn from(value: SuffixStyleArg) -> Self {
        match value {
            SuffixStyleArg::Oneup => SuffixStyle::Oneup,
            SuffixStyleArg::Date => SuffixStyle::Date,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RetrievalTierArg {
    Standard,
    Expedited,
    Bulk,
}

impl From<RetrievalTierArg> for RestoreTier {
    fn from(value: RetrievalTierArg) -> Self {
        match value {
            RetrievalTierArg::Standard => RestoreTier::Standard,
            RetrievalTierArg::Expedited => RestoreTier::Expedited,
            RetrievalTierArg::Bulk => RestoreTier::Bulk,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// One-time initialization: status index, settings, initial bucket + repository
    Setup {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
        #[arg(long, default_value = "deepfreeze")]
        repo_name_prefix: String,
        #[arg(long, default_value = "deepfreeze")]
        bucket_name_prefix: String,
        #[arg(long, default_value = "snapshots")]
        base_path_prefix: String,
        #[arg(long, value_enum, default_value_t = RotateByArg::Path)]
        rotate_by: RotateByArg,
        #[arg(long, value_enum, default_value_t = SuffixStyleArg::Oneup)]
        style: SuffixStyleArg,
        #[arg(long, default_value = "private")]
        canned_acl: String,
        #[arg(long, default_value = "intelligent_tiering")]
        storage_class: String,
        #[arg(long)]
        create_sample_ilm_policy: bool,
    },

    /// Promote a new repository, version affected policies, demote old repositories
    Rotate {
        #[arg(long)]
        keep: Option<usize>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
    },

    /// Restore, mount, list, or poll thaw requests
    Thaw {
        #[command(subcommand)]
        mode: ThawMode,
    },

    /// Manually refreeze thawed repositories
    Refreeze {
        #[arg(long)]
        thaw_request_id: Option<Uuid>,
        /// Refreeze a single named repository instead of a thaw-request's set
        #[arg(long)]
        repo_name: Option<String>,
        /// Skip the interactive confirmation for multi-repository refreezes
        #[arg(long)]
        yes: bool,
    },

    /// Detect and process expired thaws, retire stale thaw-requests and policies
    Cleanup,

    /// Read-only dashboard over settings, repositories, buckets, and ILM policies
    Status {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        repos: bool,
        #[arg(long)]
        thawed: bool,
        #[arg(long)]
        buckets: bool,
        #[arg(long)]
        ilm: bool,
        #[arg(long)]
        config: bool,
    },

    /// Compare recorded thaw_state against actual object-store storage class
    RepairMetadata,

    /// Re-mount a thawed repository's objects under a `thawed-<repo>` alias
    Remount {
        #[arg(long)]
        thaw_request_id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum ThawMode {
    /// Initiate restores for repositories overlapping a date range
    Create {
        #[arg(long)]
        start_date: DateTime<Utc>,
        #[arg(long)]
        end_date: DateTime<Utc>,
        /// Block until every repository is mounted, polling restore status
        #[arg(long)]
        sync: bool,
        #[arg(long)]
        duration: Option<i32>,
        #[arg(long, value_enum, default_value_t = RetrievalTierArg::Standard)]
        retrieval_tier: RetrievalTierArg,
        #[arg(long)]
        poll_interval_secs: Option<u64>,
        #[arg(long)]
        max_wait_attempts: Option<u32>,
    },
    /// Poll and, when complete, mount a previously-created thaw request
    CheckStatus { request_id: Uuid },
    /// List all known thaw requests
    List,
}
