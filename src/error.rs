use thiserror::Error;

/// One aggregated precondition failure, rendered as a rich panel (issue + solution)
/// or, under `--porcelain`, a single `ERROR\tprecondition\t<issue>` line.
#[derive(Clone, Debug)]
pub struct PreconditionIssue {
    pub issue: String,
    pub solution: String,
}

#[derive(Error, Debug)]
pub enum DeepfreezeError {
    #[error("status index is required but not present")]
    MissingIndex,

    #[error("status index exists but the settings document is absent")]
    MissingSettings,

    #[error("{} precondition error(s) must be resolved before this action can proceed", .issues.len())]
    PreconditionError { issues: Vec<PreconditionIssue> },

    #[error("repository error: {0}")]
    RepositoryError(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("object store error: {0}")]
    ObjectStoreError(String),

    #[error("cluster error: {0}")]
    ClusterError(String),

    #[error("action error: {0}")]
    ActionError(String),
}

pub type Result<T> = std::result::Result<T, DeepfreezeError>;

impl From<aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>>
    for DeepfreezeError
{
    fn from(
        e: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>,
    ) -> Self {
        DeepfreezeError::ObjectStoreError(e.to_string())
    }
}

impl From<reqwest::Error> for DeepfreezeError {
    fn from(e: reqwest::Error) -> Self {
        DeepfreezeError::ClusterError(e.to_string())
    }
}

impl From<serde_json::Error> for DeepfreezeError {
    fn from(e: serde_json::Error) -> Self {
        DeepfreezeError::ActionError(format!("serialization error: {e}"))
    }
}
