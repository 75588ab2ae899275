pub mod cleanup;
pub mod remount;
pub mod repair_metadata;
pub mod rotate;
pub mod setup;
pub mod status;
pub mod thaw;

/// Naming helpers shared by setup/rotate.
pub fn repo_name(prefix: &str, suffix: &str) -> String {
    format!("{prefix}-{suffix}")
}

pub fn bucket_and_base_path(
    rotate_by: crate::models::RotateBy,
    bucket_prefix: &str,
    base_path_prefix: &str,
    suffix: &str,
) -> (String, String) {
    match rotate_by {
        crate::models::RotateBy::Bucket => (
            format!("{bucket_prefix}-{suffix}"),
            base_path_prefix.to_string(),
        ),
        crate::models::RotateBy::Path => (
            bucket_prefix.to_string(),
            format!("{base_path_prefix}-{suffix}"),
        ),
    }
}

/// The repository body sent to the cluster for every create_repository call.
pub fn repository_body(bucket: &str, base_path: &str, canned_acl: &str, storage_class: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "s3",
        "settings": {
            "bucket": bucket,
            "base_path": base_path,
            "canned_acl": canned_acl,
            "storage_class": storage_class,
        }
    })
}
