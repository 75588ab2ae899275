//! Policy/template mutator (C4). Grounded in `utilities.py`'s
//! `get_policies_for_repo`, `get_policies_by_suffix`, `is_policy_safe_to_delete`,
//! `create_versioned_ilm_policy`, `update_template_ilm_policy`.
//!
//! Every ILM policy and index template body lives in the cluster itself; nothing
//! here persists to a local file.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::es::ClusterClient;

pub struct PolicyMutator<'a> {
    es: &'a ClusterClient,
}

impl<'a> PolicyMutator<'a> {
    pub fn new(es: &'a ClusterClient) -> Self {
        PolicyMutator { es }
    }

    /// Scans every lifecycle policy for a phase whose `searchable_snapshot` action
    /// names `repo_name`.
    pub async fn policies_referencing(&self, repo_name: &str) -> Result<BTreeMap<String, Value>> {
        let policies = self.es.get_lifecycle().await?;
        let mut out = BTreeMap::new();
        let Some(map) = policies.as_object() else {
            return Ok(out);
        };
        for (name, entry) in map {
            if policy_phases_reference(entry, repo_name) {
                out.insert(name.clone(), entry.clone());
            }
        }
        Ok(out)
    }

    pub async fn policies_with_suffix(&self, suffix: &str) -> Result<BTreeMap<String, Value>> {
        let policies = self.es.get_lifecycle().await?;
        let mut out = BTreeMap::new();
        let Some(map) = policies.as_object() else {
            return Ok(out);
        };
        let tail = format!("-{suffix}");
        for (name, entry) in map {
            if name.ends_with(&tail) {
                out.insert(name.clone(), entry.clone());
            }
        }
        Ok(out)
    }

    pub fn policy_safe_to_delete(entry: &Value) -> bool {
        let in_use_by = entry.get("in_use_by");
        let empty = |key: &str| {
            in_use_by
                .and_then(|v| v.get(key))
                .and_then(Value::as_array)
                .map(|a| a.is_empty())
                .unwrap_or(true)
        };
        empty("indices") && empty("data_streams") && empty("composable_templates")
    }

    /// Strips a trailing `-<digits>` or `-<YYYY.MM>` suffix segment so repeated
    /// rotations don't chain `my-policy-000001-000002`.
    pub fn base_policy_name(name: &str) -> String {
        match name.rsplit_once('-') {
            Some((head, tail)) if looks_like_suffix(tail) => head.to_string(),
            _ => name.to_string(),
        }
    }

    /// Deep-copies `body`, rewrites every phase's `searchable_snapshot.snapshot_repository`
    /// to `new_repo`. Pure given identical input; registration
    /// is the only side effect, performed by the caller after this returns.
    pub fn rewrite_policy_body(body: &Value, new_repo: &str) -> Value {
        let mut out = body.clone();
        if let Some(phases) = out
            .get_mut("policy")
            .and_then(|p| p.get_mut("phases"))
            .and_then(Value::as_object_mut)
        {
            for phase in phases.values_mut() {
                if let Some(action) = phase
                    .get_mut("actions")
                    .and_then(|a| a.get_mut("searchable_snapshot"))
                {
                    action["snapshot_repository"] = Value::String(new_repo.to_string());
                }
                if phase
                    .get("actions")
                    .and_then(|a| a.get("delete"))
                    .and_then(|d| d.get("delete_searchable_snapshot"))
                    .and_then(Value::as_bool)
                    == Some(true)
                {
                    warn!(
                        "policy phase has delete_searchable_snapshot=true; versioning may lose data when this policy eventually deletes indices"
                    );
                }
            }
        }
        out
    }

    pub async fn create_versioned_policy(
        &self,
        base_name: &str,
        body: &Value,
        new_repo: &str,
        suffix: &str,
    ) -> Result<String> {
        let new_name = format!("{base_name}-{suffix}");
        let rewritten = Self::rewrite_policy_body(body, new_repo);
        self.es.put_lifecycle(&new_name, &wrap_policy(&rewritten)).await?;
        Ok(new_name)
    }

    /// For both composable and legacy templates, if `settings.index.lifecycle.name`
    /// equals any key of `mapping`, rewrite to the mapped value and PUT it back.
    pub async fn retarget_templates(&self, mapping: &BTreeMap<String, String>) -> Result<usize> {
        let mut updated = 0usize;

        let composable = self.es.get_index_templates().await?;
        if let Some(list) = composable.get("index_templates").and_then(Value::as_array) {
            for entry in list {
                let Some(name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let Some(template) = entry.get("index_template") else {
                    continue;
                };
                if let Some(new_template) = retarget_one_template(template, mapping, true) {
                    self.es.put_index_template(name, &new_template).await?;
                    updated += 1;
                }
            }
        }

        let legacy = self.es.get_legacy_templates().await?;
        if let Some(map) = legacy.as_object() {
            for (name, template) in map {
                if let Some(new_template) = retarget_one_template(template, mapping, false) {
                    self.es.put_legacy_template(name, &new_template).await?;
                    updated += 1;
                }
            }
        }

        Ok(updated)
    }
}

fn looks_like_suffix(tail: &str) -> bool {
    let is_digits = !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit());
    let is_year_month = tail.len() == 7
        && tail.as_bytes()[4] == b'.'
        && tail[..4].chars().all(|c| c.is_ascii_digit())
        && tail[5..].chars().all(|c| c.is_ascii_digit());
    is_digits || is_year_month
}

fn wrap_policy(rewritten: &Value) -> Value {
    match rewritten.get("policy") {
        Some(policy) => serde_json::json!({ "policy": policy }),
        None => rewritten.clone(),
    }
}

fn policy_phases_reference(entry: &Value, repo_name: &str) -> bool {
    let Some(phases) = entry
        .get("policy")
        .and_then(|p| p.get("phases"))
        .and_then(Value::as_object)
    else {
        return false;
    };
    phases.values().any(|phase| {
        phase
            .get("actions")
            .and_then(|a| a.get("searchable_snapshot"))
            .and_then(|s| s.get("snapshot_repository"))
            .and_then(Value::as_str)
            == Some(repo_name)
    })
}

fn retarget_one_template(
    template: &Value,
    mapping: &BTreeMap<String, String>,
    composable: bool,
) -> Option<Value> {
    let settings_path: &[&str] = if composable {
        &["template", "settings", "index", "lifecycle", "name"]
    } else {
        &["settings", "index", "lifecycle", "name"]
    };
    let mut cursor = template;
    for segment in settings_path {
        cursor = cursor.get(segment)?;
    }
    let current_policy = cursor.as_str()?;
    let new_policy = mapping.get(current_policy)?;

    let mut out = template.clone();
    let mut cursor_mut = &mut out;
    for segment in &settings_path[..settings_path.len() - 1] {
        cursor_mut = cursor_mut.get_mut(*segment)?;
    }
    cursor_mut[*settings_path.last().unwrap()] = Value::String(new_policy.clone());
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_numeric_suffix() {
        assert_eq!(PolicyMutator::base_policy_name("logs-policy-000004"), "logs-policy");
    }

    #[test]
    fn strips_date_suffix() {
        assert_eq!(PolicyMutator::base_policy_name("logs-policy-2024.03"), "logs-policy");
    }

    #[test]
    fn leaves_non_suffixed_name_alone() {
        assert_eq!(PolicyMutator::base_policy_name("logs-policy"), "logs-policy");
    }

    #[test]
    fn rewrite_retargets_every_phase() {
        let body = serde_json::json!({
            "policy": {
                "phases": {
                    "frozen": { "actions": { "searchable_snapshot": { "snapshot_repository": "deepfreeze-000001" } } },
                    "delete": { "actions": { "delete": { "delete_searchable_snapshot": false } } }
                }
            }
        });
        let rewritten = PolicyMutator::rewrite_policy_body(&body, "deepfreeze-000002");
        assert_eq!(
            rewritten["policy"]["phases"]["frozen"]["actions"]["searchable_snapshot"]["snapshot_repository"],
            "deepfreeze-000002"
        );
    }
}
