//! Repository registry (C3): reconciles the cluster's registered snapshot
//! repositories against the state store, computes the next suffix, and refreshes a
//! repository's recorded time coverage. Grounded in `utilities.py`'s
//! `get_matching_repo_names`, `get_next_suffix`, `get_timestamp_range`,
//! `update_repository_date_range`.

use chrono::{DateTime, Datelike, Utc};
use serde_json::{Value, json};

use crate::error::{DeepfreezeError, Result};
use crate::es::ClusterClient;
use crate::models::{Repository, SuffixStyle};
use crate::store::StateStore;

pub struct Registry<'a> {
    es: &'a ClusterClient,
    store: &'a StateStore,
}

impl<'a> Registry<'a> {
    pub fn new(es: &'a ClusterClient, store: &'a StateStore) -> Self {
        Registry { es, store }
    }

    /// Enumerates registered cluster repositories (not state-store records) whose
    /// name starts with `prefix`, descending.
    pub async fn matching_repo_names(&self, prefix: &str) -> Result<Vec<String>> {
        let all = self.es.get_all_repositories().await?;
        let mut names: Vec<String> = all
            .as_object()
            .map(|m| {
                m.keys()
                    .filter(|name| name.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    pub fn next_suffix(
        style: SuffixStyle,
        last_suffix: Option<&str>,
        year: Option<i32>,
        month: Option<u32>,
    ) -> Result<String> {
        match style {
            SuffixStyle::Oneup => {
                let current: u64 = match last_suffix {
                    Some(s) => s
                        .parse()
                        .map_err(|_| DeepfreezeError::InvalidConfig(format!(
                            "last_suffix {s:?} is not a valid integer for oneup style"
                        )))?,
                    None => 0,
                };
                let next = current + 1;
                Ok(format!("{next:0>6}"))
            }
            SuffixStyle::Date => {
                let now = Utc::now();
                let year = year.unwrap_or_else(|| now.year());
                let month = month.unwrap_or_else(|| now.month());
                Ok(format!("{year:04}.{month:02}"))
            }
        }
    }

    /// For each snapshot index in `repo`, try bare / `partial-<idx>` / `restored-<idx>`
    /// name variants in order; among those that exist, aggregate min/max `@timestamp`;
    /// replace (never widen) `repo.start`/`repo.end`; persist only if changed.
    pub async fn update_repository_date_range(&self, repo: &mut Repository) -> Result<bool> {
        let snapshots = self.es.get_snapshots(&repo.name).await?;
        let mut indices = std::collections::BTreeSet::new();
        if let Some(list) = snapshots.get("snapshots").and_then(Value::as_array) {
            for snap in list {
                if let Some(idx_list) = snap.get("indices").and_then(Value::as_array) {
                    for idx in idx_list {
                        if let Some(name) = idx.as_str() {
                            indices.insert(name.to_string());
                        }
                    }
                }
            }
        }

        let mut earliest: Option<DateTime<Utc>> = None;
        let mut latest: Option<DateTime<Utc>> = None;

        for idx in &indices {
            for candidate in [idx.clone(), format!("partial-{idx}"), format!("restored-{idx}")] {
                if !self.es.index_exists(&candidate).await.unwrap_or(false) {
                    continue;
                }
                if let Some((min, max)) = self.timestamp_range(&candidate).await? {
                    earliest = Some(earliest.map_or(min, |e| e.min(min)));
                    latest = Some(latest.map_or(max, |l| l.max(max)));
                }
            }
        }

        let changed = earliest != repo.start || latest != repo.end;
        if changed {
            repo.start = earliest;
            repo.end = latest;
            self.store.persist_repository(repo).await?;
        }
        Ok(changed)
    }

    async fn timestamp_range(&self, index: &str) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let body = json!({
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
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));
        let latest = resp
            .get("aggregations")
            .and_then(|a| a.get("latest"))
            .and_then(|a| a.get("value_as_string"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));
        match (earliest, latest) {
            (Some(e), Some(l)) => Ok(Some((e, l))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oneup_zero_pads_to_six_digits() {
        assert_eq!(
            Registry::next_suffix(SuffixStyle::Oneup, None, None, None).unwrap(),
            "000001"
        );
        assert_eq!(
            Registry::next_suffix(SuffixStyle::Oneup, Some("000006"), None, None).unwrap(),
            "000007"
        );
    }

    #[test]
    fn oneup_rolls_past_six_digits_cleanly() {
        assert_eq!(
            Registry::next_suffix(SuffixStyle::Oneup, Some("999999"), None, None).unwrap(),
            "1000000"
        );
    }

    #[test]
    fn date_style_uses_supplied_year_month() {
        assert_eq!(
            Registry::next_suffix(SuffixStyle::Date, None, Some(2024), Some(12)).unwrap(),
            "2024.12"
        );
    }

    #[test]
    fn oneup_rejects_non_numeric_last_suffix() {
        assert!(Registry::next_suffix(SuffixStyle::Oneup, Some("2024.03"), None, None).is_err());
    }
}
