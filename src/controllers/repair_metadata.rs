//! Repair-metadata controller (C9). Grounded in
//! `examples/original_source/curator/actions/deepfreeze/repair_metadata.py`.

use tracing::info;

use crate::error::Result;
use crate::es::ClusterClient;
use crate::models::{Repository, ThawState};
use crate::s3::S3Adapter;
use crate::store::StateStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClassification {
    Empty,
    Glacier,
    Standard,
    Mixed,
    Error,
}

pub struct RepairFinding {
    pub repo_name: String,
    pub recorded_state: ThawState,
    pub actual: ObjectClassification,
    pub corrected_to: Option<ThawState>,
}

pub struct RepairReport {
    pub total_repos: usize,
    pub findings: Vec<RepairFinding>,
}

impl RepairReport {
    pub fn correct(&self) -> usize {
        self.total_repos - self.discrepancies()
    }
    pub fn discrepancies(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.actual != ObjectClassification::Error)
            .count()
    }
    pub fn errors(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.actual == ObjectClassification::Error)
            .count()
    }
    pub fn fixed(&self) -> usize {
        self.findings.iter().filter(|f| f.corrected_to.is_some()).count()
    }
    pub fn failed(&self) -> usize {
        self.discrepancies() - self.fixed()
    }
}

pub struct RepairMetadataController<'a> {
    s3: &'a S3Adapter,
    store: &'a StateStore,
}

impl<'a> RepairMetadataController<'a> {
    pub fn new(_es: &'a ClusterClient, s3: &'a S3Adapter, store: &'a StateStore) -> Self {
        RepairMetadataController { s3, store }
    }

    pub async fn do_action(&self, dry_run: bool) -> Result<RepairReport> {
        let repos = self.store.all_repositories(None, None).await?;
        let mut findings = Vec::new();
        let mut total = 0usize;

        for mut repo in repos {
            if repo.bucket.is_empty() || repo.base_path.is_empty() {
                continue;
            }
            total += 1;

            let recorded_state = repo.thaw_state;
            let actual = self.classify(&repo).await;
            let expected = if recorded_state == ThawState::Frozen {
                ObjectClassification::Glacier
            } else {
                ObjectClassification::Standard
            };

            if actual == expected {
                continue;
            }

            let mut corrected_to = None;
            match actual {
                ObjectClassification::Glacier if recorded_state != ThawState::Frozen => {
                    if !dry_run {
                        repo.reset_to_frozen();
                        self.store.persist_repository(&mut repo).await?;
                    }
                    corrected_to = Some(ThawState::Frozen);
                }
                ObjectClassification::Standard if recorded_state == ThawState::Frozen => {
                    if !dry_run {
                        repo.thaw_state = ThawState::Active;
                        repo.thawed_at = None;
                        repo.expires_at = None;
                        self.store.persist_repository(&mut repo).await?;
                    }
                    corrected_to = Some(ThawState::Active);
                }
                _ => {}
            }

            info!(
                repo = %repo.name,
                recorded = %recorded_state,
                actual = ?actual,
                corrected = ?corrected_to,
                "repair-metadata discrepancy"
            );

            findings.push(RepairFinding {
                repo_name: repo.name.clone(),
                recorded_state,
                actual,
                corrected_to,
            });
        }

        Ok(RepairReport { total_repos: total, findings })
    }

    async fn classify(&self, repo: &Repository) -> ObjectClassification {
        let objects = match self.s3.list_objects(&repo.bucket, &repo.base_path).await {
            Ok(objects) => objects,
            Err(_) => return ObjectClassification::Error,
        };
        if objects.is_empty() {
            return ObjectClassification::Empty;
        }
        let glacier = objects.iter().filter(|o| o.storage_class.is_glacier_family()).count();
        if glacier == objects.len() {
            ObjectClassification::Glacier
        } else if glacier == 0 {
            ObjectClassification::Standard
        } else {
            ObjectClassification::Mixed
        }
    }
}
