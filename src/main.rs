mod cli;
mod controllers;
mod error;
mod es;
mod models;
mod policy;
mod registry;
mod s3;
mod store;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ThawMode};
use controllers::cleanup::CleanupController;
use controllers::remount::RemountController;
use controllers::repair_metadata::RepairMetadataController;
use controllers::rotate::RotateController;
use controllers::setup::SetupController;
use controllers::status::{StatusController, StatusSections};
use controllers::thaw::{ThawController, ThawCreateOptions};
use error::DeepfreezeError;
use es::ClusterClient;
use models::{Provider, Settings};
use s3::S3Adapter;
use store::StateStore;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ (DeepfreezeError::PreconditionError { .. }
        | DeepfreezeError::InvalidConfig(_)
        | DeepfreezeError::MissingIndex
        | DeepfreezeError::MissingSettings)) => {
            eprintln!("{e}");
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> error::Result<()> {
    let es = ClusterClient::new(cli.es_url.clone(), cli.es_api_key.clone())?;
    let store = StateStore::new(es.clone());
    let dry_run = cli.dry_run;
    let porcelain = cli.porcelain;

    match cli.command {
        Command::Setup {
            year,
            month,
            repo_name_prefix,
            bucket_name_prefix,
            base_path_prefix,
            rotate_by,
            style,
            canned_acl,
            storage_class,
            create_sample_ilm_policy,
        } => {
            let settings = Settings {
                repo_name_prefix,
                bucket_name_prefix,
                base_path_prefix,
                canned_acl,
                storage_class,
                provider: Provider::Aws,
                rotate_by: rotate_by.into(),
                style: style.into(),
                ..Settings::default()
            };
            let s3 = S3Adapter::for_provider(settings.provider).await?;
            let controller = SetupController::new(&es, &s3, &store, settings, year, month, create_sample_ilm_policy);
            if dry_run {
                controller.do_dry_run().await?;
            } else {
                let outcome = controller.do_action().await?;
                if porcelain {
                    println!("REPO\t{}", outcome.repo_name);
                    println!("BUCKET\t{}", outcome.bucket_name);
                    println!("BASE_PATH\t{}", outcome.base_path);
                } else {
                    println!("setup complete: repository {} (bucket {}, path {})", outcome.repo_name, outcome.bucket_name, outcome.base_path);
                    if let Some(policy) = outcome.ilm_policy_created {
                        println!("created sample ILM policy: {policy}");
                    }
                }
            }
        }

        Command::Rotate { keep, year, month } => {
            let settings = store.get_settings().await?;
            let s3 = S3Adapter::for_provider(settings.provider).await?;
            let controller = RotateController::new(&es, &s3, &store, keep, year, month);
            let outcome = controller.do_action(dry_run).await?;
            if porcelain {
                println!("NEW_REPO\t{}", outcome.new_repo_name);
                println!("POLICIES_VERSIONED\t{}", outcome.versioned_policies.len());
                println!("TEMPLATES_RETARGETED\t{}", outcome.templates_retargeted);
                println!("DEMOTED_OK\t{}", outcome.demoted.items.iter().filter(|i| matches!(i, models::ItemOutcome::Ok(_))).count());
                println!("DEMOTED_FAILED\t{}", outcome.demoted.failures());
            } else {
                println!("rotated to {}", outcome.new_repo_name);
                println!("{} policies versioned, {} templates retargeted", outcome.versioned_policies.len(), outcome.templates_retargeted);
                println!("{} failures while demoting older repositories", outcome.demoted.failures());
                println!("{} failures during cleanup reaper", outcome.cleanup.failures());
            }
        }

        Command::Thaw { mode } => {
            let settings = store.get_settings().await?;
            let s3 = S3Adapter::for_provider(settings.provider).await?;
            let controller = ThawController::new(&es, &s3, &store);
            match mode {
                ThawMode::Create {
                    start_date,
                    end_date,
                    sync,
                    duration,
                    retrieval_tier,
                    poll_interval_secs,
                    max_wait_attempts,
                } => {
                    let request_id = controller
                        .create(ThawCreateOptions {
                            start_date,
                            end_date,
                            duration_days: duration,
                            retrieval_tier: retrieval_tier.into(),
                            sync,
                            poll_interval_secs,
                            max_wait_attempts,
                        })
                        .await?;
                    if porcelain {
                        println!("REQUEST_ID\t{request_id}");
                    } else {
                        println!("thaw request created: {request_id}");
                    }
                }
                ThawMode::CheckStatus { request_id } => {
                    let complete = controller.check_status(request_id).await?;
                    if porcelain {
                        println!("REQUEST_ID\t{request_id}");
                        println!("COMPLETE\t{complete}");
                    } else {
                        println!("request {request_id}: {}", if complete { "completed" } else { "still in progress" });
                    }
                }
                ThawMode::List => {
                    let requests = controller.list().await?;
                    for request in requests {
                        if porcelain {
                            println!("{}\t{}\t{}", request.request_id, request.status, request.repos.join(","));
                        } else {
                            println!("{}  {}  repos: {}", request.request_id, request.status, request.repos.join(", "));
                        }
                    }
                }
            }
        }

        Command::Refreeze { thaw_request_id, repo_name, yes } => {
            let settings = store.get_settings().await?;
            let s3 = S3Adapter::for_provider(settings.provider).await?;
            let controller = CleanupController::new(&es, &s3, &store);

            let targets = if let Some(name) = repo_name {
                vec![store.get_repository(&name).await?]
            } else if let Some(request_id) = thaw_request_id {
                let Some(request) = store.get_thaw_request(request_id).await? else {
                    return Err(DeepfreezeError::RepositoryError(format!("no thaw request found with id {request_id}")));
                };
                store.get_repositories_by_names(&request.repos).await?
            } else {
                store
                    .all_repositories(None, Some(true))
                    .await?
                    .into_iter()
                    .filter(|r| r.is_thawed())
                    .collect()
            };

            if targets.len() > 1 && !yes && !dry_run {
                println!("this will refreeze {} repositories:", targets.len());
                for repo in targets.iter().take(3) {
                    println!("  {}", repo.name);
                }
                if targets.len() > 3 {
                    println!("  ... and {} more", targets.len() - 3);
                }
                println!("re-run with --yes to proceed");
                return Ok(());
            }

            let report = controller.refreeze(targets, dry_run).await?;
            println!("{} repositories refrozen, {} failures", report.items.len() - report.failures(), report.failures());
        }

        Command::Cleanup => {
            let settings = store.get_settings().await?;
            let s3 = S3Adapter::for_provider(settings.provider).await?;
            let controller = CleanupController::new(&es, &s3, &store);
            let report = controller.reap(dry_run).await?;
            println!("cleanup: {} items processed, {} failures", report.items.len(), report.failures());
        }

        Command::Status { limit, repos, thawed, buckets, ilm, config } => {
            let controller = StatusController::new(&es, &store);
            let sections = StatusSections { repos, thawed, buckets, ilm, config };
            let report = controller.do_action(sections, limit).await?;
            print_status_report(&report, porcelain);
        }

        Command::RepairMetadata => {
            let settings = store.get_settings().await?;
            let s3 = S3Adapter::for_provider(settings.provider).await?;
            let controller = RepairMetadataController::new(&es, &s3, &store);
            let report = controller.do_action(dry_run).await?;
            if porcelain {
                println!("TOTAL_REPOS={}", report.total_repos);
                println!("CORRECT={}", report.correct());
                println!("DISCREPANCIES={}", report.discrepancies());
                println!("ERRORS={}", report.errors());
                println!("FIXED={}", report.fixed());
                println!("FAILED={}", report.failed());
                for finding in &report.findings {
                    println!("REPOS_TO_FIX:\t{}\t{:?}\t{:?}", finding.repo_name, finding.actual, finding.corrected_to);
                }
            } else {
                println!("{} repositories scanned, {} discrepancies ({} fixed, {} errors)", report.total_repos, report.discrepancies(), report.fixed(), report.errors());
                for finding in &report.findings {
                    println!("  {}: recorded={} actual={:?} corrected_to={:?}", finding.repo_name, finding.recorded_state, finding.actual, finding.corrected_to);
                }
            }
        }

        Command::Remount { thaw_request_id } => {
            let settings = store.get_settings().await?;
            let s3 = S3Adapter::for_provider(settings.provider).await?;
            let controller = RemountController::new(&es, &s3, &store);
            let report = controller.do_action(thaw_request_id, dry_run).await?;
            println!("{} repositories remounted, {} failures", report.items.len() - report.failures(), report.failures());
        }
    }

    Ok(())
}

fn print_status_report(report: &controllers::status::StatusReport, porcelain: bool) {
    if porcelain {
        if let Some(settings) = &report.settings {
            println!("SETTINGS\t{}\t{}\t{}", settings.repo_name_prefix, settings.rotate_by, settings.style);
        }
        if let Some(name) = &report.cluster_name {
            println!("CLUSTER\t{name}");
        }
        for repo in &report.repos {
            println!("REPO\t{}\t{}\t{}", repo.name, repo.thaw_state, repo.is_mounted);
        }
        for repo in &report.thawed {
            println!("THAWED\t{}\t{}\t{:?}", repo.name, repo.thaw_state, repo.expires_at);
        }
        for bucket in &report.buckets {
            println!("BUCKET\t{}\t{}\t{}", bucket.bucket, bucket.base_path, bucket.is_current);
        }
        for policy in &report.ilm {
            println!("ILM\t{}\t{}\t{}\t{}", policy.name, policy.repo_name, policy.indices_in_use, policy.is_current);
        }
        return;
    }

    if let Some(name) = &report.cluster_name {
        println!("cluster: {name}");
    }
    if let Some(settings) = &report.settings {
        println!("settings: prefix={} rotate_by={} style={}", settings.repo_name_prefix, settings.rotate_by, settings.style);
    }
    if !report.thawed.is_empty() {
        println!("thawed repositories:");
        for repo in &report.thawed {
            println!("  {} ({}), mounted={}, expires={:?}", repo.name, repo.thaw_state, repo.is_mounted, repo.expires_at);
        }
    }
    if !report.repos.is_empty() {
        println!("repositories:");
        for repo in &report.repos {
            println!("  {} ({}), mounted={}", repo.name, repo.thaw_state, repo.is_mounted);
        }
    }
    if !report.buckets.is_empty() {
        println!("buckets:");
        for bucket in &report.buckets {
            let marker = if bucket.is_current { " (current)" } else { "" };
            println!("  {}/{}{}", bucket.bucket, bucket.base_path, marker);
        }
    }
    if !report.ilm.is_empty() {
        println!("ILM policies:");
        for policy in &report.ilm {
            let marker = if policy.is_current { " (current)" } else { "" };
            println!("  {} -> {} ({} indices, {} data streams){}", policy.name, policy.repo_name, policy.indices_in_use, policy.data_streams_in_use, marker);
        }
    }
}
