// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! PV Migrate
//!
//! Migrates every tenant persistent volume claim off a node that is being
//! drained, then writes a per-claim status report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pv_migrate::config::{ConfigFile, KubeConfig, MigrateConfig, split_command};
use pv_migrate::jobs::migrate::MigrateJob;
use pv_migrate::kube::KubeClient;
use pv_migrate::mover::CommandMover;

#[derive(Parser)]
#[command(name = "pv-migrate")]
#[command(about = "Migrate persistent volume claims off a draining node", long_about = None)]
#[command(version)]
struct Cli {
    /// Node whose volumes are migrated
    #[arg(long, alias = "nodeName", env = "NODE_NAME")]
    node_name: String,

    /// JSON file with run tunables
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Maximum claims worked on at once within a stage
    #[arg(long)]
    concurrency: Option<usize>,

    /// Where the status report is written
    #[arg(long)]
    report: Option<PathBuf>,

    /// Data mover command line, e.g. "./bin/migrate.sh"
    #[arg(long)]
    data_mover: Option<String>,

    /// Delete backup claims of successfully restored claims
    #[arg(long)]
    cleanup_backups: bool,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn log_filter(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| {
            let level = match (self.quiet, self.verbose) {
                (true, _) => "warn",
                (false, 0) => "info",
                (false, 1) => "debug",
                (false, _) => "trace",
            };
            format!("pv_migrate={}", level)
        })
    }

    /// Build the run configuration: defaults, environment, file, flags
    async fn migrate_config(&self) -> Result<MigrateConfig> {
        let mut config = MigrateConfig::from_env().context("Failed to load configuration")?;

        if let Some(path) = &self.config {
            let file = ConfigFile::from_file(path).await?;
            config.merge_tunables(&file);
            info!(config_file = %path.display(), "Loaded config file");
        }

        if let Some(concurrency) = self.concurrency {
            config.max_concurrency = concurrency;
        }
        if let Some(report) = &self.report {
            config.report_path = report.clone();
        }
        if let Some(command) = &self.data_mover {
            config.data_mover = split_command(command);
        }
        if self.cleanup_backups {
            config.cleanup_backups = true;
        }

        config.validate()?;
        Ok(config)
    }
}

fn print_version() {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");
    let buildstamp = option_env!("STAMP").unwrap_or("no-STAMP");
    info!("{} {} ({})", name, version, buildstamp);
}

/// Cancel `token` on SIGINT or SIGTERM
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut term = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted, cancelling migration");
                        token.cancel();
                    }
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => warn!("Interrupted, cancelling migration"),
                _ = term.recv() => warn!("Terminated, cancelling migration"),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Interrupted, cancelling migration");
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(cli.log_filter()))
        .init();

    print_version();

    // reqwest is built without a default rustls provider
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let config = cli.migrate_config().await?;
    info!(
        node = %cli.node_name,
        tenant_prefix = %config.tenant_prefix,
        max_concurrency = config.max_concurrency,
        report = %config.report_path.display(),
        "Configuration loaded"
    );

    let kube_config = KubeConfig::from_env(config.http_timeout_secs)?;
    info!(api_url = %kube_config.api_url, "Using Kubernetes API server");
    let store = KubeClient::new(&kube_config).context("Failed to create Kubernetes client")?;

    let mover = CommandMover::from_command(&config.data_mover)
        .context("data mover command must not be empty")?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let report_path = config.report_path.clone();
    let job = Arc::new(MigrateJob::new(
        cli.node_name.clone(),
        config,
        Arc::new(store),
        Arc::new(mover),
        cancel,
    ));
    let ledger = job.ledger();

    let result = Arc::clone(&job).run().await;

    // The report is written whatever the outcome of the run
    match ledger.dump_to_path(&report_path) {
        Ok(lines) => info!(report = %report_path.display(), lines, "Wrote status report"),
        Err(e) => error!(report = %report_path.display(), error = %e, "Failed to write status report"),
    }

    let report = result.context("Migration aborted")?;
    if report.cancelled {
        warn!("Migration was cancelled before all stages ran");
    }
    if !report.rollback.failed.is_empty() {
        for workload in &report.rollback.failed {
            error!(workload = %workload, "Workload left at modified replica count");
        }
    }

    info!(
        completed = report.completed(),
        failed = report.failed(),
        backups_removed = report.backups_removed,
        "Done"
    );

    Ok(())
}
