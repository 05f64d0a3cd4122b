// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Migrate job implementation
//!
//! Moves every tenant claim bound to a volume on a draining node onto fresh
//! storage. For each claim the job:
//!
//! 1. Creates a backup claim of the same shape
//! 2. Copies the data into the backup
//! 3. Scales every workload in the namespace to zero
//! 4. Deletes the original claim
//! 5. Scales the workloads back up so they recreate the claim elsewhere
//! 6. Waits for the recreated claim to bind
//! 7. Copies the data back from the backup
//!
//! Every step runs for all eligible claims concurrently (bounded by
//! `max_concurrency`) and completes before the next step starts. A claim
//! that fails a step is marked `Failed@<step>` and takes no part in later
//! steps; other claims carry on.
//!
//! Whatever happens to the steps, every workload the job scaled down is
//! returned to its original replica count before `run` returns.

mod discovery;
mod ledger;
mod scale_record;
mod types;

pub use discovery::{ClaimFilter, SkipReason};
pub use ledger::StatusLedger;
pub use scale_record::{RestoreSummary, ScaleRecord};
pub use types::{MigrationItem, Stage, Step};

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::JobError;
use crate::config::MigrateConfig;
use crate::mover::{DataMover, MoverError};
use crate::poller::{BindOutcome, BindPoller};
use crate::scaler::{ScaleError, WorkloadScaler};
use crate::store::{ClusterStore, NewClaim, ObjectRef, StoreError};

/// Label placed on backup claims, valued with the drained node's name
pub const BACKUP_NODE_LABEL: &str = "scale.sealos.io/node";

/// Why a single claim failed a step
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scale error: {0}")]
    Scale(#[from] ScaleError),

    #[error("Data mover error: {0}")]
    Mover(#[from] MoverError),

    #[error("Claim {claim} did not bind after {checks} check(s)")]
    NotBound { claim: ObjectRef, checks: u32 },

    #[error("Step cancelled")]
    Cancelled,

    #[error("Step task failed: {0}")]
    Task(String),
}

/// Final state of a run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Every discovered claim with its terminal stage
    pub items: Vec<MigrationItem>,
    /// Outcome of restoring original replica counts
    pub rollback: RestoreSummary,
    /// Backup claims deleted after a successful restore
    pub backups_removed: usize,
    /// Whether the run was cancelled before finishing every step
    pub cancelled: bool,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.stage == Stage::DataRestored)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.stage.is_failed()).count()
    }

    pub fn stage_of(&self, claim: &ObjectRef) -> Option<Stage> {
        self.items
            .iter()
            .find(|i| &i.claim == claim)
            .map(|i| i.stage)
    }
}

/// Migration of every claim off one node
pub struct MigrateJob {
    node_name: String,
    config: MigrateConfig,
    store: Arc<dyn ClusterStore>,
    mover: Arc<dyn DataMover>,
    scaler: WorkloadScaler,
    poller: BindPoller,
    ledger: Arc<StatusLedger>,
    scale_record: Arc<ScaleRecord>,
    cancel: CancellationToken,
}

impl MigrateJob {
    pub fn new(
        node_name: impl Into<String>,
        config: MigrateConfig,
        store: Arc<dyn ClusterStore>,
        mover: Arc<dyn DataMover>,
        cancel: CancellationToken,
    ) -> Self {
        let scaler = WorkloadScaler::new(
            Arc::clone(&store),
            config.scale_attempts,
            config.scale_retry_delay(),
        );
        let poller = BindPoller::new(
            Arc::clone(&store),
            config.bind_poll_interval(),
            config.bind_max_errors,
            config.bind_max_pending,
        );

        Self {
            node_name: node_name.into(),
            config,
            store,
            mover,
            scaler,
            poller,
            ledger: Arc::new(StatusLedger::new()),
            scale_record: Arc::new(ScaleRecord::new()),
            cancel,
        }
    }

    /// Stage of every discovered claim, updated as the run progresses
    pub fn ledger(&self) -> Arc<StatusLedger> {
        Arc::clone(&self.ledger)
    }

    /// Original replica counts captured so far
    pub fn scale_record(&self) -> Arc<ScaleRecord> {
        Arc::clone(&self.scale_record)
    }

    /// Run the whole migration
    ///
    /// Only discovery failures are errors; a claim failing a step is
    /// reported through its stage. Rollback of workload replicas happens on
    /// every path once discovery succeeded.
    pub async fn run(self: Arc<Self>) -> Result<RunReport, JobError> {
        info!(node = %self.node_name, "Starting migration");

        let items = self.discover().await?;
        if items.is_empty() {
            info!(node = %self.node_name, "No claims to migrate");
            return Ok(RunReport::default());
        }
        info!(node = %self.node_name, count = items.len(), "Discovered claims");

        // The driver runs in its own task so a panic in it cannot skip the
        // rollback below.
        let driver = tokio::spawn({
            let job = Arc::clone(&self);
            let items = items.clone();
            async move { job.drive(items).await }
        });
        let driven = driver.await;

        let rollback = self.rollback().await;

        let (items, backups_removed) = match driven {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Stage driver failed");
                (fail_unfinished(&self.ledger, items), 0)
            }
        };

        let report = RunReport {
            items,
            rollback,
            backups_removed,
            cancelled: self.cancel.is_cancelled(),
        };

        info!(
            node = %self.node_name,
            completed = report.completed(),
            failed = report.failed(),
            restored_workloads = report.rollback.restored,
            cancelled = report.cancelled,
            "Migration finished"
        );

        Ok(report)
    }

    /// Find the claims to migrate and record them as `Init`
    async fn discover(&self) -> Result<Vec<MigrationItem>, JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let filter = ClaimFilter {
            tenant_prefix: self.config.tenant_prefix.clone(),
            backup_suffix: self.config.backup_suffix.clone(),
        };

        let volumes = self
            .store
            .list_volumes()
            .await
            .map_err(JobError::Discovery)?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for volume in volumes.iter().filter(|v| v.is_on_node(&self.node_name)) {
            let Some(claim_ref) = &volume.claim_ref else {
                debug!(volume = %volume.name, "Volume has no claim, skipping");
                continue;
            };
            if !claim_ref.namespace.starts_with(&filter.tenant_prefix) {
                debug!(claim = %claim_ref, "Not a tenant namespace, skipping");
                continue;
            }
            if !seen.insert(claim_ref.clone()) {
                continue;
            }

            let claim = match self.store.get_claim(claim_ref).await {
                Ok(claim) => claim,
                Err(StoreError::NotFound { .. }) => {
                    warn!(
                        volume = %volume.name,
                        claim = %claim_ref,
                        "Claim referenced by volume no longer exists, skipping"
                    );
                    continue;
                }
                Err(e) => return Err(JobError::Discovery(e)),
            };

            if let Err(reason) = filter.check(&claim) {
                debug!(claim = %claim_ref, ?reason, "Skipping claim");
                continue;
            }

            let item = MigrationItem::new(claim.object_ref(), &self.config.backup_suffix);
            self.ledger.record(&item.key(), item.stage);
            info!(claim = %item.claim, volume = %volume.name, "Selected claim for migration");
            items.push(item);
        }

        items.sort_by(|a, b| a.claim.cmp(&b.claim));
        Ok(items)
    }

    /// Run every step in order, then the optional backup cleanup
    async fn drive(self: Arc<Self>, mut items: Vec<MigrationItem>) -> (Vec<MigrationItem>, usize) {
        self.run_step(&mut items, Step::BackupProvisioned, |job, item| async move {
            job.provision_backup(&item).await
        })
        .await;

        self.run_step(&mut items, Step::DataCopiedToBackup, |job, item| async move {
            job.copy_to_backup(&item).await
        })
        .await;

        self.run_step(&mut items, Step::WorkloadsPaused, |job, item| async move {
            job.pause_workloads(&item).await
        })
        .await;

        self.run_step(&mut items, Step::OriginalVolumeReleased, |job, item| async move {
            job.release_original(&item).await
        })
        .await;

        self.run_step(&mut items, Step::WorkloadsResumed, |job, item| async move {
            job.resume_workloads(&item).await
        })
        .await;

        if items.iter().any(|i| i.stage == Stage::WorkloadsResumed) {
            self.settle().await;
        }

        self.run_step(&mut items, Step::ReplacementVolumeBound, |job, item| async move {
            job.await_replacement(&item).await
        })
        .await;

        self.run_step(&mut items, Step::DataRestored, |job, item| async move {
            job.restore_data(&item).await
        })
        .await;

        let removed = if self.config.cleanup_backups {
            self.cleanup_backups(&items).await
        } else {
            0
        };

        (items, removed)
    }

    /// Apply `action` to every item ready for `step`, at most
    /// `max_concurrency` at a time, and record each outcome
    async fn run_step<F, Fut>(self: &Arc<Self>, items: &mut [MigrationItem], step: Step, action: F)
    where
        F: Fn(Arc<Self>, MigrationItem) -> Fut,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        let ready: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_ready_for(step))
            .map(|(idx, _)| idx)
            .collect();

        if ready.is_empty() {
            debug!(stage = %step, "No claims ready, skipping stage");
            return;
        }
        info!(stage = %step, count = ready.len(), "Starting stage");

        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<(usize, Result<(), StepError>)> = JoinSet::new();

        for &idx in &ready {
            let work = action(Arc::clone(self), items[idx].clone());
            let permits = Arc::clone(&permits);
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let guarded = async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return Err(StepError::Task("semaphore closed".to_string()));
                    };
                    if cancel.is_cancelled() {
                        return Err(StepError::Cancelled);
                    }
                    work.await
                };

                // Inner task turns a panic into a failure of this item
                let result = match tokio::spawn(guarded).await {
                    Ok(result) => result,
                    Err(e) => Err(StepError::Task(e.to_string())),
                };
                (idx, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => self.settle_item(&mut items[idx], step, result),
                Err(e) => error!(stage = %step, error = %e, "Stage task failed"),
            }
        }

        // An item whose task vanished must still end up terminal
        for idx in ready {
            if items[idx].is_ready_for(step) {
                let lost = Err(StepError::Task("outcome lost".to_string()));
                self.settle_item(&mut items[idx], step, lost);
            }
        }

        info!(stage = %step, "Stage finished");
    }

    fn settle_item(&self, item: &mut MigrationItem, step: Step, result: Result<(), StepError>) {
        match result {
            Ok(()) => {
                item.stage = step.reaches();
                info!(claim = %item.claim, stage = %item.stage, "Claim advanced");
            }
            Err(e) => {
                item.stage = Stage::Failed(step);
                error!(claim = %item.claim, stage = %item.stage, error = %e, "Claim failed");
            }
        }
        self.ledger.record(&item.key(), item.stage);
    }

    async fn provision_backup(&self, item: &MigrationItem) -> Result<(), StepError> {
        let source = self.store.get_claim(&item.claim).await?;
        let backup = NewClaim::like(&source, &item.backup_name)
            .with_label(BACKUP_NODE_LABEL, &self.node_name);

        match self.store.create_claim(&backup).await {
            Ok(()) => info!(claim = %item.claim, backup = %item.backup_name, "Created backup claim"),
            Err(StoreError::AlreadyExists { .. }) => {
                info!(claim = %item.claim, backup = %item.backup_name, "Backup claim already exists")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn copy_to_backup(&self, item: &MigrationItem) -> Result<(), StepError> {
        self.mover
            .copy(item.namespace(), item.name(), &item.backup_name, &self.cancel)
            .await?;
        Ok(())
    }

    /// Scale every workload in the namespace to zero, capturing its count
    /// first
    async fn pause_workloads(&self, item: &MigrationItem) -> Result<(), StepError> {
        let workloads = self.store.list_workloads(item.namespace()).await?;

        for workload in workloads {
            let workload_ref = workload.object_ref();
            if self
                .scale_record
                .capture_once(&workload_ref, workload.replicas)
            {
                debug!(
                    workload = %workload_ref,
                    replicas = workload.replicas,
                    "Captured original replicas"
                );
            }
            self.scaler.scale(&workload_ref, 0, &self.cancel).await?;
        }
        Ok(())
    }

    async fn release_original(&self, item: &MigrationItem) -> Result<(), StepError> {
        match self.store.delete_claim(&item.claim).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                warn!(claim = %item.claim, "Original claim already gone")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn resume_workloads(&self, item: &MigrationItem) -> Result<(), StepError> {
        let workloads = self.store.list_workloads(item.namespace()).await?;

        for workload in workloads {
            self.scaler
                .scale(
                    &workload.object_ref(),
                    self.config.resume_replicas,
                    &self.cancel,
                )
                .await?;
        }
        Ok(())
    }

    /// Give resumed workloads time to recreate their claims
    async fn settle(&self) {
        let delay = self.config.resume_settle();
        if delay.is_zero() {
            return;
        }

        info!(secs = delay.as_secs(), "Waiting for workloads to recreate claims");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.cancel.cancelled() => debug!("Settle wait cancelled"),
        }
    }

    async fn await_replacement(&self, item: &MigrationItem) -> Result<(), StepError> {
        match self.poller.wait_for_bound(&item.claim, &self.cancel).await {
            BindOutcome::Bound { checks } => {
                debug!(claim = %item.claim, checks, "Replacement claim bound");
                Ok(())
            }
            BindOutcome::Cancelled { .. } => Err(StepError::Cancelled),
            BindOutcome::NotBound { checks, .. } => Err(StepError::NotBound {
                claim: item.claim.clone(),
                checks,
            }),
        }
    }

    async fn restore_data(&self, item: &MigrationItem) -> Result<(), StepError> {
        self.mover
            .copy(item.namespace(), &item.backup_name, item.name(), &self.cancel)
            .await?;
        Ok(())
    }

    /// Delete the backup claims of fully restored items
    ///
    /// Best-effort: failures are logged and leave the backup in place.
    async fn cleanup_backups(&self, items: &[MigrationItem]) -> usize {
        let mut removed = 0;

        for item in items.iter().filter(|i| i.stage == Stage::DataRestored) {
            if self.cancel.is_cancelled() {
                warn!("Backup cleanup cancelled");
                break;
            }
            match self.store.delete_claim(&item.backup_ref()).await {
                Ok(()) => {
                    info!(backup = %item.backup_ref(), "Removed backup claim");
                    removed += 1;
                }
                Err(e) => {
                    warn!(backup = %item.backup_ref(), error = %e, "Failed to remove backup claim")
                }
            }
        }

        removed
    }

    /// Restore every captured workload to its original replica count
    async fn rollback(&self) -> RestoreSummary {
        if self.scale_record.is_empty() {
            debug!("No workloads were scaled, nothing to restore");
            return RestoreSummary::default();
        }

        info!(
            workloads = self.scale_record.len(),
            "Restoring original replica counts"
        );
        let summary = self.scale_record.restore_all(&self.scaler).await;

        for (workload, replicas) in self.scale_record.snapshot() {
            info!(workload = %workload, replicas, "Original replicas");
        }
        if !summary.failed.is_empty() {
            error!(
                failed = summary.failed.len(),
                "Some workloads could not be restored"
            );
        }

        summary
    }
}

/// Take each item's last recorded stage and fail any item left mid-run at
/// the step it was waiting for
fn fail_unfinished(ledger: &StatusLedger, items: Vec<MigrationItem>) -> Vec<MigrationItem> {
    items
        .into_iter()
        .map(|mut item| {
            let key = item.key();
            if let Some(stage) = ledger.get(&key) {
                item.stage = stage;
            }
            if let Some(step) = item.stage.next_step() {
                item.stage = Stage::Failed(step);
                ledger.record(&key, item.stage);
                error!(claim = %item.claim, stage = %item.stage, "Claim left unfinished");
            }
            item
        })
        .collect()
}
