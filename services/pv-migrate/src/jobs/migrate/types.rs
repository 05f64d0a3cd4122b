// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Types for migration tracking

use std::fmt;

use crate::store::ObjectRef;

/// One step of the migration, named after the stage it reaches on success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Step {
    /// Backup claim created next to the original
    BackupProvisioned,
    /// Original data copied into the backup claim
    DataCopiedToBackup,
    /// Every workload in the namespace scaled to zero
    WorkloadsPaused,
    /// Original claim deleted
    OriginalVolumeReleased,
    /// Workloads scaled back up so they recreate the claim
    WorkloadsResumed,
    /// Recreated claim observed as bound
    ReplacementVolumeBound,
    /// Backup data copied into the recreated claim
    DataRestored,
}

impl Step {
    /// All steps in execution order
    pub const ALL: [Step; 7] = [
        Step::BackupProvisioned,
        Step::DataCopiedToBackup,
        Step::WorkloadsPaused,
        Step::OriginalVolumeReleased,
        Step::WorkloadsResumed,
        Step::ReplacementVolumeBound,
        Step::DataRestored,
    ];

    /// Stage an item must be in before this step is attempted
    pub fn requires(self) -> Stage {
        match self {
            Step::BackupProvisioned => Stage::Init,
            Step::DataCopiedToBackup => Stage::BackupProvisioned,
            Step::WorkloadsPaused => Stage::DataCopiedToBackup,
            Step::OriginalVolumeReleased => Stage::WorkloadsPaused,
            Step::WorkloadsResumed => Stage::OriginalVolumeReleased,
            Step::ReplacementVolumeBound => Stage::WorkloadsResumed,
            Step::DataRestored => Stage::ReplacementVolumeBound,
        }
    }

    /// Stage an item reaches when this step succeeds
    pub fn reaches(self) -> Stage {
        match self {
            Step::BackupProvisioned => Stage::BackupProvisioned,
            Step::DataCopiedToBackup => Stage::DataCopiedToBackup,
            Step::WorkloadsPaused => Stage::WorkloadsPaused,
            Step::OriginalVolumeReleased => Stage::OriginalVolumeReleased,
            Step::WorkloadsResumed => Stage::WorkloadsResumed,
            Step::ReplacementVolumeBound => Stage::ReplacementVolumeBound,
            Step::DataRestored => Stage::DataRestored,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.reaches(), f)
    }
}

/// Where an item is in the migration
///
/// Success stages only ever advance in declaration order. `Failed` records
/// the step that was attempted and did not succeed; a failed item takes no
/// part in any later step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    #[default]
    Init,
    BackupProvisioned,
    DataCopiedToBackup,
    WorkloadsPaused,
    OriginalVolumeReleased,
    WorkloadsResumed,
    ReplacementVolumeBound,
    DataRestored,
    Failed(Step),
}

impl Stage {
    /// Whether no further step will ever be attempted for this stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::DataRestored | Stage::Failed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Stage::Failed(_))
    }

    /// Step that would move an item on from this stage
    pub fn next_step(&self) -> Option<Step> {
        Step::ALL.into_iter().find(|step| step.requires() == *self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Init => write!(f, "Init"),
            Stage::BackupProvisioned => write!(f, "BackupProvisioned"),
            Stage::DataCopiedToBackup => write!(f, "DataCopiedToBackup"),
            Stage::WorkloadsPaused => write!(f, "WorkloadsPaused"),
            Stage::OriginalVolumeReleased => write!(f, "OriginalVolumeReleased"),
            Stage::WorkloadsResumed => write!(f, "WorkloadsResumed"),
            Stage::ReplacementVolumeBound => write!(f, "ReplacementVolumeBound"),
            Stage::DataRestored => write!(f, "DataRestored"),
            Stage::Failed(step) => write!(f, "Failed@{}", step),
        }
    }
}

/// A claim being migrated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationItem {
    pub claim: ObjectRef,
    /// Name of the backup claim holding the data while the original is gone
    pub backup_name: String,
    pub stage: Stage,
}

impl MigrationItem {
    pub fn new(claim: ObjectRef, backup_suffix: &str) -> Self {
        let backup_name = format!("{}{}", claim.name, backup_suffix);
        Self {
            claim,
            backup_name,
            stage: Stage::Init,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.claim.namespace
    }

    pub fn name(&self) -> &str {
        &self.claim.name
    }

    pub fn backup_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.claim.namespace, &self.backup_name)
    }

    /// Ledger key, `<namespace>/<name>`
    pub fn key(&self) -> String {
        self.claim.to_string()
    }

    /// Whether `step` may be attempted for this item now
    pub fn is_ready_for(&self, step: Step) -> bool {
        self.stage == step.requires()
    }
}
