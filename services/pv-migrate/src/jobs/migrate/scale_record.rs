// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Original replica counts of every workload the run scaled down

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::scaler::WorkloadScaler;
use crate::store::ObjectRef;

/// Outcome of a rollback pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub failed: Vec<ObjectRef>,
}

/// Write-once map from workload to its replica count before the run
#[derive(Debug, Default)]
pub struct ScaleRecord {
    originals: DashMap<ObjectRef, i32>,
}

impl ScaleRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `replicas` as the original count of `workload`
    ///
    /// Only the first capture per workload is kept; later ones are ignored
    /// so a workload paused twice still restores to its pre-run size.
    /// Returns whether this call stored the value.
    pub fn capture_once(&self, workload: &ObjectRef, replicas: i32) -> bool {
        match self.originals.entry(workload.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(replicas);
                true
            }
        }
    }

    pub fn original(&self, workload: &ObjectRef) -> Option<i32> {
        self.originals.get(workload).map(|v| *v.value())
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    /// Sorted copy of every captured count
    pub fn snapshot(&self) -> Vec<(ObjectRef, i32)> {
        let mut entries: Vec<_> = self
            .originals
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort();
        entries
    }

    /// Scale every captured workload back to its original count
    ///
    /// Best-effort: a failure is logged and the pass continues with the
    /// remaining workloads. Runs to completion regardless of any run-level
    /// cancellation.
    pub async fn restore_all(&self, scaler: &WorkloadScaler) -> RestoreSummary {
        let never = CancellationToken::new();
        let mut summary = RestoreSummary::default();

        for (workload, replicas) in self.snapshot() {
            match scaler.scale(&workload, replicas, &never).await {
                Ok(()) => {
                    info!(workload = %workload, replicas, "Restored original replicas");
                    summary.restored += 1;
                }
                Err(e) => {
                    error!(
                        workload = %workload,
                        replicas,
                        error = %e,
                        "Failed to restore original replicas"
                    );
                    summary.failed.push(workload);
                }
            }
        }

        summary
    }
}
