// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Workload scaler
//!
//! Sets the desired replica count of a StatefulSet. Every attempt re-reads
//! the current object before writing it back, so a conflicting write is
//! retried against the newer version instead of overwriting it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::{ClusterStore, ObjectRef, StoreError};

/// Workload scaling errors
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gave up scaling {workload} after {attempts} attempt(s): {last}")]
    Exhausted {
        workload: ObjectRef,
        attempts: u32,
        #[source]
        last: StoreError,
    },

    #[error("Scaling cancelled")]
    Cancelled,
}

/// Retrying replica-count setter
#[derive(Clone)]
pub struct WorkloadScaler {
    store: Arc<dyn ClusterStore>,
    attempts: u32,
    retry_delay: Duration,
}

impl WorkloadScaler {
    pub fn new(store: Arc<dyn ClusterStore>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Set the desired replica count of `workload`
    ///
    /// Conflicts and transient store errors are retried up to the attempt
    /// budget with a fixed delay in between; anything else fails at once.
    /// Setting the count it already has is a no-op.
    pub async fn scale(
        &self,
        workload: &ObjectRef,
        replicas: i32,
        cancel: &CancellationToken,
    ) -> Result<(), ScaleError> {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ScaleError::Cancelled);
            }
            attempt += 1;

            let error = match self.try_scale(workload, replicas).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(ScaleError::Store(e)),
            };

            if attempt >= self.attempts {
                return Err(ScaleError::Exhausted {
                    workload: workload.clone(),
                    attempts: attempt,
                    last: error,
                });
            }

            warn!(
                workload = %workload,
                replicas,
                attempt,
                error = %error,
                "Scale attempt failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = cancel.cancelled() => return Err(ScaleError::Cancelled),
            }
        }
    }

    async fn try_scale(&self, workload: &ObjectRef, replicas: i32) -> Result<(), StoreError> {
        let mut current = self.store.get_workload(workload).await?;
        if current.replicas == replicas {
            debug!(workload = %workload, replicas, "Workload already at desired replicas");
            return Ok(());
        }

        debug!(
            workload = %workload,
            from = current.replicas,
            to = replicas,
            "Scaling workload"
        );
        current.replicas = replicas;
        self.store.update_workload(&current).await
    }
}
