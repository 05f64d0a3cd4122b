// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Bind poller
//!
//! Waits, with a hard bound on the number of checks, for a recreated claim
//! to reach the `Bound` phase.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::{ClaimPhase, ClusterStore, ObjectRef};

/// Result of waiting for a claim to bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound {
        checks: u32,
    },
    /// The claim was still not bound when a budget ran out
    NotBound {
        checks: u32,
        errors: u32,
        pending: u32,
        last_phase: Option<ClaimPhase>,
    },
    Cancelled {
        checks: u32,
    },
}

impl BindOutcome {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }

    pub fn checks(&self) -> u32 {
        match self {
            Self::Bound { checks } | Self::Cancelled { checks } => *checks,
            Self::NotBound { checks, .. } => *checks,
        }
    }
}

/// Bounded claim-status poller
///
/// Read errors and not-yet-bound observations are counted separately, each
/// against its own cap, in the same loop. The poll gives up as soon as
/// either count reaches its cap, so a single wait never makes more than
/// `max_errors + max_pending - 1` checks.
#[derive(Clone)]
pub struct BindPoller {
    store: Arc<dyn ClusterStore>,
    interval: Duration,
    max_errors: u32,
    max_pending: u32,
}

impl BindPoller {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        interval: Duration,
        max_errors: u32,
        max_pending: u32,
    ) -> Self {
        Self {
            store,
            interval,
            max_errors: max_errors.max(1),
            max_pending: max_pending.max(1),
        }
    }

    pub async fn wait_for_bound(&self, claim: &ObjectRef, cancel: &CancellationToken) -> BindOutcome {
        let mut checks = 0u32;
        let mut errors = 0u32;
        let mut pending = 0u32;
        let mut last_phase = None;

        loop {
            if cancel.is_cancelled() {
                return BindOutcome::Cancelled { checks };
            }

            checks += 1;
            match self.store.get_claim(claim).await {
                Ok(c) if c.is_bound() => {
                    debug!(claim = %claim, checks, "Claim is bound");
                    return BindOutcome::Bound { checks };
                }
                Ok(c) => {
                    pending += 1;
                    debug!(claim = %claim, phase = %c.phase, pending, "Claim not bound yet");
                    last_phase = Some(c.phase);
                }
                Err(e) => {
                    errors += 1;
                    warn!(claim = %claim, error = %e, errors, "Failed to read claim");
                }
            }

            if errors >= self.max_errors || pending >= self.max_pending {
                return BindOutcome::NotBound {
                    checks,
                    errors,
                    pending,
                    last_phase,
                };
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => return BindOutcome::Cancelled { checks },
            }
        }
    }
}
