// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Candidate claim selection

use crate::store::Claim;

/// Naming rules deciding which claims on the node are migrated
#[derive(Debug, Clone)]
pub struct ClaimFilter {
    pub tenant_prefix: String,
    pub backup_suffix: String,
}

/// Why a claim on the node is left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Namespace does not carry the tenant prefix
    NotTenant,
    /// Claim is itself a backup copy
    BackupCopy,
    /// Claim is not currently bound
    NotBound,
}

impl ClaimFilter {
    /// Decide whether `claim` is migrated
    pub fn check(&self, claim: &Claim) -> Result<(), SkipReason> {
        if !claim.namespace.starts_with(&self.tenant_prefix) {
            return Err(SkipReason::NotTenant);
        }
        if claim.name.ends_with(&self.backup_suffix) {
            return Err(SkipReason::BackupCopy);
        }
        if !claim.is_bound() {
            return Err(SkipReason::NotBound);
        }
        Ok(())
    }
}
