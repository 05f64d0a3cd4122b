// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Job execution
//!
//! Currently a single job: migrating every claim off a draining node.

pub mod migrate;

use thiserror::Error;

use crate::store::StoreError;

/// Errors that abort a whole job
///
/// Failures of individual claims never surface here; they are recorded as
/// the claim's stage instead.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to discover claims: {0}")]
    Discovery(#[source] StoreError),

    #[error("Job cancelled")]
    Cancelled,
}
