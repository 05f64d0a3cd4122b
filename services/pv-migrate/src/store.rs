// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Cluster resource store interface
//!
//! The migration job only ever talks to the cluster through [`ClusterStore`].
//! The production implementation lives in [`crate::kube`]; tests supply an
//! in-memory one.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Node affinity label key identifying the node a local volume lives on
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Cluster resource store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {object} not found")]
    NotFound { kind: &'static str, object: ObjectRef },

    #[error("{kind} {object} already exists")]
    AlreadyExists { kind: &'static str, object: ObjectRef },

    #[error("update of {kind} {object} conflicted with a newer version")]
    Conflict { kind: &'static str, object: ObjectRef },

    #[error("API server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed API object: {0}")]
    Decode(String),
}

impl StoreError {
    /// Whether retrying the same request later might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict { .. } | Self::Http(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound { .. } | Self::AlreadyExists { .. } => false,
            Self::Decode(_) => false,
        }
    }
}

/// Namespace-scoped object identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A cluster-scoped persistent volume
#[derive(Debug, Clone, Default)]
pub struct Volume {
    pub name: String,
    /// Claim this volume is bound (or was last bound) to
    pub claim_ref: Option<ObjectRef>,
    /// Hostnames from required node affinity terms using the `In` operator
    pub node_hostnames: Vec<String>,
}

impl Volume {
    /// Whether the volume is pinned to `node_name` through its node affinity
    pub fn is_on_node(&self, node_name: &str) -> bool {
        self.node_hostnames.iter().any(|h| h == node_name)
    }
}

/// Lifecycle phase of a persistent volume claim
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClaimPhase {
    #[default]
    Pending,
    Bound,
    Lost,
    Other(String),
}

impl ClaimPhase {
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Bound" => Self::Bound,
            "Lost" => Self::Lost,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Bound => write!(f, "Bound"),
            Self::Lost => write!(f, "Lost"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A persistent volume claim
#[derive(Debug, Clone, Default)]
pub struct Claim {
    pub namespace: String,
    pub name: String,
    pub access_modes: Vec<String>,
    /// Requested size, as the API quantity string (e.g. `10Gi`)
    pub storage_request: Option<String>,
    pub storage_class: Option<String>,
    pub phase: ClaimPhase,
}

impl Claim {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.namespace, &self.name)
    }

    pub fn is_bound(&self) -> bool {
        self.phase == ClaimPhase::Bound
    }
}

/// Request to create a claim shaped like an existing one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaim {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub access_modes: Vec<String>,
    pub storage_request: Option<String>,
    pub storage_class: Option<String>,
}

impl NewClaim {
    /// Clone the storage shape of `source` under a new name
    pub fn like(source: &Claim, name: impl Into<String>) -> Self {
        Self {
            namespace: source.namespace.clone(),
            name: name.into(),
            labels: BTreeMap::new(),
            access_modes: source.access_modes.clone(),
            storage_request: source.storage_request.clone(),
            storage_class: source.storage_class.clone(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A scalable workload set (StatefulSet)
#[derive(Debug, Clone, Default)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    /// Desired replica count
    pub replicas: i32,
    /// Full object as read from the store, written back on update
    pub object: serde_json::Value,
}

impl Workload {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.namespace, &self.name)
    }
}

/// Operations the migration needs from the cluster
///
/// Implementations must give read-after-write consistency: a claim that was
/// just created is visible to the next `get_claim`.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn list_volumes(&self) -> Result<Vec<Volume>, StoreError>;

    async fn get_claim(&self, claim: &ObjectRef) -> Result<Claim, StoreError>;

    async fn create_claim(&self, claim: &NewClaim) -> Result<(), StoreError>;

    async fn delete_claim(&self, claim: &ObjectRef) -> Result<(), StoreError>;

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>, StoreError>;

    async fn get_workload(&self, workload: &ObjectRef) -> Result<Workload, StoreError>;

    /// Write back a workload previously read with `get_workload`
    ///
    /// Returns [`StoreError::Conflict`] when the stored object changed since
    /// it was read.
    async fn update_workload(&self, workload: &Workload) -> Result<(), StoreError>;
}
