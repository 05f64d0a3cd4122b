// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared test infrastructure
//!
//! [`FakeCluster`] is an in-memory [`ClusterStore`] with fault injection;
//! [`FakeMover`] records copies instead of running a program.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use pv_migrate::config::MigrateConfig;
use pv_migrate::mover::{DataMover, MoverError};
use pv_migrate::store::{
    Claim, ClaimPhase, ClusterStore, NewClaim, ObjectRef, StoreError, Volume, Workload,
};

/// Configuration with every delay zeroed
pub fn fast_config() -> MigrateConfig {
    MigrateConfig {
        scale_retry_delay_secs: 0,
        resume_settle_secs: 0,
        bind_poll_interval_secs: 0,
        ..Default::default()
    }
}

pub fn obj(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::new(namespace, name)
}

// ============================================================================
// Fake cluster
// ============================================================================

#[derive(Default)]
struct ClusterState {
    volumes: Vec<Volume>,
    claims: BTreeMap<ObjectRef, Claim>,
    workloads: BTreeMap<ObjectRef, Workload>,

    /// Originals deleted and not yet recreated
    released: BTreeMap<ObjectRef, Claim>,
    /// Reads that return Pending before a claim flips to Bound
    bind_after: HashMap<ObjectRef, u32>,
    never_bind: HashSet<ObjectRef>,
    /// Remaining claim reads that fail with a server error
    failing_claim_reads: HashMap<ObjectRef, u32>,
    failing_deletes: HashSet<ObjectRef>,
    panicking_deletes: HashSet<ObjectRef>,
    /// Remaining updates rejected as conflicts
    update_conflicts: HashMap<ObjectRef, u32>,
    forbidden_updates: HashSet<ObjectRef>,

    created: Vec<NewClaim>,
    deleted: Vec<ObjectRef>,
    updates: Vec<(ObjectRef, i32)>,
    claim_reads: HashMap<ObjectRef, u32>,
    workload_reads: HashMap<ObjectRef, u32>,
}

/// In-memory cluster
///
/// Scaling a workload above zero recreates every released claim of its
/// namespace, as the StatefulSet controller would.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bound claim together with a volume pinned to `node`
    pub fn add_claim_on_node(&self, namespace: &str, name: &str, node: &str) {
        let claim_ref = obj(namespace, name);
        let mut state = self.state.lock().unwrap();
        state.volumes.push(Volume {
            name: format!("pv-{}-{}", namespace, name),
            claim_ref: Some(claim_ref.clone()),
            node_hostnames: vec![node.to_string()],
        });
        state.claims.insert(
            claim_ref,
            Claim {
                namespace: namespace.to_string(),
                name: name.to_string(),
                access_modes: vec!["ReadWriteOnce".to_string()],
                storage_request: Some("1Gi".to_string()),
                storage_class: Some("openebs-lvmpv".to_string()),
                phase: ClaimPhase::Bound,
            },
        );
    }

    pub fn add_volume(&self, volume: Volume) {
        self.state.lock().unwrap().volumes.push(volume);
    }

    pub fn add_claim(&self, claim: Claim) {
        self.state
            .lock()
            .unwrap()
            .claims
            .insert(claim.object_ref(), claim);
    }

    pub fn add_workload(&self, namespace: &str, name: &str, replicas: i32) {
        self.state.lock().unwrap().workloads.insert(
            obj(namespace, name),
            Workload {
                namespace: namespace.to_string(),
                name: name.to_string(),
                replicas,
                object: serde_json::json!({ "spec": { "replicas": replicas } }),
            },
        );
    }

    /// Keep `claim` Pending for `reads` reads, then report it Bound
    pub fn bind_after(&self, claim: &ObjectRef, reads: u32) {
        self.state
            .lock()
            .unwrap()
            .bind_after
            .insert(claim.clone(), reads);
    }

    /// A recreated `claim` stays Pending forever
    pub fn never_bind(&self, claim: &ObjectRef) {
        self.state.lock().unwrap().never_bind.insert(claim.clone());
    }

    pub fn fail_claim_reads(&self, claim: &ObjectRef, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failing_claim_reads
            .insert(claim.clone(), times);
    }

    pub fn fail_delete(&self, claim: &ObjectRef) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(claim.clone());
    }

    /// Panic on delete, without poisoning the state lock
    pub fn panic_on_delete(&self, claim: &ObjectRef) {
        self.state
            .lock()
            .unwrap()
            .panicking_deletes
            .insert(claim.clone());
    }

    pub fn conflict_updates(&self, workload: &ObjectRef, times: u32) {
        self.state
            .lock()
            .unwrap()
            .update_conflicts
            .insert(workload.clone(), times);
    }

    pub fn forbid_updates(&self, workload: &ObjectRef) {
        self.state
            .lock()
            .unwrap()
            .forbidden_updates
            .insert(workload.clone());
    }

    pub fn claim(&self, claim: &ObjectRef) -> Option<Claim> {
        self.state.lock().unwrap().claims.get(claim).cloned()
    }

    pub fn replicas(&self, workload: &ObjectRef) -> Option<i32> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(workload)
            .map(|w| w.replicas)
    }

    pub fn created(&self) -> Vec<NewClaim> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Successful replica writes, in order
    pub fn updates(&self) -> Vec<(ObjectRef, i32)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn claim_reads(&self, claim: &ObjectRef) -> u32 {
        self.state
            .lock()
            .unwrap()
            .claim_reads
            .get(claim)
            .copied()
            .unwrap_or(0)
    }

    pub fn workload_reads(&self, workload: &ObjectRef) -> u32 {
        self.state
            .lock()
            .unwrap()
            .workload_reads
            .get(workload)
            .copied()
            .unwrap_or(0)
    }
}

fn not_found(kind: &'static str, object: &ObjectRef) -> StoreError {
    StoreError::NotFound {
        kind,
        object: object.clone(),
    }
}

impl ClusterState {
    fn recreate_released(&mut self, namespace: &str) {
        let names: Vec<ObjectRef> = self
            .released
            .keys()
            .filter(|r| r.namespace == namespace)
            .cloned()
            .collect();

        for claim_ref in names {
            let Some(mut claim) = self.released.remove(&claim_ref) else {
                continue;
            };
            let pending =
                self.never_bind.contains(&claim_ref) || self.bind_after.contains_key(&claim_ref);
            claim.phase = if pending {
                ClaimPhase::Pending
            } else {
                ClaimPhase::Bound
            };
            self.claims.insert(claim_ref, claim);
        }
    }
}

#[async_trait]
impl ClusterStore for FakeCluster {
    async fn list_volumes(&self) -> Result<Vec<Volume>, StoreError> {
        Ok(self.state.lock().unwrap().volumes.clone())
    }

    async fn get_claim(&self, claim: &ObjectRef) -> Result<Claim, StoreError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        *state.claim_reads.entry(claim.clone()).or_default() += 1;

        if let Some(remaining) = state.failing_claim_reads.get_mut(claim) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Api {
                    status: 500,
                    message: "etcdserver: request timed out".to_string(),
                });
            }
        }

        let mut found = state
            .claims
            .get(claim)
            .cloned()
            .ok_or_else(|| not_found("persistentvolumeclaim", claim))?;

        if found.phase == ClaimPhase::Pending && !state.never_bind.contains(claim) {
            if let Some(remaining) = state.bind_after.get_mut(claim) {
                if *remaining == 0 {
                    found.phase = ClaimPhase::Bound;
                    if let Some(stored) = state.claims.get_mut(claim) {
                        stored.phase = ClaimPhase::Bound;
                    }
                } else {
                    *remaining -= 1;
                }
            }
        }

        Ok(found)
    }

    async fn create_claim(&self, claim: &NewClaim) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let claim_ref = obj(&claim.namespace, &claim.name);
        if state.claims.contains_key(&claim_ref) {
            return Err(StoreError::AlreadyExists {
                kind: "persistentvolumeclaim",
                object: claim_ref,
            });
        }

        state.created.push(claim.clone());
        state.claims.insert(
            claim_ref,
            Claim {
                namespace: claim.namespace.clone(),
                name: claim.name.clone(),
                access_modes: claim.access_modes.clone(),
                storage_request: claim.storage_request.clone(),
                storage_class: claim.storage_class.clone(),
                phase: ClaimPhase::Bound,
            },
        );
        Ok(())
    }

    async fn delete_claim(&self, claim: &ObjectRef) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.panicking_deletes.contains(claim) {
            drop(state);
            panic!("delete of {} crashed", claim);
        }
        if state.failing_deletes.contains(claim) {
            return Err(StoreError::Api {
                status: 403,
                message: "persistentvolumeclaims is forbidden".to_string(),
            });
        }

        let removed = state
            .claims
            .remove(claim)
            .ok_or_else(|| not_found("persistentvolumeclaim", claim))?;
        state.deleted.push(claim.clone());
        state.released.insert(claim.clone(), removed);
        Ok(())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .workloads
            .values()
            .filter(|w| w.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_workload(&self, workload: &ObjectRef) -> Result<Workload, StoreError> {
        let mut state = self.state.lock().unwrap();
        *state.workload_reads.entry(workload.clone()).or_default() += 1;
        state
            .workloads
            .get(workload)
            .cloned()
            .ok_or_else(|| not_found("statefulset", workload))
    }

    async fn update_workload(&self, workload: &Workload) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let workload_ref = workload.object_ref();

        if state.forbidden_updates.contains(&workload_ref) {
            return Err(StoreError::Api {
                status: 403,
                message: "statefulsets.apps is forbidden".to_string(),
            });
        }
        if let Some(remaining) = state.update_conflicts.get_mut(&workload_ref) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Conflict {
                    kind: "statefulset",
                    object: workload_ref,
                });
            }
        }

        let stored = state
            .workloads
            .get_mut(&workload_ref)
            .ok_or_else(|| not_found("statefulset", &workload_ref))?;
        stored.replicas = workload.replicas;
        state.updates.push((workload_ref, workload.replicas));

        if workload.replicas > 0 {
            state.recreate_released(&workload.namespace);
        }
        Ok(())
    }
}

// ============================================================================
// Fake data mover
// ============================================================================

/// One recorded copy: namespace, source, destination
pub type CopyCall = (String, String, String);

#[derive(Default)]
pub struct FakeMover {
    copies: Mutex<Vec<CopyCall>>,
    failing_sources: Mutex<HashSet<String>>,
    panicking_destinations: Mutex<HashSet<String>>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
}

impl FakeMover {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out of `source` exit non-zero
    pub fn fail_source(&self, source: &str) {
        self.failing_sources
            .lock()
            .unwrap()
            .insert(source.to_string());
    }

    /// Copies into `destination` panic
    pub fn panic_on_destination(&self, destination: &str) {
        self.panicking_destinations
            .lock()
            .unwrap()
            .insert(destination.to_string());
    }

    /// A copy into `destination` cancels `token`, as a signal arriving
    /// mid-copy would
    pub fn cancel_on_destination(&self, destination: &str, token: CancellationToken) {
        *self.cancel_on.lock().unwrap() = Some((destination.to_string(), token));
    }

    pub fn copies(&self) -> Vec<CopyCall> {
        self.copies.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataMover for FakeMover {
    async fn copy(
        &self,
        namespace: &str,
        source: &str,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MoverError> {
        if cancel.is_cancelled() {
            return Err(MoverError::Cancelled);
        }
        if self
            .panicking_destinations
            .lock()
            .unwrap()
            .contains(destination)
        {
            panic!("data mover crashed copying into {}", destination);
        }

        let cancel_now = match &*self.cancel_on.lock().unwrap() {
            Some((dest, token)) if dest == destination => Some(token.clone()),
            _ => None,
        };
        if let Some(token) = cancel_now {
            token.cancel();
            return Err(MoverError::Cancelled);
        }

        self.copies.lock().unwrap().push((
            namespace.to_string(),
            source.to_string(),
            destination.to_string(),
        ));

        if self.failing_sources.lock().unwrap().contains(source) {
            return Err(MoverError::Spawn {
                program: "migrate.sh".to_string(),
                source: std::io::Error::other("rsync: connection unexpectedly closed"),
            });
        }
        Ok(())
    }
}
