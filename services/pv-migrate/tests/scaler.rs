// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Workload scaler retry behaviour against an in-memory cluster

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{FakeCluster, obj};
use pv_migrate::scaler::{ScaleError, WorkloadScaler};
use pv_migrate::store::StoreError;

fn scaler(cluster: &Arc<FakeCluster>) -> WorkloadScaler {
    WorkloadScaler::new(cluster.clone(), 3, Duration::ZERO)
}

#[tokio::test]
async fn conflicts_are_retried_until_success() {
    let cluster = Arc::new(FakeCluster::new());
    let web = obj("ns-1", "web");
    cluster.add_workload("ns-1", "web", 3);
    cluster.conflict_updates(&web, 2);

    scaler(&cluster)
        .scale(&web, 0, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cluster.replicas(&web), Some(0));
    // Every attempt re-reads the workload
    assert_eq!(cluster.workload_reads(&web), 3);
    assert_eq!(cluster.updates(), vec![(web, 0)]);
}

#[tokio::test]
async fn gives_up_after_attempt_budget() {
    let cluster = Arc::new(FakeCluster::new());
    let web = obj("ns-1", "web");
    cluster.add_workload("ns-1", "web", 3);
    cluster.conflict_updates(&web, 5);

    let err = scaler(&cluster)
        .scale(&web, 0, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ScaleError::Exhausted {
            workload,
            attempts,
            last,
        } => {
            assert_eq!(workload, web);
            assert_eq!(attempts, 3);
            assert!(matches!(last, StoreError::Conflict { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(cluster.replicas(&web), Some(3));
    assert_eq!(cluster.workload_reads(&web), 3);
}

#[tokio::test]
async fn missing_workload_fails_without_retry() {
    let cluster = Arc::new(FakeCluster::new());
    let ghost = obj("ns-1", "ghost");

    let err = scaler(&cluster)
        .scale(&ghost, 0, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScaleError::Store(StoreError::NotFound { .. })
    ));
    assert_eq!(cluster.workload_reads(&ghost), 1);
}

#[tokio::test]
async fn forbidden_update_fails_without_retry() {
    let cluster = Arc::new(FakeCluster::new());
    let web = obj("ns-1", "web");
    cluster.add_workload("ns-1", "web", 3);
    cluster.forbid_updates(&web);

    let err = scaler(&cluster)
        .scale(&web, 0, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScaleError::Store(StoreError::Api { status: 403, .. })
    ));
    assert_eq!(cluster.workload_reads(&web), 1);
}

#[tokio::test]
async fn already_at_target_writes_nothing() {
    let cluster = Arc::new(FakeCluster::new());
    let web = obj("ns-1", "web");
    cluster.add_workload("ns-1", "web", 2);

    scaler(&cluster)
        .scale(&web, 2, &CancellationToken::new())
        .await
        .unwrap();

    assert!(cluster.updates().is_empty());
}

#[tokio::test]
async fn cancelled_token_stops_before_any_read() {
    let cluster = Arc::new(FakeCluster::new());
    let web = obj("ns-1", "web");
    cluster.add_workload("ns-1", "web", 3);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = scaler(&cluster).scale(&web, 0, &cancel).await.unwrap_err();

    assert!(matches!(err, ScaleError::Cancelled));
    assert_eq!(cluster.workload_reads(&web), 0);
    assert_eq!(cluster.replicas(&web), Some(3));
}

#[tokio::test]
async fn cancellation_interrupts_retry_delay() {
    let cluster = Arc::new(FakeCluster::new());
    let web = obj("ns-1", "web");
    cluster.add_workload("ns-1", "web", 3);
    cluster.conflict_updates(&web, 10);

    let scaler = WorkloadScaler::new(cluster.clone(), 3, Duration::from_secs(3600));
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), scaler.scale(&web, 0, &cancel))
        .await
        .expect("scale should return once cancelled")
        .unwrap_err();

    assert!(matches!(err, ScaleError::Cancelled));
    assert_eq!(cluster.workload_reads(&web), 1);
}
