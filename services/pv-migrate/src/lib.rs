// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! PV Migrate Library
//!
//! Moves the contents of every persistent volume claim bound to a node that
//! is being drained onto freshly provisioned storage, pausing and resuming
//! the StatefulSets that use those claims along the way.
//!
//! # Modules
//!
//! - [`config`] - Runtime configuration (environment, JSON file, defaults)
//! - [`store`] - Cluster resource store interface and its domain types
//! - [`kube`] - Kubernetes REST implementation of the store
//! - [`scaler`] - Retrying replica-count adjustment for workloads
//! - [`poller`] - Bounded wait for a claim to become bound
//! - [`mover`] - External data-mover program invocation
//! - [`jobs`] - The migration job itself

pub mod config;
pub mod jobs;
pub mod kube;
pub mod mover;
pub mod poller;
pub mod scaler;
pub mod store;
