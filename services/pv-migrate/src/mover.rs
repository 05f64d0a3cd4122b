// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Data mover adapter
//!
//! Copies the contents of one claim into another by running an external
//! program as `<program> [args..] -n <namespace> -i <source> -o <destination>`.
//! The program is run exactly once per call; retrying is left to the caller.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Data mover errors
#[derive(Debug, Error)]
pub enum MoverError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        /// Combined stdout and stderr
        output: String,
    },

    #[error("Data copy cancelled")]
    Cancelled,
}

/// Copies data between two claims in the same namespace
#[async_trait]
pub trait DataMover: Send + Sync {
    async fn copy(
        &self,
        namespace: &str,
        source: &str,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MoverError>;
}

/// [`DataMover`] backed by an external program
#[derive(Debug, Clone)]
pub struct CommandMover {
    program: String,
    args: Vec<String>,
}

impl CommandMover {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Build from a command line split into words, program first
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone()).with_args(args.iter().cloned()))
    }

    /// Arguments placed before the namespace/source/destination flags
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl DataMover for CommandMover {
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

        debug!(
            program = %self.program,
            namespace,
            source,
            destination,
            "Launching data mover"
        );

        let child = Command::new(&self.program)
            .args(&self.args)
            .args(["-n", namespace, "-i", source, "-o", destination])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MoverError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping the wait future on cancellation drops the child, which
        // kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|source| MoverError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            _ = cancel.cancelled() => return Err(MoverError::Cancelled),
        };

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Err(MoverError::Failed {
            program: self.program.clone(),
            status: output.status,
            output: combined.trim().to_string(),
        })
    }
}
