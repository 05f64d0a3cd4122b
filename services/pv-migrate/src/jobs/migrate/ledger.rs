// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Status ledger
//!
//! Latest stage of every item, written by many workers at once and read
//! back once when the run ends.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use dashmap::DashMap;

use super::types::Stage;

/// Concurrent item-to-stage map; last write per key wins
#[derive(Debug, Default)]
pub struct StatusLedger {
    entries: DashMap<String, Stage>,
}

impl StatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str, stage: Stage) {
        self.entries.insert(key.to_string(), stage);
    }

    pub fn get(&self, key: &str) -> Option<Stage> {
        self.entries.get(key).map(|e| *e.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every entry, in no particular order
    pub fn snapshot(&self) -> Vec<(String, Stage)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Write one `item: <key>, status: <stage>` line per entry
    ///
    /// Stops at the first write error. Returns the number of lines written.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<usize> {
        let mut written = 0;
        for (key, stage) in self.snapshot() {
            writeln!(out, "item: {}, status: {}", key, stage)?;
            written += 1;
        }
        out.flush()?;
        Ok(written)
    }

    /// Dump the ledger into a freshly created file at `path`
    pub fn dump_to_path(&self, path: &Path) -> io::Result<usize> {
        let mut out = BufWriter::new(File::create(path)?);
        self.dump(&mut out)
    }
}
