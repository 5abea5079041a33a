//! Health check for payloads the collector failed to forward upstream.
//!
//! The collector appends payloads it could not deliver to `failed/*.jsonl`,
//! one per line. Anything in there means data is missing downstream.

use crate::error::Result;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// One file of failed forwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub name: String,
    /// Non-empty lines in the file
    pub records: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForwardingStatus {
    pub dir_exists: bool,
    /// Files holding at least one record, sorted by name
    pub files: Vec<FailedFile>,
}

impl ForwardingStatus {
    pub fn total_failed(&self) -> usize {
        self.files.iter().map(|f| f.records).sum()
    }

    pub fn is_ok(&self) -> bool {
        self.total_failed() == 0
    }
}

/// Count failed forwards under `dir`.
pub fn check_failed_forwards<P: AsRef<Path>>(dir: P) -> Result<ForwardingStatus> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "No failed-forwards directory");
        return Ok(ForwardingStatus::default());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !path.extension().is_some_and(|e| e == "jsonl") {
            continue;
        }

        let mut records = 0;
        for line in BufReader::new(File::open(&path)?).split(b'\n') {
            if !line?.iter().all(u8::is_ascii_whitespace) {
                records += 1;
            }
        }

        if records > 0 {
            files.push(FailedFile {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                records,
            });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(ForwardingStatus {
        dir_exists: true,
        files,
    })
}
