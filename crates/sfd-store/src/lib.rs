//! Durable contacted-buyer log backing the at-most-once outreach guarantee.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sfd_core::UserId;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const CRATE_NAME: &str = "sfd-store";

/// Append-only log of buyers that have already received an outreach message,
/// one decimal user id per line.
///
/// The format stays line-oriented and human-readable so an operator can
/// inspect or hand-edit the file between runs.
#[derive(Debug, Clone)]
pub struct ContactedStore {
    path: PathBuf,
}

impl ContactedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every previously contacted buyer. A missing file is a fresh
    /// start; blank or non-numeric lines are skipped without rewriting.
    pub async fn load(&self) -> anyhow::Result<HashSet<UserId>> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking {}", self.path.display()))?
        {
            return Ok(HashSet::new());
        }

        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;

        let mut ids = HashSet::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.parse::<UserId>() {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => debug!(line, "skipping malformed contacted-log line"),
            }
        }
        Ok(ids)
    }

    /// Append one buyer, flushed before returning so the id is on disk by
    /// the time the caller treats it as logged. The file is opened in append
    /// mode per call; the daemon is the only writer.
    pub async fn append(&self, user_id: UserId) -> anyhow::Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(format!("{user_id}\n").as_bytes())
            .await
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_loads_as_empty_set() {
        let dir = tempdir().expect("tempdir");
        let store = ContactedStore::new(dir.path().join("buyers.log"));
        let ids = store.load().await.expect("load");
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn append_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = ContactedStore::new(dir.path().join("buyers.log"));

        store.append(101).await.expect("append 101");
        store.append(102).await.expect("append 102");

        let ids = store.load().await.expect("load");
        assert_eq!(ids, HashSet::from([101, 102]));
    }

    #[tokio::test]
    async fn appends_accumulate_in_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("buyers.log");
        let store = ContactedStore::new(&path);

        store.append(7).await.expect("append");
        store.append(9).await.expect("append");

        let text = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(text, "7\n9\n");
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_on_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("buyers.log");
        std::fs::write(&path, "101\n\nnot-a-number\n 102 \n-3\n").expect("seed log");

        let store = ContactedStore::new(&path);
        let ids = store.load().await.expect("load");
        assert_eq!(ids, HashSet::from([101, 102]));
    }
}
