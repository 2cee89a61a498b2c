//! Append-only lease journal.
//!
//! Each line of the journal file is one JSON-encoded [`Lease`]. The server
//! appends a line per confirmed binding and per release (a release is a
//! record that expires at the moment of release). On startup the pool
//! restores the last unexpired record for each address and compacts the
//! file down to the leases it restored.
//!
//! The journal is optional. The in-memory pool stays the source of truth
//! while the server runs.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::pool::Lease;

#[derive(Debug)]
pub struct LeaseJournal {
    path: PathBuf,
    /// Serializes appends so concurrent workers never interleave lines.
    write_lock: Mutex<()>,
}

impl LeaseJournal {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record in file order.
    ///
    /// A missing file is an empty journal. Blank lines are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is not a valid
    /// record.
    pub async fn load(&self) -> Result<Vec<Lease>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<Lease>(line).map_err(Error::from))
            .collect()
    }

    /// Appends one record.
    pub async fn record(&self, lease: &Lease) -> Result<()> {
        let mut line = serde_json::to_string(lease)?;
        line.push('\n');

        let _lock = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replaces the journal with exactly `leases`.
    ///
    /// The records go to a sibling temporary file that is then renamed over
    /// the journal, so an interrupted compaction leaves the old file intact.
    pub async fn compact(&self, leases: &[Lease]) -> Result<()> {
        let mut content = String::new();
        for lease in leases {
            content.push_str(&serde_json::to_string(lease)?);
            content.push('\n');
        }

        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        let _lock = self.write_lock.lock().await;
        tokio::fs::write(&temporary, content).await?;
        tokio::fs::rename(&temporary, &self.path).await?;

        Ok(())
    }
}
