//! Append-only commit log kept next to each local repository.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use evalcard_shared::{EvalCardError, Result};

/// One file written by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedFile {
    /// Path inside the repository.
    pub path: String,
    /// SHA-256 of the content, hex encoded.
    pub sha256: String,
    /// Size in bytes.
    pub size: u64,
}

/// A recorded upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Time-sortable commit identifier.
    pub id: String,
    /// Commit message.
    pub message: String,
    /// When the commit was recorded.
    pub committed_at: DateTime<Utc>,
    /// Files written.
    pub files: Vec<CommittedFile>,
}

impl CommitInfo {
    pub(crate) fn new(message: &str, files: Vec<CommittedFile>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            message: message.to_string(),
            committed_at: Utc::now(),
            files,
        }
    }
}

/// Describe a file about to be committed.
pub(crate) fn describe(path_in_repo: &str, content: &[u8]) -> CommittedFile {
    let mut hasher = Sha256::new();
    hasher.update(content);
    CommittedFile {
        path: path_in_repo.to_string(),
        sha256: format!("{:x}", hasher.finalize()),
        size: content.len() as u64,
    }
}

/// Append a commit to the log at `log_path`.
pub(crate) async fn append(log_path: &Path, commit: &CommitInfo) -> Result<()> {
    let mut line = serde_json::to_string(commit)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
        .map_err(|e| EvalCardError::io(log_path, e))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| EvalCardError::io(log_path, e))?;
    file.flush().await.map_err(|e| EvalCardError::io(log_path, e))
}

/// Read every commit from the log at `log_path`, oldest first.
pub(crate) async fn read_all(log_path: &Path) -> Result<Vec<CommitInfo>> {
    let content = match tokio::fs::read_to_string(log_path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(EvalCardError::io(log_path, e)),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(EvalCardError::from))
        .collect()
}
