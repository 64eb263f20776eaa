//! Dataset repository access.
//!
//! [`DatasetHub`] is the seam between the evaluation tracker and wherever run
//! files are published. [`LocalHub`] implements it on a directory tree:
//!
//! ```text
//! <root>/<org>/<name>/
//! ├── .hub/
//! │   ├── repo.json       (visibility, creation time)
//! │   └── commits.jsonl   (one line per upload)
//! ├── README.md
//! ├── results_<ts>.json
//! └── <ts>/details_<task>_<ts>.jsonl
//! ```
//!
//! **Access rules:**
//! - Publishing: read-write via [`LocalHub::open`]
//! - Inspection tools: read-only via [`LocalHub::open_readonly`]

mod commits;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use evalcard_shared::{EvalCardError, Result};

pub use commits::{CommitInfo, CommittedFile};

/// Directory holding hub bookkeeping inside each repository.
const META_DIR: &str = ".hub";

/// Repository metadata file name.
const REPO_FILE: &str = "repo.json";

/// Commit log file name.
const COMMITS_FILE: &str = "commits.jsonl";

/// Operations the tracker needs from a dataset repository host.
#[allow(async_fn_in_trait)]
pub trait DatasetHub {
    /// Whether the repository exists.
    async fn repo_exists(&self, repo_id: &str) -> Result<bool>;

    /// Create a repository. Succeeds without changes if it exists and `exist_ok`.
    async fn create_repo(&self, repo_id: &str, private: bool, exist_ok: bool) -> Result<()>;

    /// Every file path in the repository, relative to its root, sorted.
    async fn list_files(&self, repo_id: &str) -> Result<Vec<String>>;

    /// Read a file as UTF-8 text.
    async fn read_file(&self, repo_id: &str, path_in_repo: &str) -> Result<String>;

    /// Write `content` at `path_in_repo`.
    async fn upload_bytes(
        &self,
        repo_id: &str,
        content: &[u8],
        path_in_repo: &str,
        message: &str,
    ) -> Result<CommitInfo>;

    /// Copy a local file to `path_in_repo`.
    async fn upload_file(
        &self,
        repo_id: &str,
        local_path: &Path,
        path_in_repo: &str,
        message: &str,
    ) -> Result<CommitInfo>;

    /// Copy every file under `folder` into `path_in_repo` (empty for the root).
    async fn upload_folder(
        &self,
        repo_id: &str,
        folder: &Path,
        path_in_repo: &str,
        message: &str,
    ) -> Result<CommitInfo>;
}

/// Metadata stored in `.hub/repo.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    /// `org/name`.
    pub repo_id: String,
    /// Whether the repository is private.
    pub private: bool,
    /// When the repository was created.
    pub created_at: DateTime<Utc>,
}

/// Filesystem-backed dataset hub.
#[derive(Debug, Clone)]
pub struct LocalHub {
    root: PathBuf,
    readonly: bool,
}

impl LocalHub {
    /// Open a hub rooted at `root` in read-write mode.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            readonly: false,
        }
    }

    /// Open a hub rooted at `root` in read-only mode.
    pub fn open_readonly(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            readonly: true,
        }
    }

    /// Hub root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local directory of a repository.
    pub fn repo_dir(&self, repo_id: &str) -> Result<PathBuf> {
        validate_repo_id(repo_id)?;
        Ok(self.root.join(repo_id))
    }

    /// Metadata of an existing repository.
    pub async fn repo_info(&self, repo_id: &str) -> Result<RepoInfo> {
        let path = self.repo_dir(repo_id)?.join(META_DIR).join(REPO_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EvalCardError::Hub(format!("repository {repo_id} not found")));
            }
            Err(e) => return Err(EvalCardError::io(&path, e)),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Commits of a repository, oldest first.
    pub async fn commits(&self, repo_id: &str) -> Result<Vec<CommitInfo>> {
        let dir = self.existing_repo_dir(repo_id).await?;
        commits::read_all(&dir.join(META_DIR).join(COMMITS_FILE)).await
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(EvalCardError::Hub("hub is opened in read-only mode".into()));
        }
        Ok(())
    }

    async fn existing_repo_dir(&self, repo_id: &str) -> Result<PathBuf> {
        if !self.repo_exists(repo_id).await? {
            return Err(EvalCardError::Hub(format!("repository {repo_id} not found")));
        }
        self.repo_dir(repo_id)
    }

    /// Write files into a repository and record one commit for them.
    async fn commit(
        &self,
        repo_id: &str,
        files: Vec<(String, Vec<u8>)>,
        message: &str,
    ) -> Result<CommitInfo> {
        self.check_writable()?;
        let dir = self.existing_repo_dir(repo_id).await?;

        let mut committed = Vec::with_capacity(files.len());
        for (path_in_repo, content) in files {
            validate_path_in_repo(&path_in_repo)?;
            let target = dir.join(&path_in_repo);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| EvalCardError::io(parent, e))?;
            }
            tokio::fs::write(&target, &content)
                .await
                .map_err(|e| EvalCardError::io(&target, e))?;
            debug!(repo_id, path = %path_in_repo, bytes = content.len(), "file written");
            committed.push(commits::describe(&path_in_repo, &content));
        }

        let commit = CommitInfo::new(message, committed);
        commits::append(&dir.join(META_DIR).join(COMMITS_FILE), &commit).await?;
        info!(
            repo_id,
            commit = %commit.id,
            files = commit.files.len(),
            message,
            "commit recorded"
        );
        Ok(commit)
    }
}

impl DatasetHub for LocalHub {
    async fn repo_exists(&self, repo_id: &str) -> Result<bool> {
        let path = self.repo_dir(repo_id)?.join(META_DIR).join(REPO_FILE);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| EvalCardError::io(&path, e))
    }

    async fn create_repo(&self, repo_id: &str, private: bool, exist_ok: bool) -> Result<()> {
        self.check_writable()?;
        if self.repo_exists(repo_id).await? {
            if exist_ok {
                return Ok(());
            }
            return Err(EvalCardError::Hub(format!("repository {repo_id} already exists")));
        }

        let meta_dir = self.repo_dir(repo_id)?.join(META_DIR);
        tokio::fs::create_dir_all(&meta_dir)
            .await
            .map_err(|e| EvalCardError::io(&meta_dir, e))?;

        let info = RepoInfo {
            repo_id: repo_id.to_string(),
            private,
            created_at: Utc::now(),
        };
        let path = meta_dir.join(REPO_FILE);
        let content = serde_json::to_string_pretty(&info)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| EvalCardError::io(&path, e))?;

        info!(repo_id, private, "repository created");
        Ok(())
    }

    async fn list_files(&self, repo_id: &str) -> Result<Vec<String>> {
        let dir = self.existing_repo_dir(repo_id).await?;
        let mut files = collect_files(&dir)?
            .into_iter()
            .map(|(rel, _)| rel)
            .filter(|rel| rel != META_DIR && !rel.starts_with(&format!("{META_DIR}/")))
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    async fn read_file(&self, repo_id: &str, path_in_repo: &str) -> Result<String> {
        validate_path_in_repo(path_in_repo)?;
        let path = self.existing_repo_dir(repo_id).await?.join(path_in_repo);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EvalCardError::io(&path, e))
    }

    async fn upload_bytes(
        &self,
        repo_id: &str,
        content: &[u8],
        path_in_repo: &str,
        message: &str,
    ) -> Result<CommitInfo> {
        self.commit(repo_id, vec![(path_in_repo.to_string(), content.to_vec())], message)
            .await
    }

    async fn upload_file(
        &self,
        repo_id: &str,
        local_path: &Path,
        path_in_repo: &str,
        message: &str,
    ) -> Result<CommitInfo> {
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| EvalCardError::io(local_path, e))?;
        self.commit(repo_id, vec![(path_in_repo.to_string(), content)], message)
            .await
    }

    async fn upload_folder(
        &self,
        repo_id: &str,
        folder: &Path,
        path_in_repo: &str,
        message: &str,
    ) -> Result<CommitInfo> {
        let prefix = path_in_repo.trim_matches('/');
        let mut files = Vec::new();
        for (rel, abs) in collect_files(folder)? {
            let content = tokio::fs::read(&abs)
                .await
                .map_err(|e| EvalCardError::io(&abs, e))?;
            let target = if prefix.is_empty() {
                rel
            } else {
                format!("{prefix}/{rel}")
            };
            files.push((target, content));
        }
        self.commit(repo_id, files, message).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `org/name`, both parts non-empty and free of path tricks.
fn validate_repo_id(repo_id: &str) -> Result<()> {
    match repo_id.split_once('/') {
        Some((org, name))
            if is_plain_segment(org) && is_plain_segment(name) && !name.contains('/') =>
        {
            Ok(())
        }
        _ => Err(EvalCardError::Hub(format!(
            "invalid repository id '{repo_id}': expected 'org/name'"
        ))),
    }
}

/// Relative, no `..`, outside the bookkeeping directory.
fn validate_path_in_repo(path: &str) -> Result<()> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(is_plain_segment)
        && path.split('/').next() != Some(META_DIR);
    if valid {
        Ok(())
    } else {
        Err(EvalCardError::Hub(format!("invalid path in repository '{path}'")))
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".."
}

/// Every regular file under `dir` as `(relative path with '/', absolute path)`.
fn collect_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| EvalCardError::Hub(format!("walking {}: {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| EvalCardError::Hub(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((rel, entry.path().to_path_buf()));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_hub() -> LocalHub {
        LocalHub::open(std::env::temp_dir().join(format!("evalcard_hub_{}", Uuid::now_v7())))
    }

    #[tokio::test]
    async fn create_and_inspect_repo() {
        let hub = test_hub();
        assert!(!hub.repo_exists("org/details_model").await.unwrap());

        hub.create_repo("org/details_model", true, false)
            .await
            .expect("create");
        assert!(hub.repo_exists("org/details_model").await.unwrap());
        assert!(hub.repo_info("org/details_model").await.unwrap().private);

        // exist_ok makes creation idempotent
        hub.create_repo("org/details_model", false, true)
            .await
            .expect("create again");
        let err = hub
            .create_repo("org/details_model", false, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn upload_and_list() {
        let hub = test_hub();
        hub.create_repo("org/repo", false, false).await.unwrap();

        hub.upload_bytes("org/repo", b"{}", "results_2024-01-01T00-00-00.json", "add results")
            .await
            .expect("upload bytes");

        let folder = std::env::temp_dir().join(format!("evalcard_folder_{}", Uuid::now_v7()));
        std::fs::create_dir_all(folder.join("nested")).unwrap();
        std::fs::write(folder.join("a.jsonl"), "a").unwrap();
        std::fs::write(folder.join("nested/b.jsonl"), "b").unwrap();

        let commit = hub
            .upload_folder("org/repo", &folder, "2024-01-01T00-00-00", "add details")
            .await
            .expect("upload folder");
        assert_eq!(commit.files.len(), 2);

        let files = hub.list_files("org/repo").await.expect("list");
        assert_eq!(
            files,
            vec![
                "2024-01-01T00-00-00/a.jsonl",
                "2024-01-01T00-00-00/nested/b.jsonl",
                "results_2024-01-01T00-00-00.json",
            ]
        );

        let content = hub
            .read_file("org/repo", "2024-01-01T00-00-00/nested/b.jsonl")
            .await
            .expect("read");
        assert_eq!(content, "b");

        let commits = hub.commits("org/repo").await.expect("commits");
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].message, "add details");
    }

    #[tokio::test]
    async fn upload_file_to_root() {
        let hub = test_hub();
        hub.create_repo("org/repo", false, false).await.unwrap();

        let local = std::env::temp_dir().join(format!("evalcard_file_{}.json", Uuid::now_v7()));
        std::fs::write(&local, "{\"a\": 1}").unwrap();
        hub.upload_file("org/repo", &local, "results.json", "upload")
            .await
            .expect("upload");
        assert_eq!(hub.read_file("org/repo", "results.json").await.unwrap(), "{\"a\": 1}");
    }

    #[tokio::test]
    async fn missing_repo_is_an_error() {
        let hub = test_hub();
        assert!(hub.list_files("org/missing").await.is_err());
        assert!(hub.upload_bytes("org/missing", b"x", "x", "m").await.is_err());
    }

    #[tokio::test]
    async fn rejects_bad_ids_and_paths() {
        let hub = test_hub();
        assert!(hub.repo_exists("no-slash").await.is_err());
        assert!(hub.repo_exists("../escape").await.is_err());
        assert!(hub.repo_exists("a/b/c").await.is_err());

        hub.create_repo("org/repo", false, false).await.unwrap();
        for bad in ["../x", "/abs", ".hub/repo.json", "a//b", ""] {
            assert!(
                hub.upload_bytes("org/repo", b"x", bad, "m").await.is_err(),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let rw = test_hub();
        rw.create_repo("org/repo", false, false).await.unwrap();

        let ro = LocalHub::open_readonly(rw.root());
        assert!(ro.repo_exists("org/repo").await.unwrap());
        let err = ro
            .upload_bytes("org/repo", b"x", "x.txt", "m")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
        assert!(ro.create_repo("org/other", false, true).await.is_err());
    }
}
