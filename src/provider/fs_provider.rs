use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;

use super::git_provider::{
    BranchHead, CommitAction, CommitActionKind, Encoding, FileContent, FileMetadata, Fingerprint,
    GitProvider, ProviderError, Result, TreeEntry,
};

/// Counter for generating unique temp file names.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Name of the scratch directory used for atomic writes.
const TEMP_DIR: &str = ".grec-tmp";

/// A local working directory exposed as a single-branch repository.
///
/// Useful for developing against a checkout without a hosting provider. The
/// branch head is a hash over every file path and content, so it moves
/// whenever anything in the directory changes. Entries whose name starts with
/// `.` are ignored.
pub struct FsProvider {
    root: PathBuf,
    branch: String,
}

impl FsProvider {
    /// Serve `root` as branch `branch`.
    pub fn new(root: impl AsRef<Path>, branch: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            branch: branch.into(),
        }
    }

    /// Resolve a repository path below the root, rejecting escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(ProviderError::InvalidPath(path.to_string())),
            }
        }
        Ok(self.root.join(relative))
    }

    fn check_ref(&self, git_ref: &str) -> Result<()> {
        if git_ref == self.branch {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("branch {}", git_ref)))
        }
    }

    fn temp_file_path(&self) -> PathBuf {
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        self.root.join(TEMP_DIR).join(format!("tmp.{}.{}", pid, counter))
    }

    /// Write through a temp file and rename into place.
    async fn write_file(&self, full_path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = self.temp_file_path();
        fs::create_dir_all(self.root.join(TEMP_DIR)).await?;
        fs::write(&temp_path, data).await?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&temp_path, full_path).await?;
        Ok(())
    }

    /// Check every action against the current directory before touching it.
    async fn validate(&self, actions: &[CommitAction]) -> Result<()> {
        if actions.is_empty() {
            return Err(ProviderError::Other("commit has no actions".to_string()));
        }
        let mut created: HashSet<PathBuf> = HashSet::new();
        let mut removed: HashSet<PathBuf> = HashSet::new();
        for action in actions {
            let full_path = self.resolve(&action.path)?;
            let exists = (is_file(&full_path).await && !removed.contains(&full_path))
                || created.contains(&full_path);
            match action.kind {
                CommitActionKind::Create => {
                    if exists {
                        return Err(ProviderError::Conflict(format!(
                            "a file with this name already exists: {}",
                            action.path
                        )));
                    }
                    require_content(action)?;
                    created.insert(full_path);
                }
                CommitActionKind::Update => {
                    if !exists {
                        return Err(ProviderError::NotFound(action.path.clone()));
                    }
                    require_content(action)?;
                }
                CommitActionKind::Delete => {
                    if !exists {
                        return Err(ProviderError::NotFound(action.path.clone()));
                    }
                    created.remove(&full_path);
                    removed.insert(full_path);
                }
                CommitActionKind::Move => {
                    let previous = action.previous_path.as_deref().ok_or_else(|| {
                        ProviderError::Other("move without previous path".to_string())
                    })?;
                    let previous_path = self.resolve(previous)?;
                    let previous_exists = (is_file(&previous_path).await
                        && !removed.contains(&previous_path))
                        || created.contains(&previous_path);
                    if !previous_exists {
                        return Err(ProviderError::NotFound(previous.to_string()));
                    }
                    if exists {
                        return Err(ProviderError::Conflict(format!(
                            "a file with this name already exists: {}",
                            action.path
                        )));
                    }
                    created.remove(&previous_path);
                    removed.insert(previous_path);
                    created.insert(full_path);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GitProvider for FsProvider {
    async fn branch_head(&self, git_ref: &str) -> Result<Option<BranchHead>> {
        if git_ref != self.branch {
            return Ok(None);
        }
        let root = self.root.clone();
        let head = tokio::task::spawn_blocking(move || tree_id(&root))
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))??;
        Ok(Some(BranchHead {
            name: self.branch.clone(),
            head_fingerprint: head,
        }))
    }

    async fn list_tree(&self, path: &str, git_ref: &str) -> Result<Vec<TreeEntry>> {
        self.check_ref(git_ref)?;
        let dir = self.resolve(path)?;
        let prefix = path.trim_matches('/').to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<TreeEntry>> {
            let mut names = match std::fs::read_dir(&dir) {
                Ok(read_dir) => read_dir
                    .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                    .collect::<std::io::Result<Vec<String>>>()?,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(ProviderError::from(e)),
            };
            names.retain(|name| !name.starts_with('.'));
            names.sort();

            let mut entries = Vec::with_capacity(names.len());
            for name in names {
                let full_path = dir.join(&name);
                let repo_path = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };
                if full_path.is_dir() {
                    entries.push(TreeEntry::tree(tree_id(&full_path)?, repo_path));
                } else {
                    entries.push(TreeEntry::blob(
                        content_hash(&std::fs::read(&full_path)?),
                        repo_path,
                    ));
                }
            }
            Ok(entries)
        })
        .await
        .map_err(|e| ProviderError::Other(e.to_string()))?
    }

    async fn read_file(&self, path: &str, git_ref: &str) -> Result<Option<FileContent>> {
        self.check_ref(git_ref)?;
        let full_path = self.resolve(path)?;
        if !is_file(&full_path).await {
            return Ok(None);
        }
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(Some(FileContent {
                path: path.trim_matches('/').to_string(),
                content_fingerprint: content_hash(&bytes),
                bytes,
                encoding: Encoding::Text,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn file_metadata(&self, path: &str, git_ref: &str) -> Result<Option<FileMetadata>> {
        Ok(self
            .read_file(path, git_ref)
            .await?
            .map(|file| FileMetadata {
                content_fingerprint: file.content_fingerprint,
            }))
    }

    async fn commit(&self, git_ref: &str, message: &str, actions: &[CommitAction]) -> Result<()> {
        self.check_ref(git_ref)?;
        self.validate(actions).await?;

        for action in actions {
            let full_path = self.resolve(&action.path)?;
            match action.kind {
                CommitActionKind::Create | CommitActionKind::Update => {
                    self.write_file(&full_path, &require_content(action)?).await?;
                }
                CommitActionKind::Delete => {
                    fs::remove_file(&full_path).await?;
                }
                CommitActionKind::Move => {
                    let previous = action.previous_path.as_deref().unwrap_or_default();
                    let previous_path = self.resolve(previous)?;
                    if let Some(parent) = full_path.parent() {
                        fs::create_dir_all(parent).await?;
                    }
                    fs::rename(&previous_path, &full_path).await?;
                    if let Some(content) = &action.content {
                        self.write_file(&full_path, content).await?;
                    }
                }
            }
        }
        tracing::debug!("fs commit on {}: {}", git_ref, message);
        Ok(())
    }

    async fn list_branches(&self) -> Result<Vec<BranchHead>> {
        Ok(self.branch_head(&self.branch).await?.into_iter().collect())
    }
}

fn require_content(action: &CommitAction) -> Result<Vec<u8>> {
    action
        .content
        .clone()
        .ok_or_else(|| ProviderError::Other(format!("missing content for {}", action.path)))
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

fn content_hash(content: &[u8]) -> Fingerprint {
    hex::encode(Sha256::digest(content))
}

/// Hash of every visible file path and content below `dir`, in sorted order.
fn tree_id(dir: &Path) -> Result<Fingerprint> {
    let mut hasher = Sha256::new();
    hash_dir(dir, Path::new(""), &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn hash_dir(dir: &Path, relative: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut entries = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir.collect::<std::io::Result<Vec<_>>>()?,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let child = relative.join(&name);
        if entry.file_type()?.is_dir() {
            hash_dir(&entry.path(), &child, hasher)?;
        } else {
            hasher.update(child.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(Sha256::digest(std::fs::read(entry.path())?));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_commit_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FsProvider::new(temp_dir.path(), "main");

        provider
            .commit(
                "main",
                "create",
                &[CommitAction::create("data/users/1.json", b"{\"name\":\"Ann\"}".to_vec())],
            )
            .await
            .unwrap();

        let file = provider
            .read_file("data/users/1.json", "main")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.bytes, b"{\"name\":\"Ann\"}");
        assert!(provider.read_file("data/users/2.json", "main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_head_changes_with_content() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FsProvider::new(temp_dir.path(), "main");

        let empty = provider.branch_head("main").await.unwrap().unwrap();
        provider
            .commit("main", "c", &[CommitAction::create("a.json", b"1".to_vec())])
            .await
            .unwrap();
        let one = provider.branch_head("main").await.unwrap().unwrap();
        provider
            .commit("main", "u", &[CommitAction::update("a.json", b"2".to_vec())])
            .await
            .unwrap();
        let two = provider.branch_head("main").await.unwrap().unwrap();

        assert_ne!(empty.head_fingerprint, one.head_fingerprint);
        assert_ne!(one.head_fingerprint, two.head_fingerprint);
        assert!(provider.branch_head("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_tree_skips_hidden_and_marks_dirs() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("data/users")).unwrap();
        std::fs::write(temp_dir.path().join("data/users.json"), "[]").unwrap();
        std::fs::write(temp_dir.path().join("data/.hidden"), "x").unwrap();
        std::fs::write(temp_dir.path().join("data/users/1.json"), "{}").unwrap();
        let provider = FsProvider::new(temp_dir.path(), "main");

        let entries = provider.list_tree("data", "main").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], TreeEntry::tree(entries[0].entry_id.clone(), "data/users"));
        assert_eq!(entries[1].path, "data/users.json");
        assert!(entries[1].is_blob());
    }

    #[tokio::test]
    async fn test_rejects_parent_paths() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FsProvider::new(temp_dir.path(), "main");
        let result = provider.read_file("../etc/passwd", "main").await;
        assert!(matches!(result, Err(ProviderError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_invalid_commit_changes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FsProvider::new(temp_dir.path(), "main");
        provider
            .commit("main", "c", &[CommitAction::create("a.json", b"1".to_vec())])
            .await
            .unwrap();

        let result = provider
            .commit(
                "main",
                "bad",
                &[
                    CommitAction::update("a.json", b"2".to_vec()),
                    CommitAction::create("a.json", b"3".to_vec()),
                ],
            )
            .await;
        assert!(matches!(result, Err(ProviderError::Conflict(_))));
        assert_eq!(std::fs::read(temp_dir.path().join("a.json")).unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_move_file() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FsProvider::new(temp_dir.path(), "main");
        provider
            .commit("main", "c", &[CommitAction::create("img/a.png", vec![1, 2])])
            .await
            .unwrap();
        provider
            .commit("main", "m", &[CommitAction::move_file("img/a.png", "img/b.png")])
            .await
            .unwrap();

        assert!(!temp_dir.path().join("img/a.png").exists());
        assert_eq!(std::fs::read(temp_dir.path().join("img/b.png")).unwrap(), vec![1, 2]);
    }
}
