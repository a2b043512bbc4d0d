use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use super::git_provider::{
    BranchHead, CommitAction, CommitActionKind, CommitInfo, Encoding, FileContent, FileMetadata,
    Fingerprint, GitProvider, PipelineInfo, PipelineSummary, ProviderError, Result, TreeEntry,
};

/// Number of calls made to each provider operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub branch_head: usize,
    pub list_tree: usize,
    pub read_file: usize,
    pub file_metadata: usize,
    pub commit: usize,
    pub pipeline: usize,
    /// `read_file` calls per path.
    pub reads_by_path: HashMap<String, usize>,
}

struct Branch {
    files: BTreeMap<String, Vec<u8>>,
    head: Fingerprint,
    history: Vec<CommitInfo>,
}

struct State {
    branches: HashMap<String, Branch>,
    pipelines: Vec<PipelineInfo>,
    calls: CallCounts,
    commit_failures: VecDeque<ProviderError>,
    metadata_failing: bool,
    latency: Option<Duration>,
}

/// An in-memory Git-like repository, intended primarily for testing and demos.
///
/// Branch heads and blob ids are SHA-256 hashes, so any content change moves
/// the fingerprints the way a real provider would. Calls are counted, and
/// commit or metadata failures can be injected.
pub struct MemoryProvider {
    state: Mutex<State>,
}

impl MemoryProvider {
    /// Create a repository with an empty `main` branch.
    pub fn new() -> Self {
        let provider = Self {
            state: Mutex::new(State {
                branches: HashMap::new(),
                pipelines: Vec::new(),
                calls: CallCounts::default(),
                commit_failures: VecDeque::new(),
                metadata_failing: false,
                latency: None,
            }),
        };
        provider.create_branch("main");
        provider
    }

    /// Create an empty branch with a single initial commit.
    pub fn create_branch(&self, name: &str) {
        let id = hash_parts(&[b"initial".as_slice(), name.as_bytes()]);
        let mut state = self.state.lock().unwrap();
        state.branches.insert(
            name.to_string(),
            Branch {
                files: BTreeMap::new(),
                head: id.clone(),
                history: vec![CommitInfo {
                    id,
                    message: "Initial commit".to_string(),
                    parent: None,
                    timestamp: Utc::now(),
                }],
            },
        );
    }

    /// Write a file directly as its own commit, bypassing call counting.
    pub fn put_file(&self, git_ref: &str, path: &str, content: impl Into<Vec<u8>>) {
        let path = normalize(path);
        let mut state = self.state.lock().unwrap();
        if let Some(branch) = state.branches.get_mut(git_ref) {
            branch.files.insert(path.clone(), content.into());
            advance(branch, &format!("Seed {}", path), &[]);
        }
    }

    /// Add an empty commit, moving the branch head without touching files.
    pub fn advance_branch(&self, git_ref: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(branch) = state.branches.get_mut(git_ref) {
            advance(branch, "Empty commit", &[]);
        }
    }

    /// Record a pipeline run against the current head of `git_ref` and
    /// return its id, or `None` if the branch does not exist.
    pub fn start_pipeline(&self, git_ref: &str, status: &str) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        let sha = state.branches.get(git_ref)?.head.clone();
        let id = (state.pipelines.len() + 1).to_string();
        state.pipelines.push(PipelineInfo {
            id: id.clone(),
            sha,
            status: status.to_string(),
            git_ref: git_ref.to_string(),
            created_at: Utc::now(),
        });
        Some(id)
    }

    /// Change a pipeline's status in place. The commit it ran against is kept.
    pub fn set_pipeline_status(&self, id: &str, status: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(pipeline) = state.pipelines.iter_mut().find(|p| p.id == id) {
            pipeline.status = status.to_string();
        }
    }

    /// Run a pipeline again against the current head of its branch.
    pub fn rerun_pipeline(&self, id: &str, status: &str) {
        let mut state = self.state.lock().unwrap();
        let State {
            branches, pipelines, ..
        } = &mut *state;
        if let Some(pipeline) = pipelines.iter_mut().find(|p| p.id == id) {
            if let Some(branch) = branches.get(&pipeline.git_ref) {
                pipeline.sha = branch.head.clone();
            }
            pipeline.status = status.to_string();
        }
    }

    /// Current content of a file, bypassing call counting.
    pub fn file_bytes(&self, git_ref: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .branches
            .get(git_ref)
            .and_then(|b| b.files.get(&normalize(path)).cloned())
    }

    /// Current head of a branch, bypassing call counting.
    pub fn head(&self, git_ref: &str) -> Option<Fingerprint> {
        let state = self.state.lock().unwrap();
        state.branches.get(git_ref).map(|b| b.head.clone())
    }

    /// Messages of all commits on a branch, oldest first, bypassing call counting.
    pub fn commit_messages(&self, git_ref: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .branches
            .get(git_ref)
            .map(|b| b.history.iter().map(|c| c.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        self.state.lock().unwrap().calls.clone()
    }

    /// Make the next commit fail with `error` without applying it.
    pub fn fail_next_commit(&self, error: ProviderError) {
        self.state.lock().unwrap().commit_failures.push_back(error);
    }

    /// Make `branch_head` and `file_metadata` fail until switched back.
    pub fn set_metadata_failing(&self, failing: bool) {
        self.state.lock().unwrap().metadata_failing = failing;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Suspend like a network call would.
    async fn round_trip(&self) {
        let latency = self.state.lock().unwrap().latency;
        match latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitProvider for MemoryProvider {
    async fn branch_head(&self, git_ref: &str) -> Result<Option<BranchHead>> {
        self.round_trip().await;
        let mut state = self.state.lock().unwrap();
        state.calls.branch_head += 1;
        if state.metadata_failing {
            return Err(ProviderError::Other("branch lookup unavailable".to_string()));
        }
        Ok(state.branches.get(git_ref).map(|b| BranchHead {
            name: git_ref.to_string(),
            head_fingerprint: b.head.clone(),
        }))
    }

    async fn list_tree(&self, path: &str, git_ref: &str) -> Result<Vec<TreeEntry>> {
        self.round_trip().await;
        let mut state = self.state.lock().unwrap();
        state.calls.list_tree += 1;
        let branch = state
            .branches
            .get(git_ref)
            .ok_or_else(|| ProviderError::NotFound(format!("branch {}", git_ref)))?;

        let dir = normalize(path);
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };

        let mut entries = Vec::new();
        let mut subdirs: BTreeMap<String, Vec<(&str, &[u8])>> = BTreeMap::new();
        for (file_path, content) in branch.files.range(prefix.clone()..) {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                None => entries.push(TreeEntry::blob(blob_id(content), file_path.clone())),
                Some((subdir, _)) => subdirs
                    .entry(format!("{}{}", prefix, subdir))
                    .or_default()
                    .push((file_path.as_str(), content.as_slice())),
            }
        }
        for (subdir, children) in subdirs {
            let parts: Vec<&[u8]> = children
                .iter()
                .flat_map(|(p, c)| [p.as_bytes(), *c])
                .collect();
            entries.push(TreeEntry::tree(hash_parts(&parts), subdir));
        }
        Ok(entries)
    }

    async fn read_file(&self, path: &str, git_ref: &str) -> Result<Option<FileContent>> {
        self.round_trip().await;
        let path = normalize(path);
        let mut state = self.state.lock().unwrap();
        state.calls.read_file += 1;
        *state.calls.reads_by_path.entry(path.clone()).or_default() += 1;
        let branch = state
            .branches
            .get(git_ref)
            .ok_or_else(|| ProviderError::NotFound(format!("branch {}", git_ref)))?;
        Ok(branch.files.get(&path).map(|bytes| FileContent {
            path: path.clone(),
            content_fingerprint: blob_id(bytes),
            bytes: bytes.clone(),
            encoding: Encoding::Text,
        }))
    }

    async fn file_metadata(&self, path: &str, git_ref: &str) -> Result<Option<FileMetadata>> {
        self.round_trip().await;
        let mut state = self.state.lock().unwrap();
        state.calls.file_metadata += 1;
        if state.metadata_failing {
            return Err(ProviderError::Other("metadata unavailable".to_string()));
        }
        Ok(state
            .branches
            .get(git_ref)
            .and_then(|b| b.files.get(&normalize(path)))
            .map(|bytes| FileMetadata {
                content_fingerprint: blob_id(bytes),
            }))
    }

    async fn commit(&self, git_ref: &str, message: &str, actions: &[CommitAction]) -> Result<()> {
        self.round_trip().await;
        let mut state = self.state.lock().unwrap();
        state.calls.commit += 1;
        if let Some(error) = state.commit_failures.pop_front() {
            return Err(error);
        }
        let branch = state
            .branches
            .get_mut(git_ref)
            .ok_or_else(|| ProviderError::NotFound(format!("branch {}", git_ref)))?;

        branch.files = apply_actions(&branch.files, actions)?;
        advance(branch, message, actions);
        Ok(())
    }

    async fn list_branches(&self) -> Result<Vec<BranchHead>> {
        self.round_trip().await;
        let state = self.state.lock().unwrap();
        let mut branches: Vec<BranchHead> = state
            .branches
            .iter()
            .map(|(name, b)| BranchHead {
                name: name.clone(),
                head_fingerprint: b.head.clone(),
            })
            .collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    async fn list_commits(&self, git_ref: &str) -> Result<Vec<CommitInfo>> {
        self.round_trip().await;
        let state = self.state.lock().unwrap();
        let branch = state
            .branches
            .get(git_ref)
            .ok_or_else(|| ProviderError::NotFound(format!("branch {}", git_ref)))?;
        Ok(branch.history.iter().rev().cloned().collect())
    }

    async fn list_pipelines(&self, git_ref: &str) -> Result<Vec<PipelineSummary>> {
        self.round_trip().await;
        let state = self.state.lock().unwrap();
        Ok(state
            .pipelines
            .iter()
            .rev()
            .filter(|p| p.git_ref == git_ref)
            .map(|p| PipelineSummary {
                id: p.id.clone(),
                sha: p.sha.clone(),
            })
            .collect())
    }

    async fn pipeline(&self, id: &str) -> Result<Option<PipelineInfo>> {
        self.round_trip().await;
        let mut state = self.state.lock().unwrap();
        state.calls.pipeline += 1;
        Ok(state.pipelines.iter().find(|p| p.id == id).cloned())
    }
}

/// Apply commit actions to a copy of `files`, failing without side effects.
fn apply_actions(
    files: &BTreeMap<String, Vec<u8>>,
    actions: &[CommitAction],
) -> Result<BTreeMap<String, Vec<u8>>> {
    if actions.is_empty() {
        return Err(ProviderError::Other("commit has no actions".to_string()));
    }
    let mut next = files.clone();
    for action in actions {
        let path = normalize(&action.path);
        match action.kind {
            CommitActionKind::Create => {
                if next.contains_key(&path) {
                    return Err(ProviderError::Conflict(format!(
                        "a file with this name already exists: {}",
                        path
                    )));
                }
                next.insert(path, required_content(action)?);
            }
            CommitActionKind::Update => {
                if !next.contains_key(&path) {
                    return Err(ProviderError::NotFound(path));
                }
                next.insert(path, required_content(action)?);
            }
            CommitActionKind::Delete => {
                if next.remove(&path).is_none() {
                    return Err(ProviderError::NotFound(path));
                }
            }
            CommitActionKind::Move => {
                let previous = action
                    .previous_path
                    .as_deref()
                    .map(normalize)
                    .ok_or_else(|| ProviderError::Other("move without previous path".to_string()))?;
                let old = next
                    .remove(&previous)
                    .ok_or_else(|| ProviderError::NotFound(previous.clone()))?;
                if next.contains_key(&path) {
                    return Err(ProviderError::Conflict(format!(
                        "a file with this name already exists: {}",
                        path
                    )));
                }
                next.insert(path, action.content.clone().unwrap_or(old));
            }
        }
    }
    Ok(next)
}

fn required_content(action: &CommitAction) -> Result<Vec<u8>> {
    action
        .content
        .clone()
        .ok_or_else(|| ProviderError::Other(format!("missing content for {}", action.path)))
}

/// Record a new commit on `branch`.
fn advance(branch: &mut Branch, message: &str, actions: &[CommitAction]) {
    let mut parts: Vec<&[u8]> = vec![branch.head.as_bytes(), message.as_bytes()];
    for action in actions {
        parts.push(action.path.as_bytes());
        if let Some(content) = &action.content {
            parts.push(content);
        }
    }
    let counter = (branch.history.len() as u64).to_be_bytes();
    parts.push(&counter);

    let id = hash_parts(&parts);
    branch.history.push(CommitInfo {
        id: id.clone(),
        message: message.to_string(),
        parent: Some(branch.head.clone()),
        timestamp: Utc::now(),
    });
    branch.head = id;
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn blob_id(content: &[u8]) -> Fingerprint {
    hash_parts(&[b"blob".as_slice(), content])
}

fn hash_parts(parts: &[&[u8]]) -> Fingerprint {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
impl MemoryProvider {
    /// Paths of every file on a branch.
    pub fn paths(&self, git_ref: &str) -> std::collections::BTreeSet<String> {
        let state = self.state.lock().unwrap();
        state
            .branches
            .get(git_ref)
            .map(|b| b.files.keys().cloned().collect())
            .unwrap_or_default()
    }
}
