//! Version control of the storage root.
//!
//! The engine does not depend on any of this; it only hands out a [`RepoHandle`]
//! bound to the same root the file-backed stores live under.

use std::{collections::BTreeMap, io, path::Path, process::Output, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::storage::StorageRoot;

pub const DEFAULT_BRANCH: &str = "master";

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("git {args} exited with {code:?}: {stderr}")]
    Failed {
        args: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("unexpected git output: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GitStatus {
    Success,
    BranchNotExistsRemote,
    UncommittedChanges,
    UnPushedChanges,
    AlreadyUpToDate,
    NoRemoteConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitResult<T> {
    pub status: GitStatus,
    pub result: T,
}

impl<T> GitResult<T> {
    pub fn new(status: GitStatus, result: T) -> Self {
        Self { status, result }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub branch_name: String,
    /// `local` or `remote`.
    pub branch_type: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub full_id: String,
    pub short_id: String,
    pub summary: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullUpdateInfo {
    pub new_commit_id: String,
    pub old_commit_id: String,
    pub num_commits: usize,
    /// Path to (insertions, deletions).
    pub file_changes: BTreeMap<String, (usize, usize)>,
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn is_repository(&self, repo: &Path) -> Result<bool, VcsError>;
    async fn has_remote(&self, repo: &Path) -> Result<bool, VcsError>;
    async fn branches(&self, repo: &Path) -> Result<Vec<BranchInfo>, VcsError>;
    async fn init(&self, repo: &Path) -> Result<(), VcsError>;
    async fn checkout(&self, repo: &Path, target: &str) -> Result<GitResult<String>, VcsError>;
    async fn new_branch(&self, repo: &Path, name: &str) -> Result<(), VcsError>;
    async fn commit(&self, repo: &Path, message: &str) -> Result<(), VcsError>;
    async fn commit_history(&self, repo: &Path, n: usize) -> Result<Vec<CommitInfo>, VcsError>;
    async fn pull(&self, repo: &Path) -> Result<GitResult<Option<PullUpdateInfo>>, VcsError>;
    async fn push(&self, repo: &Path) -> Result<GitResult<()>, VcsError>;
    async fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool, VcsError>;
    async fn has_unpushed_commits(&self, repo: &Path) -> Result<bool, VcsError>;
    async fn clone_repo(&self, url: &str, destination: &Path) -> Result<(), VcsError>;
    async fn configure_remote(&self, repo: &Path, name: &str, url: &str) -> Result<(), VcsError>;
}

/// A [`VersionControl`] implementation addressed at the storage root.
#[derive(Clone)]
pub struct RepoHandle {
    vcs: Arc<dyn VersionControl>,
    root: StorageRoot,
}

impl RepoHandle {
    pub fn new(vcs: Arc<dyn VersionControl>, root: StorageRoot) -> Self {
        Self { vcs, root }
    }

    pub fn root(&self) -> &StorageRoot {
        &self.root
    }

    fn path(&self) -> &Path {
        self.root.as_path()
    }

    pub async fn is_repository(&self) -> Result<bool, VcsError> {
        self.vcs.is_repository(self.path()).await
    }

    pub async fn has_remote(&self) -> Result<bool, VcsError> {
        self.vcs.has_remote(self.path()).await
    }

    pub async fn branches(&self) -> Result<Vec<BranchInfo>, VcsError> {
        self.vcs.branches(self.path()).await
    }

    /// Name of the checked out branch, `master` when none is marked current.
    pub async fn current_branch_name(&self) -> Result<String, VcsError> {
        Ok(self
            .branches()
            .await?
            .into_iter()
            .find(|b| b.is_current)
            .map(|b| b.branch_name)
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string()))
    }

    pub async fn init(&self) -> Result<(), VcsError> {
        self.vcs.init(self.path()).await
    }

    pub async fn checkout(&self, target: &str) -> Result<GitResult<String>, VcsError> {
        self.vcs.checkout(self.path(), target).await
    }

    pub async fn new_branch(&self, name: &str) -> Result<(), VcsError> {
        self.vcs.new_branch(self.path(), name).await
    }

    pub async fn commit(&self, message: &str) -> Result<(), VcsError> {
        self.vcs.commit(self.path(), message).await
    }

    pub async fn commit_history(&self, n: usize) -> Result<Vec<CommitInfo>, VcsError> {
        self.vcs.commit_history(self.path(), n).await
    }

    pub async fn pull(&self) -> Result<GitResult<Option<PullUpdateInfo>>, VcsError> {
        self.vcs.pull(self.path()).await
    }

    pub async fn push(&self) -> Result<GitResult<()>, VcsError> {
        self.vcs.push(self.path()).await
    }

    pub async fn has_uncommitted_changes(&self) -> Result<bool, VcsError> {
        self.vcs.has_uncommitted_changes(self.path()).await
    }

    pub async fn has_unpushed_commits(&self) -> Result<bool, VcsError> {
        self.vcs.has_unpushed_commits(self.path()).await
    }

    /// Clones `url` into the storage root.
    pub async fn clone_repo(&self, url: &str) -> Result<(), VcsError> {
        self.vcs.clone_repo(url, self.path()).await
    }

    pub async fn configure_remote(&self, name: &str, url: &str) -> Result<(), VcsError> {
        self.vcs.configure_remote(self.path(), name, url).await
    }
}

/// [`VersionControl`] over the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl GitCli {
    async fn output(&self, repo: Option<&Path>, args: &[&str]) -> Result<Output, VcsError> {
        let mut cmd = Command::new(&self.program);
        if let Some(repo) = repo {
            cmd.arg("-C").arg(repo);
        }
        debug!(program = %self.program, ?args, "running git");
        cmd.args(args).output().await.map_err(|e| VcsError::Spawn {
            program: self.program.clone(),
            source: e,
        })
    }

    /// Runs git in `repo` and returns trimmed stdout, failing on a non-zero exit.
    async fn run(&self, repo: &Path, args: &[&str]) -> Result<String, VcsError> {
        let output = self.output(Some(repo), args).await?;
        check(args, output)
    }

    async fn succeeds(&self, repo: &Path, args: &[&str]) -> Result<bool, VcsError> {
        Ok(self.output(Some(repo), args).await?.status.success())
    }

    async fn first_remote(&self, repo: &Path) -> Result<Option<String>, VcsError> {
        let remotes = self.run(repo, &["remote"]).await?;
        Ok(remotes.lines().next().map(str::to_string))
    }

    async fn head_branch(&self, repo: &Path) -> Result<String, VcsError> {
        self.run(repo, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }
}

fn check(args: &[&str], output: Output) -> Result<String, VcsError> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }
    Err(VcsError::Failed {
        args: args.join(" "),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[async_trait]
impl VersionControl for GitCli {
    async fn is_repository(&self, repo: &Path) -> Result<bool, VcsError> {
        let output = self
            .output(Some(repo), &["rev-parse", "--is-inside-work-tree"])
            .await?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn has_remote(&self, repo: &Path) -> Result<bool, VcsError> {
        Ok(self.first_remote(repo).await?.is_some())
    }

    async fn branches(&self, repo: &Path) -> Result<Vec<BranchInfo>, VcsError> {
        let out = self
            .run(repo, &["branch", "--all", "--format=%(HEAD)\t%(refname)"])
            .await?;
        Ok(parse_branches(&out))
    }

    async fn init(&self, repo: &Path) -> Result<(), VcsError> {
        self.run(repo, &["init"]).await.map(drop)
    }

    async fn checkout(&self, repo: &Path, target: &str) -> Result<GitResult<String>, VcsError> {
        if self.has_uncommitted_changes(repo).await? {
            return Ok(GitResult::new(GitStatus::UncommittedChanges, String::new()));
        }
        self.run(repo, &["checkout", target]).await?;
        Ok(GitResult::new(
            GitStatus::Success,
            format!("switched to {target}"),
        ))
    }

    async fn new_branch(&self, repo: &Path, name: &str) -> Result<(), VcsError> {
        self.run(repo, &["checkout", "-b", name]).await.map(drop)
    }

    async fn commit(&self, repo: &Path, message: &str) -> Result<(), VcsError> {
        self.run(repo, &["add", "--all"]).await?;
        self.run(repo, &["commit", "--message", message]).await.map(drop)
    }

    async fn commit_history(&self, repo: &Path, n: usize) -> Result<Vec<CommitInfo>, VcsError> {
        let limit = n.to_string();
        let out = self
            .run(
                repo,
                &["log", "--max-count", &limit, "--format=%H%x09%h%x09%cI%x09%s"],
            )
            .await?;
        parse_commit_log(&out)
    }

    async fn pull(&self, repo: &Path) -> Result<GitResult<Option<PullUpdateInfo>>, VcsError> {
        let Some(remote) = self.first_remote(repo).await? else {
            return Ok(GitResult::new(GitStatus::NoRemoteConfigured, None));
        };
        if self.has_uncommitted_changes(repo).await? {
            return Ok(GitResult::new(GitStatus::UncommittedChanges, None));
        }
        let branch = self.head_branch(repo).await?;
        self.run(repo, &["fetch", "--prune", "--tags", &remote]).await?;

        let tracking = format!("{remote}/{branch}");
        let Ok(remote_id) = self.run(repo, &["rev-parse", "--verify", &tracking]).await else {
            return Ok(GitResult::new(GitStatus::BranchNotExistsRemote, None));
        };
        let old_id = self.run(repo, &["rev-parse", "HEAD"]).await?;
        if remote_id == old_id {
            return Ok(GitResult::new(GitStatus::AlreadyUpToDate, None));
        }

        self.run(repo, &["merge", "--ff-only", &tracking]).await?;
        let new_id = self.run(repo, &["rev-parse", "HEAD"]).await?;
        let range = format!("{old_id}..{new_id}");
        let count = self.run(repo, &["rev-list", "--count", &range]).await?;
        let numstat = self
            .run(repo, &["diff", "--numstat", &old_id, &new_id])
            .await?;

        Ok(GitResult::new(
            GitStatus::Success,
            Some(PullUpdateInfo {
                num_commits: count
                    .parse()
                    .map_err(|_| VcsError::Parse(format!("commit count {count:?}")))?,
                file_changes: parse_numstat(&numstat),
                new_commit_id: new_id,
                old_commit_id: old_id,
            }),
        ))
    }

    async fn push(&self, repo: &Path) -> Result<GitResult<()>, VcsError> {
        let Some(remote) = self.first_remote(repo).await? else {
            return Ok(GitResult::new(GitStatus::NoRemoteConfigured, ()));
        };
        if self.has_uncommitted_changes(repo).await? {
            return Ok(GitResult::new(GitStatus::UncommittedChanges, ()));
        }
        let branch = self.head_branch(repo).await?;
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.run(repo, &["push", "--set-upstream", &remote, &refspec])
            .await?;
        Ok(GitResult::new(GitStatus::Success, ()))
    }

    async fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool, VcsError> {
        Ok(!self.run(repo, &["status", "--porcelain"]).await?.is_empty())
    }

    async fn has_unpushed_commits(&self, repo: &Path) -> Result<bool, VcsError> {
        if !self.succeeds(repo, &["rev-parse", "--verify", "HEAD"]).await? {
            return Ok(false);
        }
        let range = if self
            .succeeds(repo, &["rev-parse", "--verify", "@{upstream}"])
            .await?
        {
            "@{upstream}..HEAD"
        } else {
            "HEAD"
        };
        let count = self.run(repo, &["rev-list", "--count", range]).await?;
        Ok(count != "0")
    }

    async fn clone_repo(&self, url: &str, destination: &Path) -> Result<(), VcsError> {
        let dest = destination.to_string_lossy();
        let args = ["clone", url, &*dest];
        let output = self.output(None, &args).await?;
        check(&args, output).map(drop)
    }

    async fn configure_remote(&self, repo: &Path, name: &str, url: &str) -> Result<(), VcsError> {
        let exists = self.succeeds(repo, &["remote", "get-url", name]).await?;
        let verb = if exists { "set-url" } else { "add" };
        self.run(repo, &["remote", verb, name, url]).await.map(drop)
    }
}

/// Parses `git branch --all --format=%(HEAD)\t%(refname)`.
pub fn parse_branches(out: &str) -> Vec<BranchInfo> {
    out.lines()
        .filter_map(|line| {
            let (head, refname) = line.split_once('\t')?;
            let local = refname.strip_prefix("refs/heads/");
            let (branch_name, branch_type) = if let Some(name) = local {
                (name, "local")
            } else if let Some(name) = refname.strip_prefix("refs/remotes/") {
                if name.ends_with("/HEAD") {
                    return None;
                }
                (name, "remote")
            } else {
                return None;
            };
            Some(BranchInfo {
                branch_name: branch_name.to_string(),
                branch_type: branch_type.to_string(),
                is_current: head.trim() == "*",
            })
        })
        .collect()
}

/// Parses `git log --format=%H%x09%h%x09%cI%x09%s`.
pub fn parse_commit_log(out: &str) -> Result<Vec<CommitInfo>, VcsError> {
    out.lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut parts = line.splitn(4, '\t');
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(full), Some(short), Some(time), summary) => Ok(CommitInfo {
                    full_id: full.to_string(),
                    short_id: short.to_string(),
                    summary: summary
                        .filter(|s| !s.is_empty())
                        .unwrap_or("No summary")
                        .to_string(),
                    time: time.to_string(),
                }),
                _ => Err(VcsError::Parse(line.to_string())),
            }
        })
        .collect()
}

/// Parses `git diff --numstat`. Binary files count as no line changes.
pub fn parse_numstat(out: &str) -> BTreeMap<String, (usize, usize)> {
    out.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?.parse().unwrap_or(0);
            let removed = parts.next()?.parse().unwrap_or(0);
            let path = parts.next()?;
            Some((path.to_string(), (added, removed)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn branches_skip_remote_head_and_mark_current() {
        let out = "*\trefs/heads/main\n \trefs/heads/feature\n \trefs/remotes/origin/HEAD\n \trefs/remotes/origin/main\n";

        let branches = parse_branches(out);

        assert_eq!(
            branches,
            vec![
                BranchInfo {
                    branch_name: "main".to_string(),
                    branch_type: "local".to_string(),
                    is_current: true,
                },
                BranchInfo {
                    branch_name: "feature".to_string(),
                    branch_type: "local".to_string(),
                    is_current: false,
                },
                BranchInfo {
                    branch_name: "origin/main".to_string(),
                    branch_type: "remote".to_string(),
                    is_current: false,
                },
            ]
        );
    }

    #[test]
    fn commit_log_lines_split_on_tabs_only() {
        let out = "abc123def\tabc123d\t2024-05-01T10:00:00+02:00\tfix: keep\ttabs in summary\n";

        let commits = parse_commit_log(out).unwrap();

        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].short_id, "abc123d");
        assert_eq!(commits[0].summary, "fix: keep\ttabs in summary");
        assert!(parse_commit_log("garbage").is_err());
    }

    #[test]
    fn numstat_counts_binary_files_as_zero() {
        let out = "3\t1\tcollections.json\n-\t-\tlogo.png\n";

        let changes = parse_numstat(out);

        assert_eq!(changes["collections.json"], (3, 1));
        assert_eq!(changes["logo.png"], (0, 0));
    }

    #[test]
    fn git_status_serializes_by_name() {
        let result = GitResult::new(GitStatus::NoRemoteConfigured, ());
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({"status": "NoRemoteConfigured", "result": null})
        );
    }

    struct FakeVcs {
        branches: Vec<BranchInfo>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VersionControl for FakeVcs {
        async fn is_repository(&self, _: &Path) -> Result<bool, VcsError> {
            Ok(true)
        }
        async fn has_remote(&self, _: &Path) -> Result<bool, VcsError> {
            Ok(false)
        }
        async fn branches(&self, repo: &Path) -> Result<Vec<BranchInfo>, VcsError> {
            self.seen.lock().unwrap().push(repo.display().to_string());
            Ok(self.branches.clone())
        }
        async fn init(&self, _: &Path) -> Result<(), VcsError> {
            Ok(())
        }
        async fn checkout(&self, _: &Path, t: &str) -> Result<GitResult<String>, VcsError> {
            Ok(GitResult::new(GitStatus::Success, t.to_string()))
        }
        async fn new_branch(&self, _: &Path, _: &str) -> Result<(), VcsError> {
            Ok(())
        }
        async fn commit(&self, _: &Path, _: &str) -> Result<(), VcsError> {
            Ok(())
        }
        async fn commit_history(&self, _: &Path, _: usize) -> Result<Vec<CommitInfo>, VcsError> {
            Ok(Vec::new())
        }
        async fn pull(&self, _: &Path) -> Result<GitResult<Option<PullUpdateInfo>>, VcsError> {
            Ok(GitResult::new(GitStatus::NoRemoteConfigured, None))
        }
        async fn push(&self, _: &Path) -> Result<GitResult<()>, VcsError> {
            Ok(GitResult::new(GitStatus::NoRemoteConfigured, ()))
        }
        async fn has_uncommitted_changes(&self, _: &Path) -> Result<bool, VcsError> {
            Ok(false)
        }
        async fn has_unpushed_commits(&self, _: &Path) -> Result<bool, VcsError> {
            Ok(false)
        }
        async fn clone_repo(&self, url: &str, destination: &Path) -> Result<(), VcsError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("clone {url} {}", destination.display()));
            Ok(())
        }
        async fn configure_remote(&self, _: &Path, _: &str, _: &str) -> Result<(), VcsError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn handle_addresses_the_storage_root_and_defaults_to_master() {
        let vcs = Arc::new(FakeVcs {
            branches: Vec::new(),
            seen: Mutex::new(Vec::new()),
        });
        let handle = RepoHandle::new(vcs.clone(), StorageRoot::new("/srv/data"));

        assert_eq!(handle.current_branch_name().await.unwrap(), "master");
        assert_eq!(*vcs.seen.lock().unwrap(), vec!["/srv/data".to_string()]);
    }

    #[tokio::test]
    async fn handle_clones_into_the_storage_root() {
        let vcs = Arc::new(FakeVcs {
            branches: Vec::new(),
            seen: Mutex::new(Vec::new()),
        });
        let handle = RepoHandle::new(vcs.clone(), StorageRoot::new("/srv/data"));

        handle
            .clone_repo("https://git.example.com/team/state.git")
            .await
            .unwrap();

        assert_eq!(
            *vcs.seen.lock().unwrap(),
            vec!["clone https://git.example.com/team/state.git /srv/data".to_string()]
        );
    }

    #[tokio::test]
    async fn git_cli_reports_a_fresh_repository() {
        if std::process::Command::new("git").arg("--version").output().is_err() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let git = GitCli::default();

        assert!(!git.is_repository(tmp.path()).await.unwrap());
        git.init(tmp.path()).await.unwrap();
        assert!(git.is_repository(tmp.path()).await.unwrap());
        assert!(!git.has_remote(tmp.path()).await.unwrap());
        assert!(!git.has_unpushed_commits(tmp.path()).await.unwrap());

        std::fs::write(tmp.path().join("history.json"), "[]").unwrap();
        assert!(git.has_uncommitted_changes(tmp.path()).await.unwrap());
        assert_eq!(
            git.push(tmp.path()).await.unwrap().status,
            GitStatus::NoRemoteConfigured
        );
    }
}
