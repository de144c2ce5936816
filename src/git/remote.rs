// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote repository management.
//!
//! A project names its remotes in the manifest: the primary remote
//! ("origin"), any number of mirrors, and the build repositories that
//! receive build branches. The local repository is expected to know every
//! one of them under the same name and URL. [`RemoteRegistry`] reconciles
//! the two, and answers questions about which branches exist where.

use crate::{
    config::{Manifest, Remote},
    git::{GitError, GitGateway, RefName, RefNameError},
};

use std::str::FromStr;
use tracing::{debug, info, instrument};

/// Options for remote reconciliation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetupOptions {
    /// Repoint remotes whose URL differs from the configured one.
    pub force: bool,

    /// Fetch every remote after reconciliation.
    pub fetch: bool,
}

/// What a reconciliation pass did to each remote.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemoteReport {
    pub added: Vec<String>,
    pub repointed: Vec<String>,
    pub unchanged: Vec<String>,
    pub declined: Vec<String>,
}

impl RemoteReport {
    /// Number of remotes that were created or changed.
    pub fn mutations(&self) -> usize {
        self.added.len() + self.repointed.len()
    }
}

/// Selection of remotes to pull from.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum RemoteSelector {
    #[default]
    All,
    Named(RefName),
}

impl RemoteSelector {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(selected) => selected.as_str() == name,
        }
    }
}

impl FromStr for RemoteSelector {
    type Err = RefNameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "all" => Ok(Self::All),
            name => Ok(Self::Named(RefName::parse(name)?)),
        }
    }
}

type Confirmation<'g> = Box<dyn Fn(&Remote, &str) -> bool + 'g>;

/// Reconcile local remotes with the manifest.
pub struct RemoteRegistry<'g, G>
where
    G: GitGateway,
{
    git: &'g G,
    confirm: Option<Confirmation<'g>>,
}

impl<'g, G> RemoteRegistry<'g, G>
where
    G: GitGateway,
{
    /// Construct new remote registry.
    pub fn new(git: &'g G) -> Self {
        Self { git, confirm: None }
    }

    /// Ask before repointing a conflicting remote.
    ///
    /// The callback receives the configured remote and its current URL.
    /// Returning false leaves the remote untouched.
    pub fn with_confirmation(mut self, confirm: impl Fn(&Remote, &str) -> bool + 'g) -> Self {
        self.confirm = Some(Box::new(confirm));
        self
    }

    /// Make local remotes match target remotes.
    ///
    /// Missing remotes are added. Remotes pointing elsewhere are repointed
    /// when forced, and reported as a conflict otherwise. Matching remotes
    /// are left alone, so a repeated call changes nothing.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Conflict`] if a remote points elsewhere and
    ///   the setup is not forced.
    /// - Return [`RemoteError::Git`] if adding, repointing, or fetching fails.
    #[instrument(skip(self, remotes), level = "debug")]
    pub fn ensure_remotes(&self, remotes: &[Remote], options: SetupOptions) -> Result<RemoteReport> {
        let mut report = RemoteReport::default();

        for remote in remotes {
            let name = RefName::parse(&remote.name)?;
            let url = remote.url.trim();
            if url.is_empty() || url.starts_with('-') {
                return Err(RemoteError::InvalidUrl {
                    name: remote.name.clone(),
                    url: remote.url.clone(),
                });
            }

            match self.git.remote_url(&name)? {
                Some(current) if current == url => {
                    info!("remote {name} already present");
                    report.unchanged.push(remote.name.clone());
                }
                Some(current) => {
                    if !options.force {
                        return Err(RemoteError::Conflict {
                            name: remote.name.clone(),
                            current,
                            configured: url.to_owned(),
                        });
                    }

                    let accepted = self
                        .confirm
                        .as_ref()
                        .map_or(true, |confirm| confirm(remote, &current));
                    if !accepted {
                        info!("keep remote {name} pointing to {current}");
                        report.declined.push(remote.name.clone());
                        continue;
                    }

                    self.git.checked(["remote", "set-url", name.as_str(), url])?;
                    report.repointed.push(remote.name.clone());
                }
                None => {
                    self.git.checked(["remote", "add", name.as_str(), url])?;
                    report.added.push(remote.name.clone());
                }
            }

            if options.fetch {
                self.git.checked(["fetch", name.as_str()])?;
            }
        }

        Ok(report)
    }

    /// Check if a branch exists at a remote using remote-tracking refs.
    ///
    /// Assumes the remote has been fetched already.
    pub fn branch_exists(&self, branch: &RefName, remote: &RefName) -> Result<bool> {
        Ok(self.git.remote_branch_exists(remote, branch)?)
    }

    /// Check if a branch exists at a remote.
    ///
    /// Uses the remote-tracking ref when present, and asks the remote itself
    /// otherwise. The remote may be given by name or URL.
    pub fn branch_exists_live(&self, branch: &RefName, remote_or_url: &str) -> Result<bool> {
        if let Ok(remote) = RefName::parse(remote_or_url) {
            if self.git.remote_branch_exists(&remote, branch)? {
                return Ok(true);
            }
        }

        Ok(self.git.remote_has_head(remote_or_url, branch)?)
    }

    /// Update a local branch from every selected remote that has it.
    ///
    /// The local build branch is also updated from every build repository
    /// that has it when all remotes are selected. Remotes lacking the branch
    /// are skipped. Assumes remotes have been fetched already.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Git`] if a branch cannot be updated.
    #[instrument(skip(self, manifest), level = "debug")]
    pub fn pull_branch(
        &self,
        manifest: &Manifest,
        branch: &RefName,
        selector: &RemoteSelector,
    ) -> Result<()> {
        let current = self.git.current_branch()?;
        info!("updating {branch}");

        for remote in manifest.remotes() {
            if !selector.matches(&remote.name) {
                continue;
            }

            let name = RefName::parse(&remote.name)?;
            if !self.branch_exists(branch, &name)? {
                info!("branch {branch} is not existing at remote {name}");
                continue;
            }

            self.update_from_fetched(&name, branch, &current, branch)?;
        }

        if *selector != RemoteSelector::All {
            return Ok(());
        }

        let build_branch = RefName::parse(manifest.build_branch(branch.as_str()))?;
        let local_build_branch = RefName::parse(manifest.local_build_branch(branch.as_str()))?;
        for remote in manifest.build_sources() {
            let name = RefName::parse(&remote.name)?;
            if !self.branch_exists(&build_branch, &name)? {
                debug!("build branch {build_branch} is not existing at remote {name}");
                continue;
            }

            info!("updating build branch {local_build_branch} from {name}");
            self.update_from_fetched(&name, &local_build_branch, &current, &build_branch)?;
        }

        Ok(())
    }

    /// Bring a local branch up to date with its remote-tracking ref.
    ///
    /// A checked out branch is merged. Any other branch is fast-forwarded
    /// without checking it out; a branch that is already ahead of the remote
    /// counts as up to date.
    fn update_from_fetched(
        &self,
        remote: &RefName,
        local: &RefName,
        current: &str,
        remote_branch: &RefName,
    ) -> Result<()> {
        let tracking = format!("refs/remotes/{remote}/{remote_branch}");
        if current == local.as_str() {
            self.git.checked([
                "merge",
                tracking.as_str(),
                "--no-stat",
                "--no-edit",
                "--quiet",
            ])?;
            return Ok(());
        }

        let refspec = format!("{tracking}:refs/heads/{local}");
        let fetched = self.git.visible(["fetch", ".", refspec.as_str(), "-q"])?;
        if fetched.success() {
            return Ok(());
        }

        let local_ref = format!("refs/heads/{local}");
        let ahead = self
            .git
            .silent(["merge-base", "--is-ancestor", tracking.as_str(), local_ref.as_str()])?;
        if !ahead.success() {
            return Err(RemoteError::Git(GitError::Failed {
                command: format!("fetch . {refspec}"),
                exit_code: fetched.exit_code,
                stderr: fetched.stderr.trim().to_owned(),
            }));
        }

        Ok(())
    }
}

/// Remote management error types.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Local remote points to another URL than configured.
    #[error(
        "remote {name} already exists but points to {current}, not {configured}; re-run git:setup-remotes with --force to fix that"
    )]
    Conflict {
        name: String,
        current: String,
        configured: String,
    },

    /// Configured remote URL cannot be handed to Git.
    #[error("remote {name} has invalid url {url:?}")]
    InvalidUrl { name: String, url: String },

    /// Remote name is not a valid ref name.
    #[error(transparent)]
    RefName(#[from] RefNameError),

    /// Git invocation fails.
    #[error(transparent)]
    Git(#[from] GitError),
}

/// Friendly result alias :3
type Result<T, E = RemoteError> = std::result::Result<T, E>;
