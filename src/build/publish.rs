// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build branch publishing.
//!
//! A __build branch__ is a companion of a source branch that carries the
//! source files plus every build artifact, ready for deployment without
//! running a build on the target host. [`BuildBranchPublisher`] produces one
//! commit on the build branch per build, and walks through these states:
//!
//! 1. __Workspace validated__: the working tree has no pending changes.
//! 2. __Remotes synced__: configured remotes exist locally, are fetched, and
//!    the source branch and its build branch are up to date.
//! 3. __Build branch prepared__: the build branch is checked out, the source
//!    branch is merged into it, and both hold the same source files.
//! 4. __Workspace built__: ignore files are substituted and the project is
//!    built in place.
//! 5. __Committed__: the build is committed with a provenance message, e.g.,
//!    "Build develop commit 3f2a9c1.".
//! 6. __Tagged__: a version tag on the source commit is forwarded to the build
//!    commit under the build prefix.
//! 7. __Restored__: the previously checked out branch is checked out again.
//!
//! # Rollback
//!
//! Once the previous checkout is recorded, the working tree is restored to it
//! no matter how the publish ends: uncommitted changes are discarded and the
//! previous branch, or detached commit, is checked out again. Branches and
//! tags that already moved are left where they are.

use crate::{
    build::{
        gitignore::substitute_ignore_files, prune_nested_git_dirs, verify::diverging_paths,
        BuildError, BuildExecutor,
    },
    config::{Manifest, PRIMARY_REMOTE},
    git::{
        ancestry::{Ancestor, AncestryResolver, Provenance},
        remote::{RemoteError, RemoteRegistry, RemoteSelector, SetupOptions},
        CommitId, GitError, GitGateway, RefName, RefNameError,
    },
};

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};
use tracing::{error, info, instrument, warn};

/// Options of a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Run the clean command before building.
    pub clean: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self { clean: true }
    }
}

/// Progress of a publish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PublishState {
    #[default]
    Idle,
    WorkspaceValidated,
    RemotesSynced,
    BuildBranchPrepared,
    WorkspaceBuilt,
    Committed,
    Tagged,
    Restored,
}

impl Display for PublishState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Idle => "idle",
            Self::WorkspaceValidated => "workspace validated",
            Self::RemotesSynced => "remotes synced",
            Self::BuildBranchPrepared => "build branch prepared",
            Self::WorkspaceBuilt => "workspace built",
            Self::Committed => "committed",
            Self::Tagged => "tagged",
            Self::Restored => "restored",
        };

        fmt.write_str(name)
    }
}

/// What happened to a version tag on the source commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOutcome {
    /// Source commit carries no version tag.
    Untagged,

    /// Build tag was created.
    Forwarded { tag: RefName, build_tag: RefName },

    /// Build tag existed already and was left alone.
    Kept { build_tag: RefName },

    /// Version tag cannot be forwarded without a build prefix.
    Unsupported { tag: RefName },
}

/// Summary of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Local build branch that received the build commit.
    pub build_branch: RefName,

    /// Commit of the source branch that was built.
    pub source_commit: String,

    pub tag: TagOutcome,
}

/// Build a source branch and commit the result to its build branch.
pub struct BuildBranchPublisher<'a, G, B>
where
    G: GitGateway,
    B: BuildExecutor,
{
    git: &'a G,
    manifest: &'a Manifest,
    builder: &'a B,
    state: PublishState,
}

impl<'a, G, B> BuildBranchPublisher<'a, G, B>
where
    G: GitGateway,
    B: BuildExecutor,
{
    /// Construct new build branch publisher.
    pub fn new(git: &'a G, manifest: &'a Manifest, builder: &'a B) -> Self {
        Self {
            git,
            manifest,
            builder,
            state: PublishState::Idle,
        }
    }

    /// Latest state reached.
    pub fn state(&self) -> PublishState {
        self.state
    }

    /// Build target branch and commit the result to its build branch.
    ///
    /// # Errors
    ///
    /// - Return [`PublishError::DirtyWorkspace`] if the working tree has
    ///   pending changes. Nothing is touched in that case.
    /// - Return [`PublishError::BranchMissing`] if the branch does not exist.
    ///   Nothing is touched in that case.
    /// - Return [`PublishError::Divergence`] if the build branch carries
    ///   source changes that the source branch does not.
    /// - Return any error of the remote, build, or Git layers. The previous
    ///   checkout is restored before returning.
    #[instrument(skip(self, options), level = "debug")]
    pub fn publish(&mut self, branch: &RefName, options: PublishOptions) -> Result<PublishReport> {
        self.state = PublishState::Idle;

        let status = self.git.status_porcelain()?;
        if !status.is_empty() {
            return Err(PublishError::DirtyWorkspace(status));
        }
        self.advance(PublishState::WorkspaceValidated);

        if !self.branch_exists(branch)? {
            return Err(PublishError::BranchMissing(branch.to_string()));
        }

        let mut guard = RestoreGuard::new(self.git, self.previous_checkout()?);
        match self.publish_guarded(branch, options, &mut guard) {
            Ok(report) => {
                guard.restore()?;
                self.advance(PublishState::Restored);
                info!("Committed build to branch {}.", report.build_branch);
                Ok(report)
            }
            Err(err) => {
                error!("build of {branch} failed after state \"{}\", rolling back", self.state);
                drop(guard);
                Err(err)
            }
        }
    }

    fn publish_guarded(
        &mut self,
        branch: &RefName,
        options: PublishOptions,
        guard: &mut RestoreGuard<'a, G>,
    ) -> Result<PublishReport> {
        let registry = RemoteRegistry::new(self.git);
        let sync = SetupOptions {
            force: false,
            fetch: true,
        };
        registry.ensure_remotes(&self.manifest.all_remotes(), sync)?;
        registry.pull_branch(self.manifest, branch, &RemoteSelector::All)?;
        let source_commit = self
            .git
            .resolve_commit(branch.as_str())?
            .ok_or_else(|| PublishError::BranchMissing(branch.to_string()))?;
        self.advance(PublishState::RemotesSynced);

        let build_branch = RefName::parse(self.manifest.local_build_branch(branch.as_str()))?;
        self.prepare_build_branch(branch, &build_branch)?;
        let diverging = diverging_paths(self.git, branch, &build_branch)?;
        if !diverging.is_empty() {
            return Err(PublishError::Divergence {
                branch: branch.to_string(),
                build_branch: build_branch.to_string(),
                paths: diverging,
            });
        }
        self.advance(PublishState::BuildBranchPrepared);

        let substitution = substitute_ignore_files(self.git.workdir())?;
        guard.discard_later(substitution.touched.iter().cloned());
        if options.clean {
            self.builder.clean()?;
        }
        self.builder.build()?;
        prune_nested_git_dirs(self.git.workdir())?;
        self.advance(PublishState::WorkspaceBuilt);

        self.git.checked(["add", "-A"])?;
        for path in &substitution.touched {
            self.git.checked([
                OsString::from("reset"),
                "-q".into(),
                "HEAD".into(),
                "--".into(),
                path.into(),
            ])?;
        }
        let provenance = Provenance::new(branch.as_str(), CommitId::parse(&source_commit)?);
        let message = provenance.to_string();
        self.git
            .checked(["commit", "-q", "--allow-empty", "--no-verify", "-m", message.as_str()])?;
        self.advance(PublishState::Committed);

        let tag = self.forward_tag(&source_commit)?;
        if let TagOutcome::Forwarded { .. } = tag {
            self.advance(PublishState::Tagged);
        }

        Ok(PublishReport {
            build_branch,
            source_commit,
            tag,
        })
    }

    fn advance(&mut self, next: PublishState) {
        info!("build branch publish: {next}");
        self.state = next;
    }

    /// Check for the branch at the primary remote, or locally without one.
    fn branch_exists(&self, branch: &RefName) -> Result<bool> {
        let url = self.manifest.git.url.as_str();
        if url.is_empty() {
            return Ok(self.git.local_branch_exists(branch)?);
        }

        let registry = RemoteRegistry::new(self.git);
        let origin = RefName::parse(PRIMARY_REMOTE)?;
        Ok(registry.branch_exists(branch, &origin)? || registry.branch_exists_live(branch, url)?)
    }

    /// Checked out branch, or commit id when detached.
    fn previous_checkout(&self) -> Result<String> {
        let current = self.git.current_branch()?;
        if current != "HEAD" {
            return Ok(current);
        }

        let commit = self
            .git
            .resolve_commit("HEAD")?
            .ok_or_else(|| PublishError::BranchMissing("HEAD".into()))?;
        info!("HEAD is detached at {commit}");

        Ok(commit)
    }

    /// Check out the build branch with the source branch merged in.
    ///
    /// A build branch that exists neither locally nor at a build repository
    /// is created at the ancestor determined by [`AncestryResolver`].
    fn prepare_build_branch(&self, branch: &RefName, build_branch: &RefName) -> Result<()> {
        if !self.git.local_branch_exists(build_branch)? {
            let production = RefName::parse(&self.manifest.git.branches.production)?;
            let ancestor =
                AncestryResolver::new(self.git, self.manifest).resolve_ancestor(branch, &production)?;
            if let Ancestor::ProductionBuild(_) = ancestor {
                RemoteRegistry::new(self.git).pull_branch(
                    self.manifest,
                    &production,
                    &RemoteSelector::All,
                )?;
            }

            info!("creating build branch {build_branch} based upon {}", ancestor.rev());
            self.git
                .checked(["branch", "-q", build_branch.as_str(), ancestor.rev()])?;
        }

        self.git
            .checked(["checkout", "-q", build_branch.as_str(), "--"])?;
        self.git.checked(["reset", "--hard", "-q"])?;
        self.git
            .checked(["merge", "--no-edit", "-q", branch.as_str()])?;

        Ok(())
    }

    /// Forward a version tag of the source commit to the build commit.
    fn forward_tag(&self, source_commit: &str) -> Result<TagOutcome> {
        let branches = &self.manifest.git.branches;
        if branches.version_prefix.is_empty() {
            return Ok(TagOutcome::Untagged);
        }

        let Some(tag) = self
            .git
            .tags_pointing_at(source_commit)?
            .into_iter()
            .find(|tag| tag.starts_with(branches.version_prefix.as_str()))
        else {
            return Ok(TagOutcome::Untagged);
        };
        let tag = RefName::parse(tag)?;

        if branches.build_prefix.is_empty() {
            warn!("tag {tag} cannot be forwarded without a build prefix");
            return Ok(TagOutcome::Unsupported { tag });
        }

        let build_tag = tag.with_prefix(&branches.build_prefix)?;
        if self.git.tag_exists(&build_tag)? {
            warn!("Tag {build_tag} already exists - the tag remains unchanged.");
            return Ok(TagOutcome::Kept { build_tag });
        }

        let message = format!("Build of tag {tag}.");
        self.git
            .checked(["tag", "-a", build_tag.as_str(), "-m", message.as_str()])?;
        info!("tagged build as {build_tag}");

        Ok(TagOutcome::Forwarded { tag, build_tag })
    }
}

/// Restores the previous checkout when dropped.
struct RestoreGuard<'g, G>
where
    G: GitGateway,
{
    git: &'g G,
    previous: String,
    untracked: Vec<PathBuf>,
    armed: bool,
}

impl<'g, G> RestoreGuard<'g, G>
where
    G: GitGateway,
{
    fn new(git: &'g G, previous: String) -> Self {
        Self {
            git,
            previous,
            untracked: Vec::new(),
            armed: true,
        }
    }

    /// Remove target paths on restore unless tracked.
    fn discard_later(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.untracked.extend(paths);
    }

    fn restore(mut self) -> Result<(), GitError> {
        self.armed = false;
        self.rollback()
    }

    fn rollback(&self) -> Result<(), GitError> {
        self.git.checked(["reset", "--hard", "-q"])?;
        if !self.untracked.is_empty() {
            let mut args: Vec<OsString> = vec!["clean".into(), "-f".into(), "-q".into(), "-x".into(), "--".into()];
            args.extend(self.untracked.iter().map(OsString::from));
            self.git.checked(args)?;
        }
        self.git
            .checked(["checkout", "-q", self.previous.as_str(), "--"])?;

        Ok(())
    }
}

impl<G> Drop for RestoreGuard<'_, G>
where
    G: GitGateway,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        warn!("restoring checkout of {}", self.previous);
        if let Err(err) = self.rollback() {
            error!("failed to restore checkout of {}: {err}", self.previous);
        }
    }
}

/// Build branch publishing error types.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Working tree has pending changes.
    #[error("git workspace is not clean:\n{0}")]
    DirtyWorkspace(String),

    /// Branch to build does not exist.
    #[error("branch {0} does not exist")]
    BranchMissing(String),

    /// Build branch carries source changes of its own.
    #[error(
        "build branch {build_branch} is not in sync with {branch} ({} diverging paths); clean or delete the build branch",
        paths.len()
    )]
    Divergence {
        branch: String,
        build_branch: String,
        paths: Vec<PathBuf>,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    RefName(#[from] RefNameError),
}

/// Friendly result alias :3
pub type Result<T, E = PublishError> = std::result::Result<T, E>;
