// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control gateway.
//!
//! All repository state that phapp inspects or mutates flows through the
//! [`GitGateway`] trait. A gateway executes one Git subcommand at a time,
//! synchronously, and reports the exit code together with everything the
//! command printed. A nonzero exit code is __not__ an error at this level;
//! callers decide what a failing command means for them. Only a failure to
//! run Git at all is reported as an error.
//!
//! # Invocation Modes
//!
//! Commands run in one of two [`Echo`] modes:
//!
//! - __Silent__: output is captured and nothing is logged beyond debug
//!   level. Used for state inspection, e.g., `rev-parse`, `status`, `log`.
//! - __Visible__: the command line and its output are relayed to the
//!   operator through the log. Used for mutations, e.g., `checkout`, `merge`,
//!   `commit`. [`GitGateway::checked`] additionally turns a nonzero exit code
//!   into [`GitError::Failed`] so the caller can abort.
//!
//! Arguments are always handed to Git as an argument vector, never through a
//! shell. Any branch, tag, or remote name that ends up in an argument must be
//! a validated [`RefName`] first.

pub mod ancestry;
pub mod refname;
pub mod remote;

pub use refname::{CommitId, RefName, RefNameError};

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument, warn};

/// Result of a single Git invocation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output without surrounding whitespace.
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Non-empty lines of standard output.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }
}

/// How a Git invocation is presented to the operator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    #[default]
    Silent,
    Visible,
}

/// Layer of indirection for Git access.
///
/// Implementors only provide [`GitGateway::call`]. Every other method is a
/// query or mutation expressed in terms of it.
pub trait GitGateway {
    /// Execute Git with target arguments.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Spawn`] if Git cannot be executed.
    fn call(&self, echo: Echo, args: Vec<OsString>) -> Result<GitOutput>;

    /// Path of the working tree the gateway operates on.
    fn workdir(&self) -> &Path;

    /// Execute Git silently.
    fn silent(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Result<GitOutput> {
        self.call(Echo::Silent, args.into_iter().map(Into::into).collect())
    }

    /// Execute Git visibly.
    fn visible(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Result<GitOutput> {
        self.call(Echo::Visible, args.into_iter().map(Into::into).collect())
    }

    /// Execute Git visibly, failing on nonzero exit code.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Failed`] if Git exits with nonzero code.
    fn checked(&self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Result<GitOutput> {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let command = display_args(&args);
        let output = self.call(Echo::Visible, args)?;
        if !output.success() {
            return Err(GitError::Failed {
                command,
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_owned(),
            });
        }

        Ok(output)
    }

    /// Name of the checked out branch, or "HEAD" when detached.
    fn current_branch(&self) -> Result<String> {
        let output = self.silent(["rev-parse", "--abbrev-ref", "HEAD"])?;
        if !output.success() {
            return Err(GitError::Failed {
                command: "rev-parse --abbrev-ref HEAD".into(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_owned(),
            });
        }

        Ok(output.trimmed().to_owned())
    }

    /// Pending changes in porcelain format; empty means clean.
    fn status_porcelain(&self) -> Result<String> {
        let output = self.silent(["status", "--porcelain"])?;
        if !output.success() {
            return Err(GitError::Failed {
                command: "status --porcelain".into(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_owned(),
            });
        }

        Ok(output.stdout.trim_end().to_owned())
    }

    /// Resolve a revision to the full id of the commit it names.
    fn resolve_commit(&self, rev: &str) -> Result<Option<String>> {
        let output = self.silent([
            "rev-parse",
            "--verify",
            "--quiet",
            format!("{rev}^{{commit}}").as_str(),
        ])?;

        Ok(output.success().then(|| output.trimmed().to_owned()))
    }

    /// Check if a ref exists, e.g., `refs/heads/main`.
    fn ref_exists(&self, full_ref: &str) -> Result<bool> {
        Ok(self
            .silent(["rev-parse", "--verify", "--quiet", full_ref])?
            .success())
    }

    fn local_branch_exists(&self, branch: &RefName) -> Result<bool> {
        self.ref_exists(&format!("refs/heads/{branch}"))
    }

    /// Check remote-tracking ref without network access.
    fn remote_branch_exists(&self, remote: &RefName, branch: &RefName) -> Result<bool> {
        self.ref_exists(&format!("refs/remotes/{remote}/{branch}"))
    }

    fn tag_exists(&self, tag: &RefName) -> Result<bool> {
        self.ref_exists(&format!("refs/tags/{tag}"))
    }

    /// Ask the remote itself whether it has a branch.
    ///
    /// The remote may be given by name or URL. Any failure to reach the
    /// remote counts as the branch being absent.
    fn remote_has_head(&self, remote_or_url: &str, branch: &RefName) -> Result<bool> {
        if remote_or_url.starts_with('-') {
            return Ok(false);
        }

        let output = self.silent([
            "ls-remote",
            "--exit-code",
            "--heads",
            remote_or_url,
            format!("refs/heads/{branch}").as_str(),
        ])?;
        if !output.success() && output.exit_code != 2 {
            debug!(
                "ls-remote against {remote_or_url} failed: {}",
                output.stderr.trim()
            );
        }

        Ok(output.success())
    }

    /// Tags pointing at target revision.
    fn tags_pointing_at(&self, rev: &str) -> Result<Vec<String>> {
        let output = self.silent(["tag", "--points-at", rev])?;
        if !output.success() {
            return Ok(Vec::new());
        }

        Ok(output.lines().map(str::to_owned).collect())
    }

    /// URL of a configured remote, if there is such a remote.
    fn remote_url(&self, remote: &RefName) -> Result<Option<String>> {
        let output = self.silent(["remote", "get-url", remote.as_str()])?;

        Ok(output.success().then(|| output.trimmed().to_owned()))
    }
}

/// Git access through the Git binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    program: OsString,
}

impl GitCli {
    /// Construct new gateway for target working tree.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            program: "git".into(),
        }
    }

    /// Use a different Git binary.
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }
}

impl GitGateway for GitCli {
    #[instrument(skip(self, echo, args), level = "debug")]
    fn call(&self, echo: Echo, args: Vec<OsString>) -> Result<GitOutput> {
        let command = display_args(&args);
        match echo {
            Echo::Silent => debug!("git {command}"),
            Echo::Visible => info!("git {command}"),
        }

        // INVARIANT: Git must never wait for an editor or a password prompt.
        let output = Command::new(&self.program)
            .arg("-C")
            .arg(&self.workdir)
            .args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .output()
            .map_err(|err| GitError::Spawn {
                source: err,
                program: self.program.clone(),
            })?;

        let output = GitOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
            stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
        };

        if echo == Echo::Visible {
            relay(&output);
        }

        Ok(output)
    }

    fn workdir(&self) -> &Path {
        self.workdir.as_path()
    }
}

fn relay(output: &GitOutput) {
    // INVARIANT: Chomp trailing newlines.
    let stdout = output.stdout.trim_end();
    let stderr = output.stderr.trim_end();

    if !stdout.is_empty() {
        info!("{stdout}");
    }

    if !stderr.is_empty() {
        if output.success() {
            info!("{stderr}");
        } else {
            warn!("{stderr}");
        }
    }
}

pub(crate) fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Git gateway error types.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Git binary cannot be executed.
    #[error("failed to execute {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: OsString,
    },

    /// Git exited with nonzero code where success was required.
    #[error("command \"git {command}\" failed with exit code {exit_code}: {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Name handed to Git is not a valid ref name.
    #[error(transparent)]
    RefName(#[from] RefNameError),
}

/// Friendly result alias :3
pub type Result<T, E = GitError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory gateway that records every invocation.

    use super::*;
    use std::{cell::RefCell, collections::VecDeque};

    /// Scripted gateway.
    ///
    /// Responses are matched by the exact command line. Unmatched commands
    /// succeed with empty output.
    #[derive(Debug, Default)]
    pub(crate) struct FakeGit {
        pub(crate) calls: RefCell<Vec<String>>,
        responses: RefCell<Vec<(String, VecDeque<GitOutput>)>>,
        root: Option<PathBuf>,
    }

    impl FakeGit {
        /// Gateway whose working tree is target directory.
        pub(crate) fn in_dir(root: impl Into<PathBuf>) -> Self {
            Self {
                root: Some(root.into()),
                ..Self::default()
            }
        }

        pub(crate) fn respond(&self, command: &str, exit_code: i32, stdout: &str) {
            let output = GitOutput {
                exit_code,
                stdout: stdout.to_owned(),
                stderr: String::new(),
            };
            let mut responses = self.responses.borrow_mut();
            match responses.iter_mut().find(|(known, _)| known.as_str() == command) {
                Some((_, queue)) => queue.push_back(output),
                None => responses.push((command.to_owned(), VecDeque::from([output]))),
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl GitGateway for FakeGit {
        fn call(&self, _echo: Echo, args: Vec<OsString>) -> Result<GitOutput> {
            let command = display_args(&args);
            self.calls.borrow_mut().push(command.clone());

            let mut responses = self.responses.borrow_mut();
            let output = responses
                .iter_mut()
                .find(|(known, _)| *known == command)
                .and_then(|(_, queue)| {
                    // INVARIANT: The last scripted response repeats forever.
                    if queue.len() > 1 {
                        queue.pop_front()
                    } else {
                        queue.front().cloned()
                    }
                })
                .unwrap_or_default();

            Ok(output)
        }

        fn workdir(&self) -> &Path {
            self.root.as_deref().unwrap_or(Path::new("."))
        }
    }
}
