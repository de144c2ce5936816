// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project cloning.
//!
//! Clone a project by its name alone. The repository URL and the target
//! directory are derived from patterns in the global configuration unless
//! given explicitly. The clone runs through libgit2 with a progress bar, and
//! prompts for credentials when the remote asks for them.

use crate::config::{ConfigError, GlobalConfig};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{build::RepoBuilder, Config, FetchOptions, RemoteCallbacks};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    fs::read_dir,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::{info, instrument};

/// Fully resolved clone of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub url: String,
    pub target: PathBuf,
    pub branch: Option<String>,
}

impl CloneRequest {
    /// Resolve missing URL and target directory through global configuration.
    ///
    /// # Errors
    ///
    /// - Return [`CloneError::Config`] if the directory pattern cannot be
    ///   expanded.
    pub fn resolve(
        name: &str,
        target: Option<PathBuf>,
        url: Option<String>,
        branch: Option<String>,
        config: &GlobalConfig,
    ) -> Result<Self> {
        let url = url.unwrap_or_else(|| config.git_url(name));
        let target = match target {
            Some(target) => target,
            None => config.clone_directory(name)?,
        };

        Ok(Self {
            url,
            target,
            branch,
        })
    }

    /// Clone the project repository.
    ///
    /// Parent directories of the target are created as needed.
    ///
    /// # Errors
    ///
    /// - Return [`CloneError::TargetNotEmpty`] if the target directory exists
    ///   and has contents.
    /// - Return [`CloneError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self), level = "debug")]
    pub fn clone_project(&self) -> Result<PathBuf> {
        if is_occupied(&self.target)? {
            return Err(CloneError::TargetNotEmpty(self.target.clone()));
        }

        if let Some(parent) = self.target.parent() {
            mkdirp::mkdirp(parent).map_err(|err| CloneError::Io {
                source: err,
                path: parent.to_path_buf(),
            })?;
        }

        info!("cloning {} into {:?}", self.url, self.target.display());
        let mut progress = CloneProgress::start(&self.url)?;
        let prompter = CredentialPrompter::new(&self.url, progress.bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let config = Config::open_default()?;

        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|stats| {
            progress.record(stats.received_objects(), stats.total_objects(), Instant::now());
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fo);
        if let Some(branch) = &self.branch {
            builder.branch(branch);
        }
        let result = builder.clone(&self.url, &self.target);
        drop(builder);
        progress.finish();
        result?;

        info!("cloned {} into {:?}", self.url, self.target.display());
        Ok(self.target.clone())
    }
}

fn is_occupied(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    if !path.is_dir() {
        return Ok(true);
    }

    let mut entries = read_dir(path).map_err(|err| CloneError::Io {
        source: err,
        path: path.to_path_buf(),
    })?;

    Ok(entries.next().is_some())
}

/// Minimum delay between two redraws of the object counter.
const REDRAW_INTERVAL: Duration = Duration::from_millis(10);

/// Object counter of a running clone.
struct CloneProgress {
    bar: ProgressBar,
    drawn: Option<Instant>,
}

impl CloneProgress {
    fn start(url: &str) -> Result<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(url.to_owned());
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(Self { bar, drawn: None })
    }

    /// Show received objects, skipping updates that arrive too quickly.
    fn record(&mut self, received: usize, total: usize, now: Instant) {
        let due = self
            .drawn
            .map_or(true, |drawn| now.duration_since(drawn) >= REDRAW_INTERVAL);
        if !due && received < total {
            return;
        }

        self.drawn = Some(now);
        self.bar.set_length(total as u64);
        self.bar.set_position(received as u64);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Ask the operator for credentials of the project repository.
///
/// The progress bar is suspended while a prompt is shown.
#[derive(Debug, Clone)]
pub struct CredentialPrompter {
    url: String,
    bar: ProgressBar,
}

impl CredentialPrompter {
    pub fn new(url: impl Into<String>, bar: ProgressBar) -> Self {
        Self {
            url: url.into(),
            bar,
        }
    }

    fn ask_secret(&self, message: &str) -> Option<String> {
        self.bar.suspend(|| {
            Password::new(message)
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

impl Prompter for CredentialPrompter {
    #[instrument(skip(self, _url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        _url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("{} requires credentials", self.url);
        let username = self
            .bar
            .suspend(|| Text::new("Git username:").prompt().ok())?;
        let password = self.ask_secret(&format!("Git password for {username}:"))?;

        Some((username, password))
    }

    #[instrument(skip(self, _url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        _url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("{} requires a password", self.url);
        self.ask_secret(&format!("Git password for {username}:"))
    }

    #[instrument(skip(self, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("{} requires an unlocked ssh key", self.url);
        self.ask_secret(&format!("Passphrase of {}:", ssh_key_path.display()))
    }
}

/// Clone error types.
#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    /// Target directory already has contents.
    #[error("target directory {:?} already exists and is not empty", .0.display())]
    TargetNotEmpty(PathBuf),

    /// File system operation fails.
    #[error("failed to prepare {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Global configuration cannot be applied.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Progress bar template is malformed.
    #[error(transparent)]
    Template(#[from] indicatif::style::TemplateError),

    /// Libgit2 operations fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = CloneError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::write;

    #[test]
    fn resolve_from_global_config() -> anyhow::Result<()> {
        let config: GlobalConfig = "git:\n  url_pattern: 'https://git.example.com/{{ name }}.git'\nclone:\n  directory_pattern: '/srv/{{ name }}'\n".parse()?;

        let request = CloneRequest::resolve("demo", None, None, None, &config)?;
        assert_eq!(
            request,
            CloneRequest {
                url: "https://git.example.com/demo.git".into(),
                target: PathBuf::from("/srv/demo"),
                branch: None,
            }
        );

        let request = CloneRequest::resolve(
            "demo",
            Some(PathBuf::from("here")),
            Some("/tmp/demo.git".into()),
            Some("develop".into()),
            &config,
        )?;
        assert_eq!(request.target, PathBuf::from("here"));
        assert_eq!(request.url, "/tmp/demo.git");

        Ok(())
    }

    #[test]
    fn progress_skips_rapid_redraws() {
        let mut progress = CloneProgress {
            bar: ProgressBar::hidden(),
            drawn: None,
        };

        let start = Instant::now();

        progress.record(1, 10, start);
        progress.record(5, 10, start + Duration::from_millis(1));
        assert_eq!(progress.bar.position(), 1);
        assert_eq!(progress.bar.length(), Some(10));

        progress.record(6, 10, start + REDRAW_INTERVAL);
        assert_eq!(progress.bar.position(), 6);

        progress.record(10, 10, start + REDRAW_INTERVAL);
        assert_eq!(progress.bar.position(), 10);
    }

    #[test]
    fn clone_refuses_occupied_target() -> anyhow::Result<()> {
        let target = tempfile::tempdir()?;
        write(target.path().join("README.md"), "taken")?;
        let request = CloneRequest {
            url: "/nonexistent/repo.git".into(),
            target: target.path().to_path_buf(),
            branch: None,
        };

        assert!(matches!(
            request.clone_project(),
            Err(CloneError::TargetNotEmpty(_))
        ));

        Ok(())
    }
}
