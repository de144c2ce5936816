// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project builds.
//!
//! How a project is built is entirely up to the project itself. The manifest
//! maps lifecycle steps like "build" or "clean" onto shell commands, and
//! phapp merely runs them in the project root. The [`BuildExecutor`] trait is
//! the seam between the build branch machinery and those commands, so that
//! the former never needs to know what a build actually does.
//!
//! # Command Environment
//!
//! Manifest commands run through `sh -c` with the project root as working
//! directory. They inherit the environment of phapp itself, extended with:
//!
//! - Every variable listed under `environment` in the manifest.
//! - `PHAPP_ENV` if the deployment environment is known.
//! - `<root>/vendor/bin` and `<root>/bin` prepended to `PATH`.

pub mod gitignore;
pub mod publish;
pub mod verify;

use crate::config::Manifest;

use ignore::WalkBuilder;
use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
    fs::remove_dir_all,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument};

/// Environment variable naming the deployment environment.
pub const PHAPP_ENV: &str = "PHAPP_ENV";

/// Environment variable naming the environment mode, e.g., "development".
pub const PHAPP_ENV_MODE: &str = "PHAPP_ENV_MODE";

/// Opaque build steps of a project.
pub trait BuildExecutor {
    /// Remove artifacts of previous builds.
    fn clean(&self) -> Result<()>;

    /// Build the project in place.
    fn build(&self) -> Result<()>;
}

/// Runs shell commands configured in a project manifest.
#[derive(Debug, Clone)]
pub struct ManifestCommands {
    root: PathBuf,
    commands: BTreeMap<String, String>,
    environment: BTreeMap<String, String>,
}

impl ManifestCommands {
    /// Construct new command runner for a project.
    ///
    /// The deployment environment, if known, is exported as `PHAPP_ENV`.
    pub fn new(root: impl Into<PathBuf>, manifest: &Manifest, phapp_env: Option<&str>) -> Self {
        let mut environment = manifest.environment.clone();
        if let Some(phapp_env) = phapp_env {
            environment.insert(PHAPP_ENV.into(), phapp_env.into());
        }

        Self {
            root: root.into(),
            commands: manifest.commands.clone(),
            environment,
        }
    }

    /// Check if a command is configured.
    pub fn has(&self, name: &str) -> bool {
        self.commands
            .get(name)
            .is_some_and(|command| !command.trim().is_empty())
    }

    /// Run a configured command and report its exit code.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::MissingCommand`] if the command is not
    ///   configured.
    /// - Return [`BuildError::Spawn`] if the shell cannot be executed.
    #[instrument(skip(self), level = "debug")]
    pub fn exit_code(&self, name: &str) -> Result<i32> {
        let command = self
            .commands
            .get(name)
            .filter(|command| !command.trim().is_empty())
            .ok_or_else(|| BuildError::MissingCommand(name.to_owned()))?;

        info!("running {name} command: {command}");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .envs(&self.environment)
            .env("PATH", self.search_path())
            .spawn()
            .and_then(|mut child| child.wait())
            .map_err(|err| BuildError::Spawn {
                source: err,
                name: name.to_owned(),
            })?;

        Ok(status.code().unwrap_or(-1))
    }

    /// Run a configured command, failing on nonzero exit code.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::CommandFailed`] if the command exits with
    ///   nonzero code.
    /// - Return any error produced by [`ManifestCommands::exit_code`].
    pub fn run(&self, name: &str) -> Result<()> {
        match self.exit_code(name)? {
            0 => Ok(()),
            exit_code => Err(BuildError::CommandFailed {
                name: name.to_owned(),
                exit_code,
            }),
        }
    }

    fn search_path(&self) -> OsString {
        let mut paths = vec![self.root.join("vendor").join("bin"), self.root.join("bin")];
        if let Some(current) = env::var_os("PATH") {
            paths.extend(env::split_paths(&current));
        }

        env::join_paths(paths).unwrap_or_else(|_| env::var_os("PATH").unwrap_or_default())
    }
}

impl BuildExecutor for ManifestCommands {
    fn clean(&self) -> Result<()> {
        if !self.has("clean") {
            info!("no clean command configured, nothing to clean");
            return Ok(());
        }

        self.run("clean")
    }

    fn build(&self) -> Result<()> {
        self.run("build")
    }
}

/// Remove `.git` directories nested below the project root.
///
/// Dependencies fetched straight from Git repositories carry their own
/// `.git` directory, which would turn them into submodules once committed.
/// The top-level `.git` directory of the project is left alone.
///
/// # Errors
///
/// - Return [`BuildError::Walk`] if the project tree cannot be walked.
/// - Return [`BuildError::Io`] if a directory cannot be removed.
#[instrument(skip(root), level = "debug")]
pub fn prune_nested_git_dirs(root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .filter_entry(|entry| !(entry.depth() == 1 && entry.file_name() == ".git"))
        .build();

    let mut nested: Vec<PathBuf> = Vec::new();
    for entry in walker {
        let entry = entry?;
        let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
        if entry.depth() > 1 && is_dir && entry.file_name() == ".git" {
            nested.push(entry.into_path());
        }
    }

    // INVARIANT: Only remove outermost matches, their contents go with them.
    nested.sort();
    let mut removed: Vec<PathBuf> = Vec::new();
    for path in nested {
        if removed.iter().any(|outer| path.starts_with(outer)) {
            continue;
        }

        debug!("remove {:?}", path.display());
        remove_dir_all(&path).map_err(|err| BuildError::Io {
            source: err,
            path: path.clone(),
        })?;
        removed.push(path);
    }

    if !removed.is_empty() {
        info!("removed {} .git directories to avoid troubles with git submodules", removed.len());
    }

    Ok(removed)
}

/// Build error types.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Manifest does not configure the command.
    #[error("no {0:?} command configured in the manifest")]
    MissingCommand(String),

    /// Shell cannot be executed.
    #[error("failed to execute {name} command")]
    Spawn {
        #[source]
        source: std::io::Error,
        name: String,
    },

    /// Command exits with nonzero code.
    #[error("{name} command failed with exit code {exit_code}")]
    CommandFailed { name: String, exit_code: i32 },

    /// File system operation fails.
    #[error("failed to modify {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Project tree cannot be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Ignore file search pattern is malformed.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Ignore file search fails.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
}

/// Friendly result alias :3
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_to_string, write};

    fn manifest(commands: &str) -> Manifest {
        format!("name: demo\ncommands:\n{commands}").parse().unwrap()
    }

    #[test]
    fn prune_keeps_top_level_git_dir() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        create_dir_all(root.path().join(".git").join("objects"))?;
        create_dir_all(root.path().join("vendor").join("lib").join(".git").join("objects"))?;
        create_dir_all(root.path().join("web").join("module").join(".git"))?;
        write(root.path().join("vendor").join("lib").join("lib.php"), "<?php")?;

        let removed = prune_nested_git_dirs(root.path())?;
        assert_eq!(removed.len(), 2);
        assert!(root.path().join(".git").join("objects").is_dir());
        assert!(!root.path().join("vendor").join("lib").join(".git").exists());
        assert!(!root.path().join("web").join("module").join(".git").exists());
        assert!(root.path().join("vendor").join("lib").join("lib.php").is_file());

        Ok(())
    }

    #[test]
    fn manifest_command_exports_environment() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let manifest = "name: demo\ncommands:\n  build: echo \"$PHAPP_ENV $APP_MODE\" > out.txt\nenvironment:\n  APP_MODE: strict\n"
            .parse::<Manifest>()?;
        let commands = ManifestCommands::new(root.path(), &manifest, Some("live"));

        commands.build()?;
        assert_eq!(read_to_string(root.path().join("out.txt"))?, "live strict\n");

        Ok(())
    }

    #[test]
    fn manifest_command_failure() {
        let commands = ManifestCommands::new(".", &manifest("  build: exit 3\n"), None);

        let result = commands.build();
        assert!(matches!(
            result,
            Err(BuildError::CommandFailed { exit_code: 3, .. })
        ));
    }

    #[test]
    fn missing_clean_command_is_skipped() -> anyhow::Result<()> {
        let commands = ManifestCommands::new(".", &manifest("  build: 'true'\n"), None);
        commands.clean()?;

        assert!(matches!(
            commands.run("deploy"),
            Err(BuildError::MissingCommand(_))
        ));

        Ok(())
    }
}
