// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Project context.
//!
//! A __project__ is a Git working tree with a phapp manifest at its root.
//! Every phapp command except `clone` operates on exactly one project, and
//! receives everything it needs through the [`Project`] context: the root
//! directory, the loaded manifest, the deployment environment, and the Git
//! gateway bound to the root. Nothing is read from, or written to, process
//! globals like the current directory after the context is built.

use crate::{
    build::{
        publish::{BuildBranchPublisher, PublishError, PublishOptions, PublishReport},
        BuildError, BuildExecutor, ManifestCommands, PHAPP_ENV, PHAPP_ENV_MODE,
    },
    config::{ConfigError, Manifest, Remote, PRIMARY_REMOTE},
    git::{
        remote::{RemoteError, RemoteRegistry, RemoteReport, RemoteSelector, SetupOptions},
        GitCli, GitError, GitGateway, RefName, RefNameError,
    },
    path::find_manifest,
};

use std::{
    env,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Deployment environment of a project.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Name of the deployment environment, e.g., "production".
    pub phapp_env: Option<String>,

    /// Environment mode, e.g., "development".
    pub mode: Option<String>,
}

impl Environment {
    /// Read `PHAPP_ENV` and `PHAPP_ENV_MODE`, treating empty as unset.
    pub fn from_env() -> Self {
        let read = |key: &str| env::var(key).ok().filter(|value| !value.is_empty());

        Self {
            phapp_env: read(PHAPP_ENV),
            mode: read(PHAPP_ENV_MODE),
        }
    }

    pub fn is_development(&self) -> bool {
        self.mode.as_deref() == Some("development")
    }
}

/// Whether the application of a project is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    Installed,
    NotInstalled,
}

impl InstallStatus {
    /// Operator message for the status.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Installed => "Application is installed.",
            Self::NotInstalled => "Application is not installed.",
        }
    }
}

/// A phapp project.
#[derive(Debug, Clone)]
pub struct Project<G = GitCli>
where
    G: GitGateway,
{
    root: PathBuf,
    manifest: Manifest,
    environment: Environment,
    git: G,
}

impl Project<GitCli> {
    /// Locate the project containing `start` and load its manifest.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::ManifestNotFound`] if neither `start` nor any
    ///   of its parents holds a manifest.
    /// - Return [`ProjectError::Config`] if the manifest is invalid.
    #[instrument(skip(start, environment), level = "debug")]
    pub fn discover(start: impl AsRef<Path>, environment: Environment) -> Result<Self> {
        let manifest_path = find_manifest(start.as_ref())
            .ok_or_else(|| ProjectError::ManifestNotFound(start.as_ref().to_path_buf()))?;
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| start.as_ref().to_path_buf());
        let manifest = Manifest::load(&manifest_path)?;
        info!("using phapp manifest {:?}", manifest_path.display());

        Ok(Self::with_git(
            root.clone(),
            manifest,
            environment,
            GitCli::new(root),
        ))
    }
}

impl<G> Project<G>
where
    G: GitGateway,
{
    /// Construct project context from its parts.
    pub fn with_git(
        root: impl Into<PathBuf>,
        manifest: Manifest,
        environment: Environment,
        git: G,
    ) -> Self {
        Self {
            root: root.into(),
            manifest,
            environment,
            git,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    /// Runner for the manifest commands of this project.
    pub fn commands(&self) -> ManifestCommands {
        ManifestCommands::new(
            &self.root,
            &self.manifest,
            self.environment.phapp_env.as_deref(),
        )
    }

    /// Build the project in place.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::Build`] if a build command fails.
    pub fn build(&self, clean: bool) -> Result<()> {
        let commands = self.commands();
        if clean {
            commands.clean()?;
        }

        commands.build()?;
        Ok(())
    }

    /// Remove build artifacts.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::Build`] if the clean command fails.
    pub fn clean(&self) -> Result<()> {
        self.commands().clean()?;
        Ok(())
    }

    /// Build target branch and commit the result to its build branch.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::RefName`] if the branch name is invalid.
    /// - Return [`ProjectError::Publish`] if publishing fails.
    pub fn build_branch(&self, branch: &str, options: PublishOptions) -> Result<PublishReport> {
        let branch = RefName::parse(branch)?;
        let commands = self.commands();
        let mut publisher = BuildBranchPublisher::new(&self.git, &self.manifest, &commands);

        Ok(publisher.publish(&branch, options)?)
    }

    /// Make local remotes match the manifest.
    ///
    /// The optional callback is asked before a conflicting remote is
    /// repointed under `force`.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::Remote`] if reconciliation fails.
    pub fn setup_remotes<'a, F>(
        &'a self,
        options: SetupOptions,
        confirm: Option<F>,
    ) -> Result<RemoteReport>
    where
        F: Fn(&Remote, &str) -> bool + 'a,
    {
        let mut registry = RemoteRegistry::new(&self.git);
        if let Some(confirm) = confirm {
            registry = registry.with_confirmation(confirm);
        }

        let report = registry.ensure_remotes(&self.manifest.all_remotes(), options)?;
        if !report.declined.is_empty() {
            info!("operator kept remotes {}", report.declined.join(", "));
        }

        Ok(report)
    }

    /// Fetch remotes and update branches from them.
    ///
    /// Without a branch, the develop branch is updated, followed by the
    /// production branch if the primary remote has it.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::DirtyWorkspace`] if the working tree has
    ///   pending changes. Nothing is fetched in that case.
    /// - Return [`ProjectError::BranchMissing`] if the develop branch is not
    ///   at the primary remote.
    /// - Return [`ProjectError::Remote`] if fetching or updating fails.
    #[instrument(skip(self), level = "debug")]
    pub fn pull(&self, branch: Option<&str>, selector: &RemoteSelector) -> Result<()> {
        // INVARIANT: Never merge into a working tree with pending changes.
        let status = self.git.status_porcelain()?;
        if !status.is_empty() {
            return Err(ProjectError::DirtyWorkspace(status));
        }

        let registry = RemoteRegistry::new(&self.git);
        let fetch = SetupOptions {
            force: false,
            fetch: true,
        };
        registry.ensure_remotes(&self.manifest.all_remotes(), fetch)?;

        if let Some(branch) = branch {
            registry.pull_branch(&self.manifest, &RefName::parse(branch)?, selector)?;
            return Ok(());
        }

        let branches = &self.manifest.git.branches;
        let develop = RefName::parse(&branches.develop)?;
        let production = RefName::parse(&branches.production)?;
        let origin = RefName::parse(PRIMARY_REMOTE)?;

        if !registry.branch_exists(&develop, &origin)? {
            return Err(ProjectError::BranchMissing {
                branch: develop.to_string(),
                remote: PRIMARY_REMOTE.into(),
            });
        }
        registry.pull_branch(&self.manifest, &develop, selector)?;

        if registry.branch_exists(&production, &origin)? {
            registry.pull_branch(&self.manifest, &production, selector)?;
        } else {
            info!("branch {production} is not existing at remote {PRIMARY_REMOTE}");
        }

        Ok(())
    }

    /// Check whether the application is installed.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::Build`] if the status command is missing or
    ///   cannot be run.
    pub fn status(&self) -> Result<InstallStatus> {
        let status = match self.commands().exit_code("status")? {
            0 => InstallStatus::Installed,
            _ => InstallStatus::NotInstalled,
        };

        Ok(status)
    }

    /// Install the application, building first in development mode.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::Build`] if a command fails.
    pub fn install(&self, build: bool) -> Result<()> {
        self.lifecycle("install", build && self.environment.is_development())
    }

    /// Update the application, building first in development mode.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::Build`] if a command fails.
    pub fn update(&self, build: bool) -> Result<()> {
        self.lifecycle("update", build && self.environment.is_development())
    }

    /// Initialize the application, building first unless told otherwise.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::Build`] if a command fails.
    pub fn init(&self, build: bool) -> Result<()> {
        self.lifecycle("init", build)
    }

    /// Set up the application for a deployment environment.
    ///
    /// The environment argument takes precedence over `PHAPP_ENV`.
    ///
    /// # Errors
    ///
    /// - Return [`ProjectError::EnvironmentUndefined`] if no environment is
    ///   known.
    /// - Return [`ProjectError::Build`] if the setup command fails.
    pub fn setup(&self, phapp_env: Option<&str>) -> Result<()> {
        let phapp_env = phapp_env
            .or(self.environment.phapp_env.as_deref())
            .ok_or(ProjectError::EnvironmentUndefined)?;

        info!("setting up environment {phapp_env}");
        ManifestCommands::new(&self.root, &self.manifest, Some(phapp_env)).run("setup")?;

        Ok(())
    }

    fn lifecycle(&self, name: &str, build_first: bool) -> Result<()> {
        let commands = self.commands();
        if build_first {
            info!("building...");
            commands.build()?;
        }

        commands.run(name)?;
        Ok(())
    }
}

/// Project error types.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// No manifest found at or above the starting directory.
    #[error("unable to find a phapp manifest (phapp.yml) in {:?} or any parent", .0.display())]
    ManifestNotFound(PathBuf),

    /// Setup requires a deployment environment.
    #[error("the phapp environment is undefined; run phapp setup ENVIRONMENT to initialize it")]
    EnvironmentUndefined,

    /// Working tree has pending changes.
    #[error("git workspace is not clean:\n{0}")]
    DirtyWorkspace(String),

    /// Branch is not at the remote.
    #[error("branch {branch} does not exist at remote {remote}")]
    BranchMissing { branch: String, remote: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    RefName(#[from] RefNameError),
}

/// Friendly result alias :3
pub type Result<T, E = ProjectError> = std::result::Result<T, E>;
