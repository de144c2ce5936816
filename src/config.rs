// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the two configuration files that phapp reads: the
//! per-project __manifest__ (`phapp.yml`) and the optional system-wide
//! __global configuration__ (`config.yml`).
//!
//! Both files are YAML documents that are merged recursively over built-in
//! defaults. Mappings are merged key by key, while any other value in the
//! file replaces the default outright. Thus a manifest only needs to state
//! what differs from the defaults.

use crate::git::{RefName, RefNameError};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::{Component, Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Name of the primary remote.
pub const PRIMARY_REMOTE: &str = "origin";

/// Local build branch prefix used when the configured build prefix is empty.
pub const LOCAL_BUILD_PREFIX: &str = "build/";

const MANIFEST_DEFAULTS: &str = r#"
git:
  url: ''
  mirrors: {}
  branches:
    production: master
    develop: develop
    version_prefix: version
    build_prefix: build/
  build_repositories: all
commands:
  build: composer install --no-interaction
sub_apps: []
environment: {}
"#;

const GLOBAL_CONFIG_DEFAULTS: &str = r#"
git:
  url_pattern: 'git@github.com:{{ name }}.git'
clone:
  directory_pattern: '~/projects/{{ name }}'
"#;

/// Project manifest layout.
///
/// Every phapp project carries a manifest at its root. The manifest names
/// the project, describes its Git remotes and branch layout, and maps
/// lifecycle steps (build, install, update, ...) onto shell commands.
///
/// # Invariants
///
/// - The name is present and matches `^[a-z0-9_-]+$`.
/// - Branch names, remote names, and the build prefix form valid ref names.
/// - Sub-app paths are relative and never leave the project root.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Manifest {
    /// Machine readable project name.
    #[serde(default)]
    pub name: String,

    /// Git remotes and branch layout.
    pub git: GitSettings,

    /// Shell command per lifecycle step, e.g., "build" or "install".
    #[serde(default)]
    pub commands: BTreeMap<String, String>,

    /// Relative paths of nested applications.
    #[serde(default)]
    pub sub_apps: Vec<PathBuf>,

    /// Extra environment variables exported to manifest commands.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl Manifest {
    /// Load and validate manifest at target path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file cannot be read.
    /// - Return any validation error produced by [`Manifest::from_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        debug!("load manifest {:?}", path.as_ref().display());
        read_to_string(path.as_ref())
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.as_ref().to_path_buf(),
            })?
            .parse()
    }

    /// Check manifest invariants.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingName`] if no name is given.
    /// - Return [`ConfigError::InvalidName`] if the name has bad characters.
    /// - Return [`ConfigError::InvalidRef`] if a branch or remote name is bad.
    /// - Return [`ConfigError::InvalidSubApp`] if a sub-app path escapes.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingName);
        }

        if !self
            .name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-')
        {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }

        let branches = &self.git.branches;
        check_ref("git.branches.production", &branches.production)?;
        check_ref("git.branches.develop", &branches.develop)?;
        if !branches.build_prefix.is_empty() {
            check_ref(
                "git.branches.build_prefix",
                format!("{}{}", branches.build_prefix, branches.production),
            )?;
        }

        for name in self.git.mirrors.keys() {
            check_ref("git.mirrors", name)?;
        }

        if let BuildRepositories::Explicit(repositories) = &self.git.build_repositories {
            for name in repositories.keys() {
                check_ref("git.build_repositories", name)?;
            }
        }

        for path in &self.sub_apps {
            let escapes = path.is_absolute()
                || path
                    .components()
                    .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(ConfigError::InvalidSubApp(path.clone()));
            }
        }

        Ok(())
    }

    /// Shell command configured for a lifecycle step.
    pub fn command(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(String::as_str)
    }

    /// Source remotes: the primary remote followed by all mirrors.
    ///
    /// The primary remote is omitted when no Git URL is configured.
    pub fn remotes(&self) -> Vec<Remote> {
        let mut remotes = Vec::new();
        if !self.git.url.is_empty() {
            remotes.push(Remote::new(PRIMARY_REMOTE, &self.git.url));
        }

        remotes.extend(
            self.git
                .mirrors
                .iter()
                .filter(|(name, _)| name.as_str() != PRIMARY_REMOTE)
                .map(|(name, url)| Remote::new(name, url)),
        );

        remotes
    }

    /// Remotes that receive build branches.
    pub fn build_repositories(&self) -> Vec<Remote> {
        match &self.git.build_repositories {
            BuildRepositories::All(_) => self.remotes(),
            BuildRepositories::Explicit(repositories) => repositories
                .iter()
                .map(|(name, url)| Remote::new(name, url))
                .collect(),
        }
    }

    /// Build repositories that build branches can be pulled from.
    ///
    /// Without a build prefix a build branch carries the name of its source
    /// branch at remote side, so source remotes cannot tell the two apart and
    /// are left out.
    pub fn build_sources(&self) -> Vec<Remote> {
        let repositories = self.build_repositories();
        if !self.git.branches.build_prefix.is_empty() {
            return repositories;
        }

        let sources = self.remotes();
        repositories
            .into_iter()
            .filter(|remote| !sources.iter().any(|source| source.name == remote.name))
            .collect()
    }

    /// Every remote the local repository should know about.
    ///
    /// Source remotes win over build repositories of the same name.
    pub fn all_remotes(&self) -> Vec<Remote> {
        let mut remotes = self.remotes();
        for remote in self.build_repositories() {
            if !remotes.iter().any(|known| known.name == remote.name) {
                remotes.push(remote);
            }
        }

        remotes
    }

    /// Name of the build branch for a source branch as found at remotes.
    pub fn build_branch(&self, branch: &str) -> String {
        format!("{}{branch}", self.git.branches.build_prefix)
    }

    /// Name of the build branch for a source branch in the local repository.
    ///
    /// Identical to [`Manifest::build_branch`] unless the build prefix is
    /// empty, in which case the local name must still differ from the
    /// source branch.
    pub fn local_build_branch(&self, branch: &str) -> String {
        if self.git.branches.build_prefix.is_empty() {
            format!("{LOCAL_BUILD_PREFIX}{branch}")
        } else {
            self.build_branch(branch)
        }
    }
}

impl FromStr for Manifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let manifest: Manifest = merge_over_defaults(MANIFEST_DEFAULTS, data)?;
        manifest.validate()?;

        Ok(manifest)
    }
}

/// Git settings of a manifest.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GitSettings {
    /// URL of the primary remote.
    pub url: String,

    /// Additional remotes by name.
    pub mirrors: BTreeMap<String, String>,

    /// Branch layout.
    pub branches: BranchSettings,

    /// Remotes that receive build branches.
    pub build_repositories: BuildRepositories,
}

/// Branch layout of a manifest.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct BranchSettings {
    /// Branch deployed to production.
    pub production: String,

    /// Main development branch.
    pub develop: String,

    /// Prefix of version tags. Empty disables tag forwarding.
    pub version_prefix: String,

    /// Prefix turning a source branch or tag into its build counterpart.
    pub build_prefix: String,
}

/// Remotes that build branches are published to.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BuildRepositories {
    /// Every source remote.
    All(AllRemotes),

    /// Explicit listing of remotes by name.
    Explicit(BTreeMap<String, String>),
}

/// Keyword selecting every source remote.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllRemotes {
    All,
}

/// Named Git remote.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// System-wide configuration layout.
///
/// Only consulted by commands that operate outside of a project, i.e.,
/// cloning a project by name.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    pub git: GlobalGitSettings,
    pub clone: CloneSettings,
}

/// Git settings of the global configuration.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GlobalGitSettings {
    /// Repository URL pattern; `{{ name }}` is replaced by the project name.
    pub url_pattern: String,
}

/// Clone settings of the global configuration.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct CloneSettings {
    /// Target directory pattern; `{{ name }}` is replaced by the project name.
    pub directory_pattern: String,
}

impl GlobalConfig {
    /// Load global configuration at target path, or defaults when absent.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if the file is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let data = match path {
            Some(path) => {
                debug!("load global config {:?}", path.display());
                read_to_string(path).map_err(|err| ConfigError::Read {
                    source: err,
                    path: path.to_path_buf(),
                })?
            }
            None => String::new(),
        };

        data.parse()
    }

    /// Repository URL for a project name.
    pub fn git_url(&self, name: &str) -> String {
        expand_name(&self.git.url_pattern, name)
    }

    /// Default clone directory for a project name.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if shell expansion fails.
    pub fn clone_directory(&self, name: &str) -> Result<PathBuf> {
        let pattern = expand_name(&self.clone.directory_pattern, name);
        let expanded = shellexpand::full(&pattern).map_err(ConfigError::ShellExpansion)?;

        Ok(PathBuf::from(expanded.into_owned()))
    }
}

impl FromStr for GlobalConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        merge_over_defaults(GLOBAL_CONFIG_DEFAULTS, data)
    }
}

fn expand_name(pattern: &str, name: &str) -> String {
    pattern.replace("{{ name }}", name).replace("{{name}}", name)
}

fn check_ref(field: &'static str, name: impl Into<String>) -> Result<()> {
    RefName::parse(name)
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidRef { field, source })
}

fn merge_over_defaults<T>(defaults: &str, data: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut merged: Value = serde_yaml::from_str(defaults)?;
    let overlay: Value = serde_yaml::from_str(data)?;

    // INVARIANT: An empty document means "no overrides", not "null".
    if !overlay.is_null() {
        merge_value(&mut merged, overlay);
    }

    Ok(serde_yaml::from_value(merged)?)
}

/// Merge `overlay` into `base` recursively.
///
/// Mappings merge key by key. Any other overlay value replaces the base.
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file cannot be read.
    #[error("failed to read configuration file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] serde_yaml::Error),

    /// Manifest lacks a name.
    #[error("phapp name is required")]
    MissingName,

    /// Manifest name has characters outside of `[a-z0-9_-]`.
    #[error(
        "phapp name {0:?} may only contain lowercase alpha-numeric characters, dashes and underscores"
    )]
    InvalidName(String),

    /// Branch or remote name cannot be used as a Git ref.
    #[error("invalid value for {field}")]
    InvalidRef {
        field: &'static str,
        #[source]
        source: RefNameError,
    },

    /// Sub-app path is absolute or leaves the project root.
    #[error("sub app path {:?} must be relative to the project root", .0.display())]
    InvalidSubApp(PathBuf),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test]
    fn deserialize_manifest_over_defaults() -> anyhow::Result<()> {
        let result: Manifest = indoc! {r#"
            name: example-app
            git:
              url: git@example.com:org/example-app.git
              mirrors:
                backup: git@backup.example.com:example-app.git
              branches:
                production: main
            commands:
              install: ./scripts/install.sh
            environment:
              APP_DEBUG: "1"
        "#}
        .parse()?;

        let expect = Manifest {
            name: "example-app".into(),
            git: GitSettings {
                url: "git@example.com:org/example-app.git".into(),
                mirrors: BTreeMap::from([(
                    "backup".into(),
                    "git@backup.example.com:example-app.git".into(),
                )]),
                branches: BranchSettings {
                    production: "main".into(),
                    develop: "develop".into(),
                    version_prefix: "version".into(),
                    build_prefix: "build/".into(),
                },
                build_repositories: BuildRepositories::All(AllRemotes::All),
            },
            commands: BTreeMap::from([
                ("build".into(), "composer install --no-interaction".into()),
                ("install".into(), "./scripts/install.sh".into()),
            ]),
            sub_apps: Vec::new(),
            environment: BTreeMap::from([("APP_DEBUG".into(), "1".into())]),
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test_case("demo"; "lowercase")]
    #[test_case("demo_app-2"; "dashes underscores digits")]
    #[test]
    fn manifest_name_accepted(name: &str) {
        let manifest = format!("name: {name}\n").parse::<Manifest>();
        assert!(manifest.is_ok());
    }

    #[test_case("Demo"; "uppercase")]
    #[test_case("demo app"; "whitespace")]
    #[test_case("demo.app"; "dot")]
    #[test_case("démo"; "non ascii")]
    #[test]
    fn manifest_name_rejected(name: &str) {
        let result = format!("name: '{name}'\n").parse::<Manifest>();
        assert!(matches!(result, Err(ConfigError::InvalidName(_))));
    }

    #[test]
    fn manifest_name_required() {
        let result = "git:\n  url: ''\n".parse::<Manifest>();
        assert!(matches!(result, Err(ConfigError::MissingName)));

        let result = "".parse::<Manifest>();
        assert!(matches!(result, Err(ConfigError::MissingName)));
    }

    #[test]
    fn manifest_rejects_escaping_sub_app() {
        let result = "name: demo\nsub_apps: ['web', '../elsewhere']\n".parse::<Manifest>();
        assert!(matches!(result, Err(ConfigError::InvalidSubApp(_))));
    }

    #[test]
    fn manifest_rejects_bad_branch_name() {
        let result = "name: demo\ngit:\n  branches:\n    production: '-x'\n".parse::<Manifest>();
        assert!(matches!(result, Err(ConfigError::InvalidRef { .. })));
    }

    #[test]
    fn manifest_remote_listing() -> anyhow::Result<()> {
        let manifest: Manifest = indoc! {r#"
            name: demo
            git:
              url: https://example.com/demo.git
              mirrors:
                zeta: https://zeta.example.com/demo.git
                alpha: https://alpha.example.com/demo.git
              build_repositories:
                artifacts: https://artifacts.example.com/demo.git
        "#}
        .parse()?;

        assert_eq!(
            manifest.remotes(),
            vec![
                Remote::new("origin", "https://example.com/demo.git"),
                Remote::new("alpha", "https://alpha.example.com/demo.git"),
                Remote::new("zeta", "https://zeta.example.com/demo.git"),
            ]
        );
        assert_eq!(
            manifest.build_repositories(),
            vec![Remote::new("artifacts", "https://artifacts.example.com/demo.git")]
        );
        assert_eq!(manifest.all_remotes().len(), 4);

        Ok(())
    }

    #[test]
    fn build_branch_names() -> anyhow::Result<()> {
        let manifest: Manifest = "name: demo\n".parse()?;
        assert_eq!(manifest.build_branch("develop"), "build/develop");
        assert_eq!(manifest.local_build_branch("develop"), "build/develop");

        let manifest: Manifest = "name: demo\ngit:\n  branches:\n    build_prefix: ''\n".parse()?;
        assert_eq!(manifest.build_branch("develop"), "develop");
        assert_eq!(manifest.local_build_branch("develop"), "build/develop");

        Ok(())
    }

    #[test]
    fn build_sources_skip_source_remotes_without_prefix() -> anyhow::Result<()> {
        let manifest: Manifest = indoc! {r#"
            name: demo
            git:
              url: https://example.com/demo.git
              mirrors:
                backup: https://backup.example.com/demo.git
        "#}
        .parse()?;
        assert_eq!(manifest.build_sources().len(), 2);

        let manifest: Manifest = indoc! {r#"
            name: demo
            git:
              url: https://example.com/demo.git
              branches:
                build_prefix: ''
        "#}
        .parse()?;
        assert!(manifest.build_sources().is_empty());

        let manifest: Manifest = indoc! {r#"
            name: demo
            git:
              url: https://example.com/demo.git
              branches:
                build_prefix: ''
              build_repositories:
                origin: https://example.com/demo.git
                artifacts: https://artifacts.example.com/demo.git
        "#}
        .parse()?;
        assert_eq!(
            manifest.build_sources(),
            vec![Remote::new("artifacts", "https://artifacts.example.com/demo.git")]
        );

        Ok(())
    }

    #[test]
    fn merge_replaces_scalars_and_merges_mappings() -> anyhow::Result<()> {
        let mut base: Value = serde_yaml::from_str("a: {b: 1, c: 2}\nd: [1, 2]\n")?;
        let overlay: Value = serde_yaml::from_str("a: {c: 3}\nd: [9]\n")?;
        merge_value(&mut base, overlay);

        let expect: Value = serde_yaml::from_str("a: {b: 1, c: 3}\nd: [9]\n")?;
        assert_eq!(base, expect);

        Ok(())
    }

    #[sealed_test(env = [("PROJECTS", "/srv/projects")])]
    fn global_config_expands_patterns() -> anyhow::Result<()> {
        let config: GlobalConfig = indoc! {r#"
            git:
              url_pattern: 'https://git.example.com/{{ name }}.git'
            clone:
              directory_pattern: '$PROJECTS/{{ name }}'
        "#}
        .parse()?;

        assert_eq!(config.git_url("demo"), "https://git.example.com/demo.git");
        assert_eq!(
            config.clone_directory("demo")?,
            PathBuf::from("/srv/projects/demo")
        );

        Ok(())
    }

    #[test]
    fn global_config_defaults() -> anyhow::Result<()> {
        let config = GlobalConfig::load(None)?;
        assert_eq!(config.git_url("demo"), "git@github.com:demo.git");

        Ok(())
    }
}
