// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ignore file substitution for build branches.
//!
//! Build artifacts like `vendor/` are ignored on source branches, but must be
//! committed to build branches. Before a build is committed, the ignore rules
//! of the working tree are swapped out for build-specific ones:
//!
//! 1. Every `.gitignore-build` file found anywhere in the tree is appended to
//!    the `.gitignore` file next to it.
//! 2. Otherwise, a top-level `.build-gitignore` file replaces the top-level
//!    `.gitignore` file. This layout is deprecated.
//! 3. Otherwise, the top-level `.gitignore` file is removed.
//!
//! Every touched `.gitignore` file is reported back, so that it can be kept
//! out of the build commit and restored afterwards.

use crate::build::{BuildError, Result};

use glob::{glob_with, MatchOptions, Pattern};
use std::{
    fs::{copy, read_to_string, remove_file, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Per-directory build ignore rules.
pub const BUILD_IGNORE_FILE: &str = ".gitignore-build";

/// Deprecated top-level build ignore rules.
pub const LEGACY_BUILD_IGNORE_FILE: &str = ".build-gitignore";

const IGNORE_FILE: &str = ".gitignore";

/// Outcome of an ignore file substitution.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IgnoreSubstitution {
    /// Touched ignore files relative to the project root.
    pub touched: Vec<PathBuf>,
}

/// Swap ignore rules of the working tree for build-specific ones.
///
/// # Errors
///
/// - Return [`BuildError::Pattern`] or [`BuildError::Glob`] if the search for
///   build ignore files fails.
/// - Return [`BuildError::Io`] if an ignore file cannot be modified.
#[instrument(skip(root), level = "debug")]
pub fn substitute_ignore_files(root: impl AsRef<Path>) -> Result<IgnoreSubstitution> {
    let root = root.as_ref();
    let build_ignores = find_build_ignore_files(root)?;

    let mut substitution = IgnoreSubstitution::default();
    if !build_ignores.is_empty() {
        for build_ignore in build_ignores {
            let dir = build_ignore.parent().unwrap_or(root);
            let target = dir.join(IGNORE_FILE);
            append_rules(&build_ignore, &target)?;
            substitution.touched.push(relative(root, &target));
        }

        info!("extended {} .gitignore files with build rules", substitution.touched.len());
        return Ok(substitution);
    }

    let target = root.join(IGNORE_FILE);
    let legacy = root.join(LEGACY_BUILD_IGNORE_FILE);
    if legacy.is_file() {
        warn!("{LEGACY_BUILD_IGNORE_FILE} is deprecated, use {BUILD_IGNORE_FILE} files instead");
        copy(&legacy, &target).map_err(|err| BuildError::Io {
            source: err,
            path: target.clone(),
        })?;
        substitution.touched.push(PathBuf::from(IGNORE_FILE));
    } else if target.is_file() {
        debug!("remove {:?}", target.display());
        remove_file(&target).map_err(|err| BuildError::Io {
            source: err,
            path: target.clone(),
        })?;
        substitution.touched.push(PathBuf::from(IGNORE_FILE));
    }

    Ok(substitution)
}

fn find_build_ignore_files(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/**/{BUILD_IGNORE_FILE}",
        Pattern::escape(&root.to_string_lossy())
    );
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let git_dir = root.join(".git");
    let mut found = Vec::new();
    for entry in glob_with(&pattern, options)? {
        let path = entry?;
        if path.starts_with(&git_dir) || !path.is_file() {
            continue;
        }

        found.push(path);
    }

    found.sort();
    Ok(found)
}

fn append_rules(source: &Path, target: &Path) -> Result<()> {
    let rules = read_to_string(source).map_err(|err| BuildError::Io {
        source: err,
        path: source.to_path_buf(),
    })?;
    let existing = if target.is_file() {
        read_to_string(target).map_err(|err| BuildError::Io {
            source: err,
            path: target.to_path_buf(),
        })?
    } else {
        String::new()
    };

    // INVARIANT: Appended rules always start on a line of their own.
    let mut addition = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        addition.push('\n');
    }
    addition.push_str(&rules);

    debug!("append {:?} to {:?}", source.display(), target.display());
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(target)
        .map_err(|err| BuildError::Io {
            source: err,
            path: target.to_path_buf(),
        })?;
    file.write_all(addition.as_bytes())
        .map_err(|err| BuildError::Io {
            source: err,
            path: target.to_path_buf(),
        })
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};

    #[test]
    fn build_ignore_files_extend_siblings() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        create_dir_all(root.path().join("web"))?;
        create_dir_all(root.path().join(".git"))?;
        write(root.path().join(".gitignore"), "vendor/\n.env")?;
        write(root.path().join(".gitignore-build"), "!vendor/\n")?;
        write(root.path().join("web").join(".gitignore-build"), "files/\n")?;
        write(root.path().join(".git").join(".gitignore-build"), "bogus\n")?;

        let result = substitute_ignore_files(root.path())?;
        assert_eq!(
            result.touched,
            vec![PathBuf::from(".gitignore"), PathBuf::from("web/.gitignore")]
        );
        assert_eq!(
            read_to_string(root.path().join(".gitignore"))?,
            indoc! {"
                vendor/
                .env
                !vendor/
            "}
        );
        assert_eq!(read_to_string(root.path().join("web").join(".gitignore"))?, "files/\n");

        Ok(())
    }

    #[test]
    fn legacy_build_ignore_replaces_gitignore() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write(root.path().join(".gitignore"), "vendor/\n")?;
        write(root.path().join(".build-gitignore"), ".env\n")?;

        let result = substitute_ignore_files(root.path())?;
        assert_eq!(result.touched, vec![PathBuf::from(".gitignore")]);
        assert_eq!(read_to_string(root.path().join(".gitignore"))?, ".env\n");

        Ok(())
    }

    #[test]
    fn gitignore_removed_without_build_rules() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write(root.path().join(".gitignore"), "vendor/\n")?;

        let result = substitute_ignore_files(root.path())?;
        assert_eq!(result.touched, vec![PathBuf::from(".gitignore")]);
        assert!(!root.path().join(".gitignore").exists());

        Ok(())
    }

    #[test]
    fn nothing_to_substitute() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;

        let result = substitute_ignore_files(root.path())?;
        assert_eq!(result, IgnoreSubstitution::default());

        Ok(())
    }
}
