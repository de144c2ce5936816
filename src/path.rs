// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, e.g., the project manifest or the global configuration.

use std::path::{Path, PathBuf};

/// File name of the project manifest.
pub const MANIFEST_FILE_NAME: &str = "phapp.yml";

/// File name of the global configuration.
pub const GLOBAL_CONFIG_FILE_NAME: &str = "config.yml";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Directories searched for the global configuration file, in order.
///
/// The current directory comes first, then `~/.phapp`, then `/etc/phapp`.
/// Directories that do not exist are skipped.
pub fn global_config_dirs(cwd: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut dirs = vec![cwd.as_ref().to_path_buf()];
    if let Ok(home) = home_dir() {
        dirs.push(home.join(".phapp"));
    }
    dirs.push(PathBuf::from("/etc/phapp"));

    dirs.into_iter().filter(|dir| dir.is_dir()).collect()
}

/// Locate the first global configuration file in the search path.
pub fn find_global_config(cwd: impl AsRef<Path>) -> Option<PathBuf> {
    global_config_dirs(cwd)
        .into_iter()
        .map(|dir| dir.join(GLOBAL_CONFIG_FILE_NAME))
        .find(|path| path.is_file())
}

/// Locate the project manifest starting at `start` and walking upwards.
///
/// Returns the path to the manifest file itself, so its parent is the
/// project root.
pub fn find_manifest(start: impl AsRef<Path>) -> Option<PathBuf> {
    start
        .as_ref()
        .ancestors()
        .map(|dir| dir.join(MANIFEST_FILE_NAME))
        .find(|path| path.is_file())
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};

    #[test]
    fn find_manifest_walks_parent_directories() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let nested = root.path().join("web").join("modules");
        create_dir_all(&nested)?;
        write(root.path().join(MANIFEST_FILE_NAME), "name: demo\n")?;

        assert_eq!(
            find_manifest(&nested),
            Some(root.path().join(MANIFEST_FILE_NAME))
        );

        Ok(())
    }

    #[test]
    fn find_manifest_without_manifest() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        // The temporary directory may live below a directory holding a stray
        // manifest, so only assert nothing is found inside the root itself.
        let found = find_manifest(root.path());
        assert!(found.map_or(true, |path| !path.starts_with(root.path())));

        Ok(())
    }
}
