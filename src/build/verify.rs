// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build branch synchronization check.
//!
//! After the source branch is merged into its build branch, both must hold
//! the same source files. The build branch may only differ in two ways:
//!
//! - It may carry extra files, as long as the source branch ignores them.
//!   These are build artifacts like `vendor/`.
//! - Its ignore files may differ, since builds substitute them.
//!
//! Anything else means the build branch carries stale changes of its own,
//! and publishing on top of it would ship code that is not in the source.

use crate::git::{GitGateway, RefName, Result};

use ignore::{
    gitignore::{Gitignore, GitignoreBuilder},
    Match,
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Paths where a build branch diverges from its source branch.
///
/// An empty list means the branches are in sync.
#[instrument(skip(git), level = "debug")]
pub fn diverging_paths<G>(git: &G, source: &RefName, build: &RefName) -> Result<Vec<PathBuf>>
where
    G: GitGateway,
{
    let source_tree = list_tree(git, source.as_str())?;
    let build_tree = list_tree(git, build.as_str())?;
    let rules = SourceIgnoreRules::load(git, source, &source_tree)?;

    let mut diverging = Vec::new();
    for (path, blob) in &source_tree {
        if is_ignore_file(path) {
            continue;
        }

        if build_tree.get(path) != Some(blob) {
            debug!("{:?} differs on {build}", path.display());
            diverging.push(path.clone());
        }
    }

    for path in build_tree.keys() {
        if source_tree.contains_key(path) || is_ignore_file(path) {
            continue;
        }

        if !rules.is_ignored(path) {
            debug!("{:?} only exists on {build}", path.display());
            diverging.push(path.clone());
        }
    }

    diverging.sort();
    Ok(diverging)
}

/// Ignore rules of every `.gitignore` file on the source branch.
struct SourceIgnoreRules {
    root: PathBuf,
    matchers: Vec<(PathBuf, Gitignore)>,
}

impl SourceIgnoreRules {
    fn load<G>(git: &G, source: &RefName, tree: &BTreeMap<PathBuf, String>) -> Result<Self>
    where
        G: GitGateway,
    {
        let root = git.workdir().to_path_buf();
        let mut matchers = Vec::new();
        for path in tree.keys().filter(|path| path.ends_with(".gitignore")) {
            let object = format!("{source}:{}", path.to_string_lossy());
            let output = git.silent(["show", object.as_str()])?;
            if !output.success() {
                continue;
            }

            let dir = path.parent().unwrap_or(Path::new("")).to_path_buf();
            let mut builder = GitignoreBuilder::new(root.join(&dir));
            for line in output.stdout.lines() {
                if let Err(err) = builder.add_line(None, line) {
                    debug!("skip ignore rule {line:?}: {err}");
                }
            }

            match builder.build() {
                Ok(matcher) => matchers.push((dir, matcher)),
                Err(err) => debug!("skip ignore file {:?}: {err}", path.display()),
            }
        }

        // INVARIANT: Deeper ignore files take precedence over shallower ones.
        matchers.sort_by_key(|(dir, _)| std::cmp::Reverse(dir.components().count()));

        Ok(Self { root, matchers })
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let full = self.root.join(path);
        for (dir, matcher) in &self.matchers {
            if !path.starts_with(dir) {
                continue;
            }

            match matcher.matched_path_or_any_parents(&full, false) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => continue,
            }
        }

        false
    }
}

fn is_ignore_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .is_some_and(|name| name.starts_with(".gitignore") || name == ".build-gitignore")
}

/// Blob id of every file in the tree of target revision.
fn list_tree<G>(git: &G, rev: &str) -> Result<BTreeMap<PathBuf, String>>
where
    G: GitGateway,
{
    let output = git.silent(["ls-tree", "-r", "-z", "--full-tree", rev])?;
    if !output.success() {
        return Err(crate::git::GitError::Failed {
            command: format!("ls-tree -r -z --full-tree {rev}"),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_owned(),
        });
    }

    // INVARIANT: Entries look like "<mode> <type> <object>\t<path>\0".
    let tree = output
        .stdout
        .split('\0')
        .filter_map(|entry| {
            let (meta, path) = entry.split_once('\t')?;
            let object = meta.split_whitespace().nth(2)?;
            Some((PathBuf::from(path), object.to_owned()))
        })
        .collect();

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fake::FakeGit;
    use pretty_assertions::assert_eq;

    const SOURCE_TREE: &str = "100644 blob aaa1\t.gitignore\0100644 blob bbb2\tindex.php\0100644 blob ccc3\tweb/.gitignore\0100644 blob ddd4\tweb/app.php\0";

    fn fake_git(build_tree: &str) -> anyhow::Result<(FakeGit, RefName, RefName)> {
        let git = FakeGit::default();
        git.respond("ls-tree -r -z --full-tree develop", 0, SOURCE_TREE);
        git.respond("ls-tree -r -z --full-tree build/develop", 0, build_tree);
        git.respond("show develop:.gitignore", 0, "vendor/\n*.log\n");
        git.respond("show develop:web/.gitignore", 0, "files/\n!keep.log\n");

        Ok((git, RefName::parse("develop")?, RefName::parse("build/develop")?))
    }

    #[test]
    fn in_sync_with_ignored_artifacts() -> anyhow::Result<()> {
        let (git, source, build) = fake_git(
            "100644 blob eee5\t.gitignore\0100644 blob bbb2\tindex.php\0100644 blob ccc3\tweb/.gitignore\0100644 blob ddd4\tweb/app.php\0100644 blob fff6\tvendor/autoload.php\0100644 blob fff7\tweb/files/logo.png\0100644 blob fff8\terror.log\0",
        )?;

        assert_eq!(diverging_paths(&git, &source, &build)?, Vec::<PathBuf>::new());

        Ok(())
    }

    #[test]
    fn modified_source_file_diverges() -> anyhow::Result<()> {
        let (git, source, build) = fake_git(
            "100644 blob aaa1\t.gitignore\0100644 blob 9999\tindex.php\0100644 blob ccc3\tweb/.gitignore\0100644 blob ddd4\tweb/app.php\0",
        )?;

        assert_eq!(diverging_paths(&git, &source, &build)?, vec![PathBuf::from("index.php")]);

        Ok(())
    }

    #[test]
    fn unignored_extra_file_diverges() -> anyhow::Result<()> {
        let (git, source, build) = fake_git(
            "100644 blob aaa1\t.gitignore\0100644 blob bbb2\tindex.php\0100644 blob ccc3\tweb/.gitignore\0100644 blob ddd4\tweb/app.php\0100644 blob 1234\tstray.php\0100644 blob 5678\tweb/keep.log\0",
        )?;

        assert_eq!(
            diverging_paths(&git, &source, &build)?,
            vec![PathBuf::from("stray.php"), PathBuf::from("web/keep.log")]
        );

        Ok(())
    }

    #[test]
    fn missing_source_file_diverges() -> anyhow::Result<()> {
        let (git, source, build) = fake_git(
            "100644 blob aaa1\t.gitignore\0100644 blob bbb2\tindex.php\0100644 blob ccc3\tweb/.gitignore\0",
        )?;

        assert_eq!(diverging_paths(&git, &source, &build)?, vec![PathBuf::from("web/app.php")]);

        Ok(())
    }
}
