// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build branch ancestry.
//!
//! Every build commit records which source commit it was built from in its
//! message, e.g., "Build develop commit 3f2a9c1.". This __provenance__ is the
//! only link between a build branch and its source branch, and it allows a
//! brand new build branch to start from the latest production build instead
//! of from scratch whenever the branch being built descends from the source
//! commit of that production build. Build branches then share history, which
//! keeps their diffs small.
//!
//! Ancestry resolution is best effort. Failing to find a relationship merely
//! starts a fresh build branch. Claiming a relationship always requires Git
//! to confirm it in the commit graph; a matching message alone is never
//! enough.

use crate::{
    config::Manifest,
    git::{CommitId, GitGateway, RefName, Result},
};

use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{debug, info, instrument};

/// Source of a build commit as recorded in its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub branch: String,
    pub commit: CommitId,
}

impl Provenance {
    /// Construct new provenance record.
    pub fn new(branch: impl Into<String>, commit: CommitId) -> Self {
        Self {
            branch: branch.into(),
            commit,
        }
    }

    /// Extract provenance from a commit message.
    ///
    /// Only the first line is considered. Returns `None` for anything that
    /// does not follow "Build {branch} commit {hash}.".
    pub fn parse(message: &str) -> Option<Self> {
        let line = message.lines().next()?.trim();
        let rest = line.strip_prefix("Build ")?;
        let (branch, commit) = rest.rsplit_once(" commit ")?;
        let commit = commit.trim_end().strip_suffix('.')?;
        let branch = branch.trim().trim_matches('\'');
        if branch.is_empty() || branch.contains(char::is_whitespace) {
            return None;
        }

        Some(Self::new(branch, CommitId::parse(commit).ok()?))
    }
}

impl Display for Provenance {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "Build {} commit {}.", self.branch, self.commit)
    }
}

/// Starting point of a new build branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ancestor {
    /// Continue from the production build branch at target revision.
    ProductionBuild(String),

    /// Start from the source branch itself.
    Fresh(RefName),
}

impl Ancestor {
    /// Revision to create the build branch at.
    pub fn rev(&self) -> &str {
        match self {
            Self::ProductionBuild(rev) => rev.as_str(),
            Self::Fresh(branch) => branch.as_str(),
        }
    }
}

/// Determine the ancestor of new build branches.
pub struct AncestryResolver<'a, G>
where
    G: GitGateway,
{
    git: &'a G,
    manifest: &'a Manifest,
}

impl<'a, G> AncestryResolver<'a, G>
where
    G: GitGateway,
{
    /// Construct new ancestry resolver.
    pub fn new(git: &'a G, manifest: &'a Manifest) -> Self {
        Self { git, manifest }
    }

    /// Determine where the build branch of `branch` should fork from.
    ///
    /// The production build branch is chosen if its latest build of
    /// `production` was made from a commit that `branch` contains. Otherwise
    /// the build branch starts fresh from `branch`.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Spawn`](crate::git::GitError::Spawn) if Git
    ///   cannot be executed. Git failing to answer any question posed here
    ///   is not an error.
    #[instrument(skip(self), level = "debug")]
    pub fn resolve_ancestor(&self, branch: &RefName, production: &RefName) -> Result<Ancestor> {
        let fresh = Ancestor::Fresh(branch.clone());

        let Some(production_build) = self.production_build_rev(production)? else {
            debug!("no build branch of {production} found");
            return Ok(fresh);
        };

        let Some(provenance) = self.latest_provenance(&production_build, production)? else {
            debug!("no build of {production} found on {production_build}");
            return Ok(fresh);
        };

        let Some(source) = self.git.resolve_commit(provenance.commit.as_str())? else {
            debug!("source commit {} of last build is unknown", provenance.commit);
            return Ok(fresh);
        };

        if self.is_strict_ancestor(&source, branch)? || self.is_same_commit(&source, branch)? {
            info!("{branch} descends from last production build source {source}");
            return Ok(Ancestor::ProductionBuild(production_build));
        }

        debug!("{branch} is unrelated to last production build source {source}");
        Ok(fresh)
    }

    /// Locate the production build branch, locally or at a build repository.
    fn production_build_rev(&self, production: &RefName) -> Result<Option<String>> {
        let local = RefName::parse(self.manifest.local_build_branch(production.as_str()))?;
        if self.git.local_branch_exists(&local)? {
            return Ok(Some(local.to_string()));
        }

        let remote_name = RefName::parse(self.manifest.build_branch(production.as_str()))?;
        for remote in self.manifest.build_sources() {
            let remote = RefName::parse(&remote.name)?;
            if self.git.remote_branch_exists(&remote, &remote_name)? {
                return Ok(Some(format!("refs/remotes/{remote}/{remote_name}")));
            }
        }

        Ok(None)
    }

    /// Newest provenance record for `production` in the history of `rev`.
    fn latest_provenance(&self, rev: &str, production: &RefName) -> Result<Option<Provenance>> {
        let grep = format!("--grep=Build {production} commit ");
        let output = self.git.silent([
            "log",
            "--format=%s",
            "--fixed-strings",
            grep.as_str(),
            rev,
            "--",
        ])?;
        if !output.success() {
            return Ok(None);
        }

        let latest = output
            .lines()
            .filter_map(Provenance::parse)
            .find(|provenance| provenance.branch == production.as_str());

        Ok(latest)
    }

    /// Graph-verified check that `branch` strictly descends from `source`.
    fn is_strict_ancestor(&self, source: &str, branch: &RefName) -> Result<bool> {
        let ancestor = self
            .git
            .silent(["merge-base", "--is-ancestor", source, branch.as_str()])?;
        if !ancestor.success() {
            return Ok(false);
        }

        let range = format!("{source}..{branch}");
        let ahead = self
            .git
            .silent(["log", "--format=oneline", range.as_str(), "--"])?;

        Ok(ahead.success() && !ahead.trimmed().is_empty())
    }

    fn is_same_commit(&self, source: &str, branch: &RefName) -> Result<bool> {
        Ok(self.git.resolve_commit(branch.as_str())?.as_deref() == Some(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fake::FakeGit;
    use simple_test_case::test_case;

    const SOURCE: &str = "abc1234def5678abc1234def5678abc1234def56";

    fn manifest() -> Manifest {
        "name: demo\ngit:\n  url: https://example.com/demo.git\n"
            .parse()
            .unwrap()
    }

    fn refname(name: &str) -> RefName {
        RefName::parse(name).unwrap()
    }

    fn production_build_with_history(git: &FakeGit, subjects: &str) {
        git.respond("rev-parse --verify --quiet refs/heads/build/master", 0, "");
        git.respond(
            "log --format=%s --fixed-strings --grep=Build master commit  build/master --",
            0,
            subjects,
        );
        git.respond(
            "rev-parse --verify --quiet abc1234^{commit}",
            0,
            &format!("{SOURCE}\n"),
        );
    }

    #[test_case("Build develop commit abc123.", "develop", "abc123"; "abbreviated")]
    #[test_case("Build feature/x commit 'abc123'.", "feature/x", "abc123"; "quoted hash")]
    #[test_case("Build master commit abc123.\n\nMerged stuff", "master", "abc123"; "multi line")]
    #[test]
    fn provenance_parsed(message: &str, branch: &str, commit: &str) {
        let provenance = Provenance::parse(message).unwrap();
        assert_eq!(provenance.branch, branch);
        assert_eq!(provenance.commit.as_str(), commit);
    }

    #[test_case(""; "empty")]
    #[test_case("Merge branch 'develop'"; "merge commit")]
    #[test_case("Build develop commit abc123"; "missing dot")]
    #[test_case("Build develop commit zzz999."; "not hex")]
    #[test_case("Build  commit abc123."; "missing branch")]
    #[test_case("build develop commit abc123."; "lowercase")]
    #[test]
    fn provenance_rejected(message: &str) {
        assert_eq!(Provenance::parse(message), None);
    }

    #[test]
    fn provenance_display_round_trips() {
        let provenance = Provenance::new("develop", CommitId::parse("abc123").unwrap());
        assert_eq!(provenance.to_string(), "Build develop commit abc123.");
        assert_eq!(Provenance::parse(&provenance.to_string()), Some(provenance));
    }

    #[test]
    fn resolve_without_production_build_starts_fresh() -> anyhow::Result<()> {
        let git = FakeGit::default();
        git.respond("rev-parse --verify --quiet refs/heads/build/master", 1, "");
        git.respond(
            "rev-parse --verify --quiet refs/remotes/origin/build/master",
            1,
            "",
        );
        let manifest = manifest();
        let resolver = AncestryResolver::new(&git, &manifest);

        let ancestor = resolver.resolve_ancestor(&refname("feature"), &refname("master"))?;
        assert_eq!(ancestor, Ancestor::Fresh(refname("feature")));

        Ok(())
    }

    #[test]
    fn resolve_with_descendant_continues_production_build() -> anyhow::Result<()> {
        let git = FakeGit::default();
        production_build_with_history(
            &git,
            "Build master commit abc1234.\nBuild master commit 0000aaaa.\n",
        );
        git.respond(
            &format!("merge-base --is-ancestor {SOURCE} feature"),
            0,
            "",
        );
        git.respond(
            &format!("log --format=oneline {SOURCE}..feature --"),
            0,
            "fff0000 Add feature\n",
        );
        let manifest = manifest();
        let resolver = AncestryResolver::new(&git, &manifest);

        let ancestor = resolver.resolve_ancestor(&refname("feature"), &refname("master"))?;
        assert_eq!(ancestor, Ancestor::ProductionBuild("build/master".into()));

        Ok(())
    }

    #[test]
    fn resolve_with_unrelated_history_starts_fresh() -> anyhow::Result<()> {
        let git = FakeGit::default();
        production_build_with_history(&git, "Build master commit abc1234.\n");
        git.respond(
            &format!("merge-base --is-ancestor {SOURCE} feature"),
            1,
            "",
        );
        // A range against unrelated history is never empty.
        git.respond(
            &format!("log --format=oneline {SOURCE}..feature --"),
            0,
            "fff0000 Unrelated\n",
        );
        git.respond(
            "rev-parse --verify --quiet feature^{commit}",
            0,
            "fff0000fff0000fff0000fff0000fff0000fff00\n",
        );
        let manifest = manifest();
        let resolver = AncestryResolver::new(&git, &manifest);

        let ancestor = resolver.resolve_ancestor(&refname("feature"), &refname("master"))?;
        assert_eq!(ancestor, Ancestor::Fresh(refname("feature")));

        Ok(())
    }

    #[test]
    fn resolve_with_same_commit_continues_production_build() -> anyhow::Result<()> {
        let git = FakeGit::default();
        production_build_with_history(&git, "Build master commit abc1234.\n");
        git.respond(
            &format!("merge-base --is-ancestor {SOURCE} release"),
            0,
            "",
        );
        git.respond(&format!("log --format=oneline {SOURCE}..release --"), 0, "");
        git.respond(
            "rev-parse --verify --quiet release^{commit}",
            0,
            &format!("{SOURCE}\n"),
        );
        let manifest = manifest();
        let resolver = AncestryResolver::new(&git, &manifest);

        let ancestor = resolver.resolve_ancestor(&refname("release"), &refname("master"))?;
        assert_eq!(ancestor, Ancestor::ProductionBuild("build/master".into()));

        Ok(())
    }

    #[test]
    fn resolve_with_malformed_messages_starts_fresh() -> anyhow::Result<()> {
        let git = FakeGit::default();
        production_build_with_history(&git, "Build master commit nothex.\nBuild master commit\n");
        let manifest = manifest();
        let resolver = AncestryResolver::new(&git, &manifest);

        let ancestor = resolver.resolve_ancestor(&refname("feature"), &refname("master"))?;
        assert_eq!(ancestor, Ancestor::Fresh(refname("feature")));

        Ok(())
    }

    #[test]
    fn resolve_ignores_builds_of_other_branches() -> anyhow::Result<()> {
        let git = FakeGit::default();
        production_build_with_history(&git, "Build develop commit abc1234.\n");
        let manifest = manifest();
        let resolver = AncestryResolver::new(&git, &manifest);

        let ancestor = resolver.resolve_ancestor(&refname("feature"), &refname("master"))?;
        assert_eq!(ancestor, Ancestor::Fresh(refname("feature")));

        Ok(())
    }
}
