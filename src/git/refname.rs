// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Validated names handed to Git.
//!
//! Branch names, tag names, remote names, and commit ids all end up as
//! arguments of a Git invocation. They are validated against a strict
//! allow-list up front so that none of them can be mistaken for an option or
//! a revision range by Git.

use std::{
    ffi::OsStr,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Name of a branch, tag, or remote.
///
/// # Invariants
///
/// - Only ASCII alpha-numeric characters and `.`, `_`, `-`, `/`.
/// - Does not start with `-` or `/`, and does not end with `/`, `.`, or
///   `.lock`.
/// - No empty path component, no component starting with `.`, and no `..`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(String);

impl RefName {
    /// Validate a name.
    ///
    /// # Errors
    ///
    /// - Return [`RefNameError`] describing the first broken rule.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(RefNameError::Empty);
        }

        if let Some(ch) = name
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | '/')))
        {
            return Err(RefNameError::IllegalCharacter { name, ch });
        }

        if name.starts_with('-') {
            return Err(RefNameError::LeadingDash(name));
        }

        let broken = name.starts_with('/')
            || name.ends_with('/')
            || name.ends_with('.')
            || name.ends_with(".lock")
            || name.contains("..")
            || name
                .split('/')
                .any(|component| component.is_empty() || component.starts_with('.'));
        if broken {
            return Err(RefNameError::IllegalSequence(name));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Prepend a prefix, validating the combined name.
    ///
    /// # Errors
    ///
    /// - Return [`RefNameError`] if the combined name is invalid.
    pub fn with_prefix(&self, prefix: &str) -> Result<Self> {
        Self::parse(format!("{prefix}{}", self.0))
    }
}

impl FromStr for RefName {
    type Err = RefNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::parse(name)
    }
}

impl Display for RefName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<OsStr> for RefName {
    fn as_ref(&self) -> &OsStr {
        OsStr::new(&self.0)
    }
}

/// Hexadecimal id of a commit, full or abbreviated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(String);

impl CommitId {
    /// Validate a commit id, trimming whitespace and quoting artifacts.
    ///
    /// # Errors
    ///
    /// - Return [`RefNameError::InvalidCommitId`] unless 4 to 64 hex digits
    ///   remain after trimming.
    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.trim().trim_matches(|ch| ch == '\'' || ch == '"');
        if (4..=64).contains(&id.len()) && id.chars().all(|ch| ch.is_ascii_hexdigit()) {
            Ok(Self(id.to_owned()))
        } else {
            Err(RefNameError::InvalidCommitId(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for CommitId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

/// Name validation error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefNameError {
    #[error("name must not be empty")]
    Empty,

    #[error("name {name:?} contains illegal character {ch:?}")]
    IllegalCharacter { name: String, ch: char },

    #[error("name {0:?} must not start with a dash")]
    LeadingDash(String),

    #[error("name {0:?} is not a well-formed ref name")]
    IllegalSequence(String),

    #[error("{0:?} is not a commit id")]
    InvalidCommitId(String),
}

/// Friendly result alias :3
type Result<T, E = RefNameError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("develop"; "plain")]
    #[test_case("build/develop"; "nested")]
    #[test_case("feature/JIRA-12_fix.v2"; "mixed")]
    #[test_case("version-1.2.0"; "version tag")]
    #[test]
    fn ref_name_accepted(name: &str) {
        assert_eq!(RefName::parse(name).map(|name| name.to_string()), Ok(name.to_owned()));
    }

    #[test_case(""; "empty")]
    #[test_case("-f"; "option")]
    #[test_case("a..b"; "range")]
    #[test_case("a b"; "whitespace")]
    #[test_case("a;rm -rf"; "shell")]
    #[test_case("$(id)"; "substitution")]
    #[test_case("a//b"; "empty component")]
    #[test_case("build/"; "trailing slash")]
    #[test_case("a/.hidden"; "dot component")]
    #[test_case("main.lock"; "lock suffix")]
    #[test_case("HEAD@{1}"; "reflog syntax")]
    #[test]
    fn ref_name_rejected(name: &str) {
        assert!(RefName::parse(name).is_err());
    }

    #[test]
    fn ref_name_prefix() -> anyhow::Result<()> {
        let tag = RefName::parse("version-1.0")?;
        assert_eq!(tag.with_prefix("build/")?.as_str(), "build/version-1.0");
        assert!(tag.with_prefix("-").is_err());

        Ok(())
    }

    #[test_case("abc123", "abc123"; "abbreviated")]
    #[test_case("'abc123'", "abc123"; "single quoted")]
    #[test_case(" \"0123456789abcdef0123456789abcdef01234567\"\n", "0123456789abcdef0123456789abcdef01234567"; "full quoted")]
    #[test]
    fn commit_id_accepted(raw: &str, expect: &str) {
        assert_eq!(CommitId::parse(raw).map(|id| id.to_string()), Ok(expect.to_owned()));
    }

    #[test_case("abc"; "too short")]
    #[test_case("xyz1234"; "not hex")]
    #[test_case("abc123."; "trailing dot")]
    #[test]
    fn commit_id_rejected(raw: &str) {
        assert!(CommitId::parse(raw).is_err());
    }
}
