// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build branch publishing for PHP applications.
//!
//! phapp keeps deployable __build branches__ next to the source branches of
//! a Git repository. A build branch holds the source files of its source
//! branch plus every build artifact, e.g., the `vendor/` directory produced
//! by Composer, so that deployments never need to run a build themselves.
//!
//! # Layout
//!
//! - [`config`]: the project manifest and the global configuration.
//! - [`git`]: access to Git, remote management, and build ancestry.
//! - [`build`]: manifest commands and the build branch publisher.
//! - [`project`]: the context every project command runs in.
//! - [`clone`]: cloning projects by name.

pub mod build;
pub mod clone;
pub mod config;
pub mod git;
pub mod path;
pub mod project;

pub use build::publish::{BuildBranchPublisher, PublishOptions, PublishReport, TagOutcome};
pub use config::{GlobalConfig, Manifest};
pub use git::{GitCli, GitGateway, RefName};
pub use project::{Environment, InstallStatus, Project};
