// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use phapp::{
    clone::CloneRequest,
    config::{GlobalConfig, Remote},
    git::remote::{RemoteSelector, SetupOptions},
    path::find_global_config,
    Environment, InstallStatus, Project, PublishOptions, TagOutcome,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use inquire::Confirm;
use std::{
    env,
    io::{stdin, IsTerminal},
    path::PathBuf,
    process::exit,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "phapp [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Build(opts) => run_build(opts),
            Command::BuildBranch(opts) => run_build_branch(opts),
            Command::BuildClean => run_build_clean(),
            Command::GitPull(opts) => run_git_pull(opts),
            Command::GitSetupRemotes(opts) => run_git_setup_remotes(opts),
            Command::Status => run_status(),
            Command::Install(opts) => run_install(opts),
            Command::Update(opts) => run_update(opts),
            Command::Setup(opts) => run_setup(opts),
            Command::Init(opts) => run_init(opts),
            Command::Clone(opts) => run_clone(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Build the project in place.
    #[command(override_usage = "phapp build [options]")]
    Build(BuildOptions),

    /// Build a branch and commit the result to its build branch.
    #[command(name = "build:branch", override_usage = "phapp build:branch [options] <branch>")]
    BuildBranch(BuildBranchOptions),

    /// Remove build artifacts.
    #[command(name = "build:clean", override_usage = "phapp build:clean")]
    BuildClean,

    /// Fetch remotes and update branches from them.
    #[command(name = "git:pull", override_usage = "phapp git:pull [options] [<branch>]")]
    GitPull(GitPullOptions),

    /// Add configured remotes and build repositories.
    #[command(name = "git:setup-remotes", override_usage = "phapp git:setup-remotes [options]")]
    GitSetupRemotes(SetupRemotesOptions),

    /// Check whether the application is installed.
    #[command(override_usage = "phapp status")]
    Status,

    /// Install the application.
    #[command(override_usage = "phapp install [options]")]
    Install(LifecycleOptions),

    /// Update the application.
    #[command(override_usage = "phapp update [options]")]
    Update(LifecycleOptions),

    /// Set up the application for a deployment environment.
    #[command(override_usage = "phapp setup [<environment>]")]
    Setup(SetupOptionsArgs),

    /// Initialize the application.
    #[command(override_usage = "phapp init [options]")]
    Init(LifecycleOptions),

    /// Clone a project by name.
    #[command(override_usage = "phapp clone [options] <name> [<target>]")]
    Clone(CloneOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BuildOptions {
    /// Run the clean command before building.
    #[arg(short, long)]
    pub clean: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BuildBranchOptions {
    /// Source branch to build.
    #[arg(required = true, value_name = "branch")]
    pub branch: String,

    /// Skip the clean command before building.
    #[arg(long)]
    pub no_clean: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct GitPullOptions {
    /// Branch to update; defaults to the develop and production branches.
    #[arg(value_name = "branch")]
    pub branch: Option<String>,

    /// Remote to pull from, or "all".
    #[arg(short, long, value_name = "name", default_value = "all")]
    pub remote: RemoteSelector,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SetupRemotesOptions {
    /// Repoint remotes that point elsewhere.
    #[arg(short, long)]
    pub force: bool,

    /// Fetch every remote afterwards.
    #[arg(long)]
    pub fetch: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LifecycleOptions {
    /// Skip building first.
    #[arg(long)]
    pub no_build: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SetupOptionsArgs {
    /// Deployment environment; defaults to PHAPP_ENV.
    #[arg(value_name = "environment")]
    pub environment: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CloneOptions {
    /// Name of project to clone.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Directory to clone into.
    #[arg(value_name = "target")]
    pub target: Option<PathBuf>,

    /// URL of repository to clone from.
    #[arg(short, long, value_name = "url")]
    pub repository: Option<String>,

    /// Select branch to checkout.
    #[arg(short, long, value_name = "branch")]
    pub branch: Option<String>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn open_project() -> Result<Project> {
    Ok(Project::discover(env::current_dir()?, Environment::from_env())?)
}

fn run_build(opts: BuildOptions) -> Result<()> {
    open_project()?.build(opts.clean)?;
    Ok(())
}

fn run_build_branch(opts: BuildBranchOptions) -> Result<()> {
    let project = open_project()?;
    let options = PublishOptions {
        clean: !opts.no_clean,
    };
    let report = project.build_branch(&opts.branch, options)?;
    if let TagOutcome::Forwarded { build_tag, .. } = &report.tag {
        info!("build commit tagged as {build_tag}");
    }

    Ok(())
}

fn run_build_clean() -> Result<()> {
    open_project()?.clean()?;
    Ok(())
}

fn run_git_pull(opts: GitPullOptions) -> Result<()> {
    open_project()?.pull(opts.branch.as_deref(), &opts.remote)?;
    Ok(())
}

fn run_git_setup_remotes(opts: SetupRemotesOptions) -> Result<()> {
    let project = open_project()?;
    let options = SetupOptions {
        force: opts.force,
        fetch: opts.fetch,
    };
    let confirm = stdin()
        .is_terminal()
        .then_some(confirm_repoint as fn(&Remote, &str) -> bool);
    let report = project.setup_remotes(options, confirm)?;
    info!(
        "remotes added: {}, repointed: {}, unchanged: {}",
        report.added.len(),
        report.repointed.len(),
        report.unchanged.len()
    );

    Ok(())
}

fn confirm_repoint(remote: &Remote, current: &str) -> bool {
    let message = format!(
        "remote {} points to {current}, repoint it to {}?",
        remote.name, remote.url
    );

    Confirm::new(&message)
        .with_default(false)
        .prompt()
        .unwrap_or(false)
}

fn run_status() -> Result<()> {
    let status = open_project()?.status()?;
    info!("{}", status.message());
    if status == InstallStatus::NotInstalled {
        exit(1);
    }

    Ok(())
}

fn run_install(opts: LifecycleOptions) -> Result<()> {
    open_project()?.install(!opts.no_build)?;
    Ok(())
}

fn run_update(opts: LifecycleOptions) -> Result<()> {
    open_project()?.update(!opts.no_build)?;
    Ok(())
}

fn run_setup(opts: SetupOptionsArgs) -> Result<()> {
    open_project()?.setup(opts.environment.as_deref())?;
    Ok(())
}

fn run_init(opts: LifecycleOptions) -> Result<()> {
    open_project()?.init(!opts.no_build)?;
    Ok(())
}

fn run_clone(opts: CloneOptions) -> Result<()> {
    let config = GlobalConfig::load(find_global_config(env::current_dir()?).as_deref())?;
    let request = CloneRequest::resolve(&opts.name, opts.target, opts.repository, opts.branch, &config)?;
    request.clone_project()?;

    Ok(())
}
