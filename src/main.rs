mod cli;
mod commands;
mod config;
mod engine;
mod paths;
mod progress;
mod provider;
mod schema;
mod signal;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use config::Config;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Declaration file
    pub file: PathBuf,
    /// Explicit state file, if given
    pub state: Option<PathBuf>,
    pub config: Config,
    /// `--var name=value` overrides
    pub vars: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "tierform", &mut io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => paths::config_file()?,
    };
    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        file: cli.file,
        state: cli.state,
        config: Config::load(&config_path)?,
        vars: cli.vars,
    };

    let ok = |result: Result<()>| result.map(|()| ExitCode::SUCCESS);
    match cli.command {
        Commands::Plan(args) => ok(commands::declarative::plan(&ctx, args)),
        Commands::Apply(args) => commands::declarative::apply(&ctx, args),
        Commands::Destroy(args) => commands::declarative::destroy(&ctx, args),
        Commands::Validate => ok(commands::inspect::validate(&ctx)),
        Commands::Graph(args) => ok(commands::inspect::graph(&ctx, args)),
        Commands::Output(args) => ok(commands::inspect::output(&ctx, args)),
        Commands::State(cmd) => ok(commands::state::run(&ctx, cmd)),
        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}
