use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tierform")]
#[command(author = "tierform contributors")]
#[command(version)]
#[command(about = "Plan and apply declarative resource graphs", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Declaration file
    #[arg(
        short,
        long,
        global = true,
        env = "TIERFORM_FILE",
        default_value = "tierform.toml"
    )]
    pub file: PathBuf,

    /// State file (default: <state dir>/<declaration stem>.state.json)
    #[arg(long, global = true, env = "TIERFORM_STATE")]
    pub state: Option<PathBuf>,

    /// Config file (default: <config dir>/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override a declared variable (name=value, repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", global = true)]
    pub vars: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the actions needed to reach the declared state
    Plan(PlanArgs),

    /// Plan (or load a saved plan) and apply it
    Apply(ApplyArgs),

    /// Destroy everything recorded in state
    Destroy(DestroyArgs),

    /// Check declarations: expansion, references and cycles
    Validate,

    /// Print the dependency graph
    Graph(GraphArgs),

    /// Inspect and edit recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Print declared outputs, resolved from state
    Output(OutputArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply / Destroy
// ============================================================================

#[derive(Args)]
pub struct PlanArgs {
    /// Write the plan to a file for a later `apply --plan`
    #[arg(short, long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Plan the destruction of everything in state
    #[arg(long)]
    pub destroy: bool,

    /// Limit planning to these addresses (repeatable)
    #[arg(short, long = "target", value_name = "ADDRESS")]
    pub targets: Vec<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Apply a plan saved with `plan -o`
    #[arg(long, value_name = "FILE", conflicts_with = "targets")]
    pub plan: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel provider calls (default: [apply] jobs)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,

    /// Limit applying to these addresses (repeatable)
    #[arg(short, long = "target", value_name = "ADDRESS")]
    pub targets: Vec<String>,
}

#[derive(Args)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of parallel provider calls (default: [apply] jobs)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,

    /// Only destroy these addresses and what depends on them (repeatable)
    #[arg(short, long = "target", value_name = "ADDRESS")]
    pub targets: Vec<String>,
}

// ============================================================================
// Inspection
// ============================================================================

#[derive(Args)]
pub struct GraphArgs {
    /// Print the resolved order instead of Graphviz DOT
    #[arg(long)]
    pub order: bool,
}

#[derive(Args)]
pub struct OutputArgs {
    /// Print a single output (strings unquoted)
    pub name: Option<String>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded instances
    List,

    /// Show one recorded instance as JSON
    Show {
        /// Instance address, e.g. aws_subnet.public[0]
        address: String,
    },

    /// Forget instances without destroying them
    Rm {
        /// Addresses; an address without an index removes every instance
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tierform",
            "apply",
            "-f",
            "infra.toml",
            "--var",
            "az_count=3",
            "-t",
            "aws_vpc.main",
            "-j",
            "8",
            "--yes",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.file, PathBuf::from("infra.toml"));
        assert_eq!(cli.vars, vec!["az_count=3"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Apply(args) => {
                assert!(args.yes);
                assert_eq!(args.jobs, Some(8));
                assert_eq!(args.targets, vec!["aws_vpc.main"]);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_apply_plan_conflicts_with_target() {
        let result = Cli::try_parse_from([
            "tierform", "apply", "--plan", "p.json", "-t", "aws_vpc.main",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_jobs_rejected() {
        assert!(Cli::try_parse_from(["tierform", "apply", "-j", "0"]).is_err());
    }

    #[test]
    fn test_state_rm_requires_address() {
        assert!(Cli::try_parse_from(["tierform", "state", "rm"]).is_err());
        let cli = Cli::try_parse_from(["tierform", "state", "rm", "aws_vpc.main"]).unwrap();
        assert!(matches!(cli.command, Commands::State(StateCommand::Rm { .. })));
    }
}
