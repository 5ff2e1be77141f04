//! Declarative commands:
//! - `plan` - Show what apply would change
//! - `apply` - Make recorded infrastructure match the declarations
//! - `destroy` - Remove everything recorded in state

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use declarative::{Plan, StateStore};
use std::io::IsTerminal;
use std::process::ExitCode;

use crate::Context;
use crate::cli::{ApplyArgs, DestroyArgs, PlanArgs};
use crate::engine::{self, SavedPlan, Workspace, parse_targets};
use crate::state::FileStateStore;
use crate::ui;

// ============================================================================
// Plan Command
// ============================================================================

pub fn plan(ctx: &Context, args: PlanArgs) -> Result<()> {
    let targets = parse_targets(&args.targets)?;
    let workspace = Workspace::load(ctx)?;

    if !ctx.quiet {
        ui::header("Plan");
        ui::kv("Declarations", &ctx.file.display().to_string());
        ui::kv("State", &workspace.store.path().display().to_string());
    }

    let plan = workspace.plan(args.destroy, &targets)?;
    engine::display_plan(&plan);

    if let Some(out) = args.out {
        let saved = SavedPlan::new(plan, workspace.store.path().to_path_buf());
        saved.save(&out)?;
        println!();
        ui::success(&format!(
            "Plan saved to {}. Apply it with: tierform apply --plan {}",
            out.display(),
            out.display()
        ));
    }
    Ok(())
}

// ============================================================================
// Apply Command
// ============================================================================

pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<ExitCode> {
    let jobs = args.jobs.map_or(ctx.config.apply.jobs, usize::from);

    let (plan, mut store) = match &args.plan {
        Some(path) => {
            let saved = SavedPlan::load(path)?;
            let state_path = engine::planner::state_path(ctx)?;
            let store = FileStateStore::open(&state_path)
                .with_context(|| format!("Could not open state {}", state_path.display()))?;
            saved.verify(&state_path, &store)?;
            log::info!("Applying saved plan from {}", path.display());
            (saved.plan, store)
        }
        None => {
            let targets = parse_targets(&args.targets)?;
            let workspace = Workspace::load(ctx)?;
            let plan = workspace.plan(false, &targets)?;
            (plan, workspace.store)
        }
    };

    if !ctx.quiet {
        ui::header("Apply");
    }
    engine::display_plan(&plan);
    if plan.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    // A saved plan was already reviewed
    if !args.yes && args.plan.is_none() && !confirm("Apply these changes?")? {
        println!();
        println!("  {} Aborted, nothing was changed", "✗".red());
        return Ok(ExitCode::SUCCESS);
    }

    run(ctx, &plan, &mut store, jobs)
}

// ============================================================================
// Destroy Command
// ============================================================================

pub fn destroy(ctx: &Context, args: DestroyArgs) -> Result<ExitCode> {
    let jobs = args.jobs.map_or(ctx.config.apply.jobs, usize::from);
    let targets = parse_targets(&args.targets)?;
    let mut workspace = Workspace::load(ctx)?;

    if !ctx.quiet {
        ui::header("Destroy");
    }

    let plan = workspace.plan(true, &targets)?;
    engine::display_plan(&plan);
    if plan.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    let prompt = format!(
        "Destroy {}? This cannot be undone",
        ui::plural(plan.len(), "resource")
    );
    if !args.yes && !confirm(&prompt)? {
        println!();
        println!("  {} Aborted, nothing was destroyed", "✗".red());
        return Ok(ExitCode::SUCCESS);
    }

    run(ctx, &plan, &mut workspace.store, jobs)
}

// ============================================================================
// Helpers
// ============================================================================

fn confirm(prompt: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!("Refusing to continue without confirmation; pass --yes to run non-interactively");
    }
    println!();
    engine::confirm_proceed(prompt)
}

fn run(ctx: &Context, plan: &Plan, store: &mut FileStateStore, jobs: usize) -> Result<ExitCode> {
    let report = engine::execute(ctx, plan, store, jobs)?;
    if !ctx.quiet {
        let remaining = store.snapshot()?.len();
        ui::dim(&format!(
            "State: {} ({} recorded)",
            store.path().display(),
            ui::plural(remaining, "instance")
        ));
    }
    Ok(engine::exit_code(report.outcome))
}
