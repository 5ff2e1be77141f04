//! `state` subcommands

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use declarative::{Address, StateStore};

use crate::Context;
use crate::cli::StateCommand;
use crate::engine::planner::open_state;
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    match cmd {
        StateCommand::List => list(ctx),
        StateCommand::Show { address } => show(ctx, &address),
        StateCommand::Rm { addresses } => rm(ctx, &addresses),
    }
}

fn list(ctx: &Context) -> Result<()> {
    let store = open_state(ctx)?;
    let snapshot = store.snapshot()?;

    if snapshot.is_empty() {
        if !ctx.quiet {
            ui::info(&format!("No instances recorded in {}", store.path().display()));
        }
        return Ok(());
    }

    let width = snapshot
        .records
        .keys()
        .map(|a| a.to_string().len())
        .max()
        .unwrap_or(0);
    for (address, record) in &snapshot.records {
        if ctx.verbose > 0 {
            println!(
                "{:<width$}  {}  {}",
                address.to_string(),
                record.provider_id.dimmed(),
                record.updated_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            );
        } else {
            println!("{:<width$}  {}", address.to_string(), record.provider_id.dimmed());
        }
    }
    if !ctx.quiet {
        ui::dim(&format!(
            "{} (serial {}, last updated {})",
            ui::plural(snapshot.len(), "instance"),
            store.serial(),
            store.last_updated().format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    Ok(())
}

fn show(ctx: &Context, address: &str) -> Result<()> {
    let address: Address = address
        .parse()
        .with_context(|| format!("Invalid address '{address}'"))?;
    let store = open_state(ctx)?;
    let Some(record) = store.get(&address)? else {
        bail!("{address} is not recorded in {}", store.path().display());
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn rm(ctx: &Context, addresses: &[String]) -> Result<()> {
    let patterns = addresses
        .iter()
        .map(|a| {
            a.parse::<Address>()
                .with_context(|| format!("Invalid address '{a}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut store = open_state(ctx)?;
    let matched: Vec<Address> = store
        .snapshot()?
        .records
        .into_keys()
        .filter(|a| patterns.iter().any(|p| p.covers(a)))
        .collect();

    if matched.is_empty() {
        bail!("No recorded instance matches {}", addresses.join(", "));
    }

    for address in &matched {
        store
            .delete(address)
            .with_context(|| format!("Failed to remove {address} from state"))?;
        ui::success(&format!("Removed {address}"));
    }
    if !ctx.quiet {
        ui::warn("The real resources still exist; they are no longer managed by tierform");
    }
    Ok(())
}
