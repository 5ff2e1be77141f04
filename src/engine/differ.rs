//! Plan display

use colored::{ColoredString, Colorize};
use declarative::{ActionKind, ActionReason, AttributeChange, Plan, PlannedAction, group_by_type};
use std::collections::BTreeSet;

use crate::ui;

const VALUE_WIDTH: usize = 60;

/// Display a plan grouped by resource type
pub fn display_plan(plan: &Plan) {
    if plan.is_empty() {
        println!();
        println!(
            "  {} No changes. Infrastructure matches the declarations ({} unchanged).",
            "✓".green(),
            plan.unchanged.len()
        );
        return;
    }

    // Replacements are shown once, on their Create half
    let replaced: BTreeSet<_> = plan
        .actions
        .iter()
        .filter(|a| a.is_replacement() && a.kind == ActionKind::Create)
        .map(|a| &a.address)
        .collect();

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    );
    println!("│");

    for (resource_type, actions) in group_by_type(&plan.actions) {
        println!("│ {}", resource_type.bold());
        for action in actions {
            if action.kind == ActionKind::Destroy && replaced.contains(&action.address) {
                continue;
            }
            display_action(action, replaced.contains(&action.address));
        }
        println!("│");
    }

    let summary = plan.summary();
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Plan: {} to add, {} to change, {} to destroy, {} to replace",
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red(),
        summary.replacements.to_string().magenta()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

fn display_action(action: &PlannedAction, replacement: bool) {
    let (symbol, note) = if replacement {
        ("-/+".magenta(), "(replace)".to_string())
    } else {
        match action.kind {
            ActionKind::Create => ("+".green(), String::new()),
            ActionKind::Update => ("~".yellow(), String::new()),
            ActionKind::Destroy => ("-".red(), format!("({})", reason_note(action.reason))),
        }
    };

    println!("│   {} {:<36} {}", symbol, action.address.to_string(), note.dimmed());

    if action.kind == ActionKind::Destroy {
        return;
    }
    let width = action
        .changes
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(0);
    for change in &action.changes {
        println!("│       {}", change_line(action.kind, change, width));
    }
}

fn reason_note(reason: ActionReason) -> &'static str {
    match reason {
        ActionReason::Orphaned => "no longer declared",
        ActionReason::DestroyRequested => "destroy requested",
        ActionReason::Replacement => "replaced",
        ActionReason::New | ActionReason::Changed => "destroy",
    }
}

fn change_line(kind: ActionKind, change: &AttributeChange, width: usize) -> String {
    let after = render_after(change);
    let mut line = if kind == ActionKind::Create && change.before.is_none() {
        format!("{:<width$} = {}", change.name, after)
    } else {
        let before = change
            .before
            .as_ref()
            .map_or_else(|| "(none)".dimmed(), |b| ui::truncate(&b.to_string(), VALUE_WIDTH).normal());
        format!("{:<width$}: {} → {}", change.name, before, after)
    };
    if change.forces_replacement {
        line.push_str(&format!("  {}", "# forces replacement".magenta()));
    }
    line
}

fn render_after(change: &AttributeChange) -> ColoredString {
    if change.known_after_apply {
        return "(known after apply)".cyan();
    }
    match &change.after {
        Some(after) => ui::truncate(&after.to_string(), VALUE_WIDTH).normal(),
        None => "(removed)".red(),
    }
}
