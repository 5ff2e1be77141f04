//! Apply progress bar

use colored::Colorize;
use declarative::{ActionKind, ActionStatus, PlannedAction, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

/// indicatif bar fed by the executor's progress callbacks
pub struct ApplyProgress {
    bar: ProgressBar,
    in_flight: usize,
}

impl ApplyProgress {
    /// Bar over `total` actions; hidden when `quiet`
    pub fn new(total: usize, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━━─"),
        );
        Self { bar, in_flight: 0 }
    }

    /// Clear the bar once apply returns
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_action_start(&mut self, action: &PlannedAction) {
        self.in_flight += 1;
        self.bar.set_message(format!("{} {}", verb(action.kind), action.address));
    }

    fn on_action_complete(&mut self, action: &PlannedAction, status: &ActionStatus) {
        // Skipped and not-started actions were never started
        if matches!(
            status,
            ActionStatus::Applied | ActionStatus::Failed { .. } | ActionStatus::InFlightAtCancel { .. }
        ) {
            self.in_flight = self.in_flight.saturating_sub(1);
        }

        let line = match status {
            ActionStatus::Applied => format!(
                "{} {} {}",
                "✓".green(),
                action.address,
                format!("({})", past(action.kind)).dimmed()
            ),
            ActionStatus::Failed { error } => {
                format!("{} {} {}", "✗".red(), action.address, error.red())
            }
            ActionStatus::Skipped { blocked_by } => format!(
                "{} {} {}",
                "○".yellow(),
                action.address,
                format!("(skipped, blocked by {blocked_by})").dimmed()
            ),
            ActionStatus::InFlightAtCancel { error: None } => format!(
                "{} {} {}",
                "✓".green(),
                action.address,
                "(finished after interrupt)".dimmed()
            ),
            ActionStatus::InFlightAtCancel { error: Some(error) } => {
                format!("{} {} {}", "✗".red(), action.address, error.red())
            }
            ActionStatus::NotStarted => return self.bar.inc(1),
        };
        self.bar.println(line);
        self.bar.inc(1);
        if self.in_flight == 0 {
            self.bar.set_message("");
        }
    }
}

fn verb(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Create => "creating",
        ActionKind::Update => "updating",
        ActionKind::Destroy => "destroying",
    }
}

fn past(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Create => "created",
        ActionKind::Update => "updated",
        ActionKind::Destroy => "destroyed",
    }
}
