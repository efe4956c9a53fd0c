//! Human-readable strings: progress bars, status lines, notification texts.

use crate::core::frontmatter::Frontmatter;
use crate::core::types::{CriteriaSummary, LoopStatus, Outcome, TaskStatus};

const BAR_WIDTH: usize = 10;

/// Ten-cell bar, e.g. `[███████░░░]`. Empty documents render as dashes.
pub fn progress_bar(summary: &CriteriaSummary) -> String {
    if summary.total == 0 {
        return format!("[{}]", "-".repeat(BAR_WIDTH));
    }
    let filled = ((summary.passing as f64 / summary.total as f64) * BAR_WIDTH as f64).round()
        as usize;
    let filled = filled.min(BAR_WIDTH);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}

pub fn status_icon(fm: &Frontmatter) -> char {
    match (fm.status, fm.loop_status) {
        (TaskStatus::Complete, _) => '✓',
        (TaskStatus::Blocked, _) => '⚠',
        (_, LoopStatus::Running) => '⟳',
        (_, LoopStatus::Paused) => '⏸',
        (_, LoopStatus::Failed) => '✗',
        _ => '○',
    }
}

/// Multi-line status block used by `taskloop status`.
pub fn status_block(path: &str, fm: &Frontmatter, summary: &CriteriaSummary) -> String {
    format!(
        "{icon} {id}\n  Status: {status} | Loop: {loop_status} | Iteration: {iter}/{max}\n  Criteria: {bar} {ratio}\n  Path: {path}\n",
        icon = status_icon(fm),
        id = fm.id,
        status = fm.status,
        loop_status = fm.loop_status,
        iter = fm.iteration,
        max = fm.max_iterations,
        bar = progress_bar(summary),
        ratio = summary.ratio(),
    )
}

pub fn start_message(title: &str, summary: &CriteriaSummary, workers: usize) -> String {
    let workers_note = if workers > 1 {
        format!(" Using {workers} parallel workers.")
    } else {
        String::new()
    };
    format!(
        "Starting loop on {title}. {} criteria, {} already passing.{workers_note}",
        summary.total, summary.passing
    )
}

pub fn round_message(iteration: u32, summary: &CriteriaSummary, gained: usize) -> String {
    if gained > 0 {
        format!(
            "Iteration {iteration} complete. {} of {} passing. Gained {gained}.",
            summary.passing, summary.total
        )
    } else {
        format!(
            "Iteration {iteration} complete. {} of {} passing. No new criteria passed.",
            summary.passing, summary.total
        )
    }
}

pub fn outcome_message(
    outcome: Outcome,
    summary: &CriteriaSummary,
    iteration: u32,
    max_iterations: u32,
) -> String {
    let (passing, total) = (summary.passing, summary.total);
    match outcome {
        Outcome::Completed => format!(
            "Loop complete! All {total} criteria passing after {iteration} iterations."
        ),
        Outcome::Blocked => format!(
            "Loop blocked. {passing} of {total} passing. Remaining criteria need human review."
        ),
        Outcome::Failed => format!(
            "Loop reached max iterations. {passing} of {total} passing after {max_iterations} iterations."
        ),
        Outcome::Paused => format!("Loop paused at {passing} of {total} criteria."),
        Outcome::Stopped => "Loop stopped.".to_string(),
    }
}

/// Display name for the session registry while a run is in progress.
pub fn session_name(title: &str, summary: &CriteriaSummary, iteration: u32, workers: usize) -> String {
    let suffix = if workers > 1 {
        format!(" ({workers} workers)")
    } else {
        String::new()
    };
    format!("Loop: {title} [{} iter {iteration}]{suffix}", summary.ratio())
}

pub fn final_session_name(title: &str, outcome: Outcome) -> String {
    format!("Loop: {title} [{}]", outcome.label())
}
