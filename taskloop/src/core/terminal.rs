//! Terminal condition evaluation, checked at the top of every cycle.

use crate::core::frontmatter::Frontmatter;
use crate::core::types::{LoopStatus, Outcome, TaskStatus};

/// The outcome the loop must finalize with, or `None` to run another round.
///
/// Checked in fixed priority: authored status first, then the iteration
/// budget, then externally requested pause/stop.
pub fn evaluate(fm: &Frontmatter) -> Option<Outcome> {
    if fm.status == TaskStatus::Complete {
        return Some(Outcome::Completed);
    }
    if fm.status == TaskStatus::Blocked {
        return Some(Outcome::Blocked);
    }
    if fm.iteration >= fm.max_iterations {
        return Some(Outcome::Failed);
    }
    match fm.loop_status {
        LoopStatus::Paused => Some(Outcome::Paused),
        LoopStatus::Stopped => Some(Outcome::Stopped),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fm(status: TaskStatus, loop_status: LoopStatus, iteration: u32, max: u32) -> Frontmatter {
        Frontmatter {
            id: "PRD-1".to_string(),
            status,
            loop_status,
            iteration,
            max_iterations: max,
            effort_level: "Standard".to_string(),
            last_phase: None,
            failing_criteria: Vec::new(),
            verification_summary: "0/0".to_string(),
        }
    }

    #[test]
    fn complete_wins_over_exhausted_budget() {
        let state = fm(TaskStatus::Complete, LoopStatus::Running, 10, 10);
        assert_eq!(evaluate(&state), Some(Outcome::Completed));
    }

    #[test]
    fn blocked_finalizes_while_running() {
        let state = fm(TaskStatus::Blocked, LoopStatus::Running, 2, 10);
        assert_eq!(evaluate(&state), Some(Outcome::Blocked));
    }

    #[test]
    fn budget_beats_pause() {
        let state = fm(TaskStatus::Draft, LoopStatus::Paused, 5, 5);
        assert_eq!(evaluate(&state), Some(Outcome::Failed));
    }

    #[test]
    fn pause_and_stop_are_honored() {
        let paused = fm(TaskStatus::Draft, LoopStatus::Paused, 1, 5);
        assert_eq!(evaluate(&paused), Some(Outcome::Paused));
        let stopped = fm(TaskStatus::Draft, LoopStatus::Stopped, 1, 5);
        assert_eq!(evaluate(&stopped), Some(Outcome::Stopped));
    }

    #[test]
    fn running_draft_continues() {
        let state = fm(TaskStatus::Draft, LoopStatus::Running, 4, 5);
        assert_eq!(evaluate(&state), None);
    }
}
