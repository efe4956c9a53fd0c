//! Prompt rendering for sequential rounds and parallel workers.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::Criterion;

const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");
const WORKER_TEMPLATE: &str = include_str!("prompts/worker.md");
const INTERACTIVE_TEMPLATE: &str = include_str!("prompts/interactive.md");

#[derive(Debug, Clone, Serialize)]
struct CriterionContext<'a> {
    id: &'a str,
    description: &'a str,
    verify: Option<&'a str>,
    /// Checklist form without the checkbox.
    line: String,
}

impl<'a> From<&'a Criterion> for CriterionContext<'a> {
    fn from(c: &'a Criterion) -> Self {
        let line = match &c.verify {
            Some(verify) => format!("{}: {} | Verify: {verify}", c.id, c.description),
            None => format!("{}: {}", c.id, c.description),
        };
        Self {
            id: &c.id,
            description: &c.description,
            verify: c.verify.as_deref(),
            line,
        }
    }
}

/// Inputs for a full-access sequential round.
#[derive(Debug, Clone)]
pub struct IterationPrompt<'a> {
    pub document_path: &'a Path,
    pub iteration: u32,
    pub max_iterations: u32,
    pub effort_level: &'a str,
    pub last_phase: Option<&'a str>,
    /// `passing/total`.
    pub progress: &'a str,
    pub failing: &'a [Criterion],
}

/// Inputs for one parallel worker.
#[derive(Debug, Clone)]
pub struct WorkerPrompt<'a> {
    pub worker_id: usize,
    pub iteration: u32,
    /// The worker's read-only document copy.
    pub document_path: &'a Path,
    pub criterion: &'a Criterion,
    /// Body of the document's `## CONTEXT` section.
    pub context: Option<&'a str>,
}

/// Opening prompt for an attached session.
#[derive(Debug, Clone)]
pub struct InteractivePrompt<'a> {
    pub document_path: &'a Path,
    pub title: &'a str,
    /// The document's `verification_summary`.
    pub progress: &'a str,
    pub failing_ids: &'a [String],
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template("iteration", ITERATION_TEMPLATE)
            .context("load iteration template")?;
        env.add_template("worker", WORKER_TEMPLATE)
            .context("load worker template")?;
        env.add_template("interactive", INTERACTIVE_TEMPLATE)
            .context("load interactive template")?;
        Ok(Self { env })
    }

    pub fn render_iteration(&self, input: &IterationPrompt<'_>) -> Result<String> {
        let failing: Vec<CriterionContext<'_>> = input.failing.iter().map(Into::into).collect();
        let template = self.env.get_template("iteration")?;
        let rendered = template
            .render(context! {
                document_path => input.document_path.display().to_string(),
                iteration => input.iteration,
                max_iterations => input.max_iterations,
                effort_level => input.effort_level,
                last_phase => input.last_phase.unwrap_or("none"),
                progress => input.progress,
                failing => failing,
            })
            .context("render iteration prompt")?;
        debug!(bytes = rendered.len(), "rendered iteration prompt");
        Ok(rendered)
    }

    pub fn render_worker(&self, input: &WorkerPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("worker")?;
        let rendered = template
            .render(context! {
                worker_id => input.worker_id,
                iteration => input.iteration,
                document_path => input.document_path.display().to_string(),
                criterion => CriterionContext::from(input.criterion),
                context => input.context.map(str::trim).filter(|s| !s.is_empty()),
            })
            .context("render worker prompt")?;
        debug!(worker_id = input.worker_id, bytes = rendered.len(), "rendered worker prompt");
        Ok(rendered)
    }

    pub fn render_interactive(&self, input: &InteractivePrompt<'_>) -> Result<String> {
        let template = self.env.get_template("interactive")?;
        template
            .render(context! {
                document_path => input.document_path.display().to_string(),
                title => input.title,
                progress => input.progress,
                failing => input.failing_ids,
            })
            .context("render interactive prompt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CriterionKind, CriterionStatus};

    fn criterion(id: &str, verify: Option<&str>) -> Criterion {
        Criterion {
            id: id.to_string(),
            description: format!("{id} holds"),
            verify: verify.map(str::to_string),
            kind: CriterionKind::Criterion,
            status: CriterionStatus::Failing,
        }
    }

    #[test]
    fn iteration_prompt_lists_failing_criteria() {
        let engine = PromptEngine::new().expect("engine");
        let failing = vec![
            criterion("ISC-AUTH-1", Some("curl /login")),
            criterion("ISC-DB-1", None),
        ];
        let prompt = engine
            .render_iteration(&IterationPrompt {
                document_path: Path::new("/work/PRD-1.md"),
                iteration: 3,
                max_iterations: 10,
                effort_level: "Standard",
                last_phase: None,
                progress: "1/3",
                failing: &failing,
            })
            .expect("render");
        assert!(prompt.contains("Task document: /work/PRD-1.md"));
        assert!(prompt.contains("Iteration: 3 of 10"));
        assert!(prompt.contains("Last phase reached: none"));
        assert!(prompt.contains("- ISC-AUTH-1: ISC-AUTH-1 holds | Verify: curl /login"));
        assert!(prompt.contains("- ISC-DB-1: ISC-DB-1 holds\n"));
    }

    #[test]
    fn worker_prompt_names_one_criterion_and_sentinel() {
        let engine = PromptEngine::new().expect("engine");
        let lead = criterion("ISC-UI-2", Some("npm test"));
        let prompt = engine
            .render_worker(&WorkerPrompt {
                worker_id: 2,
                iteration: 4,
                document_path: Path::new("/logs/run/4/worker-2/TASK.md"),
                criterion: &lead,
                context: Some("\nUse the staging API.\n"),
            })
            .expect("render");
        assert!(prompt.contains("worker 2"));
        assert!(prompt.contains("ISC-UI-2: ISC-UI-2 holds"));
        assert!(prompt.contains("Verify with: npm test"));
        assert!(prompt.contains("Use the staging API."));
        assert!(prompt.contains("/logs/run/4/worker-2/TASK.md"));
        assert!(prompt.contains("RESULT: ISC-UI-2 PASS\n"));
        assert!(prompt.contains("RESULT: ISC-UI-2 FAIL: <reason>"));
    }

    #[test]
    fn interactive_prompt_lists_failing_ids() {
        let engine = PromptEngine::new().expect("engine");
        let failing = vec!["ISC-AUTH-1".to_string(), "ISC-DB-2".to_string()];
        let prompt = engine
            .render_interactive(&InteractivePrompt {
                document_path: Path::new("/work/PRD-1.md"),
                title: "Ship auth",
                progress: "1/3",
                failing_ids: &failing,
            })
            .expect("render");
        assert!(prompt.starts_with("Work on this task document: /work/PRD-1.md\n"));
        assert!(prompt.contains("Title: Ship auth\nProgress: 1/3\nFailing: ISC-AUTH-1, ISC-DB-2\n"));

        let done = engine
            .render_interactive(&InteractivePrompt {
                document_path: Path::new("/work/PRD-1.md"),
                title: "Ship auth",
                progress: "3/3",
                failing_ids: &[],
            })
            .expect("render");
        assert!(done.contains("Failing: none, all passing\n"));
    }

    #[test]
    fn worker_prompt_without_context_points_at_document() {
        let engine = PromptEngine::new().expect("engine");
        let lead = criterion("ISC-UI-2", None);
        let prompt = engine
            .render_worker(&WorkerPrompt {
                worker_id: 1,
                iteration: 1,
                document_path: Path::new("TASK.md"),
                criterion: &lead,
                context: None,
            })
            .expect("render");
        assert!(prompt.contains("Read the CONTEXT section"));
        assert!(!prompt.contains("Verify with"));
    }
}
