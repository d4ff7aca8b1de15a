//! Workflow catalog.
//!
//! Built-in grant-consulting templates plus loading of custom templates from
//! a directory of TOML files.

use crate::types::AgentRole;
use crate::workflow::{StageTemplate, TaskTemplate, WorkflowTemplate};
use grantflow_core::{GrantflowError, GrantflowResult};
use std::collections::BTreeMap;
use std::path::Path;

/// All built-in workflows, keyed by id.
///
/// - `grant-discovery`: find programs, score fit, pick targets
/// - `application-drafting`: outline, draft, review, polish
/// - `compliance-review`: parallel eligibility and budget checks, then a
///   remediation memo
pub fn builtin_workflows() -> BTreeMap<String, WorkflowTemplate> {
    [grant_discovery(), application_drafting(), compliance_review()]
        .into_iter()
        .map(|w| (w.id.clone(), w))
        .collect()
}

fn grant_discovery() -> WorkflowTemplate {
    WorkflowTemplate::new("grant-discovery", "Grant discovery")
        .with_description("Find matching funding programs and rank them")
        .with_stage(
            StageTemplate::new("research", "Program research").with_task(
                TaskTemplate::new(AgentRole::Researcher, "program_search")
                    .with_key("programs")
                    .with_description("Search open calls matching the applicant profile"),
            ),
        )
        .with_stage(
            StageTemplate::new("analysis", "Fit analysis").with_task(
                TaskTemplate::new(AgentRole::Analyzer, "eligibility_check")
                    .with_key("fit")
                    .depends_on(["programs"])
                    .with_description("Score eligibility and fit for each program"),
            ),
        )
        .with_stage(
            StageTemplate::new("strategy", "Target selection").with_task(
                TaskTemplate::new(AgentRole::Strategist, "select_programs")
                    .depends_on(["fit"])
                    .with_description("Choose target programs and a submission calendar"),
            ),
        )
}

fn application_drafting() -> WorkflowTemplate {
    WorkflowTemplate::new("application-drafting", "Application drafting")
        .with_description("Produce a reviewed, polished application draft")
        .with_stage(
            StageTemplate::new("outline", "Outline").with_task(
                TaskTemplate::new(AgentRole::Strategist, "positioning")
                    .with_key("outline")
                    .with_description("Define positioning and section outline"),
            ),
        )
        .with_stage(
            StageTemplate::new("draft", "Draft").with_task(
                TaskTemplate::new(AgentRole::Writer, "draft_section")
                    .with_key("draft")
                    .depends_on(["outline"])
                    .with_description("Write the application sections"),
            ),
        )
        .with_stage(
            StageTemplate::new("review", "Review").with_task(
                TaskTemplate::new(AgentRole::Reviewer, "review_draft")
                    .with_key("review")
                    .depends_on(["draft"])
                    .with_description("Check the draft against evaluation criteria"),
            ),
        )
        .with_stage(
            StageTemplate::new("polish", "Polish").with_task(
                TaskTemplate::new(AgentRole::Optimizer, "tighten")
                    .depends_on(["review"])
                    .with_description("Apply review findings and tighten the text"),
            ),
        )
}

fn compliance_review() -> WorkflowTemplate {
    WorkflowTemplate::new("compliance-review", "Compliance review")
        .with_description("Check eligibility and budget rules before submission")
        .with_stage(
            StageTemplate::new("checks", "Checks")
                .with_task(
                    TaskTemplate::new(AgentRole::Analyzer, "budget_analysis")
                        .with_key("budget")
                        .with_description("Verify budget ceilings and cost categories"),
                )
                .with_task(
                    TaskTemplate::new(AgentRole::Reviewer, "compliance_check")
                        .with_key("rules")
                        .with_description("Verify formal requirements of the call"),
                ),
        )
        .with_stage(
            StageTemplate::new("remediation", "Remediation").with_task(
                TaskTemplate::new(AgentRole::Writer, "rewrite")
                    .depends_on(["budget", "rules"])
                    .with_description("Write a remediation memo for every finding"),
            ),
        )
}

/// Parse and validate one TOML workflow document.
pub fn parse_workflow(source: &str) -> GrantflowResult<WorkflowTemplate> {
    let template: WorkflowTemplate = toml::from_str(source)
        .map_err(|e| GrantflowError::Config(format!("Invalid workflow template: {e}")))?;
    template.validate()?;
    Ok(template)
}

/// Load custom workflows from a directory.
///
/// Every `*.toml` file is parsed as a [`WorkflowTemplate`]. Files that fail
/// to parse or validate are logged and skipped. A missing directory yields
/// an empty map.
pub fn load_workflows(dir: &Path) -> GrantflowResult<BTreeMap<String, WorkflowTemplate>> {
    let mut workflows = BTreeMap::new();
    if !dir.exists() {
        return Ok(workflows);
    }

    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if !path.extension().is_some_and(|ext| ext == "toml") {
            continue;
        }
        let loaded = std::fs::read_to_string(&path)
            .map_err(GrantflowError::from)
            .and_then(|source| parse_workflow(&source));
        match loaded {
            Ok(template) => {
                tracing::debug!(workflow = %template.id, path = %path.display(), "Loaded workflow");
                workflows.insert(template.id.clone(), template);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping invalid workflow file");
            }
        }
    }
    Ok(workflows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_workflows() {
        let workflows = builtin_workflows();
        assert_eq!(
            workflows.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["application-drafting", "compliance-review", "grant-discovery"]
        );
        for template in workflows.values() {
            assert!(template.validate().is_ok(), "{} is invalid", template.id);
        }

        let drafting = &workflows["application-drafting"];
        let roles: Vec<AgentRole> = drafting
            .stages
            .iter()
            .map(|s| s.tasks[0].assigned_to)
            .collect();
        assert_eq!(
            roles,
            vec![
                AgentRole::Strategist,
                AgentRole::Writer,
                AgentRole::Reviewer,
                AgentRole::Optimizer
            ]
        );

        let compliance = &workflows["compliance-review"];
        assert_eq!(compliance.stages[0].tasks.len(), 2);
        assert_eq!(compliance.stages[1].tasks[0].depends_on, vec!["budget", "rules"]);
    }

    #[test]
    fn test_load_workflows_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pitch.toml"),
            r#"
            id = "pitch-deck"
            name = "Pitch deck"

            [[stages]]
            id = "write"
            name = "Write"

            [[stages.tasks]]
            assigned_to = "writer"
            type = "summarize"
            "#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "id = ").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a workflow").unwrap();

        let workflows = load_workflows(dir.path()).unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows["pitch-deck"].stages[0].tasks[0].assigned_to, AgentRole::Writer);
    }

    #[test]
    fn test_load_workflows_missing_dir() {
        let workflows = load_workflows(Path::new("/nonexistent/grantflow/workflows")).unwrap();
        assert!(workflows.is_empty());
    }

    #[test]
    fn test_parse_workflow_rejects_undeclared_keys() {
        let err = parse_workflow(
            r#"
            id = "bad"
            name = "Bad"

            [[stages]]
            id = "s"
            name = "S"

            [[stages.tasks]]
            assigned_to = "writer"
            type = "draft_section"
            depends_on = ["ghost"]
            "#,
        )
        .unwrap_err();
        assert!(err.is_dependency_unresolved());
    }
}
