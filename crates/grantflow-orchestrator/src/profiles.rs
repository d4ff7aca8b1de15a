use crate::types::AgentRole;
use std::collections::BTreeSet;

/// Default capability list advertised by each role.
///
/// Capabilities are descriptive only; the worker router decides what a
/// `(role, task type)` pair actually does.
pub fn default_capabilities(role: AgentRole) -> BTreeSet<String> {
    let names: &[&str] = match role {
        AgentRole::Analyzer => &[
            "eligibility_check",
            "extract_requirements",
            "score_fit",
            "budget_analysis",
        ],
        AgentRole::Writer => &["draft_section", "rewrite", "summarize"],
        AgentRole::Reviewer => &["review_draft", "compliance_check", "score_rubric"],
        AgentRole::Researcher => &["program_search", "company_profile", "deadline_lookup"],
        AgentRole::Strategist => &["select_programs", "positioning", "timeline_plan"],
        AgentRole::Optimizer => &["tighten", "keyword_alignment", "length_fit"],
    };
    names.iter().map(|s| (*s).to_string()).collect()
}
