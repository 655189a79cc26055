//! Prompt builders for feature runs
//!
//! Two invocations exist per feature: an optional planning pass that only
//! reads the code, and the implementation pass. Both identify the feature
//! by id in a header so transcripts stay greppable.

use foreman_core::{Feature, Workspace};
use regex::Regex;
use std::sync::OnceLock;

/// Tools the planning pass may use; it must not modify the workspace
pub const PLANNING_TOOLS: &[&str] = &["Read", "Glob", "Grep"];

const SUMMARY_INSTRUCTIONS: &str = "\
## WHEN YOU ARE DONE

Finish your final message with a short summary of what changed, wrapped in
<summary></summary> tags. Mention the files you touched and anything left
for a reviewer.
";

fn push_feature_section(prompt: &mut String, feature: &Feature) {
    prompt.push_str(&format!("## FEATURE {}\n\n", feature.id));
    if let Some(title) = feature.title.as_deref().filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!("**Title:** {}\n\n", title));
    }
    if !feature.category.is_empty() {
        prompt.push_str(&format!("**Category:** {}\n\n", feature.category));
    }
    prompt.push_str(&feature.description);
    prompt.push_str("\n\n");
}

fn push_workspace_section(prompt: &mut String, workspace: &Workspace) {
    prompt.push_str("## WORKSPACE\n\n");
    prompt.push_str(&format!(
        "You are working in `{}` on branch `{}`.\n",
        workspace.branch_path.display(),
        workspace.branch_name
    ));
    if !workspace.is_primary {
        prompt.push_str("This is a dedicated git worktree; keep all changes inside it.\n");
    }
    prompt.push('\n');
}

/// Prompt for the planning pass
pub fn build_plan_prompt(feature: &Feature, workspace: &Workspace) -> String {
    let mut prompt = String::new();

    prompt.push_str("# FOREMAN PLANNING\n\n");
    push_feature_section(&mut prompt, feature);
    push_workspace_section(&mut prompt, workspace);

    if let Some(previous) = feature.plan_spec.as_ref() {
        if let Some(content) = previous.content.as_deref().filter(|c| !c.trim().is_empty()) {
            prompt.push_str(&format!(
                "## PREVIOUS PLAN (version {})\n\nRevise it rather than starting over:\n\n",
                previous.version
            ));
            prompt.push_str(content);
            prompt.push_str("\n\n");
        }
    }

    prompt.push_str("## OBJECTIVE\n\n");
    prompt.push_str(
        "Do not modify any files. Read the code you need, then reply with an \
         implementation plan in markdown: the files to change, the approach for \
         each, and how the result will be tested.\n",
    );
    prompt
}

/// Prompt for the implementation pass
///
/// `completed_dependencies` are quoted with their summaries so the agent can
/// build on them.
pub fn build_implementation_prompt(
    feature: &Feature,
    workspace: &Workspace,
    completed_dependencies: &[&Feature],
) -> String {
    let mut prompt = String::new();

    prompt.push_str("# FOREMAN FEATURE\n\n");
    push_feature_section(&mut prompt, feature);
    push_workspace_section(&mut prompt, workspace);

    let approved = feature.plan_spec.as_ref().filter(|p| p.is_approved());
    if let Some(content) = approved.and_then(|p| p.content.as_deref()) {
        prompt.push_str("## APPROVED PLAN\n\nFollow this plan:\n\n");
        prompt.push_str(content);
        prompt.push_str("\n\n");
    }

    if !completed_dependencies.is_empty() {
        prompt.push_str("## BUILDS ON\n\n");
        for dep in completed_dependencies {
            match dep.summary.as_deref() {
                Some(summary) => prompt.push_str(&format!("- `{}` {}: {}\n", dep.id, dep.label(), summary)),
                None => prompt.push_str(&format!("- `{}` {}\n", dep.id, dep.label())),
            }
        }
        prompt.push('\n');
    }

    if let Some(error) = feature.error.as_deref() {
        prompt.push_str("## PREVIOUS ATTEMPT\n\nThe last run ended with:\n\n```\n");
        prompt.push_str(error);
        prompt.push_str("\n```\n\n");
    }

    prompt.push_str(SUMMARY_INSTRUCTIONS);
    prompt
}

/// Text of the last `<summary>` block, trimmed
pub fn extract_summary(output: &str) -> Option<String> {
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let re = SUMMARY.get_or_init(|| Regex::new(r"(?s)<summary>(.*?)</summary>").expect("static regex"));

    re.captures_iter(output)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foreman_core::PlanSpec;
    use std::path::PathBuf;

    fn workspace(primary: bool) -> Workspace {
        Workspace {
            project_path: PathBuf::from("/repo"),
            branch_path: PathBuf::from(if primary { "/repo" } else { "/repo/.worktrees/feature-login" }),
            branch_name: if primary { "main" } else { "feature/login" }.to_string(),
            is_primary: primary,
        }
    }

    #[test]
    fn test_implementation_prompt_sections() {
        let mut dep = Feature::new("auth", "Add auth middleware");
        dep.summary = Some("Added middleware in src/auth.rs".into());

        let mut feature = Feature::new("login", "Build the login form").with_category("ui");
        feature.plan_spec = Some(PlanSpec {
            content: Some("1. Add form".into()),
            generated_at: Some(Utc::now()),
            approved_at: Some(Utc::now()),
            version: 1,
        });

        let prompt = build_implementation_prompt(&feature, &workspace(false), &[&dep]);
        assert!(prompt.starts_with("# FOREMAN FEATURE"));
        assert!(prompt.contains("## FEATURE login"));
        assert!(prompt.contains("**Category:** ui"));
        assert!(prompt.contains("dedicated git worktree"));
        assert!(prompt.contains("## APPROVED PLAN"));
        assert!(prompt.contains("Added middleware in src/auth.rs"));
        assert!(prompt.contains("<summary>"));
        assert!(!prompt.contains("PREVIOUS ATTEMPT"));
    }

    #[test]
    fn test_unapproved_plan_not_followed() {
        let mut feature = Feature::new("login", "Build the login form");
        feature.plan_spec = Some(PlanSpec {
            content: Some("draft".into()),
            generated_at: Some(Utc::now()),
            approved_at: None,
            version: 1,
        });
        feature.error = Some("tests failed".into());

        let prompt = build_implementation_prompt(&feature, &workspace(true), &[]);
        assert!(!prompt.contains("APPROVED PLAN"));
        assert!(prompt.contains("tests failed"));
    }

    #[test]
    fn test_plan_prompt_is_read_only() {
        let feature = Feature::new("login", "Build the login form");
        let prompt = build_plan_prompt(&feature, &workspace(true));
        assert!(prompt.starts_with("# FOREMAN PLANNING"));
        assert!(prompt.contains("Do not modify any files"));
        assert!(!prompt.contains("<summary>"));
    }

    #[test]
    fn test_extract_last_summary() {
        let output = "Working...\n<summary>first</summary>\nmore\n<summary>\n  Added login form\n</summary>";
        assert_eq!(extract_summary(output).as_deref(), Some("Added login form"));
        assert_eq!(extract_summary("no tags here"), None);
        assert_eq!(extract_summary("<summary>  </summary>"), None);
    }
}
