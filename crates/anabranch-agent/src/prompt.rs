use std::path::PathBuf;

use anabranch_core::types::{AssessmentResult, Repository, Ticket};

/// Appended to the system prompt during assessment.
pub const ASSESSMENT_SYSTEM_PROMPT: &str =
    "You are assessing a ticket for autonomous implementation. Do not modify any files.";

/// Read-only evaluation prompt. The agent must answer with a single JSON
/// object matching `AssessmentResult`.
pub fn build_assessment_prompt(ticket: &Ticket, repositories: &[Repository]) -> String {
    let manifest = repositories
        .iter()
        .map(|r| match r.description.as_deref().filter(|d| !d.is_empty()) {
            Some(d) => format!("  - {} ({d})", r.full_name),
            None => format!("  - {}", r.full_name),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Decide whether an autonomous coding agent can safely complete the ticket below.

Lean towards caution. Skipping a ticket costs little; merging a wrong or
structurally harmful change costs a lot.

TICKET
  Key: {key}
  Title: {title}
  Description:
{description}

REPOSITORIES
{manifest}

Work out which repositories the change touches, whether it forces design
decisions a human should make, and how hard a wrong approach would be to undo.

Reply with exactly one JSON object and nothing else:

{{
  "confidence": <0-100>,
  "scope": "<trivial|small|medium|large|architectural>",
  "riskFactors": [<strings>],
  "decisionsRequired": [<strings>],
  "estimatedFiles": <integer>,
  "affectedRepositories": [<owner/name of each affected repository>],
  "reasoning": "<two or three sentences>"
}}

Confidence guide: 90+ obvious path; 70-89 likely fine with some edge cases;
50-69 several plausible approaches; under 50 a human should choose.

Scope guide: trivial = config, typos, constants; small = a field, a test, a
well specified feature; medium = a new endpoint or component, a module
refactor; large = cross-cutting work, new services, migrations;
architectural = sets patterns future work must follow."#,
        key = ticket.external_id,
        title = ticket.title,
        description = indent(&ticket.description, 4),
    )
}

/// Implementation prompt. The agent edits files only; committing is done
/// afterwards under the bot identity. The final line of output must be the
/// JSON decision read by [`crate::parse::split_decision`].
pub fn build_execution_prompt(
    ticket: &Ticket,
    assessment: Option<&AssessmentResult>,
    workspaces: &[PathBuf],
    max_file_changes: u32,
) -> String {
    let dirs = workspaces
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    let prior = assessment
        .map(|a| {
            format!(
                "\nPRIOR ASSESSMENT\n  Scope: {}\n  Confidence: {}/100\n  Reasoning: {}\n  Affected repositories: {}\n",
                a.scope,
                a.confidence,
                a.reasoning,
                a.affected_repositories.join(", ")
            )
        })
        .unwrap_or_default();

    format!(
        r#"Implement the ticket below completely and correctly.

TICKET
  Key: {key}
  Title: {title}
  Description:
{description}
{prior}
WORKING DIRECTORIES (one checkout per repository)
{dirs}

RULES
- Change only what the ticket needs; leave unrelated code alone.
- Match each repository's existing style and conventions.
- Keep existing tests passing and add tests where a suite already exists.
- Touch at most {max_file_changes} files.
- Do not run git add, git commit or any other git command. Edit files only.

If the ticket is too vague to act on (it could reasonably mean several
different things and the code does not settle it), stop without editing.

Finish with a short summary of what you changed, then on the very last line
print exactly one of:

{{"shouldCreatePR": true}}
{{"shouldCreatePR": false, "skipReason": "<what is missing or ambiguous>"}}"#,
        key = ticket.external_id,
        title = ticket.title,
        description = indent(&ticket.description, 4),
    )
}

fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|l| format!("{pad}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}
