use anabranch_core::types::AssessmentResult;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// The agent's closing statement on whether its work should be published.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutionDecision {
    #[serde(rename = "shouldCreatePR")]
    pub should_create_pr: bool,
    #[serde(rename = "skipReason", default)]
    pub skip_reason: Option<String>,
}

/// The outermost `{ ... }` span in `text`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Reads an assessment from agent output that may wrap the JSON in prose or
/// a code fence.
pub fn parse_assessment(text: &str) -> Result<AssessmentResult> {
    let trimmed = text.trim();
    let assessment: AssessmentResult = match serde_json::from_str(trimmed) {
        Ok(a) => a,
        Err(_) => {
            let json = extract_json_object(trimmed)
                .ok_or_else(|| anyhow!("no JSON object in assessment response"))?;
            serde_json::from_str(json).context("malformed assessment JSON")?
        }
    };
    assessment.validate()?;
    Ok(assessment)
}

/// Splits agent output into its summary and the trailing decision line.
/// The last line that parses as a decision wins.
pub fn split_decision(text: &str) -> (String, Option<ExecutionDecision>) {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate().rev() {
        let candidate = line.trim().trim_matches('`').trim();
        if !candidate.starts_with('{') || !candidate.contains("shouldCreatePR") {
            continue;
        }
        if let Ok(decision) = serde_json::from_str::<ExecutionDecision>(candidate) {
            let mut rest: Vec<&str> = lines[..i].to_vec();
            rest.extend_from_slice(&lines[i + 1..]);
            let summary = rest.join("\n").trim().trim_end_matches("```").trim().to_string();
            return (summary, Some(decision));
        }
    }
    (text.trim().to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anabranch_core::types::TaskScope;

    const ASSESSMENT: &str = r#"{"confidence":82,"scope":"small","riskFactors":["auth"],"decisionsRequired":[],"estimatedFiles":3,"affectedRepositories":["acme/web"],"reasoning":"Clear."}"#;

    #[test]
    fn parses_bare_and_wrapped_assessments() {
        let a = parse_assessment(ASSESSMENT).unwrap();
        assert_eq!(a.confidence, 82.0);
        assert_eq!(a.scope, TaskScope::Small);
        assert_eq!(a.affected_repositories, vec!["acme/web"]);

        let wrapped = format!("Here is my answer:\n```json\n{ASSESSMENT}\n```\n");
        assert_eq!(parse_assessment(&wrapped).unwrap(), a);
    }

    #[test]
    fn rejects_missing_or_invalid_assessments() {
        assert!(parse_assessment("I could not decide.").is_err());
        assert!(parse_assessment(r#"{"confidence": 50}"#).is_err());
        let out_of_range = ASSESSMENT.replace("82", "180");
        assert!(parse_assessment(&out_of_range).is_err());
    }

    #[test]
    fn decision_on_last_line() {
        let text = "Updated the handler and added a test.\n{\"shouldCreatePR\": true}";
        let (summary, decision) = split_decision(text);
        assert_eq!(summary, "Updated the handler and added a test.");
        assert!(decision.unwrap().should_create_pr);
    }

    #[test]
    fn decline_with_reason() {
        let text = "Stopped early.\n\n  {\"shouldCreatePR\": false, \"skipReason\": \"which endpoint?\"}  \n";
        let (summary, decision) = split_decision(text);
        let decision = decision.unwrap();
        assert!(!decision.should_create_pr);
        assert_eq!(decision.skip_reason.as_deref(), Some("which endpoint?"));
        assert_eq!(summary, "Stopped early.");
    }

    #[test]
    fn no_decision_keeps_text() {
        let (summary, decision) = split_decision("  did things  ");
        assert_eq!(summary, "did things");
        assert!(decision.is_none());
    }

    #[test]
    fn extract_spans_outermost_braces() {
        assert_eq!(extract_json_object("x {\"a\":{\"b\":1}} y"), Some("{\"a\":{\"b\":1}}"));
        assert_eq!(extract_json_object("} nothing {"), None);
    }
}
