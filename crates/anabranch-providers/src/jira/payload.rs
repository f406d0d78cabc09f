use serde::Deserialize;
use serde_json::Value;

/// Body of a Jira webhook delivery. Only the parts used for ticket
/// normalisation are modelled.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub webhook_event: String,
    pub issue: Option<Issue>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub id: String,
    pub key: String,
    /// REST URL of the issue, e.g. `https://acme.atlassian.net/rest/api/2/issue/10001`.
    #[serde(rename = "self", default)]
    pub self_url: String,
    pub fields: IssueFields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueFields {
    #[serde(default)]
    pub summary: String,
    /// Plain text (API v2) or an Atlassian Document Format tree (API v3).
    #[serde(default)]
    pub description: Value,
    pub issuetype: Option<Named>,
    pub project: Option<Project>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub priority: Option<Named>,
    pub assignee: Option<User>,
    pub status: Option<Named>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub key: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub display_name: String,
    #[serde(default)]
    pub account_id: String,
}

/// Flattens a description into plain text.
pub fn description_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) => {
            let mut out = String::new();
            collect_adf_text(value, &mut out);
            out.trim().to_string()
        }
        _ => String::new(),
    }
}

fn collect_adf_text(node: &Value, out: &mut String) {
    if let Some(text) = node.get("text").and_then(Value::as_str) {
        out.push_str(text);
    }
    if node.get("type").and_then(Value::as_str) == Some("hardBreak") {
        out.push('\n');
    }
    if let Some(children) = node.get("content").and_then(Value::as_array) {
        for child in children {
            collect_adf_text(child, out);
        }
    }
    if matches!(
        node.get("type").and_then(Value::as_str),
        Some("paragraph" | "heading" | "listItem" | "codeBlock")
    ) && !out.ends_with('\n')
    {
        out.push('\n');
    }
}
