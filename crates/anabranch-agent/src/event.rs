use serde::Deserialize;
use serde_json::Value;

/// A single NDJSON message emitted by Claude Code (`--output-format stream-json`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// First message on stream: session initialisation.
    System(SystemEvent),

    /// An assistant turn (text or tool calls).
    Assistant(AssistantEvent),

    /// Final result message, emitted once at the very end.
    Result(ResultEvent),

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemEvent {
    pub subtype: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantEvent {
    pub message: Option<AssistantMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<Vec<ContentBlock>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },

    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultEvent {
    /// "success" or an error subtype such as "error_max_turns".
    pub subtype: Option<String>,
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub is_error: Option<bool>,
    pub cost_usd: Option<f64>,
    pub total_cost_usd: Option<f64>,
    pub num_turns: Option<u64>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// What a finished stream amounted to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    /// Final result text, or the concatenated assistant text if the result
    /// was empty.
    pub output: String,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    /// A result event was seen.
    pub finished: bool,
    /// The result event reported failure.
    pub is_error: bool,
    pub error: Option<String>,
    /// Paths passed to Write/Edit tool calls, in first-seen order.
    pub files_touched: Vec<String>,
}

/// Parse a full NDJSON stream. Lines that are not events are ignored.
pub fn parse_stream(data: &str) -> StreamSummary {
    let mut summary = StreamSummary::default();
    let mut assistant_text = String::new();

    for line in data.lines() {
        if line.is_empty() {
            continue;
        }
        let event: AgentEvent = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(_) => continue,
        };
        match event {
            AgentEvent::System(e) => {
                if let Some(sid) = e.session_id {
                    summary.session_id = Some(sid);
                }
            }
            AgentEvent::Assistant(e) => {
                let blocks = e.message.and_then(|m| m.content).unwrap_or_default();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            if !assistant_text.is_empty() {
                                assistant_text.push('\n');
                            }
                            assistant_text.push_str(&text);
                        }
                        ContentBlock::ToolUse { name, input } => {
                            if matches!(name.as_str(), "Write" | "Edit" | "MultiEdit") {
                                if let Some(path) = input.get("file_path").and_then(Value::as_str) {
                                    if !summary.files_touched.iter().any(|p| p == path) {
                                        summary.files_touched.push(path.to_string());
                                    }
                                }
                            }
                        }
                        ContentBlock::Unknown => {}
                    }
                }
            }
            AgentEvent::Result(e) => {
                summary.finished = true;
                if let Some(sid) = e.session_id {
                    summary.session_id = Some(sid);
                }
                if let Some(text) = e.result {
                    summary.output = text;
                }
                summary.cost_usd = e.total_cost_usd.or(e.cost_usd).or(summary.cost_usd);
                let failed_subtype = e.subtype.as_deref().is_some_and(|s| s != "success");
                summary.is_error = e.is_error.unwrap_or(false) || failed_subtype;
                if summary.is_error {
                    summary.error = Some(if e.errors.is_empty() {
                        e.subtype.unwrap_or_else(|| "unknown error".into())
                    } else {
                        e.errors.join("; ")
                    });
                }
            }
            AgentEvent::Unknown => {}
        }
    }

    if summary.output.is_empty() && !assistant_text.is_empty() {
        summary.output = assistant_text;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_result_cost_and_edited_files() {
        let stream = r#"{"type":"system","subtype":"init","session_id":"s1"}
{"type":"assistant","message":{"content":[{"type":"text","text":"editing"},{"type":"tool_use","name":"Edit","input":{"file_path":"src/a.rs"}},{"type":"tool_use","name":"Read","input":{"file_path":"src/b.rs"}}]}}
{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Write","input":{"file_path":"src/a.rs"}}]}}
not json at all
{"type":"result","subtype":"success","result":"done","total_cost_usd":0.12,"session_id":"s1"}
"#;
        let s = parse_stream(stream);
        assert!(s.finished);
        assert!(!s.is_error);
        assert_eq!(s.output, "done");
        assert_eq!(s.session_id.as_deref(), Some("s1"));
        assert_eq!(s.cost_usd, Some(0.12));
        assert_eq!(s.files_touched, vec!["src/a.rs"]);
    }

    #[test]
    fn falls_back_to_assistant_text() {
        let stream = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"first"}]}}
{"type":"assistant","message":{"content":[{"type":"text","text":"second"}]}}
{"type":"result","subtype":"success","result":""}
"#;
        assert_eq!(parse_stream(stream).output, "first\nsecond");
    }

    #[test]
    fn error_subtype_marks_failure() {
        let s = parse_stream(r#"{"type":"result","subtype":"error_max_turns","is_error":true}"#);
        assert!(s.finished);
        assert!(s.is_error);
        assert_eq!(s.error.as_deref(), Some("error_max_turns"));
    }

    #[test]
    fn empty_stream_is_unfinished() {
        let s = parse_stream("");
        assert!(!s.finished);
        assert!(s.output.is_empty());
    }
}
