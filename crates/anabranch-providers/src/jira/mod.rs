pub mod payload;

use std::sync::Arc;

use anabranch_core::{
    queue::TaskQueue,
    ticketing::{TicketFilter, TicketSource, WebhookOutcome},
    types::{Task, Ticket},
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

pub use payload::{description_text, Issue, IssueFields, WebhookPayload};

type HmacSha256 = Hmac<Sha256>;

pub const ISSUE_CREATED: &str = "jira:issue_created";

/// Turns Jira `issue_created` webhooks into queued tasks.
pub struct JiraTicketSource {
    webhook_secret: String,
    filter: TicketFilter,
    queue: Arc<TaskQueue>,
}

impl JiraTicketSource {
    pub fn new(webhook_secret: impl Into<String>, filter: TicketFilter, queue: Arc<TaskQueue>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            filter,
            queue,
        }
    }

    fn task_id(ticket: &Ticket) -> String {
        format!("jira-{}-{}", ticket.external_id, Utc::now().timestamp_millis())
    }
}

#[async_trait]
impl TicketSource for JiraTicketSource {
    fn name(&self) -> &str {
        "jira"
    }

    async fn handle_webhook(&self, signature: Option<&str>, body: &[u8]) -> Result<WebhookOutcome> {
        if !self.webhook_secret.is_empty() {
            let Some(signature) = signature else {
                warn!("jira webhook without x-hub-signature header");
                return Ok(WebhookOutcome::Rejected);
            };
            if !verify_signature(&self.webhook_secret, signature, body) {
                warn!("jira webhook with invalid signature");
                return Ok(WebhookOutcome::Rejected);
            }
        }

        let payload: WebhookPayload = match serde_json::from_slice(body) {
            Ok(p) => p,
            Err(e) => {
                warn!("malformed jira webhook payload: {e}");
                return Ok(ignored("malformed payload"));
            }
        };

        if payload.webhook_event != ISSUE_CREATED {
            debug!(event = %payload.webhook_event, "ignoring jira event");
            return Ok(ignored(format!("event {} not handled", payload.webhook_event)));
        }
        let Some(issue) = payload.issue else {
            warn!("jira issue_created webhook without an issue");
            return Ok(ignored("payload has no issue"));
        };

        let ticket = normalize_issue(&issue);
        if let Some(reason) = self.filter.rejection(&ticket) {
            info!(ticket = %ticket.external_id, %reason, "ticket filtered out");
            return Ok(ignored(reason));
        }

        let task_id = Self::task_id(&ticket);
        info!(ticket = %ticket.external_id, title = %ticket.title, "accepted ticket from jira");
        self.queue.enqueue(Task::new(task_id.clone(), ticket));
        Ok(WebhookOutcome::Accepted { task_id })
    }
}

fn ignored(reason: impl Into<String>) -> WebhookOutcome {
    WebhookOutcome::Ignored {
        reason: reason.into(),
    }
}

/// Checks an HMAC-SHA256 signature over the raw body. Accepts `sha256=<hex>`
/// or bare hex.
pub fn verify_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let hex_sig = signature.trim();
    let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// `sha256=<hex>` signature for `body`, as Jira sends it.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn normalize_issue(issue: &Issue) -> Ticket {
    let fields = &issue.fields;
    let base_url = issue
        .self_url
        .split("/rest/")
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let url = (!base_url.is_empty()).then(|| format!("{base_url}/browse/{}", issue.key));

    let mut metadata = Map::new();
    metadata.insert("jiraId".into(), Value::String(issue.id.clone()));
    if let Some(status) = &fields.status {
        metadata.insert("statusName".into(), Value::String(status.name.clone()));
    }

    Ticket {
        id: issue.id.clone(),
        external_id: issue.key.clone(),
        title: fields.summary.clone(),
        description: description_text(&fields.description),
        labels: fields.labels.clone(),
        assignee: fields.assignee.as_ref().map(|u| u.display_name.clone()),
        priority: fields.priority.as_ref().map(|p| p.name.clone()),
        issue_type: fields.issuetype.as_ref().map(|t| t.name.clone()),
        project: fields.project.as_ref().map(|p| p.key.clone()),
        url,
        provider: "jira".into(),
        metadata,
    }
}
