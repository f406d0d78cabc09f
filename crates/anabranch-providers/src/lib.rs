//! Concrete integrations: GitHub for source control, Jira for tickets.

pub mod github;
pub mod jira;

pub use github::GitHubProvider;
pub use jira::JiraTicketSource;
