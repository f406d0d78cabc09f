use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Installation tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// How requests to GitHub are authenticated.
pub enum Credentials {
    /// Personal access or fine-grained token used as-is.
    Token(String),
    /// GitHub App installation: an RS256 JWT is exchanged for short-lived
    /// installation tokens.
    App {
        app_id: String,
        key: EncodingKey,
        installation_id: String,
    },
}

struct CachedToken {
    token: String,
    refresh_at: DateTime<Utc>,
}

/// Hands out a bearer token, minting and caching installation tokens for
/// App credentials.
pub struct TokenSource {
    credentials: Credentials,
    http: reqwest::Client,
    api_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(credentials: Credentials, http: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            credentials,
            http,
            api_url: api_url.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn is_app(&self) -> bool {
        matches!(self.credentials, Credentials::App { .. })
    }

    pub async fn token(&self) -> Result<String> {
        let (app_id, key, installation_id) = match &self.credentials {
            Credentials::Token(token) => return Ok(token.clone()),
            Credentials::App {
                app_id,
                key,
                installation_id,
            } => (app_id, key, installation_id),
        };

        let mut cached = self.cached.lock().await;
        if let Some(c) = cached.as_ref() {
            if Utc::now() < c.refresh_at {
                return Ok(c.token.clone());
            }
        }

        let jwt = app_jwt(app_id, key, Utc::now().timestamp())?;
        let fresh = self.mint_installation_token(&jwt, installation_id).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn mint_installation_token(&self, jwt: &str, installation_id: &str) -> Result<CachedToken> {
        #[derive(Deserialize)]
        struct InstallationToken {
            token: String,
            expires_at: DateTime<Utc>,
        }

        let url = format!("{}/app/installations/{installation_id}/access_tokens", self.api_url);
        debug!(installation_id, "minting installation token");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .context("installation token request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("installation token request returned {status}: {body}"));
        }
        let minted: InstallationToken = resp.json().await.context("bad installation token response")?;
        let margin = chrono::Duration::from_std(REFRESH_MARGIN)?;
        info!(expires_at = %minted.expires_at, "minted GitHub installation token");
        Ok(CachedToken {
            token: minted.token,
            refresh_at: minted.expires_at - margin,
        })
    }
}

/// Signs the short-lived JWT a GitHub App uses to call `/app` endpoints.
/// `iat` is backdated for clock drift and the lifetime stays under GitHub's
/// ten minute cap.
pub fn app_jwt(app_id: &str, key: &EncodingKey, now: i64) -> Result<String> {
    #[derive(Serialize)]
    struct Claims<'a> {
        iat: i64,
        exp: i64,
        iss: &'a str,
    }

    let claims = Claims {
        iat: now - 60,
        exp: now + 540,
        iss: app_id,
    };
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key).context("failed to sign app JWT")
}

/// Value for git's `http.extraHeader` so the token never lands in a remote
/// URL or on disk.
pub fn git_auth_header(token: &str) -> String {
    let basic = STANDARD.encode(format!("x-access-token:{token}"));
    format!("Authorization: basic {basic}")
}
