use crate::config::SlackConfig;
use crate::directory::{Credential, DirectoryEntry};
use crate::error::{DirectoryError, Result, UpstreamError};
use crate::upstream::UpstreamClient;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use std::time::Duration;

/// Used when Slack rate limits without a usable `Retry-After` header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Upper bound on a honoured `Retry-After`; larger hints are clamped
const MAX_RETRY_AFTER: Duration = Duration::from_secs(15 * 60);

/// Slack error codes that no amount of retrying will fix
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "missing_scope",
];

/// `users.list` backed directory source
pub struct SlackUserDirectory {
    http: reqwest::Client,
    base_url: String,
    page_limit: u16,
}

impl SlackUserDirectory {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DirectoryError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            page_limit: config.page_limit,
        })
    }

    async fn fetch_page(
        &self,
        credential: &Credential,
        cursor: Option<&str>,
    ) -> std::result::Result<UsersListPage, UpstreamError> {
        let mut request = self
            .http
            .get(format!("{}/users.list", self.base_url))
            .bearer_auth(credential.expose())
            .query(&[("limit", self.page_limit.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER));

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(UpstreamError::RateLimited {
                retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            });
        }
        if !status.is_success() {
            return Err(UpstreamError::Transport(format!(
                "users.list returned HTTP {}",
                status
            )));
        }

        let page: UsersListPage = response
            .json()
            .await
            .map_err(|e| UpstreamError::Transport(format!("users.list body: {}", e)))?;

        if !page.ok {
            let code = page.error.as_deref().unwrap_or("unknown_error");
            return Err(classify_api_error(code, retry_after));
        }

        Ok(page)
    }
}

#[async_trait]
impl UpstreamClient for SlackUserDirectory {
    async fn fetch_all(
        &self,
        credential: &Credential,
    ) -> std::result::Result<Vec<DirectoryEntry>, UpstreamError> {
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self.fetch_page(credential, cursor.as_deref()).await?;
            pages += 1;
            cursor = page.next_cursor();
            entries.extend(page.members.into_iter().map(SlackMember::into_entry));

            if cursor.is_none() {
                break;
            }
        }

        tracing::debug!(
            pages = pages,
            members = entries.len(),
            "Fetched users.list"
        );
        Ok(entries)
    }
}

/// Map a Slack `error` code from an `ok: false` response
fn classify_api_error(code: &str, retry_after: Option<Duration>) -> UpstreamError {
    if code == "ratelimited" {
        UpstreamError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        }
    } else if AUTH_ERRORS.contains(&code) {
        UpstreamError::Auth(code.to_string())
    } else {
        UpstreamError::Transport(code.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct UsersListPage {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    members: Vec<SlackMember>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

impl UsersListPage {
    fn next_cursor(&self) -> Option<String> {
        self.response_metadata
            .as_ref()
            .and_then(|m| m.next_cursor.as_deref())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackMember {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    is_email_confirmed: bool,
    #[serde(default)]
    profile: Option<SlackProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl SlackMember {
    fn into_entry(self) -> DirectoryEntry {
        let profile = self.profile.unwrap_or_default();
        DirectoryEntry {
            id: self.id,
            email: profile.email,
            name: self.name,
            real_name: self.real_name.or(profile.real_name),
            display_name: profile.display_name,
            is_bot: self.is_bot,
            is_deleted: self.deleted,
            email_confirmed: self.is_email_confirmed,
        }
    }
}
