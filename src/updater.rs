//! The outbound per-member update call and its response classification.
//!
//! One POST per member against the backend's token-rule-info endpoint.
//! Every failure class is absorbed into `UpdateOutcome` and reported; the
//! member counts as processed either way, and nothing is retried.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::sync::state::{AccountId, GuildId};

/// Wire body for the token-rule-info call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRuleInfoRequest<'a> {
    discord_user_id: &'a str,
    guild_id: &'a str,
}

/// What one update attempt came to. Consumed by the reporter and discarded;
/// never propagated past that boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// 200: the backend refreshed the member's roles. Carries the response
    /// body for the info log.
    Success { body: Value },
    /// 400: the backend rejected the member/guild pair.
    Rejected,
    /// Any other status.
    Unexpected { status: u16 },
    /// The call failed before a status was obtained (or its body could not
    /// be read).
    Transport { error: String },
}

impl UpdateOutcome {
    /// Classify a settled response status. The 200 body is the only payload
    /// anyone looks at downstream.
    pub(crate) fn from_status(status: StatusCode, body: Value) -> Self {
        match status {
            StatusCode::OK => Self::Success { body },
            StatusCode::BAD_REQUEST => Self::Rejected,
            other => Self::Unexpected {
                status: other.as_u16(),
            },
        }
    }
}

/// One outbound update call for one member of one guild.
#[async_trait]
pub trait MemberUpdater: Send + Sync {
    async fn update(&self, guild: &GuildId, member: &AccountId) -> UpdateOutcome;
}

/// Production updater: POSTs to `<backend>:<port>/token-rule-info` with a
/// bounded per-request deadline, independent of the pacing timer.
pub struct HttpMemberUpdater {
    client: Client,
    endpoint: String,
}

impl HttpMemberUpdater {
    pub fn new(backend_url: &str, port: u16, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(concat!("starry-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint: format!("{backend_url}:{port}/token-rule-info"),
        }
    }
}

#[async_trait]
impl MemberUpdater for HttpMemberUpdater {
    async fn update(&self, guild: &GuildId, member: &AccountId) -> UpdateOutcome {
        let body = TokenRuleInfoRequest {
            discord_user_id: member.as_str(),
            guild_id: guild.as_str(),
        };

        let response = match self.client.post(&self.endpoint).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                return UpdateOutcome::Transport {
                    error: e.to_string(),
                }
            }
        };

        let status = response.status();
        if status == StatusCode::OK {
            match response.json::<Value>().await {
                Ok(body) => UpdateOutcome::from_status(status, body),
                Err(e) => UpdateOutcome::Transport {
                    error: e.to_string(),
                },
            }
        } else {
            UpdateOutcome::from_status(status, Value::Null)
        }
    }
}
