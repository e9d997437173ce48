// relia-gateway/src/slack.rs
// ============================================================================
// Module: Slack Integration
// Description: Chat poster capability and interaction callback verification.
// Purpose: Deliver approval prompts and accept approver verdicts.
// Dependencies: hmac, reqwest, serde, sha2, subtle, thiserror
// ============================================================================

//! ## Overview
//! The outbox worker delivers approval prompts through the [`ChatPoster`]
//! capability; the production implementation posts to Slack's
//! `chat.postMessage`. Interaction callbacks are authenticated with Slack's
//! `v0` signing scheme over the raw request body before any payload parsing
//! happens. Posting never occurs on the request path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use relia_core::ApprovalId;
use relia_core::core::canonical::hex_encode;

// ============================================================================
// SECTION: Message Payload
// ============================================================================

/// Approval prompt payload stored in the outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalMessage {
    /// Approval identifier the prompt is about.
    pub approval_id: String,
    /// Requested action.
    pub action: String,
    /// Target resource.
    pub resource: String,
    /// Target environment.
    pub env: String,
    /// Risk label from the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
    /// Policy reason, when the matching rule carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Requesting subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

impl ApprovalMessage {
    /// Renders the prompt as message text.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut text = format!(
            "Approval requested: `{}` on `{}` in `{}` (approval {})",
            self.action, self.resource, self.env, self.approval_id
        );
        if let Some(risk) = &self.risk {
            text.push_str(&format!(" risk={risk}"));
        }
        if let Some(reason) = &self.reason {
            text.push_str(&format!("\n> {reason}"));
        }
        if let Some(requested_by) = &self.requested_by {
            text.push_str(&format!("\nrequested by {requested_by}"));
        }
        text
    }
}

// ============================================================================
// SECTION: Chat Poster
// ============================================================================

/// Chat delivery failures; retried by the outbox, never surfaced to callers.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The chat API rejected or failed the post.
    #[error("chat post failed: {0}")]
    Post(String),
}

/// Capability that posts approval prompts to a chat channel.
pub trait ChatPoster: Send + Sync {
    /// Posts a prompt and returns the chat message timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when the post fails.
    fn post_approval(&self, channel: &str, message: &ApprovalMessage)
    -> Result<String, NotifyError>;
}

/// Slack `chat.postMessage` poster.
pub struct SlackPoster {
    /// Bot token used for posting.
    bot_token: String,
    /// API base URL; overridable for tests.
    api_base: String,
    /// Blocking HTTP client.
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SlackPoster {
    /// Builds a poster with the Slack API base.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when the HTTP client cannot be constructed.
    pub fn new(bot_token: impl Into<String>) -> Result<Self, NotifyError> {
        Self::with_api_base(bot_token, "https://slack.com/api")
    }

    /// Builds a poster against a custom API base.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when the HTTP client cannot be constructed.
    pub fn with_api_base(
        bot_token: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|err| NotifyError::Post(err.to_string()))?;
        Ok(Self {
            bot_token: bot_token.into(),
            api_base: api_base.into(),
            client,
        })
    }
}

impl ChatPoster for SlackPoster {
    fn post_approval(
        &self,
        channel: &str,
        message: &ApprovalMessage,
    ) -> Result<String, NotifyError> {
        let url = format!("{}/chat.postMessage", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.bot_token)
            .json(&serde_json::json!({
                "channel": channel,
                "text": message.render_text(),
            }))
            .send()
            .map_err(|err| NotifyError::Post(err.to_string()))?;

        let parsed: PostMessageResponse = response
            .json()
            .map_err(|err| NotifyError::Post(err.to_string()))?;
        if !parsed.ok {
            return Err(NotifyError::Post(
                parsed.error.unwrap_or_else(|| "unknown slack error".to_string()),
            ));
        }
        parsed
            .ts
            .ok_or_else(|| NotifyError::Post("missing message ts".to_string()))
    }
}

// ============================================================================
// SECTION: Interaction Callbacks
// ============================================================================

/// Verdict payload posted back by the chat integration.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackInteraction {
    /// Approval the verdict applies to.
    pub approval_id: ApprovalId,
    /// Verdict string: `approved` or `denied`.
    pub verdict: String,
    /// Approver identity.
    #[serde(default)]
    pub user: Option<SlackUser>,
}

/// Approver identity from the chat system.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackUser {
    /// Slack user identifier.
    pub id: String,
    /// Slack display name.
    #[serde(default)]
    pub name: String,
}

/// Verifies Slack's `v0` request signature over the raw body.
///
/// The expected signature is `v0=` followed by the hex HMAC-SHA256 of
/// `v0:{timestamp}:{body}` under the signing secret; comparison is
/// constant-time.
#[must_use]
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    let expected = format!("v0={}", hex_encode(&mac.finalize().into_bytes()));
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}
