//! Slack Events API payload types.
//!
//! The outer envelope and the inner event are both closed sum types tagged by
//! their `type` field. Variants the receiver does not handle decode to
//! `Unknown` rather than failing.

use serde::Deserialize;

/// Subtype Slack sends when a message is edited; those echoes are not recorded.
pub const MESSAGE_CHANGED_SUBTYPE: &str = "message_changed";

/// Outer payload delivered to the events endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEnvelope {
    /// Handshake sent when the endpoint URL is registered.
    UrlVerification { challenge: String },
    /// A wrapped workspace event.
    EventCallback { event: InnerEvent },
    #[serde(other)]
    Unknown,
}

/// Inner event carried by an `event_callback` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InnerEvent {
    #[serde(rename = "app_mention")]
    AppMention(AppMentionEvent),
    #[serde(rename = "message")]
    Message(MessageEvent),
    #[serde(rename = "reaction_added")]
    ReactionAdded(ReactionAddedEvent),
    #[serde(other)]
    Unknown,
}

impl InnerEvent {
    /// Platform label of the event, as it appears in the `type` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            InnerEvent::AppMention(_) => "app_mention",
            InnerEvent::Message(_) => "message",
            InnerEvent::ReactionAdded(_) => "reaction_added",
            InnerEvent::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppMentionEvent {
    pub channel: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    pub channel: String,
    // Absent on some subtypes (edits, bot posts).
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub ts: String,
}

impl MessageEvent {
    pub fn is_edit_echo(&self) -> bool {
        self.subtype.as_deref() == Some(MESSAGE_CHANGED_SUBTYPE)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionAddedEvent {
    /// User who added the reaction.
    pub user: String,
    /// Author of the item that was reacted to.
    #[serde(default)]
    pub item_user: String,
    pub item: ReactionItem,
    pub reaction: String,
    #[serde(default)]
    pub event_ts: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionItem {
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub ts: String,
}
