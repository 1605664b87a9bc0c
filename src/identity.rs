//! Identity resolution: opaque Slack user/channel IDs to display names.
//!
//! Every call goes to the Slack directory API. Nothing is cached and nothing
//! is retried; each lookup is bounded by the configured outbound deadline.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::slack::{ChatClient, ChatError};

/// What kind of identifier was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    User,
    Channel,
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKind::User => f.write_str("user"),
            IdentityKind::Channel => f.write_str("channel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub name: String,
    pub kind: IdentityKind,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to resolve {kind} '{id}': {source}")]
    Lookup {
        kind: IdentityKind,
        id: String,
        #[source]
        source: ChatError,
    },

    #[error("resolving {kind} '{id}' timed out after {after:?}")]
    Timeout {
        kind: IdentityKind,
        id: String,
        after: Duration,
    },
}

/// Resolves user and channel IDs through the chat platform.
#[derive(Clone)]
pub struct IdentityResolver {
    chat: Arc<dyn ChatClient>,
    deadline: Duration,
}

impl IdentityResolver {
    pub fn new(chat: Arc<dyn ChatClient>, deadline: Duration) -> Self {
        Self { chat, deadline }
    }

    pub async fn resolve_user(&self, user_id: &str) -> Result<IdentityRecord, ResolveError> {
        let kind = IdentityKind::User;
        let user = timeout(self.deadline, self.chat.user_info(user_id))
            .await
            .map_err(|_| ResolveError::Timeout {
                kind,
                id: user_id.to_string(),
                after: self.deadline,
            })?
            .map_err(|source| ResolveError::Lookup {
                kind,
                id: user_id.to_string(),
                source,
            })?;

        debug!(user_id = %user_id, name = %user.name, "Resolved user");
        Ok(IdentityRecord {
            name: user.name,
            kind,
        })
    }

    pub async fn resolve_channel(
        &self,
        channel_id: &str,
        include_locale: bool,
    ) -> Result<IdentityRecord, ResolveError> {
        let kind = IdentityKind::Channel;
        let channel = timeout(
            self.deadline,
            self.chat.conversation_info(channel_id, include_locale),
        )
        .await
        .map_err(|_| ResolveError::Timeout {
            kind,
            id: channel_id.to_string(),
            after: self.deadline,
        })?
        .map_err(|source| ResolveError::Lookup {
            kind,
            id: channel_id.to_string(),
            source,
        })?;

        debug!(channel_id = %channel_id, name = %channel.name, "Resolved channel");
        Ok(IdentityRecord {
            name: channel.name,
            kind,
        })
    }
}
