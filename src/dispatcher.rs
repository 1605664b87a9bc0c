//! # Event Dispatcher
//!
//! Branches over the inner event variants, resolves identities, optionally
//! enriches reactions with sentiment and appends warehouse rows.
//!
//! Reaction writes are not atomic: the sender row is appended before the
//! receiver row, and a failure on the second append leaves the first in place.
//! [`DispatchError::persisted_rows`] reports how far a failed write got.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::identity::{IdentityResolver, ResolveError};
use crate::sentiment::{SentimentClassifier, SentimentError, SentimentScore};
use crate::slack::{ChatClient, ChatError};
use crate::slack::events::{AppMentionEvent, InnerEvent, MessageEvent, ReactionAddedEvent};
use crate::warehouse::{RecordSink, SinkError, WarehouseRow};

/// Reply posted when the bot is mentioned.
pub const MENTION_REPLY: &str = "Yes, hello.";

/// Event label for the row attributed to the author of the reacted-to item.
pub const REACTION_RECEIVED_LABEL: &str = "reaction_recieved";

/// What a successful dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A reply was posted; nothing was written.
    Replied,
    /// The event was deliberately skipped.
    Ignored,
    /// Rows were appended to the warehouse.
    Persisted { rows: usize },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to post reply to channel '{channel}': {source}")]
    Reply {
        channel: String,
        #[source]
        source: ChatError,
    },

    #[error("posting reply to channel '{channel}' timed out after {after:?}")]
    ReplyTimeout { channel: String, after: Duration },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("failed to append row ({persisted_rows} already persisted): {source}")]
    Storage {
        persisted_rows: usize,
        #[source]
        source: SinkError,
    },
}

impl DispatchError {
    /// Coarse classification used for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Reply { .. }
            | DispatchError::ReplyTimeout { .. }
            | DispatchError::Resolve(_) => "external_service",
            DispatchError::Storage { .. } => "storage",
        }
    }

    /// Rows written before the failure. Always zero for non-storage errors.
    pub fn persisted_rows(&self) -> usize {
        match self {
            DispatchError::Storage { persisted_rows, .. } => *persisted_rows,
            _ => 0,
        }
    }

    /// True when some, but not all, rows of a multi-row write landed.
    pub fn is_partial(&self) -> bool {
        self.persisted_rows() > 0
    }
}

/// Routes one inner event to its handling path.
#[derive(Clone)]
pub struct EventDispatcher {
    chat: Arc<dyn ChatClient>,
    resolver: IdentityResolver,
    sink: Arc<dyn RecordSink>,
    sentiment: Option<Arc<dyn SentimentClassifier>>,
    deadline: Duration,
}

impl EventDispatcher {
    /// `sentiment` is `None` when reaction enrichment is disabled.
    pub fn new(
        chat: Arc<dyn ChatClient>,
        sink: Arc<dyn RecordSink>,
        sentiment: Option<Arc<dyn SentimentClassifier>>,
        deadline: Duration,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(chat.clone(), deadline),
            chat,
            sink,
            sentiment,
            deadline,
        }
    }

    pub async fn dispatch(&self, event: &InnerEvent) -> Result<DispatchOutcome, DispatchError> {
        let event_type = event.event_type();
        counter!("slack_events_received_total", "event_type" => event_type).increment(1);

        let result = match event {
            InnerEvent::AppMention(ev) => self.handle_app_mention(ev).await,
            InnerEvent::Message(ev) => self.handle_message(event_type, ev).await,
            InnerEvent::ReactionAdded(ev) => self.handle_reaction_added(event_type, ev).await,
            InnerEvent::Unknown => {
                debug!("Ignoring unhandled inner event type");
                Ok(DispatchOutcome::Ignored)
            }
        };

        if let Err(err) = &result {
            counter!(
                "slack_dispatch_failures_total",
                "event_type" => event_type,
                "kind" => err.kind()
            )
            .increment(1);
        }
        result
    }

    async fn handle_app_mention(
        &self,
        ev: &AppMentionEvent,
    ) -> Result<DispatchOutcome, DispatchError> {
        timeout(self.deadline, self.chat.post_message(&ev.channel, MENTION_REPLY))
            .await
            .map_err(|_| DispatchError::ReplyTimeout {
                channel: ev.channel.clone(),
                after: self.deadline,
            })?
            .map_err(|source| DispatchError::Reply {
                channel: ev.channel.clone(),
                source,
            })?;

        debug!(channel = %ev.channel, "Replied to mention");
        Ok(DispatchOutcome::Replied)
    }

    async fn handle_message(
        &self,
        label: &str,
        ev: &MessageEvent,
    ) -> Result<DispatchOutcome, DispatchError> {
        if ev.is_edit_echo() {
            debug!(channel = %ev.channel, "Skipping edited message echo");
            return Ok(DispatchOutcome::Ignored);
        }

        let user = self.resolver.resolve_user(&ev.user).await?;
        let channel = self.resolver.resolve_channel(&ev.channel, true).await?;

        let rows = [WarehouseRow::captured_now(label, user.name, channel.name, "")];
        self.append_all(&rows).await
    }

    async fn handle_reaction_added(
        &self,
        label: &str,
        ev: &ReactionAddedEvent,
    ) -> Result<DispatchOutcome, DispatchError> {
        let sender = self.resolver.resolve_user(&ev.user).await?;
        let receiver = self.resolver.resolve_user(&ev.item_user).await?;
        let channel = self.resolver.resolve_channel(&ev.item.channel, true).await?;

        info!(
            reaction = %ev.reaction,
            receiver = %receiver.name,
            sender = %sender.name,
            channel = %channel.name,
            "{} given to {} from {} in {}",
            ev.reaction, receiver.name, sender.name, channel.name
        );

        if let Some(classifier) = &self.sentiment {
            match self.classify(classifier.as_ref(), &ev.reaction).await {
                Ok(score) => info!(
                    reaction = %ev.reaction,
                    score = score.score,
                    magnitude = score.magnitude,
                    "Reaction sentiment"
                ),
                Err(err) => {
                    counter!("slack_sentiment_failures_total").increment(1);
                    warn!(reaction = %ev.reaction, error = %err, "Sentiment analysis failed");
                }
            }
        }

        let rows = [
            WarehouseRow::captured_now(label, sender.name, channel.name.clone(), ev.reaction.clone()),
            WarehouseRow::captured_now(
                REACTION_RECEIVED_LABEL,
                receiver.name,
                channel.name,
                ev.reaction.clone(),
            ),
        ];
        self.append_all(&rows).await
    }

    async fn classify(
        &self,
        classifier: &dyn SentimentClassifier,
        text: &str,
    ) -> Result<SentimentScore, SentimentError> {
        timeout(self.deadline, classifier.analyze(text))
            .await
            .map_err(|_| SentimentError::Timeout)?
    }

    /// Appends rows in order, stopping at the first failure.
    async fn append_all(&self, rows: &[WarehouseRow]) -> Result<DispatchOutcome, DispatchError> {
        for (persisted_rows, row) in rows.iter().enumerate() {
            let appended = timeout(self.deadline, self.sink.append(row))
                .await
                .unwrap_or(Err(SinkError::Timeout));
            if let Err(source) = appended {
                return Err(DispatchError::Storage {
                    persisted_rows,
                    source,
                });
            }
            counter!("warehouse_rows_written_total", "event" => row.event.clone()).increment(1);
        }
        Ok(DispatchOutcome::Persisted { rows: rows.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityKind;
    use crate::slack::events::ReactionItem;
    use crate::slack::{SlackChannel, SlackUser};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChat {
        posts: Mutex<Vec<(String, String)>>,
        lookups: Mutex<Vec<String>>,
        missing_users: HashSet<String>,
        fail_posts: bool,
        stall_posts: bool,
    }

    #[async_trait]
    impl ChatClient for RecordingChat {
        async fn post_message(&self, channel: &str, text: &str) -> Result<(), ChatError> {
            if self.stall_posts {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail_posts {
                return Err(ChatError::Api {
                    method: "chat.postMessage",
                    error: "channel_not_found".to_string(),
                });
            }
            self.posts
                .lock()
                .unwrap()
                .push((channel.to_string(), text.to_string()));
            Ok(())
        }

        async fn user_info(&self, user_id: &str) -> Result<SlackUser, ChatError> {
            self.lookups.lock().unwrap().push(format!("user:{user_id}"));
            if self.missing_users.contains(user_id) {
                return Err(ChatError::Api {
                    method: "users.info",
                    error: "user_not_found".to_string(),
                });
            }
            Ok(SlackUser {
                id: user_id.to_string(),
                name: format!("{}-name", user_id.to_lowercase()),
                real_name: None,
            })
        }

        async fn conversation_info(
            &self,
            channel_id: &str,
            include_locale: bool,
        ) -> Result<SlackChannel, ChatError> {
            self.lookups
                .lock()
                .unwrap()
                .push(format!("channel:{channel_id}:{include_locale}"));
            Ok(SlackChannel {
                id: channel_id.to_string(),
                name: "general".to_string(),
                locale: Some("en-US".to_string()),
            })
        }
    }

    /// Accepts rows until `fail_at` (zero-based), then rejects.
    #[derive(Default)]
    struct RecordingSink {
        rows: Mutex<Vec<WarehouseRow>>,
        attempts: Mutex<usize>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl RecordSink for RecordingSink {
        async fn append(&self, row: &WarehouseRow) -> Result<(), SinkError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                *attempts += 1;
                *attempts - 1
            };
            if self.fail_at == Some(attempt) {
                return Err(SinkError::Rejected("quota exceeded".to_string()));
            }
            self.rows.lock().unwrap().push(row.clone());
            Ok(())
        }
    }

    /// Never answers within any test deadline.
    #[derive(Default)]
    struct StalledSink {
        attempts: Mutex<usize>,
    }

    #[async_trait]
    impl RecordSink for StalledSink {
        async fn append(&self, _row: &WarehouseRow) -> Result<(), SinkError> {
            *self.attempts.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    struct FailingSentiment {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SentimentClassifier for FailingSentiment {
        async fn analyze(&self, _text: &str) -> Result<SentimentScore, SentimentError> {
            *self.calls.lock().unwrap() += 1;
            Err(SentimentError::MalformedResponse("boom".to_string()))
        }
    }

    fn dispatcher(
        chat: Arc<RecordingChat>,
        sink: Arc<RecordingSink>,
        sentiment: Option<Arc<dyn SentimentClassifier>>,
    ) -> EventDispatcher {
        EventDispatcher::new(chat, sink, sentiment, Duration::from_secs(1))
    }

    fn reaction() -> InnerEvent {
        InnerEvent::ReactionAdded(ReactionAddedEvent {
            user: "U1".to_string(),
            item_user: "U2".to_string(),
            item: ReactionItem {
                item_type: "message".to_string(),
                channel: "C1".to_string(),
                ts: "1360782400.498405".to_string(),
            },
            reaction: "thumbsup".to_string(),
            event_ts: "1360782804.083113".to_string(),
        })
    }

    fn message(subtype: Option<&str>) -> InnerEvent {
        InnerEvent::Message(MessageEvent {
            channel: "C1".to_string(),
            user: "U1".to_string(),
            subtype: subtype.map(str::to_string),
            ts: "1355517523.000005".to_string(),
        })
    }

    #[tokio::test]
    async fn test_app_mention_replies_without_rows() {
        let chat = Arc::new(RecordingChat::default());
        let sink = Arc::new(RecordingSink::default());
        let event = InnerEvent::AppMention(AppMentionEvent {
            channel: "C1".to_string(),
            text: "<@UBOT> hi".to_string(),
            user: "U1".to_string(),
        });

        let outcome = dispatcher(chat.clone(), sink.clone(), None)
            .dispatch(&event)
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Replied);
        assert_eq!(
            *chat.posts.lock().unwrap(),
            vec![("C1".to_string(), MENTION_REPLY.to_string())]
        );
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_app_mention_post_failure_is_external_service_error() {
        let chat = Arc::new(RecordingChat {
            fail_posts: true,
            ..Default::default()
        });
        let event = InnerEvent::AppMention(AppMentionEvent {
            channel: "C1".to_string(),
            text: String::new(),
            user: "U1".to_string(),
        });

        let err = dispatcher(chat, Arc::new(RecordingSink::default()), None)
            .dispatch(&event)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Reply { .. }));
        assert_eq!(err.kind(), "external_service");
    }

    #[tokio::test]
    async fn test_message_changed_is_ignored() {
        let chat = Arc::new(RecordingChat::default());
        let sink = Arc::new(RecordingSink::default());

        let outcome = dispatcher(chat.clone(), sink.clone(), None)
            .dispatch(&message(Some("message_changed")))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert!(chat.lookups.lock().unwrap().is_empty());
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_writes_one_row() {
        let chat = Arc::new(RecordingChat::default());
        let sink = Arc::new(RecordingSink::default());

        let outcome = dispatcher(chat.clone(), sink.clone(), None)
            .dispatch(&message(None))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Persisted { rows: 1 });
        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event, "message");
        assert_eq!(rows[0].user, "u1-name");
        assert_eq!(rows[0].channel, "general");
        assert_eq!(rows[0].reaction, "");
        assert_eq!(
            *chat.lookups.lock().unwrap(),
            vec!["user:U1".to_string(), "channel:C1:true".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reaction_writes_sender_then_receiver() {
        let chat = Arc::new(RecordingChat::default());
        let sink = Arc::new(RecordingSink::default());

        let outcome = dispatcher(chat.clone(), sink.clone(), None)
            .dispatch(&reaction())
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Persisted { rows: 2 });
        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event, "reaction_added");
        assert_eq!(rows[0].user, "u1-name");
        assert_eq!(rows[1].event, REACTION_RECEIVED_LABEL);
        assert_eq!(rows[1].user, "u2-name");
        for row in rows.iter() {
            assert_eq!(row.channel, "general");
            assert_eq!(row.reaction, "thumbsup");
        }
        assert_eq!(
            *chat.lookups.lock().unwrap(),
            vec![
                "user:U1".to_string(),
                "user:U2".to_string(),
                "channel:C1:true".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_sentiment_failure_does_not_block_rows() {
        let sink = Arc::new(RecordingSink::default());
        let sentiment = Arc::new(FailingSentiment {
            calls: Mutex::new(0),
        });

        let outcome = dispatcher(
            Arc::new(RecordingChat::default()),
            sink.clone(),
            Some(sentiment.clone()),
        )
        .dispatch(&reaction())
        .await
        .unwrap();

        assert_eq!(outcome, DispatchOutcome::Persisted { rows: 2 });
        assert_eq!(*sentiment.calls.lock().unwrap(), 1);
        assert_eq!(sink.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resolution_failure_writes_nothing() {
        let chat = Arc::new(RecordingChat {
            missing_users: HashSet::from(["U2".to_string()]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());

        let err = dispatcher(chat, sink.clone(), None)
            .dispatch(&reaction())
            .await
            .unwrap_err();

        match &err {
            DispatchError::Resolve(ResolveError::Lookup { kind, id, .. }) => {
                assert_eq!(*kind, IdentityKind::User);
                assert_eq!(id, "U2");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.persisted_rows(), 0);
        assert_eq!(*sink.attempts.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_first_append_failure_skips_second() {
        let sink = Arc::new(RecordingSink {
            fail_at: Some(0),
            ..Default::default()
        });

        let err = dispatcher(Arc::new(RecordingChat::default()), sink.clone(), None)
            .dispatch(&reaction())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "storage");
        assert_eq!(err.persisted_rows(), 0);
        assert!(!err.is_partial());
        assert_eq!(*sink.attempts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_append_failure_is_partial() {
        let sink = Arc::new(RecordingSink {
            fail_at: Some(1),
            ..Default::default()
        });

        let err = dispatcher(Arc::new(RecordingChat::default()), sink.clone(), None)
            .dispatch(&reaction())
            .await
            .unwrap_err();

        assert_eq!(err.persisted_rows(), 1);
        assert!(err.is_partial());
        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event, "reaction_added");
    }

    #[tokio::test]
    async fn test_unknown_event_is_noop() {
        let chat = Arc::new(RecordingChat::default());
        let sink = Arc::new(RecordingSink::default());

        let outcome = dispatcher(chat.clone(), sink.clone(), None)
            .dispatch(&InnerEvent::Unknown)
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert!(chat.posts.lock().unwrap().is_empty());
        assert!(chat.lookups.lock().unwrap().is_empty());
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_append_times_out_as_storage_error() {
        let sink = Arc::new(StalledSink::default());
        let dispatcher = EventDispatcher::new(
            Arc::new(RecordingChat::default()),
            sink.clone(),
            None,
            Duration::from_millis(50),
        );

        let err = dispatcher.dispatch(&reaction()).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Storage {
                persisted_rows: 0,
                source: SinkError::Timeout
            }
        ));
        assert_eq!(err.kind(), "storage");
        assert_eq!(*sink.attempts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stalled_reply_times_out_as_external_service_error() {
        let chat = Arc::new(RecordingChat {
            stall_posts: true,
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let dispatcher =
            EventDispatcher::new(chat, sink.clone(), None, Duration::from_millis(50));
        let event = InnerEvent::AppMention(AppMentionEvent {
            channel: "C1".to_string(),
            text: String::new(),
            user: "U1".to_string(),
        });

        let err = dispatcher.dispatch(&event).await.unwrap_err();

        match &err {
            DispatchError::ReplyTimeout { channel, .. } => assert_eq!(channel, "C1"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), "external_service");
        assert!(sink.rows.lock().unwrap().is_empty());
    }
}
