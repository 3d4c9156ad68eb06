use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    domain::{ChannelName, Identity, MessageId, User, UserId},
    error::ChatError,
    protocol::RawMessage,
};
use storage::{Storage, StoredMessage, StoredUser};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use crate::{
    roster::RosterLoader,
    subscription::{
        merge_delta, sort_chronologically, MessageStreamSubscriber, Subscription,
        SubscriptionCallbacks, UpdateSink,
    },
    StoreWriter,
};

/// Binds the chat core to the SQLite store.
#[derive(Clone)]
pub struct StoreBackend {
    storage: Storage,
}

impl StoreBackend {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

fn backend_error(err: anyhow::Error) -> ChatError {
    ChatError::backend_unavailable(format!("{err:#}"))
}

fn user_from_stored(user: StoredUser) -> User {
    User {
        id: user.user_id,
        display_label: user.email,
    }
}

/// Narrows a stored row into the record the core works with. A blank sender
/// is the same as no sender.
pub fn raw_message_from_stored(message: StoredMessage) -> RawMessage {
    RawMessage {
        id: message.message_id,
        channel: message.channel,
        sender_id: message
            .sender_id
            .filter(|sender| !sender.trim().is_empty())
            .map(UserId),
        body: message.body,
        created_at: message.created_at,
    }
}

#[async_trait]
impl RosterLoader for StoreBackend {
    async fn load_roster(&self) -> Result<Vec<User>, ChatError> {
        let users = self.storage.list_users().await.map_err(backend_error)?;
        Ok(users.into_iter().map(user_from_stored).collect())
    }
}

impl MessageStreamSubscriber for StoreBackend {
    fn subscribe(&self, channel: &ChannelName, callbacks: SubscriptionCallbacks) -> Subscription {
        let sink = UpdateSink::new(callbacks);
        // Subscribe to changes before the first read so no append falls in between.
        let changes = self.storage.watch_changes();
        let feed = ChannelFeed {
            storage: self.storage.clone(),
            channel: channel.clone(),
            sink: sink.clone(),
            messages: Vec::new(),
        };
        let task = tokio::spawn(feed.run(changes));
        let channel = channel.clone();
        Subscription::new(sink).on_cancel(move || {
            task.abort();
            debug!(channel = %channel, "store: channel feed stopped");
        })
    }
}

#[async_trait]
impl StoreWriter for StoreBackend {
    async fn append_message(
        &self,
        channel: &ChannelName,
        sender_id: Option<&UserId>,
        body: &str,
    ) -> Result<MessageId, ChatError> {
        let (message_id, _) = self
            .storage
            .append_message(channel, sender_id, body)
            .await
            .map_err(|err| ChatError::send_failed(format!("{err:#}")))?;
        Ok(message_id)
    }

    async fn upsert_user(&self, identity: &Identity) -> Result<(), ChatError> {
        self.storage
            .upsert_user(&identity.id, &identity.email)
            .await
            .map_err(backend_error)
    }
}

struct ChannelFeed {
    storage: Storage,
    channel: ChannelName,
    sink: UpdateSink,
    messages: Vec<RawMessage>,
}

impl ChannelFeed {
    async fn run(mut self, changes: tokio::sync::broadcast::Receiver<ChannelName>) {
        let mut changes = BroadcastStream::new(changes);
        if !self.reload_all().await {
            return;
        }
        info!(
            channel = %self.channel,
            messages = self.messages.len(),
            "store: channel feed open"
        );

        while let Some(change) = changes.next().await {
            let delivered = match change {
                Ok(changed) if changed != self.channel => continue,
                Ok(_) => self.apply_inserts().await,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!(
                        channel = %self.channel,
                        skipped,
                        "store: change feed lagged; re-reading channel"
                    );
                    self.reload_all().await
                }
            };
            if !delivered {
                return;
            }
        }

        self.sink.fail(ChatError::backend_unavailable(format!(
            "change feed for channel {} closed",
            self.channel
        )));
    }

    async fn reload_all(&mut self) -> bool {
        match self.storage.list_channel_messages(&self.channel).await {
            Ok(rows) => {
                self.messages = rows.into_iter().map(raw_message_from_stored).collect();
                sort_chronologically(&mut self.messages);
                self.sink.deliver(self.messages.clone())
            }
            Err(err) => self.report(err),
        }
    }

    async fn apply_inserts(&mut self) -> bool {
        let Some(last_seen) = self.messages.iter().map(|message| message.id).max() else {
            return self.reload_all().await;
        };
        match self
            .storage
            .list_channel_messages_after(&self.channel, last_seen)
            .await
        {
            Ok(rows) if rows.is_empty() => true,
            Ok(rows) => {
                merge_delta(
                    &mut self.messages,
                    rows.into_iter().map(raw_message_from_stored).collect(),
                );
                self.sink.deliver(self.messages.clone())
            }
            Err(err) => self.report(err),
        }
    }

    fn report(&self, err: anyhow::Error) -> bool {
        warn!(
            channel = %self.channel,
            error = %format!("{err:#}"),
            "store: channel read failed; closing subscription"
        );
        self.sink.fail(backend_error(err));
        false
    }
}

#[cfg(test)]
#[path = "tests/store_backend_tests.rs"]
mod tests;
