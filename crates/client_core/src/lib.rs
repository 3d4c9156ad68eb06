use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{ChannelName, GeoPoint, Identity, MessageId, UserId},
    error::ChatError,
};
use tokio::sync::watch;
use tracing::{info, warn};

pub mod composer;
pub mod engine;
pub mod identity;
pub mod roster;
pub mod store_backend;
pub mod subscription;

pub use composer::compose;
pub use engine::{LifecyclePhase, LiveMessages, SyncEngine};
pub use identity::{IdentityProvider, SessionIdentity};
pub use roster::{MissingRosterLoader, Roster, RosterLoader};
pub use store_backend::StoreBackend;
pub use subscription::{
    merge_delta, sort_chronologically, MessageStreamSubscriber, Subscription,
    SubscriptionCallbacks, UpdateSink,
};

/// Write side of the persistent store.
#[async_trait]
pub trait StoreWriter: Send + Sync {
    /// Appends a message; the store assigns id and write time.
    async fn append_message(
        &self,
        channel: &ChannelName,
        sender_id: Option<&UserId>,
        body: &str,
    ) -> Result<MessageId, ChatError>;
    async fn upsert_user(&self, identity: &Identity) -> Result<(), ChatError>;
}

pub struct MissingStoreWriter;

#[async_trait]
impl StoreWriter for MissingStoreWriter {
    async fn append_message(
        &self,
        channel: &ChannelName,
        _sender_id: Option<&UserId>,
        _body: &str,
    ) -> Result<MessageId, ChatError> {
        Err(ChatError::send_failed(format!(
            "no store available for channel {channel}"
        )))
    }

    async fn upsert_user(&self, identity: &Identity) -> Result<(), ChatError> {
        Err(ChatError::backend_unavailable(format!(
            "no store available to register user {}",
            identity.id
        )))
    }
}

/// Device geolocation.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<GeoPoint>;
}

pub struct MissingLocationProvider;

#[async_trait]
impl LocationProvider for MissingLocationProvider {
    async fn current_position(&self) -> Result<GeoPoint> {
        Err(anyhow!("device location is unavailable"))
    }
}

/// Reports the same position every time; for front-ends that are told
/// their location rather than measuring it.
pub struct FixedLocation(pub GeoPoint);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self) -> Result<GeoPoint> {
        Ok(self.0)
    }
}

pub fn location_message_body(point: &GeoPoint) -> String {
    format!("My current location: {}", point.maps_url())
}

/// Outbound surface of the chat core: the live view of a channel plus the
/// write operations.
///
/// Sends are fire-and-forget with respect to live sequences. A successful
/// send returns the store-assigned id but produces no view; the message shows
/// up in every open sequence, the sender's included, only once the store
/// echoes it back through the subscription.
pub struct ChatService {
    engine: SyncEngine,
    writer: Arc<dyn StoreWriter>,
    identity: Arc<dyn IdentityProvider>,
    location: Arc<dyn LocationProvider>,
    channel: ChannelName,
}

impl ChatService {
    pub fn new(backend: StoreBackend, identity: Arc<dyn IdentityProvider>) -> Self {
        let backend = Arc::new(backend);
        Self::new_with_dependencies(
            backend.clone(),
            backend.clone(),
            backend,
            identity,
            Arc::new(MissingLocationProvider),
            ChannelName::default(),
        )
    }

    pub fn new_with_dependencies(
        roster_loader: Arc<dyn RosterLoader>,
        subscriber: Arc<dyn MessageStreamSubscriber>,
        writer: Arc<dyn StoreWriter>,
        identity: Arc<dyn IdentityProvider>,
        location: Arc<dyn LocationProvider>,
        channel: ChannelName,
    ) -> Self {
        Self {
            engine: SyncEngine::new(roster_loader, subscriber, Arc::clone(&identity)),
            writer,
            identity,
            location,
            channel,
        }
    }

    pub fn with_location_provider(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = location;
        self
    }

    pub fn with_channel(mut self, channel: ChannelName) -> Self {
        self.channel = channel;
        self
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.identity.current_identity()
    }

    pub fn watch_identity(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.watch_identity()
    }

    /// A new, independent lifecycle over the service's channel.
    pub fn live_messages(&self) -> LiveMessages {
        self.engine.live_messages(self.channel.clone())
    }

    /// Posts `body` as the current identity. Signed-out sends are written
    /// without a sender and render as "Deleted".
    pub async fn send_message(&self, body: &str) -> Result<MessageId, ChatError> {
        let sender = self.identity.current_identity().map(|identity| identity.id);
        match self
            .writer
            .append_message(&self.channel, sender.as_ref(), body)
            .await
        {
            Ok(message_id) => {
                info!(
                    channel = %self.channel,
                    message_id = message_id.0,
                    "chat: message sent; awaiting echo"
                );
                Ok(message_id)
            }
            Err(err) => {
                warn!(channel = %self.channel, error = %err, "chat: send failed");
                Err(err)
            }
        }
    }

    /// Looks up the device position and posts it as a maps link.
    pub async fn send_location(&self) -> Result<MessageId, ChatError> {
        let point = self
            .location
            .current_position()
            .await
            .map_err(|err| ChatError::location_unavailable(format!("{err:#}")))?;
        self.send_message(&location_message_body(&point)).await
    }

    /// Adds the identity to the user collection so roster snapshots taken
    /// from now on can resolve it.
    pub async fn register(&self, identity: &Identity) -> Result<(), ChatError> {
        self.writer.upsert_user(identity).await?;
        info!(user_id = %identity.id, "chat: user registered");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
