use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use futures::{future::BoxFuture, Stream};
use shared::{
    domain::{ChannelName, User},
    error::ChatError,
    protocol::{MessageView, RawMessage},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    composer::compose,
    identity::IdentityProvider,
    roster::{Roster, RosterLoader},
    subscription::{MessageStreamSubscriber, Subscription, SubscriptionCallbacks},
};

type LiveItem = Result<Vec<MessageView>, ChatError>;

/// Observable phase of one lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Idle,
    LoadingRoster,
    Subscribed,
    Emitting,
    Failed,
    Cancelled,
}

/// Produces independent live view-model sequences for channels.
///
/// Every [`SyncEngine::live_messages`] call is its own lifecycle with its own
/// roster snapshot and subscription; nothing is shared between them.
#[derive(Clone)]
pub struct SyncEngine {
    roster_loader: Arc<dyn RosterLoader>,
    subscriber: Arc<dyn MessageStreamSubscriber>,
    identity: Arc<dyn IdentityProvider>,
    next_lifecycle: Arc<AtomicU64>,
}

impl SyncEngine {
    pub fn new(
        roster_loader: Arc<dyn RosterLoader>,
        subscriber: Arc<dyn MessageStreamSubscriber>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            roster_loader,
            subscriber,
            identity,
            next_lifecycle: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Lazy: nothing is fetched or opened until the sequence is first polled.
    pub fn live_messages(&self, channel: ChannelName) -> LiveMessages {
        LiveMessages {
            lifecycle: self.next_lifecycle.fetch_add(1, Ordering::Relaxed),
            channel,
            roster_loader: Arc::clone(&self.roster_loader),
            subscriber: Arc::clone(&self.subscriber),
            identity: Arc::clone(&self.identity),
            state: LifecycleState::Idle,
        }
    }
}

enum LifecycleState {
    Idle,
    LoadingRoster(BoxFuture<'static, Result<Vec<User>, ChatError>>),
    Subscribed {
        subscription: Subscription,
        updates: mpsc::UnboundedReceiver<LiveItem>,
        emitted: bool,
    },
    Failed,
    Cancelled,
}

/// Live, cancellable sequence of composed message sets for one channel.
///
/// Yields `Ok` for every update the subscriber delivers and at most one `Err`,
/// after which the sequence is finished. Dropping the sequence cancels it.
///
/// Every update is kept, so composed sets queue up while the consumer is not
/// polling. A consumer that stops reading for a long time should drop or
/// [`cancel`](LiveMessages::cancel) the sequence; queued sets are released
/// immediately.
pub struct LiveMessages {
    lifecycle: u64,
    channel: ChannelName,
    roster_loader: Arc<dyn RosterLoader>,
    subscriber: Arc<dyn MessageStreamSubscriber>,
    identity: Arc<dyn IdentityProvider>,
    state: LifecycleState,
}

impl LiveMessages {
    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn phase(&self) -> LifecyclePhase {
        match &self.state {
            LifecycleState::Idle => LifecyclePhase::Idle,
            LifecycleState::LoadingRoster(_) => LifecyclePhase::LoadingRoster,
            LifecycleState::Subscribed { emitted: false, .. } => LifecyclePhase::Subscribed,
            LifecycleState::Subscribed { emitted: true, .. } => LifecyclePhase::Emitting,
            LifecycleState::Failed => LifecyclePhase::Failed,
            LifecycleState::Cancelled => LifecyclePhase::Cancelled,
        }
    }

    /// Stops the lifecycle. The inner subscription is torn down before this
    /// returns and updates already queued are discarded. No-op once terminal.
    pub fn cancel(&mut self) {
        match std::mem::replace(&mut self.state, LifecycleState::Cancelled) {
            LifecycleState::Subscribed {
                mut subscription,
                updates,
                ..
            } => {
                subscription.unsubscribe();
                drop(updates);
                info!(
                    lifecycle = self.lifecycle,
                    channel = %self.channel,
                    "sync: lifecycle cancelled"
                );
            }
            LifecycleState::LoadingRoster(_) => {
                info!(
                    lifecycle = self.lifecycle,
                    channel = %self.channel,
                    "sync: lifecycle cancelled while loading roster"
                );
            }
            LifecycleState::Idle => {}
            LifecycleState::Failed => self.state = LifecycleState::Failed,
            LifecycleState::Cancelled => {}
        }
    }

    fn start_roster_load(&mut self) {
        info!(
            lifecycle = self.lifecycle,
            channel = %self.channel,
            "sync: loading roster snapshot"
        );
        let loader = Arc::clone(&self.roster_loader);
        self.state = LifecycleState::LoadingRoster(Box::pin(async move {
            loader.load_roster().await
        }));
    }

    fn open_subscription(&mut self, roster: Roster) {
        info!(
            lifecycle = self.lifecycle,
            channel = %self.channel,
            users = roster.len(),
            "sync: roster loaded; opening message subscription"
        );
        // Unbounded: every update must be emitted, in order.
        let (tx, updates) = mpsc::unbounded_channel();
        let error_tx = tx.clone();
        let identity = Arc::clone(&self.identity);
        let lifecycle = self.lifecycle;

        let callbacks = SubscriptionCallbacks::new(
            move |raw: Vec<RawMessage>| {
                let self_id = identity.current_identity().map(|identity| identity.id);
                let views = compose(&raw, &roster, self_id.as_ref());
                debug!(lifecycle, messages = views.len(), "sync: composed update");
                let _ = tx.send(Ok(views));
            },
            move |error: ChatError| {
                let _ = error_tx.send(Err(error));
            },
        );
        let subscription = self.subscriber.subscribe(&self.channel, callbacks);
        self.state = LifecycleState::Subscribed {
            subscription,
            updates,
            emitted: false,
        };
    }

    /// The subscriber dropped its callbacks without reporting a failure.
    fn end_of_updates(&mut self) {
        if let LifecycleState::Subscribed {
            mut subscription, ..
        } = std::mem::replace(&mut self.state, LifecycleState::Failed)
        {
            subscription.unsubscribe();
        }
        warn!(
            lifecycle = self.lifecycle,
            channel = %self.channel,
            "sync: subscriber closed the update feed without an error"
        );
    }

    fn fail(&mut self, error: &ChatError) {
        if let LifecycleState::Subscribed {
            mut subscription, ..
        } = std::mem::replace(&mut self.state, LifecycleState::Failed)
        {
            subscription.unsubscribe();
        }
        warn!(
            lifecycle = self.lifecycle,
            channel = %self.channel,
            error = %error,
            "sync: lifecycle failed"
        );
    }
}

impl Stream for LiveMessages {
    type Item = LiveItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                LifecycleState::Idle => this.start_roster_load(),
                LifecycleState::LoadingRoster(load) => match load.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(users)) => this.open_subscription(Roster::new(users)),
                    Poll::Ready(Err(error)) => {
                        this.fail(&error);
                        return Poll::Ready(Some(Err(error)));
                    }
                },
                LifecycleState::Subscribed {
                    updates, emitted, ..
                } => match updates.poll_recv(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Some(Ok(views))) => {
                        *emitted = true;
                        return Poll::Ready(Some(Ok(views)));
                    }
                    Poll::Ready(Some(Err(error))) => {
                        this.fail(&error);
                        return Poll::Ready(Some(Err(error)));
                    }
                    Poll::Ready(None) => {
                        this.end_of_updates();
                        return Poll::Ready(None);
                    }
                },
                LifecycleState::Failed | LifecycleState::Cancelled => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for LiveMessages {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
