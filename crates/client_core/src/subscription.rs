use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::{domain::ChannelName, error::ChatError, protocol::RawMessage};

type UpdateCallback = Box<dyn FnMut(Vec<RawMessage>) + Send>;
type ErrorCallback = Box<dyn FnOnce(ChatError) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

/// Live feed of a channel's full message set.
///
/// Implementations hand every change to `callbacks` as the complete message
/// set sorted with [`sort_chronologically`], report a subscription-level
/// failure at most once, and deliver only through the [`UpdateSink`] they
/// wrap into the returned [`Subscription`].
pub trait MessageStreamSubscriber: Send + Sync {
    fn subscribe(&self, channel: &ChannelName, callbacks: SubscriptionCallbacks) -> Subscription;
}

pub struct SubscriptionCallbacks {
    on_update: UpdateCallback,
    on_error: ErrorCallback,
}

impl SubscriptionCallbacks {
    pub fn new(
        on_update: impl FnMut(Vec<RawMessage>) + Send + 'static,
        on_error: impl FnOnce(ChatError) + Send + 'static,
    ) -> Self {
        Self {
            on_update: Box::new(on_update),
            on_error: Box::new(on_error),
        }
    }
}

enum SinkState {
    Open(SubscriptionCallbacks),
    Closed,
}

/// Delivery side of a subscription.
///
/// Callbacks run while the sink lock is held, so closing the sink waits for an
/// in-flight callback to finish and nothing is delivered once it returns.
#[derive(Clone)]
pub struct UpdateSink {
    state: Arc<Mutex<SinkState>>,
}

impl UpdateSink {
    pub fn new(callbacks: SubscriptionCallbacks) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState::Open(callbacks))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands a full message set to the owner. Returns `false` once the sink is
    /// closed, which tells the producer to stop.
    pub fn deliver(&self, messages: Vec<RawMessage>) -> bool {
        let mut guard = self.lock();
        match &mut *guard {
            SinkState::Open(callbacks) => {
                (callbacks.on_update)(messages);
                true
            }
            SinkState::Closed => false,
        }
    }

    /// Reports a terminal failure. The sink is closed afterwards; a second
    /// failure, or one after cancellation, is dropped.
    pub fn fail(&self, error: ChatError) -> bool {
        let mut guard = self.lock();
        match std::mem::replace(&mut *guard, SinkState::Closed) {
            SinkState::Open(callbacks) => {
                (callbacks.on_error)(error);
                true
            }
            SinkState::Closed => false,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.lock(), SinkState::Open(_))
    }

    fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock(), SinkState::Closed);
        // Callbacks are dropped outside the lock.
        drop(previous);
    }
}

/// Owner's handle to a live subscription.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    sink: UpdateSink,
    on_cancel: Option<CancelHook>,
}

impl Subscription {
    pub fn new(sink: UpdateSink) -> Self {
        Self {
            sink,
            on_cancel: None,
        }
    }

    /// Runs `hook` once, right after the sink is closed, to release producer
    /// resources (tasks, listeners).
    pub fn on_cancel(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    pub fn is_active(&self) -> bool {
        self.sink.is_open()
    }

    /// Idempotent. When this returns no callback of the subscription is
    /// running and none will run again. Must not be called from inside one of
    /// the subscription's own callbacks.
    pub fn unsubscribe(&mut self) {
        self.sink.close();
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Orders messages by write time, oldest first. Messages still waiting for
/// their store-assigned time are newest and go last; ties fall back to id.
pub fn sort_chronologically(messages: &mut [RawMessage]) {
    messages.sort_by(|a, b| {
        (a.created_at.is_none(), a.created_at, a.id).cmp(&(
            b.created_at.is_none(),
            b.created_at,
            b.id,
        ))
    });
}

/// Folds a batch of inserted records into the current full set, replacing
/// records whose id is already known, and restores chronological order.
pub fn merge_delta(current: &mut Vec<RawMessage>, inserted: Vec<RawMessage>) {
    for message in inserted {
        match current.iter_mut().find(|existing| existing.id == message.id) {
            Some(existing) => *existing = message,
            None => current.push(message),
        }
    }
    sort_chronologically(current);
}

#[cfg(test)]
#[path = "tests/subscription_tests.rs"]
mod tests;
