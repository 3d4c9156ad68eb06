use std::sync::Mutex;

use futures::{FutureExt, StreamExt};
use shared::{
    domain::{Timestamp, User},
    error::ErrorCode,
    protocol::RawMessage,
};

use super::*;

#[derive(Default)]
struct RecordingWriter {
    appended: Mutex<Vec<(ChannelName, Option<UserId>, String)>>,
    registered: Mutex<Vec<Identity>>,
    fail_with: Option<ChatError>,
}

impl RecordingWriter {
    fn failing(error: ChatError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }

    fn appended(&self) -> Vec<(ChannelName, Option<UserId>, String)> {
        self.appended.lock().expect("appended lock").clone()
    }
}

#[async_trait]
impl StoreWriter for RecordingWriter {
    async fn append_message(
        &self,
        channel: &ChannelName,
        sender_id: Option<&UserId>,
        body: &str,
    ) -> Result<MessageId, ChatError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        let mut appended = self.appended.lock().expect("appended lock");
        appended.push((channel.clone(), sender_id.cloned(), body.to_string()));
        Ok(MessageId(appended.len() as i64))
    }

    async fn upsert_user(&self, identity: &Identity) -> Result<(), ChatError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.registered
            .lock()
            .expect("registered lock")
            .push(identity.clone());
        Ok(())
    }
}

struct FixedRoster(Vec<User>);

#[async_trait]
impl RosterLoader for FixedRoster {
    async fn load_roster(&self) -> Result<Vec<User>, ChatError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct CapturingSubscriber {
    sinks: Mutex<Vec<UpdateSink>>,
}

impl MessageStreamSubscriber for CapturingSubscriber {
    fn subscribe(&self, _channel: &ChannelName, callbacks: SubscriptionCallbacks) -> Subscription {
        let sink = UpdateSink::new(callbacks);
        self.sinks.lock().expect("sinks lock").push(sink.clone());
        Subscription::new(sink)
    }
}

struct Fixture {
    writer: Arc<RecordingWriter>,
    subscriber: Arc<CapturingSubscriber>,
    identity: Arc<SessionIdentity>,
    service: ChatService,
}

fn fixture(writer: RecordingWriter) -> Fixture {
    let writer = Arc::new(writer);
    let subscriber = Arc::new(CapturingSubscriber::default());
    let identity = Arc::new(SessionIdentity::signed_in(Identity::new("u1", "a@x")));
    let service = ChatService::new_with_dependencies(
        Arc::new(FixedRoster(vec![User {
            id: UserId::from("u1"),
            display_label: "a@x".into(),
        }])),
        subscriber.clone(),
        writer.clone(),
        identity.clone(),
        Arc::new(MissingLocationProvider),
        ChannelName::default(),
    );
    Fixture {
        writer,
        subscriber,
        identity,
        service,
    }
}

#[tokio::test]
async fn send_message_uses_current_identity_as_sender() {
    let f = fixture(RecordingWriter::default());

    let message_id = f.service.send_message("hello").await.expect("send");

    assert_eq!(message_id, MessageId(1));
    assert_eq!(
        f.writer.appended(),
        vec![(
            ChannelName::default(),
            Some(UserId::from("u1")),
            "hello".to_string()
        )]
    );
}

#[tokio::test]
async fn signed_out_send_is_written_without_sender() {
    let f = fixture(RecordingWriter::default());
    f.identity.sign_out();

    f.service.send_message("who am i").await.expect("send");

    assert_eq!(f.writer.appended()[0].1, None);
}

#[tokio::test]
async fn send_failure_reaches_only_the_caller() {
    let error = ChatError::send_failed("disk full");
    let f = fixture(RecordingWriter::failing(error.clone()));
    let mut live = f.service.live_messages();
    assert!(live.next().now_or_never().is_none());

    assert_eq!(f.service.send_message("lost").await, Err(error));
    assert_eq!(live.phase(), LifecyclePhase::Subscribed);
    assert!(live.next().now_or_never().is_none(), "live sequence untouched");
}

#[tokio::test]
async fn sent_message_appears_only_after_the_store_echoes_it() {
    let f = fixture(RecordingWriter::default());
    let mut live = f.service.live_messages();
    assert!(live.next().now_or_never().is_none());

    let message_id = f.service.send_message("echo me").await.expect("send");
    assert!(
        live.next().now_or_never().is_none(),
        "send must not insert a view by itself"
    );

    let sink = f.subscriber.sinks.lock().expect("sinks lock")[0].clone();
    sink.deliver(vec![RawMessage {
        id: message_id,
        channel: ChannelName::default(),
        sender_id: Some(UserId::from("u1")),
        body: "echo me".into(),
        created_at: Some(Timestamp(1)),
    }]);
    let views = live.next().await.expect("item").expect("views");
    assert_eq!(views.len(), 1);
    assert!(views[0].is_own_message);
    assert_eq!(views[0].sender_label, "a@x");
}

#[tokio::test]
async fn send_location_posts_a_maps_link() {
    let f = fixture(RecordingWriter::default());
    let service = f
        .service
        .with_location_provider(Arc::new(FixedLocation(GeoPoint {
            lat: 40.4168,
            lng: -3.7038,
        })));

    service.send_location().await.expect("send location");

    assert_eq!(
        f.writer.appended()[0].2,
        "My current location: https://www.google.com/maps?q=40.4168,-3.7038"
    );
}

#[tokio::test]
async fn location_failure_sends_nothing() {
    let f = fixture(RecordingWriter::default());

    let err = f.service.send_location().await.expect_err("no location");

    assert_eq!(err.code(), ErrorCode::LocationUnavailable);
    assert!(err.message().contains("device location is unavailable"));
    assert!(f.writer.appended().is_empty());
}

#[tokio::test]
async fn register_writes_the_user_record() {
    let f = fixture(RecordingWriter::default());
    let identity = Identity::new("u7", "g@x");

    f.service.register(&identity).await.expect("register");

    assert_eq!(
        f.writer.registered.lock().expect("registered lock").as_slice(),
        &[identity]
    );
}

#[tokio::test]
async fn missing_writer_fails_sends_with_send_failed() {
    let err = MissingStoreWriter
        .append_message(&ChannelName::default(), None, "x")
        .await
        .expect_err("missing writer");
    assert_eq!(err.code(), ErrorCode::SendFailed);
}
