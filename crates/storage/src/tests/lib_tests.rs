use super::*;

fn general() -> ChannelName {
    ChannelName::default()
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("chat.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn upserts_and_lists_users() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .upsert_user(&UserId::from("u2"), "b@x.com")
        .await
        .expect("u2");
    storage
        .upsert_user(&UserId::from("u1"), "a@x.com")
        .await
        .expect("u1");
    storage
        .upsert_user(&UserId::from("u1"), "a+new@x.com")
        .await
        .expect("u1 again");

    let users = storage.list_users().await.expect("users");
    assert_eq!(
        users,
        vec![
            StoredUser {
                user_id: UserId::from("u1"),
                email: "a+new@x.com".into(),
            },
            StoredUser {
                user_id: UserId::from("u2"),
                email: "b@x.com".into(),
            },
        ]
    );
}

#[tokio::test]
async fn append_assigns_increasing_ids_and_times() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let sender = UserId::from("u1");

    let (first_id, first_at) = storage
        .append_message(&general(), Some(&sender), "first")
        .await
        .expect("first");
    let (second_id, second_at) = storage
        .append_message(&general(), Some(&sender), "second")
        .await
        .expect("second");

    assert!(second_id > first_id);
    assert!(second_at > first_at);
}

#[tokio::test]
async fn lists_channel_messages_in_write_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = UserId::from("alice");
    let bob = UserId::from("bob");

    for (sender, body) in [(&alice, "one"), (&bob, "two"), (&alice, "three")] {
        storage
            .append_message(&general(), Some(sender), body)
            .await
            .expect("append");
    }
    storage
        .append_message(&ChannelName::from("elsewhere"), Some(&bob), "not here")
        .await
        .expect("other channel");

    let messages = storage
        .list_channel_messages(&general())
        .await
        .expect("list");
    let bodies: Vec<_> = messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["one", "two", "three"]);
    assert_eq!(messages[1].sender_id.as_deref(), Some("bob"));
    assert!(messages.iter().all(|m| m.created_at.is_some()));
}

#[tokio::test]
async fn keeps_unset_sender_as_null() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .append_message(&general(), None, "anonymous")
        .await
        .expect("append");

    let messages = storage
        .list_channel_messages(&general())
        .await
        .expect("list");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender_id, None);
}

#[tokio::test]
async fn append_publishes_channel_change() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut changes = storage.watch_changes();

    storage
        .append_message(&general(), Some(&UserId::from("u1")), "ping")
        .await
        .expect("append");

    let changed = changes.recv().await.expect("change notification");
    assert_eq!(changed, general());
}

#[test]
fn memory_urls_have_no_parent_dir() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/chat.db?mode=rwc"),
        Some(PathBuf::from("./data/chat.db"))
    );
}

#[tokio::test]
async fn lists_only_messages_after_a_known_id() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let sender = UserId::from("u1");
    let (first_id, _) = storage
        .append_message(&general(), Some(&sender), "seen")
        .await
        .expect("first");
    storage
        .append_message(&general(), Some(&sender), "new")
        .await
        .expect("second");

    let newer = storage
        .list_channel_messages_after(&general(), first_id)
        .await
        .expect("list after");
    assert_eq!(newer.len(), 1);
    assert_eq!(newer[0].body, "new");
}

#[tokio::test]
async fn notify_changed_reaches_watchers_without_touching_the_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut changes = storage.watch_changes();
    storage.pool().close().await;

    storage.notify_changed(&general());

    assert_eq!(changes.recv().await.expect("change"), general());
}
