//! 需要本地 PostgreSQL：
//! `CHATLINE_TEST_DATABASE_URL=postgres://... cargo test -p infrastructure -- --ignored`

use std::sync::Arc;

use application::ChatStore;
use chrono::Utc;
use domain::{
    Chat, ChatId, Emoji, Message, MessageContent, MessageId, MessageKind, Reaction,
    RepositoryError, UserId,
};
use infrastructure::{create_pg_pool, PgChatStore, MIGRATOR};

async fn store() -> PgChatStore {
    let database_url = std::env::var("CHATLINE_TEST_DATABASE_URL")
        .expect("CHATLINE_TEST_DATABASE_URL must point at a disposable database");
    let pool = create_pg_pool(&database_url, 10).await.expect("pool");
    MIGRATOR.run(&pool).await.expect("migrations");
    PgChatStore::new(pool)
}

fn draft(chat_id: ChatId, sender: UserId, text: &str) -> Message {
    Message::draft(
        MessageId::generate(),
        chat_id,
        sender,
        MessageContent::parse(text, 5000).unwrap(),
        MessageKind::Text,
        serde_json::json!({ "client": "test" }),
        None,
        Utc::now(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires a postgres database"]
async fn message_lifecycle_round_trip() {
    let store = store().await;
    let (alice, bob) = (UserId::generate(), UserId::generate());
    let chat = Chat::direct(ChatId::generate(), alice, bob, Utc::now()).unwrap();
    let chat_id = chat.id;
    store.insert_chat(&chat).await.unwrap();
    assert_eq!(store.insert_chat(&chat).await, Err(RepositoryError::Conflict));

    let first = store
        .save_message(draft(chat_id, alice, "hello"), vec![bob])
        .await
        .unwrap();
    let second = store
        .save_message(draft(chat_id, alice, "again"), vec![bob])
        .await
        .unwrap();
    assert_eq!(first.message.sequence, 1);
    assert_eq!(second.message.sequence, 2);
    assert_eq!(second.unread_counts[&bob], 2);
    assert_eq!(second.unread_counts[&alice], 0);

    let stored = store.get_chat(chat_id).await.unwrap().unwrap();
    assert_eq!(stored.participants, chat.participants);
    assert_eq!(
        stored.last_message.map(|last| last.message_id),
        Some(second.message.id)
    );

    let ids = vec![first.message.id, second.message.id];
    let marks = store.mark_read(chat_id, bob, ids.clone()).await.unwrap();
    assert_eq!(marks.newly_read.len(), 2);
    assert_eq!(marks.unread_counts[&bob], 0);
    let again = store.mark_read(chat_id, bob, ids.clone()).await.unwrap();
    assert!(again.newly_read.is_empty());

    // 会话不存在时整个事务回滚，已读集合不变
    let third = store
        .save_message(draft(chat_id, alice, "third"), vec![bob])
        .await
        .unwrap();
    assert_eq!(
        store
            .mark_read(ChatId::generate(), bob, vec![third.message.id])
            .await,
        Err(RepositoryError::NotFound)
    );
    let third = store.get_message(third.message.id).await.unwrap().unwrap();
    assert!(!third.read_by.contains(&bob));

    let reaction = Reaction {
        emoji: Emoji::parse("👍").unwrap(),
        reacted_at: Utc::now(),
    };
    store
        .upsert_reaction(first.message.id, bob, reaction)
        .await
        .unwrap();

    let loaded = store.get_messages(ids).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded[0].read_by.contains(&bob));
    assert_eq!(
        loaded[0].reaction_of(bob).map(|r| r.emoji.as_str().to_string()),
        Some("👍".to_string())
    );
    assert_eq!(loaded[0].metadata["client"], "test");

    assert!(store.remove_reaction(first.message.id, bob).await.unwrap());
    assert!(!store.remove_reaction(first.message.id, bob).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a postgres database"]
async fn concurrent_saves_keep_sequences_and_counters() {
    let store = Arc::new(store().await);
    let users: Vec<UserId> = (0..4).map(|_| UserId::generate()).collect();
    let chat = Chat::group(ChatId::generate(), users.clone(), Utc::now()).unwrap();
    let chat_id = chat.id;
    store.insert_chat(&chat).await.unwrap();

    let mut tasks = Vec::new();
    for sender in users.clone() {
        let store = store.clone();
        let recipients = chat.unread_recipients(sender);
        tasks.push(tokio::spawn(async move {
            for n in 0..10 {
                store
                    .save_message(draft(chat_id, sender, &format!("m{n}")), recipients.clone())
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let chat = store.get_chat(chat_id).await.unwrap().unwrap();
    for user in &users {
        assert_eq!(chat.unread_for(*user), 30);
    }
}

#[tokio::test]
#[ignore = "requires a postgres database"]
async fn presence_keeps_custom_status_until_cleared() {
    let store = store().await;
    let user = UserId::generate();

    store
        .set_user_status(user, true, Utc::now(), Some("  focused ".into()))
        .await
        .unwrap();
    let kept = store.set_user_status(user, false, Utc::now(), None).await.unwrap();
    assert!(!kept.online);
    assert_eq!(kept.custom_status.as_deref(), Some("focused"));

    let cleared = store
        .set_user_status(user, true, Utc::now(), Some(String::new()))
        .await
        .unwrap();
    assert_eq!(cleared.custom_status, None);
    assert!(cleared.online);
}
