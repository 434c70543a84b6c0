//! "Delete chat for me" hides history from one member and nobody else.

mod common;

use rollcall::{
    rooms::msg::{self, SortOrder},
    visibility::VisibilityGate,
    Rejected,
};

#[tokio::test]
async fn cutoff_hides_older_messages_only() {
    let db = common::test_db().await;
    let (alice, bob) = (common::user(&db.pool, "alice").await, common::user(&db.pool, "bob").await);
    let room = common::room_with(&db.pool, alice.id, &[bob.id]).await;
    let gate = VisibilityGate::new(db.pool.clone());

    let old = common::message_at(&db.pool, room, bob.id, 50).await;
    let new = common::message_at(&db.pool, room, bob.id, 150).await;

    assert_eq!(gate.delete_for_user_at(room, alice.id, 100).await.unwrap(), 100);

    let (seen, has_more) = msg::visible_page(&db.pool, &gate, room, alice.id, 1, 50, SortOrder::Asc)
        .await
        .unwrap();
    assert_eq!(seen, vec![new.clone()]);
    assert!(!has_more);

    let (seen, _) = msg::visible_page(&db.pool, &gate, room, bob.id, 1, 50, SortOrder::Asc)
        .await
        .unwrap();
    assert_eq!(seen, vec![old, new]);
}

#[tokio::test]
async fn deleting_twice_without_news_is_refused() {
    let db = common::test_db().await;
    let alice = common::user(&db.pool, "alice").await;
    let room = common::room_with(&db.pool, alice.id, &[]).await;
    let gate = VisibilityGate::new(db.pool.clone());

    common::message_at(&db.pool, room, alice.id, 50).await;
    gate.delete_for_user_at(room, alice.id, 100).await.unwrap();

    let err = gate.delete_for_user_at(room, alice.id, 200).await.unwrap_err();
    assert_eq!(err.rejection(), Some(&Rejected::AlreadyDeleted));
    assert_eq!(gate.cutoff(room, alice.id).await.unwrap(), Some(100));
}

#[tokio::test]
async fn a_new_message_rearms_delete() {
    let db = common::test_db().await;
    let (alice, bob) = (common::user(&db.pool, "alice").await, common::user(&db.pool, "bob").await);
    let room = common::room_with(&db.pool, alice.id, &[bob.id]).await;
    let gate = VisibilityGate::new(db.pool.clone());

    gate.delete_for_user_at(room, alice.id, 100).await.unwrap();
    common::message_at(&db.pool, room, bob.id, 150).await;

    assert_eq!(gate.delete_for_user_at(room, alice.id, 200).await.unwrap(), 200);
    let (seen, _) = msg::visible_page(&db.pool, &gate, room, alice.id, 1, 50, SortOrder::Desc)
        .await
        .unwrap();
    assert!(seen.is_empty());
}

#[tokio::test]
async fn cutoff_never_moves_backwards() {
    let db = common::test_db().await;
    let alice = common::user(&db.pool, "alice").await;
    let room = common::room_with(&db.pool, alice.id, &[]).await;
    let gate = VisibilityGate::new(db.pool.clone());

    gate.delete_for_user_at(room, alice.id, 300).await.unwrap();
    common::message_at(&db.pool, room, alice.id, 400).await;

    let cutoff = gate.delete_for_user_at(room, alice.id, 100).await.unwrap();
    assert!(cutoff >= 400);
}

#[tokio::test]
async fn repeat_delete_in_the_same_millisecond_hides_the_newer_message() {
    let db = common::test_db().await;
    let (alice, bob) = (common::user(&db.pool, "alice").await, common::user(&db.pool, "bob").await);
    let room = common::room_with(&db.pool, alice.id, &[bob.id]).await;
    let gate = VisibilityGate::new(db.pool.clone());

    gate.delete_for_user_at(room, alice.id, 1_000).await.unwrap();
    // stamped just past the cutoff, as the write path does
    let reply = common::message_at(&db.pool, room, bob.id, 1_001).await;

    assert_eq!(gate.delete_for_user_at(room, alice.id, 1_000).await.unwrap(), 1_001);
    let (seen, _) = msg::visible_page(&db.pool, &gate, room, alice.id, 1, 50, SortOrder::Asc)
        .await
        .unwrap();
    assert!(seen.is_empty());

    let (seen, _) = msg::visible_page(&db.pool, &gate, room, bob.id, 1, 50, SortOrder::Asc)
        .await
        .unwrap();
    assert_eq!(seen, vec![reply]);
}

#[tokio::test]
async fn messages_sent_after_delete_are_visible() {
    let db = common::test_db().await;
    let (alice, bob) = (common::user(&db.pool, "alice").await, common::user(&db.pool, "bob").await);
    let room = common::room_with(&db.pool, alice.id, &[bob.id]).await;
    let gate = VisibilityGate::new(db.pool.clone());

    common::message_at(&db.pool, room, bob.id, 10).await;
    // a cutoff slightly in the future must not swallow what comes next
    let cutoff = gate
        .delete_for_user_at(room, alice.id, rollcall::db::now_millis() + 5_000)
        .await
        .unwrap();

    let sent = msg::insert_message(&db.pool, room, bob.id, "still there?", Default::default())
        .await
        .unwrap();
    assert!(sent.created_at > cutoff);

    let visible = gate.visible_messages(room, alice.id, vec![sent.clone()]).await.unwrap();
    assert_eq!(visible, vec![sent]);
}

#[tokio::test]
async fn pages_skip_hidden_history() {
    let db = common::test_db().await;
    let alice = common::user(&db.pool, "alice").await;
    let room = common::room_with(&db.pool, alice.id, &[]).await;
    let gate = VisibilityGate::new(db.pool.clone());

    for at in 1..=10 {
        common::message_at(&db.pool, room, alice.id, at * 10).await;
    }
    gate.delete_for_user_at(room, alice.id, 50).await.unwrap();

    let (first, has_more) = msg::visible_page(&db.pool, &gate, room, alice.id, 1, 3, SortOrder::Asc)
        .await
        .unwrap();
    assert_eq!(first.iter().map(|m| m.created_at).collect::<Vec<_>>(), [60, 70, 80]);
    assert!(has_more);

    let (second, has_more) = msg::visible_page(&db.pool, &gate, room, alice.id, 2, 3, SortOrder::Asc)
        .await
        .unwrap();
    assert_eq!(second.iter().map(|m| m.created_at).collect::<Vec<_>>(), [90, 100]);
    assert!(!has_more);
}
