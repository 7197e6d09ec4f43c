mod common;

use std::collections::BTreeSet;

use chatdeck_core::{ChatError, MemoryRecordStore, Message, RecordStore, Role, ValidationError};
use common::{dialogue, start, stored};

#[tokio::test]
async fn test_start_on_empty_store_uses_default_id() {
    let store = MemoryRecordStore::new();
    let session = start(&store).await;

    assert_eq!(session.active_id(), "对话 1");
    assert_eq!(session.list(), vec!["对话 1".to_string()]);
    assert_eq!(session.active_messages().len(), 1);
    assert_eq!(session.active_messages()[0].role, Role::System);
    // Marker row makes the conversation visible to later sessions
    assert_eq!(
        store.conversation_ids().await.unwrap(),
        BTreeSet::from(["对话 1".to_string()])
    );
}

#[tokio::test]
async fn test_start_picks_first_stored_conversation() {
    let store = MemoryRecordStore::new();
    store.insert_message("对话 3", &Message::user("three")).await.unwrap();
    store.insert_message("对话 2", &Message::user("two")).await.unwrap();
    store.insert_message("notes", &Message::user("n")).await.unwrap();

    let session = start(&store).await;
    assert_eq!(session.active_id(), "对话 2");
    assert_eq!(dialogue(session.active_messages()), vec![(Role::User, "two".to_string())]);
    assert_eq!(session.list(), vec!["对话 2", "对话 3", "notes"]);
}

#[tokio::test]
async fn test_start_degrades_when_store_unreachable() {
    let store = MemoryRecordStore::new();
    store.insert_message("对话 5", &Message::user("hidden")).await.unwrap();
    store.set_unreachable(true);

    let session = start(&store).await;
    assert_eq!(session.active_id(), "对话 1");
    assert_eq!(session.active_messages().len(), 1);
}

#[tokio::test]
async fn test_create_is_active_with_only_system_prompt() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;

    let id = session.create().await.unwrap();
    assert_eq!(session.active_id(), id);

    let messages = session.messages(&id).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[0].content, "You are a test assistant.");
}

#[tokio::test]
async fn test_two_creates_from_empty_store_are_distinct() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;

    let first = session.create().await.unwrap();
    let second = session.create().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(session.list(), vec!["对话 1", "对话 2", "对话 3"]);

    // A fresh session sees both through their marker rows
    let again = start(&store).await;
    assert!(again.list().contains(&first));
    assert!(again.list().contains(&second));
}

#[tokio::test]
async fn test_create_fills_gaps() {
    let store = MemoryRecordStore::new();
    store.insert_message("对话 1", &Message::system("")).await.unwrap();
    store.insert_message("对话 3", &Message::system("")).await.unwrap();

    let mut session = start(&store).await;
    assert_eq!(session.create().await.unwrap(), "对话 2");
}

#[tokio::test]
async fn test_failed_create_changes_nothing() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    store.fail_writes_after(Some(0));

    let err = session.create().await.unwrap_err();
    assert!(matches!(err, ChatError::Persistence(_)));
    assert_eq!(session.active_id(), "对话 1");
    assert_eq!(session.list(), vec!["对话 1"]);
}

#[tokio::test]
async fn test_create_while_store_unreachable_adds_nothing() {
    let store = MemoryRecordStore::new();
    store.insert_message("foo", &Message::user("only one")).await.unwrap();
    let mut session = start(&store).await;

    store.set_unreachable(true);
    let err = session.create().await.unwrap_err();
    assert!(matches!(err, ChatError::Persistence(_)));
    assert_eq!(session.list(), vec!["foo"]);
    store.set_unreachable(false);

    let err = session.delete("foo").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(ValidationError::LastConversation)));
    assert_eq!(stored(&store, "foo"), vec![(Role::User, "only one".to_string())]);
}

#[tokio::test]
async fn test_delete_last_conversation_is_rejected() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;

    let err = session.delete("对话 1").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(ValidationError::LastConversation)));
    assert_eq!(session.list(), vec!["对话 1"]);
}

#[tokio::test]
async fn test_delete_active_moves_to_first_remaining() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let second = session.create().await.unwrap();
    assert_eq!(session.active_id(), second);

    session.delete(&second).await.unwrap();
    assert_eq!(session.active_id(), "对话 1");
    assert!(!session.list().contains(&second));
    assert!(store.list_messages(&second).await.unwrap().is_empty());
    assert!(matches!(session.messages(&second), Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_unknown_is_not_found() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    session.create().await.unwrap();

    assert!(matches!(session.delete("ghost").await, Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn test_rename_then_select_matches_old_contents() {
    let store = MemoryRecordStore::new();
    store.insert_message("对话 1", &Message::user("hello")).await.unwrap();
    store.insert_message("对话 1", &Message::assistant("Hi there")).await.unwrap();
    let mut session = start(&store).await;
    session.create().await.unwrap();

    let before = dialogue(session.messages("对话 1").unwrap());
    session.rename("对话 1", "greetings").await.unwrap();

    session.select("greetings").await.unwrap();
    assert_eq!(dialogue(session.active_messages()), before);
    assert!(!session.list().contains(&"对话 1".to_string()));
    assert!(matches!(session.select("对话 1").await, Err(ChatError::NotFound(_))));
    assert_eq!(stored(&store, "greetings"), before);
    assert!(stored(&store, "对话 1").is_empty());
}

#[tokio::test]
async fn test_rename_active_keeps_it_active() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;

    session.rename("对话 1", "  work  ").await.unwrap();
    assert_eq!(session.active_id(), "work");
    assert_eq!(session.active_messages().len(), 1);
}

#[tokio::test]
async fn test_rename_validation() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let second = session.create().await.unwrap();

    assert!(matches!(
        session.rename("对话 1", &second).await,
        Err(ChatError::Validation(ValidationError::DuplicateId(_)))
    ));
    assert!(matches!(
        session.rename("对话 1", "   ").await,
        Err(ChatError::Validation(ValidationError::InvalidId(_)))
    ));
    assert!(matches!(session.rename("ghost", "x").await, Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn test_rename_store_failure_leaves_cache_untouched() {
    let store = MemoryRecordStore::new();
    store.insert_message("对话 1", &Message::user("keep me")).await.unwrap();
    let mut session = start(&store).await;
    let before = session.list();

    store.set_unreachable(true);
    let err = session.rename("对话 1", "renamed").await.unwrap_err();
    assert!(matches!(err, ChatError::Persistence(_)));

    assert_eq!(session.active_id(), "对话 1");
    assert_eq!(session.list(), before);
    assert_eq!(
        dialogue(session.messages("对话 1").unwrap()),
        vec![(Role::User, "keep me".to_string())]
    );
    assert!(matches!(session.messages("renamed"), Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn test_refresh_picks_up_other_sessions() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    store.insert_message("shared", &Message::user("from elsewhere")).await.unwrap();

    session.refresh().await.unwrap();
    assert!(session.list().contains(&"shared".to_string()));

    session.select("shared").await.unwrap();
    assert_eq!(
        dialogue(session.active_messages()),
        vec![(Role::User, "from elsewhere".to_string())]
    );
}

#[tokio::test]
async fn test_select_finds_conversation_started_elsewhere() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    store.insert_message("shared", &Message::user("from elsewhere")).await.unwrap();

    session.select("shared").await.unwrap();
    assert_eq!(session.active_id(), "shared");
    assert_eq!(
        dialogue(session.active_messages()),
        vec![(Role::User, "from elsewhere".to_string())]
    );
    assert!(session.list().contains(&"shared".to_string()));

    assert!(matches!(session.select("nowhere").await, Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let store = MemoryRecordStore::new();
    store.insert_message("对话 1", &Message::user("what is 2+2?")).await.unwrap();
    store.insert_message("对话 1", &Message::assistant("4")).await.unwrap();
    store.insert_message("对话 1", &Message::user("谢谢")).await.unwrap();
    let mut session = start(&store).await;

    let text = session.export("对话 1").await.unwrap();
    assert_eq!(text, "user: what is 2+2?\nassistant: 4\nuser: 谢谢");

    let target = session.create().await.unwrap();
    let report = session.import(&target, &text).await.unwrap();
    assert_eq!(report.imported, 3);
    assert!(report.skipped.is_empty());

    let original = dialogue(session.messages("对话 1").unwrap());
    assert_eq!(dialogue(session.messages(&target).unwrap()), original);
    assert_eq!(session.messages(&target).unwrap()[0].role, Role::System);
    assert_eq!(stored(&store, &target), original);
}

#[tokio::test]
async fn test_import_replaces_and_reports_bad_lines() {
    let store = MemoryRecordStore::new();
    store.insert_message("对话 1", &Message::user("old")).await.unwrap();
    let mut session = start(&store).await;

    let report = session
        .import("对话 1", "user: new\nnonsense here\n\nassistant: reply")
        .await
        .unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].line, 2);

    let expected = vec![(Role::User, "new".to_string()), (Role::Assistant, "reply".to_string())];
    assert_eq!(dialogue(session.active_messages()), expected);
    assert_eq!(stored(&store, "对话 1"), expected);
}

#[tokio::test]
async fn test_failed_import_keeps_existing_history() {
    let store = MemoryRecordStore::new();
    store.insert_message("notes", &Message::user("keep me")).await.unwrap();
    let mut session = start(&store).await;
    assert_eq!(session.active_id(), "notes");

    // The marker is written, the imported message is not
    store.fail_writes_after(Some(1));
    let err = session.import("notes", "user: new").await.unwrap_err();
    assert!(matches!(err, ChatError::Persistence(_)));
    store.fail_writes_after(None);

    let kept = vec![(Role::User, "keep me".to_string())];
    assert_eq!(stored(&store, "notes"), kept);
    assert_eq!(dialogue(session.active_messages()), kept);

    let reopened = start(&store).await;
    assert!(reopened.list().contains(&"notes".to_string()));
    assert_eq!(dialogue(reopened.messages("notes").unwrap()), kept);
}

#[tokio::test]
async fn test_import_into_unknown_conversation() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    assert!(matches!(
        session.import("ghost", "user: hi").await,
        Err(ChatError::NotFound(_))
    ));
}
