mod common;

use std::sync::Arc;

use chatdeck_core::{
    Assembler, ChatError, CompletionError, CompletionErrorKind, MemoryRecordStore, Role, TurnOutcome,
    ValidationError, CURSOR,
};
use common::{dialogue, start, stored, Reply, ScriptedSource};

#[tokio::test]
async fn test_hello_turn_stores_user_then_assistant() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let source = ScriptedSource::new(vec![Reply::text(&["Hi", " there"])]);
    let assembler = Assembler::new(source.clone());

    let mut seen = Vec::new();
    let outcome = assembler
        .submit(&mut session, "hello", |fragment| seen.push(fragment.to_string()))
        .await
        .unwrap();

    assert_eq!(seen, vec!["Hi", " there"]);
    match outcome {
        TurnOutcome::Completed(message) => assert_eq!(message.content, "Hi there"),
        other => panic!("expected completion, got {:?}", other),
    }

    let expected = vec![(Role::User, "hello".to_string()), (Role::Assistant, "Hi there".to_string())];
    assert_eq!(stored(&store, "对话 1"), expected);
    assert_eq!(dialogue(session.active_messages()), expected);

    // The request carried the system prompt first, then the user message
    let requests = source.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0][0].role, Role::System);
    assert_eq!(requests[0][1].content, "hello");
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_unauthorized_keeps_only_user_message() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let source = ScriptedSource::new(vec![Reply::Refuse(CompletionError::from_status(
        401,
        r#"{"error":{"message":"Authentication Fails"}}"#,
    ))]);
    let assembler = Assembler::new(source);

    let err = assembler.submit(&mut session, "hello", |_| {}).await.unwrap_err();
    match err {
        ChatError::Completion(e) => assert_eq!(e.kind, CompletionErrorKind::Unauthorized),
        other => panic!("expected completion error, got {:?}", other),
    }

    let expected = vec![(Role::User, "hello".to_string())];
    assert_eq!(stored(&store, "对话 1"), expected);
    assert_eq!(dialogue(session.active_messages()), expected);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_partial_stream_is_stored_incomplete() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let source = ScriptedSource::new(vec![Reply::broken(&["Hi", " th"], CompletionErrorKind::NetworkError)]);
    let assembler = Assembler::new(source);

    let outcome = assembler.submit(&mut session, "hello", |_| {}).await.unwrap();
    match outcome {
        TurnOutcome::Interrupted {
            partial: Some(message),
            error,
        } => {
            assert_eq!(message.content, "Hi th");
            assert!(message.incomplete);
            assert_eq!(error.kind, CompletionErrorKind::NetworkError);
        }
        other => panic!("expected interrupted turn, got {:?}", other),
    }

    let last = session.active_messages().last().unwrap();
    assert!(last.incomplete);
    let rows = store.rows();
    let (_, stored_reply) = rows.last().unwrap();
    assert_eq!(stored_reply.content, "Hi th");
    assert!(stored_reply.incomplete);
}

#[tokio::test]
async fn test_error_before_any_text_commits_nothing() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let source = ScriptedSource::new(vec![Reply::broken(&[], CompletionErrorKind::RateLimited)]);
    let assembler = Assembler::new(source);

    let outcome = assembler.submit(&mut session, "hello", |_| {}).await.unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::Interrupted { partial: None, ref error } if error.kind == CompletionErrorKind::RateLimited
    ));
    assert_eq!(stored(&store, "对话 1"), vec![(Role::User, "hello".to_string())]);
}

#[tokio::test]
async fn test_dropped_turn_commits_nothing_and_releases_session() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let source = ScriptedSource::new(vec![Reply::text(&["Hi", " there"]), Reply::text(&["again"])]);
    let assembler = Assembler::new(source);

    let mut turn = assembler.begin(&mut session, "hello").await.unwrap();
    assert_eq!(turn.next_fragment().await.as_deref(), Some("Hi"));
    assert_eq!(turn.display_text(), format!("Hi{}", CURSOR));
    assert!(session.is_busy());
    assert!(matches!(
        session.create().await,
        Err(ChatError::Validation(ValidationError::Busy))
    ));

    drop(turn);
    assert!(!session.is_busy());
    assert_eq!(stored(&store, "对话 1"), vec![(Role::User, "hello".to_string())]);

    // The session is usable again
    assembler.submit(&mut session, "once more", |_| {}).await.unwrap();
    assert_eq!(dialogue(session.active_messages()).last().unwrap().1, "again");
}

#[tokio::test]
async fn test_second_turn_while_streaming_is_busy() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let source = ScriptedSource::new(vec![Reply::text(&["one"]), Reply::text(&["two"])]);
    let assembler = Assembler::new(source);

    let turn = assembler.begin(&mut session, "first").await.unwrap();
    let err = assembler.begin(&mut session, "second").await.err().unwrap();
    assert!(matches!(err, ChatError::Validation(ValidationError::Busy)));

    turn.commit(&mut session).await.unwrap();
    assert_eq!(
        dialogue(session.active_messages()),
        vec![(Role::User, "first".to_string()), (Role::Assistant, "one".to_string())]
    );
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let assembler = Assembler::new(ScriptedSource::new(vec![]));

    let err = assembler.submit(&mut session, "   \n", |_| {}).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(ValidationError::EmptyMessage)));
    assert!(dialogue(session.active_messages()).is_empty());
}

#[tokio::test]
async fn test_user_message_store_failure_leaves_cache_unchanged() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let source = ScriptedSource::new(vec![Reply::text(&["never"])]);
    let assembler = Assembler::new(source.clone());

    store.fail_writes_after(Some(0));
    let err = assembler.submit(&mut session, "hello", |_| {}).await.unwrap_err();
    assert!(matches!(err, ChatError::Persistence(_)));
    assert!(dialogue(session.active_messages()).is_empty());
    assert!(source.requests().is_empty());
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_reply_store_failure_leaves_cache_without_reply() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let assembler = Assembler::new(ScriptedSource::new(vec![Reply::text(&["Hi"])]));

    let turn = assembler.begin(&mut session, "hello").await.unwrap();
    store.fail_writes_after(Some(0));
    let err = turn.commit(&mut session).await.unwrap_err();
    assert!(matches!(err, ChatError::Persistence(_)));

    assert_eq!(dialogue(session.active_messages()), vec![(Role::User, "hello".to_string())]);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_turns_go_to_the_selected_conversation() {
    let store = MemoryRecordStore::new();
    let mut session = start(&store).await;
    let assembler = Assembler::new(Arc::new(ScriptedSource::default()));
    let second = session.create().await.unwrap();

    assembler.submit(&mut session, "in second", |_| {}).await.unwrap();
    assert_eq!(stored(&store, &second).first().unwrap().1, "in second");
    assert!(stored(&store, "对话 1").is_empty());
}
