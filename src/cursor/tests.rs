use bson::{doc, Document};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::error::DriverError;
use crate::options::{CursorType, Namespace};
use crate::test_util::{cursor_reply, error_reply, kill_reply, scripted_binding, MockChannel};

fn docs(range: std::ops::Range<i32>) -> Vec<Document> {
    range.map(|i| doc! { "i": i }).collect()
}

fn cursor_with(
    channel: &MockChannel,
    first: CursorBatch,
    limit: i64,
    batch_size: i32,
) -> BatchCursor<Document> {
    let (binding, source) = scripted_binding(channel.clone());
    BatchCursor::new(
        first,
        source,
        binding,
        CursorConfig {
            namespace: Namespace::new("app", "events"),
            limit,
            batch_size,
            max_time: None,
            cursor_type: CursorType::NonTailable,
        },
    )
}

#[tokio::test]
async fn test_limit_truncates_final_batch_and_kills_cursor() {
    let channel = MockChannel::new(8);
    channel.push_reply(cursor_reply(42, "app.events", false, docs(5..10), None));
    channel.push_reply(cursor_reply(42, "app.events", false, docs(10..15), None));
    channel.push_reply(kill_reply(&[42], &[]));

    let first = CursorBatch {
        cursor_id: 42,
        documents: docs(0..5),
        post_batch_resume_token: None,
    };
    let mut cursor = cursor_with(&channel, first, 12, 5);
    let cancel = CancellationToken::new();

    let mut total = 0;
    let mut batch_sizes = Vec::new();
    while cursor.move_next(&cancel).await.unwrap() {
        batch_sizes.push(cursor.current().len());
        total += cursor.current().len();
    }

    assert_eq!(batch_sizes, vec![5, 5, 2]);
    assert_eq!(total, 12);

    let names = channel.command_names();
    assert_eq!(names, vec!["getMore", "getMore", "killCursors"]);

    let commands = channel.commands();
    // Second getMore only asks for the two documents still permitted.
    assert_eq!(commands[1].1.get_i32("batchSize").unwrap(), 2);
    // The kill names the cursor id from the last reply.
    let kill = &commands[2].1;
    assert_eq!(kill.get_str("killCursors").unwrap(), "events");
    assert_eq!(kill.get_array("cursors").unwrap().len(), 1);
    assert_eq!(kill.get_array("cursors").unwrap()[0], bson::Bson::Int64(42));
}

#[tokio::test]
async fn test_empty_first_batch_yields_once_without_kill() {
    let channel = MockChannel::new(8);
    let first = CursorBatch {
        cursor_id: 0,
        documents: vec![],
        post_batch_resume_token: None,
    };
    let mut cursor = cursor_with(&channel, first, 0, 0);
    let cancel = CancellationToken::new();

    assert!(cursor.move_next(&cancel).await.unwrap());
    assert!(cursor.current().is_empty());
    assert!(cursor.was_first_batch_empty());
    assert!(!cursor.move_next(&cancel).await.unwrap());

    cursor.close().await;
    assert!(channel.commands().is_empty());
}

#[tokio::test]
async fn test_get_more_error_propagates_without_retry() {
    let channel = MockChannel::new(8);
    channel.push_reply(error_reply(10107, "node is not primary"));
    channel.push_reply(kill_reply(&[42], &[]));

    let first = CursorBatch {
        cursor_id: 42,
        documents: docs(0..3),
        post_batch_resume_token: None,
    };
    let mut cursor = cursor_with(&channel, first, 0, 0);
    let cancel = CancellationToken::new();

    assert!(cursor.move_next(&cancel).await.unwrap());
    assert_eq!(cursor.current().len(), 3);

    // A getMore belongs to an already-open cursor: the failure surfaces
    // as-is, with no transparent retry.
    let err = cursor.move_next(&cancel).await.unwrap_err();
    match err {
        DriverError::Server(e) => assert_eq!(e.code, 10107),
        other => panic!("expected server error, got {:?}", other),
    }
    assert_eq!(channel.command_names(), vec!["getMore"]);

    cursor.close().await;
}

#[tokio::test]
async fn test_get_more_cursor_not_found_is_typed() {
    let channel = MockChannel::new(8);
    channel.push_reply(error_reply(43, "cursor id 42 not found"));

    let first = CursorBatch {
        cursor_id: 42,
        documents: docs(0..1),
        post_batch_resume_token: None,
    };
    let mut cursor = cursor_with(&channel, first, 0, 0);
    let cancel = CancellationToken::new();

    assert!(cursor.move_next(&cancel).await.unwrap());
    let err = cursor.move_next(&cancel).await.unwrap_err();
    match err {
        DriverError::CursorNotFound { cursor_id, .. } => assert_eq!(cursor_id, 42),
        other => panic!("expected CursorNotFound, got {:?}", other),
    }

    cursor.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_never_fails() {
    let channel = MockChannel::new(8);
    // No scripted kill reply: the exchange fails and is swallowed.
    let first = CursorBatch {
        cursor_id: 42,
        documents: docs(0..1),
        post_batch_resume_token: None,
    };
    let mut cursor = cursor_with(&channel, first, 0, 0);

    cursor.close().await;
    cursor.close().await;
    assert_eq!(channel.command_names(), vec!["killCursors"]);
    assert_eq!(cursor.cursor_id(), 0);

    let cancel = CancellationToken::new();
    let err = cursor.move_next(&cancel).await.unwrap_err();
    assert!(matches!(err, DriverError::Disposed(_)));
}

#[tokio::test]
async fn test_kill_reply_not_found_is_swallowed() {
    let channel = MockChannel::new(8);
    channel.push_reply(kill_reply(&[], &[42]));

    let first = CursorBatch {
        cursor_id: 42,
        documents: vec![],
        post_batch_resume_token: None,
    };
    let mut cursor = cursor_with(&channel, first, 0, 0);
    cursor.close().await;
    assert_eq!(channel.command_names(), vec!["killCursors"]);
}

#[tokio::test]
async fn test_tailable_await_attaches_max_time_to_get_more() {
    let channel = MockChannel::new(8);
    channel.push_reply(cursor_reply(9, "app.events", false, docs(0..1), None));

    let (binding, source) = scripted_binding(channel.clone());
    let first = CursorBatch {
        cursor_id: 9,
        documents: vec![],
        post_batch_resume_token: None,
    };
    let mut cursor: BatchCursor<Document> = BatchCursor::new(
        first,
        source,
        binding,
        CursorConfig {
            namespace: Namespace::new("app", "events"),
            limit: 0,
            batch_size: 0,
            max_time: Some(std::time::Duration::from_millis(500)),
            cursor_type: CursorType::TailableAwait,
        },
    );
    let cancel = CancellationToken::new();

    assert!(cursor.move_next(&cancel).await.unwrap());
    assert!(cursor.move_next(&cancel).await.unwrap());

    let get_more = &channel.commands()[0].1;
    assert_eq!(get_more.get_i64("maxTimeMS").unwrap(), 500);
    assert!(get_more.get_i32("batchSize").is_err());

    cursor.close().await;
}

#[tokio::test]
async fn test_non_await_get_more_omits_max_time() {
    let channel = MockChannel::new(8);
    channel.push_reply(cursor_reply(0, "app.events", false, docs(0..1), None));

    let (binding, source) = scripted_binding(channel.clone());
    let first = CursorBatch {
        cursor_id: 9,
        documents: vec![],
        post_batch_resume_token: None,
    };
    let mut cursor: BatchCursor<Document> = BatchCursor::new(
        first,
        source,
        binding,
        CursorConfig {
            namespace: Namespace::new("app", "events"),
            limit: 0,
            batch_size: 0,
            max_time: Some(std::time::Duration::from_millis(500)),
            cursor_type: CursorType::NonTailable,
        },
    );
    let cancel = CancellationToken::new();

    assert!(cursor.move_next(&cancel).await.unwrap());
    assert!(cursor.move_next(&cancel).await.unwrap());
    assert!(!cursor.move_next(&cancel).await.unwrap());

    let get_more = &channel.commands()[0].1;
    assert!(get_more.get_i64("maxTimeMS").is_err());
}

#[tokio::test]
async fn test_cancellation_checked_before_io() {
    let channel = MockChannel::new(8);
    let first = CursorBatch {
        cursor_id: 42,
        documents: docs(0..1),
        post_batch_resume_token: None,
    };
    let mut cursor = cursor_with(&channel, first, 0, 0);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = cursor.move_next(&cancel).await.unwrap_err();
    assert!(matches!(err, DriverError::Cancelled));
    assert!(channel.commands().is_empty());

    cursor.close().await;
}

#[tokio::test]
async fn test_post_batch_resume_token_tracks_latest() {
    let channel = MockChannel::new(8);
    channel.push_reply(cursor_reply(
        5,
        "app.events",
        false,
        docs(0..1),
        Some(doc! { "_data": "02" }),
    ));
    // A reply without a token keeps the previous one.
    channel.push_reply(cursor_reply(0, "app.events", false, vec![], None));

    let first = CursorBatch {
        cursor_id: 5,
        documents: vec![],
        post_batch_resume_token: Some(doc! { "_data": "01" }),
    };
    let mut cursor = cursor_with(&channel, first, 0, 0);
    let cancel = CancellationToken::new();

    assert!(cursor.move_next(&cancel).await.unwrap());
    assert_eq!(
        cursor.post_batch_resume_token(),
        Some(&doc! { "_data": "01" })
    );

    assert!(cursor.move_next(&cancel).await.unwrap());
    assert_eq!(
        cursor.post_batch_resume_token(),
        Some(&doc! { "_data": "02" })
    );

    assert!(cursor.move_next(&cancel).await.unwrap());
    assert_eq!(
        cursor.post_batch_resume_token(),
        Some(&doc! { "_data": "02" })
    );
}
