//! Batching and flush tests
//!
//! - Append order is preserved inside a batch
//! - Overflow flushes the prior batch and retries exactly once
//! - Flush is idempotent
//! - Flush scheduling: next turn vs timer
//! - Same-stack mutations share one batch
//! - Encode-time validation is local to one mutation
//! - Dropping the context still resolves its mutations

mod common;

use std::time::Duration;

use aerodb_write::coordinator::Coordinator;
use aerodb_write::mutation::{FieldValue, OpKind, PendingPhase, HEADER_SIZE};
use aerodb_write::{WriteContext, WriteError};

use common::{
    blog_schema, blog_schema_with_hash, setup, test_config, MockCore, POST, SCHEMA_HASH, USER,
};

fn name_of(len: usize, tag: char) -> FieldValue {
    FieldValue::from(std::iter::repeat(tag).take(len).collect::<String>())
}

// User record with a 20-byte name:
// opcode 1 + type 2 + cursor 4 + body len 4 + unit (1 + 1 + 4 + 20) = 37
const USER_RECORD: usize = 37;

/// Test: N mutations issued in one tick land in one batch, in order.
#[tokio::test]
async fn test_append_order_preserved() {
    let core = MockCore::new();
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    let pending: Vec<_> = (0..20)
        .map(|i| {
            ctx.create(
                "User",
                [("name", FieldValue::from(format!("user-{}", i))), ("age", FieldValue::Int(i))],
            )
            .unwrap()
        })
        .collect();

    let mut ids = Vec::new();
    for p in &pending {
        ids.push(p.clone().await.unwrap());
    }

    let applied = core.applied();
    assert_eq!(applied.len(), 1);
    let stream = &applied[0].stream;
    assert_eq!(stream.header.count, 20);
    assert_eq!(stream.header.schema_hash, SCHEMA_HASH);
    for (i, mutation) in stream.mutations.iter().enumerate() {
        assert_eq!(mutation.op, OpKind::Create);
        assert_eq!(mutation.type_id, USER);
        assert_eq!(mutation.field(0).unwrap().as_str(), Some(format!("user-{}", i).as_str()));
        assert_eq!(mutation.field(1).unwrap().as_i64(), Some(i as i64));
    }
    assert_eq!(applied[0].ids, ids);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

/// Test: a mutation that overflows the buffer flushes the prior batch and
/// becomes the first entry of a fresh batch.
#[tokio::test]
async fn test_overflow_flushes_and_retries_once() {
    let core = MockCore::new();
    let config = test_config().with_max_buffer_bytes(HEADER_SIZE + 2 * USER_RECORD + 12);
    let (_coordinator, ctx) = setup(config, core.clone());

    let a = ctx.create("User", [("name", name_of(20, 'a'))]).unwrap();
    let b = ctx.create("User", [("name", name_of(20, 'b'))]).unwrap();
    assert_eq!(ctx.active_len(), HEADER_SIZE + 2 * USER_RECORD);

    let c = ctx.create("User", [("name", name_of(20, 'c'))]).unwrap();
    assert_eq!(ctx.active_count(), 1);
    assert_eq!(ctx.active_len(), HEADER_SIZE + USER_RECORD);
    assert_eq!(a.phase(), PendingPhase::Queued);
    assert_eq!(c.phase(), PendingPhase::Open);
    assert_eq!(c.temp_id(), Some(0));

    let metrics = ctx.metrics().snapshot();
    assert_eq!(metrics.overflow_flushes, 1);
    assert_eq!(metrics.batches_flushed, 1);
    assert_eq!(metrics.bytes_flushed, (HEADER_SIZE + 2 * USER_RECORD) as u64);

    for p in [&a, &b, &c] {
        assert!(p.clone().await.is_ok());
    }
    let applied = core.applied();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0].stream.header.count, 2);
    assert_eq!(applied[1].stream.header.count, 1);
    assert_eq!(applied[1].stream.mutations[0].field(0).unwrap().as_str(), Some("c".repeat(20).as_str()));
}

/// Test: a mutation too large for an empty batch fails synchronously.
#[tokio::test]
async fn test_value_too_large_for_empty_batch() {
    let core = MockCore::new();
    let config = test_config().with_max_buffer_bytes(128);
    let (_coordinator, ctx) = setup(config, core.clone());

    let result = ctx.create("Post", [("title", name_of(500, 't'))]);
    assert!(matches!(result, Err(WriteError::ValueTooLarge { max: 128, .. })));
    assert_eq!(ctx.active_len(), HEADER_SIZE);
    assert_eq!(ctx.metrics().snapshot().batches_flushed, 0);
}

/// Test: after an overflow flush the retry against the empty batch is
/// final; the prior batch still commits.
#[tokio::test]
async fn test_overflow_retry_does_not_recurse() {
    let core = MockCore::new();
    let config = test_config().with_max_buffer_bytes(128);
    let (_coordinator, ctx) = setup(config, core.clone());

    let small = ctx.create("User", [("name", name_of(4, 's'))]).unwrap();
    let result = ctx.create("Post", [("title", name_of(500, 't'))]);
    assert!(matches!(result, Err(WriteError::ValueTooLarge { .. })));

    let metrics = ctx.metrics().snapshot();
    assert_eq!(metrics.overflow_flushes, 1);
    assert_eq!(metrics.batches_flushed, 1);
    assert!(small.await.is_ok());
    assert_eq!(core.applied_count(), 1);
}

/// Test: flushing twice is a no-op the second time.
#[tokio::test]
async fn test_flush_is_idempotent() {
    let core = MockCore::new();
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    let user = ctx.create("User", [("name", FieldValue::from("x"))]).unwrap();
    ctx.flush().unwrap();
    ctx.flush().unwrap();
    assert_eq!(ctx.in_flight_batches(), 1);
    assert_eq!(ctx.metrics().snapshot().batches_flushed, 1);

    assert!(user.await.is_ok());
    ctx.flush().unwrap();
    assert_eq!(ctx.metrics().snapshot().batches_flushed, 1);
    assert_eq!(core.applied_count(), 1);
}

/// Test: zero delay flushes on the next scheduler turn.
#[tokio::test]
async fn test_zero_delay_flushes_next_turn() {
    let core = MockCore::new();
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    ctx.create("User", [("name", FieldValue::from("p"))]).unwrap();
    ctx.create("User", [("name", FieldValue::from("q"))]).unwrap();
    assert!(ctx.flush_pending());
    assert_eq!(ctx.active_count(), 2);

    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(ctx.active_count(), 0);
    assert!(!ctx.flush_pending());
    assert_eq!(ctx.metrics().snapshot().batches_flushed, 1);
}

/// Test: a positive delay holds the batch open until the timer fires.
#[tokio::test]
async fn test_positive_delay_waits_for_timer() {
    let core = MockCore::new();
    let config = test_config().with_flush_delay(Duration::from_millis(200));
    let (_coordinator, ctx) = setup(config, core.clone());

    let user = ctx.create("User", [("name", FieldValue::from("r"))]).unwrap();
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(ctx.active_count(), 1);
    assert!(ctx.flush_pending());

    let late = ctx.create("User", [("name", FieldValue::from("s"))]).unwrap();
    assert!(user.await.is_ok());
    assert!(late.await.is_ok());
    assert_eq!(core.applied().len(), 1);
    assert_eq!(core.applied()[0].stream.header.count, 2);
}

/// Test: a long synchronous run of creates lands in a single batch.
#[tokio::test]
async fn test_same_stack_creates_share_one_batch() {
    let core = MockCore::new();
    let config = test_config().with_max_buffer_bytes(16 * 1024 * 1024);
    let (_coordinator, ctx) = setup(config, core.clone());

    let mut last = None;
    for i in 0..20_000 {
        let name = FieldValue::from(format!("user-{}", i));
        last = Some(ctx.create("User", [("name", name)]).unwrap());
    }
    assert_eq!(ctx.active_count(), 20_000);
    assert!(last.unwrap().await.is_ok());

    let applied = core.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].stream.header.count, 20_000);
    assert_eq!(ctx.metrics().snapshot().overflow_flushes, 0);
}

/// Test: a zero flush delay is refused on a multi-thread runtime, where
/// the trigger could fire while the caller is still issuing mutations.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_zero_delay_needs_current_thread_runtime() {
    let core = MockCore::new();
    let config = test_config();
    let coordinator = Coordinator::start(&config, core).unwrap();

    let result = WriteContext::new(config.clone(), blog_schema(), coordinator.clone());
    assert!(matches!(result, Err(WriteError::UnsupportedRuntime(_))));

    let timed = config.with_flush_delay(Duration::from_millis(10));
    assert!(WriteContext::new(timed, blog_schema(), coordinator).is_ok());
}

/// Test: with a timer, same-stack creates on a multi-thread runtime are
/// not split before the caller flushes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timer_batching_on_multi_thread_runtime() {
    let core = MockCore::new();
    let config = test_config()
        .with_max_buffer_bytes(16 * 1024 * 1024)
        .with_flush_delay(Duration::from_secs(5));
    let (_coordinator, ctx) = setup(config, core.clone());

    let pending: Vec<_> = (0..2000)
        .map(|i| {
            ctx.create("User", [("name", FieldValue::from(format!("user-{}", i)))])
                .unwrap()
        })
        .collect();
    ctx.flush().unwrap();
    for p in pending {
        assert!(p.await.is_ok());
    }

    let applied = core.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].stream.header.count, 2000);
}

/// Test: validation failures are synchronous and do not touch siblings.
#[tokio::test]
async fn test_validation_error_is_local() {
    let core = MockCore::new();
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    let ok = ctx.create("User", [("name", FieldValue::from("ok"))]).unwrap();

    let missing = ctx.create("User", [("age", FieldValue::Int(3))]);
    assert!(matches!(missing, Err(WriteError::Validation { .. })));

    let wrong_kind = ctx.create("User", [("name", FieldValue::Int(3))]);
    assert!(matches!(wrong_kind, Err(WriteError::Validation { .. })));

    let too_long = ctx.create("User", [("name", name_of(65, 'z'))]);
    assert!(matches!(too_long, Err(WriteError::Validation { .. })));

    let unknown = ctx.create("Ghost", [("name", FieldValue::from("boo"))]);
    assert_eq!(unknown.unwrap_err(), WriteError::UnknownType("Ghost".into()));

    let bad_id = ctx.delete("User", 0u32);
    assert!(matches!(bad_id, Err(WriteError::Validation { .. })));

    assert_eq!(ctx.active_count(), 1);
    assert!(ok.await.is_ok());
    assert_eq!(ctx.metrics().snapshot().mutations_failed, 5);
}

/// Test: per-mutation core errors reach only their own futures.
#[tokio::test]
async fn test_core_modify_error_per_mutation() {
    let core = MockCore::new();
    core.reject_type(POST);
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    let user = ctx.create("User", [("name", FieldValue::from("u"))]).unwrap();
    let post = ctx.create("Post", [("title", FieldValue::from("p"))]).unwrap();

    assert!(user.await.is_ok());
    assert_eq!(post.await, Err(WriteError::Modify(4)));
}

/// Test: swapping the schema flushes the active batch first.
#[tokio::test]
async fn test_schema_swap_flushes_active_batch() {
    let core = MockCore::new();
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    let before = ctx.create("User", [("name", FieldValue::from("old"))]).unwrap();
    ctx.set_schema(blog_schema_with_hash(0xB10C_0002)).unwrap();
    assert_eq!(ctx.active_count(), 0);
    assert_eq!(ctx.in_flight_batches(), 1);
    assert_eq!(ctx.schema_hash(), 0xB10C_0002);

    let after = ctx.create("User", [("name", FieldValue::from("new"))]).unwrap();
    assert!(before.await.is_ok());
    assert!(after.await.is_ok());

    let applied = core.applied();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0].stream.header.schema_hash, SCHEMA_HASH);
    assert_eq!(applied[1].stream.header.schema_hash, 0xB10C_0002);
}

/// Test: a whole-batch core error fails every future in the batch.
#[tokio::test]
async fn test_core_error_fails_whole_batch() {
    let core = MockCore::new();
    core.fail_batches();
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    let a = ctx.create("User", [("name", FieldValue::from("a"))]).unwrap();
    let b = ctx.create("User", [("name", FieldValue::from("b"))]).unwrap();
    assert_eq!(a.await, Err(WriteError::Core("disk full".into())));
    assert_eq!(b.await, Err(WriteError::Core("disk full".into())));
}

/// Test: a short result table fails every future in the batch.
#[tokio::test]
async fn test_truncated_result_table() {
    let core = MockCore::new();
    core.truncate_results();
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    let a = ctx.create("User", [("name", FieldValue::from("a"))]).unwrap();
    let b = ctx.create("User", [("name", FieldValue::from("b"))]).unwrap();
    let expected = WriteError::ResultTableTruncated {
        expected: 10,
        actual: 5,
    };
    assert_eq!(a.await, Err(expected.clone()));
    assert_eq!(b.await, Err(expected));
}

/// Test: dropping the last context handle commits its open batch.
#[tokio::test]
async fn test_dropped_context_commits_open_batch() {
    let core = MockCore::new();
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    let user = ctx.create("User", [("name", FieldValue::from("kept"))]).unwrap();
    drop(ctx);

    let outcome = tokio::time::timeout(Duration::from_secs(2), user.wait()).await;
    assert!(matches!(outcome, Ok(Ok(_))));
    assert_eq!(core.applied_count(), 1);
}

/// Test: a mutation parked on an in-flight batch of a dropped context is
/// re-encoded and committed once that batch resolves.
#[tokio::test]
async fn test_dropped_context_commits_parked_dependent() {
    let core = MockCore::new();
    core.set_delay(Duration::from_millis(20));
    let (_coordinator, ctx) = setup(test_config(), core.clone());

    let user = ctx.create("User", [("name", FieldValue::from("root"))]).unwrap();
    ctx.flush().unwrap();
    let post = ctx.create("Post", [("author", FieldValue::from(&user))]).unwrap();
    assert_eq!(post.phase(), PendingPhase::Blocked);
    drop(ctx);

    let outcome = tokio::time::timeout(Duration::from_secs(2), post.wait()).await;
    assert!(matches!(outcome, Ok(Ok(_))));
    assert!(user.id().is_some());
    assert_eq!(core.applied_count(), 2);
}

/// Test: with the coordinator gone, a dropped context's mutations fail
/// instead of hanging.
#[tokio::test]
async fn test_dropped_context_after_shutdown_fails_mutations() {
    let core = MockCore::new();
    let (coordinator, ctx) = setup(test_config(), core.clone());

    let user = ctx.create("User", [("name", FieldValue::from("lost"))]).unwrap();
    coordinator.shutdown();
    drop(ctx);

    let outcome = tokio::time::timeout(Duration::from_secs(2), user.wait()).await;
    assert_eq!(outcome, Ok(Err(WriteError::CoordinatorClosed)));
    assert_eq!(core.applied_count(), 0);
}
