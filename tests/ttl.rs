//! TTL sweeping: expiry selection, pipeline deletes, stream markers.

mod common;

use common::*;
use pretenderdb::api::{
    GetRecordsRequest, GetShardIteratorRequest, TimeToLiveSpecification, UpdateTimeToLiveRequest,
};
use pretenderdb::streams::{ShardIteratorType, StreamEvent, SHARD_ID};
use pretenderdb::types::StreamViewType;
use pretenderdb::{FixedClock, PretenderDb};

async fn enable_ttl(db: &PretenderDb, table: &str) {
    db.update_time_to_live(UpdateTimeToLiveRequest {
        table_name: table.to_string(),
        time_to_live_specification: TimeToLiveSpecification {
            enabled: true,
            attribute_name: "expires".to_string(),
        },
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn sweep_removes_expired_items_and_emits_remove_records() {
    let clock = FixedClock::at_seconds(200);
    let db = db_with_clock(clock.clone()).await;
    create_stream_table(&db, "T", StreamViewType::OldImage).await;
    enable_ttl(&db, "T").await;

    put(&db, "T", item(&[("id", s("t")), ("expires", n("100"))])).await;
    put(&db, "T", item(&[("id", s("alive")), ("expires", n("900"))])).await;

    let removed = db.ttl_sweeper().sweep_once().await.unwrap();
    assert_eq!(removed, 1);

    assert!(get(&db, "T", item(&[("id", s("t"))])).await.is_none());
    assert!(get(&db, "T", item(&[("id", s("alive"))])).await.is_some());

    // Exactly one REMOVE record with the service marker.
    let stream_id = db
        .describe_table("T")
        .await
        .unwrap()
        .latest_stream_id
        .unwrap();
    let iterator = db
        .get_shard_iterator(GetShardIteratorRequest {
            stream_id,
            shard_id: SHARD_ID.to_string(),
            shard_iterator_type: ShardIteratorType::TrimHorizon,
            sequence_number: None,
        })
        .await
        .unwrap();
    let records = db
        .get_records(GetRecordsRequest {
            shard_iterator: iterator,
            limit: None,
        })
        .await
        .unwrap()
        .records;
    let removes: Vec<_> = records
        .iter()
        .filter(|r| r.event == StreamEvent::Remove)
        .collect();
    assert_eq!(removes.len(), 1);
    let identity = removes[0].user_identity.as_ref().unwrap();
    assert_eq!(identity.identity_type, "Service");
    assert_eq!(identity.principal_id, "dynamodb.amazonaws.com");
    assert_eq!(
        removes[0].old_image,
        Some(item(&[("id", s("t")), ("expires", n("100"))]))
    );
}

#[tokio::test]
async fn sweep_ignores_non_numeric_and_future_expiries() {
    let clock = FixedClock::at_seconds(500);
    let db = db_with_clock(clock.clone()).await;
    create_hash_table(&db, "T").await;
    enable_ttl(&db, "T").await;

    put(&db, "T", item(&[("id", s("text")), ("expires", s("100"))])).await;
    put(&db, "T", item(&[("id", s("future")), ("expires", n("1000"))])).await;
    put(&db, "T", item(&[("id", s("none"))])).await;
    put(&db, "T", item(&[("id", s("past")), ("expires", n("499"))])).await;

    let removed = db.ttl_sweeper().sweep_once().await.unwrap();
    assert_eq!(removed, 1);
    assert!(get(&db, "T", item(&[("id", s("past"))])).await.is_none());
    for id in ["text", "future", "none"] {
        assert!(get(&db, "T", item(&[("id", s(id))])).await.is_some(), "{id}");
    }
}

#[tokio::test]
async fn expired_items_reappear_in_sweeps_only_after_clock_advances() {
    let clock = FixedClock::at_seconds(100);
    let db = db_with_clock(clock.clone()).await;
    create_hash_table(&db, "T").await;
    enable_ttl(&db, "T").await;
    put(&db, "T", item(&[("id", s("later")), ("expires", n("150"))])).await;

    assert_eq!(db.ttl_sweeper().sweep_once().await.unwrap(), 0);
    assert!(get(&db, "T", item(&[("id", s("later"))])).await.is_some());

    clock.advance_seconds(60);
    assert_eq!(db.ttl_sweeper().sweep_once().await.unwrap(), 1);
    assert!(get(&db, "T", item(&[("id", s("later"))])).await.is_none());
}

#[tokio::test]
async fn enabling_ttl_backfills_existing_items() {
    let clock = FixedClock::at_seconds(200);
    let db = db_with_clock(clock.clone()).await;
    create_hash_table(&db, "T").await;
    // Item written before TTL was enabled.
    put(&db, "T", item(&[("id", s("pre")), ("expires", n("100"))])).await;

    enable_ttl(&db, "T").await;
    assert_eq!(db.ttl_sweeper().sweep_once().await.unwrap(), 1);
    assert!(get(&db, "T", item(&[("id", s("pre"))])).await.is_none());
}

#[tokio::test]
async fn tables_without_ttl_are_untouched() {
    let clock = FixedClock::at_seconds(1_000_000);
    let db = db_with_clock(clock).await;
    create_hash_table(&db, "T").await;
    put(&db, "T", item(&[("id", s("a")), ("expires", n("1"))])).await;

    assert_eq!(db.ttl_sweeper().sweep_once().await.unwrap(), 0);
    assert!(get(&db, "T", item(&[("id", s("a"))])).await.is_some());
}
