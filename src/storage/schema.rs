//! Database schema definitions using sea-query.
//!
//! Iden enums give type-safe column references for query building; the DDL
//! below provisions the physical schema on both backends (the type names
//! chosen are valid in PostgreSQL and map onto SQLite's affinities).

use sea_query::Iden;

/// Table catalog.
#[derive(Iden)]
pub enum Tables {
    #[iden = "pdb_tables"]
    Table,
    #[iden = "table_name"]
    TableName,
    #[iden = "schema_json"]
    SchemaJson,
    #[iden = "created_at"]
    CreatedAt,
}

/// Item rows: one per (table, primary key). `key_json` is the canonical
/// serialized key map and carries uniqueness; the typed key columns exist
/// for native ordering and range predicates.
#[derive(Iden, Clone, Copy)]
pub enum Items {
    #[iden = "pdb_items"]
    Table,
    #[iden = "table_name"]
    TableName,
    #[iden = "key_json"]
    KeyJson,
    #[iden = "hash_s"]
    HashS,
    #[iden = "hash_n"]
    HashN,
    #[iden = "hash_b"]
    HashB,
    #[iden = "range_s"]
    RangeS,
    #[iden = "range_n"]
    RangeN,
    #[iden = "range_b"]
    RangeB,
    #[iden = "payload_json"]
    PayloadJson,
    #[iden = "ttl_epoch"]
    TtlEpoch,
    #[iden = "segment_hash"]
    SegmentHash,
}

/// GSI projection rows: one per (table, index, qualifying item).
#[derive(Iden, Clone, Copy)]
pub enum GsiProjections {
    #[iden = "pdb_gsi_projections"]
    Table,
    #[iden = "table_name"]
    TableName,
    #[iden = "index_name"]
    IndexName,
    #[iden = "base_key_json"]
    BaseKeyJson,
    #[iden = "gsi_hash_s"]
    GsiHashS,
    #[iden = "gsi_hash_n"]
    GsiHashN,
    #[iden = "gsi_hash_b"]
    GsiHashB,
    #[iden = "gsi_range_s"]
    GsiRangeS,
    #[iden = "gsi_range_n"]
    GsiRangeN,
    #[iden = "gsi_range_b"]
    GsiRangeB,
    #[iden = "payload_json"]
    PayloadJson,
}

/// Stream heads: one per stream, holding the sequence counter.
#[derive(Iden)]
pub enum Streams {
    #[iden = "pdb_streams"]
    Table,
    #[iden = "stream_id"]
    StreamId,
    #[iden = "table_name"]
    TableName,
    #[iden = "view_type"]
    ViewType,
    #[iden = "status"]
    Status,
    #[iden = "next_seq"]
    NextSeq,
    #[iden = "created_at"]
    CreatedAt,
}

/// Captured stream records.
#[derive(Iden)]
pub enum StreamRecords {
    #[iden = "pdb_stream_records"]
    Table,
    #[iden = "stream_id"]
    StreamId,
    #[iden = "sequence_no"]
    SequenceNo,
    #[iden = "event_name"]
    EventName,
    #[iden = "keys_json"]
    KeysJson,
    #[iden = "old_image_json"]
    OldImageJson,
    #[iden = "new_image_json"]
    NewImageJson,
    #[iden = "user_identity_json"]
    UserIdentityJson,
    #[iden = "created_at"]
    CreatedAt,
}

/// DDL statements run at startup, idempotent on both backends.
pub const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pdb_tables (
        table_name TEXT PRIMARY KEY,
        schema_json TEXT NOT NULL,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pdb_items (
        table_name TEXT NOT NULL,
        key_json TEXT NOT NULL,
        hash_s TEXT,
        hash_n NUMERIC,
        hash_b TEXT,
        range_s TEXT,
        range_n NUMERIC,
        range_b TEXT,
        payload_json TEXT NOT NULL,
        ttl_epoch BIGINT,
        segment_hash BIGINT NOT NULL,
        PRIMARY KEY (table_name, key_json)
    )",
    "CREATE INDEX IF NOT EXISTS idx_pdb_items_keys ON pdb_items
        (table_name, hash_s, hash_n, hash_b, range_s, range_n, range_b)",
    "CREATE INDEX IF NOT EXISTS idx_pdb_items_ttl ON pdb_items
        (table_name, ttl_epoch)",
    "CREATE TABLE IF NOT EXISTS pdb_gsi_projections (
        table_name TEXT NOT NULL,
        index_name TEXT NOT NULL,
        base_key_json TEXT NOT NULL,
        gsi_hash_s TEXT,
        gsi_hash_n NUMERIC,
        gsi_hash_b TEXT,
        gsi_range_s TEXT,
        gsi_range_n NUMERIC,
        gsi_range_b TEXT,
        payload_json TEXT NOT NULL,
        PRIMARY KEY (table_name, index_name, base_key_json)
    )",
    "CREATE INDEX IF NOT EXISTS idx_pdb_gsi_keys ON pdb_gsi_projections
        (table_name, index_name, gsi_hash_s, gsi_hash_n, gsi_hash_b,
         gsi_range_s, gsi_range_n, gsi_range_b)",
    "CREATE TABLE IF NOT EXISTS pdb_streams (
        stream_id TEXT PRIMARY KEY,
        table_name TEXT NOT NULL,
        view_type TEXT NOT NULL,
        status TEXT NOT NULL,
        next_seq BIGINT NOT NULL,
        created_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pdb_stream_records (
        stream_id TEXT NOT NULL,
        sequence_no BIGINT NOT NULL,
        event_name TEXT NOT NULL,
        keys_json TEXT NOT NULL,
        old_image_json TEXT,
        new_image_json TEXT,
        user_identity_json TEXT,
        created_at BIGINT NOT NULL,
        PRIMARY KEY (stream_id, sequence_no)
    )",
    "CREATE INDEX IF NOT EXISTS idx_pdb_stream_records_created
        ON pdb_stream_records (created_at)",
];
