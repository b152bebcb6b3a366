//! redb table definitions for the FlowGrid state store.
//!
//! Record tables use JSON-serialized `&[u8]` values. Numeric ids are
//! allocated from `SEQUENCES`, one counter per record table.

use redb::TableDefinition;

/// Workers keyed by their stable worker id.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("workers");

/// Stream versions keyed by stream id.
pub const STREAMS: TableDefinition<i64, &[u8]> = TableDefinition::new("streams");

/// Assignment records keyed by worker-stream id.
pub const WORKER_STREAMS: TableDefinition<i64, &[u8]> = TableDefinition::new("worker_streams");

/// Last allocated id per record table, keyed by table name.
pub const SEQUENCES: TableDefinition<&str, i64> = TableDefinition::new("sequences");
