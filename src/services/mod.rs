//! Background services: TTL sweeping and stream retention pruning.

pub mod stream_pruner;
pub mod ttl_sweeper;

pub use stream_pruner::StreamPruner;
pub use ttl_sweeper::TtlSweeper;
