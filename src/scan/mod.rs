//! Scan module - batched vulnerability lookup pipeline.
//!
//! Stages, leaves first:
//! - **Partition**: [`split_into_batches`] cuts the package list into ordered batches
//! - **Query**: [`build_batch_query`] maps a batch to the wire request
//! - **Assemble**: [`assemble_records`] zips a batch back to its response
//! - **Pipeline**: [`ScanPipeline`] drives the stages across all batches

pub mod assemble;
pub mod partition;
pub mod pipeline;
pub mod query;

pub use assemble::assemble_records;
pub use partition::split_into_batches;
pub use pipeline::ScanPipeline;
pub use query::build_batch_query;
