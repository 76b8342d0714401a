//! Shared data model for the tidemark delivery pipeline.
//!
//! Defines the unit of work ([`blob::Blob`]), the durable checkpoint rows
//! ([`checkpoint::ProcessedRange`], [`checkpoint::FailedEventRecord`]), the
//! delivery error taxonomy ([`error::ErrorCode`], [`error::DeliveryError`])
//! and run bookkeeping types. No I/O lives here.

pub mod blob;
pub mod checkpoint;
pub mod error;
pub mod run;
