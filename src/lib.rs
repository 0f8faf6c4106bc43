//! File hub: publish files to a content-addressed store and record them on a
//! ledger
//!
//! A publish hashes the upload, pins it to a content store, optionally pins a
//! metadata document describing it, and commits a pointer to the ledger. A
//! resolve walks the same chain backwards, from a record id or a content
//! address to the original bytes.

pub mod app;
pub mod clock;
pub mod config;
pub mod hasher;
pub mod ledger;
pub mod metadata;
pub mod pipeline;
pub mod server;
pub mod storage;

pub use config::Config;
pub use ledger::{LedgerClient, LedgerError, RecordId};
pub use pipeline::{PublishPipeline, ResolvePipeline, StorageScheme};
pub use storage::{ContentAddress, ContentStore, StorageError};
