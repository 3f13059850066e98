//! robotstore - JSONL-backed persistent state management
//!
//! Provides a generic `Record` + `Store<T>` pair used by the orchestrator's
//! `ExecutionStore` and `RobotCache` to persist rows without pulling in a
//! database engine. Each collection lives in its own append-only JSONL file
//! under the store's root directory; a `Store` rebuilds an in-memory index
//! from that file on open and keeps it current as records are written.
//!
//! # Layout
//!
//! ```text
//! {root}/
//! └── {collection}.jsonl   # one JSON object per line, last write for an id wins
//! ```

mod filter;
mod record;
mod store;

pub use filter::{Filter, FilterOp, IndexValue};
pub use record::Record;
pub use store::{Store, StoreError};
