//! Write-side node transaction of the Xylem tree store.
//!
//! A resource holds a versioned, page-backed XML-shaped tree. This crate
//! implements the single write transaction on top of the page layer: a
//! cursor-oriented structural edit API that preserves the tree invariants,
//! incremental subtree hashing, automatic merging of adjacent text
//! siblings, auto-commit by modification count or wall-clock interval, and
//! revert to an earlier revision.
//!
//! Reads of committed revisions run in parallel through
//! [`NodeReadTrx`]; edits made by the writer become visible to new readers
//! only once `commit` publishes a new uber page.

pub mod axis;
mod hash;
mod read;
mod sched;
mod shred;
pub mod verify;
mod write;

pub use read::{begin_read_trx, NodeReadTrx};
pub use shred::SubtreeEvent;
pub use write::{InsertPosition, Movement, NodeWriteTrx};
