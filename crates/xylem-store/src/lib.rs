//! Page-layer surface consumed by the node transactions, plus the in-memory
//! revision store used by the test suite and by embedders without a durable
//! backend.
//!
//! The write transaction never touches storage directly; everything flows
//! through the [`PageReadTrx`] / [`PageWriteTrx`] traits and the owning
//! [`Session`].

mod mem;
mod traits;

pub use mem::{MemPageReadTrx, MemPageWriteTrx, MemResource};
pub use traits::{PageReadTrx, PageWriteTrx, Session};
