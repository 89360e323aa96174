//! Abstract storage traits for the KeyBridge approval queues.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the pipeline depends only on the traits and on the
//! [`ChangeFeed`] used by approval surfaces to react to new records.

pub mod error;
pub mod events;
pub mod feed;

pub use error::StoreError;
pub use events::{validate_update, EventStore, Queue};
pub use feed::{ChangeFeed, ChangeKind, StoreChange};
