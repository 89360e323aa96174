//! LMDB storage backend for the KeyBridge approval queues.
//!
//! Implements the `keybridge-store` traits using the `heed` LMDB bindings.
//! Each queue maps to one named database within a single environment;
//! record values are serialized as JSON because they embed opaque
//! caller-supplied parameters.

pub mod environment;
pub mod error;
mod events;

pub use environment::LmdbEventStore;
pub use error::LmdbError;
