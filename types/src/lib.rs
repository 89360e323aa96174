//! Fundamental types for the KeyBridge pipeline.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: chain-family tags, CAIP-2 network identifiers, request records
//! and their status machine, the structured provider error, and timestamps.

pub mod chain;
pub mod error;
pub mod event;
pub mod network;
pub mod time;

pub use chain::ChainFamily;
pub use error::{codes, ProviderError};
pub use event::{EventId, RequestMetadata, RequestRecord, RequestStatus, TransitionError};
pub use network::NetworkId;
pub use time::Timestamp;
