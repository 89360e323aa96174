//! Nullable infrastructure for deterministic testing.
//!
//! The pipeline's external dependencies (durable storage, the
//! hardware-wallet capability) are abstracted behind traits. This crate
//! provides test-friendly implementations that:
//! - Return deterministic, scriptable values
//! - Can be inspected programmatically after the fact
//! - Never touch the filesystem, a device, or the network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod sdk;
pub mod store;

pub use sdk::NullSdk;
pub use store::NullEventStore;
