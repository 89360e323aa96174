//! The injected page bridge.
//!
//! Runs in the page's execution context and presents a wallet-provider
//! surface per supported chain. Every call is assigned a strictly
//! increasing correlation id, recorded in the callback map, and ferried
//! through the relay; the matching response resolves the caller. A
//! periodic sweep guarantees no caller is ever left hanging.

pub mod bridge;
pub mod correlation;
pub mod discovery;
pub mod emitter;
pub mod outbound;

pub use bridge::{BridgeConfig, PageBridge, PageChannel, Provider, ProviderHub};
pub use correlation::CallbackMap;
pub use emitter::{EventEmitter, ListenerId};
pub use outbound::OutboundQueue;
