//! The approval surface server.
//!
//! An HTTP + WebSocket view over the approval queues, standing in for the
//! extension popup. It is a pure consumer of the store and gate contracts:
//! lists queues, accepts decisions, and streams live store changes and
//! approval prompts to connected clients.
//!
//! Reading the completed queue purges records older than the retention
//! window, so viewers never see aged-out history.

pub mod server;

pub use server::{SurfaceServer, SurfaceState};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
