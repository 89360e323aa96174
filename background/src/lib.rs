//! The KeyBridge background service.
//!
//! Receives relayed wallet requests, validates and dispatches them to the
//! chain handler registered for the target chain family, and mediates user
//! consent through the approval gate. Handlers build unsigned transactions
//! against the shared wallet state, persist pending records, block on the
//! user decision, then sign and broadcast through the wallet capability.

pub mod approvals;
pub mod chains;
pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod router;
pub mod service;
pub mod shutdown;
pub mod wallet_state;

pub use approvals::{ApprovalGate, ApprovalOutcome, ApprovalPrompt};
pub use config::PipelineConfig;
pub use error::BackgroundError;
pub use handler::{ChainHandler, HandlerContext};
pub use metrics::PipelineMetrics;
pub use router::Router;
pub use service::BackgroundService;
pub use shutdown::ShutdownController;
pub use wallet_state::{AssetContext, WalletState};
