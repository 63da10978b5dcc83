//! Error taxonomy for the acquisition core.
//!
//! Nothing here is fatal to the device: every variant degrades to "skip this
//! item" or "retry later" at the call site.

use thiserror::Error;

/// Whole-document failure. The running configuration is left untouched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Per-channel failure during reconciliation. Other channels still apply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("unknown signal `{0}`")]
    UnknownSignal(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("cannot allocate {bytes} bytes for the packet buffer")]
    AllocationFailure { bytes: usize },

    #[error("failed to spawn channel task: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("sensor not ready")]
    NotReady,
    #[error("bus error")]
    Bus,
    #[error("signal not wired on this board")]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("broker client rejected the request: {0}")]
    Rejected(String),
}
