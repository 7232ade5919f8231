// Aquaview Bridge - Hosted dashboard service
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the bridge

use aquaview::{CommandError, StoreError};
use thiserror::Error;

/// Errors that stop the bridge from starting
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Durable replica could not be opened
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Socket or filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid command-line or environment configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Why an operator command got no outcome
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Rejected or failed inside the dashboard
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The dashboard loop is no longer running
    #[error("Dashboard loop stopped")]
    Stopped,
}
