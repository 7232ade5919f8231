// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Aquaview
//!
//! This module defines all error types used throughout the library.
//! None of them is fatal: decode errors drop a sample, channel errors
//! surface as a link status, store errors mark the control state as
//! out of sync until a later write succeeds.

use thiserror::Error;

/// Result type alias for Aquaview operations
pub type Result<T> = std::result::Result<T, AquaError>;

/// Main error type for Aquaview operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AquaError {
    /// Sample decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Message channel error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Durable replica error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Operator command error
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// CSV export error
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

/// Reasons a raw channel message is rejected as a sensor sample
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Second topic segment does not name a known sensor
    #[error("Unknown sensor kind in topic '{0}'")]
    UnknownSensorKind(String),

    /// Payload is not a finite decimal number
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Errors related to the publish/subscribe channel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// Not connected to the broker
    #[error("Disconnected: {reason}")]
    Disconnected { reason: String },

    /// Broker refused the connection
    #[error("Connection refused: {reason}")]
    Refused { reason: String },

    /// Credentials rejected
    #[error("Authentication failed: {reason}")]
    AuthFailed { reason: String },

    /// Outgoing request queue is full
    #[error("Request buffer full")]
    BufferFull,

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors related to the durable replica
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Underlying I/O failed
    #[error("I/O error on '{path}': {reason}")]
    Io { path: String, reason: String },

    /// Tree could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A record at the given path has an unexpected shape
    #[error("Invalid record at '{path}': {reason}")]
    InvalidRecord { path: String, reason: String },

    /// The store refused the write
    #[error("Write rejected at '{path}': {reason}")]
    WriteRejected { path: String, reason: String },
}

/// Errors raised by operator commands
///
/// Empty input is not an error; it is ignored without side effects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Hour is not a positive whole number
    #[error("Invalid hour '{0}': expected a positive whole number")]
    InvalidHour(String),

    /// Publish failed, countdown not started
    #[error("Command not published: {0}")]
    Channel(#[from] ChannelError),
}

/// Errors while exporting a window as CSV
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    /// CSV writer failure
    #[error("CSV error: {0}")]
    Csv(String),

    /// Destination could not be written
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv(err.to_string())
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
