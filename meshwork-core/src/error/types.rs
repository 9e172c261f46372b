//! Core error types for Meshwork
//!
//! This module contains the main MeshworkError enum with all error variants
//! and associated type aliases for Result types.

use std::time::Duration;
use thiserror::Error;

/// Error type for all Meshwork operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshworkError {
    // Cluster lifecycle
    #[error("Clustering is disabled on this node")]
    ClusterDisabled,

    #[error("Cluster name mismatch: expected '{expected}', got '{actual}'")]
    NameMismatch { expected: String, actual: String },

    #[error("Node {node_id} has status {actual}, expected {expected}")]
    NodeStatusMismatch {
        node_id: String,
        expected: String,
        actual: String,
    },

    // Admission control
    #[error("Join authentication failed for node {node_id}")]
    JoinAuthFailed { node_id: String },

    #[error("Join rate limited for address {address}")]
    JoinRateLimited { address: String },

    #[error("Join not allowed: {reason}")]
    JoinNotAllowed { reason: String },

    #[error("Node is not in quorum: {healthy} healthy of {required} required")]
    NotInQuorum { healthy: usize, required: usize },

    #[error("Protocol version {version} outside accepted range [{min}, {max}]")]
    ProtocolVersionMismatch { version: u16, min: u16, max: u16 },

    #[error("Admin authentication failed for {operation}")]
    AdminAuthFailed { operation: String },

    // Data model
    #[error("Invalid version vector: {message}")]
    InvalidVersionVector { message: String },

    #[error("Codec error while decoding {context}: {message}")]
    Codec { context: String, message: String },

    // Configuration
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    // Runtime collaborators
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Transport error sending to {target}: {message}")]
    Transport { target: String, message: String },

    #[error("No actor registered at {path}")]
    ActorNotFound { path: String },

    #[error("Unexpected response to {operation}: {message}")]
    UnexpectedResponse { operation: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for Meshwork operations
pub type Result<T> = std::result::Result<T, MeshworkError>;

/// Alias used throughout the crate
pub type MeshworkResult<T> = Result<T>;
