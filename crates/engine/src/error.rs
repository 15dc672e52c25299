//! Error types for the configuration engine.
//!
//! Run-level failures (bad documents, cycles, busy runs, missing history)
//! are returned as [`Error`]. Per-resource provider failures are recorded
//! in the report instead and only become an [`Error`] when a caller asks
//! for one via [`ConfigurationReport::into_result`](crate::ConfigurationReport::into_result).

use crate::types::LifecycleCall;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Categories of engine errors.
///
/// The category is what the host puts in the error payload so callers can
/// branch on the failure class without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Parse,
    DuplicateKey,
    NotFound,
    CycleDetected,
    ProviderNotFound,
    ProviderInvocationFailed,
    Busy,
    NoPreviousConfiguration,
    NoCurrentConfiguration,
    Cancelled,
    InvalidMetaConfiguration,
    Storage,
}

impl ErrorKind {
    /// Whether the error is raised before any provider is invoked
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::Parse
                | Self::DuplicateKey
                | Self::NotFound
                | Self::CycleDetected
                | Self::Busy
                | Self::NoPreviousConfiguration
                | Self::NoCurrentConfiguration
                | Self::InvalidMetaConfiguration
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parse => "ParseError",
            Self::DuplicateKey => "DuplicateKey",
            Self::NotFound => "NotFound",
            Self::CycleDetected => "CycleDetected",
            Self::ProviderNotFound => "ProviderNotFound",
            Self::ProviderInvocationFailed => "ProviderInvocationFailed",
            Self::Busy => "Busy",
            Self::NoPreviousConfiguration => "NoPreviousConfiguration",
            Self::NoCurrentConfiguration => "NoCurrentConfiguration",
            Self::Cancelled => "Cancelled",
            Self::InvalidMetaConfiguration => "InvalidMetaConfiguration",
            Self::Storage => "StorageError",
        }
    }
}

/// Errors surfaced by engine operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration document
    #[error("invalid configuration document: {message}")]
    Parse { message: String },

    /// Two resources share a key
    #[error("duplicate resource key: {key}")]
    DuplicateKey { key: String },

    /// A key that is not part of the document
    #[error("resource not found: {key}")]
    NotFound { key: String },

    /// Dependency cycle; keys are listed in traversal order
    #[error("dependency cycle detected: {}", format_cycle(.keys))]
    CycleDetected { keys: Vec<String> },

    /// No provider registered for a resource type
    #[error("no provider registered for resource type '{type_name}' (resource {key})")]
    ProviderNotFound { type_name: String, key: String },

    /// A provider returned failure or faulted
    #[error("{call} failed for {key}: {detail}")]
    ProviderInvocationFailed {
        key: String,
        call: LifecycleCall,
        detail: String,
    },

    /// Another exclusive run is in progress
    #[error("another configuration run is in progress")]
    Busy,

    /// Rollback requested without retained history
    #[error("no previous configuration to roll back to")]
    NoPreviousConfiguration,

    /// Operation needs a current (or pending) configuration and there is none
    #[error("no current configuration")]
    NoCurrentConfiguration,

    /// StopConfiguration was honored mid-run
    #[error("configuration run cancelled{}", .after.as_ref().map(|k| format!(" after {k}")).unwrap_or_default())]
    Cancelled { after: Option<String> },

    /// Meta configuration failed validation
    #[error("invalid meta configuration: {message}")]
    InvalidMetaConfiguration { message: String },

    /// IO error while persisting or loading state
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while persisting or loading state
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a parse error from any displayable message
    pub fn parse(message: impl std::fmt::Display) -> Self {
        Self::Parse {
            message: message.to_string(),
        }
    }

    /// Get the error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse { .. } => ErrorKind::Parse,
            Error::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::CycleDetected { .. } => ErrorKind::CycleDetected,
            Error::ProviderNotFound { .. } => ErrorKind::ProviderNotFound,
            Error::ProviderInvocationFailed { .. } => ErrorKind::ProviderInvocationFailed,
            Error::Busy => ErrorKind::Busy,
            Error::NoPreviousConfiguration => ErrorKind::NoPreviousConfiguration,
            Error::NoCurrentConfiguration => ErrorKind::NoCurrentConfiguration,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::InvalidMetaConfiguration { .. } => ErrorKind::InvalidMetaConfiguration,
            Error::Io(_) | Error::Json(_) => ErrorKind::Storage,
        }
    }

    /// The resource the error is about, when there is one
    pub fn resource_key(&self) -> Option<&str> {
        match self {
            Error::DuplicateKey { key }
            | Error::NotFound { key }
            | Error::ProviderNotFound { key, .. }
            | Error::ProviderInvocationFailed { key, .. } => Some(key),
            Error::CycleDetected { keys } => keys.first().map(String::as_str),
            Error::Cancelled { after } => after.as_deref(),
            _ => None,
        }
    }
}

fn format_cycle(keys: &[String]) -> String {
    match keys.first() {
        Some(first) => format!("{} -> {first}", keys.join(" -> ")),
        None => String::new(),
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
