// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the adaptor
/// framework. Using `thiserror` allows for clean error definitions and
/// automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum FeedgateError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration key '{0}' is already defined")]
    AlreadyDefined(String),

    #[error("Configuration key '{0}' is not defined")]
    NotDefined(String),

    #[error("Malformed command stream: {0}")]
    MalformedStream(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Feed rejected by the indexer with status {status}: {message}")]
    FeedRejected { status: u16, message: String },

    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Illegal response state: {0}")]
    IllegalResponseState(String),

    #[error("Transform failed: {0}")]
    TransformFailed(String),

    #[error("Already shut down")]
    ShutDown,

    #[error("Operation interrupted")]
    Interrupted,

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Fatal startup failure: {0}")]
    StartupFatal(String),

    #[error("Transient startup failure: {0}")]
    StartupTransient(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("SAML error: {0}")]
    Saml(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for FeedgateError {
    fn clone(&self) -> Self {
        match self {
            FeedgateError::Io(e) => FeedgateError::Io(Arc::clone(e)),
            FeedgateError::HttpClient(s) => FeedgateError::HttpClient(s.clone()),
            FeedgateError::InvalidConfiguration(s) => FeedgateError::InvalidConfiguration(s.clone()),
            FeedgateError::AlreadyDefined(s) => FeedgateError::AlreadyDefined(s.clone()),
            FeedgateError::NotDefined(s) => FeedgateError::NotDefined(s.clone()),
            FeedgateError::MalformedStream(s) => FeedgateError::MalformedStream(s.clone()),
            FeedgateError::Transient(s) => FeedgateError::Transient(s.clone()),
            FeedgateError::FeedRejected { status, message } => FeedgateError::FeedRejected {
                status: *status,
                message: message.clone(),
            },
            FeedgateError::Unavailable(s) => FeedgateError::Unavailable(s.clone()),
            FeedgateError::ContractViolation(s) => FeedgateError::ContractViolation(s.clone()),
            FeedgateError::IllegalResponseState(s) => {
                FeedgateError::IllegalResponseState(s.clone())
            }
            FeedgateError::TransformFailed(s) => FeedgateError::TransformFailed(s.clone()),
            FeedgateError::ShutDown => FeedgateError::ShutDown,
            FeedgateError::Interrupted => FeedgateError::Interrupted,
            FeedgateError::InvalidState(s) => FeedgateError::InvalidState(s.clone()),
            FeedgateError::StartupFatal(s) => FeedgateError::StartupFatal(s.clone()),
            FeedgateError::StartupTransient(s) => FeedgateError::StartupTransient(s.clone()),
            FeedgateError::Xml(s) => FeedgateError::Xml(s.clone()),
            FeedgateError::Saml(s) => FeedgateError::Saml(s.clone()),
            FeedgateError::Internal(s) => FeedgateError::Internal(s.clone()),
        }
    }
}

impl PartialEq for FeedgateError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FeedgateError::Io(e1), FeedgateError::Io(e2)) => e1.to_string() == e2.to_string(),
            (FeedgateError::HttpClient(s1), FeedgateError::HttpClient(s2)) => s1 == s2,
            (FeedgateError::InvalidConfiguration(s1), FeedgateError::InvalidConfiguration(s2)) => {
                s1 == s2
            }
            (FeedgateError::AlreadyDefined(s1), FeedgateError::AlreadyDefined(s2)) => s1 == s2,
            (FeedgateError::NotDefined(s1), FeedgateError::NotDefined(s2)) => s1 == s2,
            (FeedgateError::MalformedStream(s1), FeedgateError::MalformedStream(s2)) => s1 == s2,
            (FeedgateError::Transient(s1), FeedgateError::Transient(s2)) => s1 == s2,
            (
                FeedgateError::FeedRejected {
                    status: st1,
                    message: m1,
                },
                FeedgateError::FeedRejected {
                    status: st2,
                    message: m2,
                },
            ) => st1 == st2 && m1 == m2,
            (FeedgateError::Unavailable(s1), FeedgateError::Unavailable(s2)) => s1 == s2,
            (FeedgateError::ContractViolation(s1), FeedgateError::ContractViolation(s2)) => {
                s1 == s2
            }
            (FeedgateError::IllegalResponseState(s1), FeedgateError::IllegalResponseState(s2)) => {
                s1 == s2
            }
            (FeedgateError::TransformFailed(s1), FeedgateError::TransformFailed(s2)) => s1 == s2,
            (FeedgateError::InvalidState(s1), FeedgateError::InvalidState(s2)) => s1 == s2,
            (FeedgateError::StartupFatal(s1), FeedgateError::StartupFatal(s2)) => s1 == s2,
            (FeedgateError::StartupTransient(s1), FeedgateError::StartupTransient(s2)) => s1 == s2,
            (FeedgateError::Xml(s1), FeedgateError::Xml(s2)) => s1 == s2,
            (FeedgateError::Saml(s1), FeedgateError::Saml(s2)) => s1 == s2,
            (FeedgateError::Internal(s1), FeedgateError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for FeedgateError {
    fn from(e: std::io::Error) -> Self {
        FeedgateError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for FeedgateError {
    fn from(e: reqwest::Error) -> Self {
        // Transport-level failures are retryable; everything the indexer
        // actively rejected is mapped to FeedRejected by the caller.
        FeedgateError::Transient(e.to_string())
    }
}

impl From<quick_xml::Error> for FeedgateError {
    fn from(e: quick_xml::Error) -> Self {
        FeedgateError::Xml(e.to_string())
    }
}

impl From<uuid::Error> for FeedgateError {
    fn from(e: uuid::Error) -> Self {
        FeedgateError::Internal(format!("Failed to generate UUID: {e}"))
    }
}

impl From<std::str::Utf8Error> for FeedgateError {
    fn from(e: std::str::Utf8Error) -> Self {
        FeedgateError::MalformedStream(format!("invalid UTF-8: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for FeedgateError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        FeedgateError::MalformedStream(format!("invalid UTF-8: {e}"))
    }
}

impl From<serde_json::Error> for FeedgateError {
    fn from(e: serde_json::Error) -> Self {
        FeedgateError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
