//! Crate-wide error taxonomy.
//!
//! The five kinds mirror the error-handling design: configuration and data
//! errors are fatal at the point they're discovered, capacity and numeric
//! errors are fatal inner-kernel aborts, and transport errors are the one
//! kind a caller may legitimately retry.

use std::fmt;

use thiserror::Error;

/// Where an error was raised, for log correlation. Cheap to construct and
/// attached at the point an error kind is known rather than threaded through
/// every call site.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub component: Option<String>,
    pub operation: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.component, &self.operation) {
            (Some(c), Some(o)) => write!(f, "[{c}::{o}]"),
            (Some(c), None) => write!(f, "[{c}]"),
            (None, Some(o)) => write!(f, "[{o}]"),
            (None, None) => Ok(()),
        }
    }
}

/// Error kinds, numbered to match the specification's error taxonomy.
#[derive(Error, Debug)]
pub enum TrainerError {
    /// Kind 1: configuration invalid. Fatal at startup.
    #[error("configuration invalid: {0}")]
    Configuration(String),

    /// Kind 2: data malformed. Fatal when parsing; no per-row recovery.
    #[error("malformed data: {0}")]
    DataMalformed(String),

    /// Kind 3: capacity exceeded (localizer position overflow, illegal
    /// server-entry size). Always fatal.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Kind 4: transient transport failure. Retried by the transport layer;
    /// surfaced to the scheduler as a `StragglerEvent` on permanent loss.
    #[error("transport error: {0}")]
    Transport(String),

    /// Kind 5: numeric fault (NaN in the objective). Always fatal.
    #[error("numeric fault: {0}")]
    Numeric(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] toml::de::Error),
}

impl TrainerError {
    /// Kind-3 and kind-5 errors abort the owning process; kind-4 is
    /// retried by the transport and never reaches this point as fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TrainerError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, TrainerError>;
