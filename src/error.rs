//! Custom error types for the instrument-abstraction kernel.
//!
//! This module defines the primary error type, `AteError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures the kernel can surface, from addressing mistakes in
//! test code to driver faults raised concurrently on many instrument channels.
//!
//! ## Error Hierarchy
//!
//! `AteError` consolidates the following categories:
//!
//! - **`Addressing`**: An unknown pin name, a site filter that leaves a pin without
//!   channels, or a value table that has no entry for a resolved channel. Always surfaced
//!   immediately and never retried.
//! - **`Capability`**: The instrument model behind a channel does not support the
//!   requested feature, or the model is not described by the capability table at all.
//! - **`Execution`**: One wrapper carrying every per-session / per-channel failure from a
//!   single parallel executor call. Never retried automatically, since hardware operations
//!   are not idempotent in general (re-sending a trigger is not harmless).
//! - **`Timeout`**: A bounded wait (fetch, event) exceeded its deadline.
//! - **`Config`** / **`Configuration`**: Loading or semantic validation of `KernelConfig`.
//! - **`InvalidPhase`**: A synchronized acquisition step called out of order.
//! - **`Host`**: The test host rejected published data.
//! - **`Io`** / **`Csv`**: Persistence of per-pin/per-site value dumps.
//!
//! By using `#[from]`, `AteError` can be created from the underlying error types,
//! so call sites propagate with the `?` operator.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::addressing::{ChannelAddress, SessionId, SiteNumber};

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, AteError>;

/// Top-level error for every kernel operation.
#[derive(Error, Debug)]
pub enum AteError {
    /// Pin, site or value-table lookup failed.
    #[error("Addressing error: {0}")]
    Addressing(#[from] AddressingError),

    /// Instrument model cannot do what was asked.
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// One or more channels failed inside a parallel call.
    #[error(transparent)]
    Execution(#[from] AggregateExecutionError),

    /// A bounded wait ran out.
    #[error("Timeout during {operation} after {after:?}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// `KernelConfig` could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// `KernelConfig` or a request failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Synchronized acquisition step called out of order.
    #[error("Operation '{operation}' is not valid in phase {phase}")]
    InvalidPhase {
        /// The rejected step.
        operation: &'static str,
        /// Phase the acquisition was in.
        phase: String,
    },

    /// The test host refused published data.
    #[error("Test host error: {0}")]
    Host(String),

    /// Reading or writing a persisted value dump.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed value dump.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<figment::Error> for AteError {
    fn from(value: figment::Error) -> Self {
        AteError::Config(Box::new(value))
    }
}

impl AteError {
    /// Timeout errors can be produced by drivers and travel through `anyhow`.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        AteError::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

// =============================================================================
// Addressing Errors
// =============================================================================

/// Mistakes in how test code names pins, sites and values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressingError {
    /// Neither a pin nor a pin group of the loaded pin map.
    #[error("Unknown pin or pin group '{0}'")]
    UnknownPin(String),

    /// Only valid for operations that need a group.
    #[error("Unknown pin group '{0}'")]
    UnknownPinGroup(String),

    /// Pin map association to a resource with no registered session.
    #[error("Pin '{pin}' refers to session '{session}' which is not registered")]
    UnknownSession {
        /// Pin of the offending association.
        pin: String,
        /// Resource name it points at.
        session: String,
    },

    /// A requested pin has no channel on any of the filtered sites.
    #[error("Site filter {sites:?} leaves pin '{pin}' without any channel")]
    EmptySiteFilter {
        /// Pin left empty.
        pin: String,
        /// The filter that was applied.
        sites: Vec<SiteNumber>,
    },

    /// A value table has no entry for a resolved channel.
    #[error("No value for pin '{pin}' on site {site}")]
    MissingKey {
        /// Pin without a value.
        pin: String,
        /// Site without a value.
        site: SiteNumber,
    },

    /// The same instrument channel appears in two associations.
    #[error("Channel '{channel}' on session '{session}' is associated twice")]
    DuplicateChannel {
        /// Owning session.
        session: String,
        /// Repeated channel.
        channel: String,
    },
}

// =============================================================================
// Capability Errors
// =============================================================================

/// Feature lookups that the capability table cannot satisfy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Known model without the feature.
    #[error("Model '{model}' does not support {feature}")]
    Unsupported {
        /// Instrument model string.
        model: String,
        /// Feature that was required.
        feature: String,
    },

    /// Model missing from the table entirely.
    #[error("Model '{0}' is not described by the capability table")]
    UnknownModel(String),
}

// =============================================================================
// Aggregate Execution Errors
// =============================================================================

/// A single failure captured by the parallel executor.
///
/// Per-session actions fail for every channel the session owns; per-channel actions fail
/// for exactly one address.
#[derive(Debug)]
pub struct ChannelFailure {
    /// Session the action ran on.
    pub session: SessionId,
    /// Every address covered by the failed action.
    pub channels: Vec<ChannelAddress>,
    /// Driver or action error.
    pub error: anyhow::Error,
}

impl ChannelFailure {
    /// True when the underlying driver error is a kernel timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.error.downcast_ref::<AteError>(),
            Some(AteError::Timeout { .. })
        )
    }
}

impl fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels = self
            .channels
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "session '{}' [{}]: {:#}", self.session, channels, self.error)
    }
}

/// Every failure raised by one executor call, in executor order.
#[derive(Debug)]
pub struct AggregateExecutionError {
    /// Name the executor call was made under.
    pub operation: String,
    /// Captured failures.
    pub failures: Vec<ChannelFailure>,
}

impl AggregateExecutionError {
    /// Wrap the failures of one executor call.
    pub fn new(operation: impl Into<String>, failures: Vec<ChannelFailure>) -> Self {
        Self {
            operation: operation.into(),
            failures,
        }
    }

    /// Number of captured failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True when nothing failed.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// All addresses that failed, flattened.
    pub fn failed_channels(&self) -> Vec<&ChannelAddress> {
        self.failures.iter().flat_map(|f| f.channels.iter()).collect()
    }

    /// True when every captured failure is a timeout.
    pub fn all_timeouts(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(ChannelFailure::is_timeout)
    }
}

impl fmt::Display for AggregateExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed with {} failure(s)",
            self.operation,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateExecutionError {}
