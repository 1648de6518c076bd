//! Error types for PanelSync

use thiserror::Error;

/// Failure of a single request against the EBS.
///
/// Every network-boundary failure is converted into one of these variants by
/// the client before it reaches the reconciliation engine. `NotFound` and
/// `ServiceError` must never be conflated: the first means "no user record
/// yet", the second means "backend unreachable".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No base URL has been delivered by the host yet
    #[error("Extension not configured (no EBS URL)")]
    NotConfigured,

    /// HTTP 404 on the data endpoint
    #[error("User record not found")]
    NotFound,

    /// HTTP >= 500, any other non-2xx, an undecodable body or a transport
    /// failure (`None` when no status was received)
    #[error("Service unavailable{}", .0.map(|s| format!(" (status {s})")).unwrap_or_default())]
    ServiceError(Option<u16>),

    /// The server answered but reported an application-level failure
    #[error("Rejected by server: {0}")]
    Rejected(String),
}

impl FetchError {
    /// True when the failure means the backend could not be reached.
    pub fn is_offline(&self) -> bool {
        matches!(self, FetchError::ServiceError(_))
    }

    /// True when the failure is the "new user" signal.
    pub fn is_new_user(&self) -> bool {
        matches!(self, FetchError::NotFound)
    }
}

/// A broadcast payload that could not be understood
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Not JSON, not an object, no `type`, or a known type with a bad body
    #[error("Malformed push payload: {0}")]
    Malformed(String),
}

/// Error returned by [`PanelHandle`](crate::PanelHandle) operations.
///
/// Request failures never surface here; they become display states and
/// action statuses instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PanelError {
    /// The panel has been torn down
    #[error("Panel is closed")]
    Closed,
}

/// Result type alias using PanelError
pub type PanelResult<T> = Result<T, PanelError>;
