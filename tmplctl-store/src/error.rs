//! Error types for tmplctl-store.

use thiserror::Error;

/// Failures reading from an external store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Network failure or an overloaded/unavailable service. Retried.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    /// The service answered with something we could not decode. Retried.
    #[error("malformed {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    /// The service refused the request, e.g. an invalid token. Not retried.
    #[error("{service} rejected request with status {status}: {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// The configured address cannot be used at all. Not retried.
    #[error("invalid {service} address {addr:?}: {message}")]
    InvalidAddress {
        service: &'static str,
        addr: String,
        message: String,
    },
}

impl StoreError {
    /// Whether waiting and trying again can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. } | StoreError::Decode { .. })
    }
}

/// Map an HTTP status to a store error.
pub(crate) fn status_error(service: &'static str, status: u16, body: String) -> StoreError {
    let message = body.trim().to_string();
    if status == 429 || status >= 500 {
        StoreError::Unavailable {
            service,
            message: format!("status {status}: {message}"),
        }
    } else {
        StoreError::Rejected {
            service,
            status,
            message,
        }
    }
}

/// Map a ureq transport failure to a store error.
pub(crate) fn transport_error(
    service: &'static str,
    addr: &str,
    err: &ureq::Transport,
) -> StoreError {
    match err.kind() {
        ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
            StoreError::InvalidAddress {
                service,
                addr: addr.to_string(),
                message: err.to_string(),
            }
        }
        _ => StoreError::Unavailable {
            service,
            message: err.to_string(),
        },
    }
}
