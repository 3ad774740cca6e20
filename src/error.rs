//! Error taxonomy shared by every collaborator call.
//!
//! The dispatch pipeline never matches on error *sources* (which endpoint
//! failed); it matches on error *class*. Everything a remote call can
//! produce is classified here into transient conditions (retry or skip the
//! unit of work), malformed content (route to the dropped path), and fatal
//! conditions (abort the enclosing operation).

use thiserror::Error;

/// Platform error code meaning "album not ready yet, ask again later".
pub const NOT_READY_CODE: i32 = -10001;

/// Classified error space for the external Qzone API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Platform signalled rate limiting or a not-ready resource.
    #[error("rate limited by platform (code {code})")]
    RateLimited { code: i32 },

    /// Platform-level error code carried in an otherwise valid response.
    #[error("platform error {code}: {message}")]
    Server { code: i32, message: String },

    /// HTTP response with non-2xx status code.
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),

    /// Network-level error (DNS, connection, TLS, timeout).
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Payload decoded but its content is inconsistent or truncated.
    #[error("corrupt payload: {0}")]
    Corrupt(String),

    /// Session is gone and could not be re-established.
    #[error("login expired or unavailable")]
    LoginExpired,

    /// The enclosing operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Too many transient errors accumulated inside one batch call.
    #[error("max retries exceeded after {attempts} errors, last: {last}")]
    RetriesExceeded { attempts: usize, last: String },
}

impl ApiError {
    /// Create a platform error from a code/message pair, mapping the
    /// not-ready code to [`ApiError::RateLimited`].
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        if code == NOT_READY_CODE {
            ApiError::RateLimited { code }
        } else {
            ApiError::Server {
                code,
                message: message.into(),
            }
        }
    }

    /// Fatal errors abort the enclosing batch operation and terminate the
    /// heartbeat. Everything else is handled locally.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::LoginExpired | ApiError::Cancelled)
    }

    /// Transient errors are retried where a retry policy exists, otherwise
    /// logged while the unit of work (one page, one feed) is skipped.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. }
                | ApiError::Server { .. }
                | ApiError::HttpStatus(_)
                | ApiError::Network(_)
                | ApiError::Corrupt(_)
        )
    }
}

/// Feed markup lacked the minimal structural info needed to process it.
///
/// Always routed to the dropped path; never propagates out of a batch call.
#[derive(Debug, Clone, Error)]
#[error("markup missing structural info: {0}")]
pub struct MalformedContent(pub String);

/// Bounded accumulator for transient page-fetch errors within one batch
/// call.
///
/// Each skipped page pushes its error here; once the ceiling is reached the
/// whole batch call aborts with [`ApiError::RetriesExceeded`] instead of
/// spinning on a broken listing forever.
pub struct ErrorStack {
    errors: Vec<ApiError>,
    limit: usize,
}

impl ErrorStack {
    pub fn new(limit: usize) -> Self {
        Self {
            errors: Vec::new(),
            limit,
        }
    }

    /// Record a transient error. Returns `Err` once the ceiling is hit.
    pub fn push(&mut self, err: ApiError) -> Result<(), ApiError> {
        self.errors.push(err);
        if self.errors.len() >= self.limit {
            let last = self
                .errors
                .last()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(ApiError::RetriesExceeded {
                attempts: self.errors.len(),
                last,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}
