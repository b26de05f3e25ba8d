//! Error types and HTTP response conversion
//!
//! Control-plane failures are carried as [`PrismError`], a structured record
//! with a stable code, category, severity, optional retry advice, and
//! structured details. The [`Error`] enum wraps it together with the
//! infrastructure errors (config, I/O, storage, serialization) that occur
//! before a structured record can be built.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Structured control-plane errors
// ============================================================================

/// Stable machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request failed validation
    ValidationFailed,
    /// Referenced resource does not exist
    NotFound,
    /// Resource already exists
    AlreadyExists,
    /// No pattern instance is connected for the target
    PatternNotConnected,
    /// The target pattern did not declare the requested interface
    InterfaceNotSupported,
    /// No proxy is assigned to the computed partition
    NoProxyAvailable,
    /// No launcher has a free slot
    CapacityExhausted,
    /// Caller deadline elapsed before a response arrived
    DeadlineExceeded,
    /// A peer violated the control-stream protocol
    ProtocolViolation,
    /// A backend operation failed
    BackendFailure,
    /// A lifecycle command was rejected by the pattern
    LifecycleRejected,
    /// Caller is not authenticated
    Unauthenticated,
    /// Caller is not authorized
    PermissionDenied,
    /// Too many requests
    RateLimited,
    /// Unexpected internal failure
    Internal,
}

impl ErrorCode {
    /// Default category for this code
    pub fn category(self) -> Category {
        match self {
            Self::ValidationFailed => Category::Validation,
            Self::NotFound | Self::AlreadyExists | Self::NoProxyAvailable | Self::CapacityExhausted => {
                Category::Resource
            }
            Self::PatternNotConnected => Category::Concurrency,
            Self::InterfaceNotSupported => Category::InterfaceNotSupported,
            Self::DeadlineExceeded => Category::Timeout,
            Self::ProtocolViolation => Category::Concurrency,
            Self::BackendFailure => Category::Backend,
            Self::LifecycleRejected => Category::Concurrency,
            Self::Unauthenticated => Category::Authentication,
            Self::PermissionDenied => Category::Authorization,
            Self::RateLimited => Category::RateLimit,
            Self::Internal => Category::Backend,
        }
    }

    /// HTTP status used by the admin RPC surface and audit rows
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists => StatusCode::CONFLICT,
            Self::PatternNotConnected => StatusCode::SERVICE_UNAVAILABLE,
            Self::InterfaceNotSupported => StatusCode::NOT_IMPLEMENTED,
            Self::NoProxyAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::CapacityExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::ProtocolViolation => StatusCode::BAD_REQUEST,
            Self::BackendFailure => StatusCode::BAD_GATEWAY,
            Self::LifecycleRejected => StatusCode::CONFLICT,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PatternNotConnected => "PATTERN_NOT_CONNECTED",
            Self::InterfaceNotSupported => "INTERFACE_NOT_SUPPORTED",
            Self::NoProxyAvailable => "NO_PROXY_AVAILABLE",
            Self::CapacityExhausted => "CAPACITY_EXHAUSTED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::BackendFailure => "BACKEND_FAILURE",
            Self::LifecycleRejected => "LIFECYCLE_REJECTED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Error severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, no action required
    Info,
    /// Degraded but functional
    Warning,
    /// Operation failed
    #[default]
    Error,
    /// Component-level failure
    Critical,
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Validation,
    Resource,
    Backend,
    Timeout,
    RateLimit,
    Concurrency,
    Authentication,
    Authorization,
    InterfaceNotSupported,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Resource => "resource",
            Self::Backend => "backend",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Concurrency => "concurrency",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::InterfaceNotSupported => "interface_not_supported",
        };
        write!(f, "{}", s)
    }
}

/// Backoff strategy attached to a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffStrategy {
    None,
    Linear,
    Exponential { multiplier: f64 },
    Jittered,
}

/// Advisory retry policy; callers are free to honour or override it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Whether a retry is expected to succeed
    pub retryable: bool,
    /// Suggested delay before the first retry, in milliseconds
    pub delay_ms: u64,
    /// Suggested maximum number of retries
    pub max_retries: u32,
    /// Suggested backoff shape
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    /// A non-retryable policy
    pub fn never() -> Self {
        Self {
            retryable: false,
            delay_ms: 0,
            max_retries: 0,
            backoff: BackoffStrategy::None,
        }
    }

    /// Retry with jittered exponential backoff
    pub fn jittered(delay_ms: u64, max_retries: u32) -> Self {
        Self {
            retryable: true,
            delay_ms,
            max_retries,
            backoff: BackoffStrategy::Jittered,
        }
    }
}

/// Structured detail attached to an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum ErrorDetail {
    /// A request field failed validation
    FieldViolation { field: String, description: String },
    /// A backend operation failed
    BackendError {
        backend: String,
        operation: String,
        message: String,
    },
    /// A pattern rejected or failed a lifecycle operation
    PatternError {
        pattern: String,
        state: String,
        message: String,
    },
    /// A quota or capacity limit was hit
    QuotaViolation {
        subject: String,
        limit: i64,
        current: i64,
    },
    /// A precondition for the operation does not hold
    PreconditionFailure {
        kind: String,
        subject: String,
        description: String,
    },
    /// Information about the resource involved
    ResourceInfo {
        resource_type: String,
        resource_id: String,
        description: String,
    },
}

/// Debug information, populated only when debug reporting is enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DebugInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

/// Structured control-plane error record
///
/// Serializable so it can cross the control stream unmodified and land in
/// audit rows. Construction is fluent:
///
/// ```
/// use prism::error::{PrismError, ErrorCode, RetryPolicy};
///
/// let err = PrismError::new(ErrorCode::PatternNotConnected, "no instance for namespace")
///     .with_namespace("mailbox-x")
///     .with_component("proxy")
///     .with_retry(RetryPolicy::jittered(250, 5));
/// assert!(err.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrismError {
    /// Stable code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Category
    pub category: Category,
    /// Request id, when the error occurred inside a tracked request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Component the error originated in (admin, proxy, launcher, pattern)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    /// Namespace involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Advisory retry policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Structured details
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    /// Chain of causes, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    /// Links to remediation documentation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub help_links: Vec<String>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Debug info
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

impl PrismError {
    /// Create a new error with the code's default category and severity
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
            category: code.category(),
            request_id: None,
            component: None,
            namespace: None,
            retry: None,
            details: Vec::new(),
            causes: Vec::new(),
            help_links: Vec::new(),
            metadata: BTreeMap::new(),
            debug: None,
        }
    }

    /// Validation failure on a specific field
    pub fn validation(field: impl Into<String>, description: impl Into<String>) -> Self {
        let field = field.into();
        let description = description.into();
        Self::new(
            ErrorCode::ValidationFailed,
            format!("invalid {}: {}", field, description),
        )
        .with_detail(ErrorDetail::FieldViolation { field, description })
    }

    /// Referenced resource does not exist
    pub fn not_found(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        let resource_id = resource_id.into();
        Self::new(
            ErrorCode::NotFound,
            format!("{} {:?} not found", resource_type, resource_id),
        )
        .with_detail(ErrorDetail::ResourceInfo {
            resource_type,
            resource_id,
            description: "resource does not exist".to_string(),
        })
    }

    /// Resource already exists
    pub fn already_exists(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        let resource_id = resource_id.into();
        Self::new(
            ErrorCode::AlreadyExists,
            format!("{} {:?} already exists", resource_type, resource_id),
        )
        .with_detail(ErrorDetail::ResourceInfo {
            resource_type,
            resource_id,
            description: "resource already exists".to_string(),
        })
    }

    /// No pattern instance connected; retryable since the launcher restarts crashed patterns
    pub fn pattern_not_connected(target: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PatternNotConnected,
            format!("no connected pattern instance for {:?}", target.into()),
        )
        .with_retry(RetryPolicy::jittered(250, 5))
    }

    /// Pattern did not declare the interface the namespace is configured for
    pub fn interface_not_supported(
        interface: impl Into<String>,
        missing: impl Into<String>,
    ) -> Self {
        let interface = interface.into();
        let missing = missing.into();
        Self::new(
            ErrorCode::InterfaceNotSupported,
            format!("interface {:?} not supported: missing {}", interface, missing),
        )
        .with_detail(ErrorDetail::PreconditionFailure {
            kind: "interface_declaration".to_string(),
            subject: interface,
            description: format!("missing {}", missing),
        })
    }

    /// No proxy assigned to the computed partition; includes remediation steps
    pub fn no_proxy_available(partition: u32) -> Self {
        Self::new(
            ErrorCode::NoProxyAvailable,
            format!("no proxy available for partition {}", partition),
        )
        .with_severity(Severity::Critical)
        .with_help_link("https://prism.example/docs/operations/proxies")
        .with_metadata("remediation", "start a proxy process and wait for it to register, or verify the configured admin gateway address on existing proxies")
    }

    /// Caller deadline elapsed
    pub fn deadline_exceeded(operation: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DeadlineExceeded,
            format!("deadline exceeded waiting for {}", operation.into()),
        )
        .with_retry(RetryPolicy::jittered(500, 3))
    }

    /// A peer violated the control-stream protocol; the stream is closed
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolViolation, message).with_severity(Severity::Critical)
    }

    /// A backend operation failed
    pub fn backend(
        backend: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let backend = backend.into();
        let operation = operation.into();
        let message = message.into();
        Self::new(
            ErrorCode::BackendFailure,
            format!("backend {} failed during {}: {}", backend, operation, message),
        )
        .with_detail(ErrorDetail::BackendError {
            backend,
            operation,
            message,
        })
    }

    /// Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message).with_severity(Severity::Critical)
    }

    /// Override the severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Override the category
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Attach the request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach the originating component
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Attach the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Attach a retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Attach a structured detail
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Append a cause to the chain
    pub fn caused_by(mut self, cause: impl fmt::Display) -> Self {
        self.causes.push(cause.to_string());
        self
    }

    /// Attach a help link
    pub fn with_help_link(mut self, link: impl Into<String>) -> Self {
        self.help_links.push(link.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the attached retry policy permits a retry
    pub fn is_retryable(&self) -> bool {
        self.retry.as_ref().map(|r| r.retryable).unwrap_or(false)
    }

    /// HTTP status for the admin surface and audit rows
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }
}

impl fmt::Display for PrismError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.code, self.category, self.message)?;
        if let Some(ref ns) = self.namespace {
            write!(f, " (namespace: {})", ns)?;
        }
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for PrismError {}

// ============================================================================
// Crate-level error enum
// ============================================================================

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
///
/// Large variants are boxed to keep the type small on the stack.
#[derive(Debug, Error)]
pub enum Error {
    /// Structured control-plane error
    #[error("{0}")]
    Status(Box<PrismError>),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(Box<sqlx::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encode/decode error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Borrow the structured record, if this is a structured error
    pub fn status(&self) -> Option<&PrismError> {
        match self {
            Error::Status(e) => Some(e),
            _ => None,
        }
    }

    /// HTTP status for the admin surface and audit rows
    pub fn http_status(&self) -> StatusCode {
        match self {
            Error::Status(e) => e.http_status(),
            Error::Config(_) | Error::Storage(_) | Error::Io(_) | Error::Serde(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a retry is advised
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Status(e) => e.is_retryable(),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

impl From<PrismError> for Error {
    fn from(err: PrismError) -> Self {
        Error::Status(Box::new(err))
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(Box::new(err))
    }
}

/// Error response body returned by the admin RPC surface
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Stable code, when the error is structured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// HTTP status code
    pub status: u16,
    /// Full structured record, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<PrismError>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = match self {
            Error::Status(e) => {
                tracing::error!(
                    code = %e.code,
                    category = %e.category,
                    namespace = ?e.namespace,
                    retryable = e.is_retryable(),
                    "Request failed: {}", e.message
                );
                ErrorResponse {
                    error: e.message.clone(),
                    code: Some(e.code.to_string()),
                    status: status.as_u16(),
                    detail: Some(*e),
                }
            }
            other => {
                tracing::error!("Request failed: {}", other);
                ErrorResponse {
                    error: other.to_string(),
                    code: None,
                    status: status.as_u16(),
                    detail: None,
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fluent_construction() {
        let err = PrismError::new(ErrorCode::BackendFailure, "write failed")
            .with_namespace("mailbox-x")
            .with_component("pattern")
            .caused_by("disk full")
            .with_metadata("slot", "table_writer");
        assert_eq!(err.code, ErrorCode::BackendFailure);
        assert_eq!(err.category, Category::Backend);
        assert_eq!(err.namespace.as_deref(), Some("mailbox-x"));
        assert_eq!(err.causes, vec!["disk full".to_string()]);
        assert_eq!(err.metadata.get("slot").map(String::as_str), Some("table_writer"));
    }

    #[test]
    fn test_default_categories() {
        assert_eq!(ErrorCode::DeadlineExceeded.category(), Category::Timeout);
        assert_eq!(
            ErrorCode::InterfaceNotSupported.category(),
            Category::InterfaceNotSupported
        );
        assert_eq!(ErrorCode::PermissionDenied.category(), Category::Authorization);
    }

    #[test]
    fn test_retryability() {
        assert!(PrismError::pattern_not_connected("mailbox-x").is_retryable());
        assert!(PrismError::deadline_exceeded("initialize").is_retryable());
        assert!(!PrismError::already_exists("namespace", "mailbox-x").is_retryable());
        assert!(!PrismError::protocol_violation("duplicate correlation id").is_retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            PrismError::no_proxy_available(3).http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PrismError::already_exists("namespace", "x").http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PrismError::not_found("namespace", "x").http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PrismError::interface_not_supported("table_writer", "WriteEvent").http_status(),
            StatusCode::NOT_IMPLEMENTED
        );
    }

    #[test]
    fn test_no_proxy_remediation() {
        let err = PrismError::no_proxy_available(0);
        assert!(err.metadata.contains_key("remediation"));
        assert!(!err.help_links.is_empty());
        assert_eq!(err.severity, Severity::Critical);
    }

    #[test]
    fn test_serde_round_trip() {
        let err = PrismError::interface_not_supported("table_writer", "WriteEvent")
            .with_namespace("mailbox-x")
            .with_retry(RetryPolicy::never());
        let json = serde_json::to_string(&err).unwrap();
        let back: PrismError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn test_display_includes_chain() {
        let err = PrismError::internal("dispatch failed").caused_by("channel closed");
        let s = err.to_string();
        assert!(s.contains("INTERNAL"));
        assert!(s.contains("channel closed"));
    }
}
