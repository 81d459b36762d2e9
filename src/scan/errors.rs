//! Error Classifier
//!
//! Maps raw API faults onto the small taxonomy the scan logic branches on.
//! Classification is pure. [`log_fault`] picks the log level for a kind, for
//! every place that records a failure.

use crate::aws::ApiFault;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{error, info, warn};

/// What went wrong, as far as scan control flow is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AccessDenied,
    Throttled,
    NotFound,
    RegionOptIn,
    AuthError,
    ApiError,
    GeneralError,
    /// No mapping and no override exist for the service.
    Unsupported,
}

impl ErrorKind {
    /// Only throttling is worth another attempt.
    pub fn is_retryable(self) -> bool {
        self == ErrorKind::Throttled
    }

    /// Credential failures end the whole scan.
    pub fn is_fatal(self) -> bool {
        self == ErrorKind::AuthError
    }

    /// Nothing else in the task is worth calling: the credentials are bad or
    /// the service is not enabled in this region.
    pub fn stops_task(self) -> bool {
        self.is_fatal() || self == ErrorKind::RegionOptIn
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::Throttled => "throttled",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RegionOptIn => "region_opt_in",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::ApiError => "api_error",
            ErrorKind::GeneralError => "general_error",
            ErrorKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ACCESS_DENIED: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "UnauthorizedAccess",
    "AuthorizationError",
];

const THROTTLED: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "RequestThrottledException",
    "RequestThrottled",
    "SlowDown",
    "ProvisionedThroughputExceededException",
];

const NOT_FOUND: &[&str] = &[
    "ResourceNotFoundException",
    "NoSuchEntity",
    "NoSuchBucket",
    "NoSuchKey",
    "NotFoundException",
];

const REGION_OPT_IN: &[&str] = &["OptInRequired", "NotSignedUp", "SubscriptionRequiredException"];

const AUTH_ERROR: &[&str] = &[
    "InvalidClientTokenId",
    "AuthFailure",
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
];

/// Log a failed call or task at the level its kind deserves. `subject` names
/// what failed (`ec2`, `ec2 describe_volumes`).
pub fn log_fault(kind: ErrorKind, subject: &str, region: &str, fault: &ApiFault) {
    match kind {
        ErrorKind::AccessDenied => warn!(
            kind = %kind,
            "Access denied for {} in {}: {}",
            subject, region, fault
        ),
        ErrorKind::Throttled => warn!(
            kind = %kind,
            "Still throttled after retries for {} in {}: {}",
            subject, region, fault
        ),
        ErrorKind::NotFound | ErrorKind::RegionOptIn | ErrorKind::Unsupported => info!(
            kind = %kind,
            "{} unavailable in {}: {}",
            subject, region, fault
        ),
        ErrorKind::AuthError => error!(
            kind = %kind,
            "Authentication failed for {} in {}: {}",
            subject, region, fault
        ),
        ErrorKind::ApiError | ErrorKind::GeneralError => error!(
            kind = %kind,
            "Error scanning {} in {}: {}",
            subject, region, fault
        ),
    }
}

/// Code vocabulary lookup. Codes outside the vocabulary are `ApiError`.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    codes: HashMap<String, ErrorKind>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let mut codes = HashMap::new();
        for (kind, list) in [
            (ErrorKind::AccessDenied, ACCESS_DENIED),
            (ErrorKind::Throttled, THROTTLED),
            (ErrorKind::NotFound, NOT_FOUND),
            (ErrorKind::RegionOptIn, REGION_OPT_IN),
            (ErrorKind::AuthError, AUTH_ERROR),
        ] {
            for code in list {
                codes.insert((*code).to_string(), kind);
            }
        }
        Self { codes }
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend (or override) the vocabulary with one more code.
    pub fn with_code(mut self, kind: ErrorKind, code: &str) -> Self {
        self.codes.insert(code.to_string(), kind);
        self
    }

    pub fn classify(&self, fault: &ApiFault) -> ErrorKind {
        match fault {
            ApiFault::Service { code, .. } => self
                .codes
                .get(code.as_str())
                .copied()
                .unwrap_or(ErrorKind::ApiError),
            ApiFault::Transport(_) | ApiFault::Timeout => ErrorKind::GeneralError,
        }
    }
}
