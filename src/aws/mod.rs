//! AWS API interaction module
//!
//! Everything the scanner needs to talk to AWS goes through the
//! [`CloudClient`] trait, so the engine can be driven by the real signed HTTP
//! client or by an in-memory fake in tests.
//!
//! # Module Structure
//!
//! - [`catalog`] - Per-service wire details (protocol, endpoint, REST routes)
//! - [`credentials`] - Credentials from the environment or the shared credentials file
//! - [`signing`] - SigV4 request signing
//! - [`http`] - The signed HTTP client implementing [`CloudClient`]
//! - [`xml`] - XML response decoding into the SDK-style JSON shape

pub mod catalog;
pub mod credentials;
pub mod http;
pub mod signing;
pub mod xml;

use async_trait::async_trait;
use serde_json::Value;

pub use credentials::Credentials;
pub use http::AwsClient;

/// A failed remote call, before classification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiFault {
    /// The service answered with an error code.
    #[error("{code}: {message} (HTTP {status})")]
    Service {
        code: String,
        message: String,
        status: u16,
    },
    /// The request never produced a service answer (DNS, TLS, connection reset, bad body).
    #[error("transport error: {0}")]
    Transport(String),
    /// The per-call timeout expired.
    #[error("call timed out")]
    Timeout,
}

impl ApiFault {
    pub fn service(code: &str, message: &str, status: u16) -> Self {
        Self::Service {
            code: code.to_string(),
            message: message.to_string(),
            status,
        }
    }

    /// The remote error code, if the service produced one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Invoke a named list/describe operation of a service in a region.
///
/// `method` is the snake_case SDK operation name (`list_functions`), `params`
/// a JSON object of request parameters (possibly empty).
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn invoke(
        &self,
        service: &str,
        method: &str,
        region: &str,
        params: &Value,
    ) -> Result<Value, ApiFault>;
}
