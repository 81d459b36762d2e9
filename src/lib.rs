//! arnscan - discover the ARN of every resource an AWS account owns
//!
//! Most services are described by data (which list call to make, where the
//! items are in the response, how to turn an item into an ARN); a handful of
//! multi-call services have hand-written collectors. The scanner fans the
//! `(service, region)` matrix out over a bounded pool and merges everything
//! into one ARN set.
//!
//! ```ignore
//! use arnscan::aws::AwsClient;
//! use arnscan::scan::{RegionSelection, ScanRequest, ScanSettings, Scanner};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let client = AwsClient::from_env(None, None)?;
//!     let scanner = Scanner::new(Arc::new(client), ScanSettings::default());
//!     let request = ScanRequest {
//!         services: vec!["lambda".into(), "s3".into()],
//!         regions: RegionSelection::All,
//!     };
//!     let outcome = scanner.scan(&request, CancellationToken::new()).await?;
//!     println!("{} resources", outcome.arns.len());
//!     Ok(())
//! }
//! ```

pub mod arn;
pub mod aws;
pub mod config;
pub mod output;
pub mod resource;
pub mod scan;

/// Version injected at compile time via ARNSCAN_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("ARNSCAN_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
