//! Configuration Management
//!
//! Settings live in a JSON file. The first file found in the search path is
//! merged over the built-in defaults, so a file only needs the keys it
//! changes.

use crate::output::OutputFormat;
use crate::resource::CollectOptions;
use crate::scan::{AuthErrorPolicy, RetryPolicy, ScanSettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "arnscan.json";

/// AWS and engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsConfig {
    pub default_region: String,
    pub global_services: Vec<String>,
    pub default_services: Vec<String>,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub initial_backoff_secs: f64,
    pub max_backoff_secs: f64,
    /// 0 disables the per-call timeout
    pub call_timeout_secs: u64,
    pub auth_error_policy: AuthErrorPolicy,
    /// Send every request here instead of the AWS endpoints
    pub endpoint_url: Option<String>,
    pub profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub default_output_file: String,
    pub output_format: OutputFormat,
    pub pretty_print: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    /// JSON log lines
    pub structured: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub include_objects: bool,
    pub max_objects_per_bucket: usize,
}

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub aws: AwsConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub scan: ScanConfig,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aws: AwsConfig {
                default_region: "us-east-1".to_string(),
                global_services: strings(&[
                    "iam",
                    "s3",
                    "route53",
                    "cloudfront",
                    "organizations",
                    "waf",
                    "shield",
                    "budgets",
                    "ce",
                    "chatbot",
                    "health",
                ]),
                default_services: strings(&[
                    "ec2",
                    "s3",
                    "lambda",
                    "dynamodb",
                    "rds",
                    "iam",
                    "cloudformation",
                    "sqs",
                    "sns",
                    "kinesisanalytics",
                    "kinesisanalyticsv2",
                    "cloudwatch",
                    "logs",
                    "route53",
                    "ecs",
                    "kms",
                ]),
                max_concurrency: 10,
                max_retries: 5,
                initial_backoff_secs: 1.0,
                max_backoff_secs: 60.0,
                call_timeout_secs: 30,
                auth_error_policy: AuthErrorPolicy::Abort,
                endpoint_url: None,
                profile: None,
            },
            output: OutputConfig {
                default_output_file: "aws_resource_arns.json".to_string(),
                output_format: OutputFormat::Json,
                pretty_print: true,
            },
            logging: LoggingConfig {
                log_level: "info".to_string(),
                log_file: None,
                structured: false,
            },
            scan: ScanConfig {
                include_objects: true,
                max_objects_per_bucket: 100,
            },
        }
    }
}

/// A loaded configuration and where it came from. Problems found while
/// loading are reported once logging is up.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Objects merge key by key; anything else in `overlay` replaces `base`.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

impl Config {
    /// Default location for `config create`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("arnscan").join("config.json"))
    }

    /// Candidate files, most specific first
    pub fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = explicit {
            paths.push(path.to_path_buf());
        }
        paths.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(path) = Self::default_path() {
            paths.push(path);
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".arnscan.json"));
        }
        paths.push(PathBuf::from("/etc/arnscan.json"));
        paths
    }

    /// Parse a (possibly partial) document over the defaults.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let overlay: Value = serde_json::from_str(content).context("Invalid JSON")?;
        let mut merged = serde_json::to_value(Self::default())?;
        deep_merge(&mut merged, overlay);
        let config: Self = serde_json::from_value(merged).context("Invalid configuration value")?;
        config.check_durations()?;
        Ok(config)
    }

    fn check_durations(&self) -> Result<()> {
        let durations = [
            ("aws.initial_backoff_secs", self.aws.initial_backoff_secs),
            ("aws.max_backoff_secs", self.aws.max_backoff_secs),
        ];
        for (key, secs) in durations {
            if Duration::try_from_secs_f64(secs.max(0.0)).is_err() {
                anyhow::bail!("{} out of range: {}", key, secs);
            }
        }
        Ok(())
    }

    /// Load configuration. An explicit path must exist; a malformed file is
    /// reported and the defaults are used.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }

        let Some(path) = Self::search_paths(explicit).into_iter().find(|p| p.is_file()) else {
            return Ok(LoadedConfig {
                config: Self::default(),
                source: None,
                warnings: Vec::new(),
            });
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match Self::from_json_str(&content) {
            Ok(config) => Ok(LoadedConfig {
                config,
                source: Some(path),
                warnings: Vec::new(),
            }),
            Err(e) => Ok(LoadedConfig {
                config: Self::default(),
                source: None,
                warnings: vec![format!(
                    "Ignoring malformed config {}: {:#}",
                    path.display(),
                    e
                )],
            }),
        }
    }

    /// Save configuration to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Services to scan: the defaults plus `extra`, or only `extra`.
    pub fn services(&self, extra: &[String], only: bool) -> Vec<String> {
        let mut services = if only {
            Vec::new()
        } else {
            self.aws.default_services.clone()
        };
        for service in extra {
            if !services.contains(service) {
                services.push(service.clone());
            }
        }
        services
    }

    pub fn scan_settings(&self) -> ScanSettings {
        let aws = &self.aws;
        let defaults = RetryPolicy::default();
        ScanSettings {
            default_region: aws.default_region.clone(),
            global_services: aws.global_services.iter().cloned().collect(),
            max_concurrency: aws.max_concurrency.max(1),
            retry: RetryPolicy {
                max_retries: aws.max_retries,
                initial_backoff: seconds_or(aws.initial_backoff_secs, defaults.initial_backoff),
                max_backoff: seconds_or(aws.max_backoff_secs, defaults.max_backoff),
                call_timeout: (aws.call_timeout_secs > 0)
                    .then(|| Duration::from_secs(aws.call_timeout_secs)),
            },
            auth_error_policy: aws.auth_error_policy,
            collect: CollectOptions {
                include_objects: self.scan.include_objects,
                max_objects_per_bucket: self.scan.max_objects_per_bucket,
            },
        }
    }
}

/// Negative values clamp to zero; values `Duration` cannot hold fall back.
fn seconds_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(fallback)
}
