//! Resource abstraction layer
//!
//! This module provides a data-driven approach to discovering AWS resources.
//! Service mappings are loaded from JSON files at compile time, allowing
//! new services to be added without code changes.
//!
//! # Architecture
//!
//! - [`registry`] - Loads and validates service mappings from embedded JSON
//! - [`extract`] - Turns one list response into ARNs according to a mapping
//! - [`collector`] - The per-task collector trait, the generic collector and
//!   the registry that picks between it and an override
//! - [`overrides`] - Hand-written collectors for multi-call services
//!
//! # Mapping Definitions
//!
//! Mappings are defined in JSON files under `src/resources/`, grouped by
//! area (`compute.json`, `database.json`, `security.json`, ...):
//!
//! ```json
//! "lambda": {
//!   "method": "list_functions",
//!   "key": "Functions",
//!   "mode": "object_list",
//!   "arn_attr": "FunctionArn",
//!   "pagination": {"input_token": "Marker", "output_token": "NextMarker"}
//! }
//! ```

pub mod collector;
pub mod extract;
pub mod overrides;
pub mod registry;

pub use collector::{
    CollectOptions, Collector, CollectorRegistry, GenericCollector, Lookup, TaskContext,
};
pub use extract::extract;
pub use registry::{get_mapping, get_registry, Extraction, MappingRegistry, ServiceMapping};
