//! Quota engine for tollgate.
//!
//! - [`Manager`]: transactional charges and credits with overflow detection
//! - [`Driver`] and [`DriverRegistry`]: which resources a reference kind
//!   accounts for, and its default hard limits
//! - [`ProjectDriver`]: the `project` driver

pub mod driver;
pub mod error;
pub mod manager;
pub mod project;

pub use driver::{Driver, DriverRegistry, RefObject, validate_hard_limits};
pub use error::{QuotaError, QuotaResult};
pub use manager::Manager;
pub use project::{PROJECT_REFERENCE, ProjectDriver};

use std::sync::Arc;
use tollgate_core::config::QuotaConfig;
use tollgate_metadata::MetadataStore;

/// Registry holding the built-in drivers.
pub fn default_registry(store: Arc<dyn MetadataStore>, config: &QuotaConfig) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(ProjectDriver::from_config(store, config)));
    registry
}
