//! Quota drivers and their registry.
//!
//! A driver names a kind of quota owner ("project"), declares which resources
//! it accounts for, supplies default hard limits and resolves reference ids.

use crate::error::{QuotaError, QuotaResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tollgate_core::{ResourceError, ResourceErrors, ResourceList, ResourceName, UNLIMITED};

/// Free-form attributes of a quota owner, e.g. `{id, name, owner_name}`.
pub type RefObject = serde_json::Map<String, serde_json::Value>;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Reference name stored in quota records.
    fn name(&self) -> &str;

    /// Resources this driver accounts for.
    fn resources(&self) -> &[ResourceName];

    /// Default hard limits for newly created references.
    fn hard_limits(&self) -> ResourceList;

    /// Resolve a reference id.
    async fn load(&self, key: &str) -> QuotaResult<RefObject>;

    /// Check that `hard` declares exactly this driver's resources, each either
    /// positive or unlimited.
    fn validate(&self, hard: &ResourceList) -> Result<(), ResourceErrors> {
        validate_hard_limits(self.resources(), hard)
    }
}

/// Shared body of [`Driver::validate`].
pub fn validate_hard_limits(
    declared: &[ResourceName],
    hard: &ResourceList,
) -> Result<(), ResourceErrors> {
    if hard.is_empty() {
        return Err(ResourceError::Empty.into());
    }

    let mut errors = ResourceErrors::new();
    for name in hard.names() {
        if !declared.contains(&name) {
            errors.push(ResourceError::Unknown(name));
        }
    }
    for name in declared {
        match hard.get(*name) {
            None => errors.push(ResourceError::Missing(*name)),
            Some(value) if value != UNLIMITED && value <= 0 => {
                errors.push(ResourceError::InvalidValue {
                    resource: *name,
                    value,
                });
            }
            Some(_) => {}
        }
    }
    errors.into_result()
}

/// Drivers keyed by name. Filled at start-up, read-only afterwards.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a driver.
    ///
    /// # Panics
    ///
    /// Panics if a driver with the same name is already registered.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        let name = driver.name().to_string();
        if self.drivers.contains_key(&name) {
            panic!("quota driver {name} registered twice");
        }
        tracing::debug!(driver = %name, "quota driver registered");
        self.drivers.insert(name, driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(name).cloned()
    }

    /// Like [`get`](Self::get) but errors when absent.
    pub fn driver(&self, name: &str) -> QuotaResult<Arc<dyn Driver>> {
        self.get(name)
            .ok_or_else(|| QuotaError::DriverNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}
