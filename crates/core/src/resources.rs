//! Resource list algebra for quota accounting.
//!
//! A [`ResourceList`] maps a [`ResourceName`] to an `i64` amount. Hard limits
//! may carry the [`UNLIMITED`] sentinel, which disables the ceiling for that
//! resource. Lists serialise to canonical JSON with sorted keys so that a
//! stored value round-trips byte for byte.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sentinel hard limit meaning "no ceiling".
pub const UNLIMITED: i64 = -1;

/// A countable quota dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceName {
    /// Number of artifacts (tags or chart versions).
    Count,
    /// Bytes of blob storage.
    Storage,
}

impl ResourceName {
    /// All known resource names.
    pub const ALL: [ResourceName; 2] = [ResourceName::Count, ResourceName::Storage];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceName {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "count" => Ok(Self::Count),
            "storage" => Ok(Self::Storage),
            other => Err(crate::Error::InvalidResourceName(other.to_string())),
        }
    }
}

/// A single resource accounting failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("hard limit for resource {0} not found")]
    NotFound(ResourceName),

    #[error(
        "quota exceeded for resource {resource}: hard limit {hard}, current {current}, attempted {attempted}"
    )]
    Overflow {
        resource: ResourceName,
        hard: i64,
        current: i64,
        attempted: i64,
    },

    #[error("resource {0} is not declared by the driver")]
    Unknown(ResourceName),

    #[error("hard limit for declared resource {0} is missing")]
    Missing(ResourceName),

    #[error("invalid hard limit {value} for resource {resource}")]
    InvalidValue { resource: ResourceName, value: i64 },

    #[error("hard limits must not be empty")]
    Empty,

    #[error("hard limit {hard} for resource {resource} is below current usage {used}")]
    BelowUsage {
        resource: ResourceName,
        hard: i64,
        used: i64,
    },
}

/// An accumulated set of resource errors, one per offending resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Error)]
#[error("{}", format_errors(.0))]
pub struct ResourceErrors(Vec<ResourceError>);

fn format_errors(errors: &[ResourceError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ResourceErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ResourceError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceError> {
        self.0.iter()
    }

    /// Whether any member is an overflow.
    pub fn has_overflow(&self) -> bool {
        self.0
            .iter()
            .any(|e| matches!(e, ResourceError::Overflow { .. }))
    }

    /// `Ok(())` when empty, otherwise the whole set.
    pub fn into_result(self) -> Result<(), ResourceErrors> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<ResourceError> for ResourceErrors {
    fn from(error: ResourceError) -> Self {
        Self(vec![error])
    }
}

impl IntoIterator for ResourceErrors {
    type Item = ResourceError;
    type IntoIter = std::vec::IntoIter<ResourceError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Mapping of resource name to amount.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceList(BTreeMap<ResourceName, i64>);

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a resource list from its JSON form.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::Error::InvalidResourceList(e.to_string()))
    }

    /// Canonical JSON with keys in sorted order.
    pub fn to_json(&self) -> String {
        // A BTreeMap of enum keys to integers cannot fail to serialise.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: ResourceName, value: i64) -> Self {
        self.0.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: ResourceName, value: i64) -> Option<i64> {
        self.0.insert(name, value)
    }

    pub fn get(&self, name: ResourceName) -> Option<i64> {
        self.0.get(&name).copied()
    }

    pub fn contains(&self, name: ResourceName) -> bool {
        self.0.contains_key(&name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn names(&self) -> impl Iterator<Item = ResourceName> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceName, i64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// Whether every value is zero (or the list is empty).
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| *v == 0)
    }

    /// Pointwise sum. Missing entries count as zero; `UNLIMITED` on the left
    /// absorbs the right-hand value.
    pub fn add(&self, other: &ResourceList) -> ResourceList {
        self.combine(other, i64::saturating_add)
    }

    /// Pointwise difference with the same defaulting as [`ResourceList::add`].
    pub fn subtract(&self, other: &ResourceList) -> ResourceList {
        self.combine(other, i64::saturating_sub)
    }

    fn combine(&self, other: &ResourceList, op: fn(i64, i64) -> i64) -> ResourceList {
        let mut result = BTreeMap::new();
        for name in self.0.keys().chain(other.0.keys()) {
            if result.contains_key(name) {
                continue;
            }
            let left = self.0.get(name).copied().unwrap_or(0);
            let right = other.0.get(name).copied().unwrap_or(0);
            let value = if left == UNLIMITED && self.0.contains_key(name) {
                UNLIMITED
            } else {
                op(left, right)
            };
            result.insert(*name, value);
        }
        ResourceList(result)
    }

    /// True iff both lists carry the same resources with the same values.
    pub fn equals(&self, other: &ResourceList) -> bool {
        self.0 == other.0
    }

    /// Same resources, all set to zero.
    pub fn zero(&self) -> ResourceList {
        ResourceList(self.0.keys().map(|k| (*k, 0)).collect())
    }

    /// Resources with a negative amount.
    pub fn is_negative(&self) -> Vec<ResourceName> {
        self.0
            .iter()
            .filter(|(_, v)| **v < 0)
            .map(|(k, _)| *k)
            .collect()
    }
}

impl PartialEq for ResourceList {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for ResourceList {}

impl fmt::Display for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

impl FromIterator<(ResourceName, i64)> for ResourceList {
    fn from_iter<T: IntoIterator<Item = (ResourceName, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Check a transition from `current` to `next` against `hard`.
///
/// Every resource in `next` must have a hard limit. Resources whose amount is
/// unchanged are skipped even when already above the limit, so legacy
/// over-usage does not block unrelated operations.
pub fn is_safe(
    hard: &ResourceList,
    current: &ResourceList,
    next: &ResourceList,
) -> Result<(), ResourceErrors> {
    let mut errors = ResourceErrors::new();

    for (resource, attempted) in next.iter() {
        let Some(limit) = hard.get(resource) else {
            errors.push(ResourceError::NotFound(resource));
            continue;
        };

        let used = current.get(resource).unwrap_or(0);
        if limit != UNLIMITED && attempted != used && attempted > limit {
            errors.push(ResourceError::Overflow {
                resource,
                hard: limit,
                current: used,
                attempted,
            });
        }
    }

    errors.into_result()
}

/// Check that new hard limits still cover `used`.
pub fn covers_usage(hard: &ResourceList, used: &ResourceList) -> Result<(), ResourceErrors> {
    let mut errors = ResourceErrors::new();
    for (resource, limit) in hard.iter() {
        let used = used.get(resource).unwrap_or(0);
        if limit != UNLIMITED && used > limit {
            errors.push(ResourceError::BelowUsage {
                resource,
                hard: limit,
                used,
            });
        }
    }
    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResourceName::{Count, Storage};

    #[test]
    fn test_covers_usage() {
        let used = ResourceList::new().with(Count, 3).with(Storage, 100);
        assert!(covers_usage(&ResourceList::new().with(Count, 3).with(Storage, UNLIMITED), &used).is_ok());

        let errors = covers_usage(&ResourceList::new().with(Count, 2).with(Storage, 99), &used)
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(!errors.has_overflow());
    }

    #[test]
    fn test_json_roundtrip_is_canonical() {
        let list = ResourceList::new().with(Storage, 1024).with(Count, 3);
        let json = list.to_json();
        assert_eq!(json, r#"{"count":3,"storage":1024}"#);
        assert_eq!(ResourceList::from_json(&json).unwrap(), list);
    }

    #[test]
    fn test_from_json_rejects_unknown_resource() {
        let err = ResourceList::from_json(r#"{"cpu":1}"#).unwrap_err();
        assert!(matches!(err, crate::Error::InvalidResourceList(_)));
    }

    #[test]
    fn test_add_defaults_missing_to_zero() {
        let a = ResourceList::new().with(Count, 1);
        let b = ResourceList::new().with(Storage, 10);
        let sum = a.add(&b);
        assert_eq!(sum, ResourceList::new().with(Count, 1).with(Storage, 10));
    }

    #[test]
    fn test_subtract_pointwise() {
        let a = ResourceList::new().with(Count, 5).with(Storage, 100);
        let b = ResourceList::new().with(Count, 2);
        assert_eq!(
            a.subtract(&b),
            ResourceList::new().with(Count, 3).with(Storage, 100)
        );
        assert_eq!(b.subtract(&a).get(Storage), Some(-100));
    }

    #[test]
    fn test_unlimited_absorbs_on_left() {
        let hard = ResourceList::new().with(Storage, UNLIMITED);
        let delta = ResourceList::new().with(Storage, 500);
        assert_eq!(hard.add(&delta).get(Storage), Some(UNLIMITED));
        assert_eq!(hard.subtract(&delta).get(Storage), Some(UNLIMITED));
    }

    #[test]
    fn test_equals_requires_same_keys() {
        let a = ResourceList::new().with(Count, 0);
        let b = ResourceList::new();
        assert!(!a.equals(&b));
        assert!(a.equals(&a.clone()));
    }

    #[test]
    fn test_zero_and_is_negative() {
        let list = ResourceList::new().with(Count, -2).with(Storage, 7);
        assert_eq!(list.zero(), ResourceList::new().with(Count, 0).with(Storage, 0));
        assert_eq!(list.is_negative(), vec![Count]);
    }

    #[test]
    fn test_is_safe_reports_overflow() {
        let hard = ResourceList::new().with(Storage, 1000);
        let current = ResourceList::new().with(Storage, 950);
        let next = ResourceList::new().with(Storage, 1150);

        let errors = is_safe(&hard, &current, &next).unwrap_err();
        assert!(errors.has_overflow());
        assert_eq!(
            errors.iter().next(),
            Some(&ResourceError::Overflow {
                resource: Storage,
                hard: 1000,
                current: 950,
                attempted: 1150,
            })
        );
    }

    #[test]
    fn test_is_safe_accumulates_every_resource() {
        let hard = ResourceList::new().with(Count, 1);
        let current = ResourceList::new().with(Count, 1);
        let next = ResourceList::new().with(Count, 2).with(Storage, 5);

        let errors = is_safe(&hard, &current, &next).unwrap_err();
        assert_eq!(errors.len(), 2);
        let message = errors.to_string();
        assert!(message.contains("count"));
        assert!(message.contains("storage"));
    }

    #[test]
    fn test_is_safe_skips_unchanged_over_usage() {
        let hard = ResourceList::new().with(Count, 1).with(Storage, 10);
        let current = ResourceList::new().with(Count, 5).with(Storage, 1);
        let next = ResourceList::new().with(Count, 5).with(Storage, 2);
        assert!(is_safe(&hard, &current, &next).is_ok());
    }

    #[test]
    fn test_is_safe_no_op_is_always_safe() {
        let hard = ResourceList::new().with(Count, 1).with(Storage, 10);
        for used in [0, 1, 10, 500] {
            let current = ResourceList::new().with(Count, used).with(Storage, used);
            assert!(is_safe(&hard, &current, &current).is_ok());
        }
    }

    #[test]
    fn test_is_safe_unlimited_never_overflows() {
        let hard = ResourceList::new().with(Storage, UNLIMITED);
        let current = ResourceList::new().with(Storage, 0);
        let next = ResourceList::new().with(Storage, i64::MAX);
        assert!(is_safe(&hard, &current, &next).is_ok());
    }
}
