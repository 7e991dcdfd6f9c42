//! Tag immutability rule types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Scope selector key for repository selectors.
pub const SCOPE_REPOSITORY: &str = "repository";

/// Selector kind for doublestar glob patterns.
pub const KIND_DOUBLESTAR: &str = "doublestar";

/// Operator applied by a selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Decoration {
    /// Keep candidates matching the pattern.
    #[serde(alias = "repoMatches")]
    Matches,
    /// Keep candidates not matching the pattern.
    #[serde(alias = "repoExcludes")]
    Excludes,
}

impl Decoration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Matches => "matches",
            Self::Excludes => "excludes",
        }
    }
}

impl fmt::Display for Decoration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single selector: matcher family, operator and pattern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub kind: String,
    pub decoration: Decoration,
    pub pattern: String,
}

impl Selector {
    pub fn doublestar(decoration: Decoration, pattern: impl Into<String>) -> Self {
        Self {
            kind: KIND_DOUBLESTAR.to_string(),
            decoration,
            pattern: pattern.into(),
        }
    }
}

/// A project-scoped immutability rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmutableRule {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub project_id: i64,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tag_selectors: Vec<Selector>,
    #[serde(default)]
    pub scope_selectors: HashMap<String, Vec<Selector>>,
}

impl ImmutableRule {
    /// Repository scope selectors, empty when none are configured.
    pub fn repository_selectors(&self) -> &[Selector] {
        self.scope_selectors
            .get(SCOPE_REPOSITORY)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Reject rules that cannot match anything meaningful.
    pub fn validate(&self) -> crate::Result<()> {
        if self.tag_selectors.is_empty() {
            return Err(crate::Error::InvalidRule(
                "at least one tag selector is required".to_string(),
            ));
        }
        if let Some(key) = self
            .scope_selectors
            .keys()
            .find(|k| k.as_str() != SCOPE_REPOSITORY)
        {
            return Err(crate::Error::InvalidRule(format!(
                "unsupported scope selector: {key}"
            )));
        }
        let all = self
            .tag_selectors
            .iter()
            .chain(self.repository_selectors());
        for selector in all {
            if selector.pattern.is_empty() {
                return Err(crate::Error::InvalidRule(
                    "selector pattern must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
