//! Selector kinds and their registry.
//!
//! A selector narrows a list of candidates by one field. Kinds are resolved
//! through [`SelectorRegistry`] keyed by `(kind, decoration)`.

use crate::doublestar;
use crate::error::{PolicyError, PolicyResult};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tollgate_core::immutable::KIND_DOUBLESTAR;
use tollgate_core::{Decoration, Selector};

/// Artifact coordinates evaluated by immutability rules.
///
/// `repository` is the repository name without its project prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub repository: String,
    pub tag: String,
}

impl Candidate {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

/// Candidate field a selector looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Repository,
    Tag,
}

impl Field {
    fn of(self, candidate: &Candidate) -> &str {
        match self {
            Field::Repository => &candidate.repository,
            Field::Tag => &candidate.tag,
        }
    }
}

/// A compiled selector.
pub trait CandidateFilter: Send + Sync {
    fn keep(&self, value: &str) -> bool;

    fn select(&self, field: Field, candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter(|c| self.keep(field.of(c)))
            .collect()
    }
}

/// Builds a filter from a selector pattern.
pub type SelectorFactory =
    Arc<dyn Fn(&str) -> PolicyResult<Box<dyn CandidateFilter>> + Send + Sync>;

struct GlobFilter {
    regex: Regex,
    keep_matches: bool,
}

impl CandidateFilter for GlobFilter {
    fn keep(&self, value: &str) -> bool {
        self.regex.is_match(value) == self.keep_matches
    }
}

/// Selector kinds keyed by `(kind, decoration)`.
#[derive(Clone)]
pub struct SelectorRegistry {
    factories: HashMap<(String, Decoration), SelectorFactory>,
}

impl Default for SelectorRegistry {
    /// Registry with the `doublestar` kind in both decorations.
    fn default() -> Self {
        let mut registry = Self::empty();
        for decoration in [Decoration::Matches, Decoration::Excludes] {
            let keep_matches = decoration == Decoration::Matches;
            registry.register(
                KIND_DOUBLESTAR,
                decoration,
                Arc::new(
                    move |pattern: &str| -> PolicyResult<Box<dyn CandidateFilter>> {
                        Ok(Box::new(GlobFilter {
                            regex: doublestar::compile(pattern)?,
                            keep_matches,
                        }))
                    },
                ),
            );
        }
        registry
    }
}

impl SelectorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Add a selector kind.
    ///
    /// # Panics
    ///
    /// Panics if `(kind, decoration)` is already registered.
    pub fn register(&mut self, kind: &str, decoration: Decoration, factory: SelectorFactory) {
        let key = (kind.to_string(), decoration);
        if self.factories.contains_key(&key) {
            panic!("selector {kind}/{decoration} registered twice");
        }
        self.factories.insert(key, factory);
    }

    /// Compile `selector` with its registered kind.
    pub fn build(&self, selector: &Selector) -> PolicyResult<Box<dyn CandidateFilter>> {
        let factory = self
            .factories
            .get(&(selector.kind.clone(), selector.decoration))
            .ok_or_else(|| PolicyError::UnknownSelector {
                kind: selector.kind.clone(),
                decoration: selector.decoration,
            })?;
        factory(&selector.pattern)
    }

    /// Narrow `candidates` through every selector in turn.
    pub fn select(
        &self,
        selectors: &[Selector],
        field: Field,
        mut candidates: Vec<Candidate>,
    ) -> PolicyResult<Vec<Candidate>> {
        for selector in selectors {
            if candidates.is_empty() {
                break;
            }
            candidates = self.build(selector)?.select(field, candidates);
        }
        Ok(candidates)
    }
}
