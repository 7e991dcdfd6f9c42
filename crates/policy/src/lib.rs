//! Tag immutability policy for tollgate.
//!
//! Rules carry tag selectors and optional repository scope selectors. The
//! [`RuleMatcher`] loads a project's rules and reports whether a
//! `(repository, tag)` candidate is protected.

pub mod doublestar;
pub mod error;
pub mod matcher;
pub mod selector;

pub use error::{PolicyError, PolicyResult};
pub use matcher::{ImmutableMatcher, RuleMatcher, match_rules};
pub use selector::{Candidate, CandidateFilter, Field, SelectorFactory, SelectorRegistry};
