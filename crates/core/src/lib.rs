//! Core domain types for the tollgate registry proxy.
//!
//! This crate defines the data model shared by every other crate:
//! - Resource lists and the quota safety predicate
//! - Registry digests and repository names
//! - Manifest media types and descriptor extraction
//! - Immutable tag rules
//! - Application configuration

pub mod config;
pub mod digest;
pub mod error;
pub mod immutable;
pub mod manifest;
pub mod repository;
pub mod resources;

pub use digest::{Digest, is_digest};
pub use error::{Error, Result};
pub use immutable::{Decoration, ImmutableRule, Selector};
pub use manifest::{DefaultManifestInspector, Descriptor, ManifestDescriptor, ManifestInspector};
pub use repository::parse_repository;
pub use resources::{
    ResourceError, ResourceErrors, ResourceList, ResourceName, UNLIMITED, covers_usage, is_safe,
};
