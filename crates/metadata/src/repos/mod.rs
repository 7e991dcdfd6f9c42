//! Repository traits for metadata operations.

pub mod artifacts;
pub mod blobs;
pub mod charts;
pub mod immutable_rules;
pub mod projects;
pub mod quotas;

pub use artifacts::ArtifactRepo;
pub use blobs::BlobRepo;
pub use charts::ChartRepo;
pub use immutable_rules::ImmutableRuleRepo;
pub use projects::ProjectRepo;
pub use quotas::{HardUpdate, QuotaRepo, UsageUpdate};
