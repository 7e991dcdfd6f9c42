//! Shared setup for the metadata store tests.

pub mod metadata;

pub use metadata::run_metadata_test_both;
