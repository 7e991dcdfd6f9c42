//! Common test utilities for lock store tests.

pub mod stores;

#[allow(unused_imports)]
pub use stores::*;
