//! Lock store backends.

pub mod memory;
pub mod redis;
