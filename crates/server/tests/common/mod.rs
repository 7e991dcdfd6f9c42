//! Common test utilities and fixtures.

/// Skip the test when the mock upstream cannot bind a local port.
#[allow(unused_macros)]
macro_rules! require_localhost {
    () => {
        if !common::can_bind_localhost() {
            eprintln!("Skipping httpmock tests: cannot bind to localhost");
            return;
        }
    };
}

pub mod fixtures;
pub mod server;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use server::*;
