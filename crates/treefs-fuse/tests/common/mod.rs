//! Common test utilities for FUSE integration tests.

pub mod harness;
pub mod memfs;

#[allow(unused_imports)]
pub use harness::{TestMount, fuse_available};
#[allow(unused_imports)]
pub use memfs::{MemDir, MemFile, MemLink};
