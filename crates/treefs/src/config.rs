//! Session-wide options.
//!
//! The three timeouts tell the kernel how long it may reuse a lookup,
//! attribute or negative-lookup reply without asking again. They are a
//! caching configuration, not a freshness guarantee: a node whose content
//! changes behind the kernel's back is only picked up once the timeout
//! expires or the node invalidates the cache explicitly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default first automatically assigned inode number (2^63).
///
/// Far above any inode number a filesystem author is likely to assign by
/// hand, and above the root inode (1).
pub const DEFAULT_FIRST_AUTOMATIC_INO: u64 = 1 << 63;

/// Options for one mounted tree.
///
/// Unset timeouts mean "revalidate on every access".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// How long the kernel may cache name lookups.
    #[serde(with = "humantime_serde")]
    pub entry_timeout: Option<Duration>,

    /// How long the kernel may cache attributes.
    #[serde(with = "humantime_serde")]
    pub attr_timeout: Option<Duration>,

    /// How long the kernel may cache failed lookups (ENOENT).
    #[serde(with = "humantime_serde")]
    pub negative_timeout: Option<Duration>,

    /// Automatic inode numbers are handed out sequentially from here.
    pub first_automatic_ino: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            entry_timeout: None,
            attr_timeout: None,
            negative_timeout: None,
            first_automatic_ino: DEFAULT_FIRST_AUTOMATIC_INO,
        }
    }
}

impl Options {
    /// Options with the same entry and attribute timeout.
    ///
    /// Suitable for trees whose structure and metadata change rarely.
    pub fn cached(ttl: Duration) -> Self {
        Self {
            entry_timeout: Some(ttl),
            attr_timeout: Some(ttl),
            ..Default::default()
        }
    }

    /// Sets the entry timeout.
    #[must_use]
    pub fn entry_timeout(mut self, timeout: Duration) -> Self {
        self.entry_timeout = Some(timeout);
        self
    }

    /// Sets the attribute timeout.
    #[must_use]
    pub fn attr_timeout(mut self, timeout: Duration) -> Self {
        self.attr_timeout = Some(timeout);
        self
    }

    /// Sets the negative lookup timeout.
    #[must_use]
    pub fn negative_timeout(mut self, timeout: Duration) -> Self {
        self.negative_timeout = Some(timeout);
        self
    }

    /// Sets the first automatically assigned inode number.
    ///
    /// Values below 2 are raised to 2 so automatic numbers never collide
    /// with the root inode.
    #[must_use]
    pub fn first_automatic_ino(mut self, ino: u64) -> Self {
        self.first_automatic_ino = ino.max(2);
        self
    }
}
