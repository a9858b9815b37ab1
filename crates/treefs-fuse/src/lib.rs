//! FUSE transport for [`treefs`] sessions.
//!
//! [`FuseAdapter`] implements `fuser::Filesystem` by forwarding every
//! callback to a [`treefs::Session`] on a bounded [`DispatchPool`].
//! [`spawn_mount`] mounts a session in the background and wires the
//! kernel notifier into the session's cache coherency controller, so
//! `Inode::notify_content` and friends reach the kernel page cache.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use treefs::{Options, Session};
//! use treefs_fuse::{MountOptions, spawn_mount};
//!
//! let session = Arc::new(Session::new(Arc::new(MyRoot), Options::default()));
//! let mount = spawn_mount(session, "/mnt/demo", &MountOptions::default())?;
//! // ... serve until done ...
//! mount.unmount();
//! ```

pub mod adapter;
pub mod error;
pub mod executor;
pub mod mount;

pub use adapter::FuseAdapter;
pub use error::{MountError, MountResult};
pub use executor::{DispatchPool, PoolConfig, PoolStats, SubmitError};
pub use mount::{FuseMount, FuseNotifier, MountOptions, spawn_mount};
