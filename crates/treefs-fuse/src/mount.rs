//! Mounting a session through the kernel FUSE driver.

use fuser::{BackgroundSession, MountOption};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tracing::{debug, info, warn};
use treefs::{InvalidationSink, Session};

use crate::adapter::FuseAdapter;
use crate::error::{MountError, MountResult};
use crate::executor::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, DispatchPool, PoolConfig};

/// Default time to wait for the mount call to return.
pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a session is presented to the kernel.
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Name shown in the mount table.
    pub fsname: String,
    /// Filesystem subtype (`fuse.<subtype>`).
    pub subtype: Option<String>,
    /// Let users other than the mounting one access the mount.
    pub allow_other: bool,
    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
    pub read_only: bool,
    /// Worker threads for request dispatch.
    pub workers: usize,
    /// Requests queued ahead of the workers before the session thread
    /// starts running them itself.
    pub queue_capacity: usize,
    pub mount_timeout: Duration,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            fsname: "treefs".to_string(),
            subtype: None,
            allow_other: false,
            auto_unmount: true,
            read_only: false,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            mount_timeout: DEFAULT_MOUNT_TIMEOUT,
        }
    }
}

impl MountOptions {
    #[must_use]
    pub fn fsname(mut self, name: impl Into<String>) -> Self {
        self.fsname = name.into();
        self
    }

    #[must_use]
    pub fn subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    #[must_use]
    pub fn auto_unmount(mut self, auto: bool) -> Self {
        self.auto_unmount = auto;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn mount_timeout(mut self, timeout: Duration) -> Self {
        self.mount_timeout = timeout;
        self
    }

    /// The options as fuser mount flags.
    pub fn to_fuser(&self) -> Vec<MountOption> {
        let mut options = vec![MountOption::FSName(self.fsname.clone())];
        if let Some(subtype) = &self.subtype {
            options.push(MountOption::Subtype(subtype.clone()));
        }
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        options.push(if self.read_only {
            MountOption::RO
        } else {
            MountOption::RW
        });
        // No AppleDouble (._*) files when xattr calls fail.
        #[cfg(target_os = "macos")]
        options.push(MountOption::CUSTOM("noappledouble".to_string()));
        options
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_workers(self.workers)
            .with_capacity(self.queue_capacity)
    }
}

/// Forwards cache invalidations to the kernel.
pub struct FuseNotifier(fuser::Notifier);

impl FuseNotifier {
    pub fn new(notifier: fuser::Notifier) -> Self {
        Self(notifier)
    }
}

impl InvalidationSink for FuseNotifier {
    fn inval_inode(&self, ino: u64, offset: i64, len: i64) -> io::Result<()> {
        self.0.inval_inode(ino, offset, len)
    }

    fn inval_entry(&self, parent: u64, name: &OsStr) -> io::Result<()> {
        self.0.inval_entry(parent, name)
    }
}

/// A mounted session. Dropping it unmounts.
pub struct FuseMount {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
    tree: Arc<Session>,
    pool: Arc<DispatchPool>,
}

impl FuseMount {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.tree
    }

    pub fn pool(&self) -> &DispatchPool {
        &self.pool
    }

    /// Unmounts and waits for the session thread and workers to finish.
    pub fn unmount(mut self) {
        info!(mountpoint = %self.mountpoint.display(), "unmounting");
        if let Some(session) = self.session.take() {
            session.join();
        }
        self.pool.shutdown();
        self.pool.wait();
        info!(mountpoint = %self.mountpoint.display(), "unmounted");
    }
}

impl Drop for FuseMount {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(mountpoint = %self.mountpoint.display(), "unmounting on drop");
            drop(session);
        }
        self.pool.shutdown();
    }
}

/// Mounts `session` at `mountpoint` and attaches the kernel notifier as
/// its invalidation sink.
///
/// The mount call runs on a helper thread so a stale mount at the same
/// path cannot block the caller past `options.mount_timeout`.
pub fn spawn_mount(
    session: Arc<Session>,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> MountResult<FuseMount> {
    let mountpoint = mountpoint.as_ref().to_path_buf();
    if !mountpoint.is_dir() {
        return Err(MountError::NotADirectory(mountpoint));
    }

    let pool = Arc::new(DispatchPool::with_config(options.pool_config()));
    let adapter = FuseAdapter::new(Arc::clone(&session), Arc::clone(&pool));
    let fuser_options = options.to_fuser();

    let (tx, rx) = mpsc::channel();
    let target = mountpoint.clone();
    std::thread::spawn(move || {
        let _ = tx.send(fuser::spawn_mount2(adapter, &target, &fuser_options));
    });

    let background = match rx.recv_timeout(options.mount_timeout) {
        Ok(Ok(background)) => background,
        Ok(Err(e)) => {
            pool.shutdown();
            return Err(MountError::Mount(e));
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            pool.shutdown();
            return Err(MountError::Timeout(options.mount_timeout));
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            pool.shutdown();
            return Err(MountError::ThreadLost);
        }
    };

    let notifier = Arc::new(FuseNotifier::new(background.notifier()));
    if !session.attach_notifier(notifier) {
        warn!("session already has an invalidation sink, keeping the existing one");
    }

    info!(
        mountpoint = %mountpoint.display(),
        fsname = %options.fsname,
        workers = options.workers,
        "mounted"
    );
    Ok(FuseMount {
        session: Some(background),
        mountpoint,
        tree: session,
        pool,
    })
}
