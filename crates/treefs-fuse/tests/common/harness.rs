//! Test mount harness for FUSE integration tests.
//!
//! Provides `TestMount` that mounts a `treefs` session on a temporary
//! directory, offers convenience methods for filesystem operations, and
//! unmounts on drop.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use treefs::{Node, Options, Session};
use treefs_fuse::{FuseMount, MountOptions, spawn_mount};

use super::memfs::MemDir;

/// How long to wait for mount to become ready.
const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait between mount readiness checks.
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// A mounted session for testing.
///
/// # Example
///
/// ```ignore
/// let mount = TestMount::with_memfs(Options::default()).unwrap();
/// mount.write("test.txt", b"hello").unwrap();
/// assert_eq!(mount.read("test.txt").unwrap(), b"hello");
/// ```
pub struct TestMount {
    /// Unmounts on drop. Declared first so it drops before the temp dir.
    mount: Option<FuseMount>,
    /// The mounted session, for out-of-band tree access.
    pub session: Arc<Session>,
    /// Path where the session is mounted.
    pub mount_path: PathBuf,
    _temp_mount: TempDir,
}

impl TestMount {
    /// Mount an empty writable in-memory tree.
    pub fn with_memfs(options: Options) -> Result<Self, String> {
        Self::with_root(Arc::new(MemDir::default()), options)
    }

    /// Mount a tree rooted at `root`.
    pub fn with_root(root: Arc<dyn Node>, options: Options) -> Result<Self, String> {
        let session = Arc::new(Session::new(root, options));
        Self::with_session(session)
    }

    /// Mount an existing session. Populate the tree before calling this.
    pub fn with_session(session: Arc<Session>) -> Result<Self, String> {
        let temp_mount = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let mount_path = temp_mount.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        let options = MountOptions::default().fsname("treefs-test").workers(4);
        let mount = spawn_mount(Arc::clone(&session), &mount_path, &options)
            .map_err(|e| format!("Failed to mount: {e}"))?;

        Self::wait_for_mount(&mount_path)?;

        Ok(Self {
            mount: Some(mount),
            session,
            mount_path,
            _temp_mount: temp_mount,
        })
    }

    /// Wait for the mount point's device ID to differ from its parent's,
    /// which indicates the FUSE filesystem is mounted there.
    fn wait_for_mount(mount_path: &Path) -> Result<(), String> {
        use std::os::unix::fs::MetadataExt;

        let parent_path = mount_path.parent().ok_or("mount_path has no parent")?;
        let parent_dev = fs::metadata(parent_path)
            .map_err(|e| format!("Failed to stat parent: {e}"))?
            .dev();

        let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(mount_meta) = fs::metadata(mount_path)
                && mount_meta.dev() != parent_dev
            {
                return Ok(());
            }
            thread::sleep(MOUNT_CHECK_INTERVAL);
        }
        Err("Mount did not become ready in time (device ID unchanged)".to_string())
    }

    /// Unmount now and wait for the session to finish.
    pub fn unmount(mut self) {
        if let Some(mount) = self.mount.take() {
            mount.unmount();
        }
    }

    // =========================================================================
    // Filesystem convenience methods
    // =========================================================================

    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative.trim_start_matches('/'))
    }

    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        File::open(self.path(path))?.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Write content to a file (creates or overwrites).
    pub fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut file = File::create(self.path(path))?;
        file.write_all(content)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir(self.path(path))
    }

    pub fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.path(path))
    }

    pub fn rmdir(&self, path: &str) -> io::Result<()> {
        fs::remove_dir(self.path(path))
    }

    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }

    /// Sorted names in a directory.
    pub fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names = fs::read_dir(self.path(path))?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.path(path).exists()
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        if let Some(mount) = self.mount.take() {
            mount.unmount();
        }
    }
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
            || Path::new("/Library/Filesystems/osxfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::harness::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
