//! treefs-demo - mount a small read-only tree through FUSE.
//!
//! Usage: treefs-demo <mountpoint>
//!
//! The tree holds a static `hello.txt`, a `clock` file whose content a
//! background thread rewrites every tick, and a `greeting` symlink. Both
//! files are opened with keep-cache; the ticker invalidates the clock's
//! cached pages after every rewrite.

use anyhow::{Context as _, Result};
use bytes::Bytes;
use clap::Parser;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use treefs::{
    Attr, Context, DirOps, Errno, FileHandle, FileKind, FileOps, Inode, Node, NodeAttr, OpResult,
    OpenFlags, Opened, Options, Session, SymlinkOps,
};
use treefs_fuse::{MountOptions, spawn_mount};

#[derive(Parser)]
#[command(name = "treefs-demo")]
#[command(about = "Mount a small in-memory tree through FUSE")]
#[command(version)]
struct Cli {
    /// Mountpoint for the filesystem
    mount: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Dispatch worker threads
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Entry and attribute cache timeout in seconds (0 disables caching)
    #[arg(long, default_value_t = 1)]
    ttl_secs: u64,

    /// Seconds between clock updates
    #[arg(long, default_value_t = 1)]
    tick_secs: u64,
}

#[derive(Clone, Copy)]
struct Owner {
    uid: u32,
    gid: u32,
}

impl Owner {
    fn current() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    fn attr(self, kind: FileKind, perm: u16, size: u64, mtime: SystemTime) -> Attr {
        Attr {
            size,
            blocks: size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            kind,
            perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            blksize: 4096,
            ..Attr::default()
        }
    }
}

struct DemoRoot {
    owner: Owner,
    started: SystemTime,
}

impl Node for DemoRoot {
    fn getattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Attr> {
        let mut attr = self.owner.attr(FileKind::Directory, 0o555, 0, self.started);
        attr.nlink = 2;
        Ok(attr)
    }

    fn as_dir(self: Arc<Self>) -> Option<Arc<dyn DirOps>> {
        Some(self)
    }
}

// Lookup and readdir come from the tree.
impl DirOps for DemoRoot {}

fn read_range(content: &Bytes, offset: u64, size: u32) -> Bytes {
    let len = content.len();
    let start = usize::try_from(offset).unwrap_or(len).min(len);
    let end = start.saturating_add(size as usize).min(len);
    content.slice(start..end)
}

/// A file whose content is kept in a shared buffer.
struct MemoryFile {
    owner: Owner,
    content: Mutex<(Bytes, SystemTime)>,
}

impl MemoryFile {
    fn new(owner: Owner, content: impl Into<Bytes>) -> Self {
        Self {
            owner,
            content: Mutex::new((content.into(), SystemTime::now())),
        }
    }

    fn replace(&self, content: impl Into<Bytes>) {
        *self.content.lock() = (content.into(), SystemTime::now());
    }
}

impl Node for MemoryFile {
    fn getattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Attr> {
        let guard = self.content.lock();
        Ok(self
            .owner
            .attr(FileKind::RegularFile, 0o444, guard.0.len() as u64, guard.1))
    }

    fn as_file(self: Arc<Self>) -> Option<Arc<dyn FileOps>> {
        Some(self)
    }
}

impl FileOps for MemoryFile {
    fn open(&self, _ctx: &Context, _node: &Inode, flags: i32) -> OpResult<Opened> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(Errno::EROFS);
        }
        Ok(Opened::stateless(OpenFlags::KEEP_CACHE))
    }

    fn read(
        &self,
        _ctx: &Context,
        _node: &Inode,
        _fh: Option<&dyn FileHandle>,
        offset: u64,
        size: u32,
    ) -> OpResult<Bytes> {
        Ok(read_range(&self.content.lock().0, offset, size))
    }

    fn flush(&self, _ctx: &Context, _node: &Inode, _fh: Option<&dyn FileHandle>) -> OpResult<()> {
        Ok(())
    }

    fn release(&self, _ctx: &Context, _node: &Inode, _fh: Option<&dyn FileHandle>) -> OpResult<()> {
        Ok(())
    }
}

struct Link {
    owner: Owner,
    target: PathBuf,
    created: SystemTime,
}

impl Node for Link {
    fn getattr(&self, _ctx: &Context, _node: &Inode) -> OpResult<Attr> {
        let len = self.target.as_os_str().len() as u64;
        Ok(self.owner.attr(FileKind::Symlink, 0o777, len, self.created))
    }

    fn as_symlink(self: Arc<Self>) -> Option<Arc<dyn SymlinkOps>> {
        Some(self)
    }
}

impl SymlinkOps for Link {
    fn readlink(&self, _ctx: &Context, _node: &Inode) -> OpResult<PathBuf> {
        Ok(self.target.clone())
    }
}

fn clock_text() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format!("{secs}\n")
}

fn build_tree(session: &Session) -> Result<Arc<MemoryFile>> {
    let owner = Owner::current();
    let root = session.root();

    let hello = root.new_persistent_inode(
        Arc::new(MemoryFile::new(owner, "Hello from treefs!\n")),
        NodeAttr::file(),
    );
    root.add_child("hello.txt", &hello, false)
        .context("Failed to link hello.txt")?;

    let clock = Arc::new(MemoryFile::new(owner, clock_text()));
    let clock_inode = root.new_persistent_inode(clock.clone(), NodeAttr::file());
    root.add_child("clock", &clock_inode, false)
        .context("Failed to link clock")?;

    let link = root.new_persistent_inode(
        Arc::new(Link {
            owner,
            target: PathBuf::from("hello.txt"),
            created: SystemTime::now(),
        }),
        NodeAttr::symlink(),
    );
    root.add_child("greeting", &link, false)
        .context("Failed to link greeting")?;

    Ok(clock)
}

/// Rewrites the clock every `tick` and drops its cached pages.
fn spawn_ticker(
    session: Arc<Session>,
    clock: Arc<MemoryFile>,
    tick: Duration,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("treefs-demo-clock".to_string())
        .spawn(move || {
            while !stop.load(Ordering::Acquire) {
                thread::sleep(tick);
                clock.replace(clock_text());
                let Some(inode) = session.root().get_child("clock") else {
                    continue;
                };
                // ENOENT just means the kernel has not looked the file up yet.
                if let Err(e) = inode.notify_content(0, 0) {
                    debug!(error = %e, "clock invalidation not delivered");
                }
            }
        })
        .context("Failed to spawn clock thread")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
    if !cli.mount.exists() {
        anyhow::bail!("Mountpoint does not exist: {}", cli.mount.display());
    }

    let options = if cli.ttl_secs == 0 {
        Options::default()
    } else {
        Options::cached(Duration::from_secs(cli.ttl_secs))
    };
    let session = Arc::new(Session::new(
        Arc::new(DemoRoot {
            owner: Owner::current(),
            started: SystemTime::now(),
        }),
        options,
    ));
    let clock = build_tree(&session)?;

    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;

    let mount_options = MountOptions::default()
        .fsname("treefs-demo")
        .subtype("treefs")
        .allow_other(cli.allow_other)
        .read_only(true)
        .workers(cli.workers);

    info!("Mounting filesystem (press Ctrl+C to unmount)");
    let mount = spawn_mount(Arc::clone(&session), &cli.mount, &mount_options)
        .with_context(|| format!("Failed to mount at {}", cli.mount.display()))?;
    info!("Filesystem mounted at {}", mount.mountpoint().display());

    let stop = Arc::new(AtomicBool::new(false));
    let ticker = spawn_ticker(
        Arc::clone(&session),
        clock,
        Duration::from_secs(cli.tick_secs.max(1)),
        Arc::clone(&stop),
    )?;

    match rx.recv() {
        Ok(()) => info!("Received interrupt signal, unmounting..."),
        Err(_) => warn!("Signal channel closed unexpectedly"),
    }

    stop.store(true, Ordering::Release);
    mount.unmount();
    let _ = ticker.join();
    info!(mountpoint = %cli.mount.display(), "Filesystem unmounted");
    Ok(())
}
