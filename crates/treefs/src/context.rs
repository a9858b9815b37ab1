//! Per-request context: who is calling, and whether they still care.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identity of the process that issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// Context passed to every capability call.
///
/// Cancellation is advisory: the transport sets the flag when the
/// originating system call was interrupted, and long-running capability
/// implementations may poll [`Context::is_cancelled`] and bail out with
/// EINTR. Nothing aborts an in-flight call on its behalf.
#[derive(Debug, Clone, Default)]
pub struct Context {
    caller: Option<Caller>,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// Context for a request issued by `caller`.
    pub fn new(caller: Caller) -> Self {
        Self {
            caller: Some(caller),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Context with no caller identity, for calls the library makes on
    /// its own behalf (e.g. `on_add` for the root).
    pub fn background() -> Self {
        Self::default()
    }

    /// The requesting process, if known.
    pub fn caller(&self) -> Option<Caller> {
        self.caller
    }

    /// Marks the request as cancelled. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
