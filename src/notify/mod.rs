//! The portable readiness-notification layer: a single API over `kqueue`
//! (BSD family) and `epoll` (Linux), plus a cross-thread wakeup mechanism.
//! Grounded directly on `libc`, not on `mio`, because spec §1/§4.5 treats
//! this unification as core engineering for this crate rather than a
//! delegated concern — see `DESIGN.md` for the "mio dropped" note. The
//! per-backend `kevent` changelist handling follows
//! `other_examples/fafhrd91-polling/src/kqueue.rs`; the from-scratch
//! `epoll_create`/`epoll_ctl`/`epoll_wait` wrapping follows
//! `other_examples/cfsamson-examples-minimio/src/linux.rs`.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;

#[cfg(target_os = "linux")]
pub mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::Shim;

#[cfg(target_os = "linux")]
pub use epoll::Shim;

/// Readiness interest a Channel subscribes with. `NONE` deregisters.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const NONE: Interest = Interest { readable: false, writable: false };
    pub const READ: Interest = Interest { readable: true, writable: false };
    pub const WRITE: Interest = Interest { readable: false, writable: true };
    pub const BOTH: Interest = Interest { readable: true, writable: true };

    #[inline]
    pub fn is_none(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// One readiness notification, already mapped onto the portable vocabulary
/// the cycle engine consumes (spec §4.4 phase 6): `readable`/`writable` set
/// `xteq_transfer`; `terminate` sets `xteq_terminate` directly (kqueue write
/// EOF, or epoll `RDHUP|HUP|ERR`). Read-side EOF is *not* carried here — it
/// is only discoverable by a zero-byte read, per spec §4.4 phase 6's note
/// that read EOF is deferred to phase 7.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RawEvent {
    pub key: usize,
    pub readable: bool,
    pub writable: bool,
    pub terminate: bool,
}

/// The magic key reserved for the wakeup notification (spec §4.5's `wake()`
/// path). No real Channel is ever assigned this key.
pub const WAKE_KEY: usize = usize::max_value();

/// A raw handle capable of waking a blocked `wait()` call without going
/// through the `NotificationShim` itself. Spec §5's `force()` must interrupt
/// a wait that is in progress on another thread *while the engine-wide lock
/// is released for phases 4–6* — at that point the shim is temporarily
/// owned by the cycle-driving thread alone, so `force()` cannot reach it
/// through the lock. `WakeToken` holds only the raw descriptor(s) `wake()`
/// needs, copied out once at shim construction, and issues the same
/// `NOTE_TRIGGER`/`eventfd` write directly.
#[derive(Debug, Copy, Clone)]
pub enum WakeToken {
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    Kqueue(RawFd),
    #[cfg(target_os = "linux")]
    Epoll(RawFd),
}

impl WakeToken {
    pub fn wake(&self) -> io::Result<()> {
        match self {
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            ))]
            WakeToken::Kqueue(kq) => kqueue::trigger(*kq),
            #[cfg(target_os = "linux")]
            WakeToken::Epoll(wake_fd) => epoll::trigger(*wake_fd),
        }
    }
}

/// Uniform notification API: `{create, subscribe, unsubscribe, wait, wake}`.
/// Implemented once per backend in `kqueue.rs`/`epoll.rs`.
pub trait NotificationShim: Sized {
    /// Whether `wait` should retry up to the configured collect-retry count
    /// even when the previous call did *not* fill the scratch array. Spec
    /// §9 Open Question #1: epoll retries unconditionally, kqueue only
    /// while the scratch filled. Preserved as observed — see `DESIGN.md`.
    const RETRY_UNCONDITIONAL: bool;

    fn create(scratch_capacity: usize) -> io::Result<Self>;

    /// Registers or updates interest for `fd`, tagging events for it with
    /// `key`. `Interest::NONE` removes the subscription.
    fn subscribe(&mut self, fd: RawFd, key: usize, interest: Interest) -> io::Result<()>;

    fn unsubscribe(&mut self, fd: RawFd) -> io::Result<()>;

    /// Blocks for up to `timeout` (or returns immediately if `None` means
    /// "don't block" — callers pass `Some(Duration::ZERO)` for that) and
    /// returns the events observed this call. Returns `(events, filled)`
    /// where `filled` is true iff the scratch array was filled to capacity,
    /// driving the phase-5 retry loop.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<(&[RawEvent], bool)>;

    /// Wakes a thread blocked in `wait`. A no-op (but not an error) if no
    /// wait is currently outstanding — spec §5 "force() is a no-op if
    /// will_wait was not set" is enforced by the caller, not here; this
    /// method always attempts the wake signal.
    fn wake(&self) -> io::Result<()>;

    /// A cloneable, lock-free handle that can `wake()` this shim from
    /// another thread even while the shim itself is temporarily unreachable
    /// (moved out of the Junction's locked state for phases 4–6).
    fn wake_token(&self) -> WakeToken;
}
