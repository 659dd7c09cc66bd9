use std::fmt;
use std::io;

/// Named syscall a `Port` last attempted. Used purely for diagnostics; the
/// engine never branches on it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum KCall {
    Listen,
    Connect,
    Bind,
    Accept,
    Socket,
    Read,
    Write,
    Recv,
    Send,
    Pipe,
    SocketPair,
    Fcntl,
    Shutdown,
    Close,
    GetPeerEid,
    FStat,
    Shatter,
    Leak,
    Void,
    Eof,
    None,
}

impl fmt::Display for KCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The result of the last syscall a `Port` attempted: which call, and the
/// `errno` it failed with (absent for `Eof`/`None`/`Void`/`Leak`/`Shatter`,
/// which are not real syscall failures).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Cause {
    pub call: KCall,
    pub errno: Option<i32>,
}

impl Cause {
    #[inline]
    pub fn none() -> Cause {
        Cause { call: KCall::None, errno: None }
    }

    #[inline]
    pub fn of(call: KCall, err: &io::Error) -> Cause {
        Cause { call, errno: err.raw_os_error() }
    }

    #[inline]
    pub fn eof() -> Cause {
        Cause { call: KCall::Eof, errno: None }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.errno {
            Some(errno) => write!(f, "{} (errno {})", self.call, errno),
            None => write!(f, "{}", self.call),
        }
    }
}

/// Result alias used throughout the Port/Channel layer. `Wait` signals a
/// transient condition (`EAGAIN`/`EINTR`) that the caller absorbs; `Fatal`
/// carries the `Cause` that should be recorded on the owning `Port` and
/// converted into `tev_terminate` by the engine.
pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(Cause),
}

impl NetworkError {
    #[inline]
    pub fn from_io(call: KCall, err: io::Error) -> NetworkError {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => NetworkError::Wait,
            _ => NetworkError::Fatal(Cause::of(call, &err)),
        }
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    #[inline]
    fn has_failed(&self) -> bool {
        matches!(self, Err(NetworkError::Fatal(_)))
    }
}

/// Outcome of a single freight I/O attempt in cycle phase 7 (spec §4.4).
/// `Flow` means the buffer was exhausted with no `EAGAIN` (the resource is
/// drained and the caller must `acquire` again); `Stop` means `EAGAIN` was
/// hit and the engine should wait for the next kernel event; `Terminate`
/// means a fatal error or EOF was observed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IoOutcome {
    Flow(usize),
    Stop(usize),
    Terminate(Cause),
}
