//! `Port` owns exactly one kernel descriptor and is the only place in the
//! crate that issues syscalls. Every other component talks to the kernel
//! through a `Port`. The `extern "C"` surface and the thin `io::Result`
//! wrappers around it follow the shape of `other_examples`'
//! `cfsamson-examples-minimio/src/linux.rs` `mod ffi` block; the
//! `(cause, errno)` bookkeeping follows `flux::shared::NetworkError`'s
//! `From<io::Error>` split between transient and fatal outcomes.

use crate::error::{Cause, IoOutcome, KCall};
use std::ffi::CString;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::os::unix::net::SocketAddr as UnixSocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Direction bits for the half-close latch (spec §4.1).
pub const INPUT: u8 = 0b01;
pub const OUTPUT: u8 = 0b10;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PortKind {
    Pipe,
    Fifo,
    Device,
    Tty,
    Socket,
    File,
    Kqueue,
    Bad,
    Unknown,
}

impl PortKind {
    /// Classifies a descriptor by `fstat`, mirroring spec §4.1's `identify`.
    pub fn of(fd: RawFd) -> PortKind {
        unsafe {
            let mut stat: libc::stat = mem::zeroed();
            if libc::fstat(fd, &mut stat) != 0 {
                return PortKind::Bad;
            }

            match stat.st_mode & libc::S_IFMT {
                libc::S_IFIFO => PortKind::Fifo,
                libc::S_IFCHR => {
                    if libc::isatty(fd) == 1 {
                        PortKind::Tty
                    } else {
                        PortKind::Device
                    }
                }
                libc::S_IFSOCK => PortKind::Socket,
                libc::S_IFREG => PortKind::File,
                _ => PortKind::Unknown,
            }
        }
    }
}

/// Owns one kernel descriptor, its classification and its last failing
/// syscall, and counts the still-open half-close directions (spec §3
/// "Invariant: a descriptor is closed exactly once"). `remaining`/`closed`/
/// `leaked` are shared via `Arc` so that two `Port` handles produced by
/// `split_shared` over one descriptor (a connected socket split into an
/// input and an output Channel) agree on when the descriptor actually
/// closes, instead of each independently racing to close it on its own
/// direction unlatching.
pub struct Port {
    fd: RawFd,
    kind: PortKind,
    cause: Cause,
    /// The directions *this handle* is responsible for unlatching.
    owned: u8,
    /// Directions not yet unlatched by any handle sharing this descriptor.
    remaining: Arc<AtomicU8>,
    closed: Arc<AtomicBool>,
    leaked: Arc<AtomicBool>,
}

impl Port {
    /// Wraps an already-open, non-blocking-capable descriptor with the
    /// given set of initially-open directions.
    pub fn wrap(fd: RawFd, kind: PortKind, directions: u8) -> Port {
        Port {
            fd,
            kind,
            cause: Cause::none(),
            owned: directions,
            remaining: Arc::new(AtomicU8::new(directions)),
            closed: Arc::new(AtomicBool::new(false)),
            leaked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Splits a full-duplex Port into two handles over the same descriptor,
    /// one owning `INPUT`, the other `OUTPUT`, sharing the half-close
    /// latch. Used when one kernel descriptor (a connected socket) backs
    /// two unidirectional Channels (spec §3: "a descriptor shared by two
    /// Channels... is closed only when both halves unlatch").
    pub fn split_shared(self) -> (Port, Port) {
        let fd = self.fd;
        let kind = self.kind;
        let remaining = Arc::clone(&self.remaining);
        let closed = Arc::clone(&self.closed);
        let leaked = Arc::clone(&self.leaked);
        mem::forget(self);

        (
            Port {
                fd,
                kind,
                cause: Cause::none(),
                owned: INPUT,
                remaining: Arc::clone(&remaining),
                closed: Arc::clone(&closed),
                leaked: Arc::clone(&leaked),
            },
            Port { fd, kind, cause: Cause::none(), owned: OUTPUT, remaining, closed, leaked },
        )
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    #[inline]
    pub fn cause(&self) -> Cause {
        self.cause
    }

    #[inline]
    fn fail(&mut self, call: KCall, err: io::Error) -> io::Error {
        self.cause = Cause::of(call, &err);
        err
    }

    fn set_nonblocking(fd: RawFd) -> io::Result<()> {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Opens a listening socket bound to `addr`.
    pub fn listen(addr: SocketAddr) -> io::Result<Port> {
        let fd = raw_socket(addr)?;
        Self::set_nonblocking(fd)?;

        unsafe {
            let one: libc::c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            );

            let (sockaddr, len) = sockaddr_of(addr);
            if libc::bind(fd, &sockaddr as *const _ as *const libc::sockaddr, len) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
            if libc::listen(fd, 1024) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
        }

        Ok(Port::wrap(fd, PortKind::Socket, INPUT))
    }

    /// Opens a connected TCP/UDP socket.
    pub fn connect(addr: SocketAddr) -> io::Result<Port> {
        let fd = raw_socket(addr)?;
        Self::set_nonblocking(fd)?;

        unsafe {
            let (sockaddr, len) = sockaddr_of(addr);
            if libc::connect(fd, &sockaddr as *const _ as *const libc::sockaddr, len) != 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock
                    && err.raw_os_error() != Some(libc::EINPROGRESS)
                {
                    libc::close(fd);
                    return Err(err);
                }
            }
        }

        Ok(Port::wrap(fd, PortKind::Socket, INPUT | OUTPUT))
    }

    /// Binds then connects (spec §6 `(octets, ip4|ip6, tcp, bind)`).
    pub fn bind_connect(bind_addr: SocketAddr, connect_addr: SocketAddr) -> io::Result<Port> {
        let fd = raw_socket(connect_addr)?;
        Self::set_nonblocking(fd)?;

        unsafe {
            let (bind_sockaddr, bind_len) = sockaddr_of(bind_addr);
            if libc::bind(fd, &bind_sockaddr as *const _ as *const libc::sockaddr, bind_len) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }

            let (sockaddr, len) = sockaddr_of(connect_addr);
            if libc::connect(fd, &sockaddr as *const _ as *const libc::sockaddr, len) != 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock
                    && err.raw_os_error() != Some(libc::EINPROGRESS)
                {
                    libc::close(fd);
                    return Err(err);
                }
            }
        }

        Ok(Port::wrap(fd, PortKind::Socket, INPUT | OUTPUT))
    }

    /// Binds a UDP socket for datagram use (no connect).
    pub fn bind(addr: SocketAddr) -> io::Result<Port> {
        let fd = raw_dgram_socket(addr)?;
        Self::set_nonblocking(fd)?;

        unsafe {
            let (sockaddr, len) = sockaddr_of(addr);
            if libc::bind(fd, &sockaddr as *const _ as *const libc::sockaddr, len) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
        }

        Ok(Port::wrap(fd, PortKind::Socket, INPUT | OUTPUT))
    }

    /// Connects to a UNIX-domain stream socket at `path`.
    pub fn connect_local(path: &Path) -> io::Result<Port> {
        let addr = UnixSocketAddr::from_pathname(path)?;
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Self::set_nonblocking(fd)?;

        let cpath = CString::new(path.as_os_str().to_str().unwrap_or_default())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul byte in path"))?;

        unsafe {
            let mut sockaddr: libc::sockaddr_un = mem::zeroed();
            sockaddr.sun_family = libc::AF_UNIX as libc::sa_family_t;
            let bytes = cpath.as_bytes_with_nul();
            if bytes.len() > sockaddr.sun_path.len() {
                libc::close(fd);
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "path too long"));
            }
            for (dst, src) in sockaddr.sun_path.iter_mut().zip(bytes.iter()) {
                *dst = *src as libc::c_char;
            }
            let len = (mem::size_of::<libc::sa_family_t>() + bytes.len()) as libc::socklen_t;

            if libc::connect(fd, &sockaddr as *const _ as *const libc::sockaddr, len) != 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock
                    && err.raw_os_error() != Some(libc::EINPROGRESS)
                {
                    libc::close(fd);
                    return Err(err);
                }
            }
        }
        let _ = addr;

        Ok(Port::wrap(fd, PortKind::Socket, INPUT | OUTPUT))
    }

    /// Binds and listens on a UNIX-domain path (spec §6 `(sockets, local)`).
    pub fn listen_local(path: &Path) -> io::Result<Port> {
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Self::set_nonblocking(fd)?;

        let cpath = CString::new(path.as_os_str().to_str().unwrap_or_default())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul byte in path"))?;

        unsafe {
            let mut sockaddr: libc::sockaddr_un = mem::zeroed();
            sockaddr.sun_family = libc::AF_UNIX as libc::sa_family_t;
            let bytes = cpath.as_bytes_with_nul();
            if bytes.len() > sockaddr.sun_path.len() {
                libc::close(fd);
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "path too long"));
            }
            for (dst, src) in sockaddr.sun_path.iter_mut().zip(bytes.iter()) {
                *dst = *src as libc::c_char;
            }
            let len = (mem::size_of::<libc::sa_family_t>() + bytes.len()) as libc::socklen_t;

            if libc::bind(fd, &sockaddr as *const _ as *const libc::sockaddr, len) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
            if libc::listen(fd, 1024) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
        }

        Ok(Port::wrap(fd, PortKind::Socket, INPUT))
    }

    /// Opens a plain file for the `(octets, file, ...)` allocator forms.
    pub fn open(path: &Path, read: bool, write: bool, append: bool, create: bool) -> io::Result<Port> {
        let mut flags = 0;
        if read && write {
            flags |= libc::O_RDWR;
        } else if write {
            flags |= libc::O_WRONLY;
        } else {
            flags |= libc::O_RDONLY;
        }
        if append {
            flags |= libc::O_APPEND;
        }
        if create {
            flags |= libc::O_CREAT;
        }

        let cpath = CString::new(path.as_os_str().to_str().unwrap_or_default())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul byte in path"))?;

        let fd = unsafe { libc::open(cpath.as_ptr(), flags, 0o644) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let directions = match (read, write) {
            (true, true) => INPUT | OUTPUT,
            (true, false) => INPUT,
            (false, true) => OUTPUT,
            (false, false) => 0,
        };

        Ok(Port::wrap(fd, PortKind::File, directions))
    }

    /// Wraps an already-open, externally supplied descriptor (spec §6's
    /// `acquire` allocator forms), classifying it and forcing it
    /// non-blocking.
    pub fn acquire(fd: RawFd, directions: u8) -> io::Result<Port> {
        Self::set_nonblocking(fd)?;
        Ok(Port::wrap(fd, PortKind::of(fd), directions))
    }

    /// Creates a unidirectional `pipe(2)` pair: `(read_end, write_end)`.
    pub fn pipe() -> io::Result<(Port, Port)> {
        let mut fds: [libc::c_int; 2] = [0; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Self::set_nonblocking(fds[0])?;
        Self::set_nonblocking(fds[1])?;

        Ok((
            Port::wrap(fds[0], PortKind::Pipe, INPUT),
            Port::wrap(fds[1], PortKind::Pipe, OUTPUT),
        ))
    }

    /// Creates a bidirectional `socketpair(2)` pair, each end usable for
    /// input and output (spec §6 `(octets, spawn, bidirectional)`).
    pub fn socketpair() -> io::Result<(Port, Port)> {
        let mut fds: [libc::c_int; 2] = [0; 2];
        if unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Self::set_nonblocking(fds[0])?;
        Self::set_nonblocking(fds[1])?;

        Ok((
            Port::wrap(fds[0], PortKind::Socket, INPUT | OUTPUT),
            Port::wrap(fds[1], PortKind::Socket, INPUT | OUTPUT),
        ))
    }

    /// Accepts one connection off a listening Port, returning the accepted
    /// descriptor as a raw `RawFd` (the caller wraps it in a `Port`).
    pub fn accept(&mut self) -> io::Result<(RawFd, Option<SocketAddr>)> {
        unsafe {
            let mut storage: libc::sockaddr_storage = mem::zeroed();
            let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

            let fd = libc::accept(self.fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len);
            if fd < 0 {
                let err = io::Error::last_os_error();
                return Err(self.fail(KCall::Accept, err));
            }
            let _ = Self::set_nonblocking(fd);

            Ok((fd, sockaddr_to_socket_addr(&storage)))
        }
    }

    /// Local or peer address for this Port's socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        unsafe {
            let mut storage: libc::sockaddr_storage = mem::zeroed();
            let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            if libc::getsockname(self.fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) != 0 {
                return Err(io::Error::last_os_error());
            }
            sockaddr_to_socket_addr(&storage)
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "not an IP socket"))
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        unsafe {
            let mut storage: libc::sockaddr_storage = mem::zeroed();
            let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            if libc::getpeername(self.fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) != 0 {
                return Err(io::Error::last_os_error());
            }
            sockaddr_to_socket_addr(&storage)
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "not an IP socket"))
        }
    }

    /// Peer credentials for an anonymous UNIX-domain socket (spec §4.2
    /// `endpoint()`).
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> io::Result<(u32, u32)> {
        unsafe {
            let mut cred: libc::ucred = mem::zeroed();
            let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;
            if libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            ) != 0
            {
                return Err(io::Error::last_os_error());
            }
            Ok((cred.uid, cred.gid))
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> io::Result<(u32, u32)> {
        unsafe {
            let mut uid: libc::uid_t = 0;
            let mut gid: libc::gid_t = 0;
            if libc::getpeereid(self.fd, &mut uid, &mut gid) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok((uid, gid))
        }
    }

    /// Reads up to `buf.len()` bytes, classifying the result per spec §4.4
    /// phase 7: zero-length read on a stream means EOF (`Terminate`), a
    /// partial/full read is `Flow`-or-`Stop` depending on whether more data
    /// might be pending, and `EAGAIN` is `Stop`.
    pub fn input_read(&mut self, buf: &mut [u8]) -> IoOutcome {
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        self.classify_io(KCall::Read, n, buf.len())
    }

    /// Writes up to `buf.len()` bytes.
    pub fn output_write(&mut self, buf: &[u8]) -> IoOutcome {
        let n = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        self.classify_io(KCall::Write, n, buf.len())
    }

    fn classify_io(&mut self, call: KCall, n: isize, requested: usize) -> IoOutcome {
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                return IoOutcome::Stop(0);
            }
            let err = self.fail(call, err);
            return IoOutcome::Terminate(Cause::of(call, &err));
        }

        let n = n as usize;
        if n == 0 && requested > 0 {
            self.cause = Cause::eof();
            return IoOutcome::Terminate(Cause::eof());
        }

        if n < requested {
            IoOutcome::Stop(n)
        } else {
            IoOutcome::Flow(n)
        }
    }

    /// Decrements the half-close latch for `direction` (restricted to the
    /// directions this handle owns). When every handle sharing this
    /// descriptor has unlatched its direction, performs `shutdown` (for
    /// sockets) and `close`. Spec §3 Invariant 4 — a descriptor closes
    /// exactly once.
    pub fn unlatch(&mut self, direction: u8) {
        let bits = direction & self.owned;
        if bits == 0 {
            return;
        }
        let prev = self.remaining.fetch_and(!bits, Ordering::AcqRel);
        if prev & !bits == 0 {
            self.close_if_needed();
        }
    }

    fn close_if_needed(&self) {
        if self.leaked.load(Ordering::Acquire) {
            return;
        }
        if self.closed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            if self.kind == PortKind::Socket {
                unsafe {
                    libc::shutdown(self.fd, libc::SHUT_RDWR);
                }
            }
            unsafe {
                libc::close(self.fd);
            }
        }
    }

    /// Marks the descriptor as no-close: the user assumes ownership and no
    /// handle sharing this descriptor will issue `close` on unlatch or drop.
    pub fn leak(&mut self) {
        self.leaked.store(true, Ordering::Release);
    }

    /// Drops this Port's claim without `shutdown`, used when a Junction
    /// subscription would otherwise outlive the descriptor's validity (spec
    /// §4.1). The descriptor is still closed (unless leaked), just without
    /// a prior `shutdown` attempt, and regardless of whether a sibling
    /// handle still thinks its direction is open — `shatter` is a forced
    /// override, not a cooperative unlatch.
    pub fn shatter(&mut self) {
        self.remaining.store(0, Ordering::Release);
        if !self.leaked.load(Ordering::Acquire)
            && self.closed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
        {
            unsafe {
                libc::close(self.fd);
            }
        }
        self.cause = Cause { call: KCall::Shatter, errno: None };
    }
}

fn raw_socket(addr: SocketAddr) -> io::Result<RawFd> {
    let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

fn raw_dgram_socket(addr: SocketAddr) -> io::Result<RawFd> {
    let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
    let fd = unsafe { libc::socket(domain, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

unsafe fn sockaddr_of(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = mem::zeroed();

    match addr {
        SocketAddr::V4(v4) => {
            let sin = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in);
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sin6 = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6);
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

unsafe fn sockaddr_to_socket_addr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = &*(storage as *const _ as *const libc::sockaddr_in);
            let ip = std::net::Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::new(ip.into(), u16::from_be(sin.sin_port)))
        }
        libc::AF_INET6 => {
            let sin6 = &*(storage as *const _ as *const libc::sockaddr_in6);
            let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::new(ip.into(), u16::from_be(sin6.sin6_port)))
        }
        _ => None,
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        if self.owned == 0 {
            return;
        }
        let prev = self.remaining.fetch_and(!self.owned, Ordering::AcqRel);
        if prev & !self.owned == 0 {
            self.close_if_needed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_roundtrip() {
        let (mut read_end, mut write_end) = Port::pipe().unwrap();

        match write_end.output_write(b"hello") {
            IoOutcome::Flow(5) => (),
            other => panic!("unexpected outcome {:?}", other),
        }

        let mut buf = [0u8; 16];
        match read_end.input_read(&mut buf) {
            IoOutcome::Stop(5) => assert_eq!(&buf[..5], b"hello"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_pipe_eof_on_close() {
        let (mut read_end, write_end) = Port::pipe().unwrap();
        write_end.unlatch(OUTPUT);

        let mut buf = [0u8; 16];
        match read_end.input_read(&mut buf) {
            IoOutcome::Terminate(cause) => assert_eq!(cause.call, KCall::Eof),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_unlatch_closes_once_both_directions_clear() {
        let (mut a, mut b) = Port::socketpair().unwrap();

        // Half-unlatching `a` must not close its descriptor yet.
        a.unlatch(INPUT);
        match a.output_write(b"x") {
            IoOutcome::Flow(1) | IoOutcome::Stop(1) => (),
            other => panic!("write after half-unlatch should still succeed, got {:?}", other),
        }

        // The second unlatch drops the last direction and closes `a`'s fd.
        a.unlatch(OUTPUT);

        b.unlatch(INPUT);
        b.unlatch(OUTPUT);
    }

    #[test]
    fn test_identify_pipe() {
        let (read_end, _write_end) = Port::pipe().unwrap();
        assert_eq!(PortKind::of(read_end.fd()), PortKind::Fifo);
    }

    #[test]
    fn test_leak_prevents_close() {
        let (mut read_end, write_end) = Port::pipe().unwrap();
        let fd = read_end.fd();
        read_end.leak();
        read_end.unlatch(INPUT);

        // The fd must still be valid; fcntl should succeed.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert!(flags >= 0);

        unsafe {
            libc::close(fd);
        }
        drop(write_end);
    }
}
