//! epoll backend. The raw `epoll_create`/`epoll_ctl`/`epoll_wait` calls
//! follow `other_examples/cfsamson-examples-minimio/src/linux.rs`'s
//! from-scratch `mod ffi` block. Spec §4.5 calls for *two* epoll instances
//! (read-interest and write-interest) plus an `eventfd` wakeup, alternating
//! between the two instances each cycle so that, at scale, readable
//! readiness on one instance cannot starve writable readiness queued on the
//! other — a failure mode that doesn't exist on kqueue, where one filter
//! carries both.

use super::{Interest, NotificationShim, RawEvent, WAKE_KEY};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

const READ_FLAGS: u32 =
    (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR | libc::EPOLLET) as u32;
const WRITE_FLAGS: u32 =
    (libc::EPOLLOUT | libc::EPOLLHUP | libc::EPOLLERR | libc::EPOLLET) as u32;

pub struct Shim {
    read_epfd: RawFd,
    write_epfd: RawFd,
    wake_fd: RawFd,
    scratch: Vec<libc::epoll_event>,
    raw: Vec<RawEvent>,
    /// Tracks, per fd, whether it currently holds a registration on the
    /// read and/or write epoll instance, so `subscribe` can choose
    /// `EPOLL_CTL_ADD` vs `EPOLL_CTL_DEL` correctly.
    membership: HashMap<RawFd, (bool, bool)>,
    /// Set when the previous cycle observed writable readiness; gates
    /// whether the write epoll instance is consulted this cycle (spec
    /// §4.5's "haswrites" hint).
    haswrites: bool,
    /// Flips every `wait()` call; consulting the write instance on this
    /// flag too (even when `haswrites` is false) is what spec §4.5's
    /// "alternating each cycle" means — without it, a freshly-subscribed
    /// write-only Channel would never be probed at all, since `haswrites`
    /// only ever becomes true as a result of consulting the write instance
    /// in the first place.
    alternate: bool,
}

impl Shim {
    fn ctl(&self, epfd: RawFd, op: libc::c_int, fd: RawFd, flags: u32, key: usize) -> io::Result<()> {
        let mut event = libc::epoll_event { events: flags, u64: key as u64 };
        let res = unsafe { libc::epoll_ctl(epfd, op, fd, &mut event) };
        if res < 0 {
            let err = io::Error::last_os_error();
            // Removing a registration that already lapsed (fd closed
            // concurrently) is not fatal to the cycle.
            if op == libc::EPOLL_CTL_DEL && err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    fn poll_one(&mut self, epfd: RawFd, timeout: Option<Duration>) -> io::Result<(bool, bool)> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(i64::from(i32::max_value()) as u128) as i32,
        };

        let n = unsafe {
            libc::epoll_wait(
                epfd,
                self.scratch.as_mut_ptr(),
                self.scratch.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok((false, false));
            }
            return Err(err);
        }
        let n = n as usize;

        let mut saw_writable = false;
        for ev in &self.scratch[..n] {
            let key = ev.u64 as usize;
            if key == WAKE_KEY {
                self.drain_wake();
                self.raw.push(RawEvent { key: WAKE_KEY, readable: false, writable: false, terminate: false });
                continue;
            }

            let flags = ev.events as libc::c_int;
            let writable = flags & libc::EPOLLOUT != 0;
            saw_writable |= writable;

            self.raw.push(RawEvent {
                key,
                readable: flags & libc::EPOLLIN != 0,
                writable,
                terminate: flags & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) != 0,
            });
        }

        Ok((n == self.scratch.len(), saw_writable))
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            while libc::read(self.wake_fd, buf.as_mut_ptr() as *mut libc::c_void, 8) > 0 {}
        }
    }
}

impl NotificationShim for Shim {
    // Spec §9 Open Question #1: unlike kqueue, epoll retries the
    // configured number of times unconditionally in phase 5, not only when
    // the scratch array filled. Preserved as observed.
    const RETRY_UNCONDITIONAL: bool = true;

    fn create(scratch_capacity: usize) -> io::Result<Shim> {
        let read_epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if read_epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        let write_epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if write_epfd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(read_epfd) };
            return Err(err);
        }
        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(read_epfd);
                libc::close(write_epfd);
            }
            return Err(err);
        }

        let shim = Shim {
            read_epfd,
            write_epfd,
            wake_fd,
            scratch: vec![libc::epoll_event { events: 0, u64: 0 }; scratch_capacity],
            raw: Vec::with_capacity(scratch_capacity),
            membership: HashMap::new(),
            haswrites: false,
            alternate: false,
        };

        shim.ctl(read_epfd, libc::EPOLL_CTL_ADD, wake_fd, libc::EPOLLIN as u32, WAKE_KEY)?;

        Ok(shim)
    }

    fn subscribe(&mut self, fd: RawFd, key: usize, interest: Interest) -> io::Result<()> {
        let (on_read, on_write) = *self.membership.get(&fd).unwrap_or(&(false, false));

        match (interest.readable, on_read) {
            (true, false) => self.ctl(self.read_epfd, libc::EPOLL_CTL_ADD, fd, READ_FLAGS, key)?,
            (true, true) => self.ctl(self.read_epfd, libc::EPOLL_CTL_MOD, fd, READ_FLAGS, key)?,
            (false, true) => self.ctl(self.read_epfd, libc::EPOLL_CTL_DEL, fd, 0, 0)?,
            (false, false) => (),
        }

        match (interest.writable, on_write) {
            (true, false) => self.ctl(self.write_epfd, libc::EPOLL_CTL_ADD, fd, WRITE_FLAGS, key)?,
            (true, true) => self.ctl(self.write_epfd, libc::EPOLL_CTL_MOD, fd, WRITE_FLAGS, key)?,
            (false, true) => self.ctl(self.write_epfd, libc::EPOLL_CTL_DEL, fd, 0, 0)?,
            (false, false) => (),
        }

        if interest.is_none() {
            self.membership.remove(&fd);
        } else {
            self.membership.insert(fd, (interest.readable, interest.writable));
        }

        Ok(())
    }

    fn unsubscribe(&mut self, fd: RawFd) -> io::Result<()> {
        self.subscribe(fd, 0, Interest::NONE)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<(&[RawEvent], bool)> {
        self.raw.clear();

        let (filled_read, _) = self.poll_one(self.read_epfd, timeout)?;

        // Spec §4.5: the write instance is consulted only when the previous
        // cycle saw writable readiness, alternating each cycle — `alternate`
        // is the alternation itself, giving every write-only Channel a
        // bootstrap probe at least every other cycle instead of never.
        let consult_write = self.haswrites || self.alternate;
        self.alternate = !self.alternate;

        let mut filled_write = false;
        if consult_write {
            let (filled, saw_writable) = self.poll_one(self.write_epfd, Some(Duration::from_millis(0)))?;
            filled_write = filled;
            self.haswrites = saw_writable;
        } else {
            self.haswrites = false;
        }

        Ok((&self.raw, filled_read || filled_write))
    }

    fn wake(&self) -> io::Result<()> {
        trigger(self.wake_fd)
    }

    fn wake_token(&self) -> super::WakeToken {
        super::WakeToken::Epoll(self.wake_fd)
    }
}

/// Writes directly to a raw eventfd, with no `Shim` borrow required — this is
/// what lets `WakeToken::wake` interrupt a blocked `wait()` from another
/// thread (see `notify::WakeToken`).
pub(super) fn trigger(wake_fd: RawFd) -> io::Result<()> {
    let value: u64 = 1;
    let res = unsafe { libc::write(wake_fd, &value as *const _ as *const libc::c_void, 8) };
    if res < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

impl Drop for Shim {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_epfd);
            libc::close(self.write_epfd);
            libc::close(self.wake_fd);
        }
    }
}
