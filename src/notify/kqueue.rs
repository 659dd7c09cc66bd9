//! kqueue backend. Changelist construction and `EV_ERROR` checking follow
//! `other_examples/fafhrd91-polling/src/kqueue.rs`; the wakeup mechanism
//! uses a dedicated `EVFILT_USER` watch (spec §4.5) rather than that
//! example's notification pipe, since `EVFILT_USER` needs no extra fd.

use super::{Interest, NotificationShim, RawEvent, WAKE_KEY};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

/// Fixed `ident` the wakeup `EVFILT_USER` watch is registered under. Real
/// Channel file descriptors are always >= 0 and keyed by `udata`, not
/// `ident`, on the read/write filters, so this choice can't collide.
const WAKE_IDENT: libc::uintptr_t = 0;

pub struct Shim {
    kq: RawFd,
    scratch: Vec<libc::kevent>,
    raw: Vec<RawEvent>,
}

impl Shim {
    /// Applies a changelist with `EV_RECEIPT` set on every entry, so a
    /// same-sized `eventlist` gets a per-entry `EV_ERROR`/`data` status back
    /// instead of one aggregate result — matching
    /// `other_examples/fafhrd91-polling/src/kqueue.rs`'s `interest`/`remove`.
    /// Without this, a batch containing both a harmless `ENOENT` (deleting a
    /// filter never added) and a real `EV_ADD` can abort before the `EV_ADD`
    /// is applied.
    fn submit(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let mut eventlist: Vec<libc::kevent> = changes.to_vec();
        let res = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as libc::c_int,
                eventlist.as_mut_ptr(),
                eventlist.len() as libc::c_int,
                ptr::null(),
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        for ev in &eventlist {
            if (ev.flags & libc::EV_ERROR) != 0 && ev.data != 0 && ev.data != libc::ENOENT as _ {
                return Err(io::Error::from_raw_os_error(ev.data as i32));
            }
        }
        Ok(())
    }
}

impl NotificationShim for Shim {
    const RETRY_UNCONDITIONAL: bool = false;

    fn create(scratch_capacity: usize) -> io::Result<Shim> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe {
            libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC);
        }

        let shim = Shim {
            kq,
            scratch: vec![blank_kevent(); scratch_capacity],
            raw: Vec::with_capacity(scratch_capacity),
        };

        // Register the wakeup watch once; EV_CLEAR means it re-arms after
        // each trigger without needing to be re-added.
        let wake = libc::kevent {
            ident: WAKE_IDENT,
            filter: libc::EVFILT_USER,
            flags: libc::EV_ADD | libc::EV_CLEAR | libc::EV_RECEIPT,
            fflags: 0,
            data: 0,
            udata: WAKE_KEY as *mut libc::c_void,
        };
        shim.submit(&[wake])?;

        Ok(shim)
    }

    fn subscribe(&mut self, fd: RawFd, key: usize, interest: Interest) -> io::Result<()> {
        // Edge-triggered (`EV_CLEAR`) to match epoll's `EPOLLET`, per spec
        // §1's requirement for deterministic edge-triggered behavior across
        // both backends.
        let read_flags = if interest.readable {
            libc::EV_ADD | libc::EV_CLEAR | libc::EV_RECEIPT
        } else {
            libc::EV_DELETE | libc::EV_RECEIPT
        };
        let write_flags = if interest.writable {
            libc::EV_ADD | libc::EV_CLEAR | libc::EV_RECEIPT
        } else {
            libc::EV_DELETE | libc::EV_RECEIPT
        };

        let changes = [
            libc::kevent {
                ident: fd as libc::uintptr_t,
                filter: libc::EVFILT_READ,
                flags: read_flags,
                fflags: 0,
                data: 0,
                udata: key as *mut libc::c_void,
            },
            libc::kevent {
                ident: fd as libc::uintptr_t,
                filter: libc::EVFILT_WRITE,
                flags: write_flags,
                fflags: 0,
                data: 0,
                udata: key as *mut libc::c_void,
            },
        ];

        // `submit` checks each of the two entries independently, so a
        // harmless ENOENT deleting a filter that was never added on one
        // entry can never suppress the EV_ADD the other entry needed.
        self.submit(&changes)
    }

    fn unsubscribe(&mut self, fd: RawFd) -> io::Result<()> {
        self.subscribe(fd, 0, Interest::NONE)
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<(&[RawEvent], bool)> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: libc::c_long::from(d.subsec_nanos() as i32),
        });

        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                self.scratch.as_mut_ptr(),
                self.scratch.len() as libc::c_int,
                match &ts {
                    Some(ts) => ts,
                    None => ptr::null(),
                },
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;

        self.raw.clear();
        for ev in &self.scratch[..n] {
            if ev.filter == libc::EVFILT_USER {
                self.raw.push(RawEvent { key: WAKE_KEY, readable: false, writable: false, terminate: false });
                continue;
            }

            let terminate = ev.filter == libc::EVFILT_WRITE && (ev.flags & libc::EV_EOF) != 0;
            self.raw.push(RawEvent {
                key: ev.udata as usize,
                readable: ev.filter == libc::EVFILT_READ,
                writable: ev.filter == libc::EVFILT_WRITE,
                terminate,
            });
        }

        Ok((&self.raw, n == self.scratch.len()))
    }

    fn wake(&self) -> io::Result<()> {
        trigger(self.kq)
    }

    fn wake_token(&self) -> super::WakeToken {
        super::WakeToken::Kqueue(self.kq)
    }
}

/// Submits the `EVFILT_USER` trigger directly against a raw kqueue fd, with
/// no `Shim` borrow required — this is what lets `WakeToken::wake` interrupt
/// a blocked `wait()` from another thread (see `notify::WakeToken`).
pub(super) fn trigger(kq: RawFd) -> io::Result<()> {
    let change = libc::kevent {
        ident: WAKE_IDENT,
        filter: libc::EVFILT_USER,
        flags: libc::EV_ADD | libc::EV_CLEAR,
        fflags: libc::NOTE_TRIGGER,
        data: 0,
        udata: WAKE_KEY as *mut libc::c_void,
    };
    let res = unsafe {
        libc::kevent(kq, &change, 1, ptr::null_mut(), 0, ptr::null())
    };
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn blank_kevent() -> libc::kevent {
    libc::kevent {
        ident: 0,
        filter: 0,
        flags: 0,
        fflags: 0,
        data: 0,
        udata: ptr::null_mut(),
    }
}

impl Drop for Shim {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
