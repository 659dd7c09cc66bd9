//! Ports freight: passes bare file descriptors between processes over a
//! UNIX-domain socket via `SCM_RIGHTS` ancillary data (spec §4.3, allocator
//! forms `(ports, spawn, bidirectional)` / `(ports, acquire, socket)`).
//! There is no teacher analogue — `neutronium` never passes descriptors —
//! so the `msghdr`/`cmsghdr` construction is grounded on the raw `libc`
//! ancillary-data idiom used across the `other_examples` pack's
//! UNIX-socket FFI code, generalized to this crate's `IoOutcome` contract.

use crate::error::{Cause, IoOutcome, KCall};
use crate::port::Port;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;

pub const UNIT: usize = mem::size_of::<RawFd>();

/// Receives up to the available remaining slots' worth of descriptors in a
/// single `recvmsg` call.
pub fn input(slots: &mut [RawFd], port: &mut Port, start: usize) -> IoOutcome {
    let capacity = slots.len() - start / UNIT;
    if capacity == 0 {
        return IoOutcome::Stop(0);
    }

    let cmsg_space = unsafe { libc::CMSG_SPACE((capacity * UNIT) as libc::c_uint) as usize };
    let mut cmsg_buf = vec![0u8; cmsg_space];
    let mut payload = [0u8; 1];

    let mut iov = libc::iovec { iov_base: payload.as_mut_ptr() as *mut libc::c_void, iov_len: payload.len() };
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    let n = unsafe { libc::recvmsg(port.fd(), &mut msg, 0) };
    if n < 0 {
        let err = io::Error::last_os_error();
        return if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
            IoOutcome::Stop(0)
        } else {
            IoOutcome::Terminate(Cause::of(KCall::Recv, &err))
        };
    }
    if n == 0 {
        return IoOutcome::Terminate(Cause::eof());
    }

    let mut received = 0;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg) as *const RawFd;
                let count = ((*cmsg).cmsg_len - libc::CMSG_LEN(0) as libc::size_t) as usize / UNIT;
                for i in 0..count.min(capacity - received) {
                    slots[start / UNIT + received] = *data.add(i);
                    received += 1;
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if received == 0 {
        IoOutcome::Stop(0)
    } else {
        IoOutcome::Flow(received * UNIT)
    }
}

/// Sends every descriptor in `slots[start/UNIT..]` as ancillary data in a
/// single `sendmsg` call.
pub fn output(slots: &[RawFd], port: &mut Port, start: usize) -> IoOutcome {
    let fds = &slots[start / UNIT..];
    if fds.is_empty() {
        return IoOutcome::Stop(0);
    }

    let cmsg_space = unsafe { libc::CMSG_SPACE((fds.len() * UNIT) as libc::c_uint) as usize };
    let mut cmsg_buf = vec![0u8; cmsg_space];
    let mut payload = [0u8];

    let mut iov = libc::iovec { iov_base: payload.as_mut_ptr() as *mut libc::c_void, iov_len: payload.len() };
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN((fds.len() * UNIT) as libc::c_uint) as _;
        let data = libc::CMSG_DATA(cmsg) as *mut RawFd;
        for (i, fd) in fds.iter().enumerate() {
            *data.add(i) = *fd;
        }
    }

    let n = unsafe { libc::sendmsg(port.fd(), &msg, 0) };
    if n < 0 {
        let err = io::Error::last_os_error();
        return if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
            IoOutcome::Stop(0)
        } else {
            IoOutcome::Terminate(Cause::of(KCall::Send, &err))
        };
    }

    IoOutcome::Flow(fds.len() * UNIT)
}
