//! Datagrams freight: addressed packets moved through a `DatagramArray` via
//! `recvmsg`/`sendmsg` (spec §4.3). Unit size is the array's per-record
//! capacity — one unit advance corresponds to one record, not one byte.
//! There is no teacher analogue carrying addresses per-message; grounded on
//! `Port`'s existing `sockaddr_storage` conversion helpers plus the raw
//! `recvmsg`/`sendmsg` idiom shared with `freight::ports`.

use crate::datagram_array::DatagramArray;
use crate::endpoint::Endpoint;
use crate::error::{Cause, IoOutcome, KCall};
use crate::port::Port;
use std::io;
use std::mem;
use std::net::SocketAddr;

pub fn unit(array: &DatagramArray) -> usize {
    array.record_capacity()
}

/// Receives datagrams into every free record from `start / unit` onward —
/// spec §4.3's "`recvmsg` loop" — stopping once the array is full or the
/// socket reports `EAGAIN`/`WouldBlock`.
pub fn input(array: &mut DatagramArray, port: &mut Port, start: usize) -> IoOutcome {
    let unit = array.record_capacity();
    let mut index = start / unit;
    let mut advanced = 0usize;

    while index < array.len() {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

        let n = {
            let buf = array.payload_mut(index);
            let mut iov =
                libc::iovec { iov_base: buf.as_mut_ptr() as *mut libc::c_void, iov_len: buf.len() };
            let mut msg: libc::msghdr = unsafe { mem::zeroed() };
            msg.msg_name = &mut storage as *mut _ as *mut libc::c_void;
            msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;

            unsafe { libc::recvmsg(port.fd(), &mut msg, 0) }
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                break;
            }
            return if advanced > 0 {
                IoOutcome::Flow(advanced)
            } else {
                IoOutcome::Terminate(Cause::of(KCall::Recv, &err))
            };
        }

        let addr = sockaddr_to_endpoint(&storage).unwrap_or_else(|| Endpoint::ip4(default_addr()));
        array.set_received(index, addr, n as usize);
        advanced += unit;
        index += 1;
    }

    if advanced > 0 {
        IoOutcome::Flow(advanced)
    } else {
        IoOutcome::Stop(0)
    }
}

/// Sends every already-staged record (via `set_outgoing`) from `start /
/// unit` onward — spec §4.3's "`sendmsg` loop" — stopping at the first
/// unstaged record or `EAGAIN`/`WouldBlock`.
pub fn output(array: &mut DatagramArray, port: &mut Port, start: usize) -> IoOutcome {
    let unit = array.record_capacity();
    let mut index = start / unit;
    let mut advanced = 0usize;

    while index < array.len() {
        let address = match array.address(index) {
            Some(addr) => addr.clone(),
            None => break,
        };

        let (mut storage, len) = unsafe { sockaddr_of_endpoint(&address) };

        let n = {
            let buf = array.payload(index);
            let mut iov =
                libc::iovec { iov_base: buf.as_ptr() as *mut libc::c_void, iov_len: buf.len() };
            let mut msg: libc::msghdr = unsafe { mem::zeroed() };
            msg.msg_name = &mut storage as *mut _ as *mut libc::c_void;
            msg.msg_namelen = len;
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;

            unsafe { libc::sendmsg(port.fd(), &msg, 0) }
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                break;
            }
            return if advanced > 0 {
                IoOutcome::Flow(advanced)
            } else {
                IoOutcome::Terminate(Cause::of(KCall::Send, &err))
            };
        }

        advanced += unit;
        index += 1;
    }

    if advanced > 0 {
        IoOutcome::Flow(advanced)
    } else {
        IoOutcome::Stop(0)
    }
}

fn default_addr() -> SocketAddr {
    "0.0.0.0:0".parse().unwrap()
}

unsafe fn sockaddr_to_endpoint(storage: &libc::sockaddr_storage) -> Option<Endpoint> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = &*(storage as *const _ as *const libc::sockaddr_in);
            let ip = std::net::Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(Endpoint::ip4(SocketAddr::new(ip.into(), u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = &*(storage as *const _ as *const libc::sockaddr_in6);
            let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(Endpoint::ip6(SocketAddr::new(ip.into(), u16::from_be(sin6.sin6_port))))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Port;
    use rand::Rng;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    /// spec §4.3's Datagrams row is a "`recvmsg` loop" — a single `input`
    /// call must drain every datagram already queued in the kernel, not
    /// just the first, provided the array has the free records to hold
    /// them.
    #[test]
    fn test_input_drains_multiple_queued_datagrams_in_one_call() {
        let addr_a: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let addr_b: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut sender = Port::bind(addr_a).unwrap();
        let mut receiver = Port::bind(addr_b).unwrap();
        let receiver_addr = receiver.local_addr().unwrap();

        let mut rng = rand::thread_rng();
        let payloads: Vec<Vec<u8>> =
            (0..3).map(|_| (0..32).map(|_| rng.gen::<u8>()).collect()).collect();

        for payload in &payloads {
            let mut outgoing = DatagramArray::new(1, 64);
            outgoing.set_outgoing(0, Endpoint::ip4(receiver_addr), payload);
            output(&mut outgoing, &mut sender, 0);
        }

        // Give the loopback stack a moment to queue all three sends before
        // draining them in a single `input` call.
        thread::sleep(Duration::from_millis(20));

        let mut incoming = DatagramArray::new(3, 64);
        let outcome = input(&mut incoming, &mut receiver, 0);

        match outcome {
            IoOutcome::Flow(advanced) => assert_eq!(advanced, 3 * incoming.record_capacity()),
            other => panic!("expected all 3 queued datagrams to drain in one call, got {:?}", other),
        }

        let received: HashSet<Vec<u8>> = (0..3).map(|i| incoming.payload(i).to_vec()).collect();
        let expected: HashSet<Vec<u8>> = payloads.into_iter().collect();
        assert_eq!(received, expected);
    }
}

unsafe fn sockaddr_of_endpoint(endpoint: &Endpoint) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = mem::zeroed();
    match endpoint {
        Endpoint::Ip4(addr) => {
            if let SocketAddr::V4(v4) = addr {
                let sin = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in);
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            }
            (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        Endpoint::Ip6(addr) => {
            if let SocketAddr::V6(v6) = addr {
                let sin6 = &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6);
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
            }
            (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
        _ => (storage, 0),
    }
}
