//! Sockets freight: a listening Channel whose resource is an array of
//! accepted file descriptors (spec §4.3). There is no output op — a
//! listener only ever produces sockets, never sends them; `output` exists
//! for symmetry with the other freights' shape but is never invoked by the
//! engine on an input-only Channel. Grounded on `Port::accept` plus
//! `neutronium::net::endpoint::Endpoint::sync`'s accept-retry loop, reduced
//! here to the single-accept-per-attempt shape spec §4.4 phase 7 calls for.

use crate::error::{Cause, IoOutcome, KCall};
use crate::port::Port;
use std::mem;
use std::os::unix::io::RawFd;

pub const UNIT: usize = mem::size_of::<RawFd>();

/// Accepts at most one connection into `slots` at the record position given
/// by the byte offset `start`. `listener` is the Channel's own Port.
pub fn input(slots: &mut [RawFd], listener: &mut Port, start: usize) -> IoOutcome {
    if start + UNIT > slots_as_bytes_len(slots) {
        return IoOutcome::Stop(0);
    }

    match listener.accept() {
        Ok((fd, _addr)) => {
            slots[start / UNIT] = fd;
            IoOutcome::Flow(UNIT)
        }
        Err(err) => {
            if err.kind() == std::io::ErrorKind::WouldBlock || err.kind() == std::io::ErrorKind::Interrupted {
                IoOutcome::Stop(0)
            } else {
                IoOutcome::Terminate(Cause::of(KCall::Accept, &err))
            }
        }
    }
}

pub fn output(_slots: &[RawFd], _port: &mut Port, _start: usize) -> IoOutcome {
    IoOutcome::Stop(0)
}

fn slots_as_bytes_len(slots: &[RawFd]) -> usize {
    slots.len() * UNIT
}
