//! Octets freight: a plain byte buffer moved with `read`/`write` (TCP, UDP,
//! pipes, files, UNIX streams). Unit size 1 — the byte window *is* the
//! user-visible index range. Grounded on
//! `neutronium::net::channel::Channel::{read, write}`, generalized from
//! that file's encrypted-frame-specific buffering to a plain pass-through.

use crate::error::IoOutcome;
use crate::port::Port;

pub fn input(buf: &mut [u8], port: &mut Port, start: usize) -> IoOutcome {
    port.input_read(&mut buf[start..])
}

pub fn output(buf: &[u8], port: &mut Port, start: usize) -> IoOutcome {
    port.output_write(&buf[start..])
}
