//! Freight: the payload kind a Channel carries. Spec §4.3 frames this as a
//! tiny vtable `{input_op, output_op, freight_tag, unit}` chosen once at
//! construction and never changed; per `DESIGN.md`'s REDESIGN FLAGS
//! reading, that's re-expressed here as a closed sum type with one match
//! arm per variant rather than a `dyn` trait object — the set of freights
//! is fixed by this crate, not open to downstream extension, so a match is
//! both cheaper and more idiomatic than indirection through a vtable.

pub mod datagrams;
pub mod octets;
pub mod ports;
pub mod sockets;

use crate::datagram_array::DatagramArray;
use crate::error::IoOutcome;
use crate::port::Port;
use std::os::unix::io::RawFd;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FreightTag {
    Octets,
    Sockets,
    Ports,
    Datagrams,
}

/// The resource a Channel owns while `iteq_transfer` is qualified. Created
/// once by a `rallocate` request and replaced wholesale on each `acquire`;
/// the tag never changes across the Channel's lifetime.
pub enum Resource {
    Octets(Vec<u8>),
    Sockets(Vec<RawFd>),
    Ports(Vec<RawFd>),
    Datagrams(DatagramArray),
}

impl Resource {
    pub fn tag(&self) -> FreightTag {
        match self {
            Resource::Octets(_) => FreightTag::Octets,
            Resource::Sockets(_) => FreightTag::Sockets,
            Resource::Ports(_) => FreightTag::Ports,
            Resource::Datagrams(_) => FreightTag::Datagrams,
        }
    }

    /// The unit size in bytes: how many bytes of the window correspond to
    /// one user-visible record. 1 for Octets, `sizeof(RawFd)` for
    /// Sockets/Ports, the per-record capacity for Datagrams.
    pub fn unit(&self) -> usize {
        match self {
            Resource::Octets(_) => 1,
            Resource::Sockets(_) => sockets::UNIT,
            Resource::Ports(_) => ports::UNIT,
            Resource::Datagrams(array) => datagrams::unit(array),
        }
    }

    /// The resource's total size, in bytes, for the `[stop, resource_size)`
    /// window computation (spec §4.4 phase 7).
    pub fn byte_len(&self) -> usize {
        match self {
            Resource::Octets(buf) => buf.len(),
            Resource::Sockets(slots) => slots.len() * sockets::UNIT,
            Resource::Ports(slots) => slots.len() * ports::UNIT,
            Resource::Datagrams(array) => array.len() * array.record_capacity(),
        }
    }

    pub fn input(&mut self, port: &mut Port, start: usize) -> IoOutcome {
        match self {
            Resource::Octets(buf) => octets::input(buf, port, start),
            Resource::Sockets(slots) => sockets::input(slots, port, start),
            Resource::Ports(slots) => ports::input(slots, port, start),
            Resource::Datagrams(array) => datagrams::input(array, port, start),
        }
    }

    pub fn output(&mut self, port: &mut Port, start: usize) -> IoOutcome {
        match self {
            Resource::Octets(buf) => octets::output(buf, port, start),
            Resource::Sockets(slots) => sockets::output(slots, port, start),
            Resource::Ports(slots) => ports::output(slots, port, start),
            Resource::Datagrams(array) => datagrams::output(array, port, start),
        }
    }

    /// The user-visible transferred slice for the current cycle's window,
    /// where that projection is byte-addressable (Octets only — the other
    /// freights project through their own typed accessors instead, since
    /// `RawFd`/`DatagramArray` records aren't meaningfully byte slices).
    pub fn transferred_octets(&self, start: usize, stop: usize) -> Option<&[u8]> {
        match self {
            Resource::Octets(buf) => Some(&buf[start..stop]),
            _ => None,
        }
    }

    pub fn accepted_sockets(&self, start: usize, stop: usize) -> Option<&[RawFd]> {
        match self {
            Resource::Sockets(slots) | Resource::Ports(slots) => {
                Some(&slots[start / sockets::UNIT..stop / sockets::UNIT])
            }
            _ => None,
        }
    }

    pub fn datagrams(&self) -> Option<&DatagramArray> {
        match self {
            Resource::Datagrams(array) => Some(array),
            _ => None,
        }
    }

    pub fn datagrams_mut(&mut self) -> Option<&mut DatagramArray> {
        match self {
            Resource::Datagrams(array) => Some(array),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_octets_unit_and_len() {
        let resource = Resource::Octets(vec![0u8; 64]);
        assert_eq!(resource.unit(), 1);
        assert_eq!(resource.byte_len(), 64);
        assert_eq!(resource.tag(), FreightTag::Octets);
    }

    #[test]
    fn test_sockets_unit_matches_fd_size() {
        let resource = Resource::Sockets(vec![0 as RawFd; 4]);
        assert_eq!(resource.unit(), std::mem::size_of::<RawFd>());
        assert_eq!(resource.byte_len(), 4 * std::mem::size_of::<RawFd>());
    }

    #[test]
    fn test_datagrams_unit_matches_record_capacity() {
        let array = DatagramArray::new(3, 32);
        let resource = Resource::Datagrams(array);
        assert_eq!(resource.unit(), 32);
        assert_eq!(resource.byte_len(), 96);
    }
}
