//! `DatagramArray`: a single backing byte buffer plus an index table mapping
//! a logical record to its `{address, payload-space}` within that buffer.
//! Slicing produces a new array that aliases the same backing memory; the
//! original controls lifetime (spec §4's DatagramArray description). There
//! is no direct teacher analogue — `neutronium::net::buffer::Buffer` is a
//! FIFO deque, not an addressed-record array — so this is grounded on the
//! teacher's `slice-deque`-free `Vec<u8>` storage conventions plus spec
//! §4.3's Datagrams freight entry (`recvmsg`/`sendmsg` loop over records).

use crate::endpoint::Endpoint;

/// One record's position within the backing buffer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Slot {
    offset: usize,
    capacity: usize,
    len: usize,
}

/// A fixed-capacity table of addressed datagram records sharing one backing
/// buffer. `record_capacity` bounds each record's payload space; the
/// backing buffer is `count * record_capacity` bytes.
pub struct DatagramArray {
    backing: Vec<u8>,
    slots: Vec<Slot>,
    addresses: Vec<Option<Endpoint>>,
    record_capacity: usize,
}

impl DatagramArray {
    /// Allocates `count` records, each with `record_capacity` bytes of
    /// payload space and no address yet.
    pub fn new(count: usize, record_capacity: usize) -> DatagramArray {
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            slots.push(Slot { offset: i * record_capacity, capacity: record_capacity, len: 0 });
        }

        DatagramArray {
            backing: vec![0u8; count * record_capacity],
            slots,
            addresses: vec![None; count],
            record_capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn record_capacity(&self) -> usize {
        self.record_capacity
    }

    pub fn address(&self, index: usize) -> Option<&Endpoint> {
        self.addresses[index].as_ref()
    }

    /// The record's current payload, up to its recorded length.
    pub fn payload(&self, index: usize) -> &[u8] {
        let slot = self.slots[index];
        &self.backing[slot.offset..slot.offset + slot.len]
    }

    /// The record's full writable capacity, for an incoming `recvmsg`.
    pub fn payload_mut(&mut self, index: usize) -> &mut [u8] {
        let slot = self.slots[index];
        &mut self.backing[slot.offset..slot.offset + slot.capacity]
    }

    /// Records the result of a `recvmsg` into slot `index`: the source
    /// address and the number of bytes actually received.
    pub fn set_received(&mut self, index: usize, address: Endpoint, len: usize) {
        debug_assert!(len <= self.slots[index].capacity);
        self.slots[index].len = len;
        self.addresses[index] = Some(address);
    }

    /// Stages an outgoing record for `sendmsg`: copies `payload` in and
    /// records the destination address.
    pub fn set_outgoing(&mut self, index: usize, address: Endpoint, payload: &[u8]) {
        let slot = self.slots[index];
        debug_assert!(payload.len() <= slot.capacity);
        self.backing[slot.offset..slot.offset + payload.len()].copy_from_slice(payload);
        self.slots[index].len = payload.len();
        self.addresses[index] = Some(address);
    }

    /// Produces a new `DatagramArray` aliasing the same backing memory over
    /// the given record range. The slice shares storage; mutating one
    /// through either handle is visible through the other, matching the
    /// "original controls lifetime" rule — the slice never outlives a
    /// borrow of the array it was taken from.
    pub fn slice(&mut self, range: std::ops::Range<usize>) -> DatagramArraySlice<'_> {
        DatagramArraySlice { array: self, range }
    }
}

/// A borrowed, aliasing view over a sub-range of records in a
/// `DatagramArray`. Indices passed to its methods are relative to the
/// slice, not the backing array.
pub struct DatagramArraySlice<'a> {
    array: &'a mut DatagramArray,
    range: std::ops::Range<usize>,
}

impl<'a> DatagramArraySlice<'a> {
    #[inline]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn address(&self, index: usize) -> Option<&Endpoint> {
        self.array.address(self.range.start + index)
    }

    pub fn payload(&self, index: usize) -> &[u8] {
        self.array.payload(self.range.start + index)
    }

    pub fn payload_mut(&mut self, index: usize) -> &mut [u8] {
        self.array.payload_mut(self.range.start + index)
    }

    pub fn set_received(&mut self, index: usize, address: Endpoint, len: usize) {
        self.array.set_received(self.range.start + index, address, len)
    }

    pub fn set_outgoing(&mut self, index: usize, address: Endpoint, payload: &[u8]) {
        self.array.set_outgoing(self.range.start + index, address, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_set_and_read_received() {
        let mut array = DatagramArray::new(4, 16);
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        array.set_received(0, Endpoint::ip4(addr), 5);
        array.payload_mut(0)[..5].copy_from_slice(b"hello");

        assert_eq!(array.payload(0), b"hello");
        assert_eq!(array.address(0), Some(&Endpoint::ip4(addr)));
    }

    #[test]
    fn test_outgoing_roundtrip() {
        let mut array = DatagramArray::new(2, 8);
        let addr: SocketAddr = "10.0.0.1:53".parse().unwrap();
        array.set_outgoing(1, Endpoint::ip4(addr), b"ping");

        assert_eq!(array.payload(1), b"ping");
        assert_eq!(array.address(1), Some(&Endpoint::ip4(addr)));
        // Untouched record stays empty.
        assert_eq!(array.payload(0), b"");
    }

    #[test]
    fn test_slice_aliases_backing_array() {
        let mut array = DatagramArray::new(4, 8);
        {
            let mut slice = array.slice(1..3);
            assert_eq!(slice.len(), 2);
            let addr: SocketAddr = "1.2.3.4:80".parse().unwrap();
            slice.set_outgoing(0, Endpoint::ip4(addr), b"abc");
        }
        // Index 0 of the slice maps to index 1 of the backing array.
        assert_eq!(array.payload(1), b"abc");
    }

    #[test]
    fn test_record_capacity_bounds() {
        let array = DatagramArray::new(3, 64);
        assert_eq!(array.len(), 3);
        assert_eq!(array.record_capacity(), 64);
    }
}
