//! `Channel`: a single unidirectional transfer participant bound to a
//! `Port`. Field layout follows `neutronium::net::channel::Channel`
//! (back-reference, Port, buffers), generalized per spec §3/§4.2: the
//! teacher's single `ChannelState` enum becomes three independent bitmaps
//! (`state`/`delta`/`events`) plus an explicit `{start, stop}` window, since
//! the cycle engine needs to distinguish "known to the kernel",
//! "requested by the user but not yet merged", and "observable this cycle"
//! rather than one coarse connection-lifecycle enum.

use crate::endpoint::Endpoint;
use crate::error::Cause;
use crate::freight::{FreightTag, Resource};
use crate::port::{Port, INPUT, OUTPUT};
use bitflags::bitflags;
use std::any::Any;
use std::io;

bitflags! {
    /// Named bits shared by `state`, `delta` and `events`. Not every bit is
    /// meaningful in every bitmap — `state` carries the full set, `delta`
    /// only the `CTL_*`/`TEQ_*` request bits, `events` only the `TEV_*`
    /// bits — but using one type for all three lets `delta` be merged into
    /// `state` with a plain bitwise OR (spec §4.4 phase 2).
    pub struct Flags: u32 {
        /// Set once `terminate()` is requested or the Junction itself is
        /// terminating; monotonic (spec §3 invariant 3).
        const TERMINATING    = 0b0000_0000_0001;
        /// The Channel has completed its handshake/connect and is eligible
        /// for normal transfer (as opposed to a still-connecting socket).
        const CONNECTED      = 0b0000_0000_0010;
        /// File-backed channels are always transferable and requeue
        /// themselves onto the transfer list every cycle (spec §6
        /// `(octets, file, ...)`: "always transferable; requeued").
        const REQUEUE        = 0b0000_0000_0100;
        /// Delta: (re)subscribe this Channel's Port with the notification
        /// shim next cycle.
        const CTL_CONNECT    = 0b0000_0000_1000;
        /// Delta: synthesize `xteq_transfer` next cycle regardless of
        /// kernel readiness (spec §4.2 `force()`).
        const CTL_FORCE      = 0b0000_0001_0000;
        /// State: the kernel has reported this Channel readable/writable.
        const XTEQ_TRANSFER  = 0b0000_0010_0000;
        /// State: the kernel has reported hangup/error on this Channel.
        const XTEQ_TERMINATE = 0b0000_0100_0000;
        /// State: the user has supplied a resource and not yet exhausted
        /// it (`acquire` sets this; `io_flow` clears it).
        const ITEQ_TRANSFER  = 0b0000_1000_0000;
        /// State: the user has requested termination.
        const ITEQ_TERMINATE = 0b0001_0000_0000;
        /// Delta: `acquire()` was called — merge into `ITEQ_TRANSFER` on
        /// drain.
        const TEQ_TRANSFER   = 0b0010_0000_0000;
        /// Delta: `terminate()` was called — merge into `ITEQ_TERMINATE`
        /// and `TERMINATING` on drain.
        const TEQ_TERMINATE  = 0b0100_0000_0000;
        /// Events: a transfer attempt ran this cycle.
        const TEV_TRANSFER   = 0b1000_0000_0000;
        /// Events: this Channel terminated this cycle.
        const TEV_TERMINATE  = 0b1_0000_0000_0000;
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Polarity {
    Input,
    Output,
}

impl Polarity {
    #[inline]
    pub fn direction_bit(self) -> u8 {
        match self {
            Polarity::Input => INPUT,
            Polarity::Output => OUTPUT,
        }
    }
}

/// Opaque index into a Junction's Channel arena. `NONE` marks "no link" in
/// the ring (used only during construction, before a Channel is spliced in)
/// and in the transfer list (`lltransfer == NONE` means not on the list).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ChannelId(pub usize);

impl ChannelId {
    pub const NONE: ChannelId = ChannelId(usize::max_value());

    #[inline]
    pub fn is_none(self) -> bool {
        self == ChannelId::NONE
    }
}

/// A single unidirectional transfer participant. Lives inside a Junction's
/// arena and is addressed by `ChannelId`. Spec §3 describes the ring as an
/// intrusive doubly linked list with the Junction as its own sentinel;
/// per spec §9's REDESIGN FLAGS guidance to avoid raw-pointer graph types,
/// ring *membership* (attachment) is instead tracked by the Junction's own
/// `live: IndexSet<ChannelId>` — the same field name and type
/// `neutronium::net::endpoint::Endpoint` already uses for exactly this
/// purpose — rather than by `prev`/`next` pointers embedded in `Channel`
/// itself. `lltransfer` is kept as a direct field: it marks transfer-list
/// membership (`!= NONE` means "on the list this cycle"), mirroring the
/// spec's "a Channel is on it iff lltransfer != null" check.
pub struct Channel {
    pub(crate) port: Port,
    pub(crate) polarity: Polarity,
    pub(crate) freight: FreightTag,
    pub(crate) resource: Option<Resource>,
    pub(crate) start: usize,
    pub(crate) stop: usize,
    pub(crate) state: Flags,
    pub(crate) delta: Flags,
    pub(crate) events: Flags,
    pub(crate) lltransfer: ChannelId,
    /// User-storage slot (spec §3 `link`) — opaque to the engine.
    pub link: Option<Box<dyn Any + Send>>,
}

impl Channel {
    pub(crate) fn new(port: Port, polarity: Polarity, freight: FreightTag) -> Channel {
        Channel {
            port,
            polarity,
            freight,
            resource: None,
            start: 0,
            stop: 0,
            state: Flags::empty(),
            delta: Flags::empty(),
            events: Flags::empty(),
            lltransfer: ChannelId::NONE,
            link: None,
        }
    }

    #[inline]
    pub fn port(&self) -> &Port {
        &self.port
    }

    #[inline]
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    #[inline]
    pub fn freight_tag(&self) -> FreightTag {
        self.freight
    }

    #[inline]
    pub fn cause(&self) -> Cause {
        self.port.cause()
    }

    #[inline]
    pub(crate) fn is_on_transfer_list(&self) -> bool {
        !self.lltransfer.is_none()
    }

    /// `acquire(resource)` (spec §4.2). Preconditions: not terminating, and
    /// not already holding a transferable resource. `attached` tells the
    /// caller (the Junction) whether to qualify on `delta` (attached case)
    /// or directly on `state` (the pre-attachment case, where there is no
    /// cycle yet to drain a delta).
    pub(crate) fn acquire(&mut self, resource: Resource, attached: bool) -> Result<(), AcquireError> {
        if self.state.contains(Flags::TERMINATING) || self.delta.contains(Flags::TEQ_TERMINATE) {
            return Err(AcquireError::Terminating);
        }
        if self.state.contains(Flags::ITEQ_TRANSFER) {
            return Err(AcquireError::AlreadyHoldingResource);
        }

        self.resource = Some(resource);
        self.start = 0;
        self.stop = 0;

        if attached {
            self.delta.insert(Flags::TEQ_TRANSFER);
        } else {
            self.state.insert(Flags::ITEQ_TRANSFER);
        }

        Ok(())
    }

    /// `terminate()` (spec §4.2). Returns `true` if the Channel was
    /// unattached and the caller must perform the immediate release itself
    /// (resource/link drop, Port unlatch) — the Channel has no Junction to
    /// drive a cycle for it.
    pub(crate) fn terminate(&mut self, attached: bool) -> bool {
        if self.state.contains(Flags::TERMINATING) {
            return false;
        }

        if attached {
            self.delta.insert(Flags::TEQ_TERMINATE);
            false
        } else {
            self.state.insert(Flags::TERMINATING);
            self.resource = None;
            self.link = None;
            true
        }
    }

    /// `force()` (spec §4.2): request a zero-readiness transfer attempt
    /// next cycle.
    pub(crate) fn force(&mut self) {
        self.delta.insert(Flags::CTL_FORCE);
    }

    /// The slice of the resource corresponding to this cycle's transfer, or
    /// `None` if no transfer event was recorded. Only meaningful for
    /// byte-addressable freights (Octets); callers for Sockets/Ports/
    /// Datagrams use `Resource::accepted_sockets`/`datagrams` directly.
    pub fn transfer(&self) -> Option<&[u8]> {
        if !self.events.contains(Flags::TEV_TRANSFER) {
            return None;
        }
        self.resource.as_ref()?.transferred_octets(self.start, self.stop)
    }

    #[inline]
    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    #[inline]
    pub fn resource_mut(&mut self) -> Option<&mut Resource> {
        self.resource.as_mut()
    }

    #[inline]
    pub fn events(&self) -> Flags {
        self.events
    }

    #[inline]
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    #[inline]
    pub fn window(&self) -> (usize, usize) {
        (self.start, self.stop)
    }

    /// `endpoint()` (spec §4.2): peer address for an output Channel, local
    /// (bound) address for an input Channel. Falls back to peer credentials
    /// when the Port isn't an IP socket — the only case that's true for an
    /// anonymous UNIX-domain socket (e.g. one half of a `spawn`ed
    /// socketpair).
    pub fn endpoint(&self) -> io::Result<Endpoint> {
        let addr = match self.polarity {
            Polarity::Output => self.port.peer_addr(),
            Polarity::Input => self.port.local_addr(),
        };

        match addr {
            Ok(addr) => Ok(if addr.is_ipv4() { Endpoint::ip4(addr) } else { Endpoint::ip6(addr) }),
            Err(_) => {
                let (uid, gid) = self.port.peer_credentials()?;
                Ok(Endpoint::Credentials { uid, gid })
            }
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AcquireError {
    Terminating,
    AlreadyHoldingResource,
}

impl std::fmt::Display for AcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AcquireError::Terminating => write!(f, "channel is terminating"),
            AcquireError::AlreadyHoldingResource => {
                write!(f, "channel already holds an unexhausted resource")
            }
        }
    }
}

impl std::error::Error for AcquireError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Port;
    use std::thread;
    use std::time::Duration;

    fn octets_channel() -> Channel {
        let (read_end, _write_end) = Port::pipe().unwrap();
        Channel::new(read_end, Polarity::Input, FreightTag::Octets)
    }

    #[test]
    fn test_acquire_unattached_qualifies_state_directly() {
        let mut channel = octets_channel();
        channel.acquire(Resource::Octets(vec![0u8; 16]), false).unwrap();

        assert!(channel.state.contains(Flags::ITEQ_TRANSFER));
        assert!(channel.delta.is_empty());
    }

    #[test]
    fn test_acquire_attached_qualifies_delta() {
        let mut channel = octets_channel();
        channel.acquire(Resource::Octets(vec![0u8; 16]), true).unwrap();

        assert!(channel.delta.contains(Flags::TEQ_TRANSFER));
        assert!(!channel.state.contains(Flags::ITEQ_TRANSFER));
    }

    #[test]
    fn test_acquire_rejects_while_holding_resource() {
        let mut channel = octets_channel();
        channel.acquire(Resource::Octets(vec![0u8; 16]), false).unwrap();

        let err = channel.acquire(Resource::Octets(vec![0u8; 8]), false).unwrap_err();
        assert_eq!(err, AcquireError::AlreadyHoldingResource);
    }

    #[test]
    fn test_acquire_rejects_while_terminating() {
        let mut channel = octets_channel();
        channel.terminate(false);

        let err = channel.acquire(Resource::Octets(vec![0u8; 8]), false).unwrap_err();
        assert_eq!(err, AcquireError::Terminating);
    }

    #[test]
    fn test_terminate_unattached_releases_immediately() {
        let mut channel = octets_channel();
        channel.acquire(Resource::Octets(vec![0u8; 8]), false).unwrap();

        let released = channel.terminate(false);

        assert!(released);
        assert!(channel.resource.is_none());
        assert!(channel.state.contains(Flags::TERMINATING));
    }

    #[test]
    fn test_terminate_attached_enqueues_delta() {
        let mut channel = octets_channel();
        let released = channel.terminate(true);

        assert!(!released);
        assert!(channel.delta.contains(Flags::TEQ_TERMINATE));
        assert!(!channel.state.contains(Flags::TERMINATING));
    }

    #[test]
    fn test_terminate_twice_is_noop_second_time() {
        let mut channel = octets_channel();
        channel.terminate(false);
        assert!(!channel.terminate(true));
    }

    #[test]
    fn test_transfer_returns_none_without_event() {
        let mut channel = octets_channel();
        channel.acquire(Resource::Octets(vec![1, 2, 3, 4]), false).unwrap();
        assert!(channel.transfer().is_none());
    }

    #[test]
    fn test_transfer_returns_window_slice_when_event_set() {
        let mut channel = octets_channel();
        channel.acquire(Resource::Octets(vec![1, 2, 3, 4]), false).unwrap();
        channel.start = 0;
        channel.stop = 3;
        channel.events.insert(Flags::TEV_TRANSFER);

        assert_eq!(channel.transfer(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_force_sets_ctl_force_delta() {
        let mut channel = octets_channel();
        channel.force();
        assert!(channel.delta.contains(Flags::CTL_FORCE));
    }

    /// spec §8 round-trip property: `endpoint()` on a connected TCP Channel
    /// yields an Endpoint whose string form re-parses byte-identical.
    #[test]
    fn test_endpoint_round_trips_through_display_for_connected_tcp() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let bound = listener.local_addr().unwrap();
        let accept_thread = thread::spawn(move || listener.accept().unwrap());

        let port = Port::connect(bound).unwrap();
        let channel = Channel::new(port, Polarity::Output, FreightTag::Octets);

        // Connect is non-blocking; give the loopback handshake a chance to
        // finish before asking for the peer address.
        let mut endpoint = None;
        for _ in 0..200 {
            if let Ok(e) = channel.endpoint() {
                endpoint = Some(e);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let endpoint = endpoint.expect("connect did not complete in time");

        let reparsed: Endpoint = endpoint.to_string().parse().unwrap();
        assert_eq!(endpoint, reparsed);

        accept_thread.join().unwrap();
    }

    /// Anonymous UNIX-domain sockets (e.g. one half of a socketpair) have no
    /// address to report, so `endpoint()` falls back to peer credentials.
    #[test]
    fn test_endpoint_reports_credentials_for_anonymous_unix_socket() {
        let (a, _b) = Port::socketpair().unwrap();
        let channel = Channel::new(a, Polarity::Output, FreightTag::Octets);

        let endpoint = channel.endpoint().unwrap();
        let expected_uid = unsafe { libc::getuid() };
        let expected_gid = unsafe { libc::getgid() };

        assert_eq!(endpoint, Endpoint::Credentials { uid: expected_uid, gid: expected_gid });
    }
}
