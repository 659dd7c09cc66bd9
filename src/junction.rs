//! The cycle engine. Owns the Channel arena, ring membership, the transfer
//! list, and the notification shim behind one `Mutex`, and drives the eight
//! `enter()` phases and the `exit()` flush described in spec §4.4.
//!
//! Grounded on `neutronium::net::endpoint::Endpoint::sync` for the
//! accept/handshake/live three-poll loop and its `live`/`free`
//! `ChannelId` bookkeeping; the delta queue and ring-splice machinery have
//! no teacher analogue (`Endpoint` drives three separate `mio::Poll`s
//! rather than one unified ring) and are built to spec §3/§4.4 directly.

use crate::alloc::{rallocate, AllocError, AllocKey, Allocation, Params};
use crate::channel::{AcquireError, Channel, ChannelId, Flags, Polarity};
use crate::config::JunctionConfig;
use crate::error::IoOutcome;
use crate::freight::Resource;
use crate::logging::{self, child, Logger};
use crate::notify::{Interest, NotificationShim, RawEvent, Shim, WakeToken, WAKE_KEY};
use indexmap::IndexSet;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::time::Duration;

/// Errors raised by a Junction's own entry points — spec §7's "programmer
/// error" class, which fail fast without mutating engine state.
#[derive(Debug)]
pub enum JunctionError {
    /// `enter()` called while a cycle is already open.
    CycleAlreadyOpen,
    /// `exit()` called with no matching `enter()`.
    NoCycleOpen,
    /// `resize_exoresource()` called while a cycle is open.
    ResizeDuringCycle,
    /// `acquire`/`terminate_channel`/`force_channel` addressed a `ChannelId`
    /// that is not currently attached to this Junction.
    UnknownChannel,
    Alloc(AllocError),
    Acquire(AcquireError),
    Io(io::Error),
}

impl fmt::Display for JunctionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JunctionError::CycleAlreadyOpen => write!(f, "a cycle is already open"),
            JunctionError::NoCycleOpen => write!(f, "no cycle is open"),
            JunctionError::ResizeDuringCycle => write!(f, "cannot resize while a cycle is open"),
            JunctionError::UnknownChannel => write!(f, "channel is not attached to this junction"),
            JunctionError::Alloc(err) => write!(f, "{}", err),
            JunctionError::Acquire(err) => write!(f, "{}", err),
            JunctionError::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for JunctionError {}

impl From<AllocError> for JunctionError {
    fn from(err: AllocError) -> JunctionError {
        JunctionError::Alloc(err)
    }
}

impl From<AcquireError> for JunctionError {
    fn from(err: AcquireError) -> JunctionError {
        JunctionError::Acquire(err)
    }
}

impl From<io::Error> for JunctionError {
    fn from(err: io::Error) -> JunctionError {
        JunctionError::Io(err)
    }
}

/// What a `rallocate` call attached to the Junction, mirroring
/// `alloc::Allocation` but carrying `ChannelId`s instead of owned
/// `Channel`s.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Attached {
    Single(ChannelId),
    Pair(ChannelId, ChannelId),
    PairWithPeer(ChannelId, ChannelId, RawFd),
}

struct Inner {
    /// The Channel arena. A `None` slot is free and its index lives in
    /// `free`.
    channels: Vec<Option<Channel>>,
    free: Vec<ChannelId>,
    /// Ring membership: every Channel currently attached to this Junction.
    /// Plays the role `neutronium::net::endpoint::Endpoint.live` plays for
    /// its own connection set.
    live: IndexSet<ChannelId>,
    /// This cycle's transfer list, in the order Channels were spliced on.
    transfer: Vec<ChannelId>,
    cycle_open: bool,
    will_wait: bool,
    terminating: bool,
    shim: Option<Shim>,
}

impl Inner {
    fn insert_channel(&mut self, channel: Channel) -> ChannelId {
        if let Some(id) = self.free.pop() {
            self.channels[id.0] = Some(channel);
            id
        } else {
            let id = ChannelId(self.channels.len());
            self.channels.push(Some(channel));
            id
        }
    }

    fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id.0).and_then(|slot| slot.as_mut())
    }
}

fn attach_locked(guard: &mut Inner, mut channel: Channel) -> ChannelId {
    channel.delta.insert(Flags::CTL_CONNECT);
    let id = guard.insert_channel(channel);
    guard.live.insert(id);
    id
}

/// The cycle engine. A single `Junction` is meant to be driven by one
/// owning thread (spec's "a Junction is single-owner" Non-goal); the only
/// cross-thread entry point is `force()`, which is why its wakeup handle
/// lives outside `inner`'s lock.
pub struct Junction {
    inner: Mutex<Inner>,
    /// Kept outside `inner` so `force()` can wake a blocked `wait()` even
    /// while the shim itself is checked out of `inner` for phases 4-6 (see
    /// `notify::WakeToken`).
    wake_token: Mutex<Option<WakeToken>>,
    config: JunctionConfig,
    log: Logger,
}

impl Junction {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        config: JunctionConfig,
        log: L,
    ) -> Result<Junction, JunctionError> {
        let shim = Shim::create(config.scratch_capacity)?;
        let wake_token = shim.wake_token();

        Ok(Junction {
            inner: Mutex::new(Inner {
                channels: Vec::new(),
                free: Vec::new(),
                live: IndexSet::new(),
                transfer: Vec::new(),
                cycle_open: false,
                will_wait: false,
                terminating: false,
                shim: Some(shim),
            }),
            wake_token: Mutex::new(Some(wake_token)),
            config,
            log: child(log, "junction"),
        })
    }

    /// Attaches a pre-built, unattached `Channel` to the ring.
    pub fn attach(&self, channel: Channel) -> ChannelId {
        let mut guard = self.inner.lock().unwrap();
        attach_locked(&mut guard, channel)
    }

    /// Allocates a Channel (or pair) via `alloc::rallocate` and attaches
    /// whatever it produced.
    pub fn rallocate(&self, key: AllocKey, params: Params) -> Result<Attached, JunctionError> {
        let allocation = rallocate(key, params)?;
        let mut guard = self.inner.lock().unwrap();
        Ok(match allocation {
            Allocation::Single(channel) => Attached::Single(attach_locked(&mut guard, channel)),
            Allocation::Pair(a, b) => {
                Attached::Pair(attach_locked(&mut guard, a), attach_locked(&mut guard, b))
            }
            Allocation::PairWithPeer(a, b, peer_fd) => Attached::PairWithPeer(
                attach_locked(&mut guard, a),
                attach_locked(&mut guard, b),
                peer_fd,
            ),
        })
    }

    /// `acquire(id, resource)` (spec §4.2), addressed through the Junction
    /// rather than directly on a `Channel` the caller doesn't own.
    pub fn acquire(&self, id: ChannelId, resource: Resource) -> Result<(), JunctionError> {
        let mut guard = self.inner.lock().unwrap();
        let channel = guard.get_mut(id).ok_or(JunctionError::UnknownChannel)?;
        channel.acquire(resource, true)?;
        Ok(())
    }

    /// `terminate(id)`: requests termination of one Channel. The cascade
    /// actually runs on the next `enter()`'s delta drain.
    pub fn terminate_channel(&self, id: ChannelId) -> Result<(), JunctionError> {
        let mut guard = self.inner.lock().unwrap();
        let channel = guard.get_mut(id).ok_or(JunctionError::UnknownChannel)?;
        channel.terminate(true);
        Ok(())
    }

    /// `force(id)`: request a zero-readiness transfer attempt next cycle
    /// for one Channel (distinct from `Junction::force()`, which wakes a
    /// blocked `wait()`).
    pub fn force_channel(&self, id: ChannelId) -> Result<(), JunctionError> {
        let mut guard = self.inner.lock().unwrap();
        let channel = guard.get_mut(id).ok_or(JunctionError::UnknownChannel)?;
        channel.force();
        Ok(())
    }

    /// Marks the whole Junction terminating; every live Channel is cascaded
    /// to termination over the following cycles (spec §4.2/§4.4 phase 1).
    pub fn terminate(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.terminating = true;
        logging::debug!(self.log, "junction terminating"; "context" => "terminate", "live" => guard.live.len());
    }

    /// True once termination has been requested, every Channel has been
    /// released, and no cycle is currently open. The Junction itself has
    /// no Port to carry a synthetic `tev_terminate` on, so this is its
    /// equivalent of "the sentinel's own termination event" (spec §4.4).
    pub fn is_terminated(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        guard.terminating && guard.live.is_empty() && !guard.cycle_open
    }

    /// Interrupts a blocked `wait()`, if one is outstanding. A no-op if the
    /// previous cycle did not set `will_wait` (spec §5).
    pub fn force(&self) -> io::Result<()> {
        let will_wait = self.inner.lock().unwrap().will_wait;
        if !will_wait {
            return Ok(());
        }
        if let Some(token) = *self.wake_token.lock().unwrap() {
            token.wake()?;
        }
        Ok(())
    }

    /// Clears the ring without emitting events or performing graceful
    /// shutdowns — for a freshly forked child disclaiming the parent's
    /// kernel resources. Uses `Port::shatter` rather than the normal
    /// unlatch path, since `shutdown()` would affect the shared underlying
    /// socket across the fork, unlike a plain `close()`.
    pub fn void(&self) {
        let mut guard = self.inner.lock().unwrap();
        for slot in guard.channels.iter_mut() {
            if let Some(channel) = slot.as_mut() {
                channel.port.shatter();
            }
        }
        guard.channels.clear();
        guard.free.clear();
        guard.live.clear();
        guard.transfer.clear();
        guard.shim = None;
        guard.terminating = false;
        guard.cycle_open = false;
        *self.wake_token.lock().unwrap() = None;
    }

    /// Rebuilds the notification shim with a new scratch capacity. Errors
    /// if a cycle is currently open (spec §9).
    pub fn resize_exoresource(&self, scratch_capacity: usize) -> Result<(), JunctionError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.cycle_open {
            return Err(JunctionError::ResizeDuringCycle);
        }

        let shim = Shim::create(scratch_capacity)?;
        *self.wake_token.lock().unwrap() = Some(shim.wake_token());
        guard.shim = Some(shim);

        let live: Vec<ChannelId> = guard.live.iter().copied().collect();
        for id in live {
            if let Some(channel) = guard.get_mut(id) {
                channel.delta.insert(Flags::CTL_CONNECT);
            }
        }
        Ok(())
    }

    /// Visits every Channel on the current transfer list that recorded an
    /// event this cycle. Locks `inner` for the duration of the visit — a
    /// visitor closure rather than a borrowed iterator, since a `&Channel`
    /// can't outlive the `MutexGuard` it's projected from.
    pub fn transfer<F: FnMut(ChannelId, &Channel)>(&self, mut visit: F) {
        let guard = self.inner.lock().unwrap();
        for &id in &guard.transfer {
            if let Some(channel) = guard.channels[id.0].as_ref() {
                if channel.has_events() {
                    visit(id, channel);
                }
            }
        }
    }

    /// Begins one cycle: phases 1-3 (start, delta drain, wait-flag
    /// decision) under the lock, then phases 4-5 (subscribe, collect) with
    /// the lock released, then phases 6-7 (transform, I/O attempt) with
    /// the lock reacquired. Returns once phase 7 completes; the caller
    /// inspects results via `transfer()` before calling `exit()`.
    pub fn enter(&self) -> Result<(), JunctionError> {
        let mut guard = self.inner.lock().unwrap();
        if guard.cycle_open {
            return Err(JunctionError::CycleAlreadyOpen);
        }
        guard.cycle_open = true;

        // Phase 1: start cycle.
        if guard.shim.is_none() {
            let shim = Shim::create(self.config.scratch_capacity)?;
            *self.wake_token.lock().unwrap() = Some(shim.wake_token());
            guard.shim = Some(shim);

            let live: Vec<ChannelId> = guard.live.iter().copied().collect();
            for id in live {
                if let Some(channel) = guard.get_mut(id) {
                    channel.delta.insert(Flags::CTL_CONNECT);
                }
            }
        }
        if guard.terminating {
            let live: Vec<ChannelId> = guard.live.iter().copied().collect();
            for id in live {
                if let Some(channel) = guard.get_mut(id) {
                    if !channel.state.contains(Flags::TERMINATING) {
                        channel.delta.insert(Flags::TEQ_TERMINATE);
                    }
                }
            }
        }

        // Phase 2: delta drain. Walks every live Channel rather than a
        // separate dirty list — simpler than a backward-ring-walk
        // optimization and equivalent in effect, since every delta bit set
        // this cycle belongs to a live Channel.
        let live: Vec<ChannelId> = guard.live.iter().copied().collect();
        for id in &live {
            let needs_list = {
                let channel = match guard.get_mut(*id) {
                    Some(channel) => channel,
                    None => continue,
                };
                if channel.delta.is_empty() {
                    continue;
                }
                let delta = channel.delta;
                channel.delta = Flags::empty();

                if delta.contains(Flags::CTL_CONNECT) {
                    channel.state.insert(Flags::CTL_CONNECT);
                }
                if delta.contains(Flags::CTL_FORCE) {
                    channel.state.insert(Flags::CTL_FORCE);
                }
                if delta.contains(Flags::TEQ_TRANSFER) {
                    channel.state.insert(Flags::ITEQ_TRANSFER);
                }
                if delta.contains(Flags::TEQ_TERMINATE) {
                    channel.state.insert(Flags::ITEQ_TERMINATE | Flags::TERMINATING);
                }

                if !channel.is_on_transfer_list() {
                    channel.lltransfer = *id;
                    true
                } else {
                    false
                }
            };
            if needs_list {
                guard.transfer.push(*id);
            }
        }

        // Phase 3: wait-flag decision.
        guard.will_wait = guard.transfer.is_empty();
        let will_wait = guard.will_wait;

        // Phase 4: apply delta / subscribe. Collected while still locked
        // (cheap local bitmap edits), then the actual kernel calls run with
        // the lock released.
        let transfer_ids_phase4: Vec<ChannelId> = guard.transfer.clone();
        let mut subscriptions: Vec<(RawFd, usize, Interest)> = Vec::new();
        for id in transfer_ids_phase4 {
            let channel = match guard.get_mut(id) {
                Some(channel) => channel,
                None => continue,
            };

            if channel.state.contains(Flags::CTL_CONNECT) {
                channel.state.remove(Flags::CTL_CONNECT);
                if !channel.state.contains(Flags::TERMINATING) {
                    let interest = match channel.polarity {
                        Polarity::Input => Interest::READ,
                        Polarity::Output => Interest::WRITE,
                    };
                    subscriptions.push((channel.port.fd(), id.0, interest));
                }
            }
            if channel.state.contains(Flags::CTL_FORCE) {
                channel.state.remove(Flags::CTL_FORCE);
                channel.state.insert(Flags::XTEQ_TRANSFER);
            }
        }

        let mut shim = guard.shim.take().expect("shim must exist after phase 1");
        drop(guard);

        let mut subscribe_failures: Vec<ChannelId> = Vec::new();
        for (fd, key, interest) in subscriptions {
            if let Err(_err) = shim.subscribe(fd, key, interest) {
                subscribe_failures.push(ChannelId(key));
            }
        }

        // Phase 5: collect.
        let timeout = if will_wait { Some(self.config.wait_timeout()) } else { Some(Duration::from_secs(0)) };
        let mut events: Vec<RawEvent> = Vec::new();
        for attempt in 0..self.config.collect_retries.max(1) {
            let this_timeout = if attempt == 0 { timeout } else { Some(Duration::from_secs(0)) };
            let (batch, filled) = shim.wait(this_timeout)?;
            events.extend_from_slice(batch);
            if !Shim::RETRY_UNCONDITIONAL && !filled {
                break;
            }
        }

        // Phase 6: transform. Reacquire the lock and put the shim back.
        let mut guard = self.inner.lock().unwrap();
        guard.shim = Some(shim);

        for id in subscribe_failures {
            let needs_list = {
                let channel = match guard.get_mut(id) {
                    Some(channel) => channel,
                    None => continue,
                };
                channel.state.insert(Flags::XTEQ_TERMINATE | Flags::TERMINATING);
                if !channel.is_on_transfer_list() {
                    channel.lltransfer = id;
                    true
                } else {
                    false
                }
            };
            if needs_list {
                guard.transfer.push(id);
            }
        }

        for ev in events {
            if ev.key == WAKE_KEY {
                continue;
            }
            let id = ChannelId(ev.key);
            let needs_list = {
                let channel = match guard.get_mut(id) {
                    Some(channel) => channel,
                    None => continue,
                };
                if ev.readable || ev.writable {
                    channel.state.insert(Flags::XTEQ_TRANSFER);
                }
                if ev.terminate {
                    channel.state.insert(Flags::XTEQ_TERMINATE);
                }
                if !channel.is_on_transfer_list() {
                    channel.lltransfer = id;
                    true
                } else {
                    false
                }
            };
            if needs_list {
                guard.transfer.push(id);
            }
        }

        // Phase 7: I/O attempt.
        let transfer_ids = guard.transfer.clone();
        let mut to_unsubscribe: Vec<RawFd> = Vec::new();

        for id in &transfer_ids {
            let channel = match guard.get_mut(*id) {
                Some(channel) => channel,
                None => continue,
            };

            let should_terminate = channel.state.contains(Flags::XTEQ_TERMINATE)
                || channel.state.contains(Flags::ITEQ_TERMINATE)
                || channel.state.contains(Flags::TERMINATING);
            if should_terminate {
                to_unsubscribe.push(channel.port.fd());
                channel.events.insert(Flags::TEV_TERMINATE);
                channel.state.insert(Flags::TERMINATING);
                continue;
            }

            if !(channel.state.contains(Flags::XTEQ_TRANSFER) && channel.state.contains(Flags::ITEQ_TRANSFER)) {
                continue;
            }

            let polarity = channel.polarity;
            let stop = channel.stop;
            channel.start = stop;

            let outcome = if let Some(resource) = channel.resource.as_mut() {
                match polarity {
                    Polarity::Input => resource.input(&mut channel.port, stop),
                    Polarity::Output => resource.output(&mut channel.port, stop),
                }
            } else {
                continue;
            };

            channel.events.insert(Flags::TEV_TRANSFER);
            match outcome {
                IoOutcome::Flow(n) => {
                    channel.stop += n;
                    channel.state.remove(Flags::ITEQ_TRANSFER);
                }
                IoOutcome::Stop(n) => {
                    channel.stop += n;
                    channel.state.remove(Flags::XTEQ_TRANSFER);
                }
                IoOutcome::Terminate(_) => {
                    channel.state.insert(Flags::XTEQ_TERMINATE | Flags::TERMINATING);
                    channel.events.insert(Flags::TEV_TERMINATE);
                    to_unsubscribe.push(channel.port.fd());
                }
            }
        }

        if let Some(shim) = guard.shim.as_mut() {
            for fd in to_unsubscribe {
                let _ = shim.unsubscribe(fd);
            }
        }

        logging::trace!(self.log, "cycle entered"; "context" => "enter", "transfer_list_len" => transfer_ids.len(), "will_wait" => will_wait);

        Ok(())
    }

    /// Flushes the current cycle: collapses each transferred Channel's
    /// window, releases fully-terminated Channels back to the free list,
    /// and clears per-cycle bookkeeping (spec §4.4's "exit" flush).
    pub fn exit(&self) -> Result<(), JunctionError> {
        let mut guard = self.inner.lock().unwrap();
        if !guard.cycle_open {
            return Err(JunctionError::NoCycleOpen);
        }

        let ids: Vec<ChannelId> = guard.transfer.drain(..).collect();
        for id in ids {
            let terminated = {
                let channel = match guard.get_mut(id) {
                    Some(channel) => channel,
                    None => continue,
                };
                channel.lltransfer = ChannelId::NONE;

                let terminated = channel.events.contains(Flags::TEV_TERMINATE);
                if terminated {
                    channel.resource = None;
                    channel.link = None;
                    let direction = channel.polarity.direction_bit();
                    channel.port.unlatch(direction);
                    channel.events = Flags::empty();
                } else {
                    // Collapse the window: this cycle's [start, stop) has
                    // been exposed to the caller, so the next cycle starts
                    // a fresh window anchored at the current `stop` rather
                    // than re-reporting the whole historical buffer. A
                    // Channel that was exhausted (iteq_transfer cleared)
                    // and not re-acquired during the exposed window
                    // releases its resource; `delta` still carrying
                    // `TEQ_TRANSFER` means a fresh `acquire()` raced in
                    // this cycle and hasn't been drained yet, so the
                    // resource must be kept.
                    if !channel.state.contains(Flags::ITEQ_TRANSFER)
                        && !channel.delta.contains(Flags::TEQ_TRANSFER)
                    {
                        channel.resource = None;
                    }
                    channel.start = channel.stop;
                    channel.events = Flags::empty();
                }
                terminated
            };

            if terminated {
                guard.live.shift_remove(&id);
                guard.channels[id.0] = None;
                guard.free.push(id);
                logging::debug!(self.log, "channel terminated"; "context" => "exit", "channel_id" => id.0);
            }
        }

        guard.cycle_open = false;
        Ok(())
    }

    /// Convenience loop (SPEC_FULL.md §D): repeatedly runs `enter()` /
    /// `until` / `exit()` until `until` reports done or `max_iterations`
    /// cycles have run. `until` is invoked with the Junction between
    /// `enter()` and `exit()`, so it can call `transfer()` to inspect this
    /// cycle's events. Returns the number of cycles actually run.
    pub fn cycles<F>(&self, max_iterations: usize, mut until: F) -> Result<usize, JunctionError>
    where
        F: FnMut(&Junction) -> bool,
    {
        for i in 0..max_iterations {
            self.enter()?;
            let done = until(self);
            self.exit()?;
            if done {
                return Ok(i + 1);
            }
        }
        Ok(max_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::datagram_array::DatagramArray;
    use crate::endpoint::Endpoint;
    use crate::freight::FreightTag;
    use crate::port::Port;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration as StdDuration;

    fn test_junction() -> Junction {
        Junction::new(JunctionConfig::default(), None).unwrap()
    }

    /// Scenario 1: echo over a socketpair — acquire a buffer on one side,
    /// drive cycles until it arrives on the other.
    #[test]
    fn test_echo_over_socketpair() {
        let junction = test_junction();
        let (a, b) = Port::socketpair().unwrap();
        let writer_id = junction.attach(Channel::new(a, Polarity::Output, FreightTag::Octets));
        let reader_id = junction.attach(Channel::new(b, Polarity::Input, FreightTag::Octets));

        junction.acquire(writer_id, Resource::Octets(b"hello junction".to_vec())).unwrap();
        junction.acquire(reader_id, Resource::Octets(vec![0u8; 32])).unwrap();

        let mut received: Option<Vec<u8>> = None;
        junction
            .cycles(50, |j| {
                j.transfer(|id, channel| {
                    if id == reader_id {
                        if let Some(slice) = channel.transfer() {
                            if !slice.is_empty() {
                                received = Some(slice.to_vec());
                            }
                        }
                    }
                });
                received.is_some()
            })
            .unwrap();

        assert_eq!(received.as_deref(), Some(&b"hello junction"[..]));
    }

    /// Scenario 2: a listener accepts one connection.
    #[test]
    fn test_listener_accept() {
        let junction = test_junction();
        let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listen_port = Port::listen(addr).unwrap();
        let bound = listen_port.local_addr().unwrap();
        let listener_id = junction.attach(Channel::new(listen_port, Polarity::Input, FreightTag::Sockets));
        junction.acquire(listener_id, Resource::Sockets(vec![0 as RawFd; 4])).unwrap();

        let client = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(20));
            std::net::TcpStream::connect(bound).unwrap()
        });

        let mut accepted = false;
        junction
            .cycles(50, |j| {
                j.transfer(|id, channel| {
                    if id == listener_id && channel.has_events() {
                        accepted = true;
                    }
                });
                accepted
            })
            .unwrap();

        let _client = client.join().unwrap();
        assert!(accepted);
    }

    /// Scenario 3: the reader observes EOF as a terminate event when the
    /// write end closes.
    #[test]
    fn test_eof_observation() {
        let junction = test_junction();
        let (read_end, write_end) = Port::pipe().unwrap();
        let reader_id = junction.attach(Channel::new(read_end, Polarity::Input, FreightTag::Octets));
        junction.acquire(reader_id, Resource::Octets(vec![0u8; 16])).unwrap();

        drop(write_end);

        let mut terminated = false;
        junction
            .cycles(50, |j| {
                j.transfer(|id, channel| {
                    if id == reader_id && channel.events().contains(Flags::TEV_TERMINATE) {
                        terminated = true;
                    }
                });
                terminated
            })
            .unwrap();

        assert!(terminated);
    }

    /// Scenario 4: `force()` wakes a thread blocked in `enter()`'s phase 5.
    #[test]
    fn test_force_wakes_blocked_wait() {
        let mut config = JunctionConfig::default();
        config.wait_timeout_secs = 30;
        let junction = Arc::new(Junction::new(config, None).unwrap());

        // No Channels attached: phase 3 sets will_wait, so enter() blocks
        // for up to 30s unless forced.
        let waiter = Arc::clone(&junction);
        let handle = thread::spawn(move || {
            waiter.enter().unwrap();
            waiter.exit().unwrap();
        });

        thread::sleep(StdDuration::from_millis(50));
        junction.force().unwrap();

        handle.join().unwrap();
    }

    /// Scenario 5: terminating the Junction cascades a terminate event to
    /// every attached Channel and releases their descriptors.
    #[test]
    fn test_termination_cascade() {
        let junction = test_junction();
        let mut ids = Vec::new();
        for _ in 0..100 {
            let (read_end, write_end) = Port::pipe().unwrap();
            let id = junction.attach(Channel::new(read_end, Polarity::Input, FreightTag::Octets));
            junction.acquire(id, Resource::Octets(vec![0u8; 8])).unwrap();
            ids.push(id);
            // Leak the write end so nobody emits EOF — this is purely a
            // termination-cascade path, not an EOF path.
            std::mem::forget(write_end);
        }

        junction.terminate();

        let mut terminated_count = 0usize;
        junction
            .cycles(200, |j| {
                j.transfer(|_, channel| {
                    if channel.events().contains(Flags::TEV_TERMINATE) {
                        terminated_count += 1;
                    }
                });
                j.is_terminated()
            })
            .unwrap();

        assert_eq!(terminated_count, 100);
        assert!(junction.is_terminated());
    }

    /// Scenario 6: a datagram round-trips through two bound UDP Channels.
    #[test]
    fn test_datagram_roundtrip() {
        let junction = test_junction();
        let addr_a: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
        let addr_b: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
        let port_a = Port::bind(addr_a).unwrap();
        let port_b = Port::bind(addr_b).unwrap();
        let bound_b = port_b.local_addr().unwrap();

        let sender_id = junction.attach(Channel::new(port_a, Polarity::Output, FreightTag::Datagrams));
        let receiver_id = junction.attach(Channel::new(port_b, Polarity::Input, FreightTag::Datagrams));

        let mut outgoing = DatagramArray::new(1, 64);
        outgoing.set_outgoing(0, Endpoint::ip4(bound_b), b"ping");
        junction.acquire(sender_id, Resource::Datagrams(outgoing)).unwrap();
        junction.acquire(receiver_id, Resource::Datagrams(DatagramArray::new(1, 64))).unwrap();

        let mut received: Option<Vec<u8>> = None;
        junction
            .cycles(50, |j| {
                j.transfer(|id, channel| {
                    if id == receiver_id {
                        if let Some(array) = channel.resource().and_then(Resource::datagrams) {
                            if array.len() > 0 && !array.payload(0).is_empty() {
                                received = Some(array.payload(0).to_vec());
                            }
                        }
                    }
                });
                received.is_some()
            })
            .unwrap();

        assert_eq!(received.as_deref(), Some(&b"ping"[..]));
    }

    #[test]
    fn test_enter_rejects_reentrant_cycle() {
        let junction = test_junction();
        junction.enter().unwrap();
        assert!(matches!(junction.enter(), Err(JunctionError::CycleAlreadyOpen)));
        junction.exit().unwrap();
    }

    #[test]
    fn test_exit_without_enter_errors() {
        let junction = test_junction();
        assert!(matches!(junction.exit(), Err(JunctionError::NoCycleOpen)));
    }

    #[test]
    fn test_resize_exoresource_rejects_during_cycle() {
        let junction = test_junction();
        junction.enter().unwrap();
        assert!(matches!(
            junction.resize_exoresource(256),
            Err(JunctionError::ResizeDuringCycle)
        ));
        junction.exit().unwrap();
        assert!(junction.resize_exoresource(256).is_ok());
    }
}
