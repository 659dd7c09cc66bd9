#[macro_use]
extern crate criterion;

extern crate junction;
extern crate rand;

use criterion::Criterion;
use junction::alloc::{key_from_tuple, Params};
use junction::config::JunctionConfig;
use junction::junction::{Attached, Junction};
use junction::Resource;
use rand::Rng;
use std::io::{Read, Write};
use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixStream;

const PAYLOAD: usize = 4096;

fn random_payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen::<u8>()).collect()
}

/// Steady-state throughput of one Octets channel echoing a fixed payload
/// over a spawned socketpair, repeated across many cycles — the thing
/// phase 7's `Resource::Octets` dispatch exists to do.
fn octets_roundtrip(c: &mut Criterion) {
    c.bench_function("octets roundtrip, 4KiB over socketpair", move |b| {
        b.iter_with_setup(
            || {
                let junction = Junction::new(JunctionConfig::default(), None).unwrap();
                let key = key_from_tuple(&["octets", "spawn", "bidirectional"]).unwrap();
                let (input, output, peer_fd) = match junction.rallocate(key, Params::None).unwrap() {
                    Attached::PairWithPeer(input, output, peer_fd) => (input, output, peer_fd),
                    _ => unreachable!(),
                };
                junction.acquire(output, Resource::Octets(random_payload(PAYLOAD))).unwrap();
                junction.acquire(input, Resource::Octets(vec![0u8; PAYLOAD])).unwrap();
                let mut peer = unsafe { UnixStream::from_raw_fd(peer_fd) };
                let mut sink = vec![0u8; PAYLOAD];
                let outgoing = random_payload(PAYLOAD);
                (junction, peer, sink, outgoing)
            },
            |(junction, mut peer, mut sink, outgoing)| {
                junction.enter().unwrap();
                junction.exit().unwrap();
                let _ = peer.read(&mut sink);
                let _ = peer.write_all(&outgoing);
            },
        )
    });
}

/// The per-cycle cost of draining many simultaneously readable channels
/// through phase 5's collect loop and phase 7's dispatch, without any one
/// channel dominating the scratch buffer.
fn many_small_datagrams(c: &mut Criterion) {
    c.bench_function("datagram drain, 50 channels x 64B", move |b| {
        b.iter_with_setup(
            || {
                let junction = Junction::new(JunctionConfig::default(), None).unwrap();
                let mut peers = Vec::new();
                for _ in 0..50 {
                    let key = key_from_tuple(&["octets", "spawn", "bidirectional"]).unwrap();
                    if let Attached::PairWithPeer(input, output, peer_fd) =
                        junction.rallocate(key, Params::None).unwrap()
                    {
                        junction.acquire(output, Resource::Octets(random_payload(64))).unwrap();
                        junction.acquire(input, Resource::Octets(vec![0u8; 64])).unwrap();
                        peers.push(unsafe { UnixStream::from_raw_fd(peer_fd) });
                    }
                }
                (junction, peers)
            },
            |(junction, mut peers)| {
                junction.enter().unwrap();
                junction.exit().unwrap();
                let mut sink = [0u8; 64];
                for peer in peers.iter_mut() {
                    let _ = peer.read(&mut sink);
                }
            },
        )
    });
}

criterion_group!(benches, octets_roundtrip, many_small_datagrams);
criterion_main!(benches);
