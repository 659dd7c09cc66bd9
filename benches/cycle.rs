#[macro_use]
extern crate criterion;

extern crate junction;

use criterion::Criterion;
use junction::alloc::{key_from_tuple, Params};
use junction::config::JunctionConfig;
use junction::junction::{Attached, Junction};
use junction::Resource;

/// How long one `enter()`/`exit()` round costs with a growing number of
/// idle-but-live Channels attached — the cost the spec calls out in §4.4's
/// phase-2 full scan of `live`.
fn enter_exit_idle_channels(c: &mut Criterion) {
    c.bench_function("enter/exit, 500 idle channels", move |b| {
        b.iter_with_setup(
            || {
                let junction = Junction::new(JunctionConfig::default(), None).unwrap();
                for _ in 0..500 {
                    let key = key_from_tuple(&["octets", "spawn", "unidirectional"]).unwrap();
                    if let Ok(Attached::Pair(a, b)) = junction.rallocate(key, Params::None) {
                        let _ = a;
                        let _ = b;
                    }
                }
                junction
            },
            |junction| {
                junction.enter().unwrap();
                junction.exit().unwrap();
            },
        )
    });
}

/// A cycle that has to actually move data on every live Channel (worst case
/// for phase 7's I/O attempt loop), as opposed to the idle-channel case
/// above.
fn enter_exit_active_transfer(c: &mut Criterion) {
    c.bench_function("enter/exit, 100 channels transferring", move |b| {
        b.iter_with_setup(
            || {
                let junction = Junction::new(JunctionConfig::default(), None).unwrap();
                let mut writers = Vec::new();
                for _ in 0..100 {
                    let key = key_from_tuple(&["octets", "spawn", "bidirectional"]).unwrap();
                    if let Ok(Attached::PairWithPeer(input, output, peer_fd)) =
                        junction.rallocate(key, Params::None)
                    {
                        junction.acquire(output, Resource::Octets(vec![b'x'; 64])).unwrap();
                        junction.acquire(input, Resource::Octets(vec![0u8; 64])).unwrap();
                        writers.push((output, peer_fd));
                    }
                }
                (junction, writers)
            },
            |(junction, writers)| {
                junction.enter().unwrap();
                junction.exit().unwrap();
                for (_, peer_fd) in &writers {
                    unsafe {
                        libc::close(*peer_fd);
                    }
                }
            },
        )
    });
}

criterion_group!(benches, enter_exit_idle_channels, enter_exit_active_transfer);
criterion_main!(benches);
