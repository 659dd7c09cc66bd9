//! `rallocate(spec, params)`: the Channel allocation factory (spec §6).
//! Both a `(freight, family, mode)` tuple and an IRI-style string
//! (`"octets://ip4:tcp"`) resolve to the same entry in a static dispatch
//! table, shaped like `neutronium::identity`'s `lazy_static!`-backed
//! registries but keyed by a plain hashable tuple instead of a custom
//! macro-generated type id.

use crate::channel::{Channel, Polarity};
use crate::freight::{FreightTag, Resource};
use crate::port::{Port, INPUT, OUTPUT};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Freight {
    Octets,
    Sockets,
    Ports,
    Datagrams,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Family {
    Ip4,
    Ip6,
    Local,
    Acquire,
    Spawn,
    File,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Mode {
    None,
    Tcp,
    TcpBind,
    Udp,
    Socket,
    Input,
    Output,
    Unidirectional,
    Bidirectional,
    Read,
    Overwrite,
    Append,
}

pub type AllocKey = (Freight, Family, Mode);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Allocator {
    OctetsIpConnect,
    OctetsIpConnectBind,
    OctetsUdpConnect,
    OctetsLocalConnect,
    SocketsListen,
    SocketsAcquire,
    OctetsAcquire,
    OctetsSpawnUnidirectional,
    OctetsSpawnBidirectional,
    OctetsFile,
    Datagrams,
    PortsSpawnBidirectional,
    PortsAcquire,
}

lazy_static! {
    static ref DISPATCH: HashMap<AllocKey, Allocator> = {
        use Allocator::*;
        use Family::*;
        use Freight::*;
        use Mode::*;

        let mut m = HashMap::new();
        m.insert((Octets, Ip4, None), OctetsIpConnect);
        m.insert((Octets, Ip6, None), OctetsIpConnect);
        m.insert((Octets, Ip4, Tcp), OctetsIpConnect);
        m.insert((Octets, Ip6, Tcp), OctetsIpConnect);
        m.insert((Octets, Ip4, TcpBind), OctetsIpConnectBind);
        m.insert((Octets, Ip6, TcpBind), OctetsIpConnectBind);
        m.insert((Octets, Ip4, Udp), OctetsUdpConnect);
        m.insert((Octets, Ip6, Udp), OctetsUdpConnect);
        m.insert((Octets, Local, None), OctetsLocalConnect);
        m.insert((Sockets, Ip4, None), SocketsListen);
        m.insert((Sockets, Ip6, None), SocketsListen);
        m.insert((Sockets, Local, None), SocketsListen);
        m.insert((Sockets, Acquire, Socket), SocketsAcquire);
        m.insert((Octets, Acquire, Socket), OctetsAcquire);
        m.insert((Octets, Acquire, Input), OctetsAcquire);
        m.insert((Octets, Acquire, Output), OctetsAcquire);
        m.insert((Octets, Spawn, Unidirectional), OctetsSpawnUnidirectional);
        m.insert((Octets, Spawn, Bidirectional), OctetsSpawnBidirectional);
        m.insert((Octets, File, Read), OctetsFile);
        m.insert((Octets, File, Overwrite), OctetsFile);
        m.insert((Octets, File, Append), OctetsFile);
        m.insert((Datagrams, Ip4, None), Datagrams);
        m.insert((Datagrams, Ip6, None), Datagrams);
        m.insert((Datagrams, Ip4, Udp), Datagrams);
        m.insert((Datagrams, Ip6, Udp), Datagrams);
        m.insert((Ports, Spawn, Bidirectional), PortsSpawnBidirectional);
        m.insert((Ports, Acquire, Socket), PortsAcquire);
        m
    };
}

/// The parameters a given allocator key needs. Which variant is expected
/// depends on the key; `rallocate` reports `AllocError::WrongParams` on a
/// mismatch rather than panicking.
pub enum Params {
    Connect(SocketAddr),
    ConnectBind { connect: SocketAddr, bind: SocketAddr },
    Listen(SocketAddr),
    ListenLocal(PathBuf),
    ConnectLocal(PathBuf),
    Acquire { fd: RawFd, directions: u8 },
    File { path: PathBuf, mode: FileOpenMode },
    None,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileOpenMode {
    Read,
    Overwrite,
    Append,
}

/// What a successful allocation produced: either a single Channel (a
/// listener, an acquired half-duplex descriptor) or an input+output pair
/// sharing one Port.
pub enum Allocation {
    Single(Channel),
    Pair(Channel, Channel),
    /// Like `Pair`, but the allocator also produced a second, Junction-
    /// unmanaged descriptor (the other half of a `spawn`ed socketpair) the
    /// caller is responsible for — typically handing it to a forked child
    /// process. The Junction never reads or writes it.
    PairWithPeer(Channel, Channel, RawFd),
}

#[derive(Debug)]
pub enum AllocError {
    UnknownSpec,
    WrongParams,
    Io(std::io::Error),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocError::UnknownSpec => write!(f, "no allocator registered for this spec"),
            AllocError::WrongParams => write!(f, "params do not match the requested allocator"),
            AllocError::Io(err) => write!(f, "allocation failed: {}", err),
        }
    }
}

impl std::error::Error for AllocError {}

impl From<std::io::Error> for AllocError {
    fn from(err: std::io::Error) -> AllocError {
        AllocError::Io(err)
    }
}

/// Parses the IRI-style string form (`"octets://ip4"`, `"octets://ip4:tcp"`,
/// `"octets://ip4/tcp"`) into the same `AllocKey` the tuple form uses. Both
/// `:` and `/` separate trailing tokens after the `family`.
pub fn parse_iri(iri: &str) -> Option<AllocKey> {
    let (freight_str, rest) = iri.split_once("://")?;
    let tokens: Vec<&str> = rest.split(|c| c == ':' || c == '/').collect();

    let freight = parse_freight(freight_str)?;
    key_from_tokens(freight, &tokens)
}

/// Builds an `AllocKey` from the tuple form's token list, e.g.
/// `["octets", "ip4", "tcp", "bind"]`.
pub fn key_from_tuple(tokens: &[&str]) -> Option<AllocKey> {
    let freight = parse_freight(*tokens.first()?)?;
    key_from_tokens(freight, &tokens[1..])
}

fn key_from_tokens(freight: Freight, tokens: &[&str]) -> Option<AllocKey> {
    let family = match *tokens.first()? {
        "ip4" => Family::Ip4,
        "ip6" => Family::Ip6,
        "local" => Family::Local,
        "acquire" => Family::Acquire,
        "spawn" => Family::Spawn,
        "file" => Family::File,
        _ => return None,
    };

    let mode = match tokens.get(1) {
        None => Mode::None,
        Some(&"tcp") => match tokens.get(2) {
            Some(&"bind") => Mode::TcpBind,
            None => Mode::Tcp,
            _ => return None,
        },
        Some(&"udp") => Mode::Udp,
        Some(&"socket") => Mode::Socket,
        Some(&"input") => Mode::Input,
        Some(&"output") => Mode::Output,
        Some(&"unidirectional") => Mode::Unidirectional,
        Some(&"bidirectional") => Mode::Bidirectional,
        Some(&"read") => Mode::Read,
        Some(&"overwrite") => Mode::Overwrite,
        Some(&"append") => Mode::Append,
        _ => return None,
    };

    Some((freight, family, mode))
}

fn parse_freight(token: &str) -> Option<Freight> {
    match token {
        "octets" => Some(Freight::Octets),
        "sockets" => Some(Freight::Sockets),
        "ports" => Some(Freight::Ports),
        "datagrams" => Some(Freight::Datagrams),
        _ => None,
    }
}

/// The Channel allocation factory. `key` addresses an entry in the static
/// dispatch table (built via `key_from_tuple`/`parse_iri`); `params`
/// supplies whatever that entry needs to actually open the descriptor.
pub fn rallocate(key: AllocKey, params: Params) -> Result<Allocation, AllocError> {
    let allocator = *DISPATCH.get(&key).ok_or(AllocError::UnknownSpec)?;

    match allocator {
        Allocator::OctetsIpConnect => {
            let addr = expect_connect(params)?;
            let port = Port::connect(addr)?;
            Ok(pair_over_shared_port(port, FreightTag::Octets))
        }
        Allocator::OctetsIpConnectBind => {
            let (connect, bind) = expect_connect_bind(params)?;
            let port = Port::bind_connect(bind, connect)?;
            Ok(pair_over_shared_port(port, FreightTag::Octets))
        }
        Allocator::OctetsUdpConnect => {
            let addr = expect_connect(params)?;
            let port = Port::connect(addr)?;
            Ok(pair_over_shared_port(port, FreightTag::Octets))
        }
        Allocator::OctetsLocalConnect => {
            let path = expect_connect_local(params)?;
            let port = Port::connect_local(&path)?;
            Ok(pair_over_shared_port(port, FreightTag::Octets))
        }
        Allocator::SocketsListen => {
            let port = match params {
                Params::Listen(addr) => Port::listen(addr)?,
                Params::ListenLocal(path) => Port::listen_local(&path)?,
                _ => return Err(AllocError::WrongParams),
            };
            Ok(Allocation::Single(Channel::new(port, Polarity::Input, FreightTag::Sockets)))
        }
        Allocator::SocketsAcquire => {
            let (fd, directions) = expect_acquire(params)?;
            let port = Port::acquire(fd, directions)?;
            Ok(Allocation::Single(Channel::new(port, Polarity::Input, FreightTag::Sockets)))
        }
        Allocator::OctetsAcquire => {
            let (fd, directions) = expect_acquire(params)?;
            let port = Port::acquire(fd, directions)?;
            Ok(acquire_channels(port, directions))
        }
        Allocator::OctetsSpawnUnidirectional => {
            let (read_end, write_end) = Port::pipe()?;
            Ok(Allocation::Pair(
                Channel::new(read_end, Polarity::Input, FreightTag::Octets),
                Channel::new(write_end, Polarity::Output, FreightTag::Octets),
            ))
        }
        Allocator::OctetsSpawnBidirectional => {
            let (a, mut b) = Port::socketpair()?;
            let peer_fd = b.fd();
            b.leak();
            Ok(pair_with_peer(a, FreightTag::Octets, peer_fd))
        }
        Allocator::OctetsFile => {
            let (path, mode) = expect_file(params)?;
            let (read, write, append) = match mode {
                FileOpenMode::Read => (true, false, false),
                FileOpenMode::Overwrite => (false, true, false),
                FileOpenMode::Append => (false, true, true),
            };
            let port = Port::open(&path, read, write, append, write)?;
            let polarity = if read { Polarity::Input } else { Polarity::Output };
            let mut channel = Channel::new(port, polarity, FreightTag::Octets);
            channel.state.insert(crate::channel::Flags::REQUEUE);
            Ok(Allocation::Single(channel))
        }
        Allocator::Datagrams => {
            let addr = expect_listen(params)?;
            let port = Port::bind(addr)?;
            Ok(pair_over_shared_port(port, FreightTag::Datagrams))
        }
        Allocator::PortsSpawnBidirectional => {
            let (a, mut b) = Port::socketpair()?;
            let peer_fd = b.fd();
            b.leak();
            Ok(pair_with_peer(a, FreightTag::Ports, peer_fd))
        }
        Allocator::PortsAcquire => {
            let (fd, directions) = expect_acquire(params)?;
            let port = Port::acquire(fd, directions)?;
            Ok(acquire_channels(port, directions))
        }
    }
}

/// Splits an acquired descriptor's directions into one or two Channels,
/// sharing the Port when both input and output were requested (spec §6
/// `(octets, acquire, socket|input|output)`).
fn acquire_channels(port: Port, directions: u8) -> Allocation {
    match directions {
        d if d == INPUT | OUTPUT => pair_over_shared_port(port, FreightTag::Octets),
        d if d == INPUT => Allocation::Single(Channel::new(port, Polarity::Input, FreightTag::Octets)),
        _ => Allocation::Single(Channel::new(port, Polarity::Output, FreightTag::Octets)),
    }
}

/// Splits one full-duplex Port into an input and an output Channel sharing
/// its half-close latch (spec §3's "latch bits distinguish per-direction
/// liveness").
fn pair_over_shared_port(port: Port, freight: FreightTag) -> Allocation {
    let (input_port, output_port) = port.split_shared();
    Allocation::Pair(
        Channel::new(input_port, Polarity::Input, freight),
        Channel::new(output_port, Polarity::Output, freight),
    )
}

fn pair_with_peer(port: Port, freight: FreightTag, peer_fd: RawFd) -> Allocation {
    let (input_port, output_port) = port.split_shared();
    Allocation::PairWithPeer(
        Channel::new(input_port, Polarity::Input, freight),
        Channel::new(output_port, Polarity::Output, freight),
        peer_fd,
    )
}

fn expect_connect(params: Params) -> Result<SocketAddr, AllocError> {
    match params {
        Params::Connect(addr) => Ok(addr),
        _ => Err(AllocError::WrongParams),
    }
}

fn expect_connect_bind(params: Params) -> Result<(SocketAddr, SocketAddr), AllocError> {
    match params {
        Params::ConnectBind { connect, bind } => Ok((connect, bind)),
        _ => Err(AllocError::WrongParams),
    }
}

fn expect_connect_local(params: Params) -> Result<PathBuf, AllocError> {
    match params {
        Params::ConnectLocal(path) => Ok(path),
        _ => Err(AllocError::WrongParams),
    }
}

fn expect_listen(params: Params) -> Result<SocketAddr, AllocError> {
    match params {
        Params::Listen(addr) => Ok(addr),
        _ => Err(AllocError::WrongParams),
    }
}

fn expect_acquire(params: Params) -> Result<(RawFd, u8), AllocError> {
    match params {
        Params::Acquire { fd, directions } => Ok((fd, directions)),
        _ => Err(AllocError::WrongParams),
    }
}

fn expect_file(params: Params) -> Result<(PathBuf, FileOpenMode), AllocError> {
    match params {
        Params::File { path, mode } => Ok((path, mode)),
        _ => Err(AllocError::WrongParams),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iri_bare_family() {
        assert_eq!(parse_iri("octets://ip4"), Some((Freight::Octets, Family::Ip4, Mode::None)));
    }

    #[test]
    fn test_parse_iri_colon_mode() {
        assert_eq!(parse_iri("octets://ip4:tcp"), Some((Freight::Octets, Family::Ip4, Mode::Tcp)));
    }

    #[test]
    fn test_parse_iri_slash_mode() {
        assert_eq!(parse_iri("octets://ip4/tcp"), Some((Freight::Octets, Family::Ip4, Mode::Tcp)));
    }

    #[test]
    fn test_tuple_and_iri_agree() {
        let tuple = key_from_tuple(&["octets", "ip4", "tcp", "bind"]);
        let iri = parse_iri("octets://ip4:tcp:bind");
        assert_eq!(tuple, iri);
        assert_eq!(tuple, Some((Freight::Octets, Family::Ip4, Mode::TcpBind)));
    }

    #[test]
    fn test_spawn_unidirectional_allocates_pipe_pair() {
        let key = key_from_tuple(&["octets", "spawn", "unidirectional"]).unwrap();
        let allocation = rallocate(key, Params::None).unwrap();
        match allocation {
            Allocation::Pair(input, output) => {
                assert_eq!(input.polarity(), Polarity::Input);
                assert_eq!(output.polarity(), Polarity::Output);
            }
            Allocation::Single(_) => panic!("expected a pair"),
        }
    }

    #[test]
    fn test_spawn_bidirectional_shares_one_descriptor_and_yields_peer() {
        let key = key_from_tuple(&["octets", "spawn", "bidirectional"]).unwrap();
        let allocation = rallocate(key, Params::None).unwrap();
        match allocation {
            Allocation::PairWithPeer(input, output, peer_fd) => {
                assert_eq!(input.port().fd(), output.port().fd());
                assert_ne!(input.port().fd(), peer_fd);
                unsafe {
                    libc::close(peer_fd);
                }
            }
            _ => panic!("expected a pair with peer"),
        }
    }

    #[test]
    fn test_unknown_spec_is_rejected() {
        let key = (Freight::Datagrams, Family::Spawn, Mode::Bidirectional);
        assert!(rallocate(key, Params::None).is_err());
    }
}
