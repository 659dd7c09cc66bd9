//! Immutable address values. Unlike `neutronium::net::endpoint::Endpoint`
//! (a connection manager in the teacher crate), this `Endpoint` is exactly
//! what spec §3 describes: an address, nothing more — the manager role is
//! played by `Junction` instead.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// An immutable address value: a numeric IPv4/IPv6 socket address, or a
/// UNIX-domain path. For anonymous UNIX sockets (no bound path) the engine
/// reports credentials instead — see `Endpoint::Credentials`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Ip4(SocketAddr),
    Ip6(SocketAddr),
    Local(PathBuf),
    /// Peer credentials for an anonymous (unbound, e.g. `socketpair`)
    /// UNIX-domain socket, retrieved via `getpeereid`/`SO_PEERCRED`.
    Credentials { uid: u32, gid: u32 },
}

impl Endpoint {
    #[inline]
    pub fn ip4(addr: SocketAddr) -> Endpoint {
        debug_assert!(addr.is_ipv4());
        Endpoint::Ip4(addr)
    }

    #[inline]
    pub fn ip6(addr: SocketAddr) -> Endpoint {
        debug_assert!(addr.is_ipv6());
        Endpoint::Ip6(addr)
    }

    #[inline]
    pub fn local(path: PathBuf) -> Endpoint {
        Endpoint::Local(path)
    }

    /// The interface (address) projection, omitting the port.
    pub fn interface(&self) -> Option<IpAddr> {
        match self {
            Endpoint::Ip4(addr) | Endpoint::Ip6(addr) => Some(addr.ip()),
            Endpoint::Local(_) | Endpoint::Credentials { .. } => None,
        }
    }

    /// The port projection, if this endpoint has one.
    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Ip4(addr) | Endpoint::Ip6(addr) => Some(addr.port()),
            Endpoint::Local(_) | Endpoint::Credentials { .. } => None,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Endpoint::Local(path) => Some(path),
            _ => None,
        }
    }
}

/// Formats `[interface]:port` for numeric endpoints and `directory/filename`
/// for UNIX sockets, per spec §6.
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Endpoint::Ip4(addr) => write!(f, "[{}]:{}", addr.ip(), addr.port()),
            Endpoint::Ip6(addr) => write!(f, "[{}]:{}", addr.ip(), addr.port()),
            Endpoint::Local(path) => write!(f, "{}", path.display()),
            Endpoint::Credentials { uid, gid } => write!(f, "uid={},gid={}", uid, gid),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EndpointParseError(String);

impl fmt::Display for EndpointParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cannot parse endpoint: {}", self.0)
    }
}

/// Re-parses the `[interface]:port` form back into a numeric `Endpoint`.
/// UNIX-local paths are not produced by `Display` in a re-parseable form
/// that disambiguates from a bracketed address, so only the numeric forms
/// round-trip through `FromStr` (spec §8's round-trip property is scoped to
/// "a connected TCP Channel").
impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(input: &str) -> Result<Endpoint, EndpointParseError> {
        if let Some(rest) = input.strip_prefix('[') {
            if let Some(close) = rest.find(']') {
                let (addr_part, tail) = rest.split_at(close);
                let tail = &tail[1..];
                if let Some(port_str) = tail.strip_prefix(':') {
                    let port: u16 = port_str
                        .parse()
                        .map_err(|_| EndpointParseError(input.to_string()))?;

                    if let Ok(ip4) = addr_part.parse::<Ipv4Addr>() {
                        return Ok(Endpoint::Ip4(SocketAddr::new(IpAddr::V4(ip4), port)));
                    }
                    if let Ok(ip6) = addr_part.parse::<Ipv6Addr>() {
                        return Ok(Endpoint::Ip6(SocketAddr::new(IpAddr::V6(ip6), port)));
                    }
                }
            }
        }

        Err(EndpointParseError(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip4_roundtrip() {
        let addr: SocketAddr = "127.0.0.1:4400".parse().unwrap();
        let endpoint = Endpoint::ip4(addr);

        let rendered = endpoint.to_string();
        let reparsed: Endpoint = rendered.parse().unwrap();

        assert_eq!(endpoint, reparsed);
    }

    #[test]
    fn test_ip6_roundtrip() {
        let addr: SocketAddr = "[::1]:9000".parse().unwrap();
        let endpoint = Endpoint::ip6(addr);

        let reparsed: Endpoint = endpoint.to_string().parse().unwrap();

        assert_eq!(endpoint, reparsed);
    }

    #[test]
    fn test_local_display() {
        let endpoint = Endpoint::local(PathBuf::from("/tmp/sock/name"));
        assert_eq!(endpoint.to_string(), "/tmp/sock/name");
        assert_eq!(endpoint.path().unwrap(), &PathBuf::from("/tmp/sock/name"));
    }

    #[test]
    fn test_projections() {
        let addr: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let endpoint = Endpoint::ip4(addr);

        assert_eq!(endpoint.interface(), Some(addr.ip()));
        assert_eq!(endpoint.port(), Some(80));
    }

    #[test]
    fn test_invalid_parse() {
        assert!("not-an-endpoint".parse::<Endpoint>().is_err());
    }
}
