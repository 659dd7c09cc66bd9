//! Junction: a kernel-event-driven I/O multiplexer unifying kqueue and
//! epoll behind one cycle engine. See `SPEC_FULL.md` for the full module
//! map; `junction::Junction` is the entry point most callers want.

pub mod alloc;
pub mod channel;
pub mod config;
pub mod datagram_array;
pub mod endpoint;
pub mod error;
pub mod freight;
pub mod junction;
pub mod logging;
pub mod notify;
pub mod port;

pub use channel::{Channel, ChannelId, Flags, Polarity};
pub use config::JunctionConfig;
pub use error::{Cause, IoOutcome, KCall};
pub use freight::{FreightTag, Resource};
pub use junction::{Junction, JunctionError};
