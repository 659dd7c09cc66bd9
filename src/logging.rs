//! Thin wrapper around `slog`/`sloggers` so the rest of the crate can take an
//! optional `&Logger` at construction time and fall back to a silent logger,
//! the same convention `flux::logging` established for `neutronium`.

pub use slog::{debug, error, info, o, trace, Discard, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds a terminal logger at the given severity. Intended for binaries and
/// tests that want visible output; library code should accept a `Logger`
/// from its caller instead of calling this directly.
pub fn terminal(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.build().unwrap_or_else(|_| Logger::root(Discard, o!()))
}

/// A logger that discards everything. Used as the default when no logger is
/// supplied to a constructor.
#[inline]
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

/// Resolves an `Into<Option<&Logger>>` constructor argument into an owned
/// child logger, falling back to `discard()`. Mirrors
/// `Channel::new`/`World::new` in the teacher crate.
#[inline]
pub fn child<'a, L: Into<Option<&'a Logger>>>(log: L, ctx: &'static str) -> Logger {
    match log.into() {
        Some(log) => log.new(o!("component" => ctx)),
        None => discard(),
    }
}
