//! Junction tuning knobs. Defaults reproduce the literal constants from the
//! specification (an 8192-entry kernel scratch array, a 9-second bounded
//! wait, three collect retries) so loading a config file is optional, never
//! load-bearing. Mirrors `flux::logging::init`'s use of
//! `serdeconv::from_toml_str` to turn a TOML blob into a typed struct.

use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

/// Default capacity of the kqueue/epoll scratch array (spec §4.4 phase 5).
pub const DEFAULT_SCRATCH_CAPACITY: usize = 8192;

/// Bounded wait applied when a cycle has no immediately actionable Channels
/// (spec §4.4 phase 5, §5 "Suspension points").
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(9);

/// Number of times phase 5 is repeated without waiting when the scratch
/// array filled to capacity (spec §4.4 phase 5, §9 Open Question #1).
pub const DEFAULT_COLLECT_RETRIES: u8 = 3;

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct JunctionConfig {
    pub scratch_capacity: usize,
    pub wait_timeout_secs: u64,
    pub collect_retries: u8,
}

impl Default for JunctionConfig {
    #[inline]
    fn default() -> JunctionConfig {
        JunctionConfig {
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT.as_secs(),
            collect_retries: DEFAULT_COLLECT_RETRIES,
        }
    }
}

impl JunctionConfig {
    #[inline]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Loads a config from a TOML string, falling back to field-by-field
    /// defaults for anything unspecified. Returns the parse error message on
    /// malformed input rather than panicking, since this is a user-facing
    /// entry point unlike the internal defaults above.
    pub fn from_toml_str(input: &str) -> Result<JunctionConfig, String> {
        serdeconv::from_toml_str(input).map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_spec_constants() {
        let cfg = JunctionConfig::default();
        assert_eq!(cfg.scratch_capacity, 8192);
        assert_eq!(cfg.wait_timeout(), Duration::from_secs(9));
        assert_eq!(cfg.collect_retries, 3);
    }

    #[test]
    fn test_from_toml_str() {
        let cfg = JunctionConfig::from_toml_str(
            r#"
scratch_capacity = 256
wait_timeout_secs = 2
collect_retries = 1
"#,
        )
        .unwrap();

        assert_eq!(cfg.scratch_capacity, 256);
        assert_eq!(cfg.wait_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.collect_retries, 1);
    }

    #[test]
    fn test_from_toml_str_err() {
        assert!(JunctionConfig::from_toml_str("not valid toml = [").is_err());
    }
}
