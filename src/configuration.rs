//! Config for the server behaviors
//!
//! This module provides the policy values used by every long-lived loop of the server:
//! the accept loop, each connection engine, each running match and each tournament scheduler.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Unset or unparseable values keep their default.
//!
//! - `ARENA_PORT`: Listening port (default: `1350`)
//! - `ARENA_MAX_CONNECTIONS`: Maximum number of concurrent connections (default: `30`)
//! - `ARENA_ACCEPT_POLL_MS`: Accept-wait before re-checking for shutdown (default: `100`)
//! - `ARENA_CONNECTION_TICK_MS`: Sleep between two connection engine cycles (default: `10`)
//! - `ARENA_QUIET_WINDOW_MS`: Silence tolerated before a `@PING` is sent (default: `2000`)
//! - `ARENA_MAX_PINGS`: Unanswered pings before the connection is dropped (default: `10`)
//! - `ARENA_MATCH_TICK_MS`: Sleep between two match cycles (default: `100`)
//! - `ARENA_SCHEDULER_TICK_MS`: Sleep between two tournament scans (default: `1000`)
//! - `ARENA_FORFEIT_THRESHOLD`: Consecutive invalid moves tolerated (default: `5`)
//! - `ARENA_PLAYER_TTL_SECS`: How long an idle, disconnected player is kept (default: `600`)
//! - `ARENA_LOG`: `"true"` installs the tracing subscriber (default: `false`)
//! - `ARENA_LOG_FILE`: `"true"` writes logs to a timestamped file (default: `false`)
//! - `ARENA_LOG_LEVEL`: `trace`, `debug`, `info`, `warn` or `error` (default: `info`)

use std::str::FromStr;
use std::time::Duration;

use tracing::{warn, Level};

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 1350;

/// Default connection ceiling.
pub const DEFAULT_MAX_CONNECTIONS: usize = 30;

/// Configuration for server behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) port: u16,
    pub(crate) max_connections: usize,
    pub(crate) accept_poll: Duration,
    pub(crate) connection_tick: Duration,
    pub(crate) quiet_window: Duration,
    pub(crate) max_pings: u32,
    pub(crate) match_tick: Duration,
    pub(crate) scheduler_tick: Duration,
    pub(crate) forfeit_threshold: u32,
    pub(crate) player_ttl: Duration,
    pub log: bool,
    pub(crate) log_to_file: bool,
    pub(crate) log_level: Level,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The server listens on port 1350 and accepts at most 30 concurrent connections.
    /// - A connection silent for 2 seconds is pinged, and dropped after 10 unanswered pings.
    /// - A match ticks every 100ms and a tournament scans for startable matches every second.
    /// - A player forfeits after more than 5 consecutive invalid moves.
    /// - Logging is disabled.
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            accept_poll: Duration::from_millis(100),
            connection_tick: Duration::from_millis(10),
            quiet_window: Duration::from_millis(2000),
            max_pings: 10,
            match_tick: Duration::from_millis(100),
            scheduler_tick: Duration::from_millis(1000),
            forfeit_threshold: 5,
            player_ttl: Duration::from_secs(600),
            log: false,
            log_to_file: false,
            log_level: Level::INFO,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the list of recognized variables.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_value<T: FromStr>(var: &str, default: T) -> T {
            let Ok(val) = std::env::var(var) else {
                return default;
            };
            val.trim().parse().unwrap_or_else(|_| {
                warn!(var, value = %val, "unparseable value, keeping the default");
                default
            })
        }

        fn get_env_millis(var: &str, default: Duration) -> Duration {
            let millis = get_env_value(var, default.as_millis() as u64);
            Duration::from_millis(millis)
        }

        let default = Self::new();
        Self {
            port: get_env_value("ARENA_PORT", default.port),
            max_connections: get_env_value("ARENA_MAX_CONNECTIONS", default.max_connections),
            accept_poll: get_env_millis("ARENA_ACCEPT_POLL_MS", default.accept_poll),
            connection_tick: get_env_millis("ARENA_CONNECTION_TICK_MS", default.connection_tick),
            quiet_window: get_env_millis("ARENA_QUIET_WINDOW_MS", default.quiet_window),
            max_pings: get_env_value("ARENA_MAX_PINGS", default.max_pings),
            match_tick: get_env_millis("ARENA_MATCH_TICK_MS", default.match_tick),
            scheduler_tick: get_env_millis("ARENA_SCHEDULER_TICK_MS", default.scheduler_tick),
            forfeit_threshold: get_env_value("ARENA_FORFEIT_THRESHOLD", default.forfeit_threshold),
            player_ttl: Duration::from_secs(get_env_value(
                "ARENA_PLAYER_TTL_SECS",
                default.player_ttl.as_secs(),
            )),
            log: get_env_flag("ARENA_LOG", default.log),
            log_to_file: get_env_flag("ARENA_LOG_FILE", default.log_to_file),
            log_level: get_env_value("ARENA_LOG_LEVEL", default.log_level),
        }
    }

    /// Set the listening port. `0` lets the OS pick one.
    pub fn with_port(mut self, value: u16) -> Self {
        self.port = value;
        self
    }

    /// Set the maximum number of concurrent connections.
    pub fn with_max_connections(mut self, value: usize) -> Self {
        self.max_connections = value;
        self
    }

    /// Set how long the accept loop waits before re-checking for shutdown.
    pub fn with_accept_poll(mut self, value: Duration) -> Self {
        self.accept_poll = value;
        self
    }

    /// Set the sleep between two connection engine cycles.
    pub fn with_connection_tick(mut self, value: Duration) -> Self {
        self.connection_tick = value;
        self
    }

    /// Set the liveness policy: silence tolerated before pinging, and number of unanswered
    /// pings before giving up on the peer.
    pub fn with_liveness(mut self, quiet_window: Duration, max_pings: u32) -> Self {
        self.quiet_window = quiet_window;
        self.max_pings = max_pings;
        self
    }

    /// Set the sleep between two match cycles.
    pub fn with_match_tick(mut self, value: Duration) -> Self {
        self.match_tick = value;
        self
    }

    /// Set the sleep between two tournament scans.
    pub fn with_scheduler_tick(mut self, value: Duration) -> Self {
        self.scheduler_tick = value;
        self
    }

    /// Set the number of consecutive invalid moves tolerated before a player forfeits.
    pub fn with_forfeit_threshold(mut self, value: u32) -> Self {
        self.forfeit_threshold = value;
        self
    }

    /// Set how long a disconnected player with nothing in progress is kept in the registry.
    pub fn with_player_ttl(mut self, value: Duration) -> Self {
        self.player_ttl = value;
        self
    }

    /// Enable or disable logging.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Write logs to a timestamped file instead of stderr.
    pub fn with_log_to_file(mut self, value: bool) -> Self {
        self.log_to_file = value;
        self
    }

    /// Set the maximum level of emitted log events.
    pub fn with_log_level(mut self, value: Level) -> Self {
        self.log_level = value;
        self
    }

    /// Listening port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Maximum number of concurrent connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Consecutive invalid moves tolerated before forfeiture.
    pub fn forfeit_threshold(&self) -> u32 {
        self.forfeit_threshold
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol() {
        let config = Configuration::default();
        assert_eq!(config.port(), 1350);
        assert_eq!(config.max_connections(), 30);
        assert_eq!(config.forfeit_threshold(), 5);
        assert!(!config.log);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = Configuration::new()
            .with_port(0)
            .with_max_connections(2)
            .with_liveness(Duration::from_millis(50), 3)
            .with_forfeit_threshold(1)
            .with_log_level(Level::DEBUG);
        assert_eq!(config.port, 0);
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.quiet_window, Duration::from_millis(50));
        assert_eq!(config.max_pings, 3);
        assert_eq!(config.forfeit_threshold, 1);
        assert_eq!(config.log_level, Level::DEBUG);
    }
}
