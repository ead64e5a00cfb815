//! Timing configuration for bridge commands and the live view

use lazy_static::lazy_static;
use std::env;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Hard limits applied to every bridge invocation
#[derive(Debug, Clone)]
pub struct CommandTimingConfig {
    /// General command timeout in seconds
    pub command_timeout: f64,
    /// Screen capture timeout in seconds
    pub capture_timeout: f64,
    /// `adb devices` timeout in seconds
    pub discovery_timeout: f64,
    /// `uiautomator dump` + `pull` timeout in seconds
    pub dump_timeout: f64,
    /// Upper bound on how long a running command goes without checking for cancellation
    pub poll_interval_ms: u64,
}

impl Default for CommandTimingConfig {
    fn default() -> Self {
        Self {
            command_timeout: env_or("PHONE_FLEET_COMMAND_TIMEOUT", 60.0),
            capture_timeout: env_or("PHONE_FLEET_CAPTURE_TIMEOUT", 5.0),
            discovery_timeout: env_or("PHONE_FLEET_DISCOVERY_TIMEOUT", 10.0),
            dump_timeout: env_or("PHONE_FLEET_DUMP_TIMEOUT", 20.0),
            poll_interval_ms: env_or("PHONE_FLEET_POLL_INTERVAL_MS", 100),
        }
    }
}

impl CommandTimingConfig {
    pub fn command(&self) -> Duration {
        Duration::from_secs_f64(self.command_timeout)
    }

    pub fn capture(&self) -> Duration {
        Duration::from_secs_f64(self.capture_timeout)
    }

    pub fn discovery(&self) -> Duration {
        Duration::from_secs_f64(self.discovery_timeout)
    }

    pub fn dump(&self) -> Duration {
        Duration::from_secs_f64(self.dump_timeout)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, 100))
    }
}

/// Live-view and text pacing
#[derive(Debug, Clone)]
pub struct LiveTimingConfig {
    pub render_interval_ms: u64,
    /// Delay between characters for per-character text injection, in seconds
    pub char_delay: f64,
}

impl Default for LiveTimingConfig {
    fn default() -> Self {
        Self {
            render_interval_ms: env_or("PHONE_FLEET_RENDER_INTERVAL_MS", 100),
            char_delay: env_or("PHONE_FLEET_CHAR_DELAY", 0.05),
        }
    }
}

impl LiveTimingConfig {
    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(1))
    }

    pub fn char_delay(&self) -> Duration {
        Duration::from_secs_f64(self.char_delay)
    }
}

/// Worker pool sizing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers_per_core: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers_per_core: env_or("PHONE_FLEET_WORKERS_PER_CORE", 4),
        }
    }
}

impl PoolConfig {
    /// Commands are I/O bound, so the pool oversubscribes the available cores.
    pub fn worker_count(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores * self.workers_per_core.max(1)).max(1)
    }
}

/// Master timing configuration
#[derive(Debug, Clone, Default)]
pub struct TimingConfig {
    pub command: CommandTimingConfig,
    pub live: LiveTimingConfig,
    pub pool: PoolConfig,
}

lazy_static! {
    /// Global timing configuration instance
    pub static ref TIMING_CONFIG: TimingConfig = TimingConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_is_bounded() {
        let config = CommandTimingConfig {
            poll_interval_ms: 5_000,
            ..CommandTimingConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_worker_count_oversubscribes() {
        let config = PoolConfig { workers_per_core: 4 };
        assert!(config.worker_count() >= 4);
    }
}
