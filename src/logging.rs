//! Logging and tracing initialization for dzapd.
//!
//! This module provides structured logging using the `tracing` ecosystem.
//! It supports both pretty console output and JSON output for machine parsing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Default)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

/// Initialize the tracing subscriber with the given configuration.
///
/// This should be called early in main(), after config is loaded.
/// The log level can be overridden at runtime via the `RUST_LOG` environment variable.
pub fn init(config: LogConfig) {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("dzapd={}", default_level.as_str().to_lowercase()))
    });

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}

/// A rate limiter for periodic emissions.
///
/// The overwrite loop uses this as its 500 ms progress sampling clock;
/// it also throttles progress log lines that would otherwise spam the
/// output.
pub struct EmitThrottle {
    interval_ms: u64,
    /// Stores the last emission time in ms, or u64::MAX to indicate "never"
    last_emit_ms: AtomicU64,
    start: Instant,
}

/// Sentinel value indicating the throttle has never fired
const NEVER_EMITTED: u64 = u64::MAX;

impl EmitThrottle {
    /// Create a new throttle with the given minimum interval between emissions.
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_emit_ms: AtomicU64::new(NEVER_EMITTED),
            start: Instant::now(),
        }
    }

    /// Returns true if enough time has passed since the last emission.
    ///
    /// This is thread-safe and uses atomic operations.
    pub fn should_emit(&self) -> bool {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let last = self.last_emit_ms.load(Ordering::Relaxed);

        let should = last == NEVER_EMITTED || now_ms.saturating_sub(last) >= self.interval_ms;

        if should {
            // Try to update; if we lose the race, another thread emitted
            self.last_emit_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        } else {
            false
        }
    }

    /// Reset the throttle, allowing the next emission immediately.
    pub fn reset(&self) {
        self.last_emit_ms.store(NEVER_EMITTED, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn throttle_allows_first_emit() {
        let throttle = EmitThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_emit());
    }

    #[test]
    fn throttle_blocks_immediate_second_emit() {
        let throttle = EmitThrottle::new(Duration::from_secs(1));
        assert!(throttle.should_emit());
        assert!(!throttle.should_emit());
    }

    #[test]
    fn throttle_reset_allows_emit() {
        let throttle = EmitThrottle::new(Duration::from_secs(100));
        assert!(throttle.should_emit());
        assert!(!throttle.should_emit());
        throttle.reset();
        assert!(throttle.should_emit());
    }
}
