//! Log throttling for per-frame failures.
//!
//! A frame that fails every 16 ms would otherwise flood the log. The first
//! few occurrences are logged in full, then one "suppressing further" line,
//! then nothing until a successful frame re-arms the throttle.

use std::sync::atomic::{AtomicU32, Ordering};

/// Verbose messages before suppression kicks in.
pub const DEFAULT_VERBOSE_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Log this occurrence in full.
    Log,
    /// Log this occurrence and announce that further ones are suppressed.
    LogAndSuppress,
    Silent,
}

#[derive(Debug)]
pub struct LogThrottle {
    count: AtomicU32,
    limit: u32,
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_VERBOSE_LIMIT)
    }
}

impl LogThrottle {
    pub const fn new(limit: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            limit,
        }
    }

    /// Record one occurrence and decide how loudly to report it.
    pub fn hit(&self) -> Verbosity {
        let n = self
            .count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_add(1)))
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        if n < self.limit {
            Verbosity::Log
        } else if n == self.limit {
            Verbosity::LogAndSuppress
        } else {
            Verbosity::Silent
        }
    }

    /// Occurrences since the last reset.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}

/// Log through a [`LogThrottle`] at `warn` level.
#[macro_export]
macro_rules! throttled_warn {
    ($throttle:expr, $($arg:tt)+) => {
        match $throttle.hit() {
            $crate::throttle::Verbosity::Log => ::tracing::warn!($($arg)+),
            $crate::throttle::Verbosity::LogAndSuppress => {
                ::tracing::warn!($($arg)+);
                ::tracing::warn!("Suppressing further messages of this kind");
            }
            $crate::throttle::Verbosity::Silent => {}
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_then_announce_then_silent() {
        let throttle = LogThrottle::new(3);
        assert_eq!(throttle.hit(), Verbosity::Log);
        assert_eq!(throttle.hit(), Verbosity::Log);
        assert_eq!(throttle.hit(), Verbosity::LogAndSuppress);
        for _ in 0..100 {
            assert_eq!(throttle.hit(), Verbosity::Silent);
        }
        assert_eq!(throttle.count(), 103);
    }

    #[test]
    fn reset_rearms() {
        let throttle = LogThrottle::new(1);
        assert_eq!(throttle.hit(), Verbosity::LogAndSuppress);
        assert_eq!(throttle.hit(), Verbosity::Silent);
        throttle.reset();
        assert_eq!(throttle.hit(), Verbosity::LogAndSuppress);
    }

    #[test]
    fn macro_counts_hits() {
        let throttle = LogThrottle::default();
        for i in 0..10 {
            throttled_warn!(throttle, "frame {} failed", i);
        }
        assert_eq!(throttle.count(), 10);
    }
}
