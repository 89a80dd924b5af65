//! Timer contracts
//!
//! Two sides: the Timer Runtime members that woven code calls, and the
//! [`WeavingTimerService`] that measures the weaver's own work. The latter is
//! fail-open: a service that cannot start a timer never stops a weave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use weft_bytecode::MemberRef;

/// Type providing `start`
pub const TIMER_RUNTIME: &str = "weft/TimerRuntime";

/// Handle type returned by `start`
pub const TIMER_HANDLE: &str = "weft/TimerHandle";

/// Infix identifying synthetic timer-wrapper members
pub const TIMER_MARKER: &str = "$weft$timer$";

/// `weft/TimerRuntime.start(S)Lweft/TimerHandle;`
pub fn timer_start() -> MemberRef {
    MemberRef::new(TIMER_RUNTIME, "start", "(S)Lweft/TimerHandle;")
}

/// `weft/TimerHandle.stop()V`
pub fn timer_stop() -> MemberRef {
    MemberRef::new(TIMER_HANDLE, "stop", "()V")
}

/// Name of the synthetic method holding a timed method's original body
pub fn wrapped_name(method: &str, label: &str, index: usize) -> String {
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}{}{}${}", method, TIMER_MARKER, label, index)
}

/// Whether a member name belongs to a timer wrapper
pub fn is_timer_wrapper(name: &str) -> bool {
    name.contains(TIMER_MARKER)
}

/// A running weaving timer
pub trait WeavingTimer {
    /// Stop the timer
    fn stop(self: Box<Self>);
}

/// Source of weaving timers
pub trait WeavingTimerService: Send + Sync {
    /// Start timing one weave
    fn start(&self) -> Result<Box<dyn WeavingTimer>, String>;
}

/// Service that measures nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NopTimerService;

struct NopTimer;

impl WeavingTimer for NopTimer {
    fn stop(self: Box<Self>) {}
}

impl WeavingTimerService for NopTimerService {
    fn start(&self) -> Result<Box<dyn WeavingTimer>, String> {
        Ok(Box::new(NopTimer))
    }
}

/// Service accumulating weave counts and total time
#[derive(Debug, Default)]
pub struct WeavingStats {
    count: AtomicU64,
    total_nanos: AtomicU64,
}

impl WeavingStats {
    /// Create zeroed statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed weaves
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Total time spent weaving, in nanoseconds
    pub fn total_nanos(&self) -> u64 {
        self.total_nanos.load(Ordering::Relaxed)
    }
}

impl WeavingTimerService for Arc<WeavingStats> {
    fn start(&self) -> Result<Box<dyn WeavingTimer>, String> {
        Ok(Box::new(StatsTimer {
            stats: self.clone(),
            started: Instant::now(),
        }))
    }
}

struct StatsTimer {
    stats: Arc<WeavingStats>,
    started: Instant,
}

impl WeavingTimer for StatsTimer {
    fn stop(self: Box<Self>) {
        let nanos = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.stats.count.fetch_add(1, Ordering::Relaxed);
        self.stats.total_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

/// Stops its timer when dropped
pub(crate) struct TimerGuard(Option<Box<dyn WeavingTimer>>);

impl TimerGuard {
    /// Start a timer, logging and ignoring failures
    pub(crate) fn start(service: &dyn WeavingTimerService) -> Self {
        match service.start() {
            Ok(timer) => Self(Some(timer)),
            Err(error) => {
                tracing::warn!(%error, "weaving timer failed to start");
                Self(None)
            }
        }
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if let Some(timer) = self.0.take() {
            timer.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingService;

    impl WeavingTimerService for FailingService {
        fn start(&self) -> Result<Box<dyn WeavingTimer>, String> {
            Err("timer backend unavailable".to_string())
        }
    }

    #[test]
    fn test_wrapped_name() {
        assert_eq!(wrapped_name("run", "legacyM", 0), "run$weft$timer$legacyM$0");
        assert_eq!(wrapped_name("run", "http request", 2), "run$weft$timer$http_request$2");
        assert!(is_timer_wrapper(&wrapped_name("run", "x", 0)));
        assert!(!is_timer_wrapper("run"));
    }

    #[test]
    fn test_stats_service_counts() {
        let stats = Arc::new(WeavingStats::new());
        for _ in 0..3 {
            let _guard = TimerGuard::start(&stats);
        }
        assert_eq!(stats.count(), 3);
    }

    #[test]
    fn test_failing_service_is_ignored() {
        let guard = TimerGuard::start(&FailingService);
        assert!(guard.0.is_none());
    }
}
