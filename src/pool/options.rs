//! Pool sizing, deadline and policy options.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Default per-assignment deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest per-assignment deadline; longer values are clamped.
///
/// The deadline timer wheel covers a little over two years.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 86400);

/// What happens to a worker whose assignment exceeded its deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Return the worker to the idle tail and keep using it.
    #[default]
    Reclaim,
    /// Destroy the worker and create a fresh one in its place.
    Replace,
}

/// What happens to a worker that reported a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Destroy the worker and create a replacement.
    #[default]
    Replace,
    /// Destroy the worker; the pool shrinks by one.
    Retire,
}

/// Pool options, immutable once the pool is built.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Pool name for logging and thread naming.
    pub name: String,
    /// Requested worker count (None = available parallelism).
    pub base_size: Option<NonZeroUsize>,
    /// Allow `base_size` above the available parallelism.
    pub oversubscribe: bool,
    /// Per-assignment deadline, at most [`MAX_TIMEOUT`].
    pub timeout: Duration,
    /// Pending queue capacity (None = unbounded).
    pub max_pending: Option<usize>,
    pub timeout_policy: TimeoutPolicy,
    pub fault_policy: FaultPolicy,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            base_size: None,
            oversubscribe: false,
            timeout: DEFAULT_TIMEOUT,
            max_pending: None,
            timeout_policy: TimeoutPolicy::default(),
            fault_policy: FaultPolicy::default(),
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the requested worker count (0 = available parallelism).
    pub fn with_base_size(mut self, size: usize) -> Self {
        self.base_size = NonZeroUsize::new(size);
        self
    }

    pub fn with_oversubscribe(mut self, oversubscribe: bool) -> Self {
        self.oversubscribe = oversubscribe;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(MAX_TIMEOUT);
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = Some(max_pending);
        self
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    /// Number of workers the pool starts with.
    ///
    /// `min(requested, available parallelism)` unless oversubscription is
    /// allowed, in which case the requested count is used as is.
    pub fn resolved_base_size(&self) -> usize {
        Self::resolve_base_size(self.base_size, self.oversubscribe, num_cpus::get())
    }

    fn resolve_base_size(
        requested: Option<NonZeroUsize>,
        oversubscribe: bool,
        parallelism: usize,
    ) -> usize {
        let parallelism = parallelism.max(1);
        match requested {
            None => parallelism,
            Some(n) if oversubscribe => n.get(),
            Some(n) => n.get().min(parallelism),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PoolOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert!(options.max_pending.is_none());
        assert_eq!(options.timeout_policy, TimeoutPolicy::Reclaim);
        assert_eq!(options.fault_policy, FaultPolicy::Replace);
        assert!(options.resolved_base_size() >= 1);
    }

    #[test]
    fn test_base_size_clamped_to_parallelism() {
        let eight = NonZeroUsize::new(8);
        assert_eq!(PoolOptions::resolve_base_size(eight, false, 4), 4);
        assert_eq!(PoolOptions::resolve_base_size(eight, true, 4), 8);
        assert_eq!(PoolOptions::resolve_base_size(NonZeroUsize::new(2), false, 4), 2);
        assert_eq!(PoolOptions::resolve_base_size(None, false, 6), 6);
    }

    #[test]
    fn test_timeout_clamped() {
        let options = PoolOptions::new().with_timeout(Duration::from_secs(5 * 365 * 86400));
        assert_eq!(options.timeout, MAX_TIMEOUT);

        let options = PoolOptions::new().with_timeout(Duration::from_millis(250));
        assert_eq!(options.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_base_size_means_auto() {
        let options = PoolOptions::new().with_base_size(0);
        assert!(options.base_size.is_none());
        assert_eq!(options.resolved_base_size(), num_cpus::get().max(1));
    }
}
