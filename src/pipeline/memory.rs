//! Cache admission policy.
//!
//! Whether a filter may keep its output is decided per refresh from the
//! filter's size estimate and a budget taken as a percentage of available
//! memory. Unknown estimates are never cached.

use sysinfo::System;

/// Source of the available-memory figure.
#[cfg_attr(test, mockall::automock)]
pub trait MemoryProbe {
    /// Bytes currently available, `None` if it cannot be determined.
    fn available_bytes(&self) -> Option<u64>;
}

/// Reads available memory from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_bytes(&self) -> Option<u64> {
        let mut sys = System::new();
        sys.refresh_memory();
        match sys.available_memory() {
            0 => None,
            bytes => Some(bytes),
        }
    }
}

/// Fixed figure, used when configuration overrides the system value.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.0)
    }
}

/// When filters may cache their outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheStrategy {
    Never,
    /// Cache while the outputs cached during one refresh stay under
    /// `max_percent` of available memory.
    MemoryBudget { max_percent: f32 },
}

impl Default for CacheStrategy {
    fn default() -> Self {
        CacheStrategy::MemoryBudget { max_percent: 50.0 }
    }
}

pub struct CachePolicy {
    strategy: CacheStrategy,
    probe: Box<dyn MemoryProbe + Send>,
    /// Bytes admitted since `begin_refresh`.
    committed: u64,
    /// Budget fixed at `begin_refresh`.
    budget: u64,
}

impl CachePolicy {
    pub fn new(strategy: CacheStrategy, probe: Box<dyn MemoryProbe + Send>) -> Self {
        Self {
            strategy,
            probe,
            committed: 0,
            budget: 0,
        }
    }

    pub fn never() -> Self {
        Self::new(CacheStrategy::Never, Box::new(FixedMemory(0)))
    }

    /// Budget policy against the system's available memory.
    pub fn system(max_percent: f32) -> Self {
        Self::new(
            CacheStrategy::MemoryBudget { max_percent },
            Box::new(SystemMemory),
        )
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    /// Sample available memory once for the coming refresh.
    pub fn begin_refresh(&mut self) {
        self.committed = 0;
        self.budget = match self.strategy {
            CacheStrategy::Never => 0,
            CacheStrategy::MemoryBudget { max_percent } => {
                let available = self.probe.available_bytes().unwrap_or(0);
                (available as f64 * (max_percent.clamp(0.0, 100.0) as f64 / 100.0)) as u64
            }
        };
    }

    /// Admit `estimate` bytes if they fit in what is left of the budget.
    pub fn should_cache(&mut self, estimate: Option<u64>) -> bool {
        if self.strategy == CacheStrategy::Never {
            return false;
        }
        let Some(bytes) = estimate else {
            return false;
        };
        match self.committed.checked_add(bytes) {
            Some(total) if total <= self.budget => {
                self.committed = total;
                true
            }
            _ => false,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.budget.saturating_sub(self.committed)
    }
}

impl std::fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePolicy")
            .field("strategy", &self.strategy)
            .field("budget", &self.budget)
            .field("committed", &self.committed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_a_share_of_available_memory() {
        let mut probe = MockMemoryProbe::new();
        probe.expect_available_bytes().times(1).return_const(Some(1000u64));
        let mut policy = CachePolicy::new(
            CacheStrategy::MemoryBudget { max_percent: 10.0 },
            Box::new(probe),
        );
        policy.begin_refresh();
        assert!(policy.should_cache(Some(60)));
        assert!(!policy.should_cache(Some(60)));
        assert!(policy.should_cache(Some(40)));
        assert_eq!(policy.remaining(), 0);
    }

    #[test]
    fn test_unknown_estimate_is_not_cached() {
        let mut policy = CachePolicy::new(
            CacheStrategy::MemoryBudget { max_percent: 100.0 },
            Box::new(FixedMemory(u64::MAX)),
        );
        policy.begin_refresh();
        assert!(!policy.should_cache(None));
        assert!(policy.should_cache(Some(1)));
    }

    #[test]
    fn test_unknown_available_memory_disables_caching() {
        let mut probe = MockMemoryProbe::new();
        probe.expect_available_bytes().return_const(None::<u64>);
        let mut policy = CachePolicy::new(CacheStrategy::default(), Box::new(probe));
        policy.begin_refresh();
        assert!(!policy.should_cache(Some(1)));

        let mut never = CachePolicy::never();
        never.begin_refresh();
        assert!(!never.should_cache(Some(0)));
    }
}
