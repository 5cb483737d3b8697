//! Shared capacity pool that throttles retries across every call of a client.

use std::sync::atomic::{AtomicU32, Ordering};

/// Capacity drawn from the budget by one retried call.
pub const DEFAULT_RETRY_COST: u32 = 5;
/// Capacity returned by a call that succeeds without holding retry capacity.
pub const DEFAULT_SUCCESS_INCREMENT: u32 = 1;
/// Room for one hundred concurrent retries at the default cost.
pub const DEFAULT_MAX_RETRY_CAPACITY: i64 = (DEFAULT_RETRY_COST as i64) * 100;

#[derive(Debug)]
pub struct RetryBudget {
    max_capacity: Option<u32>,
    available: AtomicU32,
    success_increment: u32,
}

impl RetryBudget {
    /// A negative `max_capacity` builds an unbounded budget that never denies a retry.
    pub fn new(max_capacity: i64) -> Self {
        if max_capacity < 0 {
            return Self::unbounded();
        }
        let max_capacity = u32::try_from(max_capacity).unwrap_or(u32::MAX);
        Self {
            max_capacity: Some(max_capacity),
            available: AtomicU32::new(max_capacity),
            success_increment: DEFAULT_SUCCESS_INCREMENT,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            max_capacity: None,
            available: AtomicU32::new(0),
            success_increment: DEFAULT_SUCCESS_INCREMENT,
        }
    }

    pub fn with_success_increment(mut self, success_increment: u32) -> Self {
        self.success_increment = success_increment;
        self
    }

    pub fn max_capacity(&self) -> Option<u32> {
        self.max_capacity
    }

    pub fn success_increment(&self) -> u32 {
        self.success_increment
    }

    /// Takes `cost` units when that much capacity is available; leaves the pool untouched otherwise.
    pub fn acquire(&self, cost: u32) -> bool {
        if self.max_capacity.is_none() {
            return true;
        }
        if cost == 0 {
            return true;
        }

        let mut current = self.available.load(Ordering::Acquire);
        loop {
            if current < cost {
                return false;
            }
            match self.available.compare_exchange_weak(
                current,
                current - cost,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn release(&self) {
        self.release_cost(self.success_increment);
    }

    pub fn release_cost(&self, cost: u32) {
        let Some(max_capacity) = self.max_capacity else {
            return;
        };
        if cost == 0 {
            return;
        }

        let mut current = self.available.load(Ordering::Acquire);
        loop {
            if current >= max_capacity {
                return;
            }
            let next = current.saturating_add(cost).min(max_capacity);
            match self.available.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn available_capacity(&self) -> Option<u32> {
        self.max_capacity
            .map(|_| self.available.load(Ordering::Acquire))
    }

    pub fn consumed_capacity(&self) -> u32 {
        match self.max_capacity {
            Some(max_capacity) => max_capacity - self.available.load(Ordering::Acquire),
            None => 0,
        }
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn acquire_at_zero_fails_without_mutating_state() {
        let budget = RetryBudget::new(5);
        assert!(budget.acquire(5));
        assert_eq!(budget.available_capacity(), Some(0));

        assert!(!budget.acquire(5));
        assert!(!budget.acquire(1));
        assert_eq!(budget.available_capacity(), Some(0));
        assert_eq!(budget.consumed_capacity(), 5);
    }

    #[test]
    fn partial_capacity_is_not_taken() {
        let budget = RetryBudget::new(7);
        assert!(budget.acquire(5));
        assert!(!budget.acquire(5));
        assert_eq!(budget.available_capacity(), Some(2));
    }

    #[test]
    fn release_is_capped_at_max_capacity() {
        let budget = RetryBudget::new(10);
        budget.release_cost(5);
        budget.release();
        assert_eq!(budget.available_capacity(), Some(10));

        assert!(budget.acquire(5));
        budget.release_cost(50);
        assert_eq!(budget.available_capacity(), Some(10));
    }

    #[test]
    fn success_increment_refills_slowly() {
        let budget = RetryBudget::new(10).with_success_increment(2);
        assert!(budget.acquire(10));
        budget.release();
        budget.release();
        assert_eq!(budget.available_capacity(), Some(4));
    }

    #[test]
    fn negative_capacity_is_unbounded() {
        let budget = RetryBudget::new(-1);
        assert_eq!(budget.max_capacity(), None);
        for _ in 0..1_000 {
            assert!(budget.acquire(DEFAULT_RETRY_COST));
        }
        budget.release();
        assert_eq!(budget.available_capacity(), None);
        assert_eq!(budget.consumed_capacity(), 0);
    }

    #[test]
    fn concurrent_acquire_never_overdraws() {
        let budget = Arc::new(RetryBudget::new(100));
        let handles = (0..8)
            .map(|_| {
                let budget = Arc::clone(&budget);
                thread::spawn(move || (0..50).filter(|_| budget.acquire(5)).count())
            })
            .collect::<Vec<_>>();

        let granted: usize = handles
            .into_iter()
            .map(|handle| handle.join().expect("worker should not panic"))
            .sum();
        assert_eq!(granted, 20);
        assert_eq!(budget.available_capacity(), Some(0));
    }
}
