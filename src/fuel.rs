//! Optional fuel tracker: a shared counter every novelty insertion or range scan
//! increments; exceeding a budget raises a fatal error (spec §5, §9).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::DbError;

/// A process-wide (or per-staged-DB) fuel budget. Absent by default — no behavior
/// change when a pipeline is built without one (spec SPEC_FULL "Fuel tracker").
#[derive(Debug, Clone)]
pub struct FuelTracker {
    spent: Arc<AtomicU64>,
    budget: u64,
}

impl FuelTracker {
    pub fn new(budget: u64) -> Self {
        Self {
            spent: Arc::new(AtomicU64::new(0)),
            budget,
        }
    }

    /// Charge `amount` units of fuel, returning an error if the budget is exceeded.
    pub fn charge(&self, amount: u64) -> Result<(), DbError> {
        let spent = self.spent.fetch_add(amount, Ordering::SeqCst) + amount;
        if spent > self.budget {
            return Err(DbError::unexpected(format!(
                "fuel budget exceeded: spent {spent} of {budget}",
                budget = self.budget
            )));
        }
        Ok(())
    }

    pub fn spent(&self) -> u64 {
        self.spent.load(Ordering::SeqCst)
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_within_budget_succeeds() {
        let tracker = FuelTracker::new(100);
        assert!(tracker.charge(40).is_ok());
        assert!(tracker.charge(40).is_ok());
        assert_eq!(tracker.spent(), 80);
    }

    #[test]
    fn charge_past_budget_fails() {
        let tracker = FuelTracker::new(10);
        assert!(tracker.charge(5).is_ok());
        assert!(tracker.charge(10).is_err());
    }
}
