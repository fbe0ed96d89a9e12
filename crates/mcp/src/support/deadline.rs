#![forbid(unsafe_code)]

use super::errors::ToolError;
use serde_json::json;
use std::time::{Duration, Instant};

/// Monotonic per-operation budget. Checked between phases of multi-step
/// work; expiry aborts before the next phase starts, never mid-write.
pub(crate) struct Deadline {
    started: Instant,
    budget: Duration,
    label: &'static str,
}

impl Deadline {
    pub(crate) fn new(label: &'static str, budget_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            budget: Duration::from_millis(budget_ms),
            label,
        }
    }

    pub(crate) fn check(&self) -> Result<(), ToolError> {
        let elapsed = self.started.elapsed();
        if elapsed > self.budget {
            return Err(ToolError::with_details(
                "timeout",
                format!(
                    "{} exceeded its {} ms budget",
                    self.label,
                    self.budget.as_millis()
                ),
                json!({
                    "elapsed_ms": elapsed.as_millis() as u64,
                    "budget_ms": self.budget.as_millis() as u64,
                }),
            ));
        }
        Ok(())
    }

    pub(crate) fn expired(&self) -> bool {
        self.started.elapsed() > self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_passes_and_zero_budget_expires() {
        assert!(Deadline::new("planning", 30_000).check().is_ok());
        let spent = Deadline::new("planning", 0);
        std::thread::sleep(Duration::from_millis(2));
        let err = spent.check().expect_err("budget of zero");
        assert_eq!(err.code, "timeout");
        assert!(spent.expired());
    }
}
