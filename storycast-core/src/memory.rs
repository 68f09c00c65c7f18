//! Resource estimate and admission policy for concurrent renderers.
//!
//! Every preview sandbox is a full renderer; running too many of them
//! next to a large deck exhausts the host. The estimate is linear:
//!
//! ```text
//! usage = targets × base_cost_per_target + (chars / 1000) × cost_per_1000_chars
//!
//!   0 ──── normal ──── warning_limit ──── warning ──── hard_limit ──── critical
//! ```
//!
//! Admission is decided *before* a target is added, so a target never
//! flaps on and off around the limit.

use serde::{Deserialize, Serialize};

pub const BASE_COST_PER_TARGET: f64 = 50.0;
pub const COST_PER_1000_CHARS: f64 = 5.0;
pub const WARNING_LIMIT: f64 = 250.0;
pub const HARD_LIMIT: f64 = 350.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Normal,
    Warning,
    Critical,
}

/// Derived usage report. Recomputed on demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEstimate {
    pub estimated_usage: f64,
    pub status: MemoryStatus,
    pub percentage_of_limit: f64,
}

/// Outcome of asking whether one more target fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionCheck {
    pub allowed: bool,
    pub would_warn: bool,
    pub would_exceed: bool,
    /// Estimate with the extra target included
    pub projected: f64,
}

/// Cost model and limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudget {
    pub base_cost_per_target: f64,
    pub cost_per_1000_chars: f64,
    pub warning_limit: f64,
    pub hard_limit: f64,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            base_cost_per_target: BASE_COST_PER_TARGET,
            cost_per_1000_chars: COST_PER_1000_CHARS,
            warning_limit: WARNING_LIMIT,
            hard_limit: HARD_LIMIT,
        }
    }
}

impl MemoryBudget {
    fn content_cost(&self, content_chars: usize) -> f64 {
        (content_chars as f64 / 1000.0) * self.cost_per_1000_chars
    }

    pub fn estimate(&self, target_count: usize, content_chars: usize) -> f64 {
        target_count as f64 * self.base_cost_per_target + self.content_cost(content_chars)
    }

    pub fn classify(&self, estimate: f64) -> MemoryStatus {
        if estimate < self.warning_limit {
            MemoryStatus::Normal
        } else if estimate < self.hard_limit {
            MemoryStatus::Warning
        } else {
            MemoryStatus::Critical
        }
    }

    /// Full usage report for the given load.
    pub fn usage(&self, target_count: usize, content_chars: usize) -> MemoryEstimate {
        let estimated_usage = self.estimate(target_count, content_chars);
        MemoryEstimate {
            estimated_usage,
            status: self.classify(estimated_usage),
            percentage_of_limit: estimated_usage / self.hard_limit * 100.0,
        }
    }

    /// Would `current_count + 1` targets still fit?
    ///
    /// The first target is always allowed, whatever the content size.
    pub fn can_admit_one_more(&self, current_count: usize, content_chars: usize) -> AdmissionCheck {
        let next = current_count.saturating_add(1);
        let projected = self.estimate(next, content_chars);
        let would_exceed = projected >= self.hard_limit;
        let check = AdmissionCheck {
            allowed: !would_exceed || current_count == 0,
            would_warn: projected >= self.warning_limit,
            would_exceed,
            projected,
        };
        if !check.allowed {
            log::debug!(
                "Admission refused: {next} targets would use {projected:.1} of {:.1}",
                self.hard_limit
            );
        }
        check
    }

    /// Largest target count whose estimate stays strictly under the hard
    /// limit, never less than 1.
    pub fn max_admissible(&self, content_chars: usize) -> usize {
        if self.base_cost_per_target <= 0.0 {
            return usize::MAX;
        }
        let headroom = self.hard_limit - self.content_cost(content_chars);
        if headroom <= 0.0 {
            return 1;
        }

        // n × base < headroom  ⇔  n < headroom / base
        let mut n = ((headroom / self.base_cost_per_target).ceil() as usize).saturating_sub(1);
        // Settle float rounding against the same comparison admission uses.
        while n > 0 && self.estimate(n, content_chars) >= self.hard_limit {
            n -= 1;
        }
        while n < usize::MAX && self.estimate(n + 1, content_chars) < self.hard_limit {
            n += 1;
        }
        n.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_targets_no_content_is_normal() {
        let budget = MemoryBudget::default();
        let usage = budget.usage(2, 0);
        assert_eq!(usage.estimated_usage, 100.0);
        assert_eq!(usage.status, MemoryStatus::Normal);
    }

    #[test]
    fn test_five_targets_ten_thousand_chars_warns() {
        let budget = MemoryBudget::default();
        let usage = budget.usage(5, 10_000);
        assert_eq!(usage.estimated_usage, 300.0);
        assert_eq!(usage.status, MemoryStatus::Warning);
        assert!((usage.percentage_of_limit - 300.0 / 350.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_classify_boundaries() {
        let budget = MemoryBudget::default();
        assert_eq!(budget.classify(0.0), MemoryStatus::Normal);
        assert_eq!(budget.classify(249.9), MemoryStatus::Normal);
        assert_eq!(budget.classify(250.0), MemoryStatus::Warning);
        assert_eq!(budget.classify(349.9), MemoryStatus::Warning);
        assert_eq!(budget.classify(350.0), MemoryStatus::Critical);
    }

    #[test]
    fn test_can_admit_one_more() {
        let budget = MemoryBudget::default();

        let check = budget.can_admit_one_more(3, 0);
        assert!(check.allowed);
        assert!(!check.would_warn);
        assert_eq!(check.projected, 200.0);

        let check = budget.can_admit_one_more(4, 0);
        assert!(check.allowed);
        assert!(check.would_warn);

        let check = budget.can_admit_one_more(6, 0);
        assert!(!check.allowed);
        assert!(check.would_exceed);
        assert_eq!(check.projected, 350.0);
    }

    #[test]
    fn test_first_target_always_admitted() {
        let budget = MemoryBudget::default();
        let check = budget.can_admit_one_more(0, 5_000_000);
        assert!(check.allowed);
        assert!(check.would_exceed);
        assert_eq!(budget.max_admissible(5_000_000), 1);
    }

    #[test]
    fn test_max_admissible_exact_division() {
        let budget = MemoryBudget::default();
        // 7 × 50 = 350 touches the limit, so only 6 fit.
        assert_eq!(budget.max_admissible(0), 6);
        // 10k chars cost 50: 5 × 50 + 50 = 300 fits, 6 × 50 + 50 = 350 does not.
        assert_eq!(budget.max_admissible(10_000), 5);
    }

    #[test]
    fn test_max_admissible_boundary_is_exact() {
        let budget = MemoryBudget::default();
        for chars in (0..200_000).step_by(777) {
            let max = budget.max_admissible(chars);
            assert!(max >= 1);
            if budget.estimate(max, chars) < budget.hard_limit {
                assert!(
                    budget.can_admit_one_more(max - 1, chars).allowed,
                    "{max} targets should fit with {chars} chars"
                );
                assert!(
                    !budget.can_admit_one_more(max, chars).allowed,
                    "{} targets should not fit with {chars} chars",
                    max + 1
                );
            }
        }
    }

    #[test]
    fn test_custom_budget() {
        let budget = MemoryBudget {
            base_cost_per_target: 10.0,
            cost_per_1000_chars: 1.0,
            warning_limit: 50.0,
            hard_limit: 100.0,
        };
        assert_eq!(budget.max_admissible(0), 9);
        assert_eq!(budget.max_admissible(15_000), 8);
    }

    #[test]
    fn test_extreme_counts_do_not_overflow() {
        let budget = MemoryBudget::default();
        let check = budget.can_admit_one_more(usize::MAX, 0);
        assert!(!check.allowed);
        assert!(check.would_exceed);

        let negligible = MemoryBudget {
            base_cost_per_target: 1e-300,
            ..MemoryBudget::default()
        };
        assert_eq!(negligible.max_admissible(0), usize::MAX);
        assert!(negligible.can_admit_one_more(1_000_000, 0).allowed);
    }
}
