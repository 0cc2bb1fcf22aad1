use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::logging;
use crate::metrics::Metrics;

/// Quota signal reported by a single API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub remaining: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Continue,
    Pause,
}

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Pause once `remaining <= threshold`.
    pub threshold: u64,
    /// First wait before probing; doubles per attempt.
    pub pause: Duration,
    pub max_pause: Duration,
    /// Probes allowed before giving up with `RateLimitError::Exceeded`.
    pub max_probes: u32,
    /// Fraction of `total` that must be available again to resume.
    pub recovery_ratio: f64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            threshold: 10,
            pause: Duration::from_secs(60),
            max_pause: Duration::from_secs(600),
            max_probes: 30,
            recovery_ratio: 0.9,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit did not recover after {attempts} probe(s); last budget {last}")]
    Exceeded {
        attempts: u32,
        last: BudgetDisplay,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct BudgetDisplay(pub Option<RateBudget>);

impl fmt::Display for BudgetDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(b) => write!(f, "{}/{}", b.remaining, b.total),
            None => f.write_str("unknown"),
        }
    }
}

impl RateLimitPolicy {
    pub fn decide(&self, budget: Option<RateBudget>) -> RateDecision {
        match budget {
            Some(b) if b.remaining <= self.threshold => RateDecision::Pause,
            _ => RateDecision::Continue,
        }
    }

    pub fn recovered(&self, budget: RateBudget) -> bool {
        budget.remaining as f64 >= self.recovery_ratio * budget.total as f64
    }

    pub fn pause_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.min(16);
        self.pause.saturating_mul(factor).min(self.max_pause)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    metrics: Arc<Metrics>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, metrics: Arc<Metrics>) -> Self {
        Self { policy, metrics }
    }

    /// Consulted after every API response. Returns immediately when the budget
    /// is healthy; otherwise blocks, probing until the quota recovers or the
    /// probe allowance runs out.
    pub fn after_response<P, E>(
        &self,
        budget: Option<RateBudget>,
        probe: P,
    ) -> Result<(), RateLimitError>
    where
        P: FnMut() -> Result<Option<RateBudget>, E>,
        E: fmt::Display,
    {
        if self.policy.decide(budget) == RateDecision::Continue {
            return Ok(());
        }

        self.metrics.inc_rate_limit_pause();
        logging::warn(format!(
            "rate limit low ({}), pausing until {:.0}% of quota is available",
            BudgetDisplay(budget),
            self.policy.recovery_ratio * 100.0
        ));
        self.wait_for_recovery(budget, probe)
    }

    /// Sleeps and probes with a doubling pause until the quota recovers. A
    /// failed probe or one without budget headers still uses up an attempt.
    pub fn wait_for_recovery<P, E>(
        &self,
        budget: Option<RateBudget>,
        mut probe: P,
    ) -> Result<(), RateLimitError>
    where
        P: FnMut() -> Result<Option<RateBudget>, E>,
        E: fmt::Display,
    {
        let mut last = budget;
        for attempt in 0..self.policy.max_probes {
            let wait = self.policy.pause_for_attempt(attempt);
            logging::debug(format!(
                "rate limit probe {} of {} in {:?}",
                attempt + 1,
                self.policy.max_probes,
                wait
            ));
            thread::sleep(wait);

            match probe() {
                Ok(Some(current)) => {
                    last = Some(current);
                    if self.policy.recovered(current) {
                        logging::info(format!(
                            "rate limit recovered ({}), resuming",
                            BudgetDisplay(last)
                        ));
                        return Ok(());
                    }
                }
                Ok(None) => {
                    logging::debug("rate limit probe returned no budget headers");
                }
                Err(err) => {
                    logging::warn(format!("rate limit probe failed: {}", err));
                }
            }
        }

        Err(RateLimitError::Exceeded {
            attempts: self.policy.max_probes,
            last: BudgetDisplay(last),
        })
    }
}
