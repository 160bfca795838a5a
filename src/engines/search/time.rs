use crate::config::{SearchConfig, StoppingCriterion};
use chrono::{DateTime, Utc};
use log::trace;
use std::thread;
use std::time::{Duration, Instant};

/// Tracks how much of the search budget has been consumed
#[derive(Debug, Clone)]
pub struct SearchTimeController {
    criterion: StoppingCriterion,
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    evaluated_individuals: u64,
    evaluated_actions: u64,
    last_action_improvement: u64,
}

impl SearchTimeController {
    pub fn new(criterion: StoppingCriterion) -> Self {
        Self {
            criterion,
            started: None,
            started_at: None,
            evaluated_individuals: 0,
            evaluated_actions: 0,
            last_action_improvement: 0,
        }
    }

    pub fn start_search(&mut self) {
        self.started = Some(Instant::now());
        self.started_at = Some(Utc::now());
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn new_individual_evaluation(&mut self) {
        self.evaluated_individuals += 1;
    }

    pub fn new_action_evaluation(&mut self, actions: usize) {
        self.evaluated_actions += actions as u64;
    }

    /// Remember when the archive last improved
    pub fn report_improvement(&mut self) {
        self.last_action_improvement = self.evaluated_actions;
    }

    pub fn evaluated_individuals(&self) -> u64 {
        self.evaluated_individuals
    }

    pub fn evaluated_actions(&self) -> u64 {
        self.evaluated_actions
    }

    /// Actions evaluated since the archive last improved
    pub fn actions_since_last_improvement(&self) -> u64 {
        self.evaluated_actions - self.last_action_improvement
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Fraction of the budget used so far, in [0, 1]
    pub fn percentage_used_budget(&self) -> f64 {
        let used = match self.criterion {
            StoppingCriterion::Time { max_seconds } => self.elapsed_seconds() / max_seconds as f64,
            StoppingCriterion::FitnessEvaluations { max_action_evaluations } => {
                self.evaluated_actions as f64 / max_action_evaluations as f64
            }
        };
        used.clamp(0.0, 1.0)
    }

    pub fn should_continue_search(&self) -> bool {
        self.percentage_used_budget() < 1.0
    }
}

/// Spaces requests to the system under test evenly over time
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Option<Duration>,
    max_wait: Duration,
    next_allowed: Option<Instant>,
}

impl RateLimiter {
    /// `rate_per_minute` of 0 disables limiting
    pub fn new(rate_per_minute: u32, max_wait: Duration) -> Self {
        let interval = (rate_per_minute > 0).then(|| Duration::from_secs(60) / rate_per_minute);
        Self {
            interval,
            max_wait,
            next_allowed: None,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            config.rate_per_minute,
            Duration::from_millis(config.max_rate_limiter_wait_ms),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait until the next request is allowed, never longer than the configured bound.
    /// Returns how long the caller was suspended.
    pub fn acquire(&mut self) -> Duration {
        let Some(interval) = self.interval else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        let wait = self
            .next_allowed
            .map(|next| next.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
            .min(self.max_wait);
        if !wait.is_zero() {
            trace!("rate limiter waiting {:?}", wait);
            thread::sleep(wait);
        }
        self.next_allowed = Some(now + wait + interval);
        wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_budget() {
        let mut time = SearchTimeController::new(StoppingCriterion::FitnessEvaluations {
            max_action_evaluations: 10,
        });
        time.start_search();
        assert_eq!(time.percentage_used_budget(), 0.0);

        time.new_action_evaluation(4);
        time.new_individual_evaluation();
        assert!((time.percentage_used_budget() - 0.4).abs() < 1e-9);
        assert!(time.should_continue_search());

        time.report_improvement();
        time.new_action_evaluation(20);
        assert_eq!(time.percentage_used_budget(), 1.0);
        assert!(!time.should_continue_search());
        assert_eq!(time.actions_since_last_improvement(), 20);
        assert_eq!(time.evaluated_individuals(), 1);
    }

    #[test]
    fn test_disabled_rate_limiter_never_waits() {
        let mut limiter = RateLimiter::new(0, Duration::from_millis(100));
        assert!(!limiter.is_enabled());
        for _ in 0..5 {
            assert_eq!(limiter.acquire(), Duration::ZERO);
        }
    }

    #[test]
    fn test_rate_limiter_wait_is_bounded() {
        // one request per minute, but never wait more than 20ms
        let mut limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert_eq!(limiter.acquire(), Duration::ZERO);
        let waited = limiter.acquire();
        assert!(waited <= Duration::from_millis(20));
        assert!(waited > Duration::ZERO);
    }
}
