use crate::config::SearchConfig;

/// Search parameters that move from exploration to exploitation as the budget is consumed.
///
/// Every value interpolates linearly from its start value at budget fraction 0
/// to its end value at the focused-search activation fraction, and stays at
/// the end value afterwards.
#[derive(Debug, Clone)]
pub struct AdaptiveParameterControl {
    focused_search_activation_time: f64,
    prob_of_random_sampling: f64,
    start_number_of_mutations: usize,
    end_number_of_mutations: usize,
    archive_target_limit: usize,
}

impl AdaptiveParameterControl {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            focused_search_activation_time: config.focused_search_activation_time,
            prob_of_random_sampling: config.prob_of_random_sampling,
            start_number_of_mutations: config.start_number_of_mutations,
            end_number_of_mutations: config.end_number_of_mutations,
            archive_target_limit: config.archive_target_limit,
        }
    }

    pub fn is_focused_search(&self, used_budget: f64) -> bool {
        used_budget.clamp(0.0, 1.0) >= self.focused_search_activation_time
    }

    /// Share of the way from start to end values, in [0, 1]
    fn progress(&self, used_budget: f64) -> f64 {
        let passed = used_budget.clamp(0.0, 1.0);
        let threshold = self.focused_search_activation_time;
        if threshold <= 0.0 || passed >= threshold {
            1.0
        } else {
            passed / threshold
        }
    }

    pub fn exploratory_value(&self, start: f64, end: f64, used_budget: f64) -> f64 {
        start + (end - start) * self.progress(used_budget)
    }

    pub fn exploratory_int(&self, start: usize, end: usize, used_budget: f64) -> usize {
        let progress = self.progress(used_budget);
        if progress >= 1.0 {
            return end;
        }
        let delta = (end as f64 - start as f64) * progress;
        (start as f64 + delta.trunc()) as usize
    }

    pub fn probability_of_random_sampling(&self, used_budget: f64) -> f64 {
        self.exploratory_value(self.prob_of_random_sampling, 0.0, used_budget)
    }

    pub fn number_of_mutations(&self, used_budget: f64) -> usize {
        self.exploratory_int(
            self.start_number_of_mutations,
            self.end_number_of_mutations,
            used_budget,
        )
    }

    pub fn archive_target_limit(&self, used_budget: f64) -> usize {
        self.exploratory_int(self.archive_target_limit, 1, used_budget)
    }
}
