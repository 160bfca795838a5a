use super::mio::{ProgressCallback, SearchStatistics};
use std::sync::mpsc::Sender;

/// Prints progress to stdout
pub struct ConsoleProgressCallback {
    every: u64,
}

impl ConsoleProgressCallback {
    /// Report every `every` iterations
    pub fn new(every: u64) -> Self {
        Self { every: every.max(1) }
    }
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_sampled(&mut self, iteration: u64, covered_targets: usize) {
        if iteration % self.every == 0 {
            println!("Iteration {}: sampled, {} targets covered", iteration, covered_targets);
        }
    }

    fn on_mutated(&mut self, iteration: u64, mutations: usize, covered_targets: usize) {
        if iteration % self.every == 0 {
            println!(
                "Iteration {}: {} mutations, {} targets covered",
                iteration, mutations, covered_targets
            );
        }
    }

    fn on_focused_search_started(&mut self, used_budget: f64) {
        println!("Focused search started at {:.1}% of the budget", used_budget * 100.0);
    }

    fn on_search_complete(&mut self, stats: &SearchStatistics) {
        println!(
            "Search complete after {} iterations. Covered targets: {}, failed evaluations: {}",
            stats.iterations, stats.covered_targets, stats.failed_evaluations
        );
    }
}

/// Forwards progress to another thread
pub struct ChannelProgressCallback {
    sender: Sender<ProgressMessage>,
}

#[derive(Debug, Clone)]
pub enum ProgressMessage {
    Sampled { iteration: u64, covered_targets: usize },
    Mutated { iteration: u64, mutations: usize, covered_targets: usize },
    FocusedSearchStarted(f64),
    Complete(SearchStatistics),
}

impl ChannelProgressCallback {
    pub fn new(sender: Sender<ProgressMessage>) -> Self {
        Self { sender }
    }
}

impl ProgressCallback for ChannelProgressCallback {
    fn on_sampled(&mut self, iteration: u64, covered_targets: usize) {
        let _ = self.sender.send(ProgressMessage::Sampled {
            iteration,
            covered_targets,
        });
    }

    fn on_mutated(&mut self, iteration: u64, mutations: usize, covered_targets: usize) {
        let _ = self.sender.send(ProgressMessage::Mutated {
            iteration,
            mutations,
            covered_targets,
        });
    }

    fn on_focused_search_started(&mut self, used_budget: f64) {
        let _ = self.sender.send(ProgressMessage::FocusedSearchStarted(used_budget));
    }

    fn on_search_complete(&mut self, stats: &SearchStatistics) {
        let _ = self.sender.send(ProgressMessage::Complete(stats.clone()));
    }
}

/// Ignores all progress events
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_sampled(&mut self, _iteration: u64, _covered_targets: usize) {}
    fn on_mutated(&mut self, _iteration: u64, _mutations: usize, _covered_targets: usize) {}
    fn on_focused_search_started(&mut self, _used_budget: f64) {}
    fn on_search_complete(&mut self, _stats: &SearchStatistics) {}
}
