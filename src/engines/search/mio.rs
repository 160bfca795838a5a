use super::apc::AdaptiveParameterControl;
use super::archive::Archive;
use super::solution::Solution;
use super::time::{RateLimiter, SearchTimeController};
use crate::config::AppConfig;
use crate::engines::mutation::impact::ImpactInfo;
use crate::engines::mutation::resource::ResourceStructureMutator;
use crate::engines::mutation::standard::{Evaluator, Mutator};
use crate::engines::mutation::weight_control::MutationWeightControl;
use crate::error::Result;
use crate::genome::{EvaluatedIndividual, Individual};
use crate::problem::{DependencyManager, FitnessFunction, ResourceManager, Sampler};
use crate::types::TargetId;
use crate::utils::randomness::Randomness;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub trait ProgressCallback: Send {
    fn on_sampled(&mut self, iteration: u64, covered_targets: usize);
    fn on_mutated(&mut self, iteration: u64, mutations: usize, covered_targets: usize);
    fn on_focused_search_started(&mut self, used_budget: f64);
    fn on_search_complete(&mut self, stats: &SearchStatistics);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStatistics {
    pub iterations: u64,
    pub samples: u64,
    /// Evaluated mutants
    pub mutations: u64,
    pub evaluations: u64,
    pub failed_evaluations: u64,
    pub evaluated_actions: u64,
    pub covered_targets: usize,
    pub reached_targets: usize,
    pub seeded_covered_targets: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Many Independent Objective search: alternate between sampling fresh
/// individuals and mutating archived ones until the budget is used.
pub struct Mio<S: Sampler, F: FitnessFunction> {
    config: AppConfig,
    sampler: S,
    fitness: F,
    mutator: Mutator,
    apc: AdaptiveParameterControl,
    archive: Archive,
    time: SearchTimeController,
    limiter: RateLimiter,
    rng: Randomness,
    stats: SearchStatistics,
    in_focused_search: bool,
}

impl<S: Sampler, F: FitnessFunction> Mio<S, F> {
    pub fn new(config: AppConfig, sampler: S, fitness: F) -> Result<Self> {
        config.validate()?;
        let apc = AdaptiveParameterControl::new(&config.search);
        Ok(Self {
            mutator: Mutator::new(config.mutation.clone(), None),
            archive: Archive::new(config.search.archive_target_limit),
            time: SearchTimeController::new(config.search.stopping_criterion.clone()),
            limiter: RateLimiter::from_config(&config.search),
            rng: Randomness::new(config.search.seed),
            apc,
            sampler,
            fitness,
            config,
            stats: SearchStatistics::default(),
            in_focused_search: false,
        })
    }

    /// Enable structural mutations over the resources of the system under test
    pub fn with_structure_mutation(
        mut self,
        resources: Box<dyn ResourceManager>,
        dependencies: Box<dyn DependencyManager>,
    ) -> Self {
        let structure = ResourceStructureMutator::new(
            self.config.resource.clone(),
            MutationWeightControl::new(self.config.mutation.impact_weighting),
            resources,
            dependencies,
        );
        self.mutator = Mutator::new(self.config.mutation.clone(), Some(structure));
        self
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn statistics(&self) -> &SearchStatistics {
        &self.stats
    }

    pub fn time(&self) -> &SearchTimeController {
        &self.time
    }

    pub fn is_focused_search(&self) -> bool {
        self.in_focused_search
    }

    fn tracks_impact(&self) -> bool {
        self.config.mutation.enable_adaptive_gene_selection
            || self.config.resource.enable_adaptive_resource_structure_mutation
    }

    pub fn run<C: ProgressCallback>(&mut self, mut callback: C) -> Result<Solution> {
        self.time.start_search();
        self.stats.started_at = self.time.started_at();
        info!(
            "Starting search with budget {:?}",
            self.config.search.stopping_criterion
        );

        while self.time.should_continue_search() {
            self.search_once(&mut callback)?;
        }

        self.stats.finished_at = Some(Utc::now());
        self.stats.evaluated_actions = self.time.evaluated_actions();
        self.stats.covered_targets = self.archive.number_of_covered_targets();
        self.stats.reached_targets = self.archive.number_of_reached_targets();
        self.stats.seeded_covered_targets = self.archive.seeded_covered_targets();
        info!(
            "Search finished: {} iterations, {} evaluations ({} failed), {} targets covered",
            self.stats.iterations,
            self.stats.evaluations,
            self.stats.failed_evaluations,
            self.stats.covered_targets
        );
        callback.on_search_complete(&self.stats);

        self.archive.extract_solution()
    }

    /// One iteration: either sample and evaluate a new individual, or mutate one from the archive
    pub fn search_once<C: ProgressCallback>(&mut self, callback: &mut C) -> Result<()> {
        self.stats.iterations += 1;
        let used = self.time.percentage_used_budget();
        if !self.in_focused_search && self.apc.is_focused_search(used) {
            info!("Starting focused search at {:.1}% of the budget", used * 100.0);
            self.in_focused_search = true;
            callback.on_focused_search_started(used);
        }
        self.archive.shrink_to(self.apc.archive_target_limit(used));

        let targets: BTreeSet<TargetId> = self.archive.not_covered_targets().into_iter().collect();
        let before = self.progress_marker();

        let sample = self.archive.is_empty()
            || self.sampler.has_special_init()
            || self.rng.next_bool(self.apc.probability_of_random_sampling(used));

        if sample {
            let individual = self.sampler.sample(&mut self.rng)?;
            self.stats.samples += 1;
            let mut evaluator = FitnessEvaluator {
                fitness: &mut self.fitness,
                time: &mut self.time,
                limiter: &mut self.limiter,
                stats: &mut self.stats,
                targets: &targets,
            };
            if let Some(mut evaluated) = evaluator.evaluate(individual) {
                if self.tracks_impact() {
                    evaluated.impact = Some(ImpactInfo::new());
                }
                self.archive.add_if_needed(&evaluated)?;
                self.sampler.feedback(&evaluated);
            }
            if self.sampler.is_last_seeded_individual() && self.archive.seeded_covered_targets().is_none() {
                self.archive.record_seeded_coverage();
            }
            callback.on_sampled(self.stats.iterations, self.archive.number_of_covered_targets());
        } else {
            let current = self.archive.sample_individual(&mut self.rng)?;
            let upper_bound = self.apc.number_of_mutations(used);
            let evaluations_before = self.stats.evaluations;
            let mut evaluator = FitnessEvaluator {
                fitness: &mut self.fitness,
                time: &mut self.time,
                limiter: &mut self.limiter,
                stats: &mut self.stats,
                targets: &targets,
            };
            self.mutator.mutate_and_save(
                upper_bound,
                current,
                &mut self.archive,
                &mut evaluator,
                self.in_focused_search,
                &mut self.rng,
            )?;
            let mutants = (self.stats.evaluations - evaluations_before) as usize;
            self.stats.mutations += mutants as u64;
            callback.on_mutated(self.stats.iterations, mutants, self.archive.number_of_covered_targets());
        }

        if self.progress_marker() > before {
            self.time.report_improvement();
        }
        Ok(())
    }

    fn progress_marker(&self) -> (usize, usize) {
        (
            self.archive.number_of_covered_targets(),
            self.archive.number_of_reached_targets(),
        )
    }
}

/// Runs individuals through the fitness function while charging the budget
struct FitnessEvaluator<'a, F: FitnessFunction> {
    fitness: &'a mut F,
    time: &'a mut SearchTimeController,
    limiter: &'a mut RateLimiter,
    stats: &'a mut SearchStatistics,
    targets: &'a BTreeSet<TargetId>,
}

impl<'a, F: FitnessFunction> Evaluator for FitnessEvaluator<'a, F> {
    fn should_continue_search(&self) -> bool {
        self.time.should_continue_search()
    }

    fn evaluate(&mut self, individual: Individual) -> Option<EvaluatedIndividual> {
        let actions = individual.size().max(1);
        for _ in 0..actions {
            self.limiter.acquire();
        }
        self.time.new_individual_evaluation();
        self.time.new_action_evaluation(actions);
        self.stats.evaluations += 1;

        match self.fitness.calculate_coverage(individual, self.targets) {
            Some(evaluated) => {
                debug!(
                    "evaluated individual of size {} reaching {} targets",
                    evaluated.size(),
                    evaluated.fitness.reached_targets().count()
                );
                Some(evaluated)
            }
            None => {
                self.stats.failed_evaluations += 1;
                warn!("evaluation of an individual with {} actions failed", actions);
                None
            }
        }
    }
}
