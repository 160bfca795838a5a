//! In-process pet store used by the binary to drive the engine without a network.

use apievo::error::Result;
use apievo::genome::{Action, EvaluatedIndividual, FitnessValue, Gene, GeneKind, Individual, Param};
use apievo::problem::{
    DependencyGraph, FitnessFunction, ResourceCluster, ResourceManager, ResourceNode, Sampler,
    TableSchema,
};
use apievo::types::TargetId;
use apievo::utils::randomness::Randomness;
use std::collections::{BTreeMap, BTreeSet};

fn owner_post() -> Action {
    Action::new(
        "POST:/owners",
        vec![
            Param::new("name", Gene::string("name", 0, 12)),
            Param::new("age", Gene::integer("age", 0, 120)),
        ],
    )
}

fn pet_post() -> Action {
    Action::new(
        "POST:/owners/{id}/pets",
        vec![
            Param::new("owner", Gene::integer("owner", 1, 50)),
            Param::new(
                "species",
                Gene::enumeration("species", vec!["cat".into(), "dog".into(), "parrot".into()]),
            ),
            Param::new("age", Gene::integer("age", 0, 40)),
        ],
    )
}

fn pet_search() -> Action {
    Action::new(
        "GET:/pets",
        vec![
            Param::new("min_age", Gene::integer("min_age", 0, 40)),
            Param::new("max_age", Gene::integer("max_age", 0, 40)),
            Param::new("born_after", Gene::optional("born_after", Gene::date("born_after"))),
        ],
    )
}

pub fn cluster() -> ResourceCluster {
    let mut cluster = ResourceCluster::new();
    cluster.add_node(
        ResourceNode::new("/owners")
            .with_creation_template("POST", vec![owner_post()])
            .with_template(
                "POST-GET",
                vec![
                    owner_post(),
                    Action::new("GET:/owners/{id}", vec![Param::new("id", Gene::integer("id", 1, 50))]),
                ],
            ),
    );
    cluster.add_node(
        ResourceNode::new("/owners/{id}/pets")
            .depends_on("/owners")
            .with_creation_template("POST", vec![pet_post()])
            .with_template(
                "POST-DELETE",
                vec![
                    pet_post(),
                    Action::new(
                        "DELETE:/owners/{id}/pets/{pet}",
                        vec![Param::new("pet", Gene::integer("pet", 1, 100))],
                    ),
                ],
            ),
    );
    cluster.add_node(ResourceNode::new("/pets").with_template("GET", vec![pet_search()]));

    cluster.add_table(TableSchema::new(
        "owners",
        vec![
            Gene::sql_primary_key("id", "owners", Gene::integer("id", 1, 10_000)),
            Gene::string("name", 1, 12),
        ],
    ));
    cluster.add_table(TableSchema::new(
        "pets",
        vec![
            Gene::sql_primary_key("id", "pets", Gene::integer("id", 1, 10_000)),
            Gene::sql_foreign_key("owner_id", "owners"),
            Gene::integer("age", 0, 40),
        ],
    ));
    cluster
}

pub fn dependencies() -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    graph.add_dependency("/owners/{id}/pets", "/owners");
    graph.add_related_table("/owners", "owners");
    graph.add_related_table("/owners/{id}/pets", "pets");
    graph.add_related_table("/pets", "pets");
    graph
}

/// Samples random tests, starting with one seeded owner creation
pub struct PetStoreSampler {
    cluster: ResourceCluster,
    max_actions: usize,
    seeds_left: usize,
    last_was_final_seed: bool,
}

impl PetStoreSampler {
    pub fn new(cluster: ResourceCluster, max_actions: usize) -> Self {
        Self {
            cluster,
            max_actions,
            seeds_left: 1,
            last_was_final_seed: false,
        }
    }
}

impl Sampler for PetStoreSampler {
    fn sample(&mut self, rng: &mut Randomness) -> Result<Individual> {
        if self.seeds_left == 0 {
            self.last_was_final_seed = false;
            return self.sample_at_random(rng);
        }
        self.seeds_left -= 1;
        self.last_was_final_seed = self.seeds_left == 0;
        let call = self.cluster.sample_call("/owners", Some("POST"), self.max_actions, rng)?;
        Ok(Individual::new(Vec::new(), call.into_iter().collect()))
    }

    fn sample_at_random(&mut self, rng: &mut Randomness) -> Result<Individual> {
        let mut individual = self.cluster.sample_individual(self.max_actions, rng)?;
        if rng.next_bool(0.3) {
            let rows = self.cluster.create_db_actions("pets", 1, &[], rng)?;
            individual.add_initializing_actions(rows);
        }
        Ok(individual)
    }

    fn has_special_init(&self) -> bool {
        self.seeds_left > 0
    }

    fn is_last_seeded_individual(&self) -> bool {
        self.last_was_final_seed
    }
}

/// Scores branch distances of a few business rules of the pet store
#[derive(Default)]
pub struct PetStoreFitness {
    targets: BTreeMap<String, TargetId>,
}

impl PetStoreFitness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number_of_targets(&self) -> usize {
        self.targets.len()
    }

    fn target(&mut self, description: String) -> TargetId {
        let next = self.targets.len() as TargetId;
        *self.targets.entry(description).or_insert(next)
    }

    fn reach(&mut self, fitness: &mut FitnessValue, description: String, distance: f64) {
        let target = self.target(description);
        let value = 1.0 / (1.0 + distance.max(0.0));
        if value > fitness.heuristic(target) {
            fitness.update_target(target, value);
        }
    }
}

fn int_param(action: &Action, name: &str) -> Option<i64> {
    action
        .params
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| match p.gene.kind() {
            GeneKind::Integer { value, .. } => Some(*value),
            _ => None,
        })
}

fn str_param(action: &Action, name: &str) -> Option<String> {
    action
        .params
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| p.gene.value_as_raw_string().ok())
}

impl FitnessFunction for PetStoreFitness {
    fn calculate_coverage(
        &mut self,
        individual: Individual,
        _targets: &BTreeSet<TargetId>,
    ) -> Option<EvaluatedIndividual> {
        if individual.size() == 0 {
            return None;
        }
        let mut fitness = FitnessValue::new();
        let mut owners_created = 0i64;

        for action in individual.see_actions() {
            self.reach(&mut fitness, format!("{} executed", action.name), 0.0);
            match action.name.as_str() {
                "POST:/owners" => {
                    owners_created += 1;
                    if let Some(age) = int_param(action, "age") {
                        self.reach(&mut fitness, "owner is senior".to_string(), (65 - age) as f64);
                        self.reach(&mut fitness, "owner is minor".to_string(), (age - 17) as f64);
                    }
                    if str_param(action, "name").is_some_and(|n| n.is_empty()) {
                        self.reach(&mut fitness, "owner name rejected".to_string(), 0.0);
                    }
                }
                "POST:/owners/{id}/pets" => {
                    let distance = if owners_created > 0 { 0.0 } else { 1.0 };
                    self.reach(&mut fitness, "pet created for existing owner".to_string(), distance);
                    if str_param(action, "species").as_deref() == Some("parrot") {
                        if let Some(age) = int_param(action, "age") {
                            self.reach(&mut fitness, "old parrot".to_string(), (30 - age) as f64);
                        }
                    }
                }
                "GET:/pets" => {
                    if let (Some(min), Some(max)) = (int_param(action, "min_age"), int_param(action, "max_age")) {
                        self.reach(&mut fitness, "valid age range".to_string(), (min - max) as f64);
                        self.reach(&mut fitness, "exact age search".to_string(), (min - max).abs() as f64);
                    }
                }
                _ => {}
            }
        }

        if individual.init_actions().iter().any(|db| db.table == "pets") {
            let calls = individual.resource_calls();
            let searched = calls.iter().any(|c| c.resource_key == "/pets");
            self.reach(
                &mut fitness,
                "search over stored pets".to_string(),
                if searched { 0.0 } else { 1.0 },
            );
        }

        Some(EvaluatedIndividual::new(individual, fitness))
    }
}
