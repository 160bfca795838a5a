use apievo::config::ResourceConfig;
use apievo::engines::mutation::{
    MutatedGeneSpecification, MutationType, MutationWeightControl, ResourceStructureMutator,
};
use apievo::error::EngineError;
use apievo::genome::{Action, Gene, Individual, Param, ResourceCall};
use apievo::problem::{DependencyGraph, ResourceCluster, ResourceManager, ResourceNode, TableSchema};
use apievo::types::ImpactWeighting;
use apievo::utils::randomness::Randomness;

fn cluster() -> ResourceCluster {
    let mut cluster = ResourceCluster::new();
    cluster.add_node(
        ResourceNode::new("/authors").with_creation_template(
            "POST",
            vec![Action::new(
                "POST:/authors",
                vec![
                    Param::new("name", Gene::string("name", 1, 8)),
                    Param::new("age", Gene::integer("age", 18, 99)),
                ],
            )],
        ),
    );
    cluster.add_node(
        ResourceNode::new("/books").depends_on("/authors").with_creation_template(
            "POST",
            vec![Action::new(
                "POST:/books",
                vec![
                    Param::new("name", Gene::string("name", 1, 8)),
                    Param::new("pages", Gene::integer("pages", 1, 900)),
                ],
            )],
        ),
    );
    cluster.add_node(ResourceNode::new("/search").with_template(
        "GET",
        vec![Action::new("GET:/search", vec![Param::new("q", Gene::integer("q", 0, 50))])],
    ));
    cluster.add_table(TableSchema::new(
        "authors",
        vec![Gene::sql_primary_key("id", "authors", Gene::integer("id", 1, 10_000))],
    ));
    cluster.add_table(TableSchema::new(
        "books",
        vec![
            Gene::sql_primary_key("id", "books", Gene::integer("id", 1, 10_000)),
            Gene::sql_foreign_key("author_id", "authors"),
        ],
    ));
    cluster
}

fn mutator(config: ResourceConfig, dependencies: DependencyGraph) -> ResourceStructureMutator {
    mutator_over(cluster(), config, dependencies)
}

fn mutator_over(
    cluster: ResourceCluster,
    config: ResourceConfig,
    dependencies: DependencyGraph,
) -> ResourceStructureMutator {
    ResourceStructureMutator::new(
        config,
        MutationWeightControl::new(ImpactWeighting::Ratio),
        Box::new(cluster),
        Box::new(dependencies),
    )
}

/// `/users` with a one-action and a two-action template
fn users_cluster() -> ResourceCluster {
    let post = || Action::new("POST:/users", vec![Param::new("name", Gene::string("name", 1, 8))]);
    let mut cluster = ResourceCluster::new();
    cluster.add_node(
        ResourceNode::new("/users")
            .with_creation_template("POST", vec![post()])
            .with_template(
                "POST-GET",
                vec![
                    post(),
                    Action::new("GET:/users/{id}", vec![Param::new("id", Gene::integer("id", 0, 100))]),
                ],
            ),
    );
    cluster
}

fn call(key: &str, rng: &mut Randomness) -> ResourceCall {
    cluster().sample_call(key, None, 5, rng).unwrap().unwrap()
}

fn keys(ind: &Individual) -> Vec<String> {
    ind.resource_calls().iter().map(|c| c.resource_key.clone()).collect()
}

#[test]
fn test_swap_never_moves_a_call_before_its_dependency() {
    let mut rng = Randomness::new(Some(21));
    let rsm = mutator(ResourceConfig::default(), DependencyGraph::new());

    let pair = Individual::new(vec![], vec![call("/authors", &mut rng), call("/books", &mut rng)]);
    assert!(!rsm.is_applicable(MutationType::Swap, &pair, false));

    let triple = Individual::new(
        vec![],
        vec![call("/authors", &mut rng), call("/books", &mut rng), call("/search", &mut rng)],
    );
    assert!(rsm.is_applicable(MutationType::Swap, &triple, false));
    for _ in 0..20 {
        let mut ind = triple.clone();
        let mut spec = MutatedGeneSpecification::default();
        let applied = rsm
            .apply(MutationType::Swap, &mut ind, None, false, &mut rng, &mut spec)
            .unwrap();
        assert_eq!(applied, MutationType::Swap);
        assert!(ind.respects_dependencies());
        assert_eq!(keys(&ind), vec!["/authors", "/search", "/books"]);
    }
}

#[test]
fn test_add_at_max_size_degrades_to_delete() {
    let mut rng = Randomness::new(Some(4));
    let config = ResourceConfig {
        max_test_size: 2,
        ..Default::default()
    };
    let rsm = mutator(config, DependencyGraph::new());

    let mut ind = Individual::new(vec![], vec![call("/authors", &mut rng), call("/search", &mut rng)]);
    assert!(!rsm.is_applicable(MutationType::Add, &ind, false));
    let mut spec = MutatedGeneSpecification::default();
    let applied = rsm
        .apply(MutationType::Add, &mut ind, None, false, &mut rng, &mut spec)
        .unwrap();
    assert_eq!(applied, MutationType::Delete);
    assert_eq!(spec.structure, Some(MutationType::Delete));
    assert_eq!(ind.resource_calls().len(), 1);

    let tiny = ResourceConfig {
        max_test_size: 1,
        ..Default::default()
    };
    let rsm = mutator(tiny, DependencyGraph::new());
    let mut single = Individual::new(vec![], vec![call("/search", &mut rng)]);
    let result = rsm.apply(
        MutationType::Add,
        &mut single,
        None,
        false,
        &mut rng,
        &mut MutatedGeneSpecification::default(),
    );
    assert!(matches!(result, Err(EngineError::InapplicableMutation(_))));
    assert_eq!(single.resource_calls().len(), 1);
}

#[test]
fn test_delete_keeps_at_least_one_call() {
    let mut rng = Randomness::new(Some(9));
    let config = ResourceConfig {
        max_size_of_handling_resource: 5,
        prob_of_handling_length: 1.0,
        ..Default::default()
    };
    let rsm = mutator(config, DependencyGraph::new());
    let calls = (0..3).map(|_| call("/search", &mut rng)).collect();
    let base = Individual::new(vec![], calls);

    for _ in 0..30 {
        let mut ind = base.clone();
        let mut spec = MutatedGeneSpecification::default();
        rsm.apply(MutationType::Delete, &mut ind, None, true, &mut rng, &mut spec)
            .unwrap();
        assert!(!ind.resource_calls().is_empty());
        assert!(ind.resource_calls().len() < 3);
        assert!(spec.size_handled);
    }
}

#[test]
fn test_add_with_dependency_heuristics_places_and_binds_the_dependency() {
    let mut rng = Randomness::new(Some(17));
    let config = ResourceConfig {
        prob_of_enabling_resource_dependency_heuristics: 1.0,
        ..Default::default()
    };
    let mut graph = DependencyGraph::new();
    graph.add_dependency("/books", "/authors");
    let rsm = mutator(config, graph);

    let base = Individual::new(vec![], vec![call("/search", &mut rng), call("/books", &mut rng)]);
    for _ in 0..10 {
        let mut ind = base.clone();
        let mut spec = MutatedGeneSpecification::default();
        rsm.apply(MutationType::Add, &mut ind, None, false, &mut rng, &mut spec)
            .unwrap();

        let order = keys(&ind);
        let author = order.iter().position(|k| k == "/authors").unwrap();
        let book = order.iter().position(|k| k == "/books").unwrap();
        assert!(author < book);
        assert!(ind.respects_dependencies());
        assert!(ind.is_binding_symmetric());

        let name_of = |p: usize| {
            ind.resource_calls()[p]
                .see_genes()
                .find(|g| g.name() == "name")
                .unwrap()
        };
        let (author_name, book_name) = (name_of(author), name_of(book));
        assert!(author_name.is_bound_with(book_name.id()));
        assert!(author_name.contains_same_value_as(book_name).unwrap());
    }
}

#[test]
fn test_sql_remove_takes_referencing_rows_along() {
    let config = ResourceConfig {
        max_size_of_handling_resource: 1,
        prob_of_handling_length: 1.0,
        ..Default::default()
    };
    let rsm = mutator(config, DependencyGraph::new());

    for seed in 0..20 {
        let mut rng = Randomness::new(Some(seed));
        let rows = cluster().create_db_actions("books", 1, &[], &mut rng).unwrap();
        assert_eq!(rows.len(), 2);
        let mut ind = Individual::new(rows, vec![call("/search", &mut rng)]);

        let mut spec = MutatedGeneSpecification::default();
        rsm.apply(MutationType::SqlRemove, &mut ind, None, true, &mut rng, &mut spec)
            .unwrap();
        assert!(ind.verify_init_action_references());
        let tables: Vec<&str> = ind.init_actions().iter().map(|a| a.table.as_str()).collect();
        // either the book alone went, or the author and with it the book
        assert!(tables == vec!["authors"] || tables.is_empty());
        assert!(spec.tables.contains(&"books".to_string()));
    }
}

#[test]
fn test_sql_add_keeps_foreign_keys_resolvable() {
    let mut rng = Randomness::new(Some(30));
    let config = ResourceConfig {
        max_size_of_handling_resource: 3,
        prob_of_handling_length: 1.0,
        ..Default::default()
    };
    let rsm = mutator(config, DependencyGraph::new());
    let base = Individual::new(vec![], vec![call("/search", &mut rng)]);

    assert!(!rsm.is_applicable(MutationType::SqlRemove, &base, true));
    assert!(rsm.is_applicable(MutationType::SqlAdd, &base, true));
    assert!(!rsm.is_applicable(MutationType::SqlAdd, &base, false));

    for _ in 0..10 {
        let mut ind = base.clone();
        let mut spec = MutatedGeneSpecification::default();
        rsm.apply(MutationType::SqlAdd, &mut ind, None, true, &mut rng, &mut spec)
            .unwrap();
        assert!(!ind.init_actions().is_empty());
        assert!(ind.verify_init_action_references());
        assert!(!spec.tables.is_empty());
        assert_eq!(ind.size(), 1);
    }
}

#[test]
fn test_applicability_depends_on_grouping_and_size_mode() {
    let mut rng = Randomness::new(Some(2));
    let rsm = mutator(ResourceConfig::default(), DependencyGraph::new());

    let action = Action::new("GET:/search", vec![Param::new("q", Gene::integer("q", 0, 5))])
        .instantiate(&mut rng)
        .unwrap();
    let flat = Individual::from_actions(vec![action]);
    assert!(rsm.applicable_mutations(&flat, false).is_empty());
    assert!(!rsm.can_apply(&flat));

    let grouped = Individual::new(vec![], vec![call("/search", &mut rng)]);
    let normal = rsm.applicable_mutations(&grouped, false);
    assert!(normal.contains(&MutationType::Add));
    assert!(normal.contains(&MutationType::Modify));
    assert!(!normal.contains(&MutationType::Delete));
    assert!(!normal.contains(&MutationType::Swap));
    assert!(normal.iter().all(|k| !k.is_sql()));

    let sized = rsm.applicable_mutations(&grouped, true);
    assert!(sized.contains(&MutationType::SqlAdd));
    assert!(!sized.contains(&MutationType::Modify));
}

#[test]
fn test_add_is_inapplicable_when_no_template_fits_the_budget() {
    let mut rng = Randomness::new(Some(6));
    let mut cluster = ResourceCluster::new();
    cluster.add_node(ResourceNode::new("/pairs").with_template(
        "POST-GET",
        vec![
            Action::new("POST:/pairs", vec![Param::new("n", Gene::integer("n", 0, 9))]),
            Action::new("GET:/pairs/{id}", vec![Param::new("id", Gene::integer("id", 0, 9))]),
        ],
    ));
    let first = cluster.sample_call("/pairs", None, 2, &mut rng).unwrap().unwrap();
    let config = ResourceConfig {
        max_test_size: 3,
        ..Default::default()
    };
    let rsm = mutator_over(cluster, config, DependencyGraph::new());

    let mut ind = Individual::new(vec![], vec![first]);
    assert_eq!(ind.size(), 2);
    assert!(!rsm.is_applicable(MutationType::Add, &ind, false));
    assert!(!rsm.applicable_mutations(&ind, true).contains(&MutationType::Add));
    assert!(rsm.can_apply(&ind));

    let result = rsm.apply(
        MutationType::Add,
        &mut ind,
        None,
        false,
        &mut rng,
        &mut MutatedGeneSpecification::default(),
    );
    assert!(matches!(result, Err(EngineError::InapplicableMutation(_))));
    assert_eq!(ind.size(), 2);

    for _ in 0..20 {
        let mut copy = ind.clone();
        let mut spec = MutatedGeneSpecification::default();
        rsm.mutate_structure(&mut copy, None, false, &mut rng, &mut spec)
            .unwrap();
        assert!(copy.size() <= 3);
    }
}

#[test]
fn test_learned_dependency_keeps_swaps_in_order() {
    let mut rng = Randomness::new(Some(12));
    let config = ResourceConfig {
        prob_of_enabling_resource_dependency_heuristics: 1.0,
        ..Default::default()
    };
    let mut graph = DependencyGraph::new();
    graph.add_dependency("/search", "/authors");
    let rsm = mutator(config, graph);

    let ordered = Individual::new(
        vec![],
        vec![call("/authors", &mut rng), call("/search", &mut rng), call("/books", &mut rng)],
    );
    for _ in 0..30 {
        let mut ind = ordered.clone();
        let mut spec = MutatedGeneSpecification::default();
        rsm.apply(MutationType::Swap, &mut ind, None, false, &mut rng, &mut spec)
            .unwrap();
        assert_eq!(keys(&ind), vec!["/authors", "/books", "/search"]);
    }

    // a search call sitting before the author it needs is moved behind it
    let misplaced = Individual::new(
        vec![],
        vec![call("/search", &mut rng), call("/authors", &mut rng), call("/books", &mut rng)],
    );
    for _ in 0..30 {
        let mut ind = misplaced.clone();
        let mut spec = MutatedGeneSpecification::default();
        rsm.apply(MutationType::Swap, &mut ind, None, false, &mut rng, &mut spec)
            .unwrap();
        assert_eq!(keys(&ind), vec!["/authors", "/search", "/books"]);
        assert!(ind.respects_dependencies());
    }
}

#[test]
fn test_replace_keeps_call_count_budget_and_bindings() {
    let mut graph = DependencyGraph::new();
    graph.add_dependency("/books", "/authors");

    for (seed, heuristics) in (0..40).zip([0.0, 1.0].iter().cycle()) {
        let mut rng = Randomness::new(Some(seed));
        let config = ResourceConfig {
            max_test_size: 3,
            prob_of_enabling_resource_dependency_heuristics: *heuristics,
            ..Default::default()
        };
        let rsm = mutator(config, graph.clone());
        let base = Individual::new(
            vec![],
            vec![call("/authors", &mut rng), call("/search", &mut rng), call("/search", &mut rng)],
        );
        assert!(rsm.is_applicable(MutationType::Replace, &base, false));

        let mut ind = base.clone();
        let mut spec = MutatedGeneSpecification::default();
        let applied = rsm
            .apply(MutationType::Replace, &mut ind, None, false, &mut rng, &mut spec)
            .unwrap();
        assert_eq!(applied, MutationType::Replace);
        assert_eq!(ind.resource_calls().len(), 3);
        assert!(ind.size() <= 3);
        assert!(ind.is_binding_symmetric());
        assert!(ind.respects_dependencies());
        assert_eq!(spec.resource_keys.len(), 2);
    }
}

#[test]
fn test_modify_switches_template_of_the_same_resource() {
    let mut rng = Randomness::new(Some(19));
    let cluster = users_cluster();
    let post = cluster.sample_call("/users", Some("POST"), 1, &mut rng).unwrap().unwrap();
    let base = Individual::new(vec![], vec![post]);

    let roomy = ResourceConfig {
        max_test_size: 4,
        ..Default::default()
    };
    let rsm = mutator_over(users_cluster(), roomy, DependencyGraph::new());
    for _ in 0..20 {
        let mut ind = base.clone();
        let mut spec = MutatedGeneSpecification::default();
        rsm.apply(MutationType::Modify, &mut ind, None, false, &mut rng, &mut spec)
            .unwrap();
        let modified = &ind.resource_calls()[0];
        assert_eq!(modified.resource_key, "/users");
        assert_eq!(modified.template, "POST-GET");
        assert_eq!(ind.size(), 2);
    }

    // the other template does not fit, so the call is regenerated from its own
    let tight = ResourceConfig {
        max_test_size: 1,
        ..Default::default()
    };
    let rsm = mutator_over(users_cluster(), tight, DependencyGraph::new());
    let mut ind = base.clone();
    rsm.apply(
        MutationType::Modify,
        &mut ind,
        None,
        false,
        &mut rng,
        &mut MutatedGeneSpecification::default(),
    )
    .unwrap();
    assert_eq!(ind.resource_calls()[0].template, "POST");
    assert_eq!(ind.size(), 1);
}
