use apievo::error::EngineError;
use apievo::genome::{Action, Gene, GeneKind, Individual, Param, ResourceCall};
use apievo::types::{GeneFilter, GeneId};
use apievo::utils::randomness::Randomness;
use std::collections::HashSet;

fn call(key: &str, rng: &mut Randomness) -> ResourceCall {
    let action = Action::new(
        format!("POST:{}", key),
        vec![
            Param::new("id", Gene::integer("id", 0, 10_000)),
            Param::new("label", Gene::string("label", 1, 6)),
        ],
    );
    ResourceCall::new(key, "POST", vec![action])
        .instantiate(rng)
        .unwrap()
}

fn int_value(gene: &Gene) -> i64 {
    match gene.kind() {
        GeneKind::Integer { value, .. } => *value,
        other => panic!("not an integer gene: {:?}", other),
    }
}

fn gene_named<'a>(ind: &'a Individual, call: usize, name: &str) -> &'a Gene {
    ind.resource_calls()[call]
        .see_genes()
        .find(|g| g.name() == name)
        .unwrap()
}

#[test]
fn test_flat_view_lists_every_descendant_once() {
    let gene = Gene::object(
        "body",
        vec![
            Gene::date("birthday"),
            Gene::integer("age", 0, 120),
            Gene::optional("nick", Gene::string("nick", 0, 4)),
        ],
    );
    let all = gene.flat_view();
    // body, date + 3 fields, age, optional + inner string
    assert_eq!(all.len(), 8);
    let ids: HashSet<GeneId> = all.iter().map(|g| g.id()).collect();
    assert_eq!(ids.len(), all.len());

    let shallow = gene.flat_view_excluding(&|g| matches!(g.kind(), GeneKind::Date { .. }));
    assert_eq!(shallow.len(), 5);
    assert!(shallow.iter().all(|g| g.name() != "year"));
}

#[test]
fn test_initialization_is_required_and_happens_once() {
    let mut rng = Randomness::new(Some(1));
    let mut gene = Gene::integer("n", 0, 10);
    assert!(matches!(
        gene.value_as_printable_string(),
        Err(EngineError::UninitializedGene(_))
    ));

    gene.do_initialize(Some(&mut rng)).unwrap();
    assert!(gene.is_initialized());
    assert!(matches!(
        gene.do_initialize(Some(&mut rng)),
        Err(EngineError::AlreadyInitialized(_))
    ));

    let mut date = Gene::date("d");
    date.do_initialize(Some(&mut rng)).unwrap();
    assert!(date.flat_view().iter().all(|g| g.is_initialized()));
    assert!(date.is_valid());
}

#[test]
fn test_binding_is_symmetric_and_keeps_values_in_sync() {
    let mut rng = Randomness::new(Some(7));
    let mut ind = Individual::new(vec![], vec![call("/users", &mut rng), call("/orders", &mut rng)]);

    let bound = ind.bind_resource_calls(0, 1).unwrap();
    assert_eq!(bound, 2);
    assert!(ind.is_binding_symmetric());
    assert!(ind.resource_calls()[1].depends_on_key("/users"));

    let source = gene_named(&ind, 0, "id").id();
    let target = gene_named(&ind, 1, "id").id();
    assert!(gene_named(&ind, 1, "id").is_bound_with(source));
    assert_eq!(int_value(gene_named(&ind, 0, "id")), int_value(gene_named(&ind, 1, "id")));

    for _ in 0..5 {
        ind.find_gene_mut(source).unwrap().mutate(&mut rng);
        ind.sync_binding_genes_from(source);
        assert_eq!(
            int_value(ind.find_gene(source).unwrap()),
            int_value(ind.find_gene(target).unwrap())
        );
    }

    ind.remove_resource_call(0);
    assert!(!gene_named(&ind, 0, "id").is_bound_gene());
    assert!(ind.is_binding_symmetric());
}

#[test]
fn test_binding_unknown_gene_fails() {
    let mut rng = Randomness::new(Some(7));
    let mut ind = Individual::new(vec![], vec![call("/users", &mut rng)]);
    let known = gene_named(&ind, 0, "id").id();
    let stranger = Gene::integer("x", 0, 1).id();
    assert!(matches!(
        ind.bind_genes(known, stranger),
        Err(EngineError::InvalidGene(_))
    ));
}

#[test]
fn test_copies_are_independent() {
    let mut rng = Randomness::new(Some(11));
    let mut original = Individual::new(vec![], vec![call("/users", &mut rng), call("/orders", &mut rng)]);
    original.bind_resource_calls(0, 1).unwrap();
    let before = original.canonical_string().unwrap();

    let mut copy = original.clone();
    assert_eq!(copy.gene_ids(), original.gene_ids());
    assert!(copy.contains_same_value_as(&original).unwrap());

    let id = gene_named(&copy, 0, "id").id();
    copy.find_gene_mut(id).unwrap().mutate(&mut rng);
    copy.sync_binding_genes_from(id);

    assert_eq!(original.canonical_string().unwrap(), before);
    assert!(!copy.contains_same_value_as(&original).unwrap());
    // the binding in the copy resolves to the copy's own genes
    assert_eq!(int_value(gene_named(&copy, 0, "id")), int_value(gene_named(&copy, 1, "id")));
    assert_ne!(int_value(gene_named(&copy, 1, "id")), int_value(gene_named(&original, 1, "id")));
}

#[test]
fn test_fresh_copy_has_new_identity_and_same_value() {
    let mut rng = Randomness::new(Some(13));
    let mut pk = Gene::sql_primary_key("id", "users", Gene::integer("id", 1, 100));
    pk.do_initialize(Some(&mut rng)).unwrap();

    let copy = pk.copy_with_fresh_ids();
    assert_ne!(copy.id(), pk.id());
    assert_ne!(copy.primary_key_id(), pk.primary_key_id());
    assert!(copy.contains_same_value_as(&pk).unwrap());

    let mut other = Gene::string("s", 0, 3);
    other.do_initialize(Some(&mut rng)).unwrap();
    assert!(matches!(
        pk.contains_same_value_as(&other),
        Err(EngineError::TypeMismatch { .. })
    ));
}

#[test]
fn test_gene_filters() {
    let mut rng = Randomness::new(Some(3));
    let mut row = Gene::sql_primary_key("id", "users", Gene::integer("id", 1, 100));
    row.do_initialize(Some(&mut rng)).unwrap();
    let mut ind = Individual::new(vec![], vec![call("/users", &mut rng)]);
    ind.add_initializing_actions(vec![apievo::genome::DbAction::new("users", vec![row])]);

    assert_eq!(ind.see_genes(GeneFilter::NoInit).len(), 2);
    assert_eq!(ind.see_genes(GeneFilter::OnlyInit).len(), 1);
    assert_eq!(ind.see_genes(GeneFilter::All).len(), 3);
    assert_eq!(ind.size(), 1);
}
