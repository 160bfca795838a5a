use super::action::{Action, AuthInfo, DbAction, ResourceCall};
use super::gene::Gene;
use crate::error::{EngineError, Result};
use crate::types::{GeneFilter, GeneId};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One complete test case: database set-up followed by the main call sequence.
///
/// The main sequence is always stored as resource calls. Individuals built
/// from a plain list of actions wrap every action in its own call and are
/// flagged as not grouped, so resource-level structure mutation refuses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    init_actions: Vec<DbAction>,
    calls: Vec<ResourceCall>,
    grouped: bool,
}

impl Individual {
    pub fn new(init_actions: Vec<DbAction>, calls: Vec<ResourceCall>) -> Self {
        Self {
            init_actions,
            calls,
            grouped: true,
        }
    }

    pub fn from_actions(actions: Vec<Action>) -> Self {
        let calls = actions
            .into_iter()
            .map(|a| {
                let key = a.name.clone();
                ResourceCall::new(key, "single", vec![a])
            })
            .collect();
        Self {
            init_actions: Vec::new(),
            calls,
            grouped: false,
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.grouped
    }

    pub fn resource_calls(&self) -> &[ResourceCall] {
        &self.calls
    }

    pub fn init_actions(&self) -> &[DbAction] {
        &self.init_actions
    }

    /// Main actions, initializing actions excluded
    pub fn see_actions(&self) -> Vec<&Action> {
        self.calls.iter().flat_map(|c| c.actions.iter()).collect()
    }

    /// Number of main actions
    pub fn size(&self) -> usize {
        self.calls.iter().map(ResourceCall::action_size).sum()
    }

    pub fn see_auths(&self) -> Vec<AuthInfo> {
        self.see_actions()
            .into_iter()
            .filter_map(|a| a.auth.clone())
            .collect()
    }

    /// Top-level genes, i.e. the roots of the parameter and column trees
    pub fn see_genes(&self, filter: GeneFilter) -> Vec<&Gene> {
        let init = self.init_actions.iter().flat_map(|db| db.genes.iter());
        let main = self.calls.iter().flat_map(ResourceCall::see_genes);
        match filter {
            GeneFilter::All => init.chain(main).collect(),
            GeneFilter::NoInit => main.collect(),
            GeneFilter::OnlyInit => init.collect(),
        }
    }

    pub fn gene_ids(&self) -> HashSet<GeneId> {
        self.see_genes(GeneFilter::All)
            .into_iter()
            .flat_map(Gene::flat_view)
            .map(Gene::id)
            .collect()
    }

    pub fn find_gene(&self, id: GeneId) -> Option<&Gene> {
        self.see_genes(GeneFilter::All)
            .into_iter()
            .find_map(|g| g.find(id))
    }

    pub fn find_gene_mut(&mut self, id: GeneId) -> Option<&mut Gene> {
        let init = self.init_actions.iter_mut().flat_map(|db| db.genes.iter_mut());
        let main = self
            .calls
            .iter_mut()
            .flat_map(|c| c.actions.iter_mut())
            .flat_map(|a| a.see_genes_mut());
        init.chain(main).find_map(|g| g.find_mut(id))
    }

    fn for_each_gene_mut(&mut self, f: &mut dyn FnMut(&mut Gene)) {
        fn visit(gene: &mut Gene, f: &mut dyn FnMut(&mut Gene)) {
            f(gene);
            for child in gene.children_mut() {
                visit(child, f);
            }
        }
        for db in self.init_actions.iter_mut() {
            for gene in db.genes.iter_mut() {
                visit(gene, f);
            }
        }
        for call in self.calls.iter_mut() {
            for action in call.actions.iter_mut() {
                for gene in action.see_genes_mut() {
                    visit(gene, f);
                }
            }
        }
    }

    //========================= binding ===================================

    /// Bind two genes of this individual to each other
    pub fn bind_genes(&mut self, a: GeneId, b: GeneId) -> Result<()> {
        if a == b {
            return Ok(());
        }
        if self.find_gene(a).is_none() || self.find_gene(b).is_none() {
            return Err(EngineError::InvalidGene(format!(
                "cannot bind {:?} and {:?}, not both in the individual",
                a, b
            )));
        }
        if let Some(gene) = self.find_gene_mut(a) {
            gene.add_binding_gene(b);
        }
        if let Some(gene) = self.find_gene_mut(b) {
            gene.add_binding_gene(a);
        }
        Ok(())
    }

    /// Remove `id` from every gene it is bound to, and clear its own bindings
    pub fn remove_this_from_binding_genes(&mut self, id: GeneId) {
        let bound: Vec<GeneId> = match self.find_gene(id) {
            Some(g) => g.binding_genes().iter().copied().collect(),
            None => return,
        };
        for other in bound {
            if let Some(g) = self.find_gene_mut(other) {
                g.remove_binding_gene(id);
            }
            if let Some(g) = self.find_gene_mut(id) {
                g.remove_binding_gene(other);
            }
        }
    }

    /// Propagate the value of `source` to every gene transitively bound to it,
    /// and do the same for bound genes inside its subtree.
    /// Each gene is assigned at most once. Returns how many genes were assigned.
    pub fn sync_binding_genes_from(&mut self, source: GeneId) -> usize {
        let mut assigned: HashSet<GeneId> = HashSet::from([source]);
        let mut expanded: HashSet<GeneId> = HashSet::new();
        let mut stack = vec![source];
        let mut count = 0;

        while let Some(current) = stack.pop() {
            if !expanded.insert(current) {
                continue;
            }
            let snapshot = match self.find_gene(current) {
                Some(g) => g.clone(),
                None => continue,
            };
            for bound in snapshot.binding_genes() {
                if !assigned.insert(*bound) {
                    continue;
                }
                if let Some(target) = self.find_gene_mut(*bound) {
                    if !target.bind_value_based_on(&snapshot) {
                        warn!(
                            "fail to bind the gene ({} with the type {}) based on the gene ({} with {})",
                            target.name(),
                            target.type_name(),
                            snapshot.name(),
                            snapshot.type_name()
                        );
                    }
                    count += 1;
                    stack.push(*bound);
                }
            }
            stack.extend(snapshot.children().iter().map(Gene::id));
        }
        count
    }

    /// Drop bindings pointing at genes that are no longer part of this individual
    pub fn clean_broken_references(&mut self) -> bool {
        let existing = self.gene_ids();
        let mut changed = false;
        self.for_each_gene_mut(&mut |g| changed |= g.clean_broken_references(&existing));
        changed
    }

    /// Every binding is mirrored on the other side
    pub fn is_binding_symmetric(&self) -> bool {
        self.see_genes(GeneFilter::All)
            .into_iter()
            .flat_map(Gene::flat_view)
            .all(|g| {
                g.binding_genes().iter().all(|b| {
                    self.find_gene(*b)
                        .map(|other| other.is_bound_with(g.id()))
                        .unwrap_or(false)
                })
            })
    }

    /// Bind the parameters of the later call to the same-named parameters of the earlier one,
    /// making the later call depend on the earlier resource
    pub fn bind_resource_calls(&mut self, earlier: usize, later: usize) -> Result<usize> {
        if earlier >= self.calls.len() || later >= self.calls.len() || earlier == later {
            return Err(EngineError::InvalidGene(format!(
                "cannot bind resource calls {} and {}",
                earlier, later
            )));
        }
        let pairs: Vec<(GeneId, GeneId)> = self.calls[earlier]
            .see_genes()
            .flat_map(|source| {
                self.calls[later]
                    .see_genes()
                    .filter(move |target| target.name() == source.name())
                    .map(move |target| (source.id(), target.id()))
            })
            .collect();
        for (source, target) in &pairs {
            self.bind_genes(*source, *target)?;
            self.sync_binding_genes_from(*source);
        }
        let key = self.calls[earlier].resource_key.clone();
        if key != self.calls[later].resource_key {
            self.calls[later].depends_on.insert(key);
        }
        Ok(pairs.len())
    }

    //========================= resource calls ===================================

    pub fn add_resource_call(&mut self, position: usize, call: ResourceCall) {
        let position = position.min(self.calls.len());
        self.calls.insert(position, call);
    }

    pub fn remove_resource_call(&mut self, position: usize) -> Option<ResourceCall> {
        if position >= self.calls.len() {
            return None;
        }
        let removed = self.calls.remove(position);
        self.clean_broken_references();
        Some(removed)
    }

    pub fn remove_resource_calls(&mut self, positions: &[usize]) -> Vec<ResourceCall> {
        let mut sorted: Vec<usize> = positions
            .iter()
            .copied()
            .filter(|p| *p < self.calls.len())
            .collect();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();
        let removed = sorted.into_iter().map(|p| self.calls.remove(p)).collect();
        self.clean_broken_references();
        removed
    }

    pub fn replace_resource_call(&mut self, position: usize, call: ResourceCall) -> Option<ResourceCall> {
        if position >= self.calls.len() {
            return None;
        }
        let old = std::mem::replace(&mut self.calls[position], call);
        self.clean_broken_references();
        Some(old)
    }

    pub fn swap_resource_call(&mut self, first: usize, second: usize) {
        if first < self.calls.len() && second < self.calls.len() {
            self.calls.swap(first, second);
        }
    }

    pub fn resource_call_mut(&mut self, position: usize) -> Option<&mut ResourceCall> {
        self.calls.get_mut(position)
    }

    fn call_depends_on(a: &ResourceCall, b: &ResourceCall) -> bool {
        a.resource_key != b.resource_key && a.depends_on_key(&b.resource_key)
    }

    /// Whether exchanging calls `i < j` keeps every dependency in order
    pub fn can_swap(&self, i: usize, j: usize) -> bool {
        self.can_swap_with(i, j, &Self::call_depends_on)
    }

    /// Like [`Individual::can_swap`], with `depends(a, b)` telling whether call `a` needs `b` before it
    pub fn can_swap_with(
        &self,
        i: usize,
        j: usize,
        depends: &dyn Fn(&ResourceCall, &ResourceCall) -> bool,
    ) -> bool {
        if i >= j || j >= self.calls.len() {
            return false;
        }
        let moved_forward = &self.calls[j];
        let moved_back = &self.calls[i];
        (i..j).all(|k| !depends(moved_forward, &self.calls[k]))
            && (i + 1..=j).all(|k| !depends(&self.calls[k], moved_back))
    }

    /// For each position, the later positions it can be swapped with
    pub fn extract_swap_candidates(&self) -> BTreeMap<usize, BTreeSet<usize>> {
        self.extract_swap_candidates_with(&Self::call_depends_on)
    }

    pub fn extract_swap_candidates_with(
        &self,
        depends: &dyn Fn(&ResourceCall, &ResourceCall) -> bool,
    ) -> BTreeMap<usize, BTreeSet<usize>> {
        let mut candidates = BTreeMap::new();
        for i in 0..self.calls.len() {
            let partners: BTreeSet<usize> = (i + 1..self.calls.len())
                .filter(|j| self.can_swap_with(i, *j, depends))
                .collect();
            if !partners.is_empty() {
                candidates.insert(i, partners);
            }
        }
        candidates
    }

    /// First position where `call` can be inserted without preceding a resource it depends on
    pub fn earliest_valid_position(&self, call: &ResourceCall) -> usize {
        call.depends_on
            .iter()
            .filter(|key| **key != call.resource_key)
            .filter_map(|key| self.calls.iter().position(|c| &c.resource_key == key))
            .map(|p| p + 1)
            .max()
            .unwrap_or(0)
    }

    /// Last position where `call` can be inserted without following a call that depends on it
    pub fn latest_valid_position(&self, call: &ResourceCall) -> usize {
        self.calls
            .iter()
            .position(|c| Self::call_depends_on(c, call))
            .unwrap_or(self.calls.len())
    }

    /// Positions where `call` keeps declared dependencies in order, `None` when there is none
    pub fn valid_insertion_range(&self, call: &ResourceCall) -> Option<(usize, usize)> {
        let (lowest, highest) = (self.earliest_valid_position(call), self.latest_valid_position(call));
        (lowest <= highest).then_some((lowest, highest))
    }

    /// Every call comes after the calls of the resources it depends on, when those are present
    pub fn respects_dependencies(&self) -> bool {
        self.calls.iter().enumerate().all(|(i, call)| {
            call.depends_on.iter().all(|key| {
                let present = self.calls.iter().any(|c| &c.resource_key == key);
                !present || self.calls[..i].iter().any(|c| &c.resource_key == key)
            })
        })
    }

    //========================= initializing actions ===================================

    pub fn add_initializing_actions(&mut self, actions: Vec<DbAction>) {
        self.init_actions.extend(actions);
    }

    pub fn remove_init_db_actions(&mut self, positions: &[usize]) -> Vec<DbAction> {
        let mut sorted: Vec<usize> = positions
            .iter()
            .copied()
            .filter(|p| *p < self.init_actions.len())
            .collect();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();
        let removed = sorted
            .into_iter()
            .map(|p| self.init_actions.remove(p))
            .collect();
        self.clean_broken_references();
        removed
    }

    /// Every foreign key of an initializing action refers to a primary key inserted before it
    pub fn verify_init_action_references(&self) -> bool {
        let mut seen: HashSet<u64> = HashSet::new();
        for db in &self.init_actions {
            if db.foreign_key_references().iter().any(|fk| !seen.contains(fk)) {
                return false;
            }
            seen.extend(db.primary_keys());
        }
        true
    }

    //========================= values ===================================

    /// Printable form of all values, used to detect duplicates
    pub fn canonical_string(&self) -> Result<String> {
        let mut parts = Vec::new();
        for db in &self.init_actions {
            let values = db
                .genes
                .iter()
                .map(|g| Ok(format!("{}={}", g.name(), g.value_as_printable_string()?)))
                .collect::<Result<Vec<_>>>()?;
            parts.push(format!("INSERT {}({})", db.table, values.join(",")));
        }
        for action in self.see_actions() {
            let values = action
                .params
                .iter()
                .map(|p| Ok(format!("{}={}", p.name, p.gene.value_as_printable_string()?)))
                .collect::<Result<Vec<_>>>()?;
            parts.push(format!("{}({})", action.name, values.join(",")));
        }
        Ok(serde_json::to_string(&parts)?)
    }

    pub fn contains_same_value_as(&self, other: &Individual) -> Result<bool> {
        let mine = self.see_genes(GeneFilter::All);
        let theirs = other.see_genes(GeneFilter::All);
        if mine.len() != theirs.len() || self.size() != other.size() {
            return Ok(false);
        }
        let same_actions = self
            .see_actions()
            .iter()
            .zip(other.see_actions())
            .all(|(a, b)| a.name == b.name);
        if !same_actions {
            return Ok(false);
        }
        for (a, b) in mine.into_iter().zip(theirs) {
            if a.name() != b.name() || !a.contains_same_value_as(b)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::action::Param;
    use crate::utils::randomness::Randomness;

    fn call(key: &str, param: Gene, rng: &mut Randomness) -> ResourceCall {
        let template = ResourceCall::new(
            key,
            "POST",
            vec![Action::new(format!("POST:/{}", key), vec![Param::new("id", param)])],
        );
        template.instantiate(rng).unwrap()
    }

    #[test]
    fn test_bind_and_sync_across_calls() {
        let mut rng = Randomness::new(Some(5));
        let mut ind = Individual::new(
            vec![],
            vec![
                call("a", Gene::integer("id", 0, 1000), &mut rng),
                call("b", Gene::string("id", 0, 10), &mut rng),
            ],
        );
        assert_eq!(ind.bind_resource_calls(0, 1).unwrap(), 1);
        assert!(ind.is_binding_symmetric());
        assert!(ind.resource_calls()[1].depends_on_key("a"));

        let a = ind.resource_calls()[0].actions[0].params[0].gene.clone();
        let b = &ind.resource_calls()[1].actions[0].params[0].gene;
        assert_eq!(a.value_as_raw_string().unwrap(), b.value_as_raw_string().unwrap());
        assert!(b.is_bound_with(a.id()));
    }

    #[test]
    fn test_sync_is_cycle_safe() {
        let mut rng = Randomness::new(Some(8));
        let mut ind = Individual::new(
            vec![],
            vec![
                call("a", Gene::integer("id", 0, 1000), &mut rng),
                call("b", Gene::integer("id", 0, 1000), &mut rng),
                call("c", Gene::integer("id", 0, 1000), &mut rng),
            ],
        );
        let ids: Vec<GeneId> = ind.see_genes(GeneFilter::All).iter().map(|g| g.id()).collect();
        ind.bind_genes(ids[0], ids[1]).unwrap();
        ind.bind_genes(ids[1], ids[2]).unwrap();
        ind.bind_genes(ids[2], ids[0]).unwrap();

        // the source is never re-assigned, the two others exactly once
        assert_eq!(ind.sync_binding_genes_from(ids[0]), 2);
        let values: Vec<String> = ind
            .see_genes(GeneFilter::All)
            .iter()
            .map(|g| g.value_as_raw_string().unwrap())
            .collect();
        assert!(values.iter().all(|v| *v == values[0]));
    }

    #[test]
    fn test_removal_cleans_broken_bindings() {
        let mut rng = Randomness::new(Some(2));
        let mut ind = Individual::new(
            vec![],
            vec![
                call("a", Gene::integer("id", 0, 9), &mut rng),
                call("b", Gene::integer("id", 0, 9), &mut rng),
            ],
        );
        ind.bind_resource_calls(0, 1).unwrap();
        ind.remove_resource_call(0);
        assert!(!ind.see_genes(GeneFilter::All)[0].is_bound_gene());
    }

    #[test]
    fn test_swap_candidates_respect_dependencies() {
        let mut rng = Randomness::new(Some(4));
        let a = call("a", Gene::integer("id", 0, 9), &mut rng);
        let b = call("b", Gene::integer("x", 0, 9), &mut rng).with_dependency("a");
        let c = call("c", Gene::integer("y", 0, 9), &mut rng);
        let ind = Individual::new(vec![], vec![a, b, c]);

        let candidates = ind.extract_swap_candidates();
        // a <-> b would put b first; a <-> c moves a after b
        assert!(!candidates.get(&0).map(|s| s.contains(&1)).unwrap_or(false));
        assert!(!candidates.get(&0).map(|s| s.contains(&2)).unwrap_or(false));
        assert!(candidates[&1].contains(&2));
        assert!(ind.respects_dependencies());
    }

    #[test]
    fn test_insertion_range_sits_between_dependency_and_dependent() {
        let mut rng = Randomness::new(Some(4));
        let c = call("c", Gene::integer("y", 0, 9), &mut rng);
        let b = call("b", Gene::integer("x", 0, 9), &mut rng).with_dependency("a");
        let ind = Individual::new(vec![], vec![c, b]);

        let a = call("a", Gene::integer("id", 0, 9), &mut rng);
        assert_eq!(ind.valid_insertion_range(&a), Some((0, 1)));

        let d = call("d", Gene::integer("z", 0, 9), &mut rng).with_dependency("c");
        assert_eq!(ind.valid_insertion_range(&d), Some((1, 2)));

        // needs b before it, but b needs it first
        let cyclic = call("a", Gene::integer("id", 0, 9), &mut rng).with_dependency("b");
        assert_eq!(ind.valid_insertion_range(&cyclic), None);
    }

    #[test]
    fn test_init_references_are_checked_in_order() {
        let mut pk = Gene::sql_primary_key("id", "users", Gene::integer("v", 0, 10));
        pk.mark_all_as_initialized();
        let pk_id = pk.primary_key_id().unwrap();
        let mut fk = Gene::sql_foreign_key("owner", "users");
        fk.set_foreign_key_reference(Some(pk_id)).unwrap();
        fk.mark_all_as_initialized();

        let users = DbAction::new("users", vec![pk]);
        let posts = DbAction::new("posts", vec![fk]);

        let ok = Individual::new(vec![users.clone(), posts.clone()], vec![]);
        assert!(ok.verify_init_action_references());
        let broken = Individual::new(vec![posts, users], vec![]);
        assert!(!broken.verify_init_action_references());
    }

    #[test]
    fn test_canonical_string_ignores_identity() {
        let mut rng = Randomness::new(Some(1));
        let ind = Individual::new(vec![], vec![call("a", Gene::integer("id", 0, 9), &mut rng)]);
        let mut other = ind.clone();
        let fresh = other.resource_calls()[0].actions[0].params[0].gene.copy_with_fresh_ids();
        other.resource_call_mut(0).unwrap().actions[0].params[0].gene = fresh;
        assert_eq!(ind.canonical_string().unwrap(), other.canonical_string().unwrap());
    }
}
