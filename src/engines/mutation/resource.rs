use super::impact::{selection_weight, ImpactInfo};
use super::standard::MutatedGeneSpecification;
use super::weight_control::MutationWeightControl;
use crate::config::ResourceConfig;
use crate::error::{EngineError, Result};
use crate::genome::{AuthInfo, Individual, ResourceCall};
use crate::problem::{DependencyManager, ResourceManager};
use crate::utils::randomness::Randomness;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Structural edits over the resource calls of an individual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MutationType {
    /// Remove one or more calls of a resource
    Delete,
    /// Exchange the positions of two calls
    Swap,
    /// Insert a new call
    Add,
    /// Remove a call and insert a different resource at its place
    Replace,
    /// Regenerate a call with another template of the same resource
    Modify,
    /// Remove insertions into a table
    SqlRemove,
    /// Add insertions into a table
    SqlAdd,
}

impl MutationType {
    pub const ALL: [MutationType; 7] = [
        MutationType::Delete,
        MutationType::Swap,
        MutationType::Add,
        MutationType::Replace,
        MutationType::Modify,
        MutationType::SqlRemove,
        MutationType::SqlAdd,
    ];

    /// Minimum number of resource calls
    pub fn min_size(self) -> usize {
        match self {
            MutationType::Delete | MutationType::Swap => 2,
            _ => 1,
        }
    }

    /// Minimum number of initializing actions
    pub fn min_sql_size(self) -> usize {
        match self {
            MutationType::SqlRemove => 1,
            _ => 0,
        }
    }

    pub fn is_sql(self) -> bool {
        matches!(self, MutationType::SqlAdd | MutationType::SqlRemove)
    }

    /// Whether the edit can change how many calls or rows a resource or table has
    pub fn changes_size(self) -> bool {
        matches!(
            self,
            MutationType::Add | MutationType::Delete | MutationType::SqlAdd | MutationType::SqlRemove
        )
    }
}

impl std::fmt::Display for MutationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MutationType::Delete => "DELETE",
            MutationType::Swap => "SWAP",
            MutationType::Add => "ADD",
            MutationType::Replace => "REPLACE",
            MutationType::Modify => "MODIFY",
            MutationType::SqlRemove => "SQL_REMOVE",
            MutationType::SqlAdd => "SQL_ADD",
        };
        write!(f, "{}", s)
    }
}

/// Structural mutation of individuals grouped into resource calls.
///
/// Every edit keeps calls after the resources they depend on, never exceeds
/// the action budget, and keeps foreign keys among initializing actions resolvable.
pub struct ResourceStructureMutator {
    config: ResourceConfig,
    mwc: MutationWeightControl,
    resources: Box<dyn ResourceManager>,
    dependencies: Box<dyn DependencyManager>,
}

impl ResourceStructureMutator {
    pub fn new(
        config: ResourceConfig,
        mwc: MutationWeightControl,
        resources: Box<dyn ResourceManager>,
        dependencies: Box<dyn DependencyManager>,
    ) -> Self {
        Self {
            config,
            mwc,
            resources,
            dependencies,
        }
    }

    pub fn resources(&self) -> &dyn ResourceManager {
        self.resources.as_ref()
    }

    //========================= applicability ===================================

    pub fn is_applicable(&self, kind: MutationType, ind: &Individual, handle_size: bool) -> bool {
        let calls = ind.resource_calls().len();
        if !ind.is_grouped() || calls < kind.min_size() || ind.init_actions().len() < kind.min_sql_size() {
            return false;
        }
        let deletable = ind.resource_calls().iter().filter(|c| c.deletable).count();
        match kind {
            MutationType::Swap => !handle_size && !self.swap_candidates(ind).is_empty(),
            MutationType::Replace => {
                !handle_size && deletable > 0 && !self.resources.covers_all(ind)
            }
            MutationType::Modify => !handle_size && deletable > 0,
            MutationType::Add => self.fits_new_call(ind),
            MutationType::Delete => deletable > 0 && calls >= 2,
            MutationType::SqlAdd => handle_size && !self.resources.tables().is_empty(),
            MutationType::SqlRemove => {
                handle_size && !self.resources.tables().is_empty() && !ind.init_actions().is_empty()
            }
        }
    }

    pub fn applicable_mutations(&self, ind: &Individual, handle_size: bool) -> Vec<MutationType> {
        MutationType::ALL
            .iter()
            .copied()
            .filter(|k| self.is_applicable(*k, ind, handle_size))
            .collect()
    }

    pub fn can_apply(&self, ind: &Individual) -> bool {
        ind.is_grouped() && !self.applicable_mutations(ind, false).is_empty()
    }

    /// Whether this mutation should manipulate resource or table sizes
    pub fn do_handle_size(&self, focused_search: bool, rng: &mut Randomness) -> bool {
        focused_search
            && self.config.size_handling_enabled()
            && rng.next_bool(self.config.prob_of_handling_length)
    }

    fn does_apply_dependency_heuristics(&self, rng: &mut Randomness) -> bool {
        self.dependencies.is_dependency_not_empty()
            && rng.next_bool(self.config.prob_of_enabling_resource_dependency_heuristics)
    }

    /// `a` needs `b` earlier in the test, either declared on the call or learned
    fn depends(&self, a: &ResourceCall, b: &ResourceCall) -> bool {
        a.resource_key != b.resource_key
            && (a.depends_on_key(&b.resource_key)
                || self.dependencies.dependencies_of(&a.resource_key).contains(&b.resource_key))
    }

    fn swap_candidates(&self, ind: &Individual) -> BTreeMap<usize, BTreeSet<usize>> {
        ind.extract_swap_candidates_with(&|a: &ResourceCall, b: &ResourceCall| self.depends(a, b))
    }

    //========================= entry points ===================================

    /// Apply one structural mutation chosen among those applicable to `ind`
    pub fn mutate_structure(
        &self,
        ind: &mut Individual,
        impact: Option<&ImpactInfo>,
        focused_search: bool,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<MutationType> {
        if !ind.is_grouped() {
            return Err(EngineError::InapplicableMutation(
                "individual is not grouped into resource calls".to_string(),
            ));
        }
        let handle_size = self.do_handle_size(focused_search, rng);
        let decided = if handle_size {
            self.decide_size_mutation(ind, impact, rng)?
        } else {
            None
        };
        let kind = match decided {
            Some(kind) => kind,
            None => {
                let available = self.applicable_mutations(ind, false);
                *rng.choose(&available).ok_or_else(|| {
                    EngineError::InapplicableMutation("no structure mutation applies".to_string())
                })?
            }
        };
        self.execute(kind, ind, impact, decided.is_some(), rng, spec)
    }

    /// Apply `kind` to `ind`. ADD without budget for any call degrades to DELETE.
    /// Returns the mutation actually applied.
    pub fn apply(
        &self,
        kind: MutationType,
        ind: &mut Individual,
        impact: Option<&ImpactInfo>,
        handle_size: bool,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<MutationType> {
        let degrading_add = kind == MutationType::Add && !self.fits_new_call(ind);
        if !degrading_add && !self.is_applicable(kind, ind, handle_size) {
            return Err(EngineError::InapplicableMutation(kind.to_string()));
        }
        self.execute(kind, ind, impact, handle_size, rng, spec)
    }

    fn execute(
        &self,
        kind: MutationType,
        ind: &mut Individual,
        impact: Option<&ImpactInfo>,
        handle_size: bool,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<MutationType> {
        trace!("applying {} (size handling: {})", kind, handle_size);
        spec.size_handled = handle_size;
        let applied = match kind {
            MutationType::Add => self.handle_add(ind, impact, handle_size, rng, spec)?,
            MutationType::Delete => {
                self.handle_delete(ind, impact, handle_size, rng, spec)?;
                MutationType::Delete
            }
            MutationType::Swap => {
                self.handle_swap(ind, rng, spec)?;
                MutationType::Swap
            }
            MutationType::Replace => {
                self.handle_replace(ind, rng, spec)?;
                MutationType::Replace
            }
            MutationType::Modify => {
                self.handle_modify(ind, rng, spec)?;
                MutationType::Modify
            }
            MutationType::SqlAdd => {
                self.handle_add_sql(ind, impact, rng, spec)?;
                MutationType::SqlAdd
            }
            MutationType::SqlRemove => {
                self.handle_remove_sql(ind, impact, rng, spec)?;
                MutationType::SqlRemove
            }
        };
        spec.structure = Some(applied);
        Ok(applied)
    }

    /// Restrict to size-changing edits, weighted by learned size impacts when adaptive
    fn decide_size_mutation(
        &self,
        ind: &Individual,
        impact: Option<&ImpactInfo>,
        rng: &mut Randomness,
    ) -> Result<Option<MutationType>> {
        let candidates: Vec<MutationType> = self
            .applicable_mutations(ind, true)
            .into_iter()
            .filter(|k| k.changes_size())
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        if !self.config.enable_adaptive_resource_structure_mutation {
            return Ok(rng.choose(&candidates).copied());
        }
        let impact = impact.ok_or_else(|| {
            EngineError::MissingImpact("adaptive resource structure mutation".to_string())
        })?;

        let impactful: Vec<MutationType> = candidates
            .iter()
            .copied()
            .filter(|k| {
                if k.is_sql() {
                    impact.any_sql_table_size_impact()
                } else {
                    impact.any_resource_size_impact()
                }
            })
            .collect();
        if impactful.is_empty() {
            return Ok(rng.choose(&candidates).copied());
        }
        let weighted: Vec<(MutationType, f64)> = impactful
            .iter()
            .map(|k| (*k, selection_weight(impact.structure_impact(*k), self.mwc.weighting())))
            .collect();
        let selected = self.mwc.select_subset_with_weight(&weighted, true, 1.0, rng);
        Ok(rng.choose(&selected).copied())
    }

    //========================= helpers ===================================

    fn remaining_budget(&self, ind: &Individual) -> usize {
        self.config.max_test_size.saturating_sub(ind.size())
    }

    /// Whether the smallest template still fits in the action budget
    fn fits_new_call(&self, ind: &Individual) -> bool {
        let remaining = self.remaining_budget(ind);
        remaining > 0
            && self
                .resources
                .min_call_size()
                .is_some_and(|size| size <= remaining)
    }

    fn pick_auth(&self, ind: &Individual, rng: &mut Randomness) -> Option<AuthInfo> {
        let auths = ind.see_auths();
        rng.choose(&auths).cloned()
    }

    fn deletable_positions(ind: &Individual) -> Vec<usize> {
        ind.resource_calls()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.deletable)
            .map(|(i, _)| i)
            .collect()
    }

    fn select_key(
        &self,
        candidates: &[String],
        by_sql: bool,
        impact: Option<&ImpactInfo>,
        rng: &mut Randomness,
    ) -> Result<String> {
        if candidates.is_empty() {
            return Err(EngineError::InapplicableMutation(format!(
                "no {} candidate",
                if by_sql { "table" } else { "resource" }
            )));
        }
        if !self.config.enable_adaptive_resource_structure_mutation {
            return Ok(rng.choose(candidates).cloned().unwrap_or_default());
        }
        let impact = impact.ok_or_else(|| {
            EngineError::MissingImpact("adaptive resource selection".to_string())
        })?;
        let weighted: Vec<(String, f64)> = candidates
            .iter()
            .map(|c| {
                let record = if by_sql {
                    impact.table_size_impact(c)
                } else {
                    impact.resource_size_impact(c)
                };
                (c.clone(), selection_weight(record, self.mwc.weighting()))
            })
            .collect();
        let selected = self.mwc.select_subset_with_weight(&weighted, true, 1.0, rng);
        rng.choose(&selected)
            .cloned()
            .ok_or_else(|| EngineError::EmptySelection {
                strategy: "resource size impact".to_string(),
                candidates: candidates.len(),
            })
    }

    //========================= dependency heuristics ===================================

    /// Deletable calls whose resource no other call relies on
    fn identify_del_non_dep_resource(&self, ind: &Individual) -> Vec<usize> {
        let calls = ind.resource_calls();
        Self::deletable_positions(ind)
            .into_iter()
            .filter(|i| {
                calls
                    .iter()
                    .enumerate()
                    .all(|(j, other)| j == *i || !self.depends(other, &calls[*i]))
            })
            .collect()
    }

    /// A call at or after `from` whose dependency is missing before it, with a fresh call of that dependency
    fn add_dependent_resource(
        &self,
        ind: &Individual,
        max_actions: usize,
        from: usize,
        rng: &mut Randomness,
    ) -> Result<Option<(usize, ResourceCall)>> {
        let calls = ind.resource_calls();
        let known: BTreeSet<String> = self.resources.resource_keys().into_iter().collect();
        let mut missing: Vec<(usize, String)> = Vec::new();
        for (p, call) in calls.iter().enumerate().skip(from) {
            let mut required = self.dependencies.dependencies_of(&call.resource_key);
            required.extend(call.depends_on.iter().cloned());
            for key in required {
                let satisfied = calls[..p].iter().any(|c| c.resource_key == key);
                if key != call.resource_key && !satisfied && known.contains(&key) {
                    missing.push((p, key));
                }
            }
        }
        let Some((dependent, key)) = rng.choose(&missing).cloned() else {
            return Ok(None);
        };
        let creation = self.resources.creation_template(&key);
        let Some(call) = self
            .resources
            .sample_call(&key, creation.as_deref(), max_actions, rng)?
        else {
            return Ok(None);
        };
        match ind.valid_insertion_range(&call) {
            Some((lowest, _)) if lowest <= dependent => Ok(Some((dependent, call))),
            _ => Ok(None),
        }
    }

    /// A call that would break a learned dependency if left in place, with where to move it
    fn dependency_swap(
        &self,
        ind: &Individual,
        candidates: &BTreeMap<usize, BTreeSet<usize>>,
        rng: &mut Randomness,
    ) -> Option<(usize, usize)> {
        let calls = ind.resource_calls();
        let fixing: Vec<(usize, usize)> = candidates
            .iter()
            .flat_map(|(i, partners)| partners.iter().map(move |j| (*i, *j)))
            .filter(|(i, j)| self.depends(&calls[*i], &calls[*j]))
            .collect();
        rng.choose(&fixing).copied()
    }

    /// Resources not yet tried in the individual come first
    fn add_random_resource(
        &self,
        ind: &Individual,
        max_actions: usize,
        rng: &mut Randomness,
    ) -> Result<ResourceCall> {
        let present: BTreeSet<(String, String)> = ind
            .resource_calls()
            .iter()
            .map(|c| (c.resource_key.clone(), c.template.clone()))
            .collect();
        let keys = self.resources.resource_keys();
        let uncovered: Vec<(String, String)> = keys
            .iter()
            .flat_map(|k| {
                self.resources
                    .templates(k)
                    .into_iter()
                    .map(move |t| (k.clone(), t))
            })
            .filter(|pair| !present.contains(pair))
            .collect();

        if let Some((key, template)) = rng.choose(&uncovered).cloned() {
            if let Some(call) = self
                .resources
                .sample_call(&key, Some(&template), max_actions, rng)?
            {
                return Ok(call);
            }
        }
        for key in rng.choose_n(&keys, keys.len()) {
            if let Some(call) = self.resources.sample_call(&key, None, max_actions, rng)? {
                return Ok(call);
            }
        }
        Err(EngineError::Sampling(format!(
            "no resource call fits in {} actions",
            max_actions
        )))
    }

    //========================= handlers ===================================

    fn handle_add(
        &self,
        ind: &mut Individual,
        impact: Option<&ImpactInfo>,
        handle_size: bool,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<MutationType> {
        let auth = self.pick_auth(ind, rng);
        let mut max = self.remaining_budget(ind);
        if !self.fits_new_call(ind) {
            if !self.is_applicable(MutationType::Delete, ind, handle_size) {
                return Err(EngineError::InapplicableMutation(
                    "ADD without budget for any call, and DELETE does not apply".to_string(),
                ));
            }
            debug!("no call fits the {} actions left for ADD, deleting instead", max);
            self.handle_delete(ind, impact, handle_size, rng, spec)?;
            return Ok(MutationType::Delete);
        }

        if handle_size {
            let keys: Vec<String> = ind
                .resource_calls()
                .iter()
                .map(|c| c.resource_key.clone())
                .filter(|k| self.resources.creation_template(k).is_some())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if !keys.is_empty() {
                let key = self.select_key(&keys, false, impact, rng)?;
                let creation = self.resources.creation_template(&key);
                if let Some(first) = self.resources.sample_call(&key, creation.as_deref(), max, rng)? {
                    let call_size = first.action_size().max(1);
                    let by_budget = (max as f64 / call_size as f64).round() as usize;
                    let upper = self.config.max_size_of_handling_resource.min(by_budget).max(1);
                    let num = rng.next_usize(1, upper);
                    let position = ind
                        .resource_calls()
                        .iter()
                        .position(|c| c.resource_key == key)
                        .unwrap_or(0);

                    let mut next = Some(first);
                    for n in 0..num {
                        let Some(mut call) = next.take() else {
                            break;
                        };
                        if call.action_size() > max {
                            break;
                        }
                        if let Some(auth) = &auth {
                            call.set_auth(auth);
                        }
                        max -= call.action_size();
                        ind.add_resource_call(position, call);
                        spec.resource_keys.push(key.clone());
                        if n + 1 < num && max > 0 {
                            next = self.resources.sample_call(&key, creation.as_deref(), max, rng)?;
                        }
                    }
                    return Ok(MutationType::Add);
                }
            }
        }

        if self.does_apply_dependency_heuristics(rng) {
            if let Some((dependent, mut call)) = self.add_dependent_resource(ind, max, 0, rng)? {
                let (lowest, highest) = ind.valid_insertion_range(&call).unwrap_or((0, dependent));
                let position = rng.next_usize(lowest, dependent.min(highest));
                if let Some(auth) = &auth {
                    call.set_auth(auth);
                }
                spec.resource_keys.push(call.resource_key.clone());
                ind.add_resource_call(position, call);
                ind.bind_resource_calls(position, dependent + 1)?;
                return Ok(MutationType::Add);
            }
        }

        let mut call = self.add_random_resource(ind, max, rng)?;
        let (lowest, highest) = ind.valid_insertion_range(&call).ok_or_else(|| {
            EngineError::InapplicableMutation(format!(
                "no position keeps the dependencies of {} in order",
                call.resource_key
            ))
        })?;
        let position = rng.next_usize(lowest, highest);
        if let Some(auth) = &auth {
            call.set_auth(auth);
        }
        spec.resource_keys.push(call.resource_key.clone());
        ind.add_resource_call(position, call);
        Ok(MutationType::Add)
    }

    fn handle_delete(
        &self,
        ind: &mut Individual,
        impact: Option<&ImpactInfo>,
        handle_size: bool,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<()> {
        let deletable = Self::deletable_positions(ind);
        let candidates = if self.does_apply_dependency_heuristics(rng) {
            let non_dep = self.identify_del_non_dep_resource(ind);
            if non_dep.is_empty() {
                deletable
            } else {
                non_dep
            }
        } else {
            deletable
        };
        let calls = ind.resource_calls().len();
        if candidates.is_empty() || calls < 2 {
            return Err(EngineError::InapplicableMutation(MutationType::Delete.to_string()));
        }

        let keys: Vec<String> = candidates
            .iter()
            .map(|i| ind.resource_calls()[*i].resource_key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let key = self.select_key(&keys, false, impact, rng)?;
        let removable: Vec<usize> = candidates
            .into_iter()
            .filter(|i| ind.resource_calls()[*i].resource_key == key)
            .collect();

        let num = if handle_size {
            let upper = self
                .config
                .max_size_of_handling_resource
                .min(removable.len().min(calls - 1))
                .max(1);
            rng.next_usize(1, upper)
        } else {
            1
        };
        let removed = rng.choose_n(&removable, num.min(calls - 1));
        for _ in &removed {
            spec.resource_keys.push(key.clone());
        }
        ind.remove_resource_calls(&removed);
        Ok(())
    }

    fn handle_swap(
        &self,
        ind: &mut Individual,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<()> {
        let candidates = self.swap_candidates(ind);
        if candidates.is_empty() {
            return Err(EngineError::InapplicableMutation(MutationType::Swap.to_string()));
        }

        let from_dependency = if self.does_apply_dependency_heuristics(rng) {
            self.dependency_swap(ind, &candidates, rng)
        } else {
            None
        };
        let (first, second) = match from_dependency {
            Some(pair) => pair,
            None => {
                let firsts: Vec<usize> = candidates.keys().copied().collect();
                let first = *rng.choose(&firsts).ok_or_else(|| {
                    EngineError::InapplicableMutation(MutationType::Swap.to_string())
                })?;
                let partners: Vec<usize> = candidates[&first].iter().copied().collect();
                let second = *rng.choose(&partners).ok_or_else(|| {
                    EngineError::InapplicableMutation(MutationType::Swap.to_string())
                })?;
                (first, second)
            }
        };
        spec.resource_keys.push(ind.resource_calls()[first].resource_key.clone());
        spec.resource_keys.push(ind.resource_calls()[second].resource_key.clone());
        ind.swap_resource_call(first, second);
        Ok(())
    }

    fn handle_replace(
        &self,
        ind: &mut Individual,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<()> {
        let auth = self.pick_auth(ind, rng);
        let from_dependency = self.does_apply_dependency_heuristics(rng);
        let deletable = Self::deletable_positions(ind);
        let candidates = if from_dependency {
            let non_dep = self.identify_del_non_dep_resource(ind);
            if non_dep.is_empty() {
                deletable
            } else {
                non_dep
            }
        } else {
            deletable
        };
        let position = *rng
            .choose(&candidates)
            .ok_or_else(|| EngineError::InapplicableMutation(MutationType::Replace.to_string()))?;

        let last = ind.resource_calls().len() - 1;
        let max = self.remaining_budget(ind) + ind.resource_calls()[position].action_size();
        let dependent = if from_dependency && position != last {
            self.add_dependent_resource(ind, max, position + 1, rng)?
        } else {
            None
        };
        let (dependent, mut call) = match dependent {
            Some((p, call)) => (Some(p), call),
            None => (None, self.add_random_resource(ind, max, rng)?),
        };
        if let Some(auth) = &auth {
            call.set_auth(auth);
        }

        let mut edited = ind.clone();
        let removed = edited.remove_resource_call(position);
        let (lowest, highest) = edited.valid_insertion_range(&call).ok_or_else(|| {
            EngineError::InapplicableMutation(format!(
                "{}: no position keeps the dependencies of {} in order",
                MutationType::Replace,
                call.resource_key
            ))
        })?;
        let insert_at = position.clamp(lowest, highest);
        if let Some(old) = removed {
            spec.resource_keys.push(old.resource_key);
        }
        spec.resource_keys.push(call.resource_key.clone());
        edited.add_resource_call(insert_at, call);

        // the dependent call shifted left on removal and right again on insertion
        if let Some(p) = dependent {
            if insert_at < p {
                edited.bind_resource_calls(insert_at, p)?;
            }
        }
        *ind = edited;
        Ok(())
    }

    fn handle_modify(
        &self,
        ind: &mut Individual,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<()> {
        let auth = self.pick_auth(ind, rng);
        let deletable = Self::deletable_positions(ind);
        let position = *rng
            .choose(&deletable)
            .ok_or_else(|| EngineError::InapplicableMutation(MutationType::Modify.to_string()))?;
        let old = &ind.resource_calls()[position];
        let key = old.resource_key.clone();
        let max = self.remaining_budget(ind) + old.action_size();

        let others: Vec<String> = self
            .resources
            .templates(&key)
            .into_iter()
            .filter(|t| *t != old.template)
            .collect();
        let template = rng.choose(&others).cloned();
        let mut call = self
            .resources
            .sample_call(&key, template.as_deref(), max, rng)?
            .ok_or_else(|| EngineError::InapplicableMutation(MutationType::Modify.to_string()))?;
        call.depends_on.extend(old.depends_on.iter().cloned());
        if let Some(auth) = &auth {
            call.set_auth(auth);
        }
        spec.resource_keys.push(key);
        ind.replace_resource_call(position, call);
        Ok(())
    }

    fn handle_add_sql(
        &self,
        ind: &mut Individual,
        impact: Option<&ImpactInfo>,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<()> {
        let upper = self
            .config
            .max_size_of_handling_resource
            .min(self.config.max_sql_actions_per_resource)
            .max(1);
        let num = rng.next_usize(1, upper);

        let all_tables: BTreeSet<String> = self.resources.tables().into_iter().collect();
        let existing: BTreeSet<String> = ind.init_actions().iter().map(|a| a.table.clone()).collect();
        let mut candidates: BTreeSet<String> = if self.does_apply_dependency_heuristics(rng) {
            ind.resource_calls()
                .iter()
                .flat_map(|c| self.dependencies.related_tables(&c.resource_key))
                .filter(|t| all_tables.contains(t))
                .collect()
        } else {
            existing
        };
        if candidates.is_empty() {
            candidates = all_tables;
        }
        let candidates: Vec<String> = candidates.into_iter().collect();
        let table = self.select_key(&candidates, true, impact, rng)?;

        let added = self
            .resources
            .create_db_actions(&table, num, ind.init_actions(), rng)?;
        let tables: BTreeSet<String> = added.iter().map(|a| a.table.clone()).collect();
        spec.tables.extend(tables);
        ind.add_initializing_actions(added);
        Ok(())
    }

    fn handle_remove_sql(
        &self,
        ind: &mut Individual,
        impact: Option<&ImpactInfo>,
        rng: &mut Randomness,
        spec: &mut MutatedGeneSpecification,
    ) -> Result<()> {
        let init = ind.init_actions();
        let existing: BTreeSet<String> = init.iter().map(|a| a.table.clone()).collect();
        let mut candidates = existing.clone();
        if self.does_apply_dependency_heuristics(rng) {
            let related: BTreeSet<String> = ind
                .resource_calls()
                .iter()
                .flat_map(|c| self.dependencies.related_tables(&c.resource_key))
                .collect();
            let unrelated: BTreeSet<String> = existing.difference(&related).cloned().collect();
            if !unrelated.is_empty() {
                candidates = unrelated;
            }
        }
        let candidates: Vec<String> = candidates.into_iter().collect();
        let table = self.select_key(&candidates, true, impact, rng)?;

        let rows: Vec<usize> = init
            .iter()
            .enumerate()
            .filter(|(_, a)| a.table == table)
            .map(|(i, _)| i)
            .collect();
        let upper = self
            .config
            .max_size_of_handling_resource
            .min(rows.len().min(init.len().saturating_sub(1)))
            .max(1);
        let num = rng.next_usize(1, upper);
        let chosen = rng.choose_n(&rows, num);

        // a removed primary key takes every later row referencing it along
        let mut removed: BTreeSet<usize> = chosen.iter().copied().collect();
        let mut pending = chosen;
        while let Some(index) = pending.pop() {
            let pks = init[index].primary_keys();
            if pks.is_empty() {
                continue;
            }
            for later in index + 1..init.len() {
                if !removed.contains(&later) && init[later].references_any(&pks) {
                    removed.insert(later);
                    pending.push(later);
                }
            }
        }

        let tables: BTreeSet<String> = removed.iter().map(|i| init[*i].table.clone()).collect();
        spec.tables.extend(tables);
        let removed: Vec<usize> = removed.into_iter().collect();
        ind.remove_init_db_actions(&removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_type_properties() {
        assert_eq!(MutationType::Delete.min_size(), 2);
        assert_eq!(MutationType::Swap.min_size(), 2);
        assert_eq!(MutationType::Add.min_size(), 1);
        assert_eq!(MutationType::SqlRemove.min_sql_size(), 1);
        assert!(MutationType::SqlAdd.is_sql());
        assert!(!MutationType::Swap.changes_size());
        assert!(!MutationType::Replace.changes_size());
        assert_eq!(MutationType::SqlRemove.to_string(), "SQL_REMOVE");
    }
}
