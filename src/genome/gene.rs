use crate::error::{EngineError, Result};
use crate::types::GeneId;
use crate::utils::randomness::Randomness;
use chrono::{Datelike, NaiveDate};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Chance that a non-empty array mutates its size rather than one of its elements
const ARRAY_SIZE_MUTATION_PROBABILITY: f64 = 0.1;
/// Chance that an active optional gene is switched off instead of mutated
const OPTIONAL_TOGGLE_PROBABILITY: f64 = 0.1;
const MAX_INITIAL_ARRAY_SIZE: usize = 3;

/// The value carried by a gene.
///
/// Scalar kinds hold their value directly. Composite kinds own their child
/// genes; an array additionally keeps a template that is not part of its
/// children and is only used to build new elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GeneKind {
    Integer { value: i64, min: i64, max: i64 },
    Double { value: f64, min: f64, max: f64 },
    Boolean { value: bool },
    Str { value: String, min_length: usize, max_length: usize },
    Enum { values: Vec<String>, index: usize },
    /// Children are year, month and day integer genes
    Date { fields: Vec<Gene> },
    Object { fields: Vec<Gene> },
    Array { template: Box<Gene>, elements: Vec<Gene>, max_size: usize },
    Optional { gene: Box<Gene>, active: bool },
    /// Non-empty list of points, the child is an array of x/y objects
    Path { points: Box<Gene> },
    SqlPrimaryKey { table: String, unique_id: u64, gene: Box<Gene> },
    SqlForeignKey { target_table: String, unique_id_of_primary_key: Option<u64> },
}

/// One unit of test input.
///
/// A gene may be bound to other genes of the same individual. Bindings are
/// stored as ids on both sides and are resolved by the owning individual.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gene {
    id: GeneId,
    name: String,
    kind: GeneKind,
    initialized: bool,
    binding_genes: BTreeSet<GeneId>,
}

impl Gene {
    pub fn new(name: impl Into<String>, kind: GeneKind) -> Self {
        let name = name.into();
        assert!(!name.trim().is_empty(), "Empty name for Gene");
        Self {
            id: GeneId::fresh(),
            name,
            kind,
            initialized: false,
            binding_genes: BTreeSet::new(),
        }
    }

    pub fn integer(name: impl Into<String>, min: i64, max: i64) -> Self {
        let value = if min <= 0 && 0 <= max { 0 } else { min };
        Self::new(name, GeneKind::Integer { value, min, max })
    }

    pub fn double(name: impl Into<String>, min: f64, max: f64) -> Self {
        let value = if min <= 0.0 && 0.0 <= max { 0.0 } else { min };
        Self::new(name, GeneKind::Double { value, min, max })
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, GeneKind::Boolean { value: false })
    }

    pub fn string(name: impl Into<String>, min_length: usize, max_length: usize) -> Self {
        Self::new(
            name,
            GeneKind::Str {
                value: "a".repeat(min_length),
                min_length,
                max_length: max_length.max(min_length),
            },
        )
    }

    pub fn enumeration(name: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(name, GeneKind::Enum { values, index: 0 })
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(
            name,
            GeneKind::Date {
                fields: date_fields(),
            },
        )
    }

    pub fn object(name: impl Into<String>, fields: Vec<Gene>) -> Self {
        Self::new(name, GeneKind::Object { fields })
    }

    pub fn array(name: impl Into<String>, template: Gene, max_size: usize) -> Self {
        Self::new(
            name,
            GeneKind::Array {
                template: Box::new(template),
                elements: Vec::new(),
                max_size,
            },
        )
    }

    pub fn optional(name: impl Into<String>, gene: Gene) -> Self {
        Self::new(
            name,
            GeneKind::Optional {
                gene: Box::new(gene),
                active: true,
            },
        )
    }

    pub fn path(name: impl Into<String>) -> Self {
        let point = Gene::object(
            "p",
            vec![Gene::double("x", -1000.0, 1000.0), Gene::double("y", -1000.0, 1000.0)],
        );
        let mut points = Gene::array("points", point, 10);
        if let GeneKind::Array { template, elements, .. } = &mut points.kind {
            elements.push(template.copy_with_fresh_ids());
        }
        Self::new(name, GeneKind::Path { points: Box::new(points) })
    }

    pub fn sql_primary_key(name: impl Into<String>, table: impl Into<String>, gene: Gene) -> Self {
        Self::new(
            name,
            GeneKind::SqlPrimaryKey {
                table: table.into(),
                unique_id: crate::types::fresh_primary_key_id(),
                gene: Box::new(gene),
            },
        )
    }

    pub fn sql_foreign_key(name: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self::new(
            name,
            GeneKind::SqlForeignKey {
                target_table: target_table.into(),
                unique_id_of_primary_key: None,
            },
        )
    }

    /// Builder helper, mostly for fixtures
    pub fn with_value(mut self, v: i64) -> Self {
        if let GeneKind::Integer { value, .. } = &mut self.kind {
            *value = v;
        }
        self
    }

    pub fn id(&self) -> GeneId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &GeneKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut GeneKind {
        &mut self.kind
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            GeneKind::Integer { .. } => "IntegerGene",
            GeneKind::Double { .. } => "DoubleGene",
            GeneKind::Boolean { .. } => "BooleanGene",
            GeneKind::Str { .. } => "StringGene",
            GeneKind::Enum { .. } => "EnumGene",
            GeneKind::Date { .. } => "DateGene",
            GeneKind::Object { .. } => "ObjectGene",
            GeneKind::Array { .. } => "ArrayGene",
            GeneKind::Optional { .. } => "OptionalGene",
            GeneKind::Path { .. } => "PathGene",
            GeneKind::SqlPrimaryKey { .. } => "SqlPrimaryKeyGene",
            GeneKind::SqlForeignKey { .. } => "SqlForeignKeyGene",
        }
    }

    /// Direct children in the tree, array templates excluded
    pub fn children(&self) -> &[Gene] {
        match &self.kind {
            GeneKind::Date { fields } | GeneKind::Object { fields } => fields,
            GeneKind::Array { elements, .. } => elements,
            GeneKind::Optional { gene, .. }
            | GeneKind::Path { points: gene }
            | GeneKind::SqlPrimaryKey { gene, .. } => std::slice::from_ref(gene.as_ref()),
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> &mut [Gene] {
        match &mut self.kind {
            GeneKind::Date { fields } | GeneKind::Object { fields } => fields,
            GeneKind::Array { elements, .. } => elements,
            GeneKind::Optional { gene, .. }
            | GeneKind::Path { points: gene }
            | GeneKind::SqlPrimaryKey { gene, .. } => std::slice::from_mut(gene.as_mut()),
            _ => &mut [],
        }
    }

    /// This gene followed by all of its descendants, depth first
    pub fn flat_view(&self) -> Vec<&Gene> {
        self.flat_view_excluding(&|_| false)
    }

    /// Like [`Gene::flat_view`], but genes matching `exclude` are listed without their subtree
    pub fn flat_view_excluding(&self, exclude: &dyn Fn(&Gene) -> bool) -> Vec<&Gene> {
        let mut all = vec![self];
        if !exclude(self) {
            for child in self.children() {
                all.extend(child.flat_view_excluding(exclude));
            }
        }
        all
    }

    pub fn find(&self, id: GeneId) -> Option<&Gene> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: GeneId) -> Option<&mut Gene> {
        if self.id == id {
            return Some(self);
        }
        self.children_mut().iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Deep copy where every node gets a new identity and no binding
    pub fn copy_with_fresh_ids(&self) -> Gene {
        let mut copy = self.clone();
        copy.refresh_ids();
        copy
    }

    fn refresh_ids(&mut self) {
        self.id = GeneId::fresh();
        self.binding_genes.clear();
        if let GeneKind::SqlPrimaryKey { unique_id, .. } = &mut self.kind {
            *unique_id = crate::types::fresh_primary_key_id();
        }
        for child in self.children_mut() {
            child.refresh_ids();
        }
    }

    //========================= lifecycle ===================================

    /// Randomize (when a source is given) and mark the whole subtree as initialized.
    /// A gene cannot be mutated, printed or compared before this.
    pub fn do_initialize(&mut self, rng: Option<&mut Randomness>) -> Result<()> {
        if self.initialized {
            return Err(EngineError::AlreadyInitialized(self.name.clone()));
        }
        match rng {
            Some(rng) => self.randomize(rng, false),
            None => warn!("Initializing gene {} without randomization", self.type_name()),
        }
        self.mark_all_as_initialized();
        if !self.is_valid() {
            return Err(EngineError::InvalidGene(format!(
                "{} ({}) is invalid after initialization",
                self.name,
                self.type_name()
            )));
        }
        Ok(())
    }

    pub fn mark_all_as_initialized(&mut self) {
        self.initialized = true;
        for child in self.children_mut() {
            child.mark_all_as_initialized();
        }
    }

    pub(crate) fn check_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(EngineError::UninitializedGene(format!(
                "{} ({})",
                self.name,
                self.type_name()
            )));
        }
        Ok(())
    }

    pub fn randomize(&mut self, rng: &mut Randomness, force_new_value: bool) {
        match &mut self.kind {
            GeneKind::Integer { value, min, max } => {
                let old = *value;
                *value = rng.next_int(*min, *max);
                if force_new_value && min < max {
                    while *value == old {
                        *value = rng.next_int(*min, *max);
                    }
                }
            }
            GeneKind::Double { value, min, max } => {
                *value = rng.next_double_range(*min, *max);
            }
            GeneKind::Boolean { value } => {
                *value = if force_new_value { !*value } else { rng.next_bool(0.5) };
            }
            GeneKind::Str { value, min_length, max_length } => {
                *value = rng.next_word(*min_length, *max_length);
            }
            GeneKind::Enum { values, index } => {
                if values.len() > 1 {
                    let old = *index;
                    *index = rng.next_usize(0, values.len() - 1);
                    if force_new_value {
                        while *index == old {
                            *index = rng.next_usize(0, values.len() - 1);
                        }
                    }
                }
            }
            GeneKind::Array { template, elements, max_size } => {
                let n = rng.next_usize(0, (*max_size).min(MAX_INITIAL_ARRAY_SIZE));
                *elements = (0..n).map(|_| new_element(template, rng)).collect();
            }
            GeneKind::Optional { gene, active } => {
                *active = rng.next_bool(0.5);
                gene.randomize(rng, force_new_value);
            }
            GeneKind::SqlForeignKey { .. } => {}
            GeneKind::Date { .. }
            | GeneKind::Object { .. }
            | GeneKind::Path { .. }
            | GeneKind::SqlPrimaryKey { .. } => {
                for child in self.children_mut() {
                    child.randomize(rng, false);
                }
            }
        }
        // composites whose constraints randomization alone does not guarantee
        if !self.mutation_check() {
            self.repair();
        }
    }

    //========================= mutation support ===================================

    pub fn is_mutable(&self) -> bool {
        match &self.kind {
            GeneKind::Integer { min, max, .. } => min < max,
            GeneKind::Double { min, max, .. } => min < max,
            GeneKind::Enum { values, .. } => values.len() > 1,
            GeneKind::Array { max_size, .. } => *max_size > 0,
            GeneKind::SqlForeignKey { .. } => false,
            GeneKind::Date { .. }
            | GeneKind::Object { .. }
            | GeneKind::Path { .. }
            | GeneKind::SqlPrimaryKey { .. } => self.children().iter().any(Gene::is_mutable),
            _ => true,
        }
    }

    /// Static weight used by weight-based selection: composites weigh as much as their content
    pub fn mutation_weight(&self) -> f64 {
        match &self.kind {
            GeneKind::Date { .. } | GeneKind::Object { .. } => self
                .children()
                .iter()
                .filter(|c| c.is_mutable())
                .map(Gene::mutation_weight)
                .sum::<f64>()
                .max(1.0),
            GeneKind::Array { .. } | GeneKind::Optional { .. } => {
                1.0 + self.children().iter().map(Gene::mutation_weight).sum::<f64>()
            }
            GeneKind::Path { points: gene } | GeneKind::SqlPrimaryKey { gene, .. } => {
                gene.mutation_weight()
            }
            _ => 1.0,
        }
    }

    /// Indexes of the children that a mutation of this gene may delegate to.
    /// An empty result means the gene mutates itself.
    pub fn candidates_internal_genes(&self, rng: &mut Randomness) -> Vec<usize> {
        let mutable_children = || {
            self.children()
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_mutable())
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
        };
        match &self.kind {
            GeneKind::Array { elements, .. } => {
                if elements.is_empty() || rng.next_bool(ARRAY_SIZE_MUTATION_PROBABILITY) {
                    Vec::new()
                } else {
                    mutable_children()
                }
            }
            GeneKind::Optional { gene, active } => {
                if !*active || !gene.is_mutable() || rng.next_bool(OPTIONAL_TOGGLE_PROBABILITY) {
                    Vec::new()
                } else {
                    vec![0]
                }
            }
            GeneKind::Date { .. }
            | GeneKind::Object { .. }
            | GeneKind::Path { .. }
            | GeneKind::SqlPrimaryKey { .. } => mutable_children(),
            _ => Vec::new(),
        }
    }

    /// Mutate this gene directly.
    /// Returns false when the kind has no direct mutation (composites delegate to children).
    pub fn mutate(&mut self, rng: &mut Randomness) -> bool {
        match &mut self.kind {
            GeneKind::Integer { value, min, max } => {
                if min >= max {
                    return false;
                }
                if rng.next_bool(0.3) {
                    let old = *value;
                    while *value == old {
                        *value = rng.next_int(*min, *max);
                    }
                } else {
                    let span = ((*max).saturating_sub(*min) / 10).clamp(1, 1000);
                    let delta = rng.next_int(1, span);
                    let up = (*value).saturating_add(delta).clamp(*min, *max);
                    let down = (*value).saturating_sub(delta).clamp(*min, *max);
                    let (first, second) = if rng.next_bool(0.5) { (up, down) } else { (down, up) };
                    *value = if first != *value { first } else { second };
                }
                true
            }
            GeneKind::Double { value, min, max } => {
                if min >= max {
                    return false;
                }
                let range = (*max - *min).min(1000.0);
                let delta = rng.next_double_range(-0.1, 0.1) * range;
                *value = (*value + delta).clamp(*min, *max);
                true
            }
            GeneKind::Boolean { value } => {
                *value = !*value;
                true
            }
            GeneKind::Str { value, min_length, max_length } => {
                let len = value.chars().count();
                if len == 0 || rng.next_bool(0.3) {
                    *value = rng.next_word(*min_length, *max_length);
                    return true;
                }
                let mut chars: Vec<char> = value.chars().collect();
                let pos = rng.next_usize(0, len - 1);
                match rng.next_usize(0, 2) {
                    0 if len > *min_length => {
                        chars.remove(pos);
                    }
                    1 if len < *max_length => {
                        let c = rng.next_word(1, 1);
                        chars.extend(c.chars());
                    }
                    _ => {
                        if let Some(c) = rng.next_word(1, 1).chars().next() {
                            chars[pos] = c;
                        }
                    }
                }
                *value = chars.into_iter().collect();
                true
            }
            GeneKind::Enum { values, index } => {
                if values.len() < 2 {
                    return false;
                }
                let old = *index;
                while *index == old {
                    *index = rng.next_usize(0, values.len() - 1);
                }
                true
            }
            GeneKind::Array { template, elements, max_size } => {
                if *max_size == 0 {
                    return false;
                }
                let grow = elements.is_empty() || (elements.len() < *max_size && rng.next_bool(0.5));
                if grow {
                    elements.push(new_element(template, rng));
                } else {
                    let pos = rng.next_usize(0, elements.len() - 1);
                    elements.remove(pos);
                }
                true
            }
            GeneKind::Optional { active, .. } => {
                *active = !*active;
                true
            }
            _ => false,
        }
    }

    /// Post-condition a mutation must satisfy, e.g. a date must exist in the calendar
    pub fn mutation_check(&self) -> bool {
        match &self.kind {
            GeneKind::Date { .. } => self.date_value().is_some(),
            GeneKind::Path { points } => !points.children().is_empty(),
            _ => true,
        }
    }

    pub fn repair(&mut self) {
        match &mut self.kind {
            GeneKind::Date { fields } => repair_date(fields),
            GeneKind::Path { points } => {
                if let GeneKind::Array { template, elements, .. } = &mut points.kind {
                    if elements.is_empty() {
                        let mut p = template.copy_with_fresh_ids();
                        p.mark_all_as_initialized();
                        elements.push(p);
                    }
                }
            }
            GeneKind::Integer { value, min, max } => *value = (*value).clamp(*min, *max),
            GeneKind::Double { value, min, max } => *value = value.clamp(*min, *max),
            _ => {}
        }
    }

    pub fn is_valid(&self) -> bool {
        let own = match &self.kind {
            GeneKind::Integer { value, min, max } => min <= value && value <= max,
            GeneKind::Double { value, min, max } => *min <= *value && *value <= *max,
            GeneKind::Str { value, min_length, max_length } => {
                let len = value.chars().count();
                *min_length <= len && len <= *max_length
            }
            GeneKind::Enum { values, index } => values.is_empty() || *index < values.len(),
            GeneKind::Array { elements, max_size, .. } => elements.len() <= *max_size,
            _ => self.mutation_check(),
        };
        own && self.children().iter().all(Gene::is_valid)
    }

    pub fn date_value(&self) -> Option<NaiveDate> {
        match &self.kind {
            GeneKind::Date { fields } => NaiveDate::from_ymd_opt(
                i32::try_from(date_field(fields, 0)?).ok()?,
                u32::try_from(date_field(fields, 1)?).ok()?,
                u32::try_from(date_field(fields, 2)?).ok()?,
            ),
            _ => None,
        }
    }

    //========================= values ===================================

    pub fn value_as_printable_string(&self) -> Result<String> {
        self.check_initialized()?;
        let printed = match &self.kind {
            GeneKind::Integer { value, .. } => value.to_string(),
            GeneKind::Double { value, .. } => value.to_string(),
            GeneKind::Boolean { value } => value.to_string(),
            GeneKind::Str { value, .. } => serde_json::to_string(value)?,
            GeneKind::Enum { .. } | GeneKind::Date { .. } | GeneKind::Path { .. } => {
                serde_json::to_string(&self.value_as_raw_string()?)?
            }
            GeneKind::Object { fields } => {
                let mut parts = Vec::new();
                for field in fields {
                    if let GeneKind::Optional { active: false, .. } = field.kind {
                        continue;
                    }
                    parts.push(format!(
                        "{}:{}",
                        serde_json::to_string(&field.name)?,
                        field.value_as_printable_string()?
                    ));
                }
                format!("{{{}}}", parts.join(","))
            }
            GeneKind::Array { elements, .. } => {
                let parts = elements
                    .iter()
                    .map(Gene::value_as_printable_string)
                    .collect::<Result<Vec<_>>>()?;
                format!("[{}]", parts.join(","))
            }
            GeneKind::Optional { gene, active } => {
                if *active {
                    gene.value_as_printable_string()?
                } else {
                    "null".to_string()
                }
            }
            GeneKind::SqlPrimaryKey { gene, .. } => gene.value_as_printable_string()?,
            GeneKind::SqlForeignKey { unique_id_of_primary_key, .. } => match unique_id_of_primary_key {
                Some(id) => id.to_string(),
                None => "null".to_string(),
            },
        };
        Ok(printed)
    }

    /// Value without quoting or escaping
    pub fn value_as_raw_string(&self) -> Result<String> {
        self.check_initialized()?;
        match &self.kind {
            GeneKind::Str { value, .. } => Ok(value.clone()),
            GeneKind::Enum { values, index } => Ok(values.get(*index).cloned().unwrap_or_default()),
            GeneKind::Date { fields } => Ok(format!(
                "{:04}-{:02}-{:02}",
                date_field(fields, 0).unwrap_or_default(),
                date_field(fields, 1).unwrap_or_default(),
                date_field(fields, 2).unwrap_or_default()
            )),
            GeneKind::Path { points } => {
                let coords = points
                    .children()
                    .iter()
                    .map(|p| {
                        let xy = p
                            .children()
                            .iter()
                            .map(Gene::value_as_raw_string)
                            .collect::<Result<Vec<_>>>()?;
                        Ok(xy.join(" "))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("({})", coords.join(", ")))
            }
            GeneKind::SqlPrimaryKey { gene, .. } | GeneKind::Optional { gene, .. } => {
                gene.value_as_raw_string()
            }
            _ => self.value_as_printable_string(),
        }
    }

    /// Copy the value of a gene of the same kind, keeping this gene's identity
    pub fn copy_value_from(&mut self, other: &Gene) -> Result<()> {
        let (expected, actual) = (self.type_name(), other.type_name());
        let mismatch = || EngineError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        };
        match (&mut self.kind, &other.kind) {
            (GeneKind::Integer { value, .. }, GeneKind::Integer { value: v, .. }) => *value = *v,
            (GeneKind::Double { value, .. }, GeneKind::Double { value: v, .. }) => *value = *v,
            (GeneKind::Boolean { value }, GeneKind::Boolean { value: v }) => *value = *v,
            (GeneKind::Str { value, .. }, GeneKind::Str { value: v, .. }) => *value = v.clone(),
            (GeneKind::Enum { values, index }, GeneKind::Enum { values: vs, index: i }) => {
                let wanted = vs.get(*i);
                match values.iter().position(|v| Some(v) == wanted) {
                    Some(pos) => *index = pos,
                    None => return Err(mismatch()),
                }
            }
            (GeneKind::Array { elements, .. }, GeneKind::Array { elements: es, .. }) => {
                *elements = es.iter().map(Gene::copy_with_fresh_ids).collect();
            }
            (GeneKind::Optional { active, gene }, GeneKind::Optional { active: a, gene: g }) => {
                *active = *a;
                gene.copy_value_from(g)?;
            }
            (
                GeneKind::SqlForeignKey { unique_id_of_primary_key, .. },
                GeneKind::SqlForeignKey { unique_id_of_primary_key: u, .. },
            ) => *unique_id_of_primary_key = *u,
            (GeneKind::Date { fields }, GeneKind::Date { fields: fs })
            | (GeneKind::Object { fields }, GeneKind::Object { fields: fs }) => {
                if fields.len() != fs.len() {
                    return Err(mismatch());
                }
                for (f, o) in fields.iter_mut().zip(fs) {
                    f.copy_value_from(o)?;
                }
            }
            (GeneKind::Path { points }, GeneKind::Path { points: p })
            | (GeneKind::SqlPrimaryKey { gene: points, .. }, GeneKind::SqlPrimaryKey { gene: p, .. }) => {
                points.copy_value_from(p)?;
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }

    /// Set the value of this gene from `other`, possibly of a different kind.
    /// Returns false when no sensible coercion exists.
    pub fn bind_value_based_on(&mut self, other: &Gene) -> bool {
        if std::mem::discriminant(&self.kind) == std::mem::discriminant(&other.kind) {
            return self.copy_value_from(other).is_ok();
        }
        if let GeneKind::SqlPrimaryKey { gene, .. } | GeneKind::Optional { gene, .. } = &other.kind {
            return self.bind_value_based_on(gene);
        }
        let raw = match other.value_as_raw_string() {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        match &mut self.kind {
            GeneKind::Integer { value, .. } => match &other.kind {
                GeneKind::Double { value: v, .. } => {
                    *value = *v as i64;
                    true
                }
                _ => raw.trim().parse::<i64>().map(|v| *value = v).is_ok(),
            },
            GeneKind::Double { value, .. } => raw.trim().parse::<f64>().map(|v| *value = v).is_ok(),
            GeneKind::Boolean { value } => raw.trim().parse::<bool>().map(|v| *value = v).is_ok(),
            GeneKind::Str { value, .. } => {
                *value = raw;
                true
            }
            GeneKind::Enum { values, index } => match values.iter().position(|v| *v == raw) {
                Some(pos) => {
                    *index = pos;
                    true
                }
                None => false,
            },
            GeneKind::Date { fields } => match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(date) => {
                    repair_date(fields);
                    set_int(&mut fields[0], date.year() as i64);
                    set_int(&mut fields[1], date.month() as i64);
                    set_int(&mut fields[2], date.day() as i64);
                    repair_date(fields);
                    true
                }
                Err(_) => false,
            },
            GeneKind::SqlPrimaryKey { gene, .. } => gene.bind_value_based_on(other),
            GeneKind::Optional { gene, active } => {
                let bound = gene.bind_value_based_on(other);
                if bound {
                    *active = true;
                }
                bound
            }
            _ => false,
        }
    }

    /// Whether `other` holds the same value; both genes must be initialized and of the same kind
    pub fn contains_same_value_as(&self, other: &Gene) -> Result<bool> {
        self.check_initialized()?;
        other.check_initialized()?;
        if std::mem::discriminant(&self.kind) != std::mem::discriminant(&other.kind) {
            return Err(EngineError::TypeMismatch {
                expected: self.type_name().to_string(),
                actual: other.type_name().to_string(),
            });
        }
        let same = match (&self.kind, &other.kind) {
            (GeneKind::Integer { value: a, .. }, GeneKind::Integer { value: b, .. }) => a == b,
            (GeneKind::Double { value: a, .. }, GeneKind::Double { value: b, .. }) => a == b,
            (GeneKind::Boolean { value: a }, GeneKind::Boolean { value: b }) => a == b,
            (GeneKind::Str { value: a, .. }, GeneKind::Str { value: b, .. }) => a == b,
            (GeneKind::Enum { .. }, GeneKind::Enum { .. }) => {
                self.value_as_raw_string()? == other.value_as_raw_string()?
            }
            (
                GeneKind::SqlForeignKey { unique_id_of_primary_key: a, .. },
                GeneKind::SqlForeignKey { unique_id_of_primary_key: b, .. },
            ) => a == b,
            (GeneKind::Optional { active: a, gene: g }, GeneKind::Optional { active: b, gene: h }) => {
                a == b && g.contains_same_value_as(h)?
            }
            _ => {
                let (mine, theirs) = (self.children(), other.children());
                if mine.len() != theirs.len() {
                    return Ok(false);
                }
                for (a, b) in mine.iter().zip(theirs) {
                    if !a.contains_same_value_as(b)? {
                        return Ok(false);
                    }
                }
                true
            }
        };
        Ok(same)
    }

    /// Whether `other` is plausibly the same gene at a different point of the evolution
    pub fn possibly_same(&self, other: &Gene) -> bool {
        self.name == other.name && self.type_name() == other.type_name()
    }

    //========================= binding ===================================

    pub fn binding_genes(&self) -> &BTreeSet<GeneId> {
        &self.binding_genes
    }

    pub fn is_bound_gene(&self) -> bool {
        !self.binding_genes.is_empty()
    }

    pub fn is_bound_with(&self, id: GeneId) -> bool {
        self.binding_genes.contains(&id)
    }

    pub fn is_same_binding(&self, ids: &BTreeSet<GeneId>) -> bool {
        &self.binding_genes == ids
    }

    /// One side of a binding; use `Individual::bind_genes` to keep the relation symmetric
    pub(crate) fn add_binding_gene(&mut self, id: GeneId) {
        if id != self.id {
            self.binding_genes.insert(id);
        }
    }

    pub(crate) fn remove_binding_gene(&mut self, id: GeneId) -> bool {
        self.binding_genes.remove(&id)
    }

    /// Drop bindings to genes that no longer exist; returns whether anything changed
    pub fn clean_broken_references(&mut self, existing: &HashSet<GeneId>) -> bool {
        let before = self.binding_genes.len();
        self.binding_genes.retain(|id| existing.contains(id));
        before != self.binding_genes.len()
    }

    //========================= sql keys ===================================

    pub fn primary_key_id(&self) -> Option<u64> {
        match &self.kind {
            GeneKind::SqlPrimaryKey { unique_id, .. } => Some(*unique_id),
            _ => None,
        }
    }

    pub fn foreign_key_reference(&self) -> Option<u64> {
        match &self.kind {
            GeneKind::SqlForeignKey { unique_id_of_primary_key, .. } => *unique_id_of_primary_key,
            _ => None,
        }
    }

    pub fn set_foreign_key_reference(&mut self, reference: Option<u64>) -> Result<()> {
        match &mut self.kind {
            GeneKind::SqlForeignKey { unique_id_of_primary_key, .. } => {
                *unique_id_of_primary_key = reference;
                Ok(())
            }
            _ => Err(EngineError::TypeMismatch {
                expected: "SqlForeignKeyGene".to_string(),
                actual: self.type_name().to_string(),
            }),
        }
    }
}

fn new_element(template: &Gene, rng: &mut Randomness) -> Gene {
    let mut element = template.copy_with_fresh_ids();
    element.randomize(rng, false);
    element.mark_all_as_initialized();
    element
}

fn int_value(gene: &Gene) -> Option<i64> {
    match gene.kind {
        GeneKind::Integer { value, .. } => Some(value),
        _ => None,
    }
}

fn set_int(gene: &mut Gene, v: i64) {
    if let GeneKind::Integer { value, .. } = &mut gene.kind {
        *value = v;
    }
}

fn date_fields() -> Vec<Gene> {
    vec![
        Gene::integer("year", 1900, 2100).with_value(2020),
        Gene::integer("month", 1, 12).with_value(1),
        Gene::integer("day", 1, 31).with_value(1),
    ]
}

fn date_field(fields: &[Gene], i: usize) -> Option<i64> {
    fields.get(i).and_then(int_value)
}

/// Restore year/month/day fields and clamp them into a real calendar date
fn repair_date(fields: &mut Vec<Gene>) {
    if fields.len() != 3 || fields.iter().any(|f| int_value(f).is_none()) {
        *fields = date_fields();
        fields.iter_mut().for_each(Gene::mark_all_as_initialized);
    }
    fields.iter_mut().for_each(Gene::repair);
    let year = date_field(fields, 0).unwrap_or(2020) as i32;
    let month = date_field(fields, 1).unwrap_or(1) as u32;
    let last_day = last_day_of_month(year, month);
    let day = date_field(fields, 2).unwrap_or(1).clamp(1, last_day as i64);
    set_int(&mut fields[2], day);
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    (28..=31)
        .rev()
        .find(|d| NaiveDate::from_ymd_opt(year, month, *d).is_some())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized(mut gene: Gene, seed: u64) -> Gene {
        let mut rng = Randomness::new(Some(seed));
        gene.do_initialize(Some(&mut rng)).unwrap();
        gene
    }

    #[test]
    #[should_panic(expected = "Empty name")]
    fn test_blank_name_is_rejected() {
        let _ = Gene::integer("  ", 0, 1);
    }

    #[test]
    fn test_flat_view_lists_every_node_once() {
        let gene = Gene::object(
            "body",
            vec![
                Gene::integer("a", 0, 10),
                Gene::object("inner", vec![Gene::string("s", 0, 5), Gene::boolean("b")]),
                Gene::date("d"),
            ],
        );
        let view = gene.flat_view();
        // body, a, inner, s, b, d, year, month, day
        assert_eq!(view.len(), 9);
        let ids: HashSet<GeneId> = view.iter().map(|g| g.id()).collect();
        assert_eq!(ids.len(), 9);
        assert_eq!(view[0].id(), gene.id());
    }

    #[test]
    fn test_flat_view_exclude_keeps_excluded_node_only() {
        let gene = Gene::object("body", vec![Gene::date("d"), Gene::integer("a", 0, 1)]);
        let view = gene.flat_view_excluding(&|g| matches!(g.kind(), GeneKind::Date { .. }));
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn test_uninitialized_gene_cannot_be_printed() {
        let gene = Gene::integer("a", 0, 10);
        assert!(matches!(
            gene.value_as_printable_string(),
            Err(EngineError::UninitializedGene(_))
        ));
    }

    #[test]
    fn test_double_initialization_fails() {
        let mut gene = initialized(Gene::boolean("b"), 1);
        assert!(matches!(
            gene.do_initialize(None),
            Err(EngineError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_randomized_dates_are_valid() {
        for seed in 0..50 {
            let gene = initialized(Gene::date("d"), seed);
            assert!(gene.date_value().is_some(), "seed {} gave {:?}", seed, gene);
        }
    }

    #[test]
    fn test_date_repair_clamps_day() {
        let mut gene = Gene::date("d");
        if let GeneKind::Date { fields } = gene.kind_mut() {
            set_int(&mut fields[0], 2023);
            set_int(&mut fields[1], 2);
            set_int(&mut fields[2], 30);
        }
        assert!(!gene.mutation_check());
        gene.repair();
        assert_eq!(gene.date_value(), NaiveDate::from_ymd_opt(2023, 2, 28));
    }

    #[test]
    fn test_date_with_missing_fields_is_repaired() {
        let mut gene = Gene::new(
            "d",
            GeneKind::Date {
                fields: vec![Gene::integer("year", 1900, 2100).with_value(1999)],
            },
        );
        gene.mark_all_as_initialized();
        assert!(gene.date_value().is_none());
        assert!(!gene.is_valid());
        assert!(gene.value_as_printable_string().is_ok());

        gene.repair();
        assert_eq!(gene.children().len(), 3);
        assert!(gene.is_valid());
        assert_eq!(gene.date_value(), NaiveDate::from_ymd_opt(2020, 1, 1));
    }

    #[test]
    fn test_date_bound_to_out_of_range_text_stays_valid() {
        let mut text = initialized(Gene::string("s", 0, 12), 1);
        if let GeneKind::Str { value, .. } = text.kind_mut() {
            *value = "2250-06-15".to_string();
        }
        let mut date = initialized(Gene::date("d"), 2);
        assert!(date.bind_value_based_on(&text));
        assert!(date.is_valid());
        assert_eq!(date.date_value(), NaiveDate::from_ymd_opt(2100, 6, 15));
    }

    #[test]
    fn test_path_is_never_empty_after_randomization() {
        for seed in 0..20 {
            let gene = initialized(Gene::path("route"), seed);
            assert!(gene.mutation_check());
            assert!(gene.value_as_raw_string().unwrap().starts_with('('));
        }
    }

    #[test]
    fn test_bind_string_from_integer_and_back() {
        let source = initialized(Gene::integer("id", 0, 1000), 3);
        let mut target = initialized(Gene::string("id", 0, 10), 4);
        assert!(target.bind_value_based_on(&source));
        assert_eq!(
            target.value_as_raw_string().unwrap(),
            source.value_as_raw_string().unwrap()
        );

        let mut back = initialized(Gene::integer("id", 0, 1000), 5);
        assert!(back.bind_value_based_on(&target));
        assert!(back.contains_same_value_as(&source).unwrap());
    }

    #[test]
    fn test_bind_enum_rejects_unknown_value() {
        let mut source = Gene::string("s", 0, 5);
        source.mark_all_as_initialized();
        let mut target = Gene::enumeration("e", vec!["A".into(), "B".into()]);
        target.mark_all_as_initialized();
        assert!(!target.bind_value_based_on(&source));
    }

    #[test]
    fn test_contains_same_value_rejects_other_kind() {
        let a = initialized(Gene::integer("a", 0, 10), 1);
        let b = initialized(Gene::boolean("b"), 1);
        assert!(matches!(
            a.contains_same_value_as(&b),
            Err(EngineError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_fresh_copy_has_new_identity_and_same_value() {
        let gene = initialized(Gene::object("o", vec![Gene::integer("a", 0, 100)]), 9);
        let copy = gene.copy_with_fresh_ids();
        assert_ne!(copy.id(), gene.id());
        assert_ne!(copy.children()[0].id(), gene.children()[0].id());
        assert!(copy.contains_same_value_as(&gene).unwrap());
    }

    #[test]
    fn test_foreign_key_is_not_mutable() {
        let fk = Gene::sql_foreign_key("owner", "users");
        assert!(!fk.is_mutable());
        let obj = Gene::object("o", vec![Gene::sql_foreign_key("fk", "t")]);
        assert!(!obj.is_mutable());
    }

    #[test]
    fn test_leaf_mutation_changes_integer() {
        let mut rng = Randomness::new(Some(11));
        let mut gene = initialized(Gene::integer("a", 0, 100), 11);
        let before = gene.value_as_raw_string().unwrap();
        assert!(gene.mutate(&mut rng));
        assert!(gene.is_valid());
        // a delta of zero is never drawn
        assert_ne!(before, gene.value_as_raw_string().unwrap());
    }
}
