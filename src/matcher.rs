//! # Operation Matcher
//!
//! Scores every catalog operation against an unlabeled example and selects
//! one. Scoring is side-aware: example request fields are compared with the
//! request schema (path, query and body fields), example response fields with
//! the response schema.
//!
//! ```text
//! overlap = coverage_weight * coverage + precision_weight * precision
//! total   = overlap + route_bonus? + verb_bonus?
//! ```
//!
//! - coverage: share of the example's field weight found in the schema. A
//!   field at depth d weighs d; an exact path hit earns the full weight, a
//!   name-only hit elsewhere on the same side earns `loose_match_factor`.
//! - precision: share of the schema's fields (on the sides the example shows)
//!   that the example hits exactly, so an exact shape beats a superset.
//! - bonuses apply only when the example carries a path / method.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FillError, Result, ScoredName};
use crate::example::Example;
use crate::interface::{InterfaceCatalog, Operation, Schema};

/// Scores closer than this are a tie.
pub const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchWeights {
    pub coverage_weight:    f64,
    pub precision_weight:   f64,
    pub loose_match_factor: f64,
    pub depth_weighting:    bool,
    pub route_bonus:        f64,
    pub verb_bonus:         f64,
    pub threshold:          f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            coverage_weight:    0.75,
            precision_weight:   0.25,
            loose_match_factor: 0.5,
            depth_weighting:    true,
            route_bonus:        0.2,
            verb_bonus:         0.1,
            threshold:          0.35,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub coverage:    f64,
    pub precision:   f64,
    pub overlap:     f64,
    pub route_bonus: f64,
    pub verb_bonus:  f64,
    pub total:       f64,
}

#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub operation: &'a Operation,
    pub score:     ScoreBreakdown,
}

impl Candidate<'_> {
    pub fn name(&self) -> &str {
        &self.operation.name
    }

    fn scored_name(&self) -> ScoredName {
        ScoredName { name: self.operation.name.clone(), score: self.score.total }
    }
}

/// How the selected candidate won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Strictly highest score.
    Unique,
    /// Tied on score, larger schema preferred.
    LargerSchema,
    /// Tied, picked by the inference assist.
    Assisted,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome<'a> {
    pub selected:   Candidate<'a>,
    pub resolution: Resolution,
    /// All candidates, best first.
    pub ranked:     Vec<Candidate<'a>>,
}

// ─── Field paths ─────────────────────────────────────────────────────────────

type FieldPath = Vec<String>;

/// Lowercase, keep alphanumerics only, then strip simple plurals:
/// `widget_ids`, `widgetIds` and `WidgetId` all become `widgetid`.
pub fn normalize_name(name: &str) -> String {
    let flat: String = name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    singularize(flat)
}

fn singularize(mut s: String) -> String {
    if s.len() > 3 && s.ends_with("ies") {
        s.truncate(s.len() - 3);
        s.push('y');
    } else if s.ends_with("sses") || s.ends_with("xes") || s.ends_with("ches") || s.ends_with("shes") {
        s.truncate(s.len() - 2);
    } else if s.len() > 1 && s.ends_with('s') && !s.ends_with("ss") {
        s.pop();
    }
    s
}

fn value_paths(v: &Value) -> BTreeSet<FieldPath> {
    fn walk(v: &Value, prefix: &FieldPath, out: &mut BTreeSet<FieldPath>) {
        match v {
            Value::Object(map) => {
                for (k, child) in map {
                    let mut p = prefix.clone();
                    p.push(normalize_name(k));
                    walk(child, &p, out);
                    out.insert(p);
                }
            }
            // arrays are transparent: element fields share the array's path
            Value::Array(items) => {
                for item in items {
                    walk(item, prefix, out);
                }
            }
            _ => {}
        }
    }
    let mut out = BTreeSet::new();
    walk(v, &Vec::new(), &mut out);
    out
}

fn schema_paths(s: &Schema) -> BTreeSet<FieldPath> {
    fn walk(s: &Schema, prefix: &FieldPath, out: &mut BTreeSet<FieldPath>) {
        for f in s.fields() {
            let mut p = prefix.clone();
            p.push(normalize_name(&f.name));
            if let Some(inner) = f.ty.object_schema() {
                walk(inner, &p, out);
            }
            out.insert(p);
        }
    }
    let mut out = BTreeSet::new();
    walk(s, &Vec::new(), &mut out);
    out
}

#[derive(Debug, Default, Clone, Copy)]
struct SideScore {
    earned:       f64,
    total:        f64,
    schema_hits:  usize,
    schema_total: usize,
}

fn score_side(example: &BTreeSet<FieldPath>, schema: &BTreeSet<FieldPath>, w: &MatchWeights) -> SideScore {
    let schema_names: BTreeSet<&String> = schema.iter().filter_map(|p| p.last()).collect();
    let mut side = SideScore { schema_total: schema.len(), ..SideScore::default() };
    for path in example {
        let weight = if w.depth_weighting { path.len() as f64 } else { 1.0 };
        side.total += weight;
        if schema.contains(path) {
            side.earned += weight;
            side.schema_hits += 1;
        } else if path.last().is_some_and(|n| schema_names.contains(n)) {
            side.earned += weight * w.loose_match_factor;
        }
    }
    side
}

/// Example field paths per side, computed once per run.
struct ExampleShape {
    request:  Option<BTreeSet<FieldPath>>,
    response: Option<BTreeSet<FieldPath>>,
}

impl ExampleShape {
    fn of(example: &Example) -> Self {
        let side = |values: &[&Option<Value>]| {
            let paths: BTreeSet<FieldPath> = values.iter().copied().flatten().flat_map(value_paths).collect();
            (!paths.is_empty()).then_some(paths)
        };
        Self {
            // path and query parameters belong to the request schema
            request:  side(&[&example.request, &example.params]),
            response: side(&[&example.response]),
        }
    }
}

fn score_operation(op: &Operation, shape: &ExampleShape, example: &Example, w: &MatchWeights) -> ScoreBreakdown {
    let mut sides = Vec::with_capacity(2);
    if let Some(req) = &shape.request {
        sides.push(score_side(req, &schema_paths(&op.request), w));
    }
    if let Some(resp) = &shape.response {
        sides.push(score_side(resp, &schema_paths(&op.response), w));
    }

    let earned: f64 = sides.iter().map(|s| s.earned).sum();
    let total: f64 = sides.iter().map(|s| s.total).sum();
    let hits: usize = sides.iter().map(|s| s.schema_hits).sum();
    let schema_total: usize = sides.iter().map(|s| s.schema_total).sum();

    let coverage = if total > 0.0 { earned / total } else { 0.0 };
    let precision = if schema_total > 0 { hits as f64 / schema_total as f64 } else { 0.0 };
    let overlap = w.coverage_weight * coverage + w.precision_weight * precision;

    let route_bonus = match &example.path {
        Some(p) if op.route.matches_path(p) => w.route_bonus,
        _ => 0.0,
    };
    let verb_bonus = match example.method {
        Some(m) if m == op.verb => w.verb_bonus,
        _ => 0.0,
    };

    ScoreBreakdown {
        coverage,
        precision,
        overlap,
        route_bonus,
        verb_bonus,
        total: overlap + route_bonus + verb_bonus,
    }
}

/// Score every operation; best first, then larger schema, then declaration order.
pub fn rank<'a>(catalog: &'a InterfaceCatalog, example: &Example, weights: &MatchWeights) -> Vec<Candidate<'a>> {
    let shape = ExampleShape::of(example);
    let mut ranked: Vec<(usize, Candidate<'a>)> = catalog
        .operations()
        .iter()
        .enumerate()
        .map(|(i, op)| (i, Candidate { operation: op, score: score_operation(op, &shape, example, weights) }))
        .collect();
    ranked.sort_by(|(ia, a), (ib, b)| {
        b.score
            .total
            .partial_cmp(&a.score.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.operation.schema_size().cmp(&a.operation.schema_size()))
            .then_with(|| ia.cmp(ib))
    });
    ranked.into_iter().map(|(_, c)| c).collect()
}

/// Apply threshold and tie-break policy to a ranking produced by [`rank`].
pub fn select<'a>(ranked: Vec<Candidate<'a>>, weights: &MatchWeights) -> Result<MatchOutcome<'a>> {
    let Some(best) = ranked.first() else {
        return Err(FillError::NoMatch { threshold: weights.threshold, candidates: Vec::new() });
    };
    if best.score.total < weights.threshold {
        return Err(FillError::NoMatch {
            threshold:  weights.threshold,
            candidates: ranked.iter().map(Candidate::scored_name).collect(),
        });
    }

    let top = best.score.total;
    let tied: Vec<&Candidate<'a>> = ranked
        .iter()
        .filter(|c| (c.score.total - top).abs() <= SCORE_EPSILON)
        .collect();

    let (selected, resolution) = if tied.len() == 1 {
        (best.clone(), Resolution::Unique)
    } else {
        let largest = tied.iter().map(|c| c.operation.schema_size()).max().unwrap_or(0);
        let widest: Vec<&Candidate<'a>> = tied
            .iter()
            .copied()
            .filter(|c| c.operation.schema_size() == largest)
            .collect();
        match widest.as_slice() {
            [one] => ((*one).clone(), Resolution::LargerSchema),
            _ => {
                return Err(FillError::AmbiguousMatch {
                    tied:  widest.iter().map(|c| c.operation.name.clone()).collect(),
                    score: top,
                })
            }
        }
    };

    tracing::info!(
        operation = %selected.name(),
        score = selected.score.total,
        ?resolution,
        "example matched"
    );
    Ok(MatchOutcome { selected, resolution, ranked })
}

pub fn match_operation<'a>(
    catalog: &'a InterfaceCatalog,
    example: &Example,
    weights: &MatchWeights,
) -> Result<MatchOutcome<'a>> {
    let ranked = rank(catalog, example, weights);
    for c in &ranked {
        tracing::debug!(
            operation = %c.name(),
            total = c.score.total,
            coverage = c.score.coverage,
            precision = c.score.precision,
            route_bonus = c.score.route_bonus,
            verb_bonus = c.score.verb_bonus,
            "candidate score"
        );
    }
    select(ranked, weights)
}

/// Select a specific tied operation (after the inference assist picked it).
pub fn choose<'a>(ranked: Vec<Candidate<'a>>, name: &str) -> Option<MatchOutcome<'a>> {
    let selected = ranked.iter().find(|c| c.operation.name == name)?.clone();
    Some(MatchOutcome { selected, resolution: Resolution::Assisted, ranked })
}
