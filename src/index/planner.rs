use crate::collection::object_id::DocId;
use crate::common::value::{doc_id_from_value, Value};
use crate::common::DOC_ID;
use crate::filter::{FieldClause, Filter, FilterOp};
use crate::index::SortedIndex;
use std::collections::BTreeSet;
use std::ops::Bound;

/// The candidate id source chosen for one query.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Candidates {
    /// `_id` equality: a single direct existence probe.
    ById(DocId),
    /// Ids produced by the driving index.
    Scan(BTreeSet<DocId>),
    /// Every id in the manifest.
    FullScan,
}

/// Planner output: where candidate ids come from. Every filter clause is
/// still re-checked by the matcher on each candidate.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FindPlan {
    pub candidates: Candidates,
    /// Key path of the driving index, for diagnostics.
    pub driving_index: Option<String>,
}

impl FindPlan {
    fn full_scan() -> Self {
        FindPlan {
            candidates: Candidates::FullScan,
            driving_index: None,
        }
    }
}

/// Chooses the candidate id source for `filter` given the loaded indexes
/// (`(key_path, multimap)` pairs).
///
/// Selection order:
/// 1. `_id` equality short-circuits to a direct probe.
/// 2. The `$eq`/`$in` clause on an indexed path with the smallest estimated
///    id-set drives; candidates are the union over operand values, with
///    in-list array containment included.
/// 3. Otherwise the first range clause on an indexed path drives, combining
///    that clause's range operators into one key range.
/// 4. Otherwise: full scan.
pub(crate) fn plan_find(filter: &Filter, indexes: &[(&str, &SortedIndex)]) -> FindPlan {
    for clause in filter.clauses() {
        if clause.path == DOC_ID {
            for op in &clause.ops {
                if let FilterOp::Eq(operand) = op {
                    if let Ok(id) = doc_id_from_value(operand) {
                        return FindPlan {
                            candidates: Candidates::ById(id),
                            driving_index: None,
                        };
                    }
                }
            }
        }
    }

    if let Some(plan) = plan_point_lookup(filter, indexes) {
        return plan;
    }
    if let Some(plan) = plan_range_scan(filter, indexes) {
        return plan;
    }
    FindPlan::full_scan()
}

fn index_for<'a>(indexes: &[(&str, &'a SortedIndex)], path: &str) -> Option<&'a SortedIndex> {
    indexes
        .iter()
        .find(|(key_path, _)| *key_path == path)
        .map(|(_, index)| *index)
}

fn plan_point_lookup(filter: &Filter, indexes: &[(&str, &SortedIndex)]) -> Option<FindPlan> {
    let mut best: Option<(usize, &FieldClause, &FilterOp, &SortedIndex)> = None;
    for clause in filter.clauses() {
        let index = match index_for(indexes, &clause.path) {
            Some(index) => index,
            None => continue,
        };
        for op in &clause.ops {
            let estimate = match op {
                FilterOp::Eq(operand) => index.cardinality(operand),
                FilterOp::In(operands) => operands
                    .iter()
                    .map(|operand| index.cardinality(operand))
                    .sum(),
                _ => continue,
            };
            let better = match &best {
                Some((current, _, _, _)) => estimate < *current,
                None => true,
            };
            if better {
                best = Some((estimate, clause, op, index));
            }
        }
    }

    let (_, clause, op, index) = best?;
    let ids = match op {
        FilterOp::Eq(operand) => index.ids_matching_eq(operand),
        FilterOp::In(operands) => {
            let mut ids = BTreeSet::new();
            for operand in operands {
                ids.extend(index.ids_matching_eq(operand));
            }
            ids
        }
        _ => return None,
    };
    Some(FindPlan {
        candidates: Candidates::Scan(ids),
        driving_index: Some(clause.path.clone()),
    })
}

fn plan_range_scan(filter: &Filter, indexes: &[(&str, &SortedIndex)]) -> Option<FindPlan> {
    for clause in filter.clauses() {
        let index = match index_for(indexes, &clause.path) {
            Some(index) => index,
            None => continue,
        };
        if !clause.ops.iter().any(FilterOp::is_range) {
            continue;
        }
        let (lower, upper) = range_bounds(&clause.ops);
        let ids = index.ids_in_range(lower, upper);
        return Some(FindPlan {
            candidates: Candidates::Scan(ids),
            driving_index: Some(clause.path.clone()),
        });
    }
    None
}

/// Folds every range operator of one clause into a single key range.
fn range_bounds(ops: &[FilterOp]) -> (Bound<&Value>, Bound<&Value>) {
    let mut lower: Bound<&Value> = Bound::Unbounded;
    let mut upper: Bound<&Value> = Bound::Unbounded;
    for op in ops {
        match op {
            FilterOp::Gt(value) => lower = tighten_lower(lower, Bound::Excluded(value)),
            FilterOp::Gte(value) => lower = tighten_lower(lower, Bound::Included(value)),
            FilterOp::Lt(value) => upper = tighten_upper(upper, Bound::Excluded(value)),
            FilterOp::Lte(value) => upper = tighten_upper(upper, Bound::Included(value)),
            _ => {}
        }
    }
    (lower, upper)
}

fn bound_value<'a>(bound: &Bound<&'a Value>) -> Option<&'a Value> {
    match bound {
        Bound::Included(value) | Bound::Excluded(value) => Some(value),
        Bound::Unbounded => None,
    }
}

fn tighten_lower<'a>(current: Bound<&'a Value>, candidate: Bound<&'a Value>) -> Bound<&'a Value> {
    match (bound_value(&current), bound_value(&candidate)) {
        (None, _) => candidate,
        (_, None) => current,
        (Some(a), Some(b)) => {
            if b > a || (b == a && matches!(candidate, Bound::Excluded(_))) {
                candidate
            } else {
                current
            }
        }
    }
}

fn tighten_upper<'a>(current: Bound<&'a Value>, candidate: Bound<&'a Value>) -> Bound<&'a Value> {
    match (bound_value(&current), bound_value(&candidate)) {
        (None, _) => candidate,
        (_, None) => current,
        (Some(a), Some(b)) => {
            if b < a || (b == a && matches!(candidate, Bound::Excluded(_))) {
                candidate
            } else {
                current
            }
        }
    }
}
