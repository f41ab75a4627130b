pub mod matcher;

use crate::collection::document::Document;
use crate::common::value::Value;
use crate::common::DOC_ID;
use crate::errors::{ErrorKind, FerriteError, FerriteResult};
use smallvec::{smallvec, SmallVec};

const SUPPORTED_OPERATORS: &[&str] =
    &["$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin"];

// most clauses carry one or two operators
type OpVec = SmallVec<[FilterOp; 2]>;

/// One comparison applied to the value at a clause's path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FilterOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
}

impl FilterOp {
    pub(crate) fn is_range(&self) -> bool {
        matches!(
            self,
            FilterOp::Gt(_) | FilterOp::Gte(_) | FilterOp::Lt(_) | FilterOp::Lte(_)
        )
    }
}

/// One top-level filter entry: a dotted path and the comparisons on it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FieldClause {
    pub path: String,
    pub ops: OpVec,
}

/// A parsed, validated query predicate.
///
/// Filters are written as documents: top-level keys AND together, each key is
/// a dotted path, each value is either a scalar (implicit `$eq`) or an
/// operator document such as `{"$gte": 500, "$lt": 510}`.
///
/// Parsing validates operator tags and operand shapes once, so matching
/// itself is infallible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<FieldClause>,
}

impl Filter {
    /// The filter that matches every document.
    pub fn empty() -> Self {
        Filter { clauses: vec![] }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Parses and validates a filter document.
    ///
    /// # Errors
    /// `InvalidArgument` for unknown operator tags, non-array `$in`/`$nin`
    /// operands, operator documents mixing `$`-tags with plain keys, or an
    /// `_id` clause whose operand is neither an id, a string, nor an
    /// operator document.
    pub fn parse(document: &Document) -> FerriteResult<Filter> {
        let mut clauses = vec![];
        for (path, condition) in document.iter() {
            let ops = parse_condition(path, condition)?;
            clauses.push(FieldClause {
                path: path.clone(),
                ops,
            });
        }
        Ok(Filter { clauses })
    }

    /// Evaluates this filter against a document.
    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|clause| {
            let actual = document.value_at(&clause.path);
            clause
                .ops
                .iter()
                .all(|op| matcher::op_matches(op, actual.as_ref()))
        })
    }

    pub(crate) fn clauses(&self) -> &[FieldClause] {
        &self.clauses
    }
}

fn parse_condition(path: &str, condition: &Value) -> FerriteResult<OpVec> {
    if let Value::Document(operator_doc) = condition {
        let tagged = operator_doc.keys().filter(|k| k.starts_with('$')).count();
        if tagged > 0 {
            if tagged != operator_doc.len() {
                log::error!("Operator document for {} mixes tags and plain keys", path);
                return Err(FerriteError::new(
                    "An operator document must contain only operator tags",
                    ErrorKind::InvalidArgument,
                ));
            }
            let mut ops = OpVec::new();
            for (tag, operand) in operator_doc.iter() {
                ops.push(parse_op(tag, operand)?);
            }
            return Ok(ops);
        }
    }

    if path == DOC_ID && !matches!(condition, Value::Id(_) | Value::String(_)) {
        log::error!("The _id filter must be an object id, a string, or an operator document");
        return Err(FerriteError::new(
            "The _id filter must be an object id, a string, or an operator document",
            ErrorKind::InvalidArgument,
        ));
    }

    // scalar shorthand, including whole-document and whole-array equality
    Ok(smallvec![FilterOp::Eq(condition.clone())])
}

fn parse_op(tag: &str, operand: &Value) -> FerriteResult<FilterOp> {
    match tag {
        "$eq" => Ok(FilterOp::Eq(operand.clone())),
        "$ne" => Ok(FilterOp::Ne(operand.clone())),
        "$gt" => Ok(FilterOp::Gt(operand.clone())),
        "$gte" => Ok(FilterOp::Gte(operand.clone())),
        "$lt" => Ok(FilterOp::Lt(operand.clone())),
        "$lte" => Ok(FilterOp::Lte(operand.clone())),
        "$in" => Ok(FilterOp::In(in_list(tag, operand)?)),
        "$nin" => Ok(FilterOp::Nin(in_list(tag, operand)?)),
        other => {
            log::error!("Unsupported filter operator {}", other);
            Err(FerriteError::new(
                &format!(
                    "Unsupported filter operator {:?}; supported operators: {:?}",
                    other, SUPPORTED_OPERATORS
                ),
                ErrorKind::InvalidArgument,
            ))
        }
    }
}

fn in_list(tag: &str, operand: &Value) -> FerriteResult<Vec<Value>> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => {
            log::error!("{} requires an array operand", tag);
            Err(FerriteError::new(
                &format!("{} requires an array operand", tag),
                ErrorKind::InvalidArgument,
            ))
        }
    }
}
