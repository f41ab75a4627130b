use crate::collection::document::Document;
use crate::common::value::Value;
use crate::common::DOC_ID;
use crate::errors::{ErrorKind, FerriteError, FerriteResult};

const SUPPORTED_OPERATORS: &[&str] = &["$set", "$inc", "$push"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum UpdateOperator {
    Set,
    Inc,
    Push,
}

/// A parsed, validated update document: `{$op: {path: value, …}, …}`.
///
/// Parsing front-loads all shape validation (operator tags, operand
/// documents, `$inc` deltas, the `_id` prohibition) so that application only
/// fails on genuine path conflicts inside the target document.
#[derive(Debug, Clone)]
pub struct UpdateSpec {
    ops: Vec<(UpdateOperator, Vec<(String, Value)>)>,
}

impl UpdateSpec {
    /// Parses and validates an update document.
    ///
    /// # Errors
    /// - `InvalidArgument` for a non-operator top-level key, a non-document
    ///   operand, or an assignment addressing `_id`.
    /// - `NotImplemented` for an unrecognised `$`-operator.
    /// - `InvalidUpdate` for a non-numeric `$inc` delta.
    pub fn parse(document: &Document) -> FerriteResult<UpdateSpec> {
        if document.is_empty() {
            log::error!("Update document is empty");
            return Err(FerriteError::new(
                "Update document must contain at least one operator",
                ErrorKind::InvalidArgument,
            ));
        }
        let mut ops = vec![];
        for (tag, operand) in document.iter() {
            let operator = match tag.as_str() {
                "$set" => UpdateOperator::Set,
                "$inc" => UpdateOperator::Inc,
                "$push" => UpdateOperator::Push,
                other if other.starts_with('$') => {
                    log::error!("Unsupported update operator {}", other);
                    return Err(FerriteError::new(
                        &format!(
                            "Unsupported update operator {:?}; supported operators: {:?}",
                            other, SUPPORTED_OPERATORS
                        ),
                        ErrorKind::NotImplemented,
                    ));
                }
                other => {
                    log::error!("Update key {} is not an operator", other);
                    return Err(FerriteError::new(
                        &format!(
                            "Updates must use one of the supported operators {:?}",
                            SUPPORTED_OPERATORS
                        ),
                        ErrorKind::InvalidArgument,
                    ));
                }
            };

            let assignments = match operand {
                Value::Document(inner) => inner,
                _ => {
                    log::error!("Operand of {} must be a document", tag);
                    return Err(FerriteError::new(
                        &format!("The operand of {} must be a document", tag),
                        ErrorKind::InvalidArgument,
                    ));
                }
            };

            let mut parsed = vec![];
            for (path, value) in assignments.iter() {
                if path == DOC_ID || path.starts_with("_id.") {
                    log::error!("Updates may not address the _id field");
                    return Err(FerriteError::new(
                        "Updates may not address the _id field",
                        ErrorKind::InvalidArgument,
                    ));
                }
                if operator == UpdateOperator::Inc && !value.is_number() {
                    log::error!("$inc delta for {} is not numeric", path);
                    return Err(FerriteError::new(
                        "$inc requires a numeric delta",
                        ErrorKind::InvalidUpdate,
                    ));
                }
                parsed.push((path.clone(), value.clone()));
            }
            ops.push((operator, parsed));
        }
        Ok(UpdateSpec { ops })
    }

    /// Applies every assignment to `document` in place.
    ///
    /// The collection calls this on a fresh copy of the stored document, so a
    /// failed application leaves stored state untouched.
    pub fn apply(&self, document: &mut Document) -> FerriteResult<()> {
        for (operator, assignments) in &self.ops {
            for (path, value) in assignments {
                apply_one(*operator, document, path, value)?;
            }
        }
        Ok(())
    }
}

/// The writable location a dotted path resolves to: a keyed slot in a
/// document, or a (padded) position in an array.
enum Slot<'a> {
    Entry(&'a mut Document, String),
    Index(&'a mut Vec<Value>, usize),
}

fn invalid_path(path: &str) -> FerriteError {
    log::error!("Cannot apply update through path {}", path);
    FerriteError::new(
        &format!("Cannot apply update through path {:?}", path),
        ErrorKind::InvalidUpdate,
    )
}

/// Walks one intermediate step, creating missing documents and padding
/// arrays with nulls, exactly as a final slot resolution would.
fn step<'a>(current: &'a mut Value, segment: &str, path: &str) -> FerriteResult<&'a mut Value> {
    match current {
        Value::Document(doc) => {
            if !doc.contains_key(segment) {
                doc.put(segment, Document::new());
            }
            doc.get_mut(segment).ok_or_else(|| invalid_path(path))
        }
        Value::Array(items) => {
            let index: usize = segment.parse().map_err(|_| invalid_path(path))?;
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            Ok(&mut items[index])
        }
        _ => Err(invalid_path(path)),
    }
}

/// Resolves `path` to its final writable slot, creating intermediate
/// documents along the way. Fails with `InvalidUpdate` when an intermediate
/// value is neither a document nor an array.
fn resolve_slot<'a>(document: &'a mut Document, path: &str) -> FerriteResult<Slot<'a>> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, intermediate) = match segments.split_last() {
        Some(split) => split,
        None => return Err(invalid_path(path)),
    };

    if intermediate.is_empty() {
        return Ok(Slot::Entry(document, last.to_string()));
    }

    let first = intermediate[0];
    if !document.contains_key(first) {
        document.put(first, Document::new());
    }
    let mut current = document.get_mut(first).ok_or_else(|| invalid_path(path))?;
    for segment in &intermediate[1..] {
        current = step(current, segment, path)?;
    }

    match current {
        Value::Document(doc) => Ok(Slot::Entry(doc, last.to_string())),
        Value::Array(items) => {
            let index: usize = last.parse().map_err(|_| invalid_path(path))?;
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            Ok(Slot::Index(items, index))
        }
        _ => Err(invalid_path(path)),
    }
}

fn apply_one(
    operator: UpdateOperator,
    document: &mut Document,
    path: &str,
    value: &Value,
) -> FerriteResult<()> {
    let slot = resolve_slot(document, path)?;
    match operator {
        UpdateOperator::Set => {
            match slot {
                Slot::Entry(doc, key) => doc.put(key, value.clone()),
                Slot::Index(items, index) => items[index] = value.clone(),
            }
            Ok(())
        }
        UpdateOperator::Inc => {
            let existing = match &slot {
                Slot::Entry(doc, key) => doc.get(key).cloned(),
                Slot::Index(items, index) => Some(items[*index].clone()),
            };
            let incremented = match existing {
                None => value.clone(),
                Some(current) => add_numeric(&current, value, path)?,
            };
            match slot {
                Slot::Entry(doc, key) => doc.put(key, incremented),
                Slot::Index(items, index) => items[index] = incremented,
            }
            Ok(())
        }
        UpdateOperator::Push => {
            match slot {
                Slot::Entry(doc, key) => match doc.get_mut(&key) {
                    None => doc.put(key, Value::Array(vec![value.clone()])),
                    Some(Value::Array(items)) => items.push(value.clone()),
                    Some(_) => {
                        log::error!("$push target {} is not an array", path);
                        return Err(FerriteError::new(
                            "$push requires an array target",
                            ErrorKind::InvalidUpdate,
                        ));
                    }
                },
                Slot::Index(items, index) => match &mut items[index] {
                    Value::Array(inner) => inner.push(value.clone()),
                    _ => {
                        log::error!("$push target {} is not an array", path);
                        return Err(FerriteError::new(
                            "$push requires an array target",
                            ErrorKind::InvalidUpdate,
                        ));
                    }
                },
            }
            Ok(())
        }
    }
}

fn add_numeric(current: &Value, delta: &Value, path: &str) -> FerriteResult<Value> {
    let overflow = || {
        log::error!("$inc overflow at {}", path);
        FerriteError::new("$inc overflowed a 64-bit integer", ErrorKind::InvalidUpdate)
    };
    match (current, delta) {
        (Value::I64(a), Value::I64(b)) => a.checked_add(*b).map(Value::I64).ok_or_else(overflow),
        (Value::I64(a), Value::F64(b)) => Ok(Value::F64(*a as f64 + b)),
        (Value::F64(a), Value::I64(b)) => Ok(Value::F64(a + *b as f64)),
        (Value::F64(a), Value::F64(b)) => Ok(Value::F64(a + b)),
        _ => {
            log::error!("$inc target {} is not numeric", path);
            Err(FerriteError::new(
                "$inc requires a numeric target",
                ErrorKind::InvalidUpdate,
            ))
        }
    }
}
