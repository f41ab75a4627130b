use crate::collection::document::Document;
use crate::collection::object_id::DocId;
use crate::collection::Collection;
use crate::common::{SortOrder, SortSpec};
use crate::errors::{ErrorKind, FerriteError, FerriteResult};
use crate::filter::Filter;
use once_cell::sync::Lazy;
use std::collections::VecDeque;

static CURSOR_CLOSED_ERROR: Lazy<FerriteError> =
    Lazy::new(|| FerriteError::new("Cursor has been closed", ErrorKind::InvalidOperation));

enum CursorState {
    NotStarted,
    Active(VecDeque<DocId>),
    Drained,
    Closed { reported: bool },
}

/// A lazy, restartable stream of matching documents.
///
/// Construction captures the filter; `sort`, `skip`, and `limit` adjust the
/// configuration until iteration begins. Iteration applies filter → sort
/// (full materialization of surviving ids) → skip → limit; without a sort,
/// ids follow manifest insertion order and documents load lazily, one per
/// `next()`.
///
/// Every yielded document is an independent deep copy.
///
/// # Examples
///
/// ```ignore
/// let mut cursor = people
///     .find(&doc! { "age": doc! { "$gte": 18 } })?
///     .sort("age", -1)?
///     .limit(10);
/// for doc in &mut cursor {
///     println!("{}", doc?);
/// }
/// ```
pub struct Cursor {
    collection: Collection,
    filter: Filter,
    sort: SortSpec,
    limit: Option<usize>,
    skip: usize,
    state: CursorState,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("filter", &self.filter)
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

impl Cursor {
    pub(crate) fn new(collection: Collection, filter: Filter) -> Self {
        Cursor {
            collection,
            filter,
            sort: vec![],
            limit: None,
            skip: 0,
            state: CursorState::NotStarted,
        }
    }

    fn ensure_not_started(&self, what: &str) -> FerriteResult<()> {
        match self.state {
            CursorState::NotStarted => Ok(()),
            CursorState::Closed { .. } => {
                log::error!("Cursor is closed; cannot {}", what);
                Err(FerriteError::new(
                    &format!("Cursor is closed and cannot be {}ed", what),
                    ErrorKind::InvalidOperation,
                ))
            }
            _ => {
                log::error!("Cursor has started; cannot {}", what);
                Err(FerriteError::new(
                    &format!("Cursor has already started and cannot be {}ed", what),
                    ErrorKind::InvalidOperation,
                ))
            }
        }
    }

    /// Orders results by one key. Direction follows the `1` / `-1`
    /// convention.
    ///
    /// # Errors
    /// `InvalidArgument` for a bad direction; `InvalidOperation` once
    /// iteration has begun or after `close`.
    pub fn sort(mut self, key: &str, direction: i64) -> FerriteResult<Self> {
        self.ensure_not_started("sort")?;
        self.sort = vec![(key.to_string(), SortOrder::from_direction(direction)?)];
        Ok(self)
    }

    /// Orders results by several keys, applied left to right.
    pub fn sort_all(mut self, spec: &[(&str, i64)]) -> FerriteResult<Self> {
        self.ensure_not_started("sort")?;
        let mut parsed: SortSpec = vec![];
        for (key, direction) in spec {
            parsed.push((key.to_string(), SortOrder::from_direction(*direction)?));
        }
        self.sort = parsed;
        Ok(self)
    }

    /// Caps the number of returned documents.
    pub fn limit(mut self, limit: usize) -> FerriteResult<Self> {
        self.ensure_not_started("limit")?;
        self.limit = Some(limit);
        Ok(self)
    }

    /// Discards the first `skip` surviving documents.
    pub fn skip(mut self, skip: usize) -> FerriteResult<Self> {
        self.ensure_not_started("skip")?;
        self.skip = skip;
        Ok(self)
    }

    /// An independent cursor at the initial position with the same filter,
    /// sort, skip, and limit.
    pub fn restart(&self) -> Cursor {
        Cursor {
            collection: self.collection.clone(),
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            limit: self.limit,
            skip: self.skip,
            state: CursorState::NotStarted,
        }
    }

    /// Releases the cursor's id snapshot. Idempotent; any further iteration
    /// fails with `InvalidOperation`.
    pub fn close(&mut self) {
        self.state = CursorState::Closed { reported: false };
    }

    /// Advances by one document.
    pub fn try_next(&mut self) -> FerriteResult<Option<Document>> {
        loop {
            match &mut self.state {
                CursorState::NotStarted => {
                    let ids = self.collection.execute_find(
                        &self.filter,
                        &self.sort,
                        self.limit,
                        self.skip,
                    )?;
                    self.state = CursorState::Active(ids.into());
                }
                CursorState::Active(ids) => match ids.pop_front() {
                    Some(id) => {
                        // a concurrent delete may have removed the document
                        // between planning and loading; skip the gap
                        if let Some(document) = self.collection.read_document(&id)? {
                            return Ok(Some(document));
                        }
                    }
                    None => {
                        self.state = CursorState::Drained;
                        return Ok(None);
                    }
                },
                CursorState::Drained => return Ok(None),
                CursorState::Closed { reported } => {
                    if *reported {
                        return Ok(None);
                    }
                    *reported = true;
                    log::error!("Cursor used after close");
                    return Err(CURSOR_CLOSED_ERROR.clone());
                }
            }
        }
    }
}

impl Clone for Cursor {
    /// Equivalent to [`Cursor::restart`]: the clone starts at the initial
    /// position regardless of how far this cursor has advanced.
    fn clone(&self) -> Self {
        self.restart()
    }
}

impl Iterator for Cursor {
    type Item = FerriteResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}
