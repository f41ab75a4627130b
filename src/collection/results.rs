use crate::collection::object_id::DocId;

/// Outcome of [`Collection::insert_one`](crate::collection::Collection::insert_one).
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub inserted_id: DocId,
}

/// Outcome of [`Collection::insert_many`](crate::collection::Collection::insert_many).
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocId>,
}

/// Outcome of replace and update operations.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<DocId>,
}

impl UpdateResult {
    pub(crate) fn new(matched_count: u64, modified_count: u64) -> Self {
        UpdateResult {
            matched_count,
            modified_count,
            upserted_id: None,
        }
    }

    pub(crate) fn upserted(id: DocId) -> Self {
        UpdateResult {
            matched_count: 0,
            modified_count: 1,
            upserted_id: Some(id),
        }
    }
}

/// Outcome of delete operations.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}
