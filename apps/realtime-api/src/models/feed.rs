use diesel::prelude::*;

use crate::db::store::{FeedAccess, FeedKind};

/// A feed joined with the privacy flags of its owner.
///
/// Loaded positionally from `(feeds::id, feeds::user_id, feeds::name, users::is_group,
/// users::is_private, users::is_protected, users::is_restricted)`.
#[derive(Debug, Queryable)]
pub struct FeedAccessRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub owner_is_group: bool,
    pub is_private: bool,
    pub is_protected: bool,
    pub is_restricted: bool,
}

impl From<FeedAccessRow> for FeedAccess {
    fn from(row: FeedAccessRow) -> Self {
        Self {
            kind: FeedKind::from_name(&row.name),
            id: row.id,
            owner_id: row.owner_id,
            owner_is_group: row.owner_is_group,
            is_private: row.is_private,
            is_protected: row.is_protected,
            is_restricted: row.is_restricted,
        }
    }
}
