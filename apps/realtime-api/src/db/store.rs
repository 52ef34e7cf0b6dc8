//! Data-layer collaborators consumed by the realtime path.
//!
//! These are the same privacy primitives the REST read path is built on. Both traits
//! are backed by Postgres in production and by [`super::memory::MemoryStore`] in tests.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::auth::principal::ScopeSet;
use crate::auth::restrictions::Restrictions;
use crate::error::ApiError;

/// What a feed holds. Direct-message feeds are only readable by their owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Posts,
    Directs,
    Other,
}

impl FeedKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "Posts" => Self::Posts,
            "Directs" => Self::Directs,
            _ => Self::Other,
        }
    }
}

/// A feed plus the privacy flags of the user or group that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedAccess {
    pub id: String,
    pub owner_id: String,
    pub kind: FeedKind,
    pub owner_is_group: bool,
    pub is_private: bool,
    pub is_protected: bool,
    pub is_restricted: bool,
}

/// Everything needed to decide whether a post is readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostAccess {
    pub id: String,
    pub author_id: String,
    pub destinations: Vec<FeedAccess>,
}

/// Ban edges between a viewer and another user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BanRelation {
    /// The viewer bans the other user.
    pub viewer_bans: bool,
    /// The other user bans the viewer.
    pub viewer_banned: bool,
}

impl BanRelation {
    pub fn any(&self) -> bool {
        self.viewer_bans || self.viewer_banned
    }
}

/// Current state of one app token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTokenRecord {
    pub id: String,
    pub user_id: String,
    pub issue: i32,
    pub is_active: bool,
    pub scopes: ScopeSet,
    pub restrictions: Restrictions,
}

#[async_trait]
pub trait VisibilityStore: Send + Sync {
    /// `None` when the post does not exist (or no longer exists).
    async fn post_access(&self, post_id: &str) -> Result<Option<PostAccess>, ApiError>;

    /// Feeds by id; unknown ids are skipped.
    async fn feed_access(&self, feed_ids: &[String]) -> Result<Vec<FeedAccess>, ApiError>;

    /// The subset of `owner_ids` the viewer has an accepted subscription to (users) or
    /// membership in (groups).
    async fn subscribed_to(
        &self,
        viewer_id: &str,
        owner_ids: &[String],
    ) -> Result<HashSet<String>, ApiError>;

    async fn ban_relation(&self, viewer_id: &str, other_id: &str)
        -> Result<BanRelation, ApiError>;

    /// Whether the viewer asked to omit comments of banned users instead of showing a
    /// placeholder.
    async fn hides_banned_comments(&self, viewer_id: &str) -> Result<bool, ApiError>;
}

/// Token lifecycle collaborator.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn app_token(&self, token_id: &str) -> Result<Option<AppTokenRecord>, ApiError>;

    /// `false` for unknown, suspended or deleted accounts.
    async fn user_is_active(&self, user_id: &str) -> Result<bool, ApiError>;
}
