//! In-memory implementation of the data-layer traits (for local runs / tests).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::ApiError;

use super::store::{
    AppTokenRecord, BanRelation, FeedAccess, FeedKind, PostAccess, TokenStore, VisibilityStore,
};

#[derive(Debug, Clone)]
struct UserRow {
    is_group: bool,
    is_private: bool,
    is_protected: bool,
    is_restricted: bool,
    is_active: bool,
    hide_banned_comments: bool,
}

#[derive(Debug, Clone)]
struct FeedRow {
    owner_id: String,
    kind: FeedKind,
}

#[derive(Debug, Clone)]
struct PostRow {
    author_id: String,
    feed_ids: Vec<String>,
}

#[derive(Default)]
struct Data {
    users: HashMap<String, UserRow>,
    feeds: HashMap<String, FeedRow>,
    posts: HashMap<String, PostRow>,
    subscriptions: HashSet<(String, String)>,
    bans: HashSet<(String, String)>,
    app_tokens: HashMap<String, AppTokenRecord>,
}

pub struct MemoryStore {
    data: RwLock<Data>,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Data::default()),
            failing: AtomicBool::new(false),
            latency: Mutex::new(None),
        }
    }

    // -- users and groups ---------------------------------------------------

    pub fn add_user(&self, user_id: &str) {
        self.insert_account(user_id, false);
    }

    pub fn add_group(&self, group_id: &str) {
        self.insert_account(group_id, true);
    }

    fn insert_account(&self, id: &str, is_group: bool) {
        self.data.write().users.insert(
            id.to_string(),
            UserRow {
                is_group,
                is_private: false,
                is_protected: false,
                is_restricted: false,
                is_active: true,
                hide_banned_comments: false,
            },
        );
    }

    pub fn set_private(&self, user_id: &str, private: bool) {
        self.update_user(user_id, |u| u.is_private = private);
    }

    pub fn set_protected(&self, user_id: &str, protected: bool) {
        self.update_user(user_id, |u| u.is_protected = protected);
    }

    pub fn set_restricted(&self, group_id: &str, restricted: bool) {
        self.update_user(group_id, |u| u.is_restricted = restricted);
    }

    pub fn set_active(&self, user_id: &str, active: bool) {
        self.update_user(user_id, |u| u.is_active = active);
    }

    pub fn set_hide_banned_comments(&self, user_id: &str, hide: bool) {
        self.update_user(user_id, |u| u.hide_banned_comments = hide);
    }

    fn update_user(&self, user_id: &str, f: impl FnOnce(&mut UserRow)) {
        if let Some(user) = self.data.write().users.get_mut(user_id) {
            f(user);
        }
    }

    // -- feeds and posts ----------------------------------------------------

    pub fn add_feed(&self, feed_id: &str, owner_id: &str, name: &str) {
        self.data.write().feeds.insert(
            feed_id.to_string(),
            FeedRow {
                owner_id: owner_id.to_string(),
                kind: FeedKind::from_name(name),
            },
        );
    }

    pub fn add_post(&self, post_id: &str, author_id: &str, feed_ids: &[&str]) {
        self.data.write().posts.insert(
            post_id.to_string(),
            PostRow {
                author_id: author_id.to_string(),
                feed_ids: feed_ids.iter().map(|f| f.to_string()).collect(),
            },
        );
    }

    pub fn remove_post(&self, post_id: &str) {
        self.data.write().posts.remove(post_id);
    }

    // -- relationships ------------------------------------------------------

    pub fn subscribe(&self, subscriber_id: &str, owner_id: &str) {
        self.data
            .write()
            .subscriptions
            .insert((subscriber_id.to_string(), owner_id.to_string()));
    }

    pub fn unsubscribe(&self, subscriber_id: &str, owner_id: &str) {
        self.data
            .write()
            .subscriptions
            .remove(&(subscriber_id.to_string(), owner_id.to_string()));
    }

    pub fn ban(&self, user_id: &str, banned_user_id: &str) {
        self.data
            .write()
            .bans
            .insert((user_id.to_string(), banned_user_id.to_string()));
    }

    pub fn unban(&self, user_id: &str, banned_user_id: &str) {
        self.data
            .write()
            .bans
            .remove(&(user_id.to_string(), banned_user_id.to_string()));
    }

    // -- app tokens ---------------------------------------------------------

    pub fn put_app_token(&self, record: AppTokenRecord) {
        self.data.write().app_tokens.insert(record.id.clone(), record);
    }

    /// Bump the token's issue number. Returns the new issue.
    pub fn reissue_app_token(&self, token_id: &str) -> Option<i32> {
        let mut data = self.data.write();
        let token = data.app_tokens.get_mut(token_id)?;
        token.issue += 1;
        Some(token.issue)
    }

    pub fn deactivate_app_token(&self, token_id: &str) {
        if let Some(token) = self.data.write().app_tokens.get_mut(token_id) {
            token.is_active = false;
        }
    }

    // -- fault injection ----------------------------------------------------

    /// Make every lookup fail as if the database were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every lookup by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    async fn enter(&self) -> Result<(), ApiError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::unavailable("Database unavailable"));
        }
        Ok(())
    }

    fn feed_row_access(data: &Data, feed_id: &str) -> Option<FeedAccess> {
        let feed = data.feeds.get(feed_id)?;
        let owner = data.users.get(&feed.owner_id)?;
        Some(FeedAccess {
            id: feed_id.to_string(),
            owner_id: feed.owner_id.clone(),
            kind: feed.kind,
            owner_is_group: owner.is_group,
            is_private: owner.is_private,
            is_protected: owner.is_protected,
            is_restricted: owner.is_restricted,
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisibilityStore for MemoryStore {
    async fn post_access(&self, post_id: &str) -> Result<Option<PostAccess>, ApiError> {
        self.enter().await?;
        let data = self.data.read();
        Ok(data.posts.get(post_id).map(|post| PostAccess {
            id: post_id.to_string(),
            author_id: post.author_id.clone(),
            destinations: post
                .feed_ids
                .iter()
                .filter_map(|id| Self::feed_row_access(&data, id))
                .collect(),
        }))
    }

    async fn feed_access(&self, feed_ids: &[String]) -> Result<Vec<FeedAccess>, ApiError> {
        self.enter().await?;
        let data = self.data.read();
        Ok(feed_ids
            .iter()
            .filter_map(|id| Self::feed_row_access(&data, id))
            .collect())
    }

    async fn subscribed_to(
        &self,
        viewer_id: &str,
        owner_ids: &[String],
    ) -> Result<HashSet<String>, ApiError> {
        self.enter().await?;
        let data = self.data.read();
        Ok(owner_ids
            .iter()
            .filter(|owner| {
                data.subscriptions
                    .contains(&(viewer_id.to_string(), owner.to_string()))
            })
            .cloned()
            .collect())
    }

    async fn ban_relation(
        &self,
        viewer_id: &str,
        other_id: &str,
    ) -> Result<BanRelation, ApiError> {
        self.enter().await?;
        let data = self.data.read();
        Ok(BanRelation {
            viewer_bans: data
                .bans
                .contains(&(viewer_id.to_string(), other_id.to_string())),
            viewer_banned: data
                .bans
                .contains(&(other_id.to_string(), viewer_id.to_string())),
        })
    }

    async fn hides_banned_comments(&self, viewer_id: &str) -> Result<bool, ApiError> {
        self.enter().await?;
        Ok(self
            .data
            .read()
            .users
            .get(viewer_id)
            .is_some_and(|u| u.hide_banned_comments))
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn app_token(&self, token_id: &str) -> Result<Option<AppTokenRecord>, ApiError> {
        self.enter().await?;
        Ok(self.data.read().app_tokens.get(token_id).cloned())
    }

    async fn user_is_active(&self, user_id: &str) -> Result<bool, ApiError> {
        self.enter().await?;
        Ok(self
            .data
            .read()
            .users
            .get(user_id)
            .is_some_and(|u| u.is_active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_access_resolves_destination_flags() {
        let store = MemoryStore::new();
        store.add_user("venus");
        store.set_private("venus", true);
        store.add_feed("venus:posts", "venus", "Posts");
        store.add_post("p1", "venus", &["venus:posts", "missing-feed"]);

        let access = store.post_access("p1").await.unwrap().unwrap();
        assert_eq!(access.author_id, "venus");
        assert_eq!(access.destinations.len(), 1);
        assert!(access.destinations[0].is_private);
        assert_eq!(access.destinations[0].kind, FeedKind::Posts);
    }

    #[tokio::test]
    async fn ban_relation_is_directional() {
        let store = MemoryStore::new();
        store.ban("luna", "venus");

        let rel = store.ban_relation("luna", "venus").await.unwrap();
        assert!(rel.viewer_bans && !rel.viewer_banned);

        let rel = store.ban_relation("venus", "luna").await.unwrap();
        assert!(!rel.viewer_bans && rel.viewer_banned);
    }

    #[tokio::test]
    async fn failing_store_errors() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.post_access("p1").await.is_err());
        assert!(store.user_is_active("luna").await.is_err());
    }
}
