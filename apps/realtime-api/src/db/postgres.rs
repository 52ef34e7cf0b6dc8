//! Postgres implementation of the data-layer traits.

use std::collections::HashSet;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::OptionalExtension;

use crate::db::pool::DbPool;
use crate::db::schema::{app_tokens, bans, feeds, post_destinations, posts, subscriptions, users};
use crate::error::ApiError;
use crate::models::app_token::AppToken;
use crate::models::feed::FeedAccessRow;

use super::store::{
    AppTokenRecord, BanRelation, FeedAccess, PostAccess, TokenStore, VisibilityStore,
};

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VisibilityStore for PgStore {
    async fn post_access(&self, post_id: &str) -> Result<Option<PostAccess>, ApiError> {
        let mut conn = self.pool.get().await?;

        let author_id: Option<String> = diesel_async::RunQueryDsl::get_result(
            posts::table.find(post_id).select(posts::user_id),
            &mut conn,
        )
        .await
        .optional()?;

        let Some(author_id) = author_id else {
            return Ok(None);
        };

        let rows: Vec<FeedAccessRow> = diesel_async::RunQueryDsl::load(
            post_destinations::table
                .inner_join(feeds::table.inner_join(users::table))
                .filter(post_destinations::post_id.eq(post_id))
                .select((
                    feeds::id,
                    feeds::user_id,
                    feeds::name,
                    users::is_group,
                    users::is_private,
                    users::is_protected,
                    users::is_restricted,
                )),
            &mut conn,
        )
        .await?;

        Ok(Some(PostAccess {
            id: post_id.to_string(),
            author_id,
            destinations: rows.into_iter().map(FeedAccess::from).collect(),
        }))
    }

    async fn feed_access(&self, feed_ids: &[String]) -> Result<Vec<FeedAccess>, ApiError> {
        if feed_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;

        let rows: Vec<FeedAccessRow> = diesel_async::RunQueryDsl::load(
            feeds::table
                .inner_join(users::table)
                .filter(feeds::id.eq_any(feed_ids))
                .select((
                    feeds::id,
                    feeds::user_id,
                    feeds::name,
                    users::is_group,
                    users::is_private,
                    users::is_protected,
                    users::is_restricted,
                )),
            &mut conn,
        )
        .await?;

        Ok(rows.into_iter().map(FeedAccess::from).collect())
    }

    async fn subscribed_to(
        &self,
        viewer_id: &str,
        owner_ids: &[String],
    ) -> Result<HashSet<String>, ApiError> {
        if owner_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut conn = self.pool.get().await?;

        let owners: Vec<String> = diesel_async::RunQueryDsl::load(
            subscriptions::table
                .filter(subscriptions::subscriber_id.eq(viewer_id))
                .filter(subscriptions::owner_id.eq_any(owner_ids))
                .select(subscriptions::owner_id),
            &mut conn,
        )
        .await?;

        Ok(owners.into_iter().collect())
    }

    async fn ban_relation(
        &self,
        viewer_id: &str,
        other_id: &str,
    ) -> Result<BanRelation, ApiError> {
        let mut conn = self.pool.get().await?;

        let edges: Vec<(String, String)> = diesel_async::RunQueryDsl::load(
            bans::table
                .filter(
                    bans::user_id
                        .eq(viewer_id)
                        .and(bans::banned_user_id.eq(other_id))
                        .or(bans::user_id.eq(other_id).and(bans::banned_user_id.eq(viewer_id))),
                )
                .select((bans::user_id, bans::banned_user_id)),
            &mut conn,
        )
        .await?;

        Ok(BanRelation {
            viewer_bans: edges.iter().any(|(user, _)| user == viewer_id),
            viewer_banned: edges.iter().any(|(user, _)| user == other_id),
        })
    }

    async fn hides_banned_comments(&self, viewer_id: &str) -> Result<bool, ApiError> {
        let mut conn = self.pool.get().await?;

        let hide: Option<bool> = diesel_async::RunQueryDsl::get_result(
            users::table
                .find(viewer_id)
                .select(users::hide_banned_comments),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(hide.unwrap_or(false))
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn app_token(&self, token_id: &str) -> Result<Option<AppTokenRecord>, ApiError> {
        let mut conn = self.pool.get().await?;

        let token: Option<AppToken> = diesel_async::RunQueryDsl::get_result(
            app_tokens::table
                .find(token_id)
                .select(AppToken::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(token.map(AppTokenRecord::from))
    }

    async fn user_is_active(&self, user_id: &str) -> Result<bool, ApiError> {
        let mut conn = self.pool.get().await?;

        let active: Option<bool> = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(users::is_active),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(active.unwrap_or(false))
    }
}
