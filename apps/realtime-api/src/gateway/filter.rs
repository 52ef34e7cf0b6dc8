//! Per-delivery authorization: may this principal observe this event instance?
//!
//! Every decision is made against the current principal and the data layer's current
//! privacy state. Nothing is cached between events, and any lookup failure or timeout
//! denies.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::principal::Principal;
use crate::db::store::{FeedAccess, FeedKind, VisibilityStore};
use crate::error::ApiError;

use super::events::{Event, EventClass, EventName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Deliver the hidden-comment placeholder instead of the payload.
    AllowRedacted,
    Deny,
}

impl Decision {
    fn allow_if(visible: bool) -> Self {
        if visible {
            Self::Allow
        } else {
            Self::Deny
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationFilter {
    store: Arc<dyn VisibilityStore>,
    timeout: Duration,
}

impl AuthorizationFilter {
    pub fn new(store: Arc<dyn VisibilityStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Boolean form of [`Self::decide`]: redacted delivery still counts as observing.
    pub async fn may_observe(&self, event: &Event, principal: &Principal) -> bool {
        self.decide(event, principal).await != Decision::Deny
    }

    pub async fn decide(&self, event: &Event, principal: &Principal) -> Decision {
        match tokio::time::timeout(self.timeout, self.evaluate(event, principal)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(err)) => {
                tracing::warn!(
                    event = %event.name,
                    principal = principal.kind(),
                    error = %err,
                    "authorization lookup failed, denying"
                );
                Decision::Deny
            }
            Err(_elapsed) => {
                tracing::warn!(
                    event = %event.name,
                    principal = principal.kind(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "authorization check timed out, denying"
                );
                Decision::Deny
            }
        }
    }

    async fn evaluate(&self, event: &Event, principal: &Principal) -> Result<Decision, ApiError> {
        let viewer = principal.user_id();
        let refs = &event.refs;

        match event.name.class() {
            EventClass::Post => {
                let visible = if event.name == EventName::PostDestroy {
                    self.destroyed_post_visible(event, viewer).await?
                } else {
                    self.post_visible(refs.post_id.as_deref(), viewer).await?
                };
                Ok(Decision::allow_if(visible))
            }
            EventClass::PersonalPost => {
                if viewer.is_none() || viewer != refs.user_id.as_deref() {
                    return Ok(Decision::Deny);
                }
                let visible = self.post_visible(refs.post_id.as_deref(), viewer).await?;
                Ok(Decision::allow_if(visible))
            }
            EventClass::Comment => {
                if !self.post_visible(refs.post_id.as_deref(), viewer).await? {
                    return Ok(Decision::Deny);
                }
                let (Some(viewer), Some(author)) = (viewer, refs.actor_id.as_deref()) else {
                    return Ok(Decision::Allow);
                };
                if viewer == author || event.name == EventName::CommentDestroy {
                    return Ok(Decision::Allow);
                }
                if !self.store.ban_relation(viewer, author).await?.viewer_bans {
                    return Ok(Decision::Allow);
                }
                if self.store.hides_banned_comments(viewer).await? {
                    Ok(Decision::Deny)
                } else {
                    Ok(Decision::AllowRedacted)
                }
            }
            EventClass::Like => {
                if !self.post_visible(refs.post_id.as_deref(), viewer).await? {
                    return Ok(Decision::Deny);
                }
                match (viewer, refs.actor_id.as_deref()) {
                    (Some(viewer), Some(actor)) if viewer != actor => {
                        let bans = self.store.ban_relation(viewer, actor).await?;
                        Ok(Decision::allow_if(!bans.viewer_bans))
                    }
                    _ => Ok(Decision::Allow),
                }
            }
            // `user:<id>` rooms are owner-only at subscribe time; re-checked here because
            // the principal may have changed since.
            EventClass::User | EventClass::Notification => Ok(Decision::allow_if(
                viewer.is_some() && viewer == refs.user_id.as_deref(),
            )),
            EventClass::Global => Ok(Decision::Allow),
        }
    }

    async fn post_visible(
        &self,
        post_id: Option<&str>,
        viewer: Option<&str>,
    ) -> Result<bool, ApiError> {
        let Some(post_id) = post_id else {
            return Ok(false);
        };
        let Some(access) = self.store.post_access(post_id).await? else {
            return Ok(false);
        };
        self.readable(Some(&access.author_id), &access.destinations, viewer)
            .await
    }

    /// The row is gone, so judge by the destinations carried in the event.
    async fn destroyed_post_visible(
        &self,
        event: &Event,
        viewer: Option<&str>,
    ) -> Result<bool, ApiError> {
        let feeds = self.store.feed_access(&event.refs.feed_ids).await?;
        self.readable(event.refs.actor_id.as_deref(), &feeds, viewer)
            .await
    }

    async fn readable(
        &self,
        author_id: Option<&str>,
        feeds: &[FeedAccess],
        viewer: Option<&str>,
    ) -> Result<bool, ApiError> {
        if viewer.is_some() && viewer == author_id {
            return Ok(true);
        }

        let verdict = classify_destinations(feeds, viewer);
        let mut open = verdict.open;
        if !open && !verdict.needs_subscription.is_empty() {
            if let Some(viewer) = viewer {
                let subscribed = self
                    .store
                    .subscribed_to(viewer, &verdict.needs_subscription)
                    .await?;
                open = !subscribed.is_empty();
            }
        }
        if !open {
            return Ok(false);
        }

        if let (Some(viewer), Some(author)) = (viewer, author_id) {
            if self.store.ban_relation(viewer, author).await?.any() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct DestinationVerdict {
    /// Some destination is readable without a subscription lookup.
    open: bool,
    /// Owners of private destinations; readable if the viewer subscribes to any.
    needs_subscription: Vec<String>,
}

fn classify_destinations(feeds: &[FeedAccess], viewer: Option<&str>) -> DestinationVerdict {
    let mut verdict = DestinationVerdict::default();
    for feed in feeds {
        let own_feed = viewer == Some(feed.owner_id.as_str());
        match feed.kind {
            FeedKind::Directs => verdict.open |= own_feed,
            FeedKind::Posts | FeedKind::Other => {
                let members_only = feed.is_private || (feed.owner_is_group && feed.is_restricted);
                if own_feed {
                    verdict.open = true;
                } else if members_only {
                    if viewer.is_some() && !verdict.needs_subscription.contains(&feed.owner_id) {
                        verdict.needs_subscription.push(feed.owner_id.clone());
                    }
                } else if feed.is_protected {
                    verdict.open |= viewer.is_some();
                } else {
                    verdict.open = true;
                }
            }
        }
    }
    verdict
}
