//! Connection principals and app-token scopes.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::restrictions::Restrictions;

/// A capability bound to an app token when it is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "read-my-info")]
    ReadMyInfo,
    #[serde(rename = "read-feeds")]
    ReadFeeds,
    #[serde(rename = "read-realtime")]
    ReadRealtime,
    #[serde(rename = "manage-profile")]
    ManageProfile,
    #[serde(rename = "manage-notifications")]
    ManageNotifications,
    #[serde(rename = "manage-posts")]
    ManagePosts,
    #[serde(rename = "manage-my-feeds")]
    ManageMyFeeds,
    #[serde(rename = "manage-subscription-requests")]
    ManageSubscriptionRequests,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadMyInfo => "read-my-info",
            Self::ReadFeeds => "read-feeds",
            Self::ReadRealtime => "read-realtime",
            Self::ManageProfile => "manage-profile",
            Self::ManageNotifications => "manage-notifications",
            Self::ManagePosts => "manage-posts",
            Self::ManageMyFeeds => "manage-my-feeds",
            Self::ManageSubscriptionRequests => "manage-subscription-requests",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scope {0:?}")]
pub struct UnknownScope(pub String);

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "read-my-info" => Self::ReadMyInfo,
            "read-feeds" => Self::ReadFeeds,
            "read-realtime" => Self::ReadRealtime,
            "manage-profile" => Self::ManageProfile,
            "manage-notifications" => Self::ManageNotifications,
            "manage-posts" => Self::ManagePosts,
            "manage-my-feeds" => Self::ManageMyFeeds,
            "manage-subscription-requests" => Self::ManageSubscriptionRequests,
            other => return Err(UnknownScope(other.to_string())),
        })
    }
}

/// The scopes of one token issue. Unknown scope names are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(BTreeSet<Scope>);

impl ScopeSet {
    pub fn new(scopes: impl IntoIterator<Item = Scope>) -> Self {
        Self(scopes.into_iter().collect())
    }

    pub fn parse<S: AsRef<str>>(names: &[S]) -> Self {
        let mut set = BTreeSet::new();
        for name in names {
            match name.as_ref().parse::<Scope>() {
                Ok(scope) => {
                    set.insert(scope);
                }
                Err(UnknownScope(name)) => tracing::debug!(%name, "ignoring unknown token scope"),
            }
        }
        Self(set)
    }

    pub fn contains(&self, scope: Scope) -> bool {
        self.0.contains(&scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        self.0.iter().copied()
    }
}

/// An app-token identity as resolved at `auth` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTokenPrincipal {
    pub user_id: String,
    pub token_id: String,
    /// Issue number the client presented; a reissue supersedes it.
    pub issue: i32,
    pub scopes: ScopeSet,
    pub restrictions: Restrictions,
}

/// Identity attached to a connection. Replaced in place by `auth` and re-authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Principal {
    #[default]
    Anonymous,
    SessionUser {
        user_id: String,
    },
    AppTokenUser(AppTokenPrincipal),
}

impl Principal {
    pub fn session(user_id: impl Into<String>) -> Self {
        Self::SessionUser {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::SessionUser { user_id } => Some(user_id),
            Self::AppTokenUser(token) => Some(&token.user_id),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::SessionUser { .. } => "session",
            Self::AppTokenUser(_) => "app_token",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_set_ignores_unknown_names() {
        let scopes = ScopeSet::parse(&["read-feeds", "launch-rockets", "read-realtime"]);
        assert!(scopes.contains(Scope::ReadFeeds));
        assert!(scopes.contains(Scope::ReadRealtime));
        assert_eq!(scopes.iter().count(), 2);
    }

    #[test]
    fn unknown_scope_names_itself() {
        let err = "launch-rockets".parse::<Scope>().unwrap_err();
        assert_eq!(err, UnknownScope("launch-rockets".into()));
        assert_eq!(err.to_string(), r#"unknown scope "launch-rockets""#);
    }

    #[test]
    fn scope_names_match_serde_names() {
        for scope in ScopeSet::parse(&[
            "read-my-info",
            "read-feeds",
            "read-realtime",
            "manage-profile",
            "manage-notifications",
            "manage-posts",
            "manage-my-feeds",
            "manage-subscription-requests",
        ])
        .iter()
        {
            let json = serde_json::to_value(scope).unwrap();
            assert_eq!(json, scope.as_str());
        }
    }

    #[test]
    fn principal_user_id() {
        assert_eq!(Principal::Anonymous.user_id(), None);
        assert_eq!(Principal::session("usr_luna").user_id(), Some("usr_luna"));
    }
}
