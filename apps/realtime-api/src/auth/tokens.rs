//! Session and app-token credentials.
//!
//! Both are HS256 JWTs signed by the API servers. The claims only identify the
//! credential; whether it is still usable is always read from the [`TokenStore`].

use std::net::IpAddr;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::store::TokenStore;
use crate::error::{ApiError, CommandError};

use super::principal::{AppTokenPrincipal, Principal, Scope};

/// JWT claims, discriminated by their `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Claims {
    #[serde(rename = "sess.v1", rename_all = "camelCase")]
    Session { user_id: String },
    #[serde(rename = "app.v1", rename_all = "camelCase")]
    AppToken {
        token_id: String,
        issue: i32,
        user_id: String,
    },
}

/// Sign claims with the shared secret. Used by tooling and tests; the realtime
/// service itself never issues credentials.
pub fn sign(claims: &Claims, secret: &str) -> Result<String, ApiError> {
    let header = Header::new(Algorithm::HS256);
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret.as_bytes())).map_err(
        |e| {
            tracing::error!(?e, "JWT encoding failed");
            ApiError::internal("Failed to sign token")
        },
    )
}

/// Resolves `auth` credentials to principals and re-validates live principals.
pub struct Authenticator {
    key: DecodingKey,
    validation: Validation,
    tokens: Arc<dyn TokenStore>,
}

impl Authenticator {
    pub fn new(secret: &str, tokens: Arc<dyn TokenStore>) -> Self {
        // Credentials do not expire by time; revocation goes through the token store.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            tokens,
        }
    }

    pub fn decode(&self, token: &str) -> Result<Claims, CommandError> {
        jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(?e, "auth token rejected");
                CommandError::InvalidToken
            })
    }

    /// Full `auth` check for a connection from `remote_addr` with `origin`.
    pub async fn authenticate(
        &self,
        token: &str,
        remote_addr: Option<IpAddr>,
        origin: Option<&str>,
    ) -> Result<Principal, CommandError> {
        match self.decode(token)? {
            Claims::Session { user_id } => {
                if !self.tokens.user_is_active(&user_id).await.map_err(unavailable)? {
                    return Err(CommandError::InactiveToken);
                }
                Ok(Principal::SessionUser { user_id })
            }
            Claims::AppToken {
                token_id,
                issue,
                user_id,
            } => {
                let record = self
                    .tokens
                    .app_token(&token_id)
                    .await
                    .map_err(unavailable)?
                    .filter(|record| record.user_id == user_id)
                    .ok_or(CommandError::InvalidToken)?;

                if !record.is_active || record.issue != issue {
                    return Err(CommandError::InactiveToken);
                }
                if !record.scopes.contains(Scope::ReadRealtime) {
                    return Err(CommandError::InsufficientScope);
                }
                if !record.restrictions.permits(remote_addr, origin) {
                    return Err(CommandError::RestrictedToken);
                }
                if !self.tokens.user_is_active(&user_id).await.map_err(unavailable)? {
                    return Err(CommandError::InactiveToken);
                }

                Ok(Principal::AppTokenUser(AppTokenPrincipal {
                    user_id,
                    token_id,
                    issue,
                    scopes: record.scopes,
                    restrictions: record.restrictions,
                }))
            }
        }
    }

    /// Whether a principal accepted earlier is still valid against current token
    /// state. Store errors propagate so the caller can decide how to fail.
    pub async fn still_valid(
        &self,
        principal: &Principal,
        remote_addr: Option<IpAddr>,
        origin: Option<&str>,
    ) -> Result<bool, ApiError> {
        match principal {
            Principal::Anonymous => Ok(true),
            Principal::SessionUser { user_id } => self.tokens.user_is_active(user_id).await,
            Principal::AppTokenUser(token) => {
                let Some(record) = self.tokens.app_token(&token.token_id).await? else {
                    return Ok(false);
                };
                let current = record.is_active
                    && record.issue == token.issue
                    && record.user_id == token.user_id
                    && record.restrictions.permits(remote_addr, origin);
                if !current {
                    return Ok(false);
                }
                self.tokens.user_is_active(&token.user_id).await
            }
        }
    }
}

fn unavailable(err: ApiError) -> CommandError {
    tracing::warn!(error = %err, "token store lookup failed during auth");
    CommandError::Unavailable
}
