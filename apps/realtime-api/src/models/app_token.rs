use diesel::prelude::*;

use crate::auth::principal::ScopeSet;
use crate::auth::restrictions::Restrictions;
use crate::db::schema::app_tokens;
use crate::db::store::AppTokenRecord;

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = app_tokens)]
pub struct AppToken {
    pub id: String,
    pub user_id: String,
    pub issue: i32,
    pub is_active: bool,
    pub scopes: Vec<String>,
    pub netmasks: Vec<String>,
    pub origins: Vec<String>,
}

impl From<AppToken> for AppTokenRecord {
    fn from(token: AppToken) -> Self {
        Self {
            scopes: ScopeSet::parse(&token.scopes),
            restrictions: Restrictions::parse(&token.netmasks, &token.origins),
            id: token.id,
            user_id: token.user_id,
            issue: token.issue,
            is_active: token.is_active,
        }
    }
}
