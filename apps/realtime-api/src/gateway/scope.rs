//! Subscribe-time gates: app-token scope and `user` room ownership.

use crate::auth::principal::{Principal, Scope};
use crate::error::CommandError;

use super::rooms::{Room, RoomKind};

/// Coarse gate: may this principal use the realtime channel at all?
///
/// Room-kind independent. Anonymous and session principals always pass; app tokens
/// need `read-realtime`.
pub fn can_subscribe(principal: &Principal, _room: &Room) -> bool {
    match principal {
        Principal::Anonymous | Principal::SessionUser { .. } => true,
        Principal::AppTokenUser(token) => token.scopes.contains(Scope::ReadRealtime),
    }
}

/// Full subscribe check for one room: the scope gate, then ownership of `user` rooms,
/// which carry a user's private notification stream.
pub fn check_subscribe(principal: &Principal, room: &Room) -> Result<(), CommandError> {
    if !can_subscribe(principal, room) {
        return Err(CommandError::InsufficientScope);
    }
    if room.kind == RoomKind::User && principal.user_id() != Some(room.id.as_str()) {
        return Err(CommandError::Forbidden);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::{AppTokenPrincipal, ScopeSet};
    use crate::auth::restrictions::Restrictions;

    fn app_token(scopes: &[Scope]) -> Principal {
        Principal::AppTokenUser(AppTokenPrincipal {
            user_id: "luna".into(),
            token_id: "apt_1".into(),
            issue: 1,
            scopes: ScopeSet::new(scopes.iter().copied()),
            restrictions: Restrictions::default(),
        })
    }

    #[test]
    fn anonymous_and_session_are_never_scope_gated() {
        let room = Room::timeline("f1");
        assert!(can_subscribe(&Principal::Anonymous, &room));
        assert!(can_subscribe(&Principal::session("luna"), &room));
    }

    #[test]
    fn app_token_needs_read_realtime_for_every_room_kind() {
        let without = app_token(&[Scope::ReadFeeds, Scope::ReadMyInfo]);
        let with = app_token(&[Scope::ReadRealtime]);
        for room in [
            Room::timeline("f1"),
            Room::post("p1"),
            Room::user("luna"),
            Room::global_users(),
        ] {
            assert_eq!(
                check_subscribe(&without, &room),
                Err(CommandError::InsufficientScope)
            );
            assert_eq!(check_subscribe(&with, &room), Ok(()));
        }
    }

    #[test]
    fn user_rooms_are_owner_only() {
        assert_eq!(
            check_subscribe(&Principal::session("mars"), &Room::user("luna")),
            Err(CommandError::Forbidden)
        );
        assert_eq!(
            check_subscribe(&Principal::Anonymous, &Room::user("luna")),
            Err(CommandError::Forbidden)
        );
        assert_eq!(
            check_subscribe(&Principal::session("luna"), &Room::user("luna")),
            Ok(())
        );
    }
}
