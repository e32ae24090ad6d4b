//! `user[:gid[:gid...]]` identity parsing, grounded in
//! `util.c`'s `parse_user`, using the `users` crate for uid/gid-from-name
//! lookups instead of hand-rolled `getpwnam`/`getgrnam` FFI.

use crate::task::Identity;
use thiserror::Error;
use users::{get_group_by_name, get_user_by_name};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("unknown group: {0}")]
    UnknownGroup(String),
}

/// Parses `user[:gid[:gid...]]`, where `user` and each `gid` may be either
/// numeric or a name. A named user's passwd entry supplies the primary
/// group; every colon-separated token after the user is a supplementary
/// group, capped at [`crate::task::MAX_SUPPLEMENTARY_GIDS`] — exceeding the
/// cap logs a warning and drops the rest rather than failing.
pub fn parse_identity(spec: &str) -> Result<Identity, IdentityError> {
    let mut parts = spec.split(':');
    let user_part = parts.next().unwrap_or("");

    let (uid, gid) = resolve_user(user_part)?;

    let mut identity = Identity {
        uid: Some(uid),
        gid,
        gids: Vec::new(),
    };

    for group_part in parts {
        let gid = resolve_group(group_part)?;
        if !identity.push_gid(gid) {
            tracing::warn!(
                max = crate::task::MAX_SUPPLEMENTARY_GIDS,
                "more than {} groups given, ignoring additional ones",
                crate::task::MAX_SUPPLEMENTARY_GIDS
            );
            break;
        }
    }

    Ok(identity)
}

/// Resolves the uid and, for a named user, the primary gid from its passwd
/// entry. A purely numeric spec is taken as-is, matching `strtoul`-then-fall
/// back-to-`getpwnam` in the original.
fn resolve_user(s: &str) -> Result<(libc::uid_t, Option<libc::gid_t>), IdentityError> {
    if let Ok(uid) = s.parse::<libc::uid_t>() {
        return Ok((uid, None));
    }
    let u = get_user_by_name(s).ok_or_else(|| IdentityError::UnknownUser(s.to_string()))?;
    Ok((u.uid(), Some(u.primary_group_id())))
}

fn resolve_group(s: &str) -> Result<libc::gid_t, IdentityError> {
    if let Ok(gid) = s.parse::<libc::gid_t>() {
        return Ok(gid);
    }
    get_group_by_name(s)
        .map(|g| g.gid())
        .ok_or_else(|| IdentityError::UnknownGroup(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_user_only() {
        let id = parse_identity("1000").unwrap();
        assert_eq!(id.uid, Some(1000));
        assert_eq!(id.gid, None);
        assert!(id.gids.is_empty());
    }

    #[test]
    fn numeric_user_has_no_passwd_primary_group() {
        // A purely numeric spec is taken as-is, with no passwd lookup, so it
        // never supplies a primary group on its own.
        let id = parse_identity("1000:100").unwrap();
        assert_eq!(id.uid, Some(1000));
        assert_eq!(id.gid, None);
        assert_eq!(id.gids, vec![100]);
    }

    #[test]
    fn all_colon_separated_groups_are_supplementary() {
        let id = parse_identity("1000:100:200:300").unwrap();
        assert_eq!(id.gid, None);
        assert_eq!(id.gids, vec![100, 200, 300]);
    }

    #[test]
    fn named_user_supplies_primary_group_from_passwd() {
        // root exists with uid/gid 0 on every Unix system under test.
        let id = parse_identity("root:100:200").unwrap();
        assert_eq!(id.uid, Some(0));
        assert_eq!(id.gid, Some(0));
        assert_eq!(id.gids, vec![100, 200]);
    }

    #[test]
    fn exceeding_supplementary_gid_capacity_drops_extras_instead_of_failing() {
        let mut spec = String::from("1000");
        for gid in 0..crate::task::MAX_SUPPLEMENTARY_GIDS + 5 {
            spec.push(':');
            spec.push_str(&gid.to_string());
        }
        let id = parse_identity(&spec).unwrap();
        assert_eq!(id.gids.len(), crate::task::MAX_SUPPLEMENTARY_GIDS);
    }

    #[test]
    fn rejects_unknown_numeric_lookups_gracefully() {
        // A name that cannot possibly resolve on any system under test.
        let err = parse_identity("no-such-user-xyz123").unwrap_err();
        assert!(matches!(err, IdentityError::UnknownUser(_)));
    }
}
