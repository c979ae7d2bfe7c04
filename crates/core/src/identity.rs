//! Principal and login-identity conversion.
//!
//! The legacy store references people and groups in ACLs by avatar id, local
//! group id, or externally-managed group name. [`PrincipalResolver`]
//! translates those references into migrated principals, falling back to
//! e-mail matching for avatars that disappeared in user merges. Login
//! identities are mapped onto authentication providers: local accounts keep
//! their (re-hashed) passwords, directory accounts are attributed to the
//! configured LDAP provider.

use tracing::debug;

use crate::context::MigrationContext;
use crate::errors::IdentityError;
use crate::models::{Principal, ProtectionMode};
use crate::report::Reporter;
use crate::store::objects::{LegacyAccess, LegacyPrincipal};

/// Provider name used for migrated local accounts.
pub const LOCAL_PROVIDER: &str = "local";

/// Resolves legacy ACL principals against the migration context.
pub struct PrincipalResolver<'a> {
    ctx: &'a MigrationContext,
    default_group_provider: &'a str,
}

impl<'a> PrincipalResolver<'a> {
    pub fn new(ctx: &'a MigrationContext, default_group_provider: &'a str) -> Self {
        Self {
            ctx,
            default_group_provider,
        }
    }

    /// Convert a legacy principal reference.
    ///
    /// Avatars resolve through the merge-aware avatar map first; if the id is
    /// unknown but the reference carries an e-mail, the e-mail indexes are
    /// consulted (the legacy store kept ACL entries pointing at merged-away
    /// records). Unresolvable references are reported and dropped.
    pub fn resolve(&self, principal: &LegacyPrincipal, reporter: &Reporter) -> Option<Principal> {
        match principal {
            LegacyPrincipal::Avatar { id, email } => {
                if let Some(&user_id) = self.ctx.avatar_user_map.get(id) {
                    return Some(Principal::User(user_id));
                }
                let email = crate::convert::clean_text(email).to_lowercase();
                if !email.is_empty() {
                    if let Some(user_id) = self.ctx.user_by_email(&email) {
                        reporter.warning(&format!(
                            "Using user {} for avatar {} (matched via {})",
                            user_id, id, email
                        ));
                        return Some(Principal::User(user_id));
                    }
                }
                reporter.error(&format!("User {} doesn't exist", id));
                None
            }
            LegacyPrincipal::Group { id } => match self.ctx.group_map.get(id) {
                Some(&group_id) => Some(Principal::LocalGroup(group_id)),
                None => {
                    reporter.error(&format!("Group {} doesn't exist", id));
                    None
                }
            },
            LegacyPrincipal::MultipassGroup { name } => Some(Principal::MultipassGroup {
                provider: self.default_group_provider.to_string(),
                name: name.clone(),
            }),
        }
    }

    /// Convert a list of principals, dropping the unresolvable ones.
    pub fn resolve_all(
        &self,
        principals: &[LegacyPrincipal],
        reporter: &Reporter,
    ) -> Vec<Principal> {
        principals
            .iter()
            .filter_map(|p| self.resolve(p, reporter))
            .collect()
    }
}

/// Map a legacy identity kind onto an authentication provider name.
///
/// Returns `None` for kinds the target system doesn't support.
pub fn provider_for_identity<'p>(kind: &str, ldap_provider: &'p str) -> Option<&'p str> {
    match kind {
        "local" => Some(LOCAL_PROVIDER),
        "ldap" => Some(ldap_provider),
        _ => None,
    }
}

/// Prepare the password hash for a migrated local identity.
///
/// Ancient records stored plaintext passwords; those are re-hashed with
/// bcrypt. Records that were already bcrypt-hashed are carried over as-is.
/// An identity with neither is unusable and yields `None`.
pub fn password_hash_for(
    identifier: &str,
    password_hash: Option<&str>,
    plaintext: Option<&str>,
) -> Result<Option<String>, IdentityError> {
    if let Some(hash) = password_hash {
        if !hash.is_empty() {
            return Ok(Some(hash.to_string()));
        }
    }
    match plaintext {
        Some(pw) if !pw.is_empty() => {
            debug!(identifier, "re-hashing legacy plaintext password");
            let hash = bcrypt::hash(pw, bcrypt::DEFAULT_COST).map_err(|e| {
                IdentityError::HashingFailed {
                    identifier: identifier.to_string(),
                    detail: e.to_string(),
                }
            })?;
            Ok(Some(hash))
        }
        _ => Ok(None),
    }
}

/// Convert legacy access-controller data into a protection mode, treating
/// out-of-range levels as protected (the safe direction for dirty data).
pub fn protection_from_access(access: &LegacyAccess, allow_public: bool) -> ProtectionMode {
    ProtectionMode::from_legacy(access.protection, allow_public)
        .unwrap_or(ProtectionMode::Protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::objects::LegacyPrincipal;

    fn ctx_with_users() -> MigrationContext {
        let mut ctx = MigrationContext::default();
        ctx.avatar_user_map.insert("10".into(), 10);
        ctx.group_map.insert("3".into(), 3);
        ctx.users_by_primary_email.insert("lost@example.com".into(), 77);
        ctx
    }

    #[test]
    fn test_resolve_avatar() {
        let ctx = ctx_with_users();
        let resolver = PrincipalResolver::new(&ctx, "ldap");
        let reporter = Reporter::quiet();

        let p = LegacyPrincipal::Avatar {
            id: "10".into(),
            email: String::new(),
        };
        assert_eq!(resolver.resolve(&p, &reporter), Some(Principal::User(10)));
    }

    #[test]
    fn test_resolve_avatar_via_email() {
        let ctx = ctx_with_users();
        let resolver = PrincipalResolver::new(&ctx, "ldap");
        let reporter = Reporter::quiet();

        let p = LegacyPrincipal::Avatar {
            id: "999".into(),
            email: "Lost@Example.com".into(),
        };
        assert_eq!(resolver.resolve(&p, &reporter), Some(Principal::User(77)));
    }

    #[test]
    fn test_resolve_unknown_avatar() {
        let ctx = ctx_with_users();
        let resolver = PrincipalResolver::new(&ctx, "ldap");
        let reporter = Reporter::quiet();

        let p = LegacyPrincipal::Avatar {
            id: "999".into(),
            email: String::new(),
        };
        assert_eq!(resolver.resolve(&p, &reporter), None);
    }

    #[test]
    fn test_resolve_multipass_group_gets_provider() {
        let ctx = MigrationContext::default();
        let resolver = PrincipalResolver::new(&ctx, "corp-ldap");
        let reporter = Reporter::quiet();

        let p = LegacyPrincipal::MultipassGroup {
            name: "it-dep".into(),
        };
        assert_eq!(
            resolver.resolve(&p, &reporter),
            Some(Principal::MultipassGroup {
                provider: "corp-ldap".into(),
                name: "it-dep".into(),
            })
        );
    }

    #[test]
    fn test_provider_for_identity() {
        assert_eq!(provider_for_identity("local", "ldap"), Some("local"));
        assert_eq!(provider_for_identity("ldap", "corp"), Some("corp"));
        assert_eq!(provider_for_identity("nice", "ldap"), None);
    }

    #[test]
    fn test_password_hash_carries_existing_hash() {
        let hash = password_hash_for("jdoe", Some("$2b$12$abcdef"), None).unwrap();
        assert_eq!(hash.as_deref(), Some("$2b$12$abcdef"));
    }

    #[test]
    fn test_password_hash_rehashes_plaintext() {
        let hash = password_hash_for("jdoe", None, Some("hunter2"))
            .unwrap()
            .expect("expected a hash");
        assert!(bcrypt::verify("hunter2", &hash).unwrap());
    }

    #[test]
    fn test_password_hash_empty_is_none() {
        assert_eq!(password_hash_for("jdoe", None, Some("")).unwrap(), None);
        assert_eq!(password_hash_for("jdoe", Some(""), None).unwrap(), None);
    }

    #[test]
    fn test_protection_from_access() {
        let access = LegacyAccess {
            protection: -1,
            ..Default::default()
        };
        assert_eq!(
            protection_from_access(&access, true),
            ProtectionMode::Public
        );
        let access = LegacyAccess {
            protection: 7,
            ..Default::default()
        };
        assert_eq!(
            protection_from_access(&access, true),
            ProtectionMode::Protected
        );
    }
}
