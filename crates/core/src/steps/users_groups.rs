//! User, group, and system-user migration.
//!
//! The messiest step of the pipeline. Legacy user records carry merge
//! chains (possibly pointing at records that haven't been visited yet),
//! invalid e-mails, duplicate e-mails across records, plaintext passwords,
//! and login identities belonging to several authentication systems. The
//! rules applied here:
//!
//! - merged records don't produce rows; their ids map to the surviving user
//! - a user whose primary e-mail is invalid is migrated but marked deleted
//! - primary/primary e-mail collisions delete the colliding record that has
//!   no login identities (or both, if that doesn't disambiguate)
//! - secondary e-mails colliding with any other record's e-mails are dropped
//! - local accounts keep their passwords (re-hashed when plaintext) unless
//!   `--ignore-local-accounts` is set; directory accounts are attributed to
//!   the configured LDAP provider

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Duration;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::convert::{clean_text, is_plausible_timezone, is_valid_email, parse_datetime, sanitize_email};
use crate::db::queries;
use crate::errors::{DatabaseError, IdentityError, MigrationError};
use crate::identity::{password_hash_for, provider_for_identity};
use crate::models::{normalize_title, NewApiKey, NewUser};
use crate::report::Reporter;
use crate::steps::{MigrationStep, StepEnv};
use crate::store::objects::{LegacyAvatar, MainSnapshot};

/// Legacy profile field names -> target setting names, for directory sync.
const SYNCED_FIELD_MAP: &[(&str, &str)] = &[
    ("firstName", "first_name"),
    ("surName", "last_name"),
    ("affiliation", "affiliation"),
    ("address", "address"),
    ("phone", "phone"),
];

pub struct UsersGroupsStep;

impl MigrationStep for UsersGroupsStep {
    fn name(&self) -> &'static str {
        "users-groups"
    }

    fn run(&self, env: &mut StepEnv<'_>) -> Result<(), MigrationError> {
        let config = env.config;
        let db = env.db;
        let snapshot = env.snapshot;
        let base = env.reporter;
        let ctx = &mut *env.ctx;
        let reporter = base.for_step("users");

        // Everything this step feeds into the shared namespace is rebuilt
        // from scratch, so repeating the step after a rolled-back failure is
        // safe.
        ctx.avatar_user_map.clear();
        ctx.users_by_primary_email.clear();
        ctx.users_by_secondary_email.clear();
        ctx.users_by_email.clear();
        ctx.group_map.clear();
        ctx.pending_favorite_categories.clear();
        ctx.system_user_id = None;

        db.transaction_with(|conn| {
            base.step("Users");
            let favorites = migrate_users(conn, config, snapshot, ctx, &reporter)?;

            base.step("Favorite users");
            migrate_favorite_users(conn, ctx, &favorites, &reporter)?;

            base.step("Admins");
            migrate_admins(conn, snapshot, ctx, &reporter)?;

            base.step("Groups");
            migrate_groups(conn, snapshot, ctx, &reporter)?;

            migrate_system_user(conn, config, ctx, &reporter)?;

            // Deleted users must not keep identities, otherwise logging in
            // via a remote provider fails instead of creating a fresh
            // account.
            let removed = queries::delete_identities_of_deleted_users(conn)?;
            if removed > 0 {
                reporter.info(&format!("removed {} identities of deleted users", removed));
            }
            Ok::<_, MigrationError>(())
        })?;
        db.fix_sequences(&["users", "groups"])?;

        // Combined e-mail index for the later steps; primary e-mails win.
        ctx.users_by_email = ctx.users_by_secondary_email.clone();
        ctx.users_by_email.extend(
            ctx.users_by_primary_email
                .iter()
                .map(|(k, v)| (k.clone(), *v)),
        );
        Ok(())
    }
}

/// Deferred favorite-user links: `(user id, legacy avatar ids)`.
type FavoritePairs = Vec<(i64, Vec<String>)>;

fn migrate_users(
    conn: &Connection,
    config: &MigrationConfig,
    snapshot: &MainSnapshot,
    ctx: &mut MigrationContext,
    reporter: &Reporter,
) -> Result<FavoritePairs, DatabaseError> {
    // Merge targets not yet migrated: target avatar id -> source avatar ids.
    let mut unresolved_merges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    // Whether a migrated user had any legacy identities (collision handling).
    let mut had_identities: HashMap<i64, bool> = HashMap::new();
    let mut seen_identities: HashSet<(String, String)> = HashSet::new();
    let mut favorites: FavoritePairs = Vec::new();

    let bar = reporter.progress(snapshot.avatars.len() as u64, "Migrating users");
    for avatar in snapshot.avatars.values() {
        bar.inc(1);

        if let Some(target) = avatar.merged_into.as_deref().filter(|t| !t.is_empty()) {
            reporter.warning(&format!("Skipping {} - merged into {}", avatar.id, target));
            match ctx.avatar_user_map.get(target).copied() {
                Some(user_id) => {
                    ctx.avatar_user_map.insert(avatar.id.clone(), user_id);
                }
                None => {
                    // target not migrated yet, resolve once it shows up
                    unresolved_merges
                        .entry(target.to_string())
                        .or_default()
                        .insert(avatar.id.clone());
                }
            }
            continue;
        }
        if avatar.status == "Not confirmed" {
            reporter.warning(&format!("Skipping {} - not activated", avatar.id));
            continue;
        }
        if avatar.name.trim().is_empty()
            && avatar.surname.trim().is_empty()
            && avatar.identities.is_empty()
            && !avatar.has_links
        {
            reporter.warning(&format!(
                "Skipping {} - no names and no identities/links",
                avatar.id
            ));
            continue;
        }

        let user_id: i64 = match avatar.id.parse() {
            Ok(id) => id,
            Err(_) => {
                reporter.error(&format!("Skipping {} - non-numeric avatar id", avatar.id));
                continue;
            }
        };

        let (mut user, secondary_emails) = user_from_avatar(user_id, avatar);
        fix_collisions(conn, ctx, &had_identities, &mut user, avatar, reporter)?;
        queries::insert_user(conn, &user)?;
        for email in &secondary_emails {
            if ctx.users_by_primary_email.contains_key(email) {
                reporter.warning(&format!(
                    "Removing colliding secondary email (S/P from {}) [{}]",
                    user.id, email
                ));
                continue;
            }
            if ctx.users_by_secondary_email.contains_key(email) {
                reporter.warning(&format!(
                    "Removing colliding secondary email (S/S from {}) [{}]",
                    user.id, email
                ));
                continue;
            }
            queries::insert_secondary_email(conn, user.id, email)?;
            if !user.is_deleted {
                ctx.users_by_secondary_email.insert(email.clone(), user.id);
            }
        }
        had_identities.insert(user.id, !avatar.identities.is_empty());

        write_user_settings(conn, snapshot, avatar, user.id)?;

        // favorite categories cannot be linked yet; the category step does it
        for categ_id in &avatar.favorite_categories {
            if !categ_id.is_empty() {
                ctx.pending_favorite_categories
                    .entry(categ_id.clone())
                    .or_default()
                    .push(user.id);
            }
        }

        reporter.success(&format!(
            "{:6} {} {} [{}]",
            user.id, user.first_name, user.last_name, user.email
        ));

        migrate_api_key(conn, avatar, user.id, reporter)?;
        migrate_identities(
            conn,
            config,
            avatar,
            user.id,
            &mut seen_identities,
            reporter,
        )?;

        if !avatar.favorite_users.is_empty() {
            favorites.push((user.id, avatar.favorite_users.clone()));
        }

        // map previously-merged records onto the new user
        for merged in &avatar.merged_from {
            if *merged != avatar.id {
                ctx.avatar_user_map.insert(merged.clone(), user.id);
            }
        }
        ctx.avatar_user_map.insert(avatar.id.clone(), user.id);
        resolve_pending_merges(ctx, &mut unresolved_merges, &avatar.id, user.id);
    }
    bar.finish_and_clear();

    for (target, sources) in &unresolved_merges {
        for source in sources {
            reporter.error(&format!(
                "Merge target {} for {} was never migrated",
                target, source
            ));
        }
    }
    Ok(favorites)
}

/// Resolve merge chains whose target just got migrated, recursively: a chain
/// `a -> b -> c` resolves `a` and `b` the moment `c` appears.
fn resolve_pending_merges(
    ctx: &mut MigrationContext,
    unresolved: &mut BTreeMap<String, BTreeSet<String>>,
    migrated_avatar: &str,
    user_id: i64,
) {
    let mut stack = vec![migrated_avatar.to_string()];
    while let Some(target) = stack.pop() {
        if let Some(sources) = unresolved.remove(&target) {
            for source in sources {
                ctx.avatar_user_map.insert(source.clone(), user_id);
                stack.push(source);
            }
        }
    }
}

fn user_from_avatar(user_id: i64, avatar: &LegacyAvatar) -> (NewUser, Vec<String>) {
    let email = sanitize_email(&avatar.email).unwrap_or_else(|| {
        clean_text(&avatar.email).to_lowercase()
    });
    let mut secondary: Vec<String> = avatar
        .secondary_emails
        .iter()
        .filter_map(|e| sanitize_email(e))
        .filter(|e| *e != email)
        .collect();
    secondary.sort();
    secondary.dedup();

    let first_name = clean_text(&avatar.name);
    let last_name = clean_text(&avatar.surname);
    let user = NewUser {
        id: user_id,
        first_name: if first_name.is_empty() {
            "UNKNOWN".into()
        } else {
            first_name
        },
        last_name: if last_name.is_empty() {
            "UNKNOWN".into()
        } else {
            last_name
        },
        title: normalize_title(&avatar.title),
        phone: clean_text(&avatar.telephone),
        affiliation: clean_text(&avatar.organisation),
        address: clean_text(&avatar.address),
        is_blocked: avatar.status == "disabled",
        // unrepairable primary e-mail: keep the row, mark it deleted
        is_deleted: !is_valid_email(&email),
        email,
        ..Default::default()
    };
    (user, secondary)
}

/// Repair e-mail collisions against previously migrated users.
fn fix_collisions(
    conn: &Connection,
    ctx: &mut MigrationContext,
    had_identities: &HashMap<i64, bool>,
    user: &mut NewUser,
    avatar: &LegacyAvatar,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    let was_deleted = user.is_deleted;

    // Primary/primary collision: keep the record that has identities.
    if let Some(&coll_id) = ctx.users_by_primary_email.get(&user.email) {
        if !was_deleted {
            let coll_has = had_identities.get(&coll_id).copied().unwrap_or(false);
            let user_has = !avatar.identities.is_empty();
            let (delete_user, delete_coll) = if user_has != coll_has {
                (coll_has, user_has)
            } else {
                (true, true)
            };
            if delete_user {
                reporter.warning(&format!(
                    "Deleting {} - primary email collision [{}]",
                    user.id, user.email
                ));
                user.is_deleted = true;
            }
            if delete_coll {
                reporter.warning(&format!(
                    "Deleting {} - primary email collision [{}]",
                    coll_id, user.email
                ));
                queries::mark_user_deleted(conn, coll_id)?;
            }
        }
    }
    if !was_deleted && !user.is_deleted {
        ctx.users_by_primary_email.insert(user.email.clone(), user.id);
    }

    // This user's primary e-mail listed as someone else's secondary.
    if let Some(coll_id) = ctx.users_by_secondary_email.get(&user.email).copied() {
        reporter.warning(&format!(
            "Removing colliding secondary email (P/S from {}) [{}]",
            coll_id, user.email
        ));
        queries::remove_secondary_email(conn, coll_id, &user.email)?;
        ctx.users_by_secondary_email.remove(&user.email);
    }
    Ok(())
}

fn write_user_settings(
    conn: &Connection,
    snapshot: &MainSnapshot,
    avatar: &LegacyAvatar,
    user_id: i64,
) -> Result<(), DatabaseError> {
    let timezone = if is_plausible_timezone(&avatar.timezone) {
        avatar.timezone.clone()
    } else {
        snapshot.server_timezone().to_string()
    };
    let lang = if avatar.lang.is_empty() {
        snapshot.server_language().to_string()
    } else {
        avatar.lang.clone()
    };

    queries::set_user_setting(conn, user_id, "lang", &json!(lang))?;
    queries::set_user_setting(conn, user_id, "timezone", &json!(timezone))?;
    queries::set_user_setting(
        conn,
        user_id,
        "force_timezone",
        &json!(avatar.display_tz_mode == "MyTimezone"),
    )?;
    queries::set_user_setting(
        conn,
        user_id,
        "show_past_events",
        &json!(avatar.show_past_events),
    )?;

    // fields unlocked from directory sync: store the still-synced remainder
    let unlocked: HashSet<&str> = avatar
        .unlocked_fields
        .iter()
        .filter_map(|f| {
            SYNCED_FIELD_MAP
                .iter()
                .find(|(legacy, _)| legacy == f)
                .map(|(_, new)| *new)
        })
        .collect();
    if !unlocked.is_empty() {
        let mut synced: Vec<&str> = SYNCED_FIELD_MAP
            .iter()
            .map(|(_, new)| *new)
            .filter(|f| !unlocked.contains(f))
            .collect();
        synced.sort_unstable();
        queries::set_user_setting(conn, user_id, "synced_fields", &json!(synced))?;
    }
    Ok(())
}

fn migrate_api_key(
    conn: &Connection,
    avatar: &LegacyAvatar,
    user_id: i64,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    let Some(ak) = &avatar.api_key else {
        return Ok(());
    };
    let last_used_uri = match (&ak.last_path, &ak.last_query) {
        (Some(path), Some(query)) if !query.is_empty() => Some(format!("{}?{}", path, query)),
        (Some(path), _) => Some(path.clone()),
        _ => None,
    };
    let created_at = ak
        .created_at
        .as_deref()
        .and_then(parse_datetime)
        .map(|p| p.dt);
    let key = NewApiKey {
        user_id,
        token: ak.token.clone(),
        secret: ak.secret.clone(),
        is_active: true,
        is_blocked: ak.is_blocked,
        is_persistent_allowed: ak.persistent_allowed,
        created_at,
        last_used_at: ak
            .last_used_at
            .as_deref()
            .and_then(parse_datetime)
            .map(|p| p.dt),
        last_used_ip: ak.last_used_ip.clone(),
        last_used_uri,
        last_used_auth: ak.last_used_auth,
        use_count: ak.use_count,
    };
    queries::insert_api_key(conn, &key)?;
    reporter.info(&format!("<-> api key {}", ak.token));

    for old_token in &ak.old_keys {
        // no creation time was kept for rotated keys; use *something* older
        let fake_created = created_at.map(|dt| dt - Duration::hours(1));
        let old = NewApiKey {
            user_id,
            token: old_token.clone(),
            // secrets were never kept for old keys
            secret: Uuid::new_v4().to_string(),
            is_active: false,
            created_at: fake_created,
            ..Default::default()
        };
        queries::insert_api_key(conn, &old)?;
    }
    Ok(())
}

fn migrate_identities(
    conn: &Connection,
    config: &MigrationConfig,
    avatar: &LegacyAvatar,
    user_id: i64,
    seen: &mut HashSet<(String, String)>,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    for identity in &avatar.identities {
        let username = clean_text(&identity.login).to_lowercase();
        if username.is_empty() {
            reporter.warning(&format!(
                "Empty username for user {}. Skipping identity.",
                user_id
            ));
            continue;
        }

        let Some(provider) = provider_for_identity(&identity.kind, &config.ldap_provider_name)
        else {
            reporter.error(&format!(
                "Unsupported provider: {}. Skipping identity.",
                identity.kind
            ));
            continue;
        };

        let key = (provider.to_string(), username.clone());
        if seen.contains(&key) {
            reporter.error(&format!(
                "Duplicate identity: {}, {}. Skipping.",
                provider, username
            ));
            continue;
        }

        if identity.kind == "local" {
            if config.ignore_local_accounts {
                continue;
            }
            let hash = match password_hash_for(
                &username,
                identity.password_hash.as_deref(),
                identity.password.as_deref(),
            ) {
                Ok(Some(hash)) => hash,
                Ok(None) => {
                    reporter.error(&format!(
                        "Identity '{}' has empty password. Skipping identity.",
                        username
                    ));
                    continue;
                }
                Err(IdentityError::HashingFailed { identifier, detail }) => {
                    reporter.error(&format!(
                        "Could not hash password for '{}': {}. Skipping identity.",
                        identifier, detail
                    ));
                    continue;
                }
                Err(_) => continue,
            };
            queries::insert_identity(conn, user_id, provider, &username, Some(&hash))?;
        } else {
            queries::insert_identity(conn, user_id, provider, &username, None)?;
        }
        reporter.info(&format!("<-> {}:{}", provider, username));
        seen.insert(key);
    }
    Ok(())
}

fn migrate_favorite_users(
    conn: &Connection,
    ctx: &MigrationContext,
    favorites: &FavoritePairs,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    for (user_id, avatar_ids) in favorites {
        for avatar_id in avatar_ids {
            match ctx.avatar_user_map.get(avatar_id) {
                Some(&fav_id) => {
                    queries::insert_favorite_user(conn, *user_id, fav_id)?;
                    reporter.info(&format!("F {:6} -> {}", user_id, fav_id));
                }
                None => {
                    reporter.warning(&format!(
                        "User not found: {} (favorite of {})",
                        avatar_id, user_id
                    ));
                }
            }
        }
        // everyone is their own favorite
        queries::insert_favorite_user(conn, *user_id, *user_id)?;
    }
    Ok(())
}

fn migrate_admins(
    conn: &Connection,
    snapshot: &MainSnapshot,
    ctx: &MigrationContext,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    for avatar_id in &snapshot.admins {
        match ctx.avatar_user_map.get(avatar_id) {
            Some(&user_id) => {
                queries::set_user_admin(conn, user_id)?;
                reporter.success(&format!("admin: {}", user_id));
            }
            None => {
                reporter.warning(&format!("Admin user not found: {}", avatar_id));
            }
        }
    }
    Ok(())
}

fn migrate_groups(
    conn: &Connection,
    snapshot: &MainSnapshot,
    ctx: &mut MigrationContext,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    let mut used_names: HashSet<String> = HashSet::new();
    for group in snapshot.groups.values() {
        let group_id: i64 = match group.id.parse() {
            Ok(id) => id,
            Err(_) => {
                reporter.error(&format!("Skipping group {} - non-numeric id", group.id));
                continue;
            }
        };
        let orig_name = clean_text(&group.name);
        let mut name = orig_name.clone();
        let mut n = 0;
        while used_names.contains(&name.to_lowercase()) {
            name = format!("{}-{}", orig_name, n);
            n += 1;
            reporter.warning(&format!(
                "Duplicate group name: {}, using {} instead",
                orig_name, name
            ));
        }
        used_names.insert(name.to_lowercase());

        queries::insert_group(conn, group_id, &name)?;
        reporter.success(&format!("{:6} {}", group_id, name));

        for member in &group.members {
            match ctx.avatar_user_map.get(member) {
                Some(&user_id) => {
                    queries::insert_group_member(conn, group_id, user_id)?;
                }
                None => {
                    reporter.warning(&format!("User not found: {}", member));
                }
            }
        }
        ctx.group_map.insert(group.id.clone(), group_id);
    }
    Ok(())
}

fn migrate_system_user(
    conn: &Connection,
    config: &MigrationConfig,
    ctx: &mut MigrationContext,
    reporter: &Reporter,
) -> Result<(), MigrationError> {
    if let Some(id) = config.system_user_id {
        if !queries::user_exists(conn, id)? {
            return Err(MigrationError::IdentityError(
                IdentityError::InvalidSystemUser(id),
            ));
        }
        queries::set_user_system(conn, id)?;
        ctx.system_user_id = Some(id);
        reporter.success_always(&format!("Using existing system user: {}", id));
        return Ok(());
    }

    let system_user = NewUser {
        first_name: "System".into(),
        last_name: "User".into(),
        email: String::new(),
        is_system: true,
        ..Default::default()
    };
    // id 0 is conventional for the system user, when free
    let zero_taken: i64 = conn
        .query_row("SELECT COUNT(*) FROM users WHERE id = 0", [], |row| {
            row.get(0)
        })
        .map_err(crate::errors::DatabaseError::from)?;
    let id = if zero_taken == 0 {
        let mut user = system_user.clone();
        user.id = 0;
        queries::insert_user(conn, &user)?;
        0
    } else {
        queries::insert_user_auto_id(conn, &system_user)?
    };
    ctx.system_user_id = Some(id);
    reporter.success_always(&format!("Added new system user: {}", id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::steps::testutil::{run_step, test_config_simple};
    use crate::store::objects::{LegacyGroup, LegacyIdentity};

    fn avatar(id: &str, email: &str) -> LegacyAvatar {
        LegacyAvatar {
            id: id.into(),
            name: format!("First{}", id),
            surname: format!("Last{}", id),
            email: email.into(),
            status: "activated".into(),
            ..Default::default()
        }
    }

    fn run(snapshot: &MainSnapshot) -> (Database, MigrationContext) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let config = test_config_simple();
        let mut ctx = MigrationContext::default();
        run_step(&UsersGroupsStep, &config, &db, snapshot, None, &mut ctx).unwrap();
        (db, ctx)
    }

    #[test]
    fn test_basic_user_migration() {
        let mut snapshot = MainSnapshot::default();
        snapshot
            .avatars
            .insert("1".into(), avatar("1", " Ada@Example.COM "));
        let (db, ctx) = run(&snapshot);

        let conn = db.conn();
        let email: String = conn
            .query_row("SELECT email FROM users WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(email, "ada@example.com");
        assert_eq!(ctx.avatar_user_map.get("1"), Some(&1));
        assert_eq!(ctx.users_by_primary_email.get("ada@example.com"), Some(&1));
    }

    #[test]
    fn test_invalid_email_marks_deleted() {
        let mut snapshot = MainSnapshot::default();
        snapshot.avatars.insert("1".into(), avatar("1", "garbage"));
        let (db, _ctx) = run(&snapshot);

        let deleted: bool = db
            .conn()
            .query_row("SELECT is_deleted FROM users WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert!(deleted);
    }

    #[test]
    fn test_merge_chain_resolution() {
        // 1 merged into 2, 2 merged into 3; 3 migrated last
        let mut snapshot = MainSnapshot::default();
        let mut a1 = avatar("1", "a1@example.com");
        a1.merged_into = Some("2".into());
        let mut a2 = avatar("2", "a2@example.com");
        a2.merged_into = Some("3".into());
        let a3 = avatar("3", "a3@example.com");
        snapshot.avatars.insert("1".into(), a1);
        snapshot.avatars.insert("2".into(), a2);
        snapshot.avatars.insert("3".into(), a3);
        let (db, ctx) = run(&snapshot);

        assert_eq!(ctx.avatar_user_map.get("1"), Some(&3));
        assert_eq!(ctx.avatar_user_map.get("2"), Some(&3));
        assert_eq!(ctx.avatar_user_map.get("3"), Some(&3));
        // only the surviving user got a row
        assert_eq!(
            queries::count_rows(&db.conn(), "users").unwrap(),
            2 // user 3 + system user
        );
    }

    #[test]
    fn test_primary_email_collision_keeps_identity_holder() {
        let mut snapshot = MainSnapshot::default();
        let mut a1 = avatar("1", "shared@example.com");
        a1.identities = vec![LegacyIdentity {
            kind: "ldap".into(),
            login: "first".into(),
            ..Default::default()
        }];
        let a2 = avatar("2", "shared@example.com");
        snapshot.avatars.insert("1".into(), a1);
        snapshot.avatars.insert("2".into(), a2);
        let (db, ctx) = run(&snapshot);

        let conn = db.conn();
        let u1_deleted: bool = conn
            .query_row("SELECT is_deleted FROM users WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        let u2_deleted: bool = conn
            .query_row("SELECT is_deleted FROM users WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert!(!u1_deleted, "identity holder must survive");
        assert!(u2_deleted, "identity-less collider must be deleted");
        // the deleted user keeps no identities (it had none anyway)
        assert_eq!(ctx.users_by_primary_email.get("shared@example.com"), Some(&1));
    }

    #[test]
    fn test_unconfirmed_avatar_skipped() {
        let mut snapshot = MainSnapshot::default();
        let mut a1 = avatar("1", "a@example.com");
        a1.status = "Not confirmed".into();
        snapshot.avatars.insert("1".into(), a1);
        let (db, ctx) = run(&snapshot);

        assert!(!ctx.avatar_user_map.contains_key("1"));
        // only the system user
        assert_eq!(queries::count_rows(&db.conn(), "users").unwrap(), 1);
    }

    #[test]
    fn test_identities_and_plaintext_rehash() {
        let mut snapshot = MainSnapshot::default();
        let mut a1 = avatar("1", "a@example.com");
        a1.identities = vec![
            LegacyIdentity {
                kind: "local".into(),
                login: "Ada".into(),
                password: Some("hunter2".into()),
                ..Default::default()
            },
            LegacyIdentity {
                kind: "ldap".into(),
                login: "ada".into(),
                ..Default::default()
            },
            LegacyIdentity {
                kind: "nice".into(),
                login: "ada".into(),
                ..Default::default()
            },
        ];
        snapshot.avatars.insert("1".into(), a1);
        let (db, _ctx) = run(&snapshot);

        let conn = db.conn();
        assert_eq!(queries::count_rows(&conn, "identities").unwrap(), 2);
        let hash: String = conn
            .query_row(
                "SELECT password_hash FROM identities WHERE provider = 'local'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(bcrypt::verify("hunter2", &hash).unwrap());
    }

    #[test]
    fn test_group_name_dedup() {
        let mut snapshot = MainSnapshot::default();
        snapshot.avatars.insert("1".into(), avatar("1", "a@example.com"));
        snapshot.groups.insert(
            "1".into(),
            LegacyGroup {
                id: "1".into(),
                name: "Physicists".into(),
                members: vec!["1".into()],
            },
        );
        snapshot.groups.insert(
            "2".into(),
            LegacyGroup {
                id: "2".into(),
                name: "physicists".into(),
                members: vec!["1".into(), "404".into()],
            },
        );
        let (db, ctx) = run(&snapshot);

        let conn = db.conn();
        assert_eq!(queries::count_rows(&conn, "groups").unwrap(), 2);
        let name: String = conn
            .query_row("SELECT name FROM groups WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "physicists-0");
        assert_eq!(ctx.group_map.get("2"), Some(&2));
        // member 404 doesn't exist -> only one membership row each
        assert_eq!(queries::count_rows(&conn, "group_members").unwrap(), 2);
    }

    #[test]
    fn test_system_user_created() {
        let snapshot = MainSnapshot::default();
        let (db, ctx) = run(&snapshot);

        assert_eq!(ctx.system_user_id, Some(0));
        let is_system: bool = db
            .conn()
            .query_row("SELECT is_system FROM users WHERE id = 0", [], |r| r.get(0))
            .unwrap();
        assert!(is_system);
    }

    #[test]
    fn test_invalid_system_user_id_fails() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let mut config = test_config_simple();
        config.system_user_id = Some(1234);
        let mut ctx = MigrationContext::default();
        let result = run_step(
            &UsersGroupsStep,
            &config,
            &db,
            &MainSnapshot::default(),
            None,
            &mut ctx,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_admins_flagged() {
        let mut snapshot = MainSnapshot::default();
        snapshot.avatars.insert("1".into(), avatar("1", "a@example.com"));
        snapshot.admins = vec!["1".into(), "999".into()];
        let (db, _ctx) = run(&snapshot);

        let is_admin: bool = db
            .conn()
            .query_row("SELECT is_admin FROM users WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert!(is_admin);
    }
}
