//! Category tree migration.
//!
//! Walks the legacy category tree depth-first from the root, repairing
//! titles, normalizing visibility, allocating numeric ids for legacy
//! (non-numeric) ones, converting protection/ACL data, and migrating
//! per-category attachments. Domain-protected public categories become
//! protected with network read access.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::Connection;

use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::convert::{clean_text, sanitize_user_input, secure_filename, split_email_list};
use crate::db::queries;
use crate::errors::{DatabaseError, MigrationError};
use crate::identity::PrincipalResolver;
use crate::models::{CategoryIcon, FolderLink, NewCategory, ProtectionMode};
use crate::report::Reporter;
use crate::steps::attachments::{apply_read_acl, migrate_materials};
use crate::steps::{MigrationStep, StepEnv};
use crate::storage::{file_checksum, guess_content_type, ArchiveStore};
use crate::store::objects::{LegacyCategory, LegacyResource};

pub struct CategoriesStep;

impl MigrationStep for CategoriesStep {
    fn name(&self) -> &'static str {
        "categories"
    }

    fn run(&self, env: &mut StepEnv<'_>) -> Result<(), MigrationError> {
        let config = env.config;
        let db = env.db;
        let snapshot = env.snapshot;
        let base = env.reporter;
        let ctx = &mut *env.ctx;
        let reporter = base.for_step("categories");

        // rebuilt from scratch so a rolled-back failure can be repeated
        ctx.category_map.clear();
        ctx.category_id_counter = snapshot.counters.category;

        base.step("Categories");
        let store = ArchiveStore::new(config);
        db.transaction(|conn| {
            let walker = CategoryWalker {
                conn,
                config,
                store: &store,
                domain_map: load_domain_map(conn)?,
                server_timezone: snapshot.server_timezone().to_string(),
                reporter: &reporter,
            };
            walker.walk(ctx, &snapshot.root_category, None, 1)?;
            Ok(())
        })?;
        db.fix_sequences(&["categories"])?;
        Ok(())
    }
}

/// IP network groups created by the global-pre step, by lowercased name.
fn load_domain_map(conn: &Connection) -> Result<HashMap<String, i64>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT name, id FROM ip_network_groups")?;
    let map = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?.to_lowercase(), row.get::<_, i64>(1)?))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(map)
}

struct CategoryWalker<'a> {
    conn: &'a Connection,
    config: &'a MigrationConfig,
    store: &'a ArchiveStore,
    domain_map: HashMap<String, i64>,
    server_timezone: String,
    reporter: &'a Reporter,
}

impl CategoryWalker<'_> {
    fn walk(
        &self,
        ctx: &mut MigrationContext,
        old_cat: &LegacyCategory,
        parent_id: Option<i64>,
        position: i64,
    ) -> Result<i64, DatabaseError> {
        let cat_id = self.migrate_one(ctx, old_cat, parent_id, position)?;

        let mut children: Vec<&LegacyCategory> = old_cat.subcategories.iter().collect();
        children.sort_by_key(|c| c.order);
        for (i, child) in children.iter().enumerate() {
            self.walk(ctx, child, Some(cat_id), (i + 1) as i64)?;
        }
        Ok(cat_id)
    }

    fn migrate_one(
        &self,
        ctx: &mut MigrationContext,
        old_cat: &LegacyCategory,
        parent_id: Option<i64>,
        position: i64,
    ) -> Result<i64, DatabaseError> {
        let is_root = parent_id.is_none();

        // unlimited visibility was stored as 999, with some historic values
        // in the 990s; nobody has 900 levels of nesting
        let visibility = if old_cat.visibility > 900 {
            None
        } else if old_cat.visibility == 0 {
            self.reporter.warning(&format!(
                "Raising visibility from 'invisible' to 'category-only' [{}]",
                old_cat.id
            ));
            Some(1)
        } else {
            Some(old_cat.visibility)
        };

        let title = {
            let fixed = sanitize_user_input(&old_cat.name);
            if fixed != old_cat.name.trim() {
                self.reporter
                    .warning(&format!("Sanitized category title [{}]", old_cat.id));
                self.reporter
                    .warning(&format!("{} => {}", old_cat.name, fixed));
            }
            fixed
        };

        // legacy (non-numeric) ids get a fresh one plus a mapping row (for
        // URL redirection), written once the category row exists
        let (cat_id, is_legacy) = match old_cat.id.parse::<i64>() {
            Ok(id) => (id, false),
            Err(_) => (ctx.gen_category_id(), true),
        };

        let timezone = old_cat
            .timezone
            .clone()
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| self.server_timezone.clone());

        // protection: root with "inheriting" makes no sense, treat as public
        let mut protection_mode = match old_cat.access.protection {
            -1 => ProtectionMode::Public,
            0 if is_root => ProtectionMode::Public,
            0 => ProtectionMode::Inheriting,
            1 => ProtectionMode::Protected,
            other => {
                self.reporter.error(&format!(
                    "Unexpected protection {} [{}], assuming protected",
                    other, old_cat.id
                ));
                ProtectionMode::Protected
            }
        };
        // domain protection only applies to public categories; they become
        // protected with network read access
        let apply_domains =
            protection_mode == ProtectionMode::Public && !old_cat.access.required_domains.is_empty();
        if apply_domains {
            protection_mode = ProtectionMode::Protected;
        }

        let category = NewCategory {
            id: cat_id,
            parent_id,
            position,
            title,
            description: clean_text(&old_cat.description),
            timezone,
            visibility,
            event_creation_restricted: old_cat.event_creation_restricted,
            protection_mode,
            no_access_contact: clean_text(&old_cat.access.contact_info),
            notify_emails: split_email_list(&old_cat.notify_creation_emails),
            suggestions_disabled: old_cat.suggestions_disabled,
            icon: self.process_icon(old_cat),
        };
        queries::insert_category(self.conn, &category)?;
        if is_legacy {
            queries::insert_legacy_category(self.conn, &old_cat.id, cat_id)?;
            self.reporter
                .success(&format!("{:6} -> {}", old_cat.id, cat_id));
        }
        self.reporter
            .success(&format!("{} [{}]", category.title, cat_id));

        if apply_domains {
            for domain in &old_cat.access.required_domains {
                match self.domain_map.get(&clean_text(domain).to_lowercase()) {
                    Some(&network_id) => {
                        queries::insert_network_acl_entry(self.conn, "category", cat_id, network_id)?;
                    }
                    None => {
                        self.reporter
                            .warning(&format!("Unknown domain: {} [{}]", domain, old_cat.id));
                    }
                }
            }
        }

        let resolver = PrincipalResolver::new(ctx, &self.config.default_group_provider);
        if protection_mode == ProtectionMode::Protected {
            apply_read_acl(
                self.conn,
                "category",
                cat_id,
                &old_cat.access,
                &resolver,
                self.reporter,
            )?;
        }
        for principal in resolver.resolve_all(&old_cat.access.managers, self.reporter) {
            queries::insert_acl_entry(self.conn, "category", cat_id, &principal, false, true, &[])?;
        }
        for principal in resolver.resolve_all(&old_cat.creators, self.reporter) {
            queries::insert_acl_entry(
                self.conn,
                "category",
                cat_id,
                &principal,
                false,
                false,
                &["create".into()],
            )?;
        }

        migrate_materials(
            self.conn,
            ctx,
            self.config,
            self.store,
            &old_cat.materials,
            FolderLink::Category(cat_id),
            Utc::now(),
            self.reporter,
        )?;

        // favorites recorded by the user step
        if let Some(user_ids) = ctx.pending_favorite_categories.get(&old_cat.id) {
            for &user_id in user_ids {
                queries::insert_favorite_category(self.conn, user_id, cat_id)?;
            }
        }

        ctx.category_map.insert(old_cat.id.clone(), cat_id);
        Ok(cat_id)
    }

    /// Load the category icon from the archive, keeping the raw bytes plus
    /// size/hash metadata.
    fn process_icon(&self, old_cat: &LegacyCategory) -> Option<CategoryIcon> {
        let resource = old_cat.icon.as_ref()?;
        let LegacyResource::File { name, repo_path, .. } = resource else {
            return None;
        };
        let archive_dir = self.config.archive_dirs.first()?;
        let path = archive_dir.join(repo_path);
        if !path.is_file() {
            self.reporter.error(&format!(
                "Icon not found on disk; skipping it [{}]",
                old_cat.id
            ));
            return None;
        }
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                self.reporter
                    .warning(&format!("Cannot open {}: {} [{}]", path.display(), e, old_cat.id));
                return None;
            }
        };
        let checksum = match file_checksum(&path) {
            Ok(checksum) => checksum,
            Err(_) => return None,
        };
        let filename = secure_filename(name, "icon");
        Some(CategoryIcon {
            content_type: guess_content_type(&filename).to_string(),
            data,
            filename,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::steps::testutil::{run_step, test_config_simple};
    use crate::store::objects::{LegacyAccess, MainSnapshot};

    fn category(id: &str, name: &str, order: i64) -> LegacyCategory {
        LegacyCategory {
            id: id.into(),
            name: name.into(),
            order,
            ..Default::default()
        }
    }

    fn run(snapshot: &MainSnapshot, ctx: &mut MigrationContext) -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.conn()
            .execute(
                "INSERT INTO users (id, first_name, last_name, email, is_system)
                 VALUES (0, 'System', 'User', '', 1)",
                [],
            )
            .unwrap();
        ctx.system_user_id = Some(0);
        let config = test_config_simple();
        run_step(&CategoriesStep, &config, &db, snapshot, None, ctx).unwrap();
        db
    }

    #[test]
    fn test_tree_walk_positions_and_maps() {
        let mut root = category("0", "Home", 0);
        let mut physics = category("2", "Physics", 2);
        physics.subcategories.push(category("5", "Detectors", 1));
        root.subcategories.push(physics);
        root.subcategories.push(category("3", "Chemistry", 1));

        let snapshot = MainSnapshot {
            root_category: root,
            ..Default::default()
        };
        let mut ctx = MigrationContext::default();
        let db = run(&snapshot, &mut ctx);

        let conn = db.conn();
        assert_eq!(queries::count_rows(&conn, "categories").unwrap(), 4);
        // chemistry sorts before physics (order 1 < 2)
        let pos: i64 = conn
            .query_row("SELECT position FROM categories WHERE id = 3", [], |r| r.get(0))
            .unwrap();
        assert_eq!(pos, 1);
        let parent: i64 = conn
            .query_row("SELECT parent_id FROM categories WHERE id = 5", [], |r| r.get(0))
            .unwrap();
        assert_eq!(parent, 2);
        assert_eq!(ctx.category_map.get("5"), Some(&5));
    }

    #[test]
    fn test_legacy_id_allocation() {
        let mut root = category("0", "Home", 0);
        root.subcategories.push(category("99col", "Colloquia", 1));
        let snapshot = MainSnapshot {
            root_category: root,
            counters: crate::store::objects::Counters {
                category: 100,
                event: 0,
            },
            ..Default::default()
        };
        let mut ctx = MigrationContext::default();
        let db = run(&snapshot, &mut ctx);

        let conn = db.conn();
        let mapped: i64 = conn
            .query_row(
                "SELECT category_id FROM legacy_category_map WHERE legacy_id = '99col'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(mapped, 101);
        assert_eq!(ctx.category_map.get("99col"), Some(&101));
        assert_eq!(ctx.category_id_counter, 101);
    }

    #[test]
    fn test_title_sanitation_and_visibility() {
        let mut root = category("0", "Home", 0);
        let mut hidden = category("7", "<b>Secret &amp;  hidden</b>", 1);
        hidden.visibility = 0;
        root.subcategories.push(hidden);
        let snapshot = MainSnapshot {
            root_category: root,
            ..Default::default()
        };
        let mut ctx = MigrationContext::default();
        let db = run(&snapshot, &mut ctx);

        let conn = db.conn();
        let (title, visibility): (String, i64) = conn
            .query_row(
                "SELECT title, visibility FROM categories WHERE id = 7",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(title, "Secret & hidden");
        assert_eq!(visibility, 1);
    }

    #[test]
    fn test_root_is_public_and_protected_gets_acl() {
        let mut root = category("0", "Home", 0);
        let mut locked = category("4", "Internal", 1);
        locked.access = LegacyAccess {
            protection: 1,
            allowed: vec![crate::store::objects::LegacyPrincipal::MultipassGroup {
                name: "it-dep".into(),
            }],
            ..Default::default()
        };
        root.subcategories.push(locked);
        let snapshot = MainSnapshot {
            root_category: root,
            ..Default::default()
        };
        let mut ctx = MigrationContext::default();
        let db = run(&snapshot, &mut ctx);

        let conn = db.conn();
        let root_mode: String = conn
            .query_row("SELECT protection_mode FROM categories WHERE id = 0", [], |r| r.get(0))
            .unwrap();
        assert_eq!(root_mode, "public");
        let locked_mode: String = conn
            .query_row("SELECT protection_mode FROM categories WHERE id = 4", [], |r| r.get(0))
            .unwrap();
        assert_eq!(locked_mode, "protected");
        assert_eq!(queries::count_rows(&conn, "acl_entries").unwrap(), 1);
    }

    #[test]
    fn test_pending_favorites_linked() {
        let mut ctx = MigrationContext::default();
        ctx.pending_favorite_categories
            .insert("0".into(), vec![0]);
        let snapshot = MainSnapshot {
            root_category: category("0", "Home", 0),
            ..Default::default()
        };
        let db = run(&snapshot, &mut ctx);
        assert_eq!(
            queries::count_rows(&db.conn(), "user_favorite_categories").unwrap(),
            1
        );
    }
}
