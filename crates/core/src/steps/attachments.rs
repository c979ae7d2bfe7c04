//! Shared attachment migration.
//!
//! Legacy "materials" (titled folders of file/link resources) hang off both
//! categories and events; this module turns them into attachment folders,
//! attachments, and stored-file rows. Files are resolved through the
//! [`ArchiveStore`]; files that cannot be found on disk abort the affected
//! attachment, not the run.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::convert::{clean_text, parse_datetime, secure_filename};
use crate::db::queries;
use crate::errors::DatabaseError;
use crate::identity::{protection_from_access, PrincipalResolver};
use crate::models::{AttachmentKind, FolderLink, ProtectionMode};
use crate::report::Reporter;
use crate::storage::{guess_content_type, ArchiveStore};
use crate::store::objects::{LegacyAccess, LegacyMaterial, LegacyResource};

/// Write the read-ACL of a protected object.
pub fn apply_read_acl(
    conn: &Connection,
    target_type: &str,
    target_id: i64,
    access: &LegacyAccess,
    resolver: &PrincipalResolver<'_>,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    for principal in resolver.resolve_all(&access.allowed, reporter) {
        queries::insert_acl_entry(conn, target_type, target_id, &principal, true, false, &[])?;
    }
    Ok(())
}

/// Migrate the materials of one legacy object into attachment rows.
///
/// Returns the number of attachments written.
pub fn migrate_materials(
    conn: &Connection,
    ctx: &MigrationContext,
    config: &MigrationConfig,
    store: &ArchiveStore,
    materials: &[LegacyMaterial],
    link: FolderLink,
    fallback_modified: DateTime<Utc>,
    reporter: &Reporter,
) -> Result<usize, DatabaseError> {
    let resolver = PrincipalResolver::new(ctx, &config.default_group_provider);
    let system_user = ctx.require_system_user();
    let mut count = 0;

    for material in materials {
        let title = {
            let t = clean_text(&material.title);
            if t.is_empty() {
                "Material".to_string()
            } else {
                t
            }
        };
        // folders don't allow public; it converts to inheriting
        let folder_mode = protection_from_access(&material.access, false);
        let folder_id = queries::insert_attachment_folder(
            conn,
            &title,
            &clean_text(&material.description),
            folder_mode,
            !material.access.hide_from_unauthorized,
            link,
        )?;
        if folder_mode == ProtectionMode::Protected {
            apply_read_acl(conn, "folder", folder_id, &material.access, &resolver, reporter)?;
        }
        reporter.success(&format!("[{}]", title));

        let modified_at = material
            .modified_at
            .as_deref()
            .and_then(parse_datetime)
            .map(|p| p.dt)
            .unwrap_or(fallback_modified);

        for resource in &material.resources {
            match resource {
                LegacyResource::Link {
                    name,
                    description,
                    url,
                    access,
                } => {
                    let title = non_empty_or(clean_text(name), &title);
                    let url = clean_text(url);
                    if url.is_empty() {
                        reporter.error(&format!("[{}] Skipping link, missing URL", title));
                        continue;
                    }
                    let mode = protection_from_access(access, false);
                    let attachment_id = queries::insert_attachment(
                        conn,
                        folder_id,
                        AttachmentKind::Link,
                        &title,
                        &clean_text(description),
                        system_user,
                        &modified_at,
                        Some(&url),
                        mode,
                    )?;
                    if mode == ProtectionMode::Protected {
                        apply_read_acl(conn, "attachment", attachment_id, access, &resolver, reporter)?;
                    }
                    reporter.success(&format!("- {}", title));
                    count += 1;
                }
                LegacyResource::File {
                    name,
                    description,
                    repo_path,
                    access,
                } => {
                    let stored = match store.locate(repo_path) {
                        Ok(Some(stored)) => stored,
                        Ok(None) => {
                            reporter.error(&format!("File {} not found on disk", repo_path));
                            continue;
                        }
                        Err(e) => {
                            reporter.error(&format!("File {}: {}", repo_path, e));
                            continue;
                        }
                    };
                    let title = non_empty_or(clean_text(name), &title);
                    let filename = secure_filename(name, "attachment");
                    let mode = protection_from_access(access, false);
                    let attachment_id = queries::insert_attachment(
                        conn,
                        folder_id,
                        AttachmentKind::File,
                        &title,
                        &clean_text(description),
                        system_user,
                        &modified_at,
                        None,
                        mode,
                    )?;
                    queries::insert_attachment_file(
                        conn,
                        attachment_id,
                        &filename,
                        guess_content_type(&filename),
                        &stored,
                    )?;
                    if mode == ProtectionMode::Protected {
                        apply_read_acl(conn, "attachment", attachment_id, access, &resolver, reporter)?;
                    }
                    reporter.success(&format!("- {}", title));
                    count += 1;
                }
            }
        }
    }
    Ok(count)
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
