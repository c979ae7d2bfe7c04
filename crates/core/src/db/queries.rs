//! Typed insert/query helpers for every table the migration writes.
//!
//! Helpers take a `&Connection` so they can run inside
//! [`Database::transaction`](super::Database::transaction) closures; the
//! steps batch their writes per logical unit.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::errors::DatabaseError;
use crate::models::{
    AttachmentKind, BlockedRoomState, CategoryIcon, FolderLink, NewApiKey, NewCategory, NewEvent,
    NewReservation, NewRoom, NewUser, Principal, ProtectionMode, StoredFile,
};

/// Serialize a list of strings as a JSON array column value.
fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Insert (or replace) a module setting. `value` is stored as JSON.
pub fn set_setting(
    conn: &Connection,
    module: &str,
    name: &str,
    value: &serde_json::Value,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO settings (module, name, value) VALUES (?1, ?2, ?3)",
        params![module, name, value.to_string()],
    )?;
    Ok(())
}

/// Read back a setting value.
pub fn get_setting(
    conn: &Connection,
    module: &str,
    name: &str,
) -> Result<Option<serde_json::Value>, DatabaseError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE module = ?1 AND name = ?2",
            params![module, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Insert a new user row with a preserved legacy id.
pub fn insert_user(conn: &Connection, user: &NewUser) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (id, first_name, last_name, title, email, phone, affiliation,
                            address, is_admin, is_system, is_blocked, is_deleted, merged_into_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            user.id,
            user.first_name,
            user.last_name,
            user.title,
            user.email,
            user.phone,
            user.affiliation,
            user.address,
            user.is_admin,
            user.is_system,
            user.is_blocked,
            user.is_deleted,
            user.merged_into_id,
        ],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO user_emails (user_id, email, is_primary) VALUES (?1, ?2, 1)",
        params![user.id, user.email],
    )?;
    debug!(id = user.id, email = %user.email, "inserted user");
    Ok(())
}

/// Insert a user row letting SQLite allocate the id (system user creation).
pub fn insert_user_auto_id(conn: &Connection, user: &NewUser) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO users (first_name, last_name, title, email, is_system)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user.first_name, user.last_name, user.title, user.email, user.is_system],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn user_exists(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1 AND is_deleted = 0",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn mark_user_deleted(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("UPDATE users SET is_deleted = 1 WHERE id = ?1", params![id])?;
    Ok(())
}

/// Flag a user as admin. Deleted users are left alone.
pub fn set_user_admin(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET is_admin = 1 WHERE id = ?1 AND is_deleted = 0",
        params![id],
    )?;
    Ok(())
}

pub fn set_user_system(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("UPDATE users SET is_system = 1 WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn insert_secondary_email(
    conn: &Connection,
    user_id: i64,
    email: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO user_emails (user_id, email, is_primary) VALUES (?1, ?2, 0)",
        params![user_id, email],
    )?;
    Ok(())
}

pub fn remove_secondary_email(
    conn: &Connection,
    user_id: i64,
    email: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM user_emails WHERE user_id = ?1 AND email = ?2 AND is_primary = 0",
        params![user_id, email],
    )?;
    Ok(())
}

pub fn set_user_setting(
    conn: &Connection,
    user_id: i64,
    name: &str,
    value: &serde_json::Value,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO user_settings (user_id, name, value) VALUES (?1, ?2, ?3)",
        params![user_id, name, value.to_string()],
    )?;
    Ok(())
}

pub fn insert_favorite_user(
    conn: &Connection,
    user_id: i64,
    target_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO user_favorite_users (user_id, target_id) VALUES (?1, ?2)",
        params![user_id, target_id],
    )?;
    Ok(())
}

pub fn insert_favorite_category(
    conn: &Connection,
    user_id: i64,
    category_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO user_favorite_categories (user_id, category_id) VALUES (?1, ?2)",
        params![user_id, category_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Identities & API keys
// ---------------------------------------------------------------------------

pub fn insert_identity(
    conn: &Connection,
    user_id: i64,
    provider: &str,
    identifier: &str,
    password_hash: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO identities (user_id, provider, identifier, password_hash)
         VALUES (?1, ?2, ?3, ?4)",
        params![user_id, provider, identifier, password_hash],
    )?;
    Ok(())
}

/// Deleted users must not keep identities: a login through a remote provider
/// should create a fresh account instead of failing.
pub fn delete_identities_of_deleted_users(conn: &Connection) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM identities WHERE user_id IN (SELECT id FROM users WHERE is_deleted = 1)",
        [],
    )?;
    Ok(deleted)
}

pub fn insert_api_key(conn: &Connection, key: &NewApiKey) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO api_keys (user_id, token, secret, is_active, is_blocked,
                               is_persistent_allowed, created_at, last_used_at, last_used_ip,
                               last_used_uri, last_used_auth, use_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            key.user_id,
            key.token,
            key.secret,
            key.is_active,
            key.is_blocked,
            key.is_persistent_allowed,
            opt_ts(&key.created_at),
            opt_ts(&key.last_used_at),
            key.last_used_ip,
            key.last_used_uri,
            key.last_used_auth,
            key.use_count,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

pub fn insert_group(conn: &Connection, id: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO groups (id, name) VALUES (?1, ?2)",
        params![id, name],
    )?;
    Ok(())
}

pub fn insert_group_member(
    conn: &Connection,
    group_id: i64,
    user_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
        params![group_id, user_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub fn insert_category(conn: &Connection, cat: &NewCategory) -> Result<(), DatabaseError> {
    let (icon, icon_metadata) = match &cat.icon {
        Some(CategoryIcon {
            data,
            filename,
            content_type,
            checksum,
        }) => {
            let meta = serde_json::json!({
                "size": data.len(),
                "hash": checksum,
                "filename": filename,
                "content_type": content_type,
            });
            (Some(data.clone()), Some(meta.to_string()))
        }
        None => (None, None),
    };
    conn.execute(
        "INSERT INTO categories (id, parent_id, position, title, description, timezone,
                                 visibility, event_creation_restricted, protection_mode,
                                 no_access_contact, notify_emails, suggestions_disabled,
                                 icon, icon_metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            cat.id,
            cat.parent_id,
            cat.position,
            cat.title,
            cat.description,
            cat.timezone,
            cat.visibility,
            cat.event_creation_restricted,
            cat.protection_mode.as_str(),
            cat.no_access_contact,
            json_list(&cat.notify_emails),
            cat.suggestions_disabled,
            icon,
            icon_metadata,
        ],
    )?;
    debug!(id = cat.id, title = %cat.title, "inserted category");
    Ok(())
}

pub fn insert_legacy_category(
    conn: &Connection,
    legacy_id: &str,
    category_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO legacy_category_map (legacy_id, category_id) VALUES (?1, ?2)",
        params![legacy_id, category_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub fn insert_event(conn: &Connection, event: &NewEvent) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO events (id, category_id, title, description, timezone, start_at, end_at,
                             kind, is_locked, is_deleted, creator_id, protection_mode,
                             contact_title, contact_emails, contact_phones, organizer_info,
                             additional_info)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            event.id,
            event.category_id,
            event.title,
            event.description,
            event.timezone,
            ts(&event.start_at),
            ts(&event.end_at),
            event.kind.as_str(),
            event.is_locked,
            event.is_deleted,
            event.creator_id,
            event.protection_mode.as_str(),
            event.contact_title,
            json_list(&event.contact_emails),
            json_list(&event.contact_phones),
            event.organizer_info,
            event.additional_info,
        ],
    )?;
    debug!(id = event.id, title = %event.title, "inserted event");
    Ok(())
}

pub fn insert_legacy_event(
    conn: &Connection,
    legacy_id: &str,
    event_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO legacy_event_map (legacy_id, event_id) VALUES (?1, ?2)",
        params![legacy_id, event_id],
    )?;
    Ok(())
}

pub fn insert_event_note(
    conn: &Connection,
    event_id: i64,
    author_id: i64,
    content: &str,
    created_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO event_notes (event_id, author_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![event_id, author_id, content, ts(created_at)],
    )?;
    Ok(())
}

pub fn insert_reference_type(conn: &Connection, name: &str) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO reference_types (name) VALUES (?1)",
        params![name],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_event_reference(
    conn: &Connection,
    event_id: i64,
    reference_type_id: i64,
    value: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO event_references (event_id, reference_type_id, value) VALUES (?1, ?2, ?3)",
        params![event_id, reference_type_id, value],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

pub fn insert_attachment_folder(
    conn: &Connection,
    title: &str,
    description: &str,
    protection_mode: ProtectionMode,
    is_always_visible: bool,
    link: FolderLink,
) -> Result<i64, DatabaseError> {
    let (category_id, event_id) = match link {
        FolderLink::Category(id) => (Some(id), None),
        FolderLink::Event(id) => (None, Some(id)),
    };
    conn.execute(
        "INSERT INTO attachment_folders (title, description, protection_mode,
                                         is_always_visible, category_id, event_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            title,
            description,
            protection_mode.as_str(),
            is_always_visible,
            category_id,
            event_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub fn insert_attachment(
    conn: &Connection,
    folder_id: i64,
    kind: AttachmentKind,
    title: &str,
    description: &str,
    user_id: i64,
    modified_at: &DateTime<Utc>,
    link_url: Option<&str>,
    protection_mode: ProtectionMode,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO attachments (folder_id, kind, title, description, user_id, modified_at,
                                  link_url, protection_mode)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            folder_id,
            kind.as_str(),
            title,
            description,
            user_id,
            ts(modified_at),
            link_url,
            protection_mode.as_str(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_attachment_file(
    conn: &Connection,
    attachment_id: i64,
    filename: &str,
    content_type: &str,
    stored: &StoredFile,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO attachment_files (attachment_id, filename, content_type, size,
                                       storage_backend, storage_file_id, checksum)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            attachment_id,
            filename,
            content_type,
            stored.size,
            stored.backend,
            stored.file_id,
            stored.checksum,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ACLs
// ---------------------------------------------------------------------------

/// Insert an ACL entry granting access to a principal on a target object.
pub fn insert_acl_entry(
    conn: &Connection,
    target_type: &str,
    target_id: i64,
    principal: &Principal,
    read_access: bool,
    full_access: bool,
    roles: &[String],
) -> Result<(), DatabaseError> {
    let (ptype, user_id, group_id, provider, group_name) = match principal {
        Principal::User(id) => ("user", Some(*id), None, None, None),
        Principal::LocalGroup(id) => ("local_group", None, Some(*id), None, None),
        Principal::MultipassGroup { provider, name } => (
            "multipass_group",
            None,
            None,
            Some(provider.clone()),
            Some(name.clone()),
        ),
    };
    conn.execute(
        "INSERT INTO acl_entries (target_type, target_id, principal_type, user_id,
                                  local_group_id, provider, group_name, read_access,
                                  full_access, roles)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            target_type,
            target_id,
            ptype,
            user_id,
            group_id,
            provider,
            group_name,
            read_access,
            full_access,
            json_list(roles),
        ],
    )?;
    Ok(())
}

/// Grant read access to an IP network group on a target object.
pub fn insert_network_acl_entry(
    conn: &Connection,
    target_type: &str,
    target_id: i64,
    network_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO acl_entries (target_type, target_id, principal_type, network_id, read_access)
         VALUES (?1, ?2, 'network', ?3, 1)",
        params![target_type, target_id, network_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Networks & news
// ---------------------------------------------------------------------------

pub fn insert_ip_network_group(
    conn: &Connection,
    name: &str,
    description: &str,
    hidden: bool,
    attachment_access_override: bool,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO ip_network_groups (name, description, hidden, attachment_access_override)
         VALUES (?1, ?2, ?3, ?4)",
        params![name, description, hidden, attachment_access_override],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_ip_network(
    conn: &Connection,
    group_id: i64,
    network: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO ip_networks (group_id, network) VALUES (?1, ?2)",
        params![group_id, network],
    )?;
    Ok(())
}

pub fn insert_news_item(
    conn: &Connection,
    title: &str,
    content: &str,
    created_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO news (title, content, created_at) VALUES (?1, ?2, ?3)",
        params![title, content, ts(created_at)],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Rooms & locations
// ---------------------------------------------------------------------------

pub fn insert_location(
    conn: &Connection,
    name: &str,
    is_default: bool,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO locations (name, is_default) VALUES (?1, ?2)",
        params![name, is_default],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_aspect(
    conn: &Connection,
    location_id: i64,
    name: &str,
    center_latitude: f64,
    center_longitude: f64,
    zoom_level: i64,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO aspects (location_id, name, center_latitude, center_longitude, zoom_level)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![location_id, name, center_latitude, center_longitude, zoom_level],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_location_default_aspect(
    conn: &Connection,
    location_id: i64,
    aspect_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE locations SET default_aspect_id = ?1 WHERE id = ?2",
        params![aspect_id, location_id],
    )?;
    Ok(())
}

pub fn insert_room_attribute(
    conn: &Connection,
    location_id: i64,
    name: &str,
    title: &str,
    is_required: bool,
    is_hidden: bool,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO room_attributes (location_id, name, title, is_required, is_hidden)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![location_id, name, title, is_required, is_hidden],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_equipment_type(
    conn: &Connection,
    location_id: i64,
    name: &str,
    parent_id: Option<i64>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO equipment_types (location_id, name, parent_id) VALUES (?1, ?2, ?3)",
        params![location_id, name, parent_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_room(conn: &Connection, room: &NewRoom) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO rooms (id, location_id, name, site, division, building, floor, number,
                            capacity, surface_area, latitude, longitude, telephone, key_location,
                            comments, owner_id, is_active, is_reservable,
                            reservations_need_confirmation, notification_before_days,
                            notification_for_responsible, notification_for_assistance,
                            max_advance_days, large_photo, small_photo)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        params![
            room.id,
            room.location_id,
            room.name,
            room.site,
            room.division,
            room.building,
            room.floor,
            room.number,
            room.capacity,
            room.surface_area,
            room.latitude,
            room.longitude,
            room.telephone,
            room.key_location,
            room.comments,
            room.owner_id,
            room.is_active,
            room.is_reservable,
            room.reservations_need_confirmation,
            room.notification_before_days,
            room.notification_for_responsible,
            room.notification_for_assistance,
            room.max_advance_days,
            room.large_photo,
            room.small_photo,
        ],
    )?;
    debug!(id = room.id, name = %room.name, "inserted room");
    Ok(())
}

pub fn insert_bookable_hours(
    conn: &Connection,
    room_id: i64,
    start_time: &str,
    end_time: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO room_bookable_hours (room_id, start_time, end_time) VALUES (?1, ?2, ?3)",
        params![room_id, start_time, end_time],
    )?;
    Ok(())
}

pub fn insert_nonbookable_period(
    conn: &Connection,
    room_id: i64,
    start_at: &DateTime<Utc>,
    end_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO room_nonbookable_periods (room_id, start_at, end_at) VALUES (?1, ?2, ?3)",
        params![room_id, ts(start_at), ts(end_at)],
    )?;
    Ok(())
}

pub fn insert_room_attribute_value(
    conn: &Connection,
    room_id: i64,
    attribute_id: i64,
    value: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO room_attribute_values (room_id, attribute_id, value)
         VALUES (?1, ?2, ?3)",
        params![room_id, attribute_id, value],
    )?;
    Ok(())
}

pub fn insert_room_equipment(
    conn: &Connection,
    room_id: i64,
    equipment_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO room_equipment (room_id, equipment_id) VALUES (?1, ?2)",
        params![room_id, equipment_id],
    )?;
    Ok(())
}

/// Location id of a migrated room.
pub fn get_room_location(conn: &Connection, room_id: i64) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT location_id FROM rooms WHERE id = ?1",
            params![room_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn room_exists(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM rooms WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Look up an equipment type id by location and name.
pub fn get_equipment_by_name(
    conn: &Connection,
    location_id: i64,
    name: &str,
) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM equipment_types WHERE location_id = ?1 AND name = ?2",
            params![location_id, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Look up a room attribute id by location and name.
pub fn get_room_attribute_by_name(
    conn: &Connection,
    location_id: i64,
    name: &str,
) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM room_attributes WHERE location_id = ?1 AND name = ?2",
            params![location_id, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Blockings & reservations
// ---------------------------------------------------------------------------

pub fn insert_blocking(
    conn: &Connection,
    id: i64,
    created_by_id: i64,
    created_at: &DateTime<Utc>,
    start_date: &str,
    end_date: &str,
    reason: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO blockings (id, created_by_id, created_at, start_date, end_date, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, created_by_id, ts(created_at), start_date, end_date, reason],
    )?;
    Ok(())
}

pub fn insert_blocked_room(
    conn: &Connection,
    blocking_id: i64,
    room_id: i64,
    state: BlockedRoomState,
    rejected_by: Option<&str>,
    rejection_reason: Option<&str>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO blocked_rooms (blocking_id, room_id, state, rejected_by,
                                               rejection_reason)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![blocking_id, room_id, state.as_str(), rejected_by, rejection_reason],
    )?;
    Ok(())
}

pub fn insert_blocking_allowed(
    conn: &Connection,
    blocking_id: i64,
    principal: &Principal,
) -> Result<(), DatabaseError> {
    let (ptype, user_id, group_id, provider, group_name) = match principal {
        Principal::User(id) => ("user", Some(*id), None, None, None),
        Principal::LocalGroup(id) => ("local_group", None, Some(*id), None, None),
        Principal::MultipassGroup { provider, name } => (
            "multipass_group",
            None,
            None,
            Some(provider.clone()),
            Some(name.clone()),
        ),
    };
    conn.execute(
        "INSERT INTO blocking_allowed (blocking_id, principal_type, user_id, local_group_id,
                                       provider, group_name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![blocking_id, ptype, user_id, group_id, provider, group_name],
    )?;
    Ok(())
}

pub fn insert_reservation(conn: &Connection, r: &NewReservation) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO reservations (id, room_id, event_id, created_at, start_at, end_at,
                                   booked_for_id, booked_for_name, created_by_id, is_accepted,
                                   is_cancelled, is_rejected, booking_reason, rejection_reason,
                                   repeat_frequency, repeat_interval, uses_vc,
                                   needs_vc_assistance, needs_assistance)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19)",
        params![
            r.id,
            r.room_id,
            r.event_id,
            ts(&r.created_at),
            ts(&r.start_at),
            ts(&r.end_at),
            r.booked_for_id,
            r.booked_for_name,
            r.created_by_id,
            r.is_accepted,
            r.is_cancelled,
            r.is_rejected,
            r.booking_reason,
            r.rejection_reason,
            r.repeat_frequency.as_str(),
            r.repeat_interval,
            r.uses_vc,
            r.needs_vc_assistance,
            r.needs_assistance,
        ],
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn insert_reservation_occurrence(
    conn: &Connection,
    reservation_id: i64,
    start_at: &DateTime<Utc>,
    end_at: &DateTime<Utc>,
    is_cancelled: bool,
    is_rejected: bool,
    rejection_reason: Option<&str>,
    notification_sent: bool,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR REPLACE INTO reservation_occurrences
             (reservation_id, start_at, end_at, is_cancelled, is_rejected, rejection_reason,
              notification_sent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            reservation_id,
            ts(start_at),
            ts(end_at),
            is_cancelled,
            is_rejected,
            rejection_reason,
            notification_sent,
        ],
    )?;
    Ok(())
}

pub fn insert_reservation_edit_log(
    conn: &Connection,
    reservation_id: i64,
    timestamp: &DateTime<Utc>,
    user_name: &str,
    info: &[String],
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO reservation_edit_logs (reservation_id, timestamp, user_name, info)
         VALUES (?1, ?2, ?3, ?4)",
        params![reservation_id, ts(timestamp), user_name, json_list(info)],
    )?;
    Ok(())
}

pub fn insert_reservation_equipment(
    conn: &Connection,
    reservation_id: i64,
    equipment_id: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO reservation_equipment (reservation_id, equipment_id)
         VALUES (?1, ?2)",
        params![reservation_id, equipment_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Counters (used by tests and the final report)
// ---------------------------------------------------------------------------

/// Count the rows of a table. Only called with fixed table names.
pub fn count_rows(conn: &Connection, table: &str) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", table),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
