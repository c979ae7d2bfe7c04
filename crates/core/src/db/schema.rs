//! Target schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The current schema
//! version is tracked in the SQLite `user_version` pragma.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "core schema",
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            module      TEXT NOT NULL,
            name        TEXT NOT NULL,
            value       TEXT NOT NULL,
            PRIMARY KEY (module, name)
        );

        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name      TEXT    NOT NULL,
            last_name       TEXT    NOT NULL,
            title           TEXT    NOT NULL DEFAULT '',
            email           TEXT    NOT NULL,
            phone           TEXT    NOT NULL DEFAULT '',
            affiliation     TEXT    NOT NULL DEFAULT '',
            address         TEXT    NOT NULL DEFAULT '',
            is_admin        INTEGER NOT NULL DEFAULT 0,
            is_system       INTEGER NOT NULL DEFAULT 0,
            is_blocked      INTEGER NOT NULL DEFAULT 0,
            is_deleted      INTEGER NOT NULL DEFAULT 0,
            merged_into_id  INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_users_email ON users (email);

        CREATE TABLE IF NOT EXISTS user_emails (
            user_id     INTEGER NOT NULL REFERENCES users (id),
            email       TEXT    NOT NULL,
            is_primary  INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, email)
        );

        CREATE INDEX IF NOT EXISTS idx_user_emails_email ON user_emails (email);

        CREATE TABLE IF NOT EXISTS user_settings (
            user_id     INTEGER NOT NULL REFERENCES users (id),
            name        TEXT    NOT NULL,
            value       TEXT    NOT NULL,
            PRIMARY KEY (user_id, name)
        );

        CREATE TABLE IF NOT EXISTS user_favorite_users (
            user_id     INTEGER NOT NULL REFERENCES users (id),
            target_id   INTEGER NOT NULL REFERENCES users (id),
            PRIMARY KEY (user_id, target_id)
        );

        CREATE TABLE IF NOT EXISTS user_favorite_categories (
            user_id     INTEGER NOT NULL REFERENCES users (id),
            category_id INTEGER NOT NULL REFERENCES categories (id),
            PRIMARY KEY (user_id, category_id)
        );

        CREATE TABLE IF NOT EXISTS identities (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       INTEGER NOT NULL REFERENCES users (id),
            provider      TEXT    NOT NULL,
            identifier    TEXT    NOT NULL,
            password_hash TEXT,
            UNIQUE (provider, identifier)
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id               INTEGER NOT NULL REFERENCES users (id),
            token                 TEXT    NOT NULL,
            secret                TEXT    NOT NULL,
            is_active             INTEGER NOT NULL DEFAULT 1,
            is_blocked            INTEGER NOT NULL DEFAULT 0,
            is_persistent_allowed INTEGER NOT NULL DEFAULT 0,
            created_at            TEXT,
            last_used_at          TEXT,
            last_used_ip          TEXT,
            last_used_uri         TEXT,
            last_used_auth        INTEGER NOT NULL DEFAULT 0,
            use_count             INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_api_keys_user ON api_keys (user_id);

        CREATE TABLE IF NOT EXISTS groups (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    INTEGER NOT NULL REFERENCES groups (id),
            user_id     INTEGER NOT NULL REFERENCES users (id),
            PRIMARY KEY (group_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS categories (
            id                        INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id                 INTEGER REFERENCES categories (id),
            position                  INTEGER NOT NULL DEFAULT 1,
            title                     TEXT    NOT NULL,
            description               TEXT    NOT NULL DEFAULT '',
            timezone                  TEXT    NOT NULL DEFAULT 'UTC',
            visibility                INTEGER,
            event_creation_restricted INTEGER NOT NULL DEFAULT 0,
            protection_mode           TEXT    NOT NULL DEFAULT 'inheriting',
            no_access_contact         TEXT    NOT NULL DEFAULT '',
            notify_emails             TEXT    NOT NULL DEFAULT '[]',
            suggestions_disabled      INTEGER NOT NULL DEFAULT 0,
            icon                      BLOB,
            icon_metadata             TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories (parent_id);

        CREATE TABLE IF NOT EXISTS legacy_category_map (
            legacy_id   TEXT PRIMARY KEY,
            category_id INTEGER NOT NULL REFERENCES categories (id)
        );

        CREATE TABLE IF NOT EXISTS events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id     INTEGER NOT NULL REFERENCES categories (id),
            title           TEXT    NOT NULL,
            description     TEXT    NOT NULL DEFAULT '',
            timezone        TEXT    NOT NULL DEFAULT 'UTC',
            start_at        TEXT    NOT NULL,
            end_at          TEXT    NOT NULL,
            kind            TEXT    NOT NULL DEFAULT 'conference'
                            CHECK (kind IN ('conference', 'lecture', 'meeting')),
            is_locked       INTEGER NOT NULL DEFAULT 0,
            is_deleted      INTEGER NOT NULL DEFAULT 0,
            creator_id      INTEGER NOT NULL REFERENCES users (id),
            protection_mode TEXT    NOT NULL DEFAULT 'inheriting',
            contact_title   TEXT    NOT NULL DEFAULT '',
            contact_emails  TEXT    NOT NULL DEFAULT '[]',
            contact_phones  TEXT    NOT NULL DEFAULT '[]',
            organizer_info  TEXT    NOT NULL DEFAULT '',
            additional_info TEXT    NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_events_category ON events (category_id);

        CREATE TABLE IF NOT EXISTS legacy_event_map (
            legacy_id   TEXT PRIMARY KEY,
            event_id    INTEGER NOT NULL REFERENCES events (id)
        );

        CREATE TABLE IF NOT EXISTS event_notes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id    INTEGER NOT NULL REFERENCES events (id),
            author_id   INTEGER NOT NULL REFERENCES users (id),
            content     TEXT    NOT NULL,
            created_at  TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reference_types (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS event_references (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id          INTEGER NOT NULL REFERENCES events (id),
            reference_type_id INTEGER NOT NULL REFERENCES reference_types (id),
            value             TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS attachment_folders (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            title             TEXT    NOT NULL,
            description       TEXT    NOT NULL DEFAULT '',
            protection_mode   TEXT    NOT NULL DEFAULT 'inheriting',
            is_always_visible INTEGER NOT NULL DEFAULT 1,
            category_id       INTEGER REFERENCES categories (id),
            event_id          INTEGER REFERENCES events (id)
        );

        CREATE TABLE IF NOT EXISTS attachments (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            folder_id       INTEGER NOT NULL REFERENCES attachment_folders (id),
            kind            TEXT    NOT NULL CHECK (kind IN ('file', 'link')),
            title           TEXT    NOT NULL,
            description     TEXT    NOT NULL DEFAULT '',
            user_id         INTEGER NOT NULL REFERENCES users (id),
            modified_at     TEXT    NOT NULL,
            link_url        TEXT,
            protection_mode TEXT    NOT NULL DEFAULT 'inheriting'
        );

        CREATE TABLE IF NOT EXISTS attachment_files (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            attachment_id   INTEGER NOT NULL REFERENCES attachments (id),
            filename        TEXT    NOT NULL,
            content_type    TEXT    NOT NULL DEFAULT 'application/octet-stream',
            size            INTEGER NOT NULL DEFAULT 0,
            storage_backend TEXT    NOT NULL,
            storage_file_id TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS acl_entries (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            target_type    TEXT    NOT NULL,
            target_id      INTEGER NOT NULL,
            principal_type TEXT    NOT NULL
                           CHECK (principal_type IN ('user', 'local_group', 'multipass_group', 'network')),
            user_id        INTEGER REFERENCES users (id),
            local_group_id INTEGER REFERENCES groups (id),
            provider       TEXT,
            group_name     TEXT,
            network_id     INTEGER,
            read_access    INTEGER NOT NULL DEFAULT 0,
            full_access    INTEGER NOT NULL DEFAULT 0,
            roles          TEXT    NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_acl_entries_target ON acl_entries (target_type, target_id);

        CREATE TABLE IF NOT EXISTS ip_network_groups (
            id                         INTEGER PRIMARY KEY AUTOINCREMENT,
            name                       TEXT    NOT NULL,
            description                TEXT    NOT NULL DEFAULT '',
            hidden                     INTEGER NOT NULL DEFAULT 0,
            attachment_access_override INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS ip_networks (
            group_id    INTEGER NOT NULL REFERENCES ip_network_groups (id),
            network     TEXT    NOT NULL,
            PRIMARY KEY (group_id, network)
        );

        CREATE TABLE IF NOT EXISTS news (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT    NOT NULL,
            content     TEXT    NOT NULL DEFAULT '',
            created_at  TEXT    NOT NULL
        );
        "#,
    ),
    (
        2,
        "room booking schema",
        r#"
        CREATE TABLE IF NOT EXISTS locations (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            name              TEXT    NOT NULL UNIQUE,
            is_default        INTEGER NOT NULL DEFAULT 0,
            default_aspect_id INTEGER
        );

        CREATE TABLE IF NOT EXISTS aspects (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            location_id      INTEGER NOT NULL REFERENCES locations (id),
            name             TEXT    NOT NULL,
            center_latitude  REAL    NOT NULL DEFAULT 0,
            center_longitude REAL    NOT NULL DEFAULT 0,
            zoom_level       INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS room_attributes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            location_id INTEGER NOT NULL REFERENCES locations (id),
            name        TEXT    NOT NULL,
            title       TEXT    NOT NULL,
            is_required INTEGER NOT NULL DEFAULT 0,
            is_hidden   INTEGER NOT NULL DEFAULT 0,
            UNIQUE (location_id, name)
        );

        CREATE TABLE IF NOT EXISTS equipment_types (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            location_id INTEGER NOT NULL REFERENCES locations (id),
            name        TEXT    NOT NULL,
            parent_id   INTEGER REFERENCES equipment_types (id),
            UNIQUE (location_id, name)
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id                            INTEGER PRIMARY KEY AUTOINCREMENT,
            location_id                   INTEGER NOT NULL REFERENCES locations (id),
            name                          TEXT    NOT NULL,
            site                          TEXT    NOT NULL DEFAULT '',
            division                      TEXT    NOT NULL DEFAULT '',
            building                      TEXT    NOT NULL DEFAULT '',
            floor                         TEXT    NOT NULL DEFAULT '',
            number                        TEXT    NOT NULL DEFAULT '',
            capacity                      INTEGER,
            surface_area                  INTEGER,
            latitude                      REAL,
            longitude                     REAL,
            telephone                     TEXT    NOT NULL DEFAULT '',
            key_location                  TEXT    NOT NULL DEFAULT '',
            comments                      TEXT    NOT NULL DEFAULT '',
            owner_id                      INTEGER NOT NULL REFERENCES users (id),
            is_active                     INTEGER NOT NULL DEFAULT 1,
            is_reservable                 INTEGER NOT NULL DEFAULT 1,
            reservations_need_confirmation INTEGER NOT NULL DEFAULT 0,
            notification_before_days      INTEGER,
            notification_for_responsible  INTEGER NOT NULL DEFAULT 0,
            notification_for_assistance   INTEGER NOT NULL DEFAULT 0,
            max_advance_days              INTEGER,
            large_photo                   BLOB,
            small_photo                   BLOB
        );

        CREATE INDEX IF NOT EXISTS idx_rooms_location ON rooms (location_id);

        CREATE TABLE IF NOT EXISTS room_bookable_hours (
            room_id     INTEGER NOT NULL REFERENCES rooms (id),
            start_time  TEXT    NOT NULL,
            end_time    TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS room_nonbookable_periods (
            room_id     INTEGER NOT NULL REFERENCES rooms (id),
            start_at    TEXT    NOT NULL,
            end_at      TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS room_attribute_values (
            room_id      INTEGER NOT NULL REFERENCES rooms (id),
            attribute_id INTEGER NOT NULL REFERENCES room_attributes (id),
            value        TEXT    NOT NULL,
            PRIMARY KEY (room_id, attribute_id)
        );

        CREATE TABLE IF NOT EXISTS room_equipment (
            room_id      INTEGER NOT NULL REFERENCES rooms (id),
            equipment_id INTEGER NOT NULL REFERENCES equipment_types (id),
            PRIMARY KEY (room_id, equipment_id)
        );

        CREATE TABLE IF NOT EXISTS blockings (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            created_by_id INTEGER NOT NULL REFERENCES users (id),
            created_at    TEXT    NOT NULL,
            start_date    TEXT    NOT NULL,
            end_date      TEXT    NOT NULL,
            reason        TEXT    NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS blocked_rooms (
            blocking_id      INTEGER NOT NULL REFERENCES blockings (id),
            room_id          INTEGER NOT NULL REFERENCES rooms (id),
            state            TEXT    NOT NULL DEFAULT 'pending'
                             CHECK (state IN ('pending', 'accepted', 'rejected')),
            rejected_by      TEXT,
            rejection_reason TEXT,
            PRIMARY KEY (blocking_id, room_id)
        );

        CREATE TABLE IF NOT EXISTS blocking_allowed (
            blocking_id    INTEGER NOT NULL REFERENCES blockings (id),
            principal_type TEXT    NOT NULL,
            user_id        INTEGER REFERENCES users (id),
            local_group_id INTEGER REFERENCES groups (id),
            provider       TEXT,
            group_name     TEXT
        );

        CREATE TABLE IF NOT EXISTS reservations (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id             INTEGER NOT NULL REFERENCES rooms (id),
            event_id            INTEGER REFERENCES events (id),
            created_at          TEXT    NOT NULL,
            start_at            TEXT    NOT NULL,
            end_at              TEXT    NOT NULL,
            booked_for_id       INTEGER REFERENCES users (id),
            booked_for_name     TEXT    NOT NULL DEFAULT '',
            created_by_id       INTEGER REFERENCES users (id),
            is_accepted         INTEGER NOT NULL DEFAULT 0,
            is_cancelled        INTEGER NOT NULL DEFAULT 0,
            is_rejected         INTEGER NOT NULL DEFAULT 0,
            booking_reason      TEXT    NOT NULL DEFAULT '',
            rejection_reason    TEXT,
            repeat_frequency    TEXT    NOT NULL DEFAULT 'never'
                                CHECK (repeat_frequency IN ('never', 'day', 'week', 'month')),
            repeat_interval     INTEGER NOT NULL DEFAULT 0,
            uses_vc             INTEGER NOT NULL DEFAULT 0,
            needs_vc_assistance INTEGER NOT NULL DEFAULT 0,
            needs_assistance    INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_reservations_room ON reservations (room_id);

        CREATE TABLE IF NOT EXISTS reservation_occurrences (
            reservation_id    INTEGER NOT NULL REFERENCES reservations (id),
            start_at          TEXT    NOT NULL,
            end_at            TEXT    NOT NULL,
            is_cancelled      INTEGER NOT NULL DEFAULT 0,
            is_rejected       INTEGER NOT NULL DEFAULT 0,
            rejection_reason  TEXT,
            notification_sent INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (reservation_id, start_at)
        );

        CREATE TABLE IF NOT EXISTS reservation_edit_logs (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            reservation_id INTEGER NOT NULL REFERENCES reservations (id),
            timestamp      TEXT    NOT NULL,
            user_name      TEXT    NOT NULL DEFAULT '',
            info           TEXT    NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS reservation_equipment (
            reservation_id INTEGER NOT NULL REFERENCES reservations (id),
            equipment_id   INTEGER NOT NULL REFERENCES equipment_types (id),
            PRIMARY KEY (reservation_id, equipment_id)
        );
        "#,
    ),
    (
        3,
        "add checksum column to attachment_files",
        r#"
        ALTER TABLE attachment_files ADD COLUMN checksum TEXT NOT NULL DEFAULT '';
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
