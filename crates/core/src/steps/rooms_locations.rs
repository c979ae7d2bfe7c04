//! Location, room, and blocking migration.
//!
//! Locations (with map aspects and custom attribute definitions) come from
//! the main snapshot; rooms, their equipment, and blockings come from the
//! room-booking snapshot. Legacy equipment lists are backtick-delimited
//! strings; video-conference equipment is nested under the `Video
//! conference` parent type.

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::convert::{clean_text, parse_datetime};
use crate::db::queries;
use crate::errors::{DatabaseError, MigrationError};
use crate::identity::PrincipalResolver;
use crate::models::{BlockedRoomState, NewRoom};
use crate::report::Reporter;
use crate::steps::{MigrationStep, StepEnv};
use crate::store::objects::{LegacyRoom, MainSnapshot, RoomBookingSnapshot};

/// Legacy site-specific attribute names that were renamed for the new
/// schema.
const ATTRIBUTE_NAME_MAP: &[(&str, &str)] = &[
    ("Simba List", "Manager Group"),
    ("Booking Simba List", "Allowed Booking Group"),
];

pub struct RoomsLocationsStep;

impl MigrationStep for RoomsLocationsStep {
    fn name(&self) -> &'static str {
        "rooms-locations"
    }

    fn skip_reason(&self, env: &StepEnv<'_>) -> Option<String> {
        if env.rb_snapshot.is_none() {
            Some("no room-booking store URI given".into())
        } else {
            None
        }
    }

    fn run(&self, env: &mut StepEnv<'_>) -> Result<(), MigrationError> {
        let config = env.config;
        let db = env.db;
        let snapshot = env.snapshot;
        let Some(rb) = env.rb_snapshot else {
            env.reporter.warning("Room booking snapshot missing, skipping step");
            return Ok(());
        };
        let base = env.reporter;
        let ctx = &mut *env.ctx;
        let reporter = base.for_step("rooms");

        // rebuilt from scratch so a rolled-back failure can be repeated
        ctx.venue_map.clear();
        ctx.migrated_rooms.clear();

        db.transaction(|conn| {
            base.step("Room locations");
            migrate_locations(conn, snapshot, rb, ctx, &reporter)?;

            base.step("Rooms");
            migrate_rooms(conn, config, rb, ctx, &reporter)?;

            base.step("Room blockings");
            migrate_blockings(conn, config, rb, ctx, &reporter)
        })?;

        db.fix_sequences(&[
            "locations",
            "aspects",
            "room_attributes",
            "equipment_types",
            "rooms",
            "blockings",
        ])?;
        Ok(())
    }
}

fn mapped_attribute_name(name: &str) -> String {
    ATTRIBUTE_NAME_MAP
        .iter()
        .find(|(legacy, _)| *legacy == name)
        .map(|(_, new)| new.to_string())
        .unwrap_or_else(|| name.to_string())
}

fn attribute_key(title: &str) -> String {
    title.replace(' ', "-").to_lowercase()
}

fn migrate_locations(
    conn: &Connection,
    snapshot: &MainSnapshot,
    rb: &RoomBookingSnapshot,
    ctx: &mut MigrationContext,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    for old_location in &snapshot.locations {
        let name = clean_text(&old_location.name);
        let location_id =
            queries::insert_location(conn, &name, old_location.name == snapshot.default_location)?;
        reporter.info(&format!("- {}", name));

        for old_aspect in &old_location.aspects {
            let aspect_id = queries::insert_aspect(
                conn,
                location_id,
                &clean_text(&old_aspect.name),
                old_aspect.center_latitude,
                old_aspect.center_longitude,
                old_aspect.zoom_level,
            )?;
            reporter.info(&format!("  Aspect: {}", old_aspect.name));
            if old_aspect.default_on_startup {
                queries::set_location_default_aspect(conn, location_id, aspect_id)?;
            }
        }

        if let Some(attributes) = rb.custom_attributes.get(&old_location.name) {
            for attribute in attributes {
                if attribute.r#type != "str" {
                    reporter.error(&format!(
                        "Unsupported non-str custom attribute: {}",
                        attribute.name
                    ));
                    continue;
                }
                let title = mapped_attribute_name(&attribute.name);
                queries::insert_room_attribute(
                    conn,
                    location_id,
                    &attribute_key(&title),
                    &title,
                    attribute.required,
                    attribute.hidden,
                )?;
                reporter.info(&format!("  Attribute: {}", title));
            }
        }

        ctx.venue_map.insert(old_location.name.clone(), location_id);
    }
    Ok(())
}

/// Split a legacy backtick-delimited equipment list.
fn split_equipment(raw: &str) -> impl Iterator<Item = &str> {
    raw.split('`').filter(|e| !e.is_empty())
}

fn migrate_rooms(
    conn: &Connection,
    config: &MigrationConfig,
    rb: &RoomBookingSnapshot,
    ctx: &mut MigrationContext,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    // equipment and VC equipment per location, collected across all rooms
    let mut equipment: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut vc_equipment: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for room in rb.rooms.values() {
        let eq = equipment.entry(room.location.as_str()).or_default();
        for item in split_equipment(&room.equipment) {
            if !eq.contains(&item) {
                eq.push(item);
            }
        }
        let vc = vc_equipment.entry(room.location.as_str()).or_default();
        for item in &room.available_vc {
            if !item.is_empty() && !vc.contains(&item.as_str()) {
                vc.push(item);
            }
        }
    }

    for (location_name, items) in &equipment {
        let Some(&location_id) = ctx.venue_map.get(*location_name) else {
            reporter.warning(&format!(
                "Location '{}' does not exist. Skipped equipment: {:?}",
                location_name, items
            ));
            continue;
        };
        for item in items {
            queries::insert_equipment_type(conn, location_id, item, None)?;
        }
        reporter.info(&format!("- [{}] {:?}", location_name, items));
    }

    for (location_name, items) in &vc_equipment {
        let Some(&location_id) = ctx.venue_map.get(*location_name) else {
            reporter.warning(&format!(
                "Location '{}' does not exist. Skipped VC equipment: {:?}",
                location_name, items
            ));
            continue;
        };
        let parent = queries::get_equipment_by_name(conn, location_id, "Video conference")?;
        for item in items {
            queries::insert_equipment_type(conn, location_id, item, parent)?;
        }
    }

    for room in rb.rooms.values() {
        let Some(&location_id) = ctx.venue_map.get(&room.location) else {
            reporter.warning(&format!(
                "Location '{}' does not exist. Skipped room '{}'",
                room.location, room.id
            ));
            continue;
        };

        let owner_id = match ctx.avatar_user_map.get(&room.responsible_id) {
            Some(&id) => id,
            None => {
                reporter.warning(&format!(
                    "Room {} has an unknown responsible '{}', assigning the system user",
                    room.id, room.responsible_id
                ));
                ctx.require_system_user()
            }
        };

        let name = {
            let n = clean_text(&room.name);
            if n.is_empty() {
                generated_room_name(room)
            } else {
                n
            }
        };

        let new_room = NewRoom {
            id: room.id,
            location_id,
            name: name.clone(),
            site: clean_text(&room.site),
            division: clean_text(&room.division),
            building: clean_text(&room.building),
            floor: clean_text(&room.floor),
            number: clean_text(&room.number),
            capacity: room.capacity,
            surface_area: room.surface_area,
            latitude: parse_coordinate(&room.latitude, "latitude", room.id, reporter),
            longitude: parse_coordinate(&room.longitude, "longitude", room.id, reporter),
            telephone: clean_text(&room.telephone),
            key_location: clean_text(&room.where_is_key),
            comments: clean_text(&room.comments),
            owner_id,
            is_active: room.is_active,
            is_reservable: room.is_reservable,
            reservations_need_confirmation: room.reservations_need_confirmation,
            notification_before_days: if room.start_notification {
                room.start_notification_before
            } else {
                None
            },
            notification_for_responsible: room.notification_to_responsible,
            notification_for_assistance: room.notification_assistance,
            max_advance_days: room.max_advance_days.filter(|&d| d > 0),
            large_photo: load_photo(config, room, "large_photos"),
            small_photo: load_photo(config, room, "small_photos"),
        };
        queries::insert_room(conn, &new_room)?;
        reporter.info(&format!("- [{}] {:4}  {}", room.location, room.id, name));

        for period in &room.bookable_periods {
            queries::insert_bookable_hours(conn, room.id, &period.start_time, &period.end_time)?;
        }
        for period in &room.nonbookable_dates {
            let (Some(start), Some(end)) = (
                parse_datetime(&period.start),
                parse_datetime(&period.end),
            ) else {
                reporter.warning(&format!(
                    "Skipping nonbookable period with bad dates [{}]",
                    room.id
                ));
                continue;
            };
            queries::insert_nonbookable_period(conn, room.id, &start.dt, &end.dt)?;
        }

        for item in split_equipment(&room.equipment)
            .chain(room.available_vc.iter().map(String::as_str))
        {
            if item.is_empty() {
                continue;
            }
            if let Some(equipment_id) = queries::get_equipment_by_name(conn, location_id, item)? {
                queries::insert_room_equipment(conn, room.id, equipment_id)?;
            }
        }

        for (attr_name, value) in &room.custom_attributes {
            let value = clean_text(value);
            // a long-broken mailing-list lookup filled this junk value in
            if value.is_empty()
                || (attr_name.contains("Simba") && value == "Error: unknown mailing list")
            {
                continue;
            }
            let key = attribute_key(&mapped_attribute_name(attr_name));
            match queries::get_room_attribute_by_name(conn, location_id, &key)? {
                Some(attribute_id) => {
                    queries::insert_room_attribute_value(conn, room.id, attribute_id, &value)?;
                    reporter.info(&format!("  Attribute: {} = {}", key, value));
                }
                None => {
                    reporter.info(&format!("  Attribute: {} not found", key));
                }
            }
        }

        ctx.migrated_rooms.insert(room.id);
    }
    Ok(())
}

fn migrate_blockings(
    conn: &Connection,
    config: &MigrationConfig,
    rb: &RoomBookingSnapshot,
    ctx: &mut MigrationContext,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    for blocking in rb.blockings.values() {
        let Some(&created_by) = ctx.avatar_user_map.get(&blocking.created_by) else {
            reporter.error(&format!(
                "Skipping blocking {} - unknown creator '{}'",
                blocking.id, blocking.created_by
            ));
            continue;
        };
        let created_at = parse_datetime(&blocking.created_at)
            .map(|p| p.dt)
            .unwrap_or(chrono::DateTime::UNIX_EPOCH);
        queries::insert_blocking(
            conn,
            blocking.id,
            created_by,
            &created_at,
            &blocking.start_date,
            &blocking.end_date,
            &clean_text(&blocking.message),
        )?;
        reporter.info(&format!("- {}", blocking.message));

        for blocked in &blocking.blocked_rooms {
            let Some(room_id) = blocked.room_id() else {
                reporter.warning(&format!(
                    "Bad room GUID '{}' in blocking {}",
                    blocked.room_guid, blocking.id
                ));
                continue;
            };
            if !ctx.migrated_rooms.contains(&room_id) {
                reporter.warning(&format!(
                    "Blocking {} references dead room {}",
                    blocking.id, room_id
                ));
                continue;
            }
            queries::insert_blocked_room(
                conn,
                blocking.id,
                room_id,
                BlockedRoomState::from_legacy(blocked.active),
                blocked.rejected_by.as_deref(),
                blocked.rejection_reason.as_deref(),
            )?;
        }

        let resolver = PrincipalResolver::new(ctx, &config.default_group_provider);
        for principal in resolver.resolve_all(&blocking.allowed, reporter) {
            queries::insert_blocking_allowed(conn, blocking.id, &principal)?;
            reporter.info(&format!("  Allowed: {:?}", principal));
        }
    }
    Ok(())
}

/// `building-floor-number`, the conventional name for unnamed rooms.
fn generated_room_name(room: &LegacyRoom) -> String {
    format!("{}-{}-{}", room.building, room.floor, room.number)
}

/// Photo filename convention: `<location>-<building>-<floor>-<number>.jpg`.
fn photo_file_name(room: &LegacyRoom) -> String {
    format!("{}-{}.jpg", room.location, generated_room_name(room))
}

fn load_photo(config: &MigrationConfig, room: &LegacyRoom, kind: &str) -> Option<Vec<u8>> {
    let base = config.photo_path.as_ref()?;
    std::fs::read(base.join(kind).join(photo_file_name(room))).ok()
}

/// Legacy coordinates were free-text fields; anything non-numeric is
/// reported and dropped.
fn parse_coordinate(
    raw: &str,
    what: &str,
    room_id: i64,
    reporter: &Reporter,
) -> Option<f64> {
    let raw = clean_text(raw);
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            reporter.warning(&format!("Bad {} '{}' [{}]", what, raw, room_id));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::steps::testutil::{run_step, test_config_simple};
    use crate::store::objects::*;

    fn room(id: i64, location: &str) -> LegacyRoom {
        LegacyRoom {
            id,
            location: location.into(),
            building: "28".into(),
            floor: "1".into(),
            number: "025".into(),
            responsible_id: "1".into(),
            is_active: true,
            is_reservable: true,
            equipment: "Projector`Whiteboard".into(),
            ..Default::default()
        }
    }

    fn snapshots() -> (MainSnapshot, RoomBookingSnapshot) {
        let main = MainSnapshot {
            locations: vec![LegacyLocation {
                name: "Main Site".into(),
                aspects: vec![LegacyAspect {
                    name: "Campus".into(),
                    default_on_startup: true,
                    ..Default::default()
                }],
            }],
            default_location: "Main Site".into(),
            ..Default::default()
        };
        let mut rb = RoomBookingSnapshot::default();
        rb.custom_attributes.insert(
            "Main Site".into(),
            vec![LegacyCustomAttribute {
                name: "Simba List".into(),
                r#type: "str".into(),
                required: false,
                hidden: false,
            }],
        );
        rb.rooms.insert("97".into(), {
            let mut r = room(97, "Main Site");
            r.custom_attributes
                .insert("Simba List".into(), "room-admins".into());
            r.available_vc = vec!["Vidyo".into()];
            r
        });
        rb.rooms.insert("98".into(), room(98, "Ghost Site"));
        (main, rb)
    }

    fn setup() -> (Database, MigrationContext) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let conn = db.conn();
        conn.execute(
            "INSERT INTO users (id, first_name, last_name, email, is_system)
             VALUES (0, 'System', 'User', '', 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO users (id, first_name, last_name, email) VALUES (1, 'O', 'W', 'o@w.cc')",
            [],
        )
        .unwrap();
        drop(conn);
        let mut ctx = MigrationContext::default();
        ctx.system_user_id = Some(0);
        ctx.avatar_user_map.insert("1".into(), 1);
        (db, ctx)
    }

    #[test]
    fn test_locations_rooms_equipment() {
        let (db, mut ctx) = setup();
        let (main, rb) = snapshots();
        let config = test_config_simple();
        run_step(&RoomsLocationsStep, &config, &db, &main, Some(&rb), &mut ctx).unwrap();

        let conn = db.conn();
        assert_eq!(queries::count_rows(&conn, "locations").unwrap(), 1);
        // ghost-site room skipped
        assert_eq!(queries::count_rows(&conn, "rooms").unwrap(), 1);
        assert!(ctx.migrated_rooms.contains(&97));
        assert!(!ctx.migrated_rooms.contains(&98));

        // renamed custom attribute with value
        let value: String = conn
            .query_row("SELECT value FROM room_attribute_values", [], |r| r.get(0))
            .unwrap();
        assert_eq!(value, "room-admins");
        let attr_name: String = conn
            .query_row("SELECT name FROM room_attributes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(attr_name, "manager-group");

        // backtick equipment + vc equipment linked to the room
        assert_eq!(queries::count_rows(&conn, "room_equipment").unwrap(), 3);

        let is_default: bool = conn
            .query_row("SELECT is_default FROM locations", [], |r| r.get(0))
            .unwrap();
        assert!(is_default);
    }

    #[test]
    fn test_generated_room_name() {
        let (db, mut ctx) = setup();
        let (main, mut rb) = snapshots();
        rb.rooms.get_mut("97").unwrap().name = "  ".into();
        let config = test_config_simple();
        run_step(&RoomsLocationsStep, &config, &db, &main, Some(&rb), &mut ctx).unwrap();

        let name: String = db
            .conn()
            .query_row("SELECT name FROM rooms WHERE id = 97", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "28-1-025");
    }

    #[test]
    fn test_blockings() {
        let (db, mut ctx) = setup();
        let (main, mut rb) = snapshots();
        rb.blockings.insert(
            "1".into(),
            LegacyBlocking {
                id: 1,
                created_by: "1".into(),
                created_at: "2014-01-01T00:00:00+00:00".into(),
                start_date: "2014-02-01".into(),
                end_date: "2014-02-07".into(),
                message: "maintenance".into(),
                blocked_rooms: vec![
                    LegacyBlockedRoom {
                        room_guid: "Main Site|97".into(),
                        active: Some(true),
                        ..Default::default()
                    },
                    LegacyBlockedRoom {
                        room_guid: "Main Site|404".into(),
                        active: None,
                        ..Default::default()
                    },
                ],
                allowed: vec![LegacyPrincipal::Avatar {
                    id: "1".into(),
                    email: String::new(),
                }],
            },
        );
        let config = test_config_simple();
        run_step(&RoomsLocationsStep, &config, &db, &main, Some(&rb), &mut ctx).unwrap();

        let conn = db.conn();
        assert_eq!(queries::count_rows(&conn, "blockings").unwrap(), 1);
        // the dead room is dropped
        assert_eq!(queries::count_rows(&conn, "blocked_rooms").unwrap(), 1);
        assert_eq!(queries::count_rows(&conn, "blocking_allowed").unwrap(), 1);
        let state: String = conn
            .query_row("SELECT state FROM blocked_rooms", [], |r| r.get(0))
            .unwrap();
        assert_eq!(state, "accepted");
    }

    #[test]
    fn test_skip_reason_without_rb_snapshot() {
        let step = RoomsLocationsStep;
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let config = test_config_simple();
        let main = MainSnapshot::default();
        let mut ctx = MigrationContext::default();
        let reporter = crate::report::Reporter::quiet();
        let env = StepEnv {
            config: &config,
            db: &db,
            snapshot: &main,
            rb_snapshot: None,
            ctx: &mut ctx,
            reporter: &reporter,
        };
        assert!(step.skip_reason(&env).is_some());
    }
}
