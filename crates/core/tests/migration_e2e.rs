//! End-to-end migration tests.
//!
//! These exercise the full pipeline using:
//! - Real snapshot files on disk (file:// URIs)
//! - A real SQLite target database via `Database::open()`
//! - A real archive directory with files to locate and checksum
//!
//! No network I/O.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use confmigrate_core::engine::{MigrationEngine, StepStatus};
use confmigrate_core::MigrationConfig;

// ===========================================================================
// Helper functions
// ===========================================================================

fn main_snapshot() -> serde_json::Value {
    serde_json::json!({
        "info": {
            "title": "Atlantis Conferences",
            "organisation": "Atlantis Institute",
            "timezone": "Europe/Zurich",
            "full_access_ips": ["128.141"]
        },
        "counters": {"category": 100, "event": 1000},
        "avatars": {
            "1": {
                "id": "1", "name": "Ada", "surname": "Lovelace",
                "email": "Ada@Example.COM", "status": "activated",
                "secondary_emails": ["ada.l@example.org"],
                "identities": [
                    {"kind": "local", "login": "ada", "password_hash": "$2b$12$abcdefghijklmnopqrstuv"},
                    {"kind": "ldap", "login": "alovelace"}
                ],
                "favorite_categories": ["2"]
            },
            "2": {
                "id": "2", "name": "Charles", "surname": "Babbage",
                "email": "not-an-email", "status": "activated"
            },
            "3": {
                "id": "3", "name": "", "surname": "",
                "email": "ghost@example.com", "status": "activated"
            }
        },
        "groups": {
            "7": {"id": "7", "name": "Engineers", "members": ["1", "2"]}
        },
        "admins": ["1"],
        "domains": [
            {"name": "campus", "description": "on-site", "filters": ["10.0"]}
        ],
        "news": {
            "recent_days": 14,
            "items": [{"title": "Hello", "content": "world", "created_at": "2014-01-01T00:00:00+00:00"}]
        },
        "payment": {"currencies": [{"code": "CHF", "name": "Swiss Franc"}]},
        "upcoming": {
            "max_entries": 5,
            "entries": [{"kind": "event", "id": "17", "weight": 1.0, "days": 7}]
        },
        "root_category": {
            "id": "0", "name": "Home",
            "subcategories": [
                {
                    "id": "2", "name": "Physics", "order": 1,
                    "materials": [{
                        "title": "Docs",
                        "resources": [
                            {"kind": "file", "name": "handbook.pdf", "repo_path": "cat2/handbook.pdf"},
                            {"kind": "link", "name": "wiki", "url": "https://wiki.example.com"}
                        ]
                    }]
                },
                {"id": "old-arch", "name": "Archive <b>2001</b>", "order": 2}
            ]
        },
        "conferences": {
            "17": {
                "id": "17", "title": "Detector Workshop",
                "timezone": "Europe/Zurich",
                "start": "2014-07-02T09:00:00+02:00",
                "end": "2014-07-04T18:00:00+02:00",
                "owner_category": "2",
                "creator": "1",
                "contact": {"caption": "Support", "email": "support@example.com; junk", "telephone": "71234"},
                "report_numbers": {"CDS": ["CDS-4711"]},
                "minutes_html": "<p>Summary</p>",
                "materials": [{
                    "title": "Slides",
                    "resources": [
                        {"kind": "file", "name": "intro.pdf", "repo_path": "conf17/intro.pdf"}
                    ]
                }],
                "booking_ids": [5]
            },
            "orphan9": {
                "id": "orphan9", "title": "Orphan Meeting",
                "start": "2013-01-01 10:00:00",
                "end": "2013-01-01 12:00:00"
            }
        },
        "wf_registry": {"17": "meeting"},
        "locations": [
            {"name": "Main Site", "aspects": [
                {"name": "Campus", "center_latitude": 46.2, "center_longitude": 6.0,
                 "zoom_level": 15, "default_on_startup": true}
            ]}
        ],
        "default_location": "Main Site"
    })
}

fn rb_snapshot() -> serde_json::Value {
    serde_json::json!({
        "custom_attributes": {
            "Main Site": [{"name": "Simba List", "type": "str", "required": false, "hidden": false}]
        },
        "rooms": {
            "97": {
                "id": 97, "location": "Main Site", "name": "",
                "site": "Campus", "building": "28", "floor": "1", "number": "025",
                "capacity": 20, "responsible_id": "1",
                "is_active": true, "is_reservable": true,
                "equipment": "Projector`Whiteboard",
                "available_vc": ["Vidyo"],
                "custom_attributes": {"Simba List": "room-admins"},
                "latitude": "46.23", "longitude": "not numbers"
            }
        },
        "blockings": {
            "1": {
                "id": 1, "created_by": "1",
                "created_at": "2014-01-01T08:00:00+00:00",
                "start_date": "2014-02-01", "end_date": "2014-02-03",
                "message": "maintenance",
                "blocked_rooms": [{"room_guid": "Main Site|97", "active": true}],
                "allowed": [{"kind": "avatar", "id": "1"}]
            }
        },
        "reservations": {
            "5": {
                "id": 5, "room_id": 97,
                "created_at": "2014-06-30T08:00:00+00:00",
                "start": "2014-07-02T09:00:00+00:00",
                "end": "2014-07-02T11:00:00+00:00",
                "booked_for_id": "1", "booked_for_name": "Ada Lovelace",
                "created_by": "1", "is_confirmed": true,
                "reason": "workshop room",
                "event_id": "17"
            },
            "6": {
                "id": 6, "room_id": 404,
                "created_at": "2014-06-30T08:00:00+00:00",
                "start": "2014-07-02T09:00:00+00:00",
                "end": "2014-07-02T11:00:00+00:00",
                "reason": "dead room"
            }
        }
    })
}

struct Fixture {
    _dir: TempDir,
    config: MigrationConfig,
}

fn setup(with_rb: bool) -> Fixture {
    let dir = TempDir::new().expect("failed to create temp dir");
    let root = dir.path();

    // archive files referenced by the snapshots
    let archive = root.join("archive");
    std::fs::create_dir_all(archive.join("cat2")).unwrap();
    std::fs::create_dir_all(archive.join("conf17")).unwrap();
    std::fs::write(archive.join("cat2/handbook.pdf"), b"handbook bytes").unwrap();
    std::fs::write(archive.join("conf17/intro.pdf"), b"intro bytes").unwrap();

    let main_path = write_json(root, "snapshot.json", &main_snapshot());
    let rb_path = write_json(root, "rb_snapshot.json", &rb_snapshot());

    let config = MigrationConfig {
        db_uri: format!("sqlite://{}", root.join("target.db").display()),
        store_uri: format!("file://{}", main_path.display()),
        rb_store_uri: with_rb.then(|| format!("file://{}", rb_path.display())),
        verbose: false,
        dblog: false,
        debug: false,
        ldap_provider_name: "corp-ldap".into(),
        default_group_provider: "corp-ldap".into(),
        ignore_local_accounts: false,
        system_user_id: None,
        default_email: "catchall@example.com".into(),
        archive_dirs: vec![archive],
        storage_backend: "legacy-archive".into(),
        avoid_storage_check: false,
        symlink_backend: None,
        symlink_target: None,
        photo_path: None,
        reference_types: vec!["CDS".into()],
        default_currency: "CHF".into(),
        migrate_broken_events: false,
        save_restore: None,
        restore_file: None,
    };
    Fixture { _dir: dir, config }
}

fn write_json(dir: &Path, name: &str, value: &serde_json::Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    path
}

fn count(engine: &MigrationEngine, table: &str) -> i64 {
    engine
        .db()
        .conn()
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .unwrap()
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn test_full_migration() {
    let fixture = setup(true);
    let mut engine = MigrationEngine::new(fixture.config).unwrap();
    let summary = engine.run().unwrap();

    assert!(summary
        .steps
        .iter()
        .all(|s| s.status == StepStatus::Completed));

    // users: ada + babbage (deleted, bad e-mail) + system user;
    // the nameless/linkless avatar 3 is skipped
    assert_eq!(count(&engine, "users"), 3);
    let conn = engine.db().conn();
    let (ada_email, ada_admin): (String, bool) = conn
        .query_row(
            "SELECT email, is_admin FROM users WHERE id = 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(ada_email, "ada@example.com");
    assert!(ada_admin);
    let babbage_deleted: bool = conn
        .query_row("SELECT is_deleted FROM users WHERE id = 2", [], |r| r.get(0))
        .unwrap();
    assert!(babbage_deleted);

    // ldap identity attributed to the configured provider
    let providers: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT provider FROM identities ORDER BY provider")
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    };
    assert_eq!(providers, vec!["corp-ldap", "local"]);

    // categories: root + physics + legacy-id archive (+ no lost&found)
    assert_eq!(count(&engine, "categories"), 3);
    let mapped_archive: i64 = conn
        .query_row(
            "SELECT category_id FROM legacy_category_map WHERE legacy_id = 'old-arch'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(mapped_archive, 101);
    let archive_title: String = conn
        .query_row(
            "SELECT title FROM categories WHERE id = 101",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(archive_title, "Archive 2001");

    // events: the workshop; the orphan is skipped
    assert_eq!(count(&engine, "events"), 1);
    let kind: String = conn
        .query_row("SELECT kind FROM events WHERE id = 17", [], |r| r.get(0))
        .unwrap();
    assert_eq!(kind, "meeting");

    // support e-mail junk piece replaced by the fallback
    let emails: String = conn
        .query_row("SELECT contact_emails FROM events WHERE id = 17", [], |r| r.get(0))
        .unwrap();
    assert!(emails.contains("catchall@example.com"));

    // references, notes, attachments (2 category + 1 event file/link)
    assert_eq!(count(&engine, "event_references"), 1);
    assert_eq!(count(&engine, "event_notes"), 1);
    assert_eq!(count(&engine, "attachments"), 3);
    assert_eq!(count(&engine, "attachment_files"), 2);
    let checksum: String = conn
        .query_row(
            "SELECT checksum FROM attachment_files WHERE filename = 'intro.pdf'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(checksum.len(), 64);

    // rooms: generated name, parsed latitude, dropped longitude
    assert_eq!(count(&engine, "rooms"), 1);
    let (room_name, latitude, longitude): (String, Option<f64>, Option<f64>) = conn
        .query_row(
            "SELECT name, latitude, longitude FROM rooms WHERE id = 97",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(room_name, "28-1-025");
    assert_eq!(latitude, Some(46.23));
    assert_eq!(longitude, None);

    // reservations: the dead-room booking is skipped, the other links to
    // the event that lists it
    assert_eq!(count(&engine, "reservations"), 1);
    let event_id: Option<i64> = conn
        .query_row("SELECT event_id FROM reservations WHERE id = 5", [], |r| r.get(0))
        .unwrap();
    assert_eq!(event_id, Some(17));
    assert_eq!(count(&engine, "reservation_occurrences"), 1);

    assert_eq!(count(&engine, "blockings"), 1);
    assert_eq!(count(&engine, "blocked_rooms"), 1);

    // favorite category of ada (legacy category 2)
    let fav: i64 = conn
        .query_row(
            "SELECT category_id FROM user_favorite_categories WHERE user_id = 1",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(fav, 2);
}

#[test]
fn test_run_without_rb_store_skips_room_steps() {
    let fixture = setup(false);
    let mut engine = MigrationEngine::new(fixture.config).unwrap();
    let summary = engine.run().unwrap();

    let skipped: Vec<&str> = summary
        .steps
        .iter()
        .filter(|s| matches!(s.status, StepStatus::Skipped(_)))
        .map(|s| s.name)
        .collect();
    assert_eq!(skipped, vec!["rooms-locations", "room-bookings"]);
    assert_eq!(count(&engine, "rooms"), 0);
    // the rest of the pipeline still ran
    assert_eq!(count(&engine, "events"), 1);
}

#[test]
fn test_broken_events_collected_when_enabled() {
    let mut fixture = setup(true);
    fixture.config.migrate_broken_events = true;
    let mut engine = MigrationEngine::new(fixture.config).unwrap();
    engine.run().unwrap();

    // orphan9 lands in Lost & Found instead of being skipped
    assert_eq!(count(&engine, "events"), 2);
    let conn = engine.db().conn();
    let lf: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM categories WHERE title = 'Lost & Found'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(lf, 1);
}

#[test]
fn test_checkpoint_resume_after_failure() {
    // a bad system-user id makes the users step fail
    let mut fixture = setup(true);
    let restore_path = fixture._dir.path().join("restore.json");
    fixture.config.system_user_id = Some(9999);
    fixture.config.save_restore = Some(restore_path.clone());

    let config = fixture.config.clone();
    let mut engine = MigrationEngine::new(config).unwrap();
    assert!(engine.run().is_err());
    assert!(restore_path.exists(), "restore point must be written");
    drop(engine);

    // resume with the problem fixed; global-pre is skipped this time
    let mut config = fixture.config.clone();
    config.system_user_id = None;
    config.restore_file = Some(restore_path);
    config.save_restore = None;
    let mut engine = MigrationEngine::new(config).unwrap();
    let summary = engine.run().unwrap();

    assert_eq!(summary.steps[0].status, StepStatus::AlreadyDone);
    assert!(summary.steps[1..]
        .iter()
        .all(|s| s.status == StepStatus::Completed));
    assert_eq!(count(&engine, "events"), 1);
    // reference types survived the checkpoint roundtrip
    assert_eq!(count(&engine, "event_references"), 1);
}
