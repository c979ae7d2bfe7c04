//! Event migration.
//!
//! One legacy conference at a time: id allocation (with redirection mapping
//! for legacy ids), category resolution with the broken-event policy,
//! datetime repair, protection/ACLs with creator fallback to the system
//! user, support-contact repair with the configured fallback e-mail,
//! external references, minutes-as-notes, and attachments.

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use rusqlite::Connection;

use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::convert::{clean_text, parse_datetime, strict_sanitize_email};
use crate::db::queries;
use crate::errors::MigrationError;
use crate::identity::PrincipalResolver;
use crate::models::{EventKind, FolderLink, NewCategory, NewEvent, ProtectionMode};
use crate::report::Reporter;
use crate::steps::attachments::{apply_read_acl, migrate_materials};
use crate::steps::{MigrationStep, StepEnv};
use crate::storage::ArchiveStore;
use crate::store::objects::{LegacyConference, MainSnapshot};

pub struct EventsStep;

impl MigrationStep for EventsStep {
    fn name(&self) -> &'static str {
        "events"
    }

    fn run(&self, env: &mut StepEnv<'_>) -> Result<(), MigrationError> {
        let config = env.config;
        let db = env.db;
        let snapshot = env.snapshot;
        let base = env.reporter;
        let ctx = &mut *env.ctx;
        let reporter = base.for_step("events");

        // rebuilt from scratch so a rolled-back failure can be repeated
        ctx.event_map.clear();
        ctx.event_id_counter = snapshot.counters.event;
        ctx.lost_and_found_category = None;

        base.step("Event data");
        let store = ArchiveStore::new(config);
        let bar = reporter.progress(snapshot.conferences.len() as u64, "Migrating events");
        let skipped = db.transaction(|conn| {
            let mut skipped = 0usize;
            for conf in snapshot.conferences.values() {
                bar.inc(1);
                if migrate_event(conn, config, snapshot, ctx, &store, conf, &reporter)?.is_none() {
                    skipped += 1;
                }
            }
            Ok(skipped)
        })?;
        bar.finish_and_clear();
        if skipped > 0 {
            reporter.warning(&format!("{} events were skipped", skipped));
        }
        db.fix_sequences(&["events"])?;
        Ok(())
    }
}

fn migrate_event(
    conn: &Connection,
    config: &MigrationConfig,
    snapshot: &MainSnapshot,
    ctx: &mut MigrationContext,
    store: &ArchiveStore,
    conf: &LegacyConference,
    reporter: &Reporter,
) -> Result<Option<i64>, crate::errors::DatabaseError> {
    // category first: broken events are skipped before any id is allocated
    let known_category = conf
        .owner_category
        .as_deref()
        .and_then(|c| ctx.category_map.get(c).copied());
    let category_id = match known_category {
        Some(id) => id,
        None => {
            reporter.error(&format!("Event has no category! [{}]", conf.id));
            if !config.migrate_broken_events {
                return Ok(None);
            }
            lost_and_found_category(conn, ctx, snapshot)?
        }
    };

    let (start_at, end_at) = match (parse_event_dt(conf, &conf.start, reporter),
                                    parse_event_dt(conf, &conf.end, reporter)) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            reporter.error(&format!("Unparseable event dates, skipping [{}]", conf.id));
            return Ok(None);
        }
    };

    // legacy (non-numeric) ids get a fresh one plus a mapping row, written
    // once the event row exists
    let (event_id, is_legacy) = match conf.id.parse::<i64>() {
        Ok(id) => (id, false),
        Err(_) => (ctx.gen_event_id(), true),
    };

    let title = {
        let t = clean_text(&conf.title);
        if t.is_empty() {
            "(no title)".to_string()
        } else {
            t
        }
    };

    let kind = match snapshot.wf_registry.get(&conf.id).map(String::as_str) {
        None => EventKind::Conference,
        Some("simple_event") => EventKind::Lecture,
        Some("meeting") => EventKind::Meeting,
        Some(other) => {
            reporter.error(&format!("Unexpected WF ID: {} [{}]", other, conf.id));
            EventKind::Conference
        }
    };

    let creator_id = match conf.creator.as_deref().and_then(|c| ctx.avatar_user_map.get(c)) {
        Some(&id) => id,
        None => {
            reporter.warning(&format!("Event has no creator info [{}]", conf.id));
            ctx.require_system_user()
        }
    };

    let protection_mode = match ProtectionMode::from_legacy(conf.access.protection, true) {
        Some(mode) => mode,
        None => {
            reporter.error(&format!(
                "Unexpected protection {} [{}], assuming protected",
                conf.access.protection, conf.id
            ));
            ProtectionMode::Protected
        }
    };

    let (contact_emails, contact_phones) = contact_lists(config, conf);
    let event = NewEvent {
        id: event_id,
        category_id,
        title,
        description: clean_text(&conf.description),
        timezone: if conf.timezone.is_empty() {
            "UTC".into()
        } else {
            conf.timezone.clone()
        },
        start_at,
        end_at,
        kind,
        is_locked: conf.closed,
        is_deleted: false,
        creator_id,
        protection_mode,
        contact_title: clean_text(&conf.contact.caption),
        contact_emails,
        contact_phones,
        organizer_info: clean_text(&conf.organizer_info),
        additional_info: clean_text(&conf.additional_info),
    };
    queries::insert_event(conn, &event)?;
    if is_legacy {
        queries::insert_legacy_event(conn, &conf.id, event_id)?;
        reporter.success(&format!("{:6} -> {}", conf.id, event_id));
    }
    reporter.success(&format!("{} [{}]", event.title, event_id));

    let resolver = PrincipalResolver::new(ctx, &config.default_group_provider);
    if protection_mode == ProtectionMode::Protected {
        apply_read_acl(conn, "event", event_id, &conf.access, &resolver, reporter)?;
    }
    for principal in resolver.resolve_all(&conf.access.managers, reporter) {
        queries::insert_acl_entry(conn, "event", event_id, &principal, false, true, &[])?;
    }

    migrate_references(conn, ctx, conf, event_id, reporter)?;

    // minutes become an event note authored by the system user
    if let Some(minutes) = conf.minutes_html.as_deref().filter(|m| !m.trim().is_empty()) {
        queries::insert_event_note(conn, event_id, ctx.require_system_user(), minutes, &start_at)?;
    }

    migrate_materials(
        conn,
        ctx,
        config,
        store,
        &conf.materials,
        FolderLink::Event(event_id),
        start_at,
        reporter,
    )?;

    ctx.event_map.insert(conf.id.clone(), event_id);
    Ok(Some(event_id))
}

/// Parse an event datetime, warning when a naive value had to be assumed UTC.
fn parse_event_dt(
    conf: &LegacyConference,
    value: &str,
    reporter: &Reporter,
) -> Option<DateTime<Utc>> {
    let parsed = parse_datetime(value)?;
    if parsed.was_naive {
        reporter.warning(&format!("Naive datetime converted ({}) [{}]", value, conf.id));
    }
    Some(parsed.dt)
}

/// Clean up the support-contact e-mail/phone lists. Unrepairable e-mails
/// fall back to the configured default address.
fn contact_lists(config: &MigrationConfig, conf: &LegacyConference) -> (Vec<String>, Vec<String>) {
    let email_sep = Regex::new(r"[\s;,]+").ok();
    let phone_sep = Regex::new(r"[/;,]+").ok();

    let mut emails: Vec<String> = match &email_sep {
        Some(re) => re
            .split(&conf.contact.email)
            .filter(|s| !s.is_empty())
            .map(|s| strict_sanitize_email(s, &config.default_email))
            .collect(),
        None => Vec::new(),
    };
    emails.dedup();

    let phones: Vec<String> = match &phone_sep {
        Some(re) => re
            .split(&conf.contact.telephone)
            .map(clean_text)
            .filter(|s| !s.is_empty())
            .collect(),
        None => Vec::new(),
    };
    (emails, phones)
}

fn migrate_references(
    conn: &Connection,
    ctx: &MigrationContext,
    conf: &LegacyConference,
    event_id: i64,
    reporter: &Reporter,
) -> Result<(), crate::errors::DatabaseError> {
    for (name, values) in &conf.report_numbers {
        let Some(&type_id) = ctx.reference_type_map.get(&name.to_lowercase()) else {
            reporter.warning(&format!(
                "Unknown reference type: {} [{}]",
                name, conf.id
            ));
            continue;
        };
        for value in values {
            let value = clean_text(value);
            if value.is_empty() {
                continue;
            }
            queries::insert_event_reference(conn, event_id, type_id, &value)?;
        }
    }
    Ok(())
}

/// The protected top-level category broken events are collected in. Created
/// on first use, under the migrated root.
fn lost_and_found_category(
    conn: &Connection,
    ctx: &mut MigrationContext,
    snapshot: &MainSnapshot,
) -> Result<i64, crate::errors::DatabaseError> {
    if let Some(id) = ctx.lost_and_found_category {
        return Ok(id);
    }
    let root_id = ctx.category_map.get("0").copied().unwrap_or(0);
    let id = ctx.gen_category_id();
    let category = NewCategory {
        id,
        parent_id: Some(root_id),
        position: 1000,
        title: "Lost & Found".into(),
        description: "Events that had no category in the old database".into(),
        timezone: snapshot.server_timezone().to_string(),
        visibility: None,
        protection_mode: ProtectionMode::Protected,
        ..Default::default()
    };
    queries::insert_category(conn, &category)?;
    ctx.lost_and_found_category = Some(id);
    Ok(id)
}
