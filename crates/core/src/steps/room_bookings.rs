//! Reservation migration.
//!
//! Reservations reference rooms that may no longer exist, carry legacy
//! repeatability codes, free-text edit-log timestamps, and event links that
//! were never validated. The migration skips bookings for dead rooms,
//! expands repeat series into occurrence rows, and only links a reservation
//! to an event when the event actually lists the booking.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;

use crate::context::MigrationContext;
use crate::convert::{clean_text, parse_datetime, parse_legacy_log_datetime};
use crate::db::queries;
use crate::errors::{DatabaseError, MigrationError};
use crate::models::{convert_legacy_repeatability, NewReservation, RepeatFrequency};
use crate::report::Reporter;
use crate::steps::{MigrationStep, StepEnv};
use crate::store::objects::{LegacyReservation, MainSnapshot};

/// Runaway guard for occurrence expansion.
const MAX_OCCURRENCES: usize = 5000;

pub struct RoomBookingsStep;

impl MigrationStep for RoomBookingsStep {
    fn name(&self) -> &'static str {
        "room-bookings"
    }

    fn skip_reason(&self, env: &StepEnv<'_>) -> Option<String> {
        if env.rb_snapshot.is_none() {
            Some("no room-booking store URI given".into())
        } else {
            None
        }
    }

    fn run(&self, env: &mut StepEnv<'_>) -> Result<(), MigrationError> {
        let db = env.db;
        let snapshot = env.snapshot;
        let Some(rb) = env.rb_snapshot else {
            env.reporter.warning("Room booking snapshot missing, skipping step");
            return Ok(());
        };
        let base = env.reporter;
        let ctx = &*env.ctx;
        let reporter = base.for_step("bookings");

        base.step("Room Bookings");
        let bar = reporter.progress(rb.reservations.len() as u64, "Migrating bookings");
        db.transaction(|conn| {
            for reservation in rb.reservations.values() {
                migrate_reservation(conn, snapshot, ctx, reservation, &reporter)?;
                bar.inc(1);
            }
            Ok(())
        })?;
        bar.finish_and_clear();
        db.fix_sequences(&["reservations"])?;
        Ok(())
    }
}

fn migrate_reservation(
    conn: &Connection,
    snapshot: &MainSnapshot,
    ctx: &MigrationContext,
    v: &LegacyReservation,
    reporter: &Reporter,
) -> Result<(), DatabaseError> {
    if !ctx.migrated_rooms.contains(&v.room_id) {
        reporter.error(&format!(
            "skipping resv for dead room {}: {} ({})",
            v.room_id, v.id, v.created_at
        ));
        return Ok(());
    }

    let Some((repeat_frequency, repeat_interval)) =
        convert_legacy_repeatability(v.repeatability)
    else {
        reporter.error(&format!(
            "skipping resv {} - unknown repeatability code {:?}",
            v.id, v.repeatability
        ));
        return Ok(());
    };

    let (Some(start), Some(end)) = (parse_datetime(&v.start), parse_datetime(&v.end)) else {
        reporter.error(&format!("skipping resv {} - unparseable dates", v.id));
        return Ok(());
    };
    let created_at = parse_datetime(&v.created_at)
        .map(|p| p.dt)
        .unwrap_or(start.dt);

    // only link the event when it actually lists this booking; some bookings
    // point at completely unrelated parents
    let event_id = match &v.event_id {
        Some(legacy_event) => {
            let claimed = snapshot
                .conferences
                .get(legacy_event)
                .map(|conf| conf.booking_ids.contains(&v.id))
                .unwrap_or(false);
            if claimed {
                ctx.event_map.get(legacy_event).copied()
            } else {
                reporter.error(&format!(
                    "event {} does not contain booking {}",
                    legacy_event, v.id
                ));
                None
            }
        }
        None => None,
    };

    let reservation = NewReservation {
        id: v.id,
        room_id: v.room_id,
        event_id,
        created_at,
        start_at: start.dt,
        end_at: end.dt,
        booked_for_id: v
            .booked_for_id
            .as_deref()
            .and_then(|id| ctx.avatar_user_map.get(id))
            .copied(),
        booked_for_name: clean_text(&v.booked_for_name),
        created_by_id: v
            .created_by
            .as_deref()
            .and_then(|id| ctx.avatar_user_map.get(id))
            .copied(),
        is_accepted: v.is_confirmed,
        is_cancelled: v.is_cancelled,
        is_rejected: v.is_rejected,
        booking_reason: clean_text(&v.reason),
        rejection_reason: v.rejection_reason.as_deref().map(clean_text).filter(|s| !s.is_empty()),
        repeat_frequency,
        repeat_interval,
        uses_vc: v.uses_vc,
        needs_vc_assistance: v.needs_vc_assistance,
        needs_assistance: v.needs_assistance,
    };
    queries::insert_reservation(conn, &reservation)?;

    // VC equipment actually used by this booking
    if !v.vc_equipment.is_empty() {
        if let Some(location_id) = queries::get_room_location(conn, v.room_id)? {
            for name in &v.vc_equipment {
                if let Some(equipment_id) =
                    queries::get_equipment_by_name(conn, location_id, name)?
                {
                    queries::insert_reservation_equipment(conn, v.id, equipment_id)?;
                }
            }
        }
    }

    let rejection_reasons = migrate_edit_logs(conn, v, reporter)?;

    let notifications: Vec<NaiveDate> = parse_date_list(&v.notifications_sent);
    let excluded: Vec<NaiveDate> = parse_date_list(&v.excluded_days);
    for (occ_start, occ_end) in
        occurrence_series(start.dt, end.dt, repeat_frequency, repeat_interval)
    {
        let date = occ_start.date_naive();
        queries::insert_reservation_occurrence(
            conn,
            v.id,
            &occ_start,
            &occ_end,
            v.is_cancelled || excluded.contains(&date),
            v.is_rejected,
            rejection_reasons
                .iter()
                .find(|(d, _)| *d == date)
                .map(|(_, reason)| reason.as_str()),
            notifications.contains(&date),
        )?;
    }

    reporter.info(&format!(
        "- [{}]  {}  {}",
        v.room_id,
        v.id,
        created_at.date_naive()
    ));
    Ok(())
}

/// Write the edit log, returning per-date rejection reasons recovered from
/// legacy history messages.
fn migrate_edit_logs(
    conn: &Connection,
    v: &LegacyReservation,
    reporter: &Reporter,
) -> Result<Vec<(NaiveDate, String)>, DatabaseError> {
    let mut rejection_reasons = Vec::new();
    for entry in v.history.iter().rev() {
        let Some(naive_ts) = parse_legacy_log_datetime(&entry.timestamp) else {
            reporter.warning(&format!(
                "Bad history timestamp '{}' in resv {}",
                entry.timestamp, v.id
            ));
            continue;
        };
        let ts = Utc.from_utc_datetime(&naive_ts);

        if entry.info.len() == 2 {
            if let Some(date) = extract_occurrence_rejection(&entry.info[1]) {
                rejection_reasons.push((date, entry.info[1].clone()));
            }
        }

        let info: Vec<String> = entry.info.iter().map(|s| clean_text(s)).collect();
        queries::insert_reservation_edit_log(conn, v.id, &ts, &entry.responsible, &info)?;
    }
    Ok(rejection_reasons)
}

/// Match `Booking occurrence of the 2 Jul 2014 rejected` messages.
fn extract_occurrence_rejection(message: &str) -> Option<NaiveDate> {
    let rest = message.strip_prefix("Booking occurrence of the ")?;
    let date_part = rest.split(" rejected").next()?;
    NaiveDate::parse_from_str(date_part.trim(), "%d %b %Y").ok()
}

fn parse_date_list(values: &[String]) -> Vec<NaiveDate> {
    values
        .iter()
        .filter_map(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
        .collect()
}

/// Expand a reservation into its occurrence series.
///
/// `start`/`end` delimit the whole series; each occurrence runs from the
/// start time to the end time on its day.
fn occurrence_series(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    frequency: RepeatFrequency,
    interval: i64,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    if frequency == RepeatFrequency::Never || end < start {
        return vec![(start, end.max(start))];
    }

    let start_time = start.time();
    let end_time = end.time();
    let last_date = end.date_naive();
    let mut occurrences = Vec::new();
    let mut date = start.date_naive();

    while date <= last_date && occurrences.len() < MAX_OCCURRENCES {
        let occ_start = Utc.from_utc_datetime(&date.and_time(start_time));
        let occ_end = Utc.from_utc_datetime(&date.and_time(end_time));
        occurrences.push((occ_start, occ_end));

        date = match frequency {
            RepeatFrequency::Day => date + Duration::days(interval.max(1)),
            RepeatFrequency::Week => date + Duration::weeks(interval.max(1)),
            RepeatFrequency::Month => {
                // same day each month; months without it are skipped
                let mut next = date;
                loop {
                    let (year, month) = if next.month() == 12 {
                        (next.year() + 1, 1)
                    } else {
                        (next.year(), next.month() + 1)
                    };
                    match NaiveDate::from_ymd_opt(year, month, date.day()) {
                        Some(d) => break d,
                        None => {
                            next = match NaiveDate::from_ymd_opt(year, month, 1) {
                                Some(d) => d,
                                None => return occurrences,
                            };
                        }
                    }
                }
            }
            RepeatFrequency::Never => unreachable!(),
        };
    }
    occurrences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::steps::testutil::{run_step, test_config_simple};
    use crate::store::objects::{LegacyConference, LegacyHistoryEntry, RoomBookingSnapshot};

    fn setup() -> (Database, MigrationContext) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let conn = db.conn();
        conn.execute(
            "INSERT INTO users (id, first_name, last_name, email) VALUES (1, 'O', 'W', 'o@w.cc')",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO locations (id, name) VALUES (1, 'Main Site')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO rooms (id, location_id, name, owner_id) VALUES (97, 1, '28-1-025', 1)",
            [],
        )
        .unwrap();
        drop(conn);

        let mut ctx = MigrationContext::default();
        ctx.avatar_user_map.insert("1".into(), 1);
        ctx.migrated_rooms.insert(97);
        (db, ctx)
    }

    fn reservation(id: i64, room_id: i64) -> LegacyReservation {
        LegacyReservation {
            id,
            room_id,
            created_at: "2014-06-30T08:00:00+00:00".into(),
            start: "2014-07-01T09:00:00+00:00".into(),
            end: "2014-07-01T11:00:00+00:00".into(),
            booked_for_id: Some("1".into()),
            booked_for_name: "O W".into(),
            created_by: Some("1".into()),
            is_confirmed: true,
            reason: "sync".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_booking() {
        let (db, mut ctx) = setup();
        let mut rb = RoomBookingSnapshot::default();
        rb.reservations.insert("5".into(), reservation(5, 97));
        let config = test_config_simple();
        run_step(
            &RoomBookingsStep,
            &config,
            &db,
            &MainSnapshot::default(),
            Some(&rb),
            &mut ctx,
        )
        .unwrap();

        let conn = db.conn();
        assert_eq!(queries::count_rows(&conn, "reservations").unwrap(), 1);
        assert_eq!(
            queries::count_rows(&conn, "reservation_occurrences").unwrap(),
            1
        );
    }

    #[test]
    fn test_dead_room_skipped() {
        let (db, mut ctx) = setup();
        let mut rb = RoomBookingSnapshot::default();
        rb.reservations.insert("5".into(), reservation(5, 404));
        let config = test_config_simple();
        run_step(
            &RoomBookingsStep,
            &config,
            &db,
            &MainSnapshot::default(),
            Some(&rb),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(queries::count_rows(&db.conn(), "reservations").unwrap(), 0);
    }

    #[test]
    fn test_weekly_series_with_exclusions() {
        let (db, mut ctx) = setup();
        let mut rb = RoomBookingSnapshot::default();
        let mut resv = reservation(5, 97);
        resv.repeatability = Some(1); // weekly
        resv.end = "2014-07-22T11:00:00+00:00".into();
        resv.excluded_days = vec!["2014-07-08".into()];
        resv.notifications_sent = vec!["2014-07-01".into()];
        rb.reservations.insert("5".into(), resv);
        let config = test_config_simple();
        run_step(
            &RoomBookingsStep,
            &config,
            &db,
            &MainSnapshot::default(),
            Some(&rb),
            &mut ctx,
        )
        .unwrap();

        let conn = db.conn();
        // Jul 1, 8, 15, 22
        assert_eq!(
            queries::count_rows(&conn, "reservation_occurrences").unwrap(),
            4
        );
        let cancelled: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM reservation_occurrences WHERE is_cancelled = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(cancelled, 1);
        let notified: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM reservation_occurrences WHERE notification_sent = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(notified, 1);
    }

    #[test]
    fn test_event_link_validation() {
        let (db, mut ctx) = setup();
        ctx.event_map.insert("17".into(), 17);
        let mut main = MainSnapshot::default();
        main.conferences.insert(
            "17".into(),
            LegacyConference {
                id: "17".into(),
                booking_ids: vec![5],
                ..Default::default()
            },
        );

        let mut rb = RoomBookingSnapshot::default();
        let mut linked = reservation(5, 97);
        linked.event_id = Some("17".into());
        rb.reservations.insert("5".into(), linked);
        let mut unrelated = reservation(6, 97);
        unrelated.event_id = Some("17".into()); // event doesn't list booking 6
        rb.reservations.insert("6".into(), unrelated);

        let config = test_config_simple();
        run_step(&RoomBookingsStep, &config, &db, &main, Some(&rb), &mut ctx).unwrap();

        let conn = db.conn();
        let linked_event: Option<i64> = conn
            .query_row("SELECT event_id FROM reservations WHERE id = 5", [], |r| r.get(0))
            .unwrap();
        assert_eq!(linked_event, Some(17));
        let unlinked_event: Option<i64> = conn
            .query_row("SELECT event_id FROM reservations WHERE id = 6", [], |r| r.get(0))
            .unwrap();
        assert_eq!(unlinked_event, None);
    }

    #[test]
    fn test_edit_log_rejection_recovery() {
        let (db, mut ctx) = setup();
        let mut rb = RoomBookingSnapshot::default();
        let mut resv = reservation(5, 97);
        resv.repeatability = Some(0); // daily
        resv.end = "2014-07-03T11:00:00+00:00".into();
        resv.history = vec![LegacyHistoryEntry {
            timestamp: "02 Jul 2014 14:00".into(),
            responsible: "admin".into(),
            info: vec![
                "Rejected".into(),
                "Booking occurrence of the 2 Jul 2014 rejected".into(),
            ],
        }];
        rb.reservations.insert("5".into(), resv);
        let config = test_config_simple();
        run_step(
            &RoomBookingsStep,
            &config,
            &db,
            &MainSnapshot::default(),
            Some(&rb),
            &mut ctx,
        )
        .unwrap();

        let conn = db.conn();
        assert_eq!(queries::count_rows(&conn, "reservation_edit_logs").unwrap(), 1);
        let reason: Option<String> = conn
            .query_row(
                "SELECT rejection_reason FROM reservation_occurrences
                 WHERE start_at LIKE '2014-07-02%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(reason.unwrap().contains("rejected"));
    }

    #[test]
    fn test_occurrence_series_monthly() {
        let start = Utc.with_ymd_and_hms(2014, 1, 31, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2014, 5, 31, 11, 0, 0).unwrap();
        let series = occurrence_series(start, end, RepeatFrequency::Month, 1);
        // Jan, Mar, May — February and April have no 31st
        assert_eq!(series.len(), 3);
        assert_eq!(series[1].0.date_naive().month(), 3);
    }
}
