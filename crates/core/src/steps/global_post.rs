//! Final fixups after all object data has been migrated.
//!
//! Re-points the upcoming-events module at migrated ids and runs the last
//! sequence adjustment over every table whose legacy ids were preserved.

use serde_json::json;

use crate::db::queries;
use crate::errors::MigrationError;
use crate::steps::{MigrationStep, StepEnv};

pub struct GlobalPostStep;

impl MigrationStep for GlobalPostStep {
    fn name(&self) -> &'static str {
        "global-post"
    }

    fn run(&self, env: &mut StepEnv<'_>) -> Result<(), MigrationError> {
        let db = env.db;
        let snapshot = env.snapshot;
        let base = env.reporter;
        let ctx = &*env.ctx;
        let reporter = base.for_step("global-post");

        base.step("Upcoming event settings");
        db.transaction(|conn| {
            let upcoming = &snapshot.upcoming;
            queries::set_setting(conn, "upcoming", "max_entries", &json!(upcoming.max_entries))?;

            let mut entries = Vec::new();
            for entry in &upcoming.entries {
                let mapped = match entry.kind.as_str() {
                    "category" => ctx.category_map.get(&entry.id),
                    "event" => ctx.event_map.get(&entry.id),
                    _ => None,
                };
                match mapped {
                    Some(&id) => entries.push(json!({
                        "weight": entry.weight,
                        "days": entry.days,
                        "type": entry.kind,
                        "id": id,
                    })),
                    None => {
                        reporter.warning(&format!(
                            "invalid id for upcoming events: {} (category: {})",
                            entry.id,
                            entry.kind == "category"
                        ));
                    }
                }
            }
            queries::set_setting(conn, "upcoming", "entries", &json!(entries))?;
            Ok(())
        })?;

        // legacy ids were preserved all over; make sure AUTOINCREMENT
        // continues past them everywhere
        db.fix_sequences(&[
            "users",
            "groups",
            "categories",
            "events",
            "rooms",
            "blockings",
            "reservations",
        ])?;
        reporter.success_always("sequences adjusted");
        Ok(())
    }
}
