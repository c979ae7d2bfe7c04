//! Migration engine.
//!
//! Owns the snapshots, the target database, and the shared context; runs
//! the step pipeline in order, skipping steps already completed in a
//! restored run, and dumps a restore point on failure when configured.

use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::checkpoint::MigrationState;
use crate::config::MigrationConfig;
use crate::db::Database;
use crate::errors::CoreError;
use crate::report::Reporter;
use crate::steps::{all_steps, StepEnv};
use crate::store::{self, MainSnapshot, RoomBookingSnapshot};

/// Outcome of one step in the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    /// Completed in a previous run (restored from a checkpoint).
    AlreadyDone,
    /// Skipped because a precondition was not met.
    Skipped(String),
}

/// One row of the run summary.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: &'static str,
    pub status: StepStatus,
    pub duration: Duration,
}

/// Summary of a whole migration run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub steps: Vec<StepOutcome>,
}

/// The migration engine.
pub struct MigrationEngine {
    config: MigrationConfig,
    db: Database,
    snapshot: MainSnapshot,
    rb_snapshot: Option<RoomBookingSnapshot>,
    state: MigrationState,
    reporter: Reporter,
}

impl MigrationEngine {
    /// Open the snapshots and the target database, validate options, and
    /// load the restore point when resuming.
    ///
    /// A fresh (non-resumed) run requires an empty target database.
    pub fn new(config: MigrationConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let reporter = Reporter::new(config.verbose);

        reporter.success_always(&format!("Trying to open {}...", config.store_uri));
        let snapshot = store::open_snapshot(&config.store_uri)?;
        let rb_snapshot = match &config.rb_store_uri {
            Some(uri) => {
                reporter.success_always(&format!("Trying to open {}...", uri));
                Some(store::open_rb_snapshot(uri)?)
            }
            None => None,
        };

        let db = Database::open(&config.db_uri, config.dblog)?;
        db.initialize()?;

        let state = match &config.restore_file {
            Some(path) => {
                reporter.success_always(&format!("loading restore file {}", path.display()));
                MigrationState::load(path)?
            }
            None => {
                if db.has_data()? {
                    return Err(CoreError::Database(crate::errors::DatabaseError::NotEmpty));
                }
                MigrationState::default()
            }
        };

        Ok(Self {
            config,
            db,
            snapshot,
            rb_snapshot,
            state,
            reporter,
        })
    }

    /// Run the full pipeline.
    ///
    /// On step failure a restore point is saved (when `--save-restore` was
    /// given) before the error propagates.
    pub fn run(&mut self) -> Result<RunSummary, CoreError> {
        let mut summary = RunSummary::default();

        for step in all_steps() {
            if self.state.has_completed(step.name()) {
                self.reporter.success_always(&format!(
                    "Skipping previously-run step {}...",
                    step.name()
                ));
                summary.steps.push(StepOutcome {
                    name: step.name(),
                    status: StepStatus::AlreadyDone,
                    duration: Duration::ZERO,
                });
                continue;
            }

            let mut env = StepEnv {
                config: &self.config,
                db: &self.db,
                snapshot: &self.snapshot,
                rb_snapshot: self.rb_snapshot.as_ref(),
                ctx: &mut self.state.context,
                reporter: &self.reporter,
            };

            if let Some(reason) = step.skip_reason(&env) {
                self.reporter
                    .warning(&format!("Skipping step {}: {}", step.name(), reason));
                summary.steps.push(StepOutcome {
                    name: step.name(),
                    status: StepStatus::Skipped(reason),
                    duration: Duration::ZERO,
                });
                continue;
            }

            info!(step = step.name(), "running migration step");
            let started = Instant::now();
            match step.run(&mut env) {
                Ok(()) => {
                    let duration = started.elapsed();
                    self.reporter
                        .info(&format!("{:.6} seconds", duration.as_secs_f64()));
                    self.state.register(step.name());
                    summary.steps.push(StepOutcome {
                        name: step.name(),
                        status: StepStatus::Completed,
                        duration,
                    });
                }
                Err(e) => {
                    error!(step = step.name(), error = %e, "migration step failed");
                    self.save_restore_point();
                    return Err(e.into());
                }
            }
        }

        self.reporter.success_always("Migration finished!");
        Ok(summary)
    }

    /// Dump a restore point, if `--save-restore` was given.
    fn save_restore_point(&self) {
        let Some(path) = &self.config.save_restore else {
            return;
        };
        self.reporter.warning("Saving restore point...");
        match self.state.save(path) {
            Ok(()) => self.reporter.success_always("Restore point saved."),
            Err(e) => self.reporter.error(&format!("Could not save restore point: {}", e)),
        }
    }

    /// The target database (used by tests and post-run validation).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The migration state (used by tests and post-run validation).
    pub fn state(&self) -> &MigrationState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_snapshot(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn engine_config(dir: &std::path::Path, snapshot: &str) -> MigrationConfig {
        let snapshot_path = write_snapshot(dir, "snapshot.json", snapshot);
        MigrationConfig {
            db_uri: dir.join("target.db").display().to_string(),
            store_uri: snapshot_path.display().to_string(),
            rb_store_uri: None,
            verbose: false,
            dblog: false,
            debug: false,
            ldap_provider_name: "ldap".into(),
            default_group_provider: "ldap".into(),
            ignore_local_accounts: false,
            system_user_id: None,
            default_email: "catchall@example.com".into(),
            archive_dirs: vec![dir.to_path_buf()],
            storage_backend: "legacy-archive".into(),
            avoid_storage_check: false,
            symlink_backend: None,
            symlink_target: None,
            photo_path: None,
            reference_types: vec![],
            default_currency: "EUR".into(),
            migrate_broken_events: false,
            save_restore: None,
            restore_file: None,
        }
    }

    const MINIMAL: &str = r#"{
        "avatars": {
            "1": {"id": "1", "name": "Ada", "surname": "Lovelace",
                  "email": "ada@example.com", "status": "activated"}
        },
        "root_category": {"id": "0", "name": "Home"}
    }"#;

    #[test]
    fn test_minimal_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = engine_config(dir.path(), MINIMAL);
        let mut engine = MigrationEngine::new(config).unwrap();
        let summary = engine.run().unwrap();

        // room steps skipped without a secondary snapshot
        let skipped: Vec<_> = summary
            .steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Skipped(_)))
            .collect();
        assert_eq!(skipped.len(), 2);

        let conn = engine.db().conn();
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(users, 2); // ada + system user
        assert!(engine.state().has_completed("events"));
    }

    #[test]
    fn test_nonempty_database_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = engine_config(dir.path(), MINIMAL);
        {
            let db = Database::open(&config.db_uri, false).unwrap();
            db.initialize().unwrap();
            db.conn()
                .execute(
                    "INSERT INTO users (id, first_name, last_name, email)
                     VALUES (9, 'X', 'Y', 'x@y.cc')",
                    [],
                )
                .unwrap();
        }
        let result = MigrationEngine::new(config);
        assert!(matches!(
            result,
            Err(CoreError::Database(crate::errors::DatabaseError::NotEmpty))
        ));
    }

    #[test]
    fn test_restore_skips_completed_steps() {
        let dir = tempfile::tempdir().unwrap();

        // first run: everything completes; dump the state manually
        let config = engine_config(dir.path(), MINIMAL);
        let restore_path = dir.path().join("restore.json");
        let mut engine = MigrationEngine::new(config.clone()).unwrap();
        engine.run().unwrap();
        engine.state().save(&restore_path).unwrap();

        // second run resumes from the restore file; all steps are skipped,
        // so the non-empty database is fine
        let mut config2 = engine_config(dir.path(), MINIMAL);
        config2.db_uri = config.db_uri.clone();
        config2.restore_file = Some(restore_path);
        let mut engine2 = MigrationEngine::new(config2).unwrap();
        let summary = engine2.run().unwrap();
        assert!(summary
            .steps
            .iter()
            .all(|s| s.status != StepStatus::Completed));
    }
}
