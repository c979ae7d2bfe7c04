//! confmigrate command-line tool.
//!
//! Migrates a legacy conference-management object database (a JSON
//! object-graph snapshot) into a normalized relational schema, plus the
//! referenced binary files into a configured storage backend.
//!
//! Both the target database URI and the snapshot URI are required; a second
//! snapshot URI covers the room-booking subsystem. A full log of the run is
//! written to `migration.log` in the working directory.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use console::style;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use confmigrate_core::engine::{MigrationEngine, RunSummary, StepStatus};
use confmigrate_core::MigrationConfig;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Migrate a legacy conference-management database to the new schema.
///
/// You always need to specify both the target database URI and the legacy
/// snapshot URI (both file:// and plain paths work; http(s):// is accepted
/// for snapshots served over the network).
#[derive(Parser, Debug)]
#[command(name = "confmigrate", version, about)]
struct Args {
    /// Target relational database URI (sqlite://<path> or a plain path).
    db_uri: String,

    /// Legacy object-store snapshot URI.
    store_uri: String,

    /// Snapshot URI for the room booking database.
    #[arg(long)]
    rb_store_uri: Option<String>,

    /// Use verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Enable db query logging.
    #[arg(short = 'L', long)]
    dblog: bool,

    /// Provider name to use for existing LDAP identities.
    #[arg(long, default_value = "ldap")]
    ldap_provider_name: String,

    /// Name of the default group provider.
    #[arg(long, default_value = "ldap")]
    default_group_provider: String,

    /// Do not migrate existing local accounts.
    #[arg(long)]
    ignore_local_accounts: bool,

    /// The ID of the system user.
    #[arg(long)]
    system_user_id: Option<i64>,

    /// Fallback email in case of garbage.
    #[arg(long, required = true)]
    default_email: String,

    /// The base path where resources are stored. When used multiple times,
    /// the dirs are checked in order until a file is found.
    #[arg(long = "archive-dir", required = true)]
    archive_dirs: Vec<PathBuf>,

    /// The name of the storage backend used for attachments.
    #[arg(long, required = true)]
    storage_backend: String,

    /// Avoid checking files in storage unless absolutely necessary. This
    /// will migrate all files with size=0. When this option is specified,
    /// --archive-dir must be used exactly once.
    #[arg(long)]
    avoid_storage_check: bool,

    /// The name of the storage backend used for symlinks.
    #[arg(long)]
    symlink_backend: Option<String>,

    /// If set, any files with a non-UTF8 path will be symlinked in this
    /// location and store the path to the symlink instead. When this option
    /// is specified, --archive-dir must be used exactly once.
    #[arg(long)]
    symlink_target: Option<PathBuf>,

    /// Path to the folder containing room photos.
    #[arg(long)]
    photo_path: Option<PathBuf>,

    /// Reference types ("report numbers"). Can be used multiple times to
    /// specify multiple reference types.
    #[arg(long = "reference-type")]
    reference_types: Vec<String>,

    /// Currency unit to use by default.
    #[arg(long, required = true)]
    default_currency: String,

    /// Migrate broken events that have no category and would usually be
    /// skipped. They will be added to a new 'Lost & Found' top-level
    /// category which needs to be checked (and possibly deleted) manually.
    #[arg(long)]
    migrate_broken_events: bool,

    /// Print full error chains if there is an error.
    #[arg(long)]
    debug: bool,

    /// Save a restore point to the given file in case of failure.
    #[arg(long)]
    save_restore: Option<PathBuf>,

    /// Restore migration from a file (enables debug).
    #[arg(long)]
    restore_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> MigrationConfig {
        MigrationConfig {
            db_uri: self.db_uri,
            store_uri: self.store_uri,
            rb_store_uri: self.rb_store_uri,
            verbose: self.verbose,
            dblog: self.dblog,
            debug: self.debug || self.restore_file.is_some(),
            ldap_provider_name: self.ldap_provider_name,
            default_group_provider: self.default_group_provider,
            ignore_local_accounts: self.ignore_local_accounts,
            system_user_id: self.system_user_id,
            default_email: self.default_email,
            archive_dirs: self.archive_dirs,
            storage_backend: self.storage_backend,
            avoid_storage_check: self.avoid_storage_check,
            symlink_backend: self.symlink_backend,
            symlink_target: self.symlink_target,
            photo_path: self.photo_path,
            reference_types: self.reference_types,
            default_currency: self.default_currency,
            migrate_broken_events: self.migrate_broken_events,
            save_restore: self.save_restore,
            restore_file: self.restore_file,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let args = Args::parse();
    let config = args.into_config();

    // Console logging stays quiet (warnings and up, RUST_LOG overrides);
    // migration.log gets the full record like the old tool kept.
    let stderr_filter = if config.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let file_filter = if config.dblog {
        EnvFilter::new("info,confmigrate::db=trace")
    } else {
        EnvFilter::new("info")
    };
    let file_appender = tracing_appender::rolling::never(".", "migration.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .init();

    match run(config) {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {:#}", style("✗").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: MigrationConfig) -> anyhow::Result<RunSummary> {
    let debug = config.debug;
    let mut engine = MigrationEngine::new(config).context("failed to set up the migration")?;
    engine.run().map_err(|e| {
        if debug {
            tracing::error!(error = ?e, "migration failed");
        }
        anyhow::Error::from(e).context("migration failed")
    })
}

fn print_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Step", "Status", "Duration"]);
    for step in &summary.steps {
        let (status, duration) = match &step.status {
            StepStatus::Completed => (
                "completed".to_string(),
                format!("{:.2}s", step.duration.as_secs_f64()),
            ),
            StepStatus::AlreadyDone => ("already done".to_string(), "-".to_string()),
            StepStatus::Skipped(reason) => (format!("skipped: {}", reason), "-".to_string()),
        };
        table.add_row(vec![
            Cell::new(step.name),
            Cell::new(status),
            Cell::new(duration),
        ]);
    }
    println!("{}", table);
}
