//! Migration options.
//!
//! Unlike a long-running service, a one-shot migration is configured entirely
//! from the command line; [`MigrationConfig`] is the validated form of those
//! arguments, shared by every step.

use std::path::PathBuf;

use tracing::debug;

use crate::errors::ConfigError;

/// All options controlling a migration run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Target relational database URI (`sqlite://<path>` or a plain path).
    pub db_uri: String,

    /// Legacy object-store snapshot URI (`file://`, plain path, `http(s)://`).
    pub store_uri: String,

    /// Optional snapshot URI for the room-booking subsystem.
    pub rb_store_uri: Option<String>,

    /// Use verbose output.
    pub verbose: bool,

    /// Enable db query logging.
    pub dblog: bool,

    /// Print full error chains on failure.
    pub debug: bool,

    /// Provider name to use for existing directory-service identities.
    pub ldap_provider_name: String,

    /// Name of the default group provider.
    pub default_group_provider: String,

    /// Do not migrate existing local accounts.
    pub ignore_local_accounts: bool,

    /// The ID of the system user. When unset, a fresh system user is created.
    pub system_user_id: Option<i64>,

    /// Fallback e-mail in case of garbage.
    pub default_email: String,

    /// Base paths where legacy resources are stored, checked in order.
    pub archive_dirs: Vec<PathBuf>,

    /// Name of the storage backend used for attachments.
    pub storage_backend: String,

    /// Avoid checking files in storage unless absolutely necessary.
    /// Migrates all files with size 0 and no checksum.
    pub avoid_storage_check: bool,

    /// Name of the storage backend used for symlinks.
    pub symlink_backend: Option<String>,

    /// Directory receiving symlinks for files with non-UTF8 paths.
    pub symlink_target: Option<PathBuf>,

    /// Folder containing room photos.
    pub photo_path: Option<PathBuf>,

    /// External-reference ("report number") type names.
    pub reference_types: Vec<String>,

    /// Currency unit to use by default.
    pub default_currency: String,

    /// Migrate broken events (no category) into a "Lost & Found" category
    /// instead of skipping them.
    pub migrate_broken_events: bool,

    /// Save a restore point to this file in case of failure.
    pub save_restore: Option<PathBuf>,

    /// Resume the migration from a previously saved restore point.
    pub restore_file: Option<PathBuf>,
}

impl MigrationConfig {
    /// Validate cross-option constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_email.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "--default-email".into(),
                detail: "fallback e-mail must not be empty".into(),
            });
        }
        if !crate::convert::is_valid_email(&self.default_email) {
            return Err(ConfigError::InvalidValue {
                field: "--default-email".into(),
                detail: format!("'{}' is not a valid e-mail address", self.default_email),
            });
        }
        if self.storage_backend.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "--storage-backend".into(),
                detail: "storage backend name must not be empty".into(),
            });
        }
        if self.default_currency.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "--default-currency".into(),
                detail: "currency must not be empty".into(),
            });
        }
        if self.archive_dirs.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "--archive-dir".into(),
                detail: "at least one archive dir is required".into(),
            });
        }
        // Skipping storage checks (or rewriting paths through symlinks) only
        // works against a single unambiguous archive dir.
        if (self.avoid_storage_check || self.symlink_target.is_some())
            && self.archive_dirs.len() != 1
        {
            return Err(ConfigError::InvalidValue {
                field: "--archive-dir".into(),
                detail: "exactly one archive dir is required with \
                         --avoid-storage-check or --symlink-target"
                    .into(),
            });
        }
        if self.symlink_target.is_some() != self.symlink_backend.is_some() {
            return Err(ConfigError::MutuallyRequired {
                a: "--symlink-target".into(),
                b: "--symlink-backend".into(),
            });
        }
        debug!("migration options validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_config() -> MigrationConfig {
        MigrationConfig {
            db_uri: "sqlite:///tmp/target.db".into(),
            store_uri: "file:///tmp/snapshot.json".into(),
            rb_store_uri: None,
            verbose: false,
            dblog: false,
            debug: false,
            ldap_provider_name: "ldap".into(),
            default_group_provider: "ldap".into(),
            ignore_local_accounts: false,
            system_user_id: None,
            default_email: "catchall@example.com".into(),
            archive_dirs: vec![PathBuf::from("/tmp/archive")],
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

    #[test]
    fn test_valid_config() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_default_email() {
        let mut config = sample_config();
        config.default_email = "garbage".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "--default-email"
        ));
    }

    #[test]
    fn test_avoid_storage_check_requires_single_archive_dir() {
        let mut config = sample_config();
        config.avoid_storage_check = true;
        config.archive_dirs = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        assert!(config.validate().is_err());

        config.archive_dirs = vec![PathBuf::from("/a")];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_symlink_options_must_pair() {
        let mut config = sample_config();
        config.symlink_target = Some(PathBuf::from("/tmp/symlinks"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MutuallyRequired { .. })
        ));

        config.symlink_backend = Some("legacy-symlinks".into());
        assert!(config.validate().is_ok());
    }
}
