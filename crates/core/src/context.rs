//! Shared migration namespace.
//!
//! Steps communicate exclusively through [`MigrationContext`]: legacy ids
//! mapped to new row ids, e-mail indexes used for collision repair, deferred
//! favorites, and the id counters carried over from the legacy store.
//! Everything in here is serializable so a failed run can dump it into a
//! restore point and resume later.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Mutable state shared by all migration steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationContext {
    /// Primary e-mail -> user id, for collision detection.
    #[serde(default)]
    pub users_by_primary_email: BTreeMap<String, i64>,

    /// Secondary e-mail -> user id.
    #[serde(default)]
    pub users_by_secondary_email: BTreeMap<String, i64>,

    /// Any e-mail -> user id (primary wins), built after the user step.
    #[serde(default)]
    pub users_by_email: BTreeMap<String, i64>,

    /// Legacy avatar id -> migrated user id. Merged avatars map to the
    /// surviving user.
    #[serde(default)]
    pub avatar_user_map: BTreeMap<String, i64>,

    /// Legacy group id -> migrated group id.
    #[serde(default)]
    pub group_map: BTreeMap<String, i64>,

    /// Legacy category id -> migrated category id.
    #[serde(default)]
    pub category_map: BTreeMap<String, i64>,

    /// Legacy conference id -> migrated event id.
    #[serde(default)]
    pub event_map: BTreeMap<String, i64>,

    /// Location name -> location id.
    #[serde(default)]
    pub venue_map: BTreeMap<String, i64>,

    /// Room ids that were actually migrated (dead rooms are skipped).
    #[serde(default)]
    pub migrated_rooms: BTreeSet<i64>,

    /// Lowercased reference-type name -> reference type id.
    #[serde(default)]
    pub reference_type_map: BTreeMap<String, i64>,

    /// Legacy category id -> user ids that had it as a favorite. Filled by
    /// the user step, consumed by the category step.
    #[serde(default)]
    pub pending_favorite_categories: BTreeMap<String, Vec<i64>>,

    /// The system user all orphaned authorship is attributed to.
    #[serde(default)]
    pub system_user_id: Option<i64>,

    /// The "Lost & Found" category, created on first use.
    #[serde(default)]
    pub lost_and_found_category: Option<i64>,

    /// Category id counter carried over from the legacy store.
    #[serde(default)]
    pub category_id_counter: i64,

    /// Event id counter carried over from the legacy store.
    #[serde(default)]
    pub event_id_counter: i64,
}

impl MigrationContext {
    /// Allocate a fresh category id for a legacy (non-numeric) id.
    pub fn gen_category_id(&mut self) -> i64 {
        self.category_id_counter += 1;
        self.category_id_counter
    }

    /// Allocate a fresh event id for a legacy (non-numeric) id.
    pub fn gen_event_id(&mut self) -> i64 {
        self.event_id_counter += 1;
        self.event_id_counter
    }

    /// The system user id. Only valid after the users step has run.
    pub fn require_system_user(&self) -> i64 {
        self.system_user_id
            .expect("system user must be created by the users step")
    }

    /// Look up a user id by any known e-mail, primary first.
    pub fn user_by_email(&self, email: &str) -> Option<i64> {
        self.users_by_primary_email
            .get(email)
            .or_else(|| self.users_by_secondary_email.get(email))
            .copied()
    }
}
