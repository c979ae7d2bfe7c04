//! Domain model types for the target relational schema.
//!
//! These types bridge the migration steps and the database layer. Wide
//! tables get insert structs; narrow ones are written through plain
//! parameter lists in `db::queries`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protection & principals
// ---------------------------------------------------------------------------

/// Access protection of a migrated object.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionMode {
    Public,
    #[default]
    Inheriting,
    Protected,
}

impl ProtectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Inheriting => "inheriting",
            Self::Protected => "protected",
        }
    }

    /// Map a legacy access-protection level (-1 public, 0 inheriting,
    /// 1 protected). Objects that don't allow `public` get `inheriting`
    /// instead.
    pub fn from_legacy(level: i64, allow_public: bool) -> Option<Self> {
        match level {
            -1 => Some(if allow_public {
                Self::Public
            } else {
                Self::Inheriting
            }),
            0 => Some(Self::Inheriting),
            1 => Some(Self::Protected),
            _ => None,
        }
    }
}

/// A converted principal: a migrated user, a migrated local group, or a
/// group managed by an external provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Principal {
    User(i64),
    LocalGroup(i64),
    MultipassGroup {
        provider: String,
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Titles the target schema recognizes; anything else becomes empty.
pub const KNOWN_TITLES: &[&str] = &["Mr", "Ms", "Mrs", "Dr", "Prof", "Mx"];

/// A new `users` row.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub title: String,
    pub email: String,
    pub phone: String,
    pub affiliation: String,
    pub address: String,
    pub is_admin: bool,
    pub is_system: bool,
    pub is_blocked: bool,
    pub is_deleted: bool,
    pub merged_into_id: Option<i64>,
}

/// Normalize a legacy title against [`KNOWN_TITLES`] (the legacy store
/// uses trailing dots inconsistently).
pub fn normalize_title(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('.');
    KNOWN_TITLES
        .iter()
        .find(|t| t.eq_ignore_ascii_case(trimmed))
        .map(|t| t.to_string())
        .unwrap_or_default()
}

/// A new `api_keys` row.
#[derive(Debug, Clone, Default)]
pub struct NewApiKey {
    pub user_id: i64,
    pub token: String,
    pub secret: String,
    pub is_active: bool,
    pub is_blocked: bool,
    pub is_persistent_allowed: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub last_used_uri: Option<String>,
    pub last_used_auth: bool,
    pub use_count: i64,
}

// ---------------------------------------------------------------------------
// Categories & events
// ---------------------------------------------------------------------------

/// A new `categories` row.
#[derive(Debug, Clone, Default)]
pub struct NewCategory {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub position: i64,
    pub title: String,
    pub description: String,
    pub timezone: String,
    /// `None` means unlimited visibility.
    pub visibility: Option<i64>,
    pub event_creation_restricted: bool,
    pub protection_mode: ProtectionMode,
    pub no_access_contact: String,
    pub notify_emails: Vec<String>,
    pub suggestions_disabled: bool,
    pub icon: Option<CategoryIcon>,
}

/// Icon blob and metadata for a category.
#[derive(Debug, Clone)]
pub struct CategoryIcon {
    pub data: Vec<u8>,
    pub filename: String,
    pub content_type: String,
    pub checksum: String,
}

/// Kind of a migrated event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Conference,
    Lecture,
    Meeting,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conference => "conference",
            Self::Lecture => "lecture",
            Self::Meeting => "meeting",
        }
    }
}

/// A new `events` row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: i64,
    pub category_id: i64,
    pub title: String,
    pub description: String,
    pub timezone: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub kind: EventKind,
    pub is_locked: bool,
    pub is_deleted: bool,
    pub creator_id: i64,
    pub protection_mode: ProtectionMode,
    pub contact_title: String,
    pub contact_emails: Vec<String>,
    pub contact_phones: Vec<String>,
    pub organizer_info: String,
    pub additional_info: String,
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// What a migrated attachment folder hangs off.
#[derive(Debug, Clone, Copy)]
pub enum FolderLink {
    Category(i64),
    Event(i64),
}

/// Kind of a migrated attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    File,
    Link,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Link => "link",
        }
    }
}

/// Stored-file metadata recorded for a migrated file attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub backend: String,
    pub file_id: String,
    pub size: i64,
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// Rooms & reservations
// ---------------------------------------------------------------------------

/// A new `rooms` row.
#[derive(Debug, Clone, Default)]
pub struct NewRoom {
    pub id: i64,
    pub location_id: i64,
    pub name: String,
    pub site: String,
    pub division: String,
    pub building: String,
    pub floor: String,
    pub number: String,
    pub capacity: Option<i64>,
    pub surface_area: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub telephone: String,
    pub key_location: String,
    pub comments: String,
    pub owner_id: i64,
    pub is_active: bool,
    pub is_reservable: bool,
    pub reservations_need_confirmation: bool,
    pub notification_before_days: Option<i64>,
    pub notification_for_responsible: bool,
    pub notification_for_assistance: bool,
    pub max_advance_days: Option<i64>,
    pub large_photo: Option<Vec<u8>>,
    pub small_photo: Option<Vec<u8>>,
}

/// Repeat frequency of a reservation series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepeatFrequency {
    Never,
    Day,
    Week,
    Month,
}

impl RepeatFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// Convert a legacy repeatability code into `(frequency, interval)`.
///
/// Legacy codes: absent = single booking, 0 = daily, 1 = weekly,
/// 2 = every two weeks, 3 = every three weeks, 4 = monthly.
pub fn convert_legacy_repeatability(code: Option<i64>) -> Option<(RepeatFrequency, i64)> {
    match code {
        None => Some((RepeatFrequency::Never, 0)),
        Some(0) => Some((RepeatFrequency::Day, 1)),
        Some(1) => Some((RepeatFrequency::Week, 1)),
        Some(2) => Some((RepeatFrequency::Week, 2)),
        Some(3) => Some((RepeatFrequency::Week, 3)),
        Some(4) => Some((RepeatFrequency::Month, 1)),
        Some(_) => None,
    }
}

/// A new `reservations` row.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub id: i64,
    pub room_id: i64,
    pub event_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub booked_for_id: Option<i64>,
    pub booked_for_name: String,
    pub created_by_id: Option<i64>,
    pub is_accepted: bool,
    pub is_cancelled: bool,
    pub is_rejected: bool,
    pub booking_reason: String,
    pub rejection_reason: Option<String>,
    pub repeat_frequency: RepeatFrequency,
    pub repeat_interval: i64,
    pub uses_vc: bool,
    pub needs_vc_assistance: bool,
    pub needs_assistance: bool,
}

/// State of a room inside a blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedRoomState {
    Pending,
    Accepted,
    Rejected,
}

impl BlockedRoomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Legacy encoding: `None` pending, `Some(true)` accepted,
    /// `Some(false)` rejected.
    pub fn from_legacy(active: Option<bool>) -> Self {
        match active {
            None => Self::Pending,
            Some(true) => Self::Accepted,
            Some(false) => Self::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_mode_from_legacy() {
        assert_eq!(
            ProtectionMode::from_legacy(-1, true),
            Some(ProtectionMode::Public)
        );
        assert_eq!(
            ProtectionMode::from_legacy(-1, false),
            Some(ProtectionMode::Inheriting)
        );
        assert_eq!(
            ProtectionMode::from_legacy(0, true),
            Some(ProtectionMode::Inheriting)
        );
        assert_eq!(
            ProtectionMode::from_legacy(1, false),
            Some(ProtectionMode::Protected)
        );
        assert_eq!(ProtectionMode::from_legacy(7, true), None);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("Dr."), "Dr");
        assert_eq!(normalize_title("prof"), "Prof");
        assert_eq!(normalize_title("Grand Vizier"), "");
    }

    #[test]
    fn test_convert_legacy_repeatability() {
        assert_eq!(
            convert_legacy_repeatability(None),
            Some((RepeatFrequency::Never, 0))
        );
        assert_eq!(
            convert_legacy_repeatability(Some(0)),
            Some((RepeatFrequency::Day, 1))
        );
        assert_eq!(
            convert_legacy_repeatability(Some(2)),
            Some((RepeatFrequency::Week, 2))
        );
        assert_eq!(
            convert_legacy_repeatability(Some(4)),
            Some((RepeatFrequency::Month, 1))
        );
        assert_eq!(convert_legacy_repeatability(Some(9)), None);
    }

    #[test]
    fn test_blocked_room_state() {
        assert_eq!(BlockedRoomState::from_legacy(None), BlockedRoomState::Pending);
        assert_eq!(
            BlockedRoomState::from_legacy(Some(true)),
            BlockedRoomState::Accepted
        );
        assert_eq!(
            BlockedRoomState::from_legacy(Some(false)),
            BlockedRoomState::Rejected
        );
    }
}
