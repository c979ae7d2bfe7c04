//! Legacy object-graph types.
//!
//! These structs mirror the JSON export of the legacy object database.
//! Almost every field is defaulted: historical records are missing fields,
//! carry empty strings where ids are expected, and generally cannot be
//! trusted. Cleanup happens in the transform steps, not here.

use std::collections::BTreeMap;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Main snapshot
// ---------------------------------------------------------------------------

/// The main object-graph snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MainSnapshot {
    #[serde(default)]
    pub info: ServerInfo,

    #[serde(default)]
    pub counters: Counters,

    /// Legacy users, keyed by avatar id.
    #[serde(default)]
    pub avatars: BTreeMap<String, LegacyAvatar>,

    /// Legacy local groups, keyed by group id.
    #[serde(default)]
    pub groups: BTreeMap<String, LegacyGroup>,

    /// Avatar ids with administrator rights.
    #[serde(default)]
    pub admins: Vec<String>,

    /// Legacy network domains.
    #[serde(default)]
    pub domains: Vec<LegacyDomain>,

    #[serde(default)]
    pub news: NewsModule,

    #[serde(default)]
    pub payment: PaymentModule,

    #[serde(default)]
    pub upcoming: UpcomingModule,

    /// The root of the category tree (id "0").
    #[serde(default)]
    pub root_category: LegacyCategory,

    /// Legacy events, keyed by conference id.
    #[serde(default)]
    pub conferences: BTreeMap<String, LegacyConference>,

    /// Web-factory registry: conference id -> `simple_event` / `meeting`.
    #[serde(default)]
    pub wf_registry: BTreeMap<String, String>,

    /// Room-booking locations (the room data itself lives in the secondary
    /// snapshot).
    #[serde(default)]
    pub locations: Vec<LegacyLocation>,

    /// Name of the default room-booking location.
    #[serde(default)]
    pub default_location: String,
}

impl MainSnapshot {
    /// The server timezone, defaulting to UTC like the original system.
    pub fn server_timezone(&self) -> &str {
        if self.info.timezone.is_empty() {
            "UTC"
        } else {
            &self.info.timezone
        }
    }

    /// The server default language.
    pub fn server_language(&self) -> &str {
        if self.info.lang.is_empty() {
            "en_GB"
        } else {
            &self.info.lang
        }
    }
}

/// Global server settings from the legacy store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub organisation: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub news_active: bool,
    #[serde(default)]
    pub notify_account_creation: bool,
    #[serde(default)]
    pub network_disclaimer: String,
    #[serde(default)]
    pub restricted_disclaimer: String,
    /// Truncated IP prefixes with full attachment access.
    #[serde(default)]
    pub full_access_ips: Vec<String>,
}

/// Legacy HTTP-API settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiSettings {
    #[serde(default)]
    pub require_https: bool,
    #[serde(default)]
    pub allow_persistent: bool,
    #[serde(default)]
    pub security_mode: i64,
    #[serde(default)]
    pub cache_ttl: i64,
    #[serde(default)]
    pub signature_ttl: i64,
}

/// Id counters carried over from the legacy store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Counters {
    #[serde(default)]
    pub category: i64,
    #[serde(default)]
    pub event: i64,
}

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

/// A legacy principal reference inside an ACL.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LegacyPrincipal {
    /// A legacy user.
    Avatar {
        id: String,
        #[serde(default)]
        email: String,
    },
    /// A legacy local group.
    Group { id: String },
    /// A group managed by an external directory service.
    MultipassGroup { name: String },
}

/// Legacy access-controller data attached to protectable objects.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyAccess {
    /// -1 public, 0 inheriting, 1 protected.
    #[serde(default)]
    pub protection: i64,
    #[serde(default)]
    pub allowed: Vec<LegacyPrincipal>,
    #[serde(default)]
    pub managers: Vec<LegacyPrincipal>,
    #[serde(default)]
    pub contact_info: String,
    /// Domain names required for access when public.
    #[serde(default)]
    pub required_domains: Vec<String>,
    #[serde(default)]
    pub hide_from_unauthorized: bool,
}

// ---------------------------------------------------------------------------
// Users & groups
// ---------------------------------------------------------------------------

/// A legacy user record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyAvatar {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub secondary_emails: Vec<String>,
    #[serde(default)]
    pub organisation: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub telephone: String,
    /// `activated`, `disabled` or `Not confirmed`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub lang: String,
    /// `MyTimezone` forces the user's own timezone everywhere.
    #[serde(default)]
    pub display_tz_mode: String,
    #[serde(default)]
    pub show_past_events: bool,
    /// Profile fields unlocked from directory sync (legacy field names).
    #[serde(default)]
    pub unlocked_fields: Vec<String>,
    /// Avatar id this record was merged into, if any.
    #[serde(default)]
    pub merged_into: Option<String>,
    /// Avatar ids that were merged into this record.
    #[serde(default)]
    pub merged_from: Vec<String>,
    #[serde(default)]
    pub identities: Vec<LegacyIdentity>,
    #[serde(default)]
    pub api_key: Option<LegacyApiKey>,
    #[serde(default)]
    pub favorite_users: Vec<String>,
    #[serde(default)]
    pub favorite_categories: Vec<String>,
    /// Whether the record has any object links (kept it alive historically).
    #[serde(default)]
    pub has_links: bool,
}

/// A legacy login identity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyIdentity {
    /// `local` or `ldap`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub login: String,
    /// bcrypt hash, when the record was already hashed.
    #[serde(default)]
    pub password_hash: Option<String>,
    /// Plaintext password on ancient records.
    #[serde(default)]
    pub password: Option<String>,
}

/// A legacy HTTP-API key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyApiKey {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub persistent_allowed: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_used_at: Option<String>,
    #[serde(default)]
    pub last_used_ip: Option<String>,
    #[serde(default)]
    pub last_path: Option<String>,
    #[serde(default)]
    pub last_query: Option<String>,
    #[serde(default)]
    pub last_used_auth: bool,
    #[serde(default)]
    pub use_count: i64,
    /// Rotated-out tokens; secrets were never kept for these.
    #[serde(default)]
    pub old_keys: Vec<String>,
}

/// A legacy local group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyGroup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Avatar ids of the members.
    #[serde(default)]
    pub members: Vec<String>,
}

/// A legacy network domain (IP-prefix based access group).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyDomain {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Truncated IP prefixes, e.g. `128.141` or `2001:1458`.
    #[serde(default)]
    pub filters: Vec<String>,
}

// ---------------------------------------------------------------------------
// News, payment, upcoming events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewsModule {
    #[serde(default)]
    pub recent_days: i64,
    #[serde(default)]
    pub items: Vec<LegacyNewsItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyNewsItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentModule {
    #[serde(default)]
    pub currencies: Vec<LegacyCurrency>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyCurrency {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpcomingModule {
    #[serde(default)]
    pub max_entries: i64,
    #[serde(default)]
    pub entries: Vec<LegacyUpcomingEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyUpcomingEntry {
    /// `category` or `event`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub days: i64,
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// A legacy category (recursive tree).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyCategory {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Position among siblings.
    #[serde(default)]
    pub order: i64,
    /// 999 (and some historic values >900) mean unlimited.
    #[serde(default = "default_visibility")]
    pub visibility: i64,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub event_creation_restricted: bool,
    /// Free-form e-mail list notified on event creation.
    #[serde(default)]
    pub notify_creation_emails: String,
    #[serde(default)]
    pub suggestions_disabled: bool,
    #[serde(default)]
    pub icon: Option<LegacyResource>,
    #[serde(default)]
    pub access: LegacyAccess,
    /// Principals allowed to create events here.
    #[serde(default)]
    pub creators: Vec<LegacyPrincipal>,
    #[serde(default)]
    pub materials: Vec<LegacyMaterial>,
    #[serde(default)]
    pub subcategories: Vec<LegacyCategory>,
}

fn default_visibility() -> i64 {
    999
}

// ---------------------------------------------------------------------------
// Attachments (materials & resources)
// ---------------------------------------------------------------------------

/// A legacy material: a titled folder of resources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyMaterial {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub access: LegacyAccess,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub resources: Vec<LegacyResource>,
}

/// A legacy resource: an archived file or an external link.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LegacyResource {
    File {
        #[serde(default)]
        name: String,
        #[serde(default)]
        description: String,
        /// Path relative to the archive dir, as recorded by the legacy
        /// repository. May not match what is on disk byte-for-byte.
        #[serde(default)]
        repo_path: String,
        #[serde(default)]
        access: LegacyAccess,
    },
    Link {
        #[serde(default)]
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        url: String,
        #[serde(default)]
        access: LegacyAccess,
    },
}

impl Default for LegacyResource {
    fn default() -> Self {
        Self::File {
            name: String::new(),
            description: String::new(),
            repo_path: String::new(),
            access: LegacyAccess::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conferences (legacy events)
// ---------------------------------------------------------------------------

/// A legacy event record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyConference {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default)]
    pub closed: bool,
    /// Category id owning this event. Broken events have none.
    #[serde(default)]
    pub owner_category: Option<String>,
    /// Avatar id of the creator, when known.
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub access: LegacyAccess,
    #[serde(default)]
    pub contact: ConferenceContact,
    #[serde(default)]
    pub organizer_info: String,
    #[serde(default)]
    pub additional_info: String,
    /// Report numbers keyed by reference-type name.
    #[serde(default)]
    pub report_numbers: BTreeMap<String, Vec<String>>,
    /// HTML minutes, migrated into event notes.
    #[serde(default)]
    pub minutes_html: Option<String>,
    #[serde(default)]
    pub materials: Vec<LegacyMaterial>,
    /// Reservation ids this event claims to own.
    #[serde(default)]
    pub booking_ids: Vec<i64>,
}

/// Legacy support-contact block of a conference.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConferenceContact {
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub telephone: String,
}

// ---------------------------------------------------------------------------
// Room booking
// ---------------------------------------------------------------------------

/// A room-booking location from the main snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyLocation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aspects: Vec<LegacyAspect>,
}

/// A map viewport ("aspect") of a location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyAspect {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub center_latitude: f64,
    #[serde(default)]
    pub center_longitude: f64,
    #[serde(default)]
    pub zoom_level: i64,
    #[serde(default)]
    pub default_on_startup: bool,
}

/// The room-booking snapshot (secondary store).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomBookingSnapshot {
    /// Custom attribute definitions per location name.
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, Vec<LegacyCustomAttribute>>,

    /// Rooms keyed by numeric room id.
    #[serde(default)]
    pub rooms: BTreeMap<String, LegacyRoom>,

    /// Blockings keyed by blocking id.
    #[serde(default)]
    pub blockings: BTreeMap<String, LegacyBlocking>,

    /// Reservations keyed by reservation id.
    #[serde(default)]
    pub reservations: BTreeMap<String, LegacyReservation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyCustomAttribute {
    #[serde(default)]
    pub name: String,
    /// Only `str` attributes ever existed in practice.
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hidden: bool,
}

/// A legacy room record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyRoom {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub division: String,
    #[serde(default)]
    pub building: String,
    #[serde(default)]
    pub floor: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub surface_area: Option<i64>,
    /// Coordinates were free-text fields in the legacy UI.
    #[serde(default)]
    pub latitude: String,
    #[serde(default)]
    pub longitude: String,
    #[serde(default)]
    pub telephone: String,
    #[serde(default)]
    pub where_is_key: String,
    #[serde(default)]
    pub comments: String,
    /// Avatar id of the responsible person.
    #[serde(default)]
    pub responsible_id: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_reservable: bool,
    #[serde(default)]
    pub reservations_need_confirmation: bool,
    #[serde(default)]
    pub start_notification: bool,
    #[serde(default)]
    pub start_notification_before: Option<i64>,
    #[serde(default)]
    pub notification_to_responsible: bool,
    #[serde(default)]
    pub notification_assistance: bool,
    #[serde(default)]
    pub max_advance_days: Option<i64>,
    /// Backtick-delimited equipment list, a legacy storage quirk.
    #[serde(default)]
    pub equipment: String,
    #[serde(default)]
    pub available_vc: Vec<String>,
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub bookable_periods: Vec<LegacyBookablePeriod>,
    #[serde(default)]
    pub nonbookable_dates: Vec<LegacyNonBookablePeriod>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyBookablePeriod {
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyNonBookablePeriod {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

/// A legacy room blocking.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyBlocking {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub blocked_rooms: Vec<LegacyBlockedRoom>,
    #[serde(default)]
    pub allowed: Vec<LegacyPrincipal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyBlockedRoom {
    /// `<location>|<room id>` GUID format.
    #[serde(default)]
    pub room_guid: String,
    /// `None` pending, `true` accepted, `false` rejected.
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub rejected_by: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl LegacyBlockedRoom {
    /// Extract the numeric room id from the GUID.
    pub fn room_id(&self) -> Option<i64> {
        self.room_guid
            .split('|')
            .nth(1)
            .and_then(|s| s.trim().parse().ok())
    }
}

/// A legacy reservation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyReservation {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub room_id: i64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default)]
    pub booked_for_id: Option<String>,
    #[serde(default)]
    pub booked_for_name: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub is_confirmed: bool,
    #[serde(default)]
    pub is_rejected: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    /// Legacy repeatability code; absent means a single booking.
    #[serde(default)]
    pub repeatability: Option<i64>,
    #[serde(default)]
    pub uses_vc: bool,
    #[serde(default)]
    pub needs_vc_assistance: bool,
    #[serde(default)]
    pub needs_assistance: bool,
    #[serde(default)]
    pub vc_equipment: Vec<String>,
    #[serde(default)]
    pub history: Vec<LegacyHistoryEntry>,
    /// Occurrence dates (YYYY-MM-DD) whose notification was sent.
    #[serde(default)]
    pub notifications_sent: Vec<String>,
    /// Occurrence dates excluded from the series.
    #[serde(default)]
    pub excluded_days: Vec<String>,
    /// Event id this reservation claims to belong to.
    #[serde(default)]
    pub event_id: Option<String>,
}

/// A legacy reservation edit-log entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyHistoryEntry {
    /// `02 Jul 2014 14:00` format, French month names on ancient entries.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub responsible: String,
    #[serde(default)]
    pub info: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_snapshot_parses() {
        let snapshot: MainSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot.server_timezone(), "UTC");
        assert!(snapshot.avatars.is_empty());
    }

    #[test]
    fn test_avatar_defaults() {
        let avatar: LegacyAvatar = serde_json::from_str(
            r#"{"id": "42", "name": "Ada", "surname": "Lovelace", "email": "ada@example.com"}"#,
        )
        .unwrap();
        assert_eq!(avatar.id, "42");
        assert!(avatar.merged_into.is_none());
        assert!(avatar.identities.is_empty());
        assert_eq!(avatar.status, "");
    }

    #[test]
    fn test_principal_tagging() {
        let p: LegacyPrincipal =
            serde_json::from_str(r#"{"kind": "avatar", "id": "7"}"#).unwrap();
        assert!(matches!(p, LegacyPrincipal::Avatar { ref id, .. } if id == "7"));

        let p: LegacyPrincipal =
            serde_json::from_str(r#"{"kind": "multipass_group", "name": "it-dep"}"#).unwrap();
        assert!(matches!(p, LegacyPrincipal::MultipassGroup { ref name } if name == "it-dep"));
    }

    #[test]
    fn test_resource_tagging() {
        let r: LegacyResource = serde_json::from_str(
            r#"{"kind": "file", "name": "slides.pdf", "repo_path": "2014/c1/slides.pdf"}"#,
        )
        .unwrap();
        assert!(matches!(r, LegacyResource::File { .. }));

        let r: LegacyResource =
            serde_json::from_str(r#"{"kind": "link", "name": "webcast", "url": "https://x"}"#)
                .unwrap();
        assert!(matches!(r, LegacyResource::Link { .. }));
    }

    #[test]
    fn test_blocked_room_guid() {
        let br = LegacyBlockedRoom {
            room_guid: "Main Site|97 ".into(),
            ..Default::default()
        };
        assert_eq!(br.room_id(), Some(97));

        let br = LegacyBlockedRoom {
            room_guid: "garbage".into(),
            ..Default::default()
        };
        assert_eq!(br.room_id(), None);
    }
}
