//! Top-level migration steps.
//!
//! Each step is one resumable unit of work: it reads from the snapshots,
//! writes rows inside transactions, and records its progress in the shared
//! context. The engine runs them strictly in the order returned by
//! [`all_steps`].

pub mod attachments;
pub mod categories;
pub mod events;
pub mod global_post;
pub mod global_pre;
pub mod room_bookings;
pub mod rooms_locations;
pub mod users_groups;

use crate::config::MigrationConfig;
use crate::context::MigrationContext;
use crate::db::Database;
use crate::errors::MigrationError;
use crate::report::Reporter;
use crate::store::{MainSnapshot, RoomBookingSnapshot};

/// Everything a step needs to do its work.
pub struct StepEnv<'a> {
    pub config: &'a MigrationConfig,
    pub db: &'a Database,
    pub snapshot: &'a MainSnapshot,
    pub rb_snapshot: Option<&'a RoomBookingSnapshot>,
    pub ctx: &'a mut MigrationContext,
    pub reporter: &'a Reporter,
}

/// A top-level migration step.
pub trait MigrationStep {
    /// Stable name, used for checkpointing and the run summary.
    fn name(&self) -> &'static str;

    /// A reason to skip this step entirely, if any (e.g. the room-booking
    /// snapshot was not provided).
    fn skip_reason(&self, _env: &StepEnv<'_>) -> Option<String> {
        None
    }

    /// Execute the step.
    fn run(&self, env: &mut StepEnv<'_>) -> Result<(), MigrationError>;
}

/// The full pipeline, in execution order.
pub fn all_steps() -> Vec<Box<dyn MigrationStep>> {
    vec![
        Box::new(global_pre::GlobalPreStep),
        Box::new(users_groups::UsersGroupsStep),
        Box::new(rooms_locations::RoomsLocationsStep),
        Box::new(categories::CategoriesStep),
        Box::new(events::EventsStep),
        Box::new(room_bookings::RoomBookingsStep),
        Box::new(global_post::GlobalPostStep),
    ]
}
