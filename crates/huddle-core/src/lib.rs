//! Huddle roster core.
//!
//! Participant list logic for a group call: row state, ordering, video
//! routing, raised-hand expiry and speaking-level animation.
//! Pure Rust crate with no platform dependencies; renderers subscribe
//! to [`RosterEvent`]s.

pub mod dispatch;
pub mod errors;
pub mod events;
pub mod expiry;
pub mod ordering;
pub mod participants;
pub mod registry;
pub mod roster;
pub mod routing;
pub mod row;
pub mod settings;
pub mod sounding;

pub use dispatch::{RosterHandle, spawn};
pub use errors::RosterError;
pub use events::{
    CallPermissions, EventEmitter, ParticipantUpdate, RosterEvent, RosterInput, RosterListener,
};
pub use participants::{Participant, ParticipantStore};
pub use roster::{Roster, RosterSnapshot, RowSnapshot};
pub use routing::VideoChange;
pub use row::{Row, RowState};
pub use settings::{LevelTiming, RosterSettings, SettingsStore};
