use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::participants::Participant;
use crate::routing::VideoChange;

/// Structural changes emitted by the roster to the list, media and
/// rendering layers. The core never paints; it only reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RosterEvent {
    RowPrepended(String),
    RowAppended(String),
    RowRemoved(String),
    /// Full display order after a resort or partition.
    RowsReordered(Vec<String>),
    /// The row changed in place and needs a repaint.
    RowUpdated(String),
    VideoAttached { peer: String, endpoint: String },
    VideoDetached { peer: String, endpoint: String },
    RaisedHandStatusCleared(String),
}

impl From<VideoChange> for RosterEvent {
    fn from(change: VideoChange) -> Self {
        match change {
            VideoChange::Attached { peer, endpoint } => RosterEvent::VideoAttached { peer, endpoint },
            VideoChange::Detached { peer, endpoint } => RosterEvent::VideoDetached { peer, endpoint },
        }
    }
}

/// A participant change: `before` absent means the participant was added,
/// `after` absent means it was removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    #[serde(default)]
    pub before: Option<Participant>,
    #[serde(default)]
    pub after: Option<Participant>,
}

impl ParticipantUpdate {
    pub fn peer(&self) -> Option<&str> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(|p| p.peer.as_str())
    }
}

/// Inputs consumed by the roster, one at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RosterInput {
    Participant(ParticipantUpdate),
    Stream { endpoint: String, live: bool },
    Pin { endpoint: String },
    MenuOpened { peer: String },
    MenuClosed,
    Invite { peer: String },
    Rejoin { was: String, now: String },
    Level { ssrc: u32, level: f32 },
    AnimationsSuspended { suspended: bool },
}

/// Answers whether the viewer may reorder by raised hands and force mutes.
pub trait CallPermissions: Send + Sync {
    fn can_manage_call(&self) -> bool;
}

impl CallPermissions for AtomicBool {
    fn can_manage_call(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl CallPermissions for bool {
    fn can_manage_call(&self) -> bool {
        *self
    }
}

/// Trait for receiving events from the roster.
/// Implementations must be Send + Sync (called from the dispatch task).
pub trait RosterListener: Send + Sync {
    fn on_event(&self, event: RosterEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn RosterListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn RosterListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn emit(&self, event: RosterEvent) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
