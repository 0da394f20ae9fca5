use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use crate::events::{
    CallPermissions, EventEmitter, ParticipantUpdate, RosterEvent, RosterInput, RosterListener,
};
use crate::expiry::RaisedHandExpiry;
use crate::ordering::{self, OrderingEngine};
use crate::participants::{Participant, ParticipantStore};
use crate::registry::RowRegistry;
use crate::routing::{VideoChange, VideoRoutingEngine};
use crate::row::{Row, RowState};
use crate::settings::{LevelTiming, RosterSettings};
use crate::sounding::{SchedulerChange, SoundingScheduler};

/// Read-only copy of one row, for renderers and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSnapshot {
    pub peer: String,
    pub state: RowState,
    pub raised_hand_rating: u64,
    pub raised_hand_status: bool,
    pub speaking: bool,
    pub sounding: bool,
    pub volume: u32,
    pub video_endpoint: String,
    pub level: Option<f32>,
}

impl From<&Row> for RowSnapshot {
    fn from(row: &Row) -> Self {
        Self {
            peer: row.peer().to_string(),
            state: row.state(),
            raised_hand_rating: row.raised_hand_rating(),
            raised_hand_status: row.raised_hand_status(),
            speaking: row.speaking(),
            sounding: row.sounding(),
            volume: row.volume(),
            video_endpoint: row.video_endpoint().to_string(),
            level: row.level().map(|l| l.level()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterSnapshot {
    pub rows: Vec<RowSnapshot>,
    pub pinned_endpoint: String,
}

impl RosterSnapshot {
    pub fn order(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.peer.as_str()).collect()
    }
}

/// The live roster of a call.
///
/// Owns the rows and every engine deriving their order and video. All
/// mutation goes through `&mut self`, so a reader never sees a half-applied
/// event.
pub struct Roster {
    settings: RosterSettings,
    timing: LevelTiming,
    permissions: Arc<dyn CallPermissions>,
    emitter: EventEmitter,
    store: ParticipantStore,
    registry: RowRegistry,
    ordering: OrderingEngine,
    routing: VideoRoutingEngine,
    expiry: RaisedHandExpiry,
    sounding: SoundingScheduler,
}

impl Roster {
    pub fn new(settings: RosterSettings, permissions: Arc<dyn CallPermissions>) -> Self {
        let timing = settings.level_timing();
        Self {
            timing,
            permissions,
            emitter: EventEmitter::new(),
            store: ParticipantStore::new(),
            registry: RowRegistry::new(),
            ordering: OrderingEngine::new(),
            routing: VideoRoutingEngine::new(),
            expiry: RaisedHandExpiry::new(settings.raised_hand_status_duration()),
            sounding: SoundingScheduler::new(timing, settings.animations_disabled),
            settings,
        }
    }

    /// Register a listener for roster events.
    pub fn add_listener(&self, listener: Arc<dyn RosterListener>) {
        self.emitter.add_listener(listener);
    }

    pub fn settings(&self) -> &RosterSettings {
        &self.settings
    }

    pub fn registry(&self) -> &RowRegistry {
        &self.registry
    }

    pub fn participants(&self) -> &ParticipantStore {
        &self.store
    }

    pub fn video_routing(&self) -> &VideoRoutingEngine {
        &self.routing
    }

    pub fn ordering(&self) -> &OrderingEngine {
        &self.ordering
    }

    pub fn raised_hand_expiry(&self) -> &RaisedHandExpiry {
        &self.expiry
    }

    pub fn sounding(&self) -> &SoundingScheduler {
        &self.sounding
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            rows: self.registry.rows().iter().map(RowSnapshot::from).collect(),
            pinned_endpoint: self.routing.pinned().to_string(),
        }
    }

    pub fn handle_input(&mut self, input: RosterInput, now: Instant) {
        match input {
            RosterInput::Participant(update) => self.apply_update(update, now),
            RosterInput::Stream { endpoint, live } => self.set_stream_live(&endpoint, live),
            RosterInput::Pin { endpoint } => self.set_pinned(&endpoint),
            RosterInput::MenuOpened { peer } => self.menu_opened(&peer),
            RosterInput::MenuClosed => self.menu_closed(),
            RosterInput::Invite { peer } => {
                self.invite(&peer, now);
            }
            RosterInput::Rejoin { was, now: joined } => self.rejoin(&was, &joined, now),
            RosterInput::Level { ssrc, level } => self.level_update(ssrc, level, now),
            RosterInput::AnimationsSuspended { suspended } => {
                self.set_animations_suspended(suspended, now)
            }
        }
    }

    /// Build the rows for a freshly loaded (or reloaded) participant list.
    pub fn prepare(
        &mut self,
        local_peer: &str,
        participants: Vec<Participant>,
        invited: &[String],
        now: Instant,
    ) {
        self.store.set_local_peer(local_peer.to_string());
        self.store.replace_all(participants);

        let stale: Vec<String> = self
            .registry
            .rows()
            .iter()
            .filter(|row| {
                row.peer() != local_peer
                    && self.store.participant(row.peer()).is_none()
                    && !(row.state() == RowState::Invited
                        && invited.iter().any(|i| i.as_str() == row.peer()))
            })
            .map(|row| row.peer().to_string())
            .collect();
        for peer in &stale {
            self.remove_row(peer);
        }

        if !self.registry.contains(local_peer) {
            let local = self.store.participant(local_peer).cloned();
            self.append_row(local_peer, local.as_ref(), now);
        }
        let participants = self.store.participants().to_vec();
        for participant in &participants {
            if self.registry.contains(&participant.peer) {
                self.update_row(&participant.peer, Some(participant), now);
            } else {
                self.append_row(&participant.peer, Some(participant), now);
            }
        }
        for peer in invited {
            self.invite(peer, now);
        }
        tracing::info!(
            "roster prepared: {} rows, {} participants",
            self.registry.len(),
            participants.len()
        );
    }

    /// Forget every row and participant, e.g. after the call ended. The
    /// pinned endpoint and stream availability are dropped too.
    pub fn reset(&mut self) {
        for peer in self.registry.order() {
            self.emitter.emit(RosterEvent::RowRemoved(peer));
        }
        self.store.clear();
        self.registry.clear();
        self.routing.clear();
        self.expiry.clear();
        self.ordering = OrderingEngine::new();
        self.sounding = SoundingScheduler::new(self.timing, self.sounding.is_suspended());
        tracing::info!("roster reset");
    }

    /// Endpoints of the local user's own outgoing camera and screen.
    pub fn set_local_sharing_endpoints(&mut self, camera: String, screen: String) {
        self.store.set_local_sharing_endpoints(camera, screen);
    }

    /// Apply one participant change from the call state.
    pub fn apply_update(&mut self, update: ParticipantUpdate, now: Instant) {
        let Some(peer) = update.peer().map(str::to_string) else {
            tracing::warn!("ignoring participant update without before or after");
            return;
        };
        match update.after {
            None => {
                self.store.remove(&peer);
                if !self.registry.contains(&peer) {
                    return;
                }
                if self.store.is_local(&peer) {
                    self.update_row(&peer, None, now);
                } else {
                    self.remove_row(&peer);
                }
            }
            Some(after) => {
                self.store.upsert(after.clone());
                if update.before.is_some() && !self.registry.contains(&peer) {
                    tracing::debug!("update for {peer} without a row, ignoring");
                    return;
                }
                self.participant_changed(update.before.as_ref(), &after, now);
            }
        }
    }

    fn participant_changed(&mut self, was: Option<&Participant>, now_p: &Participant, now: Instant) {
        let peer = now_p.peer.as_str();
        let mut reorder_if_invited_before = 0;
        let mut check_position = false;
        let mut added_to_bottom = false;

        if let Some(index) = self.registry.index_of(peer) {
            let was_invited =
                self.registry.row_at(index).map(Row::state) == Some(RowState::Invited);
            if was_invited {
                reorder_if_invited_before = index;
            }
            self.update_row(peer, Some(now_p), now);
            if was_invited {
                // Streams that came up before the peer joined had no owner.
                let changes = self.routing.route_new_row(peer, &mut self.registry, &self.store);
                self.emit_video(changes);
            }
            let was_speaking = was.is_some_and(|w| w.speaking);
            let was_rating = was.map_or(0, |w| w.raised_hand_rating);
            let lost_self_unmute = !now_p.can_self_unmute && was.is_some_and(|w| w.can_self_unmute);
            check_position = (now_p.speaking && !was_speaking)
                || now_p.raised_hand_rating != was_rating
                || lost_self_unmute;
        } else {
            let row = self.new_row(peer, Some(now_p), now);
            if row.speaking() {
                self.registry.prepend(row);
                tracing::debug!("prepended speaking row {peer}");
                self.emitter.emit(RosterEvent::RowPrepended(peer.to_string()));
            } else {
                reorder_if_invited_before = self.registry.len();
                if now_p.raised_hand_rating != 0 {
                    check_position = true;
                } else {
                    added_to_bottom = true;
                }
                self.registry.append(row);
                tracing::debug!("appended row {peer}");
                self.emitter.emit(RosterEvent::RowAppended(peer.to_string()));
            }
            let changes = self.routing.route_new_row(peer, &mut self.registry, &self.store);
            self.emit_video(changes);
        }

        self.resort(|registry| {
            ordering::sink_invited_rows(registry, reorder_if_invited_before);
        });
        if check_position {
            self.check_row_position(peer);
        } else if added_to_bottom && self.settings.joined_to_top {
            self.resort(|registry| ordering::place_after_speakers(registry, peer));
        }
    }

    /// Append an `Invited` row for `peer` unless it already has a row.
    pub fn invite(&mut self, peer: &str, now: Instant) -> bool {
        if self.registry.contains(peer) {
            return false;
        }
        self.append_row(peer, None, now);
        true
    }

    /// The local user rejoined the call under another identity.
    pub fn rejoin(&mut self, was: &str, joined: &str, now: Instant) {
        if self.registry.contains(was) {
            self.remove_row(was);
        }
        self.store.set_local_peer(joined.to_string());
        if !self.registry.contains(joined) {
            let participant = self.store.participant(joined).cloned();
            self.append_row(joined, participant.as_ref(), now);
        }
    }

    pub fn set_stream_live(&mut self, endpoint: &str, live: bool) {
        let changes = self
            .routing
            .set_stream_live(endpoint, live, &mut self.registry, &self.store);
        self.emit_video(changes);
    }

    pub fn set_pinned(&mut self, endpoint: &str) {
        let changes = self.routing.set_pinned(endpoint, &mut self.registry, &self.store);
        self.emit_video(changes);
    }

    /// A context menu for `peer` is shown; reordering waits until it closes.
    pub fn menu_opened(&mut self, peer: &str) {
        tracing::debug!("menu opened for {peer}");
        self.ordering.menu_opened();
    }

    pub fn menu_closed(&mut self) {
        let can_manage = self.can_manage();
        let before = self.registry.order();
        self.ordering.menu_closed(&mut self.registry, can_manage);
        self.emit_order_if_changed(before);
    }

    /// Route a measured audio level to the sounding row with `ssrc`.
    pub fn level_update(&mut self, ssrc: u32, level: f32, now: Instant) {
        if self.sounding.is_suspended() {
            return;
        }
        let Some(peer) = self.sounding.peer_for_ssrc(ssrc).map(str::to_string) else {
            return;
        };
        if let Some(row) = self.registry.find_mut(&peer) {
            row.update_level(level, now, &self.timing);
        }
    }

    pub fn set_animations_suspended(&mut self, suspended: bool, now: Instant) {
        tracing::debug!("level animations suspended={suspended}");
        self.sounding.set_suspended(suspended, &mut self.registry, now);
    }

    /// Whether the sounding scheduler wants ticks.
    pub fn sounding_active(&self) -> bool {
        self.sounding.is_running()
    }

    /// Advance the level animation of every sounding row. Returns whether
    /// further ticks are wanted.
    pub fn tick_sounding(&mut self, now: Instant) -> bool {
        for peer in self.sounding.tick(&mut self.registry, now) {
            self.emitter.emit(RosterEvent::RowUpdated(peer));
        }
        self.sounding.is_running()
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.expiry.next_deadline()
    }

    /// Drop the transient raised-hand status of every row whose deadline
    /// has passed.
    pub fn fire_raised_hand_expiry(&mut self, now: Instant) {
        for peer in self.expiry.take_expired(now) {
            let Some(row) = self.registry.find_mut(&peer) else {
                continue;
            };
            if row.clear_raised_hand_status() {
                self.emitter
                    .emit(RosterEvent::RaisedHandStatusCleared(peer.clone()));
                self.emitter.emit(RosterEvent::RowUpdated(peer));
            }
        }
    }

    fn can_manage(&self) -> bool {
        self.permissions.can_manage_call()
    }

    fn new_row(&mut self, peer: &str, participant: Option<&Participant>, now: Instant) -> Row {
        let mut row = Row::new(peer);
        refresh_row(
            &mut row,
            participant,
            now,
            &self.timing,
            &mut self.sounding,
            &mut self.expiry,
        );
        row
    }

    fn append_row(&mut self, peer: &str, participant: Option<&Participant>, now: Instant) {
        let row = self.new_row(peer, participant, now);
        if self.registry.append(row) {
            tracing::debug!("appended row {peer}");
            self.emitter.emit(RosterEvent::RowAppended(peer.to_string()));
            let changes = self.routing.route_new_row(peer, &mut self.registry, &self.store);
            self.emit_video(changes);
        }
    }

    fn update_row(&mut self, peer: &str, participant: Option<&Participant>, now: Instant) {
        let Some(row) = self.registry.find_mut(peer) else {
            return;
        };
        refresh_row(
            row,
            participant,
            now,
            &self.timing,
            &mut self.sounding,
            &mut self.expiry,
        );
        self.emitter.emit(RosterEvent::RowUpdated(peer.to_string()));
    }

    fn remove_row(&mut self, peer: &str) {
        let Some(ssrc) = self.registry.find(peer).map(Row::ssrc) else {
            return;
        };
        let changes = self.routing.forget_row(peer, &mut self.registry);
        self.emit_video(changes);
        if self.sounding.peer_for_ssrc(ssrc) == Some(peer) {
            self.sounding.forget(ssrc);
        }
        self.expiry.cancel(peer);
        self.registry.remove(peer);
        tracing::debug!("removed row {peer}");
        self.emitter.emit(RosterEvent::RowRemoved(peer.to_string()));
    }

    fn check_row_position(&mut self, peer: &str) {
        let can_manage = self.can_manage();
        let before = self.registry.order();
        self.ordering
            .check_row_position(&mut self.registry, peer, can_manage);
        self.emit_order_if_changed(before);
    }

    fn resort<F>(&mut self, apply: F)
    where
        F: FnOnce(&mut RowRegistry),
    {
        let before = self.registry.order();
        apply(&mut self.registry);
        self.emit_order_if_changed(before);
    }

    fn emit_order_if_changed(&self, before: Vec<String>) {
        let after = self.registry.order();
        if after != before {
            self.emitter.emit(RosterEvent::RowsReordered(after));
        }
    }

    fn emit_video(&self, changes: Vec<VideoChange>) {
        for change in changes {
            self.emitter.emit(change.into());
        }
    }
}

/// Re-derive a row from its participant record and keep the scheduler and
/// the raised-hand expiry in step with it.
fn refresh_row(
    row: &mut Row,
    participant: Option<&Participant>,
    now: Instant,
    timing: &LevelTiming,
    sounding: &mut SoundingScheduler,
    expiry: &mut RaisedHandExpiry,
) {
    let was = (row.ssrc(), row.sounding());
    row.set_skip_level_update(sounding.is_suspended());
    let transition = row.update_state(participant, now, timing);
    match sounding.track(row.peer(), was, (row.ssrc(), row.sounding())) {
        SchedulerChange::Started => tracing::debug!("sounding animation started"),
        SchedulerChange::Stopped => tracing::debug!("sounding animation stopped"),
        SchedulerChange::Unchanged => {}
    }
    if transition.entered_raised_hand || transition.raised_again {
        expiry.schedule(row.peer(), now);
    } else if transition.left_raised_hand {
        expiry.cancel(row.peer());
    }
}
