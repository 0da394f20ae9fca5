use serde::{Deserialize, Serialize};

/// Volume a participant is heard at unless the viewer changed it.
pub const DEFAULT_VOLUME: u32 = 10_000;

/// A call participant as reported by the call state.
///
/// Endpoints are opaque video source keys; an empty string means the
/// participant does not publish that source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Participant {
    pub peer: String,
    pub muted: bool,
    pub muted_by_me: bool,
    pub can_self_unmute: bool,
    pub speaking: bool,
    pub sounding: bool,
    pub raised_hand_rating: u64,
    pub ssrc: u32,
    pub volume: u32,
    pub camera_endpoint: String,
    pub screen_endpoint: String,
}

impl Default for Participant {
    fn default() -> Self {
        Self {
            peer: String::new(),
            muted: false,
            muted_by_me: false,
            can_self_unmute: true,
            speaking: false,
            sounding: false,
            raised_hand_rating: 0,
            ssrc: 0,
            volume: DEFAULT_VOLUME,
            camera_endpoint: String::new(),
            screen_endpoint: String::new(),
        }
    }
}

/// Latest known participant records, keyed by peer identity.
///
/// Updated from the participant change feed; read by the video router to
/// map endpoints back to their owner.
#[derive(Debug, Clone, Default)]
pub struct ParticipantStore {
    participants: Vec<Participant>,
    local_peer: Option<String>,
    local_camera_endpoint: String,
    local_screen_endpoint: String,
}

impl ParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_peer(&mut self, peer: String) {
        self.local_peer = Some(peer);
    }

    pub fn local_peer(&self) -> Option<&str> {
        self.local_peer.as_deref()
    }

    pub fn is_local(&self, peer: &str) -> bool {
        self.local_peer.as_deref() == Some(peer)
    }

    /// Endpoints of the tracks the local user is sending. These take
    /// precedence over whatever the call state reports for the local peer.
    pub fn set_local_sharing_endpoints(&mut self, camera: String, screen: String) {
        self.local_camera_endpoint = camera;
        self.local_screen_endpoint = screen;
    }

    /// Insert or replace the record for `participant.peer`.
    pub fn upsert(&mut self, participant: Participant) {
        match self.participant_mut(&participant.peer) {
            Some(existing) => *existing = participant,
            None => self.participants.push(participant),
        }
    }

    pub fn remove(&mut self, peer: &str) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.peer == peer)?;
        Some(self.participants.remove(index))
    }

    /// Replace the whole set, e.g. after the participant list was reloaded.
    pub fn replace_all(&mut self, participants: Vec<Participant>) {
        self.participants = participants;
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, peer: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.peer == peer)
    }

    pub fn participant_mut(&mut self, peer: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.peer == peer)
    }

    pub fn camera_endpoint<'a>(&'a self, participant: &'a Participant) -> &'a str {
        if self.is_local(&participant.peer) && !self.local_camera_endpoint.is_empty() {
            &self.local_camera_endpoint
        } else {
            &participant.camera_endpoint
        }
    }

    pub fn screen_endpoint<'a>(&'a self, participant: &'a Participant) -> &'a str {
        if self.is_local(&participant.peer) && !self.local_screen_endpoint.is_empty() {
            &self.local_screen_endpoint
        } else {
            &participant.screen_endpoint
        }
    }

    /// Find the participant publishing `endpoint` as camera or screen.
    pub fn participant_by_endpoint(&self, endpoint: &str) -> Option<&Participant> {
        if endpoint.is_empty() {
            return None;
        }
        if endpoint == self.local_camera_endpoint || endpoint == self.local_screen_endpoint {
            let local = self.local_peer.as_deref()?;
            return self.participant(local);
        }
        self.participants
            .iter()
            .find(|p| p.camera_endpoint == endpoint || p.screen_endpoint == endpoint)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.local_peer = None;
        self.local_camera_endpoint.clear();
        self.local_screen_endpoint.clear();
    }
}
