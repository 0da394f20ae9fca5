use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::participants::{DEFAULT_VOLUME, Participant};
use crate::settings::LevelTiming;
use crate::sounding::LevelAnimation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowState {
    Active,
    Inactive,
    Muted,
    RaisedHand,
    MutedByMe,
    Invited,
}

/// What a call to [`Row::update_state`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowTransition {
    pub entered_raised_hand: bool,
    /// Still raised, but with a new rating: the hand was raised again.
    pub raised_again: bool,
    pub left_raised_hand: bool,
    pub started_sounding: bool,
    pub stopped_sounding: bool,
}

/// One entry of the roster: a participant, a pending invite or the local user.
#[derive(Debug, Clone)]
pub struct Row {
    peer: String,
    state: RowState,
    raised_hand_rating: u64,
    ssrc: u32,
    volume: u32,
    sounding: bool,
    speaking: bool,
    speaking_last_time: Option<Instant>,
    raised_hand_status: bool,
    skip_level_update: bool,
    video_endpoint: String,
    level: Option<LevelAnimation>,
}

impl Row {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            state: RowState::Inactive,
            raised_hand_rating: 0,
            ssrc: 0,
            volume: DEFAULT_VOLUME,
            sounding: false,
            speaking: false,
            speaking_last_time: None,
            raised_hand_status: false,
            skip_level_update: false,
            video_endpoint: String::new(),
            level: None,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> RowState {
        self.state
    }

    pub fn raised_hand_rating(&self) -> u64 {
        self.raised_hand_rating
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn sounding(&self) -> bool {
        self.sounding
    }

    pub fn speaking(&self) -> bool {
        self.speaking
    }

    pub fn speaking_last_time(&self) -> Option<Instant> {
        self.speaking_last_time
    }

    /// Whether the "just raised a hand" status text is still shown.
    pub fn raised_hand_status(&self) -> bool {
        self.raised_hand_status
    }

    pub fn video_endpoint(&self) -> &str {
        &self.video_endpoint
    }

    pub fn level(&self) -> Option<&LevelAnimation> {
        self.level.as_ref()
    }

    pub(crate) fn level_mut(&mut self) -> Option<&mut LevelAnimation> {
        self.level.as_mut()
    }

    pub(crate) fn set_video_endpoint(&mut self, endpoint: &str) {
        endpoint.clone_into(&mut self.video_endpoint);
    }

    pub(crate) fn set_skip_level_update(&mut self, skip: bool) {
        self.skip_level_update = skip;
    }

    /// Derive the row state from the participant record. `None` means the
    /// peer is not (or no longer) in the call and only tracked as invited.
    pub fn update_state(
        &mut self,
        participant: Option<&Participant>,
        now: Instant,
        timing: &LevelTiming,
    ) -> RowTransition {
        let was_sounding = self.sounding;
        let was_raised_hand = self.state == RowState::RaisedHand;
        let was_rating = self.raised_hand_rating;

        self.ssrc = participant.map_or(0, |p| p.ssrc);
        self.volume = participant.map_or(DEFAULT_VOLUME, |p| p.volume);
        match participant {
            None => {
                self.state = RowState::Invited;
                self.set_sounding(false, now, timing);
                self.speaking = false;
                self.raised_hand_rating = 0;
            }
            Some(p) if !p.muted || (p.sounding && p.ssrc != 0) => {
                self.state = if p.muted_by_me {
                    RowState::MutedByMe
                } else {
                    RowState::Active
                };
                self.set_sounding(p.sounding && p.ssrc != 0, now, timing);
                self.speaking = p.speaking && p.ssrc != 0;
                self.raised_hand_rating = 0;
            }
            Some(p) if p.can_self_unmute => {
                self.state = if p.muted_by_me {
                    RowState::MutedByMe
                } else {
                    RowState::Inactive
                };
                self.set_sounding(false, now, timing);
                self.speaking = false;
                self.raised_hand_rating = 0;
            }
            Some(p) => {
                self.raised_hand_rating = p.raised_hand_rating;
                self.state = if p.raised_hand_rating > 0 {
                    RowState::RaisedHand
                } else {
                    RowState::Muted
                };
                self.set_sounding(false, now, timing);
                self.speaking = false;
            }
        }

        let now_raised_hand = self.state == RowState::RaisedHand;
        let entered_raised_hand = !was_raised_hand && now_raised_hand;
        let left_raised_hand = was_raised_hand && !now_raised_hand;
        let raised_again =
            was_raised_hand && now_raised_hand && was_rating != self.raised_hand_rating;
        if entered_raised_hand || raised_again {
            self.raised_hand_status = true;
        } else if left_raised_hand {
            self.raised_hand_status = false;
        }
        RowTransition {
            entered_raised_hand,
            raised_again,
            left_raised_hand,
            started_sounding: !was_sounding && self.sounding,
            stopped_sounding: was_sounding && !self.sounding,
        }
    }

    fn set_sounding(&mut self, sounding: bool, now: Instant, timing: &LevelTiming) {
        if self.sounding == sounding {
            return;
        }
        self.sounding = sounding;
        if !sounding {
            self.level = None;
        } else if self.level.is_none() {
            self.level = Some(LevelAnimation::new(now));
            self.update_level(timing.speak_threshold, now, timing);
        }
    }

    /// Feed a measured audio level into the row's animation state.
    pub fn update_level(&mut self, level: f32, now: Instant, timing: &LevelTiming) {
        let spoke = level >= timing.speak_threshold;
        if spoke && self.speaking {
            self.speaking_last_time = Some(now);
        }
        if self.skip_level_update {
            return;
        }
        if let Some(animation) = self.level.as_mut() {
            if spoke {
                animation.mark_sounding(now);
            }
            animation.set_level(level, timing);
        }
    }

    /// Returns `true` if the transient status was shown and is now cleared.
    pub fn clear_raised_hand_status(&mut self) -> bool {
        std::mem::replace(&mut self.raised_hand_status, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(peer: &str) -> Participant {
        Participant {
            peer: peer.to_string(),
            ssrc: 7,
            ..Participant::default()
        }
    }

    fn update(row: &mut Row, p: Option<&Participant>) -> RowTransition {
        row.update_state(p, Instant::now(), &LevelTiming::default())
    }

    #[test]
    fn missing_participant_is_invited() {
        let mut row = Row::new("p1");
        update(&mut row, None);
        assert_eq!(row.state(), RowState::Invited);
        assert_eq!(row.ssrc(), 0);
        assert!(!row.speaking());
    }

    #[test]
    fn unmuted_participant_is_active_and_speaking_needs_ssrc() {
        let mut row = Row::new("p1");
        let p = Participant {
            speaking: true,
            sounding: true,
            ..participant("p1")
        };
        let change = update(&mut row, Some(&p));
        assert_eq!(row.state(), RowState::Active);
        assert!(row.speaking());
        assert!(row.sounding());
        assert!(change.started_sounding);
        assert!(row.level().is_some());

        let silent = Participant { ssrc: 0, ..p };
        let change = update(&mut row, Some(&silent));
        assert!(!row.speaking());
        assert!(change.stopped_sounding);
        assert!(row.level().is_none());
    }

    #[test]
    fn locally_muted_participant() {
        let mut row = Row::new("p1");
        let p = Participant {
            muted_by_me: true,
            ..participant("p1")
        };
        update(&mut row, Some(&p));
        assert_eq!(row.state(), RowState::MutedByMe);
    }

    #[test]
    fn sounding_muted_participant_counts_as_active() {
        let mut row = Row::new("p1");
        let p = Participant {
            muted: true,
            can_self_unmute: false,
            sounding: true,
            ..participant("p1")
        };
        update(&mut row, Some(&p));
        assert_eq!(row.state(), RowState::Active);
        assert!(row.sounding());
    }

    #[test]
    fn self_muted_participant_is_inactive() {
        let mut row = Row::new("p1");
        let p = Participant {
            muted: true,
            speaking: true,
            raised_hand_rating: 4,
            ..participant("p1")
        };
        update(&mut row, Some(&p));
        assert_eq!(row.state(), RowState::Inactive);
        assert!(!row.speaking());
        assert_eq!(row.raised_hand_rating(), 0);
    }

    #[test]
    fn force_muted_participant_with_and_without_hand() {
        let mut row = Row::new("p1");
        let muted = Participant {
            muted: true,
            can_self_unmute: false,
            ..participant("p1")
        };
        let change = update(&mut row, Some(&muted));
        assert_eq!(row.state(), RowState::Muted);
        assert!(!change.entered_raised_hand);

        let raised = Participant {
            raised_hand_rating: 9,
            ..muted.clone()
        };
        let change = update(&mut row, Some(&raised));
        assert_eq!(row.state(), RowState::RaisedHand);
        assert_eq!(row.raised_hand_rating(), 9);
        assert!(change.entered_raised_hand);
        assert!(row.raised_hand_status());

        // Still raised: not a new entry.
        assert!(row.clear_raised_hand_status());
        let change = update(&mut row, Some(&Participant {
            raised_hand_rating: 10,
            ..muted
        }));
        assert!(!change.entered_raised_hand);
        assert!(change.raised_again);
        assert!(row.raised_hand_status());

        let lowered = Participant {
            raised_hand_rating: 0,
            muted: true,
            can_self_unmute: false,
            ..participant("p1")
        };
        let change = update(&mut row, Some(&lowered));
        assert!(change.left_raised_hand);
        assert!(!row.raised_hand_status());
    }

    #[test]
    fn clearing_raised_hand_status_keeps_rating() {
        let mut row = Row::new("p1");
        let raised = Participant {
            muted: true,
            can_self_unmute: false,
            raised_hand_rating: 3,
            ..participant("p1")
        };
        update(&mut row, Some(&raised));
        assert!(row.clear_raised_hand_status());
        assert!(!row.clear_raised_hand_status());
        assert_eq!(row.raised_hand_rating(), 3);
        assert_eq!(row.state(), RowState::RaisedHand);
    }

    #[test]
    fn loud_level_records_speaking_time() {
        let timing = LevelTiming::default();
        let mut row = Row::new("p1");
        let now = Instant::now();
        let p = Participant {
            speaking: true,
            sounding: true,
            ..participant("p1")
        };
        row.update_state(Some(&p), now, &timing);
        assert_eq!(row.speaking_last_time(), None);
        row.update_level(0.5, now, &timing);
        assert_eq!(row.speaking_last_time(), Some(now));
        assert_eq!(row.level().unwrap().target(), 0.5);

        row.set_skip_level_update(true);
        row.update_level(0.9, now, &timing);
        assert_eq!(row.level().unwrap().target(), 0.5);
    }
}
