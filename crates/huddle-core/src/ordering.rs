//! Row ordering rules.
//!
//! Speaking rows are kept at the top. For viewers who can manage the call,
//! everyone who can still unmute follows, then raised hands in descending
//! rating order, and force-muted rows sink to the bottom. Other viewers
//! only see speakers move up.

use crate::registry::RowRegistry;
use crate::row::{Row, RowState};

const TOP: u64 = u64::MAX;

/// Result of [`OrderingEngine::check_row_position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPosition {
    /// A context menu is open; the check runs again when it closes.
    Deferred,
    Unchanged,
    Reordered,
}

#[derive(Debug, Clone, Default)]
pub struct OrderingEngine {
    menu_open: bool,
    deferred: Vec<String>,
}

impl OrderingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_menu_open(&self) -> bool {
        self.menu_open
    }

    /// Peers whose position check waits for the menu to close, in the order
    /// they were first queued.
    pub fn deferred(&self) -> &[String] {
        &self.deferred
    }

    pub fn menu_opened(&mut self) {
        self.menu_open = true;
    }

    /// Close the menu and run the queued checks against the current row
    /// state. Returns `true` if any of them reordered the rows.
    pub fn menu_closed(&mut self, registry: &mut RowRegistry, can_manage: bool) -> bool {
        self.menu_open = false;
        let mut reordered = false;
        for peer in std::mem::take(&mut self.deferred) {
            if self.check_row_position(registry, &peer, can_manage) == RowPosition::Reordered {
                reordered = true;
            }
        }
        reordered
    }

    /// Re-sort the rows if `peer` ended up in a position the ordering rules
    /// don't allow.
    pub fn check_row_position(
        &mut self,
        registry: &mut RowRegistry,
        peer: &str,
        can_manage: bool,
    ) -> RowPosition {
        if self.menu_open {
            if !self.deferred.iter().any(|p| p == peer) {
                tracing::debug!("menu open, deferring position check for {peer}");
                self.deferred.push(peer.to_string());
            }
            return RowPosition::Deferred;
        }
        if !need_to_reorder(registry, peer, can_manage) {
            return RowPosition::Unchanged;
        }
        tracing::debug!("reordering rows for {peer} (can_manage={can_manage})");
        registry.sort_by_key_desc(|row| sort_key(row, peer, can_manage));
        RowPosition::Reordered
    }
}

/// Whether `peer` sits somewhere the ordering rules don't allow.
pub fn need_to_reorder(registry: &RowRegistry, peer: &str, can_manage: bool) -> bool {
    let Some(index) = registry.index_of(peer) else {
        return false;
    };
    let Some(row) = registry.row_at(index) else {
        return false;
    };
    if row.speaking() {
        return !all_rows_above_are_speaking(registry, index);
    } else if !can_manage {
        // Raised hands and force mutes only reorder for call managers.
        return false;
    }

    let rating = row.raised_hand_rating();
    if rating == 0 && row.state() != RowState::Muted {
        return false;
    }
    if rating > 0 && !all_rows_above_more_important_than_hand(registry, index, rating) {
        return true;
    }
    let Some(next) = registry.row_at(index + 1) else {
        // Already last.
        return false;
    };
    if !matches!(next.state(), RowState::Muted | RowState::RaisedHand) {
        return true;
    }
    rating == 0 && next.raised_hand_rating() > 0
}

fn all_rows_above_are_speaking(registry: &RowRegistry, index: usize) -> bool {
    registry.rows().iter().take(index).all(Row::speaking)
}

fn all_rows_above_more_important_than_hand(
    registry: &RowRegistry,
    index: usize,
    rating: u64,
) -> bool {
    !registry.rows().iter().take(index).any(|above| {
        above.state() == RowState::Muted
            || (above.state() == RowState::RaisedHand && above.raised_hand_rating() < rating)
    })
}

/// Sort key used when `trigger` caused a resort; rows sort by descending key.
pub fn sort_key(row: &Row, trigger: &str, can_manage: bool) -> u64 {
    let is_trigger = row.peer() == trigger;
    if row.speaking() {
        // The trigger goes on top of everyone already speaking.
        return if is_trigger { TOP } else { TOP - 1 };
    }
    if !can_manage {
        return 0;
    }
    if row.raised_hand_rating() > 0 {
        row.raised_hand_rating()
    } else if row.state() == RowState::Muted {
        // The just-muted row stays above the ones muted before it.
        u64::from(is_trigger)
    } else {
        TOP - 2
    }
}

/// Move a newly joined row right below the speaking rows.
pub fn place_after_speakers(registry: &mut RowRegistry, peer: &str) {
    registry.sort_by_key_desc(|row| {
        if row.speaking() {
            2
        } else if row.peer() == peer {
            1
        } else {
            0
        }
    });
}

/// After a real row was placed at `insert_index`, push invited rows back to
/// the bottom if one of them sits right above it. Returns `true` if the rows
/// were partitioned.
pub fn sink_invited_rows(registry: &mut RowRegistry, insert_index: usize) -> bool {
    let Some(above) = insert_index.checked_sub(1).and_then(|i| registry.row_at(i)) else {
        return false;
    };
    if above.state() != RowState::Invited {
        return false;
    }
    tracing::debug!("moving invited rows below joined participants");
    registry.partition(|row| row.state() != RowState::Invited);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participants::Participant;
    use crate::settings::LevelTiming;
    use tokio::time::Instant;

    #[derive(Clone, Copy)]
    enum Kind {
        Active,
        Inactive,
        Speaking,
        Muted,
        Hand(u64),
        Invited,
    }

    fn row(peer: &str, kind: Kind) -> Row {
        let base = Participant {
            peer: peer.to_string(),
            ssrc: 1,
            ..Participant::default()
        };
        let participant = match kind {
            Kind::Active => Some(base),
            Kind::Inactive => Some(Participant { muted: true, ..base }),
            Kind::Speaking => Some(Participant { speaking: true, ..base }),
            Kind::Muted => Some(Participant {
                muted: true,
                can_self_unmute: false,
                ..base
            }),
            Kind::Hand(rating) => Some(Participant {
                muted: true,
                can_self_unmute: false,
                raised_hand_rating: rating,
                ..base
            }),
            Kind::Invited => None,
        };
        let mut row = Row::new(peer);
        row.update_state(participant.as_ref(), Instant::now(), &LevelTiming::default());
        row
    }

    fn registry(rows: &[(&str, Kind)]) -> RowRegistry {
        let mut registry = RowRegistry::new();
        for (peer, kind) in rows {
            registry.append(row(peer, *kind));
        }
        registry
    }

    fn set(registry: &mut RowRegistry, peer: &str, kind: Kind) {
        let updated = row(peer, kind);
        let existing = registry.find_mut(peer).unwrap();
        *existing = updated;
    }

    #[test]
    fn new_speaker_moves_to_top_of_non_speaking_block() {
        let mut registry = registry(&[
            ("a", Kind::Inactive),
            ("b", Kind::Active),
            ("c", Kind::Inactive),
            ("p", Kind::Inactive),
        ]);
        set(&mut registry, "p", Kind::Speaking);
        let mut engine = OrderingEngine::new();
        assert_eq!(
            engine.check_row_position(&mut registry, "p", false),
            RowPosition::Reordered
        );
        assert_eq!(registry.order(), ["p", "a", "b", "c"]);
    }

    #[test]
    fn new_speaker_goes_on_top_of_existing_speakers() {
        let mut registry = registry(&[
            ("s1", Kind::Speaking),
            ("s2", Kind::Speaking),
            ("a", Kind::Active),
            ("p", Kind::Speaking),
        ]);
        let mut engine = OrderingEngine::new();
        engine.check_row_position(&mut registry, "p", true);
        assert_eq!(registry.order(), ["p", "s1", "s2", "a"]);
    }

    #[test]
    fn speaker_below_only_speakers_stays() {
        let registry = registry(&[("s1", Kind::Speaking), ("p", Kind::Speaking), ("a", Kind::Active)]);
        assert!(!need_to_reorder(&registry, "p", true));
        assert!(!need_to_reorder(&registry, "s1", true));
    }

    #[test]
    fn raised_hand_sorted_by_rating_for_managers() {
        let mut registry = registry(&[
            ("x", Kind::Active),
            ("y", Kind::Hand(5)),
            ("z", Kind::Hand(9)),
            ("w", Kind::Muted),
        ]);
        set(&mut registry, "w", Kind::Hand(7));
        let mut engine = OrderingEngine::new();
        assert_eq!(
            engine.check_row_position(&mut registry, "w", true),
            RowPosition::Reordered
        );
        assert_eq!(registry.order(), ["x", "z", "w", "y"]);
    }

    #[test]
    fn raised_hand_never_reorders_for_other_viewers() {
        let mut registry = registry(&[("m", Kind::Muted), ("h", Kind::Hand(9))]);
        let mut engine = OrderingEngine::new();
        assert_eq!(
            engine.check_row_position(&mut registry, "h", false),
            RowPosition::Unchanged
        );
        assert_eq!(registry.order(), ["m", "h"]);
    }

    #[test]
    fn raised_hand_below_more_urgent_hand_stays() {
        let registry = registry(&[("a", Kind::Active), ("h9", Kind::Hand(9)), ("h5", Kind::Hand(5))]);
        assert!(!need_to_reorder(&registry, "h5", true));
    }

    #[test]
    fn force_muted_row_sinks_below_unmutable_rows() {
        let mut registry = registry(&[
            ("old", Kind::Muted),
            ("a", Kind::Active),
            ("b", Kind::Inactive),
            ("h", Kind::Hand(3)),
        ]);
        set(&mut registry, "a", Kind::Muted);
        let mut engine = OrderingEngine::new();
        assert_eq!(
            engine.check_row_position(&mut registry, "a", true),
            RowPosition::Reordered
        );
        // The just-muted row stays above the previously muted one.
        assert_eq!(registry.order(), ["b", "h", "a", "old"]);
    }

    #[test]
    fn muted_row_above_pending_hand_reorders() {
        let registry = registry(&[("a", Kind::Active), ("m", Kind::Muted), ("h", Kind::Hand(2))]);
        assert!(need_to_reorder(&registry, "m", true));
    }

    #[test]
    fn muted_row_at_bottom_stays() {
        let registry = registry(&[("a", Kind::Active), ("m", Kind::Muted)]);
        assert!(!need_to_reorder(&registry, "m", true));
        let registry = registry_pair();
        assert!(!need_to_reorder(&registry, "m1", true));
    }

    fn registry_pair() -> RowRegistry {
        registry(&[("a", Kind::Active), ("m1", Kind::Muted), ("m2", Kind::Muted)])
    }

    #[test]
    fn unknown_peer_never_reorders() {
        let registry = registry(&[("a", Kind::Active)]);
        assert!(!need_to_reorder(&registry, "ghost", true));
    }

    #[test]
    fn menu_defers_checks_until_closed() {
        let mut registry = registry(&[("a", Kind::Active), ("b", Kind::Inactive), ("p", Kind::Inactive)]);
        let mut engine = OrderingEngine::new();
        engine.menu_opened();

        set(&mut registry, "p", Kind::Speaking);
        assert_eq!(
            engine.check_row_position(&mut registry, "p", false),
            RowPosition::Deferred
        );
        set(&mut registry, "b", Kind::Speaking);
        engine.check_row_position(&mut registry, "b", false);
        engine.check_row_position(&mut registry, "p", false);
        assert_eq!(engine.deferred(), ["p", "b"]);
        assert_eq!(registry.order(), ["a", "b", "p"]);

        // Only the state at close time matters.
        set(&mut registry, "b", Kind::Inactive);
        assert!(engine.menu_closed(&mut registry, false));
        assert!(engine.deferred().is_empty());
        assert_eq!(registry.order(), ["p", "a", "b"]);
    }

    #[test]
    fn admin_sort_keys() {
        let speaking = row("s", Kind::Speaking);
        assert_eq!(sort_key(&speaking, "s", true), TOP);
        assert_eq!(sort_key(&speaking, "x", true), TOP - 1);
        assert_eq!(sort_key(&row("h", Kind::Hand(42)), "x", true), 42);
        assert_eq!(sort_key(&row("m", Kind::Muted), "m", true), 1);
        assert_eq!(sort_key(&row("m", Kind::Muted), "x", true), 0);
        assert_eq!(sort_key(&row("i", Kind::Inactive), "x", true), TOP - 2);
        assert_eq!(sort_key(&row("i", Kind::Invited), "x", true), TOP - 2);
        assert_eq!(sort_key(&row("h", Kind::Hand(42)), "x", false), 0);
    }

    #[test]
    fn joined_row_goes_below_speakers() {
        let mut registry = registry(&[
            ("a", Kind::Active),
            ("s", Kind::Speaking),
            ("b", Kind::Inactive),
            ("new", Kind::Active),
        ]);
        place_after_speakers(&mut registry, "new");
        assert_eq!(registry.order(), ["s", "new", "a", "b"]);
    }

    #[test]
    fn invited_rows_sink_only_when_right_above() {
        let mut registry = registry(&[("a", Kind::Active), ("i1", Kind::Invited), ("i2", Kind::Invited), ("new", Kind::Active)]);
        assert!(!sink_invited_rows(&mut registry, 0));
        assert!(!sink_invited_rows(&mut registry, 1));
        assert!(sink_invited_rows(&mut registry, 3));
        assert_eq!(registry.order(), ["a", "new", "i1", "i2"]);
    }
}
