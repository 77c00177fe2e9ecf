//! Vote aggregation over chat events.
//!
//! Voting scheme: a message counts as a vote iff, after trimming and case
//! folding, it is exactly one alphabetic character. One vote per voter per
//! round, first vote wins. Weights: base 1, plus the voter's medal level
//! when their medal matches the configured designation, plus a fixed bonus
//! for configured super voters.
//!
//! The aggregator is single-threaded: it pulls lazily from the bounded
//! event queue when a tally is requested, so only the queue crosses
//! threads.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::chat::ChatEvent;
use crate::queue::EventReceiver;

/// Default bonus weight for super voters.
pub const DEFAULT_SUPER_BONUS: i64 = 10;

/// Weighting rules for chat votes.
#[derive(Debug, Clone)]
pub struct VoteWeights {
    /// Medal designation whose wearers get a per-level bonus.
    pub medal_name: Option<String>,
    /// Voter ids granted the super bonus.
    pub super_voters: HashSet<String>,
    /// Flat bonus added for super voters.
    pub super_bonus: i64,
}

impl Default for VoteWeights {
    fn default() -> Self {
        Self {
            medal_name: None,
            super_voters: HashSet::new(),
            super_bonus: DEFAULT_SUPER_BONUS,
        }
    }
}

impl VoteWeights {
    /// Weight of a single accepted vote from this voter.
    fn weight_of(&self, event: &ChatEvent) -> i64 {
        let mut weight = 1;
        if let (Some(designation), Some(worn), Some(level)) =
            (&self.medal_name, &event.medal_name, event.medal_level)
        {
            if designation == worn {
                weight += level;
            }
        }
        if self.super_voters.contains(&event.voter_id) {
            weight += self.super_bonus;
        }
        weight
    }
}

/// Per-round vote state fed from the chat event queue.
pub struct VoteAggregator {
    weights: VoteWeights,
    events: EventReceiver<ChatEvent>,
    tally: BTreeMap<char, i64>,
    voted: HashSet<String>,
}

impl VoteAggregator {
    /// Create an aggregator consuming from the given event queue.
    pub fn new(weights: VoteWeights, events: EventReceiver<ChatEvent>) -> Self {
        Self {
            weights,
            events,
            tally: BTreeMap::new(),
            voted: HashSet::new(),
        }
    }

    /// Apply one chat event to the current round.
    ///
    /// Ignored unless the normalized message is a single alphabetic
    /// character, and ignored entirely for voters who already voted this
    /// round.
    pub fn record_event(&mut self, event: &ChatEvent) {
        let Some(option) = normalize_option(&event.message) else {
            return;
        };
        if self.voted.contains(&event.voter_id) {
            return;
        }
        self.voted.insert(event.voter_id.clone());
        let weight = self.weights.weight_of(event);
        *self.tally.entry(option).or_insert(0) += weight;
        debug!(voter = %event.voter_id, %option, weight, "vote recorded");
    }

    /// Drain queued events into the round, then return a tally snapshot.
    pub fn current_tally(&mut self) -> BTreeMap<char, i64> {
        for event in self.events.drain() {
            self.record_event(&event);
        }
        self.tally.clone()
    }

    /// Clear the tally and the voted set for a new round.
    pub fn reset(&mut self) {
        self.tally.clear();
        self.voted.clear();
    }
}

/// Normalize a message to its vote option: exactly one alphabetic
/// character after trimming, case folded.
fn normalize_option(message: &str) -> Option<char> {
    let trimmed = message.trim();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    if chars.next().is_some() || !first.is_alphabetic() {
        return None;
    }
    first.to_lowercase().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{event_queue, EventSender};

    fn event(voter: &str, msg: &str) -> ChatEvent {
        ChatEvent {
            voter_id: voter.to_string(),
            display_name: voter.to_string(),
            message: msg.to_string(),
            medal_name: None,
            medal_level: None,
        }
    }

    fn aggregator(weights: VoteWeights) -> (VoteAggregator, EventSender<ChatEvent>) {
        let (tx, rx) = event_queue(100);
        (VoteAggregator::new(weights, rx), tx)
    }

    #[test]
    fn test_normalize_option() {
        assert_eq!(normalize_option("a"), Some('a'));
        assert_eq!(normalize_option(" B "), Some('b'));
        assert_eq!(normalize_option("ab"), None);
        assert_eq!(normalize_option("1"), None);
        assert_eq!(normalize_option(""), None);
        assert_eq!(normalize_option("hello"), None);
    }

    #[test]
    fn test_first_vote_wins() {
        let (mut agg, _tx) = aggregator(VoteWeights::default());
        agg.record_event(&event("U1", "a"));
        agg.record_event(&event("U1", "b"));
        agg.record_event(&event("U1", "a"));

        let tally = agg.current_tally();
        assert_eq!(tally.get(&'a'), Some(&1));
        assert_eq!(tally.get(&'b'), None);
    }

    #[test]
    fn test_base_voter_weight_is_one() {
        let (mut agg, _tx) = aggregator(VoteWeights::default());
        agg.record_event(&event("U2", "c"));
        assert_eq!(agg.current_tally()[&'c'], 1);
    }

    #[test]
    fn test_super_voter_bonus() {
        let weights = VoteWeights {
            super_voters: HashSet::from(["U3".to_string()]),
            ..Default::default()
        };
        let (mut agg, _tx) = aggregator(weights);
        agg.record_event(&event("U3", "c"));
        assert_eq!(agg.current_tally()[&'c'], 11);
    }

    #[test]
    fn test_medal_bonus_only_for_matching_designation() {
        let weights = VoteWeights {
            medal_name: Some("club".to_string()),
            ..Default::default()
        };
        let (mut agg, _tx) = aggregator(weights);

        let mut wearer = event("U4", "a");
        wearer.medal_name = Some("club".to_string());
        wearer.medal_level = Some(5);
        agg.record_event(&wearer);

        let mut other = event("U5", "b");
        other.medal_name = Some("elsewhere".to_string());
        other.medal_level = Some(9);
        agg.record_event(&other);

        let tally = agg.current_tally();
        assert_eq!(tally[&'a'], 6); // 1 base + level 5
        assert_eq!(tally[&'b'], 1);
    }

    #[test]
    fn test_multi_letter_and_non_alpha_ignored() {
        let (mut agg, _tx) = aggregator(VoteWeights::default());
        agg.record_event(&event("U1", "ab"));
        agg.record_event(&event("U2", "!"));
        agg.record_event(&event("U3", "switch to b please"));
        assert!(agg.current_tally().is_empty());
        // None of them consumed the voters' votes.
        agg.record_event(&event("U1", "a"));
        assert_eq!(agg.current_tally()[&'a'], 1);
    }

    #[test]
    fn test_current_tally_drains_queue() {
        let (mut agg, tx) = aggregator(VoteWeights::default());
        assert!(tx.try_push(event("U1", "a")));
        assert!(tx.try_push(event("U2", "a")));
        assert!(tx.try_push(event("U2", "b"))); // dup voter, no-op

        let tally = agg.current_tally();
        assert_eq!(tally[&'a'], 2);
        assert_eq!(tally.get(&'b'), None);
    }

    #[test]
    fn test_reset_idempotent_and_frees_voters() {
        let (mut agg, _tx) = aggregator(VoteWeights::default());
        agg.record_event(&event("U1", "a"));
        agg.reset();
        assert!(agg.current_tally().is_empty());
        agg.reset();
        assert!(agg.current_tally().is_empty());

        // A new round accepts the same voter again.
        agg.record_event(&event("U1", "b"));
        assert_eq!(agg.current_tally()[&'b'], 1);
    }
}
