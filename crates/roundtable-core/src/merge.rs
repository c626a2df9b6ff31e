//! Deduplicating, order-stable merge of canonical events.
//!
//! Incoming events are checked against the existing collection in three
//! tiers; the first tier that matches marks the event a duplicate and the
//! merge becomes a no-op:
//!
//! 1. **Sequence**: same `sequence_id`.
//! 2. **Identity**: same `id`.
//! 3. **Logical**: same `knight` and `round`, plus an equal `headline` or
//!    `detail` (both must match in the research round). Plain string
//!    equality, so two blank details are equal.
//!
//! The logical tier is a heuristic. Sources sometimes mint different ids for
//! the same observation, and this tier catches those, but it can also fold
//! two distinct events that happen to share a knight, round and headline,
//! or that both arrive with an empty detail.
//! It is kept deliberately as a known approximation.
//!
//! Non-duplicates are appended and the collection is re-sorted: events that
//! carry a `sequence_id` end up in numeric order, and events without one keep
//! their positions relative to everything else.

use serde::Serialize;

use crate::event::{DebateEvent, Round};

/// Which tier identified a duplicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    /// Same `sequence_id`.
    Sequence,
    /// Same `id`.
    Identity,
    /// Same knight, round and summary text.
    Logical,
}

/// Result of merging a single event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The event was new and has been inserted.
    Inserted,
    /// The event was already present; nothing changed.
    Duplicate(DuplicateReason),
}

impl MergeOutcome {
    /// Whether the collection changed.
    pub fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Find the first tier under which `incoming` duplicates an existing event.
pub fn find_duplicate(existing: &[DebateEvent], incoming: &DebateEvent) -> Option<DuplicateReason> {
    if let Some(seq) = incoming.sequence_id {
        if existing.iter().any(|e| e.sequence_id == Some(seq)) {
            return Some(DuplicateReason::Sequence);
        }
    }
    if existing.iter().any(|e| e.id == incoming.id) {
        return Some(DuplicateReason::Identity);
    }
    if existing.iter().any(|e| is_logical_match(e, incoming)) {
        return Some(DuplicateReason::Logical);
    }
    None
}

fn is_logical_match(existing: &DebateEvent, incoming: &DebateEvent) -> bool {
    if existing.knight != incoming.knight || existing.round != incoming.round {
        return false;
    }
    let same_headline = existing.headline == incoming.headline;
    let same_detail = existing.detail == incoming.detail;
    if incoming.round == Round::Research {
        same_headline && same_detail
    } else {
        same_headline || same_detail
    }
}

/// Pure merge: return a new collection with `incoming` merged in.
pub fn merge(existing: &[DebateEvent], incoming: DebateEvent) -> Vec<DebateEvent> {
    let mut events = existing.to_vec();
    let _ = merge_into(&mut events, incoming);
    events
}

/// In-place merge used by the engines.
pub fn merge_into(events: &mut Vec<DebateEvent>, incoming: DebateEvent) -> MergeOutcome {
    if let Some(reason) = find_duplicate(events, &incoming) {
        return MergeOutcome::Duplicate(reason);
    }
    events.push(incoming);
    reorder_by_sequence(events);
    MergeOutcome::Inserted
}

/// Sort sequenced events into numeric order without moving unsequenced ones.
///
/// The slots occupied by sequenced events are kept; only their contents are
/// permuted. This makes the sort stable with respect to every event that
/// lacks a `sequence_id`.
fn reorder_by_sequence(events: &mut [DebateEvent]) {
    let slots: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.sequence_id.map(|_| i))
        .collect();
    let in_order = slots
        .windows(2)
        .all(|w| events[w[0]].sequence_id <= events[w[1]].sequence_id);
    if in_order {
        return;
    }
    let mut sequenced: Vec<DebateEvent> = slots.iter().map(|&i| events[i].clone()).collect();
    sequenced.sort_by_key(|e| e.sequence_id);
    for (slot, event) in slots.into_iter().zip(sequenced) {
        events[slot] = event;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventLog
// ─────────────────────────────────────────────────────────────────────────────

/// A session's growing, order-stable event collection.
///
/// Append/merge-only; [`EventLog::clear`] is the explicit caller reset.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<DebateEvent>,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event.
    pub fn merge(&mut self, incoming: DebateEvent) -> MergeOutcome {
        merge_into(&mut self.events, incoming)
    }

    /// Merge many events in order, returning how many were inserted.
    pub fn extend<I>(&mut self, incoming: I) -> usize
    where
        I: IntoIterator<Item = DebateEvent>,
    {
        incoming
            .into_iter()
            .filter(|e| self.merge(e.clone()).is_inserted())
            .count()
    }

    /// Materialized events.
    pub fn events(&self) -> &[DebateEvent] {
        &self.events
    }

    /// Iterate in canonical order.
    pub fn iter(&self) -> std::slice::Iter<'_, DebateEvent> {
        self.events.iter()
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop every event. Only called on explicit caller reset.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a DebateEvent;
    type IntoIter = std::slice::Iter<'a, DebateEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EventId;
    use chrono::{DateTime, Utc};

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn event(id: &str, seq: Option<u64>, knight: &str, headline: &str) -> DebateEvent {
        DebateEvent {
            id: seq.map_or_else(|| EventId::from(id), EventId::from_sequence),
            sequence_id: seq,
            round: Round::Position,
            phase: None,
            knight: Some(knight.to_owned()),
            target_knight: None,
            headline: headline.to_owned(),
            detail: format!("{headline} detail"),
            confidence: 0.0,
            timestamp: at(),
            details: None,
        }
    }

    fn seqs(events: &[DebateEvent]) -> Vec<Option<u64>> {
        events.iter().map(|e| e.sequence_id).collect()
    }

    #[test]
    fn appends_new_event() {
        let merged = merge(&[], event("a", Some(1), "Kay", "one"));
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn sequence_match_is_duplicate() {
        let mut log = EventLog::new();
        assert!(log.merge(event("a", Some(1), "Kay", "one")).is_inserted());
        let mut again = event("b", Some(1), "Bors", "other");
        again.id = EventId::from("different");
        assert_eq!(log.merge(again), MergeOutcome::Duplicate(DuplicateReason::Sequence));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn identity_match_is_duplicate() {
        let mut log = EventLog::new();
        let _ = log.merge(event("a", None, "Kay", "one"));
        assert_eq!(
            log.merge(event("a", None, "Bors", "two")),
            MergeOutcome::Duplicate(DuplicateReason::Identity)
        );
    }

    #[test]
    fn logical_match_on_headline_or_detail() {
        let mut log = EventLog::new();
        let _ = log.merge(event("a", None, "Kay", "one"));
        let mut same_headline = event("b", None, "Kay", "one");
        same_headline.detail = "something else".into();
        assert_eq!(log.merge(same_headline), MergeOutcome::Duplicate(DuplicateReason::Logical));

        let other_knight = event("c", None, "Bors", "one");
        assert!(log.merge(other_knight).is_inserted());
    }

    #[test]
    fn blank_details_match_logically() {
        let mut log = EventLog::new();
        let mut first = event("a", None, "Kay", "one");
        first.detail.clear();
        let mut second = event("b", None, "Kay", "two");
        second.detail.clear();
        let _ = log.merge(first);
        assert_eq!(log.merge(second), MergeOutcome::Duplicate(DuplicateReason::Logical));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn research_logical_match_needs_both_fields() {
        let mut base = event("a", None, "Kay", "Found sources");
        base.round = Round::Research;
        let mut log = EventLog::new();
        let _ = log.merge(base.clone());

        let mut different_detail = base.clone();
        different_detail.id = EventId::from("b");
        different_detail.detail = "new findings".into();
        assert!(log.merge(different_detail).is_inserted());

        let mut exact = base;
        exact.id = EventId::from("c");
        assert_eq!(log.merge(exact), MergeOutcome::Duplicate(DuplicateReason::Logical));
    }

    #[test]
    fn out_of_order_sequences_are_sorted() {
        let mut log = EventLog::new();
        for seq in [5, 1, 3] {
            let _ = log.merge(event("x", Some(seq), "Kay", &format!("h{seq}")));
        }
        assert_eq!(seqs(log.events()), vec![Some(1), Some(3), Some(5)]);
    }

    #[test]
    fn unsequenced_events_keep_their_slots() {
        let mut log = EventLog::new();
        let _ = log.merge(event("x", Some(4), "Kay", "four"));
        let _ = log.merge(event("u1", None, "Bors", "loose one"));
        let _ = log.merge(event("u2", None, "Gawain", "loose two"));
        let _ = log.merge(event("x", Some(2), "Kay", "two"));
        assert_eq!(seqs(log.events()), vec![Some(2), None, None, Some(4)]);
        assert_eq!(log.events()[1].id.as_str(), "u1");
        assert_eq!(log.events()[2].id.as_str(), "u2");
    }

    #[test]
    fn extend_counts_insertions() {
        let mut log = EventLog::new();
        let batch = vec![
            event("x", Some(1), "Kay", "one"),
            event("x", Some(1), "Kay", "one"),
            event("x", Some(2), "Bors", "two"),
        ];
        assert_eq!(log.extend(batch), 2);
    }

    #[test]
    fn clear_resets() {
        let mut log = EventLog::new();
        let _ = log.merge(event("a", Some(1), "Kay", "one"));
        log.clear();
        assert!(log.is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_event() -> impl Strategy<Value = DebateEvent> {
            (
                proptest::option::of(0u64..40),
                0usize..4,
                "[a-d]{1,2}",
                "[a-z]{1,6}",
            )
                .prop_map(|(seq, knight, headline, id)| {
                    let knights = ["Kay", "Bors", "Gawain", "Percival"];
                    let mut e = event(&id, seq, knights[knight], &headline);
                    e.detail = format!("{id}-{headline}");
                    e
                })
        }

        proptest! {
            #[test]
            fn merge_is_idempotent(
                base in proptest::collection::vec(arb_event(), 0..20),
                incoming in arb_event(),
            ) {
                let mut collection = Vec::new();
                for e in base {
                    collection = merge(&collection, e);
                }
                let once = merge(&collection, incoming.clone());
                let twice = merge(&once, incoming);
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn sequenced_events_stay_ordered(
                batch in proptest::collection::vec(arb_event(), 0..40),
            ) {
                let mut log = EventLog::new();
                let _ = log.extend(batch);
                let sequenced: Vec<u64> = log.events().iter().filter_map(|e| e.sequence_id).collect();
                prop_assert!(sequenced.windows(2).all(|w| w[0] < w[1]));
            }

            #[test]
            fn ids_stay_unique(
                batch in proptest::collection::vec(arb_event(), 0..40),
            ) {
                let mut log = EventLog::new();
                let _ = log.extend(batch);
                let mut ids: Vec<&str> = log.events().iter().map(|e| e.id.as_str()).collect();
                let before = ids.len();
                ids.sort_unstable();
                ids.dedup();
                prop_assert_eq!(before, ids.len());
            }
        }
    }
}
