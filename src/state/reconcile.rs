//! Merges events that arrive over redundant paths into one ordered,
//! de-duplicated log.
//!
//! Identity comes from [`EventEnvelope::id`]. Callers apply side effects only
//! for [`Observation::New`] (and re-apply idempotent upserts for
//! [`Observation::Superseded`]); everything else is bookkeeping.

use crate::event::{EventEnvelope, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Produced or submitted directly to the authoritative session
    Local,
    /// Pushed over a live subscription
    Push,
    /// Picked up from a snapshot poll
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First sight; `seq` is its position in arrival order
    New { seq: u64 },
    /// Same identity with a newer timestamp; stored record replaced and
    /// re-sequenced so incremental readers pick it up again
    Superseded { seq: u64 },
    /// Already known; optional fields merged into the stored record
    Enriched { seq: u64 },
    /// Already known, nothing new
    Duplicate { seq: u64 },
}

impl Observation {
    pub fn seq(&self) -> u64 {
        match self {
            Observation::New { seq }
            | Observation::Superseded { seq }
            | Observation::Enriched { seq }
            | Observation::Duplicate { seq } => *seq,
        }
    }

    /// Whether side effects should run for this observation
    pub fn should_apply(&self) -> bool {
        matches!(
            self,
            Observation::New { .. } | Observation::Superseded { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct Stored {
    envelope: EventEnvelope,
    source: EventSource,
}

#[derive(Debug, Default)]
pub struct EventReconciler {
    records: HashMap<EventId, Stored>,
    order: BTreeSet<(DateTime<Utc>, u64, EventId)>,
    next_seq: u64,
    /// Highest authoritative seq seen from upstream (push or poll)
    upstream_seq: u64,
}

impl EventReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_seq(&self) -> u64 {
        self.next_seq
    }

    /// Highest upstream sequence number observed, for `since` polling
    pub fn upstream_seq(&self) -> u64 {
        self.upstream_seq
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.records.contains_key(id)
    }

    /// Observe an event from any path.
    ///
    /// For `Local` events the reconciler assigns the envelope's `seq`;
    /// for `Push`/`Poll` events the upstream seq is kept as delivered.
    pub fn observe(&mut self, mut envelope: EventEnvelope, source: EventSource) -> Observation {
        let id = envelope.id();
        if source != EventSource::Local {
            self.upstream_seq = self.upstream_seq.max(envelope.seq);
        }

        if let Some(stored) = self.records.get_mut(&id) {
            let seq = stored.envelope.seq;
            if envelope.timestamp > stored.envelope.timestamp {
                let old_key = (stored.envelope.timestamp, seq, id.clone());
                // A revision must land past every `since` cursor that saw the old record
                let revised_seq = if source == EventSource::Local {
                    self.next_seq += 1;
                    self.next_seq
                } else if envelope.seq > seq {
                    envelope.seq
                } else {
                    seq
                };
                envelope.seq = revised_seq;
                if envelope.same_choice(&stored.envelope) {
                    envelope.enrich_from(&stored.envelope);
                }
                let new_key = (envelope.timestamp, revised_seq, id.clone());
                stored.envelope = envelope;
                stored.source = source;
                self.order.remove(&old_key);
                self.order.insert(new_key);
                return Observation::Superseded { seq: revised_seq };
            }
            if stored.envelope.enrich_from(&envelope) {
                return Observation::Enriched { seq };
            }
            return Observation::Duplicate { seq };
        }

        self.next_seq += 1;
        if source == EventSource::Local || envelope.seq == 0 {
            envelope.seq = self.next_seq;
        }
        let seq = envelope.seq;
        self.order.insert((envelope.timestamp, seq, id.clone()));
        self.records.insert(id, Stored { envelope, source });
        Observation::New { seq }
    }

    pub fn get(&self, id: &EventId) -> Option<&EventEnvelope> {
        self.records.get(id).map(|s| &s.envelope)
    }

    pub fn source_of(&self, id: &EventId) -> Option<EventSource> {
        self.records.get(id).map(|s| s.source)
    }

    /// All events ordered by timestamp
    pub fn ordered(&self) -> Vec<EventEnvelope> {
        self.order
            .iter()
            .filter_map(|(_, _, id)| self.records.get(id))
            .map(|s| s.envelope.clone())
            .collect()
    }

    /// Events with a seq greater than `since`, ordered by timestamp
    pub fn since(&self, since: u64) -> Vec<EventEnvelope> {
        self.order
            .iter()
            .filter(|(_, seq, _)| *seq > since)
            .filter_map(|(_, _, id)| self.records.get(id))
            .map(|s| s.envelope.clone())
            .collect()
    }

    /// Forget everything (session teardown)
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::types::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn meta(seq: u64, ms: i64, reasoning: Option<&str>) -> EventEnvelope {
        let mut env = EventEnvelope::meta_vote(MetaVote {
            poll_id: "p1".to_string(),
            team: Team::Blue,
            voter: "bot-1".to_string(),
            action: MetaAction::EndTurn,
            confidence: 0.9,
            timestamp: at(ms),
            reasoning: reasoning.map(str::to_string),
        });
        env.seq = seq;
        env
    }

    fn chat(seq: u64, ms: i64, author: &str, message: &str) -> EventEnvelope {
        let mut env = EventEnvelope::discussion(DiscussionEntry {
            team: Team::Blue,
            author: author.to_string(),
            message: message.to_string(),
            suggestions: vec![],
            timestamp: at(ms),
            voting_context: None,
        });
        env.seq = seq;
        env
    }

    #[test]
    fn test_poll_then_push_applies_once_and_merges() {
        let mut r = EventReconciler::new();
        let first = r.observe(meta(4, 10, None), EventSource::Poll);
        assert!(first.should_apply());
        let second = r.observe(meta(4, 10, Some("only one clue left")), EventSource::Push);
        assert_eq!(second, Observation::Enriched { seq: 4 });
        assert!(!second.should_apply());
        let third = r.observe(meta(4, 10, None), EventSource::Push);
        assert_eq!(third, Observation::Duplicate { seq: 4 });

        assert_eq!(r.len(), 1);
        match &r.ordered()[0].payload {
            EventPayload::MetaVote(v) => {
                assert_eq!(v.reasoning.as_deref(), Some("only one clue left"))
            }
            _ => panic!("Expected meta vote"),
        }
    }

    #[test]
    fn test_push_then_poll_is_symmetric() {
        let mut r = EventReconciler::new();
        assert!(r
            .observe(meta(2, 10, Some("why")), EventSource::Push)
            .should_apply());
        assert_eq!(
            r.observe(meta(2, 10, None), EventSource::Poll),
            Observation::Duplicate { seq: 2 }
        );
        assert_eq!(r.upstream_seq(), 2);
    }

    fn meta_action(seq: u64, ms: i64, action: MetaAction, reasoning: Option<&str>) -> EventEnvelope {
        let mut env = meta(seq, ms, reasoning);
        if let EventPayload::MetaVote(v) = &mut env.payload {
            v.action = action;
        }
        env
    }

    fn reasoning_of(env: &EventEnvelope) -> Option<&str> {
        match &env.payload {
            EventPayload::MetaVote(v) => v.reasoning.as_deref(),
            _ => panic!("Expected meta vote"),
        }
    }

    #[test]
    fn test_same_choice_revision_keeps_reasoning() {
        let mut r = EventReconciler::new();
        r.observe(meta(0, 10, Some("first thought")), EventSource::Local);
        let revised = r.observe(meta(0, 20, None), EventSource::Local);
        assert_eq!(revised, Observation::Superseded { seq: 2 });
        let events = r.ordered();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, at(20));
        assert_eq!(reasoning_of(&events[0]), Some("first thought"));
    }

    #[test]
    fn test_changed_choice_drops_old_reasoning() {
        let mut r = EventReconciler::new();
        r.observe(
            meta_action(0, 10, MetaAction::Continue, Some("keep going")),
            EventSource::Local,
        );
        r.observe(
            meta_action(0, 20, MetaAction::EndTurn, None),
            EventSource::Local,
        );
        assert_eq!(reasoning_of(&r.ordered()[0]), None);
    }

    #[test]
    fn test_revision_moves_past_since_cursor() {
        let mut r = EventReconciler::new();
        r.observe(
            meta_action(0, 10, MetaAction::Continue, None),
            EventSource::Local,
        );
        r.observe(chat(0, 15, "a", "hmm"), EventSource::Local);
        let cursor = r.last_seq();
        assert!(r.since(cursor).is_empty());

        let revised = r.observe(
            meta_action(0, 20, MetaAction::EndTurn, None),
            EventSource::Local,
        );
        assert_eq!(revised, Observation::Superseded { seq: 3 });
        let picked_up = r.since(cursor);
        assert_eq!(picked_up.len(), 1);
        assert_eq!(picked_up[0].seq, 3);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_upstream_revision_takes_delivered_seq() {
        let mut r = EventReconciler::new();
        r.observe(meta(2, 10, None), EventSource::Poll);
        let revised = r.observe(meta(7, 20, None), EventSource::Push);
        assert_eq!(revised, Observation::Superseded { seq: 7 });
        assert_eq!(r.since(2).len(), 1);
    }

    #[test]
    fn test_out_of_order_arrivals_are_time_ordered() {
        let mut r = EventReconciler::new();
        r.observe(chat(0, 30, "a", "third"), EventSource::Local);
        r.observe(chat(0, 10, "b", "first"), EventSource::Local);
        r.observe(chat(0, 20, "c", "second"), EventSource::Local);
        let messages: Vec<String> = r
            .ordered()
            .into_iter()
            .map(|e| match e.payload {
                EventPayload::Discussion(d) => d.message,
                _ => String::new(),
            })
            .collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert_eq!(r.since(2).len(), 1);
        assert_eq!(r.last_seq(), 3);
    }
}
